//! Error types for the controller binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during startup.

/// Top-level error for the controller binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: wello_core::config::ConfigError,
    },

    /// Opening or replaying the time-series store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: wello_db::DbError,
    },

    /// Attaching a bus handler failed.
    #[error("bus error: {source}")]
    Bus {
        /// The underlying bus error.
        #[from]
        source: wello_events::BusError,
    },

    /// The `simulator` section of the configuration is malformed.
    #[error("simulator config error: {message}")]
    Simulator {
        /// Description of the failure.
        message: String,
    },
}
