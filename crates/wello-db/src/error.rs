//! Error types for the time-series store.
//!
//! All errors are propagated via [`DbError`], which wraps the underlying
//! [`sqlx`] errors and adds the store's own write-path and replay faults.

/// Errors that can occur in the store.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// A `SQLite` migration failed.
    #[error("SQLite migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An earlier journal write to this log failed; the log no longer
    /// accepts appends.
    #[error("write path of log {log} has failed, appends are refused")]
    WritePathFailed {
        /// Name of the log.
        log: &'static str,
    },

    /// A reading value is NaN or infinite. The log stays open.
    #[error("refusing non-finite value {value} for log {log}")]
    NonFiniteValue {
        /// Name of the log.
        log: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// A journal row could not be turned back into a record.
    #[error("corrupt row in {table}: {detail}")]
    Corrupt {
        /// Table holding the row.
        table: &'static str,
        /// What was wrong with it.
        detail: String,
    },

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
