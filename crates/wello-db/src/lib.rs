//! Append-only time-series store for the Wello controller.
//!
//! Readings are kept in one ordered log per metric and actuator state
//! records in one ordered log per output. The logs are served from memory
//! and made durable through a journal.
//!
//! # Architecture
//!
//! ```text
//! Controller Loop
//!     |
//!     +-- append_reading / append_state
//!     |       |
//!     |       +-- 1. Journal (SqliteJournal, or Memory)
//!     |       +-- 2. TimeSeriesLog (ordered, RwLock)
//!     |
//! Decision Engine, observers
//!     |
//!     +-- last / last_matching / all  --> TimeSeriesLog
//! ```
//!
//! # Modules
//!
//! - [`series`] -- a single ordered log and its queries
//! - [`store`] -- the fixed set of logs and the journal write path
//! - [`sqlite`] -- `SQLite` connection pool, migrations and row types
//! - [`error`] -- Shared error types

pub mod error;
pub mod series;
pub mod sqlite;
pub mod store;

// Re-export primary types for convenience.
pub use error::DbError;
pub use series::{TimeSeriesLog, Timestamped};
pub use sqlite::{ActuatorStateRow, ReadingRow, SqliteConfig, SqliteJournal};
pub use store::{Journal, TimeSeriesStore};
