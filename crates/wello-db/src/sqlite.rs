//! `SQLite` journal backing the time-series store.
//!
//! Every record is written here before it becomes visible in memory, and
//! the whole journal is replayed when the store opens. Uses [`sqlx`] with
//! runtime query construction (not compile-time checked) so no database
//! is needed at build time. All queries are parameterized.
//!
//! Timestamps are stored as microseconds since the Unix epoch; the
//! autoincrement `id` breaks ties so replay preserves append order.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use wello_types::{ActuatorStateRecord, MetricKind, OutputKind, Reading};

use crate::error::DbError;

/// Default maximum number of connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default idle timeout in seconds.
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Configuration for the `SQLite` connection pool.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// `SQLite` connection URL.
    ///
    /// Format: `sqlite://path/to/wello.db` or `sqlite::memory:`
    pub url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
}

impl SqliteConfig {
    /// Create a new configuration from a database URL.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Whether the URL names a private in-memory database.
    fn is_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// A row of the `readings` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReadingRow {
    /// Autoincremented row ID.
    pub id: i64,
    /// Metric identifier (see [`MetricKind::as_str`]).
    pub metric: String,
    /// Sampled value.
    pub value: f64,
    /// Microseconds since the Unix epoch.
    pub timestamp_us: i64,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = DbError;

    fn try_from(row: ReadingRow) -> Result<Self, Self::Error> {
        let metric = MetricKind::parse(&row.metric).ok_or_else(|| DbError::Corrupt {
            table: "readings",
            detail: format!("row {}: unknown metric {:?}", row.id, row.metric),
        })?;
        let timestamp = from_micros("readings", row.id, row.timestamp_us)?;
        Ok(Self::new(metric, row.value, timestamp))
    }
}

/// A row of the `actuator_states` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActuatorStateRow {
    /// Autoincremented row ID.
    pub id: i64,
    /// Output identifier (see [`OutputKind::as_str`]).
    pub output: String,
    /// Whether the output was running.
    pub running: bool,
    /// Microseconds since the Unix epoch.
    pub timestamp_us: i64,
}

impl TryFrom<ActuatorStateRow> for ActuatorStateRecord {
    type Error = DbError;

    fn try_from(row: ActuatorStateRow) -> Result<Self, Self::Error> {
        let output = OutputKind::parse(&row.output).ok_or_else(|| DbError::Corrupt {
            table: "actuator_states",
            detail: format!("row {}: unknown output {:?}", row.id, row.output),
        })?;
        let timestamp = from_micros("actuator_states", row.id, row.timestamp_us)?;
        Ok(Self::new(output, row.running, timestamp))
    }
}

fn from_micros(table: &'static str, id: i64, micros: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| DbError::Corrupt {
        table,
        detail: format!("row {id}: timestamp {micros} out of range"),
    })
}

/// Connection pool handle to the `SQLite` journal.
#[derive(Debug, Clone)]
pub struct SqliteJournal {
    pool: SqlitePool,
}

impl SqliteJournal {
    /// Open (creating if missing) the database described by `config`.
    ///
    /// In-memory databases live as long as their single connection, so
    /// the pool is pinned to one connection that never idles out.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Sqlite`] if the connection fails.
    pub async fn connect(config: &SqliteConfig) -> Result<Self, DbError> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| DbError::Config(format!("Invalid database URL: {e}")))?
            .create_if_missing(true);

        let options = SqlitePoolOptions::new().acquire_timeout(config.connect_timeout);
        let options = if config.is_memory() {
            options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options
                .max_connections(config.max_connections)
                .idle_timeout(config.idle_timeout)
        };
        let pool = options.connect_with(connect_options).await?;

        tracing::info!(
            url = %config.url,
            max_connections = config.max_connections,
            "Connected to SQLite journal"
        );

        Ok(Self { pool })
    }

    /// Connect using a database URL string with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection fails.
    pub async fn connect_url(url: &str) -> Result<Self, DbError> {
        Self::connect(&SqliteConfig::new(url)).await
    }

    /// Run all pending migrations from the `migrations/` directory.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Migration`] if any migration fails.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Journal migrations completed");
        Ok(())
    }

    /// Append a reading.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if the insert fails.
    pub async fn insert_reading(&self, reading: &Reading) -> Result<(), DbError> {
        sqlx::query(r"INSERT INTO readings (metric, value, timestamp_us) VALUES (?1, ?2, ?3)")
            .bind(reading.metric.as_str())
            .bind(reading.value)
            .bind(reading.timestamp.timestamp_micros())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append an actuator state record.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if the insert fails.
    pub async fn insert_state(&self, record: &ActuatorStateRecord) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO actuator_states (output, running, timestamp_us) VALUES (?1, ?2, ?3)",
        )
        .bind(record.output.as_str())
        .bind(record.running)
        .bind(record.timestamp.timestamp_micros())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every reading, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if the query fails.
    pub async fn load_readings(&self) -> Result<Vec<ReadingRow>, DbError> {
        let rows = sqlx::query_as::<_, ReadingRow>(
            r"SELECT id, metric, value, timestamp_us
              FROM readings
              ORDER BY timestamp_us, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Every actuator state record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if the query fails.
    pub async fn load_states(&self) -> Result<Vec<ActuatorStateRow>, DbError> {
        let rows = sqlx::query_as::<_, ActuatorStateRow>(
            r"SELECT id, output, running, timestamp_us
              FROM actuator_states
              ORDER BY timestamp_us, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Close all connections in the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("SQLite journal closed");
    }
}
