//! The time-series store: one ordered log per metric and per output.
//!
//! Writes go to the journal first and only then into the in-memory log,
//! so a record visible to readers is always durable. A journal failure
//! closes that log's write path: the failing append returns the
//! underlying error and every later append to the same log returns
//! [`DbError::WritePathFailed`]. The other logs keep working.

use wello_types::{ActuatorStateRecord, MetricKind, OutputKind, Reading};

use crate::error::DbError;
use crate::series::TimeSeriesLog;
use crate::sqlite::SqliteJournal;

/// Where appended records are made durable.
#[derive(Debug, Clone)]
pub enum Journal {
    /// Nothing outlives the process.
    Memory,
    /// Records are written to a `SQLite` database and replayed on open.
    Sqlite(SqliteJournal),
}

impl Journal {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite(_) => "sqlite",
        }
    }
}

/// Per-metric and per-output logs behind a single durable journal.
///
/// Share it behind an `Arc`: appends take `&self`. The controller loop is
/// the only writer of the output logs.
#[derive(Debug)]
pub struct TimeSeriesStore {
    journal: Journal,
    flow_in: TimeSeriesLog<Reading>,
    flow_out: TimeSeriesLog<Reading>,
    volume: TimeSeriesLog<Reading>,
    pump_in: TimeSeriesLog<ActuatorStateRecord>,
    urban_network: TimeSeriesLog<ActuatorStateRecord>,
}

impl TimeSeriesStore {
    fn empty(journal: Journal) -> Self {
        Self {
            journal,
            flow_in: TimeSeriesLog::new(MetricKind::FlowIn.as_str()),
            flow_out: TimeSeriesLog::new(MetricKind::FlowOut.as_str()),
            volume: TimeSeriesLog::new(MetricKind::Volume.as_str()),
            pump_in: TimeSeriesLog::new(OutputKind::PumpIn.as_str()),
            urban_network: TimeSeriesLog::new(OutputKind::UrbanNetwork.as_str()),
        }
    }

    /// A store that keeps everything in memory only.
    pub fn in_memory() -> Self {
        Self::empty(Journal::Memory)
    }

    /// Open a store on `journal`, running migrations and replaying every
    /// persisted record into the in-memory logs.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Migration`] or [`DbError::Sqlite`] if the
    /// journal cannot be prepared or read, and [`DbError::Corrupt`] if a
    /// persisted row cannot be decoded.
    pub async fn open(journal: Journal) -> Result<Self, DbError> {
        let store = Self::empty(journal);

        if let Journal::Sqlite(sqlite) = &store.journal {
            sqlite.run_migrations().await?;

            let readings = sqlite.load_readings().await?;
            let reading_count = readings.len();
            for row in readings {
                let reading = Reading::try_from(row)?;
                store.readings(reading.metric).insert(reading);
            }

            let states = sqlite.load_states().await?;
            let state_count = states.len();
            for row in states {
                let record = ActuatorStateRecord::try_from(row)?;
                store.states(record.output).insert(record);
            }

            tracing::info!(
                readings = reading_count,
                states = state_count,
                "Replayed journal into time-series store"
            );
        }

        Ok(store)
    }

    /// The log of `metric`.
    pub const fn readings(&self, metric: MetricKind) -> &TimeSeriesLog<Reading> {
        match metric {
            MetricKind::FlowIn => &self.flow_in,
            MetricKind::FlowOut => &self.flow_out,
            MetricKind::Volume => &self.volume,
        }
    }

    /// The log of `output`.
    pub const fn states(&self, output: OutputKind) -> &TimeSeriesLog<ActuatorStateRecord> {
        match output {
            OutputKind::PumpIn => &self.pump_in,
            OutputKind::UrbanNetwork => &self.urban_network,
        }
    }

    /// Most recent reading of `metric`.
    pub fn last_reading(&self, metric: MetricKind) -> Option<Reading> {
        self.readings(metric).last()
    }

    /// Most recent state record of `output`.
    pub fn last_state(&self, output: OutputKind) -> Option<ActuatorStateRecord> {
        self.states(output).last()
    }

    /// Most recent state record of `output` whose `running` equals
    /// `running`.
    pub fn last_state_where(
        &self,
        output: OutputKind,
        running: bool,
    ) -> Option<ActuatorStateRecord> {
        self.states(output).last_matching(|record| record.running == running)
    }

    /// Append a reading to its metric log.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NonFiniteValue`] for a NaN or infinite value,
    /// which leaves the log open. Returns [`DbError::WritePathFailed`] if
    /// an earlier write to this log failed, or the journal error that
    /// closes the write path now.
    pub async fn append_reading(&self, reading: Reading) -> Result<(), DbError> {
        let log = self.readings(reading.metric);
        if !reading.value.is_finite() {
            return Err(DbError::NonFiniteValue {
                log: log.name(),
                value: reading.value,
            });
        }
        if log.is_write_failed() {
            return Err(DbError::WritePathFailed { log: log.name() });
        }
        if let Journal::Sqlite(sqlite) = &self.journal {
            if let Err(e) = sqlite.insert_reading(&reading).await {
                log.mark_write_failed();
                tracing::error!(
                    log = log.name(),
                    error = %e,
                    "Journal write failed, closing write path"
                );
                return Err(e);
            }
        }
        log.insert(reading);
        Ok(())
    }

    /// Append a state record to its output log.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::WritePathFailed`] if an earlier write to this
    /// log failed, or the journal error that closes the write path now.
    pub async fn append_state(&self, record: ActuatorStateRecord) -> Result<(), DbError> {
        let log = self.states(record.output);
        if log.is_write_failed() {
            return Err(DbError::WritePathFailed { log: log.name() });
        }
        if let Journal::Sqlite(sqlite) = &self.journal {
            if let Err(e) = sqlite.insert_state(&record).await {
                log.mark_write_failed();
                tracing::error!(
                    log = log.name(),
                    error = %e,
                    "Journal write failed, closing write path"
                );
                return Err(e);
            }
        }
        log.insert(record);
        Ok(())
    }

    /// Close the journal. Every append that returned `Ok` is already
    /// durable, so nothing is lost.
    pub async fn close(&self) {
        if let Journal::Sqlite(sqlite) = &self.journal {
            sqlite.close().await;
        }
        tracing::info!(journal = self.journal.kind(), "Time-series store closed");
    }
}
