//! Persisted records.
//!
//! Both record types are immutable once appended to the time-series
//! store. The store never mutates or deletes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{MetricKind, OutputKind};

/// A single timestamped sensor sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// The measured quantity.
    pub metric: MetricKind,
    /// Sampled value (mm3/s for flows, mm3 for volume).
    pub value: f64,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Create a reading.
    pub const fn new(metric: MetricKind, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            metric,
            value,
            timestamp,
        }
    }
}

/// Observed or decided state of a controlled output.
///
/// A record is appended only on an actual transition, or when the
/// controller (re)starts and needs a known baseline. It never represents
/// an instruction -- commands are transient and not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorStateRecord {
    /// The output this record belongs to.
    pub output: OutputKind,
    /// Whether the output is running.
    pub running: bool,
    /// When the state took effect.
    pub timestamp: DateTime<Utc>,
}

impl ActuatorStateRecord {
    /// Create a state record.
    pub const fn new(output: OutputKind, running: bool, timestamp: DateTime<Utc>) -> Self {
        Self {
            output,
            running,
            timestamp,
        }
    }
}
