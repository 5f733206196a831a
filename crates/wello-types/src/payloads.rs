//! Payloads carried by the event bus channels.
//!
//! Each bus channel has exactly one payload type. None of these values is
//! persisted by the store; persisted facts are [`Reading`](crate::Reading)
//! and [`ActuatorStateRecord`](crate::ActuatorStateRecord).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{ChangeCause, Command, FaultSource, OutputKind};

/// The hardware reported the current state of an output.
///
/// Published by the I/O loop once per output before polling starts, and
/// again after every write it applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputObserved {
    /// The observed output.
    pub output: OutputKind,
    /// Whether the output is running.
    pub running: bool,
    /// When the observation was made.
    pub timestamp: DateTime<Utc>,
}

/// An actuation instruction for the I/O loop.
///
/// The controller only ever publishes `On` or `Off`; the absence of a
/// command is the no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEvent {
    /// Target output.
    pub output: OutputKind,
    /// Requested actuation.
    pub command: Command,
    /// When the decision was taken.
    pub timestamp: DateTime<Utc>,
}

/// The persisted state of an output changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChanged {
    /// The output whose state changed.
    pub output: OutputKind,
    /// New running value.
    pub running: bool,
    /// Timestamp of the appended record.
    pub timestamp: DateTime<Utc>,
    /// What caused the change.
    pub cause: ChangeCause,
}

/// An operator asked for an output to be forced on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRequest {
    /// Target output.
    pub output: OutputKind,
    /// Requested running value.
    pub running: bool,
    /// When the request was made.
    pub timestamp: DateTime<Utc>,
}

/// Decision thresholds supplied by an external configuration source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdsUpdate {
    /// Minimum time an output must stay in a state before the engine
    /// trusts the flow reading, in milliseconds.
    pub min_running_delay_ms: u64,
    /// Inflow at or below which the well is considered dry (mm3/s).
    pub min_flow: f64,
}

/// Something an operator must look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultEvent {
    /// Component that raised the fault.
    pub source: FaultSource,
    /// Human-readable description.
    pub message: String,
    /// When the fault was raised.
    pub timestamp: DateTime<Utc>,
}
