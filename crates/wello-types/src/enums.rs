//! Enumeration types for the Wello controller.
//!
//! Metric and output kinds identify the per-metric and per-output logs of
//! the time-series store. [`Command`] is the tri-state result of the
//! decision engine.

use core::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// A measured quantity with its own ordered log of readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Water flowing from the well into the tank (mm3/s).
    FlowIn,
    /// Water flowing out of the tank to the house (mm3/s).
    FlowOut,
    /// Volume of water currently held by the tank (mm3).
    Volume,
}

impl MetricKind {
    /// Every metric, in polling order.
    pub const ALL: [Self; 3] = [Self::FlowIn, Self::FlowOut, Self::Volume];

    /// Stable identifier used in the journal and in log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FlowIn => "flow_in",
            Self::FlowOut => "flow_out",
            Self::Volume => "volume",
        }
    }

    /// Parse the identifier produced by [`MetricKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// A controlled digital output with its own ordered log of states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// The well pump filling the tank.
    PumpIn,
    /// The municipal network valve used as an operator-driven fallback.
    UrbanNetwork,
}

impl OutputKind {
    /// Every output.
    pub const ALL: [Self; 2] = [Self::PumpIn, Self::UrbanNetwork];

    /// Stable identifier used in the journal and in log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PumpIn => "pump_in",
            Self::UrbanNetwork => "urban_network",
        }
    }

    /// Parse the identifier produced by [`OutputKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Whether a reading of `metric` should trigger a re-evaluation of
    /// this output.
    pub const fn is_driven_by(self, metric: MetricKind) -> bool {
        matches!(
            (self, metric),
            (Self::PumpIn, MetricKind::FlowIn | MetricKind::Volume)
                | (Self::UrbanNetwork, MetricKind::Volume | MetricKind::FlowOut)
        )
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Tri-state actuation result.
///
/// `Any` means "no opinion": the hardware is left as it is. It is kept
/// distinct from `Off` so that "do nothing" can never be mistaken for
/// "switch off".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Switch the output on.
    On,
    /// Switch the output off.
    Off,
    /// Leave the output unchanged.
    Any,
}

impl Command {
    /// The `running` value this command asks for, or `None` for `Any`.
    pub const fn running(self) -> Option<bool> {
        match self {
            Self::On => Some(true),
            Self::Off => Some(false),
            Self::Any => None,
        }
    }

    /// The command that drives an output to `running`.
    pub const fn from_running(running: bool) -> Self {
        if running { Self::On } else { Self::Off }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Any => "any",
        })
    }
}

// ---------------------------------------------------------------------------
// Notification tags
// ---------------------------------------------------------------------------

/// Why an actuator state record was appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCause {
    /// First observation after the controller (re)started.
    Baseline,
    /// Produced by the decision engine.
    Decision,
    /// Requested by an operator through the manual override.
    Override,
    /// The hardware was observed in a state other than the persisted one.
    Observed,
}

/// Component that raised a [`FaultEvent`](crate::FaultEvent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultSource {
    /// The time-series store rejected or failed an append.
    Store,
    /// The hardware driver kept failing after every retry.
    Driver,
    /// The decision engine could not be configured or used.
    Configuration,
}
