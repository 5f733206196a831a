//! In-process publish/subscribe bus for the Wello controller.
//!
//! The bus is the only coupling between the hardware I/O loop, the
//! controller loop and any observer (a logger, an operator console). Each
//! channel carries one payload type from `wello-types`; publishers never
//! know who listens.
//!
//! Delivery guarantees:
//!
//! - Subscribers of a channel see payloads in publish order.
//! - A failing or panicking subscriber never affects the publisher or the
//!   other subscribers.
//! - A subscriber whose queue stays full for longer than the handoff
//!   timeout loses that payload, and the drop is logged.

pub mod error;
pub mod topic;

pub use error::{BusError, HandlerError};
pub use topic::{
    BusConfig, PublishReport, Subscription, SubscriptionId, Topic, TopicMetricsSnapshot,
};

use wello_types::{
    CommandEvent, FaultEvent, OutputObserved, OverrideRequest, Reading, StateChanged,
    ThresholdsUpdate,
};

/// Channel carrying sensor samples from the I/O loop.
pub const READINGS: &str = "reading";
/// Channel carrying hardware observations of the outputs.
pub const OBSERVED: &str = "observed";
/// Channel carrying actuation commands for the I/O loop.
pub const COMMANDS: &str = "command";
/// Channel carrying persisted output state changes.
pub const STATE_CHANGES: &str = "state-changed";
/// Channel carrying operator override requests.
pub const OVERRIDES: &str = "override";
/// Channel carrying decision threshold updates.
pub const CONFIGURATION: &str = "configuration";
/// Channel carrying faults for operators.
pub const FAULTS: &str = "fault";

/// The set of typed channels shared by every component.
///
/// Cloning is not supported; share it behind an `Arc`.
#[derive(Debug)]
pub struct EventBus {
    readings: Topic<Reading>,
    observed: Topic<OutputObserved>,
    commands: Topic<CommandEvent>,
    state_changes: Topic<StateChanged>,
    overrides: Topic<OverrideRequest>,
    configuration: Topic<ThresholdsUpdate>,
    faults: Topic<FaultEvent>,
}

impl EventBus {
    /// Create a bus whose channels all use `config`.
    pub fn new(config: BusConfig) -> Self {
        Self {
            readings: Topic::new(READINGS, config),
            observed: Topic::new(OBSERVED, config),
            commands: Topic::new(COMMANDS, config),
            state_changes: Topic::new(STATE_CHANGES, config),
            overrides: Topic::new(OVERRIDES, config),
            configuration: Topic::new(CONFIGURATION, config),
            faults: Topic::new(FAULTS, config),
        }
    }

    /// Sensor samples.
    pub const fn readings(&self) -> &Topic<Reading> {
        &self.readings
    }

    /// Hardware observations of the outputs.
    pub const fn observed(&self) -> &Topic<OutputObserved> {
        &self.observed
    }

    /// Actuation commands.
    pub const fn commands(&self) -> &Topic<CommandEvent> {
        &self.commands
    }

    /// Persisted state changes.
    pub const fn state_changes(&self) -> &Topic<StateChanged> {
        &self.state_changes
    }

    /// Operator override requests.
    pub const fn overrides(&self) -> &Topic<OverrideRequest> {
        &self.overrides
    }

    /// Threshold updates.
    pub const fn configuration(&self) -> &Topic<ThresholdsUpdate> {
        &self.configuration
    }

    /// Faults.
    pub const fn faults(&self) -> &Topic<FaultEvent> {
        &self.faults
    }

    /// Counters of every channel.
    pub fn metrics(&self) -> Vec<TopicMetricsSnapshot> {
        vec![
            self.readings.metrics(),
            self.observed.metrics(),
            self.commands.metrics(),
            self.state_changes.metrics(),
            self.overrides.metrics(),
            self.configuration.metrics(),
            self.faults.metrics(),
        ]
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}
