//! Operator override of an output.
//!
//! The override never touches the hardware or the store itself: it
//! validates the request and publishes an [`OverrideRequest`] that the
//! controller loop applies through its single write path. Starting the
//! well pump is refused when the tank is close to full.

use std::sync::Arc;

use wello_db::TimeSeriesStore;
use wello_events::{EventBus, PublishReport};
use wello_types::{MetricKind, OutputKind, OverrideRequest};

use crate::capacity::TankCapacity;
use crate::clock::Clock;

/// Reasons an override request is refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OverrideError {
    /// Starting the pump could overflow the tank.
    #[error("tank may overflow: volume {volume} mm3, capacity {capacity} mm3, margin {margin} mm3")]
    TankMayOverflow {
        /// Last known volume.
        volume: f64,
        /// Usable tank volume.
        capacity: f64,
        /// Head room kept below capacity.
        margin: f64,
    },

    /// No volume reading exists yet, so the overflow risk is unknown.
    #[error("tank volume is unknown; refusing to start {output}")]
    VolumeUnknown {
        /// The output the request was for.
        output: OutputKind,
    },

    /// Nobody is listening on the override channel.
    #[error("override for {output} was not delivered to the controller")]
    NotDelivered {
        /// The output the request was for.
        output: OutputKind,
    },
}

/// Entry point for operator overrides.
#[derive(Debug, Clone)]
pub struct ManualOverride {
    bus: Arc<EventBus>,
    store: Arc<TimeSeriesStore>,
    tank: TankCapacity,
    clock: Arc<dyn Clock>,
}

impl ManualOverride {
    /// Create an override entry point.
    pub fn new(
        bus: Arc<EventBus>,
        store: Arc<TimeSeriesStore>,
        tank: TankCapacity,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bus,
            store,
            tank,
            clock,
        }
    }

    /// Ask for `output` to be switched to `running`.
    ///
    /// # Errors
    ///
    /// Returns [`OverrideError::TankMayOverflow`] or
    /// [`OverrideError::VolumeUnknown`] when starting the pump is unsafe,
    /// and [`OverrideError::NotDelivered`] when no controller received
    /// the request.
    pub async fn request(
        &self,
        output: OutputKind,
        running: bool,
    ) -> Result<PublishReport, OverrideError> {
        if output == OutputKind::PumpIn && running {
            self.check_room(output)?;
        }

        let report = self
            .bus
            .overrides()
            .publish(OverrideRequest {
                output,
                running,
                timestamp: self.clock.now(),
            })
            .await;

        if report.delivered == 0 {
            return Err(OverrideError::NotDelivered { output });
        }
        tracing::info!(output = %output, running, "Manual override requested");
        Ok(report)
    }

    fn check_room(&self, output: OutputKind) -> Result<(), OverrideError> {
        let volume = self
            .store
            .last_reading(MetricKind::Volume)
            .ok_or(OverrideError::VolumeUnknown { output })?
            .value;
        if self.tank.may_overflow(volume) {
            tracing::warn!(
                volume,
                capacity = self.tank.capacity(),
                margin = self.tank.margin(),
                "Refusing manual pump start: tank may overflow"
            );
            return Err(OverrideError::TankMayOverflow {
                volume,
                capacity: self.tank.capacity(),
                margin: self.tank.margin(),
            });
        }
        Ok(())
    }
}
