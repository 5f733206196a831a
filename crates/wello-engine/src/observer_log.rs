//! Bus observers that write controller activity to the log.
//!
//! Each observer is a callback subscriber on its own task, so a slow log
//! sink never holds up the controller or the I/O loop. Payloads are
//! logged as a JSON `event` field for log shippers to pick up.

use serde::Serialize;
use wello_events::{BusError, EventBus, HandlerError, SubscriptionId};

/// Name under which the observers subscribe.
const OBSERVER: &str = "log-observer";

/// Attach the state-change, command and fault observers to `bus`.
///
/// Returns the subscription ids in that order.
pub fn attach(bus: &EventBus) -> Result<[SubscriptionId; 3], BusError> {
    let changes = bus.state_changes().subscribe_with(OBSERVER, |change| {
        let event = to_json(change)?;
        tracing::info!(
            output = %change.output,
            running = change.running,
            cause = ?change.cause,
            event = %event,
            "Output state changed"
        );
        Ok(())
    })?;

    let commands = bus.commands().subscribe_with(OBSERVER, |command| {
        let event = to_json(command)?;
        tracing::debug!(
            output = %command.output,
            command = %command.command,
            event = %event,
            "Command issued"
        );
        Ok(())
    })?;

    let faults = bus.faults().subscribe_with(OBSERVER, |fault| {
        let event = to_json(fault)?;
        tracing::warn!(source = ?fault.source, event = %event, "Fault reported");
        Ok(())
    })?;

    Ok([changes, commands, faults])
}

/// Log per-channel delivery counters.
pub fn log_bus_metrics(bus: &EventBus) {
    for snapshot in bus.metrics() {
        tracing::info!(
            channel = snapshot.channel,
            subscribers = snapshot.subscribers,
            published = snapshot.published,
            delivered = snapshot.delivered,
            dropped = snapshot.dropped,
            handler_faults = snapshot.handler_faults,
            "Bus channel totals"
        );
    }
}

fn to_json<T: Serialize>(payload: &T) -> Result<String, HandlerError> {
    serde_json::to_string(payload)
        .map_err(|e| HandlerError::new(format!("failed to serialize payload: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use wello_types::{ChangeCause, FaultEvent, FaultSource, OutputKind, StateChanged};

    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[tokio::test]
    async fn observers_receive_every_channel() {
        let bus = EventBus::default();
        attach(&bus).unwrap();

        let report = bus
            .state_changes()
            .publish(StateChanged {
                output: OutputKind::PumpIn,
                running: true,
                cause: ChangeCause::Decision,
                timestamp: t0(),
            })
            .await;
        assert_eq!(report.delivered, 1);

        let report = bus
            .faults()
            .publish(FaultEvent {
                source: FaultSource::Driver,
                message: "relay busy".to_owned(),
                timestamp: t0(),
            })
            .await;
        assert_eq!(report.delivered, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let faults = bus
            .metrics()
            .into_iter()
            .map(|m| m.handler_faults)
            .sum::<u64>();
        assert_eq!(faults, 0);
    }

    #[test]
    fn attaching_outside_a_runtime_fails() {
        let bus = EventBus::default();
        assert!(matches!(attach(&bus), Err(BusError::NoRuntime { .. })));
    }
}
