//! The controller loop: the single writer of the output logs.
//!
//! The loop owns its bus subscriptions from construction, so creating the
//! controller before starting the I/O loop guarantees no reading is
//! missed. Each output moves through two phases:
//!
//! - `Unknown`: no baseline yet. The first [`OutputObserved`] always
//!   appends a baseline record; no decision is taken before it.
//! - `Observing`: every relevant reading re-runs the decision engine. An
//!   `On`/`Off` that differs from the persisted state appends a record
//!   and publishes `state-changed` and `command`. `Any`, or a result equal
//!   to the persisted state, does nothing.
//!
//! Readings are appended to their log as they arrive, whatever the phase.
//! Store failures are published on the `fault` channel; they never stop
//! the loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use wello_db::{DbError, TimeSeriesStore};
use wello_events::{EventBus, Subscription};
use wello_types::{
    ActuatorStateRecord, ChangeCause, Command, CommandEvent, FaultEvent, FaultSource,
    OutputKind, OutputObserved, OverrideRequest, Reading, StateChanged, ThresholdsUpdate,
};

use crate::clock::Clock;
use crate::decision::{EngineSlot, Thresholds};
use crate::shutdown::ShutdownSignal;

/// Per-output lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the first hardware observation.
    Unknown,
    /// Baseline established; decisions are taken.
    Observing,
}

#[derive(Debug, Clone, Copy)]
struct Phases {
    pump_in: Phase,
    urban_network: Phase,
}

impl Phases {
    const fn get(&self, output: OutputKind) -> Phase {
        match output {
            OutputKind::PumpIn => self.pump_in,
            OutputKind::UrbanNetwork => self.urban_network,
        }
    }

    const fn set(&mut self, output: OutputKind, phase: Phase) {
        match output {
            OutputKind::PumpIn => self.pump_in = phase,
            OutputKind::UrbanNetwork => self.urban_network = phase,
        }
    }
}

/// Decides and records output state from bus events.
#[derive(Debug)]
pub struct ControllerLoop {
    bus: Arc<EventBus>,
    store: Arc<TimeSeriesStore>,
    clock: Arc<dyn Clock>,
    slot: EngineSlot,
    phases: Phases,
    warned_unconfigured: bool,
    readings: Subscription<Reading>,
    observed: Subscription<OutputObserved>,
    overrides: Subscription<OverrideRequest>,
    configuration: Subscription<ThresholdsUpdate>,
}

impl ControllerLoop {
    /// Create the controller and subscribe it to its input channels.
    ///
    /// `slot` may already hold an engine when thresholds come from the
    /// configuration file; otherwise the first `configuration` event
    /// installs one.
    pub fn new(
        bus: Arc<EventBus>,
        store: Arc<TimeSeriesStore>,
        clock: Arc<dyn Clock>,
        slot: EngineSlot,
    ) -> Self {
        let readings = bus.readings().subscribe("controller");
        let observed = bus.observed().subscribe("controller");
        let overrides = bus.overrides().subscribe("controller");
        let configuration = bus.configuration().subscribe("controller");
        Self {
            bus,
            store,
            clock,
            slot,
            phases: Phases {
                pump_in: Phase::Unknown,
                urban_network: Phase::Unknown,
            },
            warned_unconfigured: false,
            readings,
            observed,
            overrides,
            configuration,
        }
    }

    /// Current phase of `output`.
    pub const fn phase(&self, output: OutputKind) -> Phase {
        self.phases.get(output)
    }

    /// Whether the decision engine has thresholds.
    pub const fn is_configured(&self) -> bool {
        self.slot.is_configured()
    }

    /// Process events until `shutdown` fires, then close the store.
    ///
    /// The event being handled when the stop arrives is finished first.
    pub async fn run(mut self, shutdown: Arc<ShutdownSignal>) {
        tracing::info!(configured = self.slot.is_configured(), "Controller loop started");

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(update) = self.configuration.recv() => self.on_thresholds(update).await,
                Some(observed) = self.observed.recv() => self.on_observed(observed).await,
                Some(request) = self.overrides.recv() => self.on_override(request).await,
                Some(reading) = self.readings.recv() => self.on_reading(reading).await,
                else => break,
            }
        }

        self.store.close().await;
        tracing::info!("Controller loop stopped");
    }

    /// Install thresholds received on the bus, then re-evaluate.
    pub async fn on_thresholds(&mut self, update: ThresholdsUpdate) {
        let thresholds = match Thresholds::from_update(&update) {
            Ok(thresholds) => thresholds,
            Err(e) => {
                self.report_fault(FaultSource::Configuration, e.to_string()).await;
                return;
            }
        };
        match self.slot.configure(thresholds) {
            Ok(engine) => {
                let thresholds = engine.thresholds();
                tracing::info!(
                    min_running_delay_ms = thresholds.min_running_delay().num_milliseconds(),
                    min_flow = thresholds.min_flow(),
                    "Decision engine configured"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Threshold update rejected");
                return;
            }
        }
        for output in OutputKind::ALL {
            self.evaluate(output).await;
        }
    }

    /// Record a hardware observation.
    pub async fn on_observed(&mut self, observed: OutputObserved) {
        let output = observed.output;
        match self.phases.get(output) {
            Phase::Unknown => {
                let recorded = self
                    .record(output, observed.running, observed.timestamp, ChangeCause::Baseline)
                    .await;
                if recorded {
                    self.phases.set(output, Phase::Observing);
                    tracing::info!(
                        output = %output,
                        running = observed.running,
                        "Baseline established"
                    );
                    self.evaluate(output).await;
                }
            }
            Phase::Observing => {
                if self.persisted_running(output) != Some(observed.running) {
                    tracing::warn!(
                        output = %output,
                        running = observed.running,
                        "Hardware state differs from the recorded state"
                    );
                    // Stamped now: the sample may predate the last record.
                    let now = self.clock.now();
                    self.record(output, observed.running, now, ChangeCause::Observed)
                        .await;
                }
            }
        }
    }

    /// Apply an operator override through the single write path.
    pub async fn on_override(&self, request: OverrideRequest) {
        let output = request.output;
        if self.persisted_running(output) == Some(request.running) {
            tracing::debug!(
                output = %output,
                running = request.running,
                "Override matches current state"
            );
            return;
        }
        let now = self.clock.now();
        if self
            .record(output, request.running, now, ChangeCause::Override)
            .await
        {
            self.send_command(output, request.running, now).await;
        }
    }

    /// Persist a reading and re-evaluate the outputs it drives.
    pub async fn on_reading(&mut self, reading: Reading) {
        if let Err(e) = self.store.append_reading(reading).await {
            self.report_store_error(reading.metric.as_str(), &e).await;
            return;
        }
        for output in OutputKind::ALL {
            if output.is_driven_by(reading.metric) {
                self.evaluate(output).await;
            }
        }
    }

    async fn evaluate(&mut self, output: OutputKind) {
        if self.phases.get(output) == Phase::Unknown {
            tracing::debug!(output = %output, "No baseline yet, skipping decision");
            return;
        }
        let engine = match self.slot.engine() {
            Ok(engine) => *engine,
            Err(e) => {
                if !self.warned_unconfigured {
                    self.warned_unconfigured = true;
                    tracing::warn!(
                        error = %e,
                        "Skipping decisions until thresholds are configured"
                    );
                }
                return;
            }
        };

        let now = self.clock.now();
        let command = engine.decide(output, self.store.as_ref(), now);
        let Some(running) = command.running() else {
            return;
        };
        if self.persisted_running(output) == Some(running) {
            return;
        }

        tracing::info!(output = %output, command = %command, "Decision changed output state");
        if self.record(output, running, now, ChangeCause::Decision).await {
            self.send_command(output, running, now).await;
        }
    }

    fn persisted_running(&self, output: OutputKind) -> Option<bool> {
        self.store.last_state(output).map(|record| record.running)
    }

    /// Append a state record and announce it. Returns whether the record
    /// was persisted.
    async fn record(
        &self,
        output: OutputKind,
        running: bool,
        timestamp: DateTime<Utc>,
        cause: ChangeCause,
    ) -> bool {
        let record = ActuatorStateRecord::new(output, running, timestamp);
        if let Err(e) = self.store.append_state(record).await {
            self.report_store_error(output.as_str(), &e).await;
            return false;
        }
        self.bus
            .state_changes()
            .publish(StateChanged {
                output,
                running,
                timestamp,
                cause,
            })
            .await;
        true
    }

    async fn send_command(&self, output: OutputKind, running: bool, timestamp: DateTime<Utc>) {
        let report = self
            .bus
            .commands()
            .publish(CommandEvent {
                output,
                command: Command::from_running(running),
                timestamp,
            })
            .await;
        if report.delivered == 0 {
            tracing::warn!(output = %output, running, "Command had no subscriber");
        }
    }

    async fn report_store_error(&self, log: &str, error: &DbError) {
        if matches!(error, DbError::WritePathFailed { .. }) {
            tracing::debug!(log, "Append refused, write path already failed");
            return;
        }
        self.report_fault(FaultSource::Store, format!("append to {log} failed: {error}"))
            .await;
    }

    async fn report_fault(&self, source: FaultSource, message: String) {
        tracing::error!(source = ?source, message = %message, "Controller fault");
        self.bus
            .faults()
            .publish(FaultEvent {
                source,
                message,
                timestamp: self.clock.now(),
            })
            .await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;
    use wello_db::{Journal, SqliteJournal};
    use wello_types::MetricKind;

    use super::*;
    use crate::clock::ManualClock;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn thresholds() -> Thresholds {
        Thresholds::new(Duration::from_secs(5), 1.0).unwrap()
    }

    struct Fixture {
        bus: Arc<EventBus>,
        store: Arc<TimeSeriesStore>,
        clock: Arc<ManualClock>,
        controller: ControllerLoop,
        commands: Subscription<CommandEvent>,
        changes: Subscription<StateChanged>,
        faults: Subscription<FaultEvent>,
    }

    impl Fixture {
        fn new(slot: EngineSlot) -> Self {
            Self::with_store(slot, TimeSeriesStore::in_memory())
        }

        fn with_store(slot: EngineSlot, store: TimeSeriesStore) -> Self {
            let bus = Arc::new(EventBus::default());
            let store = Arc::new(store);
            let clock = Arc::new(ManualClock::new(t0()));
            let clock_dyn: Arc<dyn Clock> = clock.clone();
            let controller =
                ControllerLoop::new(Arc::clone(&bus), Arc::clone(&store), clock_dyn, slot);
            let commands = bus.commands().subscribe("test");
            let changes = bus.state_changes().subscribe("test");
            let faults = bus.faults().subscribe("test");
            Self {
                bus,
                store,
                clock,
                controller,
                commands,
                changes,
                faults,
            }
        }

        async fn observe(&mut self, output: OutputKind, running: bool) {
            let timestamp = self.clock.now();
            self.controller
                .on_observed(OutputObserved {
                    output,
                    running,
                    timestamp,
                })
                .await;
        }

        async fn read(&mut self, metric: MetricKind, value: f64) {
            let reading = Reading::new(metric, value, self.clock.now());
            self.controller.on_reading(reading).await;
        }

        fn advance(&self, seconds: i64) {
            self.clock.advance(TimeDelta::seconds(seconds));
        }
    }

    #[tokio::test]
    async fn baseline_is_recorded_before_any_decision() {
        let mut f = Fixture::new(EngineSlot::configured(thresholds()));
        f.read(MetricKind::FlowIn, 0.0).await;
        assert!(f.store.last_state(OutputKind::PumpIn).is_none());
        assert_eq!(f.controller.phase(OutputKind::PumpIn), Phase::Unknown);

        f.observe(OutputKind::PumpIn, false).await;
        assert_eq!(f.controller.phase(OutputKind::PumpIn), Phase::Observing);
        let change = f.changes.try_recv().unwrap();
        assert_eq!(change.cause, ChangeCause::Baseline);
        assert!(f.commands.try_recv().is_none());
        assert_eq!(f.store.readings(MetricKind::FlowIn).len(), 1);
    }

    #[tokio::test]
    async fn idle_pump_is_started_after_the_delay() {
        let mut f = Fixture::new(EngineSlot::configured(thresholds()));
        f.observe(OutputKind::PumpIn, false).await;
        f.changes.try_recv().unwrap();

        f.advance(3);
        f.read(MetricKind::FlowIn, 0.0).await;
        assert!(f.commands.try_recv().is_none());

        f.advance(3);
        f.read(MetricKind::FlowIn, 0.0).await;
        let command = f.commands.try_recv().unwrap();
        assert_eq!(command.command, Command::On);
        assert_eq!(command.output, OutputKind::PumpIn);
        assert_eq!(f.changes.try_recv().unwrap().cause, ChangeCause::Decision);
        assert!(f.store.last_state(OutputKind::PumpIn).unwrap().running);
    }

    #[tokio::test]
    async fn dry_well_stops_the_pump_once() {
        let mut f = Fixture::new(EngineSlot::configured(thresholds()));
        f.observe(OutputKind::PumpIn, false).await;
        f.advance(6);
        f.read(MetricKind::FlowIn, 0.0).await;
        assert_eq!(f.commands.try_recv().unwrap().command, Command::On);

        f.advance(10);
        f.read(MetricKind::FlowIn, 0.5).await;
        assert_eq!(f.commands.try_recv().unwrap().command, Command::Off);

        // Same inputs again: no duplicate record, no command.
        let records = f.store.states(OutputKind::PumpIn).len();
        f.read(MetricKind::FlowIn, 0.5).await;
        assert!(f.commands.try_recv().is_none());
        assert_eq!(f.store.states(OutputKind::PumpIn).len(), records);
    }

    #[tokio::test]
    async fn flow_out_does_not_drive_the_pump() {
        let mut f = Fixture::new(EngineSlot::configured(thresholds()));
        f.observe(OutputKind::PumpIn, false).await;
        f.read(MetricKind::FlowIn, 0.0).await;
        f.advance(60);
        f.read(MetricKind::FlowOut, 3.0).await;
        assert!(f.commands.try_recv().is_none());

        f.read(MetricKind::Volume, 10.0).await;
        assert_eq!(f.commands.try_recv().unwrap().command, Command::On);
    }

    #[tokio::test]
    async fn decisions_wait_for_thresholds() {
        let mut f = Fixture::new(EngineSlot::new());
        f.observe(OutputKind::PumpIn, false).await;
        f.read(MetricKind::FlowIn, 0.0).await;
        f.advance(60);
        f.read(MetricKind::FlowIn, 0.0).await;
        assert!(f.commands.try_recv().is_none());

        f.controller
            .on_thresholds(ThresholdsUpdate {
                min_running_delay_ms: 5000,
                min_flow: 1.0,
            })
            .await;
        assert!(f.controller.is_configured());
        assert_eq!(f.commands.try_recv().unwrap().command, Command::On);
    }

    #[tokio::test]
    async fn second_threshold_update_is_rejected() {
        let mut f = Fixture::new(EngineSlot::configured(thresholds()));
        f.controller
            .on_thresholds(ThresholdsUpdate {
                min_running_delay_ms: 1,
                min_flow: 100.0,
            })
            .await;
        assert_eq!(f.controller.slot.engine().unwrap().thresholds(), thresholds());
    }

    #[tokio::test]
    async fn invalid_thresholds_raise_a_fault() {
        let mut f = Fixture::new(EngineSlot::new());
        f.controller
            .on_thresholds(ThresholdsUpdate {
                min_running_delay_ms: 0,
                min_flow: 1.0,
            })
            .await;
        assert!(!f.controller.is_configured());
        assert_eq!(f.faults.try_recv().unwrap().source, FaultSource::Configuration);
    }

    #[tokio::test]
    async fn observed_divergence_is_recorded_without_command() {
        let mut f = Fixture::new(EngineSlot::new());
        f.observe(OutputKind::UrbanNetwork, false).await;
        f.observe(OutputKind::UrbanNetwork, false).await;
        assert_eq!(f.store.states(OutputKind::UrbanNetwork).len(), 1);

        f.observe(OutputKind::UrbanNetwork, true).await;
        assert_eq!(f.store.states(OutputKind::UrbanNetwork).len(), 2);
        f.changes.try_recv().unwrap();
        assert_eq!(f.changes.try_recv().unwrap().cause, ChangeCause::Observed);
        assert!(f.commands.try_recv().is_none());
    }

    #[tokio::test]
    async fn stale_observation_still_becomes_the_latest_record() {
        let mut f = Fixture::new(EngineSlot::new());
        f.observe(OutputKind::UrbanNetwork, false).await;
        let sampled_at = f.clock.now() + TimeDelta::seconds(5);
        f.advance(10);

        f.controller
            .on_override(OverrideRequest {
                output: OutputKind::UrbanNetwork,
                running: true,
                timestamp: f.clock.now(),
            })
            .await;
        // An observation sampled before the override lands afterwards.
        f.controller
            .on_observed(OutputObserved {
                output: OutputKind::UrbanNetwork,
                running: false,
                timestamp: sampled_at,
            })
            .await;

        let last = f.store.last_state(OutputKind::UrbanNetwork).unwrap();
        assert!(!last.running);
        assert_eq!(last.timestamp, f.clock.now());
        assert_eq!(f.store.states(OutputKind::UrbanNetwork).len(), 3);
    }

    #[tokio::test]
    async fn override_drives_the_urban_network() {
        let mut f = Fixture::new(EngineSlot::configured(thresholds()));
        f.observe(OutputKind::UrbanNetwork, false).await;
        f.changes.try_recv().unwrap();

        let request = OverrideRequest {
            output: OutputKind::UrbanNetwork,
            running: true,
            timestamp: f.clock.now(),
        };
        f.controller.on_override(request).await;
        let command = f.commands.try_recv().unwrap();
        assert_eq!(command.output, OutputKind::UrbanNetwork);
        assert_eq!(command.command, Command::On);
        assert_eq!(f.changes.try_recv().unwrap().cause, ChangeCause::Override);

        // Repeating it is a no-op.
        f.controller.on_override(request).await;
        assert!(f.commands.try_recv().is_none());
    }

    #[tokio::test]
    async fn store_failure_is_published_as_fault() {
        let journal = SqliteJournal::connect_url("sqlite::memory:").await.unwrap();
        let store = TimeSeriesStore::open(Journal::Sqlite(journal.clone()))
            .await
            .unwrap();
        let mut f = Fixture::with_store(EngineSlot::configured(thresholds()), store);
        journal.close().await;

        f.observe(OutputKind::PumpIn, false).await;
        assert_eq!(f.controller.phase(OutputKind::PumpIn), Phase::Unknown);
        assert_eq!(f.faults.try_recv().unwrap().source, FaultSource::Store);

        // Later refusals on the same log are not republished.
        f.observe(OutputKind::PumpIn, false).await;
        assert!(f.faults.try_recv().is_none());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let f = Fixture::new(EngineSlot::configured(thresholds()));
        let shutdown = Arc::new(ShutdownSignal::new());
        let handle = tokio::spawn(f.controller.run(Arc::clone(&shutdown)));

        f.bus
            .observed()
            .publish(OutputObserved {
                output: OutputKind::PumpIn,
                running: true,
                timestamp: t0(),
            })
            .await;
        shutdown.request_stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
