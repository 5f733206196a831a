//! The decision engine: a pure law from history and thresholds to a
//! [`Command`] per output.
//!
//! The engine never writes. It reads the most recent records through the
//! [`History`] trait and the current instant passed by the caller, and
//! returns `On`, `Off` or `Any`. Missing history is not an error: it is
//! answered with `Any`, which leaves the hardware alone.
//!
//! A [`DecisionEngine`] can only be built from validated [`Thresholds`],
//! so an engine without thresholds cannot exist. [`EngineSlot`] holds the
//! engine of a running controller and enforces configure-once.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use wello_db::TimeSeriesStore;
use wello_types::{ActuatorStateRecord, Command, MetricKind, OutputKind, Reading, ThresholdsUpdate};

/// Errors raised when configuring or using the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecisionError {
    /// A decision was requested before thresholds were configured.
    #[error("decision engine is not initialized: thresholds have not been configured")]
    NotInitialized,

    /// Thresholds were supplied a second time without a reset.
    #[error("decision engine is already initialized; reset it before reconfiguring")]
    AlreadyInitialized,

    /// A threshold value is out of range.
    #[error("invalid threshold {name}: {reason}")]
    InvalidThreshold {
        /// Name of the threshold.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Validated decision thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    min_running_delay: TimeDelta,
    min_flow: f64,
}

impl Thresholds {
    /// Validate and build thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionError::InvalidThreshold`] if `min_running_delay`
    /// is zero or too large, or `min_flow` is negative or not finite.
    pub fn new(min_running_delay: Duration, min_flow: f64) -> Result<Self, DecisionError> {
        if min_running_delay.is_zero() {
            return Err(DecisionError::InvalidThreshold {
                name: "min_running_delay",
                reason: "must be greater than zero".to_owned(),
            });
        }
        let min_running_delay =
            TimeDelta::from_std(min_running_delay).map_err(|e| DecisionError::InvalidThreshold {
                name: "min_running_delay",
                reason: e.to_string(),
            })?;
        if !min_flow.is_finite() || min_flow < 0.0 {
            return Err(DecisionError::InvalidThreshold {
                name: "min_flow",
                reason: format!("must be a non-negative number, got {min_flow}"),
            });
        }
        Ok(Self {
            min_running_delay,
            min_flow,
        })
    }

    /// Thresholds carried by a bus configuration update.
    ///
    /// # Errors
    ///
    /// Same as [`Thresholds::new`].
    pub fn from_update(update: &ThresholdsUpdate) -> Result<Self, DecisionError> {
        Self::new(Duration::from_millis(update.min_running_delay_ms), update.min_flow)
    }

    /// Minimum time an output stays in a state before the engine acts.
    pub const fn min_running_delay(&self) -> TimeDelta {
        self.min_running_delay
    }

    /// Inflow at or below which the well is considered dry.
    pub const fn min_flow(&self) -> f64 {
        self.min_flow
    }
}

/// Read-only view of the records the engine decides from.
pub trait History {
    /// Most recent state record of `output`.
    fn last_state(&self, output: OutputKind) -> Option<ActuatorStateRecord>;

    /// Most recent state record of `output` with the given `running`.
    fn last_state_where(&self, output: OutputKind, running: bool) -> Option<ActuatorStateRecord>;

    /// Most recent reading of `metric`.
    fn last_reading(&self, metric: MetricKind) -> Option<Reading>;
}

impl History for TimeSeriesStore {
    fn last_state(&self, output: OutputKind) -> Option<ActuatorStateRecord> {
        Self::last_state(self, output)
    }

    fn last_state_where(&self, output: OutputKind, running: bool) -> Option<ActuatorStateRecord> {
        Self::last_state_where(self, output, running)
    }

    fn last_reading(&self, metric: MetricKind) -> Option<Reading> {
        Self::last_reading(self, metric)
    }
}

/// The decision law, bound to one set of thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionEngine {
    thresholds: Thresholds,
}

impl DecisionEngine {
    /// Create an engine.
    pub const fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// The thresholds this engine decides with.
    pub const fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Decide for `output`.
    pub fn decide<H: History + ?Sized>(
        &self,
        output: OutputKind,
        history: &H,
        now: DateTime<Utc>,
    ) -> Command {
        match output {
            OutputKind::PumpIn => self.pump_in(history, now),
            OutputKind::UrbanNetwork => self.urban_network(history, now),
        }
    }

    /// Decide for the well pump.
    ///
    /// - `Off` once the pump has run for at least `min_running_delay` and
    ///   the latest inflow is at or below `min_flow` (the well ran dry).
    /// - `On` once the pump has been stopped for at least
    ///   `min_running_delay` (the well had time to refill).
    /// - `Any` otherwise, including whenever the current state, the last
    ///   stop or an inflow reading is missing.
    pub fn pump_in<H: History + ?Sized>(&self, history: &H, now: DateTime<Utc>) -> Command {
        let output = OutputKind::PumpIn;
        let (Some(current), Some(last_stop), Some(flow)) = (
            history.last_state(output),
            history.last_state_where(output, false),
            history.last_reading(MetricKind::FlowIn),
        ) else {
            return Command::Any;
        };

        let delay = self.thresholds.min_running_delay;

        let running_for = now.signed_duration_since(current.timestamp);
        if current.running && running_for >= delay && flow.value <= self.thresholds.min_flow {
            return Command::Off;
        }

        let idle_for = now.signed_duration_since(last_stop.timestamp);
        if !current.running && idle_for >= delay {
            return Command::On;
        }

        Command::Any
    }

    /// Decide for the urban network valve.
    ///
    /// The valve is an operator fallback and has no automatic rule: the
    /// answer is always `Any`.
    pub const fn urban_network<H: History + ?Sized>(
        &self,
        _history: &H,
        _now: DateTime<Utc>,
    ) -> Command {
        Command::Any
    }
}

/// Holds at most one configured [`DecisionEngine`].
#[derive(Debug, Clone, Default)]
pub struct EngineSlot {
    engine: Option<DecisionEngine>,
}

impl EngineSlot {
    /// An empty slot.
    pub const fn new() -> Self {
        Self { engine: None }
    }

    /// A slot that already holds an engine for `thresholds`.
    pub const fn configured(thresholds: Thresholds) -> Self {
        Self {
            engine: Some(DecisionEngine::new(thresholds)),
        }
    }

    /// Install an engine for `thresholds`.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionError::AlreadyInitialized`] if an engine is
    /// already installed; the installed engine is kept.
    pub fn configure(&mut self, thresholds: Thresholds) -> Result<&DecisionEngine, DecisionError> {
        if self.engine.is_some() {
            return Err(DecisionError::AlreadyInitialized);
        }
        Ok(self.engine.insert(DecisionEngine::new(thresholds)))
    }

    /// The installed engine.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionError::NotInitialized`] while the slot is empty.
    pub fn engine(&self) -> Result<&DecisionEngine, DecisionError> {
        self.engine.as_ref().ok_or(DecisionError::NotInitialized)
    }

    /// Whether an engine is installed.
    pub const fn is_configured(&self) -> bool {
        self.engine.is_some()
    }

    /// Remove the installed engine so new thresholds can be configured.
    pub const fn reset(&mut self) -> Option<DecisionEngine> {
        self.engine.take()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    /// In-memory history for exercising the law without a store.
    #[derive(Debug, Default)]
    struct FakeHistory {
        states: Vec<ActuatorStateRecord>,
        flow_in: Vec<Reading>,
    }

    impl FakeHistory {
        fn state(mut self, running: bool, at: DateTime<Utc>) -> Self {
            self.states.push(ActuatorStateRecord::new(OutputKind::PumpIn, running, at));
            self
        }

        fn flow(mut self, value: f64, at: DateTime<Utc>) -> Self {
            self.flow_in.push(Reading::new(MetricKind::FlowIn, value, at));
            self
        }
    }

    impl History for FakeHistory {
        fn last_state(&self, output: OutputKind) -> Option<ActuatorStateRecord> {
            self.states.iter().rev().find(|r| r.output == output).copied()
        }

        fn last_state_where(
            &self,
            output: OutputKind,
            running: bool,
        ) -> Option<ActuatorStateRecord> {
            self.states
                .iter()
                .rev()
                .find(|r| r.output == output && r.running == running)
                .copied()
        }

        fn last_reading(&self, metric: MetricKind) -> Option<Reading> {
            match metric {
                MetricKind::FlowIn => self.flow_in.last().copied(),
                _ => None,
            }
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn secs(n: i64) -> TimeDelta {
        TimeDelta::seconds(n)
    }

    /// `min_running_delay = 5s`, `min_flow = 1`.
    fn engine() -> DecisionEngine {
        DecisionEngine::new(Thresholds::new(Duration::from_secs(5), 1.0).unwrap())
    }

    #[test]
    fn dry_well_turns_the_pump_off() {
        let history = FakeHistory::default()
            .state(false, t0() - secs(30))
            .state(true, t0())
            .flow(0.5, t0() + secs(9));
        assert_eq!(engine().pump_in(&history, t0() + secs(10)), Command::Off);
    }

    #[test]
    fn short_stop_waits_then_turns_on() {
        let history = FakeHistory::default()
            .state(false, t0())
            .flow(0.0, t0());
        assert_eq!(engine().pump_in(&history, t0() + secs(3)), Command::Any);
        assert_eq!(engine().pump_in(&history, t0() + secs(6)), Command::On);
    }

    #[test]
    fn no_stop_record_means_no_opinion() {
        let history = FakeHistory::default()
            .state(true, t0())
            .flow(0.0, t0() + secs(100));
        assert_eq!(engine().pump_in(&history, t0() + secs(1000)), Command::Any);
    }

    #[test]
    fn missing_state_or_flow_means_no_opinion() {
        let no_flow = FakeHistory::default().state(false, t0());
        assert_eq!(engine().pump_in(&no_flow, t0() + secs(60)), Command::Any);

        let no_state = FakeHistory::default().flow(0.0, t0());
        assert_eq!(engine().pump_in(&no_state, t0() + secs(60)), Command::Any);
    }

    #[test]
    fn healthy_flow_never_turns_the_pump_off() {
        let history = FakeHistory::default()
            .state(false, t0() - secs(60))
            .state(true, t0())
            .flow(1.5, t0());
        for elapsed in [0, 4, 5, 6, 60, 3600] {
            assert_ne!(
                engine().pump_in(&history, t0() + secs(elapsed)),
                Command::Off,
                "elapsed {elapsed}s"
            );
        }
    }

    #[test]
    fn flow_equal_to_minimum_counts_as_dry() {
        let history = FakeHistory::default()
            .state(false, t0() - secs(60))
            .state(true, t0())
            .flow(1.0, t0());
        assert_eq!(engine().pump_in(&history, t0() + secs(5)), Command::Off);
    }

    #[test]
    fn turn_off_waits_for_the_settle_time() {
        let history = FakeHistory::default()
            .state(false, t0() - secs(60))
            .state(true, t0())
            .flow(0.0, t0());
        assert_eq!(engine().pump_in(&history, t0() + secs(4)), Command::Any);
        assert_eq!(engine().pump_in(&history, t0() + secs(5)), Command::Off);
    }

    #[test]
    fn on_only_after_the_full_delay_since_last_stop() {
        let history = FakeHistory::default()
            .state(true, t0() - secs(60))
            .state(false, t0())
            .flow(0.0, t0());
        for millis in [0, 1000, 4999] {
            assert_ne!(
                engine().pump_in(&history, t0() + TimeDelta::milliseconds(millis)),
                Command::On
            );
        }
        assert_eq!(
            engine().pump_in(&history, t0() + TimeDelta::milliseconds(5000)),
            Command::On
        );
    }

    #[test]
    fn turn_off_is_not_followed_by_an_immediate_turn_on() {
        // The controller records the stop decided at t0 + 10s.
        let history = FakeHistory::default()
            .state(false, t0() - secs(60))
            .state(true, t0())
            .flow(0.2, t0() + secs(10))
            .state(false, t0() + secs(10));
        for elapsed in [10, 11, 14] {
            assert_ne!(
                engine().pump_in(&history, t0() + secs(elapsed)),
                Command::On,
                "elapsed {elapsed}s"
            );
        }
        assert_eq!(engine().pump_in(&history, t0() + secs(15)), Command::On);
    }

    #[test]
    fn decision_is_idempotent() {
        let history = FakeHistory::default()
            .state(false, t0())
            .flow(0.0, t0());
        let now = t0() + secs(7);
        assert_eq!(engine().pump_in(&history, now), engine().pump_in(&history, now));
    }

    #[test]
    fn urban_network_has_no_automatic_rule() {
        let history = FakeHistory::default()
            .state(false, t0())
            .flow(0.0, t0());
        assert_eq!(
            engine().decide(OutputKind::UrbanNetwork, &history, t0() + secs(3600)),
            Command::Any
        );
    }

    #[test]
    fn thresholds_are_validated() {
        assert!(matches!(
            Thresholds::new(Duration::ZERO, 1.0),
            Err(DecisionError::InvalidThreshold {
                name: "min_running_delay",
                ..
            })
        ));
        assert!(Thresholds::new(Duration::from_secs(1), -1.0).is_err());
        assert!(Thresholds::new(Duration::from_secs(1), f64::NAN).is_err());
        assert!(Thresholds::new(Duration::from_secs(1), 0.0).is_ok());
    }

    #[test]
    fn slot_is_configure_once_until_reset() {
        let thresholds = Thresholds::new(Duration::from_secs(5), 1.0).unwrap();
        let mut slot = EngineSlot::new();
        assert_eq!(slot.engine().unwrap_err(), DecisionError::NotInitialized);

        slot.configure(thresholds).unwrap();
        assert_eq!(
            slot.configure(thresholds).unwrap_err(),
            DecisionError::AlreadyInitialized
        );

        assert!(slot.reset().is_some());
        assert!(!slot.is_configured());
        assert!(slot.configure(thresholds).is_ok());
    }
}
