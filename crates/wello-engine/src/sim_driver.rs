//! A simulated well, tank and relay panel.
//!
//! Stands in for real hardware when the controller runs without a
//! panel attached. The well holds a finite reserve that the pump draws
//! down and that recharges slowly while the pump is off; the tank fills
//! from the pump and drains into the urban network. Sensor values carry
//! seeded random noise and calls fail transiently at a configurable
//! rate, so the retry path is exercised too.
//!
//! Flows are in mm3/s, volumes in mm3.

use std::path::Path;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use wello_core::hardware::{DriverError, HardwareDriver};
use wello_types::{MetricKind, OutputKind};

use crate::error::EngineError;

/// Simulator settings, read from the `simulator` section of
/// `wello-config.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimConfig {
    /// RNG seed for noise and fault injection.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Pump flow with a full well, in mm3/s.
    #[serde(default = "default_pump_flow")]
    pub pump_flow: f64,

    /// Water the well holds when fully recharged, in mm3.
    #[serde(default = "default_well_reserve")]
    pub well_reserve_mm3: f64,

    /// Rate at which the well refills, in mm3/s.
    #[serde(default = "default_recharge")]
    pub recharge: f64,

    /// Draw of the urban network while it is on, in mm3/s.
    #[serde(default = "default_demand")]
    pub demand: f64,

    /// Tank volume at start, in mm3.
    #[serde(default = "default_initial_volume")]
    pub initial_volume_mm3: f64,

    /// Whether the urban network valve starts open.
    #[serde(default = "default_urban_network_on")]
    pub urban_network_on: bool,

    /// Relative amplitude of sensor noise, between 0 and 1.
    #[serde(default = "default_noise")]
    pub noise: f64,

    /// Probability that any single driver call fails transiently.
    #[serde(default)]
    pub fault_rate: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            pump_flow: default_pump_flow(),
            well_reserve_mm3: default_well_reserve(),
            recharge: default_recharge(),
            demand: default_demand(),
            initial_volume_mm3: default_initial_volume(),
            urban_network_on: default_urban_network_on(),
            noise: default_noise(),
            fault_rate: 0.0,
        }
    }
}

impl SimConfig {
    /// Read the `simulator` section of the YAML file at `path`.
    ///
    /// A missing file or a missing section yields the defaults.
    pub fn from_config_file(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| EngineError::Simulator {
            message: format!("failed to read config file: {e}"),
        })?;
        Self::from_yaml(&contents)
    }

    /// Extract the `simulator` section from a full configuration document.
    pub fn from_yaml(contents: &str) -> Result<Self, EngineError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: serde_yml::Value =
            serde_yml::from_str(contents).map_err(|e| EngineError::Simulator {
                message: format!("failed to parse config YAML: {e}"),
            })?;
        let Some(section) = raw.get("simulator") else {
            return Ok(Self::default());
        };
        let config: Self =
            serde_yml::from_value(section.clone()).map_err(|e| EngineError::Simulator {
                message: format!("failed to parse simulator config: {e}"),
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.noise) {
            return Err(EngineError::Simulator {
                message: format!("noise must be within 0..=1, got {}", self.noise),
            });
        }
        if !unit.contains(&self.fault_rate) {
            return Err(EngineError::Simulator {
                message: format!("fault_rate must be within 0..=1, got {}", self.fault_rate),
            });
        }
        if self.well_reserve_mm3.is_nan() || self.well_reserve_mm3 <= 0.0 {
            return Err(EngineError::Simulator {
                message: "well_reserve_mm3 must be positive".to_owned(),
            });
        }
        Ok(())
    }
}

/// Simulated hardware behind the [`HardwareDriver`] trait.
#[derive(Debug)]
pub struct SimDriver {
    config: SimConfig,
    rng: StdRng,
    tank_capacity_mm3: f64,
    pump_in: bool,
    urban_network: bool,
    reserve_mm3: f64,
    volume_mm3: f64,
    flow_in: f64,
    flow_out: f64,
    last_step: Instant,
}

impl SimDriver {
    /// A simulator with a full well and the tank at its initial volume.
    pub fn new(config: SimConfig, tank_capacity_mm3: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            tank_capacity_mm3,
            pump_in: false,
            urban_network: config.urban_network_on,
            reserve_mm3: config.well_reserve_mm3,
            volume_mm3: config.initial_volume_mm3.clamp(0.0, tank_capacity_mm3),
            flow_in: 0.0,
            flow_out: 0.0,
            last_step: Instant::now(),
            config,
        }
    }

    /// Advance the physics to the current instant.
    fn step(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_step).as_secs_f64();
        self.last_step = now;
        self.advance(elapsed);
    }

    /// Advance the physics by `seconds`.
    fn advance(&mut self, seconds: f64) {
        self.flow_in = if self.pump_in && self.reserve_mm3 > 0.0 {
            // Yield drops as the water table falls.
            let fill = (self.reserve_mm3 / self.config.well_reserve_mm3).clamp(0.0, 1.0);
            self.config.pump_flow * fill.sqrt()
        } else {
            0.0
        };
        let drawn = (self.flow_in * seconds).min(self.reserve_mm3);
        let recharged = self.config.recharge * seconds;
        self.reserve_mm3 = (self.reserve_mm3 - drawn + recharged).min(self.config.well_reserve_mm3);

        self.flow_out = if self.urban_network && self.volume_mm3 > 0.0 {
            self.config.demand
        } else {
            0.0
        };
        let drained = self.flow_out * seconds;
        self.volume_mm3 = (self.volume_mm3 + drawn - drained).clamp(0.0, self.tank_capacity_mm3);
    }

    fn noisy(&mut self, value: f64) -> f64 {
        let jitter = self.rng.random_range(-self.config.noise..=self.config.noise);
        let noise = value * jitter;
        (value + noise).max(0.0)
    }

    fn inject_fault(&mut self, operation: &'static str) -> Result<(), DriverError> {
        if self.rng.random_bool(self.config.fault_rate) {
            return Err(DriverError::Transient {
                operation,
                message: "simulated bus timeout".to_owned(),
            });
        }
        Ok(())
    }
}

impl HardwareDriver for SimDriver {
    fn read(&mut self, metric: MetricKind) -> Result<f64, DriverError> {
        self.inject_fault("read")?;
        self.step();
        let value = match metric {
            MetricKind::FlowIn => self.flow_in,
            MetricKind::FlowOut => self.flow_out,
            MetricKind::Volume => self.volume_mm3,
        };
        Ok(self.noisy(value))
    }

    fn read_output(&mut self, output: OutputKind) -> Result<bool, DriverError> {
        self.inject_fault("read_output")?;
        Ok(match output {
            OutputKind::PumpIn => self.pump_in,
            OutputKind::UrbanNetwork => self.urban_network,
        })
    }

    fn write(&mut self, output: OutputKind, running: bool) -> Result<(), DriverError> {
        self.inject_fault("write")?;
        self.step();
        match output {
            OutputKind::PumpIn => self.pump_in = running,
            OutputKind::UrbanNetwork => self.urban_network = running,
        }
        tracing::debug!(output = %output, running, "Simulated relay switched");
        Ok(())
    }

    fn release(&mut self) {
        self.pump_in = false;
        self.urban_network = false;
        tracing::info!(
            reserve_mm3 = self.reserve_mm3,
            volume_mm3 = self.volume_mm3,
            "Simulated panel released"
        );
    }
}

const fn default_seed() -> u64 {
    42
}

const fn default_pump_flow() -> f64 {
    // 20 L/min
    333_333.0
}

const fn default_well_reserve() -> f64 {
    // 300 L
    300_000_000.0
}

const fn default_recharge() -> f64 {
    // 6 L/min
    100_000.0
}

const fn default_demand() -> f64 {
    // 8 L/min
    133_333.0
}

const fn default_initial_volume() -> f64 {
    // 200 L
    200_000_000.0
}

const fn default_urban_network_on() -> bool {
    true
}

const fn default_noise() -> f64 {
    0.02
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn quiet() -> SimConfig {
        SimConfig {
            noise: 0.0,
            ..SimConfig::default()
        }
    }

    #[test]
    fn idle_pump_reports_no_inflow() {
        let mut sim = SimDriver::new(quiet(), 1_000_000_000.0);
        sim.advance(10.0);
        assert_eq!(sim.flow_in, 0.0);
        assert!(!sim.read_output(OutputKind::PumpIn).unwrap());
    }

    #[test]
    fn running_pump_fills_the_tank() {
        let mut sim = SimDriver::new(
            SimConfig {
                urban_network_on: false,
                ..quiet()
            },
            1_000_000_000.0,
        );
        let before = sim.volume_mm3;
        sim.write(OutputKind::PumpIn, true).unwrap();
        sim.advance(60.0);
        assert!(sim.flow_in > 0.0);
        assert!(sim.volume_mm3 > before);
    }

    #[test]
    fn well_runs_dry_under_sustained_pumping() {
        let mut sim = SimDriver::new(quiet(), 1_000_000_000.0);
        sim.write(OutputKind::PumpIn, true).unwrap();
        let initial = {
            sim.advance(1.0);
            sim.flow_in
        };
        for _ in 0..120 {
            sim.advance(60.0);
        }
        assert!(sim.flow_in < initial / 2.0);
    }

    #[test]
    fn tank_never_exceeds_capacity() {
        let mut sim = SimDriver::new(
            SimConfig {
                urban_network_on: false,
                ..quiet()
            },
            250_000_000.0,
        );
        sim.write(OutputKind::PumpIn, true).unwrap();
        for _ in 0..60 {
            sim.advance(60.0);
        }
        assert!(sim.volume_mm3 <= 250_000_000.0);
    }

    #[test]
    fn release_switches_everything_off() {
        let mut sim = SimDriver::new(quiet(), 1_000_000_000.0);
        sim.write(OutputKind::PumpIn, true).unwrap();
        sim.release();
        assert!(!sim.read_output(OutputKind::PumpIn).unwrap());
        assert!(!sim.read_output(OutputKind::UrbanNetwork).unwrap());
    }

    #[test]
    fn certain_fault_rate_fails_every_call() {
        let mut sim = SimDriver::new(
            SimConfig {
                fault_rate: 1.0,
                ..quiet()
            },
            1_000_000_000.0,
        );
        let err = sim.read(MetricKind::Volume).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn simulator_section_is_read_from_full_config() {
        let yaml = r"
controller:
  min_running_delay_ms: 5000
  min_flow: 0.5
simulator:
  seed: 7
  fault_rate: 0.1
";
        let config = SimConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.fault_rate, 0.1);
        assert_eq!(config.pump_flow, default_pump_flow());
    }

    #[test]
    fn missing_section_uses_defaults() {
        assert_eq!(
            SimConfig::from_yaml("tank:\n  capacity_mm3: 1.0\n").unwrap(),
            SimConfig::default()
        );
    }

    #[test]
    fn out_of_range_noise_is_rejected() {
        let result = SimConfig::from_yaml("simulator:\n  noise: 2.0\n");
        assert!(matches!(result, Err(EngineError::Simulator { .. })));
    }
}
