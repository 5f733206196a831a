//! The I/O loop: polls the hardware and applies commands.
//!
//! On start the loop reads every output and publishes an
//! [`OutputObserved`] baseline. It then samples every sensor once per
//! poll interval and publishes one [`Reading`] per sample. `On`/`Off`
//! commands are applied as soon as they arrive and confirmed with a new
//! [`OutputObserved`].
//!
//! Driver calls are retried with backoff, and so are sensor samples that
//! are not finite numbers. A call that still fails is logged and
//! published on the `fault` channel; the loop carries on. An output whose
//! baseline could not be read is retried on the next poll.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use wello_events::{EventBus, Subscription};
use wello_types::{
    CommandEvent, FaultEvent, FaultSource, MetricKind, OutputKind, OutputObserved, Reading,
};

use crate::clock::Clock;
use crate::config::IoConfig;
use crate::hardware::{DriverError, DriverGuard, HardwareDriver};
use crate::retry::RetryPolicy;
use crate::shutdown::ShutdownSignal;

/// A NaN or infinite sample is treated as a failed read so it is retried
/// and never published.
fn finite(metric: MetricKind, value: f64) -> Result<f64, DriverError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DriverError::Transient {
            operation: "read",
            message: format!("{metric} sample is not a finite number: {value}"),
        })
    }
}

/// Owns the hardware driver for the lifetime of the loop.
#[derive(Debug)]
pub struct IoLoop<D: HardwareDriver> {
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    driver: DriverGuard<D>,
    retry: RetryPolicy,
    poll_interval: Duration,
    pending_baseline: Vec<OutputKind>,
    commands: Subscription<CommandEvent>,
}

impl<D: HardwareDriver> IoLoop<D> {
    /// Take ownership of `driver` and subscribe to the `command` channel.
    pub fn new(bus: Arc<EventBus>, clock: Arc<dyn Clock>, driver: D, config: &IoConfig) -> Self {
        let commands = bus.commands().subscribe("io-loop");
        Self {
            bus,
            clock,
            driver: DriverGuard::new(driver),
            retry: config.retry.policy(),
            poll_interval: config.poll_interval(),
            pending_baseline: OutputKind::ALL.to_vec(),
            commands,
        }
    }

    /// Poll and actuate until `shutdown` fires, then release the driver.
    ///
    /// The driver is also released if the task is aborted or panics.
    pub async fn run(mut self, shutdown: Arc<ShutdownSignal>) {
        tracing::info!(
            poll_interval_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "I/O loop started"
        );
        self.observe_pending().await;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(command) = self.commands.recv() => self.apply(command).await,
                _ = ticker.tick() => self.poll().await,
            }
        }

        self.driver.release();
        tracing::info!("I/O loop stopped");
    }

    /// Read every output still lacking a baseline and publish what was
    /// observed.
    async fn observe_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending_baseline);
        for output in pending {
            let retry = self.retry;
            let driver = self.driver.driver();
            match retry.run("read_output", || driver.read_output(output)).await {
                Ok(running) => self.publish_observed(output, running).await,
                Err(e) => {
                    self.report_fault(format!("reading {output} failed: {e}"), &e)
                        .await;
                    self.pending_baseline.push(output);
                }
            }
        }
    }

    /// Sample every sensor once.
    async fn poll(&mut self) {
        if !self.pending_baseline.is_empty() {
            self.observe_pending().await;
        }
        for metric in MetricKind::ALL {
            let retry = self.retry;
            let driver = self.driver.driver();
            match retry.run("read", || finite(metric, driver.read(metric)?)).await {
                Ok(value) => {
                    let reading = Reading::new(metric, value, self.clock.now());
                    self.bus.readings().publish(reading).await;
                }
                Err(e) => {
                    self.report_fault(format!("sampling {metric} failed: {e}"), &e)
                        .await;
                }
            }
        }
    }

    /// Apply a command to the hardware and confirm it.
    async fn apply(&mut self, command: CommandEvent) {
        let Some(running) = command.command.running() else {
            tracing::debug!(output = %command.output, "Ignoring no-op command");
            return;
        };
        let output = command.output;
        let retry = self.retry;
        let driver = self.driver.driver();
        match retry.run("write", || driver.write(output, running)).await {
            Ok(()) => {
                tracing::info!(output = %output, running, "Output switched");
                self.publish_observed(output, running).await;
            }
            Err(e) => {
                self.report_fault(format!("switching {output} to {running} failed: {e}"), &e)
                    .await;
            }
        }
    }

    async fn publish_observed(&self, output: OutputKind, running: bool) {
        self.bus
            .observed()
            .publish(OutputObserved {
                output,
                running,
                timestamp: self.clock.now(),
            })
            .await;
    }

    async fn report_fault(&self, message: String, error: &DriverError) {
        tracing::warn!(
            transient = error.is_transient(),
            message = %message,
            "Hardware call failed after retries"
        );
        self.bus
            .faults()
            .publish(FaultEvent {
                source: FaultSource::Driver,
                message,
                timestamp: self.clock.now(),
            })
            .await;
    }
}
