//! Hardware driver boundary.
//!
//! A [`HardwareDriver`] reads the flow and volume sensors, reads the state
//! of the two outputs and switches them. Calls may fail transiently; the
//! I/O loop retries them (see [`crate::retry`]). Calls are expected to
//! return quickly since they run on the I/O loop task.
//!
//! The driver is held through a [`DriverGuard`], which calls
//! [`HardwareDriver::release`] exactly once on every exit path of the I/O
//! loop, including errors and panics.

use wello_types::{MetricKind, OutputKind};

/// Errors reported by a hardware driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// The call failed but may succeed if repeated.
    #[error("{operation} failed: {message}")]
    Transient {
        /// Driver operation that failed.
        operation: &'static str,
        /// Description from the driver.
        message: String,
    },

    /// The device is gone; repeating the call will not help until it is
    /// reconnected.
    #[error("device unavailable: {message}")]
    Unavailable {
        /// Description from the driver.
        message: String,
    },
}

impl DriverError {
    /// Whether repeating the call may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Access to the physical sensors and outputs.
pub trait HardwareDriver: Send {
    /// Sample `metric` (mm3/s for flows, mm3 for volume).
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if the sensor cannot be read.
    fn read(&mut self, metric: MetricKind) -> Result<f64, DriverError>;

    /// Read whether `output` is currently running.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if the output cannot be read.
    fn read_output(&mut self, output: OutputKind) -> Result<bool, DriverError>;

    /// Switch `output` on or off.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if the output cannot be written.
    fn write(&mut self, output: OutputKind, running: bool) -> Result<(), DriverError>;

    /// Release the device. Called once, when the I/O loop exits.
    fn release(&mut self);
}

/// Scoped ownership of a driver: releases it when dropped.
#[derive(Debug)]
pub struct DriverGuard<D: HardwareDriver> {
    driver: D,
    released: bool,
}

impl<D: HardwareDriver> DriverGuard<D> {
    /// Take ownership of `driver`.
    pub const fn new(driver: D) -> Self {
        Self {
            driver,
            released: false,
        }
    }

    /// The guarded driver.
    pub const fn driver(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Release the driver now instead of at drop.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.driver.release();
            tracing::info!("Hardware driver released");
        }
    }
}

impl<D: HardwareDriver> Drop for DriverGuard<D> {
    fn drop(&mut self) {
        self.release();
    }
}
