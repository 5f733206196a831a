//! Shared type definitions for the Wello well-pump controller.
//!
//! This crate is the single source of truth for the values that travel
//! between the I/O loop, the controller loop, the time-series store and
//! any observer attached to the event bus.
//!
//! # Modules
//!
//! - [`enums`] -- Metric and output kinds, the tri-state [`Command`], and
//!   the cause/source tags carried by notifications
//! - [`structs`] -- Persisted records: [`Reading`] and
//!   [`ActuatorStateRecord`]
//! - [`payloads`] -- Transient payloads of the bus channels
//!
//! # Units
//!
//! Flow values are expressed in mm3/s and volumes in mm3, matching the
//! units the hardware driver reports.

pub mod enums;
pub mod payloads;
pub mod structs;

pub use enums::{ChangeCause, Command, FaultSource, MetricKind, OutputKind};
pub use payloads::{
    CommandEvent, FaultEvent, OutputObserved, OverrideRequest, StateChanged, ThresholdsUpdate,
};
pub use structs::{ActuatorStateRecord, Reading};
