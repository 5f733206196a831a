//! Decision engine and runtime loops for the Wello controller.
//!
//! Two long-lived tasks talk only through the [`wello_events::EventBus`]:
//! the I/O loop samples the hardware and applies commands, and the
//! controller loop persists readings, runs the decision engine and owns
//! the single write path into the output logs.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `wello-config.yaml` into
//!   strongly-typed structs.
//! - [`clock`] -- [`Clock`] trait with system and manual clocks.
//! - [`decision`] -- [`DecisionEngine`], [`Thresholds`] and the
//!   configure-once [`EngineSlot`].
//! - [`capacity`] -- Tank overflow check.
//! - [`manual`] -- Operator overrides.
//! - [`controller`] -- The controller loop.
//! - [`io_loop`] -- The hardware I/O loop.
//! - [`hardware`] -- [`HardwareDriver`] trait and [`DriverGuard`].
//! - [`retry`] -- Exponential backoff for driver calls.
//! - [`shutdown`] -- Cooperative stop signal.
//!
//! [`Clock`]: clock::Clock
//! [`DecisionEngine`]: decision::DecisionEngine
//! [`Thresholds`]: decision::Thresholds
//! [`EngineSlot`]: decision::EngineSlot
//! [`HardwareDriver`]: hardware::HardwareDriver
//! [`DriverGuard`]: hardware::DriverGuard

pub mod capacity;
pub mod clock;
pub mod config;
pub mod controller;
pub mod decision;
pub mod hardware;
pub mod io_loop;
pub mod manual;
pub mod retry;
pub mod shutdown;
