//! Controller binary for the Wello well-pump controller.
//!
//! This is the main entry point that wires together the event bus, the
//! time-series store, the controller loop and the hardware I/O loop. It
//! loads configuration, starts both loops and runs until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `wello-config.yaml` (or the path given as
//!    the first argument)
//! 2. Initialize structured logging (tracing)
//! 3. Open the time-series store and replay its journal
//! 4. Create the event bus and attach the log observers
//! 5. Start the controller loop, then the I/O loop over the simulated
//!    panel
//! 6. Wait for Ctrl-C, signal both loops and wait for them to finish
//!
//! Manual overrides are not driven from this binary. An operator surface
//! builds a [`wello_core::manual::ManualOverride`] over the same bus and
//! store, with the tank limits from the `tank` section, and its requests
//! reach the controller loop through the `override` channel.

mod error;
mod observer_log;
mod sim_driver;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use wello_core::clock::{Clock, SystemClock};
use wello_core::config::{LogFormat, LoggingConfig, WelloConfig};
use wello_core::controller::ControllerLoop;
use wello_core::decision::EngineSlot;
use wello_core::io_loop::IoLoop;
use wello_core::shutdown::ShutdownSignal;
use wello_db::{Journal, SqliteJournal, TimeSeriesStore};
use wello_events::EventBus;

use crate::error::EngineError;
use crate::sim_driver::{SimConfig, SimDriver};

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "wello-config.yaml";

/// Application entry point for the controller.
///
/// # Errors
///
/// Returns an error if any initialization step fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = WelloConfig::from_file(&config_path).map_err(EngineError::from)?;
    let sim_config = SimConfig::from_config_file(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        config = %config_path.display(),
        configured = config.controller.is_some(),
        poll_interval_ms = config.io.poll_interval_ms,
        "wello-engine starting"
    );

    // 3. Open the store.
    let store = Arc::new(open_store(&config).await?);

    // 4. Event bus and observers.
    let bus = Arc::new(EventBus::new(config.bus.bus_config()));
    observer_log::attach(&bus).map_err(EngineError::from)?;

    let slot = match &config.controller {
        Some(controller) => {
            EngineSlot::configured(controller.thresholds().map_err(EngineError::from)?)
        }
        None => {
            info!("No thresholds in config, waiting for a configuration event");
            EngineSlot::new()
        }
    };

    // 5. Start the loops. The controller subscribes before the I/O loop
    //    publishes its baseline.
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let shutdown = Arc::new(ShutdownSignal::new());

    let controller = ControllerLoop::new(
        Arc::clone(&bus),
        Arc::clone(&store),
        Arc::clone(&clock),
        slot,
    );
    let driver = SimDriver::new(sim_config, config.tank.capacity_mm3);
    let io = IoLoop::new(Arc::clone(&bus), clock, driver, &config.io);

    let controller_task = tokio::spawn(controller.run(Arc::clone(&shutdown)));
    let io_task = tokio::spawn(io.run(Arc::clone(&shutdown)));
    info!("Controller and I/O loops running");

    // 6. Run until interrupted.
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C, shutting down");
    }
    info!("Stop requested");
    shutdown.request_stop();

    let timeout = config.shutdown.timeout();
    for (name, task) in [("controller", controller_task), ("io", io_task)] {
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => info!(task = name, "Loop stopped"),
            Ok(Err(e)) => tracing::error!(task = name, error = %e, "Loop task failed"),
            Err(_elapsed) => tracing::warn!(
                task = name,
                timeout_ms = config.shutdown.timeout_ms,
                "Loop did not stop in time"
            ),
        }
    }

    observer_log::log_bus_metrics(&bus);
    info!("wello-engine shutdown complete");
    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

/// Open the store named by `store.database_url`, or an in-memory one.
async fn open_store(config: &WelloConfig) -> Result<TimeSeriesStore, EngineError> {
    let journal = match config.store.sqlite() {
        Some(sqlite) => {
            info!(url = %sqlite.url, "Opening SQLite journal");
            Journal::Sqlite(SqliteJournal::connect(&sqlite).await?)
        }
        None => {
            info!("No database_url configured, history is kept in memory only");
            Journal::Memory
        }
    };
    TimeSeriesStore::open(journal)
        .await
        .map_err(EngineError::from)
}
