//! # Fleet BMS
//!
//! Runs the fleet engine against a simulated fleet and periodically reports
//! the fleet-wide capacity totals.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use fleet_bms::aggregate::CapacityTotals;
use fleet_bms::config::{Config, LoggingConfig};
use fleet_bms::simulation::SimulatedFleet;
use fleet_bms::ShardTable;

/// Config file picked up when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix of the daily rolling log file
const LOG_FILE_PREFIX: &str = "fleet-bms.log";

/// Main entry point for the fleet engine
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (argument, then `config/default.toml`, then defaults)
///    - Set up logging with tracing subscriber
///    - Build the shard table and the simulated fleet
///
/// 2. **Main Loop**
///    - Sample every simulated cell and ingest the readings
///    - Report fleet totals every `report_interval_ms`
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Log a final snapshot of the fleet totals
///
/// # Errors
///
/// Returns error if the configuration cannot be read or is invalid.
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(std::env::args().nth(1).map(PathBuf::from))?;
    let _log_guard = init_logging(&config.logging)?;

    info!("Fleet BMS v{} starting...", env!("CARGO_PKG_VERSION"));

    let table = ShardTable::from_config(&config).context("Failed to build shard table")?;

    let mut report_interval = interval(Duration::from_millis(config.engine.report_interval_ms));
    report_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut fleet = if config.simulation.enabled {
        let fleet = SimulatedFleet::new(&config.simulation, table.model());
        info!(
            "Simulating {} stations, {} cells",
            config.simulation.stations,
            fleet.len()
        );
        Some(fleet)
    } else {
        warn!("Simulation disabled, no telemetry source configured");
        None
    };

    let mut sample_interval = interval(Duration::from_millis(config.simulation.sample_interval_ms));
    sample_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Press Ctrl+C to exit");

    let mut samples: u64 = 0;
    let mut rejected: u64 = 0;

    loop {
        tokio::select! {
            _ = sample_interval.tick(), if fleet.is_some() => {
                let Some(fleet) = fleet.as_mut() else { continue };
                for record in fleet.tick(Utc::now().timestamp()) {
                    match table.ingest(&record) {
                        Ok(()) => samples += 1,
                        Err(e) => {
                            debug!("Dropped sample for {}: {}", record.path(), e);
                            rejected += 1;
                        }
                    }
                }
            }

            _ = report_interval.tick() => {
                report(&table.snapshot_totals(), table.cell_count(), samples, rejected);
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                report(&table.snapshot_totals(), table.cell_count(), samples, rejected);
                break;
            }
        }
    }

    Ok(())
}

fn load_config(arg: Option<PathBuf>) -> Result<Config> {
    let path = arg.or_else(|| {
        let default = Path::new(DEFAULT_CONFIG_PATH);
        default.exists().then(|| default.to_path_buf())
    });

    match path {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// Installs the stdout subscriber and, when `log_dir` is set, a daily
/// rolling file writer. The returned guard must live until exit.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let stdout = tracing_subscriber::fmt::layer();

    match &logging.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stdout).init();
            Ok(None)
        }
    }
}

fn report(totals: &CapacityTotals, cells: usize, samples: u64, rejected: u64) {
    match totals.state_of_charge() {
        Some(soc) => info!(
            "Fleet: {:.1}/{:.1} Ah ({:.1}%), {} cells, {} samples, {} rejected",
            totals.current_capacity,
            totals.max_capacity,
            soc * 100.0,
            cells,
            samples,
            rejected
        ),
        None => info!("Fleet: no capacity reported yet ({} samples, {} rejected)", samples, rejected),
    }
}
