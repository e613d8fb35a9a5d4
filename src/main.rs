mod config;
mod database;
mod device;
mod dispatcher;
mod error;
mod ingest;
mod models;
mod publish;
mod utils;

use log::{error, info, warn};
use std::process::ExitCode;
use time::OffsetDateTime;
use tokio::sync::{oneshot, watch};

use config::{SensorConfig, StorageConfig};
use database::{PostgresStore, RecordStore, SqliteStore};
use device::{open_serial, SessionController};
use dispatcher::run_dispatcher;
use error::SessionError;
use ingest::{run_ingest, StopReason};
use publish::{JsonLinePublisher, MetricsClient, Publisher};
use utils::format_datetime;

// exit code for a run ended by SIGINT
const EXIT_INTERRUPTED: u8 = 130;

async fn open_store(
    storage: &StorageConfig,
) -> Result<Option<Box<dyn RecordStore>>, Box<dyn std::error::Error>> {
    let store: Option<Box<dyn RecordStore>> = match storage {
        StorageConfig::Disabled => {
            warn!("No database configured, records will not be persisted");
            None
        }
        StorageConfig::Sqlite(path) => Some(Box::new(SqliteStore::open(path)?)),
        StorageConfig::Postgres(url) => Some(Box::new(PostgresStore::connect(url).await?)),
    };
    Ok(store)
}

fn build_publishers(
    config: &SensorConfig,
) -> Result<Vec<Box<dyn Publisher>>, Box<dyn std::error::Error>> {
    let mut publishers: Vec<Box<dyn Publisher>> = vec![Box::new(JsonLinePublisher::stdout())];

    if let Some(metrics) = &config.metrics {
        let client = MetricsClient::new(&metrics.endpoint(), &metrics.api_key, &metrics.prefix)?;
        info!("Submitting metrics to {} as {}.*", metrics.site, metrics.prefix);
        publishers.push(Box::new(client));
    }

    Ok(publishers)
}

async fn run(config: SensorConfig) -> Result<StopReason, Box<dyn std::error::Error>> {
    info!(
        "Starting UD-CO2S collection on {} at {}",
        config.device,
        format_datetime(&OffsetDateTime::now_utc())
    );

    let mut store = open_store(&config.storage).await?;
    let publishers = build_publishers(&config)?;

    let transport = open_serial(&config.device, config.baud_rate, config.read_timeout)?;
    let mut session = SessionController::new(transport, config.settle_delay);
    let mut stream = session.start().await?;

    // Handle Ctrl+C by asking the device to stop; the read loop sees OK STP
    let (stop_tx, stop_rx) = oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = stop_tx.send(());
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let (record_tx, record_rx) = watch::channel(None);
    let dispatcher = tokio::spawn(run_dispatcher(
        record_rx,
        config.publish_interval,
        publishers,
    ));

    let outcome = run_ingest(&mut stream, stop_rx, &record_tx, store.as_deref_mut()).await;
    let result = match outcome {
        // the link still works, so try to leave the device idle
        Err(e) if !matches!(e, SessionError::Transport(_)) => {
            warn!("Session failed ({}), sending STP to leave the device idle", e);
            if let Err(stop_err) = stream.stop().await {
                warn!("Final STP failed: {}", stop_err);
            }
            Err(e)
        }
        other => other,
    };

    drop(record_tx);
    if let Err(e) = dispatcher.await {
        error!("Dispatcher task failed: {}", e);
    }

    let summary = result?;
    info!(
        "Session ended ({:?}): {} records, {} duplicate minutes, {} unparsable lines, {} storage failures",
        summary.reason,
        summary.records,
        summary.duplicates,
        summary.parse_failures,
        summary.storage_failures
    );
    if summary.storage_failures > 0 {
        warn!("Some records were not persisted");
    }

    Ok(summary.reason)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match SensorConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(StopReason::Device) => {
            info!("Device stopped streaming. Exiting.");
            ExitCode::SUCCESS
        }
        Ok(StopReason::Operator) => {
            info!("Program terminated by user. Exiting gracefully.");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            error!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}
