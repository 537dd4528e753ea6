//! SSM Logger - Main Entry Point

use ssm_catalog::{AssetLoader, DirectoryAssetLoader};
use ssm_logger::{
    catalog_source, init_logging, install_metrics_exporter, load_range_table,
    report_expected_ranges, write_json_line, LoggerConfig,
};
use ssm_poller::{subscription_channel, MeasurementSnapshot, PollingEngine, SubscriptionSet};
use ssm_protocol::{SerialPortProvider, SerialSession};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SSM_CONFIG").ok());
    let config = LoggerConfig::load(path.as_deref())?;
    init_logging(&config.log_level, config.log_json)?;

    info!("=== SSM Logger v{} ===", env!("CARGO_PKG_VERSION"));

    if let Some(addr) = config.metrics_addr {
        install_metrics_exporter(addr)?;
    }

    let loader: Arc<dyn AssetLoader> = Arc::new(DirectoryAssetLoader::new(&config.asset_dir));
    match load_range_table(&config, loader.as_ref()) {
        Ok(Some(table)) => report_expected_ranges(&table, &config.subscription),
        Ok(None) => {}
        Err(e) => warn!("Range table unavailable: {:#}", e),
    }

    let provider = match &config.port {
        Some(port) => SerialPortProvider::with_port(port.clone()),
        None => SerialPortProvider::new(),
    };
    let session = SerialSession::new(provider, config.session_config());

    let (_subscriptions, subscription_rx) =
        subscription_channel(SubscriptionSet::new(config.subscription.iter().cloned()));
    let (sink, mut snapshots) = watch::channel(MeasurementSnapshot::default());

    let poller = PollingEngine::new(
        session,
        catalog_source(&config, loader),
        subscription_rx,
        sink,
        config.poller_config(),
    )
    .spawn()?;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    warn!("Polling engine exited");
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                write_json_line(&mut std::io::stdout().lock(), &snapshot)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || poller.stop()).await?;
    Ok(())
}
