//! SSM Logger
//!
//! Wiring for the command-line logger: configuration, logging, catalog
//! selection and the JSON-lines snapshot output.

mod settings;

pub use settings::LoggerConfig;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use ssm_catalog::{
    bootstrap_catalog, parse_range_table, AssetLoader, ParameterCatalog, ParameterInfo,
};
use ssm_poller::{CatalogSource, MeasurementSnapshot};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides `level`. Logs go to
/// stderr so stdout carries only measurements.
pub fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}

/// Serve Prometheus metrics on `addr`
pub fn install_metrics_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("failed to start metrics exporter on {addr}"))?;
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// Logger definition when configured, bootstrap list otherwise
pub fn catalog_source(config: &LoggerConfig, loader: Arc<dyn AssetLoader>) -> CatalogSource {
    match &config.logger_definition {
        Some(name) => {
            info!("Using logger definition {}", name);
            CatalogSource::LoggerDefinition {
                loader,
                name: name.clone(),
            }
        }
        None => {
            let catalog = bootstrap_catalog();
            info!("Using bootstrap catalog ({} parameters)", catalog.len());
            CatalogSource::Fixed(Arc::new(catalog))
        }
    }
}

/// Load the configured range table, if any
pub fn load_range_table(
    config: &LoggerConfig,
    loader: &dyn AssetLoader,
) -> anyhow::Result<Option<ParameterCatalog<ParameterInfo>>> {
    let Some(name) = &config.range_table else {
        return Ok(None);
    };
    let reader = loader
        .open(name)
        .with_context(|| format!("failed to open range table {name}"))?;
    let table = parse_range_table(reader)?;
    info!("Loaded {} range table entries from {}", table.len(), name);
    Ok(Some(table))
}

/// Log the expected range of each subscribed parameter
pub fn report_expected_ranges(table: &ParameterCatalog<ParameterInfo>, subscription: &[String]) {
    let resolution = table.resolve(subscription);
    for info in resolution.found {
        let (min, max) = info.expected_range();
        info!("{} ({}): expected {} to {} {}", info.display_name, info.id, min, max, info.unit);
    }
    if !resolution.missing.is_empty() {
        warn!("No range information for {:?}", resolution.missing);
    }
}

/// Write one snapshot as a single JSON line
pub fn write_json_line<W: Write>(out: &mut W, snapshot: &MeasurementSnapshot) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, snapshot)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssm_catalog::{DirectoryAssetLoader, MemoryAssetLoader};

    fn catalog_loader() -> Arc<dyn AssetLoader> {
        Arc::new(DirectoryAssetLoader::new(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../ssm-catalog/testdata"
        )))
    }

    #[test]
    fn test_bootstrap_when_no_definition() {
        let source = catalog_source(&LoggerConfig::default(), catalog_loader());
        match source {
            CatalogSource::Fixed(catalog) => assert_eq!(catalog.len(), 11),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn test_logger_definition_source() {
        let config = LoggerConfig {
            logger_definition: Some("logger_definition.xml".into()),
            ..Default::default()
        };
        assert!(matches!(
            catalog_source(&config, catalog_loader()),
            CatalogSource::LoggerDefinition { name, .. } if name == "logger_definition.xml"
        ));
    }

    #[test]
    fn test_range_table() {
        let loader = catalog_loader();
        assert!(load_range_table(&LoggerConfig::default(), loader.as_ref())
            .unwrap()
            .is_none());

        let config = LoggerConfig {
            range_table: Some("parameter_ranges.csv".into()),
            ..Default::default()
        };
        let table = load_range_table(&config, loader.as_ref()).unwrap().unwrap();
        assert_eq!(table.len(), 7);
        report_expected_ranges(&table, &config.subscription);

        let missing = LoggerConfig {
            range_table: Some("nope.csv".into()),
            ..Default::default()
        };
        assert!(load_range_table(&missing, &MemoryAssetLoader::new()).is_err());
    }

    #[test]
    fn test_json_line() {
        let snapshot = MeasurementSnapshot {
            sequence: 7,
            ..Default::default()
        };
        let mut out = Vec::new();
        write_json_line(&mut out, &snapshot).unwrap();
        write_json_line(&mut out, &snapshot).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["sequence"], 7);
    }
}
