//! Polling Engine Implementation

use crate::derived::{apply_gauge_rule, GaugePressureRule};
use crate::sink::MeasurementSink;
use crate::snapshot::{Measurement, MeasurementSnapshot};
use crate::subscription::SubscriptionSet;
use chrono::Utc;
use ssm_catalog::{load_logger_definition, AssetLoader, ParameterCatalog};
use ssm_protocol::{
    CancelSource, CancelToken, EcuCapabilityMask, ParameterDefinition, SerialSession, SessionError,
};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Configuration for the polling engine
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between poll cycles (default: 50 ms, ~20 Hz)
    pub poll_delay: Duration,
    /// Delay while the subscription is empty
    pub idle_delay: Duration,
    /// Samples kept per history field
    pub history_capacity: usize,
    /// Catalog names whose recent values are kept
    pub history_fields: Vec<String>,
    pub gauge_rules: Vec<GaugePressureRule>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_delay: Duration::from_millis(50),
            idle_delay: Duration::from_millis(200),
            history_capacity: ring_buffer::DEFAULT_CAPACITY,
            history_fields: vec!["Engine Speed".to_string(), "Boost".to_string()],
            gauge_rules: vec![GaugePressureRule::default()],
        }
    }
}

/// Where the engine's catalog comes from
#[derive(Clone)]
pub enum CatalogSource {
    /// Used as is for every connection
    Fixed(Arc<ParameterCatalog<ParameterDefinition>>),
    /// Logger definition document, re-filtered against the capability mask
    /// of every successful handshake
    LoggerDefinition {
        loader: Arc<dyn AssetLoader>,
        name: String,
    },
}

impl std::fmt::Debug for CatalogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogSource::Fixed(catalog) => {
                f.debug_tuple("Fixed").field(&catalog.len()).finish()
            }
            CatalogSource::LoggerDefinition { name, .. } => f
                .debug_struct("LoggerDefinition")
                .field("name", name)
                .finish_non_exhaustive(),
        }
    }
}

/// Catalog-dependent lookups, recomputed when the catalog changes
#[derive(Debug, Default)]
struct Resolved {
    /// (history field, measurement name)
    history_keys: Vec<(String, String)>,
    /// (output name, source measurement name)
    gauge_sources: Vec<(String, String)>,
}

impl Resolved {
    fn new(catalog: &ParameterCatalog<ParameterDefinition>, config: &PollerConfig) -> Self {
        let canonical = |name: &str| {
            catalog
                .resolve(&[name])
                .found
                .first()
                .map(|definition| definition.name().to_string())
        };

        let history_keys = config
            .history_fields
            .iter()
            .map(|field| {
                // derived outputs are not in the catalog
                let key = canonical(field.as_str()).unwrap_or_else(|| field.clone());
                (field.clone(), key)
            })
            .collect();

        let gauge_sources = config
            .gauge_rules
            .iter()
            .filter_map(|rule| match canonical(rule.source.as_str()) {
                Some(source) => Some((rule.output.clone(), source)),
                None => {
                    debug!("Gauge source '{}' not in catalog", rule.source);
                    None
                }
            })
            .collect();

        Self {
            history_keys,
            gauge_sources,
        }
    }
}

/// Drives a [`SerialSession`] on a fixed cadence, reading only the
/// subscribed parameters.
pub struct PollingEngine<S: MeasurementSink> {
    session: SerialSession,
    source: CatalogSource,
    catalog: Arc<ParameterCatalog<ParameterDefinition>>,
    resolved: Resolved,
    subscriptions: watch::Receiver<Arc<SubscriptionSet>>,
    sink: S,
    config: PollerConfig,
    previous: MeasurementSnapshot,
}

/// Outcome of one pass through the loop
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Stop,
}

impl<S: MeasurementSink> PollingEngine<S> {
    pub fn new(
        session: SerialSession,
        source: CatalogSource,
        subscriptions: watch::Receiver<Arc<SubscriptionSet>>,
        sink: S,
        config: PollerConfig,
    ) -> Self {
        let catalog = match &source {
            CatalogSource::Fixed(catalog) => catalog.clone(),
            // filled in on the first handshake
            CatalogSource::LoggerDefinition { .. } => Arc::new(ParameterCatalog::empty()),
        };
        let resolved = Resolved::new(&catalog, &config);

        Self {
            session,
            source,
            catalog,
            resolved,
            subscriptions,
            sink,
            config,
            previous: MeasurementSnapshot::default(),
        }
    }

    /// Catalog currently used to resolve subscriptions
    pub fn catalog(&self) -> &Arc<ParameterCatalog<ParameterDefinition>> {
        &self.catalog
    }

    /// Run the loop on the calling thread until `cancel` fires or the sink
    /// closes. The transport is released on every exit path.
    pub fn run(mut self, cancel: CancelToken) {
        info!("Starting polling engine");
        while self.step(&cancel) == Step::Continue {}
        self.session.disconnect();
        info!("Polling engine stopped");
    }

    /// Run the loop on a dedicated thread
    pub fn spawn(self) -> std::io::Result<PollerHandle> {
        let cancel = CancelSource::new();
        let token = cancel.token();
        let thread = std::thread::Builder::new()
            .name("ssm-poller".into())
            .spawn(move || self.run(token))?;

        Ok(PollerHandle {
            cancel,
            thread: Some(thread),
        })
    }

    fn step(&mut self, cancel: &CancelToken) -> Step {
        if cancel.is_cancelled() {
            return Step::Stop;
        }

        if !self.session.is_connected() {
            match self.session.reconnect(cancel) {
                Ok(mask) => {
                    metrics::counter!("ssm_reconnects_total").increment(1);
                    self.on_handshake(&mask);
                }
                Err(SessionError::Cancelled) => return Step::Stop,
                Err(e) => {
                    error!("Reconnect failed: {}", e);
                    return wait(cancel, self.config.idle_delay);
                }
            }
        }

        // consistent view for the whole cycle
        let subscription = self.subscriptions.borrow().clone();
        if subscription.is_empty() {
            return wait(cancel, self.config.idle_delay);
        }

        let started = Instant::now();
        metrics::counter!("ssm_poll_cycles_total").increment(1);
        match self.poll_cycle(&subscription) {
            Ok(snapshot) => {
                metrics::histogram!("ssm_poll_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                self.previous = snapshot.clone();
                if self.sink.publish(snapshot).is_err() {
                    info!("Measurement sink closed");
                    return Step::Stop;
                }
            }
            Err(e) => {
                metrics::counter!("ssm_poll_failures_total").increment(1);
                warn!("Poll cycle failed: {}", e);
                if self.session.record_failure(&e) {
                    // reconnected at the top of the next step
                    self.session.disconnect();
                }
            }
        }

        wait(cancel, self.config.poll_delay)
    }

    /// Read the subscribed parameters once and fold them into a snapshot
    fn poll_cycle(&mut self, subscription: &SubscriptionSet) -> Result<MeasurementSnapshot, SessionError> {
        let resolution = self.catalog.resolve(subscription.names());
        if resolution.missing != self.previous.missing && !resolution.missing.is_empty() {
            warn!("Parameters not found in catalog: {:?}", resolution.missing);
        }

        let definitions = resolution.found;
        let values = self.session.read_batched(&definitions)?;
        self.session.record_success();

        let now = Utc::now();
        let mut fresh = Vec::with_capacity(definitions.len());
        let mut offset = 0;
        for definition in &definitions {
            match definition.convert(&values, offset) {
                Some(value) => fresh.push(Measurement::new(
                    definition.name(),
                    value,
                    definition.unit(),
                    now,
                )),
                None => warn!("No value for {} at offset {}", definition.name(), offset),
            }
            offset += definition.length();
        }

        for (output, source) in &self.resolved.gauge_sources {
            let derived = fresh
                .iter()
                .find(|m| &m.name == source)
                .and_then(|m| apply_gauge_rule(output, m));
            fresh.extend(derived);
        }

        Ok(self.previous.advance(
            fresh,
            resolution.missing,
            now,
            &self.resolved.history_keys,
            self.config.history_capacity,
        ))
    }

    fn on_handshake(&mut self, mask: &EcuCapabilityMask) {
        match mask.rom_id() {
            Ok(rom_id) => info!("ECU handshake complete, ROM ID {}", rom_id),
            Err(e) => warn!("ECU handshake complete, ROM ID unavailable: {}", e),
        }

        let CatalogSource::LoggerDefinition { loader, name } = &self.source else {
            return;
        };
        let target = self.session.config().target;
        match load_logger_definition(loader.as_ref(), name, Some(mask), target) {
            Ok(catalog) => {
                info!("Loaded {} parameters from {}", catalog.len(), name);
                self.catalog = Arc::new(catalog);
                self.resolved = Resolved::new(&self.catalog, &self.config);
            }
            Err(e) => warn!("Failed to reload {}, keeping previous catalog: {}", name, e),
        }
    }
}

/// Sleep unless cancelled
fn wait(cancel: &CancelToken, delay: Duration) -> Step {
    if cancel.wait(delay) {
        Step::Stop
    } else {
        Step::Continue
    }
}

/// Handle to a spawned polling thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct PollerHandle {
    cancel: CancelSource,
    thread: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Cancel the loop and wait for the thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Polling thread panicked");
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
