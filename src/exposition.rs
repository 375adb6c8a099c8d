//! Exposition Layer
//!
//! Turns scrape outcomes into Prometheus metric families and merges them with
//! process-wide metrics.
//!
//! # Components
//!
//! - [`ExporterMetrics`]: Static registry owned by the process
//! - [`outcome_registry`]: Per-request registry with domain samples and
//!   `collector_success` / `collector_duration_seconds`
//! - [`MetricSources`]: Ordered, read-only composite gathered at query time
//! - [`encode_text`]: Prometheus text format encoding

use std::collections::BTreeMap;

use prometheus::proto::MetricFamily;
use prometheus::{
    Encoder, GaugeVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use thiserror::Error;

use crate::cache::MetricCache;
use crate::collector::{CONNECTION_LABEL, ScrapeOutcome};

/// Subsystem used for all exporter self-metrics.
const SUBSYSTEM: &str = "exporter";

/// Errors raised while building or encoding the exposition.
#[derive(Debug, Error)]
pub enum ExpositionError {
    /// Metric registration or encoding failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Encoder produced invalid UTF-8.
    #[error("encoded metrics are not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Process-wide metrics shared by every response.
#[derive(Clone)]
pub struct ExporterMetrics {
    registry: Registry,
    scrapes_total: IntCounterVec,
    cache_entries: IntGauge,
}

impl ExporterMetrics {
    /// Create and register the static metrics under `namespace`.
    pub fn new(namespace: &str) -> Result<Self, ExpositionError> {
        let registry = Registry::new();

        let scrapes_total = IntCounterVec::new(
            Opts::new("scrapes_total", "Scrape requests served, by outcome.")
                .namespace(namespace)
                .subsystem(SUBSYSTEM),
            &["outcome"],
        )?;
        let build_info = IntGaugeVec::new(
            Opts::new("build_info", "Exporter build information.")
                .namespace(namespace)
                .subsystem(SUBSYSTEM),
            &["version"],
        )?;
        let cache_entries = IntGauge::with_opts(
            Opts::new("cache_entries", "Entries currently held in the value cache.")
                .namespace(namespace)
                .subsystem(SUBSYSTEM),
        )?;

        registry.register(Box::new(scrapes_total.clone()))?;
        registry.register(Box::new(build_info.clone()))?;
        registry.register(Box::new(cache_entries.clone()))?;
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1);

        Ok(Self {
            registry,
            scrapes_total,
            cache_entries,
        })
    }

    /// Count a served scrape. `outcome` is `success`, `partial` or `error`.
    pub fn record_scrape(&self, outcome: &str) {
        self.scrapes_total.with_label_values(&[outcome]).inc();
    }

    /// Update gauges that mirror cache state.
    pub fn observe_cache(&self, cache: &MetricCache) {
        self.cache_entries.set(cache.len() as i64);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for ExporterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterMetrics")
            .field("cache_entries", &self.cache_entries.get())
            .finish_non_exhaustive()
    }
}

/// Build the per-request registry for one scrape.
///
/// Holds every domain sample plus `collector_success` and
/// `collector_duration_seconds` for each provider label `collect.<name>`,
/// and the fan-out duration under the `connection` label. Samples that
/// cannot be registered, or whose label set disagrees with the first sample
/// of the same name, are dropped with a warning and mark their provider as
/// unsuccessful.
pub fn outcome_registry(
    outcome: &ScrapeOutcome,
    namespace: &str,
) -> Result<Registry, ExpositionError> {
    let registry = Registry::new();

    let duration = GaugeVec::new(
        Opts::new("collector_duration_seconds", "Collector time duration.")
            .namespace(namespace)
            .subsystem(SUBSYSTEM),
        &["collector"],
    )?;
    let success = GaugeVec::new(
        Opts::new("collector_success", "Whether a collector succeeded.")
            .namespace(namespace)
            .subsystem(SUBSYSTEM),
        &["collector"],
    )?;
    registry.register(Box::new(duration.clone()))?;
    registry.register(Box::new(success.clone()))?;

    duration
        .with_label_values(&[CONNECTION_LABEL])
        .set(outcome.connection_duration.as_secs_f64());

    let mut domain: BTreeMap<&str, (GaugeVec, Vec<&str>)> = BTreeMap::new();
    for report in &outcome.reports {
        let mut dropped = 0usize;

        for sample in &report.samples {
            let names: Vec<&str> = sample.labels.iter().map(|(k, _)| k.as_str()).collect();
            let values: Vec<&str> = sample.labels.iter().map(|(_, v)| v.as_str()).collect();

            if !domain.contains_key(sample.name.as_str()) {
                let gauge = match GaugeVec::new(Opts::new(&sample.name, &sample.help), &names)
                    .and_then(|g| registry.register(Box::new(g.clone())).map(|()| g))
                {
                    Ok(gauge) => gauge,
                    Err(e) => {
                        tracing::warn!(metric = %sample.name, collector = %report.provider, error = %e, "Dropping unregistrable metric");
                        dropped += 1;
                        continue;
                    }
                };
                domain.insert(sample.name.as_str(), (gauge, names.clone()));
            }

            let Some((gauge, expected)) = domain.get(sample.name.as_str()) else {
                continue;
            };
            if *expected != names {
                tracing::warn!(metric = %sample.name, collector = %report.provider, "Dropping sample with inconsistent labels");
                dropped += 1;
                continue;
            }
            gauge.with_label_values(&values).set(sample.value);
        }

        // A provider whose series did not all make it out counts as failed.
        let label = report.label();
        success
            .with_label_values(&[label.as_str()])
            .set(if report.success && dropped == 0 { 1.0 } else { 0.0 });
        duration
            .with_label_values(&[label.as_str()])
            .set(report.duration.as_secs_f64());
    }

    Ok(registry)
}

/// Ordered list of registries gathered together at query time.
///
/// Families with the same name from several sources are merged into one;
/// the first source's help text and type win.
#[derive(Default)]
pub struct MetricSources<'a> {
    sources: Vec<&'a Registry>,
}

impl<'a> MetricSources<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source.
    pub fn with(mut self, registry: &'a Registry) -> Self {
        self.sources.push(registry);
        self
    }

    /// Gather all sources into families sorted by name.
    pub fn gather(&self) -> Vec<MetricFamily> {
        let mut merged: BTreeMap<String, MetricFamily> = BTreeMap::new();

        for registry in &self.sources {
            for family in registry.gather() {
                match merged.get_mut(family.get_name()) {
                    Some(existing) if existing.get_field_type() == family.get_field_type() => {
                        for metric in family.get_metric() {
                            existing.mut_metric().push(metric.clone());
                        }
                    }
                    Some(_) => {
                        tracing::warn!(metric = %family.get_name(), "Dropping family with conflicting type");
                    }
                    None => {
                        merged.insert(family.get_name().to_string(), family);
                    }
                }
            }
        }

        merged.into_values().collect()
    }
}

/// Encode families in the Prometheus text format.
pub fn encode_text(families: &[MetricFamily]) -> Result<String, ExpositionError> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
