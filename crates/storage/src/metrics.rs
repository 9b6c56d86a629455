//! Metrics sinks for storage operations
//!
//! [`PrometheusMetrics`] registers into a caller-supplied registry: a latency
//! histogram and an error counter per operation, plus a summary family of
//! windowed latency quantiles (0.5/0.9/0.99 over the last 10 seconds) that is
//! computed whenever the registry is gathered.
//! [`RecordingMetrics`] keeps plain tallies for tests.

use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{LabelPair, Metric, MetricFamily, MetricType, Quantile, Summary};
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strand_core::{Error, MetricsSink, Result};

pub const METRICS_NAMESPACE: &str = "strand";
pub const SUMMARY_QUANTILES: [f64; 3] = [0.5, 0.9, 0.99];
pub const SUMMARY_MAX_AGE: Duration = Duration::from_secs(10);

const MAX_WINDOW_SAMPLES: usize = 4096;
const QUANTILE_METRIC: &str = "strand_storage_latency_quantile_seconds";

/// Aggregates over the samples currently inside a window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStats {
    pub count: u64,
    pub sum: f64,
    pub quantiles: Vec<(f64, f64)>,
}

/// Sliding window of latency samples per operation
pub struct WindowedSummary {
    max_age: Duration,
    samples: Mutex<HashMap<&'static str, VecDeque<(Instant, f64)>>>,
}

impl WindowedSummary {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            samples: Mutex::new(HashMap::new()),
        }
    }

    pub fn observe(&self, operation: &'static str, value: f64) {
        self.observe_at(operation, value, Instant::now());
    }

    fn observe_at(&self, operation: &'static str, value: f64, at: Instant) {
        let mut samples = self.samples.lock();
        let window = samples.entry(operation).or_default();
        window.push_back((at, value));
        if window.len() > MAX_WINDOW_SAMPLES {
            window.pop_front();
        }
    }

    /// Quantile values for `operation` over samples younger than the max age
    pub fn quantiles(&self, operation: &str) -> Vec<(f64, f64)> {
        self.stats_at(operation, Instant::now())
            .map(|stats| stats.quantiles)
            .unwrap_or_default()
    }

    /// Count, sum and quantiles for `operation`, or `None` once its window is empty
    pub fn stats(&self, operation: &str) -> Option<WindowStats> {
        self.stats_at(operation, Instant::now())
    }

    fn stats_at(&self, operation: &str, now: Instant) -> Option<WindowStats> {
        let mut samples = self.samples.lock();
        let window = samples.get_mut(operation)?;

        while let Some((at, _)) = window.front() {
            if now.saturating_duration_since(*at) > self.max_age {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.is_empty() {
            return None;
        }

        let mut values: Vec<f64> = window.iter().map(|(_, v)| *v).collect();
        values.sort_by(f64::total_cmp);

        let quantiles = SUMMARY_QUANTILES
            .iter()
            .map(|q| {
                let rank = (q * (values.len() - 1) as f64).round() as usize;
                (*q, values[rank.min(values.len() - 1)])
            })
            .collect();

        Some(WindowStats {
            count: values.len() as u64,
            sum: values.iter().sum(),
            quantiles,
        })
    }

    pub fn operations(&self) -> Vec<&'static str> {
        let mut operations: Vec<&'static str> = self.samples.lock().keys().copied().collect();
        operations.sort_unstable();
        operations
    }
}

/// Exposes a [`WindowedSummary`] as a Prometheus summary family. Quantiles are
/// computed at collection time, so any gather of the registry sees them.
struct WindowedCollector {
    engine: String,
    desc: Desc,
    summary: Arc<WindowedSummary>,
}

impl WindowedCollector {
    fn new(engine: &str, summary: Arc<WindowedSummary>) -> Result<Self> {
        let desc = Desc::new(
            QUANTILE_METRIC.to_string(),
            "Windowed latency quantiles for storage operations".to_string(),
            vec!["engine".to_string(), "op".to_string()],
            HashMap::new(),
        )
        .map_err(registration_error)?;
        Ok(Self {
            engine: engine.to_string(),
            desc,
            summary,
        })
    }
}

fn label(name: &str, value: &str) -> LabelPair {
    let mut pair = LabelPair::default();
    pair.set_name(name.to_string());
    pair.set_value(value.to_string());
    pair
}

impl Collector for WindowedCollector {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut family = MetricFamily::default();
        family.set_name(QUANTILE_METRIC.to_string());
        family.set_help(self.desc.help.clone());
        family.set_field_type(MetricType::SUMMARY);

        for op in self.summary.operations() {
            let Some(stats) = self.summary.stats(op) else {
                continue;
            };

            let mut summary = Summary::default();
            summary.set_sample_count(stats.count);
            summary.set_sample_sum(stats.sum);
            for (q, value) in stats.quantiles {
                let mut quantile = Quantile::default();
                quantile.set_quantile(q);
                quantile.set_value(value);
                summary.mut_quantile().push(quantile);
            }

            let mut metric = Metric::default();
            metric.mut_label().push(label("engine", &self.engine));
            metric.mut_label().push(label("op", op));
            metric.set_summary(summary);
            family.mut_metric().push(metric);
        }

        if family.get_metric().is_empty() {
            Vec::new()
        } else {
            vec![family]
        }
    }
}

/// Prometheus-backed sink bound to one engine
pub struct PrometheusMetrics {
    engine: String,
    registry: Registry,
    latency: HistogramVec,
    errors: CounterVec,
    summary: Arc<WindowedSummary>,
}

impl PrometheusMetrics {
    /// Register the storage metrics for `engine` into `registry`
    pub fn new(registry: &Registry, engine: &str) -> Result<Self> {
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "storage_latency_seconds",
                "Latency statistics for storage operations",
            )
            .namespace(METRICS_NAMESPACE),
            &["engine", "op"],
        )
        .map_err(registration_error)?;
        registry
            .register(Box::new(latency.clone()))
            .map_err(registration_error)?;

        let errors = CounterVec::new(
            Opts::new("storage_errors_total", "Error count for storage operations")
                .namespace(METRICS_NAMESPACE),
            &["engine", "op"],
        )
        .map_err(registration_error)?;
        registry
            .register(Box::new(errors.clone()))
            .map_err(registration_error)?;

        let summary = Arc::new(WindowedSummary::new(SUMMARY_MAX_AGE));
        registry
            .register(Box::new(WindowedCollector::new(engine, summary.clone())?))
            .map_err(registration_error)?;

        Ok(Self {
            engine: engine.to_string(),
            registry: registry.clone(),
            latency,
            errors,
            summary,
        })
    }

    pub fn summary(&self) -> &WindowedSummary {
        &self.summary
    }

    /// Render the registry in text exposition format
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::serialization("encode", "metrics", e))?;
        String::from_utf8(buffer).map_err(|e| Error::serialization("encode", "metrics", e))
    }
}

impl MetricsSink for PrometheusMetrics {
    fn observe(&self, operation: &'static str, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        self.latency
            .with_label_values(&[self.engine.as_str(), operation])
            .observe(seconds);
        self.summary.observe(operation, seconds);
    }

    fn record_error(&self, operation: &'static str) {
        self.errors
            .with_label_values(&[self.engine.as_str(), operation])
            .inc();
    }
}

fn registration_error(e: prometheus::Error) -> Error {
    Error::configuration(format!("failed to register storage metrics: {e}"))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OperationTally {
    pub observations: u64,
    pub errors: u64,
}

/// In-memory tallies per operation
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    tallies: Mutex<HashMap<&'static str, OperationTally>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tally(&self, operation: &str) -> OperationTally {
        self.tallies
            .lock()
            .get(operation)
            .copied()
            .unwrap_or_default()
    }
}

impl MetricsSink for RecordingMetrics {
    fn observe(&self, operation: &'static str, _elapsed: Duration) {
        self.tallies.lock().entry(operation).or_default().observations += 1;
    }

    fn record_error(&self, operation: &'static str) {
        self.tallies.lock().entry(operation).or_default().errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windowed_summary_quantiles() {
        let summary = WindowedSummary::new(Duration::from_secs(10));
        for i in 1..=100 {
            summary.observe("get", i as f64);
        }

        let q = summary.quantiles("get");
        assert_eq!(q.len(), 3);
        assert_eq!(q[0], (0.5, 51.0));
        assert_eq!(q[1], (0.9, 90.0));
        assert_eq!(q[2], (0.99, 99.0));
        assert!(summary.quantiles("put").is_empty());

        let stats = summary.stats("get").unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.sum, 5050.0);
    }

    #[test]
    fn test_windowed_summary_drops_old_samples() {
        let summary = WindowedSummary::new(Duration::from_secs(10));
        let start = Instant::now();
        summary.observe_at("get", 1.0, start);
        summary.observe_at("get", 2.0, start + Duration::from_secs(8));

        let later = start + Duration::from_secs(15);
        let stats = summary.stats_at("get", later).unwrap();
        assert_eq!(stats.count, 1);
        assert!(stats.quantiles.iter().all(|(_, v)| *v == 2.0));

        let much_later = start + Duration::from_secs(60);
        assert!(summary.stats_at("get", much_later).is_none());
    }

    #[test]
    fn test_prometheus_sink_uses_injected_registry() {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry, "memory").unwrap();

        metrics.observe("put", Duration::from_millis(2));
        metrics.record_error("put");

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("strand_storage_latency_seconds_count{engine=\"memory\",op=\"put\"} 1"));
        assert!(text.contains("strand_storage_errors_total{engine=\"memory\",op=\"put\"} 1"));
        assert!(text.contains("strand_storage_latency_quantile_seconds{engine=\"memory\",op=\"put\",quantile=\"0.99\"}"));

        assert!(text.contains("strand_storage_latency_quantile_seconds_count{engine=\"memory\",op=\"put\"} 1"));

        // A second engine on the same registry collides on metric names
        assert!(PrometheusMetrics::new(&registry, "other").is_err());
        // A separate registry is fully isolated
        assert!(PrometheusMetrics::new(&Registry::new(), "memory").is_ok());
    }

    #[test]
    fn test_recording_metrics_tallies() {
        let metrics = RecordingMetrics::new();
        metrics.observe("get", Duration::ZERO);
        metrics.observe("get", Duration::ZERO);
        metrics.record_error("get");

        assert_eq!(
            metrics.tally("get"),
            OperationTally {
                observations: 2,
                errors: 1
            }
        );
        assert_eq!(metrics.tally("delete"), OperationTally::default());
    }

    #[test]
    fn test_registry_gather_includes_windowed_quantiles() {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry, "memory").unwrap();

        let names: Vec<String> = registry.gather().iter().map(|f| f.get_name().to_string()).collect();
        assert!(!names.iter().any(|n| n == QUANTILE_METRIC));

        metrics.observe("get", Duration::from_millis(3));

        let families = registry.gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == QUANTILE_METRIC)
            .expect("windowed quantiles are gathered");
        assert_eq!(family.get_field_type(), MetricType::SUMMARY);

        let metric = &family.get_metric()[0];
        let labels: Vec<(&str, &str)> = metric
            .get_label()
            .iter()
            .map(|l| (l.get_name(), l.get_value()))
            .collect();
        assert_eq!(labels, vec![("engine", "memory"), ("op", "get")]);

        let summary = metric.get_summary();
        assert_eq!(summary.get_sample_count(), 1);
        let quantiles: Vec<f64> = summary.get_quantile().iter().map(|q| q.get_quantile()).collect();
        assert_eq!(quantiles, SUMMARY_QUANTILES.to_vec());
        assert!(summary
            .get_quantile()
            .iter()
            .all(|q| (q.get_value() - 0.003).abs() < 1e-9));
    }
}
