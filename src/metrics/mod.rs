/*!
 * # Metrics Module
 *
 * In-process metrics for the ERP API.
 *
 * Values recorded through the `metrics` facade (`counter!`, `gauge!`,
 * `histogram!`) land in [`MetricsRegistry`] once [`install_recorder`] has run.
 * Production workflow counters are `prometheus` collectors registered in
 * [`PROMETHEUS_REGISTRY`]. Both are exported together:
 *
 * - Prometheus text format at `/metrics`
 * - JSON format at `/metrics/json`
 */

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use lazy_static::lazy_static;
use metrics::{CounterFn, GaugeFn, HistogramFn, Key, KeyName, SharedString, Unit};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to export metrics: {0}")]
    ExportError(String),
    #[error("Metrics recorder already installed")]
    RecorderInstalled,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_by(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl CounterFn for Counter {
    fn increment(&self, value: u64) {
        self.inc_by(value);
    }

    fn absolute(&self, value: u64) {
        self.value.fetch_max(value, Ordering::Relaxed);
    }
}

/// Gauge stored as the bit pattern of an `f64`.
#[derive(Debug, Clone, Default)]
pub struct Gauge {
    bits: Arc<AtomicU64>,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, delta: f64) {
        let _ = self
            .bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl GaugeFn for Gauge {
    fn increment(&self, value: f64) {
        self.add(value);
    }

    fn decrement(&self, value: f64) {
        self.add(-value);
    }

    fn set(&self, value: f64) {
        Gauge::set(self, value);
    }
}

/// Count and sum of observations.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    count: Arc<AtomicU64>,
    sum: Gauge,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.add(value);
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum(&self) -> f64 {
        self.sum.get()
    }
}

impl HistogramFn for Histogram {
    fn record(&self, value: f64) {
        self.observe(value);
    }
}

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: DashMap<String, Counter>,
    gauges: DashMap<String, Gauge>,
    histograms: DashMap<String, Histogram>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_counter(&self, name: &str) -> Counter {
        self.counters
            .entry(name.to_string())
            .or_insert_with(Counter::new)
            .clone()
    }

    pub fn get_or_create_gauge(&self, name: &str) -> Gauge {
        self.gauges
            .entry(name.to_string())
            .or_insert_with(Gauge::new)
            .clone()
    }

    pub fn get_or_create_histogram(&self, name: &str) -> Histogram {
        self.histograms
            .entry(name.to_string())
            .or_insert_with(Histogram::new)
            .clone()
    }

    pub fn export_metrics(&self) -> String {
        let mut output = String::new();

        for entry in self.counters.iter() {
            let (name, counter) = entry.pair();
            output.push_str(&format!("# TYPE {} counter\n", base_name(name)));
            output.push_str(&format!("{} {}\n", name, counter.get()));
        }

        for entry in self.gauges.iter() {
            let (name, gauge) = entry.pair();
            output.push_str(&format!("# TYPE {} gauge\n", base_name(name)));
            output.push_str(&format!("{} {}\n", name, gauge.get()));
        }

        for entry in self.histograms.iter() {
            let (name, histogram) = entry.pair();
            let (base, labels) = split_labels(name);
            output.push_str(&format!("# TYPE {} summary\n", base));
            output.push_str(&format!(
                "{}_count{} {}\n",
                base,
                labels,
                histogram.get_count()
            ));
            output.push_str(&format!("{}_sum{} {}\n", base, labels, histogram.get_sum()));
        }

        output
    }

    pub fn export_metrics_json(&self) -> serde_json::Value {
        let mut counters = serde_json::Map::new();
        for entry in self.counters.iter() {
            let (name, counter) = entry.pair();
            counters.insert(name.to_string(), json!(counter.get()));
        }

        let mut gauges = serde_json::Map::new();
        for entry in self.gauges.iter() {
            let (name, gauge) = entry.pair();
            gauges.insert(name.to_string(), json!(gauge.get()));
        }

        let mut histograms = serde_json::Map::new();
        for entry in self.histograms.iter() {
            let (name, histogram) = entry.pair();
            histograms.insert(
                name.to_string(),
                json!({
                    "count": histogram.get_count(),
                    "sum": histogram.get_sum(),
                }),
            );
        }

        json!({
            "counters": counters,
            "gauges": gauges,
            "histograms": histograms,
        })
    }
}

fn base_name(series: &str) -> &str {
    split_labels(series).0
}

fn split_labels(series: &str) -> (&str, &str) {
    match series.find('{') {
        Some(idx) => series.split_at(idx),
        None => (series, ""),
    }
}

/// Prometheus series name for a facade key: dots become underscores and
/// labels are rendered inline.
fn series_name(key: &Key) -> String {
    let name = key.name().replace(['.', '-'], "_");
    let labels: Vec<String> = key
        .labels()
        .map(|label| format!("{}=\"{}\"", label.key(), label.value()))
        .collect();
    if labels.is_empty() {
        name
    } else {
        format!("{}{{{}}}", name, labels.join(","))
    }
}

/// Bridges the `metrics` facade into [`METRICS`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryRecorder;

impl metrics::Recorder for RegistryRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key) -> metrics::Counter {
        metrics::Counter::from_arc(Arc::new(METRICS.get_or_create_counter(&series_name(key))))
    }

    fn register_gauge(&self, key: &Key) -> metrics::Gauge {
        metrics::Gauge::from_arc(Arc::new(METRICS.get_or_create_gauge(&series_name(key))))
    }

    fn register_histogram(&self, key: &Key) -> metrics::Histogram {
        metrics::Histogram::from_arc(Arc::new(METRICS.get_or_create_histogram(&series_name(key))))
    }
}

/// Installs [`RegistryRecorder`] as the global `metrics` recorder.
pub fn install_recorder() -> Result<(), MetricsError> {
    metrics::set_boxed_recorder(Box::new(RegistryRecorder))
        .map_err(|_| MetricsError::RecorderInstalled)?;
    info!("metrics recorder installed");
    Ok(())
}

lazy_static! {
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();

    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Production order state transitions, labelled by target status.
    pub static ref PRODUCTION_TRANSITIONS: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new(
                "production_order_transitions_total",
                "Production order status transitions",
            ),
            &["status"],
        )
        .expect("metric can be created");
        let _ = PROMETHEUS_REGISTRY.register(Box::new(counter.clone()));
        counter
    };

    /// Reservation attempts that found at least one material short.
    pub static ref RESERVATION_SHORTAGES: IntCounter = {
        let counter = IntCounter::new(
            "material_reservation_shortages_total",
            "Reservation attempts rejected for insufficient materials",
        )
        .expect("metric can be created");
        let _ = PROMETHEUS_REGISTRY.register(Box::new(counter.clone()));
        counter
    };
}

pub fn record_transition(status: &str) {
    PRODUCTION_TRANSITIONS.with_label_values(&[status]).inc();
}

fn export_prometheus() -> Result<String, MetricsError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&PROMETHEUS_REGISTRY.gather(), &mut buffer)
        .map_err(|e| MetricsError::ExportError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| MetricsError::ExportError(e.to_string()))
}

/// Full Prometheus text exposition.
pub fn render_prometheus() -> Result<String, MetricsError> {
    let mut output = METRICS.export_metrics();
    output.push_str(&export_prometheus()?);
    Ok(output)
}

pub async fn metrics_handler() -> Result<Response, MetricsError> {
    let body = render_prometheus()?;
    debug!(bytes = body.len(), "metrics scraped");
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}

pub async fn metrics_json_handler() -> Json<serde_json::Value> {
    let mut value = METRICS.export_metrics_json();
    let transitions: serde_json::Map<String, serde_json::Value> = PROMETHEUS_REGISTRY
        .gather()
        .iter()
        .flat_map(|family| {
            let name = family.get_name().to_string();
            family.get_metric().iter().map(move |metric| {
                let labels: Vec<String> = metric
                    .get_label()
                    .iter()
                    .map(|l| format!("{}={}", l.get_name(), l.get_value()))
                    .collect();
                let key = if labels.is_empty() {
                    name.clone()
                } else {
                    format!("{}{{{}}}", name, labels.join(","))
                };
                (key, json!(metric.get_counter().get_value()))
            })
        })
        .collect();
    value["workflow"] = serde_json::Value::Object(transitions);
    Json(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_keeps_fractional_values() {
        let gauge = Gauge::new();
        gauge.set(2.5);
        gauge.add(-0.75);
        assert!((gauge.get() - 1.75).abs() < f64::EPSILON);
    }

    #[test]
    fn registry_exports_histograms_with_labels() {
        let registry = MetricsRegistry::new();
        registry
            .get_or_create_histogram("db_ping_seconds{pool=\"main\"}")
            .observe(0.5);
        registry.get_or_create_counter("requests_total").inc_by(3);

        let text = registry.export_metrics();
        assert!(text.contains("requests_total 3"));
        assert!(text.contains("db_ping_seconds_count{pool=\"main\"} 1"));
        assert!(text.contains("# TYPE db_ping_seconds summary"));
    }

    #[test]
    fn series_names_are_prometheus_safe() {
        let key = Key::from_parts(
            "production.orders.created",
            vec![metrics::Label::new("status", "CONFIRMED")],
        );
        assert_eq!(
            series_name(&key),
            "production_orders_created{status=\"CONFIRMED\"}"
        );
    }

    #[test]
    fn workflow_counters_are_exported() {
        record_transition("COMPLETED");
        let text = render_prometheus().unwrap();
        assert!(text.contains("production_order_transitions_total"));
    }
}
