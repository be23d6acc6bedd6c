// Prometheus-backed metrics registry
// Author: kelexine (https://github.com/kelexine)

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use prometheus::proto::{MetricFamily, MetricType};
use prometheus::{CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("metric '{name}' is a {existing:?}, not a {requested:?}")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("metric '{name}' was first observed with labels {existing:?}, got {requested:?}")]
    LabelMismatch {
        name: String,
        existing: Vec<String>,
        requested: Vec<String>,
    },

    #[error("counter '{0}' cannot decrease")]
    NegativeDelta(String),

    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

enum Series {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
}

impl Series {
    fn kind(&self) -> MetricKind {
        match self {
            Series::Counter(_) => MetricKind::Counter,
            Series::Gauge(_) => MetricKind::Gauge,
            Series::Histogram(_) => MetricKind::Histogram,
        }
    }
}

struct Entry {
    series: Series,
    label_names: Vec<String>,
}

struct Inner {
    registry: Registry,
    entries: HashMap<String, Entry>,
}

impl Inner {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
            entries: HashMap::new(),
        }
    }
}

/// Process-scoped metrics registry.
///
/// Series are created on first observation of a name. Every series of a
/// given name shares the kind and label key set of that first observation.
/// All updates are lock-protected, non-suspending read-modify-writes, so
/// concurrent increments are never lost.
pub struct MetricsRegistry {
    inner: RwLock<Inner>,
    buckets: Vec<f64>,
    timers: Mutex<HashMap<String, Instant>>,
}

impl MetricsRegistry {
    pub fn new(buckets: Vec<f64>) -> Self {
        Self {
            inner: RwLock::new(Inner::new()),
            buckets,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Histogram upper bounds, excluding the implicit `+Inf` bucket.
    pub fn buckets(&self) -> &[f64] {
        &self.buckets
    }

    pub fn counter(&self, name: &str, delta: f64, labels: &[(&str, &str)]) {
        if let Err(e) = self.try_counter(name, delta, labels) {
            warn!("Dropped counter observation: {}", e);
        }
    }

    pub fn gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Err(e) = self.try_gauge(name, value, labels) {
            warn!("Dropped gauge observation: {}", e);
        }
    }

    pub fn histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Err(e) = self.try_histogram(name, value, labels) {
            warn!("Dropped histogram observation: {}", e);
        }
    }

    pub fn try_counter(&self, name: &str, delta: f64, labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        // Also rejects NaN.
        if !(delta >= 0.0) {
            return Err(MetricsError::NegativeDelta(name.to_string()));
        }
        self.observe(name, MetricKind::Counter, labels, |series, values| {
            if let Series::Counter(vec) = series {
                vec.with_label_values(values).inc_by(delta);
            }
        })
    }

    pub fn try_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        self.observe(name, MetricKind::Gauge, labels, |series, values| {
            if let Series::Gauge(vec) = series {
                vec.with_label_values(values).set(value);
            }
        })
    }

    pub fn try_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        self.observe(name, MetricKind::Histogram, labels, |series, values| {
            if let Series::Histogram(vec) = series {
                vec.with_label_values(values).observe(value);
            }
        })
    }

    /// Records `elapsed` (in seconds) into the `<name>.duration` histogram.
    pub fn observe_duration(&self, name: &str, elapsed: Duration, labels: &[(&str, &str)]) {
        self.histogram(&format!("{}.duration", name), elapsed.as_secs_f64(), labels);
    }

    /// Starts (or restarts) the named timer.
    pub fn start_timer(&self, name: &str) {
        self.timers.lock().insert(name.to_string(), Instant::now());
    }

    /// Stops the named timer and records the elapsed time into an
    /// unlabelled `<name>.duration`. Returns `None` if the timer was never
    /// started. Use [`stop_timer_with_labels`](Self::stop_timer_with_labels)
    /// when `<name>.duration` already carries labels (e.g. `fetch` with
    /// `outcome`); a series keeps the label keys of its first observation.
    pub fn stop_timer(&self, name: &str) -> Option<Duration> {
        self.stop_timer_with_labels(name, &[])
    }

    /// Stops the named timer and records into `<name>.duration` under `labels`.
    pub fn stop_timer_with_labels(&self, name: &str, labels: &[(&str, &str)]) -> Option<Duration> {
        let started = self.timers.lock().remove(name)?;
        let elapsed = started.elapsed();
        self.observe_duration(name, elapsed, labels);
        Some(elapsed)
    }

    fn observe<F>(&self, name: &str, kind: MetricKind, labels: &[(&str, &str)], apply: F) -> Result<(), MetricsError>
    where
        F: FnOnce(&Series, &[&str]),
    {
        let name = normalize_name(name);
        let (keys, values) = split_labels(labels);
        let values: Vec<&str> = values.iter().map(String::as_str).collect();

        {
            let inner = self.inner.read();
            if let Some(entry) = inner.entries.get(&name) {
                check_entry(&name, entry, kind, &keys)?;
                apply(&entry.series, &values);
                return Ok(());
            }
        }

        let mut inner = self.inner.write();
        // Another writer may have created the series between the two locks.
        if !inner.entries.contains_key(&name) {
            let series = self.create_series(&name, kind, &keys)?;
            let collector: Box<dyn prometheus::core::Collector> = match &series {
                Series::Counter(v) => Box::new(v.clone()),
                Series::Gauge(v) => Box::new(v.clone()),
                Series::Histogram(v) => Box::new(v.clone()),
            };
            inner.registry.register(collector)?;
            inner.entries.insert(
                name.clone(),
                Entry {
                    series,
                    label_names: keys.clone(),
                },
            );
        }

        let entry = &inner.entries[&name];
        check_entry(&name, entry, kind, &keys)?;
        apply(&entry.series, &values);
        Ok(())
    }

    fn create_series(&self, name: &str, kind: MetricKind, keys: &[String]) -> Result<Series, MetricsError> {
        let label_names: Vec<&str> = keys.iter().map(String::as_str).collect();
        let help = format!("{} {}", name, kind_str(kind));
        let series = match kind {
            MetricKind::Counter => Series::Counter(CounterVec::new(Opts::new(name, help), &label_names)?),
            MetricKind::Gauge => Series::Gauge(GaugeVec::new(Opts::new(name, help), &label_names)?),
            MetricKind::Histogram => Series::Histogram(HistogramVec::new(
                HistogramOpts::new(name, help).buckets(self.buckets.clone()),
                &label_names,
            )?),
        };
        Ok(series)
    }

    fn gather(&self) -> Vec<MetricFamily> {
        self.inner.read().registry.gather()
    }

    /// Classic text exposition, one timestamped line per data point.
    pub fn render(&self) -> String {
        let mut families = self.gather();
        let now_ms = Utc::now().timestamp_millis();
        for family in families.iter_mut() {
            for metric in family.mut_metric().iter_mut() {
                metric.set_timestamp_ms(now_ms);
            }
        }

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buffer) {
            warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Structured view of every series for programmatic consumers.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut series = Vec::new();

        for family in self.gather() {
            let kind = match family.get_field_type() {
                MetricType::COUNTER => MetricKind::Counter,
                MetricType::GAUGE => MetricKind::Gauge,
                MetricType::HISTOGRAM => MetricKind::Histogram,
                _ => continue,
            };

            for metric in family.get_metric() {
                let labels: BTreeMap<String, String> = metric
                    .get_label()
                    .iter()
                    .map(|l| (l.get_name().to_string(), l.get_value().to_string()))
                    .collect();

                let (value, histogram) = match kind {
                    MetricKind::Counter => (Some(metric.get_counter().get_value()), None),
                    MetricKind::Gauge => (Some(metric.get_gauge().get_value()), None),
                    MetricKind::Histogram => {
                        let h = metric.get_histogram();
                        let mut buckets: Vec<BucketSnapshot> = h
                            .get_bucket()
                            .iter()
                            .map(|b| BucketSnapshot {
                                le: b.get_upper_bound().to_string(),
                                cumulative_count: b.get_cumulative_count(),
                            })
                            .collect();
                        buckets.push(BucketSnapshot {
                            le: "+Inf".to_string(),
                            cumulative_count: h.get_sample_count(),
                        });
                        (
                            None,
                            Some(HistogramSnapshot {
                                buckets,
                                sum: h.get_sample_sum(),
                                count: h.get_sample_count(),
                            }),
                        )
                    }
                };

                series.push(SeriesSnapshot {
                    name: family.get_name().to_string(),
                    kind,
                    labels,
                    value,
                    histogram,
                });
            }
        }

        MetricsSnapshot {
            taken_at: Utc::now(),
            series,
        }
    }

    /// Clears every series and timer. Test isolation only.
    pub fn reset(&self) {
        *self.inner.write() = Inner::new();
        self.timers.lock().clear();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(crate::config::default_buckets())
    }
}

fn check_entry(name: &str, entry: &Entry, kind: MetricKind, keys: &[String]) -> Result<(), MetricsError> {
    if entry.series.kind() != kind {
        return Err(MetricsError::KindMismatch {
            name: name.to_string(),
            existing: entry.series.kind(),
            requested: kind,
        });
    }
    if entry.label_names != keys {
        return Err(MetricsError::LabelMismatch {
            name: name.to_string(),
            existing: entry.label_names.clone(),
            requested: keys.to_vec(),
        });
    }
    Ok(())
}

fn kind_str(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::Counter => "counter",
        MetricKind::Gauge => "gauge",
        MetricKind::Histogram => "histogram",
    }
}

/// Maps a free-form name onto the Prometheus charset: `fetch.duration`
/// becomes `fetch_duration`.
pub fn normalize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Sorts labels by key; returns normalized keys and values in matching order.
fn split_labels(labels: &[(&str, &str)]) -> (Vec<String>, Vec<String>) {
    let mut sorted: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| (normalize_name(k).replace(':', "_"), v.to_string()))
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted.into_iter().unzip()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub series: Vec<SeriesSnapshot>,
}

impl MetricsSnapshot {
    /// Finds the series with exactly these labels.
    pub fn find(&self, name: &str, labels: &[(&str, &str)]) -> Option<&SeriesSnapshot> {
        let name = normalize_name(name);
        let (keys, values) = split_labels(labels);
        let wanted: BTreeMap<String, String> = keys.into_iter().zip(values).collect();
        self.series.iter().find(|s| s.name == name && s.labels == wanted)
    }

    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.find(name, labels).and_then(|s| s.value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    pub name: String,
    pub kind: MetricKind,
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histogram: Option<HistogramSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub buckets: Vec<BucketSnapshot>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSnapshot {
    pub le: String,
    pub cumulative_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("fetch.duration"), "fetch_duration");
        assert_eq!(normalize_name("cache-hits"), "cache_hits");
        assert_eq!(normalize_name("5xx"), "_5xx");
    }

    #[test]
    fn test_labels_sorted_by_key() {
        let (keys, values) = split_labels(&[("source", "primary"), ("outcome", "ok")]);
        assert_eq!(keys, vec!["outcome", "source"]);
        assert_eq!(values, vec!["ok", "primary"]);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let registry = MetricsRegistry::default();
        registry.try_counter("requests", 1.0, &[]).unwrap();
        let err = registry.try_gauge("requests", 1.0, &[]).unwrap_err();
        assert!(matches!(err, MetricsError::KindMismatch { .. }));
    }

    #[test]
    fn test_label_set_mismatch_rejected() {
        let registry = MetricsRegistry::default();
        registry.try_counter("requests", 1.0, &[("origin", "a")]).unwrap();
        let err = registry.try_counter("requests", 1.0, &[("region", "eu")]).unwrap_err();
        assert!(matches!(err, MetricsError::LabelMismatch { .. }));
    }

    #[test]
    fn test_negative_counter_delta_rejected() {
        let registry = MetricsRegistry::default();
        assert!(registry.try_counter("requests", -1.0, &[]).is_err());
        assert!(registry.try_counter("requests", f64::NAN, &[]).is_err());
    }
}
