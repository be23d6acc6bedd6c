// Metrics registry and analytics tracker tests
// Author: kelexine (https://github.com/kelexine)

use blobgate::analytics::AnalyticsTracker;
use blobgate::metrics::{MetricKind, MetricsError, MetricsRegistry};
use blobgate::utils::ManualClock;
use chrono::Duration as ChronoDuration;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_counter_increments_are_exact() {
    let metrics = Arc::new(MetricsRegistry::default());
    let mut handles = Vec::new();

    for task in 0..16 {
        let metrics = metrics.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..250 {
                metrics.counter("requests", 1.0, &[("route", "fetch")]);
                if task % 2 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.value("requests", &[("route", "fetch")]), Some(4000.0));
}

#[test]
fn test_histogram_buckets_are_cumulative() {
    let metrics = MetricsRegistry::new(vec![0.1, 1.0, 10.0]);
    for value in [0.05, 0.5, 0.5, 5.0, 50.0] {
        metrics.histogram("latency", value, &[]);
    }

    let snapshot = metrics.snapshot();
    let series = snapshot.find("latency", &[]).unwrap();
    assert_eq!(series.kind, MetricKind::Histogram);

    let histogram = series.histogram.as_ref().unwrap();
    let counts: Vec<u64> = histogram.buckets.iter().map(|b| b.cumulative_count).collect();
    assert_eq!(counts, vec![1, 3, 4, 5]);
    assert_eq!(histogram.buckets.last().unwrap().le, "+Inf");
    assert_eq!(histogram.count, 5);
    assert!((histogram.sum - 56.05).abs() < 1e-9);
}

#[test]
fn test_timer_records_into_duration_histogram() {
    let metrics = MetricsRegistry::default();
    metrics.start_timer("fetch");
    assert!(metrics.stop_timer("fetch").is_some());
    assert!(metrics.stop_timer("fetch").is_none());

    let snapshot = metrics.snapshot();
    let series = snapshot.find("fetch.duration", &[]).unwrap();
    assert_eq!(series.name, "fetch_duration");
    assert_eq!(series.histogram.as_ref().unwrap().count, 1);
}

#[test]
fn test_labelled_timer_joins_labelled_duration_series() {
    let metrics = MetricsRegistry::default();
    metrics.record_fetch("ok", "cache", Duration::from_millis(5));

    // An unlabelled stop cannot land in a series keyed by outcome.
    metrics.start_timer("fetch");
    assert!(metrics.stop_timer("fetch").is_some());
    assert!(metrics.snapshot().find("fetch.duration", &[]).is_none());

    metrics.start_timer("fetch");
    assert!(metrics.stop_timer_with_labels("fetch", &[("outcome", "manual")]).is_some());

    let snapshot = metrics.snapshot();
    let manual = snapshot.find("fetch.duration", &[("outcome", "manual")]).unwrap();
    assert_eq!(manual.histogram.as_ref().unwrap().count, 1);
    let ok = snapshot.find("fetch.duration", &[("outcome", "ok")]).unwrap();
    assert_eq!(ok.histogram.as_ref().unwrap().count, 1);
}

#[test]
fn test_text_exposition_format() {
    let metrics = MetricsRegistry::new(vec![0.5]);
    metrics.counter("cache.hits", 2.0, &[("tier", "local")]);
    metrics.gauge("cache_entries", 7.0, &[]);
    metrics.observe_duration("upstream", Duration::from_millis(100), &[]);

    let text = metrics.render();
    assert!(text.contains("# TYPE cache_hits counter"));
    assert!(text.contains("# TYPE cache_entries gauge"));
    assert!(text.contains("# TYPE upstream_duration histogram"));
    assert!(text.contains("upstream_duration_bucket{le=\"0.5\"} 1"));
    assert!(text.contains("upstream_duration_bucket{le=\"+Inf\"} 1"));
    assert!(text.contains("upstream_duration_sum"));
    assert!(text.contains("upstream_duration_count 1"));

    // Every data line carries a timestamp after the value.
    let line = text.lines().find(|l| l.starts_with("cache_hits{")).unwrap();
    assert_eq!(line.split_whitespace().count(), 3);
}

#[test]
fn test_kind_and_label_mismatches_are_rejected() {
    let metrics = MetricsRegistry::default();
    metrics.counter("ops", 1.0, &[("op", "get")]);

    assert!(matches!(metrics.try_gauge("ops", 1.0, &[("op", "get")]), Err(MetricsError::KindMismatch { .. })));
    assert!(matches!(metrics.try_counter("ops", 1.0, &[("kind", "get")]), Err(MetricsError::LabelMismatch { .. })));
    assert!(matches!(metrics.try_counter("ops", -1.0, &[("op", "get")]), Err(MetricsError::NegativeDelta(_))));

    // The bad observations left the series intact.
    assert_eq!(metrics.snapshot().value("ops", &[("op", "get")]), Some(1.0));
}

#[test]
fn test_reset_clears_everything() {
    let metrics = MetricsRegistry::default();
    metrics.counter("ops", 1.0, &[]);
    metrics.reset();
    assert!(metrics.snapshot().series.is_empty());
    metrics.gauge("ops", 3.0, &[]);
    assert_eq!(metrics.snapshot().value("ops", &[]), Some(3.0));
}

#[test]
fn test_top_n_orders_by_requests_then_recency() {
    let clock = ManualClock::default();
    let tracker = AnalyticsTracker::new(Arc::new(clock.clone()));

    tracker.record_fetch("a", false, 10.0, 100, None);
    clock.advance(ChronoDuration::seconds(1));
    tracker.record_fetch("b", false, 10.0, 100, None);
    clock.advance(ChronoDuration::seconds(1));
    tracker.record_fetch("c", true, 0.0, 100, None);
    tracker.record_fetch("c", true, 0.0, 100, None);

    assert_eq!(tracker.get_top_n(3), vec!["c", "b", "a"]);
    assert_eq!(tracker.get_top_n(1), vec!["c"]);

    // Touching "a" makes it the most recent of the one-request ids.
    clock.advance(ChronoDuration::seconds(1));
    tracker.record_fetch("a", true, 0.0, 100, None);
    assert_eq!(tracker.get_top_n(3), vec!["a", "c", "b"]);
}

#[test]
fn test_global_stats_and_geography() {
    let tracker = AnalyticsTracker::new(Arc::new(ManualClock::default()));
    tracker.record_fetch("a", false, 30.0, 100, Some("eu"));
    tracker.record_fetch("a", true, 0.0, 100, Some("eu"));
    tracker.record_fetch("b", false, 60.0, 0, Some("us"));

    let global = tracker.get_global_stats();
    assert_eq!(global.total_requests, 3);
    assert_eq!(global.total_hits, 1);
    assert_eq!(global.total_misses, 2);
    assert_eq!(global.unique_ids, 2);
    assert_eq!(global.total_bytes_served, 200);
    assert!((global.average_latency_ms - 30.0).abs() < 1e-9);

    let a = tracker.get_stats("a").unwrap();
    assert_eq!(a.geography.get("eu"), Some(&2));
    assert!((a.hit_rate() - 0.5).abs() < 1e-9);

    tracker.reset();
    assert!(tracker.get_stats("a").is_none());
    assert_eq!(tracker.get_global_stats().total_requests, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_analytics_totals_are_exact() {
    let tracker = Arc::new(AnalyticsTracker::new(Arc::new(ManualClock::default())));
    let mut handles = Vec::new();
    for task in 0..8 {
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..100 {
                tracker.record_fetch(&format!("id{}", i % 5), task % 2 == 0, 1.0, 10, None);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let global = tracker.get_global_stats();
    assert_eq!(global.total_requests, 800);
    assert_eq!(global.total_hits, 400);
    assert_eq!(global.unique_ids, 5);
    assert_eq!(tracker.get_stats("id0").unwrap().total_requests, 160);
}

proptest! {
    #[test]
    fn prop_top_n_is_bounded_sorted_and_stable(
        requests in proptest::collection::vec((0usize..8, any::<bool>()), 0..60),
        k in 0usize..10,
    ) {
        let clock = ManualClock::default();
        let tracker = AnalyticsTracker::new(Arc::new(clock.clone()));
        for (id, hit) in &requests {
            clock.advance(ChronoDuration::milliseconds(1));
            tracker.record_fetch(&format!("id{}", id), *hit, 1.0, 1, None);
        }

        let top = tracker.top_n(k);
        prop_assert!(top.len() <= k);
        for pair in top.windows(2) {
            prop_assert!(pair[0].total_requests > pair[1].total_requests
                || (pair[0].total_requests == pair[1].total_requests
                    && pair[0].last_accessed_at >= pair[1].last_accessed_at));
        }
        prop_assert_eq!(tracker.get_top_n(k), tracker.get_top_n(k));
    }
}
