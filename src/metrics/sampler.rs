// Periodic process sampler
// Author: kelexine (https://github.com/kelexine)

use super::MetricsRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

pub const PROCESS_UPTIME: &str = "process_uptime_seconds";
pub const PROCESS_MEMORY: &str = "process_resident_memory_bytes";
pub const SCHEDULER_LAG: &str = "runtime_scheduler_lag_seconds";

/// Publishes uptime, resident memory and scheduler lag gauges.
///
/// Scheduler lag is how late the sampler's own tick fired relative to its
/// schedule, which approximates how saturated the runtime is.
pub struct ProcessSampler {
    registry: Arc<MetricsRegistry>,
    started: Instant,
    #[cfg(target_os = "linux")]
    process: prometheus::process_collector::ProcessCollector,
}

impl ProcessSampler {
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        Self {
            registry,
            started: Instant::now(),
            #[cfg(target_os = "linux")]
            process: prometheus::process_collector::ProcessCollector::for_self(),
        }
    }

    pub fn sample(&self, lag: Duration) {
        self.registry
            .gauge(PROCESS_UPTIME, self.started.elapsed().as_secs_f64(), &[]);
        self.registry.gauge(SCHEDULER_LAG, lag.as_secs_f64(), &[]);
        if let Some(bytes) = self.resident_memory_bytes() {
            self.registry.gauge(PROCESS_MEMORY, bytes, &[]);
        }
    }

    #[cfg(target_os = "linux")]
    fn resident_memory_bytes(&self) -> Option<f64> {
        use prometheus::core::Collector;

        self.process
            .collect()
            .iter()
            .find(|family| family.get_name() == PROCESS_MEMORY)
            .and_then(|family| family.get_metric().first().map(|m| m.get_gauge().get_value()))
    }

    #[cfg(not(target_os = "linux"))]
    fn resident_memory_bytes(&self) -> Option<f64> {
        None
    }

    /// Runs the sampler on a fixed interval until the task is aborted.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut expected = Instant::now();

            loop {
                ticker.tick().await;
                let now = Instant::now();
                let lag = now.saturating_duration_since(expected);
                expected = now + interval;

                self.sample(lag);
                debug!(lag_ms = lag.as_millis() as u64, "Sampled process metrics");
            }
        })
    }
}
