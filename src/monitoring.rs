//! Health metrics for the monitoring pipeline itself
//!
//! Tracks how long ticks take, how many entities fail per tick and how often
//! each notification channel accepts deliveries, so a silently broken channel
//! or a sensor backend that keeps timing out shows up in the logs.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Snapshot of pipeline health
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineHealthMetrics {
    /// Ticks recorded in the sample window
    pub ticks: usize,
    /// Average tick duration in milliseconds
    pub avg_tick_latency_ms: f64,
    /// Longest tick duration in milliseconds
    pub max_tick_latency_ms: f64,
    /// Entity failures summed over recorded ticks
    pub entity_failures: u64,
    pub successful_deliveries: u64,
    pub failed_deliveries: u64,
    /// Overall delivery success rate as a percentage (0-100)
    pub delivery_success_rate: f64,
    /// Delivery success rate per channel
    pub per_sink_success_rate: BTreeMap<String, f64>,
    /// Timestamp when these metrics were collected
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct TickSample {
    duration: Duration,
    entity_failures: u64,
}

#[derive(Debug, Clone)]
struct DeliverySample {
    sink: String,
    success: bool,
}

/// Collects pipeline health samples across ticks
///
/// Cloning shares the underlying samples.
#[derive(Debug, Clone)]
pub struct PipelineMonitor {
    /// Recent tick samples (last 100 ticks)
    ticks: Arc<Mutex<VecDeque<TickSample>>>,
    /// Recent delivery results (last 1000 deliveries)
    deliveries: Arc<Mutex<VecDeque<DeliverySample>>>,
    max_tick_samples: usize,
    max_delivery_samples: usize,
    /// Tick duration above which a warning is logged
    slow_tick: Duration,
}

impl Default for PipelineMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PipelineMonitor {
    pub fn new(slow_tick: Duration) -> Self {
        Self {
            ticks: Arc::new(Mutex::new(VecDeque::new())),
            deliveries: Arc::new(Mutex::new(VecDeque::new())),
            max_tick_samples: 100,
            max_delivery_samples: 1000,
            slow_tick,
        }
    }

    /// Record a completed tick
    pub fn record_tick(&self, duration: Duration, entity_failures: u64) {
        debug!(
            "Recording tick: {:?}, {} entity failures",
            duration, entity_failures
        );

        let mut ticks = locked(&self.ticks);
        ticks.push_back(TickSample {
            duration,
            entity_failures,
        });
        while ticks.len() > self.max_tick_samples {
            ticks.pop_front();
        }
    }

    /// Record the result of one delivery attempt
    pub fn record_delivery(&self, sink: &str, success: bool) {
        let mut deliveries = locked(&self.deliveries);
        deliveries.push_back(DeliverySample {
            sink: sink.to_string(),
            success,
        });
        while deliveries.len() > self.max_delivery_samples {
            deliveries.pop_front();
        }
    }

    fn success_rate(successful: u64, total: u64) -> f64 {
        if total == 0 {
            // Nothing delivered yet counts as healthy
            100.0
        } else {
            successful as f64 / total as f64 * 100.0
        }
    }

    /// Collect current pipeline health metrics
    pub fn collect_metrics(&self) -> PipelineHealthMetrics {
        let (ticks, avg_tick_latency_ms, max_tick_latency_ms, entity_failures) = {
            let ticks = locked(&self.ticks);
            let latencies: Vec<f64> = ticks
                .iter()
                .map(|t| t.duration.as_secs_f64() * 1000.0)
                .collect();
            let avg = if latencies.is_empty() {
                0.0
            } else {
                latencies.iter().sum::<f64>() / latencies.len() as f64
            };
            let max = latencies.iter().cloned().fold(0.0, f64::max);
            let failures = ticks.iter().map(|t| t.entity_failures).sum();
            (ticks.len(), avg, max, failures)
        };

        let mut per_sink: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for sample in locked(&self.deliveries).iter() {
            let counts = per_sink.entry(sample.sink.clone()).or_insert((0, 0));
            if sample.success {
                counts.0 += 1;
            }
            counts.1 += 1;
        }

        let successful_deliveries: u64 = per_sink.values().map(|(ok, _)| ok).sum();
        let total: u64 = per_sink.values().map(|(_, total)| total).sum();
        let per_sink_success_rate = per_sink
            .into_iter()
            .map(|(sink, (ok, total))| (sink, Self::success_rate(ok, total)))
            .collect();

        PipelineHealthMetrics {
            ticks,
            avg_tick_latency_ms,
            max_tick_latency_ms,
            entity_failures,
            successful_deliveries,
            failed_deliveries: total - successful_deliveries,
            delivery_success_rate: Self::success_rate(successful_deliveries, total),
            per_sink_success_rate,
            timestamp: Utc::now(),
        }
    }

    /// Log a health summary, warning about slow ticks and failing channels
    pub fn log_health(&self) -> PipelineHealthMetrics {
        let metrics = self.collect_metrics();

        info!(
            "Pipeline health: ticks={}, avg_tick={:.1}ms, entity_failures={}, \
             delivery_success={:.1}%",
            metrics.ticks,
            metrics.avg_tick_latency_ms,
            metrics.entity_failures,
            metrics.delivery_success_rate
        );

        if metrics.max_tick_latency_ms > self.slow_tick.as_secs_f64() * 1000.0 {
            warn!(
                "Slow monitoring tick detected: {:.1}ms",
                metrics.max_tick_latency_ms
            );
        }

        for (sink, rate) in &metrics.per_sink_success_rate {
            if *rate < 90.0 {
                warn!("Low delivery success rate for '{}': {:.1}%", sink, rate);
            }
        }

        metrics
    }
}

/// Measures a tick and records it when finished
pub struct TickTimer {
    start_time: Instant,
    monitor: PipelineMonitor,
}

impl TickTimer {
    pub fn start(monitor: &PipelineMonitor) -> Self {
        Self {
            start_time: Instant::now(),
            monitor: monitor.clone(),
        }
    }

    /// Record the elapsed time and return it
    pub fn finish(self, entity_failures: u64) -> Duration {
        let duration = self.start_time.elapsed();
        self.monitor.record_tick(duration, entity_failures);
        duration
    }
}
