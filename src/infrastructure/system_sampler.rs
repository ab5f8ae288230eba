//! System Sampler
//!
//! Periodically reads host CPU and memory usage into the metrics aggregator.

use crate::infrastructure::metrics_aggregator::{MetricsAggregator, SystemSample};
use crate::infrastructure::shutdown::ShutdownController;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::task::JoinHandle;

/// Host resource reader.
pub struct SystemSampler {
    system: System,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self { system }
    }

    /// Take one reading.
    ///
    /// CPU usage is measured since the previous refresh, so the first
    /// reading after construction may be low.
    pub fn sample(&mut self) -> SystemSample {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let cpus = self.system.cpus();
        let cpu_usage = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|cpu| cpu.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64
        };

        let total = self.system.total_memory();
        let used = self.system.used_memory();
        let memory_usage = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };

        SystemSample {
            timestamp: chrono::Utc::now(),
            cpu_usage,
            memory_usage,
            memory_used_bytes: used,
            memory_total_bytes: total,
        }
    }

    /// Sample every `interval` until shutdown.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn start(
        mut self,
        metrics: Arc<MetricsAggregator>,
        interval: Duration,
        shutdown: ShutdownController,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sample = self.sample();
                        tracing::trace!(
                            "system sample: cpu {:.1}%, memory {:.1}%",
                            sample.cpu_usage,
                            sample.memory_usage
                        );
                        metrics.record_system_sample(sample);
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_ranges() {
        let mut sampler = SystemSampler::new();
        let sample = sampler.sample();
        assert!((0.0..=100.0).contains(&sample.memory_usage));
        assert!(sample.cpu_usage >= 0.0);
        assert!(sample.memory_used_bytes <= sample.memory_total_bytes);
    }

    #[tokio::test]
    async fn test_start_records_samples() {
        let metrics = Arc::new(MetricsAggregator::default());
        let shutdown = ShutdownController::new();
        let handle = SystemSampler::new().start(metrics.clone(), Duration::from_millis(20), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.shutdown();
        handle.await.unwrap();

        assert!(metrics.snapshot().system.is_some());
    }
}
