//! Self-tuning kernel.
//!
//! Every metrics refresh runs the adaptation pass: the worker set follows
//! the load factor, the cache follows the hit rate, and the checkpoint
//! interval backs off when restores keep failing.

use fabric_balancer::{TaskJob, TaskTarget};
use fabric_core::task::{KernelType, TaskDescriptor};

use crate::runtime::{KernelConfig, KernelRuntime};
use crate::traits::Kernel;

pub struct SmartKernel {
    runtime: KernelRuntime,
}

impl SmartKernel {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_config(id, KernelConfig::default())
    }

    #[must_use]
    pub fn with_config(id: impl Into<String>, config: KernelConfig) -> Self {
        Self {
            runtime: KernelRuntime::new(id, KernelType::Smart, config),
        }
    }

    /// One adaptation pass over workers, cache, and recovery cadence.
    fn adapt(&self) {
        let config = self.runtime.config();
        let load_factor = self.runtime.metrics().cpu_usage;
        let workers = self.runtime.engine_metrics().total_threads;

        if load_factor > 0.8 && workers < config.max_threads {
            let target = (workers + 2).min(config.max_threads);
            self.runtime.resize_workers(target);
            tracing::info!(kernel = %self.runtime.id(), workers = target, load_factor, "grew worker set");
        } else if load_factor < 0.3 && workers > 2 {
            let target = workers - 1;
            self.runtime.resize_workers(target);
            tracing::info!(kernel = %self.runtime.id(), workers = target, load_factor, "shrank worker set");
        }

        if let Some(cache) = self.runtime.cache() {
            let stats = cache.metrics();
            // Only adapt once the cache has seen traffic.
            if stats.request_count > 0 {
                if stats.hit_rate < 0.8 && stats.capacity < config.max_memory {
                    let target = ((stats.capacity as f64 * 1.2).ceil() as usize).min(config.max_memory);
                    cache.resize(target);
                    tracing::info!(kernel = %self.runtime.id(), capacity = target, "grew cache");
                } else if stats.hit_rate > 0.95 && stats.capacity > 16 {
                    let target = ((stats.capacity as f64 * 0.8) as usize).max(16);
                    cache.resize(target);
                    tracing::info!(kernel = %self.runtime.id(), capacity = target, "shrank cache");
                }
            }
        }

        if let Some(recovery) = self.runtime.recovery() {
            let metrics = recovery.metrics();
            if metrics.failed_recoveries > 5 {
                let mut config = recovery.configuration();
                config.checkpoint_interval *= 2;
                let interval = config.checkpoint_interval;
                if recovery.set_configuration(config).is_ok() {
                    tracing::warn!(
                        kernel = %self.runtime.id(),
                        failed = metrics.failed_recoveries,
                        interval_secs = interval.as_secs(),
                        "recovery keeps failing; checkpoint interval doubled"
                    );
                }
            }
        }
    }
}

impl TaskTarget for SmartKernel {
    fn id(&self) -> String {
        self.runtime.id()
    }

    fn schedule_task(&self, job: TaskJob, priority: i32) {
        self.runtime.schedule_task(job, priority);
    }

    fn process_task(&self, task: &TaskDescriptor) -> bool {
        self.runtime.process_task(task)
    }
}

impl Kernel for SmartKernel {
    fn runtime(&self) -> &KernelRuntime {
        &self.runtime
    }

    fn update_metrics(&self) {
        self.runtime.update_metrics();
        self.adapt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn idle_untouched_cache_is_left_alone() {
        let kernel = SmartKernel::new("smart-idle");
        assert!(kernel.initialize());
        let before = kernel
            .runtime()
            .cache()
            .expect("cache while running")
            .allocated_size();

        kernel.update_metrics();

        let after = kernel
            .runtime()
            .cache()
            .expect("cache while running")
            .allocated_size();
        assert_eq!(before, after);
        kernel.shutdown();
    }

    #[test]
    fn low_hit_rate_grows_the_cache() {
        let kernel = SmartKernel::new("smart-grow");
        assert!(kernel.initialize());
        let cache = kernel.runtime().cache().expect("cache while running");
        let before = cache.allocated_size();

        for i in 0..40 {
            let _ = cache.get(&format!("missing-{i}"));
        }
        kernel.update_metrics();

        assert!(cache.allocated_size() > before);
        kernel.shutdown();
    }

    #[test]
    fn repeated_recovery_failures_back_off_checkpoints() {
        let kernel = SmartKernel::new("smart-recovery");
        assert!(kernel.initialize());
        let recovery = kernel.runtime().recovery().expect("recovery while running");
        let before = recovery.configuration().checkpoint_interval;

        // Six failed restores trip the backoff rule.
        for _ in 0..6 {
            assert!(!recovery.restore_from_point("missing"));
        }
        kernel.update_metrics();

        let after = recovery.configuration().checkpoint_interval;
        assert_eq!(after, before * 2);
        kernel.shutdown();
    }

    #[test]
    fn adaptation_keeps_at_least_two_workers() {
        let kernel = SmartKernel::with_config(
            "smart-floor",
            KernelConfig {
                max_threads: 2,
                ..KernelConfig::default()
            },
        );
        assert!(kernel.initialize());
        // Idle load factor shrinks only while more than two workers exist.
        kernel.update_metrics();
        std::thread::sleep(Duration::from_millis(50));
        assert!(kernel.runtime().engine_metrics().total_threads >= 2);
        kernel.shutdown();
    }
}
