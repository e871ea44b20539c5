//! Parent kernel: composes children and adapts to their aggregate load.

use std::sync::Arc;

use fabric_balancer::{TaskJob, TaskTarget};
use fabric_core::task::{KernelType, TaskDescriptor};

use crate::error::Result;
use crate::kernels::ChildRegistry;
use crate::runtime::{KernelConfig, KernelRuntime};
use crate::traits::Kernel;

const MAX_PARENT_WORKERS: usize = 32;

/// Kernel that owns a subtree of children and sizes its own resources from
/// their aggregate load.
pub struct ParentKernel {
    runtime: KernelRuntime,
    children: ChildRegistry,
}

impl ParentKernel {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_config(id, KernelConfig::default())
    }

    #[must_use]
    pub fn with_config(id: impl Into<String>, config: KernelConfig) -> Self {
        Self {
            runtime: KernelRuntime::new(id, KernelType::Parent, config),
            children: ChildRegistry::new(),
        }
    }

    /// Size the worker set and cache from the average child load.
    fn adapt_to_children(&self, children: &[Arc<dyn Kernel>]) {
        let mut total_load = 0.0;
        for child in children {
            child.update_metrics();
            total_load += child.metrics().cpu_usage;
        }
        let average_load = total_load / children.len() as f64;

        let workers = self.runtime.engine_metrics().total_threads;
        if average_load > 0.8 && workers < MAX_PARENT_WORKERS {
            let target = (workers + 2).min(MAX_PARENT_WORKERS);
            self.runtime.resize_workers(target);
            tracing::info!(kernel = %self.runtime.id(), workers = target, average_load, "grew worker set");
        } else if average_load < 0.3 && workers > 2 {
            let target = workers - 1;
            self.runtime.resize_workers(target);
            tracing::info!(kernel = %self.runtime.id(), workers = target, average_load, "shrank worker set");
        }

        if let Some(cache) = self.runtime.cache() {
            let stats = cache.metrics();
            if stats.request_count > 0 {
                if stats.hit_rate < 0.8 {
                    cache.resize((stats.capacity as f64 * 1.2).ceil() as usize);
                    tracing::info!(kernel = %self.runtime.id(), capacity = cache.allocated_size(), "grew cache");
                } else if stats.hit_rate > 0.95 && stats.capacity > 16 {
                    cache.resize(((stats.capacity as f64 * 0.8) as usize).max(16));
                    tracing::info!(kernel = %self.runtime.id(), capacity = cache.allocated_size(), "shrank cache");
                }
            }
        }
    }
}

impl TaskTarget for ParentKernel {
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

impl Kernel for ParentKernel {
    fn runtime(&self) -> &KernelRuntime {
        &self.runtime
    }

    /// Refresh own metrics, then aggregate the children and adapt.  The
    /// aggregated snapshot is cached under `metrics` for observers.
    fn update_metrics(&self) {
        self.runtime.update_metrics();

        let children = self.children.snapshot();
        if !children.is_empty() {
            self.adapt_to_children(&children);
        }

        if let Some(cache) = self.runtime.cache() {
            if let Ok(bytes) = serde_json::to_vec(&self.runtime.metrics()) {
                cache.put("metrics".to_string(), bytes);
            }
        }
    }

    /// Children are shut down before the parent's own engine.
    fn shutdown(&self) {
        for child in self.children.snapshot() {
            child.shutdown();
        }
        self.runtime.shutdown();
    }

    fn supported_features(&self) -> Vec<String> {
        vec![
            "dynamic_thread_pool".to_string(),
            "dynamic_cache".to_string(),
            "child_composition".to_string(),
            "task_orchestration".to_string(),
        ]
    }

    fn add_child(&self, child: Arc<dyn Kernel>) -> Result<()> {
        self.children.add(&self.runtime.id(), child)
    }

    fn remove_child(&self, child_id: &str) -> Option<Arc<dyn Kernel>> {
        self.children.remove(child_id)
    }

    fn get_children(&self) -> Vec<Arc<dyn Kernel>> {
        self.children.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::MicroKernel;

    #[test]
    fn update_metrics_caches_aggregated_snapshot() {
        let parent = ParentKernel::new("parent-metrics");
        assert!(parent.initialize());

        let child = Arc::new(MicroKernel::new("parent-metrics-child"));
        assert!(child.initialize());
        parent
            .add_child(child.clone() as Arc<dyn Kernel>)
            .expect("child attaches");

        parent.update_metrics();

        let cache = parent.runtime().cache().expect("cache while running");
        let snapshot = cache.get(&"metrics".to_string()).expect("snapshot cached");
        assert!(!snapshot.is_empty());
        parent.shutdown();
    }

    #[test]
    fn shutdown_cascades_to_children() {
        let parent = ParentKernel::new("parent-cascade");
        assert!(parent.initialize());

        let child = Arc::new(MicroKernel::new("cascade-child"));
        assert!(child.initialize());
        parent
            .add_child(child.clone() as Arc<dyn Kernel>)
            .expect("child attaches");

        parent.shutdown();
        assert!(!child.is_running());
        assert!(!parent.is_running());
    }

    #[test]
    fn resource_limits_route_to_workers_and_cache() {
        let parent = ParentKernel::new("parent-limits");
        assert!(parent.initialize());

        parent.set_resource_limit("cache", 32.0);
        assert_eq!(parent.resource_usage("cache"), 32.0);

        parent.set_resource_limit("threads", 2.0);
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert_eq!(parent.runtime().engine_metrics().total_threads, 2);

        // Unknown keys change nothing.
        parent.set_resource_limit("plasma", 9.0);
        assert_eq!(parent.resource_usage("plasma"), 0.0);
        parent.shutdown();
    }
}
