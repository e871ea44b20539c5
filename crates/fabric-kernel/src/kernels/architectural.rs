//! Topology and placement optimization kernel.

use fabric_balancer::{TaskJob, TaskTarget};
use fabric_core::task::{KernelType, TaskDescriptor};

use crate::runtime::{KernelConfig, KernelRuntime};
use crate::traits::Kernel;

pub struct ArchitecturalKernel {
    runtime: KernelRuntime,
}

impl ArchitecturalKernel {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_config(id, KernelConfig::default())
    }

    #[must_use]
    pub fn with_config(id: impl Into<String>, config: KernelConfig) -> Self {
        Self {
            runtime: KernelRuntime::new(id, KernelType::Architectural, config),
        }
    }

    /// Derive a topology layout from the platform profile and cache it
    /// under `topology_optimized`.
    pub fn optimize_topology(&self) -> bool {
        let Some(cache) = self.runtime.cache() else {
            tracing::warn!(kernel = %self.runtime.id(), "optimize_topology on a stopped kernel");
            return false;
        };
        match serde_json::to_vec(self.runtime.profile()) {
            Ok(layout) => {
                cache.put("topology_optimized".to_string(), layout);
                tracing::info!(kernel = %self.runtime.id(), "topology layout cached");
                true
            }
            Err(err) => {
                tracing::error!(kernel = %self.runtime.id(), error = %err, "topology serialization failed");
                false
            }
        }
    }

    /// Record the current placement decision (worker spread) under
    /// `placement_optimized`.
    pub fn optimize_placement(&self) -> bool {
        let Some(cache) = self.runtime.cache() else {
            tracing::warn!(kernel = %self.runtime.id(), "optimize_placement on a stopped kernel");
            return false;
        };
        let placement = self.runtime.engine_metrics();
        match serde_json::to_vec(&placement) {
            Ok(bytes) => {
                cache.put("placement_optimized".to_string(), bytes);
                tracing::info!(kernel = %self.runtime.id(), "placement decision cached");
                true
            }
            Err(err) => {
                tracing::error!(kernel = %self.runtime.id(), error = %err, "placement serialization failed");
                false
            }
        }
    }
}

impl TaskTarget for ArchitecturalKernel {
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

impl Kernel for ArchitecturalKernel {
    fn runtime(&self) -> &KernelRuntime {
        &self.runtime
    }

    fn supported_features(&self) -> Vec<String> {
        let mut features = self.runtime.supported_features();
        features.push("topology_optimization".to_string());
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimizations_cache_their_artifacts() {
        let kernel = ArchitecturalKernel::new("arch");
        assert!(kernel.initialize());

        assert!(kernel.optimize_topology());
        assert!(kernel.optimize_placement());

        let cache = kernel.runtime().cache().expect("cache while running");
        assert!(cache.get(&"topology_optimized".to_string()).is_some());
        assert!(cache.get(&"placement_optimized".to_string()).is_some());
        kernel.shutdown();
    }

    #[test]
    fn optimizations_fail_cleanly_when_stopped() {
        let kernel = ArchitecturalKernel::new("arch-cold");
        assert!(!kernel.optimize_topology());
        assert!(!kernel.optimize_placement());
    }
}
