//! Lightweight I/O-leaning kernel.

use fabric_balancer::{TaskJob, TaskTarget};
use fabric_core::task::{KernelType, TaskDescriptor};

use crate::runtime::{KernelConfig, KernelRuntime};
use crate::traits::Kernel;

/// Small kernel tuned for I/O-heavy work; its workload bias advertises
/// reduced cpu efficiency and raised io efficiency.
pub struct MicroKernel {
    runtime: KernelRuntime,
}

impl MicroKernel {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_config(id, KernelConfig::default())
    }

    #[must_use]
    pub fn with_config(id: impl Into<String>, config: KernelConfig) -> Self {
        Self {
            runtime: KernelRuntime::new(id, KernelType::Micro, config),
        }
    }

    /// Execute an opaque payload: cache it under `task` and refresh the
    /// extended metrics.
    pub fn execute_task(&self, data: Vec<u8>) -> bool {
        let Some(cache) = self.runtime.cache() else {
            tracing::warn!(kernel = %self.runtime.id(), "execute_task on a stopped kernel");
            return false;
        };
        tracing::debug!(kernel = %self.runtime.id(), bytes = data.len(), "executing task");
        cache.put("task".to_string(), data);
        self.runtime.update_extended_metrics();
        true
    }
}

impl TaskTarget for MicroKernel {
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

impl Kernel for MicroKernel {
    fn runtime(&self) -> &KernelRuntime {
        &self.runtime
    }
}
