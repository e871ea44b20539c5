//! The general-purpose parent-capable kernel.

use std::sync::Arc;

use fabric_balancer::{TaskJob, TaskTarget};
use fabric_core::task::{KernelType, TaskDescriptor};

use crate::error::Result;
use crate::kernels::ChildRegistry;
use crate::runtime::{KernelConfig, KernelRuntime};
use crate::traits::Kernel;

/// The baseline kernel: full engine, child composition, keyed data
/// processing.
pub struct CoreKernel {
    runtime: KernelRuntime,
    children: ChildRegistry,
}

impl CoreKernel {
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

    /// Store `data` under `key` in the kernel cache and refresh metrics.
    /// Fails cleanly when the kernel is not running.
    pub fn process_data(&self, key: impl Into<String>, data: Vec<u8>) -> bool {
        let Some(cache) = self.runtime.cache() else {
            tracing::warn!(kernel = %self.runtime.id(), "process_data on a stopped kernel");
            return false;
        };
        cache.put(key.into(), data);
        self.runtime.update_extended_metrics();
        true
    }
}

impl TaskTarget for CoreKernel {
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

impl Kernel for CoreKernel {
    fn runtime(&self) -> &KernelRuntime {
        &self.runtime
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
