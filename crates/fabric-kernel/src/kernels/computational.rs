//! CPU-heavy kernel backed by the acceleration primitives.

use fabric_balancer::{TaskJob, TaskTarget};
use fabric_core::task::{KernelType, TaskDescriptor};

use crate::error::{KernelError, Result};
use crate::runtime::{KernelConfig, KernelRuntime};
use crate::traits::Kernel;

pub struct ComputationalKernel {
    runtime: KernelRuntime,
}

impl ComputationalKernel {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_config(id, KernelConfig::default())
    }

    #[must_use]
    pub fn with_config(id: impl Into<String>, config: KernelConfig) -> Self {
        Self {
            runtime: KernelRuntime::new(id, KernelType::Computational, config),
        }
    }

    /// Run an accelerated pass over `data` and cache the result under
    /// `compute`.
    pub fn compute(&self, data: &[u8]) -> Result<Vec<u8>> {
        let accelerator = self
            .runtime
            .accelerator()
            .ok_or_else(|| KernelError::NotRunning {
                id: self.runtime.id(),
            })?;

        let mut result = vec![0u8; data.len()];
        accelerator.accelerate_copy(data, &mut result)?;

        if let Some(cache) = self.runtime.cache() {
            cache.put("compute".to_string(), result.clone());
        }
        self.runtime.update_extended_metrics();
        Ok(result)
    }
}

impl TaskTarget for ComputationalKernel {
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

impl Kernel for ComputationalKernel {
    fn runtime(&self) -> &KernelRuntime {
        &self.runtime
    }

    fn supported_features(&self) -> Vec<String> {
        let mut features = self.runtime.supported_features();
        features.push("hardware_acceleration".to_string());
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_caches_the_result() {
        let kernel = ComputationalKernel::new("comp");
        assert!(kernel.initialize());

        let result = kernel.compute(&[5, 6, 7]).expect("compute succeeds");
        assert_eq!(result, vec![5, 6, 7]);

        let cache = kernel.runtime().cache().expect("cache while running");
        assert_eq!(cache.get(&"compute".to_string()), Some(vec![5, 6, 7]));
        kernel.shutdown();
    }

    #[test]
    fn compute_fails_before_initialize() {
        let kernel = ComputationalKernel::new("comp-cold");
        assert!(matches!(
            kernel.compute(&[1]),
            Err(KernelError::NotRunning { .. })
        ));
    }
}
