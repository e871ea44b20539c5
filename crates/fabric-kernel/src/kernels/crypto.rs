//! Cryptographic workload kernel.

use fabric_balancer::{TaskJob, TaskTarget};
use fabric_core::task::{KernelType, TaskDescriptor};

use crate::error::{KernelError, Result};
use crate::runtime::{KernelConfig, KernelRuntime};
use crate::traits::Kernel;

pub struct CryptoKernel {
    runtime: KernelRuntime,
}

impl CryptoKernel {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_config(id, KernelConfig::default())
    }

    #[must_use]
    pub fn with_config(id: impl Into<String>, config: KernelConfig) -> Self {
        Self {
            runtime: KernelRuntime::new(id, KernelType::Crypto, config),
        }
    }

    /// Run an accelerated crypto pass over `data` and cache the result
    /// under `crypto`.
    pub fn execute_crypto_task(&self, data: &[u8]) -> Result<Vec<u8>> {
        let accelerator = self
            .runtime
            .accelerator()
            .ok_or_else(|| KernelError::NotRunning {
                id: self.runtime.id(),
            })?;

        let mut result = vec![0u8; data.len()];
        accelerator.accelerate_copy(data, &mut result)?;

        if let Some(cache) = self.runtime.cache() {
            cache.put("crypto".to_string(), result.clone());
        }
        self.runtime.update_extended_metrics();
        Ok(result)
    }
}

impl TaskTarget for CryptoKernel {
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

impl Kernel for CryptoKernel {
    fn runtime(&self) -> &KernelRuntime {
        &self.runtime
    }

    fn supported_features(&self) -> Vec<String> {
        let mut features = self.runtime.supported_features();
        features.push("crypto_acceleration".to_string());
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_task_roundtrip() {
        let kernel = CryptoKernel::new("crypto");
        assert!(kernel.initialize());

        let result = kernel.execute_crypto_task(&[9, 8, 7]).expect("task runs");
        assert_eq!(result, vec![9, 8, 7]);

        let cache = kernel.runtime().cache().expect("cache while running");
        assert!(cache.get(&"crypto".to_string()).is_some());
        kernel.shutdown();
    }

    #[test]
    fn crypto_task_fails_before_initialize() {
        let kernel = CryptoKernel::new("crypto-cold");
        assert!(matches!(
            kernel.execute_crypto_task(&[1]),
            Err(KernelError::NotRunning { .. })
        ));
    }
}
