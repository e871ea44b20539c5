//! Orchestration kernel: backlog, metric collection, and dispatch.
//!
//! The orchestrator accumulates task descriptors in a backlog, builds a
//! [`KernelMetrics`] snapshot per target kernel (performance sample, queue
//! depth, tunnel bandwidth), and hands the batch to the attached
//! [`LoadBalancer`].  The backlog is cleared after every orchestration
//! cycle.

use std::sync::Arc;

use parking_lot::Mutex;

use fabric_balancer::{TaskJob, TaskTarget};
use fabric_core::task::{KernelMetrics, KernelType, TaskDescriptor, TaskType};

use crate::runtime::{KernelConfig, KernelRuntime};
use crate::traits::Kernel;
use crate::tunnel::TunnelManager;

pub struct OrchestrationKernel {
    runtime: KernelRuntime,
    backlog: Mutex<Vec<TaskDescriptor>>,
    tunnels: TunnelManager,
}

impl OrchestrationKernel {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_config(id, KernelConfig::default())
    }

    #[must_use]
    pub fn with_config(id: impl Into<String>, config: KernelConfig) -> Self {
        Self {
            runtime: KernelRuntime::new(id, KernelType::Orchestration, config),
            backlog: Mutex::new(Vec::new()),
            tunnels: TunnelManager::new(),
        }
    }

    /// Append a task to the backlog; the enqueue time is recorded on the
    /// descriptor.
    pub fn enqueue_task(&self, data: Vec<u8>, priority: i32) {
        let task = TaskDescriptor::with_priority(data, priority, TaskType::Mixed);
        if let Some(cache) = self.runtime.cache() {
            cache.put("last_enqueued_task".to_string(), task.data.clone());
        }
        tracing::debug!(
            kernel = %self.runtime.id(),
            priority = task.priority,
            "task appended to backlog"
        );
        self.backlog.lock().push(task);
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }

    /// The tunnel registry feeding the tunnel-bandwidth metric axis.
    pub fn tunnels(&self) -> &TunnelManager {
        &self.tunnels
    }

    /// Build the balancer-facing snapshot for each kernel: extended metrics
    /// as the base, overlaid with the live queue depth and the aggregate
    /// tunnel bandwidth.
    pub fn collect_kernel_metrics(&self, kernels: &[Arc<dyn Kernel>]) -> Vec<KernelMetrics> {
        kernels
            .iter()
            .map(|kernel| {
                let mut snapshot: KernelMetrics = kernel.extended_metrics().into();
                let perf = kernel.metrics();
                snapshot.load = perf.cpu_usage;
                snapshot.active_tasks = kernel.pending_tasks();
                snapshot.tunnel_bandwidth = self.tunnels.bandwidth(&kernel.id());
                snapshot
            })
            .collect()
    }

    /// Greedy fallback distribution: highest priority first, each task onto
    /// the currently least-loaded kernel, charging +0.1 load per
    /// assignment.  Used when no balancer is attached.
    pub fn balance_tasks(&self, kernels: &[Arc<dyn Kernel>]) {
        if kernels.is_empty() {
            return;
        }
        let mut metrics = self.collect_kernel_metrics(kernels);
        let mut tasks = std::mem::take(&mut *self.backlog.lock());
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority));

        for task in tasks {
            let mut index = 0;
            for (candidate, m) in metrics.iter().enumerate() {
                if m.load < metrics[index].load {
                    index = candidate;
                }
            }
            tracing::info!(
                kernel = %kernels[index].id(),
                priority = task.priority,
                load = metrics[index].load,
                "backlog task assigned to least-loaded kernel"
            );
            kernels[index].schedule_task_descriptor(task);
            metrics[index].load += 0.1;
        }
        tracing::info!(kernel = %self.runtime.id(), "greedy balancing cycle complete");
    }

    /// Hand the backlog to the attached load balancer.  Without a balancer
    /// the backlog is left untouched.
    pub fn orchestrate(&self, kernels: &[Arc<dyn Kernel>]) {
        let Some(balancer) = self.runtime.load_balancer() else {
            tracing::warn!(kernel = %self.runtime.id(), "orchestrate skipped: no load balancer");
            return;
        };
        let metrics = self.collect_kernel_metrics(kernels);
        let tasks = std::mem::take(&mut *self.backlog.lock());
        let count = tasks.len();
        balancer.balance(kernels, tasks, &metrics);
        tracing::info!(kernel = %self.runtime.id(), tasks = count, "orchestration cycle complete");
    }
}

impl TaskTarget for OrchestrationKernel {
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

impl Kernel for OrchestrationKernel {
    fn runtime(&self) -> &KernelRuntime {
        &self.runtime
    }

    /// The backlog is discarded together with the pending queue.
    fn shutdown(&self) {
        self.backlog.lock().clear();
        self.runtime.shutdown();
    }

    fn supported_features(&self) -> Vec<String> {
        let mut features = self.runtime.supported_features();
        features.push("task_orchestration".to_string());
        features
    }
}
