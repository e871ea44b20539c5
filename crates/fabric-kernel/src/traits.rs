//! The kernel capability surface.
//!
//! [`Kernel`] extends the balancer's [`TaskTarget`] seam with lifecycle,
//! metrics, resource limits, events, warm-up, and (for parent-capable
//! variants) child composition.  Every method has a default body delegating
//! to the variant's shared [`KernelRuntime`], so concrete kernels override
//! only the behavior that actually differs.

use std::sync::Arc;

use fabric_balancer::{LoadBalancer, TaskTarget};
use fabric_core::preload::PreloadManager;
use fabric_core::task::{
    ExtendedKernelMetrics, KernelType, PerformanceMetrics, TaskDescriptor,
};

use crate::error::{KernelError, Result};
use crate::runtime::KernelRuntime;

/// Payload delivered with a kernel event.
#[derive(Debug, Clone)]
pub enum EventPayload {
    None,
    /// An item count, e.g. warmed-up entries.
    Count(usize),
    /// A human-readable description, e.g. a failure reason.
    Message(String),
    /// The task the event refers to.
    Task(TaskDescriptor),
}

/// Per-event callback: `(kernel_id, payload)`.
///
/// Always invoked with the kernel's internal locks released; a panicking
/// callback is isolated and logged, never propagated.
pub type EventCallback = Arc<dyn Fn(&str, &EventPayload) + Send + Sync>;

/// Callback invoked for every processed task, before the payload is cached.
pub type TaskCallback = Arc<dyn Fn(&TaskDescriptor) + Send + Sync>;

/// A fabric execution engine.
///
/// Inherits `id`, `schedule_task`, and `process_task` from [`TaskTarget`].
pub trait Kernel: TaskTarget {
    /// The shared runtime engine backing this kernel.
    fn runtime(&self) -> &KernelRuntime;

    /// Bring the kernel up: validate configuration, build the cache,
    /// worker set, and recovery manager, then warm up from the preloader
    /// when one is set.  Fails (returns false) when already initialized or
    /// when any component cannot be built; partial state is torn down.
    fn initialize(&self) -> bool {
        self.runtime().initialize()
    }

    /// Stop workers, discard pending tasks, clear the cache, release the
    /// recovery manager.  Idempotent.
    fn shutdown(&self) {
        self.runtime().shutdown();
    }

    fn is_running(&self) -> bool {
        self.runtime().is_running()
    }

    fn kernel_type(&self) -> KernelType {
        self.runtime().kind()
    }

    fn metrics(&self) -> PerformanceMetrics {
        self.runtime().metrics()
    }

    /// Sample platform telemetry and refresh the performance snapshot.
    fn update_metrics(&self) {
        self.runtime().update_metrics();
    }

    fn extended_metrics(&self) -> ExtendedKernelMetrics {
        self.runtime().extended_metrics()
    }

    fn update_extended_metrics(&self) {
        self.runtime().update_extended_metrics();
    }

    /// Adjust a named resource limit.  Known keys: `threads`, `cache`.
    /// Unknown keys log a warning and change nothing.
    fn set_resource_limit(&self, resource: &str, limit: f64) {
        self.runtime().set_resource_limit(resource, limit);
    }

    fn resource_usage(&self, resource: &str) -> f64 {
        self.runtime().resource_usage(resource)
    }

    fn pause(&self) {
        self.runtime().pause();
    }

    fn resume(&self) {
        self.runtime().resume();
    }

    /// Drop queued tasks and cached state while staying running.
    fn reset(&self) {
        self.runtime().reset();
    }

    fn supported_features(&self) -> Vec<String> {
        self.runtime().supported_features()
    }

    /// Queue `task` as a job that runs the kernel's `process_task` at the
    /// descriptor's priority.
    fn schedule_task_descriptor(&self, task: TaskDescriptor) {
        let runtime = self.runtime().clone();
        let priority = task.priority;
        self.runtime().schedule_task(
            Box::new(move || {
                let _ = runtime.process_task(&task);
            }),
            priority,
        );
    }

    /// Mark a task id as cancelled; workers skip it on dequeue.
    fn cancel_task(&self, task_id: &str) {
        self.runtime().cancel_task(task_id);
    }

    /// Tasks queued or running right now.
    fn pending_tasks(&self) -> usize {
        self.runtime().pending_tasks()
    }

    fn set_task_callback(&self, callback: TaskCallback) {
        self.runtime().set_task_callback(callback);
    }

    fn set_load_balancer(&self, balancer: LoadBalancer) {
        self.runtime().set_load_balancer(balancer);
    }

    fn load_balancer(&self) -> Option<LoadBalancer> {
        self.runtime().load_balancer()
    }

    fn set_preload_manager(&self, preload: PreloadManager) {
        self.runtime().set_preload_manager(preload);
    }

    /// Copy every preloader key into the kernel cache.  Never fails the
    /// caller; emits `warmup_completed` or `warmup_failed`.
    fn warmup_from_preload(&self) {
        self.runtime().warmup_from_preload();
    }

    fn set_event_callback(&self, event: &str, callback: EventCallback) {
        self.runtime().set_event_callback(event, callback);
    }

    fn remove_event_callback(&self, event: &str) {
        self.runtime().remove_event_callback(event);
    }

    fn trigger_event(&self, event: &str, payload: EventPayload) {
        self.runtime().trigger_event(event, payload);
    }

    /// Compose a child kernel.  Only parent-capable variants accept
    /// children; the composition must stay acyclic.
    fn add_child(&self, _child: Arc<dyn Kernel>) -> Result<()> {
        Err(KernelError::ChildrenUnsupported { id: self.id() })
    }

    /// Remove a child by id, returning it when present.
    fn remove_child(&self, _child_id: &str) -> Option<Arc<dyn Kernel>> {
        None
    }

    /// Snapshot of the current children.
    fn get_children(&self) -> Vec<Arc<dyn Kernel>> {
        Vec::new()
    }
}
