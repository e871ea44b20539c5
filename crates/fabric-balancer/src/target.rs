//! The dispatch seam between the balancer and the kernels.

use fabric_core::task::TaskDescriptor;

/// A unit of scheduled work.
pub type TaskJob = Box<dyn FnOnce() + Send + 'static>;

/// Anything the balancer can hand tasks to.
///
/// Every kernel implements this trait; the balancer itself never sees the
/// wider kernel surface, only the scheduling seam.
pub trait TaskTarget: Send + Sync {
    /// Stable identifier of this target.
    fn id(&self) -> String;

    /// Push a job onto the target's queue with the given priority.
    /// Dropped (with a log line) when the target is not running.
    fn schedule_task(&self, job: TaskJob, priority: i32);

    /// Execute a task descriptor synchronously.  Returns success.
    fn process_task(&self, task: &TaskDescriptor) -> bool;
}
