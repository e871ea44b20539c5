//! Task and metrics model.
//!
//! [`TaskDescriptor`] is the unit of scheduling: an owned byte payload, a
//! bounded priority, a monotonic enqueue timestamp, and a workload-type hint
//! used by the workload-specific balancing strategy.  [`KernelMetrics`] is
//! the point-in-time snapshot the balancer scores kernels with; every field
//! is copied by value so no reader ever observes a torn snapshot.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest accepted task priority.
pub const MIN_TASK_PRIORITY: i32 = 0;
/// Highest accepted task priority.
pub const MAX_TASK_PRIORITY: i32 = 10;
/// Priority assigned when the caller does not specify one.
pub const DEFAULT_TASK_PRIORITY: i32 = 5;

/// Workload character of a task, used by the workload-specific scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaskType {
    /// Dominated by computation.
    CpuIntensive,
    /// Dominated by blocking I/O.
    IoIntensive,
    /// Dominated by working-set size.
    MemoryIntensive,
    /// Dominated by network transfer.
    NetworkIntensive,
    /// No single dominant axis.
    #[default]
    Mixed,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CpuIntensive => "cpu_intensive",
            TaskType::IoIntensive => "io_intensive",
            TaskType::MemoryIntensive => "memory_intensive",
            TaskType::NetworkIntensive => "network_intensive",
            TaskType::Mixed => "mixed",
        }
    }
}

/// The unit of scheduling.
///
/// A descriptor is moved into exactly one kernel's queue entry and consumed
/// exactly once by a worker; descriptors are never shared between kernels.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    /// Owned task payload.
    pub data: Vec<u8>,
    /// Priority in `[0, 10]`; higher is more urgent.
    pub priority: i32,
    /// Monotonic timestamp taken when the descriptor was built.
    pub enqueue_time: Instant,
    /// Wall-clock milliseconds at enqueue, used for stable cache keys.
    pub enqueued_at_ms: i64,
    /// Workload-type hint for the balancer.
    pub task_type: TaskType,
    /// Estimated peak memory in bytes; 0 when unknown.
    pub estimated_memory_usage: usize,
    /// Estimated CPU time in microseconds; 0 when unknown.
    pub estimated_cpu_time: usize,
}

impl TaskDescriptor {
    /// Build a descriptor with the default priority and a `Mixed` type hint.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_priority(data, DEFAULT_TASK_PRIORITY, TaskType::Mixed)
    }

    /// Build a descriptor with an explicit priority and type hint.
    ///
    /// Priorities outside `[0, 10]` are clamped into range.
    #[must_use]
    pub fn with_priority(data: Vec<u8>, priority: i32, task_type: TaskType) -> Self {
        Self {
            data,
            priority: priority.clamp(MIN_TASK_PRIORITY, MAX_TASK_PRIORITY),
            enqueue_time: Instant::now(),
            enqueued_at_ms: Utc::now().timestamp_millis(),
            task_type,
            estimated_memory_usage: 0,
            estimated_cpu_time: 0,
        }
    }

    /// Attach resource usage hints.
    #[must_use]
    pub fn with_estimates(mut self, memory_bytes: usize, cpu_micros: usize) -> Self {
        self.estimated_memory_usage = memory_bytes;
        self.estimated_cpu_time = cpu_micros;
        self
    }

    /// Whether this task belongs to the high-priority partition.
    pub fn is_high_priority(&self) -> bool {
        self.priority >= 7
    }
}

/// Point-in-time kernel snapshot scored by the load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct KernelMetrics {
    /// Relative load of the kernel in `[0, 1]`.
    pub load: f64,
    /// Average task latency, milliseconds.
    pub latency: f64,
    /// Cache hit efficiency in `[0, 1]`.
    pub cache_efficiency: f64,
    /// Inter-kernel tunnel bandwidth, MB/s.
    pub tunnel_bandwidth: f64,
    /// Number of tasks currently queued or running.
    pub active_tasks: usize,

    /// CPU usage in `[0, 1]`.
    pub cpu_usage: f64,
    /// Memory usage in `[0, 1]`.
    pub memory_usage: f64,
    /// Available network bandwidth, MB/s.
    pub network_bandwidth: f64,
    /// Disk activity, IOPS.
    pub disk_io: f64,
    /// Power draw, watts.
    pub energy_consumption: f64,

    /// Efficiency for CPU-bound tasks in `[0, 1]`.
    pub cpu_task_efficiency: f64,
    /// Efficiency for I/O-bound tasks in `[0, 1]`.
    pub io_task_efficiency: f64,
    /// Efficiency for memory-bound tasks in `[0, 1]`.
    pub memory_task_efficiency: f64,
    /// Efficiency for network-bound tasks in `[0, 1]`.
    pub network_task_efficiency: f64,
}

/// Kernel-side wide metrics snapshot, combining the resource axes and the
/// per-workload efficiency axes.  Structurally mirrors [`KernelMetrics`];
/// kernels maintain this one and hand the balancer a converted copy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ExtendedKernelMetrics {
    pub load: f64,
    pub latency: f64,
    pub cache_efficiency: f64,
    pub tunnel_bandwidth: f64,
    pub active_tasks: usize,

    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub network_bandwidth: f64,
    pub disk_io: f64,
    pub energy_consumption: f64,

    pub cpu_task_efficiency: f64,
    pub io_task_efficiency: f64,
    pub memory_task_efficiency: f64,
    pub network_task_efficiency: f64,
}

impl From<ExtendedKernelMetrics> for KernelMetrics {
    fn from(m: ExtendedKernelMetrics) -> Self {
        Self {
            load: m.load,
            latency: m.latency,
            cache_efficiency: m.cache_efficiency,
            tunnel_bandwidth: m.tunnel_bandwidth,
            active_tasks: m.active_tasks,
            cpu_usage: m.cpu_usage,
            memory_usage: m.memory_usage,
            network_bandwidth: m.network_bandwidth,
            disk_io: m.disk_io,
            energy_consumption: m.energy_consumption,
            cpu_task_efficiency: m.cpu_task_efficiency,
            io_task_efficiency: m.io_task_efficiency,
            memory_task_efficiency: m.memory_task_efficiency,
            network_task_efficiency: m.network_task_efficiency,
        }
    }
}

/// Per-core-class usage, shaped by the platform topology.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum CoreClassUsage {
    /// Topology unknown; no per-class data.
    #[default]
    Unknown,
    /// Asymmetric (performance/efficiency) core layout.
    Asymmetric {
        performance_core_usage: f64,
        efficiency_core_usage: f64,
        neural_engine_usage: f64,
    },
    /// Symmetric layout with SMT.
    Smt {
        physical_core_usage: f64,
        logical_core_usage: f64,
        avx_usage: f64,
    },
}

/// Raw performance sample a kernel takes from the telemetry probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Overall CPU usage in `[0, 1]`.
    pub cpu_usage: f64,
    /// Overall memory usage in `[0, 1]`.
    pub memory_usage: f64,
    /// Power draw in watts; 0 when the probe cannot read it.
    pub power_consumption: f64,
    /// Temperature in degrees Celsius; 0 when unavailable.
    pub temperature: f64,
    /// Weighted overall efficiency in `[0, 1]`.
    pub efficiency_score: f64,
    /// Per-core-class usage breakdown.
    pub core_class: CoreClassUsage,
    /// Wall-clock time the sample was taken.
    pub sampled_at: DateTime<Utc>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            cpu_usage: 0.0,
            memory_usage: 0.0,
            power_consumption: 0.0,
            temperature: 0.0,
            efficiency_score: 0.0,
            core_class: CoreClassUsage::Unknown,
            sampled_at: Utc::now(),
        }
    }
}

/// Kernel variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelType {
    /// Parent-capable kernel that composes child kernels.
    Parent,
    /// Lightweight I/O-leaning kernel.
    Micro,
    /// Self-tuning kernel that adapts pool and cache sizing.
    Smart,
    /// CPU-heavy kernel with acceleration support.
    Computational,
    /// Topology and placement optimization kernel.
    Architectural,
    /// Task-distributing kernel that drives the balancer.
    Orchestration,
    /// Cryptographic workload kernel.
    Crypto,
}

impl KernelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelType::Parent => "parent",
            KernelType::Micro => "micro",
            KernelType::Smart => "smart",
            KernelType::Computational => "computational",
            KernelType::Architectural => "architectural",
            KernelType::Orchestration => "orchestration",
            KernelType::Crypto => "crypto",
        }
    }
}
