//! Shared kernel engine.
//!
//! Every kernel variant is a thin shell over a [`KernelRuntime`]: the
//! lifecycle state machine, the priority task queue with its worker set,
//! the component slots (cache, recovery, accelerator), the event fan-out,
//! and the metric snapshots all live here.
//!
//! Tasks are opaque closures executed to completion.  Workers dequeue in
//! (priority descending, enqueue order within equal priority) order, skip
//! cancelled ids, and run every job under a catch-all so a panicking task
//! never takes a worker down.  No internal lock is ever held across a
//! user-supplied callback.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::Utc;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};

use fabric_balancer::{LoadBalancer, TaskJob};
use fabric_core::accel::Accelerator;
use fabric_core::cache::DynamicCache;
use fabric_core::error::{CoreError, Result as CoreResult};
use fabric_core::platform::PlatformProfile;
use fabric_core::pool::PoolMetrics;
use fabric_core::preload::PreloadManager;
use fabric_core::recovery::{RecoveryConfig, RecoveryManager};
use fabric_core::task::{
    ExtendedKernelMetrics, KernelType, PerformanceMetrics, TaskDescriptor, MAX_TASK_PRIORITY,
    MIN_TASK_PRIORITY,
};
use fabric_core::telemetry::TelemetryProbe;

use crate::traits::{EventCallback, EventPayload, TaskCallback};

/// Byte cache every kernel owns.
pub type KernelCache = DynamicCache<String, Vec<u8>>;

/// Kernel configuration validated at initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Upper bound on the worker set.
    pub max_threads: usize,
    /// Upper bound on cache capacity, entries.
    pub max_memory: usize,
    /// How often the owner is expected to refresh metrics.
    pub metrics_interval: std::time::Duration,
    /// Efficiency delta that triggers adaptation in self-tuning variants.
    pub adaptation_threshold: f64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_threads: 8,
            max_memory: 4096,
            metrics_interval: std::time::Duration::from_secs(5),
            adaptation_threshold: 0.1,
        }
    }
}

impl KernelConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_threads == 0 {
            return Err(CoreError::ConfigInvalid {
                reason: "max_threads must be at least 1".into(),
            });
        }
        if self.max_memory == 0 {
            return Err(CoreError::ConfigInvalid {
                reason: "max_memory must be nonzero".into(),
            });
        }
        if self.metrics_interval.is_zero() {
            return Err(CoreError::ConfigInvalid {
                reason: "metrics_interval must be nonzero".into(),
            });
        }
        if self.adaptation_threshold <= 0.0 {
            return Err(CoreError::ConfigInvalid {
                reason: "adaptation_threshold must be positive".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Paused,
    Stopped,
}

/// One queued job.  Max-heap order: priority descending, then FIFO within
/// equal priority.
struct QueuedJob {
    priority: i32,
    seq: u64,
    id: Option<String>,
    job: TaskJob,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

struct EngineState {
    queue: BinaryHeap<QueuedJob>,
    cancelled: HashSet<String>,
    running: bool,
    paused: bool,
    active: usize,
    alive_workers: usize,
    target_workers: usize,
    next_seq: u64,
}

struct Engine {
    state: Mutex<EngineState>,
    cv: Condvar,
    done_cv: Condvar,
}

struct KernelComponents {
    cache: KernelCache,
    recovery: RecoveryManager,
    accelerator: Accelerator,
}

struct RuntimeInner {
    id: String,
    kind: KernelType,
    config: RwLock<KernelConfig>,
    lifecycle: RwLock<Lifecycle>,
    engine: Arc<Engine>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    components: RwLock<Option<KernelComponents>>,
    profile: PlatformProfile,
    probe: TelemetryProbe,
    metrics: RwLock<PerformanceMetrics>,
    extended: RwLock<ExtendedKernelMetrics>,
    task_callback: RwLock<Option<TaskCallback>>,
    event_callbacks: RwLock<HashMap<String, EventCallback>>,
    balancer: RwLock<Option<LoadBalancer>>,
    preload: RwLock<Option<PreloadManager>>,
}

/// Shared kernel engine.  Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct KernelRuntime {
    inner: Arc<RuntimeInner>,
}

impl KernelRuntime {
    /// Build a runtime in the `created` state; [`KernelRuntime::initialize`]
    /// brings it up.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: KernelType, config: KernelConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                id: id.into(),
                kind,
                config: RwLock::new(config),
                lifecycle: RwLock::new(Lifecycle::Created),
                engine: Arc::new(Engine {
                    state: Mutex::new(EngineState {
                        queue: BinaryHeap::new(),
                        cancelled: HashSet::new(),
                        running: false,
                        paused: false,
                        active: 0,
                        alive_workers: 0,
                        target_workers: 0,
                        next_seq: 0,
                    }),
                    cv: Condvar::new(),
                    done_cv: Condvar::new(),
                }),
                workers: Mutex::new(Vec::new()),
                components: RwLock::new(None),
                profile: PlatformProfile::detect(),
                probe: TelemetryProbe::new(),
                metrics: RwLock::new(PerformanceMetrics::default()),
                extended: RwLock::new(ExtendedKernelMetrics::default()),
                task_callback: RwLock::new(None),
                event_callbacks: RwLock::new(HashMap::new()),
                balancer: RwLock::new(None),
                preload: RwLock::new(None),
            }),
        }
    }

    pub fn id(&self) -> String {
        self.inner.id.clone()
    }

    pub fn kind(&self) -> KernelType {
        self.inner.kind
    }

    pub fn profile(&self) -> &PlatformProfile {
        &self.inner.profile
    }

    pub fn config(&self) -> KernelConfig {
        self.inner.config.read().clone()
    }

    pub fn set_config(&self, config: KernelConfig) {
        *self.inner.config.write() = config;
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Validate configuration, build the cache, recovery manager and
    /// accelerator, start the worker set, and (when a preloader is present)
    /// warm the cache.  Returns false on any failure; partial state is torn
    /// down before returning.
    pub fn initialize(&self) -> bool {
        if *self.inner.lifecycle.read() != Lifecycle::Created {
            tracing::warn!(kernel = %self.inner.id, "initialize called more than once");
            return false;
        }

        let config = self.config();
        if let Err(err) = config.validate() {
            tracing::error!(kernel = %self.inner.id, error = %err, "invalid kernel configuration");
            return false;
        }

        let cache = KernelCache::with_config(self.inner.profile.cache_config());
        let recovery = match RecoveryManager::in_memory(RecoveryConfig::default()) {
            Ok(recovery) => recovery,
            Err(err) => {
                tracing::error!(kernel = %self.inner.id, error = %err, "failed to build recovery manager");
                return false;
            }
        };
        *self.inner.components.write() = Some(KernelComponents {
            cache,
            recovery,
            accelerator: Accelerator::new(),
        });

        let pool_config = self.inner.profile.pool_config();
        let worker_count = pool_config.worker_count().min(config.max_threads).max(1);
        {
            let mut state = self.inner.engine.state.lock();
            state.running = true;
            state.paused = false;
            state.target_workers = worker_count;
        }
        self.spawn_workers(worker_count, pool_config.stack_size);

        *self.inner.lifecycle.write() = Lifecycle::Running;
        tracing::info!(
            kernel = %self.inner.id,
            kind = self.inner.kind.as_str(),
            workers = worker_count,
            "kernel initialized"
        );

        if self.inner.preload.read().is_some() {
            self.warmup_from_preload();
        }
        true
    }

    /// Stop the workers (pending tasks are discarded), clear the cache, and
    /// release the components.  Idempotent.
    pub fn shutdown(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.write();
            if *lifecycle == Lifecycle::Stopped {
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }

        {
            let mut state = self.inner.engine.state.lock();
            state.running = false;
            state.target_workers = 0;
            let dropped = state.queue.len();
            state.queue.clear();
            state.cancelled.clear();
            if dropped > 0 {
                tracing::debug!(kernel = %self.inner.id, dropped, "discarded pending tasks");
            }
        }
        self.inner.engine.cv.notify_all();
        for handle in self.inner.workers.lock().drain(..) {
            let _ = handle.join();
        }

        if let Some(components) = self.inner.components.write().take() {
            components.cache.clear();
        }
        tracing::info!(kernel = %self.inner.id, "kernel shut down");
    }

    /// Whether the kernel has been initialized and not yet shut down.
    /// A paused kernel still counts as running; pause only parks the
    /// workers.
    pub fn is_running(&self) -> bool {
        matches!(
            *self.inner.lifecycle.read(),
            Lifecycle::Running | Lifecycle::Paused
        )
    }

    pub fn pause(&self) {
        let mut lifecycle = self.inner.lifecycle.write();
        if *lifecycle == Lifecycle::Running {
            *lifecycle = Lifecycle::Paused;
            self.inner.engine.state.lock().paused = true;
            tracing::debug!(kernel = %self.inner.id, "kernel paused");
        }
    }

    pub fn resume(&self) {
        let mut lifecycle = self.inner.lifecycle.write();
        if *lifecycle == Lifecycle::Paused {
            *lifecycle = Lifecycle::Running;
            self.inner.engine.state.lock().paused = false;
            self.inner.engine.cv.notify_all();
            tracing::debug!(kernel = %self.inner.id, "kernel resumed");
        }
    }

    /// Drop queued tasks, cancelled ids, and cached entries while staying
    /// running.
    pub fn reset(&self) {
        {
            let mut state = self.inner.engine.state.lock();
            state.queue.clear();
            state.cancelled.clear();
        }
        if let Some(cache) = self.cache() {
            cache.clear();
        }
        tracing::debug!(kernel = %self.inner.id, "kernel reset");
    }

    // -- Task engine --------------------------------------------------------

    fn spawn_workers(&self, count: usize, stack_size: usize) {
        let mut workers = self.inner.workers.lock();
        for index in 0..count {
            let engine = Arc::clone(&self.inner.engine);
            let kernel_id = self.inner.id.clone();
            let builder = std::thread::Builder::new()
                .name(format!("{kernel_id}-worker-{index}"))
                .stack_size(stack_size);
            match builder.spawn(move || worker_loop(&engine, &kernel_id)) {
                Ok(handle) => {
                    self.inner.engine.state.lock().alive_workers += 1;
                    workers.push(handle);
                }
                Err(err) => {
                    tracing::error!(kernel = %self.inner.id, error = %err, "failed to spawn worker");
                }
            }
        }
    }

    /// Grow or shrink the worker set toward `target`.
    pub fn resize_workers(&self, target: usize) {
        let target = target.max(1);
        let (to_spawn, stack_size) = {
            let mut state = self.inner.engine.state.lock();
            if !state.running {
                return;
            }
            state.target_workers = target;
            let alive = state.alive_workers;
            (
                target.saturating_sub(alive),
                self.inner.profile.pool_config().stack_size,
            )
        };
        if to_spawn > 0 {
            self.spawn_workers(to_spawn, stack_size);
        } else {
            // Surplus workers notice the lowered target and exit.
            self.inner.engine.cv.notify_all();
        }
        tracing::info!(kernel = %self.inner.id, workers = target, "worker set resized");
    }

    /// Push a job onto the priority queue.  Dropped with a log line when the
    /// kernel is not running.
    pub fn schedule_task(&self, job: TaskJob, priority: i32) {
        self.schedule_task_inner(job, priority, None);
    }

    /// Push a cancellable job; [`KernelRuntime::cancel_task`] with the same
    /// id makes workers skip it on dequeue.
    pub fn schedule_task_with_id(&self, job: TaskJob, priority: i32, task_id: impl Into<String>) {
        self.schedule_task_inner(job, priority, Some(task_id.into()));
    }

    fn schedule_task_inner(&self, job: TaskJob, priority: i32, id: Option<String>) {
        if !self.is_running() {
            tracing::warn!(kernel = %self.inner.id, priority, "task dropped: kernel not running");
            return;
        }
        let priority = priority.clamp(MIN_TASK_PRIORITY, MAX_TASK_PRIORITY);
        {
            let mut state = self.inner.engine.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(QueuedJob {
                priority,
                seq,
                id,
                job,
            });
        }
        self.inner.engine.cv.notify_one();
        tracing::trace!(kernel = %self.inner.id, priority, "task scheduled");
    }

    pub fn cancel_task(&self, task_id: &str) {
        self.inner
            .engine
            .state
            .lock()
            .cancelled
            .insert(task_id.to_string());
        tracing::debug!(kernel = %self.inner.id, task_id, "task cancelled");
    }

    /// Tasks queued or currently executing.
    pub fn pending_tasks(&self) -> usize {
        let state = self.inner.engine.state.lock();
        state.queue.len() + state.active
    }

    /// Worker-set statistics in pool terms.
    pub fn engine_metrics(&self) -> PoolMetrics {
        let state = self.inner.engine.state.lock();
        PoolMetrics {
            active_threads: state.active,
            queue_size: state.queue.len(),
            total_threads: state.alive_workers,
        }
    }

    /// Block until the queue is empty and no worker is executing.
    pub fn wait_for_idle(&self) {
        let mut state = self.inner.engine.state.lock();
        while !(state.queue.is_empty() && state.active == 0) {
            self.inner.engine.done_cv.wait(&mut state);
        }
    }

    // -- Task processing ----------------------------------------------------

    /// Execute a task descriptor: run the task callback, store the payload
    /// in the cache under `task_{priority}_{enqueue_ms}`, refresh the
    /// extended metrics, and emit `task_processed` (or `task_failed` when
    /// the callback blows up).
    pub fn process_task(&self, task: &TaskDescriptor) -> bool {
        if !self.is_running() {
            tracing::warn!(kernel = %self.inner.id, "process_task on a kernel that is not running");
            return false;
        }
        tracing::debug!(
            kernel = %self.inner.id,
            task_type = task.task_type.as_str(),
            priority = task.priority,
            "processing task"
        );

        let callback = self.inner.task_callback.read().clone();
        if let Some(callback) = callback {
            // Invoked with no internal lock held.
            if catch_unwind(AssertUnwindSafe(|| callback(task))).is_err() {
                tracing::error!(kernel = %self.inner.id, "task callback panicked");
                self.trigger_event(
                    "task_failed",
                    EventPayload::Message("task callback panicked".into()),
                );
                return false;
            }
        }

        if let Some(cache) = self.cache() {
            let key = format!("task_{}_{}", task.priority, task.enqueued_at_ms);
            cache.put(key, task.data.clone());
        }

        self.update_extended_metrics();
        self.trigger_event("task_processed", EventPayload::Task(task.clone()));
        true
    }

    // -- Components ---------------------------------------------------------

    pub fn cache(&self) -> Option<KernelCache> {
        self.inner
            .components
            .read()
            .as_ref()
            .map(|c| c.cache.clone())
    }

    pub fn recovery(&self) -> Option<RecoveryManager> {
        self.inner
            .components
            .read()
            .as_ref()
            .map(|c| c.recovery.clone())
    }

    pub fn accelerator(&self) -> Option<Accelerator> {
        self.inner
            .components
            .read()
            .as_ref()
            .map(|c| c.accelerator.clone())
    }

    pub fn set_task_callback(&self, callback: TaskCallback) {
        *self.inner.task_callback.write() = Some(callback);
        tracing::debug!(kernel = %self.inner.id, "task callback installed");
    }

    pub fn set_load_balancer(&self, balancer: LoadBalancer) {
        *self.inner.balancer.write() = Some(balancer);
        tracing::info!(kernel = %self.inner.id, "load balancer attached");
    }

    pub fn load_balancer(&self) -> Option<LoadBalancer> {
        self.inner.balancer.read().clone()
    }

    pub fn set_preload_manager(&self, preload: PreloadManager) {
        *self.inner.preload.write() = Some(preload);
        tracing::info!(kernel = %self.inner.id, "preload manager attached");
    }

    pub fn preload_manager(&self) -> Option<PreloadManager> {
        self.inner.preload.read().clone()
    }

    // -- Warm-up ------------------------------------------------------------

    /// Copy every preloader key into the cache.  Emits `warmup_completed`
    /// with the loaded count, or `warmup_failed` when the kernel has no
    /// cache to warm.  Never fails the caller.
    pub fn warmup_from_preload(&self) {
        let Some(preload) = self.inner.preload.read().clone() else {
            tracing::warn!(kernel = %self.inner.id, "warm-up skipped: no preload manager");
            return;
        };
        let Some(cache) = self.cache() else {
            tracing::warn!(kernel = %self.inner.id, "warm-up failed: kernel has no cache yet");
            self.trigger_event(
                "warmup_failed",
                EventPayload::Message("kernel cache unavailable".into()),
            );
            return;
        };

        let keys = preload.get_all_keys();
        let mut loaded = 0usize;
        for key in keys {
            if let Some(data) = preload.get_data_for_key(&key) {
                cache.put(key, data);
                loaded += 1;
            }
        }
        tracing::info!(kernel = %self.inner.id, loaded, "cache warm-up complete");
        self.trigger_event("warmup_completed", EventPayload::Count(loaded));
    }

    // -- Events -------------------------------------------------------------

    pub fn set_event_callback(&self, event: &str, callback: EventCallback) {
        self.inner
            .event_callbacks
            .write()
            .insert(event.to_string(), callback);
    }

    pub fn remove_event_callback(&self, event: &str) {
        self.inner.event_callbacks.write().remove(event);
    }

    /// Invoke the callback registered for `event`, if any.  The callback
    /// runs with no internal lock held; a panic inside it is logged and
    /// contained.
    pub fn trigger_event(&self, event: &str, payload: EventPayload) {
        let callback = self.inner.event_callbacks.read().get(event).cloned();
        if let Some(callback) = callback {
            let id = self.inner.id.clone();
            if catch_unwind(AssertUnwindSafe(|| callback(&id, &payload))).is_err() {
                tracing::error!(kernel = %self.inner.id, event, "event callback panicked");
            }
        }
    }

    // -- Metrics ------------------------------------------------------------

    pub fn metrics(&self) -> PerformanceMetrics {
        *self.inner.metrics.read()
    }

    /// Sample the telemetry probe and refresh both snapshots.
    pub fn update_metrics(&self) {
        let sample = self.inner.probe.sample();
        let power_efficiency = (1.0 - sample.power_watts / 100.0).clamp(0.0, 1.0);
        let thermal_efficiency = (1.0 - sample.temperature_celsius / 100.0).clamp(0.0, 1.0);
        let efficiency_score = sample.cpu_usage * 0.3
            + power_efficiency * 0.3
            + thermal_efficiency * 0.2
            + sample.memory_usage * 0.2;

        *self.inner.metrics.write() = PerformanceMetrics {
            cpu_usage: sample.cpu_usage,
            memory_usage: sample.memory_usage,
            power_consumption: sample.power_watts,
            temperature: sample.temperature_celsius,
            efficiency_score,
            core_class: sample.core_class,
            sampled_at: Utc::now(),
        };
        self.update_extended_metrics();
        tracing::trace!(kernel = %self.inner.id, efficiency_score, "metrics updated");
    }

    pub fn extended_metrics(&self) -> ExtendedKernelMetrics {
        *self.inner.extended.read()
    }

    /// Rebuild the extended snapshot from the performance snapshot, the
    /// queue depth, and the type-dependent workload bias.
    pub fn update_extended_metrics(&self) {
        let perf = self.metrics();
        let pending = self.pending_tasks();
        let cache_efficiency = self.cache().map(|c| c.hit_rate()).unwrap_or(0.0);
        let tunnel_bandwidth = self.inner.extended.read().tunnel_bandwidth;

        let bias = workload_bias(self.inner.kind);
        let base = perf.efficiency_score;
        let (network_bandwidth, disk_io) = if self.inner.kind == KernelType::Micro {
            (500.0, 500.0)
        } else {
            (1000.0, 1000.0)
        };

        *self.inner.extended.write() = ExtendedKernelMetrics {
            load: perf.cpu_usage,
            latency: 0.0,
            cache_efficiency,
            tunnel_bandwidth,
            active_tasks: pending,
            cpu_usage: perf.cpu_usage,
            memory_usage: perf.memory_usage,
            network_bandwidth,
            disk_io,
            energy_consumption: perf.power_consumption,
            cpu_task_efficiency: base * bias[0],
            io_task_efficiency: base * bias[1],
            memory_task_efficiency: base * bias[2],
            network_task_efficiency: base * bias[3],
        };
    }

    /// Overlay the tunnel-bandwidth axis; the orchestrator feeds this.
    pub fn set_tunnel_bandwidth(&self, bandwidth: f64) {
        self.inner.extended.write().tunnel_bandwidth = bandwidth;
    }

    // -- Resources ----------------------------------------------------------

    /// Known keys: `threads` resizes the worker set, `cache` resizes the
    /// cache.  Unknown keys log a warning and change nothing.
    pub fn set_resource_limit(&self, resource: &str, limit: f64) {
        match resource {
            "threads" => {
                let target = (limit.max(1.0)) as usize;
                self.resize_workers(target);
            }
            "cache" => {
                if let Some(cache) = self.cache() {
                    cache.resize(limit.max(0.0) as usize);
                    tracing::info!(kernel = %self.inner.id, capacity = limit, "cache limit applied");
                }
            }
            other => {
                tracing::warn!(kernel = %self.inner.id, resource = other, "unknown resource key");
            }
        }
    }

    pub fn resource_usage(&self, resource: &str) -> f64 {
        match resource {
            "threads" => self.engine_metrics().active_threads as f64,
            "cache" => self
                .cache()
                .map(|c| c.allocated_size() as f64)
                .unwrap_or(0.0),
            other => {
                tracing::warn!(kernel = %self.inner.id, resource = other, "unknown resource key");
                0.0
            }
        }
    }

    pub fn supported_features(&self) -> Vec<String> {
        vec![
            "priority_scheduling".to_string(),
            "dynamic_cache".to_string(),
            "recovery_points".to_string(),
            "preload_warmup".to_string(),
        ]
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        {
            let mut state = self.engine.state.lock();
            state.running = false;
            state.target_workers = 0;
            state.queue.clear();
        }
        self.engine.cv.notify_all();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

/// Per-workload efficiency bias by kernel type, each factor in
/// `[0.9, 1.25]`: `[cpu, io, memory, network]`.
fn workload_bias(kind: KernelType) -> [f64; 4] {
    match kind {
        KernelType::Computational => [1.2, 1.0, 1.0, 1.0],
        KernelType::Micro => [0.9, 1.1, 0.95, 1.05],
        KernelType::Architectural => [1.0, 1.0, 1.15, 1.0],
        KernelType::Orchestration => [1.0, 1.0, 1.0, 1.25],
        _ => [1.0, 1.0, 1.0, 1.0],
    }
}

fn worker_loop(engine: &Engine, kernel_id: &str) {
    loop {
        let job = {
            let mut state = engine.state.lock();
            loop {
                if state.alive_workers > state.target_workers {
                    state.alive_workers -= 1;
                    return;
                }
                if !state.running {
                    state.alive_workers -= 1;
                    return;
                }
                if !state.paused {
                    if let Some(queued) = state.queue.pop() {
                        if let Some(id) = &queued.id {
                            if state.cancelled.remove(id.as_str()) {
                                tracing::debug!(kernel = kernel_id, task_id = %id, "skipped cancelled task");
                                continue;
                            }
                        }
                        state.active += 1;
                        break queued.job;
                    }
                }
                engine.cv.wait(&mut state);
            }
        };

        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(kernel = kernel_id, "kernel task panicked");
        }

        let mut state = engine.state.lock();
        state.active -= 1;
        drop(state);
        engine.done_cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn running_runtime(id: &str) -> KernelRuntime {
        let runtime = KernelRuntime::new(id, KernelType::Micro, KernelConfig::default());
        assert!(runtime.initialize());
        runtime
    }

    #[test]
    fn queued_job_ordering_is_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        for (priority, seq) in [(5, 0u64), (8, 1), (5, 2), (10, 3), (8, 4)] {
            heap.push(QueuedJob {
                priority,
                seq,
                id: None,
                job: Box::new(|| {}),
            });
        }
        let order: Vec<(i32, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|j| (j.priority, j.seq))
            .collect();
        assert_eq!(order, vec![(10, 3), (8, 1), (8, 4), (5, 0), (5, 2)]);
    }

    #[test]
    fn initialize_is_idempotent_failing() {
        let runtime = KernelRuntime::new("init-once", KernelType::Micro, KernelConfig::default());
        assert!(runtime.initialize());
        assert!(!runtime.initialize());
        runtime.shutdown();
    }

    #[test]
    fn invalid_config_fails_initialize() {
        let runtime = KernelRuntime::new(
            "bad-config",
            KernelType::Micro,
            KernelConfig {
                max_threads: 0,
                ..KernelConfig::default()
            },
        );
        assert!(!runtime.initialize());
        assert!(!runtime.is_running());
    }

    #[test]
    fn shutdown_is_idempotent_and_rejects_later_work() {
        let runtime = running_runtime("shutdown-twice");
        runtime.shutdown();
        runtime.shutdown();

        // Scheduling after shutdown is a logged no-op.
        let ran = Arc::new(StdMutex::new(false));
        let flag = Arc::clone(&ran);
        runtime.schedule_task(Box::new(move || *flag.lock().unwrap() = true), 5);
        std::thread::sleep(Duration::from_millis(50));
        assert!(!*ran.lock().unwrap());
        assert!(!runtime.is_running());
    }

    #[test]
    fn tasks_run_in_priority_order() {
        let runtime = KernelRuntime::new(
            "priority-order",
            KernelType::Micro,
            KernelConfig {
                max_threads: 1,
                ..KernelConfig::default()
            },
        );
        assert!(runtime.initialize());
        // Park the single worker so the dequeue order is decided by the
        // heap alone.
        runtime.pause();

        let order = Arc::new(StdMutex::new(Vec::new()));
        for (priority, label) in [(2, "low"), (9, "high"), (5, "mid")] {
            let order = Arc::clone(&order);
            runtime.schedule_task(Box::new(move || order.lock().unwrap().push(label)), priority);
        }

        runtime.resume();
        runtime.wait_for_idle();
        assert_eq!(*order.lock().unwrap(), vec!["high", "mid", "low"]);
        runtime.shutdown();
    }

    #[test]
    fn equal_priorities_dequeue_fifo() {
        let runtime = KernelRuntime::new(
            "fifo-ties",
            KernelType::Micro,
            KernelConfig {
                max_threads: 1,
                ..KernelConfig::default()
            },
        );
        assert!(runtime.initialize());
        runtime.pause();

        let order = Arc::new(StdMutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            runtime.schedule_task(Box::new(move || order.lock().unwrap().push(label)), 5);
        }

        runtime.resume();
        runtime.wait_for_idle();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
        runtime.shutdown();
    }

    #[test]
    fn cancelled_tasks_are_skipped() {
        let runtime = KernelRuntime::new(
            "cancel",
            KernelType::Micro,
            KernelConfig {
                max_threads: 1,
                ..KernelConfig::default()
            },
        );
        assert!(runtime.initialize());
        // Queue while paused so cancellation lands before dequeue.
        runtime.pause();

        let ran = Arc::new(StdMutex::new(Vec::new()));
        let a = Arc::clone(&ran);
        let b = Arc::clone(&ran);
        runtime.schedule_task_with_id(
            Box::new(move || a.lock().unwrap().push("doomed")),
            5,
            "doomed",
        );
        runtime.schedule_task(Box::new(move || b.lock().unwrap().push("kept")), 5);
        runtime.cancel_task("doomed");

        runtime.resume();
        runtime.wait_for_idle();
        assert_eq!(*ran.lock().unwrap(), vec!["kept"]);
        runtime.shutdown();
    }

    #[test]
    fn process_task_caches_payload_and_fires_event() {
        let runtime = running_runtime("process");
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        runtime.set_event_callback(
            "task_processed",
            Arc::new(move |kernel_id: &str, payload: &EventPayload| {
                let detail = match payload {
                    EventPayload::Task(task) => format!("{}:{}", kernel_id, task.priority),
                    _ => "unexpected".to_string(),
                };
                sink.lock().unwrap().push(detail);
            }),
        );

        let task = TaskDescriptor::with_priority(vec![1, 2, 3], 6, Default::default());
        let key = format!("task_{}_{}", task.priority, task.enqueued_at_ms);
        assert!(runtime.process_task(&task));

        let cache = runtime.cache().expect("cache exists while running");
        assert_eq!(cache.get(&key), Some(vec![1, 2, 3]));
        assert_eq!(events.lock().unwrap().as_slice(), ["process:6"]);
        runtime.shutdown();
    }

    #[test]
    fn panicking_task_callback_is_isolated() {
        let runtime = running_runtime("callback-panic");
        let failures = Arc::new(StdMutex::new(0usize));
        let sink = Arc::clone(&failures);
        runtime.set_event_callback(
            "task_failed",
            Arc::new(move |_: &str, _: &EventPayload| {
                *sink.lock().unwrap() += 1;
            }),
        );
        runtime.set_task_callback(Arc::new(|_task: &TaskDescriptor| panic!("boom")));

        let task = TaskDescriptor::new(vec![1]);
        assert!(!runtime.process_task(&task));
        assert_eq!(*failures.lock().unwrap(), 1);
        runtime.shutdown();
    }

    #[test]
    fn event_callbacks_can_be_removed() {
        let runtime = running_runtime("events");
        let count = Arc::new(StdMutex::new(0usize));
        let sink = Arc::clone(&count);
        runtime.set_event_callback(
            "ping",
            Arc::new(move |_: &str, _: &EventPayload| {
                *sink.lock().unwrap() += 1;
            }),
        );

        runtime.trigger_event("ping", EventPayload::None);
        runtime.remove_event_callback("ping");
        runtime.trigger_event("ping", EventPayload::None);
        assert_eq!(*count.lock().unwrap(), 1);
        runtime.shutdown();
    }

    #[test]
    fn resource_limits_adjust_threads_and_cache() {
        let runtime = running_runtime("limits");
        runtime.set_resource_limit("threads", 3.0);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(runtime.engine_metrics().total_threads, 3);

        runtime.set_resource_limit("cache", 64.0);
        assert_eq!(runtime.resource_usage("cache"), 64.0);

        // Unknown keys are a logged no-op.
        runtime.set_resource_limit("antimatter", 1.0);
        assert_eq!(runtime.resource_usage("antimatter"), 0.0);
        runtime.shutdown();
    }

    #[test]
    fn micro_bias_shapes_extended_metrics() {
        let runtime = running_runtime("bias");
        runtime.update_metrics();
        let m = runtime.extended_metrics();
        // Micro kernels advertise the reduced network/disk envelope.
        assert_eq!(m.network_bandwidth, 500.0);
        assert_eq!(m.disk_io, 500.0);
        runtime.shutdown();
    }

    #[test]
    fn worker_shrink_converges() {
        let runtime = running_runtime("shrink");
        runtime.resize_workers(4);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(runtime.engine_metrics().total_threads, 4);

        runtime.resize_workers(1);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(runtime.engine_metrics().total_threads, 1);
        runtime.shutdown();
    }
}
