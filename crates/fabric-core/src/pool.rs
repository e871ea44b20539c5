//! Bounded FIFO worker pool.
//!
//! [`ThreadPool`] runs a fixed set of OS worker threads over a single
//! bounded FIFO queue.  Enqueueing past capacity fails with
//! [`CoreError::QueueFull`] instead of blocking; [`ThreadPool::stop`] lets
//! workers finish their current task, discards everything still queued, and
//! joins the threads.  [`ThreadPool::set_configuration`] atomically replaces
//! the configuration (stop, swap, restart).
//!
//! Dequeue order is strictly FIFO.  Priority ordering is the caller's
//! responsibility; kernels keep their own priority queues and use the pool
//! configuration only for sizing.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// A unit of pool work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Core layout of the host, used to derive the worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CoreTopology {
    /// No topology information; size from `min_threads`.
    #[default]
    Uniform,
    /// Asymmetric performance/efficiency core layout.
    Asymmetric {
        use_performance_cores: bool,
        use_efficiency_cores: bool,
        performance_cores: usize,
        efficiency_cores: usize,
    },
    /// Symmetric cores with SMT.
    Smt {
        use_hyperthreading: bool,
        physical_cores: usize,
        logical_cores: usize,
    },
}

/// Pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub min_threads: usize,
    pub max_threads: usize,
    /// Maximum queued (not yet running) tasks.
    pub queue_size: usize,
    /// Stack size per worker, bytes.
    pub stack_size: usize,
    pub topology: CoreTopology,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            min_threads: 2,
            max_threads: parallelism.max(2),
            queue_size: 1000,
            stack_size: 2 * 1024 * 1024,
            topology: CoreTopology::Uniform,
        }
    }
}

impl PoolConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.min_threads == 0 {
            return Err(CoreError::ConfigInvalid {
                reason: "min_threads must be at least 1".into(),
            });
        }
        if self.min_threads > self.max_threads {
            return Err(CoreError::ConfigInvalid {
                reason: format!(
                    "min_threads ({}) exceeds max_threads ({})",
                    self.min_threads, self.max_threads
                ),
            });
        }
        if self.stack_size == 0 {
            return Err(CoreError::ConfigInvalid {
                reason: "stack_size must be nonzero".into(),
            });
        }
        if self.queue_size == 0 {
            return Err(CoreError::ConfigInvalid {
                reason: "queue_size must be nonzero".into(),
            });
        }
        match self.topology {
            CoreTopology::Asymmetric {
                use_performance_cores,
                use_efficiency_cores,
                performance_cores,
                efficiency_cores,
            } => {
                if use_performance_cores && performance_cores == 0 {
                    return Err(CoreError::ConfigInvalid {
                        reason: "performance cores requested but count is zero".into(),
                    });
                }
                if use_efficiency_cores && efficiency_cores == 0 {
                    return Err(CoreError::ConfigInvalid {
                        reason: "efficiency cores requested but count is zero".into(),
                    });
                }
            }
            CoreTopology::Smt {
                use_hyperthreading,
                physical_cores,
                logical_cores,
            } => {
                if use_hyperthreading && logical_cores <= physical_cores {
                    return Err(CoreError::ConfigInvalid {
                        reason: "hyperthreading requested but logical count does not exceed physical".into(),
                    });
                }
            }
            CoreTopology::Uniform => {}
        }
        Ok(())
    }

    /// Number of workers this configuration resolves to.
    pub fn worker_count(&self) -> usize {
        let count = match self.topology {
            CoreTopology::Uniform => self.min_threads,
            CoreTopology::Asymmetric {
                use_performance_cores,
                use_efficiency_cores,
                performance_cores,
                efficiency_cores,
            } => {
                let mut n = 0;
                if use_performance_cores {
                    n += performance_cores;
                }
                if use_efficiency_cores {
                    n += efficiency_cores;
                }
                if n == 0 {
                    n = self.min_threads;
                }
                n
            }
            CoreTopology::Smt {
                use_hyperthreading,
                physical_cores,
                logical_cores,
            } => {
                let n = if use_hyperthreading {
                    logical_cores
                } else {
                    physical_cores
                };
                if n == 0 {
                    self.min_threads
                } else {
                    n
                }
            }
        };
        count.min(self.max_threads).max(1)
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PoolMetrics {
    /// Workers currently executing a task.
    pub active_threads: usize,
    /// Tasks queued but not yet running.
    pub queue_size: usize,
    /// Total worker threads.
    pub total_threads: usize,
}

struct PoolState {
    queue: VecDeque<Job>,
    stop: bool,
    active: usize,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// Wakes workers when a task arrives or the pool stops.
    work_cv: Condvar,
    /// Wakes `wait_for_completion` when a task finishes.
    done_cv: Condvar,
}

struct PoolInner {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: Mutex<PoolConfig>,
}

/// Bounded FIFO worker pool.  Cheaply cloneable; clones share the pool.
#[derive(Clone)]
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl ThreadPool {
    /// Build a pool and start its workers.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                stop: false,
                active: 0,
            }),
            work_cv: Condvar::new(),
            done_cv: Condvar::new(),
        });
        let pool = Self {
            inner: Arc::new(PoolInner {
                shared,
                workers: Mutex::new(Vec::new()),
                config: Mutex::new(config),
            }),
        };
        pool.spawn_workers();
        Ok(pool)
    }

    fn spawn_workers(&self) {
        let config = self.inner.config.lock().clone();
        let count = config.worker_count();
        let mut workers = self.inner.workers.lock();
        for index in 0..count {
            let shared = Arc::clone(&self.inner.shared);
            let builder = std::thread::Builder::new()
                .name(format!("pool-worker-{index}"))
                .stack_size(config.stack_size);
            match builder.spawn(move || Self::worker_loop(&shared)) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    tracing::error!(error = %err, index, "failed to spawn pool worker");
                }
            }
        }
        tracing::debug!(workers = workers.len(), "thread pool workers started");
    }

    fn worker_loop(shared: &PoolShared) {
        loop {
            let job = {
                let mut state = shared.state.lock();
                loop {
                    if state.stop {
                        return;
                    }
                    if let Some(job) = state.queue.pop_front() {
                        state.active += 1;
                        break job;
                    }
                    shared.work_cv.wait(&mut state);
                }
            };

            // Run outside the lock; a panicking task must not kill the worker.
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::error!("pool task panicked");
            }

            let mut state = shared.state.lock();
            state.active -= 1;
            drop(state);
            shared.done_cv.notify_all();
        }
    }

    /// Enqueue a task.  Fails with [`CoreError::QueueFull`] when the queue is
    /// at capacity and [`CoreError::NotRunning`] after `stop`.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let capacity = self.inner.config.lock().queue_size;
        let mut state = self.inner.shared.state.lock();
        if state.stop {
            return Err(CoreError::NotRunning);
        }
        if state.queue.len() >= capacity {
            return Err(CoreError::QueueFull { capacity });
        }
        state.queue.push_back(Box::new(job));
        drop(state);
        self.inner.shared.work_cv.notify_one();
        Ok(())
    }

    /// Block until the queue is empty and no worker is running a task.
    pub fn wait_for_completion(&self) {
        let mut state = self.inner.shared.state.lock();
        while !(state.queue.is_empty() && state.active == 0) {
            self.inner.shared.done_cv.wait(&mut state);
        }
    }

    /// Stop the pool: workers finish their current task and exit; queued
    /// tasks are discarded.  Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.inner.shared.state.lock();
            state.stop = true;
            let dropped = state.queue.len();
            state.queue.clear();
            if dropped > 0 {
                tracing::debug!(dropped, "discarded queued tasks on pool stop");
            }
        }
        self.inner.shared.work_cv.notify_all();

        let handles: Vec<JoinHandle<()>> = self.inner.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.inner.shared.done_cv.notify_all();
    }

    /// Rebuild the workers from the current configuration.
    pub fn restart(&self) {
        self.stop();
        self.inner.shared.state.lock().stop = false;
        self.spawn_workers();
    }

    /// Validate and atomically apply a new configuration
    /// (equivalent to stop + reconfigure + restart).
    pub fn set_configuration(&self, config: PoolConfig) -> Result<()> {
        config.validate()?;
        self.stop();
        *self.inner.config.lock() = config;
        self.inner.shared.state.lock().stop = false;
        self.spawn_workers();
        tracing::debug!("thread pool reconfigured");
        Ok(())
    }

    /// Current configuration snapshot.
    pub fn configuration(&self) -> PoolConfig {
        self.inner.config.lock().clone()
    }

    /// Point-in-time statistics.
    pub fn metrics(&self) -> PoolMetrics {
        let state = self.inner.shared.state.lock();
        PoolMetrics {
            active_threads: state.active,
            queue_size: state.queue.len(),
            total_threads: self.inner.workers.lock().len(),
        }
    }

    /// Whether the task queue is empty.
    pub fn is_queue_empty(&self) -> bool {
        self.inner.shared.state.lock().queue.is_empty()
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shared.state.lock().stop = true;
        self.shared.work_cv.notify_all();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}
