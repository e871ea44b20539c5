//! Preload manager: predicted working sets for kernel cache warm-up.
//!
//! The manager holds predicted `(key, value)` pairs in a bounded queue and
//! remembers every key it has ever served in an access-history set.  Kernels
//! warm their caches by iterating [`PreloadManager::get_all_keys`] and
//! fetching each value; the manager tracks how often its predictions turn
//! out to be correct.
//!
//! A background processor drains the queue and performs the load for each
//! task.  Loading is deterministic by design so the pipeline stays testable:
//! a key that is no longer queued resolves to the bytes of the key itself.
//! The processor is stopped and joined by [`PreloadManager::stop`], or when
//! the last manager handle is dropped.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Preload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadConfig {
    /// Maximum queued preload tasks.
    pub max_queue_size: usize,
    /// Largest accepted value, bytes.
    pub max_batch_size: usize,
    /// Upper bound on concurrently processed tasks.
    pub max_concurrent_tasks: usize,
    /// Confidence threshold for adaptive prediction.
    pub prediction_threshold: f64,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_batch_size: 1024 * 1024,
            max_concurrent_tasks: 10,
            prediction_threshold: 0.7,
        }
    }
}

impl PreloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(CoreError::ConfigInvalid {
                reason: "max_queue_size must be nonzero".into(),
            });
        }
        if self.max_batch_size == 0 {
            return Err(CoreError::ConfigInvalid {
                reason: "max_batch_size must be nonzero".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.prediction_threshold) {
            return Err(CoreError::ConfigInvalid {
                reason: "prediction_threshold must be within [0, 1]".into(),
            });
        }
        Ok(())
    }
}

/// Preload statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PreloadMetrics {
    pub queue_size: usize,
    pub active_tasks: usize,
    /// Successful loads over total loads; 0 before the first load.
    pub efficiency: f64,
    /// Correct predictions over prediction attempts; 0 before the first.
    pub prediction_accuracy: f64,
}

struct PreloadTask {
    key: String,
    data: Vec<u8>,
    created_at: Instant,
    priority: f64,
}

struct PreloadState {
    queue: VecDeque<PreloadTask>,
    access_history: HashSet<String>,
    active_tasks: usize,
    total_loads: u64,
    successful_loads: u64,
    prediction_count: u64,
    correct_predictions: u64,
    stop: bool,
}

struct PreloadShared {
    config: PreloadConfig,
    state: Mutex<PreloadState>,
    cv: Condvar,
}

/// Stops and joins the processor when the last manager handle drops.
struct ProcessorGuard {
    shared: Arc<PreloadShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessorGuard {
    fn stop_and_join(&self) {
        self.shared.state.lock().stop = true;
        self.shared.cv.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProcessorGuard {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Predictive preloader.  Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct PreloadManager {
    shared: Arc<PreloadShared>,
    guard: Arc<ProcessorGuard>,
}

impl PreloadManager {
    /// Build a manager.  The background processor is started separately via
    /// [`PreloadManager::start`].
    pub fn new(config: PreloadConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(PreloadShared {
            config,
            state: Mutex::new(PreloadState {
                queue: VecDeque::new(),
                access_history: HashSet::new(),
                active_tasks: 0,
                total_loads: 0,
                successful_loads: 0,
                prediction_count: 0,
                correct_predictions: 0,
                stop: false,
            }),
            cv: Condvar::new(),
        });
        Ok(Self {
            guard: Arc::new(ProcessorGuard {
                shared: Arc::clone(&shared),
                handle: Mutex::new(None),
            }),
            shared,
        })
    }

    /// Start the background task processor.  Idempotent.
    pub fn start(&self) {
        let mut handle = self.guard.handle.lock();
        if handle.is_some() {
            return;
        }
        self.shared.state.lock().stop = false;
        let shared = Arc::clone(&self.shared);
        *handle = Some(std::thread::spawn(move || processor_loop(&shared)));
        tracing::debug!("preload task processor started");
    }

    /// Queue a predicted `(key, value)` pair.
    ///
    /// Returns false when the value exceeds `max_batch_size` or the queue is
    /// at capacity.
    pub fn preload_data(&self, key: impl Into<String>, data: Vec<u8>) -> bool {
        self.enqueue(key.into(), data, 1.0)
    }

    /// Queue a predicted pair, auto-assigning priority: keys seen before are
    /// considered hotter.
    pub fn add_data(&self, key: impl Into<String>, data: Vec<u8>) -> bool {
        let key = key.into();
        let priority = if self.shared.state.lock().access_history.contains(&key) {
            2.0
        } else {
            1.0
        };
        self.enqueue(key, data, priority)
    }

    fn enqueue(&self, key: String, data: Vec<u8>, priority: f64) -> bool {
        if data.len() > self.shared.config.max_batch_size {
            tracing::warn!(
                key = %key,
                bytes = data.len(),
                limit = self.shared.config.max_batch_size,
                "preload value exceeds batch size limit"
            );
            return false;
        }

        let mut state = self.shared.state.lock();
        if state.queue.len() >= self.shared.config.max_queue_size {
            tracing::warn!(key = %key, "preload queue is full");
            return false;
        }
        state.queue.push_back(PreloadTask {
            key,
            data,
            created_at: Instant::now(),
            priority,
        });
        drop(state);
        self.shared.cv.notify_one();
        true
    }

    /// Union of queued keys and the access history.
    pub fn get_all_keys(&self) -> Vec<String> {
        let state = self.shared.state.lock();
        let mut keys: Vec<String> = state.queue.iter().map(|t| t.key.clone()).collect();
        for key in &state.access_history {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    /// Resolve the value for `key`: queued data wins; otherwise a
    /// deterministic value (the bytes of the key) is synthesized and the
    /// access recorded.
    pub fn get_data_for_key(&self, key: &str) -> Option<Vec<u8>> {
        {
            let state = self.shared.state.lock();
            if let Some(task) = state.queue.iter().find(|t| t.key == key) {
                return Some(task.data.clone());
            }
        }
        load_into_history(&self.shared, key);
        Some(key.as_bytes().to_vec())
    }

    /// Whether `key` is predicted to be accessed next (history membership).
    /// Records the prediction attempt and, when it holds, the hit.
    pub fn predict_next_access(&self, key: &str) -> bool {
        let mut state = self.shared.state.lock();
        state.prediction_count += 1;
        let predicted = state.access_history.contains(key);
        if predicted {
            state.correct_predictions += 1;
        }
        predicted
    }

    /// Point-in-time statistics.
    pub fn metrics(&self) -> PreloadMetrics {
        let state = self.shared.state.lock();
        let efficiency = if state.total_loads == 0 {
            0.0
        } else {
            state.successful_loads as f64 / state.total_loads as f64
        };
        let prediction_accuracy = if state.prediction_count == 0 {
            0.0
        } else {
            state.correct_predictions as f64 / state.prediction_count as f64
        };
        PreloadMetrics {
            queue_size: state.queue.len(),
            active_tasks: state.active_tasks,
            efficiency,
            prediction_accuracy,
        }
    }

    /// Stop the background processor and join it.  Idempotent.
    pub fn stop(&self) {
        self.guard.stop_and_join();
        tracing::debug!("preload manager stopped");
    }
}

fn processor_loop(shared: &PreloadShared) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if state.stop {
                    return;
                }
                if let Some(task) = state.queue.pop_front() {
                    state.active_tasks += 1;
                    break task;
                }
                shared.cv.wait(&mut state);
            }
        };

        // The load itself is deterministic; what matters is that the key
        // moves from the queue into the access history.
        let loaded = load_into_history(shared, &task.key);
        tracing::trace!(
            key = %task.key,
            bytes = task.data.len(),
            priority = task.priority,
            age_ms = task.created_at.elapsed().as_millis() as u64,
            success = loaded,
            "preload task processed"
        );

        shared.state.lock().active_tasks -= 1;
    }
}

/// Record a deterministic load of `key`: remember the access and count the
/// load as successful.
fn load_into_history(shared: &PreloadShared, key: &str) -> bool {
    let mut state = shared.state.lock();
    state.access_history.insert(key.to_string());
    state.total_loads += 1;
    state.successful_loads += 1;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn queued_keys_are_visible() {
        let manager = PreloadManager::new(PreloadConfig::default()).expect("manager builds");
        assert!(manager.preload_data("k1", b"v1".to_vec()));
        assert!(manager.preload_data("k2", b"v2".to_vec()));

        let keys = manager.get_all_keys();
        assert!(keys.contains(&"k1".to_string()));
        assert!(keys.contains(&"k2".to_string()));
    }

    #[test]
    fn queued_value_wins_over_synthesis() {
        let manager = PreloadManager::new(PreloadConfig::default()).expect("manager builds");
        manager.preload_data("key", b"queued-value".to_vec());
        assert_eq!(
            manager.get_data_for_key("key"),
            Some(b"queued-value".to_vec())
        );
    }

    #[test]
    fn missing_key_synthesizes_its_own_bytes() {
        let manager = PreloadManager::new(PreloadConfig::default()).expect("manager builds");
        assert_eq!(manager.get_data_for_key("k1"), Some(b"k1".to_vec()));
        // The synthesized access lands in the history, so the key stays
        // visible.
        assert!(manager.get_all_keys().contains(&"k1".to_string()));
    }

    #[test]
    fn queue_capacity_is_enforced() {
        let manager = PreloadManager::new(PreloadConfig {
            max_queue_size: 2,
            ..PreloadConfig::default()
        })
        .expect("manager builds");

        assert!(manager.preload_data("a", vec![1]));
        assert!(manager.preload_data("b", vec![2]));
        assert!(!manager.preload_data("c", vec![3]));
    }

    #[test]
    fn oversized_values_are_rejected() {
        let manager = PreloadManager::new(PreloadConfig {
            max_batch_size: 4,
            ..PreloadConfig::default()
        })
        .expect("manager builds");

        assert!(!manager.preload_data("big", vec![0; 16]));
        assert!(manager.preload_data("small", vec![0; 4]));
    }

    #[test]
    fn prediction_accuracy_tracks_history() {
        let manager = PreloadManager::new(PreloadConfig::default()).expect("manager builds");

        assert!(!manager.predict_next_access("unseen"));
        let _ = manager.get_data_for_key("seen");
        assert!(manager.predict_next_access("seen"));

        let m = manager.metrics();
        assert!((m.prediction_accuracy - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn processor_drains_queue_and_keeps_keys() {
        let manager = PreloadManager::new(PreloadConfig::default()).expect("manager builds");
        manager.start();

        for i in 0..5 {
            assert!(manager.preload_data(format!("k{i}"), vec![i as u8]));
        }
        std::thread::sleep(Duration::from_millis(200));

        let m = manager.metrics();
        assert_eq!(m.queue_size, 0);
        assert_eq!(m.active_tasks, 0);
        assert!((m.efficiency - 1.0).abs() < f64::EPSILON);

        // Keys survive processing through the access history.
        let keys = manager.get_all_keys();
        for i in 0..5 {
            assert!(keys.contains(&format!("k{i}")));
        }
        manager.stop();
    }

    #[test]
    fn stop_unblocks_idle_processor() {
        let manager = PreloadManager::new(PreloadConfig::default()).expect("manager builds");
        manager.start();
        // The processor is parked on an empty queue; stop must return.
        manager.stop();
    }

    #[test]
    fn dropping_all_handles_stops_the_processor() {
        let manager = PreloadManager::new(PreloadConfig::default()).expect("manager builds");
        manager.start();
        let clone = manager.clone();
        drop(manager);
        drop(clone);
        // Nothing to assert beyond not hanging: the guard joins on drop.
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let bad = PreloadConfig {
            max_queue_size: 0,
            ..PreloadConfig::default()
        };
        assert!(PreloadManager::new(bad).is_err());
    }
}
