//! Recovery manager: periodic state checkpoints with restore-by-id.
//!
//! The manager does not know what "state" is.  The owner supplies a capture
//! callback that serializes its state to bytes and a restore callback that
//! applies bytes back; the manager adds identity, integrity checking,
//! persistence through a [`CheckpointSink`], retention, and recovery
//! metrics.
//!
//! Checkpoint creation and restoration are serialized against each other and
//! against configuration changes by a single operation lock;
//! [`RecoveryManager::is_recovery_in_progress`] is observable from any
//! thread.  Capture and restore callbacks run with the internal state lock
//! released.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Serializes state to bytes.
pub type CaptureFn = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;
/// Applies bytes back onto live state; returns false on failure.
pub type RestoreFn = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;
/// Receives human-readable failure descriptions.
pub type ErrorFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Opaque byte storage keyed by checkpoint id.  Retention is enforced by the
/// manager, never by the sink.
pub trait CheckpointSink: Send + Sync {
    fn save(&self, id: &str, bytes: &[u8]) -> bool;
    fn load(&self, id: &str) -> Option<Vec<u8>>;
    fn delete(&self, id: &str);
}

/// In-memory checkpoint storage.
#[derive(Default)]
pub struct MemorySink {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointSink for MemorySink {
    fn save(&self, id: &str, bytes: &[u8]) -> bool {
        self.blobs.insert(id.to_string(), bytes.to_vec());
        true
    }

    fn load(&self, id: &str) -> Option<Vec<u8>> {
        self.blobs.get(id).map(|entry| entry.value().clone())
    }

    fn delete(&self, id: &str) {
        self.blobs.remove(id);
    }
}

/// Filesystem checkpoint storage: one `<id>.ckpt` file per point.
pub struct FsSink {
    dir: PathBuf,
}

impl FsSink {
    /// Create the sink, making sure the storage directory exists.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|err| CoreError::RecoveryFailure {
            reason: format!("cannot create checkpoint directory: {err}"),
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.ckpt"))
    }
}

impl CheckpointSink for FsSink {
    fn save(&self, id: &str, bytes: &[u8]) -> bool {
        match std::fs::write(self.path_for(id), bytes) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(id, error = %err, "failed to persist checkpoint");
                false
            }
        }
    }

    fn load(&self, id: &str) -> Option<Vec<u8>> {
        std::fs::read(self.path_for(id)).ok()
    }

    fn delete(&self, id: &str) {
        let _ = std::fs::remove_file(self.path_for(id));
    }
}

/// A timestamped, checksummed captured-state blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPoint {
    /// Opaque unique id; external references use only this.
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Captured state bytes.
    pub state: Vec<u8>,
    /// Whether validation passed at capture time.
    pub is_consistent: bool,
    /// SHA-256 of the state, hex-encoded.
    pub checksum: String,
    /// State size in bytes.
    pub size: usize,
    pub metadata: HashMap<String, String>,
}

/// Manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Retention: points beyond this are dropped oldest-first.
    pub max_recovery_points: usize,
    /// How often the supervisor should checkpoint; informational here.
    pub checkpoint_interval: Duration,
    pub enable_auto_recovery: bool,
    /// Verify checksum before restore and consistency at capture.
    pub enable_state_validation: bool,
    /// Largest accepted captured state, bytes.
    pub max_point_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_recovery_points: 10,
            checkpoint_interval: Duration::from_secs(30),
            enable_auto_recovery: true,
            enable_state_validation: true,
            max_point_size: 100 * 1024 * 1024,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_recovery_points == 0 {
            return Err(CoreError::ConfigInvalid {
                reason: "max_recovery_points must be at least 1".into(),
            });
        }
        if self.checkpoint_interval.is_zero() {
            return Err(CoreError::ConfigInvalid {
                reason: "checkpoint_interval must be nonzero".into(),
            });
        }
        if self.max_point_size == 0 {
            return Err(CoreError::ConfigInvalid {
                reason: "max_point_size must be nonzero".into(),
            });
        }
        Ok(())
    }
}

/// Recovery statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RecoveryMetrics {
    pub total_points: usize,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    /// Rolling average of successful restore duration, milliseconds.
    pub average_recovery_time_ms: f64,
    pub last_recovery: Option<DateTime<Utc>>,
}

struct RecoveryState {
    config: RecoveryConfig,
    points: HashMap<String, RecoveryPoint>,
    metrics: RecoveryMetrics,
    last_checkpoint: Option<DateTime<Utc>>,
}

struct RecoveryInner {
    /// Serializes create/restore/configure against each other.
    ops: Mutex<()>,
    state: Mutex<RecoveryState>,
    sink: Arc<dyn CheckpointSink>,
    capture: RwLock<Option<CaptureFn>>,
    restore: RwLock<Option<RestoreFn>>,
    on_error: RwLock<Option<ErrorFn>>,
    in_progress: AtomicBool,
}

/// Periodic checkpoint manager.  Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct RecoveryManager {
    inner: Arc<RecoveryInner>,
}

impl RecoveryManager {
    /// Build a manager over the given sink.
    pub fn new(config: RecoveryConfig, sink: Arc<dyn CheckpointSink>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RecoveryInner {
                ops: Mutex::new(()),
                state: Mutex::new(RecoveryState {
                    config,
                    points: HashMap::new(),
                    metrics: RecoveryMetrics::default(),
                    last_checkpoint: None,
                }),
                sink,
                capture: RwLock::new(None),
                restore: RwLock::new(None),
                on_error: RwLock::new(None),
                in_progress: AtomicBool::new(false),
            }),
        })
    }

    /// Build a manager with in-memory checkpoint storage.
    pub fn in_memory(config: RecoveryConfig) -> Result<Self> {
        Self::new(config, Arc::new(MemorySink::new()))
    }

    pub fn set_state_capture(&self, capture: CaptureFn) {
        *self.inner.capture.write() = Some(capture);
    }

    pub fn set_state_restore(&self, restore: RestoreFn) {
        *self.inner.restore.write() = Some(restore);
    }

    pub fn set_error_callback(&self, on_error: ErrorFn) {
        *self.inner.on_error.write() = Some(on_error);
    }

    /// Capture state and persist a new recovery point.
    ///
    /// Returns the new point id, or an empty string when any step fails.
    pub fn create_recovery_point(&self) -> String {
        let _ops = self.inner.ops.lock();
        let started = Instant::now();

        let Some(capture) = self.inner.capture.read().clone() else {
            self.handle_error("no state capture callback installed");
            return String::new();
        };
        // Invoked with no internal lock held.
        let state_bytes = capture();

        let (validation, max_size) = {
            let state = self.inner.state.lock();
            (
                state.config.enable_state_validation,
                state.config.max_point_size,
            )
        };
        if state_bytes.len() > max_size {
            self.handle_error(&format!(
                "captured state of {} bytes exceeds limit of {max_size}",
                state_bytes.len()
            ));
            return String::new();
        }

        let checksum = checksum_hex(&state_bytes);
        let is_consistent = !validation || !state_bytes.is_empty();
        let id = Uuid::now_v7().simple().to_string();

        if !self.inner.sink.save(&id, &state_bytes) {
            self.handle_error(&format!("failed to persist recovery point {id}"));
            return String::new();
        }

        let point = RecoveryPoint {
            id: id.clone(),
            created_at: Utc::now(),
            size: state_bytes.len(),
            state: state_bytes,
            is_consistent,
            checksum,
            metadata: HashMap::new(),
        };

        {
            let mut state = self.inner.state.lock();
            state.points.insert(id.clone(), point);
            state.last_checkpoint = Some(Utc::now());
            Self::enforce_retention(&mut state, self.inner.sink.as_ref());
            state.metrics.total_points = state.points.len();
        }

        tracing::info!(
            id = %id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "recovery point created"
        );
        id
    }

    /// Load, validate, and apply the recovery point `id`.
    pub fn restore_from_point(&self, id: &str) -> bool {
        let _ops = self.inner.ops.lock();
        self.inner.in_progress.store(true, Ordering::Release);
        let started = Instant::now();

        let outcome = self.restore_inner(id);

        {
            let mut state = self.inner.state.lock();
            let now = Utc::now();
            match outcome {
                Ok(()) => {
                    let elapsed_ms = started.elapsed().as_millis() as f64;
                    let m = &mut state.metrics;
                    m.successful_recoveries += 1;
                    let n = m.successful_recoveries as f64;
                    m.average_recovery_time_ms =
                        (m.average_recovery_time_ms * (n - 1.0) + elapsed_ms) / n;
                    m.last_recovery = Some(now);
                }
                Err(_) => {
                    state.metrics.failed_recoveries += 1;
                }
            }
        }
        self.inner.in_progress.store(false, Ordering::Release);

        match outcome {
            Ok(()) => {
                tracing::info!(id, elapsed_ms = started.elapsed().as_millis() as u64, "state restored");
                true
            }
            Err(err) => {
                self.handle_error(&format!("restore from {id} failed: {err}"));
                false
            }
        }
    }

    fn restore_inner(&self, id: &str) -> Result<()> {
        let bytes = self
            .inner
            .sink
            .load(id)
            .ok_or_else(|| CoreError::RecoveryFailure {
                reason: format!("recovery point {id} not found in sink"),
            })?;

        let (validation, expected_checksum) = {
            let state = self.inner.state.lock();
            let expected = state.points.get(id).map(|p| p.checksum.clone());
            (state.config.enable_state_validation, expected)
        };

        if validation {
            if bytes.is_empty() {
                return Err(CoreError::RecoveryFailure {
                    reason: "recovery point is empty".into(),
                });
            }
            if let Some(expected) = expected_checksum {
                let actual = checksum_hex(&bytes);
                if actual != expected {
                    return Err(CoreError::RecoveryFailure {
                        reason: format!("checksum mismatch for {id}"),
                    });
                }
            }
        }

        let Some(restore) = self.inner.restore.read().clone() else {
            return Err(CoreError::RecoveryFailure {
                reason: "no state restore callback installed".into(),
            });
        };
        // Invoked with no internal lock held.
        if !restore(&bytes) {
            return Err(CoreError::RecoveryFailure {
                reason: "restore callback reported failure".into(),
            });
        }
        Ok(())
    }

    /// Remove a recovery point from both the index and the sink.
    pub fn delete_recovery_point(&self, id: &str) {
        let mut state = self.inner.state.lock();
        if state.points.remove(id).is_some() {
            self.inner.sink.delete(id);
            state.metrics.total_points = state.points.len();
            tracing::debug!(id, "recovery point deleted");
        }
    }

    /// Validate and apply a new configuration; enforces retention under the
    /// new limit immediately.
    pub fn set_configuration(&self, config: RecoveryConfig) -> Result<()> {
        config.validate()?;
        let _ops = self.inner.ops.lock();
        let mut state = self.inner.state.lock();
        state.config = config;
        Self::enforce_retention(&mut state, self.inner.sink.as_ref());
        state.metrics.total_points = state.points.len();
        Ok(())
    }

    pub fn configuration(&self) -> RecoveryConfig {
        self.inner.state.lock().config.clone()
    }

    pub fn metrics(&self) -> RecoveryMetrics {
        self.inner.state.lock().metrics
    }

    pub fn last_checkpoint_time(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().last_checkpoint
    }

    pub fn is_recovery_in_progress(&self) -> bool {
        self.inner.in_progress.load(Ordering::Acquire)
    }

    /// Ids of the retained points, oldest first.
    pub fn point_ids(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        let mut points: Vec<_> = state.points.values().collect();
        points.sort_by_key(|p| p.created_at);
        points.iter().map(|p| p.id.clone()).collect()
    }

    fn enforce_retention(state: &mut RecoveryState, sink: &dyn CheckpointSink) {
        let limit = state.config.max_recovery_points;
        while state.points.len() > limit {
            let oldest = state
                .points
                .values()
                .min_by_key(|p| p.created_at)
                .map(|p| p.id.clone());
            match oldest {
                Some(id) => {
                    state.points.remove(&id);
                    sink.delete(&id);
                    tracing::debug!(id = %id, "dropped recovery point past retention limit");
                }
                None => break,
            }
        }
    }

    fn handle_error(&self, message: &str) {
        tracing::error!(target: "recovery", "{message}");
        let cb = self.inner.on_error.read().clone();
        if let Some(cb) = cb {
            cb(message);
        }
    }
}

fn checksum_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
