//! Fabric core building blocks.
//!
//! This crate provides the foundational components shared by every kernel in
//! the fabric runtime:
//!
//! - **[`task`]** -- The task and metrics model: [`TaskDescriptor`],
//!   [`TaskType`], and the metric snapshots exchanged with the balancer.
//! - **[`cache`]** -- [`DynamicCache`], a bounded LRU + TTL store with a
//!   background cleanup thread, auto-resize, and migration support.
//! - **[`pool`]** -- [`ThreadPool`], a bounded FIFO worker pool with a
//!   waitable drain and atomic reconfiguration.
//! - **[`recovery`]** -- [`RecoveryManager`], periodic state checkpoints via
//!   caller-supplied capture/restore callbacks.
//! - **[`preload`]** -- [`PreloadManager`], predictive warm-up data with
//!   access-history driven prediction accuracy tracking.
//! - **[`platform`]** -- [`PlatformProfile`], explicit process-wide platform
//!   detection that seeds cache and pool configuration.
//! - **[`telemetry`]** -- best-effort pull-model resource probes.
//! - **[`accel`]** -- hardware capability discovery and byte-buffer
//!   primitives with mandatory scalar fallback.
//! - **[`error`]** -- Unified error type via [`thiserror`].
//!
//! All public types are `Send + Sync` and cheaply cloneable where they are
//! meant to be shared; nothing in this crate requires an async runtime.

pub mod accel;
pub mod cache;
pub mod error;
pub mod platform;
pub mod pool;
pub mod preload;
pub mod recovery;
pub mod task;
pub mod telemetry;

// Re-export the most commonly used types at the crate root for convenience.
pub use accel::{AccelCapabilities, Accelerator};
pub use cache::{CacheConfig, CacheMetricsSnapshot, DynamicCache, EvictionCallback};
pub use error::{CoreError, Result};
pub use platform::PlatformProfile;
pub use pool::{CoreTopology, PoolConfig, PoolMetrics, ThreadPool};
pub use preload::{PreloadConfig, PreloadManager, PreloadMetrics};
pub use recovery::{
    CheckpointSink, FsSink, MemorySink, RecoveryConfig, RecoveryManager, RecoveryMetrics,
    RecoveryPoint,
};
pub use task::{
    CoreClassUsage, ExtendedKernelMetrics, KernelMetrics, KernelType, PerformanceMetrics,
    TaskDescriptor, TaskType,
};
pub use telemetry::{TelemetryProbe, TelemetrySample};
