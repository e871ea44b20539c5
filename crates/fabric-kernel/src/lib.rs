//! Fabric kernels.
//!
//! This crate provides the task-processing engines of the fabric runtime:
//!
//! - **[`traits`]** -- The [`Kernel`] capability surface: lifecycle,
//!   priority scheduling, metrics, events, warm-up, and child composition.
//! - **[`runtime`]** -- [`KernelRuntime`], the shared engine every variant
//!   wraps: priority queue + worker set, cache, recovery, telemetry, and
//!   event fan-out.
//! - **[`kernels`]** -- The seven variants: core, micro, smart,
//!   computational, architectural, crypto, parent, and the orchestration
//!   kernel driving the load balancer.
//! - **[`tunnel`]** -- [`TunnelManager`], inter-kernel links feeding the
//!   tunnel-bandwidth metric axis.
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! All kernels are `Send + Sync`; tasks are plain closures executed to
//! completion on OS worker threads.

pub mod error;
pub mod kernels;
pub mod runtime;
pub mod traits;
pub mod tunnel;

// Re-export the most commonly used types at the crate root for convenience.
pub use error::{KernelError, Result};
pub use kernels::{
    ArchitecturalKernel, ComputationalKernel, CoreKernel, CryptoKernel, MicroKernel,
    OrchestrationKernel, ParentKernel, SmartKernel,
};
pub use runtime::{KernelCache, KernelConfig, KernelRuntime};
pub use traits::{EventCallback, EventPayload, Kernel, TaskCallback};
pub use tunnel::TunnelManager;
