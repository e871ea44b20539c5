//! Kernel error types.

use fabric_core::error::CoreError;

/// Unified error type for the kernel crate.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The kernel is not in the running state.
    #[error("kernel {id} is not running")]
    NotRunning { id: String },

    /// Adding the child would make the composition tree cyclic.
    #[error("adding kernel {child} under {parent} would create a cycle")]
    CompositionCycle { parent: String, child: String },

    /// This kernel variant does not compose children.
    #[error("kernel {id} does not compose children")]
    ChildrenUnsupported { id: String },

    /// A core component failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
