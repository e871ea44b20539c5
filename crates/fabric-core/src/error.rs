//! Core error types.
//!
//! Every fallible operation in this crate surfaces [`CoreError`], which is
//! the single error type returned by the cache, pool, recovery, and preload
//! components.  Cache misses and TTL expiry are *not* errors -- they surface
//! as `None` from the relevant lookup.

/// Unified error type for the fabric core components.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A configuration failed validation and was rejected.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    /// An operation was attempted on a component that is not running.
    #[error("component is not running")]
    NotRunning,

    /// A bounded queue is at capacity; the caller may retry later.
    #[error("queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// An argument was out of range or referenced an unknown resource.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// A capture, restore, checksum, or persistence step failed.
    #[error("recovery failed: {reason}")]
    RecoveryFailure { reason: String },

    /// A user-supplied callback failed.  Always isolated at the call site;
    /// this variant exists for internal bookkeeping and logs.
    #[error("callback failed: {reason}")]
    CallbackFailure { reason: String },

    /// A platform probe or acceleration primitive is unavailable.  Never
    /// fatal: callers fall back to the portable path.
    #[error("platform capability unavailable: {0}")]
    PlatformUnsupported(String),
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;
