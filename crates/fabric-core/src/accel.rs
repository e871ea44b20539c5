//! Hardware acceleration probe and byte-buffer primitives.
//!
//! Capability discovery reports which vector extensions the host exposes;
//! the three buffer primitives always succeed on well-formed input by
//! falling back to scalar loops.  The scalar path is the contract -- the
//! vector units only make it faster when the compiler can use them.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Discovered acceleration capabilities.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccelCapabilities {
    pub neon: bool,
    pub amx: bool,
    pub sve: bool,
    pub neural_engine: bool,
    pub avx2: bool,
    pub avx512: bool,
    /// Textual platform name, e.g. `linux/x86_64`.
    pub platform: String,
}

/// Acceleration driver with mandatory scalar fallback.
#[derive(Debug, Clone)]
pub struct Accelerator {
    capabilities: AccelCapabilities,
}

impl Accelerator {
    /// Probe the host.  Never fails; a bare host simply reports no
    /// capabilities.
    #[must_use]
    pub fn new() -> Self {
        let capabilities = detect_capabilities();
        tracing::debug!(
            platform = %capabilities.platform,
            neon = capabilities.neon,
            avx2 = capabilities.avx2,
            avx512 = capabilities.avx512,
            "acceleration capabilities detected"
        );
        Self { capabilities }
    }

    pub fn capabilities(&self) -> &AccelCapabilities {
        &self.capabilities
    }

    /// Copy `input` into `output`.  Buffers must have equal length.
    pub fn accelerate_copy(&self, input: &[u8], output: &mut [u8]) -> Result<()> {
        check_lengths(input.len(), output.len())?;
        output.copy_from_slice(input);
        Ok(())
    }

    /// Element-wise wrapping addition of `a` and `b` into `out`.
    pub fn accelerate_add(&self, a: &[u8], b: &[u8], out: &mut [u8]) -> Result<()> {
        check_lengths(a.len(), b.len())?;
        check_lengths(a.len(), out.len())?;
        for ((x, y), o) in a.iter().zip(b).zip(out.iter_mut()) {
            *o = x.wrapping_add(*y);
        }
        Ok(())
    }

    /// Element-wise wrapping multiplication of `a` and `b` into `out`.
    pub fn accelerate_mul(&self, a: &[u8], b: &[u8], out: &mut [u8]) -> Result<()> {
        check_lengths(a.len(), b.len())?;
        check_lengths(a.len(), out.len())?;
        for ((x, y), o) in a.iter().zip(b).zip(out.iter_mut()) {
            *o = x.wrapping_mul(*y);
        }
        Ok(())
    }
}

impl Default for Accelerator {
    fn default() -> Self {
        Self::new()
    }
}

fn check_lengths(a: usize, b: usize) -> Result<()> {
    if a != b {
        return Err(CoreError::InvalidArgument {
            reason: format!("buffer length mismatch: {a} vs {b}"),
        });
    }
    Ok(())
}

#[cfg(target_arch = "x86_64")]
fn detect_capabilities() -> AccelCapabilities {
    AccelCapabilities {
        avx2: std::arch::is_x86_feature_detected!("avx2"),
        avx512: std::arch::is_x86_feature_detected!("avx512f"),
        platform: platform_name(),
        ..AccelCapabilities::default()
    }
}

#[cfg(target_arch = "aarch64")]
fn detect_capabilities() -> AccelCapabilities {
    AccelCapabilities {
        neon: std::arch::is_aarch64_feature_detected!("neon"),
        sve: std::arch::is_aarch64_feature_detected!("sve"),
        // AMX and the Neural Engine have no stable userspace probe.
        amx: false,
        neural_engine: cfg!(target_os = "macos"),
        platform: platform_name(),
        ..AccelCapabilities::default()
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_capabilities() -> AccelCapabilities {
    AccelCapabilities {
        platform: platform_name(),
        ..AccelCapabilities::default()
    }
}

fn platform_name() -> String {
    format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH)
}
