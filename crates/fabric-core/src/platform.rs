//! Process-wide platform profile.
//!
//! The profile is detected once at startup and passed by reference to the
//! components that need it; there is no hidden global.  It seeds the
//! default cache and pool configurations for the host the process landed
//! on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::pool::{CoreTopology, PoolConfig};

/// Detected host characteristics and the defaults derived from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformProfile {
    /// Human-readable platform name, e.g. `linux/x86_64`.
    pub name: String,
    pub logical_cores: usize,
    pub physical_cores: usize,
    pub topology: CoreTopology,
}

impl PlatformProfile {
    /// Detect the current host.
    #[must_use]
    pub fn detect() -> Self {
        let logical_cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let physical_cores = sysinfo::System::new()
            .physical_core_count()
            .unwrap_or(logical_cores)
            .max(1);

        let topology = if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            // Asymmetric layout; without a reliable per-class probe, split
            // the physical cores evenly between the two classes.
            let performance = (physical_cores / 2).max(1);
            CoreTopology::Asymmetric {
                use_performance_cores: true,
                use_efficiency_cores: true,
                performance_cores: performance,
                efficiency_cores: (physical_cores - performance).max(1),
            }
        } else if cfg!(target_arch = "x86_64") {
            CoreTopology::Smt {
                use_hyperthreading: logical_cores > physical_cores,
                physical_cores,
                logical_cores,
            }
        } else {
            CoreTopology::Uniform
        };

        let profile = Self {
            name: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
            logical_cores,
            physical_cores,
            topology,
        };
        tracing::debug!(
            platform = %profile.name,
            logical = logical_cores,
            physical = physical_cores,
            "platform profile detected"
        );
        profile
    }

    /// Default cache configuration for this host.
    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            initial_capacity: 256,
            default_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(10),
        }
    }

    /// Default pool configuration for this host.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_threads: 2.min(self.logical_cores).max(1),
            max_threads: self.logical_cores.max(2),
            queue_size: 1000,
            stack_size: 2 * 1024 * 1024,
            topology: self.topology,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detected_profile_is_coherent() {
        let profile = PlatformProfile::detect();
        assert!(profile.logical_cores >= 1);
        assert!(profile.physical_cores >= 1);
        assert!(profile.name.contains('/'));
    }

    #[test]
    fn derived_configs_validate() {
        let profile = PlatformProfile::detect();
        assert!(profile.pool_config().validate().is_ok());
        assert!(profile.cache_config().initial_capacity > 0);
    }
}
