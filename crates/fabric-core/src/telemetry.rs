//! Best-effort platform telemetry probes.
//!
//! Pull model: each call to [`TelemetryProbe::sample`] refreshes the
//! underlying counters and returns a point-in-time [`TelemetrySample`].
//! Values the host cannot provide read as 0; a probe failure is never
//! fatal.

use parking_lot::Mutex;
use sysinfo::{Components, System};

use crate::task::CoreClassUsage;

/// One telemetry reading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetrySample {
    /// Overall CPU usage in `[0, 1]`.
    pub cpu_usage: f64,
    /// Memory usage in `[0, 1]`.
    pub memory_usage: f64,
    /// Power draw in watts; 0 when the host exposes no counter.
    pub power_watts: f64,
    /// Hottest component temperature in Celsius; 0 when unavailable.
    pub temperature_celsius: f64,
    /// Per-core-class usage breakdown.
    pub core_class: CoreClassUsage,
}

/// Reusable probe over the host's resource counters.
pub struct TelemetryProbe {
    system: Mutex<System>,
}

impl TelemetryProbe {
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new();
        // Prime the CPU counters so the first real sample has a baseline.
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }

    /// Take a sample.  Each call refreshes CPU and memory counters.
    pub fn sample(&self) -> TelemetrySample {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu_usage = (system.global_cpu_info().cpu_usage() as f64 / 100.0).clamp(0.0, 1.0);
        let memory_usage = if system.total_memory() == 0 {
            0.0
        } else {
            (system.used_memory() as f64 / system.total_memory() as f64).clamp(0.0, 1.0)
        };

        let per_core: Vec<f64> = system
            .cpus()
            .iter()
            .map(|cpu| (cpu.cpu_usage() as f64 / 100.0).clamp(0.0, 1.0))
            .collect();
        drop(system);

        TelemetrySample {
            cpu_usage,
            memory_usage,
            power_watts: 0.0,
            temperature_celsius: hottest_component(),
            core_class: core_class_usage(&per_core, cpu_usage),
        }
    }
}

impl Default for TelemetryProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn hottest_component() -> f64 {
    let components = Components::new_with_refreshed_list();
    components
        .iter()
        .map(|c| c.temperature() as f64)
        .fold(0.0, f64::max)
}

/// Approximate the per-class breakdown from the per-core usages.
fn core_class_usage(per_core: &[f64], overall: f64) -> CoreClassUsage {
    if per_core.is_empty() {
        return CoreClassUsage::Unknown;
    }
    let avg = |slice: &[f64]| -> f64 {
        if slice.is_empty() {
            0.0
        } else {
            slice.iter().sum::<f64>() / slice.len() as f64
        }
    };

    if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        // Performance cores come first in the enumeration.
        let split = (per_core.len() / 2).max(1);
        CoreClassUsage::Asymmetric {
            performance_core_usage: avg(&per_core[..split]),
            efficiency_core_usage: avg(&per_core[split..]),
            neural_engine_usage: 0.0,
        }
    } else if cfg!(target_arch = "x86_64") {
        let physical = (per_core.len() / 2).max(1);
        CoreClassUsage::Smt {
            physical_core_usage: avg(&per_core[..physical]),
            logical_core_usage: overall,
            avx_usage: 0.0,
        }
    } else {
        CoreClassUsage::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_values_are_bounded() {
        let probe = TelemetryProbe::new();
        let sample = probe.sample();
        assert!((0.0..=1.0).contains(&sample.cpu_usage));
        assert!((0.0..=1.0).contains(&sample.memory_usage));
        assert!(sample.power_watts >= 0.0);
        assert!(sample.temperature_celsius >= 0.0);
    }

    #[test]
    fn repeated_samples_do_not_panic() {
        let probe = TelemetryProbe::new();
        for _ in 0..3 {
            let _ = probe.sample();
        }
    }
}
