//! Energy controller: power limits and energy policy.
//!
//! Feeds the energy axis of the resource score.  The controller does not
//! read hardware counters itself; the owner pushes observed draw through
//! [`EnergyController::record_power`].

use std::sync::Arc;

use parking_lot::Mutex;

struct EnergyState {
    power_limit_watts: f64,
    current_power_watts: f64,
    dynamic_scaling: bool,
    policy: String,
}

/// Process-wide energy budget tracking.  Cheaply cloneable.
#[derive(Clone)]
pub struct EnergyController {
    state: Arc<Mutex<EnergyState>>,
}

impl EnergyController {
    /// Build a controller with the given power budget in watts.
    #[must_use]
    pub fn new(power_limit_watts: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(EnergyState {
                power_limit_watts,
                current_power_watts: 0.0,
                dynamic_scaling: false,
                policy: "balanced".to_string(),
            })),
        }
    }

    pub fn set_power_limit(&self, watts: f64) {
        self.state.lock().power_limit_watts = watts;
        tracing::info!(watts, "power limit updated");
    }

    pub fn power_limit(&self) -> f64 {
        self.state.lock().power_limit_watts
    }

    /// Record the latest observed draw.
    pub fn record_power(&self, watts: f64) {
        self.state.lock().current_power_watts = watts.max(0.0);
    }

    pub fn current_power(&self) -> f64 {
        self.state.lock().current_power_watts
    }

    /// Fraction of the budget in use, in `[0, 1]` when within limits.
    pub fn utilization(&self) -> f64 {
        let state = self.state.lock();
        if state.power_limit_watts <= 0.0 {
            0.0
        } else {
            state.current_power_watts / state.power_limit_watts
        }
    }

    pub fn enable_dynamic_scaling(&self, enable: bool) {
        self.state.lock().dynamic_scaling = enable;
    }

    pub fn is_dynamic_scaling_enabled(&self) -> bool {
        self.state.lock().dynamic_scaling
    }

    pub fn set_policy(&self, policy: impl Into<String>) {
        let policy = policy.into();
        tracing::info!(policy = %policy, "energy policy updated");
        self.state.lock().policy = policy;
    }

    pub fn policy(&self) -> String {
        self.state.lock().policy.clone()
    }
}

impl Default for EnergyController {
    fn default() -> Self {
        Self::new(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_power_and_utilization() {
        let controller = EnergyController::new(50.0);
        controller.record_power(25.0);
        assert_eq!(controller.current_power(), 25.0);
        assert!((controller.utilization() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_readings_clamp_to_zero() {
        let controller = EnergyController::new(50.0);
        controller.record_power(-3.0);
        assert_eq!(controller.current_power(), 0.0);
    }

    #[test]
    fn policy_roundtrip() {
        let controller = EnergyController::default();
        controller.set_policy("performance");
        assert_eq!(controller.policy(), "performance");
        controller.enable_dynamic_scaling(true);
        assert!(controller.is_dynamic_scaling_enabled());
    }
}
