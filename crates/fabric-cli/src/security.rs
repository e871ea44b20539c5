//! Security manager: named policy plus an audit trail.
//!
//! Policy checks are opaque to the core; kernels and the supervisor consult
//! the manager and log audit events through it.

use std::sync::Arc;

use parking_lot::Mutex;

/// Process-wide security policy holder.  Cheaply cloneable.
#[derive(Clone)]
pub struct SecurityManager {
    policy: Arc<Mutex<String>>,
}

impl SecurityManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            policy: Arc::new(Mutex::new("default".to_string())),
        }
    }

    pub fn set_policy(&self, policy: impl Into<String>) {
        let policy = policy.into();
        tracing::info!(policy = %policy, "security policy set");
        *self.policy.lock() = policy;
    }

    pub fn policy(&self) -> String {
        self.policy.lock().clone()
    }

    /// Whether `action` is allowed under the active policy.  The only
    /// restrictive policy is `lockdown`, which denies everything.
    pub fn check_policy(&self, action: &str) -> bool {
        let allowed = self.policy.lock().as_str() != "lockdown";
        if !allowed {
            tracing::warn!(action, "action denied by lockdown policy");
        }
        allowed
    }

    /// Record an auditable event.
    pub fn audit_event(&self, event: &str, details: &str) {
        tracing::info!(target: "audit", event, details, policy = %self.policy(), "audit event");
    }
}

impl Default for SecurityManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockdown_denies_actions() {
        let security = SecurityManager::new();
        assert!(security.check_policy("enqueue"));

        security.set_policy("lockdown");
        assert!(!security.check_policy("enqueue"));

        security.set_policy("production");
        assert!(security.check_policy("enqueue"));
        assert_eq!(security.policy(), "production");
    }
}
