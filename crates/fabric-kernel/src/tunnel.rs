//! Inter-kernel tunnels.
//!
//! A tunnel is a named, directionless link between two kernels with an
//! advertised bandwidth.  The orchestrator reads the per-kernel aggregate
//! bandwidth into the metric snapshots it hands the balancer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

const DEFAULT_TUNNEL_BANDWIDTH: f64 = 100.0;

/// Tunnel registry.  Cheaply cloneable; clones share state.
#[derive(Clone, Default)]
pub struct TunnelManager {
    tunnels: Arc<RwLock<HashMap<(String, String), f64>>>,
}

impl TunnelManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tunnel between two kernels with the default bandwidth.
    /// Returns false for self-loops and duplicates.
    pub fn create_tunnel(&self, from: impl Into<String>, to: impl Into<String>) -> bool {
        let key = (from.into(), to.into());
        if key.0 == key.1 {
            tracing::warn!(kernel = %key.0, "rejected self-tunnel");
            return false;
        }
        let mut tunnels = self.tunnels.write();
        if tunnels.contains_key(&key) {
            return false;
        }
        tracing::debug!(from = %key.0, to = %key.1, "tunnel created");
        tunnels.insert(key, DEFAULT_TUNNEL_BANDWIDTH);
        true
    }

    pub fn remove_tunnel(&self, from: &str, to: &str) {
        self.tunnels
            .write()
            .remove(&(from.to_string(), to.to_string()));
    }

    /// Update the advertised bandwidth of an existing tunnel.
    pub fn set_bandwidth(&self, from: &str, to: &str, bandwidth: f64) -> bool {
        let mut tunnels = self.tunnels.write();
        match tunnels.get_mut(&(from.to_string(), to.to_string())) {
            Some(slot) => {
                *slot = bandwidth.max(0.0);
                true
            }
            None => false,
        }
    }

    /// All tunnel endpoints.
    pub fn tunnels(&self) -> Vec<(String, String)> {
        self.tunnels.read().keys().cloned().collect()
    }

    /// Aggregate bandwidth available to `kernel_id` over all its tunnels.
    pub fn bandwidth(&self, kernel_id: &str) -> f64 {
        self.tunnels
            .read()
            .iter()
            .filter(|((from, to), _)| from == kernel_id || to == kernel_id)
            .map(|(_, bandwidth)| bandwidth)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_aggregate_bandwidth() {
        let tunnels = TunnelManager::new();
        assert!(tunnels.create_tunnel("a", "b"));
        assert!(tunnels.create_tunnel("a", "c"));
        assert!(!tunnels.create_tunnel("a", "b"));
        assert!(!tunnels.create_tunnel("a", "a"));

        assert_eq!(tunnels.bandwidth("a"), 200.0);
        assert_eq!(tunnels.bandwidth("b"), 100.0);
        assert_eq!(tunnels.bandwidth("unknown"), 0.0);
    }

    #[test]
    fn bandwidth_updates_apply() {
        let tunnels = TunnelManager::new();
        tunnels.create_tunnel("a", "b");
        assert!(tunnels.set_bandwidth("a", "b", 250.0));
        assert!(!tunnels.set_bandwidth("a", "missing", 250.0));
        assert_eq!(tunnels.bandwidth("b"), 250.0);
    }

    #[test]
    fn removal_clears_the_link() {
        let tunnels = TunnelManager::new();
        tunnels.create_tunnel("a", "b");
        tunnels.remove_tunnel("a", "b");
        assert!(tunnels.tunnels().is_empty());
        assert_eq!(tunnels.bandwidth("a"), 0.0);
    }
}
