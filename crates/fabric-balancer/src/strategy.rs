//! The closed strategy set.

use serde::{Deserialize, Serialize};

/// Scoring policy used by the load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BalancingStrategy {
    /// Score kernels by free resources.
    ResourceAware,
    /// Score kernels by per-workload efficiency.
    WorkloadSpecific,
    /// Fuse both scores, gated by adaptive thresholds.
    #[default]
    HybridAdaptive,
    /// Fallback policy; resolves to resource-aware selection.
    PriorityAdaptive,
    /// Pick the kernel with the lowest reported load.
    LeastLoaded,
    /// Rotate through kernels in index order.
    RoundRobin,
}

impl BalancingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalancingStrategy::ResourceAware => "resource_aware",
            BalancingStrategy::WorkloadSpecific => "workload_specific",
            BalancingStrategy::HybridAdaptive => "hybrid_adaptive",
            BalancingStrategy::PriorityAdaptive => "priority_adaptive",
            BalancingStrategy::LeastLoaded => "least_loaded",
            BalancingStrategy::RoundRobin => "round_robin",
        }
    }

    /// Parse a strategy name; unknown names resolve to
    /// [`BalancingStrategy::PriorityAdaptive`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "resource_aware" => BalancingStrategy::ResourceAware,
            "workload_specific" => BalancingStrategy::WorkloadSpecific,
            "hybrid_adaptive" => BalancingStrategy::HybridAdaptive,
            "least_loaded" => BalancingStrategy::LeastLoaded,
            "round_robin" => BalancingStrategy::RoundRobin,
            _ => BalancingStrategy::PriorityAdaptive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_roundtrip() {
        for strategy in [
            BalancingStrategy::ResourceAware,
            BalancingStrategy::WorkloadSpecific,
            BalancingStrategy::HybridAdaptive,
            BalancingStrategy::PriorityAdaptive,
            BalancingStrategy::LeastLoaded,
            BalancingStrategy::RoundRobin,
        ] {
            assert_eq!(BalancingStrategy::from_name(strategy.as_str()), strategy);
        }
    }

    #[test]
    fn unknown_name_falls_back() {
        assert_eq!(
            BalancingStrategy::from_name("definitely-not-a-strategy"),
            BalancingStrategy::PriorityAdaptive
        );
    }
}
