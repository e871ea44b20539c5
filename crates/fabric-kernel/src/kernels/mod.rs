//! The kernel variants.
//!
//! Each variant is a thin shell over [`KernelRuntime`](crate::runtime::KernelRuntime):
//! the shared engine carries the queue, workers, cache, recovery, metrics,
//! and events, while the variant contributes its type tag, its specialized
//! operations, and (for the adaptive variants) its tuning rules.

mod architectural;
mod computational;
mod core;
mod crypto;
mod micro;
mod orchestration;
mod parent;
mod smart;

pub use self::architectural::ArchitecturalKernel;
pub use self::computational::ComputationalKernel;
pub use self::core::CoreKernel;
pub use self::crypto::CryptoKernel;
pub use self::micro::MicroKernel;
pub use self::orchestration::OrchestrationKernel;
pub use self::parent::ParentKernel;
pub use self::smart::SmartKernel;

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{KernelError, Result};
use crate::traits::Kernel;

/// Child map shared by the parent-capable variants.  Composition is a tree;
/// insertion rejects anything that would close a cycle.
#[derive(Default)]
pub(crate) struct ChildRegistry {
    children: DashMap<String, Arc<dyn Kernel>>,
}

impl ChildRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert `child` under `parent_id`, keyed by the child's id.
    pub(crate) fn add(&self, parent_id: &str, child: Arc<dyn Kernel>) -> Result<()> {
        let child_id = child.id();
        if child_id == parent_id || subtree_contains(&child, parent_id) {
            return Err(KernelError::CompositionCycle {
                parent: parent_id.to_string(),
                child: child_id,
            });
        }
        tracing::info!(parent = parent_id, child = %child_id, "child kernel attached");
        self.children.insert(child_id, child);
        Ok(())
    }

    pub(crate) fn remove(&self, child_id: &str) -> Option<Arc<dyn Kernel>> {
        let removed = self.children.remove(child_id).map(|(_, child)| child);
        if removed.is_some() {
            tracing::info!(child = child_id, "child kernel detached");
        }
        removed
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn Kernel>> {
        self.children
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

/// Whether `id` appears anywhere in the composition subtree rooted at
/// `kernel`.
pub(crate) fn subtree_contains(kernel: &Arc<dyn Kernel>, id: &str) -> bool {
    kernel
        .get_children()
        .iter()
        .any(|child| child.id() == id || subtree_contains(child, id))
}
