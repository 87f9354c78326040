//! Tree-rewriting entry point.
//!
//! Every cursor carries its own rewrite rule in [`Cursor::optimize`]; this
//! module supplies the context threaded through the pass and the public
//! entry point. Rewrites touch cost only, never the produced result set,
//! and a tree with nothing to improve comes back unchanged.

use tracing::debug;

use crate::store::QuadStore;
use crate::{Cursor, EngineConfig};

/// State available to every rewrite step.
///
/// When a store is present, composites offer their final shape to
/// [`QuadStore::substitute`] so the backend can answer it natively.
pub struct OptimizeContext<'a> {
    pub store: Option<&'a dyn QuadStore>,
    pub config: &'a EngineConfig,
}

impl<'a> OptimizeContext<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        OptimizeContext {
            store: None,
            config,
        }
    }

    pub fn with_store(store: &'a dyn QuadStore, config: &'a EngineConfig) -> Self {
        OptimizeContext {
            store: Some(store),
            config,
        }
    }
}

/// Rewrite `tree` into an equivalent tree that is no more expensive.
///
/// Children are rewritten before parents. The pass is idempotent and its
/// cost is bounded by the tree size.
pub fn optimize(tree: Box<dyn Cursor>, ctx: &OptimizeContext<'_>) -> Box<dyn Cursor> {
    let optimized = tree.optimize(ctx);
    debug!(shape = ?optimized.describe(), "optimized cursor tree");
    optimized
}

/// True when the size hint alone proves the cursor yields nothing.
pub(crate) fn provably_empty(cursor: &dyn Cursor) -> bool {
    let size = cursor.estimated_size();
    size.exact && size.value == 0
}
