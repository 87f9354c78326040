//! Quadriga query engine: a lazy iterator algebra over quad stores.
//!
//! A query is a tree of cursors, each implementing the uniform [`Cursor`]
//! contract:
//! - **Enumeration**: `advance()` / `result()` step through the result set
//!   lazily.
//! - **Membership**: `contains()` answers "is this ref in the set" without
//!   enumerating, which is how composites probe their children.
//! - **Cost hints**: `estimated_size()` feeds the optimizer, never
//!   correctness.
//! - **Lifecycle**: sticky errors via `error()`, restart via `reset()`,
//!   resource release via `close()`.
//!
//! Leaf cursors are [`Fixed`] (explicit ref list), [`Empty`], and the index
//! scans a [`QuadStore`] hands out. Composites are [`And`], [`Or`], [`Not`],
//! and the bounded caching adapter [`Materialize`]. [`optimize`] rewrites a
//! tree into an equivalent cheaper one, and [`apply_transaction`] applies
//! batched mutations fail-stop.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error as ThisError;

use quadriga_quad::Direction;

mod and;
mod fixed;
mod materialize;
mod not;
mod optimize;
mod or;
mod store;
mod transaction;

pub use and::And;
pub use fixed::Fixed;
pub use materialize::Materialize;
pub use not::Not;
pub use optimize::{optimize, OptimizeContext};
pub use or::Or;
pub use store::{Delta, QuadStore};
pub use transaction::{apply_transaction, Transaction};

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Refs and size hints
// ============================================================================

/// Opaque identifier a store assigns to a node value or a stored quad.
///
/// The engine never inspects the payload; equality and ordering are only
/// meaningful between refs minted by the same store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Ref(pub u64);

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cost hint: approximate result count plus whether the count is exact.
///
/// Consumed only by the optimizer; an inexact value is an upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeHint {
    pub value: u64,
    pub exact: bool,
}

impl SizeHint {
    pub fn exact(value: u64) -> Self {
        SizeHint { value, exact: true }
    }

    pub fn at_most(value: u64) -> Self {
        SizeHint {
            value,
            exact: false,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Engine-level failures.
///
/// Cursor errors are sticky: once a cursor fails, `error()` keeps reporting
/// the same failure and `advance()` keeps signaling exhaustion.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// A ref or value could not be resolved against the store.
    #[error("store lookup failed: {0}")]
    StoreLookup(String),
    /// The store rejected a malformed quad.
    #[error("invalid quad: {0}")]
    InvalidQuad(String),
    /// A transaction stopped at its first failing delta.
    #[error("transaction aborted at delta {index}: {reason}")]
    TransactionApply { index: usize, reason: String },
}

/// Terminal-state tracking shared by every cursor.
///
/// Transitions run forward only: `Active` to `Done` on exhaustion, `Active`
/// to `Failed` on the first error. `restart` begins a new enumeration pass
/// but never leaves `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Active,
    Done,
    Failed(Error),
}

impl Default for State {
    fn default() -> Self {
        State::Active
    }
}

impl State {
    pub fn is_active(&self) -> bool {
        matches!(self, State::Active)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, State::Failed(_))
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            State::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Record the first error; later calls keep the original.
    pub fn fail(&mut self, err: Error) {
        if !self.is_failed() {
            *self = State::Failed(err);
        }
    }

    pub fn finish(&mut self) {
        if self.is_active() {
            *self = State::Done;
        }
    }

    pub fn restart(&mut self) {
        if !self.is_failed() {
            *self = State::Active;
        }
    }
}

// ============================================================================
// Tags
// ============================================================================

/// Bindings collected from a positioned cursor tree: tag name to current ref.
pub type TagMap = HashMap<String, Ref>;

/// Named bindings attached to one cursor; every result passing through is
/// recorded under each name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tags {
    names: Vec<String>,
}

impl Tags {
    pub fn add(&mut self, tag: &str) {
        if !self.names.iter().any(|t| t == tag) {
            self.names.push(tag.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn write(&self, value: Ref, dst: &mut TagMap) {
        for name in &self.names {
            dst.insert(name.clone(), value);
        }
    }
}

// ============================================================================
// Shape descriptions
// ============================================================================

/// Shape of a cursor tree: node kinds, cost estimates, and tags.
///
/// Serializable for logs; store substitution hooks pattern-match on it to
/// recognize shapes they can answer natively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Description {
    Empty,
    Fixed {
        size: SizeHint,
        tags: Vec<String>,
    },
    Scan {
        direction: Direction,
        constraint: Ref,
        size: SizeHint,
        tags: Vec<String>,
    },
    And {
        size: SizeHint,
        tags: Vec<String>,
        children: Vec<Description>,
    },
    Or {
        merge_sorted: bool,
        size: SizeHint,
        tags: Vec<String>,
        children: Vec<Description>,
    },
    Not {
        size: SizeHint,
        tags: Vec<String>,
        universe: Box<Description>,
        excluded: Box<Description>,
    },
    Materialize {
        limit: usize,
        size: SizeHint,
        tags: Vec<String>,
        child: Box<Description>,
    },
    /// A store-native cursor; the name is backend-chosen.
    Custom {
        name: String,
        size: SizeHint,
        tags: Vec<String>,
    },
}

impl Description {
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Description::And { .. } | Description::Or { .. } | Description::Not { .. }
        )
    }

    /// All tag names in this subtree, outermost first, deduplicated.
    pub fn collect_tags(&self, dst: &mut Vec<String>) {
        fn push(dst: &mut Vec<String>, tags: &[String]) {
            for tag in tags {
                if !dst.iter().any(|t| t == tag) {
                    dst.push(tag.clone());
                }
            }
        }
        match self {
            Description::Empty => {}
            Description::Fixed { tags, .. }
            | Description::Scan { tags, .. }
            | Description::Custom { tags, .. } => push(dst, tags),
            Description::And { tags, children, .. }
            | Description::Or { tags, children, .. } => {
                push(dst, tags);
                for child in children {
                    child.collect_tags(dst);
                }
            }
            Description::Not {
                tags,
                universe,
                excluded,
                ..
            } => {
                push(dst, tags);
                universe.collect_tags(dst);
                excluded.collect_tags(dst);
            }
            Description::Materialize { tags, child, .. } => {
                push(dst, tags);
                child.collect_tags(dst);
            }
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Default [`EngineConfig::materialize_limit`]: past this many buffered
/// entries a materialization aborts to passthrough.
pub const DEFAULT_MATERIALIZE_LIMIT: usize = 100_000;

/// Engine tuning knobs, threaded through the optimizer and into
/// [`Materialize`] cursors it inserts. No global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub materialize_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            materialize_limit: DEFAULT_MATERIALIZE_LIMIT,
        }
    }
}

// ============================================================================
// The cursor contract
// ============================================================================

/// The uniform contract every query-tree node implements.
///
/// A cursor owns its children exclusively; closing a parent closes the whole
/// subtree. No cursor is safe for concurrent use from multiple threads, but
/// independent trees over the same store may run in parallel when the store
/// allows concurrent reads.
pub trait Cursor: fmt::Debug {
    /// Step to the next result. Returns false on exhaustion and keeps
    /// returning false thereafter; check [`Cursor::error`] to tell "done"
    /// from "failed".
    fn advance(&mut self) -> bool;

    /// The value at the cursor after a successful [`Cursor::advance`] or
    /// [`Cursor::contains`] hit; `None` before the first advance or after
    /// exhaustion.
    fn result(&self) -> Option<Ref>;

    /// Membership test, without enumerating where the implementation can do
    /// better. A hit positions the cursor at `v` for [`Cursor::tag_results`].
    fn contains(&mut self, v: Ref) -> bool;

    /// First error encountered; sticky once set.
    fn error(&self) -> Option<&Error>;

    /// Release buffers and store cursors, recursively. Idempotent; the single
    /// cancellation primitive. After closing, the cursor reports exhaustion.
    fn close(&mut self);

    /// Restart enumeration from the beginning. Never clears a sticky error.
    fn reset(&mut self);

    /// Cost hint for the optimizer; never used for correctness.
    fn estimated_size(&self) -> SizeHint;

    /// This subtree's shape.
    fn describe(&self) -> Description;

    fn add_tag(&mut self, tag: &str);

    /// Record name-to-ref bindings for the current result, recursing into
    /// children positioned on it. No-op when unpositioned.
    fn tag_results(&self, dst: &mut TagMap);

    /// Rewrite this subtree into an equivalent, cheaper one; children first.
    /// Returns the input unchanged when there is nothing to improve.
    fn optimize(self: Box<Self>, ctx: &OptimizeContext<'_>) -> Box<dyn Cursor>;
}

// ============================================================================
// Empty cursor
// ============================================================================

/// Yields nothing and contains nothing; exact size zero.
///
/// The optimizer collapses provably empty subtrees to this.
#[derive(Debug, Default)]
pub struct Empty {
    state: State,
    tags: Tags,
}

impl Empty {
    pub fn new() -> Self {
        Empty::default()
    }
}

impl Cursor for Empty {
    fn advance(&mut self) -> bool {
        self.state.finish();
        false
    }

    fn result(&self) -> Option<Ref> {
        None
    }

    fn contains(&mut self, _v: Ref) -> bool {
        false
    }

    fn error(&self) -> Option<&Error> {
        None
    }

    fn close(&mut self) {
        self.state.finish();
    }

    fn reset(&mut self) {
        self.state.restart();
    }

    fn estimated_size(&self) -> SizeHint {
        SizeHint::exact(0)
    }

    fn describe(&self) -> Description {
        Description::Empty
    }

    fn add_tag(&mut self, tag: &str) {
        self.tags.add(tag);
    }

    fn tag_results(&self, _dst: &mut TagMap) {}

    fn optimize(self: Box<Self>, _ctx: &OptimizeContext<'_>) -> Box<dyn Cursor> {
        self
    }
}
