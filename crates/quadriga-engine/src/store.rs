//! The store-facing surface of the engine.

use serde::{Deserialize, Serialize};

use quadriga_quad::{Direction, Quad, Value};

use crate::{Cursor, Description, Ref, Result};

/// One mutation against a store: add a quad or remove one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delta {
    Add(Quad),
    Remove(Quad),
}

impl Delta {
    pub fn quad(&self) -> &Quad {
        match self {
            Delta::Add(quad) | Delta::Remove(quad) => quad,
        }
    }
}

/// What the engine needs from a backend.
///
/// The store owns the value-to-ref mapping and all physical indexing; the
/// engine only drives cursors over it. Refs are minted by the store and
/// are meaningless across stores. Read methods take `&self`; a store that
/// wants cross-thread sharing handles its own interior locking.
pub trait QuadStore {
    /// Ref for a value already known to the store. `Ok(None)` when the
    /// value has never been stored; resolving must not intern.
    fn resolve(&self, value: &Value) -> Result<Option<Ref>>;

    /// The value behind a node ref. Unknown refs are an error, not an
    /// absence: the engine only holds refs the store handed out.
    fn lookup(&self, r: Ref) -> Result<Value>;

    /// The full quad behind a quad ref.
    fn quad(&self, r: Ref) -> Result<Quad>;

    /// The node ref at `direction` of the quad behind `r`; `Ok(None)` for
    /// an absent label.
    fn quad_direction(&self, r: Ref, direction: Direction) -> Result<Option<Ref>>;

    /// Cursor over every quad whose `direction` position is `constraint`.
    fn scan(&self, direction: Direction, constraint: Ref) -> Result<Box<dyn Cursor>>;

    /// Cursor over every quad in the store.
    fn scan_all(&self) -> Result<Box<dyn Cursor>>;

    /// Apply one delta. Adding an existing quad is a no-op, as is removing
    /// an absent one; malformed quads are rejected.
    fn apply_delta(&mut self, delta: &Delta) -> Result<()>;

    /// Offer a cursor shape to the store. A backend that can answer the
    /// shape natively returns a replacement cursor carrying the same
    /// results and tags; the default declines everything.
    fn substitute(&self, _shape: &Description) -> Option<Box<dyn Cursor>> {
        None
    }
}
