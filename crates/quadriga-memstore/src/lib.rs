//! In-memory indexed quad store.
//!
//! [`MemStore`] owns a value interner and four posting indexes, one per
//! quad direction. Node values and stored quads share a single id space,
//! so a [`Ref`] from either side never collides. Scans hand out
//! [`PostingCursor`]s over roaring posting lists; the store also answers
//! intersection shapes natively through the engine's substitution hook
//! and snapshots itself to a compact binary form.

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use anyhow::Result as AnyResult;
use dashmap::DashMap;
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use quadriga_engine::{
    Cursor, Delta, Description, Empty, Error, OptimizeContext, QuadStore, Ref, Result,
    SizeHint, State, TagMap, Tags,
};
use quadriga_quad::{Direction, Quad, Value};

// ============================================================================
// Value interner
// ============================================================================

/// Maps node values to compact ids and back.
///
/// Also the id authority for quads: [`ValueInterner::allocate`] hands out
/// ids from the same counter, keeping node refs and quad refs in one
/// space. Ids start at 1; 0 is never issued.
#[derive(Debug)]
pub struct ValueInterner {
    value_to_id: DashMap<Value, u64>,
    id_to_value: DashMap<u64, Value>,
    next_id: AtomicU64,
}

impl ValueInterner {
    pub fn new() -> Self {
        ValueInterner {
            value_to_id: DashMap::new(),
            id_to_value: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Intern a value, returning its id.
    pub fn intern(&self, value: &Value) -> u64 {
        if let Some(id) = self.value_to_id.get(value) {
            return *id;
        }
        let id = self.allocate();
        self.value_to_id.insert(value.clone(), id);
        self.id_to_value.insert(id, value.clone());
        id
    }

    /// Look up an existing id without inserting.
    pub fn id_of(&self, value: &Value) -> Option<u64> {
        self.value_to_id.get(value).map(|id| *id)
    }

    /// Look up a value by id.
    pub fn lookup(&self, id: u64) -> Option<Value> {
        self.id_to_value.get(&id).map(|v| v.clone())
    }

    /// Claim a fresh id from the shared counter.
    pub fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.id_to_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_value.is_empty()
    }

    fn entries(&self) -> Vec<(u64, Value)> {
        self.id_to_value
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    fn from_entries(next_id: u64, entries: Vec<(u64, Value)>) -> Self {
        let interner = ValueInterner {
            value_to_id: DashMap::new(),
            id_to_value: DashMap::new(),
            next_id: AtomicU64::new(next_id),
        };
        for (id, value) in entries {
            interner.value_to_id.insert(value.clone(), id);
            interner.id_to_value.insert(id, value);
        }
        interner
    }
}

impl Default for ValueInterner {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Store
// ============================================================================

/// A stored quad, positions resolved to node ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct QuadRefs {
    subject: u64,
    predicate: u64,
    object: u64,
    label: Option<u64>,
}

impl QuadRefs {
    fn get(&self, direction: Direction) -> Option<u64> {
        match direction {
            Direction::Subject => Some(self.subject),
            Direction::Predicate => Some(self.predicate),
            Direction::Object => Some(self.object),
            Direction::Label => self.label,
        }
    }
}

const SNAPSHOT_MAGIC: &[u8; 4] = b"QMEM";
const SNAPSHOT_VERSION: u32 = 1;

/// In-memory quad store with per-direction posting indexes.
#[derive(Debug, Default)]
pub struct MemStore {
    interner: ValueInterner,
    quads: AHashMap<u64, QuadRefs>,
    by_quad: AHashMap<QuadRefs, u64>,
    postings: AHashMap<(Direction, u64), RoaringTreemap>,
    all: RoaringTreemap,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    pub fn quad_count(&self) -> usize {
        self.quads.len()
    }

    pub fn node_count(&self) -> usize {
        self.interner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    /// Insert a quad, interning its values. Returns the quad's ref; adding
    /// an already-present quad returns the existing ref.
    pub fn add_quad(&mut self, quad: &Quad) -> Result<Ref> {
        quad.validate()
            .map_err(|err| Error::InvalidQuad(err.to_string()))?;
        let refs = QuadRefs {
            subject: self.interner.intern(&quad.subject),
            predicate: self.interner.intern(&quad.predicate),
            object: self.interner.intern(&quad.object),
            label: quad.label.as_ref().map(|label| self.interner.intern(label)),
        };
        if let Some(&existing) = self.by_quad.get(&refs) {
            return Ok(Ref(existing));
        }
        let qid = self.interner.allocate();
        self.quads.insert(qid, refs);
        self.by_quad.insert(refs, qid);
        for direction in Direction::ALL {
            if let Some(node) = refs.get(direction) {
                self.postings
                    .entry((direction, node))
                    .or_default()
                    .insert(qid);
            }
        }
        self.all.insert(qid);
        Ok(Ref(qid))
    }

    /// Remove a quad. Returns whether anything was removed; removing an
    /// absent quad is a no-op and never interns its values.
    pub fn remove_quad(&mut self, quad: &Quad) -> Result<bool> {
        let Some(refs) = self.refs_of(quad) else {
            return Ok(false);
        };
        let Some(qid) = self.by_quad.remove(&refs) else {
            return Ok(false);
        };
        self.quads.remove(&qid);
        for direction in Direction::ALL {
            if let Some(node) = refs.get(direction) {
                let emptied = match self.postings.get_mut(&(direction, node)) {
                    Some(posting) => {
                        posting.remove(qid);
                        posting.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    self.postings.remove(&(direction, node));
                }
            }
        }
        self.all.remove(qid);
        Ok(true)
    }

    fn refs_of(&self, quad: &Quad) -> Option<QuadRefs> {
        Some(QuadRefs {
            subject: self.interner.id_of(&quad.subject)?,
            predicate: self.interner.id_of(&quad.predicate)?,
            object: self.interner.id_of(&quad.object)?,
            label: match &quad.label {
                Some(label) => Some(self.interner.id_of(label)?),
                None => None,
            },
        })
    }

    fn node_value(&self, id: u64) -> Result<Value> {
        self.interner
            .lookup(id)
            .ok_or_else(|| Error::StoreLookup(format!("unknown node ref #{id}")))
    }

    fn posting(&self, direction: Direction, node: u64) -> RoaringTreemap {
        self.postings
            .get(&(direction, node))
            .cloned()
            .unwrap_or_default()
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Serialize to the binary snapshot format. Posting indexes are not
    /// stored; they are rebuilt on load.
    pub fn to_bytes(&self) -> AnyResult<Vec<u8>> {
        let nodes = self.interner.entries();
        let quads: Vec<(u64, QuadRefs)> =
            self.quads.iter().map(|(id, refs)| (*id, *refs)).collect();
        let next_id = self.interner.next_id.load(Ordering::SeqCst);
        let payload = bincode::serialize(&(next_id, nodes, quads))?;

        let mut result = Vec::with_capacity(payload.len() + 8);
        result.extend_from_slice(SNAPSHOT_MAGIC);
        result.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        result.extend_from_slice(&payload);
        Ok(result)
    }

    /// Deserialize from the binary snapshot format.
    pub fn from_bytes(bytes: &[u8]) -> AnyResult<Self> {
        if bytes.len() < 8 || &bytes[0..4] != SNAPSHOT_MAGIC {
            return Err(anyhow::anyhow!("not a quadriga memstore snapshot"));
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into()?);
        if version != SNAPSHOT_VERSION {
            return Err(anyhow::anyhow!("unsupported snapshot version: {version}"));
        }

        let (next_id, nodes, quads): (u64, Vec<(u64, Value)>, Vec<(u64, QuadRefs)>) =
            bincode::deserialize(&bytes[8..])?;

        let mut store = MemStore {
            interner: ValueInterner::from_entries(next_id, nodes),
            ..MemStore::default()
        };
        for (qid, refs) in quads {
            store.quads.insert(qid, refs);
            store.by_quad.insert(refs, qid);
            for direction in Direction::ALL {
                if let Some(node) = refs.get(direction) {
                    store
                        .postings
                        .entry((direction, node))
                        .or_default()
                        .insert(qid);
                }
            }
            store.all.insert(qid);
        }
        debug!(
            quads = store.quad_count(),
            nodes = store.node_count(),
            "loaded memstore snapshot"
        );
        Ok(store)
    }
}

impl QuadStore for MemStore {
    fn resolve(&self, value: &Value) -> Result<Option<Ref>> {
        Ok(self.interner.id_of(value).map(Ref))
    }

    fn lookup(&self, r: Ref) -> Result<Value> {
        self.node_value(r.0)
    }

    fn quad(&self, r: Ref) -> Result<Quad> {
        let Some(refs) = self.quads.get(&r.0) else {
            return Err(Error::StoreLookup(format!("unknown quad ref {r}")));
        };
        Ok(Quad {
            subject: self.node_value(refs.subject)?,
            predicate: self.node_value(refs.predicate)?,
            object: self.node_value(refs.object)?,
            label: match refs.label {
                Some(id) => Some(self.node_value(id)?),
                None => None,
            },
        })
    }

    fn quad_direction(&self, r: Ref, direction: Direction) -> Result<Option<Ref>> {
        let Some(refs) = self.quads.get(&r.0) else {
            return Err(Error::StoreLookup(format!("unknown quad ref {r}")));
        };
        Ok(refs.get(direction).map(Ref))
    }

    fn scan(&self, direction: Direction, constraint: Ref) -> Result<Box<dyn Cursor>> {
        Ok(Box::new(PostingCursor::scan(
            self.posting(direction, constraint.0),
            direction,
            constraint,
        )))
    }

    fn scan_all(&self) -> Result<Box<dyn Cursor>> {
        Ok(Box::new(PostingCursor::all(self.all.clone())))
    }

    fn apply_delta(&mut self, delta: &Delta) -> Result<()> {
        match delta {
            Delta::Add(quad) => {
                self.add_quad(quad)?;
            }
            Delta::Remove(quad) => {
                self.remove_quad(quad)?;
            }
        }
        Ok(())
    }

    /// Answers intersections whose children are all direction scans by
    /// intersecting the posting lists up front.
    fn substitute(&self, shape: &Description) -> Option<Box<dyn Cursor>> {
        let Description::And { children, .. } = shape else {
            return None;
        };
        if children.is_empty() {
            return None;
        }
        let mut merged: Option<RoaringTreemap> = None;
        for child in children {
            let Description::Scan {
                direction,
                constraint,
                ..
            } = child
            else {
                return None;
            };
            let posting = self.posting(*direction, constraint.0);
            merged = Some(match merged {
                Some(acc) => acc & posting,
                None => posting,
            });
        }
        let merged = merged?;

        let mut tags = Vec::new();
        shape.collect_tags(&mut tags);
        debug!(
            postings = children.len(),
            size = merged.len(),
            "substituted a posting intersection"
        );
        let mut cursor = PostingCursor::intersection(merged);
        for tag in &tags {
            cursor.add_tag(tag);
        }
        Some(Box::new(cursor))
    }
}

// ============================================================================
// Posting cursors
// ============================================================================

/// Where a posting cursor's treemap came from, for `describe()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Scan {
        direction: Direction,
        constraint: Ref,
    },
    All,
    Intersection,
}

/// Cursor over a roaring posting list of quad refs, in ascending order.
///
/// Owns a copy of the posting, so it keeps enumerating the state it was
/// created from even while the store mutates.
#[derive(Debug)]
pub struct PostingCursor {
    values: RoaringTreemap,
    source: Source,
    pos: u64,
    current: Option<Ref>,
    state: State,
    tags: Tags,
}

impl PostingCursor {
    fn scan(values: RoaringTreemap, direction: Direction, constraint: Ref) -> Self {
        Self::with_source(values, Source::Scan {
            direction,
            constraint,
        })
    }

    fn all(values: RoaringTreemap) -> Self {
        Self::with_source(values, Source::All)
    }

    fn intersection(values: RoaringTreemap) -> Self {
        Self::with_source(values, Source::Intersection)
    }

    fn with_source(values: RoaringTreemap, source: Source) -> Self {
        PostingCursor {
            values,
            source,
            pos: 0,
            current: None,
            state: State::Active,
            tags: Tags::default(),
        }
    }
}

impl Cursor for PostingCursor {
    fn advance(&mut self) -> bool {
        if !self.state.is_active() {
            self.current = None;
            return false;
        }
        match self.values.select(self.pos) {
            Some(v) => {
                self.current = Some(Ref(v));
                self.pos += 1;
                true
            }
            None => {
                self.state.finish();
                self.current = None;
                false
            }
        }
    }

    fn result(&self) -> Option<Ref> {
        self.current
    }

    fn contains(&mut self, v: Ref) -> bool {
        if self.values.contains(v.0) {
            self.current = Some(v);
            true
        } else {
            false
        }
    }

    fn error(&self) -> Option<&Error> {
        None
    }

    fn close(&mut self) {
        self.values = RoaringTreemap::new();
        self.current = None;
        self.state.finish();
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.current = None;
        self.state.restart();
    }

    fn estimated_size(&self) -> SizeHint {
        SizeHint::exact(self.values.len())
    }

    fn describe(&self) -> Description {
        let size = self.estimated_size();
        let tags = self.tags.names().to_vec();
        match self.source {
            Source::Scan {
                direction,
                constraint,
            } => Description::Scan {
                direction,
                constraint,
                size,
                tags,
            },
            Source::All => Description::Custom {
                name: "memstore/all".into(),
                size,
                tags,
            },
            Source::Intersection => Description::Custom {
                name: "memstore/intersection".into(),
                size,
                tags,
            },
        }
    }

    fn add_tag(&mut self, tag: &str) {
        self.tags.add(tag);
    }

    fn tag_results(&self, dst: &mut TagMap) {
        let Some(v) = self.current else {
            return;
        };
        self.tags.write(v, dst);
    }

    fn optimize(self: Box<Self>, _ctx: &OptimizeContext<'_>) -> Box<dyn Cursor> {
        if self.values.is_empty() && self.tags.is_empty() {
            Box::new(Empty::new())
        } else {
            self
        }
    }
}
