//! Explicit-value cursor.

use ahash::AHashSet;

use crate::optimize::OptimizeContext;
use crate::{Cursor, Description, Empty, Error, Ref, SizeHint, State, TagMap, Tags};

/// Enumerates a caller-supplied list of refs in insertion order.
///
/// Duplicate inserts collapse; membership is an exact hash lookup. Used for
/// literal constraints and as the workhorse leaf in tests.
#[derive(Debug, Default)]
pub struct Fixed {
    values: Vec<Ref>,
    members: AHashSet<Ref>,
    pos: usize,
    current: Option<Ref>,
    state: State,
    tags: Tags,
}

impl Fixed {
    pub fn new() -> Self {
        Fixed::default()
    }

    pub fn with_values(values: impl IntoIterator<Item = Ref>) -> Self {
        let mut fixed = Fixed::new();
        for value in values {
            fixed.add(value);
        }
        fixed
    }

    /// Append a value; duplicates are ignored.
    pub fn add(&mut self, value: Ref) {
        if self.members.insert(value) {
            self.values.push(value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Cursor for Fixed {
    fn advance(&mut self) -> bool {
        if !self.state.is_active() {
            self.current = None;
            return false;
        }
        if self.pos < self.values.len() {
            self.current = Some(self.values[self.pos]);
            self.pos += 1;
            true
        } else {
            self.state.finish();
            self.current = None;
            false
        }
    }

    fn result(&self) -> Option<Ref> {
        self.current
    }

    fn contains(&mut self, v: Ref) -> bool {
        if self.members.contains(&v) {
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
        self.values = Vec::new();
        self.members = AHashSet::new();
        self.current = None;
        self.state.finish();
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.current = None;
        self.state.restart();
    }

    fn estimated_size(&self) -> SizeHint {
        SizeHint::exact(self.values.len() as u64)
    }

    fn describe(&self) -> Description {
        Description::Fixed {
            size: self.estimated_size(),
            tags: self.tags.names().to_vec(),
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
