//! Union cursor.

use tracing::debug;

use crate::optimize::{provably_empty, OptimizeContext};
use crate::{Cursor, Description, Empty, Error, Ref, SizeHint, State, TagMap, Tags};

/// Lookahead slot per child in merge mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Unprimed,
    Value(Ref),
    Done,
}

/// Union of any number of children.
///
/// The default mode enumerates children in sequence and makes no ordering or
/// deduplication promise: the output is the multiset union in child order.
/// [`Or::merge_sorted`] instead interleaves children that each yield
/// ascending refs into one ascending stream, collapsing duplicates as a
/// consequence of the merge; feeding it unsorted children produces
/// meaningless order.
///
/// `contains()` is true iff any child contains the value, short-circuiting
/// on the first hit in either mode.
#[derive(Debug, Default)]
pub struct Or {
    children: Vec<Box<dyn Cursor>>,
    merge: bool,
    active: usize,
    pending: Vec<Slot>,
    last: Option<Ref>,
    current: Option<Ref>,
    current_child: Option<usize>,
    state: State,
    tags: Tags,
}

impl Or {
    pub fn new(children: Vec<Box<dyn Cursor>>) -> Self {
        Or {
            children,
            ..Or::default()
        }
    }

    /// Ordered union over children that each yield ascending refs.
    pub fn merge_sorted(children: Vec<Box<dyn Cursor>>) -> Self {
        Or {
            children,
            merge: true,
            ..Or::default()
        }
    }

    pub fn add(&mut self, child: Box<dyn Cursor>) {
        self.children.push(child);
    }

    fn advance_sequential(&mut self) -> bool {
        while self.active < self.children.len() {
            let child = &mut self.children[self.active];
            if child.advance() {
                self.current = child.result();
                self.current_child = Some(self.active);
                return true;
            }
            if let Some(err) = child.error() {
                self.state.fail(err.clone());
                self.current = None;
                return false;
            }
            self.active += 1;
        }
        self.state.finish();
        self.current = None;
        false
    }

    fn advance_merge(&mut self) -> bool {
        if self.pending.len() != self.children.len() {
            self.pending.resize(self.children.len(), Slot::Unprimed);
        }
        // Refill unprimed slots, stepping over repeats of the last yielded
        // value so duplicates within one child collapse too.
        for i in 0..self.children.len() {
            while self.pending[i] == Slot::Unprimed
                || self.last.is_some_and(|last| self.pending[i] == Slot::Value(last))
            {
                self.refill(i);
                if self.state.is_failed() {
                    self.current = None;
                    return false;
                }
            }
        }

        let mut min: Option<Ref> = None;
        let mut min_child = 0;
        for (i, slot) in self.pending.iter().enumerate() {
            if let Slot::Value(v) = slot {
                if min.map_or(true, |m| *v < m) {
                    min = Some(*v);
                    min_child = i;
                }
            }
        }
        let Some(v) = min else {
            self.state.finish();
            self.current = None;
            return false;
        };

        // Children sitting on this value are not stepped past it until the
        // next advance; they stay positioned on it for tag collection.
        for slot in self.pending.iter_mut() {
            if *slot == Slot::Value(v) {
                *slot = Slot::Unprimed;
            }
        }

        self.last = Some(v);
        self.current = Some(v);
        self.current_child = Some(min_child);
        true
    }

    fn refill(&mut self, i: usize) {
        let child = &mut self.children[i];
        if child.advance() {
            self.pending[i] = match child.result() {
                Some(v) => Slot::Value(v),
                None => Slot::Done,
            };
        } else {
            if let Some(err) = child.error() {
                self.state.fail(err.clone());
            }
            self.pending[i] = Slot::Done;
        }
    }
}

impl Cursor for Or {
    fn advance(&mut self) -> bool {
        if !self.state.is_active() {
            self.current = None;
            return false;
        }
        if self.merge {
            self.advance_merge()
        } else {
            self.advance_sequential()
        }
    }

    fn result(&self) -> Option<Ref> {
        self.current
    }

    fn contains(&mut self, v: Ref) -> bool {
        if self.state.is_failed() {
            return false;
        }
        for (i, child) in self.children.iter_mut().enumerate() {
            if child.contains(v) {
                self.current = Some(v);
                self.current_child = Some(i);
                return true;
            }
            if let Some(err) = child.error() {
                self.state.fail(err.clone());
                return false;
            }
        }
        false
    }

    fn error(&self) -> Option<&Error> {
        self.state.error()
    }

    fn close(&mut self) {
        for child in &mut self.children {
            child.close();
        }
        self.pending = Vec::new();
        self.current = None;
        self.state.finish();
    }

    fn reset(&mut self) {
        for child in &mut self.children {
            child.reset();
        }
        for slot in &mut self.pending {
            *slot = Slot::Unprimed;
        }
        self.active = 0;
        self.last = None;
        self.current = None;
        self.current_child = None;
        self.state.restart();
    }

    fn estimated_size(&self) -> SizeHint {
        let mut total = 0u64;
        let mut all_exact = true;
        for child in &self.children {
            let size = child.estimated_size();
            total = total.saturating_add(size.value);
            all_exact &= size.exact;
        }
        // The sequential multiset union has an exact size when every child
        // does; the merge collapses duplicates, so its size is a bound.
        SizeHint {
            value: total,
            exact: all_exact && !self.merge,
        }
    }

    fn describe(&self) -> Description {
        Description::Or {
            merge_sorted: self.merge,
            size: self.estimated_size(),
            tags: self.tags.names().to_vec(),
            children: self.children.iter().map(|c| c.describe()).collect(),
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
        if let Some(i) = self.current_child {
            if let Some(child) = self.children.get(i) {
                child.tag_results(dst);
            }
        }
    }

    fn optimize(self: Box<Self>, ctx: &OptimizeContext<'_>) -> Box<dyn Cursor> {
        let Or {
            children,
            merge,
            current,
            current_child,
            state,
            tags,
            ..
        } = *self;

        let children: Vec<Box<dyn Cursor>> =
            children.into_iter().map(|c| c.optimize(ctx)).collect();

        // Empty children contribute nothing to a union.
        let mut kept: Vec<Box<dyn Cursor>> = Vec::with_capacity(children.len());
        for mut child in children {
            if provably_empty(child.as_ref()) {
                child.close();
            } else {
                kept.push(child);
            }
        }
        if kept.is_empty() {
            debug!("union of empty children, collapsing");
            return Box::new(Empty::new());
        }
        // A merge still collapses duplicates within its single child, so
        // only the sequential mode can unwrap.
        if tags.is_empty() && !merge && kept.len() == 1 {
            if let Some(only) = kept.pop() {
                return only;
            }
        }

        let mut or = Or {
            children: kept,
            merge,
            active: 0,
            pending: Vec::new(),
            last: None,
            current,
            current_child,
            state,
            tags,
        };

        if let Some(store) = ctx.store {
            if let Some(substitute) = store.substitute(&or.describe()) {
                debug!("store substituted a union shape");
                for child in &mut or.children {
                    child.close();
                }
                return substitute;
            }
        }

        Box::new(or)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Fixed;

    fn boxed(values: &[u64]) -> Box<dyn Cursor> {
        Box::new(Fixed::with_values(values.iter().map(|&v| Ref(v))))
    }

    fn drain(cursor: &mut dyn Cursor) -> Vec<Ref> {
        let mut out = Vec::new();
        while cursor.advance() {
            if let Some(v) = cursor.result() {
                out.push(v);
            }
        }
        out
    }

    #[test]
    fn test_sequential_keeps_duplicates_and_child_order() {
        let mut or = Or::new(vec![boxed(&[1, 2, 3]), boxed(&[2, 3, 4])]);
        assert_eq!(
            drain(&mut or),
            vec![Ref(1), Ref(2), Ref(3), Ref(2), Ref(3), Ref(4)]
        );
    }

    #[test]
    fn test_contains_any_child() {
        let mut or = Or::new(vec![boxed(&[1, 2, 3]), boxed(&[2, 3, 4])]);
        assert!(or.contains(Ref(4)));
        assert!(or.contains(Ref(1)));
        assert!(!or.contains(Ref(9)));
    }

    #[test]
    fn test_merge_sorted_collapses_duplicates() {
        let mut or = Or::merge_sorted(vec![boxed(&[1, 3, 5]), boxed(&[2, 3, 6]), boxed(&[3, 4])]);
        assert_eq!(
            drain(&mut or),
            vec![Ref(1), Ref(2), Ref(3), Ref(4), Ref(5), Ref(6)]
        );
    }

    #[test]
    fn test_merge_sorted_single_child() {
        let mut or = Or::merge_sorted(vec![boxed(&[1, 2, 9])]);
        assert_eq!(drain(&mut or), vec![Ref(1), Ref(2), Ref(9)]);
    }

    #[test]
    fn test_empty_union_exhausts_immediately() {
        let mut or = Or::new(vec![]);
        assert!(!or.advance());
        let mut merged = Or::merge_sorted(vec![]);
        assert!(!merged.advance());
    }

    #[test]
    fn test_size_sums_children() {
        let or = Or::new(vec![boxed(&[1, 2, 3]), boxed(&[2, 3])]);
        assert_eq!(or.estimated_size(), SizeHint::exact(5));
        let merged = Or::merge_sorted(vec![boxed(&[1, 2, 3]), boxed(&[2, 3])]);
        assert_eq!(merged.estimated_size(), SizeHint::at_most(5));
    }

    #[test]
    fn test_merge_tags_bind_the_yielded_value() {
        let mut a = Fixed::with_values([Ref(1), Ref(3)]);
        a.add_tag("a");
        let mut or = Or::merge_sorted(vec![Box::new(a), boxed(&[2, 3])]);

        assert!(or.advance());
        assert_eq!(or.result(), Some(Ref(1)));
        let mut bindings = TagMap::new();
        or.tag_results(&mut bindings);
        assert_eq!(bindings.get("a"), Some(&Ref(1)));

        assert!(or.advance());
        assert_eq!(or.result(), Some(Ref(2)));
        let mut bindings = TagMap::new();
        or.tag_results(&mut bindings);
        assert_eq!(bindings.get("a"), None);

        // Both children sit on 3; the yield is collapsed and the tagged
        // child is still positioned on it.
        assert!(or.advance());
        assert_eq!(or.result(), Some(Ref(3)));
        let mut bindings = TagMap::new();
        or.tag_results(&mut bindings);
        assert_eq!(bindings.get("a"), Some(&Ref(3)));

        assert!(!or.advance());
    }

    #[test]
    fn test_tags_follow_the_yielding_child() {
        let mut a = Fixed::with_values([Ref(1)]);
        a.add_tag("a");
        let mut b = Fixed::with_values([Ref(2)]);
        b.add_tag("b");
        let mut or = Or::new(vec![Box::new(a), Box::new(b)]);

        assert!(or.advance());
        let mut bindings = TagMap::new();
        or.tag_results(&mut bindings);
        assert_eq!(bindings.get("a"), Some(&Ref(1)));
        assert_eq!(bindings.get("b"), None);

        assert!(or.advance());
        let mut bindings = TagMap::new();
        or.tag_results(&mut bindings);
        assert_eq!(bindings.get("b"), Some(&Ref(2)));
        assert_eq!(bindings.get("a"), None);
    }
}
