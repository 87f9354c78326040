//! Intersection cursor.

use tracing::debug;

use crate::optimize::{provably_empty, OptimizeContext};
use crate::{
    Cursor, Description, Empty, Error, Materialize, Ref, SizeHint, State, TagMap, Tags,
};

/// Intersection of any number of children.
///
/// The first child is the primary: it drives enumeration via `advance()`,
/// and every candidate it yields is probed against the rest via
/// `contains()`. Which child is primary affects cost only, never the result
/// set; [`crate::optimize`] moves the smallest child to the front.
///
/// An `And` with no children is the empty set, not the universe.
#[derive(Debug, Default)]
pub struct And {
    children: Vec<Box<dyn Cursor>>,
    current: Option<Ref>,
    state: State,
    tags: Tags,
}

impl And {
    pub fn new(children: Vec<Box<dyn Cursor>>) -> Self {
        And {
            children,
            ..And::default()
        }
    }

    pub fn add(&mut self, child: Box<dyn Cursor>) {
        self.children.push(child);
    }
}

impl Cursor for And {
    fn advance(&mut self) -> bool {
        if !self.state.is_active() {
            self.current = None;
            return false;
        }
        if self.children.is_empty() {
            self.state.finish();
            return false;
        }
        'primary: loop {
            let (head, probes) = self.children.split_at_mut(1);
            let primary = &mut head[0];
            if !primary.advance() {
                match primary.error() {
                    Some(err) => self.state.fail(err.clone()),
                    None => self.state.finish(),
                }
                self.current = None;
                return false;
            }
            let Some(candidate) = primary.result() else {
                continue 'primary;
            };
            for probe in probes.iter_mut() {
                if probe.contains(candidate) {
                    continue;
                }
                if let Some(err) = probe.error() {
                    self.state.fail(err.clone());
                    self.current = None;
                    return false;
                }
                continue 'primary;
            }
            self.current = Some(candidate);
            return true;
        }
    }

    fn result(&self) -> Option<Ref> {
        self.current
    }

    fn contains(&mut self, v: Ref) -> bool {
        if self.state.is_failed() || self.children.is_empty() {
            return false;
        }
        for child in &mut self.children {
            if child.contains(v) {
                continue;
            }
            if let Some(err) = child.error() {
                self.state.fail(err.clone());
            }
            return false;
        }
        self.current = Some(v);
        true
    }

    fn error(&self) -> Option<&Error> {
        self.state.error()
    }

    fn close(&mut self) {
        for child in &mut self.children {
            child.close();
        }
        self.current = None;
        self.state.finish();
    }

    fn reset(&mut self) {
        for child in &mut self.children {
            child.reset();
        }
        self.current = None;
        self.state.restart();
    }

    fn estimated_size(&self) -> SizeHint {
        let mut min = u64::MAX;
        for child in &self.children {
            let size = child.estimated_size();
            if size.exact && size.value == 0 {
                return SizeHint::exact(0);
            }
            min = min.min(size.value);
        }
        if self.children.is_empty() {
            return SizeHint::exact(0);
        }
        SizeHint::at_most(min)
    }

    fn describe(&self) -> Description {
        Description::And {
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
        // Probes were positioned on `v` by the contains() that accepted it.
        for child in &self.children {
            child.tag_results(dst);
        }
    }

    fn optimize(self: Box<Self>, ctx: &OptimizeContext<'_>) -> Box<dyn Cursor> {
        let And {
            children,
            current,
            state,
            tags,
        } = *self;

        let mut children: Vec<Box<dyn Cursor>> =
            children.into_iter().map(|c| c.optimize(ctx)).collect();
        if children.is_empty() {
            return Box::new(Empty::new());
        }

        // One provably empty child empties the whole intersection.
        if children.iter().any(|c| provably_empty(c.as_ref())) {
            for child in &mut children {
                child.close();
            }
            debug!("intersection contains an empty child, collapsing");
            return Box::new(Empty::new());
        }

        // Cheapest child drives; the rest are probed cheapest-first.
        children.sort_by_key(|c| c.estimated_size().value);

        // Composite probe children that stay small are cheaper to probe
        // through a materialized buffer once the primary yields more than
        // one candidate.
        let probed_repeatedly = children[0].estimated_size().value > 1;
        let limit = ctx.config.materialize_limit;
        if probed_repeatedly {
            for probe in children.iter_mut().skip(1) {
                let size = probe.estimated_size().value;
                if size as usize > limit || !probe.describe().is_composite() {
                    continue;
                }
                debug!(size, "buffering a repeatedly probed composite child");
                let inner = std::mem::replace(probe, Box::new(Empty::new()));
                *probe = Box::new(Materialize::with_limit(inner, limit));
            }
        }

        let mut and = And {
            children,
            current,
            state,
            tags,
        };

        if and.tags.is_empty() && and.children.len() == 1 {
            if let Some(only) = and.children.pop() {
                return only;
            }
        }

        // Offer the final shape to the store.
        if let Some(store) = ctx.store {
            if let Some(substitute) = store.substitute(&and.describe()) {
                debug!("store substituted an intersection shape");
                for child in &mut and.children {
                    child.close();
                }
                return substitute;
            }
        }

        Box::new(and)
    }
}
