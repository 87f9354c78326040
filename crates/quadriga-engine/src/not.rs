//! Difference cursor.

use tracing::debug;

use crate::optimize::{provably_empty, OptimizeContext};
use crate::{
    Cursor, Description, Empty, Error, Materialize, Ref, SizeHint, State, TagMap, Tags,
};

/// Universe minus excluded: enumerates universe values absent from the
/// excluded child; `contains(v)` is universe-membership and not
/// excluded-membership.
///
/// The excluded child is probed once per universe candidate, so the
/// optimizer gives it the same materialization treatment as And probes.
#[derive(Debug)]
pub struct Not {
    universe: Box<dyn Cursor>,
    excluded: Box<dyn Cursor>,
    current: Option<Ref>,
    state: State,
    tags: Tags,
}

impl Not {
    pub fn new(universe: Box<dyn Cursor>, excluded: Box<dyn Cursor>) -> Self {
        Not {
            universe,
            excluded,
            current: None,
            state: State::Active,
            tags: Tags::default(),
        }
    }
}

impl Cursor for Not {
    fn advance(&mut self) -> bool {
        if !self.state.is_active() {
            self.current = None;
            return false;
        }
        loop {
            if !self.universe.advance() {
                match self.universe.error() {
                    Some(err) => self.state.fail(err.clone()),
                    None => self.state.finish(),
                }
                self.current = None;
                return false;
            }
            let Some(candidate) = self.universe.result() else {
                continue;
            };
            if self.excluded.contains(candidate) {
                continue;
            }
            if let Some(err) = self.excluded.error() {
                self.state.fail(err.clone());
                self.current = None;
                return false;
            }
            self.current = Some(candidate);
            return true;
        }
    }

    fn result(&self) -> Option<Ref> {
        self.current
    }

    fn contains(&mut self, v: Ref) -> bool {
        if self.state.is_failed() {
            return false;
        }
        if !self.universe.contains(v) {
            if let Some(err) = self.universe.error() {
                self.state.fail(err.clone());
            }
            return false;
        }
        if self.excluded.contains(v) {
            return false;
        }
        if let Some(err) = self.excluded.error() {
            self.state.fail(err.clone());
            return false;
        }
        self.current = Some(v);
        true
    }

    fn error(&self) -> Option<&Error> {
        self.state.error()
    }

    fn close(&mut self) {
        self.universe.close();
        self.excluded.close();
        self.current = None;
        self.state.finish();
    }

    fn reset(&mut self) {
        self.universe.reset();
        self.excluded.reset();
        self.current = None;
        self.state.restart();
    }

    fn estimated_size(&self) -> SizeHint {
        let universe = self.universe.estimated_size();
        let excluded = self.excluded.estimated_size();
        if excluded.exact && excluded.value == 0 {
            return universe;
        }
        SizeHint::at_most(universe.value)
    }

    fn describe(&self) -> Description {
        Description::Not {
            size: self.estimated_size(),
            tags: self.tags.names().to_vec(),
            universe: Box::new(self.universe.describe()),
            excluded: Box::new(self.excluded.describe()),
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
        // The excluded child never holds a yielded result; only the
        // universe side is positioned.
        self.universe.tag_results(dst);
    }

    fn optimize(self: Box<Self>, ctx: &OptimizeContext<'_>) -> Box<dyn Cursor> {
        let Not {
            universe,
            excluded,
            current,
            state,
            tags,
        } = *self;

        let mut universe = universe.optimize(ctx);
        let mut excluded = excluded.optimize(ctx);

        if provably_empty(universe.as_ref()) {
            universe.close();
            excluded.close();
            debug!("difference over an empty universe, collapsing");
            return Box::new(Empty::new());
        }
        // Excluding nothing excludes nothing.
        if provably_empty(excluded.as_ref()) && tags.is_empty() {
            excluded.close();
            return universe;
        }

        // The excluded side is probed per universe candidate.
        let limit = ctx.config.materialize_limit;
        let excluded = if universe.estimated_size().value > 1
            && excluded.describe().is_composite()
            && excluded.estimated_size().value as usize <= limit
        {
            debug!(
                size = excluded.estimated_size().value,
                "buffering the excluded side of a difference"
            );
            Box::new(Materialize::with_limit(excluded, limit)) as Box<dyn Cursor>
        } else {
            excluded
        };

        let mut not = Not {
            universe,
            excluded,
            current,
            state,
            tags,
        };

        if let Some(store) = ctx.store {
            if let Some(substitute) = store.substitute(&not.describe()) {
                debug!("store substituted a difference shape");
                not.universe.close();
                not.excluded.close();
                return substitute;
            }
        }

        Box::new(not)
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
    fn test_difference_basic() {
        let mut not = Not::new(boxed(&[1, 2, 3, 4]), boxed(&[2, 4]));
        assert_eq!(drain(&mut not), vec![Ref(1), Ref(3)]);
    }

    #[test]
    fn test_contains_is_universe_and_not_excluded() {
        let mut not = Not::new(boxed(&[1, 2, 3]), boxed(&[2]));
        assert!(not.contains(Ref(1)));
        assert!(!not.contains(Ref(2)));
        // Outside the universe entirely.
        assert!(!not.contains(Ref(9)));
    }

    #[test]
    fn test_everything_excluded() {
        let mut not = Not::new(boxed(&[1, 2]), boxed(&[1, 2, 3]));
        assert_eq!(drain(&mut not), Vec::<Ref>::new());
        assert_eq!(not.error(), None);
    }

    #[test]
    fn test_reset_replays() {
        let mut not = Not::new(boxed(&[1, 2, 3]), boxed(&[2]));
        assert_eq!(drain(&mut not), vec![Ref(1), Ref(3)]);
        not.reset();
        assert_eq!(drain(&mut not), vec![Ref(1), Ref(3)]);
    }
}
