//! Bounded caching adapter.

use ahash::AHashMap;
use tracing::debug;

use crate::optimize::OptimizeContext;
use crate::{
    Cursor, Description, Error, Ref, SizeHint, State, TagMap, Tags, DEFAULT_MATERIALIZE_LIMIT,
};

/// Fill progress of the internal buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Still pulling from the child; the buffer holds a prefix of its
    /// results.
    Filling,
    /// Child exhausted within the limit. The buffer is the complete
    /// result sequence and the lookup answers membership in O(1).
    Ready,
    /// The limit was crossed. The lookup is gone and both `advance` and
    /// `contains` forward to the child once the buffered tail is served.
    Passthrough,
}

enum Pull {
    Pulled,
    Exhausted,
    Failed,
}

/// Caching wrapper over a single child.
///
/// Values pulled from the child are returned to the caller and copied
/// into an internal buffer together with the child's tag bindings at
/// that moment. While the pull count stays at or below `limit`,
/// `contains` answers from a hash lookup and a later pass replays the
/// buffer without touching the child. Crossing the limit discards the
/// lookup and the cursor degrades to a passthrough over the child for
/// the rest of its life.
#[derive(Debug)]
pub struct Materialize {
    child: Box<dyn Cursor>,
    limit: usize,
    mode: Mode,
    buffer: Vec<(Ref, TagMap)>,
    lookup: AHashMap<Ref, usize>,
    pos: usize,
    current_idx: Option<usize>,
    state: State,
    tags: Tags,
}

impl Materialize {
    pub fn new(child: Box<dyn Cursor>) -> Self {
        Self::with_limit(child, DEFAULT_MATERIALIZE_LIMIT)
    }

    pub fn with_limit(child: Box<dyn Cursor>, limit: usize) -> Self {
        Materialize {
            child,
            limit,
            mode: Mode::Filling,
            buffer: Vec::new(),
            lookup: AHashMap::new(),
            pos: 0,
            current_idx: None,
            state: State::Active,
            tags: Tags::default(),
        }
    }

    /// Pulls one result from the child into the buffer. Does not check
    /// the limit; callers decide what an overfull buffer means.
    fn pull_into_buffer(&mut self) -> Pull {
        loop {
            if !self.child.advance() {
                return match self.child.error() {
                    Some(err) => {
                        self.state.fail(err.clone());
                        Pull::Failed
                    }
                    None => Pull::Exhausted,
                };
            }
            let Some(v) = self.child.result() else {
                continue;
            };
            let mut captured = TagMap::new();
            self.child.tag_results(&mut captured);
            let idx = self.buffer.len();
            self.buffer.push((v, captured));
            self.lookup.entry(v).or_insert(idx);
            return Pull::Pulled;
        }
    }

    fn enter_passthrough(&mut self) {
        debug!(
            limit = self.limit,
            "materialize buffer overflow, degrading to passthrough"
        );
        self.lookup = AHashMap::new();
        self.mode = Mode::Passthrough;
    }

    fn lookup_hit(&mut self, v: Ref) -> bool {
        if let Some(&idx) = self.lookup.get(&v) {
            self.current_idx = Some(idx);
            true
        } else {
            false
        }
    }

    fn forward_contains(&mut self, v: Ref) -> bool {
        self.current_idx = None;
        if self.child.contains(v) {
            return true;
        }
        if let Some(err) = self.child.error() {
            self.state.fail(err.clone());
        }
        false
    }
}

impl Cursor for Materialize {
    fn advance(&mut self) -> bool {
        if !self.state.is_active() {
            self.current_idx = None;
            return false;
        }
        match self.mode {
            Mode::Filling => {
                // A contains-driven drain or a reset can leave buffered
                // results the enumeration has not served yet.
                if self.pos < self.buffer.len() {
                    self.current_idx = Some(self.pos);
                    self.pos += 1;
                    return true;
                }
                match self.pull_into_buffer() {
                    Pull::Pulled => {
                        if self.buffer.len() > self.limit {
                            self.enter_passthrough();
                        }
                        self.current_idx = Some(self.pos);
                        self.pos += 1;
                        true
                    }
                    Pull::Exhausted => {
                        self.mode = Mode::Ready;
                        self.state.finish();
                        self.current_idx = None;
                        false
                    }
                    Pull::Failed => {
                        self.current_idx = None;
                        false
                    }
                }
            }
            Mode::Ready => {
                if self.pos < self.buffer.len() {
                    self.current_idx = Some(self.pos);
                    self.pos += 1;
                    true
                } else {
                    self.state.finish();
                    self.current_idx = None;
                    false
                }
            }
            Mode::Passthrough => {
                if self.pos < self.buffer.len() {
                    self.current_idx = Some(self.pos);
                    self.pos += 1;
                    return true;
                }
                if !self.buffer.is_empty() {
                    // Tail fully served and no result() points into it
                    // any more, so the memory can finally go.
                    self.buffer = Vec::new();
                    self.pos = 0;
                }
                self.current_idx = None;
                if self.child.advance() {
                    true
                } else {
                    match self.child.error() {
                        Some(err) => self.state.fail(err.clone()),
                        None => self.state.finish(),
                    }
                    false
                }
            }
        }
    }

    fn result(&self) -> Option<Ref> {
        if let Some(idx) = self.current_idx {
            return self.buffer.get(idx).map(|entry| entry.0);
        }
        match self.mode {
            Mode::Passthrough => self.child.result(),
            _ => None,
        }
    }

    fn contains(&mut self, v: Ref) -> bool {
        if self.state.is_failed() {
            return false;
        }
        match self.mode {
            Mode::Ready => self.lookup_hit(v),
            Mode::Filling => {
                if self.lookup_hit(v) {
                    return true;
                }
                loop {
                    match self.pull_into_buffer() {
                        Pull::Pulled => {
                            if self.buffer.len() > self.limit {
                                self.enter_passthrough();
                                return self.forward_contains(v);
                            }
                            let last = self.buffer[self.buffer.len() - 1].0;
                            if last == v {
                                self.current_idx = Some(self.buffer.len() - 1);
                                return true;
                            }
                        }
                        Pull::Exhausted => {
                            // Child done within the limit: from here on
                            // the lookup is authoritative.
                            self.mode = Mode::Ready;
                            return false;
                        }
                        Pull::Failed => return false,
                    }
                }
            }
            Mode::Passthrough => self.forward_contains(v),
        }
    }

    fn error(&self) -> Option<&Error> {
        self.state.error()
    }

    fn close(&mut self) {
        self.child.close();
        self.buffer = Vec::new();
        self.lookup = AHashMap::new();
        self.pos = 0;
        self.current_idx = None;
        self.state.finish();
    }

    fn reset(&mut self) {
        match self.mode {
            // Replay the buffered prefix, then keep pulling (Filling) or
            // stop at the end of the buffer (Ready). The child is not
            // re-queried.
            Mode::Filling | Mode::Ready => {
                self.pos = 0;
            }
            Mode::Passthrough => {
                self.child.reset();
                self.buffer = Vec::new();
                self.pos = 0;
            }
        }
        self.current_idx = None;
        self.state.restart();
    }

    fn estimated_size(&self) -> SizeHint {
        match self.mode {
            Mode::Ready => SizeHint::exact(self.buffer.len() as u64),
            _ => self.child.estimated_size(),
        }
    }

    fn describe(&self) -> Description {
        Description::Materialize {
            limit: self.limit,
            size: self.estimated_size(),
            tags: self.tags.names().to_vec(),
            child: Box::new(self.child.describe()),
        }
    }

    fn add_tag(&mut self, tag: &str) {
        self.tags.add(tag);
    }

    fn tag_results(&self, dst: &mut TagMap) {
        if let Some(idx) = self.current_idx {
            let Some((v, captured)) = self.buffer.get(idx) else {
                return;
            };
            self.tags.write(*v, dst);
            dst.extend(captured.iter().map(|(name, value)| (name.clone(), *value)));
            return;
        }
        if let Mode::Passthrough = self.mode {
            if let Some(v) = self.child.result() {
                self.tags.write(v, dst);
            }
            self.child.tag_results(dst);
        }
    }

    fn optimize(self: Box<Self>, ctx: &OptimizeContext<'_>) -> Box<dyn Cursor> {
        let Materialize {
            child, limit, tags, ..
        } = *self;
        let child = child.optimize(ctx);
        if tags.is_empty() {
            // A fixed set already answers membership in O(1) and replays
            // from its own storage, so the wrapper adds nothing.
            match child.describe() {
                Description::Empty | Description::Fixed { .. } => return child,
                _ => {}
            }
        }
        Box::new(Materialize {
            child,
            limit,
            mode: Mode::Filling,
            buffer: Vec::new(),
            lookup: AHashMap::new(),
            pos: 0,
            current_idx: None,
            state: State::Active,
            tags,
        })
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
    fn test_fill_then_replay_after_reset() {
        let mut m = Materialize::with_limit(boxed(&[1, 2, 3]), 10);
        assert_eq!(drain(&mut m), vec![Ref(1), Ref(2), Ref(3)]);
        m.reset();
        assert_eq!(drain(&mut m), vec![Ref(1), Ref(2), Ref(3)]);
    }

    #[test]
    fn test_contains_after_full_enumeration() {
        let mut m = Materialize::with_limit(boxed(&[1, 2, 3]), 10);
        drain(&mut m);
        assert!(m.contains(Ref(2)));
        assert!(!m.contains(Ref(9)));
        assert_eq!(m.error(), None);
    }

    #[test]
    fn test_limit_boundary_is_inclusive() {
        // Exactly limit values still materializes fully.
        let mut m = Materialize::with_limit(boxed(&[1, 2, 3]), 3);
        drain(&mut m);
        let size = m.estimated_size();
        assert!(size.exact);
        assert_eq!(size.value, 3);
    }

    #[test]
    fn test_contains_drain_keeps_enumeration_intact() {
        let mut m = Materialize::with_limit(boxed(&[1, 2, 3]), 10);
        // Probing first pulls part of the child into the buffer.
        assert!(m.contains(Ref(2)));
        assert_eq!(drain(&mut m), vec![Ref(1), Ref(2), Ref(3)]);
    }

    #[test]
    fn test_overflow_degrades_without_losing_results() {
        let mut m = Materialize::with_limit(boxed(&[1, 2, 3, 4, 5]), 2);
        assert_eq!(
            drain(&mut m),
            vec![Ref(1), Ref(2), Ref(3), Ref(4), Ref(5)]
        );
        assert!(m.contains(Ref(1)));
        assert!(!m.contains(Ref(9)));
        assert_eq!(m.error(), None);
    }

    #[test]
    fn test_overflow_via_contains_forwards_to_child() {
        let mut m = Materialize::with_limit(boxed(&[1, 2, 3, 4, 5]), 2);
        assert!(m.contains(Ref(5)));
        assert!(!m.contains(Ref(9)));
        assert_eq!(m.error(), None);
    }

    #[test]
    fn test_optimize_unwraps_trivial_child_when_untagged() {
        let ctx_config = crate::EngineConfig::default();
        let ctx = OptimizeContext::new(&ctx_config);
        let m: Box<dyn Cursor> = Box::new(Materialize::new(boxed(&[1, 2])));
        let optimized = m.optimize(&ctx);
        assert!(matches!(optimized.describe(), Description::Fixed { .. }));

        let mut tagged = Materialize::new(boxed(&[1, 2]));
        tagged.add_tag("kept");
        let optimized = Box::new(tagged).optimize(&ctx);
        assert!(matches!(
            optimized.describe(),
            Description::Materialize { .. }
        ));
    }
}
