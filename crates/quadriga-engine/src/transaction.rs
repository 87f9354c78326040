//! Batched mutations with fail-stop application.

use tracing::debug;

use quadriga_quad::Quad;

use crate::store::{Delta, QuadStore};
use crate::{Error, Result};

/// An ordered batch of deltas.
///
/// A transaction is a plain value: the caller builds it up and it touches
/// no store until [`apply_transaction`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    deltas: Vec<Delta>,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction::default()
    }

    pub fn add_quad(&mut self, quad: Quad) {
        self.deltas.push(Delta::Add(quad));
    }

    pub fn remove_quad(&mut self, quad: Quad) {
        self.deltas.push(Delta::Remove(quad));
    }

    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// Apply every delta of `tx` to `store`, in order, stopping at the first
/// failure.
///
/// On failure the error carries the index of the failing delta; earlier
/// deltas have been applied and later ones have not been attempted.
/// Whether the applied prefix is rolled back is the store's documented
/// behavior, not the engine's.
pub fn apply_transaction(store: &mut dyn QuadStore, tx: &Transaction) -> Result<()> {
    for (index, delta) in tx.deltas.iter().enumerate() {
        if let Err(err) = store.apply_delta(delta) {
            return Err(Error::TransactionApply {
                index,
                reason: err.to_string(),
            });
        }
    }
    debug!(deltas = tx.deltas.len(), "applied transaction");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cursor, Empty, Ref};
    use quadriga_quad::{Direction, Value};

    /// Vec-backed store, just enough surface for transaction tests.
    #[derive(Debug, Default)]
    struct TestStore {
        quads: Vec<Quad>,
        reject: Option<Quad>,
    }

    impl QuadStore for TestStore {
        fn resolve(&self, _value: &Value) -> crate::Result<Option<Ref>> {
            Ok(None)
        }

        fn lookup(&self, r: Ref) -> crate::Result<Value> {
            Err(Error::StoreLookup(format!("unknown ref {r}")))
        }

        fn quad(&self, r: Ref) -> crate::Result<Quad> {
            Err(Error::StoreLookup(format!("unknown ref {r}")))
        }

        fn quad_direction(
            &self,
            _r: Ref,
            _direction: Direction,
        ) -> crate::Result<Option<Ref>> {
            Ok(None)
        }

        fn scan(
            &self,
            _direction: Direction,
            _constraint: Ref,
        ) -> crate::Result<Box<dyn Cursor>> {
            Ok(Box::new(Empty::new()))
        }

        fn scan_all(&self) -> crate::Result<Box<dyn Cursor>> {
            Ok(Box::new(Empty::new()))
        }

        fn apply_delta(&mut self, delta: &Delta) -> crate::Result<()> {
            if self.reject.as_ref() == Some(delta.quad()) {
                return Err(Error::StoreLookup("store rejected this quad".into()));
            }
            match delta {
                Delta::Add(quad) => {
                    quad.validate()
                        .map_err(|err| Error::InvalidQuad(err.to_string()))?;
                    if !self.quads.contains(quad) {
                        self.quads.push(quad.clone());
                    }
                }
                Delta::Remove(quad) => {
                    self.quads.retain(|q| q != quad);
                }
            }
            Ok(())
        }
    }

    fn q(s: &str, p: &str, o: &str) -> Quad {
        Quad::new(s, p, o)
    }

    #[test]
    fn test_add_then_remove() {
        let mut store = TestStore::default();
        let mut tx = Transaction::new();
        tx.add_quad(q("a", "knows", "b"));
        tx.add_quad(q("b", "knows", "c"));
        tx.remove_quad(q("a", "knows", "b"));
        apply_transaction(&mut store, &tx).unwrap();
        assert_eq!(store.quads, vec![q("b", "knows", "c")]);
    }

    #[test]
    fn test_duplicate_add_is_idempotent() {
        let mut store = TestStore::default();
        let mut tx = Transaction::new();
        tx.add_quad(q("a", "knows", "b"));
        tx.add_quad(q("a", "knows", "b"));
        apply_transaction(&mut store, &tx).unwrap();
        assert_eq!(store.quads.len(), 1);
    }

    #[test]
    fn test_remove_nonexistent_is_not_an_error() {
        let mut store = TestStore::default();
        let mut tx = Transaction::new();
        tx.add_quad(q("a", "knows", "b"));
        tx.add_quad(q("b", "knows", "c"));
        tx.remove_quad(q("never", "was", "here"));
        apply_transaction(&mut store, &tx).unwrap();
        assert_eq!(store.quads.len(), 2);
    }

    #[test]
    fn test_failure_reports_index_and_stops() {
        let mut store = TestStore {
            reject: Some(q("b", "knows", "c")),
            ..TestStore::default()
        };
        let mut tx = Transaction::new();
        tx.add_quad(q("a", "knows", "b"));
        tx.add_quad(q("b", "knows", "c"));
        tx.add_quad(q("c", "knows", "d"));
        let err = apply_transaction(&mut store, &tx).unwrap_err();
        let Error::TransactionApply { index, .. } = err else {
            panic!("wrong error kind: {err}");
        };
        assert_eq!(index, 1);
        // The first delta landed, the third was never attempted.
        assert_eq!(store.quads, vec![q("a", "knows", "b")]);
    }

    #[test]
    fn test_invalid_quad_stops_application() {
        let mut store = TestStore::default();
        let mut tx = Transaction::new();
        tx.add_quad(q("", "p", "o"));
        tx.add_quad(q("a", "p", "o"));
        let err = apply_transaction(&mut store, &tx).unwrap_err();
        assert!(matches!(err, Error::TransactionApply { index: 0, .. }));
        assert!(store.quads.is_empty());
    }
}
