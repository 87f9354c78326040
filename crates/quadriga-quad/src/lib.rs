//! Quad and value model for Quadriga.
//!
//! The unit of stored data is the [`Quad`]: an ordered
//! (subject, predicate, object, label) tuple whose label may be absent.
//! Node positions hold a [`Value`], either a plain string or a typed
//! literal. Everything here is an immutable value type with structural
//! equality; stores and the engine deal in these plus their own opaque
//! references.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Values
// ============================================================================

/// A node value: a plain string or a typed literal.
///
/// Typed literals carry their lexical form plus a datatype tag; two literals
/// are equal only when both parts match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    Typed { value: String, datatype: String },
}

impl Value {
    pub fn typed(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Value::Typed {
            value: value.into(),
            datatype: datatype.into(),
        }
    }

    /// Lexical form, without any datatype tag.
    pub fn as_str(&self) -> &str {
        match self {
            Value::Str(s) => s,
            Value::Typed { value, .. } => value,
        }
    }

    /// True when the lexical form is empty. Empty values are not allowed in
    /// the subject, predicate, or object position of a stored quad.
    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            Value::Typed { value, datatype } => write!(f, "{value}^^{datatype}"),
        }
    }
}

// ============================================================================
// Directions
// ============================================================================

/// One of the four quad positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Subject,
    Predicate,
    Object,
    Label,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Subject,
        Direction::Predicate,
        Direction::Object,
        Direction::Label,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Direction::Subject => "subject",
            Direction::Predicate => "predicate",
            Direction::Object => "object",
            Direction::Label => "label",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Quads
// ============================================================================

/// Why a quad failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuadValidationError {
    #[error("empty {0} position")]
    EmptyPosition(Direction),
}

/// An ordered (subject, predicate, object, label) tuple.
///
/// The label is optional; an absent label is distinct from every value,
/// including the empty string. Equality and hashing are structural over all
/// four fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quad {
    pub subject: Value,
    pub predicate: Value,
    pub object: Value,
    pub label: Option<Value>,
}

impl Quad {
    pub fn new(
        subject: impl Into<Value>,
        predicate: impl Into<Value>,
        object: impl Into<Value>,
    ) -> Self {
        Quad {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            label: None,
        }
    }

    pub fn with_label(
        subject: impl Into<Value>,
        predicate: impl Into<Value>,
        object: impl Into<Value>,
        label: impl Into<Value>,
    ) -> Self {
        Quad {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            label: Some(label.into()),
        }
    }

    /// The value at `direction`, or `None` for an absent label.
    pub fn get(&self, direction: Direction) -> Option<&Value> {
        match direction {
            Direction::Subject => Some(&self.subject),
            Direction::Predicate => Some(&self.predicate),
            Direction::Object => Some(&self.object),
            Direction::Label => self.label.as_ref(),
        }
    }

    /// Subject, predicate, and object must all be non-empty. Labels are
    /// unconstrained.
    pub fn validate(&self) -> Result<(), QuadValidationError> {
        for direction in [Direction::Subject, Direction::Predicate, Direction::Object] {
            let Some(value) = self.get(direction) else {
                continue;
            };
            if value.is_empty() {
                return Err(QuadValidationError::EmptyPosition(direction));
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -- {} -> {}", self.subject, self.predicate, self.object)?;
        if let Some(label) = &self.label {
            write!(f, " @ {label}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_structural_equality() {
        let a = Quad::new("cats", "are", "awesome");
        let b = Quad::new("cats", "are", "awesome");
        let c = Quad::new("cats", "are", "scary");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_absent_label_distinct_from_empty() {
        let unlabeled = Quad::new("s", "p", "o");
        let empty_label = Quad::with_label("s", "p", "o", "");
        assert_ne!(unlabeled, empty_label);
        assert_eq!(unlabeled.get(Direction::Label), None);
        assert_eq!(
            empty_label.get(Direction::Label),
            Some(&Value::Str(String::new()))
        );
    }

    #[test]
    fn test_typed_literal_equality() {
        let plain = Value::from("42");
        let typed = Value::typed("42", "int");
        assert_ne!(plain, typed);
        assert_eq!(typed, Value::typed("42", "int"));
        assert_ne!(typed, Value::typed("42", "float"));
        assert_eq!(typed.as_str(), "42");
    }

    #[test]
    fn test_validation_rejects_empty_positions() {
        assert!(Quad::new("s", "p", "o").is_valid());
        assert_eq!(
            Quad::new("", "p", "o").validate(),
            Err(QuadValidationError::EmptyPosition(Direction::Subject))
        );
        assert_eq!(
            Quad::new("s", "p", "").validate(),
            Err(QuadValidationError::EmptyPosition(Direction::Object))
        );
        // Empty labels are allowed; absent labels trivially so.
        assert!(Quad::with_label("s", "p", "o", "").is_valid());
    }

    #[test]
    fn test_display_forms() {
        let q = Quad::with_label("cats", "are", "awesome", "opinions");
        assert_eq!(q.to_string(), "cats -- are -> awesome @ opinions");
        assert_eq!(Value::typed("9", "int").to_string(), "9^^int");
    }

    #[test]
    fn test_serde_shape() {
        let q = Quad::new("s", "p", "o");
        let json = serde_json::to_string(&q).unwrap();
        assert!(json.contains("\"label\":null"));
        let back: Quad = serde_json::from_str(&json).unwrap();
        assert_eq!(back, q);
    }
}
