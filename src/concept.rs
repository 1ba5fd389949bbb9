//! Concepts: the things answers bind variables to.
//!
//! Every instance, attribute value, schema type and role is identified by a
//! [`ConceptId`]. The [`ConceptAllocator`] hands out ids for both stored and
//! session-local (inferred but not materialized) concepts.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::ConceptError;
use crate::schema::Label;

/// Unique, niche-optimized identifier for a concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConceptId(NonZeroU64);

impl ConceptId {
    /// Create a `ConceptId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(ConceptId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Sentinel standing in for "some concrete id" in structural comparisons.
    pub(crate) fn placeholder() -> Self {
        ConceptId(NonZeroU64::MAX)
    }
}

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}

/// Thread-safe concept id allocator.
///
/// Produces monotonically increasing ids. Safe to share across threads.
#[derive(Debug)]
pub struct ConceptAllocator {
    next: AtomicU64,
}

impl ConceptAllocator {
    /// Create a new allocator that starts from id 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Create an allocator that resumes from a given id.
    pub fn starting_from(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    /// Allocate the next concept id.
    pub fn next_id(&self) -> Result<ConceptId, ConceptError> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        ConceptId::new(raw).ok_or(ConceptError::AllocatorExhausted)
    }

    /// Return the next id that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for ConceptAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// An attribute value.
///
/// Doubles compare by bit pattern so that values can key hash maps; `-0.0`
/// and `0.0` are therefore distinct values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
}

impl Value {
    fn numeric(&self) -> Option<f64> {
        match self {
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Order two values of comparable kinds. Longs and doubles compare
    /// numerically; mixed kinds are incomparable.
    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Long(a), Value::Long(b)) => Some(a.cmp(b)),
            _ => {
                let (a, b) = (self.numeric()?, other.numeric()?);
                a.partial_cmp(&b)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Bool(v) => v.hash(state),
            Value::Long(v) => v.hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::String(v) => v.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order used for canonical sorting only: kind first, then content.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Bool(_) => 0,
                Value::Long(_) => 1,
                Value::Double(_) => 2,
                Value::String(_) => 3,
            }
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Long(a), Value::Long(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "\"{v}\""),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

// ---------------------------------------------------------------------------
// Concept records
// ---------------------------------------------------------------------------

/// What a concept is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConceptKind {
    /// A schema type or role; `label` is its own label.
    Type,
    /// An instance (entity, relation or attribute); `label` is its direct type.
    Thing,
}

/// A concept as seen by the reasoner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    pub kind: ConceptKind,
    /// Own label for types, direct type label for things.
    pub label: Label,
    /// Attribute value, for attribute instances.
    pub value: Option<Value>,
    /// Whether the concept was produced by a rule rather than inserted.
    pub inferred: bool,
}

impl Concept {
    pub fn thing(id: ConceptId, label: Label) -> Self {
        Self {
            id,
            kind: ConceptKind::Thing,
            label,
            value: None,
            inferred: false,
        }
    }

    pub fn schema_type(id: ConceptId, label: Label) -> Self {
        Self {
            id,
            kind: ConceptKind::Type,
            label,
            value: None,
            inferred: false,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn inferred(mut self) -> Self {
        self.inferred = true;
        self
    }

    pub fn is_type(&self) -> bool {
        self.kind == ConceptKind::Type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concept_id_niche_optimization() {
        assert_eq!(
            std::mem::size_of::<Option<ConceptId>>(),
            std::mem::size_of::<ConceptId>()
        );
    }

    #[test]
    fn concept_id_zero_is_none() {
        assert!(ConceptId::new(0).is_none());
        assert_eq!(ConceptId::new(42).unwrap().get(), 42);
        assert_eq!(ConceptId::new(7).unwrap().to_string(), "V7");
    }

    #[test]
    fn allocator_produces_sequential_ids() {
        let alloc = ConceptAllocator::starting_from(10);
        assert_eq!(alloc.next_id().unwrap().get(), 10);
        assert_eq!(alloc.next_id().unwrap().get(), 11);
        assert_eq!(alloc.peek_next(), 12);
    }

    #[test]
    fn values_compare_across_numeric_kinds() {
        use std::cmp::Ordering;
        assert_eq!(Value::Long(3).compare(&Value::Double(3.5)), Some(Ordering::Less));
        assert_eq!(Value::from("b").compare(&Value::from("a")), Some(Ordering::Greater));
        assert_eq!(Value::Long(1).compare(&Value::from("1")), None);
    }

    #[test]
    fn doubles_hash_by_bits() {
        use std::collections::HashSet;
        let set: HashSet<Value> = [Value::Double(1.5), Value::Double(1.5), Value::Long(1)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert_ne!(Value::Long(1), Value::Double(1.0));
    }
}
