//! The storage interface the reasoner consumes, and an in-memory store.
//!
//! The reasoner never owns data. It asks a [`Storage`] to match patterns
//! directly, to look up concepts and existing facts, to allocate ids for
//! derived concepts and, on materialization, to persist derived facts.

pub mod fixture;
mod matcher;
pub mod mem;

use std::sync::Arc;

pub use fixture::{Handles, KnowledgeBaseDef, TypeDef};
pub use mem::MemoryStorage;

use crate::answer::Answer;
use crate::concept::{Concept, ConceptId, Value};
use crate::error::StorageResult;
use crate::query::ReasonerQuery;
use crate::rule::InferenceRule;
use crate::schema::{Label, Schema};

/// A fact derived by a rule, ready to be written to storage.
#[derive(Debug, Clone, PartialEq)]
pub enum InferredFact {
    /// `instance` is also an instance of `label`.
    Isa { instance: ConceptId, label: Label },
    /// A relation instance with its role players, sorted by role then player.
    Relation {
        id: ConceptId,
        label: Label,
        players: Vec<(Label, ConceptId)>,
    },
    /// An attribute instance.
    Attribute {
        id: ConceptId,
        label: Label,
        value: Value,
    },
    /// `owner` owns `attribute`.
    Ownership {
        owner: ConceptId,
        attribute: ConceptId,
    },
}

impl InferredFact {
    /// The concept the fact creates, for relations and attributes.
    pub fn created(&self) -> Option<ConceptId> {
        match self {
            InferredFact::Relation { id, .. } | InferredFact::Attribute { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// What the reasoner needs from a database.
pub trait Storage {
    fn schema(&self) -> Arc<Schema>;

    /// Answers of `query` over stored facts only, without rules.
    fn execute(&self, query: &ReasonerQuery) -> StorageResult<Vec<Answer>>;

    /// The concept with this id: a schema type or role, or a stored instance.
    fn concept(&self, id: ConceptId) -> Option<Concept>;

    /// A stored relation of exactly this type and these role players.
    fn find_relation(&self, label: &Label, players: &[(Label, ConceptId)]) -> Option<ConceptId>;

    /// A stored attribute of this type and value.
    fn find_attribute(&self, label: &Label, value: &Value) -> Option<ConceptId>;

    /// Whether `owner` owns `attribute`.
    fn find_ownership(&self, owner: ConceptId, attribute: ConceptId) -> bool;

    /// A fresh id for a derived concept.
    fn allocate_id(&self) -> StorageResult<ConceptId>;

    /// Persist a derived fact. Returns whether anything was written; facts
    /// already present are left untouched.
    fn materialize(&self, fact: &InferredFact) -> StorageResult<bool>;

    fn rules(&self) -> Vec<Arc<InferenceRule>>;

    /// The value of an attribute concept.
    fn value_of(&self, id: ConceptId) -> Option<Value> {
        self.concept(id).and_then(|c| c.value)
    }
}
