//! Mutable state shared by everything a session resolves.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use crate::cache::{AnswerCache, LazyAnswerCache, PlanCache};
use crate::concept::{Concept, ConceptId, Value};
use crate::query::ReasonerAtomicQuery;
use crate::schema::Label;
use crate::storage::InferredFact;

/// Session caches plus the bookkeeping of the resolution in progress.
///
/// Held behind an `Rc` by the session and by every stream it hands out.
/// Borrows of the cells never span a recursive resolution.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) answers: RefCell<AnswerCache>,
    /// Storage lookups, pulled once per query class.
    pub(crate) lookups: RefCell<LazyAnswerCache>,
    pub(crate) plans: RefCell<PlanCache>,
    pub(crate) derived: RefCell<DerivedFacts>,
    /// Atomic queries whose derivation has started and not finished, keyed
    /// by the token of the cursor deriving them.
    in_progress: RefCell<Vec<(u64, ReasonerAtomicQuery)>>,
    next_token: Cell<u64>,
    /// Atomic queries fully resolved since the last completeness ack.
    pub(crate) touched: RefCell<Vec<ReasonerAtomicQuery>>,
    /// Set when a resolution was cut short by re-entering a query in progress.
    pub(crate) cut: Cell<bool>,
}

impl SessionState {
    pub(crate) fn in_progress(&self, query: &ReasonerAtomicQuery) -> bool {
        self.in_progress
            .borrow()
            .iter()
            .any(|(_, q)| q.is_alpha_equivalent(query))
    }

    pub(crate) fn enter(&self, query: &ReasonerAtomicQuery) -> u64 {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        self.in_progress.borrow_mut().push((token, query.clone()));
        token
    }

    /// Cursors may finish out of order, so leave by token rather than pop.
    pub(crate) fn leave(&self, token: u64) {
        self.in_progress.borrow_mut().retain(|(t, _)| *t != token);
    }

    /// Empty caches over the same derived concepts, so ids handed out
    /// earlier keep meaning the same thing.
    pub(crate) fn fork(&self) -> SessionState {
        SessionState {
            derived: RefCell::new(self.derived.borrow().clone()),
            ..SessionState::default()
        }
    }

    /// Mark every touched query complete. Only valid once a resolution ran
    /// to its fixpoint.
    pub(crate) fn ack_touched(&self) {
        let touched: Vec<ReasonerAtomicQuery> = self.touched.borrow_mut().drain(..).collect();
        let mut answers = self.answers.borrow_mut();
        for query in &touched {
            answers.ack_completeness(query);
        }
    }

    pub(crate) fn reset_caches(&self) {
        self.answers.borrow_mut().clear();
        self.lookups.borrow_mut().clear();
        self.touched.borrow_mut().clear();
    }
}

/// Concepts and facts derived by rules in this session, not yet written to
/// storage. Ids are allocated from storage so they stay valid once
/// materialized.
#[derive(Debug, Clone, Default)]
pub(crate) struct DerivedFacts {
    relations: HashMap<(Label, Vec<(Label, ConceptId)>), ConceptId>,
    attributes: HashMap<(Label, Value), ConceptId>,
    ownerships: HashSet<(ConceptId, ConceptId)>,
    edges: HashMap<(ConceptId, ConceptId), ConceptId>,
    isas: HashSet<(ConceptId, Label)>,
    concepts: HashMap<ConceptId, Concept>,
    /// In derivation order.
    facts: Vec<InferredFact>,
}

impl DerivedFacts {
    pub(crate) fn relation(&self, label: &Label, players: &[(Label, ConceptId)]) -> Option<ConceptId> {
        self.relations
            .get(&(label.clone(), players.to_vec()))
            .copied()
    }

    pub(crate) fn attribute(&self, label: &Label, value: &Value) -> Option<ConceptId> {
        self.attributes
            .get(&(label.clone(), value.clone()))
            .copied()
    }

    pub(crate) fn edge(&self, owner: ConceptId, attribute: ConceptId) -> Option<ConceptId> {
        self.edges.get(&(owner, attribute)).copied()
    }

    pub(crate) fn concept(&self, id: ConceptId) -> Option<&Concept> {
        self.concepts.get(&id)
    }

    /// `players` must be sorted.
    pub(crate) fn add_relation(&mut self, id: ConceptId, label: Label, players: Vec<(Label, ConceptId)>) {
        self.relations
            .insert((label.clone(), players.clone()), id);
        self.concepts
            .insert(id, Concept::thing(id, label.clone()).inferred());
        self.facts.push(InferredFact::Relation { id, label, players });
    }

    pub(crate) fn add_attribute(&mut self, id: ConceptId, label: Label, value: Value) {
        self.attributes
            .insert((label.clone(), value.clone()), id);
        self.concepts.insert(
            id,
            Concept::thing(id, label.clone())
                .with_value(value.clone())
                .inferred(),
        );
        self.facts.push(InferredFact::Attribute { id, label, value });
    }

    pub(crate) fn add_ownership(&mut self, owner: ConceptId, attribute: ConceptId) {
        if self.ownerships.insert((owner, attribute)) {
            self.facts.push(InferredFact::Ownership { owner, attribute });
        }
    }

    pub(crate) fn add_edge(&mut self, owner: ConceptId, attribute: ConceptId, edge: ConceptId) {
        self.edges.insert((owner, attribute), edge);
    }

    pub(crate) fn add_isa(&mut self, instance: ConceptId, label: Label) {
        if self.isas.insert((instance, label.clone())) {
            self.facts.push(InferredFact::Isa { instance, label });
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.facts.len()
    }
}

/// Sort `facts` into an order storage can accept: attributes, then relations
/// as given (a relation's players precede it), then ownerships and types.
pub(crate) fn storage_order(mut facts: Vec<InferredFact>) -> Vec<InferredFact> {
    let rank = |fact: &InferredFact| match fact {
        InferredFact::Attribute { .. } => 0,
        InferredFact::Relation { .. } => 1,
        InferredFact::Ownership { .. } => 2,
        InferredFact::Isa { .. } => 3,
    };
    facts.sort_by_key(rank);
    facts
}
