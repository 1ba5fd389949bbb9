//! Reasoning sessions: resolve conjunctive queries against a storage and its
//! rules, repeat recursive resolutions until they reach a fixpoint, and
//! materialize what was derived.
//!
//! A session owns every cache; dropping it drops them. Answer streams share
//! the session's state through an `Rc`, so a session and its streams stay on
//! one thread.

mod resolve;
mod state;

use std::cell::Ref;
use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use resolve::{JoinCursor, Resolver};
use state::{SessionState, storage_order};

use crate::answer::Answer;
use crate::cache::{AnswerCache, RuleCache};
use crate::config::ReasonerConfig;
use crate::error::ReasonerResult;
use crate::plan::ResolutionPlan;
use crate::query::{Pattern, ReasonerAtomicQuery, ReasonerQuery};
use crate::rule::InferenceRule;
use crate::schema::Schema;
use crate::storage::{InferredFact, Storage};
use crate::var::Variable;

/// A reasoning session over one storage.
pub struct ReasoningSession<'s> {
    schema: Arc<Schema>,
    resolver: Resolver<'s>,
}

impl<'s> ReasoningSession<'s> {
    pub fn new(storage: &'s dyn Storage) -> Self {
        Self::with_config(storage, ReasonerConfig::default())
    }

    pub fn with_config(storage: &'s dyn Storage, config: ReasonerConfig) -> Self {
        let schema = storage.schema();
        let rules = RuleCache::new(storage.rules(), schema.clone());
        tracing::info!(
            rules = rules.len(),
            cyclic = rules.dependency_graph().is_cyclic(),
            max_passes = config.max_passes,
            "opened reasoning session"
        );
        Self {
            schema,
            resolver: Resolver {
                storage,
                rules: Rc::new(rules),
                config,
                state: Rc::new(SessionState::default()),
            },
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &ReasonerConfig {
        &self.resolver.config
    }

    pub fn rules(&self) -> &[Arc<InferenceRule>] {
        self.resolver.rules.rules()
    }

    /// Build a query over this session's schema.
    pub fn query(&self, pattern: &Pattern) -> ReasonerResult<ReasonerQuery> {
        Ok(ReasonerQuery::new(pattern, &self.schema)?)
    }

    pub fn atomic_query(&self, pattern: &Pattern) -> ReasonerResult<ReasonerAtomicQuery> {
        Ok(ReasonerAtomicQuery::new(pattern, &self.schema)?)
    }

    /// Lazily resolve `query`. Answers are projected onto the query's
    /// user-defined variables and deduplicated.
    pub fn resolve(&self, query: &ReasonerQuery) -> AnswerStream<'s> {
        self.stream(self.resolver.clone(), query)
    }

    fn stream(&self, resolver: Resolver<'s>, query: &ReasonerQuery) -> AnswerStream<'s> {
        if !resolver.config.use_cache {
            resolver.state.reset_caches();
        }
        let user_vars = query.user_variables();
        let vars = if user_vars.is_empty() {
            query.variables()
        } else {
            user_vars
        };
        AnswerStream {
            resolver,
            query: query.clone(),
            reiterate: self.requires_reiteration(query),
            vars,
            mode: StreamMode::Pending,
            seen: HashSet::new(),
        }
    }

    pub fn resolve_all(&self, query: &ReasonerQuery) -> ReasonerResult<Vec<Answer>> {
        self.resolve(query).collect()
    }

    /// Whether one resolution pass may miss answers of `query`: some rule
    /// its atoms depend on is recursive, or more than one disconnected part
    /// of it needs rules.
    pub fn requires_reiteration(&self, query: &ReasonerQuery) -> bool {
        let graph = self.resolver.rules.dependency_graph();
        let preds = query.var_predicates();
        if graph.reaches_cycle(query.selectable_atoms(), preds) {
            return true;
        }
        let derivable_parts = query
            .components()
            .iter()
            .filter(|component| {
                component
                    .iter()
                    .any(|atom| !graph.producers_of(atom, preds).is_empty())
            })
            .count();
        derivable_parts > 1
    }

    /// Rules that can conclude answers of `query`.
    pub fn applicable_rules(&self, query: &ReasonerAtomicQuery) -> Vec<Arc<InferenceRule>> {
        self.resolver
            .applicable_rules(query)
            .into_iter()
            .map(|(rule, _)| rule)
            .collect()
    }

    /// The plan the session resolves `query` with.
    pub fn plan(&self, query: &ReasonerQuery) -> ReasonerResult<ResolutionPlan> {
        self.resolver.plan(query)
    }

    pub fn answer_cache(&self) -> Ref<'_, AnswerCache> {
        self.resolver.state.answers.borrow()
    }

    /// Number of facts derived so far in this session.
    pub fn derived_fact_count(&self) -> usize {
        self.resolver.state.derived.borrow().len()
    }

    /// Resolve `query` completely, then write the facts its answers were
    /// derived from to storage, flagged inferred. Facts derived only for
    /// other queries stay in the session. Returns how many facts storage did
    /// not already hold.
    pub fn materialize(&self, query: &ReasonerQuery) -> ReasonerResult<usize> {
        let answers: Vec<Answer> = self
            .stream(self.resolver.explaining(), query)
            .collect::<ReasonerResult<_>>()?;
        let mut supporting: Vec<InferredFact> = Vec::new();
        for answer in &answers {
            // Deepest derivations first, so a relation's players precede it.
            for explanation in answer.explanations().iter().rev() {
                for fact in explanation.concluded() {
                    if !supporting.contains(fact) {
                        supporting.push(fact.clone());
                    }
                }
            }
        }
        let facts = storage_order(supporting);
        let mut written = 0;
        for fact in &facts {
            if self.resolver.storage.materialize(fact)? {
                written += 1;
            }
        }
        tracing::info!(
            query = %query,
            answers = answers.len(),
            facts = facts.len(),
            written,
            "materialized derived facts"
        );
        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// Answer stream
// ---------------------------------------------------------------------------

enum StreamMode<'s> {
    Pending,
    Lazy(JoinCursor<'s>),
    Buffered(std::vec::IntoIter<Answer>),
    Done,
}

/// Answers of a query, computed on demand.
///
/// Queries that need no reiteration are joined lazily: stopping early leaves
/// the caches consistent, with the touched entries simply not marked
/// complete. Recursive queries run their fixpoint on the first pull.
pub struct AnswerStream<'s> {
    resolver: Resolver<'s>,
    query: ReasonerQuery,
    reiterate: bool,
    vars: BTreeSet<Variable>,
    mode: StreamMode<'s>,
    seen: HashSet<Answer>,
}

impl AnswerStream<'_> {
    /// Repeat resolution passes until one records no new answer.
    fn fixpoint(&self) -> ReasonerResult<Vec<Answer>> {
        let state = &self.resolver.state;
        let max_passes = self.resolver.config.max_passes.max(1);
        let mut passes = 0;
        loop {
            passes += 1;
            state.cut.set(false);
            let before = state.answers.borrow().revision();
            let answers = self.resolver.resolve_conjunction(&self.query)?;
            let after = state.answers.borrow().revision();
            let converged = after == before || !(self.reiterate || state.cut.get());
            if converged {
                tracing::info!(
                    query = %self.query,
                    passes,
                    answers = answers.len(),
                    "resolution reached fixpoint"
                );
                state.ack_touched();
                return Ok(answers);
            }
            if passes >= max_passes {
                tracing::warn!(
                    query = %self.query,
                    passes,
                    "pass bound reached before fixpoint; answers may be incomplete"
                );
                state.touched.borrow_mut().clear();
                return Ok(answers);
            }
        }
    }

    fn pull(&mut self) -> Option<ReasonerResult<Answer>> {
        loop {
            match &mut self.mode {
                StreamMode::Pending => {
                    if self.reiterate {
                        match self.fixpoint() {
                            Ok(answers) => self.mode = StreamMode::Buffered(answers.into_iter()),
                            Err(e) => {
                                self.mode = StreamMode::Done;
                                return Some(Err(e));
                            }
                        }
                    } else {
                        self.resolver.state.cut.set(false);
                        match self.resolver.join(&self.query) {
                            Ok(cursor) => self.mode = StreamMode::Lazy(cursor),
                            Err(e) => {
                                self.mode = StreamMode::Done;
                                return Some(Err(e));
                            }
                        }
                    }
                }
                StreamMode::Lazy(cursor) => match cursor.next() {
                    Some(item) => return Some(item),
                    None if self.resolver.state.cut.get() => {
                        // A re-entered query replayed partial answers; finish
                        // with a fixpoint and let `seen` drop repeats.
                        self.reiterate = true;
                        self.mode = StreamMode::Pending;
                    }
                    None => {
                        self.resolver.state.ack_touched();
                        self.mode = StreamMode::Done;
                    }
                },
                StreamMode::Buffered(answers) => match answers.next() {
                    Some(answer) => return Some(Ok(answer)),
                    None => self.mode = StreamMode::Done,
                },
                StreamMode::Done => return None,
            }
        }
    }
}

impl Iterator for AnswerStream<'_> {
    type Item = ReasonerResult<Answer>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.pull()? {
                Err(e) => return Some(Err(e)),
                Ok(answer) => {
                    let projected = answer.project(&self.vars);
                    if self.seen.insert(projected.clone()) {
                        return Some(Ok(projected));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::ConceptId;
    use crate::query::Rel;
    use crate::rule::RuleDefinition;
    use crate::storage::MemoryStorage;

    fn schema() -> Schema {
        let mut s = Schema::new();
        s.define_entity("place", None).unwrap();
        s.define_role("located", None).unwrap();
        s.define_role("location", None).unwrap();
        s.define_relation("locates", None).unwrap();
        s.relates("locates", "located").unwrap();
        s.relates("locates", "location").unwrap();
        s.plays("place", "located").unwrap();
        s.plays("place", "location").unwrap();
        s.define_role("origin", None).unwrap();
        s.define_role("neighbour", None).unwrap();
        s.define_relation("near", None).unwrap();
        s.relates("near", "origin").unwrap();
        s.relates("near", "neighbour").unwrap();
        s.plays("place", "origin").unwrap();
        s.plays("place", "neighbour").unwrap();
        s
    }

    fn locates(x: &str, y: &str) -> Rel {
        Rel::new()
            .isa("locates")
            .player("located", x)
            .player("location", y)
    }

    fn near(x: &str, y: &str) -> Rel {
        Rel::new()
            .isa("near")
            .player("origin", x)
            .player("neighbour", y)
    }

    /// `n` places, each located in the next. No rules.
    fn places(n: usize) -> (MemoryStorage, Vec<ConceptId>) {
        let mut store = MemoryStorage::new(Arc::new(schema()));
        let places: Vec<ConceptId> = (0..n).map(|_| store.insert_entity("place").unwrap()).collect();
        for pair in places.windows(2) {
            store
                .insert_relation("locates", &[("located", pair[0]), ("location", pair[1])])
                .unwrap();
        }
        (store, places)
    }

    /// A chain of `n` places, each located in the next, with location
    /// transitive.
    fn chain(n: usize) -> (MemoryStorage, Vec<ConceptId>) {
        let (mut store, places) = places(n);
        store
            .add_rule(&RuleDefinition::new(
                "transitive-location",
                Pattern::new()
                    .relation(locates("x", "y"))
                    .relation(locates("y", "z")),
                Pattern::new().relation(locates("x", "z")),
            ))
            .unwrap();
        (store, places)
    }

    #[test]
    fn transitive_closure_of_a_chain() {
        let (store, _) = chain(4);
        let session = ReasoningSession::new(&store);
        let query = session
            .query(&Pattern::new().relation(locates("a", "b")))
            .unwrap();
        assert!(session.requires_reiteration(&query));
        // 3 stored, 2 two-hop, 1 three-hop
        assert_eq!(session.resolve_all(&query).unwrap().len(), 6);
    }

    #[test]
    fn complete_entries_are_served_without_storage() {
        let (store, places) = chain(3);
        let session = ReasoningSession::new(&store);
        let query = session
            .query(&Pattern::new().relation(locates("a", "b")))
            .unwrap();
        assert_eq!(session.resolve_all(&query).unwrap().len(), 3);
        let atomic = ReasonerAtomicQuery::try_from(query.clone()).unwrap();
        assert!(session.answer_cache().is_complete(&atomic));

        let pinned = session
            .query(&Pattern::new().relation(locates("a", "b")).id("a", places[0]))
            .unwrap();
        assert_eq!(session.resolve_all(&pinned).unwrap().len(), 2);
    }

    #[test]
    fn dropping_a_stream_early_leaves_entries_incomplete() {
        let (store, _) = chain(3);
        let session = ReasoningSession::new(&store);
        let query = session
            .query(&Pattern::new().isa("p", "place"))
            .unwrap();
        assert!(!session.requires_reiteration(&query));
        let mut stream = session.resolve(&query);
        assert!(stream.next().is_some());
        drop(stream);
        let atomic = ReasonerAtomicQuery::try_from(query).unwrap();
        assert!(!session.answer_cache().is_complete(&atomic));
    }

    #[test]
    fn materialization_writes_each_fact_once() {
        let (store, _) = chain(3);
        let query = {
            let session = ReasoningSession::new(&store);
            let query = session
                .query(&Pattern::new().relation(locates("a", "b")))
                .unwrap();
            assert_eq!(session.materialize(&query).unwrap(), 1);
            assert_eq!(session.materialize(&query).unwrap(), 0);
            query
        };
        assert_eq!(store.inferred_count(), 1);
        let session = ReasoningSession::new(&store);
        assert_eq!(session.materialize(&query).unwrap(), 0);
        assert_eq!(session.resolve_all(&query).unwrap().len(), 3);
    }

    fn with_near_rule(store: &mut MemoryStorage) {
        store
            .add_rule(&RuleDefinition::new(
                "located-places-are-near",
                Pattern::new().relation(locates("x", "y")),
                Pattern::new().relation(near("x", "y")),
            ))
            .unwrap();
    }

    #[test]
    fn first_answer_derives_only_what_it_needs() {
        let (mut store, _) = places(11);
        with_near_rule(&mut store);
        let session = ReasoningSession::new(&store);
        let query = session
            .query(&Pattern::new().relation(near("a", "b")))
            .unwrap();
        assert!(!session.requires_reiteration(&query));

        let mut stream = session.resolve(&query);
        assert!(stream.next().unwrap().is_ok());
        assert_eq!(session.derived_fact_count(), 1);

        assert_eq!(stream.count(), 9);
        assert_eq!(session.derived_fact_count(), 10);
    }

    #[test]
    fn materialization_is_scoped_to_the_query() {
        let (mut store, _) = places(4);
        with_near_rule(&mut store);
        let session = ReasoningSession::new(&store);
        let nearby = session
            .query(&Pattern::new().relation(near("a", "b")))
            .unwrap();
        assert_eq!(session.resolve_all(&nearby).unwrap().len(), 3);
        assert_eq!(session.derived_fact_count(), 3);

        let place = session.query(&Pattern::new().isa("p", "place")).unwrap();
        assert_eq!(session.materialize(&place).unwrap(), 0);
        assert_eq!(store.inferred_count(), 0);

        assert_eq!(session.materialize(&nearby).unwrap(), 3);
        assert_eq!(store.inferred_count(), 3);
    }

    #[test]
    fn materialization_without_explanations_still_finds_support() {
        let (mut store, _) = places(3);
        with_near_rule(&mut store);
        let config = ReasonerConfig {
            explain: false,
            ..ReasonerConfig::default()
        };
        let session = ReasoningSession::with_config(&store, config);
        let nearby = session
            .query(&Pattern::new().relation(near("a", "b")))
            .unwrap();
        let answers = session.resolve_all(&nearby).unwrap();
        assert!(answers.iter().all(|a| a.explanation().is_none()));
        assert_eq!(session.materialize(&nearby).unwrap(), 2);
        assert_eq!(store.inferred_count(), 2);
    }
}
