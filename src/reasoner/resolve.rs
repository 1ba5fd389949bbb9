//! Query resolution: atomic queries by lookup and rule application,
//! conjunctions by a depth-first join in plan order.

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use super::state::SessionState;
use crate::answer::Answer;
use crate::atom::{Atom, Comparison, Predicate};
use crate::cache::RuleCache;
use crate::concept::{ConceptId, Value};
use crate::config::ReasonerConfig;
use crate::error::{ReasonerError, ReasonerResult};
use crate::explanation::Explanation;
use crate::plan::ResolutionPlan;
use crate::query::{ReasonerAtomicQuery, ReasonerQuery, predicate_holds};
use crate::rule::InferenceRule;
use crate::schema::Label;
use crate::storage::{InferredFact, Storage};
use crate::unifier::Unifier;

/// Everything a resolution needs. Cheap to clone; clones share the session
/// state.
#[derive(Clone)]
pub(crate) struct Resolver<'s> {
    pub(crate) storage: &'s dyn Storage,
    pub(crate) rules: Rc<RuleCache>,
    pub(crate) config: ReasonerConfig,
    pub(crate) state: Rc<SessionState>,
}

impl<'s> Resolver<'s> {
    // -----------------------------------------------------------------------
    // Concept access, session-derived concepts first
    // -----------------------------------------------------------------------

    pub(crate) fn value_of(&self, id: ConceptId) -> Option<Value> {
        if let Some(concept) = self.state.derived.borrow().concept(id) {
            return concept.value.clone();
        }
        self.storage.value_of(id)
    }

    pub(crate) fn type_of(&self, id: ConceptId) -> Option<Label> {
        if let Some(concept) = self.state.derived.borrow().concept(id) {
            return Some(concept.label.clone());
        }
        self.storage.concept(id).map(|c| c.label)
    }

    /// A resolver that explains its answers. When this one does not, the
    /// copy resolves over fresh caches so no unexplained answer is replayed.
    pub(crate) fn explaining(&self) -> Resolver<'s> {
        if self.config.explain {
            return self.clone();
        }
        Resolver {
            storage: self.storage,
            rules: self.rules.clone(),
            config: ReasonerConfig {
                explain: true,
                ..self.config.clone()
            },
            state: Rc::new(self.state.fork()),
        }
    }

    fn explained(&self, answer: Answer, explanation: impl FnOnce() -> Explanation) -> Answer {
        if self.config.explain {
            answer.explain(explanation())
        } else {
            answer
        }
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    /// Rules whose rewritten head unifies with `query` and fits the types of
    /// the concepts it pins, paired with the rewritten rule.
    pub(crate) fn applicable_rules(
        &self,
        query: &ReasonerAtomicQuery,
    ) -> Vec<(Arc<InferenceRule>, InferenceRule)> {
        let type_of = |id: ConceptId| self.type_of(id);
        self.rules
            .candidates(query)
            .into_iter()
            .filter_map(|rule| {
                let rewritten = rule.rewrite(query);
                let unifiers = rewritten.multi_unifier(query);
                let fits = unifiers
                    .iter()
                    .any(|u| rewritten.fits_bound_types(u, query, &type_of));
                fits.then_some((rule, rewritten))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Atomic resolution
    // -----------------------------------------------------------------------

    /// A cursor over the answers of `query` reachable in this pass. Complete
    /// entries and re-entered queries replay the cache; anything else is
    /// derived as the cursor is pulled.
    pub(crate) fn resolve_atomic(&self, query: &ReasonerAtomicQuery) -> AtomicCursor<'s> {
        if self.config.use_cache {
            let complete = {
                let answers = self.state.answers.borrow();
                answers.is_complete(query) || answers.is_complete(&query.without_ids())
            };
            if complete {
                let answers = self.state.answers.borrow_mut().get_answers(query);
                return AtomicCursor::replay(self.clone(), query.clone(), answers);
            }
        }
        if self.state.in_progress(query) {
            tracing::trace!(query = %query, "re-entered query, replaying cached answers");
            self.state.cut.set(true);
            let answers = self.state.answers.borrow_mut().get_answers(query);
            return AtomicCursor::replay(self.clone(), query.clone(), answers);
        }
        AtomicCursor::derive(self.clone(), query.clone())
    }

    /// Stored answers of `query`, fetched from storage once per session.
    fn lookup(&self, query: &ReasonerAtomicQuery) -> ReasonerResult<Vec<Answer>> {
        let cursor = self.state.lookups.borrow_mut().get_answer_stream(query);
        if let Some(cursor) = cursor {
            return Ok(cursor.collect());
        }
        let explained_query = Arc::new(query.query().clone());
        let answers: Vec<Answer> = self
            .storage
            .execute(query.query())?
            .into_iter()
            .map(|a| self.explained(a, || Explanation::lookup(explained_query.clone())))
            .collect();
        self.state
            .lookups
            .borrow_mut()
            .record_stream(query, answers.clone());
        Ok(answers)
    }

    /// Translate a head answer into `query`'s variables.
    fn onto_query(
        &self,
        head_answer: &Answer,
        unifier: &Unifier,
        query: &ReasonerAtomicQuery,
        rule: &InferenceRule,
    ) -> Option<Answer> {
        let answer = head_answer.unify(unifier).with_explanation(None);
        if answer.is_empty() && !head_answer.is_empty() {
            return None;
        }
        // An isa query asking for the type learns the type the head concludes.
        if let Atom::Isa(isa) = query.atom() {
            if let Some(type_var) = &isa.type_var {
                if !answer.contains(type_var) {
                    let id = rule
                        .head_label()
                        .and_then(|l| query.schema().id_of(l.as_str()))?;
                    return Some(answer.with_binding(type_var.clone(), id));
                }
            }
        }
        Some(answer)
    }

    /// Bind the head's variables for one body answer, creating derived
    /// concepts where the head introduces them. Also returns the facts the
    /// head asserts that storage lacks. `None` when the body answer leaves a
    /// head variable unbound.
    fn instantiate_head(
        &self,
        rule: &InferenceRule,
        body_answer: &Answer,
    ) -> ReasonerResult<Option<(Answer, Vec<InferredFact>)>> {
        let head = rule.head();
        let schema = head.schema();
        let mut answer = body_answer.project(&head.variables()).with_explanation(None);
        let mut concluded = Vec::new();
        match head.atom() {
            Atom::Isa(isa) => {
                let (Some(instance), Some(label)) = (answer.get(&isa.var), &isa.label) else {
                    return Ok(None);
                };
                self.state
                    .derived
                    .borrow_mut()
                    .add_isa(instance, label.clone());
                concluded.push(InferredFact::Isa {
                    instance,
                    label: label.clone(),
                });
            }
            Atom::Relation(rel) => {
                let Some(label) = &rel.label else {
                    return Ok(None);
                };
                let mut players = Vec::with_capacity(rel.arity());
                for rp in rel.role_players() {
                    let Some(player) = answer.get(&rp.player) else {
                        return Ok(None);
                    };
                    players.push((rp.effective_role(), player));
                    if let Some(role_var) = &rp.role_var {
                        if let Some(role_id) = schema.id_of(rp.effective_role().as_str()) {
                            answer = answer.with_binding(role_var.clone(), role_id);
                        }
                    }
                }
                players.sort();
                let id = match answer.get(&rel.var) {
                    Some(id) => id,
                    None => {
                        let (id, fact) = self.relation_id(label, players)?;
                        concluded.extend(fact);
                        id
                    }
                };
                answer = answer.with_binding(rel.var.clone(), id);
                if let Some(type_var) = &rel.type_var {
                    if let Some(type_id) = schema.id_of(label.as_str()) {
                        answer = answer.with_binding(type_var.clone(), type_id);
                    }
                }
            }
            Atom::Attribute(attr) => {
                let Some(owner) = answer.get(&attr.owner) else {
                    return Ok(None);
                };
                let attribute = match answer.get(&attr.attribute) {
                    Some(id) => id,
                    None => {
                        let value = head
                            .predicates_on(&attr.attribute)
                            .iter()
                            .filter_map(Predicate::constant)
                            .find(|(cmp, _)| *cmp == Comparison::Eq)
                            .map(|(_, v)| v.clone());
                        let Some(value) = value else {
                            return Ok(None);
                        };
                        let (id, fact) = self.attribute_id(&attr.label, value)?;
                        concluded.extend(fact);
                        id
                    }
                };
                answer = answer.with_binding(attr.attribute.clone(), attribute);
                if !self.storage.find_ownership(owner, attribute) {
                    self.state
                        .derived
                        .borrow_mut()
                        .add_ownership(owner, attribute);
                    concluded.push(InferredFact::Ownership { owner, attribute });
                }
                if let Some(edge_var) = &attr.relation_var {
                    let edge = self.edge_id(owner, attribute)?;
                    answer = answer.with_binding(edge_var.clone(), edge);
                }
            }
            _ => return Ok(None),
        }
        Ok(Some((answer, concluded)))
    }

    /// An existing relation with these players, or a derived one together
    /// with the fact that creates it.
    fn relation_id(
        &self,
        label: &Label,
        players: Vec<(Label, ConceptId)>,
    ) -> ReasonerResult<(ConceptId, Option<InferredFact>)> {
        if let Some(id) = self.storage.find_relation(label, &players) {
            return Ok((id, None));
        }
        let derived = self.state.derived.borrow().relation(label, &players);
        let id = match derived {
            Some(id) => id,
            None => {
                let id = self.storage.allocate_id()?;
                self.state
                    .derived
                    .borrow_mut()
                    .add_relation(id, label.clone(), players.clone());
                id
            }
        };
        let fact = InferredFact::Relation {
            id,
            label: label.clone(),
            players,
        };
        Ok((id, Some(fact)))
    }

    /// An existing attribute with this value, or a derived one together with
    /// the fact that creates it.
    fn attribute_id(
        &self,
        label: &Label,
        value: Value,
    ) -> ReasonerResult<(ConceptId, Option<InferredFact>)> {
        if let Some(id) = self.storage.find_attribute(label, &value) {
            return Ok((id, None));
        }
        let derived = self.state.derived.borrow().attribute(label, &value);
        let id = match derived {
            Some(id) => id,
            None => {
                let id = self.storage.allocate_id()?;
                self.state
                    .derived
                    .borrow_mut()
                    .add_attribute(id, label.clone(), value.clone());
                id
            }
        };
        let fact = InferredFact::Attribute {
            id,
            label: label.clone(),
            value,
        };
        Ok((id, Some(fact)))
    }

    fn edge_id(&self, owner: ConceptId, attribute: ConceptId) -> ReasonerResult<ConceptId> {
        if let Some(edge) = self.state.derived.borrow().edge(owner, attribute) {
            return Ok(edge);
        }
        let edge = self.storage.allocate_id()?;
        self.state
            .derived
            .borrow_mut()
            .add_edge(owner, attribute, edge);
        Ok(edge)
    }

    // -----------------------------------------------------------------------
    // Conjunctions
    // -----------------------------------------------------------------------

    pub(crate) fn plan(&self, query: &ReasonerQuery) -> ReasonerResult<ResolutionPlan> {
        let plan = if self.config.reuse_plans {
            self.state.plans.borrow_mut().plan(query)?
        } else {
            ResolutionPlan::new(query)?
        };
        Ok(plan)
    }

    /// Every answer of a conjunction reachable in this pass.
    pub(crate) fn resolve_conjunction(&self, query: &ReasonerQuery) -> ReasonerResult<Vec<Answer>> {
        self.join(query)?.collect()
    }

    pub(crate) fn join(&self, query: &ReasonerQuery) -> ReasonerResult<JoinCursor<'s>> {
        let plan = self.plan(query)?;
        let seed = query.substitution();
        let empty = query.is_type_incompatible();
        Ok(JoinCursor {
            resolver: self.clone(),
            plan,
            seed,
            frames: Vec::new(),
            state: if empty { JoinState::Done } else { JoinState::Fresh },
        })
    }
}

/// Translate the query's id bindings into head variables. `None` when two
/// bindings land on one head variable with different concepts.
fn push_through(substitution: &Answer, unifier: &Unifier) -> Option<Answer> {
    let inverse = unifier.inverse();
    let mut out = Answer::empty();
    for (var, id) in substitution.iter() {
        for head_var in inverse.get(var) {
            match out.get(head_var) {
                Some(bound) if bound != id => return None,
                Some(_) => {}
                None => out = out.with_binding(head_var.clone(), id),
            }
        }
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// Join cursor
// ---------------------------------------------------------------------------

enum JoinState {
    Fresh,
    Running,
    Done,
}

struct Frame<'s> {
    answers: AtomicCursor<'s>,
    partial: Answer,
    parts: Vec<Answer>,
}

/// Depth-first join of a plan's steps. Each step is resolved under the
/// bindings of the steps before it; cross-step predicates are checked as
/// soon as a step binds their variables. Steps are cursors, so one answer
/// costs only the derivations that lead to it.
pub(crate) struct JoinCursor<'s> {
    resolver: Resolver<'s>,
    plan: ResolutionPlan,
    seed: Answer,
    frames: Vec<Frame<'s>>,
    state: JoinState,
}

impl<'s> JoinCursor<'s> {
    fn holds(&self, answer: &Answer) -> bool {
        let value_of = |id: ConceptId| self.resolver.value_of(id);
        self.plan
            .cross_predicates()
            .iter()
            .all(|p| predicate_holds(p, answer, &value_of))
    }

    fn open(&mut self, depth: usize, partial: Answer, parts: Vec<Answer>) {
        let step = self.plan.steps()[depth].with_substitution(&partial);
        let answers = self.resolver.resolve_atomic(&step);
        self.frames.push(Frame {
            answers,
            partial,
            parts,
        });
    }

    fn finish(&self, answer: Answer, mut parts: Vec<Answer>) -> Answer {
        if parts.len() == 1 {
            let explanation = parts.pop().and_then(|p| p.explanation_arc().cloned());
            return answer.with_explanation(explanation);
        }
        self.resolver
            .explained(answer, || Explanation::join(parts))
    }
}

impl Iterator for JoinCursor<'_> {
    type Item = ReasonerResult<Answer>;

    fn next(&mut self) -> Option<Self::Item> {
        if let JoinState::Fresh = self.state {
            self.state = JoinState::Running;
            if self.plan.is_empty() {
                self.state = JoinState::Done;
                let seed = self.seed.clone();
                return self.holds(&seed).then_some(Ok(seed));
            }
            self.open(0, self.seed.clone(), Vec::new());
        }
        if let JoinState::Done = self.state {
            return None;
        }
        loop {
            let frame = self.frames.last_mut()?;
            let step_answer = match frame.answers.next() {
                Some(Ok(answer)) => answer,
                Some(Err(e)) => {
                    self.frames.clear();
                    self.state = JoinState::Done;
                    return Some(Err(e));
                }
                None => {
                    self.frames.pop();
                    continue;
                }
            };
            let Some(merged) = frame.partial.merge(&step_answer) else {
                continue;
            };
            let mut parts = frame.parts.clone();
            parts.push(step_answer);
            if !self.holds(&merged) {
                continue;
            }
            let depth = self.frames.len();
            if depth == self.plan.len() {
                return Some(Ok(self.finish(merged, parts)));
            }
            self.open(depth, merged, parts);
        }
    }
}

// ---------------------------------------------------------------------------
// Atomic cursor
// ---------------------------------------------------------------------------

enum Stage<'s> {
    Lookup,
    Stored(std::vec::IntoIter<Answer>),
    Rules(Option<RuleApplication<'s>>),
    /// Cached answers not produced by this cursor: the whole entry for a
    /// replay, earlier passes' answers after a derivation.
    Cached(std::vec::IntoIter<Answer>),
    Done,
}

/// Answers of one atomic query: stored answers first, then each applicable
/// rule in turn. Every new answer is recorded in the answer cache as it is
/// pulled. The query counts as in progress until the cursor is exhausted or
/// dropped, and is touched only when exhausted.
pub(crate) struct AtomicCursor<'s> {
    resolver: Resolver<'s>,
    query: ReasonerAtomicQuery,
    stage: Stage<'s>,
    rules: std::vec::IntoIter<(Arc<InferenceRule>, InferenceRule)>,
    token: Option<u64>,
    seen: HashSet<Answer>,
    added: usize,
}

impl<'s> AtomicCursor<'s> {
    fn replay(resolver: Resolver<'s>, query: ReasonerAtomicQuery, answers: Vec<Answer>) -> Self {
        Self {
            resolver,
            query,
            stage: Stage::Cached(answers.into_iter()),
            rules: Vec::new().into_iter(),
            token: None,
            seen: HashSet::new(),
            added: 0,
        }
    }

    fn derive(resolver: Resolver<'s>, query: ReasonerAtomicQuery) -> Self {
        let token = resolver.state.enter(&query);
        Self {
            resolver,
            query,
            stage: Stage::Lookup,
            rules: Vec::new().into_iter(),
            token: Some(token),
            seen: HashSet::new(),
            added: 0,
        }
    }

    /// Record `answer`; `None` if this cursor already yielded it.
    fn accept(&mut self, answer: Answer) -> Option<Answer> {
        if !self.seen.insert(answer.clone()) {
            return None;
        }
        if self
            .resolver
            .state
            .answers
            .borrow_mut()
            .record_answer(&self.query, answer.clone())
        {
            self.added += 1;
        }
        Some(answer)
    }

    fn leave(&mut self) {
        if let Some(token) = self.token.take() {
            self.resolver.state.leave(token);
        }
    }

    fn finish(&mut self) {
        self.leave();
        let state = &self.resolver.state;
        state.touched.borrow_mut().push(self.query.clone());
        let cached = state.answers.borrow_mut().get_answers(&self.query);
        tracing::debug!(
            query = %self.query,
            new = self.added,
            answers = cached.len(),
            "resolved atomic query"
        );
        self.stage = Stage::Cached(cached.into_iter());
    }

    fn fail(&mut self, e: ReasonerError) -> Option<ReasonerResult<Answer>> {
        self.leave();
        self.stage = Stage::Done;
        Some(Err(e))
    }
}

impl Iterator for AtomicCursor<'_> {
    type Item = ReasonerResult<Answer>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.stage {
                Stage::Lookup => match self.resolver.lookup(&self.query) {
                    Ok(answers) => self.stage = Stage::Stored(answers.into_iter()),
                    Err(e) => return self.fail(e),
                },
                Stage::Stored(answers) => match answers.next() {
                    Some(answer) => {
                        if let Some(answer) = self.accept(answer) {
                            return Some(Ok(answer));
                        }
                    }
                    None => {
                        self.rules = self.resolver.applicable_rules(&self.query).into_iter();
                        self.stage = Stage::Rules(None);
                    }
                },
                Stage::Rules(Some(application)) => match application.next() {
                    Some(Ok(answer)) => {
                        if let Some(answer) = self.accept(answer) {
                            return Some(Ok(answer));
                        }
                    }
                    Some(Err(e)) => return self.fail(e),
                    None => {
                        tracing::debug!(
                            rule = %application.rule.label(),
                            query = %self.query,
                            derived = application.derived,
                            "applied rule"
                        );
                        self.stage = Stage::Rules(None);
                    }
                },
                Stage::Rules(None) => match self.rules.next() {
                    Some((rule, rewritten)) => {
                        let application =
                            RuleApplication::new(self.resolver.clone(), &self.query, rule, rewritten);
                        self.stage = Stage::Rules(Some(application));
                    }
                    None => self.finish(),
                },
                Stage::Cached(answers) => match answers.next() {
                    Some(answer) => {
                        if self.seen.insert(answer.clone()) {
                            return Some(Ok(answer));
                        }
                    }
                    None => self.stage = Stage::Done,
                },
                Stage::Done => return None,
            }
        }
    }
}

impl Drop for AtomicCursor<'_> {
    fn drop(&mut self) {
        self.leave();
    }
}

// ---------------------------------------------------------------------------
// Rule application
// ---------------------------------------------------------------------------

/// Answers of a query derived through one rule: for each unifier of the
/// rewritten head, the rule body is joined lazily and the head instantiated
/// once per body answer.
struct RuleApplication<'s> {
    resolver: Resolver<'s>,
    query: ReasonerAtomicQuery,
    rule: Arc<InferenceRule>,
    rewritten: InferenceRule,
    substitution: Answer,
    explained_query: Arc<ReasonerQuery>,
    unifiers: std::vec::IntoIter<Unifier>,
    unifier: Unifier,
    body: Option<JoinCursor<'s>>,
    derived: usize,
}

impl<'s> RuleApplication<'s> {
    fn new(
        resolver: Resolver<'s>,
        query: &ReasonerAtomicQuery,
        rule: Arc<InferenceRule>,
        rewritten: InferenceRule,
    ) -> Self {
        let unifiers: Vec<Unifier> = rewritten.multi_unifier(query).iter().cloned().collect();
        Self {
            resolver,
            query: query.clone(),
            rule,
            rewritten,
            substitution: query.substitution(),
            explained_query: Arc::new(query.query().clone()),
            unifiers: unifiers.into_iter(),
            unifier: Unifier::default(),
            body: None,
            derived: 0,
        }
    }

    /// Move to the next unifier that fits the query, opening its body join.
    fn advance(&mut self) -> Option<ReasonerResult<()>> {
        let type_of = |id: ConceptId| self.resolver.type_of(id);
        let (unifier, head_substitution) = self.unifiers.by_ref().find_map(|unifier| {
            if !self.rewritten.fits_bound_types(&unifier, &self.query, &type_of) {
                return None;
            }
            let head_substitution = push_through(&self.substitution, &unifier)?;
            Some((unifier, head_substitution))
        })?;
        let body = self.rewritten.body().with_substitution(&head_substitution);
        Some(self.resolver.join(&body).map(|cursor| {
            self.unifier = unifier;
            self.body = Some(cursor);
        }))
    }

    /// The query answer one body answer concludes, if it satisfies the query.
    fn conclude(&self, body_answer: Answer) -> ReasonerResult<Option<Answer>> {
        let resolver = &self.resolver;
        let Some((head_answer, concluded)) = resolver.instantiate_head(&self.rewritten, &body_answer)?
        else {
            return Ok(None);
        };
        let Some(answer) = resolver.onto_query(&head_answer, &self.unifier, &self.query, &self.rewritten)
        else {
            return Ok(None);
        };
        let value_of = |id: ConceptId| resolver.value_of(id);
        if !answer.is_consistent_with(&self.substitution) || !self.query.satisfies(&answer, &value_of) {
            return Ok(None);
        }
        let parents = match body_answer.explanation() {
            Some(Explanation::Join { answers }) => answers.clone(),
            _ => vec![body_answer.clone()],
        };
        Ok(Some(resolver.explained(answer, || {
            Explanation::rule(self.rule.label().clone(), self.explained_query.clone(), parents)
                .concluding(concluded)
        })))
    }
}

impl Iterator for RuleApplication<'_> {
    type Item = ReasonerResult<Answer>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(body) = self.body.as_mut() else {
                if let Err(e) = self.advance()? {
                    return Some(Err(e));
                }
                continue;
            };
            match body.next() {
                Some(Ok(body_answer)) => match self.conclude(body_answer) {
                    Ok(Some(answer)) => {
                        self.derived += 1;
                        return Some(Ok(answer));
                    }
                    Ok(None) => {}
                    Err(e) => return Some(Err(e)),
                },
                Some(Err(e)) => return Some(Err(e)),
                None => self.body = None,
            }
        }
    }
}
