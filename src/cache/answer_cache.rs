//! Eager answer cache keyed by alpha equivalence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::answer::Answer;
use crate::equivalence::{Equivalence, Equivalent};
use crate::query::ReasonerAtomicQuery;
use crate::unifier::Unifier;

/// Answers of atomic queries, shared by every alpha-equivalent query.
///
/// Each equivalence class has one *canonical* query, the first one recorded.
/// Writes are unified onto the canonical variables; reads are unified back
/// onto the variables of the requesting query. The canonical → query
/// unifier is computed once per requesting query and memoized.
///
/// Answer sets are copy-on-write: a cursor from
/// [`AnswerCache::get_answer_stream`] keeps iterating the set as it was when
/// the cursor was taken. Later writes are only visible through a new cursor.
#[derive(Debug, Default)]
pub struct AnswerCache {
    index: HashMap<Equivalent<ReasonerAtomicQuery>, usize>,
    entries: Vec<CacheEntry>,
    revision: u64,
}

#[derive(Debug)]
struct CacheEntry {
    canonical: ReasonerAtomicQuery,
    answers: Arc<Vec<Answer>>,
    seen: HashSet<Answer>,
    complete: bool,
    unifiers: HashMap<ReasonerAtomicQuery, Unifier>,
}

impl CacheEntry {
    fn new(canonical: ReasonerAtomicQuery) -> Self {
        Self {
            canonical,
            answers: Arc::new(Vec::new()),
            seen: HashSet::new(),
            complete: false,
            unifiers: HashMap::new(),
        }
    }

    /// Canonical → `query` renaming.
    fn unifier_for(&mut self, query: &ReasonerAtomicQuery) -> Unifier {
        if let Some(u) = self.unifiers.get(query) {
            return u.clone();
        }
        let u = if self.canonical.query() == query.query() {
            Unifier::from_pairs(query.variables().into_iter().map(|v| (v.clone(), v)))
        } else {
            Equivalence::Alpha
                .renamings(self.canonical.query(), query.query())
                .into_iter()
                .next()
                .unwrap_or_default()
        };
        self.unifiers.insert(query.clone(), u.clone());
        u
    }

    fn insert(&mut self, answer: Answer) -> bool {
        if answer.is_empty() || !self.seen.insert(answer.clone()) {
            return false;
        }
        Arc::make_mut(&mut self.answers).push(answer);
        true
    }
}

impl AnswerCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, query: &ReasonerAtomicQuery) -> Option<usize> {
        self.index.get(&Equivalent::alpha(query.clone())).copied()
    }

    fn find_or_create(&mut self, query: &ReasonerAtomicQuery) -> usize {
        let key = Equivalent::alpha(query.clone());
        if let Some(&i) = self.index.get(&key) {
            return i;
        }
        let i = self.entries.len();
        self.entries.push(CacheEntry::new(query.clone()));
        self.index.insert(key, i);
        i
    }

    /// Record `answers` for `query`; returns how many were new.
    pub fn record(
        &mut self,
        query: &ReasonerAtomicQuery,
        answers: impl IntoIterator<Item = Answer>,
    ) -> usize {
        let i = self.find_or_create(query);
        let entry = &mut self.entries[i];
        let to_canonical = entry.unifier_for(query).inverse();
        let mut added = 0;
        for answer in answers {
            if entry.insert(answer.unify(&to_canonical)) {
                added += 1;
            }
        }
        self.revision += added as u64;
        added
    }

    /// Record one answer; returns whether it was new.
    pub fn record_answer(&mut self, query: &ReasonerAtomicQuery, answer: Answer) -> bool {
        self.record(query, [answer]) == 1
    }

    /// Every cached answer of `query`, in its own variables.
    ///
    /// When the query's own class has no entry but the id-stripped query has a
    /// complete one, the general answers filtered by the query's substitution
    /// are returned and recorded as a complete entry for the query.
    pub fn get_answers(&mut self, query: &ReasonerAtomicQuery) -> Vec<Answer> {
        if let Some(i) = self.find(query) {
            let entry = &mut self.entries[i];
            let u = entry.unifier_for(query);
            return entry.answers.iter().map(|a| a.unify(&u)).collect();
        }
        let general = query.without_ids();
        if general == *query || !self.is_complete(&general) {
            return Vec::new();
        }
        let substitution = query.substitution();
        let answers: Vec<Answer> = self
            .get_answers(&general)
            .into_iter()
            .filter(|a| a.is_consistent_with(&substitution))
            .collect();
        self.record(query, answers.iter().cloned());
        self.ack_completeness(query);
        answers
    }

    /// A snapshot cursor over the answers of `query`.
    pub fn get_answer_stream(&mut self, query: &ReasonerAtomicQuery) -> AnswerCursor {
        match self.find(query) {
            Some(i) => {
                let entry = &mut self.entries[i];
                AnswerCursor {
                    unifier: Some(entry.unifier_for(query)),
                    answers: entry.answers.clone(),
                    position: 0,
                }
            }
            None => AnswerCursor::from_answers(self.get_answers(query)),
        }
    }

    /// The cached answer of `query` that agrees with `partial`, or the empty
    /// answer when there is none.
    pub fn get_answer(&mut self, query: &ReasonerAtomicQuery, partial: &Answer) -> Answer {
        let partial = partial.project(&query.variables());
        self.get_answer_stream(query)
            .find(|a| a.is_consistent_with(&partial))
            .unwrap_or_default()
    }

    /// Whether the class of `query` has an entry.
    pub fn contains(&self, query: &ReasonerAtomicQuery) -> bool {
        self.find(query).is_some()
    }

    /// Mark the class of `query` as holding every answer storage and rules
    /// can produce.
    pub fn ack_completeness(&mut self, query: &ReasonerAtomicQuery) {
        let i = self.find_or_create(query);
        self.entries[i].complete = true;
    }

    pub fn is_complete(&self, query: &ReasonerAtomicQuery) -> bool {
        self.find(query).is_some_and(|i| self.entries[i].complete)
    }

    /// Whether the cache holds an answer for a ground `query`, looking at the
    /// query's own class and at its id-stripped class.
    pub fn answers_query(&self, query: &ReasonerAtomicQuery) -> bool {
        if let Some(i) = self.find(query) {
            if !self.entries[i].answers.is_empty() {
                return true;
            }
        }
        let general = query.without_ids();
        let Some(i) = self.find(&general) else {
            return false;
        };
        let entry = &self.entries[i];
        let Some(u) = Equivalence::Alpha
            .renamings(entry.canonical.query(), general.query())
            .into_iter()
            .next()
        else {
            return false;
        };
        let substitution = query.substitution();
        entry
            .answers
            .iter()
            .any(|a| a.unify(&u).is_consistent_with(&substitution))
    }

    /// Number of equivalence classes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total answers across all classes.
    pub fn answer_count(&self) -> usize {
        self.entries.iter().map(|e| e.answers.len()).sum()
    }

    /// Increases with every new answer recorded.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Canonical queries of all classes.
    pub fn queries(&self) -> impl Iterator<Item = &ReasonerAtomicQuery> {
        self.entries.iter().map(|e| &e.canonical)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
    }
}

/// Snapshot iterator over cached answers.
#[derive(Debug, Clone)]
pub struct AnswerCursor {
    answers: Arc<Vec<Answer>>,
    position: usize,
    unifier: Option<Unifier>,
}

impl AnswerCursor {
    pub fn from_answers(answers: Vec<Answer>) -> Self {
        Self {
            answers: Arc::new(answers),
            position: 0,
            unifier: None,
        }
    }

    /// Answers not yet returned.
    pub fn remaining(&self) -> usize {
        self.answers.len() - self.position
    }
}

impl Iterator for AnswerCursor {
    type Item = Answer;

    fn next(&mut self) -> Option<Answer> {
        let answer = self.answers.get(self.position)?;
        self.position += 1;
        Some(match &self.unifier {
            Some(u) => answer.unify(u),
            None => answer.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::ConceptId;
    use crate::query::{Pattern, Rel};
    use crate::schema::Schema;
    use crate::var::Variable;

    fn schema() -> Arc<Schema> {
        let mut s = Schema::new();
        s.define_entity("thing-a", None).unwrap();
        s.define_role("role1", None).unwrap();
        s.define_role("role2", None).unwrap();
        s.define_relation("binary", None).unwrap();
        s.relates("binary", "role1").unwrap();
        s.relates("binary", "role2").unwrap();
        s.plays("thing-a", "role1").unwrap();
        s.plays("thing-a", "role2").unwrap();
        Arc::new(s)
    }

    fn binary(a: &str, b: &str) -> ReasonerAtomicQuery {
        ReasonerAtomicQuery::new(
            &Pattern::new().relation(
                Rel::var("r")
                    .isa("binary")
                    .player("role1", a)
                    .player("role2", b),
            ),
            &schema(),
        )
        .unwrap()
    }

    fn answer(pairs: &[(&str, u64)]) -> Answer {
        Answer::from_pairs(
            pairs
                .iter()
                .map(|(v, n)| (Variable::new(v), ConceptId::new(*n).unwrap())),
        )
    }

    #[test]
    fn alpha_equivalent_queries_share_an_entry() {
        let mut cache = AnswerCache::new();
        let original = binary("x", "y");
        let renamed = binary("p1", "p2");
        cache.record(&original, [answer(&[("r", 10), ("x", 1), ("y", 2)])]);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get_answers(&renamed),
            vec![answer(&[("r", 10), ("p1", 1), ("p2", 2)])]
        );
        cache.record(&renamed, [answer(&[("r", 11), ("p1", 3), ("p2", 4)])]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_answers(&original).len(), 2);
    }

    #[test]
    fn repeated_players_keep_one_entry() {
        let mut cache = AnswerCache::new();
        let q = ReasonerAtomicQuery::new(
            &Pattern::new().relation(
                Rel::var("r")
                    .isa("binary")
                    .player("role1", "x")
                    .player("role1", "y")
                    .player("role1", "x"),
            ),
            &schema(),
        )
        .unwrap();
        let a = answer(&[("r", 10), ("x", 1), ("y", 2)]);
        cache.record(&q, [a.clone()]);
        cache.record(&q, [a.clone()]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_answers(&q), vec![a]);
    }

    #[test]
    fn recording_twice_does_not_duplicate() {
        let mut cache = AnswerCache::new();
        let q = binary("x", "y");
        let answers = vec![
            answer(&[("r", 10), ("x", 1), ("y", 2)]),
            answer(&[("r", 11), ("x", 2), ("y", 3)]),
        ];
        assert_eq!(cache.record(&q, answers.clone()), 2);
        assert_eq!(cache.record(&q, answers.clone()), 0);
        assert_eq!(cache.get_answers(&q), answers);
    }

    #[test]
    fn cursors_are_snapshots() {
        let mut cache = AnswerCache::new();
        let q = binary("x", "y");
        cache.record(&q, [answer(&[("r", 10), ("x", 1), ("y", 2)])]);
        let cursor = cache.get_answer_stream(&q);
        cache.record_answer(&q, answer(&[("r", 11), ("x", 3), ("y", 4)]));
        assert_eq!(cursor.count(), 1);
        assert_eq!(cache.get_answer_stream(&q).count(), 2);
    }

    #[test]
    fn missing_answer_is_empty() {
        let mut cache = AnswerCache::new();
        let q = binary("x", "y");
        cache.record(&q, [answer(&[("r", 10), ("x", 1), ("y", 2)])]);
        assert_eq!(
            cache.get_answer(&q, &answer(&[("x", 1)])),
            answer(&[("r", 10), ("x", 1), ("y", 2)])
        );
        assert!(cache.get_answer(&q, &answer(&[("x", 9)])).is_empty());
    }

    #[test]
    fn specific_queries_fall_back_to_complete_general_entries() {
        let mut cache = AnswerCache::new();
        let general = binary("x", "y");
        cache.record(
            &general,
            [
                answer(&[("r", 10), ("x", 1), ("y", 2)]),
                answer(&[("r", 11), ("x", 3), ("y", 4)]),
            ],
        );
        let specific = general.with_substitution(&answer(&[("x", 3)]));
        assert!(cache.get_answers(&specific).is_empty());
        cache.ack_completeness(&general);
        assert!(cache.answers_query(&specific));
        assert_eq!(
            cache.get_answers(&specific),
            vec![answer(&[("r", 11), ("x", 3), ("y", 4)])]
        );
        assert!(cache.is_complete(&specific));
    }
}
