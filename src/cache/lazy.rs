//! Lazy answer cache: memoized answer streams keyed by alpha equivalence.
//!
//! Recorded streams are only pulled when a cursor needs more answers, and
//! every pulled answer is memoized so later cursors replay it instead of
//! pulling again. Each record bumps the cache generation; a cursor only sees
//! answers recorded at or before the generation it was taken at.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use crate::answer::Answer;
use crate::equivalence::{Equivalence, Equivalent};
use crate::query::ReasonerAtomicQuery;
use crate::unifier::Unifier;

type Source = Box<dyn Iterator<Item = Answer>>;

#[derive(Default)]
struct LazyBuffer {
    /// Pulled answers tagged with the generation of their source.
    answers: Vec<(u64, Answer)>,
    seen: HashSet<Answer>,
    sources: VecDeque<(u64, Source)>,
}

impl LazyBuffer {
    fn push(&mut self, generation: u64, answer: Answer) {
        if !answer.is_empty() && self.seen.insert(answer.clone()) {
            self.answers.push((generation, answer));
        }
    }
}

struct LazyEntry {
    canonical: ReasonerAtomicQuery,
    buffer: Rc<RefCell<LazyBuffer>>,
    unifiers: HashMap<ReasonerAtomicQuery, Unifier>,
}

impl LazyEntry {
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
}

/// Memoized answer streams.
#[derive(Default)]
pub struct LazyAnswerCache {
    index: HashMap<Equivalent<ReasonerAtomicQuery>, usize>,
    entries: Vec<LazyEntry>,
    generation: u64,
}

impl fmt::Debug for LazyAnswerCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyAnswerCache")
            .field("entries", &self.entries.len())
            .field("generation", &self.generation)
            .finish()
    }
}

impl LazyAnswerCache {
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
        self.entries.push(LazyEntry {
            canonical: query.clone(),
            buffer: Rc::new(RefCell::new(LazyBuffer::default())),
            unifiers: HashMap::new(),
        });
        self.index.insert(key, i);
        i
    }

    /// Attach a stream of answers of `query`. Nothing is pulled until a
    /// cursor asks for it.
    pub fn record_stream<I>(&mut self, query: &ReasonerAtomicQuery, stream: I)
    where
        I: IntoIterator<Item = Answer>,
        I::IntoIter: 'static,
    {
        self.generation += 1;
        let generation = self.generation;
        let i = self.find_or_create(query);
        let entry = &mut self.entries[i];
        let to_canonical = entry.unifier_for(query).inverse();
        let source: Source = Box::new(stream.into_iter().map(move |a| a.unify(&to_canonical)));
        entry
            .buffer
            .borrow_mut()
            .sources
            .push_back((generation, source));
    }

    /// Record a single answer of `query`.
    pub fn record_answer(&mut self, query: &ReasonerAtomicQuery, answer: Answer) {
        self.generation += 1;
        let generation = self.generation;
        let i = self.find_or_create(query);
        let entry = &mut self.entries[i];
        let canonical = answer.unify(&entry.unifier_for(query).inverse());
        entry.buffer.borrow_mut().push(generation, canonical);
    }

    /// A cursor over the answers of `query` as recorded so far. `None` when
    /// the class has no entry.
    pub fn get_answer_stream(&mut self, query: &ReasonerAtomicQuery) -> Option<LazyCursor> {
        let generation = self.generation;
        let i = self.find(query)?;
        let entry = &mut self.entries[i];
        Some(LazyCursor {
            unifier: entry.unifier_for(query),
            buffer: entry.buffer.clone(),
            position: 0,
            generation,
        })
    }

    pub fn contains(&self, query: &ReasonerAtomicQuery) -> bool {
        self.find(query).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. Open cursors keep their buffers.
    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
    }
}

/// Cursor over a lazy cache entry, fixed to the generation it was taken at.
pub struct LazyCursor {
    buffer: Rc<RefCell<LazyBuffer>>,
    unifier: Unifier,
    position: usize,
    generation: u64,
}

impl LazyCursor {
    /// Pull one answer from the oldest source this cursor may see. Returns
    /// false when no such source has anything left.
    fn pull(&self) -> bool {
        loop {
            let taken = {
                let mut buffer = self.buffer.borrow_mut();
                let Some(pos) = buffer
                    .sources
                    .iter()
                    .position(|(g, _)| *g <= self.generation)
                else {
                    return false;
                };
                buffer.sources.remove(pos).map(|s| (pos, s))
            };
            let Some((pos, (generation, mut source))) = taken else {
                return false;
            };
            // The source runs without the buffer borrowed.
            let next = source.next();
            let mut buffer = self.buffer.borrow_mut();
            match next {
                Some(answer) => {
                    buffer.sources.insert(pos, (generation, source));
                    buffer.push(generation, answer);
                    return true;
                }
                None => continue,
            }
        }
    }
}

impl Iterator for LazyCursor {
    type Item = Answer;

    fn next(&mut self) -> Option<Answer> {
        loop {
            {
                let buffer = self.buffer.borrow();
                while let Some((generation, answer)) = buffer.answers.get(self.position) {
                    self.position += 1;
                    if *generation <= self.generation {
                        return Some(answer.unify(&self.unifier));
                    }
                }
            }
            if !self.pull() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::Arc;

    use super::*;
    use crate::concept::ConceptId;
    use crate::query::Pattern;
    use crate::schema::Schema;
    use crate::var::Variable;

    fn person(var: &str) -> ReasonerAtomicQuery {
        let mut s = Schema::new();
        s.define_entity("person", None).unwrap();
        ReasonerAtomicQuery::new(&Pattern::new().isa(var, "person"), &Arc::new(s)).unwrap()
    }

    fn answer(var: &str, n: u64) -> Answer {
        Answer::from_pairs([(Variable::new(var), ConceptId::new(n).unwrap())])
    }

    #[test]
    fn streams_are_pulled_on_demand_and_memoized() {
        let pulled = Rc::new(Cell::new(0));
        let counter = pulled.clone();
        let mut cache = LazyAnswerCache::new();
        let q = person("x");
        cache.record_stream(
            &q,
            (1..=3).map(move |n| {
                counter.set(counter.get() + 1);
                answer("x", n)
            }),
        );
        assert_eq!(pulled.get(), 0);
        let first: Vec<Answer> = cache.get_answer_stream(&q).unwrap().take(1).collect();
        assert_eq!(first, vec![answer("x", 1)]);
        assert_eq!(pulled.get(), 1);
        let all: Vec<Answer> = cache.get_answer_stream(&person("y")).unwrap().collect();
        assert_eq!(all, vec![answer("y", 1), answer("y", 2), answer("y", 3)]);
        assert_eq!(pulled.get(), 3);
        assert_eq!(cache.get_answer_stream(&q).unwrap().count(), 3);
        assert_eq!(pulled.get(), 3);
    }

    #[test]
    fn later_records_are_invisible_to_open_cursors() {
        let mut cache = LazyAnswerCache::new();
        let q = person("x");
        cache.record_answer(&q, answer("x", 1));
        let stale = cache.get_answer_stream(&q).unwrap();
        cache.record_answer(&q, answer("x", 2));
        cache.record_stream(&q, vec![answer("x", 3)]);
        assert_eq!(stale.count(), 1);
        assert_eq!(cache.get_answer_stream(&q).unwrap().count(), 3);
    }

    #[test]
    fn unknown_queries_have_no_stream() {
        let mut cache = LazyAnswerCache::new();
        assert!(cache.get_answer_stream(&person("x")).is_none());
    }
}
