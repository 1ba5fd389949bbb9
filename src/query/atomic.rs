//! Atomic queries: one selectable atom plus its predicates.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use super::{Pattern, ReasonerQuery};
use crate::answer::Answer;
use crate::atom::Atom;
use crate::error::{QueryError, QueryResult};
use crate::schema::Schema;
use crate::unifier::{MultiUnifier, Unifier, UnifierType};

/// A query with exactly one selectable atom.
///
/// Atomic queries are the unit of caching and rule application. They deref
/// to [`ReasonerQuery`] for everything that is not atom-specific.
#[derive(Debug, Clone)]
pub struct ReasonerAtomicQuery {
    query: ReasonerQuery,
    index: usize,
}

impl PartialEq for ReasonerAtomicQuery {
    fn eq(&self, other: &Self) -> bool {
        self.query == other.query
    }
}

impl Eq for ReasonerAtomicQuery {}

impl Hash for ReasonerAtomicQuery {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.query.hash(state);
    }
}

impl ReasonerAtomicQuery {
    pub fn new(pattern: &Pattern, schema: &Arc<Schema>) -> QueryResult<Self> {
        Self::try_from(ReasonerQuery::new(pattern, schema)?)
    }

    /// The selectable atom.
    pub fn atom(&self) -> &Atom {
        &self.query.atoms()[self.index]
    }

    pub fn query(&self) -> &ReasonerQuery {
        &self.query
    }

    pub fn into_query(self) -> ReasonerQuery {
        self.query
    }

    pub fn with_substitution(&self, answer: &Answer) -> ReasonerAtomicQuery {
        self.rewrap(self.query.with_substitution(answer))
    }

    pub fn without_ids(&self) -> ReasonerAtomicQuery {
        self.rewrap(self.query.without_ids())
    }

    pub fn rename(&self, unifier: &Unifier) -> ReasonerAtomicQuery {
        self.rewrap(self.query.rename(unifier))
    }

    /// Unifiers mapping this query (the child) onto `parent`.
    pub fn multi_unifier(&self, parent: &ReasonerAtomicQuery, ty: UnifierType) -> MultiUnifier {
        self.query.multi_unifier(&parent.query, ty)
    }

    // Rewrites never add selectable atoms.
    fn rewrap(&self, query: ReasonerQuery) -> ReasonerAtomicQuery {
        let index = query
            .atoms()
            .iter()
            .position(Atom::is_selectable)
            .unwrap_or(self.index);
        ReasonerAtomicQuery { query, index }
    }
}

impl TryFrom<ReasonerQuery> for ReasonerAtomicQuery {
    type Error = QueryError;

    fn try_from(query: ReasonerQuery) -> QueryResult<Self> {
        let selectable: Vec<usize> = query
            .atoms()
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_selectable())
            .map(|(i, _)| i)
            .collect();
        match selectable.as_slice() {
            [index] => Ok(ReasonerAtomicQuery {
                index: *index,
                query,
            }),
            other => Err(QueryError::NotAtomic { count: other.len() }),
        }
    }
}

impl Deref for ReasonerAtomicQuery {
    type Target = ReasonerQuery;

    fn deref(&self) -> &ReasonerQuery {
        &self.query
    }
}

impl fmt::Display for ReasonerAtomicQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.query.fmt(f)
    }
}
