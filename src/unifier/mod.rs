//! Unifiers: variable mappings that prove one pattern subsumes another.
//!
//! A [`Unifier`] maps variables of a *child* pattern onto variables of a
//! *parent* pattern. It is a multimap: a child variable repeated across roles
//! in the parent (or unified with two parent variables) maps to several
//! parents. A [`MultiUnifier`] collects the alternative unifiers admitted by
//! role ambiguity; an empty one means "not unifiable" and is never an error.

mod unify;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub use unify::{atom_multi_unifier, query_multi_unifier};

use crate::answer::Answer;
use crate::schema::{Label, Schema, meta};
use crate::var::Variable;

// ---------------------------------------------------------------------------
// Unifier
// ---------------------------------------------------------------------------

/// Child variable → parent variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Unifier {
    map: BTreeMap<Variable, BTreeSet<Variable>>,
}

impl Unifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Variable, Variable)>) -> Self {
        let mut u = Unifier::new();
        for (child, parent) in pairs {
            u.insert(child, parent);
        }
        u
    }

    pub fn insert(&mut self, child: Variable, parent: Variable) {
        self.map.entry(child).or_default().insert(parent);
    }

    /// Parent variables `child` maps to.
    pub fn get(&self, child: &Variable) -> impl Iterator<Item = &Variable> {
        self.map.get(child).into_iter().flatten()
    }

    /// Child variables.
    pub fn keys(&self) -> impl Iterator<Item = &Variable> {
        self.map.keys()
    }

    /// Parent variables.
    pub fn values(&self) -> BTreeSet<&Variable> {
        self.map.values().flatten().collect()
    }

    /// All `(child, parent)` pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (&Variable, &Variable)> {
        self.map
            .iter()
            .flat_map(|(c, ps)| ps.iter().map(move |p| (c, p)))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Parent → child.
    pub fn inverse(&self) -> Unifier {
        Unifier::from_pairs(self.pairs().map(|(c, p)| (p.clone(), c.clone())))
    }

    /// Union of both mappings.
    pub fn merge(&self, other: &Unifier) -> Unifier {
        let mut out = self.clone();
        for (c, p) in other.pairs() {
            out.insert(c.clone(), p.clone());
        }
        out
    }

    /// `self` followed by `other`: child of `self` → parent of `other`.
    /// Pairs whose intermediate variable `other` does not map are dropped.
    pub fn compose(&self, other: &Unifier) -> Unifier {
        let mut out = Unifier::new();
        for (c, mid) in self.pairs() {
            for p in other.get(mid) {
                out.insert(c.clone(), p.clone());
            }
        }
        out
    }

    /// Whether every pair of `other` is also a pair of `self`.
    pub fn contains_all(&self, other: &Unifier) -> bool {
        other
            .pairs()
            .all(|(c, p)| self.map.get(c).is_some_and(|ps| ps.contains(p)))
    }

    /// Whether every variable maps to itself alone.
    pub fn is_identity(&self) -> bool {
        self.map
            .iter()
            .all(|(c, ps)| ps.len() == 1 && ps.contains(c))
    }

    /// Whether each child variable maps to a single parent.
    pub fn is_functional(&self) -> bool {
        self.map.values().all(|ps| ps.len() == 1)
    }

    /// Whether no parent variable is the image of two child variables.
    pub fn is_injective(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.map.values().flatten().all(|p| seen.insert(p))
    }

    /// A one-to-one renaming, when the unifier is one.
    pub fn as_renaming(&self) -> Option<BTreeMap<Variable, Variable>> {
        if !self.is_functional() || !self.is_injective() {
            return None;
        }
        Some(
            self.map
                .iter()
                .filter_map(|(c, ps)| ps.iter().next().map(|p| (c.clone(), p.clone())))
                .collect(),
        )
    }

    /// Translate `answer` into parent variables.
    pub fn apply(&self, answer: &Answer) -> Answer {
        answer.unify(self)
    }

    /// Apply as a renaming: mapped variables take their first parent,
    /// unmapped ones stay.
    pub fn rename(&self, var: &Variable) -> Variable {
        self.get(var).next().cloned().unwrap_or_else(|| var.clone())
    }
}

impl fmt::Display for Unifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (c, p)) in self.pairs().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{c}->{p}")?;
        }
        f.write_str("}")
    }
}

// ---------------------------------------------------------------------------
// MultiUnifier
// ---------------------------------------------------------------------------

/// Alternative unifiers; empty means "not unifiable".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MultiUnifier {
    unifiers: BTreeSet<Unifier>,
}

impl MultiUnifier {
    /// The failed unification.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A single unifier.
    pub fn single(unifier: Unifier) -> Self {
        Self {
            unifiers: BTreeSet::from([unifier]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.unifiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.unifiers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unifier> {
        self.unifiers.iter()
    }

    pub fn contains(&self, unifier: &Unifier) -> bool {
        self.unifiers.contains(unifier)
    }

    /// The unifier, if there is exactly one.
    pub fn unifier(&self) -> Option<&Unifier> {
        match self.unifiers.len() {
            1 => self.unifiers.iter().next(),
            _ => None,
        }
    }

    pub fn inverse(&self) -> MultiUnifier {
        self.unifiers.iter().map(Unifier::inverse).collect()
    }

    pub fn retain(&mut self, keep: impl FnMut(&Unifier) -> bool) {
        self.unifiers.retain(keep);
    }
}

impl FromIterator<Unifier> for MultiUnifier {
    fn from_iter<I: IntoIterator<Item = Unifier>>(iter: I) -> Self {
        Self {
            unifiers: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for MultiUnifier {
    type Item = Unifier;
    type IntoIter = std::collections::btree_set::IntoIter<Unifier>;

    fn into_iter(self) -> Self::IntoIter {
        self.unifiers.into_iter()
    }
}

// ---------------------------------------------------------------------------
// Unification modes
// ---------------------------------------------------------------------------

/// How strictly a child must match its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnifierType {
    /// Same types, roles, arity and predicates; one-to-one variable mapping.
    Exact,
    /// Rule head (child) against query atom (parent): the parent may be more
    /// general, have fewer role players and leave predicates open.
    Rule,
    /// As `Exact`, but only the presence of id bindings must agree.
    Structural,
    /// As `Exact`, but the parent may be more general and have fewer role
    /// players. Serves specific queries from general cached entries.
    Subsumptive,
}

impl UnifierType {
    /// Whether two child variables may collapse onto one parent variable.
    pub fn allows_non_injective(self) -> bool {
        matches!(self, UnifierType::Rule)
    }

    /// Whether the parent may bind fewer role players than the child.
    pub fn allows_fewer_parent_players(self) -> bool {
        matches!(self, UnifierType::Rule | UnifierType::Subsumptive)
    }

    /// Whether optional variables (type, role, edge) must be present on both
    /// sides or absent on both.
    pub fn requires_matching_slots(self) -> bool {
        matches!(self, UnifierType::Exact | UnifierType::Structural)
    }

    /// Type compatibility of a child label with a parent label.
    pub fn type_compatible(
        self,
        child: Option<&Label>,
        parent: Option<&Label>,
        schema: Option<&Schema>,
    ) -> bool {
        match self {
            UnifierType::Exact | UnifierType::Structural => child == parent,
            UnifierType::Rule | UnifierType::Subsumptive => match (child, parent) {
                (_, None) => true,
                (None, Some(p)) => p.as_str() == meta::THING,
                (Some(c), Some(p)) => match schema {
                    Some(s) => s.is_subtype(c.as_str(), p.as_str()),
                    None => c == p,
                },
            },
        }
    }

    /// Role compatibility of a child role with a parent role.
    pub fn role_compatible(self, child: &Label, parent: &Label, schema: Option<&Schema>) -> bool {
        match self {
            UnifierType::Exact | UnifierType::Structural => child == parent,
            UnifierType::Rule | UnifierType::Subsumptive => {
                if parent.as_str() == meta::ROLE || child == parent {
                    return true;
                }
                schema.is_some_and(|s| s.is_subtype(child.as_str(), parent.as_str()))
            }
        }
    }
}
