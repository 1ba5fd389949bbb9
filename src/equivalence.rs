//! Query equivalence and equivalence-consistent hashing.
//!
//! Three notions are supported:
//!
//! - **Equality**: the same atoms, variable names included.
//! - **Alpha equivalence**: equal up to a consistent, one-to-one renaming of
//!   variables. Ids and constant values must agree.
//! - **Structural equivalence**: alpha equivalence that additionally ignores
//!   *which* concepts variables are pinned to, only *whether* they are.
//!
//! Hashes never look at variable names, so equivalent queries always hash
//! alike. [`Equivalent`] wraps a query as a hash-map key under one of these
//! notions; the answer and plan caches index their entries with it.

use std::collections::BTreeSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::atom::{Atom, Operand, Predicate, VarPredicates};
use crate::query::{ReasonerAtomicQuery, ReasonerQuery};
use crate::schema::Label;
use crate::unifier::{Unifier, UnifierType, atom_multi_unifier, query_multi_unifier};
use crate::var::Variable;

/// Which notion of "the same query" to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Equivalence {
    Equality,
    Alpha,
    Structural,
}

impl Equivalence {
    pub fn equivalent(self, a: &ReasonerQuery, b: &ReasonerQuery) -> bool {
        match self {
            Equivalence::Equality => a == b,
            Equivalence::Alpha | Equivalence::Structural => {
                self.hash(a) == self.hash(b) && !self.renamings(a, b).is_empty()
            }
        }
    }

    /// A hash consistent with [`Equivalence::equivalent`].
    pub fn hash(self, query: &ReasonerQuery) -> u64 {
        match self {
            Equivalence::Equality => {
                let mut h = DefaultHasher::new();
                query.hash(&mut h);
                h.finish()
            }
            Equivalence::Alpha | Equivalence::Structural => {
                let structural = self == Equivalence::Structural;
                query.atoms().iter().fold(0u64, |acc, atom| {
                    acc.wrapping_add(atom_hash(atom, query.var_predicates(), structural))
                })
            }
        }
    }

    /// Renamings `r` of the variables of `a` with `r(a)` equivalent to `b`.
    /// For equality this is the identity when `a == b`.
    pub fn renamings(self, a: &ReasonerQuery, b: &ReasonerQuery) -> Vec<Unifier> {
        let ty = match self {
            Equivalence::Equality => {
                return if a == b {
                    vec![Unifier::from_pairs(
                        a.variables().into_iter().map(|v| (v.clone(), v)),
                    )]
                } else {
                    Vec::new()
                };
            }
            Equivalence::Alpha => UnifierType::Exact,
            Equivalence::Structural => UnifierType::Structural,
        };
        let target = match self {
            Equivalence::Structural => b.structural_form(),
            _ => b.clone(),
        };
        query_multi_unifier(a, b, ty)
            .into_iter()
            .filter(|u| {
                if u.as_renaming().is_none() {
                    return false;
                }
                let renamed = a.rename(u);
                match self {
                    Equivalence::Structural => renamed.structural_form() == target,
                    _ => renamed == target,
                }
            })
            .collect()
    }
}

/// Whether two atoms are alpha (or structurally) equivalent on their own,
/// without the predicates of any surrounding query.
pub(crate) fn atoms_equivalent(a: &Atom, b: &Atom, structural: bool) -> bool {
    let none = VarPredicates::default();
    if atom_hash(a, &none, structural) != atom_hash(b, &none, structural) {
        return false;
    }
    let ty = if structural {
        UnifierType::Structural
    } else {
        UnifierType::Exact
    };
    let blank = |atom: &Atom| -> Atom {
        match atom {
            Atom::Predicate(Predicate::Id { var, .. }) if structural => {
                Atom::Predicate(Predicate::Id {
                    var: var.clone(),
                    id: crate::concept::ConceptId::placeholder(),
                })
            }
            other => other.clone(),
        }
    };
    let target = blank(b);
    atom_multi_unifier(a, &none, b, &none, ty, None)
        .iter()
        .filter(|u| u.as_renaming().is_some())
        .any(|u| blank(&a.map_vars(&|v| u.rename(v))) == target)
}

/// Hash of an atom in the context of its query's predicates. Variable names
/// do not contribute; what each variable is constrained to does.
pub(crate) fn atom_hash(atom: &Atom, preds: &VarPredicates, structural: bool) -> u64 {
    let mut h = DefaultHasher::new();
    atom.kind_name().hash(&mut h);
    let sig = |v: &Variable| var_signature(v, preds, structural);
    match atom {
        Atom::Isa(a) => {
            a.label.hash(&mut h);
            a.type_var.is_some().hash(&mut h);
            sig(&a.var).hash(&mut h);
        }
        Atom::Relation(a) => {
            a.label.hash(&mut h);
            a.type_var.is_some().hash(&mut h);
            sig(&a.var).hash(&mut h);
            let mut players: Vec<(Label, bool, Vec<String>)> = a
                .role_players()
                .iter()
                .map(|rp| (rp.effective_role(), rp.role_var.is_some(), sig(&rp.player)))
                .collect();
            players.sort();
            players.hash(&mut h);
            let distinct: BTreeSet<&Variable> = a.players().collect();
            distinct.len().hash(&mut h);
        }
        Atom::Attribute(a) => {
            a.label.hash(&mut h);
            a.relation_var.is_some().hash(&mut h);
            sig(&a.owner).hash(&mut h);
            sig(&a.attribute).hash(&mut h);
            (a.owner == a.attribute).hash(&mut h);
        }
        Atom::Sub(a) => {
            a.label.hash(&mut h);
            sig(&a.var).hash(&mut h);
        }
        Atom::Plays(a) => {
            a.role.hash(&mut h);
            sig(&a.var).hash(&mut h);
        }
        Atom::Relates(a) => {
            a.role.hash(&mut h);
            sig(&a.var).hash(&mut h);
        }
        Atom::Predicate(p) => match p {
            Predicate::Id { id, .. } => {
                if !structural {
                    id.hash(&mut h);
                }
            }
            Predicate::Value {
                comparison,
                operand,
                ..
            } => {
                comparison.hash(&mut h);
                match operand {
                    Operand::Const(v) => v.hash(&mut h),
                    Operand::Var(_) => "var".hash(&mut h),
                }
            }
            Predicate::Neq { .. } => {}
        },
    }
    h.finish()
}

fn var_signature(var: &Variable, preds: &VarPredicates, structural: bool) -> Vec<String> {
    let mut sig: Vec<String> = preds
        .on(var)
        .iter()
        .map(|p| match p {
            Predicate::Id { .. } if structural => "id".to_string(),
            Predicate::Id { id, .. } => format!("id:{}", id.get()),
            Predicate::Value {
                comparison,
                operand: Operand::Const(v),
                ..
            } => format!("{comparison}{v:?}"),
            other => other.to_string(),
        })
        .collect();
    sig.sort();
    sig
}

// ---------------------------------------------------------------------------
// Equivalence-keyed wrapper
// ---------------------------------------------------------------------------

/// Anything that can be viewed as a [`ReasonerQuery`].
pub trait AsQuery {
    fn as_query(&self) -> &ReasonerQuery;
}

impl AsQuery for ReasonerQuery {
    fn as_query(&self) -> &ReasonerQuery {
        self
    }
}

impl AsQuery for ReasonerAtomicQuery {
    fn as_query(&self) -> &ReasonerQuery {
        self.query()
    }
}

impl<T: AsQuery> AsQuery for Arc<T> {
    fn as_query(&self) -> &ReasonerQuery {
        T::as_query(self)
    }
}

/// A query compared and hashed under one [`Equivalence`].
#[derive(Debug, Clone)]
pub struct Equivalent<T> {
    kind: Equivalence,
    hash: u64,
    item: T,
}

impl<T: AsQuery> Equivalent<T> {
    pub fn new(kind: Equivalence, item: T) -> Self {
        let hash = kind.hash(item.as_query());
        Self { kind, hash, item }
    }

    pub fn alpha(item: T) -> Self {
        Self::new(Equivalence::Alpha, item)
    }

    pub fn structural(item: T) -> Self {
        Self::new(Equivalence::Structural, item)
    }

    pub fn get(&self) -> &T {
        &self.item
    }

    pub fn into_inner(self) -> T {
        self.item
    }

    pub fn kind(&self) -> Equivalence {
        self.kind
    }

    pub fn equivalence_hash(&self) -> u64 {
        self.hash
    }
}

impl<T: AsQuery> PartialEq for Equivalent<T> {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.hash == other.hash
            && self
                .kind
                .equivalent(self.item.as_query(), other.item.as_query())
    }
}

impl<T: AsQuery> Eq for Equivalent<T> {}

impl<T: AsQuery> Hash for Equivalent<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::concept::ConceptId;
    use crate::query::{Pattern, Rel};
    use crate::schema::Schema;

    fn schema() -> Arc<Schema> {
        let mut s = Schema::new();
        s.define_entity("person", None).unwrap();
        s.define_attribute("name", None).unwrap();
        s.define_role("friend", None).unwrap();
        s.define_relation("friendship", None).unwrap();
        s.relates("friendship", "friend").unwrap();
        s.plays("person", "friend").unwrap();
        s.owns("person", "name").unwrap();
        Arc::new(s)
    }

    fn friends(a: &str, b: &str) -> Pattern {
        Pattern::new().relation(
            Rel::var("r")
                .isa("friendship")
                .player("friend", a)
                .player("friend", b),
        )
    }

    fn q(pattern: Pattern) -> ReasonerQuery {
        ReasonerQuery::new(&pattern, &schema()).unwrap()
    }

    fn id(n: u64) -> ConceptId {
        ConceptId::new(n).unwrap()
    }

    #[test]
    fn renamed_queries_are_alpha_equivalent() {
        let a = q(friends("x", "y").has("x", "name", "n"));
        let b = q(friends("p", "q").has("p", "name", "m"));
        assert_ne!(a, b);
        assert!(a.is_alpha_equivalent(&b));
        assert_eq!(a.alpha_equivalence_hash(), b.alpha_equivalence_hash());
        let c = q(friends("p", "q").has("q", "name", "m"));
        assert!(a.is_alpha_equivalent(&c));
        let d = q(friends("x", "x"));
        assert!(!q(friends("x", "y")).is_alpha_equivalent(&d));
    }

    #[test]
    fn ids_separate_alpha_but_not_structural() {
        let a = q(friends("x", "y").id("x", id(1)));
        let b = q(friends("p", "q").id("q", id(2)));
        assert!(!a.is_alpha_equivalent(&b));
        assert!(a.is_structurally_equivalent(&b));
        assert_eq!(a.structural_equivalence_hash(), b.structural_equivalence_hash());
        let unbound = q(friends("x", "y"));
        assert!(!a.is_structurally_equivalent(&unbound));
    }

    #[test]
    fn values_participate_in_equivalence() {
        let a = q(Pattern::new().has_value("x", "name", "Alice"));
        let b = q(Pattern::new().has_value("y", "name", "Alice"));
        let c = q(Pattern::new().has_value("y", "name", "Bob"));
        assert!(a.is_alpha_equivalent(&b));
        assert!(!a.is_alpha_equivalent(&c));
    }

    #[test]
    fn equivalent_keys_deduplicate() {
        let mut set = HashSet::new();
        set.insert(Equivalent::alpha(q(friends("x", "y"))));
        set.insert(Equivalent::alpha(q(friends("a", "b"))));
        set.insert(Equivalent::alpha(q(friends("a", "b").id("a", id(4)))));
        assert_eq!(set.len(), 2);
        let mut structural = HashSet::new();
        structural.insert(Equivalent::structural(q(friends("x", "y").id("x", id(3)))));
        structural.insert(Equivalent::structural(q(friends("a", "b").id("b", id(4)))));
        assert_eq!(structural.len(), 1);
    }

    #[test]
    fn renamings_map_one_query_onto_another() {
        let a = q(friends("x", "y"));
        let b = q(friends("p", "q"));
        let renamings = Equivalence::Alpha.renamings(&a, &b);
        assert_eq!(renamings.len(), 2);
        for r in renamings {
            assert_eq!(a.rename(&r), b);
        }
    }
}
