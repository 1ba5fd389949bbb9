//! Atom model: the indivisible fragments queries and rules are made of.
//!
//! Atoms form a closed sum type. Every operation that depends on the kind of
//! atom (equality, unification, role inference, storage matching) matches on
//! it exhaustively.

pub mod predicate;
pub mod relation;

use std::collections::HashMap;
use std::fmt;

pub use predicate::{Comparison, Operand, Predicate};
pub use relation::{RelationAtom, RolePlayer};

use crate::concept::ConceptId;
use crate::schema::Label;
use crate::var::Variable;

/// `$var isa label` (or `$var isa $type_var`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IsaAtom {
    pub var: Variable,
    pub type_var: Option<Variable>,
    pub label: Option<Label>,
}

/// `$owner has label $attribute` (optionally `via $relation_var`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeAtom {
    pub owner: Variable,
    pub attribute: Variable,
    /// Binds the ownership edge itself when the pattern names it.
    pub relation_var: Option<Variable>,
    pub label: Label,
}

/// `$var sub label`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubAtom {
    pub var: Variable,
    pub label: Label,
}

/// `$var plays role`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlaysAtom {
    pub var: Variable,
    pub role: Label,
}

/// `$var relates role`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelatesAtom {
    pub var: Variable,
    pub role: Label,
}

/// A pattern fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Atom {
    Isa(IsaAtom),
    Relation(RelationAtom),
    Attribute(AttributeAtom),
    Sub(SubAtom),
    Plays(PlaysAtom),
    Relates(RelatesAtom),
    Predicate(Predicate),
}

impl Atom {
    /// Every variable the atom mentions, without duplicates.
    pub fn variables(&self) -> Vec<Variable> {
        let mut vars: Vec<Variable> = Vec::new();
        let mut push = |v: &Variable| {
            if !vars.contains(v) {
                vars.push(v.clone());
            }
        };
        match self {
            Atom::Isa(a) => {
                push(&a.var);
                a.type_var.iter().for_each(&mut push);
            }
            Atom::Relation(a) => {
                push(&a.var);
                a.type_var.iter().for_each(&mut push);
                for rp in a.role_players() {
                    rp.role_var.iter().for_each(&mut push);
                    push(&rp.player);
                }
            }
            Atom::Attribute(a) => {
                push(&a.owner);
                push(&a.attribute);
                a.relation_var.iter().for_each(&mut push);
            }
            Atom::Sub(a) => push(&a.var),
            Atom::Plays(a) => push(&a.var),
            Atom::Relates(a) => push(&a.var),
            Atom::Predicate(p) => p.variables().iter().for_each(&mut push),
        }
        vars
    }

    /// The variable bound to the instance (or type) the atom is about.
    pub fn var(&self) -> Option<&Variable> {
        match self {
            Atom::Isa(a) => Some(&a.var),
            Atom::Relation(a) => Some(&a.var),
            Atom::Attribute(a) => Some(&a.attribute),
            Atom::Sub(a) => Some(&a.var),
            Atom::Plays(a) => Some(&a.var),
            Atom::Relates(a) => Some(&a.var),
            Atom::Predicate(_) => None,
        }
    }

    /// The schema label the atom names.
    pub fn label(&self) -> Option<&Label> {
        match self {
            Atom::Isa(a) => a.label.as_ref(),
            Atom::Relation(a) => a.label.as_ref(),
            Atom::Attribute(a) => Some(&a.label),
            Atom::Sub(a) => Some(&a.label),
            Atom::Plays(a) => Some(&a.role),
            Atom::Relates(a) => Some(&a.role),
            Atom::Predicate(_) => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Atom::Isa(_) => "isa",
            Atom::Relation(_) => "relation",
            Atom::Attribute(_) => "attribute",
            Atom::Sub(_) => "sub",
            Atom::Plays(_) => "plays",
            Atom::Relates(_) => "relates",
            Atom::Predicate(_) => "predicate",
        }
    }

    /// Whether the atom can be resolved on its own (predicates cannot).
    pub fn is_selectable(&self) -> bool {
        !matches!(self, Atom::Predicate(_))
    }

    /// Whether a rule could conclude this kind of atom.
    pub fn is_derivable(&self) -> bool {
        matches!(self, Atom::Isa(_) | Atom::Relation(_) | Atom::Attribute(_))
    }

    pub fn as_predicate(&self) -> Option<&Predicate> {
        match self {
            Atom::Predicate(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&RelationAtom> {
        match self {
            Atom::Relation(r) => Some(r),
            _ => None,
        }
    }

    /// Copy with every variable passed through `f`.
    pub fn map_vars(&self, f: &impl Fn(&Variable) -> Variable) -> Atom {
        match self {
            Atom::Isa(a) => Atom::Isa(IsaAtom {
                var: f(&a.var),
                type_var: a.type_var.as_ref().map(f),
                label: a.label.clone(),
            }),
            Atom::Relation(a) => Atom::Relation(a.map_vars(f)),
            Atom::Attribute(a) => Atom::Attribute(AttributeAtom {
                owner: f(&a.owner),
                attribute: f(&a.attribute),
                relation_var: a.relation_var.as_ref().map(f),
                label: a.label.clone(),
            }),
            Atom::Sub(a) => Atom::Sub(SubAtom {
                var: f(&a.var),
                label: a.label.clone(),
            }),
            Atom::Plays(a) => Atom::Plays(PlaysAtom {
                var: f(&a.var),
                role: a.role.clone(),
            }),
            Atom::Relates(a) => Atom::Relates(RelatesAtom {
                var: f(&a.var),
                role: a.role.clone(),
            }),
            Atom::Predicate(p) => Atom::Predicate(p.map_vars(f)),
        }
    }

    /// Equal up to a consistent renaming of variables.
    pub fn is_alpha_equivalent(&self, other: &Atom) -> bool {
        crate::equivalence::atoms_equivalent(self, other, false)
    }

    pub fn alpha_equivalence_hash(&self) -> u64 {
        crate::equivalence::atom_hash(self, &VarPredicates::default(), false)
    }

    /// Alpha-equivalent after forgetting which concrete ids are bound.
    pub fn is_structurally_equivalent(&self, other: &Atom) -> bool {
        crate::equivalence::atoms_equivalent(self, other, true)
    }

    pub fn structural_equivalence_hash(&self) -> u64 {
        crate::equivalence::atom_hash(self, &VarPredicates::default(), true)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Isa(a) => match (&a.label, &a.type_var) {
                (Some(l), _) => write!(f, "{} isa {l}", a.var),
                (None, Some(t)) => write!(f, "{} isa {t}", a.var),
                (None, None) => write!(f, "{} isa thing", a.var),
            },
            Atom::Relation(a) => {
                write!(f, "{} (", a.var)?;
                for (i, rp) in a.role_players().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match &rp.role_var {
                        Some(rv) => write!(f, "{rv}: {}", rp.player)?,
                        None => write!(f, "{}: {}", rp.effective_role(), rp.player)?,
                    }
                }
                f.write_str(")")?;
                if let Some(l) = &a.label {
                    write!(f, " isa {l}")?;
                }
                Ok(())
            }
            Atom::Attribute(a) => write!(f, "{} has {} {}", a.owner, a.label, a.attribute),
            Atom::Sub(a) => write!(f, "{} sub {}", a.var, a.label),
            Atom::Plays(a) => write!(f, "{} plays {}", a.var, a.role),
            Atom::Relates(a) => write!(f, "{} relates {}", a.var, a.role),
            Atom::Predicate(p) => write!(f, "{p}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-variable predicate index
// ---------------------------------------------------------------------------

/// Single-variable predicates of a conjunction, indexed by their variable.
#[derive(Debug, Clone, Default)]
pub struct VarPredicates {
    by_var: HashMap<Variable, Vec<Predicate>>,
}

impl VarPredicates {
    pub fn new<'a>(predicates: impl IntoIterator<Item = &'a Predicate>) -> Self {
        let mut by_var: HashMap<Variable, Vec<Predicate>> = HashMap::new();
        for p in predicates {
            if let Some(var) = p.subject() {
                by_var.entry(var.clone()).or_default().push(p.clone());
            }
        }
        Self { by_var }
    }

    /// Predicates constraining `var` alone.
    pub fn on(&self, var: &Variable) -> &[Predicate] {
        self.by_var.get(var).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The concept `var` is pinned to, if any.
    pub fn id_of(&self, var: &Variable) -> Option<ConceptId> {
        self.on(var).iter().find_map(|p| match p {
            Predicate::Id { id, .. } => Some(*id),
            _ => None,
        })
    }

    /// Constant value comparisons on `var`.
    pub fn values_of(&self, var: &Variable) -> impl Iterator<Item = &Predicate> {
        self.on(var)
            .iter()
            .filter(|p| matches!(p, Predicate::Value { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(vars: &[(&str, &str)]) -> Atom {
        Atom::Relation(RelationAtom::new(
            Variable::new("r"),
            None,
            Some(Label::new("binary")),
            vars.iter()
                .map(|(role, player)| {
                    RolePlayer::new(Some(Label::new(role)), None, Variable::new(player))
                })
                .collect(),
        ))
    }

    #[test]
    fn variables_cover_all_slots() {
        let atom = rel(&[("role1", "x"), ("role2", "y")]);
        let vars = atom.variables();
        assert_eq!(vars.len(), 3);
        assert!(vars.contains(&Variable::new("r")));
        assert!(vars.contains(&Variable::new("y")));
    }

    #[test]
    fn renamed_atoms_are_alpha_equivalent() {
        let a = rel(&[("role1", "x"), ("role2", "y")]);
        let b = a.map_vars(&|v| Variable::new(&format!("{}1", v.name())));
        assert_ne!(a, b);
        assert!(a.is_alpha_equivalent(&b));
        assert_eq!(a.alpha_equivalence_hash(), b.alpha_equivalence_hash());
        let c = rel(&[("role1", "x"), ("role2", "x")]);
        assert!(!a.is_alpha_equivalent(&c));
    }

    #[test]
    fn predicates_are_not_selectable() {
        let p = Atom::Predicate(Predicate::Neq {
            left: Variable::new("x"),
            right: Variable::new("y"),
        });
        assert!(!p.is_selectable());
        assert!(rel(&[("role1", "x")]).is_selectable());
    }

    #[test]
    fn var_predicates_index_ids() {
        let id = ConceptId::new(9).unwrap();
        let preds = [Predicate::Id {
            var: Variable::new("x"),
            id,
        }];
        let index = VarPredicates::new(&preds);
        assert_eq!(index.id_of(&Variable::new("x")), Some(id));
        assert!(index.on(&Variable::new("y")).is_empty());
    }
}
