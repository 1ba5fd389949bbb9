//! Resolution planning: a connected, priority-ordered sequence of atomic
//! queries whose left-to-right join answers a conjunction.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use crate::atom::{Atom, Comparison, Predicate};
use crate::error::QueryResult;
use crate::query::{ReasonerAtomicQuery, ReasonerQuery};
use crate::var::Variable;

/// Ordered atomic steps of a conjunctive query.
#[derive(Debug, Clone)]
pub struct ResolutionPlan {
    steps: Vec<ReasonerAtomicQuery>,
    cross_predicates: Vec<Predicate>,
}

impl ResolutionPlan {
    /// Plan `query`.
    ///
    /// Atoms are ranked by, in order: number of variables pinned by an id or
    /// an equality constant, number of variables bound by earlier steps,
    /// relations with a known type and roles, attributes under a non-equality
    /// value constraint, and position in the query. Every step after the first shares a variable
    /// with an earlier one unless the query itself is disconnected.
    pub fn new(query: &ReasonerQuery) -> QueryResult<Self> {
        let order = Self::order(query);
        Self::from_order(query, &order)
    }

    /// Indices into `query.selectable_atoms()` in resolution order.
    pub fn order(query: &ReasonerQuery) -> Vec<usize> {
        let atoms = query.selectable_atoms();
        let vars: Vec<Vec<Variable>> = atoms.iter().map(|a| a.variables()).collect();
        let preds = query.var_predicates();
        let pinned: BTreeSet<Variable> = query
            .variables()
            .into_iter()
            .filter(|v| {
                preds.id_of(v).is_some()
                    || preds
                        .values_of(v)
                        .filter_map(Predicate::constant)
                        .any(|(cmp, _)| cmp == Comparison::Eq)
            })
            .collect();

        let mut placed_vars: BTreeSet<Variable> = BTreeSet::new();
        let mut remaining: Vec<usize> = (0..atoms.len()).collect();
        let mut order = Vec::with_capacity(atoms.len());
        while !remaining.is_empty() {
            let connected: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&i| vars[i].iter().any(|v| placed_vars.contains(v)))
                .collect();
            // A new component starts only when nothing connects.
            let pool = if connected.is_empty() {
                &remaining
            } else {
                &connected
            };
            let Some(&best) = pool.iter().max_by_key(|&&i| {
                let among = |set: &BTreeSet<Variable>| vars[i].iter().filter(|v| set.contains(*v)).count();
                (
                    among(&pinned),
                    among(&placed_vars),
                    is_fully_specified(atoms[i]),
                    has_value_constraint(atoms[i], query),
                    Reverse(i),
                )
            }) else {
                break;
            };
            remaining.retain(|&i| i != best);
            placed_vars.extend(vars[best].iter().cloned());
            order.push(best);
        }
        order
    }

    /// Build the steps for a given order over `query.selectable_atoms()`.
    pub fn from_order(query: &ReasonerQuery, order: &[usize]) -> QueryResult<Self> {
        let atoms = query.selectable_atoms();
        let mut local: BTreeSet<Predicate> = BTreeSet::new();
        let mut steps = Vec::with_capacity(order.len());
        for &i in order {
            let atom = atoms[i];
            let predicates = query.predicates_of(atom);
            local.extend(predicates.iter().cloned());
            let mut step_atoms = vec![atom.clone()];
            step_atoms.extend(predicates.into_iter().map(Atom::Predicate));
            let step = ReasonerQuery::assemble(step_atoms, query.schema_arc().clone());
            steps.push(ReasonerAtomicQuery::try_from(step)?);
        }
        let cross_predicates = query
            .predicates()
            .into_iter()
            .filter(|p| !local.contains(*p))
            .cloned()
            .collect();
        Ok(Self {
            steps,
            cross_predicates,
        })
    }

    pub fn steps(&self) -> &[ReasonerAtomicQuery] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Predicates no single step covers; checked during the join.
    pub fn cross_predicates(&self) -> &[Predicate] {
        &self.cross_predicates
    }

    /// Whether every step after the first shares a variable with the steps
    /// before it.
    pub fn is_connected(&self) -> bool {
        let mut seen: BTreeSet<Variable> = BTreeSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            let vars = step.atom().variables();
            if i > 0 && !vars.iter().any(|v| seen.contains(v)) {
                return false;
            }
            seen.extend(vars);
        }
        true
    }
}

fn is_fully_specified(atom: &Atom) -> bool {
    match atom {
        Atom::Relation(rel) => rel.is_fully_specified(),
        _ => false,
    }
}

fn has_value_constraint(atom: &Atom, query: &ReasonerQuery) -> bool {
    let Atom::Attribute(attr) = atom else {
        return false;
    };
    query
        .var_predicates()
        .values_of(&attr.attribute)
        .filter_map(Predicate::constant)
        .any(|(cmp, _)| cmp != Comparison::Eq)
}
