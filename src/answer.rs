//! Answers: variable bindings with an optional provenance trail.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::concept::ConceptId;
use crate::explanation::Explanation;
use crate::unifier::{MultiUnifier, Unifier};
use crate::var::Variable;

/// An immutable mapping from variables to concepts.
///
/// Equality and hashing consider the bindings only; two answers that differ
/// just in how they were derived are the same answer.
#[derive(Debug, Clone, Default)]
pub struct Answer {
    map: BTreeMap<Variable, ConceptId>,
    explanation: Option<Arc<Explanation>>,
}

impl PartialEq for Answer {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

impl Eq for Answer {}

impl Hash for Answer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.map.hash(state);
    }
}

impl Answer {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Variable, ConceptId)>) -> Self {
        Self {
            map: pairs.into_iter().collect(),
            explanation: None,
        }
    }

    pub fn with_binding(mut self, var: Variable, id: ConceptId) -> Self {
        self.map.insert(var, id);
        self
    }

    pub fn get(&self, var: &Variable) -> Option<ConceptId> {
        self.map.get(var).copied()
    }

    pub fn contains(&self, var: &Variable) -> bool {
        self.map.contains_key(var)
    }

    pub fn vars(&self) -> impl Iterator<Item = &Variable> {
        self.map.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, ConceptId)> {
        self.map.iter().map(|(v, id)| (v, *id))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Keep only the bindings of `vars`. The explanation is preserved.
    pub fn project<'a>(&self, vars: impl IntoIterator<Item = &'a Variable>) -> Answer {
        let keep: BTreeSet<&Variable> = vars.into_iter().collect();
        Answer {
            map: self
                .map
                .iter()
                .filter(|(v, _)| keep.contains(v))
                .map(|(v, id)| (v.clone(), *id))
                .collect(),
            explanation: self.explanation.clone(),
        }
    }

    /// Whether shared variables are bound to the same concepts.
    pub fn is_consistent_with(&self, other: &Answer) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .map
            .iter()
            .all(|(v, id)| large.map.get(v).is_none_or(|other| other == id))
    }

    /// Join two answers. Returns `None` when they disagree on a shared
    /// variable. The result carries no explanation.
    pub fn merge(&self, other: &Answer) -> Option<Answer> {
        if !self.is_consistent_with(other) {
            return None;
        }
        let mut map = self.map.clone();
        map.extend(other.map.iter().map(|(v, id)| (v.clone(), *id)));
        Some(Answer {
            map,
            explanation: None,
        })
    }

    /// Translate into the parent variables of `unifier`. Unmapped variables
    /// are dropped; conflicting bindings yield the empty answer.
    pub fn unify(&self, unifier: &Unifier) -> Answer {
        let mut map = BTreeMap::new();
        for (var, id) in &self.map {
            for target in unifier.get(var) {
                match map.insert(target.clone(), *id) {
                    Some(previous) if previous != *id => return Answer::empty(),
                    _ => {}
                }
            }
        }
        Answer {
            map,
            explanation: self.explanation.clone(),
        }
    }

    /// One translated answer per unifier, without empties or duplicates.
    pub fn multi_unify(&self, unifiers: &MultiUnifier) -> Vec<Answer> {
        let mut seen = HashSet::new();
        unifiers
            .iter()
            .map(|u| self.unify(u))
            .filter(|a| !a.is_empty() && seen.insert(a.clone()))
            .collect()
    }

    pub fn explain(mut self, explanation: Explanation) -> Answer {
        self.explanation = Some(Arc::new(explanation));
        self
    }

    pub(crate) fn with_explanation(mut self, explanation: Option<Arc<Explanation>>) -> Answer {
        self.explanation = explanation;
        self
    }

    pub fn explanation(&self) -> Option<&Explanation> {
        self.explanation.as_deref()
    }

    pub(crate) fn explanation_arc(&self) -> Option<&Arc<Explanation>> {
        self.explanation.as_ref()
    }

    /// Every explanation in the provenance DAG, this answer's first.
    /// Shared sub-derivations are listed once.
    pub fn explanations(&self) -> Vec<Arc<Explanation>> {
        let mut out: Vec<Arc<Explanation>> = Vec::new();
        let mut stack: Vec<&Answer> = vec![self];
        while let Some(answer) = stack.pop() {
            let Some(explanation) = &answer.explanation else {
                continue;
            };
            if out.iter().any(|e| Arc::ptr_eq(e, explanation)) {
                continue;
            }
            out.push(explanation.clone());
            stack.extend(explanation.answers().iter().rev());
        }
        out
    }

    /// Every answer the derivation of this one depended on, transitively.
    pub fn partial_answers(&self) -> Vec<Answer> {
        let mut out: Vec<Answer> = Vec::new();
        let mut stack: Vec<&Answer> = self
            .explanation
            .iter()
            .flat_map(|e| e.answers().iter())
            .collect();
        while let Some(answer) = stack.pop() {
            if !out.iter().any(|a| a == answer && same_explanation(a, answer)) {
                out.push(answer.clone());
            }
            if let Some(e) = &answer.explanation {
                stack.extend(e.answers().iter());
            }
        }
        out
    }

    /// The stored facts the derivation bottoms out in: answers whose
    /// explanation is a direct lookup.
    pub fn explicit_path(&self) -> Vec<Answer> {
        let mut out: Vec<Answer> = Vec::new();
        let mut stack: Vec<&Answer> = vec![self];
        while let Some(answer) = stack.pop() {
            match answer.explanation.as_deref() {
                Some(e) if e.is_lookup() => {
                    if !out.contains(answer) {
                        out.push(answer.clone());
                    }
                }
                Some(e) => stack.extend(e.answers().iter()),
                None => {}
            }
        }
        out
    }

    /// Number of rule applications in the derivation.
    pub fn deductions(&self) -> usize {
        self.explanations().iter().filter(|e| e.is_rule()).count()
    }
}

fn same_explanation(a: &Answer, b: &Answer) -> bool {
    match (&a.explanation, &b.explanation) {
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        (None, None) => true,
        _ => false,
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (var, id)) in self.map.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{var}={id}")?;
        }
        f.write_str("}")
    }
}
