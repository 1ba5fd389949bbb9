//! Rule dependency graph.
//!
//! Nodes are rules. An edge `a → b` means rule `b` can conclude an atom of
//! rule `a`'s body, so resolving `a` may require resolving `b` first. Cycles
//! mean a single resolution pass can miss answers and must be repeated.

use std::collections::BTreeSet;
use std::sync::Arc;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use super::InferenceRule;
use crate::atom::{Atom, VarPredicates};
use crate::unifier::{UnifierType, atom_multi_unifier};

/// Which rules feed which.
#[derive(Debug, Clone)]
pub struct RuleDependencyGraph {
    graph: DiGraph<Arc<InferenceRule>, ()>,
    /// Nodes on a cycle (non-trivial SCC or self-loop).
    cyclic: BTreeSet<NodeIndex>,
}

impl RuleDependencyGraph {
    pub fn new(rules: &[Arc<InferenceRule>]) -> Self {
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = rules.iter().map(|r| graph.add_node(r.clone())).collect();
        for (i, consumer) in rules.iter().enumerate() {
            for (j, producer) in rules.iter().enumerate() {
                let feeds = consumer
                    .body()
                    .selectable_atoms()
                    .into_iter()
                    .any(|atom| concludes(producer, atom, consumer.body().var_predicates()));
                if feeds {
                    graph.add_edge(nodes[i], nodes[j], ());
                }
            }
        }
        let mut cyclic = BTreeSet::new();
        for scc in tarjan_scc(&graph) {
            let self_loop = scc.len() == 1 && graph.contains_edge(scc[0], scc[0]);
            if scc.len() > 1 || self_loop {
                cyclic.extend(scc);
            }
        }
        Self { graph, cyclic }
    }

    pub fn rule_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Rules whose head can conclude `atom`.
    pub fn producers_of(&self, atom: &Atom, preds: &VarPredicates) -> Vec<Arc<InferenceRule>> {
        self.producer_nodes(atom, preds)
            .into_iter()
            .map(|n| self.graph[n].clone())
            .collect()
    }

    fn producer_nodes(&self, atom: &Atom, preds: &VarPredicates) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&n| concludes(&self.graph[n], atom, preds))
            .collect()
    }

    /// Every rule resolving the given atoms may end up applying.
    pub fn dependent_rules<'a>(
        &self,
        atoms: impl IntoIterator<Item = &'a Atom>,
        preds: &VarPredicates,
    ) -> Vec<Arc<InferenceRule>> {
        self.reachable(atoms, preds)
            .into_iter()
            .map(|n| self.graph[n].clone())
            .collect()
    }

    fn reachable<'a>(
        &self,
        atoms: impl IntoIterator<Item = &'a Atom>,
        preds: &VarPredicates,
    ) -> BTreeSet<NodeIndex> {
        let mut seen = BTreeSet::new();
        for atom in atoms {
            for start in self.producer_nodes(atom, preds) {
                if seen.contains(&start) {
                    continue;
                }
                let mut dfs = Dfs::new(&self.graph, start);
                while let Some(n) = dfs.next(&self.graph) {
                    seen.insert(n);
                }
            }
        }
        seen
    }

    /// Whether resolving the given atoms can reach a rule cycle.
    pub fn reaches_cycle<'a>(
        &self,
        atoms: impl IntoIterator<Item = &'a Atom>,
        preds: &VarPredicates,
    ) -> bool {
        self.reachable(atoms, preds)
            .iter()
            .any(|n| self.cyclic.contains(n))
    }

    /// Whether any rule takes part in a cycle.
    pub fn is_cyclic(&self) -> bool {
        !self.cyclic.is_empty()
    }
}

/// Whether `rule`'s head can conclude `atom`.
fn concludes(rule: &InferenceRule, atom: &Atom, preds: &VarPredicates) -> bool {
    if !atom.is_derivable() {
        return false;
    }
    let head = rule.head();
    !atom_multi_unifier(
        head.atom(),
        head.var_predicates(),
        atom,
        preds,
        UnifierType::Rule,
        Some(rule.body().schema()),
    )
    .is_empty()
}

#[cfg(test)]
mod tests {
    use super::super::tests::{schema, transitivity};
    use super::*;
    use crate::query::{Pattern, ReasonerQuery, Rel};

    fn naming_rule() -> Arc<InferenceRule> {
        Arc::new(
            InferenceRule::new(
                "named-places",
                &Pattern::new().isa("x", "person"),
                &Pattern::new().has_value("x", "name", "someone"),
                &schema(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn transitivity_is_a_self_loop() {
        let graph = RuleDependencyGraph::new(&[Arc::new(transitivity())]);
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.is_cyclic());
    }

    #[test]
    fn cycles_only_matter_when_reachable() {
        let graph = RuleDependencyGraph::new(&[Arc::new(transitivity()), naming_rule()]);
        let s = schema();
        let names = ReasonerQuery::new(&Pattern::new().has("p", "name", "n"), &s).unwrap();
        let places = ReasonerQuery::new(
            &Pattern::new().relation(
                Rel::new().isa("locates").player("located", "a").player("location", "b"),
            ),
            &s,
        )
        .unwrap();
        assert!(!graph.reaches_cycle(names.atoms(), names.var_predicates()));
        assert_eq!(graph.dependent_rules(names.atoms(), names.var_predicates()).len(), 1);
        assert!(graph.reaches_cycle(places.atoms(), places.var_predicates()));
    }
}
