//! Rules indexed by the type their head concludes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::atom::Atom;
use crate::query::ReasonerAtomicQuery;
use crate::rule::{InferenceRule, RuleDependencyGraph};
use crate::schema::{Label, Schema, meta};

/// Rule index for one schema.
///
/// A lookup for a type returns the rules concluding that type or any of its
/// subtypes. Atoms without a usable type see every rule whose head kind can
/// answer them.
#[derive(Debug, Clone)]
pub struct RuleCache {
    rules: Vec<Arc<InferenceRule>>,
    by_head: HashMap<Label, Vec<usize>>,
    graph: RuleDependencyGraph,
    schema: Arc<Schema>,
}

impl RuleCache {
    pub fn new(rules: Vec<Arc<InferenceRule>>, schema: Arc<Schema>) -> Self {
        let mut by_head: HashMap<Label, Vec<usize>> = HashMap::new();
        for (i, rule) in rules.iter().enumerate() {
            if let Some(label) = rule.head_label() {
                by_head.entry(label.clone()).or_default().push(i);
            }
        }
        let graph = RuleDependencyGraph::new(&rules);
        Self {
            rules,
            by_head,
            graph,
            schema,
        }
    }

    pub fn rules(&self) -> &[Arc<InferenceRule>] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn dependency_graph(&self) -> &RuleDependencyGraph {
        &self.graph
    }

    /// Rules with a head concluding `label` or one of its subtypes.
    pub fn rules_with_head_type(&self, label: &str) -> Vec<Arc<InferenceRule>> {
        let mut indices: Vec<usize> = self
            .schema
            .subs(label)
            .iter()
            .filter_map(|l| self.by_head.get(l))
            .flatten()
            .copied()
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices.into_iter().map(|i| self.rules[i].clone()).collect()
    }

    /// Rules that might conclude the atom of `query`, before unification.
    pub fn candidates(&self, query: &ReasonerAtomicQuery) -> Vec<Arc<InferenceRule>> {
        let atom = query.atom();
        if !atom.is_derivable() {
            return Vec::new();
        }
        let admits_kind = |rule: &InferenceRule| match (atom, rule.head().atom()) {
            // An isa query is answered by any head concluding an instance.
            (Atom::Isa(_), _) => true,
            (Atom::Relation(_), Atom::Relation(_)) => true,
            (Atom::Attribute(_), Atom::Attribute(_)) => true,
            _ => false,
        };
        match atom.label() {
            Some(label) if !meta::is_meta(label.as_str()) => self
                .rules_with_head_type(label.as_str())
                .into_iter()
                .filter(|r| admits_kind(r))
                .collect(),
            _ => self.rules.iter().filter(|r| admits_kind(r)).cloned().collect(),
        }
    }

    /// Whether any rule could conclude the atom of `query`.
    pub fn is_rule_resolvable(&self, query: &ReasonerAtomicQuery) -> bool {
        !self.candidates(query).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Pattern, Rel};

    fn schema() -> Arc<Schema> {
        let mut s = Schema::new();
        s.define_entity("person", None).unwrap();
        s.define_entity("employee", Some("person")).unwrap();
        s.define_attribute("title", None).unwrap();
        s.define_role("member", None).unwrap();
        s.define_relation("team", None).unwrap();
        s.relates("team", "member").unwrap();
        s.plays("person", "member").unwrap();
        s.owns("person", "title").unwrap();
        Arc::new(s)
    }

    fn rules(s: &Arc<Schema>) -> Vec<Arc<InferenceRule>> {
        let employees = InferenceRule::new(
            "titled-are-employees",
            &Pattern::new().has("x", "title", "t"),
            &Pattern::new().isa("x", "employee"),
            s,
        )
        .unwrap();
        let teams = InferenceRule::new(
            "employees-form-a-team",
            &Pattern::new().isa("x", "employee"),
            &Pattern::new().relation(Rel::new().isa("team").player("member", "x")),
            s,
        )
        .unwrap();
        vec![Arc::new(employees), Arc::new(teams)]
    }

    #[test]
    fn lookups_include_subtype_heads() {
        let s = schema();
        let cache = RuleCache::new(rules(&s), s.clone());
        assert_eq!(cache.rules_with_head_type("person").len(), 1);
        assert_eq!(cache.rules_with_head_type("employee").len(), 1);
        assert!(cache.rules_with_head_type("title").is_empty());
    }

    #[test]
    fn candidates_follow_atom_kind() {
        let s = schema();
        let cache = RuleCache::new(rules(&s), s.clone());
        let isa = ReasonerAtomicQuery::new(&Pattern::new().isa("p", "person"), &s).unwrap();
        assert_eq!(cache.candidates(&isa).len(), 1);
        let untyped = ReasonerAtomicQuery::new(&Pattern::new().isa_var("p", "t"), &s).unwrap();
        assert_eq!(cache.candidates(&untyped).len(), 2);
        let team = ReasonerAtomicQuery::new(
            &Pattern::new().relation(Rel::new().player("member", "p")),
            &s,
        )
        .unwrap();
        assert_eq!(cache.candidates(&team).len(), 1);
        let title = ReasonerAtomicQuery::new(&Pattern::new().has("p", "title", "t"), &s).unwrap();
        assert!(!cache.is_rule_resolvable(&title));
    }
}
