//! Inference rules: `when { body } then { head }`.
//!
//! A rule's body is an arbitrary conjunction; its head is a single derivable
//! atom (type membership, relation or attribute ownership). Rules are
//! validated once, when compiled against a schema, and are immutable after.

pub mod graph;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use graph::RuleDependencyGraph;

use crate::atom::{Atom, Comparison, Predicate};
use crate::concept::ConceptId;
use crate::error::{QueryError, RuleError, RuleResult};
use crate::query::{Pattern, ReasonerAtomicQuery, ReasonerQuery};
use crate::schema::{Label, Schema, meta};
use crate::unifier::{MultiUnifier, Unifier, UnifierType};
use crate::var::{VarGenerator, Variable};

/// A rule as written by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub label: String,
    pub when: Pattern,
    pub then: Pattern,
}

impl RuleDefinition {
    pub fn new(label: &str, when: Pattern, then: Pattern) -> Self {
        Self {
            label: label.to_string(),
            when,
            then,
        }
    }

    /// Validate against `schema`.
    pub fn compile(&self, schema: &Arc<Schema>) -> RuleResult<InferenceRule> {
        InferenceRule::new(&self.label, &self.when, &self.then, schema)
    }
}

/// A validated rule.
///
/// Two rules are equal when their bodies and heads are alpha-equivalent; the
/// label does not take part.
#[derive(Debug, Clone)]
pub struct InferenceRule {
    label: Label,
    body: ReasonerQuery,
    head: ReasonerAtomicQuery,
}

impl InferenceRule {
    pub fn new(
        label: &str,
        when: &Pattern,
        then: &Pattern,
        schema: &Arc<Schema>,
    ) -> RuleResult<Self> {
        let invalid = |part: &'static str| {
            move |source: QueryError| RuleError::InvalidPattern {
                rule: label.to_string(),
                part,
                source,
            }
        };
        // One generator for both sides keeps anonymous variables distinct.
        let mut vars = VarGenerator::anonymous();
        let body_atoms = when.to_atoms(&mut vars).map_err(invalid("body"))?;
        let body = ReasonerQuery::from_atoms(body_atoms, schema.clone()).map_err(invalid("body"))?;
        let head_atoms = then.to_atoms(&mut vars).map_err(invalid("head"))?;
        let head = ReasonerQuery::from_atoms_in_context(
            head_atoms,
            schema.clone(),
            &body.known_types(),
        )
        .and_then(ReasonerAtomicQuery::try_from)
        .map_err(invalid("head"))?;

        let rule = Self {
            label: Label::new(label),
            body,
            head,
        };
        rule.validate_head()?;
        Ok(rule)
    }

    fn validate_head(&self) -> RuleResult<()> {
        let invalid_head = || RuleError::InvalidHead {
            rule: self.label.to_string(),
            kind: self.head.atom().kind_name().to_string(),
        };
        let mut may_be_new: BTreeSet<&Variable> = BTreeSet::new();
        match self.head.atom() {
            Atom::Isa(isa) => {
                let typed = isa.label.as_ref().is_some_and(|l| !meta::is_meta(l.as_str()));
                if !typed || isa.type_var.is_some() {
                    return Err(invalid_head());
                }
            }
            Atom::Relation(rel) => {
                let typed = rel.label.as_ref().is_some_and(|l| !meta::is_meta(l.as_str()));
                if !typed || rel.type_var.is_some() {
                    return Err(invalid_head());
                }
                if let Some(rp) = rel
                    .role_players()
                    .iter()
                    .find(|rp| rp.is_role_ambiguous() || rp.role_var.is_some())
                {
                    return Err(RuleError::AmbiguousHeadRole {
                        rule: self.label.to_string(),
                        var: rp.player.name().to_string(),
                    });
                }
                may_be_new.insert(&rel.var);
            }
            Atom::Attribute(attr) => {
                let has_value = self
                    .head
                    .predicates_on(&attr.attribute)
                    .iter()
                    .filter_map(Predicate::constant)
                    .any(|(cmp, _)| cmp == Comparison::Eq);
                if has_value {
                    may_be_new.insert(&attr.attribute);
                }
                if let Some(edge) = &attr.relation_var {
                    may_be_new.insert(edge);
                }
            }
            _ => return Err(invalid_head()),
        }
        let bound = self.body.variables();
        if let Some(var) = self
            .head
            .variables()
            .into_iter()
            .find(|v| !bound.contains(v) && !may_be_new.contains(v))
        {
            return Err(RuleError::UnboundHeadVariable {
                rule: self.label.to_string(),
                var: var.name().to_string(),
            });
        }
        Ok(())
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn body(&self) -> &ReasonerQuery {
        &self.body
    }

    pub fn head(&self) -> &ReasonerAtomicQuery {
        &self.head
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.body.schema_arc()
    }

    /// The type label the head concludes.
    pub fn head_label(&self) -> Option<&Label> {
        self.head.atom().label()
    }

    /// Whether some body atom could be concluded by this rule's own head.
    pub fn head_satisfies_body(&self) -> bool {
        self.body.selectable_atoms().into_iter().any(|atom| {
            !crate::unifier::atom_multi_unifier(
                self.head.atom(),
                self.head.var_predicates(),
                atom,
                self.body.var_predicates(),
                UnifierType::Rule,
                Some(self.body.schema()),
            )
            .is_empty()
        })
    }

    /// Adapt the head to the shape of `parent` so every variable the parent
    /// names has a head counterpart: anonymous relation, type and role
    /// variables become fresh user-defined ones.
    pub fn rewrite(&self, parent: &ReasonerAtomicQuery) -> InferenceRule {
        let Atom::Relation(parent_rel) = parent.atom() else {
            return self.clone();
        };
        let Atom::Relation(head_rel) = self.head.atom() else {
            return self.clone();
        };
        let taken: BTreeSet<Variable> = self
            .body
            .variables()
            .into_iter()
            .chain(self.head.variables())
            .collect();
        let mut fresh_vars = VarGenerator::named("rw");
        let mut fresh = || fresh_vars.fresh(|v| taken.contains(v));

        let mut rel = head_rel.clone();
        if parent_rel.var.is_user_defined() && !rel.var.is_user_defined() {
            rel.var = fresh();
        }
        if parent_rel.type_var.is_some() && rel.type_var.is_none() {
            rel.type_var = Some(fresh());
        }
        if parent_rel.role_players().iter().any(|rp| rp.role_var.is_some()) {
            for rp in rel.role_players_mut() {
                if rp.role_var.is_none() {
                    rp.role_var = Some(fresh());
                }
            }
            rel.resort();
        }
        if rel == *head_rel {
            return self.clone();
        }
        let renamed_instance = (rel.var != head_rel.var).then(|| (head_rel.var.clone(), rel.var.clone()));
        let mut atoms: Vec<Atom> = self
            .head
            .atoms()
            .iter()
            .filter(|a| !a.is_selectable())
            .map(|a| match &renamed_instance {
                Some((from, to)) => a.map_vars(&|v| if v == from { to.clone() } else { v.clone() }),
                None => a.clone(),
            })
            .collect();
        atoms.insert(0, Atom::Relation(rel));
        let head = ReasonerQuery::assemble(atoms, self.schema().clone());
        match ReasonerAtomicQuery::try_from(head) {
            Ok(head) => InferenceRule {
                label: self.label.clone(),
                body: self.body.clone(),
                head,
            },
            Err(_) => self.clone(),
        }
    }

    /// Unifiers mapping the head onto `parent`.
    pub fn multi_unifier(&self, parent: &ReasonerAtomicQuery) -> MultiUnifier {
        self.head.multi_unifier(parent, UnifierType::Rule)
    }

    /// Whether the concepts `parent` pins through `unifier` have types that
    /// can take the places the head gives them. `type_of` resolves the direct
    /// type of an instance.
    pub fn fits_bound_types(
        &self,
        unifier: &Unifier,
        parent: &ReasonerAtomicQuery,
        type_of: &dyn Fn(ConceptId) -> Option<Label>,
    ) -> bool {
        let schema = self.body.schema();
        let bound_types = |head_var: &Variable| -> Vec<Label> {
            unifier
                .get(head_var)
                .filter_map(|pv| parent.var_predicates().id_of(pv))
                .filter_map(type_of)
                .collect()
        };
        match self.head.atom() {
            Atom::Relation(rel) => {
                let rel_ok = match &rel.label {
                    Some(label) => bound_types(&rel.var)
                        .iter()
                        .all(|t| schema.is_subtype(t.as_str(), label.as_str())),
                    None => true,
                };
                rel_ok
                    && rel.role_players().iter().all(|rp| {
                        let role = rp.effective_role();
                        bound_types(&rp.player)
                            .iter()
                            .all(|t| schema.can_play(t.as_str(), role.as_str()))
                    })
            }
            Atom::Attribute(attr) => {
                bound_types(&attr.owner).iter().all(|t| {
                    schema
                        .owned_attributes(t.as_str())
                        .iter()
                        .any(|owned| schema.are_comparable(owned.as_str(), attr.label.as_str()))
                }) && bound_types(&attr.attribute)
                    .iter()
                    .all(|t| schema.is_subtype(t.as_str(), attr.label.as_str()))
            }
            _ => true,
        }
    }

    /// Head variables the body does not bind.
    pub fn head_only_variables(&self) -> Vec<Variable> {
        let bound = self.body.variables();
        self.head
            .variables()
            .into_iter()
            .filter(|v| !bound.contains(v))
            .collect()
    }
}

impl PartialEq for InferenceRule {
    fn eq(&self, other: &Self) -> bool {
        self.head.is_alpha_equivalent(&other.head) && self.body.is_alpha_equivalent(&other.body)
    }
}

impl Eq for InferenceRule {}

impl Hash for InferenceRule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.head.alpha_equivalence_hash().hash(state);
        self.body.alpha_equivalence_hash().hash(state);
    }
}

impl fmt::Display for InferenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: when {} then {}", self.label, self.body, self.head)
    }
}

/// Compile a batch of definitions, rejecting duplicate labels.
pub fn compile_all(
    definitions: &[RuleDefinition],
    schema: &Arc<Schema>,
) -> RuleResult<Vec<Arc<InferenceRule>>> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut rules = Vec::with_capacity(definitions.len());
    for def in definitions {
        if !seen.insert(def.label.as_str()) {
            return Err(RuleError::Duplicate {
                label: def.label.clone(),
            });
        }
        rules.push(Arc::new(def.compile(schema)?));
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Rel;

    pub(crate) fn schema() -> Arc<Schema> {
        let mut s = Schema::new();
        s.define_entity("place", None).unwrap();
        s.define_entity("person", None).unwrap();
        s.define_attribute("name", None).unwrap();
        s.define_attribute("nickname", Some("name")).unwrap();
        s.define_role("located", None).unwrap();
        s.define_role("location", None).unwrap();
        s.define_relation("locates", None).unwrap();
        s.relates("locates", "located").unwrap();
        s.relates("locates", "location").unwrap();
        s.plays("place", "located").unwrap();
        s.plays("place", "location").unwrap();
        s.owns("person", "name").unwrap();
        Arc::new(s)
    }

    fn locates(a: &str, b: &str) -> Rel {
        Rel::new().isa("locates").player("located", a).player("location", b)
    }

    pub(crate) fn transitivity() -> InferenceRule {
        InferenceRule::new(
            "transitive-location",
            &Pattern::new()
                .relation(locates("x", "y"))
                .relation(locates("y", "z")),
            &Pattern::new().relation(locates("x", "z")),
            &schema(),
        )
        .unwrap()
    }

    #[test]
    fn transitive_rule_compiles_and_feeds_itself() {
        let rule = transitivity();
        assert_eq!(rule.head_label().map(Label::as_str), Some("locates"));
        assert!(rule.head_satisfies_body());
        assert_eq!(rule.head_only_variables().len(), 1);
    }

    #[test]
    fn head_variables_must_be_bound() {
        let err = InferenceRule::new(
            "dangling",
            &Pattern::new().isa("x", "place"),
            &Pattern::new().relation(locates("x", "w")),
            &schema(),
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::UnboundHeadVariable { ref var, .. } if var == "w"));
    }

    #[test]
    fn attribute_heads_may_introduce_constants() {
        let rule = InferenceRule::new(
            "default-name",
            &Pattern::new().isa("x", "person"),
            &Pattern::new().has_value("x", "name", "anonymous"),
            &schema(),
        );
        assert!(rule.is_ok());
        let err = InferenceRule::new(
            "no-value",
            &Pattern::new().isa("x", "person"),
            &Pattern::new().has("x", "name", "n"),
            &schema(),
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::UnboundHeadVariable { .. }));
    }

    #[test]
    fn heads_must_be_single_derivable_atoms() {
        let s = schema();
        let two = InferenceRule::new(
            "two-heads",
            &Pattern::new().isa("x", "place"),
            &Pattern::new().isa("x", "place").isa("x", "person"),
            &s,
        )
        .unwrap_err();
        assert!(matches!(
            two,
            RuleError::InvalidPattern { part: "head", source: QueryError::NotAtomic { count: 2 }, .. }
        ));
        let sub = InferenceRule::new(
            "sub-head",
            &Pattern::new().isa("x", "place"),
            &Pattern::new().sub("x", "place"),
            &s,
        )
        .unwrap_err();
        assert!(matches!(sub, RuleError::InvalidHead { .. }));
        let ambiguous = InferenceRule::new(
            "open-role",
            &Pattern::new().isa("x", "person").isa("y", "place"),
            &Pattern::new().relation(Rel::new().isa("locates").player_any("x").player("location", "y")),
            &s,
        )
        .unwrap_err();
        assert!(matches!(ambiguous, RuleError::AmbiguousHeadRole { ref var, .. } if var == "x"));
    }

    #[test]
    fn rules_compare_up_to_renaming() {
        let renamed = InferenceRule::new(
            "other-label",
            &Pattern::new()
                .relation(locates("a", "b"))
                .relation(locates("b", "c")),
            &Pattern::new().relation(locates("a", "c")),
            &schema(),
        )
        .unwrap();
        assert_eq!(transitivity(), renamed);
    }

    #[test]
    fn rewrite_names_relation_variables_the_query_asks_for() {
        let rule = transitivity();
        let parent = ReasonerAtomicQuery::new(
            &Pattern::new().relation(Rel::var("r").isa("locates").player("located", "p").player("location", "q")),
            &schema(),
        )
        .unwrap();
        let rewritten = rule.rewrite(&parent);
        let Atom::Relation(rel) = rewritten.head().atom() else {
            panic!("relation head expected");
        };
        assert!(rel.var.is_user_defined());
        let u = rewritten.multi_unifier(&parent);
        assert_eq!(u.len(), 1);
        let unifier = u.unifier().unwrap();
        assert_eq!(unifier.get(&rel.var).next(), Some(&Variable::new("r")));
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let def = RuleDefinition::new(
            "same",
            Pattern::new().isa("x", "person"),
            Pattern::new().has_value("x", "name", "n/a"),
        );
        let err = compile_all(&[def.clone(), def], &schema()).unwrap_err();
        assert!(matches!(err, RuleError::Duplicate { .. }));
    }
}
