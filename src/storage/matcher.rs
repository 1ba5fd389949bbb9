//! Pattern matching over a [`MemoryStorage`]: a nested-loop join in planner
//! order, pruning partial answers with the query's predicates as soon as
//! their variables are bound.

use std::collections::HashSet;

use super::MemoryStorage;
use crate::answer::Answer;
use crate::atom::{Atom, RolePlayer};
use crate::concept::ConceptId;
use crate::plan::ResolutionPlan;
use crate::query::{ReasonerQuery, predicate_holds};
use crate::schema::{Label, Schema, meta};
use crate::storage::Storage;
use crate::var::Variable;

pub(super) fn execute(store: &MemoryStorage, query: &ReasonerQuery) -> Vec<Answer> {
    let atoms = query.selectable_atoms();
    let predicates = query.predicates();
    let value_of = |id: ConceptId| store.value_of(id);
    let holds = |answer: &Answer| {
        predicates
            .iter()
            .all(|p| predicate_holds(p, answer, &value_of))
    };

    let seed = query.substitution();
    if !holds(&seed) {
        return Vec::new();
    }
    let mut partial = vec![seed];
    for i in ResolutionPlan::order(query) {
        partial = partial
            .iter()
            .flat_map(|answer| match_atom(store, atoms[i], answer))
            .filter(|answer| holds(answer))
            .collect();
        if partial.is_empty() {
            break;
        }
    }

    let mut seen = HashSet::new();
    partial.retain(|answer| seen.insert(answer.clone()));
    partial
}

/// Extend `answer` with `var = id`, or check an existing binding.
fn bind(answer: &Answer, var: &Variable, id: ConceptId) -> Option<Answer> {
    match answer.get(var) {
        Some(bound) if bound == id => Some(answer.clone()),
        Some(_) => None,
        None => Some(answer.clone().with_binding(var.clone(), id)),
    }
}

fn bind_all(answer: &Answer, var: &Variable, labels: &[Label], schema: &Schema) -> Vec<Answer> {
    labels
        .iter()
        .filter_map(|l| schema.id_of(l.as_str()))
        .filter_map(|id| bind(answer, var, id))
        .collect()
}

/// Supertypes of `types` a type variable may bind to, restricted to subtypes
/// of `within` when the atom also names a type.
fn type_closure(schema: &Schema, types: &[Label], within: Option<&Label>) -> Vec<Label> {
    let mut sups: Vec<Label> = types
        .iter()
        .flat_map(|t| schema.sups(t.as_str()))
        .filter(|s| s.as_str() != meta::THING)
        .filter(|s| within.is_none_or(|w| schema.is_subtype(s.as_str(), w.as_str())))
        .collect();
    sups.sort();
    sups.dedup();
    sups
}

fn match_atom(store: &MemoryStorage, atom: &Atom, answer: &Answer) -> Vec<Answer> {
    let schema = store.schema_ref();
    match atom {
        Atom::Isa(isa) => {
            let candidates = match answer.get(&isa.var) {
                Some(id) => vec![id],
                None => store.instance_ids(),
            };
            let mut out = Vec::new();
            for candidate in candidates {
                let types = store.types_of(candidate);
                if types.is_empty() {
                    continue;
                }
                if let Some(label) = &isa.label {
                    if !types.iter().any(|t| schema.is_subtype(t.as_str(), label.as_str())) {
                        continue;
                    }
                }
                let Some(base) = bind(answer, &isa.var, candidate) else {
                    continue;
                };
                match &isa.type_var {
                    None => out.push(base),
                    Some(tv) => {
                        let closure = type_closure(schema, &types, isa.label.as_ref());
                        out.extend(bind_all(&base, tv, &closure, schema));
                    }
                }
            }
            out
        }
        Atom::Relation(rel) => {
            let candidates = match answer.get(&rel.var) {
                Some(id) => vec![id],
                None => store.relation_ids(),
            };
            let mut out = Vec::new();
            for candidate in candidates {
                let Some((label, players)) = store.relation(candidate) else {
                    continue;
                };
                if let Some(wanted) = &rel.label {
                    if !schema.is_subtype(label.as_str(), wanted.as_str()) {
                        continue;
                    }
                }
                let Some(base) = bind(answer, &rel.var, candidate) else {
                    continue;
                };
                let typed = match &rel.type_var {
                    None => vec![base],
                    Some(tv) => {
                        let closure = type_closure(schema, &[label.clone()], rel.label.as_ref());
                        bind_all(&base, tv, &closure, schema)
                    }
                };
                let mut used = vec![false; players.len()];
                for start in typed {
                    assign_players(schema, rel.role_players(), &players, &mut used, start, &mut out);
                }
            }
            out
        }
        Atom::Attribute(attr) => {
            let owners = match answer.get(&attr.owner) {
                Some(id) => vec![id],
                None => store.owner_ids(),
            };
            let mut out = Vec::new();
            for owner in owners {
                for (attribute, edge) in store.owned(owner) {
                    let typed = store
                        .types_of(attribute)
                        .iter()
                        .any(|t| schema.is_subtype(t.as_str(), attr.label.as_str()));
                    if !typed {
                        continue;
                    }
                    let bound = bind(answer, &attr.owner, owner)
                        .and_then(|a| bind(&a, &attr.attribute, attribute))
                        .and_then(|a| match &attr.relation_var {
                            Some(rv) => bind(&a, rv, edge),
                            None => Some(a),
                        });
                    out.extend(bound);
                }
            }
            out
        }
        Atom::Sub(sub) => bind_all(answer, &sub.var, &schema.subs(sub.label.as_str()), schema),
        Atom::Plays(plays) => bind_all(
            answer,
            &plays.var,
            &schema.players_of(plays.role.as_str()),
            schema,
        ),
        Atom::Relates(relates) => bind_all(
            answer,
            &relates.var,
            &schema.relations_relating(relates.role.as_str()),
            schema,
        ),
        Atom::Predicate(_) => vec![answer.clone()],
    }
}

/// Assign each wanted role player to a distinct stored one whose role is a
/// subtype of the wanted role.
fn assign_players(
    schema: &Schema,
    wanted: &[RolePlayer],
    stored: &[(Label, ConceptId)],
    used: &mut [bool],
    acc: Answer,
    out: &mut Vec<Answer>,
) {
    let Some((rp, rest)) = wanted.split_first() else {
        out.push(acc);
        return;
    };
    let role = rp.effective_role();
    for (j, (stored_role, player)) in stored.iter().enumerate() {
        if used[j] || !schema.is_subtype(stored_role.as_str(), role.as_str()) {
            continue;
        }
        let Some(mut next) = bind(&acc, &rp.player, *player) else {
            continue;
        };
        if let Some(rv) = &rp.role_var {
            match acc.get(rv) {
                Some(bound) => {
                    let fits = schema
                        .label_of(bound)
                        .is_some_and(|l| schema.is_subtype(stored_role.as_str(), l.as_str()));
                    if !fits {
                        continue;
                    }
                }
                None => {
                    let Some(id) = schema.id_of(stored_role.as_str()) else {
                        continue;
                    };
                    next = next.with_binding(rv.clone(), id);
                }
            }
        }
        used[j] = true;
        assign_players(schema, rest, stored, used, next, out);
        used[j] = false;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::query::{Pattern, Rel};

    fn store() -> (MemoryStorage, [ConceptId; 3]) {
        let mut s = Schema::new();
        s.define_entity("person", None).unwrap();
        s.define_entity("student", Some("person")).unwrap();
        s.define_attribute("name", None).unwrap();
        s.define_role("friend", None).unwrap();
        s.define_relation("friendship", None).unwrap();
        s.relates("friendship", "friend").unwrap();
        s.plays("person", "friend").unwrap();
        s.owns("person", "name").unwrap();
        let store = MemoryStorage::new(Arc::new(s));
        let alice = store.insert_entity("student").unwrap();
        let bob = store.insert_entity("person").unwrap();
        let carol = store.insert_entity("person").unwrap();
        store
            .insert_relation("friendship", &[("friend", alice), ("friend", bob)])
            .unwrap();
        let name = store.insert_attribute("name", "Alice").unwrap();
        store.insert_ownership(alice, name).unwrap();
        (store, [alice, bob, carol])
    }

    fn run(store: &MemoryStorage, pattern: Pattern) -> Vec<Answer> {
        let query = ReasonerQuery::new(&pattern, &store.schema()).unwrap();
        store.execute(&query).unwrap()
    }

    #[test]
    fn isa_follows_the_type_hierarchy() {
        let (store, _) = store();
        assert_eq!(run(&store, Pattern::new().isa("x", "person")).len(), 3);
        assert_eq!(run(&store, Pattern::new().isa("x", "student")).len(), 1);
        // student, person and entity, but not thing
        let typed = run(
            &store,
            Pattern::new().isa("x", "student").isa_var("x", "t"),
        );
        assert_eq!(typed.len(), 3);
    }

    #[test]
    fn relations_match_players_in_both_directions() {
        let (store, [alice, bob, _]) = store();
        let answers = run(
            &store,
            Pattern::new().relation(Rel::new().isa("friendship").player("friend", "x").player("friend", "y")),
        );
        assert_eq!(answers.len(), 2);
        let x = Variable::new("x");
        let pinned = run(
            &store,
            Pattern::new()
                .relation(Rel::new().isa("friendship").player("friend", "x").player("friend", "y"))
                .id("y", bob),
        );
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].get(&x), Some(alice));
    }

    #[test]
    fn attributes_are_filtered_by_value() {
        let (store, [alice, ..]) = store();
        let answers = run(&store, Pattern::new().has_value("x", "name", "Alice"));
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].get(&Variable::new("x")), Some(alice));
        assert!(run(&store, Pattern::new().has_value("x", "name", "Bob")).is_empty());
    }

    #[test]
    fn neq_prunes_reflexive_pairs() {
        let (store, _) = store();
        let answers = run(
            &store,
            Pattern::new().isa("x", "person").isa("y", "person").neq("x", "y"),
        );
        assert_eq!(answers.len(), 6);
    }
}
