//! Unification of atoms and queries.

use std::collections::BTreeSet;

use super::{MultiUnifier, Unifier, UnifierType};
use crate::atom::{
    Atom, AttributeAtom, Comparison, IsaAtom, Operand, Predicate, RelationAtom, RolePlayer,
    VarPredicates,
};
use crate::concept::{ConceptId, Value};
use crate::query::ReasonerQuery;
use crate::schema::{Label, Schema};
use crate::var::Variable;

#[derive(Clone, Copy)]
struct Ctx<'a> {
    ty: UnifierType,
    schema: Option<&'a Schema>,
    child_preds: &'a VarPredicates,
    parent_preds: &'a VarPredicates,
}

/// Every unifier mapping the variables of `child` onto those of `parent`.
///
/// `child_preds` and `parent_preds` are the single-variable predicates of the
/// queries each atom belongs to; they decide whether two variables may be
/// identified. The result is empty when the atoms do not unify.
pub fn atom_multi_unifier(
    child: &Atom,
    child_preds: &VarPredicates,
    parent: &Atom,
    parent_preds: &VarPredicates,
    ty: UnifierType,
    schema: Option<&Schema>,
) -> MultiUnifier {
    let ctx = Ctx {
        ty,
        schema,
        child_preds,
        parent_preds,
    };
    match (child, parent) {
        (Atom::Relation(c), Atom::Relation(p)) => unify_relations(&ctx, c, p),
        (Atom::Isa(c), Atom::Isa(p)) => unify_isa(&ctx, c, p),
        (Atom::Relation(c), Atom::Isa(p)) if ty == UnifierType::Rule => {
            unify_instance_with_isa(&ctx, &c.var, c.label.as_ref(), c.type_var.as_ref(), p)
        }
        (Atom::Attribute(c), Atom::Isa(p)) if ty == UnifierType::Rule => {
            unify_instance_with_isa(&ctx, &c.attribute, Some(&c.label), None, p)
        }
        (Atom::Attribute(c), Atom::Attribute(p)) => unify_attributes(&ctx, c, p),
        (Atom::Sub(c), Atom::Sub(p)) => unify_labelled(&ctx, &c.var, &c.label, &p.var, &p.label),
        (Atom::Plays(c), Atom::Plays(p)) => unify_labelled(&ctx, &c.var, &c.role, &p.var, &p.role),
        (Atom::Relates(c), Atom::Relates(p)) => {
            unify_labelled(&ctx, &c.var, &c.role, &p.var, &p.role)
        }
        (Atom::Predicate(c), Atom::Predicate(p)) => unify_predicates(&ctx, c, p),
        _ => MultiUnifier::empty(),
    }
}

/// Every unifier mapping `child` onto `parent` atom by atom.
///
/// Selectable atoms are paired one-to-one (the child may have more atoms
/// than the parent only in rule mode). In exact and structural modes the
/// predicates must also correspond under the unifier.
pub fn query_multi_unifier(
    child: &ReasonerQuery,
    parent: &ReasonerQuery,
    ty: UnifierType,
) -> MultiUnifier {
    let child_atoms = child.selectable_atoms();
    let parent_atoms = parent.selectable_atoms();
    if child_atoms.len() < parent_atoms.len()
        || (ty.requires_matching_slots() && child_atoms.len() != parent_atoms.len())
    {
        return MultiUnifier::empty();
    }
    let schema = Some(parent.schema());

    // pairwise[p][c]
    let pairwise: Vec<Vec<MultiUnifier>> = parent_atoms
        .iter()
        .map(|p| {
            child_atoms
                .iter()
                .map(|c| {
                    atom_multi_unifier(
                        c,
                        child.var_predicates(),
                        p,
                        parent.var_predicates(),
                        ty,
                        schema,
                    )
                })
                .collect()
        })
        .collect();
    if pairwise.iter().any(|row| row.iter().all(MultiUnifier::is_empty)) {
        return MultiUnifier::empty();
    }

    let mut out = BTreeSet::new();
    let mut used = vec![false; child_atoms.len()];
    join_pairs(ty, &pairwise, 0, &mut used, Unifier::new(), &mut out);

    let mut unifiers: MultiUnifier = out.into_iter().collect();
    if ty.requires_matching_slots() {
        let structural = ty == UnifierType::Structural;
        let target: BTreeSet<Predicate> = parent
            .predicates()
            .into_iter()
            .map(|p| normalize(p.clone(), structural))
            .collect();
        unifiers.retain(|u| {
            let renamed: BTreeSet<Predicate> = child
                .predicates()
                .into_iter()
                .map(|p| normalize(p.map_vars(&|v| u.rename(v)), structural))
                .collect();
            renamed == target
        });
    }
    unifiers
}

fn join_pairs(
    ty: UnifierType,
    pairwise: &[Vec<MultiUnifier>],
    parent_index: usize,
    used: &mut [bool],
    acc: Unifier,
    out: &mut BTreeSet<Unifier>,
) {
    let Some(row) = pairwise.get(parent_index) else {
        out.insert(acc);
        return;
    };
    for (child_index, unifiers) in row.iter().enumerate() {
        if used[child_index] {
            continue;
        }
        used[child_index] = true;
        for u in unifiers.iter() {
            let merged = acc.merge(u);
            if !ty.allows_non_injective() && !(merged.is_functional() && merged.is_injective()) {
                continue;
            }
            join_pairs(ty, pairwise, parent_index + 1, used, merged, out);
        }
        used[child_index] = false;
    }
}

/// Predicates ordered canonically so sets of them can be compared; ids are
/// blanked in structural mode and inequalities are oriented.
fn normalize(p: Predicate, structural: bool) -> Predicate {
    match p {
        Predicate::Id { var, .. } if structural => Predicate::Id {
            var,
            id: ConceptId::placeholder(),
        },
        Predicate::Neq { left, right } if right < left => Predicate::Neq {
            left: right,
            right: left,
        },
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Variable compatibility
// ---------------------------------------------------------------------------

fn ids_compatible(ty: UnifierType, child: Option<ConceptId>, parent: Option<ConceptId>) -> bool {
    match ty {
        UnifierType::Exact => child == parent,
        UnifierType::Structural => child.is_some() == parent.is_some(),
        UnifierType::Rule => match (child, parent) {
            (Some(c), Some(p)) => c == p,
            _ => true,
        },
        UnifierType::Subsumptive => parent.is_none() || child == parent,
    }
}

fn constants<'a>(preds: &'a VarPredicates, var: &Variable) -> Vec<(Comparison, &'a Value)> {
    let mut out: Vec<(Comparison, &Value)> =
        preds.values_of(var).filter_map(Predicate::constant).collect();
    out.sort();
    out
}

fn values_compatible(ctx: &Ctx<'_>, child: &Variable, parent: &Variable) -> bool {
    let c = constants(ctx.child_preds, child);
    let p = constants(ctx.parent_preds, parent);
    match ctx.ty {
        UnifierType::Exact | UnifierType::Structural => c == p,
        // A rule head constant must be able to satisfy every parent bound.
        UnifierType::Rule => c
            .iter()
            .filter(|(cmp, _)| *cmp == Comparison::Eq)
            .all(|(_, value)| p.iter().all(|(pc, bound)| pc.test(value, bound))),
        UnifierType::Subsumptive => p.iter().all(|bound| c.contains(bound)),
    }
}

fn vars_compatible(ctx: &Ctx<'_>, child: &Variable, parent: &Variable) -> bool {
    ids_compatible(
        ctx.ty,
        ctx.child_preds.id_of(child),
        ctx.parent_preds.id_of(parent),
    ) && values_compatible(ctx, child, parent)
}

/// Unify an optional slot (type variable, role variable, ownership edge).
fn unify_slot(
    ctx: &Ctx<'_>,
    child: Option<&Variable>,
    parent: Option<&Variable>,
    unifier: &mut Unifier,
) -> bool {
    match (child, parent) {
        (Some(c), Some(p)) => {
            if !vars_compatible(ctx, c, p) {
                return false;
            }
            unifier.insert(c.clone(), p.clone());
            true
        }
        (None, None) => true,
        _ => !ctx.ty.requires_matching_slots(),
    }
}

// ---------------------------------------------------------------------------
// Per-kind unification
// ---------------------------------------------------------------------------

fn unify_isa(ctx: &Ctx<'_>, child: &IsaAtom, parent: &IsaAtom) -> MultiUnifier {
    if !ctx
        .ty
        .type_compatible(child.label.as_ref(), parent.label.as_ref(), ctx.schema)
        || !vars_compatible(ctx, &child.var, &parent.var)
    {
        return MultiUnifier::empty();
    }
    let mut u = Unifier::from_pairs([(child.var.clone(), parent.var.clone())]);
    if !unify_slot(ctx, child.type_var.as_ref(), parent.type_var.as_ref(), &mut u) {
        return MultiUnifier::empty();
    }
    MultiUnifier::single(u)
}

/// A relation or attribute rule head answering an isa query about its
/// instance.
fn unify_instance_with_isa(
    ctx: &Ctx<'_>,
    instance: &Variable,
    label: Option<&Label>,
    type_var: Option<&Variable>,
    parent: &IsaAtom,
) -> MultiUnifier {
    if !ctx.ty.type_compatible(label, parent.label.as_ref(), ctx.schema)
        || !vars_compatible(ctx, instance, &parent.var)
    {
        return MultiUnifier::empty();
    }
    let mut u = Unifier::from_pairs([(instance.clone(), parent.var.clone())]);
    if !unify_slot(ctx, type_var, parent.type_var.as_ref(), &mut u) {
        return MultiUnifier::empty();
    }
    MultiUnifier::single(u)
}

fn unify_attributes(ctx: &Ctx<'_>, child: &AttributeAtom, parent: &AttributeAtom) -> MultiUnifier {
    if !ctx
        .ty
        .type_compatible(Some(&child.label), Some(&parent.label), ctx.schema)
        || !vars_compatible(ctx, &child.owner, &parent.owner)
        || !vars_compatible(ctx, &child.attribute, &parent.attribute)
    {
        return MultiUnifier::empty();
    }
    let mut u = Unifier::from_pairs([
        (child.owner.clone(), parent.owner.clone()),
        (child.attribute.clone(), parent.attribute.clone()),
    ]);
    if !unify_slot(
        ctx,
        child.relation_var.as_ref(),
        parent.relation_var.as_ref(),
        &mut u,
    ) {
        return MultiUnifier::empty();
    }
    if !ctx.ty.allows_non_injective() && !u.is_injective() {
        return MultiUnifier::empty();
    }
    MultiUnifier::single(u)
}

fn unify_labelled(
    ctx: &Ctx<'_>,
    child_var: &Variable,
    child_label: &Label,
    parent_var: &Variable,
    parent_label: &Label,
) -> MultiUnifier {
    if child_label != parent_label || !vars_compatible(ctx, child_var, parent_var) {
        return MultiUnifier::empty();
    }
    MultiUnifier::single(Unifier::from_pairs([(
        child_var.clone(),
        parent_var.clone(),
    )]))
}

fn unify_predicates(ctx: &Ctx<'_>, child: &Predicate, parent: &Predicate) -> MultiUnifier {
    match (child, parent) {
        (Predicate::Id { var: cv, id: ci }, Predicate::Id { var: pv, id: pi }) => {
            if !ids_compatible(ctx.ty, Some(*ci), Some(*pi)) {
                return MultiUnifier::empty();
            }
            MultiUnifier::single(Unifier::from_pairs([(cv.clone(), pv.clone())]))
        }
        (
            Predicate::Value {
                var: cv,
                comparison: cc,
                operand: co,
            },
            Predicate::Value {
                var: pv,
                comparison: pc,
                operand: po,
            },
        ) if cc == pc => match (co, po) {
            (Operand::Const(a), Operand::Const(b)) if a == b => {
                MultiUnifier::single(Unifier::from_pairs([(cv.clone(), pv.clone())]))
            }
            (Operand::Var(a), Operand::Var(b)) => MultiUnifier::single(Unifier::from_pairs([
                (cv.clone(), pv.clone()),
                (a.clone(), b.clone()),
            ])),
            _ => MultiUnifier::empty(),
        },
        (
            Predicate::Neq {
                left: cl,
                right: cr,
            },
            Predicate::Neq {
                left: pl,
                right: pr,
            },
        ) => [
            Unifier::from_pairs([(cl.clone(), pl.clone()), (cr.clone(), pr.clone())]),
            Unifier::from_pairs([(cl.clone(), pr.clone()), (cr.clone(), pl.clone())]),
        ]
        .into_iter()
        .filter(|u| ctx.ty.allows_non_injective() || (u.is_functional() && u.is_injective()))
        .collect(),
        _ => MultiUnifier::empty(),
    }
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

fn role_players_compatible(ctx: &Ctx<'_>, child: &RolePlayer, parent: &RolePlayer) -> bool {
    let child_role = child.effective_role();
    if !ctx
        .ty
        .role_compatible(&child_role, &parent.effective_role(), ctx.schema)
        || !vars_compatible(ctx, &child.player, &parent.player)
    {
        return false;
    }
    match (&child.role_var, &parent.role_var) {
        (Some(c), Some(p)) => vars_compatible(ctx, c, p),
        (None, Some(p)) => {
            if ctx.ty.requires_matching_slots() {
                return false;
            }
            // A parent role variable pinned to a role still constrains the
            // child's role.
            match (ctx.parent_preds.id_of(p), ctx.schema) {
                (Some(id), Some(schema)) => schema
                    .label_of(id)
                    .is_some_and(|pinned| ctx.ty.role_compatible(&child_role, pinned, ctx.schema)),
                _ => true,
            }
        }
        (Some(_), None) => !ctx.ty.requires_matching_slots(),
        (None, None) => true,
    }
}

fn unify_relations(ctx: &Ctx<'_>, child: &RelationAtom, parent: &RelationAtom) -> MultiUnifier {
    if !ctx
        .ty
        .type_compatible(child.label.as_ref(), parent.label.as_ref(), ctx.schema)
    {
        return MultiUnifier::empty();
    }
    if parent.arity() > child.arity()
        || (!ctx.ty.allows_fewer_parent_players() && parent.arity() != child.arity())
    {
        return MultiUnifier::empty();
    }
    if !vars_compatible(ctx, &child.var, &parent.var) {
        return MultiUnifier::empty();
    }
    let mut base = Unifier::from_pairs([(child.var.clone(), parent.var.clone())]);
    if !unify_slot(ctx, child.type_var.as_ref(), parent.type_var.as_ref(), &mut base) {
        return MultiUnifier::empty();
    }

    let child_rps = child.role_players();
    let parent_rps = parent.role_players();
    let candidates: Vec<Vec<usize>> = parent_rps
        .iter()
        .map(|prp| {
            (0..child_rps.len())
                .filter(|&i| role_players_compatible(ctx, &child_rps[i], prp))
                .collect()
        })
        .collect();
    if candidates.iter().any(Vec::is_empty) {
        return MultiUnifier::empty();
    }

    let mut assignments = Vec::new();
    assign(
        &candidates,
        &mut vec![false; child_rps.len()],
        &mut Vec::new(),
        &mut assignments,
    );

    let mut out = BTreeSet::new();
    for assignment in assignments {
        let mut u = base.clone();
        for (parent_index, &child_index) in assignment.iter().enumerate() {
            let (crp, prp) = (&child_rps[child_index], &parent_rps[parent_index]);
            u.insert(crp.player.clone(), prp.player.clone());
            if let (Some(crv), Some(prv)) = (&crp.role_var, &prp.role_var) {
                u.insert(crv.clone(), prv.clone());
            }
        }
        // Identifying distinct variables is only sound for rules. Other
        // assignments of the same atoms may still be renamings.
        if !ctx.ty.allows_non_injective() && !(u.is_functional() && u.is_injective()) {
            continue;
        }
        out.insert(u);
    }
    out.into_iter().collect()
}

/// Enumerate injective choices of one child role player per parent role
/// player.
fn assign(
    candidates: &[Vec<usize>],
    used: &mut [bool],
    current: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    let Some(options) = candidates.get(current.len()) else {
        out.push(current.clone());
        return;
    };
    for &child_index in options {
        if used[child_index] {
            continue;
        }
        used[child_index] = true;
        current.push(child_index);
        assign(candidates, used, current, out);
        current.pop();
        used[child_index] = false;
    }
}
