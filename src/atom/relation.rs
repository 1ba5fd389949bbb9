//! Relation atoms: role players, role inference and validation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use crate::error::{QueryError, QueryResult};
use crate::schema::{Label, Schema, TypeKind, meta};
use crate::var::Variable;

/// One `role: $player` slot of a relation atom.
///
/// Equality, hashing and ordering use the *effective* role, so a slot whose
/// role was inferred compares equal to one that named the same role.
#[derive(Debug, Clone)]
pub struct RolePlayer {
    /// Role written in the pattern; `None` or the meta role mean "any role".
    pub role: Option<Label>,
    /// Variable bound to the role concept, when the pattern asks for it.
    pub role_var: Option<Variable>,
    pub player: Variable,
    /// Role deduced from the schema when the pattern left it open.
    pub inferred_role: Option<Label>,
}

impl RolePlayer {
    pub fn new(role: Option<Label>, role_var: Option<Variable>, player: Variable) -> Self {
        Self {
            role,
            role_var,
            player,
            inferred_role: None,
        }
    }

    /// The role used for matching and unification.
    pub fn effective_role(&self) -> Label {
        match (&self.role, &self.inferred_role) {
            (Some(role), _) if role.as_str() != meta::ROLE => role.clone(),
            (_, Some(inferred)) => inferred.clone(),
            _ => Label::new(meta::ROLE),
        }
    }

    /// Whether the pattern left the role open and inference did not close it.
    pub fn is_role_ambiguous(&self) -> bool {
        self.effective_role().as_str() == meta::ROLE
    }

    fn key(&self) -> (Label, &Variable, Option<&Variable>) {
        (self.effective_role(), &self.player, self.role_var.as_ref())
    }
}

impl PartialEq for RolePlayer {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for RolePlayer {}

impl Hash for RolePlayer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for RolePlayer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RolePlayer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// `$var (role: $player, ...) isa label`.
///
/// Role players are kept sorted so derived equality treats them as a multiset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationAtom {
    /// The relation instance.
    pub var: Variable,
    pub type_var: Option<Variable>,
    pub label: Option<Label>,
    role_players: Vec<RolePlayer>,
}

impl RelationAtom {
    pub fn new(
        var: Variable,
        type_var: Option<Variable>,
        label: Option<Label>,
        mut role_players: Vec<RolePlayer>,
    ) -> Self {
        role_players.sort();
        Self {
            var,
            type_var,
            label,
            role_players,
        }
    }

    pub fn role_players(&self) -> &[RolePlayer] {
        &self.role_players
    }

    pub fn arity(&self) -> usize {
        self.role_players.len()
    }

    pub fn players(&self) -> impl Iterator<Item = &Variable> {
        self.role_players.iter().map(|rp| &rp.player)
    }

    /// Effective role → variables playing it.
    pub fn role_var_map(&self) -> BTreeMap<Label, BTreeSet<Variable>> {
        let mut map: BTreeMap<Label, BTreeSet<Variable>> = BTreeMap::new();
        for rp in &self.role_players {
            map.entry(rp.effective_role())
                .or_default()
                .insert(rp.player.clone());
        }
        map
    }

    /// Whether the type and every role are pinned down.
    pub fn is_fully_specified(&self) -> bool {
        self.label
            .as_ref()
            .is_some_and(|l| l.as_str() != meta::RELATION)
            && self.role_players.iter().all(|rp| !rp.is_role_ambiguous())
    }

    pub fn map_vars(&self, f: &impl Fn(&Variable) -> Variable) -> RelationAtom {
        let role_players = self
            .role_players
            .iter()
            .map(|rp| RolePlayer {
                role: rp.role.clone(),
                role_var: rp.role_var.as_ref().map(f),
                player: f(&rp.player),
                inferred_role: rp.inferred_role.clone(),
            })
            .collect();
        RelationAtom::new(
            f(&self.var),
            self.type_var.as_ref().map(f),
            self.label.clone(),
            role_players,
        )
    }

    pub(crate) fn role_players_mut(&mut self) -> &mut Vec<RolePlayer> {
        &mut self.role_players
    }

    pub(crate) fn resort(&mut self) {
        self.role_players.sort();
    }

    // -----------------------------------------------------------------------
    // Validation and inference
    // -----------------------------------------------------------------------

    /// Check labels against the schema.
    pub fn validate(&self, schema: &Schema) -> QueryResult<()> {
        if let Some(label) = &self.label {
            match schema.kind(label.as_str()) {
                None => {
                    return Err(QueryError::UnknownType {
                        label: label.to_string(),
                    });
                }
                Some(TypeKind::Relation) => {}
                Some(_) => {
                    return Err(QueryError::NotARelationType {
                        label: label.to_string(),
                    });
                }
            }
        }
        for rp in &self.role_players {
            let Some(role) = &rp.role else { continue };
            match schema.kind(role.as_str()) {
                None => {
                    return Err(QueryError::UnknownType {
                        label: role.to_string(),
                    });
                }
                Some(TypeKind::Role) => {}
                Some(_) => {
                    return Err(QueryError::NotARole {
                        label: role.to_string(),
                    });
                }
            }
            if let Some(label) = &self.label {
                if !schema.relation_relates(label.as_str(), role.as_str()) {
                    return Err(QueryError::RoleNotRelated {
                        role: role.to_string(),
                        relation: label.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Infer the relation type from explicit roles when exactly one most
    /// general candidate relates all of them.
    pub fn infer_type(&mut self, schema: &Schema) {
        if self.label.is_some() {
            return;
        }
        let explicit: Vec<&Label> = self
            .role_players
            .iter()
            .filter_map(|rp| rp.role.as_ref())
            .filter(|r| r.as_str() != meta::ROLE)
            .collect();
        let Some(first) = explicit.first() else {
            return;
        };
        let candidates: BTreeSet<Label> = schema
            .relations_relating(first.as_str())
            .into_iter()
            .filter(|rel| {
                explicit
                    .iter()
                    .all(|role| schema.relation_relates(rel.as_str(), role.as_str()))
            })
            .collect();
        let tops: Vec<&Label> = candidates
            .iter()
            .filter(|rel| {
                !candidates
                    .iter()
                    .any(|other| other != *rel && schema.is_subtype(rel.as_str(), other.as_str()))
            })
            .collect();
        if let [only] = tops.as_slice() {
            self.label = Some((*only).clone());
        }
    }

    /// Narrow open roles to the single role compatible with the relation
    /// type and the player's known types.
    pub fn infer_roles(&mut self, schema: &Schema, known_types: &HashMap<Variable, Vec<Label>>) {
        let Some(label) = self.label.clone() else {
            return;
        };
        let related = schema.related_roles(label.as_str());
        for rp in &mut self.role_players {
            let open = rp.role.as_ref().is_none_or(|r| r.as_str() == meta::ROLE);
            if !open {
                continue;
            }
            let types = known_types.get(&rp.player);
            let candidates: Vec<&Label> = related
                .iter()
                .filter(|role| {
                    types.is_none_or(|types| {
                        types.iter().all(|t| schema.can_play(t.as_str(), role.as_str()))
                    })
                })
                .collect();
            rp.inferred_role = match candidates.as_slice() {
                [only] => Some((*only).clone()),
                _ => None,
            };
        }
        self.resort();
    }

    /// Whether some role player's known type cannot fill its role.
    pub fn is_type_incompatible(
        &self,
        schema: &Schema,
        known_types: &HashMap<Variable, Vec<Label>>,
    ) -> bool {
        self.role_players.iter().any(|rp| {
            known_types.get(&rp.player).is_some_and(|types| {
                types
                    .iter()
                    .any(|t| !schema.can_play(t.as_str(), rp.effective_role().as_str()))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        let mut s = Schema::new();
        s.define_entity("person", None).unwrap();
        s.define_entity("city", None).unwrap();
        s.define_role("resident", None).unwrap();
        s.define_role("residence", None).unwrap();
        s.define_relation("residency", None).unwrap();
        s.relates("residency", "resident").unwrap();
        s.relates("residency", "residence").unwrap();
        s.plays("person", "resident").unwrap();
        s.plays("city", "residence").unwrap();
        s
    }

    fn rp(role: Option<&str>, player: &str) -> RolePlayer {
        RolePlayer::new(role.map(Label::new), None, Variable::new(player))
    }

    #[test]
    fn role_players_compare_as_multiset() {
        let a = RelationAtom::new(
            Variable::new("r"),
            None,
            None,
            vec![rp(Some("resident"), "x"), rp(Some("residence"), "y")],
        );
        let b = RelationAtom::new(
            Variable::new("r"),
            None,
            None,
            vec![rp(Some("residence"), "y"), rp(Some("resident"), "x")],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn roles_inferred_from_player_types() {
        let s = schema();
        let mut atom = RelationAtom::new(
            Variable::new("r"),
            None,
            Some(Label::new("residency")),
            vec![rp(None, "x"), rp(None, "y")],
        );
        let known = HashMap::from([(Variable::new("x"), vec![Label::new("person")])]);
        atom.infer_roles(&s, &known);
        let map = atom.role_var_map();
        assert!(map[&Label::new("resident")].contains(&Variable::new("x")));
        assert!(map[&Label::new("role")].contains(&Variable::new("y")));
    }

    #[test]
    fn type_inferred_from_roles() {
        let s = schema();
        let mut atom = RelationAtom::new(
            Variable::new("r"),
            None,
            None,
            vec![rp(Some("resident"), "x")],
        );
        atom.infer_type(&s);
        assert_eq!(atom.label, Some(Label::new("residency")));
    }

    #[test]
    fn validation_rejects_unrelated_roles() {
        let mut s = schema();
        s.define_role("employee", None).unwrap();
        let atom = RelationAtom::new(
            Variable::new("r"),
            None,
            Some(Label::new("residency")),
            vec![rp(Some("employee"), "x")],
        );
        assert!(matches!(
            atom.validate(&s),
            Err(QueryError::RoleNotRelated { .. })
        ));
        let not_role = RelationAtom::new(
            Variable::new("r"),
            None,
            Some(Label::new("residency")),
            vec![rp(Some("person"), "x")],
        );
        assert!(matches!(not_role.validate(&s), Err(QueryError::NotARole { .. })));
    }

    #[test]
    fn incompatible_player_types_are_detected() {
        let s = schema();
        let atom = RelationAtom::new(
            Variable::new("r"),
            None,
            Some(Label::new("residency")),
            vec![rp(Some("residence"), "x")],
        );
        let known = HashMap::from([(Variable::new("x"), vec![Label::new("person")])]);
        assert!(atom.is_type_incompatible(&s, &known));
    }
}
