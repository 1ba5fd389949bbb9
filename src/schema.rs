//! Schema: the type and role hierarchy the reasoner consults.
//!
//! Types form four hierarchies (entity, relation, attribute, role) rooted at
//! meta types. Besides `sub` the schema records which roles each relation
//! type `relates`, which roles each type `plays` and which attribute types
//! each type `owns`. All capability queries are answered over the transitive
//! closure: a subtype inherits what its supertypes declare.
//!
//! Every type and role is also a concept with its own [`ConceptId`], so type
//! and role variables in patterns can be bound like any other variable.

use std::borrow::Borrow;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::concept::{Concept, ConceptId};
use crate::error::{SchemaError, SchemaResult};

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Cheaply clonable schema label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(Arc<str>);

impl Label {
    pub fn new(label: &str) -> Self {
        Label(Arc::from(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Label {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Label {
    fn from(label: &str) -> Self {
        Label::new(label)
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Label::new(&s))
    }
}

/// Labels of the meta types every schema starts with.
pub mod meta {
    pub const THING: &str = "thing";
    pub const ENTITY: &str = "entity";
    pub const RELATION: &str = "relation";
    pub const ATTRIBUTE: &str = "attribute";
    pub const ROLE: &str = "role";

    pub fn is_meta(label: &str) -> bool {
        matches!(label, THING | ENTITY | RELATION | ATTRIBUTE | ROLE)
    }
}

// ---------------------------------------------------------------------------
// Schema types
// ---------------------------------------------------------------------------

/// The hierarchy a schema label belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    /// The root `thing` type.
    Thing,
    Entity,
    Relation,
    Attribute,
    Role,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeKind::Thing => "thing",
            TypeKind::Entity => "entity type",
            TypeKind::Relation => "relation type",
            TypeKind::Attribute => "attribute type",
            TypeKind::Role => "role",
        };
        f.write_str(name)
    }
}

/// A single type or role definition.
#[derive(Debug, Clone)]
pub struct SchemaType {
    pub id: ConceptId,
    pub label: Label,
    pub kind: TypeKind,
    /// Direct supertype; `None` only for `thing` and `role`.
    pub sup: Option<Label>,
}

/// Type and role hierarchy with capability declarations.
#[derive(Debug, Clone)]
pub struct Schema {
    types: HashMap<Label, SchemaType>,
    by_id: HashMap<ConceptId, Label>,
    /// Direct subtypes, for downward closures.
    children: HashMap<Label, Vec<Label>>,
    relates: HashMap<Label, BTreeSet<Label>>,
    plays: HashMap<Label, BTreeSet<Label>>,
    owns: HashMap<Label, BTreeSet<Label>>,
    next_id: u64,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    /// Create a schema holding only the meta types.
    pub fn new() -> Self {
        let mut schema = Self {
            types: HashMap::new(),
            by_id: HashMap::new(),
            children: HashMap::new(),
            relates: HashMap::new(),
            plays: HashMap::new(),
            owns: HashMap::new(),
            next_id: 1,
        };
        schema.insert(meta::THING, TypeKind::Thing, None);
        schema.insert(meta::ENTITY, TypeKind::Entity, Some(meta::THING));
        schema.insert(meta::RELATION, TypeKind::Relation, Some(meta::THING));
        schema.insert(meta::ATTRIBUTE, TypeKind::Attribute, Some(meta::THING));
        schema.insert(meta::ROLE, TypeKind::Role, None);
        schema
    }

    fn insert(&mut self, label: &str, kind: TypeKind, sup: Option<&str>) -> ConceptId {
        // Ids start at 1 and never wrap within a schema.
        let id = ConceptId::new(self.next_id).unwrap_or_else(ConceptId::placeholder);
        self.next_id += 1;
        let label = Label::new(label);
        let sup = sup.map(Label::new);
        if let Some(sup) = &sup {
            self.children.entry(sup.clone()).or_default().push(label.clone());
        }
        self.by_id.insert(id, label.clone());
        self.types.insert(
            label.clone(),
            SchemaType {
                id,
                label,
                kind,
                sup,
            },
        );
        id
    }

    fn define(&mut self, label: &str, kind: TypeKind, sup: &str) -> SchemaResult<ConceptId> {
        if self.types.contains_key(label) {
            return Err(SchemaError::DuplicateLabel {
                label: label.to_string(),
            });
        }
        let sup_type = self.types.get(sup).ok_or_else(|| SchemaError::UnknownSupertype {
            label: label.to_string(),
            sup: sup.to_string(),
        })?;
        if sup_type.kind != kind {
            return Err(SchemaError::KindMismatch {
                label: sup.to_string(),
                expected: kind.to_string(),
                actual: sup_type.kind.to_string(),
            });
        }
        Ok(self.insert(label, kind, Some(sup)))
    }

    /// Define an entity type under `sup` (default: `entity`).
    pub fn define_entity(&mut self, label: &str, sup: Option<&str>) -> SchemaResult<ConceptId> {
        self.define(label, TypeKind::Entity, sup.unwrap_or(meta::ENTITY))
    }

    /// Define a relation type under `sup` (default: `relation`).
    pub fn define_relation(&mut self, label: &str, sup: Option<&str>) -> SchemaResult<ConceptId> {
        self.define(label, TypeKind::Relation, sup.unwrap_or(meta::RELATION))
    }

    /// Define an attribute type under `sup` (default: `attribute`).
    pub fn define_attribute(&mut self, label: &str, sup: Option<&str>) -> SchemaResult<ConceptId> {
        self.define(label, TypeKind::Attribute, sup.unwrap_or(meta::ATTRIBUTE))
    }

    /// Define a role under `sup` (default: the meta role).
    pub fn define_role(&mut self, label: &str, sup: Option<&str>) -> SchemaResult<ConceptId> {
        self.define(label, TypeKind::Role, sup.unwrap_or(meta::ROLE))
    }

    /// Declare that `relation` relates `role`.
    pub fn relates(&mut self, relation: &str, role: &str) -> SchemaResult<()> {
        self.expect_kind(relation, TypeKind::Relation)?;
        self.expect_kind(role, TypeKind::Role)?;
        self.relates
            .entry(Label::new(relation))
            .or_default()
            .insert(Label::new(role));
        Ok(())
    }

    /// Declare that instances of `player` can play `role`.
    pub fn plays(&mut self, player: &str, role: &str) -> SchemaResult<()> {
        self.expect_label(player)?;
        self.expect_kind(role, TypeKind::Role)?;
        self.plays
            .entry(Label::new(player))
            .or_default()
            .insert(Label::new(role));
        Ok(())
    }

    /// Declare that instances of `owner` can own `attribute`.
    pub fn owns(&mut self, owner: &str, attribute: &str) -> SchemaResult<()> {
        self.expect_label(owner)?;
        self.expect_kind(attribute, TypeKind::Attribute)?;
        self.owns
            .entry(Label::new(owner))
            .or_default()
            .insert(Label::new(attribute));
        Ok(())
    }

    fn expect_label(&self, label: &str) -> SchemaResult<&SchemaType> {
        self.types.get(label).ok_or_else(|| SchemaError::UnknownLabel {
            label: label.to_string(),
        })
    }

    fn expect_kind(&self, label: &str, kind: TypeKind) -> SchemaResult<()> {
        let ty = self.expect_label(label)?;
        if ty.kind != kind {
            return Err(SchemaError::KindMismatch {
                label: label.to_string(),
                expected: kind.to_string(),
                actual: ty.kind.to_string(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// First id not used by the schema; instance allocators start here.
    pub fn next_free_id(&self) -> u64 {
        self.next_id
    }

    pub fn get(&self, label: &str) -> Option<&SchemaType> {
        self.types.get(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.types.contains_key(label)
    }

    pub fn kind(&self, label: &str) -> Option<TypeKind> {
        self.types.get(label).map(|t| t.kind)
    }

    pub fn id_of(&self, label: &str) -> Option<ConceptId> {
        self.types.get(label).map(|t| t.id)
    }

    pub fn label_of(&self, id: ConceptId) -> Option<&Label> {
        self.by_id.get(&id)
    }

    /// The type or role with this id as a concept.
    pub fn concept(&self, id: ConceptId) -> Option<Concept> {
        self.label_of(id)
            .map(|label| Concept::schema_type(id, label.clone()))
    }

    pub fn types(&self) -> impl Iterator<Item = &SchemaType> {
        self.types.values()
    }

    // -----------------------------------------------------------------------
    // Closures
    // -----------------------------------------------------------------------

    /// The label and all its supertypes, nearest first.
    pub fn sups(&self, label: &str) -> Vec<Label> {
        let mut out = Vec::new();
        let mut current = self.types.get(label);
        while let Some(ty) = current {
            out.push(ty.label.clone());
            current = ty.sup.as_ref().and_then(|s| self.types.get(s.as_str()));
        }
        out
    }

    /// The label and all its transitive subtypes (BFS order).
    pub fn subs(&self, label: &str) -> Vec<Label> {
        let Some(root) = self.types.get(label) else {
            return Vec::new();
        };
        let mut out = vec![root.label.clone()];
        let mut queue = VecDeque::from([root.label.clone()]);
        while let Some(current) = queue.pop_front() {
            if let Some(children) = self.children.get(&current) {
                for child in children {
                    out.push(child.clone());
                    queue.push_back(child.clone());
                }
            }
        }
        out
    }

    /// Whether `sub` is `sup` or one of its transitive subtypes.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return self.contains(sub);
        }
        let mut current = self.types.get(sub);
        while let Some(ty) = current {
            if ty.label.as_str() == sup {
                return true;
            }
            current = ty.sup.as_ref().and_then(|s| self.types.get(s.as_str()));
        }
        false
    }

    /// Whether the two labels lie on one hierarchy chain.
    pub fn are_comparable(&self, a: &str, b: &str) -> bool {
        self.is_subtype(a, b) || self.is_subtype(b, a)
    }

    /// Roles `relation` relates, including those declared on supertypes.
    pub fn related_roles(&self, relation: &str) -> BTreeSet<Label> {
        self.sups(relation)
            .iter()
            .filter_map(|l| self.relates.get(l))
            .flatten()
            .cloned()
            .collect()
    }

    /// Whether `relation` (or a supertype) relates `role` or one of its subroles.
    ///
    /// The meta role is related by every relation type.
    pub fn relation_relates(&self, relation: &str, role: &str) -> bool {
        if role == meta::ROLE {
            return true;
        }
        let related = self.related_roles(relation);
        related.iter().any(|r| self.are_comparable(r.as_str(), role))
            || (relation == meta::RELATION && self.kind(role) == Some(TypeKind::Role))
    }

    /// Roles instances of `player` can play, including inherited capabilities.
    pub fn playable_roles(&self, player: &str) -> BTreeSet<Label> {
        self.sups(player)
            .iter()
            .filter_map(|l| self.plays.get(l))
            .flatten()
            .cloned()
            .collect()
    }

    /// Whether instances of `player` can fill `role` (directly or through a
    /// subrole or superrole of a declared capability).
    pub fn can_play(&self, player: &str, role: &str) -> bool {
        if role == meta::ROLE {
            return true;
        }
        self.playable_roles(player)
            .iter()
            .any(|r| self.are_comparable(r.as_str(), role))
    }

    /// Types that can play `role` directly or by inheritance.
    pub fn players_of(&self, role: &str) -> Vec<Label> {
        let mut out = BTreeSet::new();
        for (player, roles) in &self.plays {
            if roles.iter().any(|r| r.as_str() == role) {
                out.extend(self.subs(player.as_str()));
            }
        }
        out.into_iter().collect()
    }

    /// Relation types relating `role`, directly or by inheritance.
    pub fn relations_relating(&self, role: &str) -> Vec<Label> {
        let mut out = BTreeSet::new();
        for (relation, roles) in &self.relates {
            if roles.iter().any(|r| r.as_str() == role) {
                out.extend(self.subs(relation.as_str()));
            }
        }
        out.into_iter().collect()
    }

    /// Attribute types `owner` can own, including inherited ones.
    pub fn owned_attributes(&self, owner: &str) -> BTreeSet<Label> {
        self.sups(owner)
            .iter()
            .filter_map(|l| self.owns.get(l))
            .flatten()
            .cloned()
            .collect()
    }
}
