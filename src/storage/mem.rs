//! In-memory storage backed by DashMap.
//!
//! Holds instances, relations, attributes and ownerships in sharded maps so
//! one store can back several reasoning sessions, including sessions on
//! other threads. All data is lost on drop.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{InferredFact, Storage, matcher};
use crate::answer::Answer;
use crate::concept::{Concept, ConceptAllocator, ConceptId, Value};
use crate::error::{RuleError, RuleResult, StorageError, StorageResult};
use crate::query::ReasonerQuery;
use crate::rule::{InferenceRule, RuleDefinition};
use crate::schema::{Label, Schema, TypeKind};

type Players = Vec<(Label, ConceptId)>;

/// Concurrent in-memory store.
#[derive(Debug)]
pub struct MemoryStorage {
    schema: Arc<Schema>,
    allocator: ConceptAllocator,
    things: DashMap<ConceptId, Concept>,
    /// Types an instance has besides its direct type (materialized `isa`).
    extra_types: DashMap<ConceptId, BTreeSet<Label>>,
    role_players: DashMap<ConceptId, Players>,
    relation_index: DashMap<(Label, Players), ConceptId>,
    attribute_index: DashMap<(Label, Value), ConceptId>,
    /// owner → (attribute, ownership edge)
    ownerships: DashMap<ConceptId, Vec<(ConceptId, ConceptId)>>,
    /// ownership edge → (owner, attribute, inferred)
    edges: DashMap<ConceptId, (ConceptId, ConceptId, bool)>,
    rules: Vec<Arc<InferenceRule>>,
}

impl MemoryStorage {
    /// Create an empty store over `schema`. Instance ids start after the
    /// schema's own ids.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            allocator: ConceptAllocator::starting_from(schema.next_free_id()),
            schema,
            things: DashMap::new(),
            extra_types: DashMap::new(),
            role_players: DashMap::new(),
            relation_index: DashMap::new(),
            attribute_index: DashMap::new(),
            ownerships: DashMap::new(),
            edges: DashMap::new(),
            rules: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Insertion
    // -----------------------------------------------------------------------

    fn expect_kind(&self, label: &str, kind: TypeKind) -> StorageResult<Label> {
        match self.schema.get(label) {
            Some(ty) if ty.kind == kind => Ok(ty.label.clone()),
            _ => Err(StorageError::InvalidInstance {
                label: label.to_string(),
                kind: kind.to_string(),
            }),
        }
    }

    fn expect_thing(&self, id: ConceptId) -> StorageResult<()> {
        if self.things.contains_key(&id) {
            Ok(())
        } else {
            Err(StorageError::UnknownConcept { id: id.get() })
        }
    }

    fn allocate(&self) -> StorageResult<ConceptId> {
        self.allocator.next_id().map_err(|e| StorageError::Backend {
            message: e.to_string(),
        })
    }

    /// Insert an entity of type `label`.
    pub fn insert_entity(&self, label: &str) -> StorageResult<ConceptId> {
        let label = self.expect_kind(label, TypeKind::Entity)?;
        let id = self.allocate()?;
        self.things.insert(id, Concept::thing(id, label));
        Ok(id)
    }

    /// Insert an attribute of type `label`. Attributes are unique by type and
    /// value; inserting an existing one returns its id.
    pub fn insert_attribute(&self, label: &str, value: impl Into<Value>) -> StorageResult<ConceptId> {
        let label = self.expect_kind(label, TypeKind::Attribute)?;
        self.put_attribute(None, label, value.into(), false)
            .map(|(id, _)| id)
    }

    fn put_attribute(
        &self,
        id: Option<ConceptId>,
        label: Label,
        value: Value,
        inferred: bool,
    ) -> StorageResult<(ConceptId, bool)> {
        match self.attribute_index.entry((label.clone(), value.clone())) {
            Entry::Occupied(existing) => Ok((*existing.get(), false)),
            Entry::Vacant(slot) => {
                let id = match id {
                    Some(id) => id,
                    None => self.allocate()?,
                };
                let mut concept = Concept::thing(id, label).with_value(value);
                concept.inferred = inferred;
                self.things.insert(id, concept);
                slot.insert(id);
                Ok((id, true))
            }
        }
    }

    /// Insert a relation of type `label` with `(role, player)` pairs.
    /// Relations are unique by type and role players; inserting an existing
    /// one returns its id.
    pub fn insert_relation(&self, label: &str, players: &[(&str, ConceptId)]) -> StorageResult<ConceptId> {
        let label = self.expect_kind(label, TypeKind::Relation)?;
        let mut resolved = Vec::with_capacity(players.len());
        for (role, player) in players {
            let role = self.expect_kind(role, TypeKind::Role)?;
            if !self.schema.relation_relates(label.as_str(), role.as_str()) {
                return Err(StorageError::InvalidInstance {
                    label: label.to_string(),
                    kind: format!("relation without role {role}"),
                });
            }
            resolved.push((role, *player));
        }
        self.put_relation(None, label, resolved, false)
            .map(|(id, _)| id)
    }

    fn put_relation(
        &self,
        id: Option<ConceptId>,
        label: Label,
        mut players: Players,
        inferred: bool,
    ) -> StorageResult<(ConceptId, bool)> {
        for (_, player) in &players {
            self.expect_thing(*player)?;
        }
        players.sort();
        match self.relation_index.entry((label.clone(), players.clone())) {
            Entry::Occupied(existing) => Ok((*existing.get(), false)),
            Entry::Vacant(slot) => {
                let id = match id {
                    Some(id) => id,
                    None => self.allocate()?,
                };
                let mut concept = Concept::thing(id, label);
                concept.inferred = inferred;
                self.things.insert(id, concept);
                self.role_players.insert(id, players);
                slot.insert(id);
                Ok((id, true))
            }
        }
    }

    /// Record that `owner` owns `attribute`. Returns the ownership edge.
    pub fn insert_ownership(&self, owner: ConceptId, attribute: ConceptId) -> StorageResult<ConceptId> {
        self.put_ownership(owner, attribute, false).map(|(edge, _)| edge)
    }

    fn put_ownership(
        &self,
        owner: ConceptId,
        attribute: ConceptId,
        inferred: bool,
    ) -> StorageResult<(ConceptId, bool)> {
        self.expect_thing(owner)?;
        let is_attribute = self
            .things
            .get(&attribute)
            .is_some_and(|c| c.value.is_some());
        if !is_attribute {
            return Err(StorageError::UnknownConcept { id: attribute.get() });
        }
        let mut owned = self.ownerships.entry(owner).or_default();
        if let Some((_, edge)) = owned.iter().find(|(a, _)| *a == attribute) {
            return Ok((*edge, false));
        }
        let edge = self.allocate()?;
        owned.push((attribute, edge));
        self.edges.insert(edge, (owner, attribute, inferred));
        Ok((edge, true))
    }

    /// Compile and add a rule.
    pub fn add_rule(&mut self, definition: &RuleDefinition) -> RuleResult<Arc<InferenceRule>> {
        if self
            .rules
            .iter()
            .any(|r| r.label().as_str() == definition.label)
        {
            return Err(RuleError::Duplicate {
                label: definition.label.clone(),
            });
        }
        let rule = Arc::new(definition.compile(&self.schema)?);
        self.rules.push(rule.clone());
        Ok(rule)
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn schema_ref(&self) -> &Schema {
        &self.schema
    }

    /// Number of stored instances (ownership edges excluded).
    pub fn len(&self) -> usize {
        self.things.len()
    }

    pub fn is_empty(&self) -> bool {
        self.things.is_empty()
    }

    /// Number of stored instances and ownerships flagged as inferred.
    pub fn inferred_count(&self) -> usize {
        self.things.iter().filter(|c| c.inferred).count()
            + self.edges.iter().filter(|e| e.value().2).count()
    }

    /// Ids of every stored instance.
    pub fn instance_ids(&self) -> Vec<ConceptId> {
        let mut ids: Vec<ConceptId> = self.things.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub(super) fn relation_ids(&self) -> Vec<ConceptId> {
        let mut ids: Vec<ConceptId> = self.role_players.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub(super) fn owner_ids(&self) -> Vec<ConceptId> {
        let mut ids: Vec<ConceptId> = self.ownerships.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Type and role players of a stored relation.
    pub(super) fn relation(&self, id: ConceptId) -> Option<(Label, Players)> {
        let players = self.role_players.get(&id)?.clone();
        let label = self.things.get(&id)?.label.clone();
        Some((label, players))
    }

    /// `(attribute, edge)` pairs owned by `owner`.
    pub(super) fn owned(&self, owner: ConceptId) -> Vec<(ConceptId, ConceptId)> {
        self.ownerships
            .get(&owner)
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    /// Direct and materialized types of an instance; empty for unknown ids.
    pub fn types_of(&self, id: ConceptId) -> Vec<Label> {
        let Some(concept) = self.things.get(&id) else {
            return Vec::new();
        };
        let mut types = vec![concept.label.clone()];
        if let Some(extra) = self.extra_types.get(&id) {
            types.extend(extra.iter().cloned());
        }
        types
    }
}

impl Storage for MemoryStorage {
    fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    fn execute(&self, query: &ReasonerQuery) -> StorageResult<Vec<Answer>> {
        Ok(matcher::execute(self, query))
    }

    fn concept(&self, id: ConceptId) -> Option<Concept> {
        if let Some(concept) = self.things.get(&id) {
            return Some(concept.clone());
        }
        if let Some(edge) = self.edges.get(&id) {
            let (_, attribute, inferred) = *edge;
            let label = self.things.get(&attribute)?.label.clone();
            let mut concept = Concept::thing(id, label);
            concept.inferred = inferred;
            return Some(concept);
        }
        self.schema.concept(id)
    }

    fn find_relation(&self, label: &Label, players: &[(Label, ConceptId)]) -> Option<ConceptId> {
        let mut key = players.to_vec();
        key.sort();
        self.relation_index
            .get(&(label.clone(), key))
            .map(|id| *id)
    }

    fn find_attribute(&self, label: &Label, value: &Value) -> Option<ConceptId> {
        self.attribute_index
            .get(&(label.clone(), value.clone()))
            .map(|id| *id)
    }

    fn find_ownership(&self, owner: ConceptId, attribute: ConceptId) -> bool {
        self.ownerships
            .get(&owner)
            .is_some_and(|owned| owned.iter().any(|(a, _)| *a == attribute))
    }

    fn allocate_id(&self) -> StorageResult<ConceptId> {
        self.allocate()
    }

    fn materialize(&self, fact: &InferredFact) -> StorageResult<bool> {
        match fact {
            InferredFact::Isa { instance, label } => {
                self.expect_thing(*instance)?;
                let has_type = self
                    .types_of(*instance)
                    .iter()
                    .any(|t| self.schema.is_subtype(t.as_str(), label.as_str()));
                if has_type {
                    return Ok(false);
                }
                Ok(self
                    .extra_types
                    .entry(*instance)
                    .or_default()
                    .insert(label.clone()))
            }
            InferredFact::Relation { id, label, players } => self
                .put_relation(Some(*id), label.clone(), players.clone(), true)
                .map(|(_, created)| created),
            InferredFact::Attribute { id, label, value } => self
                .put_attribute(Some(*id), label.clone(), value.clone(), true)
                .map(|(_, created)| created),
            InferredFact::Ownership { owner, attribute } => self
                .put_ownership(*owner, *attribute, true)
                .map(|(_, created)| created),
        }
    }

    fn rules(&self) -> Vec<Arc<InferenceRule>> {
        self.rules.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Pattern;

    fn schema() -> Arc<Schema> {
        let mut s = Schema::new();
        s.define_entity("person", None).unwrap();
        s.define_attribute("name", None).unwrap();
        s.define_role("friend", None).unwrap();
        s.define_relation("friendship", None).unwrap();
        s.relates("friendship", "friend").unwrap();
        s.plays("person", "friend").unwrap();
        s.owns("person", "name").unwrap();
        Arc::new(s)
    }

    #[test]
    fn instance_ids_start_after_schema_ids() {
        let s = schema();
        let store = MemoryStorage::new(s.clone());
        let id = store.insert_entity("person").unwrap();
        assert!(id.get() >= s.next_free_id());
        assert!(store.concept(id).is_some_and(|c| !c.is_type()));
        assert!(store.concept(s.id_of("person").unwrap()).is_some_and(|c| c.is_type()));
    }

    #[test]
    fn instances_are_type_checked() {
        let store = MemoryStorage::new(schema());
        assert!(matches!(
            store.insert_entity("name"),
            Err(StorageError::InvalidInstance { .. })
        ));
        let alice = store.insert_entity("person").unwrap();
        assert!(matches!(
            store.insert_relation("friendship", &[("name", alice)]),
            Err(StorageError::InvalidInstance { .. })
        ));
    }

    #[test]
    fn attributes_and_relations_are_deduplicated() {
        let store = MemoryStorage::new(schema());
        let a = store.insert_attribute("name", "Alice").unwrap();
        assert_eq!(store.insert_attribute("name", "Alice").unwrap(), a);
        let x = store.insert_entity("person").unwrap();
        let y = store.insert_entity("person").unwrap();
        let r = store
            .insert_relation("friendship", &[("friend", x), ("friend", y)])
            .unwrap();
        assert_eq!(
            store
                .insert_relation("friendship", &[("friend", y), ("friend", x)])
                .unwrap(),
            r
        );
        let key = [(Label::new("friend"), y), (Label::new("friend"), x)];
        assert_eq!(store.find_relation(&Label::new("friendship"), &key), Some(r));
    }

    #[test]
    fn materialization_is_idempotent() {
        let store = MemoryStorage::new(schema());
        let x = store.insert_entity("person").unwrap();
        let name = store.allocate_id().unwrap();
        let fact = InferredFact::Attribute {
            id: name,
            label: Label::new("name"),
            value: Value::from("Bob"),
        };
        assert!(store.materialize(&fact).unwrap());
        assert!(!store.materialize(&fact).unwrap());
        let owns = InferredFact::Ownership {
            owner: x,
            attribute: name,
        };
        assert!(store.materialize(&owns).unwrap());
        assert!(!store.materialize(&owns).unwrap());
        assert_eq!(store.inferred_count(), 2);
        assert!(store.concept(name).is_some_and(|c| c.inferred));
    }

    #[test]
    fn duplicate_rule_labels_are_rejected() {
        let mut store = MemoryStorage::new(schema());
        let def = RuleDefinition::new(
            "everyone-is-named",
            Pattern::new().isa("x", "person"),
            Pattern::new().has_value("x", "name", "someone"),
        );
        store.add_rule(&def).unwrap();
        assert!(matches!(store.add_rule(&def), Err(RuleError::Duplicate { .. })));
        assert_eq!(store.rules().len(), 1);
    }
}
