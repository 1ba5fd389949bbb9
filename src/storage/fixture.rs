//! Knowledge bases described in TOML.
//!
//! A file declares types, named instances, relations and rules:
//!
//! ```toml
//! [[types]]
//! label = "person"
//! kind = "entity"
//! plays = ["located"]
//!
//! [[instances]]
//! name = "alice"
//! isa = "person"
//! has = [{ label = "name", value = "Alice" }]
//!
//! [[relations]]
//! isa = "locates"
//! players = [{ role = "located", player = "alice" }, { role = "location", player = "paris" }]
//!
//! [[rules]]
//! label = "transitive-location"
//! when = [{ atom = "relation", label = "locates", players = [...] }]
//! then = [...]
//! ```
//!
//! Types are defined in file order, so a supertype must precede its
//! subtypes. Instance names are handles for the loaded store only.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::MemoryStorage;
use crate::concept::{ConceptId, Value};
use crate::error::{FixtureError, FixtureResult, ReasonerResult};
use crate::rule::RuleDefinition;
use crate::schema::{Schema, TypeKind};

/// A schema type declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    pub label: String,
    pub kind: TypeKind,
    #[serde(default)]
    pub sup: Option<String>,
    #[serde(default)]
    pub relates: Vec<String>,
    #[serde(default)]
    pub plays: Vec<String>,
    #[serde(default)]
    pub owns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HasDef {
    pub label: String,
    pub value: Value,
}

/// A named entity instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDef {
    pub name: String,
    pub isa: String,
    #[serde(default)]
    pub has: Vec<HasDef>,
}

/// A named attribute instance, usable as a relation player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    pub isa: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePlayerDef {
    pub role: String,
    pub player: String,
}

/// A relation instance. Naming it lets later relations use it as a player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDef {
    #[serde(default)]
    pub name: Option<String>,
    pub isa: String,
    pub players: Vec<RolePlayerDef>,
    #[serde(default)]
    pub has: Vec<HasDef>,
}

/// A whole knowledge base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBaseDef {
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub instances: Vec<InstanceDef>,
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

impl KnowledgeBaseDef {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> FixtureResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| FixtureError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> FixtureResult<Self> {
        toml::from_str(content).map_err(|e| FixtureError::Parse {
            message: e.to_string(),
        })
    }

    /// Build the schema the `types` section declares.
    pub fn schema(&self) -> ReasonerResult<Schema> {
        let mut schema = Schema::new();
        for ty in &self.types {
            let sup = ty.sup.as_deref();
            match ty.kind {
                TypeKind::Entity => schema.define_entity(&ty.label, sup)?,
                TypeKind::Relation => schema.define_relation(&ty.label, sup)?,
                TypeKind::Attribute => schema.define_attribute(&ty.label, sup)?,
                TypeKind::Role => schema.define_role(&ty.label, sup)?,
                TypeKind::Thing => {
                    return Err(crate::error::SchemaError::KindMismatch {
                        label: ty.label.clone(),
                        expected: "entity, relation, attribute or role".to_string(),
                        actual: ty.kind.to_string(),
                    }
                    .into());
                }
            };
        }
        for ty in &self.types {
            for role in &ty.relates {
                schema.relates(&ty.label, role)?;
            }
            for role in &ty.plays {
                schema.plays(&ty.label, role)?;
            }
            for attribute in &ty.owns {
                schema.owns(&ty.label, attribute)?;
            }
        }
        Ok(schema)
    }
}

/// Instance handles of a loaded knowledge base.
pub type Handles = HashMap<String, ConceptId>;

impl MemoryStorage {
    /// Build a store holding everything `def` declares.
    pub fn from_definition(def: &KnowledgeBaseDef) -> ReasonerResult<(MemoryStorage, Handles)> {
        let schema = Arc::new(def.schema()?);
        let mut store = MemoryStorage::new(schema);
        let mut handles = Handles::new();

        let register = |handles: &mut Handles, name: &str, id: ConceptId| -> FixtureResult<()> {
            if handles.insert(name.to_string(), id).is_some() {
                return Err(FixtureError::DuplicateInstance {
                    name: name.to_string(),
                });
            }
            Ok(())
        };

        for instance in &def.instances {
            let id = store.insert_entity(&instance.isa)?;
            register(&mut handles, &instance.name, id)?;
            store.insert_values(id, &instance.has)?;
        }
        for attribute in &def.attributes {
            let id = store.insert_attribute(&attribute.isa, attribute.value.clone())?;
            register(&mut handles, &attribute.name, id)?;
        }
        for relation in &def.relations {
            let mut players = Vec::with_capacity(relation.players.len());
            for p in &relation.players {
                let id = handles
                    .get(&p.player)
                    .copied()
                    .ok_or_else(|| FixtureError::UnknownInstance {
                        name: p.player.clone(),
                    })?;
                players.push((p.role.as_str(), id));
            }
            let id = store.insert_relation(&relation.isa, &players)?;
            if let Some(n) = &relation.name {
                register(&mut handles, n, id)?;
            }
            store.insert_values(id, &relation.has)?;
        }
        for rule in &def.rules {
            store.add_rule(rule)?;
        }
        tracing::info!(
            instances = store.len(),
            rules = def.rules.len(),
            "loaded knowledge base"
        );
        Ok((store, handles))
    }

    /// Load a knowledge base from a TOML file.
    pub fn load(path: &Path) -> ReasonerResult<(MemoryStorage, Handles)> {
        let def = KnowledgeBaseDef::load(path)?;
        Self::from_definition(&def)
    }

    fn insert_values(&self, owner: ConceptId, has: &[HasDef]) -> ReasonerResult<()> {
        for h in has {
            let attribute = self.insert_attribute(&h.label, h.value.clone())?;
            self.insert_ownership(owner, attribute)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonerError;
    use crate::storage::Storage;

    const KB: &str = r#"
[[types]]
label = "name"
kind = "attribute"

[[types]]
label = "friend"
kind = "role"

[[types]]
label = "person"
kind = "entity"
plays = ["friend"]
owns = ["name"]

[[types]]
label = "friendship"
kind = "relation"
relates = ["friend"]

[[instances]]
name = "alice"
isa = "person"
has = [{ label = "name", value = "Alice" }]

[[instances]]
name = "bob"
isa = "person"

[[relations]]
isa = "friendship"
players = [{ role = "friend", player = "alice" }, { role = "friend", player = "bob" }]

[[rules]]
label = "friends-are-named"
when = [{ atom = "relation", label = "friendship", players = [{ role = "friend", player = "x" }, { role = "friend", player = "y" }] }]
then = [{ atom = "has", owner = "y", label = "name", value = "friend" }]
"#;

    #[test]
    fn loads_types_instances_and_rules() {
        let def = KnowledgeBaseDef::from_toml_str(KB).unwrap();
        let (store, handles) = MemoryStorage::from_definition(&def).unwrap();
        assert_eq!(handles.len(), 2);
        // alice, bob, the name and the friendship
        assert_eq!(store.len(), 4);
        assert_eq!(store.rules().len(), 1);
        assert!(store.schema().can_play("person", "friend"));
    }

    #[test]
    fn unknown_players_are_reported() {
        let mut def = KnowledgeBaseDef::from_toml_str(KB).unwrap();
        def.relations[0].players[1].player = "carol".to_string();
        let err = MemoryStorage::from_definition(&def).unwrap_err();
        assert!(matches!(
            err,
            ReasonerError::Fixture(FixtureError::UnknownInstance { .. })
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            KnowledgeBaseDef::from_toml_str("[[types]]\nlabel = 3"),
            Err(FixtureError::Parse { .. })
        ));
    }
}
