//! Typed pattern builder.
//!
//! A [`Pattern`] is an unvalidated list of statements. It is what callers
//! (and knowledge-base fixtures, through serde) use to describe queries and
//! rules; [`ReasonerQuery::new`](super::ReasonerQuery::new) validates it
//! against a schema and turns it into atoms.
//!
//! ```
//! use akh_reasoner::query::{Pattern, Rel};
//!
//! let pattern = Pattern::new()
//!     .isa("x", "person")
//!     .relation(Rel::new().isa("marriage").player("spouse", "x").player("spouse", "y"))
//!     .has_value("y", "name", "Alice");
//! assert_eq!(pattern.len(), 3);
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::atom::{
    Atom, AttributeAtom, Comparison, IsaAtom, Operand, PlaysAtom, Predicate, RelatesAtom,
    RelationAtom, RolePlayer, SubAtom,
};
use crate::concept::{ConceptId, Value};
use crate::error::{QueryError, QueryResult};
use crate::schema::Label;
use crate::var::{VarGenerator, Variable};

/// One role player of a relation statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_var: Option<String>,
    pub player: String,
}

/// A single pattern statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "atom", rename_all = "snake_case")]
pub enum Statement {
    Isa {
        var: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        type_var: Option<String>,
    },
    Relation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        var: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        type_var: Option<String>,
        players: Vec<PlayerDef>,
    },
    Has {
        owner: String,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attribute: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        via: Option<String>,
    },
    Sub {
        var: String,
        label: String,
    },
    Plays {
        var: String,
        role: String,
    },
    Relates {
        var: String,
        role: String,
    },
    Id {
        var: String,
        id: ConceptId,
    },
    Compare {
        var: String,
        op: Comparison,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        other: Option<String>,
    },
    Neq {
        left: String,
        right: String,
    },
}

/// Relation statement builder.
#[derive(Debug, Clone, Default)]
pub struct Rel {
    var: Option<String>,
    label: Option<String>,
    type_var: Option<String>,
    players: Vec<PlayerDef>,
}

impl Rel {
    /// A relation whose instance variable is anonymous.
    pub fn new() -> Self {
        Self::default()
    }

    /// A relation bound to `$var`.
    pub fn var(var: &str) -> Self {
        Self {
            var: Some(var.to_string()),
            ..Self::default()
        }
    }

    pub fn isa(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn type_var(mut self, var: &str) -> Self {
        self.type_var = Some(var.to_string());
        self
    }

    /// `role: $player`.
    pub fn player(mut self, role: &str, player: &str) -> Self {
        self.players.push(PlayerDef {
            role: Some(role.to_string()),
            role_var: None,
            player: player.to_string(),
        });
        self
    }

    /// `$player` with the role left open.
    pub fn player_any(mut self, player: &str) -> Self {
        self.players.push(PlayerDef {
            role: None,
            role_var: None,
            player: player.to_string(),
        });
        self
    }

    /// `$role_var: $player`, optionally restricted to `role`.
    pub fn player_with_role_var(mut self, role: Option<&str>, role_var: &str, player: &str) -> Self {
        self.players.push(PlayerDef {
            role: role.map(str::to_string),
            role_var: Some(role_var.to_string()),
            player: player.to_string(),
        });
        self
    }
}

/// An unvalidated conjunction of statements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pattern {
    statements: Vec<Statement>,
}

impl Pattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn push(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    /// Conjunction of both patterns.
    pub fn and(mut self, other: Pattern) -> Self {
        self.statements.extend(other.statements);
        self
    }

    /// `$var isa label`.
    pub fn isa(self, var: &str, label: &str) -> Self {
        self.push(Statement::Isa {
            var: var.to_string(),
            label: Some(label.to_string()),
            type_var: None,
        })
    }

    /// `$var isa $type_var`.
    pub fn isa_var(self, var: &str, type_var: &str) -> Self {
        self.push(Statement::Isa {
            var: var.to_string(),
            label: None,
            type_var: Some(type_var.to_string()),
        })
    }

    pub fn relation(self, rel: Rel) -> Self {
        self.push(Statement::Relation {
            var: rel.var,
            label: rel.label,
            type_var: rel.type_var,
            players: rel.players,
        })
    }

    /// `$owner has label $attribute`.
    pub fn has(self, owner: &str, label: &str, attribute: &str) -> Self {
        self.push(Statement::Has {
            owner: owner.to_string(),
            label: label.to_string(),
            attribute: Some(attribute.to_string()),
            value: None,
            via: None,
        })
    }

    /// `$owner has label <value>`.
    pub fn has_value(self, owner: &str, label: &str, value: impl Into<Value>) -> Self {
        self.push(Statement::Has {
            owner: owner.to_string(),
            label: label.to_string(),
            attribute: None,
            value: Some(value.into()),
            via: None,
        })
    }

    /// `$owner has label $attribute via $edge`.
    pub fn has_via(self, owner: &str, label: &str, attribute: &str, via: &str) -> Self {
        self.push(Statement::Has {
            owner: owner.to_string(),
            label: label.to_string(),
            attribute: Some(attribute.to_string()),
            value: None,
            via: Some(via.to_string()),
        })
    }

    pub fn sub(self, var: &str, label: &str) -> Self {
        self.push(Statement::Sub {
            var: var.to_string(),
            label: label.to_string(),
        })
    }

    pub fn plays(self, var: &str, role: &str) -> Self {
        self.push(Statement::Plays {
            var: var.to_string(),
            role: role.to_string(),
        })
    }

    pub fn relates(self, var: &str, role: &str) -> Self {
        self.push(Statement::Relates {
            var: var.to_string(),
            role: role.to_string(),
        })
    }

    /// `$var id <id>`.
    pub fn id(self, var: &str, id: ConceptId) -> Self {
        self.push(Statement::Id {
            var: var.to_string(),
            id,
        })
    }

    /// `$var == <value>`.
    pub fn value(self, var: &str, value: impl Into<Value>) -> Self {
        self.compare(var, Comparison::Eq, value)
    }

    /// `$var <op> <value>`.
    pub fn compare(self, var: &str, op: Comparison, value: impl Into<Value>) -> Self {
        self.push(Statement::Compare {
            var: var.to_string(),
            op,
            value: Some(value.into()),
            other: None,
        })
    }

    /// `$var <op> $other`.
    pub fn compare_vars(self, var: &str, op: Comparison, other: &str) -> Self {
        self.push(Statement::Compare {
            var: var.to_string(),
            op,
            value: None,
            other: Some(other.to_string()),
        })
    }

    /// `$left != $right` (different concepts).
    pub fn neq(self, left: &str, right: &str) -> Self {
        self.push(Statement::Neq {
            left: left.to_string(),
            right: right.to_string(),
        })
    }

    /// Names of every variable the caller wrote.
    pub fn variable_names(&self) -> BTreeSet<Variable> {
        let mut names = BTreeSet::new();
        for statement in &self.statements {
            let mut add = |name: &str| {
                names.insert(Variable::new(name));
            };
            match statement {
                Statement::Isa { var, type_var, .. } => {
                    add(var);
                    type_var.as_deref().map(&mut add);
                }
                Statement::Relation {
                    var,
                    type_var,
                    players,
                    ..
                } => {
                    var.as_deref().map(&mut add);
                    type_var.as_deref().map(&mut add);
                    for p in players {
                        add(&p.player);
                        p.role_var.as_deref().map(&mut add);
                    }
                }
                Statement::Has {
                    owner,
                    attribute,
                    via,
                    ..
                } => {
                    add(owner);
                    attribute.as_deref().map(&mut add);
                    via.as_deref().map(&mut add);
                }
                Statement::Sub { var, .. }
                | Statement::Plays { var, .. }
                | Statement::Relates { var, .. }
                | Statement::Id { var, .. } => add(var),
                Statement::Compare { var, other, .. } => {
                    add(var);
                    other.as_deref().map(&mut add);
                }
                Statement::Neq { left, right } => {
                    add(left);
                    add(right);
                }
            }
        }
        names
    }

    /// Translate into atoms, minting anonymous variables from `vars`.
    pub(crate) fn to_atoms(&self, vars: &mut VarGenerator) -> QueryResult<Vec<Atom>> {
        let taken = self.variable_names();
        let mut fresh = || vars.fresh(|v| taken.contains(v));
        let mut atoms = Vec::new();
        for statement in &self.statements {
            match statement {
                Statement::Isa {
                    var,
                    label,
                    type_var,
                } => atoms.push(Atom::Isa(IsaAtom {
                    var: Variable::new(var),
                    type_var: type_var.as_deref().map(Variable::new),
                    label: label.as_deref().map(Label::new),
                })),
                Statement::Relation {
                    var,
                    label,
                    type_var,
                    players,
                } => {
                    if players.is_empty() {
                        return Err(QueryError::Malformed {
                            message: "a relation needs at least one role player".into(),
                        });
                    }
                    let var = var.as_deref().map(Variable::new).unwrap_or_else(&mut fresh);
                    let role_players = players
                        .iter()
                        .map(|p| {
                            RolePlayer::new(
                                p.role.as_deref().map(Label::new),
                                p.role_var.as_deref().map(Variable::new),
                                Variable::new(&p.player),
                            )
                        })
                        .collect();
                    atoms.push(Atom::Relation(RelationAtom::new(
                        var,
                        type_var.as_deref().map(Variable::new),
                        label.as_deref().map(Label::new),
                        role_players,
                    )));
                }
                Statement::Has {
                    owner,
                    label,
                    attribute,
                    value,
                    via,
                } => {
                    let attribute = match (attribute, value) {
                        (Some(a), _) => Variable::new(a),
                        (None, Some(_)) => fresh(),
                        (None, None) => {
                            return Err(QueryError::Malformed {
                                message: format!(
                                    "`has {label}` on ${owner} needs an attribute variable or a value"
                                ),
                            });
                        }
                    };
                    atoms.push(Atom::Attribute(AttributeAtom {
                        owner: Variable::new(owner),
                        attribute: attribute.clone(),
                        relation_var: via.as_deref().map(Variable::new),
                        label: Label::new(label),
                    }));
                    if let Some(value) = value {
                        atoms.push(Atom::Predicate(Predicate::Value {
                            var: attribute,
                            comparison: Comparison::Eq,
                            operand: Operand::Const(value.clone()),
                        }));
                    }
                }
                Statement::Sub { var, label } => atoms.push(Atom::Sub(SubAtom {
                    var: Variable::new(var),
                    label: Label::new(label),
                })),
                Statement::Plays { var, role } => atoms.push(Atom::Plays(PlaysAtom {
                    var: Variable::new(var),
                    role: Label::new(role),
                })),
                Statement::Relates { var, role } => atoms.push(Atom::Relates(RelatesAtom {
                    var: Variable::new(var),
                    role: Label::new(role),
                })),
                Statement::Id { var, id } => atoms.push(Atom::Predicate(Predicate::Id {
                    var: Variable::new(var),
                    id: *id,
                })),
                Statement::Compare {
                    var,
                    op,
                    value,
                    other,
                } => {
                    let operand = match (value, other) {
                        (Some(v), None) => Operand::Const(v.clone()),
                        (None, Some(o)) => Operand::Var(Variable::new(o)),
                        _ => {
                            return Err(QueryError::Malformed {
                                message: format!(
                                    "comparison on ${var} needs exactly one of `value` or `other`"
                                ),
                            });
                        }
                    };
                    atoms.push(Atom::Predicate(Predicate::Value {
                        var: Variable::new(var),
                        comparison: *op,
                        operand,
                    }));
                }
                Statement::Neq { left, right } => atoms.push(Atom::Predicate(Predicate::Neq {
                    left: Variable::new(left),
                    right: Variable::new(right),
                })),
            }
        }
        Ok(atoms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_variable_names() {
        let pattern = Pattern::new()
            .relation(Rel::var("r").isa("marriage").player("spouse", "x").player_any("y"))
            .has("x", "name", "n")
            .neq("x", "y");
        let names: Vec<String> = pattern
            .variable_names()
            .iter()
            .map(|v| v.name().to_string())
            .collect();
        assert_eq!(names, vec!["n", "r", "x", "y"]);
    }

    #[test]
    fn anonymous_slots_get_fresh_variables() {
        let pattern = Pattern::new()
            .relation(Rel::new().isa("marriage").player("spouse", "_0"))
            .has_value("_0", "name", "Bob");
        let atoms = pattern.to_atoms(&mut VarGenerator::anonymous()).unwrap();
        assert_eq!(atoms.len(), 3);
        let rel_var = atoms[0].var().unwrap();
        assert!(!rel_var.is_user_defined());
        assert_ne!(rel_var.name(), "_0");
    }

    #[test]
    fn statements_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            when: Pattern,
        }
        let doc: Doc = toml::from_str(
            r#"
            [[when]]
            atom = "relation"
            label = "located-in"
            players = [{ role = "located", player = "x" }, { role = "location", player = "y" }]

            [[when]]
            atom = "has"
            owner = "y"
            label = "name"
            value = "Poland"
            "#,
        )
        .unwrap();
        assert_eq!(doc.when.len(), 2);
        assert!(matches!(
            &doc.when.statements()[1],
            Statement::Has { value: Some(Value::String(v)), .. } if v == "Poland"
        ));
    }

    #[test]
    fn malformed_comparison_is_rejected() {
        let pattern = Pattern::new().push(Statement::Compare {
            var: "x".into(),
            op: Comparison::Gt,
            value: None,
            other: None,
        });
        assert!(matches!(
            pattern.to_atoms(&mut VarGenerator::anonymous()),
            Err(QueryError::Malformed { .. })
        ));
    }
}
