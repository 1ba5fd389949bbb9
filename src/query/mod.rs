//! Reasoner queries: validated conjunctions of atoms.
//!
//! A [`ReasonerQuery`] is built from a [`Pattern`] and a [`Schema`]. Building
//! validates labels, infers relation types and roles, and indexes the
//! predicates per variable so unification can consult them. Queries are
//! immutable; substitution and renaming produce new queries.

pub mod atomic;
pub mod pattern;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

pub use atomic::ReasonerAtomicQuery;
pub use pattern::{Pattern, PlayerDef, Rel, Statement};

use crate::answer::Answer;
use crate::atom::{Atom, Operand, Predicate, VarPredicates};
use crate::concept::{ConceptId, Value};
use crate::equivalence::Equivalence;
use crate::error::{QueryError, QueryResult};
use crate::schema::{Label, Schema, TypeKind};
use crate::unifier::{MultiUnifier, Unifier, UnifierType, query_multi_unifier};
use crate::var::{VarGenerator, Variable};

/// A validated conjunction of atoms.
#[derive(Debug, Clone)]
pub struct ReasonerQuery {
    atoms: Vec<Atom>,
    preds: VarPredicates,
    schema: Arc<Schema>,
}

impl ReasonerQuery {
    /// Validate `pattern` against `schema`.
    pub fn new(pattern: &Pattern, schema: &Arc<Schema>) -> QueryResult<Self> {
        Self::from_pattern_with(pattern, schema, &mut VarGenerator::anonymous())
    }

    /// As [`ReasonerQuery::new`], minting anonymous variables from `vars`.
    pub(crate) fn from_pattern_with(
        pattern: &Pattern,
        schema: &Arc<Schema>,
        vars: &mut VarGenerator,
    ) -> QueryResult<Self> {
        let atoms = pattern.to_atoms(vars)?;
        Self::from_atoms(atoms, schema.clone())
    }

    /// Validate atoms and run type and role inference.
    pub(crate) fn from_atoms(atoms: Vec<Atom>, schema: Arc<Schema>) -> QueryResult<Self> {
        Self::from_atoms_in_context(atoms, schema, &HashMap::new())
    }

    /// As [`ReasonerQuery::from_atoms`], with extra variable types known from
    /// an enclosing pattern (a rule body, for its head).
    pub(crate) fn from_atoms_in_context(
        mut atoms: Vec<Atom>,
        schema: Arc<Schema>,
        context: &HashMap<Variable, Vec<Label>>,
    ) -> QueryResult<Self> {
        if atoms.is_empty() {
            return Err(QueryError::Empty);
        }
        for atom in &atoms {
            validate_atom(atom, &schema)?;
        }
        let mut known = context.clone();
        for (var, labels) in known_types_of(&atoms) {
            let entry = known.entry(var).or_default();
            for label in labels {
                if !entry.contains(&label) {
                    entry.push(label);
                }
            }
        }
        for atom in &mut atoms {
            if let Atom::Relation(rel) = atom {
                rel.infer_type(&schema);
                rel.infer_roles(&schema, &known);
            }
        }
        Ok(Self::assemble(atoms, schema))
    }

    /// Build without validation. Atoms are deduplicated in order.
    pub(crate) fn assemble(atoms: Vec<Atom>, schema: Arc<Schema>) -> Self {
        let mut unique: Vec<Atom> = Vec::with_capacity(atoms.len());
        for atom in atoms {
            if !unique.contains(&atom) {
                unique.push(atom);
            }
        }
        let preds = VarPredicates::new(unique.iter().filter_map(Atom::as_predicate));
        Self {
            atoms: unique,
            preds,
            schema,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// Atoms that can be resolved on their own.
    pub fn selectable_atoms(&self) -> Vec<&Atom> {
        self.atoms.iter().filter(|a| a.is_selectable()).collect()
    }

    pub fn predicates(&self) -> Vec<&Predicate> {
        self.atoms.iter().filter_map(Atom::as_predicate).collect()
    }

    /// Single-variable predicates, indexed by variable.
    pub fn var_predicates(&self) -> &VarPredicates {
        &self.preds
    }

    /// Single-variable predicates on `var`.
    pub fn predicates_on(&self, var: &Variable) -> &[Predicate] {
        self.preds.on(var)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_arc(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        self.atoms.iter().flat_map(Atom::variables).collect()
    }

    /// Variables the caller named, as opposed to anonymous ones.
    pub fn user_variables(&self) -> BTreeSet<Variable> {
        self.variables()
            .into_iter()
            .filter(Variable::is_user_defined)
            .collect()
    }

    /// Types each variable is declared to have by the query itself.
    pub fn known_types(&self) -> HashMap<Variable, Vec<Label>> {
        known_types_of(&self.atoms)
    }

    /// Predicates whose variables all occur in `atom`.
    pub fn predicates_of(&self, atom: &Atom) -> Vec<Predicate> {
        let vars = atom.variables();
        self.predicates()
            .into_iter()
            .filter(|p| p.variables().iter().all(|v| vars.contains(v)))
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Substitutions
    // -----------------------------------------------------------------------

    /// The id bindings the query carries, as an answer.
    pub fn substitution(&self) -> Answer {
        Answer::from_pairs(self.predicates().into_iter().filter_map(|p| match p {
            Predicate::Id { var, id } => Some((var.clone(), *id)),
            _ => None,
        }))
    }

    /// Pin the query's variables to the bindings of `answer`. Bindings of
    /// variables the query does not mention are ignored.
    pub fn with_substitution(&self, answer: &Answer) -> ReasonerQuery {
        let vars = self.variables();
        let mut atoms = self.atoms.clone();
        for (var, id) in answer.iter() {
            if vars.contains(var) && self.preds.id_of(var) != Some(id) {
                atoms.push(Atom::Predicate(Predicate::Id {
                    var: var.clone(),
                    id,
                }));
            }
        }
        Self::assemble(atoms, self.schema.clone())
    }

    /// The query without its id bindings.
    pub fn without_ids(&self) -> ReasonerQuery {
        let atoms = self
            .atoms
            .iter()
            .filter(|a| !matches!(a, Atom::Predicate(Predicate::Id { .. })))
            .cloned()
            .collect();
        Self::assemble(atoms, self.schema.clone())
    }

    /// The query with every bound id replaced by one placeholder, so queries
    /// that differ only in which concepts they are pinned to compare equal.
    pub fn structural_form(&self) -> ReasonerQuery {
        let atoms = self
            .atoms
            .iter()
            .map(|a| match a {
                Atom::Predicate(Predicate::Id { var, .. }) => Atom::Predicate(Predicate::Id {
                    var: var.clone(),
                    id: ConceptId::placeholder(),
                }),
                other => other.clone(),
            })
            .collect();
        Self::assemble(atoms, self.schema.clone())
    }

    /// Whether every variable is pinned to a concept.
    pub fn is_ground(&self) -> bool {
        self.variables()
            .iter()
            .all(|v| self.preds.id_of(v).is_some())
    }

    /// Rename variables through `unifier`; unmapped variables stay.
    pub fn rename(&self, unifier: &Unifier) -> ReasonerQuery {
        let atoms = self
            .atoms
            .iter()
            .map(|a| a.map_vars(&|v| unifier.rename(v)))
            .collect();
        Self::assemble(atoms, self.schema.clone())
    }

    // -----------------------------------------------------------------------
    // Unification and equivalence
    // -----------------------------------------------------------------------

    /// Unifiers mapping this query (the child) onto `parent`.
    pub fn multi_unifier(&self, parent: &ReasonerQuery, ty: UnifierType) -> MultiUnifier {
        query_multi_unifier(self, parent, ty)
    }

    pub fn is_alpha_equivalent(&self, other: &ReasonerQuery) -> bool {
        Equivalence::Alpha.equivalent(self, other)
    }

    pub fn alpha_equivalence_hash(&self) -> u64 {
        Equivalence::Alpha.hash(self)
    }

    pub fn is_structurally_equivalent(&self, other: &ReasonerQuery) -> bool {
        Equivalence::Structural.equivalent(self, other)
    }

    pub fn structural_equivalence_hash(&self) -> u64 {
        Equivalence::Structural.hash(self)
    }

    // -----------------------------------------------------------------------
    // Shape
    // -----------------------------------------------------------------------

    /// Selectable atoms grouped into components linked by shared variables.
    pub fn components(&self) -> Vec<Vec<&Atom>> {
        let atoms = self.selectable_atoms();
        let vars: Vec<Vec<Variable>> = atoms.iter().map(|a| a.variables()).collect();
        let mut component = vec![usize::MAX; atoms.len()];
        let mut groups = Vec::new();
        for start in 0..atoms.len() {
            if component[start] != usize::MAX {
                continue;
            }
            let group_id = groups.len();
            let mut group = Vec::new();
            let mut frontier = vec![start];
            component[start] = group_id;
            while let Some(i) = frontier.pop() {
                group.push(atoms[i]);
                for j in 0..atoms.len() {
                    if component[j] == usize::MAX && vars[i].iter().any(|v| vars[j].contains(v)) {
                        component[j] = group_id;
                        frontier.push(j);
                    }
                }
            }
            groups.push(group);
        }
        groups
    }

    pub fn is_connected(&self) -> bool {
        self.components().len() <= 1
    }

    /// Whether a relation atom has a player whose declared type cannot play
    /// its role. Such a query has no answers.
    pub fn is_type_incompatible(&self) -> bool {
        let known = self.known_types();
        self.atoms.iter().any(|a| match a {
            Atom::Relation(rel) => rel.is_type_incompatible(&self.schema, &known),
            _ => false,
        })
    }

    /// Whether `answer` satisfies every predicate whose variables it binds.
    /// `value_of` resolves attribute values.
    pub fn satisfies(&self, answer: &Answer, value_of: &dyn Fn(ConceptId) -> Option<Value>) -> bool {
        self.predicates()
            .into_iter()
            .all(|p| predicate_holds(p, answer, value_of))
    }
}

/// Evaluate `predicate` on `answer`. Predicates over unbound variables hold
/// vacuously; value comparisons on concepts without a value fail.
pub(crate) fn predicate_holds(
    predicate: &Predicate,
    answer: &Answer,
    value_of: &dyn Fn(ConceptId) -> Option<Value>,
) -> bool {
    match predicate {
        Predicate::Id { var, id } => answer.get(var).is_none_or(|bound| bound == *id),
        Predicate::Value {
            var,
            comparison,
            operand,
        } => {
            let Some(bound) = answer.get(var) else {
                return true;
            };
            let Some(left) = value_of(bound) else {
                return false;
            };
            match operand {
                Operand::Const(right) => comparison.test(&left, right),
                Operand::Var(other) => match answer.get(other) {
                    None => true,
                    Some(o) => value_of(o).is_some_and(|right| comparison.test(&left, &right)),
                },
            }
        }
        Predicate::Neq { left, right } => match (answer.get(left), answer.get(right)) {
            (Some(a), Some(b)) => a != b,
            _ => true,
        },
    }
}

fn validate_atom(atom: &Atom, schema: &Schema) -> QueryResult<()> {
    let expect = |label: &Label, kind: Option<TypeKind>| -> QueryResult<()> {
        let Some(actual) = schema.kind(label.as_str()) else {
            return Err(QueryError::UnknownType {
                label: label.to_string(),
            });
        };
        match kind {
            Some(TypeKind::Attribute) if actual != TypeKind::Attribute => {
                Err(QueryError::NotAnAttributeType {
                    label: label.to_string(),
                })
            }
            Some(TypeKind::Role) if actual != TypeKind::Role => Err(QueryError::NotARole {
                label: label.to_string(),
            }),
            _ => Ok(()),
        }
    };
    match atom {
        Atom::Isa(a) => a.label.as_ref().map_or(Ok(()), |l| expect(l, None)),
        Atom::Relation(r) => r.validate(schema),
        Atom::Attribute(a) => expect(&a.label, Some(TypeKind::Attribute)),
        Atom::Sub(a) => expect(&a.label, None),
        Atom::Plays(a) => expect(&a.role, Some(TypeKind::Role)),
        Atom::Relates(a) => expect(&a.role, Some(TypeKind::Role)),
        Atom::Predicate(_) => Ok(()),
    }
}

fn known_types_of(atoms: &[Atom]) -> HashMap<Variable, Vec<Label>> {
    let mut known: HashMap<Variable, Vec<Label>> = HashMap::new();
    for atom in atoms {
        let (var, label) = match atom {
            Atom::Isa(a) => match &a.label {
                Some(l) => (&a.var, l),
                None => continue,
            },
            Atom::Attribute(a) => (&a.attribute, &a.label),
            _ => continue,
        };
        let entry = known.entry(var.clone()).or_default();
        if !entry.contains(label) {
            entry.push(label.clone());
        }
    }
    known
}

impl PartialEq for ReasonerQuery {
    fn eq(&self, other: &Self) -> bool {
        self.atoms.len() == other.atoms.len() && self.atoms.iter().all(|a| other.atoms.contains(a))
    }
}

impl Eq for ReasonerQuery {}

impl Hash for ReasonerQuery {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let combined = self.atoms.iter().fold(0u64, |acc, atom| {
            let mut h = DefaultHasher::new();
            atom.hash(&mut h);
            acc.wrapping_add(h.finish())
        });
        combined.hash(state);
    }
}

impl fmt::Display for ReasonerQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, atom) in self.atoms.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{atom}")?;
        }
        f.write_str("}")
    }
}
