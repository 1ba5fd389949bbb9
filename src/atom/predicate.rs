//! Predicates: id bindings, value comparisons and concept inequality.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::concept::{ConceptId, Value};
use crate::var::Variable;

/// Value comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Substring test on string values.
    Contains,
}

impl Comparison {
    /// Evaluate `left <op> right`. Incomparable values never satisfy an
    /// ordering comparison.
    pub fn test(self, left: &Value, right: &Value) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Comparison::Eq => left.compare(right) == Some(Equal),
            Comparison::Neq => left.compare(right) != Some(Equal),
            Comparison::Gt => left.compare(right) == Some(Greater),
            Comparison::Gte => matches!(left.compare(right), Some(Greater | Equal)),
            Comparison::Lt => left.compare(right) == Some(Less),
            Comparison::Lte => matches!(left.compare(right), Some(Less | Equal)),
            Comparison::Contains => match (left, right) {
                (Value::String(l), Value::String(r)) => l.contains(r.as_str()),
                _ => false,
            },
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Comparison::Eq => "==",
            Comparison::Neq => "!==",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Contains => "contains",
        };
        f.write_str(op)
    }
}

/// Right-hand side of a value comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operand {
    Const(Value),
    Var(Variable),
}

/// A non-selectable constraint on variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Predicate {
    /// The variable is bound to a specific concept.
    Id { var: Variable, id: ConceptId },
    /// The variable's attribute value satisfies a comparison.
    Value {
        var: Variable,
        comparison: Comparison,
        operand: Operand,
    },
    /// The two variables are bound to different concepts.
    Neq { left: Variable, right: Variable },
}

impl Predicate {
    pub fn variables(&self) -> Vec<Variable> {
        match self {
            Predicate::Id { var, .. } => vec![var.clone()],
            Predicate::Value { var, operand, .. } => match operand {
                Operand::Const(_) => vec![var.clone()],
                Operand::Var(other) => vec![var.clone(), other.clone()],
            },
            Predicate::Neq { left, right } => vec![left.clone(), right.clone()],
        }
    }

    /// The variable a single-variable predicate constrains.
    pub fn subject(&self) -> Option<&Variable> {
        match self {
            Predicate::Id { var, .. } => Some(var),
            Predicate::Value {
                var,
                operand: Operand::Const(_),
                ..
            } => Some(var),
            _ => None,
        }
    }

    /// The constant a value predicate compares against.
    pub fn constant(&self) -> Option<(Comparison, &Value)> {
        match self {
            Predicate::Value {
                comparison,
                operand: Operand::Const(v),
                ..
            } => Some((*comparison, v)),
            _ => None,
        }
    }

    /// Copy with every variable passed through `f`.
    pub fn map_vars(&self, f: &impl Fn(&Variable) -> Variable) -> Predicate {
        match self {
            Predicate::Id { var, id } => Predicate::Id { var: f(var), id: *id },
            Predicate::Value {
                var,
                comparison,
                operand,
            } => Predicate::Value {
                var: f(var),
                comparison: *comparison,
                operand: match operand {
                    Operand::Const(v) => Operand::Const(v.clone()),
                    Operand::Var(o) => Operand::Var(f(o)),
                },
            },
            Predicate::Neq { left, right } => Predicate::Neq {
                left: f(left),
                right: f(right),
            },
        }
    }
}

/// Whether a derived constant `value` can satisfy every constant predicate in
/// `bounds`.
pub fn value_satisfies<'a>(value: &Value, bounds: impl IntoIterator<Item = &'a Predicate>) -> bool {
    bounds
        .into_iter()
        .filter_map(Predicate::constant)
        .all(|(cmp, bound)| cmp.test(value, bound))
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Id { var, id } => write!(f, "{var} id {id}"),
            Predicate::Value {
                var,
                comparison,
                operand: Operand::Const(v),
            } => write!(f, "{var} {comparison} {v}"),
            Predicate::Value {
                var,
                comparison,
                operand: Operand::Var(o),
            } => write!(f, "{var} {comparison} {o}"),
            Predicate::Neq { left, right } => write!(f, "{left} != {right}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons() {
        assert!(Comparison::Gt.test(&Value::Long(5), &Value::Long(3)));
        assert!(Comparison::Lte.test(&Value::Long(3), &Value::Double(3.0)));
        assert!(Comparison::Contains.test(&Value::from("Warsaw"), &Value::from("saw")));
        assert!(!Comparison::Lt.test(&Value::from("a"), &Value::Long(1)));
        assert!(Comparison::Neq.test(&Value::from("a"), &Value::Long(1)));
    }

    #[test]
    fn derived_value_against_bounds() {
        let x = Variable::new("x");
        let bounds = [
            Predicate::Value {
                var: x.clone(),
                comparison: Comparison::Gt,
                operand: Operand::Const(Value::Long(18)),
            },
            Predicate::Neq {
                left: x.clone(),
                right: Variable::new("y"),
            },
        ];
        assert!(value_satisfies(&Value::Long(20), &bounds));
        assert!(!value_satisfies(&Value::Long(10), &bounds));
    }
}
