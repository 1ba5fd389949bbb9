//! Pattern variables.
//!
//! Variables are compared by name. Names starting with `_` are anonymous:
//! the pattern builder mints them for relation instances, type and role
//! slots the caller did not name. Anonymous variables take part in
//! unification like any other but are projected away from final answers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A pattern variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(Arc<str>);

impl Variable {
    /// A variable with the given name (without the `$` sigil).
    pub fn new(name: &str) -> Self {
        Variable(Arc::from(name.trim_start_matches('$')))
    }

    /// The `n`-th anonymous variable.
    pub fn anonymous(n: usize) -> Self {
        Variable(Arc::from(format!("_{n}")))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether the caller named this variable.
    pub fn is_user_defined(&self) -> bool {
        !self.0.starts_with('_')
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

impl From<&str> for Variable {
    fn from(name: &str) -> Self {
        Variable::new(name)
    }
}

impl Serialize for Variable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Variable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Variable::new(&s))
    }
}

/// Mints fresh variables that do not clash with a given set of names.
#[derive(Debug, Default)]
pub struct VarGenerator {
    counter: usize,
    prefix: &'static str,
}

impl VarGenerator {
    /// Generator for anonymous variables (`_0`, `_1`, ...).
    pub fn anonymous() -> Self {
        Self {
            counter: 0,
            prefix: "_",
        }
    }

    /// Generator for user-defined variables with a reserved prefix.
    pub fn named(prefix: &'static str) -> Self {
        Self { counter: 0, prefix }
    }

    /// Next variable whose name is not rejected by `taken`.
    pub fn fresh(&mut self, taken: impl Fn(&Variable) -> bool) -> Variable {
        loop {
            let var = Variable(Arc::from(format!("{}{}", self.prefix, self.counter)));
            self.counter += 1;
            if !taken(&var) {
                return var;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigil_is_stripped() {
        assert_eq!(Variable::new("$x"), Variable::new("x"));
        assert_eq!(Variable::new("x").to_string(), "$x");
    }

    #[test]
    fn anonymous_variables_are_not_user_defined() {
        assert!(!Variable::anonymous(3).is_user_defined());
        assert!(Variable::new("x").is_user_defined());
    }

    #[test]
    fn generator_skips_taken_names() {
        let mut vars = VarGenerator::named("rel");
        let taken = Variable::new("rel0");
        let fresh = vars.fresh(|v| *v == taken);
        assert_eq!(fresh.name(), "rel1");
    }
}
