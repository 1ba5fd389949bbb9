//! Reasoning session configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Configuration for a reasoning session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    /// Upper bound on fixpoint passes for recursive queries (default: 64).
    pub max_passes: usize,
    /// Serve repeated sub-queries from the answer cache.
    pub use_cache: bool,
    /// Attach explanations to answers.
    pub explain: bool,
    /// Reuse resolution plans across structurally equivalent conjunctions.
    pub reuse_plans: bool,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            max_passes: 64,
            use_cache: true,
            explain: true,
            reuse_plans: true,
        }
    }
}

impl ReasonerConfig {
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_explanations(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn with_plan_reuse(mut self, reuse_plans: bool) -> Self {
        self.reuse_plans = reuse_plans;
        self
    }

    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config = ReasonerConfig::from_toml_str("max_passes = 8").unwrap();
        assert_eq!(config.max_passes, 8);
        assert!(config.use_cache);
        assert!(config.explain);
    }

    #[test]
    fn unknown_types_are_parse_errors() {
        assert!(matches!(
            ReasonerConfig::from_toml_str("explain = \"yes\""),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn pass_bound_is_at_least_one() {
        assert_eq!(ReasonerConfig::default().with_max_passes(0).max_passes, 1);
    }
}
