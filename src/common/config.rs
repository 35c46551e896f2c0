//! Planner configuration

use crate::common::error::PlannerResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for a single compile. The planner never mutates these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Upper bound on bottom-up passes before a phase's fixed-point rewrite
    /// is declared divergent
    pub max_rewrite_passes: usize,
    /// Upper bound on `replace_and_revisit` calls within one rewrite pass
    pub max_revisits: usize,
    /// Whether scattered routes get the CNF / OR-to-IN improvement pass
    pub improve_routing: bool,
    /// CNF rewrites producing more clauses than this are abandoned
    pub max_cnf_clauses: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_rewrite_passes: 64,
            max_revisits: 1024,
            improve_routing: true,
            max_cnf_clauses: 32,
        }
    }
}

impl PlannerConfig {
    pub fn from_json(json: &str) -> PlannerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> PlannerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = PlannerConfig::from_json(r#"{"improve_routing": false}"#).unwrap();
        assert!(!config.improve_routing);
        assert_eq!(config.max_rewrite_passes, 64);
        assert_eq!(config.max_cnf_clauses, 32);
    }
}
