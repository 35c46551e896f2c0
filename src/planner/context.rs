//! Planning context: the read-only inputs of one compile

use crate::common::config::PlannerConfig;
use crate::expression::evaluator::{BindVars, StaticEvaluator};
use crate::planner::binder::SemanticTable;

/// Configuration, semantic information and bind variables, built once per
/// compile and shared by every rule
pub struct PlanningContext<'a> {
    pub config: &'a PlannerConfig,
    pub semantics: &'a SemanticTable,
    pub bind_vars: &'a BindVars,
}

impl<'a> PlanningContext<'a> {
    pub fn new(
        config: &'a PlannerConfig,
        semantics: &'a SemanticTable,
        bind_vars: &'a BindVars,
    ) -> Self {
        Self {
            config,
            semantics,
            bind_vars,
        }
    }

    pub fn evaluator(&self) -> StaticEvaluator<'a> {
        StaticEvaluator::new(self.bind_vars)
    }
}
