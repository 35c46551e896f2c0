//! Query Planner
//!
//! Coordinates one compile: semantic binding, building the initial operator
//! tree, the phase pipeline, offset binding and query generation.

use crate::common::config::PlannerConfig;
use crate::common::error::PlannerResult;
use crate::expression::evaluator::BindVars;
use crate::parser::ast::{ExplainFormat, Query, Statement};
use crate::parser::parse_sql;
use crate::planner::binder::{Binder, SemanticTable};
use crate::planner::builder::PlanBuilder;
use crate::planner::context::PlanningContext;
use crate::planner::explain::PlanDescription;
use crate::planner::logical_plan::{OpId, Operator, PlanArena, Route};
use crate::planner::offsets::bind_offsets;
use crate::planner::optimizer::RuleSet;
use crate::planner::phases::run_phases;
use crate::planner::sql::{destination_queries, generate_queries, DestinationQuery};
use crate::schema::SchemaLookup;
use tracing::{debug, error, info};

/// Main query planner
pub struct QueryPlanner<'a> {
    schema: &'a dyn SchemaLookup,
    config: PlannerConfig,
    rules: RuleSet,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(schema: &'a dyn SchemaLookup, config: PlannerConfig) -> Self {
        Self {
            schema,
            config,
            rules: RuleSet::new(),
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan a query. No partial plan is returned on error.
    pub fn plan(&self, query: &Query, bind_vars: &BindVars) -> PlannerResult<PlannedQuery> {
        let span = tracing::info_span!("plan");
        let _enter = span.enter();

        match self.compile(query, bind_vars) {
            Ok(planned) => {
                info!(
                    routes = planned.routes().len(),
                    operators = planned.arena.len(),
                    "planned"
                );
                Ok(planned)
            }
            Err(err) if err.is_internal() => {
                error!(kind = err.kind(), error = %err, "planner invariant violated");
                Err(err)
            }
            Err(err) => {
                debug!(kind = err.kind(), error = %err, "statement rejected");
                Err(err)
            }
        }
    }

    /// Plan a statement; an EXPLAIN plans its query
    pub fn plan_statement(&self, statement: &Statement, bind_vars: &BindVars) -> PlannerResult<PlannedQuery> {
        match statement {
            Statement::Query(query) => self.plan(query, bind_vars),
            Statement::Explain { query, .. } => self.plan(query, bind_vars),
        }
    }

    /// Parse and plan
    pub fn plan_sql(&self, sql: &str, bind_vars: &BindVars) -> PlannerResult<PlannedQuery> {
        self.plan_statement(&parse_sql(sql)?, bind_vars)
    }

    fn compile(&self, query: &Query, bind_vars: &BindVars) -> PlannerResult<PlannedQuery> {
        let (bound, semantics) = Binder::new(self.schema).bind(query)?;

        let mut arena = PlanArena::new();
        let root = PlanBuilder::new(&mut arena, &semantics).build(&bound)?;
        debug!(operators = arena.len(), "initial plan built");

        let ctx = PlanningContext::new(&self.config, &semantics, bind_vars);
        run_phases(&mut arena, root, &ctx, &self.rules)?;
        bind_offsets(&mut arena, root, &ctx)?;
        generate_queries(&mut arena, root)?;

        Ok(PlannedQuery {
            columns: semantics.result_columns.clone(),
            arena,
            root,
            semantics,
        })
    }
}

/// A finished plan
#[derive(Debug)]
pub struct PlannedQuery {
    pub arena: PlanArena,
    pub root: OpId,
    /// Result column names as the client sees them
    pub columns: Vec<String>,
    pub semantics: SemanticTable,
}

impl PlannedQuery {
    pub fn describe(&self) -> PlannerResult<PlanDescription> {
        PlanDescription::of(&self.arena, self.root)
    }

    pub fn explain(&self, format: ExplainFormat) -> PlannerResult<String> {
        let description = self.describe()?;
        match format {
            ExplainFormat::Text => Ok(description.to_text()),
            ExplainFormat::Json => description.to_json(),
        }
    }

    /// Route operators, in plan order
    pub fn routes(&self) -> Vec<&Route> {
        self.arena
            .routes(self.root)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| match self.arena.get(id) {
                Ok(Operator::Route(route)) => Some(route),
                _ => None,
            })
            .collect()
    }

    /// Queries for every destination of every route, in plan order
    pub fn destination_queries(&self) -> PlannerResult<Vec<DestinationQuery>> {
        let mut queries = Vec::new();
        for id in self.arena.routes(self.root)? {
            queries.extend(destination_queries(&self.arena, id)?);
        }
        Ok(queries)
    }

    /// Whether the whole statement went to the database as one route
    pub fn is_single_route(&self) -> bool {
        matches!(self.arena.get(self.root), Ok(Operator::Route(_)))
    }
}
