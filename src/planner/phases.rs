//! Planning phases
//!
//! The pushdown rules run several times. Each phase first reshapes the
//! central plan so the rules can do more (or must do something different),
//! then runs the rules to a fixed point and tidies up.

use crate::common::error::PlannerResult;
use crate::planner::columns::output_columns;
use crate::planner::context::PlanningContext;
use crate::planner::logical_plan::*;
use crate::planner::optimizer::RuleSet;
use crate::planner::rewrite::{fixed_point_bottom_up, rewrite, top_down, Rewritten, Visit};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initial,
    /// `UNION` becomes `DISTINCT` over `UNION ALL`, so routes can merge
    PullDistinctFromUnion,
    /// Aggregators may now be pushed or split
    DelegateAggregation,
    /// Central aggregators read rows sorted by their grouping
    AddAggregationOrdering,
    /// Drop deduplication the rows no longer need
    CleanOutDistinct,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Initial,
        Phase::PullDistinctFromUnion,
        Phase::DelegateAggregation,
        Phase::AddAggregationOrdering,
        Phase::CleanOutDistinct,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Initial => "initial",
            Phase::PullDistinctFromUnion => "pull_distinct_from_union",
            Phase::DelegateAggregation => "delegate_aggregation",
            Phase::AddAggregationOrdering => "add_aggregation_ordering",
            Phase::CleanOutDistinct => "clean_out_distinct",
        }
    }

    fn prepare(&self, arena: &mut PlanArena, root: OpId) -> PlannerResult<()> {
        match self {
            Phase::Initial => Ok(()),
            Phase::PullDistinctFromUnion => central(arena, root, &mut pull_distinct),
            Phase::DelegateAggregation => central(arena, root, &mut |arena, id| {
                if let Operator::Aggregator(aggregator) = arena.get_mut(id)? {
                    aggregator.delegated = true;
                }
                Ok(())
            }),
            Phase::AddAggregationOrdering => central(arena, root, &mut add_aggregation_ordering),
            Phase::CleanOutDistinct => central(arena, root, &mut clean_out_distinct),
        }
    }
}

/// Visit every central operator, parents first
fn central<F>(arena: &mut PlanArena, root: OpId, f: &mut F) -> PlannerResult<()>
where
    F: FnMut(&mut PlanArena, OpId) -> PlannerResult<()>,
{
    top_down(arena, root, &|op| matches!(op, Operator::Route(_)), f)
}

/// Run every phase over the plan at `root`
pub fn run_phases(
    arena: &mut PlanArena,
    root: OpId,
    ctx: &PlanningContext<'_>,
    rules: &RuleSet,
) -> PlannerResult<()> {
    for phase in Phase::ALL {
        let span = tracing::debug_span!("phase", phase = phase.name());
        let _enter = span.enter();

        phase.prepare(arena, root)?;
        let passes = fixed_point_bottom_up(arena, root, ctx.config, &mut |arena, id| {
            rules.apply(arena, id, ctx)
        })?;
        compact(arena, root, ctx)?;
        debug!(passes, operators = arena.len(), "phase done");
    }
    Ok(())
}

fn pull_distinct(arena: &mut PlanArena, id: OpId) -> PlannerResult<()> {
    let width = match arena.get_mut(id)? {
        Operator::Union(union) if union.distinct => {
            union.distinct = false;
            union.columns.len()
        }
        _ => return Ok(()),
    };
    arena.wrap(id, |source| {
        Operator::Distinct(Distinct {
            column_count: Some(width),
            ..Distinct::new(source)
        })
    })
}

fn add_aggregation_ordering(arena: &mut PlanArena, id: OpId) -> PlannerResult<()> {
    let (source, keys) = match arena.get(id)? {
        Operator::Aggregator(aggregator) if !aggregator.grouping.is_empty() => (
            aggregator.source,
            aggregator
                .grouping
                .iter()
                .map(|g| RouteOrdering {
                    expr: g.expr.clone(),
                    ascending: true,
                    offset: None,
                    ws_offset: None,
                })
                .collect::<Vec<_>>(),
        ),
        _ => return Ok(()),
    };
    if matches!(arena.get(source)?, Operator::Ordering(_)) {
        return Ok(());
    }
    arena.wrap(source, |inner| {
        Operator::Ordering(Ordering {
            source: inner,
            keys,
            pushed: false,
        })
    })
}

fn clean_out_distinct(arena: &mut PlanArena, id: OpId) -> PlannerResult<()> {
    let (source, column_count) = match arena.get(id)? {
        Operator::Distinct(distinct) => (distinct.source, distinct.column_count),
        _ => return Ok(()),
    };
    match arena.get(source)? {
        // groups are already unique on the grouping columns
        Operator::Aggregator(aggregator)
            if aggregator.aggregates.is_empty()
                && column_count.map(|n| n == aggregator.outputs.len()).unwrap_or(true) =>
        {
            arena.relocate(source, id)
        }
        // the outer distinct removes duplicates across all inputs anyway
        Operator::Union(union) => {
            for input in union.inputs.clone() {
                if let Operator::Distinct(inner) = arena.get(input)? {
                    let inner_source = inner.source;
                    arena.relocate(inner_source, input)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Remove central operators that no longer do anything
fn compact(arena: &mut PlanArena, root: OpId, ctx: &PlanningContext<'_>) -> PlannerResult<()> {
    let mut skip_routes = |arena: &PlanArena, id: OpId| -> PlannerResult<Visit> {
        Ok(match arena.get(id)? {
            Operator::Route(_) => Visit::SkipChildren,
            _ => Visit::Children,
        })
    };
    let mut simplify = |arena: &mut PlanArena, id: OpId| -> PlannerResult<Rewritten> {
        let remove = match arena.get(id)? {
            Operator::Filter(filter) => filter.predicates.is_empty(),
            Operator::Ordering(ordering) => ordering.keys.is_empty(),
            Operator::Distinct(distinct) => {
                matches!(arena.get(distinct.source)?, Operator::Distinct(_))
            }
            Operator::Projection(projection) if projection.derived.is_none() => {
                let outputs = output_columns(arena, projection.source, ctx)?;
                projection.columns.len() == outputs.len()
                    && projection.columns.iter().zip(&outputs).all(|(c, o)| {
                        c.output.is_none() && c.expr == *o && c.alias == o.output_name()
                    })
            }
            _ => false,
        };
        if !remove {
            return Ok(Rewritten::Same);
        }
        let source = arena
            .get(id)?
            .source()
            .ok_or_else(|| crate::internal_err!("operator {} has no source", id))?;
        if let (Operator::Distinct(outer), Operator::Distinct(inner)) = (arena.get(id)?, arena.get(source)?) {
            // keep the outer column count, drop the inner node
            let (width, inner_source) = (outer.column_count.or(inner.column_count), inner.source);
            arena.take(source)?;
            if let Operator::Distinct(outer) = arena.get_mut(id)? {
                outer.source = inner_source;
                outer.column_count = width;
            }
            return Ok(Rewritten::Changed);
        }
        arena.relocate(source, id)?;
        Ok(Rewritten::Changed)
    };
    rewrite(arena, root, ctx.config.max_revisits, &mut skip_routes, &mut simplify)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::PlannerConfig;
    use crate::expression::evaluator::BindVars;
    use crate::parser::ast::Expression;
    use crate::planner::binder::SemanticTable;
    use crate::planner::routing::Routing;

    fn dual_route(arena: &mut PlanArena) -> OpId {
        let table = arena.add(Operator::Table(Table {
            table_id: 0,
            name: "dual".to_string(),
            alias: "dual".to_string(),
        }));
        arena.add(Operator::Route(Route::new(table, Routing::Dual)))
    }

    #[test]
    fn test_union_distinct_is_pulled_out() -> PlannerResult<()> {
        let mut arena = PlanArena::new();
        let lhs = dual_route(&mut arena);
        let rhs = dual_route(&mut arena);
        let union = arena.add(Operator::Union(Union {
            inputs: vec![lhs, rhs],
            distinct: true,
            columns: vec![Expression::column(None, "a")],
        }));
        Phase::PullDistinctFromUnion.prepare(&mut arena, union)?;
        match arena.get(union)? {
            Operator::Distinct(distinct) => {
                assert_eq!(distinct.column_count, Some(1));
                match arena.get(distinct.source)? {
                    Operator::Union(inner) => assert!(!inner.distinct),
                    other => panic!("expected union, found {}", other.name()),
                }
            }
            other => panic!("expected distinct, found {}", other.name()),
        }
        Ok(())
    }

    #[test]
    fn test_compaction_drops_empty_operators() -> PlannerResult<()> {
        let config = PlannerConfig::default();
        let semantics = SemanticTable::default();
        let vars = BindVars::new();
        let ctx = PlanningContext::new(&config, &semantics, &vars);

        let mut arena = PlanArena::new();
        let route = dual_route(&mut arena);
        let filter = arena.add(Operator::Filter(Filter::new(route, vec![])));
        let inner = arena.add(Operator::Distinct(Distinct::new(filter)));
        let outer = arena.add(Operator::Distinct(Distinct::new(inner)));

        compact(&mut arena, outer, &ctx)?;
        match arena.get(outer)? {
            Operator::Distinct(distinct) => {
                assert_eq!(arena.get(distinct.source)?.name(), "Route");
            }
            other => panic!("expected distinct, found {}", other.name()),
        }
        Ok(())
    }

    #[test]
    fn test_phase_order() {
        let names: Vec<&str> = Phase::ALL.iter().map(|p| p.name()).collect();
        assert_eq!(names[0], "initial");
        assert_eq!(names[4], "clean_out_distinct");
    }
}
