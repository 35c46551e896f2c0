//! Offset binding
//!
//! After planning, central operators read their input by position. This
//! pass resolves every expression a central operator evaluates to input
//! offsets, asking sources for missing columns (and for weight strings
//! where values must be compared by collation).

use crate::common::error::PlannerResult;
use crate::expression::predicates::and_all;
use crate::internal_err;
use crate::parser::ast::{Expression, Transformed};
use crate::planner::columns::{add_column, find_column, output_columns};
use crate::planner::context::PlanningContext;
use crate::planner::logical_plan::*;
use crate::planner::rewrite::top_down;

/// Bind offsets of every central operator under `root`. Running it again
/// on a bound plan changes nothing.
pub fn bind_offsets(arena: &mut PlanArena, root: OpId, ctx: &PlanningContext<'_>) -> PlannerResult<()> {
    top_down(
        arena,
        root,
        &|op| matches!(op, Operator::Route(_)),
        &mut |arena, id| bind_operator(arena, id, ctx),
    )?;
    truncate_result(arena, root, ctx)
}

/// Rewrite `expr` over the output of `source`: known sub-expressions become
/// offsets, columns and aggregates are added when missing
fn resolve(
    arena: &mut PlanArena,
    source: OpId,
    expr: &Expression,
    ctx: &PlanningContext<'_>,
) -> PlannerResult<Expression> {
    expr.clone().transform_down(&mut |e| {
        if let Some(offset) = find_column(arena, source, &e, ctx)? {
            return Ok(Transformed::Yes(Expression::Offset(offset)));
        }
        match e {
            Expression::Column(_) | Expression::Aggregate { .. } | Expression::WeightString(_) => {
                let offset = add_column(arena, source, &e, ctx)?;
                Ok(Transformed::Yes(Expression::Offset(offset)))
            }
            other => Ok(Transformed::No(other)),
        }
    })
}

/// Offset of a value's weight string, when its type compares by collation
fn weight_string_offset(
    arena: &mut PlanArena,
    source: OpId,
    expr: &Expression,
    ctx: &PlanningContext<'_>,
) -> PlannerResult<Option<usize>> {
    if matches!(expr, Expression::WeightString(_)) || !ctx.semantics.type_of(expr).needs_weight_string() {
        return Ok(None);
    }
    add_column(arena, source, &Expression::weight_string(expr.clone()), ctx).map(Some)
}

fn bind_operator(arena: &mut PlanArena, id: OpId, ctx: &PlanningContext<'_>) -> PlannerResult<()> {
    let op = arena.get(id)?.clone();
    match op {
        Operator::Route(_) | Operator::Limit(_) | Operator::Union(_) => Ok(()),
        Operator::Projection(mut projection) => {
            for column in projection.columns.iter_mut() {
                column.eval = Some(resolve(arena, projection.source, &column.expr, ctx)?);
            }
            arena.replace(id, Operator::Projection(projection))
        }
        Operator::Filter(mut filter) => {
            filter.bound = match and_all(filter.predicates.clone()) {
                Some(predicate) => Some(resolve(arena, filter.source, &predicate, ctx)?),
                None => None,
            };
            arena.replace(id, Operator::Filter(filter))
        }
        Operator::Ordering(mut ordering) => {
            for key in ordering.keys.iter_mut() {
                key.offset = Some(add_column(arena, ordering.source, &key.expr, ctx)?);
                key.ws_offset = weight_string_offset(arena, ordering.source, &key.expr, ctx)?;
            }
            arena.replace(id, Operator::Ordering(ordering))
        }
        Operator::Distinct(mut distinct) => {
            let outputs = output_columns(arena, distinct.source, ctx)?;
            let count = distinct.column_count.unwrap_or(outputs.len()).min(outputs.len());
            distinct.column_count = Some(count);
            distinct.columns.clear();
            for (offset, expr) in outputs.iter().take(count).enumerate() {
                let ws_offset = weight_string_offset(arena, distinct.source, expr, ctx)?;
                distinct.columns.push(DistinctColumn { offset, ws_offset });
            }
            arena.replace(id, Operator::Distinct(distinct))
        }
        Operator::Aggregator(mut aggregator) => {
            let grouping: Vec<Expression> = aggregator.grouping.iter().map(|g| g.expr.clone()).collect();
            for (group, expr) in aggregator.grouping.iter_mut().zip(&grouping) {
                group.offset = Some(add_column(arena, aggregator.source, expr, ctx)?);
                group.ws_offset = weight_string_offset(arena, aggregator.source, expr, ctx)?;
            }
            for aggr in aggregator.aggregates.iter_mut() {
                let mut offsets = Vec::with_capacity(aggr.inputs.len());
                for input in &aggr.inputs {
                    offsets.push(add_column(arena, aggregator.source, input, ctx)?);
                }
                aggr.input_offsets = offsets;
            }
            arena.replace(id, Operator::Aggregator(aggregator))
        }
        Operator::ApplyJoin(join) => {
            let mut vars = join.vars.clone();
            for var in vars.iter_mut() {
                var.offset = Some(add_column(arena, join.lhs, &var.expr, ctx)?);
            }
            // columns may have been added while binding; keep them
            if let Operator::ApplyJoin(current) = arena.get_mut(id)? {
                current.vars = vars;
            }
            Ok(())
        }
        Operator::Join(_) | Operator::Horizon(_) | Operator::Table(_) => Err(internal_err!(
            "{} {} left outside a route after planning",
            op.name(),
            id
        )),
        Operator::Vacant => Err(internal_err!("vacant operator {} in plan", id)),
    }
}

/// Hidden columns added for sorting or grouping are cut from the result
fn truncate_result(arena: &mut PlanArena, root: OpId, ctx: &PlanningContext<'_>) -> PlannerResult<()> {
    let names = &ctx.semantics.result_columns;
    let outputs = output_columns(arena, root, ctx)?;
    if outputs.len() <= names.len() {
        return Ok(());
    }
    let columns = outputs
        .into_iter()
        .zip(names)
        .enumerate()
        .map(|(offset, (expr, name))| ProjColumn {
            alias: name.clone(),
            expr,
            eval: Some(Expression::Offset(offset)),
            output: None,
        })
        .collect();
    arena.wrap(root, |source| {
        Operator::Projection(Projection {
            source,
            columns,
            derived: None,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::PlannerConfig;
    use crate::expression::evaluator::BindVars;
    use crate::parser::ast::ColumnName;
    use crate::planner::binder::SemanticTable;
    use crate::planner::routing::Routing;

    fn col(name: &str) -> Expression {
        Expression::Column(ColumnName::bound("t", name, 0))
    }

    /// Ordering over a route whose interior projects `a`
    fn plan(arena: &mut PlanArena) -> OpId {
        let table = arena.add(Operator::Table(Table {
            table_id: 0,
            name: "t".to_string(),
            alias: "t".to_string(),
        }));
        let projection = arena.add(Operator::Projection(Projection {
            source: table,
            columns: vec![ProjColumn::new("a", col("a"))],
            derived: None,
        }));
        let route = arena.add(Operator::Route(Route::new(projection, Routing::Dual)));
        arena.add(Operator::Ordering(Ordering {
            source: route,
            keys: vec![RouteOrdering {
                expr: col("b"),
                ascending: false,
                offset: None,
                ws_offset: None,
            }],
            pushed: true,
        }))
    }

    #[test]
    fn test_hidden_sort_column_is_added_and_cut() -> PlannerResult<()> {
        let config = PlannerConfig::default();
        let semantics = SemanticTable {
            tables: vec![],
            result_columns: vec!["a".to_string()],
        };
        let vars = BindVars::new();
        let ctx = PlanningContext::new(&config, &semantics, &vars);

        let mut arena = PlanArena::new();
        let root = plan(&mut arena);
        bind_offsets(&mut arena, root, &ctx)?;

        // b is unknown-typed: sorted through its weight string
        let ordering = match arena.get(root)? {
            Operator::Projection(p) => {
                assert_eq!(p.columns.len(), 1);
                p.source
            }
            other => panic!("expected truncating projection, found {}", other.name()),
        };
        match arena.get(ordering)? {
            Operator::Ordering(o) => {
                assert_eq!(o.keys[0].offset, Some(1));
                assert_eq!(o.keys[0].ws_offset, Some(2));
            }
            other => panic!("expected ordering, found {}", other.name()),
        }

        let before = arena.len();
        bind_offsets(&mut arena, root, &ctx)?;
        assert_eq!(arena.len(), before);
        assert_eq!(output_columns(&arena, root, &ctx)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_central_join_is_an_invariant_violation() {
        let config = PlannerConfig::default();
        let semantics = SemanticTable::default();
        let vars = BindVars::new();
        let ctx = PlanningContext::new(&config, &semantics, &vars);

        let mut arena = PlanArena::new();
        let lhs = plan(&mut arena);
        let rhs = plan(&mut arena);
        let join = arena.add(Operator::Join(Join {
            lhs,
            rhs,
            predicate: None,
            left_join: false,
        }));
        assert!(bind_offsets(&mut arena, join, &ctx).unwrap_err().is_internal());
    }
}
