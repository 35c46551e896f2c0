//! Column tracking
//!
//! Every operator produces an ordered list of output columns, named by the
//! expressions they compute. Operators above read their input by position,
//! so asking for a column either finds it or makes the source produce it.

use crate::common::error::PlannerResult;
use crate::parser::ast::{ColumnName, Expression, SelectItem, Transformed};
use crate::planner::aggregation::central_opcode;
use crate::planner::binder::TableSet;
use crate::planner::context::PlanningContext;
use crate::planner::logical_plan::*;
use crate::{internal_err, unsupported_err};
use std::collections::HashSet;

/// Placeholder for a `*` whose columns are unknown
fn opaque_star() -> Expression {
    Expression::column(None, "*")
}

/// Output columns of an operator
pub fn output_columns(
    arena: &PlanArena,
    id: OpId,
    ctx: &PlanningContext<'_>,
) -> PlannerResult<Vec<Expression>> {
    Ok(match arena.get(id)? {
        Operator::Route(op) => output_columns(arena, op.source, ctx)?,
        Operator::Filter(op) => output_columns(arena, op.source, ctx)?,
        Operator::Ordering(op) => output_columns(arena, op.source, ctx)?,
        Operator::Limit(op) => output_columns(arena, op.source, ctx)?,
        Operator::Distinct(op) => output_columns(arena, op.source, ctx)?,
        Operator::Table(_) => vec![],
        Operator::Join(op) => {
            let mut columns = output_columns(arena, op.lhs, ctx)?;
            columns.extend(output_columns(arena, op.rhs, ctx)?);
            columns
        }
        Operator::ApplyJoin(op) => op.columns.iter().map(|c| c.expr.clone()).collect(),
        Operator::Aggregator(op) => op.outputs.clone(),
        Operator::Union(op) => op.columns.clone(),
        Operator::Projection(op) => match &op.derived {
            Some(derived) => op
                .columns
                .iter()
                .map(|c| match &c.output {
                    Some(output) => output.clone(),
                    None => Expression::Column(ColumnName::bound(
                        &derived.alias,
                        &c.alias,
                        derived.table_id,
                    )),
                })
                .collect(),
            None => op
                .columns
                .iter()
                .map(|c| c.output.clone().unwrap_or_else(|| c.expr.clone()))
                .collect(),
        },
        Operator::Horizon(op) => match &op.derived {
            Some(derived) => ctx
                .semantics
                .table(derived.table_id)?
                .columns
                .iter()
                .map(|c| {
                    Expression::Column(ColumnName::bound(
                        &derived.alias,
                        &c.name,
                        derived.table_id,
                    ))
                })
                .collect(),
            None => {
                let mut columns = Vec::new();
                for item in &op.select.select_list {
                    match item {
                        SelectItem::Expression { expr, .. } => columns.push(expr.clone()),
                        SelectItem::Wildcard | SelectItem::QualifiedWildcard(_) => {
                            let qualifier = match item {
                                SelectItem::QualifiedWildcard(t) => Some(t.as_str()),
                                _ => None,
                            };
                            match ctx.semantics.expand_star(&op.scope, qualifier) {
                                Some(expanded) => {
                                    columns.extend(expanded.into_iter().map(|(e, _)| e))
                                }
                                None => columns.push(opaque_star()),
                            }
                        }
                    }
                }
                columns
            }
        },
        Operator::Vacant => return Err(internal_err!("vacant operator {} has no columns", id)),
    })
}

pub fn find_column(
    arena: &PlanArena,
    id: OpId,
    expr: &Expression,
    ctx: &PlanningContext<'_>,
) -> PlannerResult<Option<usize>> {
    Ok(output_columns(arena, id, ctx)?.iter().position(|c| c == expr))
}

/// Offset of `expr` in the output of the central operator `id`, adding the
/// column to it (and to whatever feeds it) when missing
pub fn add_column(
    arena: &mut PlanArena,
    id: OpId,
    expr: &Expression,
    ctx: &PlanningContext<'_>,
) -> PlannerResult<usize> {
    if let Some(offset) = find_column(arena, id, expr, ctx)? {
        return Ok(offset);
    }
    let op = arena.get(id)?;
    match op {
        Operator::Route(route) => {
            let interior = route.source;
            add_interior(arena, interior, expr, ctx)
        }
        Operator::Filter(_) | Operator::Ordering(_) | Operator::Limit(_) | Operator::Distinct(_) => {
            let source = op
                .source()
                .ok_or_else(|| internal_err!("{} without a source", op.name()))?;
            add_column(arena, source, expr, ctx)
        }
        Operator::Projection(_) => add_to_projection(arena, id, expr),
        Operator::Aggregator(_) => add_to_aggregator(arena, id, expr),
        Operator::Union(_) => add_to_union(arena, id, expr, false, ctx),
        Operator::ApplyJoin(_) => add_to_apply_join(arena, id, expr, ctx),
        other => Err(internal_err!(
            "cannot add column {} to {} {}",
            expr,
            other.name(),
            id
        )),
    }
}

/// Add a column inside a route. Clauses that only reorder or trim rows are
/// looked through; operators that already list columns get one more;
/// anything else is wrapped in a projection.
fn add_interior(
    arena: &mut PlanArena,
    id: OpId,
    expr: &Expression,
    ctx: &PlanningContext<'_>,
) -> PlannerResult<usize> {
    if let Some(offset) = find_column(arena, id, expr, ctx)? {
        return Ok(offset);
    }
    let op = arena.get(id)?;
    match op {
        Operator::Limit(op) => {
            let source = op.source;
            add_interior(arena, source, expr, ctx)
        }
        Operator::Ordering(op) => {
            let source = op.source;
            add_interior(arena, source, expr, ctx)
        }
        Operator::Distinct(op) => {
            let source = op.source;
            add_interior(arena, source, expr, ctx)
        }
        Operator::Filter(op) if filters_groups(arena, op.source)? => {
            let source = op.source;
            add_interior(arena, source, expr, ctx)
        }
        Operator::Projection(op) if op.derived.is_none() => add_to_projection(arena, id, expr),
        Operator::Aggregator(_) => add_to_aggregator(arena, id, expr),
        Operator::Union(_) => add_to_union(arena, id, expr, true, ctx),
        Operator::Horizon(op) if op.derived.is_none() => {
            let outputs = output_columns(arena, id, ctx)?;
            if outputs.contains(&opaque_star()) {
                return Err(unsupported_err!(
                    "cannot add '{}' next to a '*' without a known column list",
                    expr
                ));
            }
            if let Operator::Horizon(horizon) = arena.get_mut(id)? {
                horizon.select.select_list.push(SelectItem::Expression {
                    expr: expr.clone(),
                    alias: None,
                });
            }
            Ok(outputs.len())
        }
        _ => {
            let outputs = output_columns(arena, id, ctx)?;
            let offset = outputs.len();
            let mut columns: Vec<ProjColumn> = outputs
                .into_iter()
                .map(|e| ProjColumn::new(e.output_name(), e))
                .collect();
            columns.push(ProjColumn::new(expr.output_name(), expr.clone()));
            arena.wrap(id, |source| {
                Operator::Projection(Projection {
                    source,
                    columns,
                    derived: None,
                })
            })?;
            Ok(offset)
        }
    }
}

/// Whether `id` is an aggregator, possibly under further filters: a filter
/// on top of it is a HAVING clause
pub(crate) fn filters_groups(arena: &PlanArena, id: OpId) -> PlannerResult<bool> {
    match arena.get(id)? {
        Operator::Aggregator(_) => Ok(true),
        Operator::Filter(filter) => filters_groups(arena, filter.source),
        _ => Ok(false),
    }
}

fn add_to_projection(arena: &mut PlanArena, id: OpId, expr: &Expression) -> PlannerResult<usize> {
    match arena.get_mut(id)? {
        Operator::Projection(projection) => {
            let column = match &projection.derived {
                None => ProjColumn::new(expr.output_name(), expr.clone()),
                Some(derived) => {
                    // computed from the derived table's columns
                    let substituted = substitute_derived(&projection.columns, derived, expr)?;
                    ProjColumn {
                        alias: expr.to_string(),
                        expr: substituted,
                        eval: None,
                        output: Some(expr.clone()),
                    }
                }
            };
            projection.columns.push(column);
            Ok(projection.columns.len() - 1)
        }
        other => Err(internal_err!("expected Projection at {}, found {}", id, other.name())),
    }
}

/// Rewrite references to a derived table's columns into the expressions
/// defining them
pub(crate) fn substitute_derived(
    columns: &[ProjColumn],
    derived: &DerivedInfo,
    expr: &Expression,
) -> PlannerResult<Expression> {
    expr.clone().transform_down(&mut |e| match e {
        Expression::Column(col) if col.binding == Some(derived.table_id) => {
            match columns.iter().find(|c| c.output.is_none() && c.alias == col.name) {
                Some(column) => Ok(Transformed::Yes(column.expr.clone())),
                None => Err(internal_err!(
                    "derived table {} has no column {}",
                    derived.alias,
                    col.name
                )),
            }
        }
        other => Ok(Transformed::No(other)),
    })
}

fn add_to_aggregator(arena: &mut PlanArena, id: OpId, expr: &Expression) -> PlannerResult<usize> {
    let aggregator = match arena.get_mut(id)? {
        Operator::Aggregator(aggregator) => aggregator,
        other => {
            return Err(internal_err!(
                "expected Aggregator at {}, found {}",
                id,
                other.name()
            ))
        }
    };
    match expr {
        Expression::Aggregate {
            function,
            argument,
            distinct,
        } => {
            if aggregator.pushed {
                return Err(internal_err!(
                    "aggregate {} requested after aggregation was split",
                    expr
                ));
            }
            aggregator.aggregates.push(Aggr {
                expr: expr.clone(),
                alias: None,
                opcode: central_opcode(*function, *distinct)?,
                inputs: argument.iter().map(|a| a.as_ref().clone()).collect(),
                input_offsets: vec![],
            });
        }
        Expression::WeightString(inner) if aggregator.is_grouping(inner) => {
            aggregator.grouping.push(GroupBy::new(expr.clone()));
        }
        other if other.contains_aggregate() => {
            return Err(internal_err!(
                "aggregator {} cannot compute {}; it must be projected above",
                id,
                other
            ))
        }
        other => {
            aggregator.aggregates.push(Aggr {
                expr: other.clone(),
                alias: None,
                opcode: AggregateOpcode::AnyValue,
                inputs: vec![other.clone()],
                input_offsets: vec![],
            });
        }
    }
    aggregator.outputs.push(expr.clone());
    Ok(aggregator.outputs.len() - 1)
}

/// Unions hold columns by position: every input gets the same column, with
/// result-column references translated into that input's own expressions
fn add_to_union(
    arena: &mut PlanArena,
    id: OpId,
    expr: &Expression,
    interior: bool,
    ctx: &PlanningContext<'_>,
) -> PlannerResult<usize> {
    let (inputs, columns) = match arena.get(id)? {
        Operator::Union(union) => (union.inputs.clone(), union.columns.clone()),
        other => return Err(internal_err!("expected Union at {}, found {}", id, other.name())),
    };
    let position = columns.len();
    for input in inputs {
        let outputs = output_columns(arena, input, ctx)?;
        let translated = expr.clone().transform_down(&mut |e| {
            if let Some(index) = columns.iter().position(|c| *c == e) {
                return match outputs.get(index) {
                    Some(output) => Ok(Transformed::Yes(output.clone())),
                    None => Err(internal_err!("union input {} lacks column {}", input, index)),
                };
            }
            Ok(Transformed::No(e))
        })?;
        let offset = if interior {
            add_interior(arena, input, &translated, ctx)?
        } else {
            add_column(arena, input, &translated, ctx)?
        };
        if offset != position {
            return Err(internal_err!(
                "union input {} placed {} at offset {} instead of {}",
                input,
                expr,
                offset,
                position
            ));
        }
    }
    if let Operator::Union(union) = arena.get_mut(id)? {
        union.columns.push(expr.clone());
    }
    Ok(position)
}

fn add_to_apply_join(
    arena: &mut PlanArena,
    id: OpId,
    expr: &Expression,
    ctx: &PlanningContext<'_>,
) -> PlannerResult<usize> {
    let (lhs, rhs, mut vars) = match arena.get(id)? {
        Operator::ApplyJoin(join) => (join.lhs, join.rhs, join.vars.clone()),
        other => {
            return Err(internal_err!(
                "expected ApplyJoin at {}, found {}",
                id,
                other.name()
            ))
        }
    };
    let lhs_tables = arena.table_ids(lhs)?;
    let rhs_tables = arena.table_ids(rhs)?;
    let deps = ctx.semantics.dependencies(expr);

    let column = if deps.is_subset_of(lhs_tables) {
        JoinColumn {
            expr: expr.clone(),
            from_lhs: true,
            offset: add_column(arena, lhs, expr, ctx)?,
        }
    } else if deps.is_subset_of(rhs_tables) {
        JoinColumn {
            expr: expr.clone(),
            from_lhs: false,
            offset: add_column(arena, rhs, expr, ctx)?,
        }
    } else {
        let rewritten = bind_outer_columns(arena, &mut vars, expr, lhs_tables)?;
        JoinColumn {
            expr: expr.clone(),
            from_lhs: false,
            offset: add_column(arena, rhs, &rewritten, ctx)?,
        }
    };

    match arena.get_mut(id)? {
        Operator::ApplyJoin(join) => {
            join.vars = vars;
            join.columns.push(column);
            Ok(join.columns.len() - 1)
        }
        other => Err(internal_err!("expected ApplyJoin at {}, found {}", id, other.name())),
    }
}

/// Replace columns of `outer` tables in `expr` with bind variables read from
/// the outer row. New variables are appended to `vars`; names are unique
/// across the plan.
pub fn bind_outer_columns(
    arena: &PlanArena,
    vars: &mut Vec<JoinVar>,
    expr: &Expression,
    outer: TableSet,
) -> PlannerResult<Expression> {
    let mut taken: HashSet<String> = arena
        .operators()
        .filter_map(|(_, op)| match op {
            Operator::ApplyJoin(join) => Some(join.vars.iter().map(|v| v.name.clone())),
            _ => None,
        })
        .flatten()
        .collect();
    taken.extend(vars.iter().map(|v| v.name.clone()));

    expr.clone().transform_down(&mut |e| match e {
        Expression::Column(col) if col.binding.map(|b| outer.contains(b)).unwrap_or(false) => {
            let column = Expression::Column(col.clone());
            if let Some(var) = vars.iter().find(|v| v.expr == column) {
                return Ok(Transformed::Yes(Expression::BindVariable(var.name.clone())));
            }
            let base = format!("{}_{}", col.table.as_deref().unwrap_or("t"), col.name);
            let mut name = base.clone();
            let mut suffix = 1;
            while taken.contains(&name) {
                name = format!("{}{}", base, suffix);
                suffix += 1;
            }
            taken.insert(name.clone());
            vars.push(JoinVar {
                name: name.clone(),
                expr: column,
                offset: None,
            });
            Ok(Transformed::Yes(Expression::BindVariable(name)))
        }
        other => Ok(Transformed::No(other)),
    })
}
