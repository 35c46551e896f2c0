//! Aggregation planning
//!
//! Builds the aggregator for a SELECT and splits it in two when grouping
//! cannot happen on a single destination: every destination computes
//! partial aggregates, and the central aggregator combines them.

use crate::common::error::PlannerResult;
use crate::parser::ast::{AggregateFunction, Expression, SelectItem, SelectStatement};
use crate::planner::logical_plan::{Aggr, AggregateOpcode, Aggregator, GroupBy, OpId};
use crate::{internal_err, unsupported_err};

/// Opcode a central aggregator uses for an aggregate it computes from raw
/// rows
pub fn central_opcode(
    function: AggregateFunction,
    distinct: bool,
) -> PlannerResult<AggregateOpcode> {
    Ok(match (function, distinct) {
        (AggregateFunction::CountStar, _) => AggregateOpcode::CountStar,
        (AggregateFunction::Count, false) => AggregateOpcode::Count,
        (AggregateFunction::Count, true) => AggregateOpcode::CountDistinct,
        (AggregateFunction::Sum, false) => AggregateOpcode::Sum,
        (AggregateFunction::Sum, true) => AggregateOpcode::SumDistinct,
        (AggregateFunction::Avg, false) => AggregateOpcode::Avg,
        (AggregateFunction::Avg, true) => {
            return Err(unsupported_err!("avg(distinct ...) across several destinations"))
        }
        (AggregateFunction::Min, _) => AggregateOpcode::Min,
        (AggregateFunction::Max, _) => AggregateOpcode::Max,
        (AggregateFunction::AnyValue, _) => AggregateOpcode::AnyValue,
    })
}

fn aggregate(function: AggregateFunction, argument: Expression) -> Expression {
    Expression::Aggregate {
        function,
        argument: Some(Box::new(argument)),
        distinct: false,
    }
}

/// The aggregator computing a SELECT's groups. Every aggregate used by the
/// select list, HAVING or ORDER BY is collected once; columns read outside
/// an aggregate that are not grouped on are carried as `any_value`.
pub fn aggregator_for(select: &SelectStatement, source: OpId) -> PlannerResult<Aggregator> {
    let grouping: Vec<GroupBy> = select.group_by.iter().cloned().map(GroupBy::new).collect();
    let mut aggregator = Aggregator {
        source,
        outputs: select.group_by.clone(),
        grouping,
        aggregates: vec![],
        original: true,
        delegated: false,
        pushed: false,
    };

    let mut collect = |expr: &Expression| collect_aggregates(&mut aggregator, expr);
    for item in &select.select_list {
        match item {
            SelectItem::Expression { expr, .. } => collect(expr)?,
            _ => return Err(internal_err!("'*' reached aggregation planning unexpanded")),
        }
    }
    if let Some(having) = &select.having {
        collect(having)?;
    }
    for order in &select.order_by {
        collect(&order.expression)?;
    }
    Ok(aggregator)
}

fn collect_aggregates(aggregator: &mut Aggregator, expr: &Expression) -> PlannerResult<()> {
    if aggregator.is_grouping(expr) || aggregator.outputs.contains(expr) {
        return Ok(());
    }
    match expr {
        Expression::Aggregate {
            function,
            argument,
            distinct,
        } => {
            aggregator.aggregates.push(Aggr {
                expr: expr.clone(),
                alias: None,
                opcode: central_opcode(*function, *distinct)?,
                inputs: argument.iter().map(|a| a.as_ref().clone()).collect(),
                input_offsets: vec![],
            });
            aggregator.outputs.push(expr.clone());
        }
        Expression::Column(_) => {
            aggregator.aggregates.push(Aggr {
                expr: expr.clone(),
                alias: None,
                opcode: AggregateOpcode::AnyValue,
                inputs: vec![expr.clone()],
                input_offsets: vec![],
            });
            aggregator.outputs.push(expr.clone());
        }
        other => {
            for child in other.children() {
                collect_aggregates(aggregator, child)?;
            }
        }
    }
    Ok(())
}

/// Result of splitting an aggregator
#[derive(Debug, Clone)]
pub struct SplitAggregation {
    /// Aggregator to run on every destination, source not yet set
    pub partial: Aggregator,
    /// Replacement aggregates for the central aggregator, reading the
    /// partial outputs
    pub combined: Vec<Aggr>,
}

/// Split `original` into partial and combining halves.
///
/// | aggregate        | partial                | combined         |
/// |------------------|------------------------|------------------|
/// | count, count(*)  | same                   | sum of counts    |
/// | sum, min, max    | same                   | same             |
/// | avg(x)           | sum(x), count(x)       | sum / count      |
/// | f(distinct x)    | x joins the grouping   | f(distinct x)    |
pub fn split_aggregator(original: &Aggregator) -> PlannerResult<SplitAggregation> {
    let mut grouping: Vec<GroupBy> = original
        .grouping
        .iter()
        .map(|g| GroupBy::new(g.expr.clone()))
        .collect();
    let mut partials: Vec<Aggr> = Vec::new();
    let mut combined = Vec::with_capacity(original.aggregates.len());
    let mut distinct_argument: Option<Expression> = None;

    let mut add_partial = |expr: Expression, opcode: AggregateOpcode, inputs: Vec<Expression>| {
        if !partials.iter().any(|p| p.expr == expr) {
            partials.push(Aggr {
                expr: expr.clone(),
                alias: None,
                opcode,
                inputs,
                input_offsets: vec![],
            });
        }
        expr
    };

    for aggr in &original.aggregates {
        let (opcode, inputs) = match aggr.opcode {
            AggregateOpcode::Count | AggregateOpcode::CountStar => {
                let partial = add_partial(aggr.expr.clone(), aggr.opcode, aggr.inputs.clone());
                (AggregateOpcode::SumCount, vec![partial])
            }
            AggregateOpcode::Sum
            | AggregateOpcode::Min
            | AggregateOpcode::Max
            | AggregateOpcode::AnyValue => {
                let partial = add_partial(aggr.expr.clone(), aggr.opcode, aggr.inputs.clone());
                (aggr.opcode, vec![partial])
            }
            AggregateOpcode::Avg => {
                let argument = single_input(aggr)?;
                let sum = add_partial(
                    aggregate(AggregateFunction::Sum, argument.clone()),
                    AggregateOpcode::Sum,
                    vec![argument.clone()],
                );
                let count = add_partial(
                    aggregate(AggregateFunction::Count, argument.clone()),
                    AggregateOpcode::Count,
                    vec![argument],
                );
                (AggregateOpcode::AvgOfPartials, vec![sum, count])
            }
            AggregateOpcode::CountDistinct | AggregateOpcode::SumDistinct => {
                let argument = single_input(aggr)?;
                match &distinct_argument {
                    Some(existing) if *existing != argument => {
                        return Err(unsupported_err!(
                            "distinct aggregates over more than one expression ({} and {})",
                            existing,
                            argument
                        ))
                    }
                    Some(_) => {}
                    None => {
                        if !grouping.iter().any(|g| g.expr == argument) {
                            grouping.push(GroupBy::new(argument.clone()));
                        }
                        distinct_argument = Some(argument.clone());
                    }
                }
                (aggr.opcode, vec![argument])
            }
            AggregateOpcode::SumCount | AggregateOpcode::AvgOfPartials => {
                return Err(internal_err!("aggregate {} was already split", aggr.expr))
            }
        };
        combined.push(Aggr {
            expr: aggr.expr.clone(),
            alias: aggr.alias.clone(),
            opcode,
            inputs,
            input_offsets: vec![],
        });
    }

    let mut outputs: Vec<Expression> = grouping.iter().map(|g| g.expr.clone()).collect();
    outputs.extend(partials.iter().map(|p| p.expr.clone()));
    Ok(SplitAggregation {
        partial: Aggregator {
            source: original.source,
            grouping,
            aggregates: partials,
            outputs,
            original: false,
            delegated: true,
            pushed: false,
        },
        combined,
    })
}

fn single_input(aggr: &Aggr) -> PlannerResult<Expression> {
    match aggr.inputs.as_slice() {
        [input] => Ok(input.clone()),
        _ => Err(internal_err!(
            "{} expects one argument, has {}",
            aggr.expr,
            aggr.inputs.len()
        )),
    }
}
