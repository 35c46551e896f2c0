//! Pushdown Rules
//!
//! Rewrite rules run bottom-up over the central part of the plan until
//! nothing changes. Each rule looks at one operator and either leaves it
//! alone or moves work into the route below it, merges routes, or expands
//! an unplanned horizon into concrete operators.

use crate::common::error::PlannerResult;
use crate::expression::predicates::split_conjuncts;
use crate::parser::ast::{Expression, SelectItem};
use crate::planner::aggregation::{aggregator_for, split_aggregator};
use crate::planner::columns::{bind_outer_columns, filters_groups};
use crate::planner::context::PlanningContext;
use crate::planner::logical_plan::*;
use crate::planner::merge::{try_merge_join, try_merge_union};
use crate::planner::rewrite::Rewritten;
use crate::planner::routing::Routing;
use crate::{internal_err, unsupported_err};
use tracing::trace;

/// A local rewrite of the operator at one slot
pub trait RewriteRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(
        &self,
        arena: &mut PlanArena,
        id: OpId,
        ctx: &PlanningContext<'_>,
    ) -> PlannerResult<Rewritten>;
}

/// The rules every phase runs to a fixed point
pub struct RuleSet {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        let mut rules: Vec<Box<dyn RewriteRule>> = Vec::new();

        // Order matters: routes absorb filters before they are merged
        rules.push(Box::new(FilterIntoRoute));
        rules.push(Box::new(MergeJoin));
        rules.push(Box::new(MergeUnion));
        rules.push(Box::new(PushHorizon)); // may ask for a revisit
        rules.push(Box::new(PushProjection));
        rules.push(Box::new(PushAggregation));
        rules.push(Box::new(PushOrdering));
        rules.push(Box::new(PushLimit));
        rules.push(Box::new(PushDistinct));

        Self { rules }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Run every rule on the operator at `id`. Later rules see what earlier
    /// ones produced; a revisit request ends the round.
    pub fn apply(
        &self,
        arena: &mut PlanArena,
        id: OpId,
        ctx: &PlanningContext<'_>,
    ) -> PlannerResult<Rewritten> {
        let mut result = Rewritten::Same;
        for rule in &self.rules {
            match rule.apply(arena, id, ctx)? {
                Rewritten::Same => {}
                Rewritten::Changed => {
                    trace!(rule = rule.name(), node = %id, "rule fired");
                    result = Rewritten::Changed;
                }
                Rewritten::Revisit => {
                    trace!(rule = rule.name(), node = %id, "rule fired, revisiting");
                    return Ok(Rewritten::Revisit);
                }
            }
        }
        Ok(result)
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new()
    }
}

fn never(_: &Operator) -> bool {
    false
}

fn row_order_only(op: &Operator) -> bool {
    matches!(
        op,
        Operator::Limit(_) | Operator::Ordering(_) | Operator::Distinct(_)
    )
}

/// Slot inside `route` a new operator goes above: the interior top, or
/// deeper while `descend` accepts the operator found there
fn interior_slot(
    arena: &PlanArena,
    route: OpId,
    descend: impl Fn(&Operator) -> bool,
) -> PlannerResult<OpId> {
    let mut at = arena.route(route)?.source;
    loop {
        let op = arena.get(at)?;
        if !descend(op) {
            return Ok(at);
        }
        at = op
            .source()
            .ok_or_else(|| internal_err!("{} at {} has no source", op.name(), at))?;
    }
}

/// Put the unary `op` directly above the operator at `at`
fn insert_above(arena: &mut PlanArena, at: OpId, mut op: Operator) -> PlannerResult<()> {
    let inner = arena.take(at)?;
    let inner_id = arena.add(inner);
    op.set_source(inner_id)?;
    arena.replace(at, op)
}

/// Move the operator at `id` into the route that is its source. The route
/// takes over slot `id`.
fn push_into_route(
    arena: &mut PlanArena,
    id: OpId,
    descend: impl Fn(&Operator) -> bool,
) -> PlannerResult<()> {
    let route = arena
        .get(id)?
        .source()
        .ok_or_else(|| internal_err!("operator {} has no source route", id))?;
    let at = interior_slot(arena, route, descend)?;
    let op = arena.take(id)?;
    insert_above(arena, at, op)?;
    arena.relocate(route, id)
}

fn source_route(arena: &PlanArena, id: OpId) -> PlannerResult<Option<(OpId, &Route)>> {
    let source = match arena.get(id)?.source() {
        Some(source) => source,
        None => return Ok(None),
    };
    Ok(match arena.get(source)? {
        Operator::Route(route) => Some((source, route)),
        _ => None,
    })
}

/// A filter directly above a route moves inside it. Predicates reaching
/// the FROM level also refine the route's destinations.
pub struct FilterIntoRoute;

impl RewriteRule for FilterIntoRoute {
    fn name(&self) -> &'static str {
        "filter_into_route"
    }

    fn apply(
        &self,
        arena: &mut PlanArena,
        id: OpId,
        ctx: &PlanningContext<'_>,
    ) -> PlannerResult<Rewritten> {
        let predicates = match arena.get(id)? {
            Operator::Filter(filter) => filter.predicates.clone(),
            _ => return Ok(Rewritten::Same),
        };
        let route = match source_route(arena, id)? {
            Some((route, _)) => route,
            None => return Ok(Rewritten::Same),
        };
        let at = interior_slot(arena, route, |op| match op {
            Operator::Ordering(_) | Operator::Distinct(_) => true,
            Operator::Projection(p) => p.derived.is_none(),
            _ => false,
        })?;
        let refines_routing = match arena.get(at)? {
            // rows past a LIMIT or of a whole union/select cannot be
            // filtered by the database without changing the result
            Operator::Limit(_) | Operator::Union(_) => return Ok(Rewritten::Same),
            Operator::Horizon(h) if h.derived.is_none() => return Ok(Rewritten::Same),
            Operator::Aggregator(_) => false,
            Operator::Filter(f) => !filters_groups(arena, f.source)?,
            _ => true,
        };

        if refines_routing {
            let evaluator = ctx.evaluator();
            if let Operator::Route(route) = arena.get_mut(route)? {
                for predicate in &predicates {
                    route.routing.update(predicate, &evaluator);
                }
                route.routing.improve(ctx.config, &evaluator);
            }
        }
        if let Operator::Filter(existing) = arena.get_mut(at)? {
            existing.predicates.extend(predicates);
        } else {
            insert_above(arena, at, Operator::Filter(Filter::new(at, predicates)))?;
        }
        arena.relocate(route, id)?;
        Ok(Rewritten::Changed)
    }
}

/// A join of two routes becomes one route when the routings merge, and an
/// apply join otherwise
pub struct MergeJoin;

impl MergeJoin {
    fn apply_join(
        arena: &mut PlanArena,
        id: OpId,
        join: Join,
        predicates: Vec<Expression>,
        ctx: &PlanningContext<'_>,
    ) -> PlannerResult<()> {
        let (mut lhs, mut rhs) = (join.lhs, join.rhs);
        let lhs_tables = arena.table_ids(lhs)?;
        let correlated = predicates
            .iter()
            .any(|p| ctx.semantics.dependencies(p).overlaps(lhs_tables));
        if correlated && arena.has_central_limit(rhs)? {
            if join.left_join || arena.has_central_limit(lhs)? {
                return Err(unsupported_err!(
                    "join whose inner side has a LIMIT and depends on the outer row"
                ));
            }
            std::mem::swap(&mut lhs, &mut rhs);
        }

        let outer = arena.table_ids(lhs)?;
        let mut vars = Vec::new();
        let mut probe = Vec::with_capacity(predicates.len());
        for predicate in &predicates {
            probe.push(bind_outer_columns(arena, &mut vars, predicate, outer)?);
        }
        if !probe.is_empty() {
            arena.wrap(rhs, |source| Operator::Filter(Filter::new(source, probe)))?;
        }
        arena.replace(
            id,
            Operator::ApplyJoin(ApplyJoin {
                lhs,
                rhs,
                left_join: join.left_join,
                predicate: join.predicate,
                vars,
                columns: vec![],
            }),
        )
    }
}

impl RewriteRule for MergeJoin {
    fn name(&self) -> &'static str {
        "merge_join"
    }

    fn apply(
        &self,
        arena: &mut PlanArena,
        id: OpId,
        ctx: &PlanningContext<'_>,
    ) -> PlannerResult<Rewritten> {
        let join = match arena.get(id)? {
            Operator::Join(join) => join.clone(),
            _ => return Ok(Rewritten::Same),
        };
        let predicates = join
            .predicate
            .as_ref()
            .map(split_conjuncts)
            .unwrap_or_default();

        let merged = match (arena.get(join.lhs)?, arena.get(join.rhs)?) {
            (Operator::Route(l), Operator::Route(r)) => {
                try_merge_join(&l.routing, &r.routing, &predicates, join.left_join)
                    .map(|routing| (routing, l.source, r.source))
            }
            _ => None,
        };
        match merged {
            Some((routing, lhs, rhs)) => {
                arena.take(join.lhs)?;
                arena.take(join.rhs)?;
                let interior = arena.add(Operator::Join(Join {
                    lhs,
                    rhs,
                    predicate: join.predicate,
                    left_join: join.left_join,
                }));
                arena.replace(id, Operator::Route(Route::new(interior, routing)))?;
            }
            None => Self::apply_join(arena, id, join, predicates, ctx)?,
        }
        Ok(Rewritten::Changed)
    }
}

/// Adjacent union inputs whose routes reach the same destinations share
/// one route
pub struct MergeUnion;

impl RewriteRule for MergeUnion {
    fn name(&self) -> &'static str {
        "merge_union"
    }

    fn apply(
        &self,
        arena: &mut PlanArena,
        id: OpId,
        _ctx: &PlanningContext<'_>,
    ) -> PlannerResult<Rewritten> {
        let union = match arena.get(id)? {
            Operator::Union(union) => union.clone(),
            _ => return Ok(Rewritten::Same),
        };

        // (slot, merged routing and interiors when the input is a route)
        let mut groups: Vec<(OpId, Option<(Routing, Vec<OpId>)>)> = Vec::new();
        let mut absorbed = Vec::new();
        for input in &union.inputs {
            let route = match arena.get(*input)? {
                Operator::Route(route) => Some((route.routing.clone(), route.source)),
                _ => None,
            };
            let (routing, interior) = match route {
                Some(route) => route,
                None => {
                    groups.push((*input, None));
                    continue;
                }
            };
            if let Some((_, Some((current, interiors)))) = groups.last_mut() {
                if let Some(merged) = try_merge_union(current, &routing) {
                    // a distinct union spread over several destinations
                    // still needs a central pass to remove duplicates
                    if !union.distinct || merged.is_single() {
                        *current = merged;
                        interiors.push(interior);
                        absorbed.push(*input);
                        continue;
                    }
                }
            }
            groups.push((*input, Some((routing, vec![interior]))));
        }
        if absorbed.is_empty() {
            return Ok(Rewritten::Same);
        }

        for slot in absorbed {
            arena.take(slot)?;
        }
        let mut inputs = Vec::with_capacity(groups.len());
        for (slot, group) in groups {
            if let Some((routing, interiors)) = group {
                if interiors.len() > 1 {
                    let interior = arena.add(Operator::Union(Union {
                        inputs: interiors,
                        distinct: union.distinct,
                        columns: union.columns.clone(),
                    }));
                    arena.replace(slot, Operator::Route(Route::new(interior, routing)))?;
                }
            }
            inputs.push(slot);
        }

        if let [only] = inputs.as_slice() {
            arena.relocate(*only, id)?;
        } else if let Operator::Union(u) = arena.get_mut(id)? {
            u.inputs = inputs;
        }
        Ok(Rewritten::Changed)
    }
}

/// Plans the clauses of a SELECT: the whole horizon goes into a route that
/// can answer it alone, otherwise it is expanded into aggregation, having
/// filter, projection, distinct, ordering and limit operators
pub struct PushHorizon;

impl PushHorizon {
    fn expand_star(horizon: &Horizon, ctx: &PlanningContext<'_>) -> PlannerResult<Horizon> {
        let mut expanded = horizon.clone();
        expanded.select.select_list.clear();
        for item in &horizon.select.select_list {
            let qualifier = match item {
                SelectItem::Expression { .. } => {
                    expanded.select.select_list.push(item.clone());
                    continue;
                }
                SelectItem::Wildcard => None,
                SelectItem::QualifiedWildcard(table) => Some(table.as_str()),
            };
            let columns = ctx
                .semantics
                .expand_star(&horizon.scope, qualifier)
                .ok_or_else(|| {
                    unsupported_err!(
                        "'*' over tables without an authoritative column list needs a single-destination route"
                    )
                })?;
            for (expr, name) in columns {
                let alias = (expr.output_name() != name).then_some(name);
                expanded
                    .select
                    .select_list
                    .push(SelectItem::Expression { expr, alias });
            }
        }
        Ok(expanded)
    }

    fn expand(arena: &mut PlanArena, id: OpId, horizon: Horizon) -> PlannerResult<()> {
        let select = &horizon.select;
        let mut top = horizon.source;
        if select.has_aggregation() {
            let aggregator = aggregator_for(select, top)?;
            top = arena.add(Operator::Aggregator(aggregator));
        }
        if let Some(having) = &select.having {
            top = arena.add(Operator::Filter(Filter::new(top, split_conjuncts(having))));
        }

        let mut columns = Vec::with_capacity(select.select_list.len());
        for item in &select.select_list {
            match item {
                SelectItem::Expression { expr, .. } => {
                    columns.push(ProjColumn::new(item.output_name(), expr.clone()))
                }
                _ => return Err(internal_err!("'*' left in an expanded horizon")),
            }
        }
        let visible: Vec<ProjColumn> = columns.clone();
        for order in &select.order_by {
            // sorted on but not selected
            if !columns.iter().any(|c| c.expr == order.expression) {
                columns.push(ProjColumn::new(
                    order.expression.output_name(),
                    order.expression.clone(),
                ));
            }
        }
        top = arena.add(Operator::Projection(Projection {
            source: top,
            columns,
            derived: None,
        }));

        if select.distinct {
            top = arena.add(Operator::Distinct(Distinct {
                column_count: Some(visible.len()),
                ..Distinct::new(top)
            }));
        }
        if !select.order_by.is_empty() {
            top = arena.add(Operator::Ordering(Ordering {
                source: top,
                keys: select.order_by.iter().map(RouteOrdering::new).collect(),
                pushed: false,
            }));
        }
        if let Some(limit) = &select.limit {
            top = arena.add(Operator::Limit(Limit {
                source: top,
                count: limit.limit,
                offset: limit.offset,
                pushed: false,
            }));
        }
        if let Some(derived) = horizon.derived {
            top = arena.add(Operator::Projection(Projection {
                source: top,
                columns: visible,
                derived: Some(derived),
            }));
        }
        arena.relocate(top, id)
    }
}

impl RewriteRule for PushHorizon {
    fn name(&self) -> &'static str {
        "push_horizon"
    }

    fn apply(
        &self,
        arena: &mut PlanArena,
        id: OpId,
        ctx: &PlanningContext<'_>,
    ) -> PlannerResult<Rewritten> {
        let horizon = match arena.get(id)? {
            Operator::Horizon(horizon) => horizon.clone(),
            _ => return Ok(Rewritten::Same),
        };
        let select = &horizon.select;

        if let Some((_, route)) = source_route(arena, id)? {
            let aggregated = select.has_aggregation();
            let row_sensitive = aggregated
                || select.distinct
                || !select.order_by.is_empty()
                || select.limit.is_some();
            // every group lives on one destination
            let grouped_by_keys = aggregated
                && !select.group_by.is_empty()
                && !select.distinct
                && select.order_by.is_empty()
                && select.limit.is_none()
                && route.routing.covers_keys(&select.group_by);
            // a scalar aggregate owes one row even when no destination answers
            let scalar_over_nothing =
                aggregated && select.group_by.is_empty() && route.routing.reaches_nothing();
            if (route.routing.is_single() && !scalar_over_nothing) || !row_sensitive || grouped_by_keys {
                push_into_route(arena, id, never)?;
                return Ok(Rewritten::Changed);
            }
        }

        if select.has_wildcard() {
            let expanded = Self::expand_star(&horizon, ctx)?;
            arena.replace(id, Operator::Horizon(expanded))?;
            return Ok(Rewritten::Revisit);
        }
        Self::expand(arena, id, horizon)?;
        Ok(Rewritten::Changed)
    }
}

/// Projections are always computed by the database when possible
pub struct PushProjection;

impl RewriteRule for PushProjection {
    fn name(&self) -> &'static str {
        "push_projection"
    }

    fn apply(
        &self,
        arena: &mut PlanArena,
        id: OpId,
        _ctx: &PlanningContext<'_>,
    ) -> PlannerResult<Rewritten> {
        let derived = match arena.get(id)? {
            Operator::Projection(projection) => projection.derived.is_some(),
            _ => return Ok(Rewritten::Same),
        };
        if source_route(arena, id)?.is_none() {
            return Ok(Rewritten::Same);
        }
        if derived {
            push_into_route(arena, id, never)?;
        } else {
            push_into_route(arena, id, row_order_only)?;
        }
        Ok(Rewritten::Changed)
    }
}

/// Aggregation goes into the route whole when groups do not span
/// destinations; otherwise a partial aggregation is pushed and the central
/// aggregator combines the partial results
pub struct PushAggregation;

impl RewriteRule for PushAggregation {
    fn name(&self) -> &'static str {
        "push_aggregation"
    }

    fn apply(
        &self,
        arena: &mut PlanArena,
        id: OpId,
        _ctx: &PlanningContext<'_>,
    ) -> PlannerResult<Rewritten> {
        let aggregator = match arena.get(id)? {
            Operator::Aggregator(a) if a.original && a.delegated && !a.pushed => a.clone(),
            _ => return Ok(Rewritten::Same),
        };
        let route = match source_route(arena, id)? {
            Some((route_id, route)) => {
                let grouping: Vec<Expression> =
                    aggregator.grouping.iter().map(|g| g.expr.clone()).collect();
                let whole = if grouping.is_empty() {
                    route.routing.is_single() && !route.routing.reaches_nothing()
                } else {
                    route.routing.is_single() || route.routing.covers_keys(&grouping)
                };
                if whole {
                    push_into_route(arena, id, never)?;
                    return Ok(Rewritten::Changed);
                }
                route_id
            }
            None => return Ok(Rewritten::Same),
        };

        let split = split_aggregator(&aggregator)?;
        let at = interior_slot(arena, route, never)?;
        insert_above(arena, at, Operator::Aggregator(split.partial))?;
        if let Operator::Aggregator(central) = arena.get_mut(id)? {
            central.aggregates = split.combined;
            central.pushed = true;
        }
        Ok(Rewritten::Changed)
    }
}

/// Sorting goes into a single-destination route; over several
/// destinations each sorts its rows and the central ordering merges them.
/// An ordering on outer columns only moves below an apply join.
pub struct PushOrdering;

impl RewriteRule for PushOrdering {
    fn name(&self) -> &'static str {
        "push_ordering"
    }

    fn apply(
        &self,
        arena: &mut PlanArena,
        id: OpId,
        ctx: &PlanningContext<'_>,
    ) -> PlannerResult<Rewritten> {
        let ordering = match arena.get(id)? {
            Operator::Ordering(ordering) => ordering.clone(),
            _ => return Ok(Rewritten::Same),
        };
        match arena.get(ordering.source)? {
            Operator::Route(route) => {
                if route.routing.is_single() {
                    push_into_route(arena, id, never)?;
                    return Ok(Rewritten::Changed);
                }
                if ordering.pushed {
                    return Ok(Rewritten::Same);
                }
                let copy = Operator::Ordering(Ordering {
                    source: ordering.source,
                    keys: ordering
                        .keys
                        .iter()
                        .map(|k| RouteOrdering {
                            offset: None,
                            ws_offset: None,
                            ..k.clone()
                        })
                        .collect(),
                    pushed: false,
                });
                let at = interior_slot(arena, ordering.source, never)?;
                insert_above(arena, at, copy)?;
                if let Operator::Ordering(central) = arena.get_mut(id)? {
                    central.pushed = true;
                }
                Ok(Rewritten::Changed)
            }
            Operator::ApplyJoin(join) if !ordering.pushed => {
                let lhs = join.lhs;
                let outer = arena.table_ids(lhs)?;
                let outer_only = ordering
                    .keys
                    .iter()
                    .all(|k| ctx.semantics.dependencies(&k.expr).is_subset_of(outer));
                if !outer_only {
                    return Ok(Rewritten::Same);
                }
                let join_slot = ordering.source;
                let moved = arena.add(Operator::Ordering(Ordering {
                    source: lhs,
                    ..ordering
                }));
                if let Operator::ApplyJoin(join) = arena.get_mut(join_slot)? {
                    join.lhs = moved;
                }
                arena.relocate(join_slot, id)?;
                Ok(Rewritten::Changed)
            }
            _ => Ok(Rewritten::Same),
        }
    }
}

/// LIMIT goes into a single-destination route; over several destinations
/// each returns at most `count + offset` rows, sorted first when the
/// central ordering merges pre-sorted streams
pub struct PushLimit;

impl RewriteRule for PushLimit {
    fn name(&self) -> &'static str {
        "push_limit"
    }

    fn apply(
        &self,
        arena: &mut PlanArena,
        id: OpId,
        _ctx: &PlanningContext<'_>,
    ) -> PlannerResult<Rewritten> {
        let limit = match arena.get(id)? {
            Operator::Limit(limit) => limit.clone(),
            _ => return Ok(Rewritten::Same),
        };
        let route = match arena.get(limit.source)? {
            Operator::Route(route) => {
                if route.routing.is_single() {
                    push_into_route(arena, id, never)?;
                    return Ok(Rewritten::Changed);
                }
                limit.source
            }
            Operator::Ordering(ordering) if ordering.pushed => match arena.get(ordering.source)? {
                Operator::Route(_) => ordering.source,
                _ => return Ok(Rewritten::Same),
            },
            _ => return Ok(Rewritten::Same),
        };
        if limit.pushed {
            return Ok(Rewritten::Same);
        }

        let copy = Operator::Limit(Limit {
            source: route,
            count: limit.count.saturating_add(limit.offset.unwrap_or(0)),
            offset: None,
            pushed: false,
        });
        let at = interior_slot(arena, route, never)?;
        insert_above(arena, at, copy)?;
        if let Operator::Limit(central) = arena.get_mut(id)? {
            central.pushed = true;
        }
        Ok(Rewritten::Changed)
    }
}

/// DISTINCT goes into a single-destination route; over several
/// destinations each removes its own duplicates first
pub struct PushDistinct;

impl RewriteRule for PushDistinct {
    fn name(&self) -> &'static str {
        "push_distinct"
    }

    fn apply(
        &self,
        arena: &mut PlanArena,
        id: OpId,
        _ctx: &PlanningContext<'_>,
    ) -> PlannerResult<Rewritten> {
        let distinct = match arena.get(id)? {
            Operator::Distinct(distinct) => distinct.clone(),
            _ => return Ok(Rewritten::Same),
        };
        let route = match source_route(arena, id)? {
            Some((route_id, route)) => {
                if route.routing.is_single() {
                    push_into_route(arena, id, never)?;
                    return Ok(Rewritten::Changed);
                }
                route_id
            }
            None => return Ok(Rewritten::Same),
        };
        if distinct.pushed {
            return Ok(Rewritten::Same);
        }

        let at = interior_slot(arena, route, never)?;
        let absorbs = match arena.get(at)? {
            Operator::Union(_) => true,
            Operator::Horizon(h) => h.derived.is_none(),
            _ => false,
        };
        if absorbs {
            match arena.get_mut(at)? {
                Operator::Union(union) => union.distinct = true,
                Operator::Horizon(horizon) => horizon.select.distinct = true,
                _ => {}
            }
        } else {
            insert_above(
                arena,
                at,
                Operator::Distinct(Distinct {
                    column_count: distinct.column_count,
                    ..Distinct::new(at)
                }),
            )?;
        }
        if let Operator::Distinct(central) = arena.get_mut(id)? {
            central.pushed = true;
        }
        Ok(Rewritten::Changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::PlannerConfig;
    use crate::expression::evaluator::BindVars;
    use crate::planner::binder::SemanticTable;

    fn table(arena: &mut PlanArena) -> OpId {
        arena.add(Operator::Table(Table {
            table_id: 0,
            name: "t".to_string(),
            alias: "t".to_string(),
        }))
    }

    #[test]
    fn test_rule_order() {
        assert_eq!(
            RuleSet::new().names(),
            vec![
                "filter_into_route",
                "merge_join",
                "merge_union",
                "push_horizon",
                "push_projection",
                "push_aggregation",
                "push_ordering",
                "push_limit",
                "push_distinct"
            ]
        );
    }

    #[test]
    fn test_limit_into_single_route_takes_its_slot() -> PlannerResult<()> {
        let config = PlannerConfig::default();
        let semantics = SemanticTable::default();
        let vars = BindVars::new();
        let ctx = PlanningContext::new(&config, &semantics, &vars);

        let mut arena = PlanArena::new();
        let t = table(&mut arena);
        let route = arena.add(Operator::Route(Route::new(t, Routing::Dual)));
        let limit = arena.add(Operator::Limit(Limit {
            source: route,
            count: 5,
            offset: None,
            pushed: false,
        }));

        assert_eq!(PushLimit.apply(&mut arena, limit, &ctx)?, Rewritten::Changed);
        // the route now sits in the limit's slot, the limit inside it
        let interior = arena.route(limit)?.source;
        assert_eq!(arena.get(interior)?.name(), "Limit");
        assert_eq!(arena.get(interior)?.inputs().len(), 1);
        assert!(arena.get(route).is_err());
        Ok(())
    }

    #[test]
    fn test_insert_above_keeps_parent_links() -> PlannerResult<()> {
        let mut arena = PlanArena::new();
        let t = table(&mut arena);
        let route = arena.add(Operator::Route(Route::new(t, Routing::Dual)));
        insert_above(&mut arena, t, Operator::Filter(Filter::new(t, vec![])))?;
        assert_eq!(arena.route(route)?.source, t);
        assert_eq!(arena.get(t)?.name(), "Filter");
        Ok(())
    }
}
