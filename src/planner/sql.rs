//! Route query generation
//!
//! A route's interior is turned back into a statement tree and rendered as
//! SQL. Clauses are collected top-down in canonical SELECT order; anything
//! that cannot be expressed in one SELECT at its position becomes a derived
//! table. Physical sub-table names are substituted per destination.

use crate::common::error::PlannerResult;
use crate::expression::predicates::{and_all, split_conjuncts};
use crate::internal_err;
use crate::parser::ast::*;
use crate::planner::columns::filters_groups;
use crate::planner::logical_plan::{AggregateOpcode, Aggregator, OpId, Operator, PlanArena, ProjColumn};
use crate::planner::logical_plan::Union as UnionOp;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Clause levels, outermost first
const LIMIT: u8 = 7;
const ORDER: u8 = 6;
const DISTINCT: u8 = 5;
const SELECT: u8 = 4;
const HAVING: u8 = 3;
const GROUP: u8 = 2;
const FROM: u8 = 1;

/// SQL for the route at `route`. `tables` maps table ids to the physical
/// names to use; tables not in the map keep their logical name.
pub fn route_query(
    arena: &PlanArena,
    route: OpId,
    tables: &BTreeMap<usize, String>,
) -> PlannerResult<String> {
    let interior = arena.route(route)?.source;
    let query = StatementBuilder { arena }.query(interior)?;
    let mut out = String::new();
    SqlWriter { tables }.query(&query, &mut out);
    Ok(out)
}

/// Fill in the query template of every route under `root`
pub fn generate_queries(arena: &mut PlanArena, root: OpId) -> PlannerResult<()> {
    let empty = BTreeMap::new();
    for id in arena.routes(root)? {
        let query = route_query(arena, id, &empty)?;
        if let Operator::Route(route) = arena.get_mut(id)? {
            route.query = Some(query);
        }
    }
    Ok(())
}

/// Query sent to one destination of a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationQuery {
    pub shard: String,
    pub sql: String,
}

/// Queries for every destination of the route at `id`, with split tables
/// replaced by their physical sub-tables
pub fn destination_queries(arena: &PlanArena, id: OpId) -> PlannerResult<Vec<DestinationQuery>> {
    let route = arena.route(id)?;
    route
        .routing
        .destinations()
        .into_iter()
        .map(|destination| {
            Ok(DestinationQuery {
                sql: route_query(arena, id, &destination.tables)?,
                shard: destination.shard,
            })
        })
        .collect()
}

struct StatementBuilder<'a> {
    arena: &'a PlanArena,
}

impl StatementBuilder<'_> {
    fn query(&self, id: OpId) -> PlannerResult<Query> {
        let mut order_by = Vec::new();
        let mut limit = None;
        let mut cur = id;
        loop {
            match self.arena.get(cur)? {
                Operator::Limit(l) if limit.is_none() && order_by.is_empty() => {
                    limit = Some(LimitClause {
                        limit: l.count,
                        offset: l.offset,
                    });
                    cur = l.source;
                }
                Operator::Ordering(o) if order_by.is_empty() => {
                    order_by = o.keys.iter().map(|k| k.order_by()).collect();
                    cur = o.source;
                }
                Operator::Union(union) => return self.union(union, order_by, limit),
                _ => break,
            }
        }
        Ok(Query::Select(Box::new(self.select(id, false)?)))
    }

    fn union(
        &self,
        union: &UnionOp,
        order_by: Vec<OrderByExpression>,
        limit: Option<LimitClause>,
    ) -> PlannerResult<Query> {
        let mut parts = union.inputs.iter();
        let first = parts
            .next()
            .ok_or_else(|| internal_err!("union without inputs"))?;
        let mut query = self.query(*first)?;
        for part in parts {
            query = Query::Union(Box::new(UnionStatement {
                left: query,
                right: self.query(*part)?,
                distinct: union.distinct,
                order_by: vec![],
                limit: None,
            }));
        }
        match &mut query {
            Query::Union(top) => {
                top.order_by = order_by;
                top.limit = limit;
            }
            Query::Select(_) if !order_by.is_empty() || limit.is_some() => {
                return Err(internal_err!("ordering a union with a single input"))
            }
            Query::Select(_) => {}
        }
        Ok(query)
    }

    /// One SELECT starting at `id`. With `derived`, a derived projection or
    /// horizon at the top is this SELECT instead of a table in its FROM.
    fn select(&self, id: OpId, derived: bool) -> PlannerResult<SelectStatement> {
        let mut select = SelectStatement::default();
        let mut where_clause = Vec::new();
        let mut level = LIMIT + 1;
        let mut cur = id;
        loop {
            let top = cur == id && derived;
            match self.arena.get(cur)? {
                Operator::Limit(l) if level > LIMIT => {
                    select.limit = Some(LimitClause {
                        limit: l.count,
                        offset: l.offset,
                    });
                    level = LIMIT;
                    cur = l.source;
                }
                Operator::Ordering(o) if level > ORDER => {
                    select.order_by = o.keys.iter().map(|k| k.order_by()).collect();
                    level = ORDER;
                    cur = o.source;
                }
                Operator::Distinct(d) if level > DISTINCT => {
                    select.distinct = true;
                    level = DISTINCT;
                    cur = d.source;
                }
                Operator::Projection(p) if level > SELECT && (p.derived.is_none() || top) => {
                    let named = p.derived.is_some();
                    select.select_list = p.columns.iter().map(|c| select_item(c, named)).collect();
                    level = SELECT;
                    cur = p.source;
                }
                Operator::Filter(f) if level > GROUP && filters_groups(self.arena, f.source)? => {
                    let existing = select.having.take();
                    select.having = and_all(existing.into_iter().chain(f.predicates.iter().cloned()));
                    level = HAVING;
                    cur = f.source;
                }
                Operator::Aggregator(a) if level > GROUP => {
                    select.group_by = a.grouping.iter().map(|g| g.expr.clone()).collect();
                    if level > SELECT {
                        select.select_list = aggregate_items(a);
                    }
                    level = GROUP;
                    cur = a.source;
                }
                Operator::Horizon(h) if level > GROUP && (h.derived.is_none() || top) => {
                    let clauses = &h.select;
                    if level > SELECT {
                        select.select_list = clauses.select_list.clone();
                    }
                    if level > DISTINCT {
                        select.distinct = clauses.distinct;
                    } else {
                        select.distinct |= clauses.distinct;
                    }
                    if level > ORDER {
                        select.order_by = clauses.order_by.clone();
                    }
                    if level > LIMIT {
                        select.limit = clauses.limit;
                    }
                    select.group_by = clauses.group_by.clone();
                    select.having = and_all(select.having.take().into_iter().chain(clauses.having.clone()));
                    level = FROM;
                    cur = h.source;
                }
                _ => {
                    select.from = vec![self.from_item(cur, &mut where_clause)?];
                    break;
                }
            }
        }
        select.where_clause = and_all(where_clause);
        if select.select_list.is_empty() {
            select.select_list.push(SelectItem::Expression {
                expr: Expression::Literal(crate::types::Value::Integer(1)),
                alias: None,
            });
        }
        Ok(select)
    }

    /// A table expression; WHERE predicates met on the way go to `filters`
    fn from_item(&self, id: OpId, filters: &mut Vec<Expression>) -> PlannerResult<TableReference> {
        let op = self.arena.get(id)?;
        match op {
            Operator::Filter(f) => {
                filters.extend(f.predicates.iter().cloned());
                self.from_item(f.source, filters)
            }
            Operator::Table(t) => Ok(TableReference::Table {
                name: t.name.clone(),
                alias: (t.alias != t.name).then(|| t.alias.clone()),
                binding: Some(t.table_id),
            }),
            Operator::Join(j) => {
                let left = self.from_item(j.lhs, filters)?;
                let mut on = Vec::new();
                let right = if j.left_join {
                    self.from_item(j.rhs, &mut on)?
                } else {
                    self.from_item(j.rhs, filters)?
                };
                on.extend(j.predicate.iter().flat_map(split_conjuncts));

                // DUAL has no columns to join on
                if is_dual(&right) {
                    if !j.left_join {
                        filters.extend(on);
                    }
                    return Ok(left);
                }
                if is_dual(&left) && !j.left_join {
                    filters.extend(on);
                    return Ok(right);
                }
                Ok(TableReference::Join {
                    left: Box::new(left),
                    right: Box::new(right),
                    join_type: if j.left_join {
                        JoinType::Left
                    } else {
                        JoinType::Inner
                    },
                    condition: and_all(on),
                })
            }
            Operator::Projection(_) | Operator::Horizon(_) => match op.derived() {
                Some(derived) => Ok(TableReference::Derived {
                    subquery: Box::new(Query::Select(Box::new(self.select(id, true)?))),
                    alias: derived.alias.clone(),
                    binding: Some(derived.table_id),
                }),
                None => Err(internal_err!(
                    "{} {} is out of clause order and names no derived table",
                    op.name(),
                    id
                )),
            },
            other => Err(internal_err!(
                "cannot render {} {} inside a FROM clause",
                other.name(),
                id
            )),
        }
    }

}

fn is_dual(table: &TableReference) -> bool {
    matches!(table, TableReference::Table { name, .. } if name == "dual")
}

fn select_item(column: &ProjColumn, named: bool) -> SelectItem {
    let alias = if named || column.alias != column.expr.output_name() {
        Some(column.alias.clone())
    } else {
        None
    };
    SelectItem::Expression {
        expr: column.expr.clone(),
        alias,
    }
}

/// Select list of an aggregator with nothing projected above it
fn aggregate_items(aggregator: &Aggregator) -> Vec<SelectItem> {
    aggregator
        .outputs
        .iter()
        .map(|output| {
            let carried = aggregator.aggregates.iter().any(|a| {
                a.expr == *output
                    && a.opcode == AggregateOpcode::AnyValue
                    && !matches!(output, Expression::Aggregate { .. })
            });
            let expr = if carried {
                Expression::Aggregate {
                    function: AggregateFunction::AnyValue,
                    argument: Some(Box::new(output.clone())),
                    distinct: false,
                }
            } else {
                output.clone()
            };
            SelectItem::Expression { expr, alias: None }
        })
        .collect()
}

struct SqlWriter<'a> {
    tables: &'a BTreeMap<usize, String>,
}

impl SqlWriter<'_> {
    fn query(&self, query: &Query, out: &mut String) {
        match query {
            Query::Select(select) => self.select(select, out),
            Query::Union(union) => {
                self.union_part(&union.left, false, out);
                out.push_str(if union.distinct { " union " } else { " union all " });
                self.union_part(&union.right, true, out);
                self.order_and_limit(&union.order_by, &union.limit, out);
            }
        }
    }

    fn union_part(&self, part: &Query, right: bool, out: &mut String) {
        let parenthesize = match part {
            Query::Select(s) => !s.order_by.is_empty() || s.limit.is_some(),
            Query::Union(u) => right || !u.order_by.is_empty() || u.limit.is_some(),
        };
        if parenthesize {
            out.push('(');
            self.query(part, out);
            out.push(')');
        } else {
            self.query(part, out);
        }
    }

    fn select(&self, select: &SelectStatement, out: &mut String) {
        out.push_str("select ");
        if select.distinct {
            out.push_str("distinct ");
        }
        let items: Vec<String> = select.select_list.iter().map(|i| i.to_string()).collect();
        out.push_str(&items.join(", "));
        if !select.from.is_empty() {
            out.push_str(" from ");
            for (i, table) in select.from.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                self.table(table, out);
            }
        }
        if let Some(predicate) = &select.where_clause {
            let _ = write!(out, " where {}", predicate);
        }
        if !select.group_by.is_empty() {
            let keys: Vec<String> = select.group_by.iter().map(|e| e.to_string()).collect();
            let _ = write!(out, " group by {}", keys.join(", "));
        }
        if let Some(predicate) = &select.having {
            let _ = write!(out, " having {}", predicate);
        }
        self.order_and_limit(&select.order_by, &select.limit, out);
    }

    fn order_and_limit(&self, order_by: &[OrderByExpression], limit: &Option<LimitClause>, out: &mut String) {
        if !order_by.is_empty() {
            let keys: Vec<String> = order_by.iter().map(|o| o.to_string()).collect();
            let _ = write!(out, " order by {}", keys.join(", "));
        }
        if let Some(limit) = limit {
            let _ = write!(out, " limit {}", limit.limit);
            if let Some(offset) = limit.offset {
                let _ = write!(out, " offset {}", offset);
            }
        }
    }

    fn table(&self, table: &TableReference, out: &mut String) {
        match table {
            TableReference::Table {
                name,
                alias,
                binding,
            } => {
                let physical = binding
                    .and_then(|id| self.tables.get(&id))
                    .unwrap_or(name);
                let _ = write!(out, "{}", Ident(physical));
                // columns stay qualified by the logical name
                match alias {
                    Some(alias) => {
                        let _ = write!(out, " as {}", Ident(alias));
                    }
                    None if physical != name => {
                        let _ = write!(out, " as {}", Ident(name));
                    }
                    None => {}
                }
            }
            TableReference::Join {
                left,
                right,
                join_type,
                condition,
            } => {
                self.table(left, out);
                out.push_str(match join_type {
                    JoinType::Left => " left join ",
                    _ => " join ",
                });
                if matches!(right.as_ref(), TableReference::Join { .. }) {
                    out.push('(');
                    self.table(right, out);
                    out.push(')');
                } else {
                    self.table(right, out);
                }
                if let Some(condition) = condition {
                    let _ = write!(out, " on {}", condition);
                }
            }
            TableReference::Derived { subquery, alias, .. } => {
                out.push('(');
                self.query(subquery, out);
                let _ = write!(out, ") as {}", Ident(alias));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::logical_plan::{Filter, Join, Limit, Ordering, Projection, Route, RouteOrdering, Table};
    use crate::planner::routing::Routing;
    use crate::types::Value;
    use pretty_assertions::assert_eq;

    fn col(table: &str, name: &str, id: usize) -> Expression {
        Expression::Column(ColumnName::bound(table, name, id))
    }

    fn table(arena: &mut PlanArena, id: usize, name: &str, alias: &str) -> OpId {
        arena.add(Operator::Table(Table {
            table_id: id,
            name: name.to_string(),
            alias: alias.to_string(),
        }))
    }

    #[test]
    fn test_clauses_render_in_select_order() -> PlannerResult<()> {
        let mut arena = PlanArena::new();
        let t = table(&mut arena, 0, "t", "t");
        let filter = arena.add(Operator::Filter(Filter::new(
            t,
            vec![Expression::eq(col("t", "id", 0), Expression::Literal(Value::Integer(5)))],
        )));
        let projection = arena.add(Operator::Projection(Projection {
            source: filter,
            columns: vec![
                ProjColumn::new("name", col("t", "name", 0)),
                ProjColumn::new("n", col("t", "id", 0)),
            ],
            derived: None,
        }));
        let ordering = arena.add(Operator::Ordering(Ordering {
            source: projection,
            keys: vec![RouteOrdering {
                expr: col("t", "name", 0),
                ascending: false,
                offset: None,
                ws_offset: None,
            }],
            pushed: false,
        }));
        let limit = arena.add(Operator::Limit(Limit {
            source: ordering,
            count: 10,
            offset: None,
            pushed: false,
        }));
        let route = arena.add(Operator::Route(Route::new(limit, Routing::Dual)));

        assert_eq!(
            route_query(&arena, route, &BTreeMap::new())?,
            "select t.name, t.id as n from t where t.id = 5 order by t.name desc limit 10"
        );
        let physical = BTreeMap::from([(0, "t_3".to_string())]);
        assert_eq!(
            route_query(&arena, route, &physical)?,
            "select t.name, t.id as n from t_3 as t where t.id = 5 order by t.name desc limit 10"
        );
        Ok(())
    }

    #[test]
    fn test_left_join_inner_filters_go_to_on() -> PlannerResult<()> {
        let mut arena = PlanArena::new();
        let a = table(&mut arena, 0, "a", "a");
        let b = table(&mut arena, 1, "b", "x");
        let b_filter = arena.add(Operator::Filter(Filter::new(
            b,
            vec![Expression::eq(col("x", "y", 1), Expression::Literal(Value::Integer(2)))],
        )));
        let join = arena.add(Operator::Join(Join {
            lhs: a,
            rhs: b_filter,
            predicate: Some(Expression::eq(col("a", "id", 0), col("x", "id", 1))),
            left_join: true,
        }));
        let route = arena.add(Operator::Route(Route::new(join, Routing::Dual)));
        assert_eq!(
            route_query(&arena, route, &BTreeMap::new())?,
            "select 1 from a left join b as x on x.y = 2 and a.id = x.id"
        );
        Ok(())
    }
}
