//! Operator Tree
//!
//! The plan being compiled is a tree of operators stored in an arena and
//! addressed by `OpId`. A parent refers to its children by id, so replacing
//! a node means writing a new operator into the same slot: every parent keeps
//! pointing at the right place without being touched.

use crate::common::error::PlannerResult;
use crate::internal_err;
use crate::parser::ast::{Expression, OrderByExpression, SelectStatement};
use crate::planner::binder::TableSet;
use crate::planner::routing::Routing;
use std::fmt;

/// Index of an operator in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub usize);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Operator node types
#[derive(Debug, Clone)]
pub enum Operator {
    /// Sub-plan sent as one query to the destinations picked by its routing
    Route(Route),
    /// One logical table
    Table(Table),
    /// Rows matching all predicates
    Filter(Filter),
    /// Join evaluated by the database inside a single route
    Join(Join),
    /// Nested-loop join across routes: the right side runs once per left row
    ApplyJoin(ApplyJoin),
    /// Grouping and aggregate functions
    Aggregator(Aggregator),
    /// Sort, or merge-sort of pre-sorted streams
    Ordering(Ordering),
    Limit(Limit),
    Distinct(Distinct),
    Projection(Projection),
    Union(Union),
    /// Post-processing clauses of a SELECT that have not been planned yet
    Horizon(Horizon),
    /// Slot whose operator has been moved elsewhere
    Vacant,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub source: OpId,
    pub routing: Routing,
    /// Query template sent to every destination, filled in after offsets
    /// are bound
    pub query: Option<String>,
}

impl Route {
    pub fn new(source: OpId, routing: Routing) -> Self {
        Self {
            source,
            routing,
            query: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    pub table_id: usize,
    pub name: String,
    pub alias: String,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub source: OpId,
    pub predicates: Vec<Expression>,
    /// Conjunction of the predicates over source offsets, for central
    /// evaluation
    pub bound: Option<Expression>,
}

impl Filter {
    pub fn new(source: OpId, predicates: Vec<Expression>) -> Self {
        Self {
            source,
            predicates,
            bound: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Join {
    pub lhs: OpId,
    pub rhs: OpId,
    pub predicate: Option<Expression>,
    pub left_join: bool,
}

/// Value read from the left row and passed to the right side
#[derive(Debug, Clone, PartialEq)]
pub struct JoinVar {
    pub name: String,
    pub expr: Expression,
    pub offset: Option<usize>,
}

/// One output column of an apply join
#[derive(Debug, Clone, PartialEq)]
pub struct JoinColumn {
    pub expr: Expression,
    pub from_lhs: bool,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct ApplyJoin {
    pub lhs: OpId,
    pub rhs: OpId,
    pub left_join: bool,
    /// Join condition as written, kept for plan descriptions
    pub predicate: Option<Expression>,
    pub vars: Vec<JoinVar>,
    pub columns: Vec<JoinColumn>,
}

/// How a central aggregator combines the values it reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateOpcode {
    Count,
    CountStar,
    Sum,
    Avg,
    Min,
    Max,
    AnyValue,
    CountDistinct,
    SumDistinct,
    /// Sum of partial counts
    SumCount,
    /// `sum(partial sums) / sum(partial counts)`
    AvgOfPartials,
}

impl AggregateOpcode {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateOpcode::Count => "count",
            AggregateOpcode::CountStar => "count_star",
            AggregateOpcode::Sum => "sum",
            AggregateOpcode::Avg => "avg",
            AggregateOpcode::Min => "min",
            AggregateOpcode::Max => "max",
            AggregateOpcode::AnyValue => "any_value",
            AggregateOpcode::CountDistinct => "count_distinct",
            AggregateOpcode::SumDistinct => "sum_distinct",
            AggregateOpcode::SumCount => "sum_count",
            AggregateOpcode::AvgOfPartials => "avg_of_partials",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    pub expr: Expression,
    pub offset: Option<usize>,
    pub ws_offset: Option<usize>,
}

impl GroupBy {
    pub fn new(expr: Expression) -> Self {
        Self {
            expr,
            offset: None,
            ws_offset: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggr {
    /// Output expression, e.g. `count(*)` or a plain column carried along
    pub expr: Expression,
    pub alias: Option<String>,
    pub opcode: AggregateOpcode,
    /// Values read from the source row
    pub inputs: Vec<Expression>,
    pub input_offsets: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    pub source: OpId,
    pub grouping: Vec<GroupBy>,
    pub aggregates: Vec<Aggr>,
    /// Output row; each entry is a grouping expression or an aggregate's expr
    pub outputs: Vec<Expression>,
    /// The aggregation the query asked for, as opposed to a partial copy
    pub original: bool,
    /// Allowed to be pushed into routes
    pub delegated: bool,
    /// Partial aggregation has been pushed into the route below
    pub pushed: bool,
}

impl Aggregator {
    pub fn is_grouping(&self, expr: &Expression) -> bool {
        self.grouping.iter().any(|g| &g.expr == expr)
    }
}

/// Sort key; `ws_offset` is set when the value is compared through its
/// weight string
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOrdering {
    pub expr: Expression,
    pub ascending: bool,
    pub offset: Option<usize>,
    pub ws_offset: Option<usize>,
}

impl RouteOrdering {
    pub fn new(order: &OrderByExpression) -> Self {
        Self {
            expr: order.expression.clone(),
            ascending: order.ascending,
            offset: None,
            ws_offset: None,
        }
    }

    pub fn order_by(&self) -> OrderByExpression {
        OrderByExpression {
            expression: self.expr.clone(),
            ascending: self.ascending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ordering {
    pub source: OpId,
    pub keys: Vec<RouteOrdering>,
    /// A sorted copy runs on every destination; this node merges the streams
    pub pushed: bool,
}

#[derive(Debug, Clone)]
pub struct Limit {
    pub source: OpId,
    pub count: u64,
    pub offset: Option<u64>,
    pub pushed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistinctColumn {
    pub offset: usize,
    pub ws_offset: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Distinct {
    pub source: OpId,
    pub columns: Vec<DistinctColumn>,
    /// Number of leading source columns rows are deduplicated on, fixed the
    /// first time offsets are bound
    pub column_count: Option<usize>,
    pub pushed: bool,
}

impl Distinct {
    pub fn new(source: OpId) -> Self {
        Self {
            source,
            columns: vec![],
            column_count: None,
            pushed: false,
        }
    }
}

/// Derived table a projection or horizon produces
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedInfo {
    pub table_id: usize,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjColumn {
    pub alias: String,
    pub expr: Expression,
    /// `expr` rewritten over source offsets
    pub eval: Option<Expression>,
    /// Expression this column is known as by operators above, when it is not
    /// the derived-table column named by `alias`
    pub output: Option<Expression>,
}

impl ProjColumn {
    pub fn new(alias: impl Into<String>, expr: Expression) -> Self {
        Self {
            alias: alias.into(),
            expr,
            eval: None,
            output: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub source: OpId,
    pub columns: Vec<ProjColumn>,
    pub derived: Option<DerivedInfo>,
}

#[derive(Debug, Clone)]
pub struct Union {
    pub inputs: Vec<OpId>,
    pub distinct: bool,
    /// Result columns, referred to by name
    pub columns: Vec<Expression>,
}

#[derive(Debug, Clone)]
pub struct Horizon {
    pub source: OpId,
    /// The SELECT without its FROM and WHERE
    pub select: SelectStatement,
    /// Tables visible to the select list
    pub scope: Vec<usize>,
    pub derived: Option<DerivedInfo>,
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Route(_) => "Route",
            Operator::Table(_) => "Table",
            Operator::Filter(_) => "Filter",
            Operator::Join(_) => "Join",
            Operator::ApplyJoin(_) => "ApplyJoin",
            Operator::Aggregator(_) => "Aggregator",
            Operator::Ordering(_) => "Ordering",
            Operator::Limit(_) => "Limit",
            Operator::Distinct(_) => "Distinct",
            Operator::Projection(_) => "Projection",
            Operator::Union(_) => "Union",
            Operator::Horizon(_) => "Horizon",
            Operator::Vacant => "Vacant",
        }
    }

    /// Children in evaluation order
    pub fn inputs(&self) -> Vec<OpId> {
        match self {
            Operator::Route(op) => vec![op.source],
            Operator::Filter(op) => vec![op.source],
            Operator::Aggregator(op) => vec![op.source],
            Operator::Ordering(op) => vec![op.source],
            Operator::Limit(op) => vec![op.source],
            Operator::Distinct(op) => vec![op.source],
            Operator::Projection(op) => vec![op.source],
            Operator::Horizon(op) => vec![op.source],
            Operator::Join(op) => vec![op.lhs, op.rhs],
            Operator::ApplyJoin(op) => vec![op.lhs, op.rhs],
            Operator::Union(op) => op.inputs.clone(),
            Operator::Table(_) | Operator::Vacant => vec![],
        }
    }

    /// Single child of a unary operator
    pub fn source(&self) -> Option<OpId> {
        match self {
            Operator::Route(op) => Some(op.source),
            Operator::Filter(op) => Some(op.source),
            Operator::Aggregator(op) => Some(op.source),
            Operator::Ordering(op) => Some(op.source),
            Operator::Limit(op) => Some(op.source),
            Operator::Distinct(op) => Some(op.source),
            Operator::Projection(op) => Some(op.source),
            Operator::Horizon(op) => Some(op.source),
            _ => None,
        }
    }

    /// Re-point the child of a unary operator
    pub fn set_source(&mut self, source: OpId) -> PlannerResult<()> {
        match self {
            Operator::Route(op) => op.source = source,
            Operator::Filter(op) => op.source = source,
            Operator::Aggregator(op) => op.source = source,
            Operator::Ordering(op) => op.source = source,
            Operator::Limit(op) => op.source = source,
            Operator::Distinct(op) => op.source = source,
            Operator::Projection(op) => op.source = source,
            Operator::Horizon(op) => op.source = source,
            other => {
                return Err(internal_err!(
                    "{} has no single source to replace",
                    other.name()
                ))
            }
        }
        Ok(())
    }

    /// Derived table this operator produces, if any
    pub fn derived(&self) -> Option<&DerivedInfo> {
        match self {
            Operator::Projection(op) => op.derived.as_ref(),
            Operator::Horizon(op) => op.derived.as_ref(),
            _ => None,
        }
    }
}

/// Arena owning every operator of one plan
#[derive(Debug, Default, Clone)]
pub struct PlanArena {
    nodes: Vec<Operator>,
}

impl PlanArena {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn add(&mut self, op: Operator) -> OpId {
        self.nodes.push(op);
        OpId(self.nodes.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every live operator, vacant slots skipped
    pub fn operators(&self) -> impl Iterator<Item = (OpId, &Operator)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, op)| !matches!(op, Operator::Vacant))
            .map(|(i, op)| (OpId(i), op))
    }

    pub fn get(&self, id: OpId) -> PlannerResult<&Operator> {
        match self.nodes.get(id.0) {
            Some(Operator::Vacant) => Err(internal_err!("operator {} was moved out", id)),
            Some(op) => Ok(op),
            None => Err(internal_err!("operator {} does not exist", id)),
        }
    }

    pub fn get_mut(&mut self, id: OpId) -> PlannerResult<&mut Operator> {
        match self.nodes.get_mut(id.0) {
            Some(Operator::Vacant) => Err(internal_err!("operator {} was moved out", id)),
            Some(op) => Ok(op),
            None => Err(internal_err!("operator {} does not exist", id)),
        }
    }

    /// Move an operator out, leaving its slot vacant
    pub fn take(&mut self, id: OpId) -> PlannerResult<Operator> {
        let op = self.get_mut(id)?;
        Ok(std::mem::replace(op, Operator::Vacant))
    }

    /// Write `op` into the slot `id`. Parents referring to `id` now see
    /// `op`. Writing a vacant node or a node that lists itself as a child is
    /// an invariant violation.
    pub fn replace(&mut self, id: OpId, op: Operator) -> PlannerResult<()> {
        if matches!(op, Operator::Vacant) {
            return Err(internal_err!("cannot replace {} with a vacant operator", id));
        }
        if op.inputs().contains(&id) {
            return Err(internal_err!(
                "replacing {} with {} would make it its own child",
                id,
                op.name()
            ));
        }
        match self.nodes.get_mut(id.0) {
            Some(slot) => {
                *slot = op;
                Ok(())
            }
            None => Err(internal_err!("operator {} does not exist", id)),
        }
    }

    /// Move the operator at `from` into slot `to`, dropping what `to` held
    pub fn relocate(&mut self, from: OpId, to: OpId) -> PlannerResult<()> {
        let op = self.take(from)?;
        self.replace(to, op)
    }

    /// Put a new operator above the one at `id`, in the same slot. `wrap`
    /// receives the id the existing operator was moved to.
    pub fn wrap(&mut self, id: OpId, wrap: impl FnOnce(OpId) -> Operator) -> PlannerResult<()> {
        let inner = self.take(id)?;
        let inner_id = self.add(inner);
        self.replace(id, wrap(inner_id))
    }

    /// Copy a subtree into fresh slots, routing state included
    pub fn deep_clone(&mut self, id: OpId) -> PlannerResult<OpId> {
        let mut op = self.get(id)?.clone();
        match &mut op {
            Operator::Join(join) => {
                join.lhs = self.deep_clone(join.lhs)?;
                join.rhs = self.deep_clone(join.rhs)?;
            }
            Operator::ApplyJoin(join) => {
                join.lhs = self.deep_clone(join.lhs)?;
                join.rhs = self.deep_clone(join.rhs)?;
            }
            Operator::Union(union) => {
                let mut inputs = Vec::with_capacity(union.inputs.len());
                for input in union.inputs.clone() {
                    inputs.push(self.deep_clone(input)?);
                }
                union.inputs = inputs;
            }
            Operator::Table(_) => {}
            Operator::Vacant => return Err(internal_err!("cannot clone vacant {}", id)),
            other => {
                if let Some(source) = other.source() {
                    let cloned = self.deep_clone(source)?;
                    other.set_source(cloned)?;
                }
            }
        }
        Ok(self.add(op))
    }

    /// Ids of the tables a subtree reads. A derived table counts as the one
    /// table it defines.
    pub fn table_ids(&self, id: OpId) -> PlannerResult<TableSet> {
        let op = self.get(id)?;
        if let Some(derived) = op.derived() {
            return Ok(TableSet::single(derived.table_id));
        }
        if let Operator::Table(table) = op {
            return Ok(TableSet::single(table.table_id));
        }
        let mut result = TableSet::empty();
        for input in op.inputs() {
            result = result.merge(self.table_ids(input)?);
        }
        Ok(result)
    }

    /// Routes reachable from `id`, in pre-order
    pub fn routes(&self, id: OpId) -> PlannerResult<Vec<OpId>> {
        let mut result = Vec::new();
        self.collect_routes(id, &mut result)?;
        Ok(result)
    }

    fn collect_routes(&self, id: OpId, out: &mut Vec<OpId>) -> PlannerResult<()> {
        match self.get(id)? {
            Operator::Route(_) => out.push(id),
            op => {
                for input in op.inputs() {
                    self.collect_routes(input, out)?;
                }
            }
        }
        Ok(())
    }

    /// Whether a LIMIT is evaluated outside routes anywhere in the subtree
    pub fn has_central_limit(&self, id: OpId) -> PlannerResult<bool> {
        match self.get(id)? {
            Operator::Limit(_) => Ok(true),
            Operator::Route(_) => Ok(false),
            op => {
                for input in op.inputs() {
                    if self.has_central_limit(input)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    pub fn route(&self, id: OpId) -> PlannerResult<&Route> {
        match self.get(id)? {
            Operator::Route(route) => Ok(route),
            other => Err(internal_err!("expected Route at {}, found {}", id, other.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(id: usize) -> Operator {
        Operator::Table(Table {
            table_id: id,
            name: format!("t{}", id),
            alias: format!("t{}", id),
        })
    }

    #[test]
    fn test_replace_keeps_parent_links() -> PlannerResult<()> {
        let mut arena = PlanArena::new();
        let t = arena.add(table(0));
        let filter = arena.add(Operator::Filter(Filter::new(t, vec![])));
        arena.wrap(t, |inner| Operator::Limit(Limit {
            source: inner,
            count: 1,
            offset: None,
            pushed: false,
        }))?;

        // the filter still points at slot `t`, which now holds the limit
        assert_eq!(arena.get(filter)?.inputs(), vec![t]);
        assert_eq!(arena.get(t)?.name(), "Limit");
        assert_eq!(arena.table_ids(filter)?, TableSet::single(0));
        Ok(())
    }

    #[test]
    fn test_replace_rejects_bad_shapes() {
        let mut arena = PlanArena::new();
        let t = arena.add(table(0));
        assert!(arena.replace(t, Operator::Vacant).unwrap_err().is_internal());
        let err = arena
            .replace(t, Operator::Filter(Filter::new(t, vec![])))
            .unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_taken_slot_is_vacant() {
        let mut arena = PlanArena::new();
        let t = arena.add(table(0));
        arena.take(t).unwrap();
        assert!(arena.get(t).unwrap_err().is_internal());
    }

    #[test]
    fn test_deep_clone_copies_subtree() -> PlannerResult<()> {
        let mut arena = PlanArena::new();
        let lhs = arena.add(table(0));
        let rhs = arena.add(table(1));
        let join = arena.add(Operator::Join(Join {
            lhs,
            rhs,
            predicate: None,
            left_join: false,
        }));
        let copy = arena.deep_clone(join)?;
        let inputs = arena.get(copy)?.inputs();
        assert!(!inputs.contains(&lhs) && !inputs.contains(&rhs));
        assert_eq!(arena.table_ids(copy)?.len(), 2);
        Ok(())
    }
}
