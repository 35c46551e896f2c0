//! Query Binder
//!
//! Resolves every column reference to the table it belongs to, assigns table
//! ids, rewrites ordinal and alias references in GROUP BY / HAVING / ORDER BY,
//! and records the column types that later decide whether weight strings are
//! needed. The result is a bound copy of the query plus a `SemanticTable`.

use crate::common::error::{PlannerError, PlannerResult};
use crate::parser::ast::*;
use crate::schema::{ColumnDef, ResolvedTable, SchemaLookup};
use crate::types::{LogicalType, Value};
use crate::unsupported_err;
use std::fmt;

/// Maximum number of tables a single statement may reference
pub const MAX_TABLES: usize = 64;

/// Set of table ids, used to express which tables an expression depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TableSet(u64);

impl TableSet {
    pub fn empty() -> Self {
        TableSet(0)
    }

    pub fn single(id: usize) -> Self {
        debug_assert!(id < MAX_TABLES);
        TableSet(1u64 << id)
    }

    pub fn merge(self, other: TableSet) -> Self {
        TableSet(self.0 | other.0)
    }

    pub fn contains(&self, id: usize) -> bool {
        id < MAX_TABLES && self.0 & (1u64 << id) != 0
    }

    pub fn is_subset_of(&self, other: TableSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn overlaps(&self, other: TableSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_TABLES).filter(move |id| self.contains(*id))
    }
}

impl fmt::Display for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.iter().map(|id| id.to_string()).collect();
        write!(f, "{{{}}}", ids.join(","))
    }
}

#[derive(Debug, Clone)]
pub enum TableKind {
    Real(ResolvedTable),
    Derived,
    Dual,
}

/// A table as seen by one query: a schema table, a derived table or DUAL
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub id: usize,
    pub alias: String,
    pub kind: TableKind,
    pub columns: Vec<ColumnDef>,
    pub authoritative: bool,
}

impl TableInfo {
    pub fn name(&self) -> &str {
        match &self.kind {
            TableKind::Real(resolved) => &resolved.table.name,
            TableKind::Derived => &self.alias,
            TableKind::Dual => "dual",
        }
    }

    pub fn column_type(&self, name: &str) -> Option<LogicalType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.data_type)
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// Everything semantic analysis learned about a statement
#[derive(Debug, Default, Clone)]
pub struct SemanticTable {
    pub tables: Vec<TableInfo>,
    /// Names of the statement's result columns
    pub result_columns: Vec<String>,
}

impl SemanticTable {
    pub fn table(&self, id: usize) -> PlannerResult<&TableInfo> {
        self.tables
            .get(id)
            .ok_or_else(|| crate::internal_err!("unknown table id {}", id))
    }

    /// Tables an expression reads from
    pub fn dependencies(&self, expr: &Expression) -> TableSet {
        let mut deps = TableSet::empty();
        for col in expr.columns() {
            if let Some(id) = col.binding {
                deps = deps.merge(TableSet::single(id));
            }
        }
        deps
    }

    pub fn type_of(&self, expr: &Expression) -> LogicalType {
        match expr {
            Expression::Literal(value) => value.get_type(),
            Expression::Column(col) => col
                .binding
                .and_then(|id| self.tables.get(id))
                .and_then(|t| t.column_type(&col.name))
                .unwrap_or(LogicalType::Unknown),
            Expression::Aggregate {
                function, argument, ..
            } => match function {
                AggregateFunction::CountStar | AggregateFunction::Count => LogicalType::BigInt,
                AggregateFunction::Sum | AggregateFunction::Avg => LogicalType::Decimal,
                AggregateFunction::Min | AggregateFunction::Max | AggregateFunction::AnyValue => {
                    argument
                        .as_ref()
                        .map(|a| self.type_of(a))
                        .unwrap_or(LogicalType::Unknown)
                }
            },
            Expression::Binary {
                left,
                operator,
                right,
            } => match operator {
                BinaryOperator::Add
                | BinaryOperator::Subtract
                | BinaryOperator::Multiply
                | BinaryOperator::Modulo => {
                    LogicalType::arithmetic(self.type_of(left), self.type_of(right))
                }
                BinaryOperator::Divide => LogicalType::Decimal,
                _ => LogicalType::Boolean,
            },
            Expression::Unary {
                operator: UnaryOperator::Not,
                ..
            }
            | Expression::InList { .. }
            | Expression::Between { .. }
            | Expression::IsNull { .. } => LogicalType::Boolean,
            Expression::Unary { expression, .. } => self.type_of(expression),
            Expression::WeightString(_) => LogicalType::Blob,
            _ => LogicalType::Unknown,
        }
    }

    /// Column references `*` (or `qualifier.*`) stands for, in FROM order.
    /// `None` when a table in scope has no authoritative column list.
    pub fn expand_star(
        &self,
        scope: &[usize],
        qualifier: Option<&str>,
    ) -> Option<Vec<(Expression, String)>> {
        let mut result = Vec::new();
        for id in scope {
            let table = self.tables.get(*id)?;
            if qualifier.map(|q| q != table.alias).unwrap_or(false) {
                continue;
            }
            if !table.authoritative {
                return None;
            }
            for column in &table.columns {
                result.push((
                    Expression::Column(ColumnName::bound(&table.alias, &column.name, table.id)),
                    column.name.clone(),
                ));
            }
        }
        Some(result)
    }
}

/// Output column of a bound query block
#[derive(Debug, Clone)]
struct OutputColumn {
    name: String,
    data_type: LogicalType,
}

/// Query binder
pub struct Binder<'a> {
    schema: &'a dyn SchemaLookup,
    semantics: SemanticTable,
}

impl<'a> Binder<'a> {
    pub fn new(schema: &'a dyn SchemaLookup) -> Self {
        Self {
            schema,
            semantics: SemanticTable::default(),
        }
    }

    /// Bind a top-level query
    pub fn bind(mut self, query: &Query) -> PlannerResult<(Query, SemanticTable)> {
        let (bound, columns) = self.bind_query(query.clone())?;
        self.semantics.result_columns = match columns {
            Some(columns) => columns.into_iter().map(|c| c.name).collect(),
            None => output_names(&bound),
        };
        Ok((bound, self.semantics))
    }

    /// Returns the bound query and its output columns; `None` when the
    /// column list depends on a non-authoritative `*`
    fn bind_query(&mut self, query: Query) -> PlannerResult<(Query, Option<Vec<OutputColumn>>)> {
        match query {
            Query::Select(select) => {
                let (select, columns) = self.bind_select(*select)?;
                Ok((Query::Select(Box::new(select)), columns))
            }
            Query::Union(union) => {
                let union = *union;
                let (left, left_columns) = self.bind_query(union.left)?;
                let (right, right_columns) = self.bind_query(union.right)?;

                let columns = match (left_columns, right_columns) {
                    (Some(l), Some(r)) => {
                        if l.len() != r.len() {
                            return Err(unsupported_err!(
                                "The used SELECT statements have a different number of columns"
                            ));
                        }
                        Some(
                            l.into_iter()
                                .zip(r)
                                .map(|(l, r)| OutputColumn {
                                    name: l.name,
                                    data_type: if l.data_type == r.data_type {
                                        l.data_type
                                    } else {
                                        LogicalType::Unknown
                                    },
                                })
                                .collect::<Vec<_>>(),
                        )
                    }
                    _ => None,
                };

                let names: Vec<String> = match &columns {
                    Some(columns) => columns.iter().map(|c| c.name.clone()).collect(),
                    None => output_names(&left),
                };
                let order_by = union
                    .order_by
                    .into_iter()
                    .map(|o| {
                        Ok(OrderByExpression {
                            expression: bind_union_order(o.expression, &names)?,
                            ascending: o.ascending,
                        })
                    })
                    .collect::<PlannerResult<Vec<_>>>()?;

                Ok((
                    Query::Union(Box::new(UnionStatement {
                        left,
                        right,
                        distinct: union.distinct,
                        order_by,
                        limit: union.limit,
                    })),
                    columns,
                ))
            }
        }
    }

    fn bind_select(
        &mut self,
        select: SelectStatement,
    ) -> PlannerResult<(SelectStatement, Option<Vec<OutputColumn>>)> {
        let mut scope = Vec::new();
        let mut from = Vec::with_capacity(select.from.len());
        for table_ref in select.from {
            from.push(self.bind_table_reference(table_ref, &mut scope)?);
        }
        if from.is_empty() {
            let id = self.add_table(TableInfo {
                id: 0,
                alias: "dual".to_string(),
                kind: TableKind::Dual,
                columns: vec![],
                authoritative: true,
            })?;
            scope.push(id);
            from.push(TableReference::Table {
                name: "dual".to_string(),
                alias: None,
                binding: Some(id),
            });
        }

        let where_clause = select
            .where_clause
            .map(|w| self.bind_expression(w, &scope))
            .transpose()?;

        let mut select_list = Vec::with_capacity(select.select_list.len());
        for item in select.select_list {
            select_list.push(match item {
                SelectItem::Expression { expr, alias } => SelectItem::Expression {
                    expr: self.bind_expression(expr, &scope)?,
                    alias,
                },
                SelectItem::QualifiedWildcard(table) => {
                    if !scope.iter().any(|id| self.semantics.tables[*id].alias == table) {
                        return Err(PlannerError::UnknownTable(table));
                    }
                    SelectItem::QualifiedWildcard(table)
                }
                SelectItem::Wildcard => SelectItem::Wildcard,
            });
        }

        let mut group_by = Vec::with_capacity(select.group_by.len());
        for expr in select.group_by {
            let bound = match select_item_reference(&expr, &select_list)? {
                Some(aliased) if !matches!(expr, Expression::Column(_)) => aliased,
                Some(aliased) => match self.bind_expression(expr.clone(), &scope) {
                    Err(PlannerError::UnknownColumn(_)) => aliased,
                    other => other?,
                },
                None => self.bind_expression(expr, &scope)?,
            };
            if bound.contains_aggregate() {
                return Err(unsupported_err!("Can't group on '{}'", bound));
            }
            group_by.push(bound);
        }

        let having = match select.having {
            Some(having) => Some(self.bind_with_aliases(having, &select_list, &scope)?),
            None => None,
        };

        let mut order_by = Vec::with_capacity(select.order_by.len());
        for o in select.order_by {
            let expression = match select_item_reference(&o.expression, &select_list)? {
                Some(aliased) => aliased,
                None => self.bind_expression(o.expression, &scope)?,
            };
            order_by.push(OrderByExpression {
                expression,
                ascending: o.ascending,
            });
        }

        let bound = SelectStatement {
            distinct: select.distinct,
            select_list,
            from,
            where_clause,
            group_by,
            having,
            order_by,
            limit: select.limit,
        };
        let columns = self.output_columns(&bound, &scope);
        Ok((bound, columns))
    }

    fn output_columns(&self, select: &SelectStatement, scope: &[usize]) -> Option<Vec<OutputColumn>> {
        let mut columns = Vec::new();
        for item in &select.select_list {
            match item {
                SelectItem::Expression { expr, .. } => columns.push(OutputColumn {
                    name: item.output_name(),
                    data_type: self.semantics.type_of(expr),
                }),
                SelectItem::Wildcard | SelectItem::QualifiedWildcard(_) => {
                    let qualifier = match item {
                        SelectItem::QualifiedWildcard(t) => Some(t.as_str()),
                        _ => None,
                    };
                    for (expr, name) in self.semantics.expand_star(scope, qualifier)? {
                        columns.push(OutputColumn {
                            name,
                            data_type: self.semantics.type_of(&expr),
                        });
                    }
                }
            }
        }
        Some(columns)
    }

    fn bind_table_reference(
        &mut self,
        table_ref: TableReference,
        scope: &mut Vec<usize>,
    ) -> PlannerResult<TableReference> {
        match table_ref {
            TableReference::Table { name, alias, .. } => {
                let alias_name = alias.clone().unwrap_or_else(|| name.clone());
                if scope
                    .iter()
                    .any(|id| self.semantics.tables[*id].alias == alias_name)
                {
                    return Err(unsupported_err!("Not unique table/alias: '{}'", alias_name));
                }
                let info = if name == "dual" {
                    TableInfo {
                        id: 0,
                        alias: alias_name,
                        kind: TableKind::Dual,
                        columns: vec![],
                        authoritative: true,
                    }
                } else {
                    let resolved = self.schema.find_table(&name)?;
                    TableInfo {
                        id: 0,
                        alias: alias_name,
                        columns: resolved.table.columns.clone(),
                        authoritative: resolved.table.authoritative,
                        kind: TableKind::Real(resolved),
                    }
                };
                let id = self.add_table(info)?;
                scope.push(id);
                Ok(TableReference::Table {
                    name,
                    alias,
                    binding: Some(id),
                })
            }
            TableReference::Derived {
                subquery, alias, ..
            } => {
                if scope.iter().any(|id| self.semantics.tables[*id].alias == alias) {
                    return Err(unsupported_err!("Not unique table/alias: '{}'", alias));
                }
                if matches!(*subquery, Query::Union(_)) {
                    return Err(unsupported_err!("UNION in derived table '{}'", alias));
                }
                let (bound, columns) = self.bind_query(*subquery)?;
                let (columns, authoritative) = match columns {
                    Some(columns) => (
                        columns
                            .into_iter()
                            .map(|c| ColumnDef {
                                name: c.name,
                                data_type: c.data_type,
                            })
                            .collect(),
                        true,
                    ),
                    None => (vec![], false),
                };
                let id = self.add_table(TableInfo {
                    id: 0,
                    alias: alias.clone(),
                    kind: TableKind::Derived,
                    columns,
                    authoritative,
                })?;
                scope.push(id);
                Ok(TableReference::Derived {
                    subquery: Box::new(bound),
                    alias,
                    binding: Some(id),
                })
            }
            TableReference::Join {
                left,
                right,
                join_type,
                condition,
            } => {
                let start = scope.len();
                let left = self.bind_table_reference(*left, scope)?;
                let right = self.bind_table_reference(*right, scope)?;
                let join_scope = scope[start..].to_vec();
                let condition = condition
                    .map(|c| self.bind_expression(c, &join_scope))
                    .transpose()?;
                if condition.as_ref().map(|c| c.contains_aggregate()).unwrap_or(false) {
                    return Err(unsupported_err!("Invalid use of group function in ON clause"));
                }
                Ok(TableReference::Join {
                    left: Box::new(left),
                    right: Box::new(right),
                    join_type,
                    condition,
                })
            }
        }
    }

    fn add_table(&mut self, mut info: TableInfo) -> PlannerResult<usize> {
        let id = self.semantics.tables.len();
        if id >= MAX_TABLES {
            return Err(unsupported_err!(
                "more than {} tables in one statement",
                MAX_TABLES
            ));
        }
        info.id = id;
        self.semantics.tables.push(info);
        Ok(id)
    }

    /// HAVING prefers select-list aliases over table columns
    fn bind_with_aliases(
        &self,
        expr: Expression,
        select_list: &[SelectItem],
        scope: &[usize],
    ) -> PlannerResult<Expression> {
        expr.transform_down(&mut |e| match e {
            Expression::Column(col) => {
                if col.table.is_none() {
                    if let Some(aliased) = alias_target(&col.name, select_list) {
                        return Ok(Transformed::Yes(aliased));
                    }
                }
                Ok(Transformed::Yes(Expression::Column(self.resolve_column(col, scope)?)))
            }
            other => Ok(Transformed::No(other)),
        })
    }

    fn bind_expression(&self, expr: Expression, scope: &[usize]) -> PlannerResult<Expression> {
        expr.transform_down(&mut |e| match e {
            Expression::Column(col) => Ok(Transformed::Yes(Expression::Column(
                self.resolve_column(col, scope)?,
            ))),
            Expression::Aggregate { .. } if e.children().iter().any(|c| c.contains_aggregate()) => {
                Err(unsupported_err!(
                    "Invalid use of group function: nested aggregate in '{}'",
                    e
                ))
            }
            Expression::Offset(_) => Err(crate::internal_err!("offset in unbound expression")),
            other => Ok(Transformed::No(other)),
        })
    }

    fn resolve_column(&self, col: ColumnName, scope: &[usize]) -> PlannerResult<ColumnName> {
        if col.binding.is_some() {
            return Ok(col);
        }
        let tables: Vec<&TableInfo> = scope.iter().map(|id| &self.semantics.tables[*id]).collect();

        if let Some(qualifier) = &col.table {
            let table = tables
                .iter()
                .find(|t| &t.alias == qualifier)
                .ok_or_else(|| PlannerError::UnknownColumn(col.to_string()))?;
            if table.authoritative && !table.has_column(&col.name) {
                return Err(PlannerError::UnknownColumn(col.to_string()));
            }
            return Ok(ColumnName::bound(&table.alias, &col.name, table.id));
        }

        let declared: Vec<&&TableInfo> = tables.iter().filter(|t| t.has_column(&col.name)).collect();
        let table = match declared.len() {
            1 => declared[0],
            0 => {
                let open: Vec<&&TableInfo> = tables.iter().filter(|t| !t.authoritative).collect();
                match open.len() {
                    1 => open[0],
                    0 => return Err(PlannerError::UnknownColumn(col.name)),
                    _ => return Err(PlannerError::AmbiguousColumn(col.name)),
                }
            }
            _ => return Err(PlannerError::AmbiguousColumn(col.name)),
        };
        Ok(ColumnName::bound(&table.alias, &col.name, table.id))
    }
}

/// Expression of the select item an unqualified name aliases
fn alias_target(name: &str, select_list: &[SelectItem]) -> Option<Expression> {
    select_list.iter().find_map(|item| match item {
        SelectItem::Expression {
            expr,
            alias: Some(alias),
        } if alias == name => Some(expr.clone()),
        _ => None,
    })
}

/// ORDER BY / GROUP BY ordinals and aliases referring to select items
fn select_item_reference(
    expr: &Expression,
    select_list: &[SelectItem],
) -> PlannerResult<Option<Expression>> {
    match expr {
        Expression::Literal(Value::Integer(n)) => {
            let index = usize::try_from(*n)
                .ok()
                .and_then(|n| n.checked_sub(1))
                .filter(|i| *i < select_list.len())
                .ok_or_else(|| PlannerError::UnknownColumn(n.to_string()))?;
            match &select_list[index] {
                SelectItem::Expression { expr, .. } => Ok(Some(expr.clone())),
                _ => Err(unsupported_err!("ordinal {} refers to '*'", n)),
            }
        }
        Expression::Column(ColumnName {
            table: None, name, ..
        }) => Ok(alias_target(name, select_list)),
        _ => Ok(None),
    }
}

fn bind_union_order(expr: Expression, names: &[String]) -> PlannerResult<Expression> {
    match expr {
        Expression::Literal(Value::Integer(n)) => {
            let index = usize::try_from(n)
                .ok()
                .and_then(|n| n.checked_sub(1))
                .filter(|i| *i < names.len())
                .ok_or_else(|| PlannerError::UnknownColumn(n.to_string()))?;
            Ok(Expression::column(None, &names[index]))
        }
        Expression::Column(ColumnName { name, .. }) if names.contains(&name) => {
            Ok(Expression::column(None, &name))
        }
        Expression::Column(col) => Err(PlannerError::UnknownColumn(col.to_string())),
        other => Err(unsupported_err!(
            "ORDER BY '{}' on a UNION must name a result column",
            other
        )),
    }
}

/// Best-effort names when `*` could not be expanded
pub(crate) fn output_names(query: &Query) -> Vec<String> {
    match query {
        Query::Select(select) => select.select_list.iter().map(|i| i.output_name()).collect(),
        Query::Union(union) => output_names(&union.left),
    }
}
