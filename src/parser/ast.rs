//! Abstract Syntax Tree (AST) for SQL statements
//!
//! Defines the structure of parsed SQL statements. Expressions render back to
//! SQL through `Display`, which is what per-route query generation relies on.

use crate::common::error::PlannerResult;
use crate::types::Value;
use std::fmt;

/// SQL statement types
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Query(Query),
    Explain { format: ExplainFormat, query: Query },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplainFormat {
    Text,
    Json,
}

/// A query expression: a single SELECT or a UNION of queries
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(Box<SelectStatement>),
    Union(Box<UnionStatement>),
}

/// SELECT statement
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    pub distinct: bool,
    pub select_list: Vec<SelectItem>,
    pub from: Vec<TableReference>,
    pub where_clause: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
    pub order_by: Vec<OrderByExpression>,
    pub limit: Option<LimitClause>,
}

impl SelectStatement {
    pub fn has_wildcard(&self) -> bool {
        self.select_list
            .iter()
            .any(|item| !matches!(item, SelectItem::Expression { .. }))
    }

    pub fn has_aggregation(&self) -> bool {
        !self.group_by.is_empty()
            || self.select_list.iter().any(|item| match item {
                SelectItem::Expression { expr, .. } => expr.contains_aggregate(),
                _ => false,
            })
            || self
                .having
                .as_ref()
                .map(|h| h.contains_aggregate())
                .unwrap_or(false)
            || self
                .order_by
                .iter()
                .any(|o| o.expression.contains_aggregate())
    }
}

/// `left UNION [ALL] right` plus the ORDER BY / LIMIT applying to the result
#[derive(Debug, Clone, PartialEq)]
pub struct UnionStatement {
    pub left: Query,
    pub right: Query,
    pub distinct: bool,
    pub order_by: Vec<OrderByExpression>,
    pub limit: Option<LimitClause>,
}

/// Item in SELECT list
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Expression {
        expr: Expression,
        alias: Option<String>,
    },
    Wildcard,
    QualifiedWildcard(String),
}

impl SelectItem {
    /// Result column name as the client will see it
    pub fn output_name(&self) -> String {
        match self {
            SelectItem::Expression {
                alias: Some(alias), ..
            } => alias.clone(),
            SelectItem::Expression { expr, .. } => expr.output_name(),
            SelectItem::Wildcard => "*".to_string(),
            SelectItem::QualifiedWildcard(table) => format!("{}.*", table),
        }
    }
}

/// Table reference in FROM clause. `binding` is filled in by semantic
/// analysis with the table's id.
#[derive(Debug, Clone, PartialEq)]
pub enum TableReference {
    Table {
        name: String,
        alias: Option<String>,
        binding: Option<usize>,
    },
    Join {
        left: Box<TableReference>,
        right: Box<TableReference>,
        join_type: JoinType,
        condition: Option<Expression>,
    },
    Derived {
        subquery: Box<Query>,
        alias: String,
        binding: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpression {
    pub expression: Expression,
    pub ascending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitClause {
    pub limit: u64,
    pub offset: Option<u64>,
}

/// Column reference. `binding` holds the id of the table the column resolves
/// to after semantic analysis; it takes part in equality so that equally
/// named columns from different scopes stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnName {
    pub table: Option<String>,
    pub name: String,
    pub binding: Option<usize>,
}

impl ColumnName {
    pub fn new(table: Option<&str>, name: &str) -> Self {
        Self {
            table: table.map(|t| t.to_string()),
            name: name.to_string(),
            binding: None,
        }
    }

    pub fn bound(table: &str, name: &str, binding: usize) -> Self {
        Self {
            table: Some(table.to_string()),
            name: name.to_string(),
            binding: Some(binding),
        }
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(table) = &self.table {
            write!(f, "{}.", Ident(table))?;
        }
        write!(f, "{}", Ident(&self.name))
    }
}

/// Identifier rendering with backtick quoting when needed
pub struct Ident<'a>(pub &'a str);

impl fmt::Display for Ident<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plain = !self.0.is_empty()
            && !self.0.starts_with(|c: char| c.is_ascii_digit())
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$');
        if plain {
            write!(f, "{}", self.0)
        } else {
            write!(f, "`{}`", self.0.replace('`', "``"))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    CountStar,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    AnyValue,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "count" => Some(AggregateFunction::Count),
            "sum" => Some(AggregateFunction::Sum),
            "avg" => Some(AggregateFunction::Avg),
            "min" => Some(AggregateFunction::Min),
            "max" => Some(AggregateFunction::Max),
            "any_value" => Some(AggregateFunction::AnyValue),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::CountStar | AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::AnyValue => "any_value",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Or,
    And,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Like,
    NotLike,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOperator {
    fn precedence(&self) -> u8 {
        match self {
            BinaryOperator::Or => 1,
            BinaryOperator::And => 2,
            BinaryOperator::Equals
            | BinaryOperator::NotEquals
            | BinaryOperator::LessThan
            | BinaryOperator::LessThanOrEqual
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterThanOrEqual
            | BinaryOperator::Like
            | BinaryOperator::NotLike => 4,
            BinaryOperator::Add | BinaryOperator::Subtract => 5,
            BinaryOperator::Multiply | BinaryOperator::Divide | BinaryOperator::Modulo => 6,
        }
    }

    fn is_associative(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Or | BinaryOperator::And | BinaryOperator::Add | BinaryOperator::Multiply
        )
    }

    pub fn is_comparison(&self) -> bool {
        self.precedence() == 4
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Or => "or",
            BinaryOperator::And => "and",
            BinaryOperator::Equals => "=",
            BinaryOperator::NotEquals => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::Like => "like",
            BinaryOperator::NotLike => "not like",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Minus,
    Plus,
}

/// SQL expressions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    Literal(Value),
    BindVariable(String),
    Column(ColumnName),
    Binary {
        left: Box<Expression>,
        operator: BinaryOperator,
        right: Box<Expression>,
    },
    Unary {
        operator: UnaryOperator,
        expression: Box<Expression>,
    },
    InList {
        expression: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    Between {
        expression: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    IsNull {
        expression: Box<Expression>,
        negated: bool,
    },
    Tuple(Vec<Expression>),
    Function {
        name: String,
        arguments: Vec<Expression>,
    },
    Aggregate {
        function: AggregateFunction,
        argument: Option<Box<Expression>>,
        distinct: bool,
    },
    /// Collation weight of the inner expression, computed by the database
    WeightString(Box<Expression>),
    /// Reference to a column of the operator's input row
    Offset(usize),
}

/// Result of a top-down transformation step
pub enum Transformed {
    /// Replaced; children are not visited
    Yes(Expression),
    /// Unchanged; children are visited
    No(Expression),
}

impl Expression {
    pub fn column(table: Option<&str>, name: &str) -> Self {
        Expression::Column(ColumnName::new(table, name))
    }

    pub fn binary(left: Expression, operator: BinaryOperator, right: Expression) -> Self {
        Expression::Binary {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expression, right: Expression) -> Self {
        Self::binary(left, BinaryOperator::Equals, right)
    }

    pub fn weight_string(inner: Expression) -> Self {
        Expression::WeightString(Box::new(inner))
    }

    /// Name a result column gets when the select item has no alias
    pub fn output_name(&self) -> String {
        match self {
            Expression::Column(col) => col.name.clone(),
            other => other.to_string(),
        }
    }

    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Literal(_)
            | Expression::BindVariable(_)
            | Expression::Column(_)
            | Expression::Offset(_) => vec![],
            Expression::Binary { left, right, .. } => vec![left, right],
            Expression::Unary { expression, .. } | Expression::IsNull { expression, .. } => {
                vec![expression]
            }
            Expression::WeightString(inner) => vec![inner],
            Expression::InList {
                expression, list, ..
            } => std::iter::once(expression.as_ref()).chain(list.iter()).collect(),
            Expression::Between {
                expression,
                low,
                high,
                ..
            } => vec![expression, low, high],
            Expression::Tuple(items) => items.iter().collect(),
            Expression::Function { arguments, .. } => arguments.iter().collect(),
            Expression::Aggregate { argument, .. } => argument.iter().map(|a| a.as_ref()).collect(),
        }
    }

    /// Pre-order walk; returning false from `visit` skips the node's children
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expression) -> bool) {
        if visit(self) {
            for child in self.children() {
                child.walk(&mut *visit);
            }
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expression::Aggregate { .. }) {
                found = true;
            }
            !found
        });
        found
    }

    /// All aggregate calls in the expression, outermost first
    pub fn aggregates(&self) -> Vec<&Expression> {
        let mut result = Vec::new();
        self.walk(&mut |e| {
            if matches!(e, Expression::Aggregate { .. }) {
                result.push(e);
                false
            } else {
                true
            }
        });
        result
    }

    pub fn columns(&self) -> Vec<&ColumnName> {
        let mut result = Vec::new();
        self.walk(&mut |e| {
            if let Expression::Column(col) = e {
                result.push(col);
            }
            true
        });
        result
    }

    /// True when the expression can be computed without reading any row
    pub fn is_constant(&self) -> bool {
        let mut constant = true;
        self.walk(&mut |e| {
            if matches!(
                e,
                Expression::Column(_) | Expression::Aggregate { .. } | Expression::Offset(_)
            ) {
                constant = false;
            }
            constant
        });
        constant
    }

    /// Rebuild this node with each direct child passed through `f`
    pub fn map_children<F>(self, f: &mut F) -> PlannerResult<Expression>
    where
        F: FnMut(Expression) -> PlannerResult<Expression>,
    {
        Ok(match self {
            Expression::Binary {
                left,
                operator,
                right,
            } => Expression::Binary {
                left: Box::new(f(*left)?),
                operator,
                right: Box::new(f(*right)?),
            },
            Expression::Unary {
                operator,
                expression,
            } => Expression::Unary {
                operator,
                expression: Box::new(f(*expression)?),
            },
            Expression::InList {
                expression,
                list,
                negated,
            } => Expression::InList {
                expression: Box::new(f(*expression)?),
                list: list.into_iter().map(&mut *f).collect::<PlannerResult<_>>()?,
                negated,
            },
            Expression::Between {
                expression,
                low,
                high,
                negated,
            } => Expression::Between {
                expression: Box::new(f(*expression)?),
                low: Box::new(f(*low)?),
                high: Box::new(f(*high)?),
                negated,
            },
            Expression::IsNull {
                expression,
                negated,
            } => Expression::IsNull {
                expression: Box::new(f(*expression)?),
                negated,
            },
            Expression::Tuple(items) => {
                Expression::Tuple(items.into_iter().map(&mut *f).collect::<PlannerResult<_>>()?)
            }
            Expression::Function { name, arguments } => Expression::Function {
                name,
                arguments: arguments
                    .into_iter()
                    .map(&mut *f)
                    .collect::<PlannerResult<_>>()?,
            },
            Expression::Aggregate {
                function,
                argument,
                distinct,
            } => Expression::Aggregate {
                function,
                argument: match argument {
                    Some(arg) => Some(Box::new(f(*arg)?)),
                    None => None,
                },
                distinct,
            },
            Expression::WeightString(inner) => Expression::WeightString(Box::new(f(*inner)?)),
            leaf => leaf,
        })
    }

    /// Top-down rewrite. `f` sees each node before its children and decides
    /// whether the node was replaced (stop) or should be descended into.
    pub fn transform_down<F>(self, f: &mut F) -> PlannerResult<Expression>
    where
        F: FnMut(Expression) -> PlannerResult<Transformed>,
    {
        match f(self)? {
            Transformed::Yes(expr) => Ok(expr),
            Transformed::No(expr) => expr.map_children(&mut |child| child.transform_down(&mut *f)),
        }
    }
}

fn binding_power(expr: &Expression) -> u8 {
    match expr {
        Expression::Binary { operator, .. } => operator.precedence(),
        Expression::Unary {
            operator: UnaryOperator::Not,
            ..
        } => 3,
        Expression::InList { .. } | Expression::Between { .. } | Expression::IsNull { .. } => 4,
        _ => 10,
    }
}

fn fmt_operand(
    f: &mut fmt::Formatter<'_>,
    parent: Option<BinaryOperator>,
    parent_power: u8,
    child: &Expression,
    right_side: bool,
) -> fmt::Result {
    let power = binding_power(child);
    let same_associative = match (parent, child) {
        (Some(p), Expression::Binary { operator, .. }) => *operator == p && p.is_associative(),
        _ => false,
    };
    let parens = power < parent_power
        || (power == parent_power && power < 10 && (right_side || power == 4) && !same_associative);
    if parens {
        write!(f, "({})", child)
    } else {
        write!(f, "{}", child)
    }
}

fn fmt_list(f: &mut fmt::Formatter<'_>, items: &[Expression]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(value) => write!(f, "{}", value),
            Expression::BindVariable(name) => write!(f, ":{}", name),
            Expression::Column(col) => write!(f, "{}", col),
            Expression::Binary {
                left,
                operator,
                right,
            } => {
                let power = operator.precedence();
                fmt_operand(f, Some(*operator), power, left, false)?;
                write!(f, " {} ", operator.symbol())?;
                fmt_operand(f, Some(*operator), power, right, true)
            }
            Expression::Unary {
                operator,
                expression,
            } => match operator {
                UnaryOperator::Not => {
                    write!(f, "not ")?;
                    fmt_operand(f, None, 4, expression, true)
                }
                UnaryOperator::Minus => {
                    write!(f, "-")?;
                    fmt_operand(f, None, 10, expression, true)
                }
                UnaryOperator::Plus => fmt_operand(f, None, 10, expression, true),
            },
            Expression::InList {
                expression,
                list,
                negated,
            } => {
                fmt_operand(f, None, 5, expression, false)?;
                write!(f, " {}in (", if *negated { "not " } else { "" })?;
                fmt_list(f, list)?;
                write!(f, ")")
            }
            Expression::Between {
                expression,
                low,
                high,
                negated,
            } => {
                fmt_operand(f, None, 5, expression, false)?;
                write!(f, " {}between ", if *negated { "not " } else { "" })?;
                fmt_operand(f, None, 5, low, false)?;
                write!(f, " and ")?;
                fmt_operand(f, None, 5, high, false)
            }
            Expression::IsNull {
                expression,
                negated,
            } => {
                fmt_operand(f, None, 5, expression, false)?;
                write!(f, " is {}null", if *negated { "not " } else { "" })
            }
            Expression::Tuple(items) => {
                write!(f, "(")?;
                fmt_list(f, items)?;
                write!(f, ")")
            }
            Expression::Function { name, arguments } => {
                write!(f, "{}(", name)?;
                fmt_list(f, arguments)?;
                write!(f, ")")
            }
            Expression::Aggregate {
                function,
                argument,
                distinct,
            } => {
                write!(f, "{}(", function.name())?;
                if *distinct {
                    write!(f, "distinct ")?;
                }
                match argument {
                    Some(arg) => write!(f, "{}", arg)?,
                    None => write!(f, "*")?,
                }
                write!(f, ")")
            }
            Expression::WeightString(inner) => write!(f, "weight_string({})", inner),
            Expression::Offset(index) => write!(f, "[COLUMN {}]", index),
        }
    }
}

impl fmt::Display for OrderByExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.expression,
            if self.ascending { "asc" } else { "desc" }
        )
    }
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectItem::Expression { expr, alias } => {
                write!(f, "{}", expr)?;
                if let Some(alias) = alias {
                    write!(f, " as {}", Ident(alias))?;
                }
                Ok(())
            }
            SelectItem::Wildcard => write!(f, "*"),
            SelectItem::QualifiedWildcard(table) => write!(f, "{}.*", Ident(table)),
        }
    }
}
