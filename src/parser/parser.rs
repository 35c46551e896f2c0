//! SQL Parser
//!
//! Parses tokens into AST statements. Only the query subset the router plans
//! is accepted; everything else is a parse error.

use crate::common::error::{PlannerError, PlannerResult};
use crate::parser::ast::*;
use crate::parser::keywords::Keyword;
use crate::parser::tokenizer::{Token, TokenType};
use crate::types::Value;

/// SQL parser
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    /// Create a new parser with the given tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse a single statement
    pub fn parse_statement(&mut self) -> PlannerResult<Statement> {
        let statement = if self.current_token().is_keyword(Keyword::Explain) {
            self.advance();
            let format = self.parse_explain_format()?;
            Statement::Explain {
                format,
                query: self.parse_query()?,
            }
        } else {
            Statement::Query(self.parse_query()?)
        };

        while self.consume_token(&TokenType::Semicolon).is_ok() {}

        if !self.current_token().is_eof() {
            return Err(self.unexpected("end of statement"));
        }
        Ok(statement)
    }

    fn parse_explain_format(&mut self) -> PlannerResult<ExplainFormat> {
        if !self.current_token().is_keyword(Keyword::Format) {
            return Ok(ExplainFormat::Text);
        }
        self.advance();
        self.consume_token(&TokenType::Equals)?;
        let format = self.consume_identifier()?;
        match format.as_str() {
            "json" => Ok(ExplainFormat::Json),
            "text" | "traditional" | "tree" => Ok(ExplainFormat::Text),
            other => Err(PlannerError::Parse(format!(
                "Unknown EXPLAIN format: {}",
                other
            ))),
        }
    }

    /// query := term (UNION [ALL | DISTINCT] term)* [ORDER BY ...] [LIMIT ...]
    pub fn parse_query(&mut self) -> PlannerResult<Query> {
        let mut query = self.parse_query_term()?;

        while self.current_token().is_keyword(Keyword::Union) {
            self.advance();
            let distinct = if self.current_token().is_keyword(Keyword::All) {
                self.advance();
                false
            } else {
                if self.current_token().is_keyword(Keyword::Distinct) {
                    self.advance();
                }
                true
            };
            let right = self.parse_query_term()?;
            query = Query::Union(Box::new(UnionStatement {
                left: query,
                right,
                distinct,
                order_by: vec![],
                limit: None,
            }));
        }

        let order_by = self.parse_order_by()?;
        let limit = self.parse_limit()?;
        if order_by.is_empty() && limit.is_none() {
            return Ok(query);
        }

        match &mut query {
            Query::Select(select) if select.order_by.is_empty() && select.limit.is_none() => {
                select.order_by = order_by;
                select.limit = limit;
            }
            Query::Union(union) if union.order_by.is_empty() && union.limit.is_none() => {
                union.order_by = order_by;
                union.limit = limit;
            }
            _ => {
                return Err(PlannerError::Parse(
                    "Incorrect usage of ORDER BY / LIMIT".to_string(),
                ))
            }
        }
        Ok(query)
    }

    fn parse_query_term(&mut self) -> PlannerResult<Query> {
        match &self.current_token().token_type {
            TokenType::LeftParen => {
                self.advance();
                let query = self.parse_query()?;
                self.consume_token(&TokenType::RightParen)?;
                Ok(query)
            }
            TokenType::Keyword(Keyword::Select) => {
                Ok(Query::Select(Box::new(self.parse_select_core()?)))
            }
            _ => Err(self.unexpected("SELECT")),
        }
    }

    /// SELECT without the trailing ORDER BY / LIMIT, which belong to the
    /// enclosing query expression
    fn parse_select_core(&mut self) -> PlannerResult<SelectStatement> {
        self.consume_keyword(Keyword::Select)?;

        let mut select = SelectStatement::default();
        if self.current_token().is_keyword(Keyword::Distinct) {
            self.advance();
            select.distinct = true;
        } else if self.current_token().is_keyword(Keyword::All) {
            self.advance();
        }

        select.select_list = self.parse_select_list()?;

        if self.current_token().is_keyword(Keyword::From) {
            self.advance();
            select.from.push(self.parse_table_reference()?);
            while self.consume_token(&TokenType::Comma).is_ok() {
                select.from.push(self.parse_table_reference()?);
            }
        }

        if self.current_token().is_keyword(Keyword::Where) {
            self.advance();
            select.where_clause = Some(self.parse_expression()?);
        }

        if self.current_token().is_keyword(Keyword::Group) {
            self.advance();
            self.consume_keyword(Keyword::By)?;
            select.group_by = self.parse_expression_list()?;
        }

        if self.current_token().is_keyword(Keyword::Having) {
            self.advance();
            select.having = Some(self.parse_expression()?);
        }

        Ok(select)
    }

    fn parse_select_list(&mut self) -> PlannerResult<Vec<SelectItem>> {
        let mut items = vec![self.parse_select_item()?];
        while self.consume_token(&TokenType::Comma).is_ok() {
            items.push(self.parse_select_item()?);
        }
        Ok(items)
    }

    fn parse_select_item(&mut self) -> PlannerResult<SelectItem> {
        if self.current_token().token_type == TokenType::Star {
            self.advance();
            return Ok(SelectItem::Wildcard);
        }

        if let TokenType::Identifier(name) = &self.current_token().token_type {
            if self.peek_token(1).token_type == TokenType::Dot
                && self.peek_token(2).token_type == TokenType::Star
            {
                let table = name.clone();
                self.position += 3;
                return Ok(SelectItem::QualifiedWildcard(table));
            }
        }

        let expr = self.parse_expression()?;
        let alias = self.parse_optional_alias()?;
        Ok(SelectItem::Expression { expr, alias })
    }

    fn parse_optional_alias(&mut self) -> PlannerResult<Option<String>> {
        if self.current_token().is_keyword(Keyword::As) {
            self.advance();
            return match &self.current_token().token_type {
                TokenType::StringLiteral(alias) => {
                    let alias = alias.clone();
                    self.advance();
                    Ok(Some(alias))
                }
                _ => Ok(Some(self.consume_identifier()?)),
            };
        }
        if let TokenType::Identifier(alias) = &self.current_token().token_type {
            let alias = alias.clone();
            self.advance();
            return Ok(Some(alias));
        }
        Ok(None)
    }

    fn parse_table_reference(&mut self) -> PlannerResult<TableReference> {
        let mut left = self.parse_table_factor()?;

        loop {
            let join_type = match &self.current_token().token_type {
                TokenType::Keyword(Keyword::Join) => JoinType::Inner,
                TokenType::Keyword(Keyword::Inner) => {
                    self.advance();
                    JoinType::Inner
                }
                TokenType::Keyword(Keyword::Cross) => {
                    self.advance();
                    JoinType::Cross
                }
                TokenType::Keyword(Keyword::Left) => {
                    self.advance();
                    if self.current_token().is_keyword(Keyword::Outer) {
                        self.advance();
                    }
                    JoinType::Left
                }
                TokenType::Keyword(Keyword::Right) => {
                    self.advance();
                    if self.current_token().is_keyword(Keyword::Outer) {
                        self.advance();
                    }
                    JoinType::Right
                }
                _ => break,
            };
            self.consume_keyword(Keyword::Join)?;

            let right = self.parse_table_factor()?;
            let condition = if self.current_token().is_keyword(Keyword::On) {
                self.advance();
                Some(self.parse_expression()?)
            } else {
                None
            };

            if condition.is_none() && matches!(join_type, JoinType::Left | JoinType::Right) {
                return Err(PlannerError::Parse(
                    "Outer join requires an ON condition".to_string(),
                ));
            }

            left = TableReference::Join {
                left: Box::new(left),
                right: Box::new(right),
                join_type,
                condition,
            };
        }

        Ok(left)
    }

    fn parse_table_factor(&mut self) -> PlannerResult<TableReference> {
        if self.current_token().token_type == TokenType::LeftParen {
            self.advance();
            let starts_query = matches!(
                self.current_token().token_type,
                TokenType::Keyword(Keyword::Select) | TokenType::LeftParen
            );
            if !starts_query {
                let inner = self.parse_table_reference()?;
                self.consume_token(&TokenType::RightParen)?;
                return Ok(inner);
            }
            let subquery = self.parse_query()?;
            self.consume_token(&TokenType::RightParen)?;
            let alias = self.parse_optional_alias()?.ok_or_else(|| {
                PlannerError::Parse("Every derived table must have its own alias".to_string())
            })?;
            return Ok(TableReference::Derived {
                subquery: Box::new(subquery),
                alias,
                binding: None,
            });
        }

        let name = self.consume_identifier()?;
        let alias = self.parse_optional_alias()?;
        Ok(TableReference::Table {
            name,
            alias,
            binding: None,
        })
    }

    fn parse_order_by(&mut self) -> PlannerResult<Vec<OrderByExpression>> {
        if !self.current_token().is_keyword(Keyword::Order) {
            return Ok(vec![]);
        }
        self.advance();
        self.consume_keyword(Keyword::By)?;

        let mut order_by = Vec::new();
        loop {
            let expression = self.parse_expression()?;
            let ascending = if self.current_token().is_keyword(Keyword::Desc) {
                self.advance();
                false
            } else {
                if self.current_token().is_keyword(Keyword::Asc) {
                    self.advance();
                }
                true
            };
            order_by.push(OrderByExpression {
                expression,
                ascending,
            });
            if self.consume_token(&TokenType::Comma).is_err() {
                break;
            }
        }
        Ok(order_by)
    }

    /// LIMIT n | LIMIT n OFFSET m | LIMIT m, n
    fn parse_limit(&mut self) -> PlannerResult<Option<LimitClause>> {
        if !self.current_token().is_keyword(Keyword::Limit) {
            return Ok(None);
        }
        self.advance();
        let first = self.consume_unsigned()?;
        if self.consume_token(&TokenType::Comma).is_ok() {
            let count = self.consume_unsigned()?;
            return Ok(Some(LimitClause {
                limit: count,
                offset: Some(first),
            }));
        }
        let offset = if self.current_token().is_keyword(Keyword::Offset) {
            self.advance();
            Some(self.consume_unsigned()?)
        } else {
            None
        };
        Ok(Some(LimitClause {
            limit: first,
            offset,
        }))
    }

    /// Parse expression
    pub fn parse_expression(&mut self) -> PlannerResult<Expression> {
        self.parse_or_expression()
    }

    fn parse_or_expression(&mut self) -> PlannerResult<Expression> {
        let mut left = self.parse_and_expression()?;
        while self.current_token().is_keyword(Keyword::Or) {
            self.advance();
            let right = self.parse_and_expression()?;
            left = Expression::binary(left, BinaryOperator::Or, right);
        }
        Ok(left)
    }

    fn parse_and_expression(&mut self) -> PlannerResult<Expression> {
        let mut left = self.parse_not_expression()?;
        while self.current_token().is_keyword(Keyword::And) {
            self.advance();
            let right = self.parse_not_expression()?;
            left = Expression::binary(left, BinaryOperator::And, right);
        }
        Ok(left)
    }

    fn parse_not_expression(&mut self) -> PlannerResult<Expression> {
        if self.current_token().is_keyword(Keyword::Not) {
            self.advance();
            let expression = self.parse_not_expression()?;
            return Ok(Expression::Unary {
                operator: UnaryOperator::Not,
                expression: Box::new(expression),
            });
        }
        self.parse_comparison_expression()
    }

    fn parse_comparison_expression(&mut self) -> PlannerResult<Expression> {
        let left = self.parse_additive_expression()?;

        let operator = match &self.current_token().token_type {
            TokenType::Equals => Some(BinaryOperator::Equals),
            TokenType::NotEquals => Some(BinaryOperator::NotEquals),
            TokenType::LessThan => Some(BinaryOperator::LessThan),
            TokenType::LessThanOrEqual => Some(BinaryOperator::LessThanOrEqual),
            TokenType::GreaterThan => Some(BinaryOperator::GreaterThan),
            TokenType::GreaterThanOrEqual => Some(BinaryOperator::GreaterThanOrEqual),
            TokenType::Keyword(Keyword::Like) => Some(BinaryOperator::Like),
            _ => None,
        };
        if let Some(operator) = operator {
            self.advance();
            let right = self.parse_additive_expression()?;
            return Ok(Expression::binary(left, operator, right));
        }

        if self.current_token().is_keyword(Keyword::Is) {
            self.advance();
            let negated = if self.current_token().is_keyword(Keyword::Not) {
                self.advance();
                true
            } else {
                false
            };
            self.consume_keyword(Keyword::Null)?;
            return Ok(Expression::IsNull {
                expression: Box::new(left),
                negated,
            });
        }

        let negated = self.current_token().is_keyword(Keyword::Not)
            && matches!(
                self.peek_token(1).token_type,
                TokenType::Keyword(Keyword::In)
                    | TokenType::Keyword(Keyword::Between)
                    | TokenType::Keyword(Keyword::Like)
            );
        if negated {
            self.advance();
        }

        match &self.current_token().token_type {
            TokenType::Keyword(Keyword::In) => {
                self.advance();
                self.consume_token(&TokenType::LeftParen)?;
                if self.current_token().is_keyword(Keyword::Select) {
                    return Err(PlannerError::Parse(
                        "Subqueries in expressions are not supported".to_string(),
                    ));
                }
                let list = self.parse_expression_list()?;
                self.consume_token(&TokenType::RightParen)?;
                Ok(Expression::InList {
                    expression: Box::new(left),
                    list,
                    negated,
                })
            }
            TokenType::Keyword(Keyword::Between) => {
                self.advance();
                let low = self.parse_additive_expression()?;
                self.consume_keyword(Keyword::And)?;
                let high = self.parse_additive_expression()?;
                Ok(Expression::Between {
                    expression: Box::new(left),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                })
            }
            TokenType::Keyword(Keyword::Like) => {
                self.advance();
                let right = self.parse_additive_expression()?;
                Ok(Expression::binary(left, BinaryOperator::NotLike, right))
            }
            _ => Ok(left),
        }
    }

    fn parse_additive_expression(&mut self) -> PlannerResult<Expression> {
        let mut left = self.parse_multiplicative_expression()?;
        loop {
            let operator = match &self.current_token().token_type {
                TokenType::Plus => BinaryOperator::Add,
                TokenType::Minus => BinaryOperator::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative_expression()?;
            left = Expression::binary(left, operator, right);
        }
        Ok(left)
    }

    fn parse_multiplicative_expression(&mut self) -> PlannerResult<Expression> {
        let mut left = self.parse_unary_expression()?;
        loop {
            let operator = match &self.current_token().token_type {
                TokenType::Star => BinaryOperator::Multiply,
                TokenType::Divide => BinaryOperator::Divide,
                TokenType::Modulo => BinaryOperator::Modulo,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary_expression()?;
            left = Expression::binary(left, operator, right);
        }
        Ok(left)
    }

    fn parse_unary_expression(&mut self) -> PlannerResult<Expression> {
        match &self.current_token().token_type {
            TokenType::Minus => {
                self.advance();
                let expression = self.parse_unary_expression()?;
                // Fold negative numeric literals so they stay usable for routing
                Ok(match expression {
                    Expression::Literal(Value::Integer(v)) => {
                        Expression::Literal(Value::Integer(-v))
                    }
                    Expression::Literal(Value::Double(v)) => Expression::Literal(Value::double(-v.0)),
                    other => Expression::Unary {
                        operator: UnaryOperator::Minus,
                        expression: Box::new(other),
                    },
                })
            }
            TokenType::Plus => {
                self.advance();
                self.parse_unary_expression()
            }
            _ => self.parse_primary_expression(),
        }
    }

    fn parse_primary_expression(&mut self) -> PlannerResult<Expression> {
        let token = self.current_token().clone();
        match token.token_type {
            TokenType::NumericLiteral(text) => {
                self.advance();
                if text.contains('.') {
                    let value: f64 = text.parse().map_err(|_| {
                        PlannerError::Parse(format!("Invalid numeric literal: {}", text))
                    })?;
                    Ok(Expression::Literal(Value::double(value)))
                } else {
                    let value: i64 = text.parse().map_err(|_| {
                        PlannerError::Parse(format!("Invalid numeric literal: {}", text))
                    })?;
                    Ok(Expression::Literal(Value::Integer(value)))
                }
            }
            TokenType::StringLiteral(text) => {
                self.advance();
                Ok(Expression::Literal(Value::Varchar(text)))
            }
            TokenType::BindVariable(name) => {
                self.advance();
                Ok(Expression::BindVariable(name))
            }
            TokenType::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expression::Literal(Value::Null))
            }
            TokenType::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expression::Literal(Value::Boolean(true)))
            }
            TokenType::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expression::Literal(Value::Boolean(false)))
            }
            TokenType::LeftParen => {
                self.advance();
                if self.current_token().is_keyword(Keyword::Select) {
                    return Err(PlannerError::Parse(
                        "Subqueries in expressions are not supported".to_string(),
                    ));
                }
                let mut items = self.parse_expression_list()?;
                self.consume_token(&TokenType::RightParen)?;
                if items.len() == 1 {
                    Ok(items.remove(0))
                } else {
                    Ok(Expression::Tuple(items))
                }
            }
            TokenType::Identifier(name) => {
                self.advance();
                if self.current_token().token_type == TokenType::LeftParen {
                    return self.parse_function_call(name);
                }
                if self.current_token().token_type == TokenType::Dot {
                    self.advance();
                    let column = self.consume_identifier()?;
                    return Ok(Expression::column(Some(&name), &column));
                }
                Ok(Expression::column(None, &name))
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_function_call(&mut self, name: String) -> PlannerResult<Expression> {
        self.consume_token(&TokenType::LeftParen)?;

        if let Some(function) = AggregateFunction::from_name(&name) {
            if function == AggregateFunction::Count
                && self.current_token().token_type == TokenType::Star
            {
                self.advance();
                self.consume_token(&TokenType::RightParen)?;
                return Ok(Expression::Aggregate {
                    function: AggregateFunction::CountStar,
                    argument: None,
                    distinct: false,
                });
            }
            let distinct = if self.current_token().is_keyword(Keyword::Distinct) {
                self.advance();
                true
            } else {
                false
            };
            let argument = self.parse_expression()?;
            self.consume_token(&TokenType::RightParen)?;
            return Ok(Expression::Aggregate {
                function,
                argument: Some(Box::new(argument)),
                distinct,
            });
        }

        let arguments = if self.current_token().token_type == TokenType::RightParen {
            vec![]
        } else {
            self.parse_expression_list()?
        };
        self.consume_token(&TokenType::RightParen)?;

        if name == "weight_string" {
            return match <[Expression; 1]>::try_from(arguments) {
                Ok([inner]) => Ok(Expression::weight_string(inner)),
                Err(_) => Err(PlannerError::Parse(
                    "weight_string takes exactly one argument".to_string(),
                )),
            };
        }
        Ok(Expression::Function { name, arguments })
    }

    fn parse_expression_list(&mut self) -> PlannerResult<Vec<Expression>> {
        let mut expressions = vec![self.parse_expression()?];
        while self.consume_token(&TokenType::Comma).is_ok() {
            expressions.push(self.parse_expression()?);
        }
        Ok(expressions)
    }

    // Helper methods

    fn current_token(&self) -> &Token {
        self.peek_token(0)
    }

    fn peek_token(&self, ahead: usize) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.position + ahead).min(last)]
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
    }

    fn consume_token(&mut self, expected: &TokenType) -> PlannerResult<()> {
        if &self.current_token().token_type == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("{:?}", expected)))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> PlannerResult<()> {
        if self.current_token().is_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&keyword.to_string()))
        }
    }

    fn consume_identifier(&mut self) -> PlannerResult<String> {
        match &self.current_token().token_type {
            TokenType::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn consume_unsigned(&mut self) -> PlannerResult<u64> {
        match &self.current_token().token_type {
            TokenType::NumericLiteral(text) => {
                let value = text.parse::<u64>().map_err(|_| {
                    PlannerError::Parse(format!("Expected a non-negative integer, got {}", text))
                })?;
                self.advance();
                Ok(value)
            }
            _ => Err(self.unexpected("integer")),
        }
    }

    fn unexpected(&self, expected: &str) -> PlannerError {
        let token = self.current_token();
        PlannerError::Parse(format!(
            "Expected {} at line {}, column {}, found {:?}",
            expected, token.line, token.column, token.token_type
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_sql;

    fn select(sql: &str) -> SelectStatement {
        match parse_sql(sql).unwrap() {
            Statement::Query(Query::Select(select)) => *select,
            other => panic!("Expected SELECT, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_select_clauses() {
        let stmt = select(
            "SELECT a, count(*) AS c FROM t WHERE id = 5 GROUP BY a HAVING c > 1 ORDER BY c DESC LIMIT 10 OFFSET 2",
        );
        assert_eq!(stmt.select_list.len(), 2);
        assert_eq!(stmt.select_list[1].output_name(), "c");
        assert_eq!(stmt.where_clause.unwrap().to_string(), "id = 5");
        assert_eq!(stmt.group_by.len(), 1);
        assert!(!stmt.order_by[0].ascending);
        assert_eq!(
            stmt.limit,
            Some(LimitClause {
                limit: 10,
                offset: Some(2)
            })
        );
    }

    #[test]
    fn test_parse_tuple_in_and_is_null() {
        let stmt = select("select * from t where (a, b) in ((1, 2), (3, 4)) and c is not null");
        assert_eq!(
            stmt.where_clause.unwrap().to_string(),
            "(a, b) in ((1, 2), (3, 4)) and c is not null"
        );
    }

    #[test]
    fn test_parse_joins_and_derived_tables() {
        let stmt = select(
            "select u.id from users u left join orders o on u.id = o.user_id, (select 1 as one) as d",
        );
        assert_eq!(stmt.from.len(), 2);
        match &stmt.from[0] {
            TableReference::Join { join_type, .. } => assert_eq!(*join_type, JoinType::Left),
            other => panic!("Expected join, got {:?}", other),
        }
        assert!(matches!(&stmt.from[1], TableReference::Derived { alias, .. } if alias == "d"));
    }

    #[test]
    fn test_union_takes_trailing_order_by() {
        match parse_sql("select a from t union all select a from u order by a limit 3").unwrap() {
            Statement::Query(Query::Union(union)) => {
                assert!(!union.distinct);
                assert_eq!(union.order_by.len(), 1);
                assert_eq!(union.limit.map(|l| l.limit), Some(3));
                match &union.right {
                    Query::Select(right) => assert!(right.order_by.is_empty()),
                    other => panic!("Expected SELECT, got {:?}", other),
                }
            }
            other => panic!("Expected UNION, got {:?}", other),
        }
    }

    #[test]
    fn test_explain_format_json() {
        assert!(matches!(
            parse_sql("explain format=json select 1").unwrap(),
            Statement::Explain {
                format: ExplainFormat::Json,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_non_query_statements() {
        assert!(parse_sql("delete from t").is_err());
        assert!(parse_sql("select a from t where a in (select b from u)").is_err());
    }
}
