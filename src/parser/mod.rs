//! SQL front end
//!
//! Converts query text into the statement tree the planner consumes.

pub mod ast;
pub mod keywords;
pub mod parser;
pub mod tokenizer;

pub use ast::*;
pub use keywords::*;
pub use parser::*;
pub use tokenizer::*;

use crate::common::error::PlannerResult;

/// Main parser interface
pub struct SqlParser {
    tokenizer: Tokenizer,
}

impl SqlParser {
    pub fn new() -> Self {
        Self {
            tokenizer: Tokenizer::new(),
        }
    }

    /// Parse a SQL query string into a statement
    pub fn parse(&self, sql: &str) -> PlannerResult<Statement> {
        let tokens = self.tokenizer.tokenize(sql)?;
        let mut parser = Parser::new(tokens);
        parser.parse_statement()
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a single SQL statement (convenience function)
pub fn parse_sql(sql: &str) -> PlannerResult<Statement> {
    SqlParser::new().parse(sql)
}
