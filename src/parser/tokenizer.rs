//! SQL Tokenizer
//!
//! Breaks SQL strings into individual tokens for parsing.

use crate::common::error::{PlannerError, PlannerResult};
use crate::parser::keywords::Keyword;
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

/// SQL token types
#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    // Literals
    Identifier(String),
    StringLiteral(String),
    NumericLiteral(String),
    /// `:name` placeholder supplied by the client at execute time
    BindVariable(String),

    // Keywords
    Keyword(Keyword),

    // Operators
    Plus,               // +
    Minus,              // -
    Divide,             // /
    Modulo,             // %
    Equals,             // =
    NotEquals,          // != or <>
    LessThan,           // <
    GreaterThan,        // >
    LessThanOrEqual,    // <=
    GreaterThanOrEqual, // >=

    // Punctuation
    LeftParen,  // (
    RightParen, // )
    Comma,      // ,
    Dot,        // .
    Semicolon,  // ;

    // Special
    Star, // *
    EOF,
}

/// SQL token with position information
#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(token_type: TokenType, line: usize, column: usize) -> Self {
        Self {
            token_type,
            line,
            column,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.token_type, TokenType::EOF)
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.token_type, TokenType::Keyword(k) if k == keyword)
    }
}

/// SQL tokenizer
pub struct Tokenizer {
    keywords: HashMap<String, Keyword>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        let keywords = Keyword::all()
            .iter()
            .map(|keyword| (keyword.to_string(), *keyword))
            .collect();
        Self { keywords }
    }

    /// Tokenize a SQL string into tokens
    pub fn tokenize(&self, sql: &str) -> PlannerResult<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut chars = sql.chars().peekable();
        let mut line = 1;
        let mut column = 1;

        while let Some(&ch) = chars.peek() {
            if ch.is_whitespace() {
                chars.next();
                if ch == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
                continue;
            }

            let start_column = column;
            let single = |token_type: TokenType| Token::new(token_type, line, start_column);

            let token = match ch {
                '\'' => {
                    let text = self.consume_quoted(&mut chars, '\'', &mut column)?;
                    single(TokenType::StringLiteral(text))
                }
                '"' | '`' => {
                    let text = self.consume_quoted(&mut chars, ch, &mut column)?;
                    single(TokenType::Identifier(text))
                }
                '0'..='9' => {
                    let text = self.consume_number(&mut chars, &mut column);
                    single(TokenType::NumericLiteral(text))
                }
                ':' => {
                    chars.next();
                    column += 1;
                    match chars.peek() {
                        Some(&c) if self.is_identifier_start(c) => {
                            let name = self.consume_identifier(&mut chars, &mut column);
                            single(TokenType::BindVariable(name))
                        }
                        _ => {
                            return Err(PlannerError::Parse(format!(
                                "Expected bind variable name after ':' at line {}, column {}",
                                line, start_column
                            )))
                        }
                    }
                }
                '!' | '<' | '>' => {
                    chars.next();
                    column += 1;
                    let next = chars.peek().copied();
                    let (token_type, extra) = match (ch, next) {
                        ('!', Some('=')) => (TokenType::NotEquals, true),
                        ('<', Some('=')) => (TokenType::LessThanOrEqual, true),
                        ('<', Some('>')) => (TokenType::NotEquals, true),
                        ('<', _) => (TokenType::LessThan, false),
                        ('>', Some('=')) => (TokenType::GreaterThanOrEqual, true),
                        ('>', _) => (TokenType::GreaterThan, false),
                        _ => {
                            return Err(PlannerError::Parse(
                                "Unexpected '!' character".to_string(),
                            ))
                        }
                    };
                    if extra {
                        chars.next();
                        column += 1;
                    }
                    single(token_type)
                }
                _ if self.is_identifier_start(ch) => {
                    let text = self.consume_identifier(&mut chars, &mut column);
                    match self.keywords.get(&text.to_uppercase()) {
                        Some(&keyword) => single(TokenType::Keyword(keyword)),
                        None => single(TokenType::Identifier(text.to_lowercase())),
                    }
                }
                _ => {
                    let token_type = match ch {
                        '(' => TokenType::LeftParen,
                        ')' => TokenType::RightParen,
                        ',' => TokenType::Comma,
                        '.' => TokenType::Dot,
                        ';' => TokenType::Semicolon,
                        '*' => TokenType::Star,
                        '+' => TokenType::Plus,
                        '-' => TokenType::Minus,
                        '/' => TokenType::Divide,
                        '%' => TokenType::Modulo,
                        '=' => TokenType::Equals,
                        _ => {
                            return Err(PlannerError::Parse(format!(
                                "Unexpected character: {}",
                                ch
                            )))
                        }
                    };
                    chars.next();
                    column += 1;
                    single(token_type)
                }
            };
            tokens.push(token);
        }

        tokens.push(Token::new(TokenType::EOF, line, column));
        Ok(tokens)
    }

    /// Quoted string or identifier; a doubled quote character escapes itself
    fn consume_quoted(
        &self,
        chars: &mut Peekable<Chars>,
        quote: char,
        column: &mut usize,
    ) -> PlannerResult<String> {
        chars.next();
        *column += 1;

        let mut result = String::new();
        loop {
            match chars.next() {
                Some(c) if c == quote => {
                    *column += 1;
                    if chars.peek() == Some(&quote) {
                        chars.next();
                        *column += 1;
                        result.push(quote);
                    } else {
                        return Ok(result);
                    }
                }
                Some('\\') if quote == '\'' => {
                    *column += 1;
                    if let Some(escaped) = chars.next() {
                        *column += 1;
                        result.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                }
                Some(c) => {
                    *column += 1;
                    result.push(c);
                }
                None => {
                    return Err(PlannerError::Parse(format!(
                        "Unterminated quoted text starting with {}",
                        quote
                    )))
                }
            }
        }
    }

    fn consume_number(&self, chars: &mut Peekable<Chars>, column: &mut usize) -> String {
        let mut result = String::new();
        let mut seen_dot = false;
        while let Some(&ch) = chars.peek() {
            if ch.is_ascii_digit() || (ch == '.' && !seen_dot) {
                seen_dot |= ch == '.';
                result.push(ch);
                chars.next();
                *column += 1;
            } else {
                break;
            }
        }
        result
    }

    fn consume_identifier(&self, chars: &mut Peekable<Chars>, column: &mut usize) -> String {
        let mut result = String::new();
        while let Some(&ch) = chars.peek() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                result.push(ch);
                chars.next();
                *column += 1;
            } else {
                break;
            }
        }
        result
    }

    fn is_identifier_start(&self, ch: char) -> bool {
        ch.is_alphabetic() || ch == '_'
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(sql: &str) -> Vec<TokenType> {
        Tokenizer::new()
            .tokenize(sql)
            .unwrap()
            .into_iter()
            .map(|t| t.token_type)
            .collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            types("SELECT Id FROM users"),
            vec![
                TokenType::Keyword(Keyword::Select),
                TokenType::Identifier("id".to_string()),
                TokenType::Keyword(Keyword::From),
                TokenType::Identifier("users".to_string()),
                TokenType::EOF,
            ]
        );
    }

    #[test]
    fn test_operators_and_bind_variables() {
        assert_eq!(
            types("a <> :v1 and b <= 2.5"),
            vec![
                TokenType::Identifier("a".to_string()),
                TokenType::NotEquals,
                TokenType::BindVariable("v1".to_string()),
                TokenType::Keyword(Keyword::And),
                TokenType::Identifier("b".to_string()),
                TokenType::LessThanOrEqual,
                TokenType::NumericLiteral("2.5".to_string()),
                TokenType::EOF,
            ]
        );
    }

    #[test]
    fn test_quoted_text() {
        assert_eq!(
            types("'it''s' `Weird Name`"),
            vec![
                TokenType::StringLiteral("it's".to_string()),
                TokenType::Identifier("Weird Name".to_string()),
                TokenType::EOF,
            ]
        );
        assert!(Tokenizer::new().tokenize("'open").is_err());
    }
}
