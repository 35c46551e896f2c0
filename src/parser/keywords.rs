//! SQL keywords recognised by the tokenizer

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    All,
    And,
    As,
    Asc,
    Between,
    By,
    Cross,
    Desc,
    Distinct,
    Explain,
    False,
    Format,
    From,
    Group,
    Having,
    In,
    Inner,
    Is,
    Join,
    Left,
    Like,
    Limit,
    Not,
    Null,
    Offset,
    On,
    Or,
    Order,
    Outer,
    Right,
    Select,
    True,
    Union,
    Where,
}

impl Keyword {
    pub fn all() -> &'static [Keyword] {
        &[
            Keyword::All,
            Keyword::And,
            Keyword::As,
            Keyword::Asc,
            Keyword::Between,
            Keyword::By,
            Keyword::Cross,
            Keyword::Desc,
            Keyword::Distinct,
            Keyword::Explain,
            Keyword::False,
            Keyword::Format,
            Keyword::From,
            Keyword::Group,
            Keyword::Having,
            Keyword::In,
            Keyword::Inner,
            Keyword::Is,
            Keyword::Join,
            Keyword::Left,
            Keyword::Like,
            Keyword::Limit,
            Keyword::Not,
            Keyword::Null,
            Keyword::Offset,
            Keyword::On,
            Keyword::Or,
            Keyword::Order,
            Keyword::Outer,
            Keyword::Right,
            Keyword::Select,
            Keyword::True,
            Keyword::Union,
            Keyword::Where,
        ]
    }

    /// Keywords that end an implicit (AS-less) table or column alias
    pub fn terminates_alias(&self) -> bool {
        !matches!(self, Keyword::True | Keyword::False | Keyword::Null)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Keyword::All => "ALL",
            Keyword::And => "AND",
            Keyword::As => "AS",
            Keyword::Asc => "ASC",
            Keyword::Between => "BETWEEN",
            Keyword::By => "BY",
            Keyword::Cross => "CROSS",
            Keyword::Desc => "DESC",
            Keyword::Distinct => "DISTINCT",
            Keyword::Explain => "EXPLAIN",
            Keyword::False => "FALSE",
            Keyword::Format => "FORMAT",
            Keyword::From => "FROM",
            Keyword::Group => "GROUP",
            Keyword::Having => "HAVING",
            Keyword::In => "IN",
            Keyword::Inner => "INNER",
            Keyword::Is => "IS",
            Keyword::Join => "JOIN",
            Keyword::Left => "LEFT",
            Keyword::Like => "LIKE",
            Keyword::Limit => "LIMIT",
            Keyword::Not => "NOT",
            Keyword::Null => "NULL",
            Keyword::Offset => "OFFSET",
            Keyword::On => "ON",
            Keyword::Or => "OR",
            Keyword::Order => "ORDER",
            Keyword::Outer => "OUTER",
            Keyword::Right => "RIGHT",
            Keyword::Select => "SELECT",
            Keyword::True => "TRUE",
            Keyword::Union => "UNION",
            Keyword::Where => "WHERE",
        };
        write!(f, "{}", text)
    }
}
