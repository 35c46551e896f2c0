use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL-level column types as far as the planner needs to know them.
///
/// The planner never evaluates rows, so only the properties that influence
/// plan shape matter: whether a value compares by collation (and therefore
/// needs a weight-string companion when merge-sorted centrally).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    Null,
    Boolean,
    #[serde(alias = "int", alias = "smallint", alias = "tinyint")]
    Integer,
    BigInt,
    #[serde(alias = "float")]
    Double,
    Decimal,
    Varchar,
    Char,
    Text,
    #[serde(alias = "varbinary", alias = "binary")]
    Blob,
    Date,
    #[serde(alias = "datetime")]
    Timestamp,
    /// Type could not be derived, e.g. a column of a table without an
    /// authoritative column list
    Unknown,
}

impl LogicalType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            LogicalType::Integer | LogicalType::BigInt | LogicalType::Double | LogicalType::Decimal
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, LogicalType::Varchar | LogicalType::Char | LogicalType::Text)
    }

    /// Whether comparing two values of this type depends on a collation.
    /// Unknown types are treated as collation-sensitive.
    pub fn needs_weight_string(&self) -> bool {
        self.is_string() || matches!(self, LogicalType::Unknown)
    }

    /// Result type of combining two operands arithmetically
    pub fn arithmetic(left: LogicalType, right: LogicalType) -> LogicalType {
        match (left, right) {
            (LogicalType::Double, _) | (_, LogicalType::Double) => LogicalType::Double,
            (LogicalType::Decimal, _) | (_, LogicalType::Decimal) => LogicalType::Decimal,
            (l, r) if l.is_numeric() && r.is_numeric() => LogicalType::BigInt,
            _ => LogicalType::Unknown,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalType::Null => "NULL",
            LogicalType::Boolean => "BOOLEAN",
            LogicalType::Integer => "INTEGER",
            LogicalType::BigInt => "BIGINT",
            LogicalType::Double => "DOUBLE",
            LogicalType::Decimal => "DECIMAL",
            LogicalType::Varchar => "VARCHAR",
            LogicalType::Char => "CHAR",
            LogicalType::Text => "TEXT",
            LogicalType::Blob => "BLOB",
            LogicalType::Date => "DATE",
            LogicalType::Timestamp => "TIMESTAMP",
            LogicalType::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}
