//! Error handling for the query planner

use thiserror::Error;

/// Main error type for planning operations
#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Column '{0}' in field list is ambiguous")]
    AmbiguousColumn(String),

    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    #[error("Table '{0}' not found")]
    UnknownTable(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PlannerError {
    /// Internal errors are invariant violations inside the planner itself,
    /// never caused by the statement a client sent.
    pub fn is_internal(&self) -> bool {
        matches!(self, PlannerError::Internal(_))
    }

    /// Short machine-readable classification used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            PlannerError::Parse(_) => "parse",
            PlannerError::Unsupported(_) => "unsupported",
            PlannerError::Internal(_) => "internal",
            PlannerError::AmbiguousColumn(_) => "ambiguous_column",
            PlannerError::UnknownColumn(_) => "unknown_column",
            PlannerError::UnknownTable(_) => "unknown_table",
            PlannerError::Schema(_) => "schema",
            PlannerError::Io(_) => "io",
            PlannerError::Serialization(_) => "serialization",
        }
    }
}

/// Result type alias for planning operations
pub type PlannerResult<T> = std::result::Result<T, PlannerError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_err {
    ($msg:expr) => {
        $crate::common::error::PlannerError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::common::error::PlannerError::Internal(format!($fmt, $($arg)*))
    };
}

/// Macro for creating unsupported-construct errors
#[macro_export]
macro_rules! unsupported_err {
    ($msg:expr) => {
        $crate::common::error::PlannerError::Unsupported($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::common::error::PlannerError::Unsupported(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_errors_are_distinguishable() {
        let err = internal_err!("offset for {} not found", "t.a");
        assert!(err.is_internal());
        assert_eq!(err.kind(), "internal");
        assert_eq!(err.to_string(), "Internal error: offset for t.a not found");

        let err = unsupported_err!("cross-shard correlated subquery");
        assert!(!err.is_internal());
        assert_eq!(err.kind(), "unsupported");
    }

    #[test]
    fn test_ambiguous_column_message_names_column() {
        let err = PlannerError::AmbiguousColumn("id".to_string());
        assert!(err.to_string().contains("'id'"));
    }
}
