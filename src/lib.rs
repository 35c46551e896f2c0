//! Prism Router - split-aware query planner for sharded SQL
//!
//! Plans SELECT statements over tables partitioned across shards by vindexes
//! and, within a shard, across sub-tables by a split key. The result is a
//! tree of operators whose routes carry the destinations and the SQL to send
//! them, with the remaining work (merge-sorting, combining partial
//! aggregates, joining across routes) left to central operators.

pub mod common;
pub mod expression;
pub mod parser;
pub mod planner;
pub mod schema;
pub mod types;

// Re-export common types for convenience
pub use common::{PlannerConfig, PlannerError, PlannerResult};

pub use expression::BindVars;
pub use parser::{parse_sql, ExplainFormat, Statement};
pub use planner::{PlanDescription, PlannedQuery, QueryPlanner};
pub use schema::{SchemaLookup, VSchema};
pub use types::{LogicalType, Value};
