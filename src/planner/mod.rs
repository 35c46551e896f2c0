//! Query planning
//!
//! Turns a bound SELECT into a tree of operators in which everything the
//! database can do runs inside routes, and only what must combine rows from
//! several destinations stays central:
//!
//! 1. **Binding**: resolves tables and columns, computes dependencies
//! 2. **Building**: one route per table, joins, filters and horizons above
//! 3. **Phases**: pushdown rules run to a fixed point, merging routes
//! 4. **Offsets**: central operators learn where their inputs are
//! 5. **Generation**: every route gets the SQL it sends

pub mod aggregation;
pub mod binder;
pub mod builder;
pub mod columns;
pub mod context;
pub mod explain;
pub mod logical_plan;
pub mod merge;
pub mod offsets;
pub mod optimizer;
pub mod phases;
pub mod planner;
pub mod rewrite;
pub mod routing;
pub mod sql;

#[cfg(test)]
mod tests;

pub use binder::{Binder, SemanticTable, TableSet};
pub use context::PlanningContext;
pub use explain::PlanDescription;
pub use logical_plan::{OpId, Operator, PlanArena};
pub use optimizer::{RewriteRule, RuleSet};
pub use phases::Phase;
pub use planner::{PlannedQuery, QueryPlanner};
pub use routing::{Destination, Opcode, Routing};
pub use sql::DestinationQuery;
