//! Type system shared by the parser and the planner

pub mod logical_type;
pub mod value;

pub use logical_type::*;
pub use value::*;
