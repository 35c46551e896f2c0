//! Expression utilities used during planning

pub mod evaluator;
pub mod predicates;

pub use evaluator::*;
pub use predicates::*;
