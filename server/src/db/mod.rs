//! Database module for PostgreSQL persistence.

mod links;
mod pool;

pub use links::*;
pub use pool::*;
