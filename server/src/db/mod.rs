//! Database module for PostgreSQL persistence.

pub mod bricks;
pub mod documents;
mod pool;
pub mod relations;
pub mod versions;

pub use pool::*;
