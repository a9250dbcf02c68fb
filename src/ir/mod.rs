//! Intermediate representation for dataflow functions.
//!
//! - `func`: the operation/value arena
//! - `builder`: programmatic construction
//! - `printer`: human-readable dump

pub mod func;
pub mod builder;
pub mod printer;

pub use func::*;
pub use builder::FuncBuilder;
pub use printer::print_func;

/// Outermost-to-innermost perfectly nested loops.
pub type LoopBand = Vec<OpId>;
