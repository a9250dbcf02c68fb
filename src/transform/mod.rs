//! Transformation passes over dataflow functions.

pub mod budget;
pub mod factors;
pub mod parallelize;
pub mod simplify_copy;
pub mod tiling;
pub mod unify;
pub mod unrolling;

pub use budget::{compute_budgets, BudgetMap};
pub use factors::{distribute, distributed_factors, evenly_distributed_factors, FactorList};
pub use parallelize::{AppliedTransform, ParallelizeDataflowNode, ParallelizeReport, RealizedKind};
pub use simplify_copy::{simplify_buffer_copy, simplify_copies, CopyRewrite, SimplifyCopy};
pub use tiling::{tile_band, LoopTiling};
pub use unify::{unify, UnifyOutcome};
pub use unrolling::{apply_loop_unroll_jam, apply_loop_vectorization};

use crate::ir::DataflowFunc;
use anyhow::Result;

/// Transformation pass trait.
pub trait Transform {
    /// Apply the transformation. Returns whether the function changed.
    fn apply(&self, func: &mut DataflowFunc) -> Result<bool>;

    /// Check if the transformation can do anything on `func`.
    fn is_legal(&self, func: &DataflowFunc) -> bool;

    /// Get transformation name.
    fn name(&self) -> &str;
}
