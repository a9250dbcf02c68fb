//! # dfopt - Dataflow Node Parallelization
//!
//! Loop-level parallelization for hierarchical dataflow programs:
//! - Complexity-weighted budget propagation over nested schedules
//! - Correlation-aware unification of unroll factors between nodes
//! - Unroll-and-jam and vectorization of loop bands
//! - Loop tiling into tile/point bands
//! - Redundant buffer copy elimination
//!
//! ## Architecture
//!
//! ```text
//! JSON/Builder → IR → Analysis (complexity, correlation, legality) → Transform → IR
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use dfopt::prelude::*;
//!
//! let mut b = FuncBuilder::new("kernel");
//! let out = b.argument("Out", vec![16]);
//! let top = b.schedule(None, "top");
//! let node = b.node(top, "store");
//! let i = b.for_loop(node, "i", 0, 16);
//! let w = b.access(out, &[i]);
//! b.compute(i, "s", vec![], vec![w]);
//! let mut func = b.finish();
//!
//! let report = dfopt::parallelize(&mut func, &ParallelizeConfig::with_max_unroll_factor(4))?;
//! ```

#![warn(clippy::all)]

pub mod ir;
pub mod analysis;
pub mod transform;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::ir::*;
    pub use crate::analysis::{
        ComplexityEstimator, CorrelationAnalysis, LegalityOracle,
        AccessCorrelation, Correlation, StructuralLegality, TableEstimator, TripCountEstimator,
    };
    pub use crate::transform::{
        ParallelizeDataflowNode, ParallelizeReport, SimplifyCopy, LoopTiling, Transform,
    };
    pub use crate::utils::errors::*;
    pub use crate::ParallelizeConfig;
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration of the parallelization pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelizeConfig {
    /// Root budget, and the flat factor when not complexity aware
    pub max_unroll_factor: u64,
    /// Only unroll the point loops of tiled bands
    pub point_loop_only: bool,
    /// Weight budgets by node complexity
    pub complexity_aware: bool,
    /// Unify factors of correlated nodes
    pub correlation_aware: bool,
}

impl Default for ParallelizeConfig {
    fn default() -> Self {
        Self {
            max_unroll_factor: 1,
            point_loop_only: false,
            complexity_aware: true,
            correlation_aware: true,
        }
    }
}

impl ParallelizeConfig {
    /// Default configuration with the given root budget.
    pub fn with_max_unroll_factor(max_unroll_factor: u64) -> Self {
        Self {
            max_unroll_factor,
            ..Default::default()
        }
    }

    /// Every node gets the same factor, independent of cost and correlation.
    pub fn flat(max_unroll_factor: u64) -> Self {
        Self {
            max_unroll_factor,
            complexity_aware: false,
            correlation_aware: false,
            ..Default::default()
        }
    }

    /// Unroll only point loops of tiled bands.
    pub fn point_loops(max_unroll_factor: u64) -> Self {
        Self {
            max_unroll_factor,
            point_loop_only: true,
            ..Default::default()
        }
    }
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parse a function from its JSON form and check it.
pub fn load_func(json: &str) -> Result<ir::DataflowFunc> {
    let func: ir::DataflowFunc = serde_json::from_str(json).context("invalid function JSON")?;
    func.verify().context("malformed function")?;
    Ok(func)
}

/// Run dataflow node parallelization with the default collaborators.
pub fn parallelize(
    func: &mut ir::DataflowFunc,
    config: &ParallelizeConfig,
) -> Result<transform::ParallelizeReport> {
    if config.max_unroll_factor == 0 {
        anyhow::bail!("max unroll factor must be positive");
    }
    let pass = transform::ParallelizeDataflowNode::new(config.clone());
    let report = pass
        .run(func)
        .with_context(|| format!("{} failed on @{}", transform::parallelize::PASS_NAME, func.name))?;
    Ok(report)
}

/// Eliminate redundant copies until a fixed point. Returns the rewrite count.
pub fn simplify_copies(func: &mut ir::DataflowFunc) -> usize {
    transform::simplify_copies(func)
}
