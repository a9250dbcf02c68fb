//! Read-only analyses consumed by the transformation passes.

pub mod buffers;
pub mod complexity;
pub mod correlation;
pub mod dominance;
pub mod legality;

pub use buffers::{buffer_op, find_buffer, find_buffer_users};
pub use complexity::{ComplexityEstimator, TableEstimator, TripCountEstimator};
pub use correlation::{AccessCorrelation, Correlation, CorrelationAnalysis, FactorList};
pub use dominance::{cross_region_dominates, dominates};
pub use legality::{
    band_from_innermost, band_shape, node_loop_band, node_loop_bands, LegalityOracle,
    StructuralLegality,
};
