//! Utility modules for the dataflow optimizer.
//!
//! - Error types and diagnostics
//! - Text formatting for the IR printer

pub mod errors;
pub mod pretty;

// Re-exports
pub use errors::*;
pub use pretty::{CodeFormatter, format_list, format_list_with};
