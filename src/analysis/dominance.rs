//! Dominance over structured regions.
//!
//! Control flow is fully structured, so an operation dominates another when it
//! precedes (or encloses) one of the other's ancestors in a shared block.

use crate::ir::{DataflowFunc, OpId};

/// True if `a` dominates `b`: they are equal, `a` encloses `b`, or `a` comes
/// before the ancestor of `b` that shares `a`'s block.
pub fn dominates(func: &DataflowFunc, a: OpId, b: OpId) -> bool {
    if a == b {
        return true;
    }
    let block = func.op(a).parent;
    let mut current = b;
    loop {
        if current == a {
            return true;
        }
        if func.op(current).parent == block {
            break;
        }
        match func.op(current).parent {
            Some(parent) => current = parent,
            None => return false,
        }
    }
    match (func.position(a), func.position(current)) {
        (Some(pa), Some(pb)) => pa < pb,
        _ => false,
    }
}

/// Dominance that first hoists `a` out of regions not containing `b`.
///
/// An operation nested inside `a`'s region never dominates `a` itself.
pub fn cross_region_dominates(func: &DataflowFunc, a: OpId, b: OpId) -> bool {
    if a == b {
        return true;
    }
    if func.is_ancestor(b, a) {
        return false;
    }
    let mut a = a;
    while let Some(parent) = func.op(a).parent {
        if func.is_ancestor(parent, b) {
            break;
        }
        a = parent;
    }
    dominates(func, a, b)
}
