//! Loop band discovery and legality oracles.
//!
//! Bands are perfectly nested loop chains inside a node. The realizer asks
//! three questions about them: is a loop parallel, does a band write memory
//! owned outside its node, and how does a band split into tile and point loops.

use super::buffers::{buffer_op, find_buffer};
use crate::ir::{DataflowFunc, LoopBand, OpId, OpKind};

/// Legality questions asked before transforming a band.
pub trait LegalityOracle {
    /// True if `loop_op` carries no inter-iteration dependence.
    fn is_parallel(&self, func: &DataflowFunc, loop_op: OpId) -> bool;

    /// True if the band writes a buffer not private to its enclosing node.
    fn affects_external_buffer(&self, func: &DataflowFunc, band: &[OpId]) -> bool;

    /// Split a band into `(tile, point)` sub-bands. `None` if not tileable.
    fn tile_point_split(&self, func: &DataflowFunc, band: &[OpId]) -> Option<(LoopBand, LoopBand)>;
}

/// Answers the legality questions from the IR structure alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralLegality;

impl LegalityOracle for StructuralLegality {
    fn is_parallel(&self, func: &DataflowFunc, loop_op: OpId) -> bool {
        match func.as_loop(loop_op) {
            Some(l) if l.parallel => return true,
            Some(_) => {}
            None => return false,
        }

        let computes: Vec<_> = func
            .walk_op(loop_op)
            .into_iter()
            .filter_map(|op| func.as_compute(op))
            .collect();

        for compute in &computes {
            for write in &compute.writes {
                // Every iteration must write its own element.
                if write.position_of(loop_op).is_none() {
                    return false;
                }
                let root = find_buffer(func, write.memref);
                for other in computes.iter().flat_map(|c| c.accesses()) {
                    if root.is_none() || find_buffer(func, other.memref) == root {
                        if other.memref != write.memref || other.indices != write.indices {
                            return false;
                        }
                    }
                }
            }
        }

        // Copies inside the loop move whole buffers every iteration.
        !func
            .walk_op(loop_op)
            .into_iter()
            .any(|op| matches!(func.op(op).kind, OpKind::Copy { .. }))
    }

    fn affects_external_buffer(&self, func: &DataflowFunc, band: &[OpId]) -> bool {
        let Some(&outermost) = band.first() else {
            return false;
        };
        let node = func.enclosing_node(outermost);

        for op in func.walk_op(outermost) {
            let written = match &func.op(op).kind {
                OpKind::Compute(c) => c.writes.iter().map(|w| w.memref).collect(),
                OpKind::Copy { target, .. } => vec![*target],
                _ => Vec::new(),
            };
            for memref in written {
                let owner = find_buffer(func, memref)
                    .and_then(|root| buffer_op(func, root))
                    .and_then(|buf| func.enclosing_node(buf));
                // Arguments, unresolvable memrefs and foreign buffers are external.
                if owner.is_none() || owner != node {
                    return true;
                }
            }
        }
        false
    }

    fn tile_point_split(&self, func: &DataflowFunc, band: &[OpId]) -> Option<(LoopBand, LoopBand)> {
        let mut tile = LoopBand::new();
        let mut point = LoopBand::new();
        for &op in band {
            let l = func.as_loop(op)?;
            match l.point_of {
                Some(tile_loop) => {
                    if !tile.contains(&tile_loop) {
                        return None;
                    }
                    point.push(op);
                }
                None => {
                    if !point.is_empty() {
                        return None;
                    }
                    tile.push(op);
                }
            }
        }
        Some((tile, point))
    }
}

/// Loop band ending at `innermost`, extended outward while nesting is perfect.
pub fn band_from_innermost(func: &DataflowFunc, innermost: OpId) -> LoopBand {
    let mut band = vec![innermost];
    let mut current = innermost;
    while let Some(parent) = func.op(current).parent {
        if func.as_loop(parent).is_none() || func.op(parent).body.len() != 1 {
            break;
        }
        band.push(parent);
        current = parent;
    }
    band.reverse();
    band
}

/// Every band of `node`, one per loop without nested loops or schedules.
pub fn node_loop_bands(func: &DataflowFunc, node: OpId) -> Vec<LoopBand> {
    func.walk_op(node)
        .into_iter()
        .filter(|&op| func.as_loop(op).is_some() && func.enclosing_node(op) == Some(node))
        .filter(|&op| {
            func.op(op).body.iter().all(|&child| {
                !matches!(func.op(child).kind, OpKind::For(_) | OpKind::Schedule { .. })
            })
        })
        .map(|innermost| band_from_innermost(func, innermost))
        .collect()
}

/// The primary band of `node`: its first top-level loop, descended while the
/// nest stays perfect. Empty if the node has no top-level loop.
pub fn node_loop_band(func: &DataflowFunc, node: OpId) -> LoopBand {
    let mut band = LoopBand::new();
    let Some(&first) = func
        .op(node)
        .body
        .iter()
        .find(|&&op| func.as_loop(op).is_some())
    else {
        return band;
    };
    let mut current = first;
    loop {
        band.push(current);
        match func.op(current).body.as_slice() {
            [only] if func.as_loop(*only).is_some() => current = *only,
            _ => break,
        }
    }
    band
}

/// Static trip counts of a band, outermost first.
pub fn band_shape(func: &DataflowFunc, band: &[OpId]) -> Vec<Option<u64>> {
    band.iter()
        .map(|&op| func.as_loop(op).and_then(|l| l.trip_count()))
        .collect()
}
