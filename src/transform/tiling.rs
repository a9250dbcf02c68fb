//! Loop tiling transformation.
//!
//! Tiling strip-mines every loop of a band and sinks the resulting point loops
//! below all tile loops:
//! ```text
//! for i = 0 to N:
//!   for j = 0 to M:
//!     A[i][j] = ...
//! ```
//! becomes:
//! ```text
//! for i_tile = 0 to N step Ti:
//!   for j_tile = 0 to M step Tj:
//!     for i = 0 to Ti:           (point_of = i_tile)
//!       for j = 0 to Tj:         (point_of = j_tile)
//!         A[i_tile + i][j_tile + j] = ...
//! ```
//! The point loops keep the original names and every subscript becomes the
//! sum of the tile and point induction variables. Both loops inherit the
//! `parallel` annotation of the loop they were split from.

use crate::analysis::{node_loop_bands, LegalityOracle, StructuralLegality};
use crate::ir::{DataflowFunc, ForLoop, Index, LoopBand, OpId, OpKind};
use crate::transform::Transform;
use crate::utils::errors::{TransformError, TransformErrorKind};
use anyhow::Result;

const PASS_NAME: &str = "loop-tiling";

fn invalid(message: String) -> TransformError {
    TransformError::new(TransformErrorKind::InvalidTileSize, PASS_NAME, message)
}

/// Tile a perfectly nested `band` with one size per loop, outermost first.
///
/// Returns the new band: the original loops, now tile loops, followed by the
/// point loops.
pub fn tile_band(
    func: &mut DataflowFunc,
    band: &[OpId],
    sizes: &[u64],
) -> Result<LoopBand, TransformError> {
    if band.is_empty() {
        return Ok(LoopBand::new());
    }
    if band.len() != sizes.len() {
        return Err(invalid(format!(
            "{} tile sizes given for a band of {} loops",
            sizes.len(),
            band.len()
        )));
    }
    for pair in band.windows(2) {
        if func.op(pair[1]).parent != Some(pair[0]) || func.op(pair[0]).body.len() != 1 {
            return Err(TransformError::new(
                TransformErrorKind::NotApplicable,
                PASS_NAME,
                format!("{} is not perfectly nested", func.name_of(pair[1])),
            )
            .on(pair[1]));
        }
    }

    // Tiled subscripts are not nested, so tile and point loops are final.
    let already_tiled = band.iter().any(|&l| {
        func.as_loop(l).is_some_and(|l| l.point_of.is_some())
            || func.walk().into_iter().any(|op| func.as_loop(op).is_some_and(|p| p.point_of == Some(l)))
    });
    if already_tiled {
        return Err(TransformError::new(
            TransformErrorKind::NotApplicable,
            PASS_NAME,
            format!("band of {} is already tiled", func.name_of(band[0])),
        )
        .on(band[0]));
    }

    let mut headers = Vec::with_capacity(band.len());
    for (&loop_op, &size) in band.iter().zip(sizes) {
        let l = func
            .as_loop(loop_op)
            .ok_or_else(|| invalid(format!("{} is not a loop", func.name_of(loop_op))))?;
        let trip = l
            .trip_count()
            .ok_or_else(|| invalid(format!("{} has a dynamic trip count", func.name_of(loop_op))).on(loop_op))?;
        if size == 0 || trip % size != 0 {
            return Err(invalid(format!(
                "tile size {} does not divide the trip count {} of {}",
                size,
                trip,
                func.name_of(loop_op)
            ))
            .on(loop_op));
        }
        let size = i64::try_from(size)
            .ok()
            .filter(|size| size.checked_mul(l.step).is_some())
            .ok_or_else(|| invalid(format!("tile size {} overflows the step of {}", size, func.name_of(loop_op))).on(loop_op))?;
        headers.push((l.name.clone(), l.step, size, l.parallel));
    }

    // Build the point loops as a chain hanging off the innermost tile loop.
    let innermost = band[band.len() - 1];
    let body = std::mem::take(&mut func.op_mut(innermost).body);
    let mut parent = innermost;
    let mut points = Vec::with_capacity(band.len());
    for (&tile, (name, step, size, parallel)) in band.iter().zip(&headers) {
        let point_loop = ForLoop {
            parallel: *parallel,
            point_of: Some(tile),
            ..ForLoop::new(name.clone(), 0, Some(size * step), *step)
        };
        let point = func.push_op(Some(parent), OpKind::For(point_loop));
        points.push(point);
        parent = point;
    }
    for &op in &body {
        func.op_mut(op).parent = Some(parent);
    }
    func.op_mut(parent).body = body;

    for (&tile, (name, step, size, _)) in band.iter().zip(&headers) {
        if let Some(l) = func.as_loop_mut(tile) {
            l.name = format!("{}_tile", name);
            l.step = step * size;
        }
    }

    let redirect: Vec<(OpId, OpId)> = band.iter().copied().zip(points.iter().copied()).collect();
    for op in func.walk_op(parent) {
        if let OpKind::Compute(c) = &mut func.op_mut(op).kind {
            for access in c.reads.iter_mut().chain(c.writes.iter_mut()) {
                for index in access.indices.iter_mut() {
                    if let Index::Iv(l) = *index {
                        if let Some(&(tile, point)) = redirect.iter().find(|(tile, _)| *tile == l) {
                            *index = Index::Tiled { tile, point };
                        }
                    }
                }
            }
            for (l, _) in c.lanes.iter_mut() {
                if let Some(&(_, point)) = redirect.iter().find(|(tile, _)| tile == l) {
                    *l = point;
                }
            }
        }
    }

    log::debug!("tiled {:?} by {:?} into points {:?}", band, sizes, points);
    Ok(band.iter().copied().chain(points).collect())
}

/// A band may be tiled when every loop below the outermost is parallel.
pub fn is_tiling_legal(func: &DataflowFunc, band: &[OpId], oracle: &dyn LegalityOracle) -> bool {
    band.iter().skip(1).all(|&l| oracle.is_parallel(func, l))
        && band.iter().all(|&l| func.as_loop(l).is_some_and(|l| l.point_of.is_none()))
}

/// Tiles every band of every node.
#[derive(Debug, Clone)]
pub struct LoopTiling {
    /// Tile sizes starting from the outermost loop; a single size applies to all loops
    pub tile_sizes: Vec<u64>,
}

impl LoopTiling {
    pub fn new(tile_sizes: Vec<u64>) -> Self {
        Self { tile_sizes }
    }

    /// Same tile size in every dimension.
    pub fn uniform(size: u64) -> Self {
        Self { tile_sizes: vec![size] }
    }

    fn sizes_for(&self, depth: usize) -> Vec<u64> {
        match self.tile_sizes.as_slice() {
            [size] => vec![*size; depth],
            sizes => sizes.to_vec(),
        }
    }

    /// Every band that would be tiled, in node order.
    fn candidate_bands(&self, func: &DataflowFunc) -> Vec<LoopBand> {
        func.nodes()
            .into_iter()
            .flat_map(|node| node_loop_bands(func, node))
            .filter(|band| is_tiling_legal(func, band, &StructuralLegality))
            .collect()
    }
}

impl Transform for LoopTiling {
    fn apply(&self, func: &mut DataflowFunc) -> Result<bool> {
        let mut changed = false;
        for band in self.candidate_bands(func) {
            match tile_band(func, &band, &self.sizes_for(band.len())) {
                Ok(_) => changed = true,
                Err(err) => log::warn!("skipping band {:?}: {}", band, err),
            }
        }
        Ok(changed)
    }

    fn is_legal(&self, func: &DataflowFunc) -> bool {
        !self.tile_sizes.is_empty()
            && self.tile_sizes.iter().all(|&s| s > 0)
            && !self.candidate_bands(func).is_empty()
    }

    fn name(&self) -> &str {
        PASS_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FuncBuilder;

    fn nest() -> (DataflowFunc, OpId, OpId, OpId) {
        let mut b = FuncBuilder::new("f");
        let a = b.argument("A", vec![16, 8]);
        let n = b.node(None, "n");
        let i = b.for_loop(n, "i", 0, 16);
        let j = b.for_loop(i, "j", 0, 8);
        let acc = b.access(a, &[i, j]);
        let s = b.compute(j, "s", vec![acc.clone()], vec![acc]);
        (b.finish(), i, j, s)
    }

    #[test]
    fn test_tile_band_structure() {
        let (mut func, i, j, s) = nest();
        let band = tile_band(&mut func, &[i, j], &[4, 2]).unwrap();
        assert_eq!(band.len(), 4);
        let (pi, pj) = (band[2], band[3]);

        assert_eq!(func.as_loop(i).unwrap().step, 4);
        assert_eq!(func.as_loop(j).unwrap().step, 2);
        assert_eq!(func.op(j).body, vec![pi]);
        assert_eq!(func.op(pi).body, vec![pj]);
        assert_eq!(func.op(pj).body, vec![s]);
        assert_eq!(func.as_loop(pi).unwrap().point_of, Some(i));
        assert_eq!(func.as_loop(pj).unwrap().trip_count(), Some(2));

        let c = func.as_compute(s).unwrap();
        assert_eq!(
            c.writes[0].indices,
            vec![Index::Tiled { tile: i, point: pi }, Index::Tiled { tile: j, point: pj }]
        );
        assert!(crate::ir::print_func(&func).contains("A[i_tile + i, j_tile + j]"));
        assert!(func.verify().is_ok());

        assert_eq!(StructuralLegality.tile_point_split(&func, &band), Some((vec![i, j], vec![pi, pj])));
    }

    #[test]
    fn test_parallel_band_stays_parallel() {
        let (mut func, i, j, _) = nest();
        let oracle = StructuralLegality;
        assert!(oracle.is_parallel(&func, i) && oracle.is_parallel(&func, j));

        let band = tile_band(&mut func, &[i, j], &[4, 2]).unwrap();
        for &l in &band {
            assert!(oracle.is_parallel(&func, l), "{} lost parallelism", func.name_of(l));
        }
    }

    #[test]
    fn test_parallel_annotation_is_inherited() {
        let mut b = FuncBuilder::new("f");
        let s = b.argument("S", vec![1]);
        let n = b.node(None, "n");
        let i = b.for_loop(n, "i", 0, 8);
        let sum = crate::ir::Access::new(s, vec![Index::Const(0)]);
        b.compute(i, "reduce", vec![sum.clone()], vec![sum]);
        b.mark_parallel(i);
        let mut func = b.finish();

        let band = tile_band(&mut func, &[i], &[2]).unwrap();
        assert!(func.as_loop(i).unwrap().parallel);
        assert!(func.as_loop(band[1]).unwrap().parallel);
    }

    #[test]
    fn test_tiled_band_is_not_retiled() {
        let (mut func, i, j, _) = nest();
        let band = tile_band(&mut func, &[i, j], &[4, 2]).unwrap();
        let err = tile_band(&mut func, &[i, j], &[2, 2]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::NotApplicable);
        assert_eq!(tile_band(&mut func, &band[2..], &[2, 1]).unwrap_err().kind, TransformErrorKind::NotApplicable);
    }

    #[test]
    fn test_invalid_tile_sizes() {
        let (mut func, i, j, _) = nest();
        let err = tile_band(&mut func, &[i, j], &[3, 2]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::InvalidTileSize);
        assert_eq!(err.entity, Some(i));
        assert!(tile_band(&mut func, &[i, j], &[4]).is_err());
        assert!(tile_band(&mut func, &[i, j], &[0, 2]).is_err());
        // Failed attempts leave the nest alone.
        assert_eq!(func.op(i).body, vec![j]);
    }

    #[test]
    fn test_tiling_pass_skips_tiled_bands() {
        let (mut func, _, _, _) = nest();
        let pass = LoopTiling::uniform(2);
        assert!(pass.is_legal(&func));
        assert!(pass.apply(&mut func).unwrap());
        // Every remaining band contains point loops.
        assert!(!pass.is_legal(&func));
        assert!(!pass.apply(&mut func).unwrap());
    }
}
