//! Loop unroll-and-jam and vectorization of loop bands.
//!
//! Both transformations scale the step of every band loop by its factor and
//! replicate the computations of the innermost body once per lane:
//! ```text
//! for i = 0 to 8:
//!   for j = 0 to 8:
//!     S(i, j)
//! ```
//! After unroll-and-jam by `[2, 2]`:
//! ```text
//! for i = 0 to 8 step 2:
//!   for j = 0 to 8 step 2:
//!     S(i, j); S(i, j+1); S(i+1, j); S(i+1, j+1)
//! ```
//! Vectorization produces the same shape but additionally requires every band
//! loop to be parallel, and records the loops as vectorized.

use crate::analysis::LegalityOracle;
use crate::ir::{DataflowFunc, LoopTransform, OpId, OpKind};
use num_integer::Integer;

/// A band loop selected for unrolling.
#[derive(Debug, Clone, Copy)]
struct Lane {
    loop_op: OpId,
    factor: u64,
    /// Step before scaling, the distance between two lanes
    stride: i64,
}

/// Clamp `factor` so it divides the loop's static trip count.
fn effective_factor(func: &DataflowFunc, loop_op: OpId, factor: u64) -> u64 {
    match func.as_loop(loop_op).and_then(|l| l.trip_count()) {
        Some(0) => 1,
        Some(trip) => factor.gcd(&trip),
        None => factor,
    }
}

/// Scale loop steps and replicate the innermost computations.
///
/// Returns `false` without touching the IR if no loop has a factor above one.
fn replicate_band(
    func: &mut DataflowFunc,
    band: &[OpId],
    factors: &[u64],
    mark: fn(u64) -> LoopTransform,
) -> bool {
    let Some(&innermost) = band.last() else {
        return false;
    };
    if band.len() != factors.len() {
        return false;
    }

    let lanes: Vec<Lane> = band
        .iter()
        .zip(factors)
        .filter_map(|(&loop_op, &factor)| {
            let factor = effective_factor(func, loop_op, factor);
            let stride = func.as_loop(loop_op)?.step;
            (factor > 1).then_some(Lane { loop_op, factor, stride })
        })
        .collect();
    if lanes.is_empty() {
        return false;
    }

    for lane in &lanes {
        if let Some(l) = func.as_loop_mut(lane.loop_op) {
            l.step = l.step.saturating_mul(i64::try_from(lane.factor).unwrap_or(i64::MAX));
            l.transform = Some(mark(lane.factor));
        }
    }

    let offsets = lane_offsets(&lanes);
    let body = func.op(innermost).body.clone();
    let mut new_body = Vec::with_capacity(body.len() * (offsets.len() + 1));
    for op in body {
        new_body.push(op);
        let Some(compute) = func.as_compute(op).cloned() else {
            continue;
        };
        for offset in &offsets {
            let mut replica = compute.clone();
            replica.lanes.extend(offset.iter().copied());
            new_body.push(func.create_op(Some(innermost), OpKind::Compute(replica)));
        }
    }
    func.op_mut(innermost).body = new_body;
    true
}

/// Every non-zero lane combination as `(loop, iv offset)` pairs.
fn lane_offsets(lanes: &[Lane]) -> Vec<Vec<(OpId, i64)>> {
    let mut combos: Vec<Vec<(OpId, i64)>> = vec![Vec::new()];
    for lane in lanes {
        combos = combos
            .into_iter()
            .flat_map(|prefix| {
                (0..lane.factor).map(move |k| {
                    let mut combo = prefix.clone();
                    if k > 0 {
                        combo.push((lane.loop_op, (k as i64).saturating_mul(lane.stride)));
                    }
                    combo
                })
            })
            .collect();
    }
    combos.retain(|combo| !combo.is_empty());
    combos
}

/// Unroll-and-jam `band` with one factor per loop, outermost first.
///
/// Factors are clamped to divide static trip counts. Returns whether any loop
/// was unrolled.
pub fn apply_loop_unroll_jam(func: &mut DataflowFunc, band: &[OpId], factors: &[u64]) -> bool {
    let changed = replicate_band(func, band, factors, LoopTransform::UnrollJam);
    if changed {
        log::debug!("unroll-and-jam {:?} by {:?}", band, factors);
    }
    changed
}

/// Vectorize `band` with one factor per loop.
///
/// An all-ones vector is trivially applicable and leaves the IR untouched.
/// Returns `false` when some band loop is not parallel.
pub fn apply_loop_vectorization(
    func: &mut DataflowFunc,
    band: &[OpId],
    factors: &[u64],
    oracle: &dyn LegalityOracle,
) -> bool {
    if factors.iter().all(|&f| f == 1) {
        return true;
    }
    if let Some(&serial) = band.iter().find(|&&l| !oracle.is_parallel(func, l)) {
        log::debug!("cannot vectorize: {} is not parallel", func.name_of(serial));
        return false;
    }
    if replicate_band(func, band, factors, LoopTransform::Vectorize) {
        log::debug!("vectorize {:?} by {:?}", band, factors);
    }
    true
}
