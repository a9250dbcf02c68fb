//! Distribution of a scalar parallel factor across the dimensions of a band.
//!
//! A factor is valid for a loop when it divides the loop's static trip count.
//! Loops with a dynamic trip count accept any factor; empty loops accept only one.

pub use crate::analysis::correlation::FactorList;
use num_integer::Integer;

/// Divisors of `n` in ascending order; empty for zero.
fn divisors(n: u64) -> Vec<u64> {
    let mut small = Vec::new();
    let mut large = Vec::new();
    let mut d = 1;
    while d <= n / d {
        if n % d == 0 {
            small.push(d);
            if d != n / d {
                large.push(n / d);
            }
        }
        d += 1;
    }
    small.extend(large.into_iter().rev());
    small
}

/// Valid factors for a loop that divide `limit`, ascending.
fn candidates(trip: Option<u64>, limit: u64) -> Vec<u64> {
    match trip {
        Some(0) => vec![1],
        Some(t) => divisors(t.gcd(&limit)),
        None => divisors(limit),
    }
}

/// Grow `base` towards `max` one dimension at a time.
///
/// Every step raises the smallest factor (innermost on ties) to its next valid
/// value while the overall product keeps dividing `max`. Succeeds only if the
/// product lands exactly on `max`.
pub fn evenly_distributed_factors(
    max: u64,
    base: &[u64],
    shape: &[Option<u64>],
) -> Option<FactorList> {
    if base.len() != shape.len() || max == 0 {
        return None;
    }
    let mut factors: FactorList = base.iter().map(|&f| f.max(1)).collect();
    let mut product: u64 = factors.iter().try_fold(1u64, |acc, &f| acc.checked_mul(f))?;
    if product > max || max % product != 0 {
        return None;
    }

    while product < max {
        // Smallest factor grows first, innermost on ties.
        let mut order: Vec<usize> = (0..factors.len()).collect();
        order.sort_by_key(|&dim| (factors[dim], std::cmp::Reverse(dim)));

        let step = order.into_iter().find_map(|dim| {
            let current = factors[dim];
            let rest = product / current;
            candidates(shape[dim], max / rest)
                .into_iter()
                .find(|&candidate| candidate > current)
                .map(|next| (dim, next, rest * next))
        });
        match step {
            Some((dim, next, grown)) => {
                factors[dim] = next;
                product = grown;
            }
            None => break,
        }
    }

    (product == max).then_some(factors)
}

/// Largest valid factor of a loop not exceeding `limit`.
fn largest_factor(trip: Option<u64>, limit: u64) -> u64 {
    match trip {
        Some(0) => 1,
        Some(t) if t <= limit => t,
        Some(t) => divisors(t)
            .into_iter()
            .take_while(|&d| d <= limit)
            .last()
            .unwrap_or(1),
        None => limit,
    }
}

/// Greedy distribution that always succeeds: each dimension, innermost
/// first, takes the largest valid factor not exceeding what is left.
pub fn distributed_factors(max: u64, shape: &[Option<u64>]) -> FactorList {
    let mut factors = vec![1; shape.len()];
    let mut remaining = max.max(1);
    for dim in (0..shape.len()).rev() {
        let factor = largest_factor(shape[dim], remaining);
        factors[dim] = factor;
        remaining /= factor;
    }
    factors
}

/// Evenly distributed factors when possible, greedy ones otherwise.
pub fn distribute(max: u64, base: &[u64], shape: &[Option<u64>]) -> FactorList {
    evenly_distributed_factors(max, base, shape).unwrap_or_else(|| distributed_factors(max, shape))
}
