//! Correlation-aware unification of unroll factors.
//!
//! Nodes with the most correlations are decided first. Once a node has a
//! factor vector, its translation is offered to every correlated node that is
//! still undecided, so producer and consumer bands end up unrolled along
//! matching dimensions.

use super::budget::BudgetMap;
use super::factors::{distribute, FactorList};
use crate::analysis::{band_shape, node_loop_band, Correlation};
use crate::ir::{DataflowFunc, OpId};
use crate::utils::errors::Diagnostic;
use crate::ParallelizeConfig;
use indexmap::IndexMap;

/// Factor decisions of the unifier.
#[derive(Debug, Clone, Default)]
pub struct UnifyOutcome {
    /// Factor vector per node, in decision order
    pub factors: IndexMap<OpId, FactorList>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Decide factor vectors for every node taking part in a correlation.
pub fn unify(
    func: &DataflowFunc,
    budgets: &BudgetMap,
    correlations: &IndexMap<OpId, Vec<Correlation>>,
    config: &ParallelizeConfig,
) -> UnifyOutcome {
    let mut outcome = UnifyOutcome::default();

    let mut ranked: Vec<(OpId, usize)> = correlations
        .iter()
        .map(|(&node, list)| (node, list.len()))
        .collect();
    // Stable, so ties keep the analysis order.
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    for (node, count) in ranked {
        let Some(corr_list) = correlations.get(&node).filter(|list| !list.is_empty()) else {
            continue;
        };

        let scalar = match budgets.get(&node) {
            Some(&budget) if config.complexity_aware => budget,
            _ => config.max_unroll_factor,
        };
        let band = node_loop_band(func, node);
        let shape = band_shape(func, &band);

        let base = match outcome.factors.get(&node) {
            Some(existing) if existing.len() == band.len() => existing.clone(),
            Some(existing) => {
                let diag = Diagnostic::warning(format!(
                    "factor vector of {} has {} entries but its band has {} loops",
                    func.name_of(node),
                    existing.len(),
                    band.len()
                ))
                .with_op(node)
                .with_note("node falls back to naive unrolling");
                diag.emit();
                outcome.diagnostics.push(diag);
                outcome.factors.shift_remove(&node);
                continue;
            }
            None => vec![1; band.len()],
        };

        let factors = distribute(scalar, &base, &shape);
        log::debug!(
            "node {}: {} correlations, parallel factor {}, factors {:?}",
            func.name_of(node),
            count,
            scalar,
            factors
        );

        outcome.factors.insert(node, factors.clone());

        for corr in corr_list {
            let other = corr.correlated_node(node);
            if outcome.factors.contains_key(&other) {
                continue;
            }
            let permuted = corr.permute_factors(node, &factors);
            log::debug!(
                "  correlated {} via map {:?}: factors {:?}",
                func.name_of(other),
                corr.correlate_map(node),
                permuted
            );
            outcome.factors.insert(other, permuted);
        }
    }

    outcome
}
