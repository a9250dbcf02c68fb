//! Parallelization of dataflow nodes.
//!
//! The pass runs in three steps:
//! 1. split a root budget over the schedule hierarchy ([`compute_budgets`]),
//! 2. optionally unify the factors of correlated nodes ([`unify`]),
//! 3. realize the factors on the loop bands of every node, as vectorization
//!    for bands writing external buffers and unroll-and-jam everywhere else.
//!
//! Nodes that received no unified factors are unrolled naively with their own
//! budget.

use super::budget::{compute_budgets, BudgetMap};
use super::factors::{distribute, FactorList};
use super::unify::unify;
use super::unrolling::{apply_loop_unroll_jam, apply_loop_vectorization};
use crate::analysis::{
    band_shape, node_loop_band, node_loop_bands, AccessCorrelation, ComplexityEstimator,
    CorrelationAnalysis, LegalityOracle, StructuralLegality, TripCountEstimator,
};
use crate::ir::{DataflowFunc, LoopBand, OpId};
use crate::transform::Transform;
use crate::utils::errors::{Diagnostic, TransformError};
use crate::ParallelizeConfig;
use indexmap::IndexMap;
use serde::Serialize;

pub const PASS_NAME: &str = "parallelize-dataflow-node";

/// How a band was parallelized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RealizedKind {
    UnrollJam,
    Vectorize,
}

/// A transformation applied to one band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedTransform {
    pub node: OpId,
    pub band: LoopBand,
    pub factors: FactorList,
    pub kind: RealizedKind,
}

/// Everything the pass decided and did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParallelizeReport {
    /// Budget per node
    pub budgets: BudgetMap,
    /// Unified factor vectors, empty when correlation is disabled
    pub factors: IndexMap<OpId, FactorList>,
    /// Bands actually rewritten, in application order
    pub transformed: Vec<AppliedTransform>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParallelizeReport {
    fn warn(&mut self, diag: Diagnostic) {
        diag.emit();
        self.diagnostics.push(diag);
    }
}

/// The dataflow node parallelization pass.
pub struct ParallelizeDataflowNode {
    config: ParallelizeConfig,
    estimator: Box<dyn ComplexityEstimator>,
    correlation: Box<dyn CorrelationAnalysis>,
    legality: Box<dyn LegalityOracle>,
}

impl ParallelizeDataflowNode {
    /// Create the pass with the structural default collaborators.
    pub fn new(config: ParallelizeConfig) -> Self {
        Self {
            config,
            estimator: Box::new(TripCountEstimator::new()),
            correlation: Box::new(AccessCorrelation),
            legality: Box::new(StructuralLegality),
        }
    }

    /// Replace the complexity estimator used for budgets.
    pub fn with_estimator(mut self, estimator: impl ComplexityEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    /// Replace the analysis that finds correlated nodes.
    pub fn with_correlation(mut self, correlation: impl CorrelationAnalysis + 'static) -> Self {
        self.correlation = Box::new(correlation);
        self
    }

    /// Replace the legality oracle consulted before each transformation.
    pub fn with_legality(mut self, legality: impl LegalityOracle + 'static) -> Self {
        self.legality = Box::new(legality);
        self
    }

    /// The configuration the pass runs with.
    pub fn config(&self) -> &ParallelizeConfig {
        &self.config
    }

    /// Run the pass. Budget failures abort before any loop is touched.
    pub fn run(&self, func: &mut DataflowFunc) -> Result<ParallelizeReport, TransformError> {
        let mut report = ParallelizeReport {
            budgets: compute_budgets(func, self.estimator.as_ref(), self.config.max_unroll_factor)?,
            ..ParallelizeReport::default()
        };

        if self.config.correlation_aware {
            let correlations = self.correlation.correlations(func);
            let outcome = unify(func, &report.budgets, &correlations, &self.config);
            report.diagnostics.extend(outcome.diagnostics);
            report.factors = outcome.factors;

            let unified: Vec<(OpId, FactorList)> =
                report.factors.iter().map(|(&n, f)| (n, f.clone())).collect();
            for (node, factors) in unified {
                self.apply_unified(func, node, &factors, &mut report);
            }
        }

        let naive: Vec<(OpId, u64)> = report
            .budgets
            .iter()
            .filter(|(node, _)| !report.factors.contains_key(*node))
            .map(|(&node, &budget)| (node, budget))
            .collect();
        for (node, budget) in naive {
            self.apply_naive_unroll(func, node, budget, &mut report);
        }

        log::info!(
            "{}: {} nodes budgeted, {} bands transformed",
            PASS_NAME,
            report.budgets.len(),
            report.transformed.len()
        );
        Ok(report)
    }

    /// Realize unified factors on the node's primary band.
    fn apply_unified(
        &self,
        func: &mut DataflowFunc,
        node: OpId,
        factors: &[u64],
        report: &mut ParallelizeReport,
    ) {
        let band = node_loop_band(func, node);
        if band.is_empty() {
            return;
        }
        if band.len() != factors.len() {
            report.warn(
                Diagnostic::warning(format!(
                    "factor vector of {} does not match its {}-loop band",
                    func.name_of(node),
                    band.len()
                ))
                .with_op(node),
            );
            return;
        }
        let trivial = factors.iter().all(|&f| f == 1);

        if self.legality.affects_external_buffer(func, &band) {
            if apply_loop_vectorization(func, &band, factors, self.legality.as_ref()) {
                if !trivial {
                    report.transformed.push(AppliedTransform {
                        node,
                        band,
                        factors: factors.to_vec(),
                        kind: RealizedKind::Vectorize,
                    });
                }
            } else {
                report.warn(
                    Diagnostic::warning(format!(
                        "cannot vectorize the band of {} with factors {:?}",
                        func.name_of(node),
                        factors
                    ))
                    .with_op(node)
                    .with_note("band writes an external buffer but is not parallel; left untouched"),
                );
            }
        } else if apply_loop_unroll_jam(func, &band, factors) {
            report.transformed.push(AppliedTransform {
                node,
                band,
                factors: factors.to_vec(),
                kind: RealizedKind::UnrollJam,
            });
        }
    }

    /// Unroll every band of `node` with its own budget.
    fn apply_naive_unroll(
        &self,
        func: &mut DataflowFunc,
        node: OpId,
        budget: u64,
        report: &mut ParallelizeReport,
    ) {
        let scalar = if self.config.complexity_aware {
            budget
        } else {
            self.config.max_unroll_factor
        };

        for band in node_loop_bands(func, node) {
            // Bands writing external buffers are unrolled whole.
            let band = if self.config.point_loop_only
                && !self.legality.affects_external_buffer(func, &band)
            {
                match self.legality.tile_point_split(func, &band) {
                    Some((_, point)) if !point.is_empty() => point,
                    _ => {
                        let note = Diagnostic::note(format!(
                            "{} has no point loops to unroll",
                            func.name_of(node)
                        ))
                        .with_op(node);
                        note.emit();
                        report.diagnostics.push(note);
                        continue;
                    }
                }
            } else {
                band
            };

            let shape = band_shape(func, &band);
            let factors = distribute(scalar, &vec![1; band.len()], &shape);
            if apply_loop_unroll_jam(func, &band, &factors) {
                report.transformed.push(AppliedTransform {
                    node,
                    band,
                    factors,
                    kind: RealizedKind::UnrollJam,
                });
            }
        }
    }
}

impl Transform for ParallelizeDataflowNode {
    fn apply(&self, func: &mut DataflowFunc) -> anyhow::Result<bool> {
        let report = self.run(func)?;
        Ok(!report.transformed.is_empty())
    }

    fn is_legal(&self, _func: &DataflowFunc) -> bool {
        self.config.max_unroll_factor > 0
    }

    fn name(&self) -> &str {
        PASS_NAME
    }
}
