//! Correlations between the loop bands of dataflow nodes.
//!
//! Two nodes are correlated when one writes a buffer the other reads, and
//! their band dimensions index the same buffer dimensions. Unrolling the two
//! bands with matching factors keeps the producer's and consumer's access
//! patterns compatible.

use super::buffers::find_buffer;
use super::legality::node_loop_band;
use crate::ir::{Access, DataflowFunc, OpId, ValueId};
use indexmap::IndexMap;

/// Factor per loop band dimension, outermost first.
pub type FactorList = Vec<u64>;

/// An undirected link between the bands of two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    first: OpId,
    second: OpId,
    /// `forward[i]` is the `second` band dimension matching `first` dimension `i`
    forward: Vec<Option<usize>>,
    /// `backward[j]` is the `first` band dimension matching `second` dimension `j`
    backward: Vec<Option<usize>>,
}

impl Correlation {
    /// Build a correlation from `first`'s point of view.
    ///
    /// `forward` has one entry per `first` band dimension; `second_dims` is the
    /// band depth of `second`.
    pub fn new(first: OpId, second: OpId, forward: Vec<Option<usize>>, second_dims: usize) -> Self {
        let mut backward = vec![None; second_dims];
        for (i, target) in forward.iter().enumerate() {
            if let Some(j) = *target {
                if j < second_dims && backward[j].is_none() {
                    backward[j] = Some(i);
                }
            }
        }
        Self {
            first,
            second,
            forward,
            backward,
        }
    }

    /// The node on the other side of the edge.
    pub fn correlated_node(&self, node: OpId) -> OpId {
        if node == self.first {
            self.second
        } else {
            self.first
        }
    }

    /// Dimension map from `node`'s band into the correlated node's band.
    pub fn correlate_map(&self, node: OpId) -> &[Option<usize>] {
        if node == self.first {
            &self.forward
        } else {
            &self.backward
        }
    }

    /// Band depth of the correlated node.
    fn target_dims(&self, node: OpId) -> usize {
        if node == self.first {
            self.backward.len()
        } else {
            self.forward.len()
        }
    }

    /// Translate `node`'s factors into the correlated node's band.
    ///
    /// Dimensions without a counterpart get factor one.
    pub fn permute_factors(&self, node: OpId, factors: &[u64]) -> FactorList {
        let mut permuted = vec![1; self.target_dims(node)];
        for (i, target) in self.correlate_map(node).iter().enumerate() {
            if let (Some(j), Some(&factor)) = (target, factors.get(i)) {
                if let Some(slot) = permuted.get_mut(*j) {
                    *slot = factor;
                }
            }
        }
        permuted
    }
}

/// Computes the correlations of every node in a function.
pub trait CorrelationAnalysis {
    /// Correlations per node, in node enumeration order. An empty list means
    /// no usable correlation for that node.
    fn correlations(&self, func: &DataflowFunc) -> IndexMap<OpId, Vec<Correlation>>;
}

/// Correlates producer/consumer nodes through the subscripts of shared buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessCorrelation;

struct BandAccesses {
    node: OpId,
    band: Vec<OpId>,
    reads: Vec<(ValueId, Access)>,
    writes: Vec<(ValueId, Access)>,
}

impl AccessCorrelation {
    fn collect(func: &DataflowFunc, node: OpId) -> BandAccesses {
        let band = node_loop_band(func, node);
        let mut reads = Vec::new();
        let mut writes = Vec::new();
        if let Some(&outermost) = band.first() {
            for op in func.walk_op(outermost) {
                if let Some(c) = func.as_compute(op) {
                    // Replicas from earlier unrolling carry no new information.
                    if !c.lanes.is_empty() {
                        continue;
                    }
                    for r in &c.reads {
                        if let Some(root) = find_buffer(func, r.memref) {
                            reads.push((root, r.clone()));
                        }
                    }
                    for w in &c.writes {
                        if let Some(root) = find_buffer(func, w.memref) {
                            writes.push((root, w.clone()));
                        }
                    }
                }
            }
        }
        BandAccesses { node, band, reads, writes }
    }

    /// Map `a`'s band dimensions onto `b`'s through accesses of shared buffers.
    fn match_dims(a: &BandAccesses, b: &BandAccesses) -> Option<Vec<Option<usize>>> {
        let pairs = a
            .writes
            .iter()
            .flat_map(move |w| b.reads.iter().map(move |r| (w, r)))
            .chain(a.reads.iter().flat_map(move |r| b.writes.iter().map(move |w| (r, w))))
            .filter(|((root_a, _), (root_b, _))| root_a == root_b);

        let mut forward = vec![None; a.band.len()];
        let mut shared = false;
        for ((_, access_a), (_, access_b)) in pairs {
            shared = true;
            for (i, &loop_a) in a.band.iter().enumerate() {
                if forward[i].is_some() {
                    continue;
                }
                let Some(position) = access_a.position_of(loop_a) else {
                    continue;
                };
                let loop_b = access_b
                    .indices
                    .get(position)
                    .and_then(|idx| idx.counterpart(&access_a.indices[position], loop_a));
                let target = loop_b.and_then(|loop_b| b.band.iter().position(|&l| l == loop_b));
                if target.is_some() && !forward.contains(&target) {
                    forward[i] = target;
                }
            }
        }
        (shared && forward.iter().any(Option::is_some)).then_some(forward)
    }
}

impl CorrelationAnalysis for AccessCorrelation {
    fn correlations(&self, func: &DataflowFunc) -> IndexMap<OpId, Vec<Correlation>> {
        let infos: Vec<BandAccesses> = func
            .nodes()
            .into_iter()
            .map(|node| Self::collect(func, node))
            .collect();

        let mut result: IndexMap<OpId, Vec<Correlation>> =
            infos.iter().map(|info| (info.node, Vec::new())).collect();

        for (idx, a) in infos.iter().enumerate() {
            if a.band.is_empty() {
                continue;
            }
            for b in infos.iter().skip(idx + 1) {
                if b.band.is_empty() {
                    continue;
                }
                if let Some(forward) = Self::match_dims(a, b) {
                    let corr = Correlation::new(a.node, b.node, forward, b.band.len());
                    log::debug!(
                        "correlated {} <-> {} with map {:?}",
                        func.name_of(a.node),
                        func.name_of(b.node),
                        corr.correlate_map(a.node)
                    );
                    if let Some(list) = result.get_mut(&a.node) {
                        list.push(corr.clone());
                    }
                    if let Some(list) = result.get_mut(&b.node) {
                        list.push(corr);
                    }
                }
            }
        }
        result
    }
}
