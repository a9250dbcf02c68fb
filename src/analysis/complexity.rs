//! Complexity estimation for nodes and schedules.
//!
//! The budget propagator only needs relative costs. A schedule's complexity is
//! the sum of its direct nodes, and is unavailable as soon as any node is.

use crate::ir::{DataflowFunc, OpId, OpKind};
use indexmap::IndexMap;

/// Prices nodes and schedules.
pub trait ComplexityEstimator {
    /// Estimated cost of a node, or `None` when it cannot be priced.
    fn node_complexity(&self, func: &DataflowFunc, node: OpId) -> Option<u64>;

    /// Aggregate cost of the nodes directly inside `schedule`.
    fn schedule_complexity(&self, func: &DataflowFunc, schedule: OpId) -> Option<u64> {
        func.schedule_nodes(schedule)
            .into_iter()
            .map(|node| self.node_complexity(func, node))
            .try_fold(0u64, |acc, c| c.map(|c| acc.saturating_add(c)))
    }
}

/// Counts dynamic compute executions using static trip counts.
///
/// Loops multiply their body by the trip count, computes cost one, copies cost
/// one per copied element. Any loop with a dynamic bound makes the estimate
/// unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct TripCountEstimator;

impl TripCountEstimator {
    pub fn new() -> Self {
        Self
    }

    fn op_complexity(&self, func: &DataflowFunc, op: OpId) -> Option<u64> {
        let data = func.op(op);
        match &data.kind {
            OpKind::For(l) => {
                let body = self.body_complexity(func, op)?;
                Some(l.trip_count()?.saturating_mul(body))
            }
            OpKind::Node { .. } => self.body_complexity(func, op),
            OpKind::Schedule { .. } => self.schedule_complexity(func, op),
            OpKind::Compute(_) => Some(1),
            OpKind::Copy { target, .. } => Some(func.value(*target).num_elements()),
            OpKind::Buffer { .. } | OpKind::View { .. } => Some(0),
        }
    }

    fn body_complexity(&self, func: &DataflowFunc, op: OpId) -> Option<u64> {
        func.op(op)
            .body
            .iter()
            .map(|&child| self.op_complexity(func, child))
            .try_fold(0u64, |acc, c| c.map(|c| acc.saturating_add(c)))
    }
}

impl ComplexityEstimator for TripCountEstimator {
    fn node_complexity(&self, func: &DataflowFunc, node: OpId) -> Option<u64> {
        self.body_complexity(func, node)
    }
}

/// Host-supplied node costs; nodes missing from the table are unavailable.
#[derive(Debug, Clone, Default)]
pub struct TableEstimator {
    costs: IndexMap<OpId, u64>,
}

impl TableEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, node: OpId, cost: u64) -> Self {
        self.costs.insert(node, cost);
        self
    }
}

impl ComplexityEstimator for TableEstimator {
    fn node_complexity(&self, _func: &DataflowFunc, node: OpId) -> Option<u64> {
        self.costs.get(&node).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncBuilder, ForLoop};

    #[test]
    fn test_trip_count_estimate() {
        let mut b = FuncBuilder::new("f");
        let a = b.argument("A", vec![8, 4]);
        let top = b.schedule(None, "top");
        let n0 = b.node(top, "n0");
        let i = b.for_loop(n0, "i", 0, 8);
        let j = b.for_loop(i, "j", 0, 4);
        let w = b.access(a, &[i, j]);
        b.compute(j, "s0", vec![], vec![w.clone()]);
        b.compute(j, "s1", vec![], vec![w]);
        let n1 = b.node(top, "n1");
        let k = b.for_loop(n1, "k", 0, 8);
        b.compute(k, "s2", vec![], vec![]);
        let func = b.finish();

        let est = TripCountEstimator::new();
        assert_eq!(est.node_complexity(&func, n0), Some(64));
        assert_eq!(est.node_complexity(&func, n1), Some(8));
        assert_eq!(est.schedule_complexity(&func, top), Some(72));
    }

    #[test]
    fn test_dynamic_bound_is_unavailable() {
        let mut b = FuncBuilder::new("f");
        let top = b.schedule(None, "top");
        let n0 = b.node(top, "n0");
        let n1 = b.node(top, "n1");
        let l = b.loop_with(n0, ForLoop::new("i", 0, None, 1));
        b.compute(l, "s", vec![], vec![]);
        b.compute(n1, "t", vec![], vec![]);
        let func = b.finish();

        let est = TripCountEstimator::new();
        assert_eq!(est.node_complexity(&func, n0), None);
        assert_eq!(est.node_complexity(&func, n1), Some(1));
        assert_eq!(est.schedule_complexity(&func, top), None);
    }

    #[test]
    fn test_table_estimator() {
        let mut b = FuncBuilder::new("f");
        let top = b.schedule(None, "top");
        let n0 = b.node(top, "n0");
        let n1 = b.node(top, "n1");
        let func = b.finish();

        let est = TableEstimator::new().with(n0, 30).with(n1, 10);
        assert_eq!(est.schedule_complexity(&func, top), Some(40));
        let partial = TableEstimator::new().with(n0, 30);
        assert_eq!(partial.schedule_complexity(&func, top), None);
    }
}
