//! Top-down propagation of parallel budgets over the schedule hierarchy.
//!
//! Every schedule receives an incoming budget (the root budget for top-level
//! schedules, the enclosing node's budget otherwise) and splits it across its
//! nodes proportionally to their estimated complexity.

use super::parallelize::PASS_NAME;
use crate::analysis::ComplexityEstimator;
use crate::ir::{DataflowFunc, OpId, OpKind};
use crate::utils::errors::{TransformError, TransformErrorKind};
use indexmap::IndexMap;

/// Budget per node, in pre-order.
pub type BudgetMap = IndexMap<OpId, u64>;

fn saturate(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Budget a schedule hands to its nodes.
fn incoming_budget(
    func: &DataflowFunc,
    schedule: OpId,
    budgets: &BudgetMap,
    root_budget: u64,
) -> Result<u64, TransformError> {
    let Some(parent) = func.enclosing_node(schedule) else {
        return Ok(root_budget);
    };
    let Some(&parent_budget) = budgets.get(&parent) else {
        return Err(TransformError::new(
            TransformErrorKind::MissingParentBudget,
            PASS_NAME,
            format!("failed to get parent node's budget for {}", func.name_of(parent)),
        )
        .on(parent));
    };

    let mut budget = parent_budget as u128;
    if let OpKind::Schedule { increase, decrease, .. } = &func.op(schedule).kind {
        if let Some(increase) = increase {
            budget = budget.saturating_mul(increase.get() as u128);
        }
        if let Some(decrease) = decrease {
            budget /= decrease.get() as u128;
        }
    }
    Ok(saturate(budget))
}

/// Assign a budget to every node reachable through a schedule.
///
/// Schedules are visited in pre-order, so an enclosing node always has its
/// budget before the nested schedule is split. Any failure aborts the whole
/// traversal.
pub fn compute_budgets(
    func: &DataflowFunc,
    estimator: &dyn ComplexityEstimator,
    root_budget: u64,
) -> Result<BudgetMap, TransformError> {
    let mut budgets = BudgetMap::new();

    for schedule in func.schedules() {
        let schedule_budget = incoming_budget(func, schedule, &budgets, root_budget)?;
        let schedule_complexity = estimator.schedule_complexity(func, schedule).ok_or_else(|| {
            TransformError::new(
                TransformErrorKind::ComplexityUnavailable,
                PASS_NAME,
                format!("failed to get schedule complexity of {}", func.name_of(schedule)),
            )
            .on(schedule)
        })?;

        for node in func.schedule_nodes(schedule) {
            let node_complexity = estimator.node_complexity(func, node).ok_or_else(|| {
                TransformError::new(
                    TransformErrorKind::ComplexityUnavailable,
                    PASS_NAME,
                    format!("failed to get node complexity of {}", func.name_of(node)),
                )
                .on(node)
            })?;

            let share = if schedule_complexity == 0 {
                1
            } else {
                saturate(
                    schedule_budget as u128 * node_complexity as u128 / schedule_complexity as u128,
                )
            };
            let budget = share.max(1);
            log::debug!(
                "node {}: complexity {} of {}, schedule budget {}, budget {}",
                func.name_of(node),
                node_complexity,
                schedule_complexity,
                schedule_budget,
                budget
            );
            budgets.insert(node, budget);
        }
    }

    Ok(budgets)
}
