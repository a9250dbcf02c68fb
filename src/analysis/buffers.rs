//! Resolution of memrefs through view chains.

use crate::ir::{DataflowFunc, OpId, OpKind, ValueDef, ValueId};

/// Resolve `memref` to the function argument or local `Buffer` it aliases.
///
/// Returns `None` when the chain ends anywhere else.
pub fn find_buffer(func: &DataflowFunc, memref: ValueId) -> Option<ValueId> {
    let mut current = memref;
    // Views always refer to an earlier value, so the chain is finite.
    for _ in 0..=func.values.len() {
        match func.value(current).def {
            ValueDef::Argument(_) => return Some(current),
            ValueDef::Op(op) => match &func.op(op).kind {
                OpKind::Buffer { .. } => return Some(current),
                OpKind::View { source, .. } => current = *source,
                _ => return None,
            },
        }
    }
    None
}

/// The `Buffer` op defining `root`, if it is a local allocation.
pub fn buffer_op(func: &DataflowFunc, root: ValueId) -> Option<OpId> {
    let op = func.defining_op(root)?;
    matches!(func.op(op).kind, OpKind::Buffer { .. }).then_some(op)
}

/// Every non-view user of `memref`, following derived views.
pub fn find_buffer_users(func: &DataflowFunc, memref: ValueId) -> Vec<OpId> {
    let mut users = Vec::new();
    let mut worklist = vec![memref];
    while let Some(value) = worklist.pop() {
        for user in func.users(value) {
            match &func.op(user).kind {
                OpKind::View { result, source } if *source == value => worklist.push(*result),
                _ => users.push(user),
            }
        }
    }
    users
}
