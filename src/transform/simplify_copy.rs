//! Elimination of redundant buffer copies.
//!
//! A copy between two buffers is redundant when one side can take over all
//! uses of the other. The match is conservative: every use of the source must
//! come before the copy and every use of the target after it.

use crate::analysis::{buffer_op, cross_region_dominates, dominates, find_buffer, find_buffer_users};
use crate::ir::{DataflowFunc, OpId, OpKind, ValueId};
use crate::transform::Transform;
use anyhow::Result;

const PASS_NAME: &str = "simplify-copy";

/// The rewrite performed on a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyRewrite {
    /// The target buffer was replaced by the copy source
    TargetErased { buffer: ValueId, replacement: ValueId },
    /// The source buffer was replaced by the copy target
    SourceErased { buffer: ValueId, replacement: ValueId },
}

fn init_value(func: &DataflowFunc, op: OpId) -> Option<i64> {
    match func.op(op).kind {
        OpKind::Buffer { init_value, .. } => init_value,
        _ => None,
    }
}

/// Try to eliminate one side of `copy`. Returns `None` if the copy does not match.
pub fn simplify_buffer_copy(func: &mut DataflowFunc, copy: OpId) -> Option<CopyRewrite> {
    let OpKind::Copy { source: copy_source, target: copy_target } = func.op(copy).kind else {
        return None;
    };
    log::debug!("visiting {}", func.name_of(copy));

    if func.value(copy_source).memory_space != func.value(copy_target).memory_space {
        return None;
    }

    let source = find_buffer(func, copy_source)?;
    let target = find_buffer(func, copy_target)?;

    let source_buf = buffer_op(func, source);
    let target_buf = buffer_op(func, target);
    if source_buf.is_none() && target_buf.is_none() {
        return None;
    }

    let source_users = find_buffer_users(func, source);
    let target_users = find_buffer_users(func, target);
    if !source_users.iter().all(|&user| cross_region_dominates(func, user, copy)) {
        return None;
    }
    if !target_users.iter().all(|&user| cross_region_dominates(func, copy, user)) {
        return None;
    }
    log::debug!("dominance holds for {}", func.name_of(copy));

    let source_view = func.defining_op(copy_source);
    let target_view = func.defining_op(copy_target);

    // The target must be used directly, and the source must be visible at
    // every target use.
    if let Some(buf) = target_buf.filter(|&buf| Some(buf) == target_view) {
        let visible = source_view
            .map_or(true, |view| target_users.iter().all(|&user| dominates(func, view, user)));
        if visible {
            func.erase_op(copy);
            func.replace_all_uses(target, copy_source);
            func.erase_op(buf);
            log::debug!("erased target {}", func.value(target).name);
            return Some(CopyRewrite::TargetErased {
                buffer: target,
                replacement: copy_source,
            });
        }
    }

    let buf = source_buf.filter(|&buf| Some(buf) == source_view)?;
    let visible = target_view
        .map_or(true, |view| source_users.iter().all(|&user| dominates(func, view, user)));
    if !visible {
        return None;
    }
    // The initial value has to survive on the target.
    if let Some(init) = init_value(func, buf) {
        let survivor = target_buf?;
        if init_value(func, survivor).is_some() && Some(survivor) != target_view {
            return None;
        }
        if let OpKind::Buffer { init_value, .. } = &mut func.op_mut(survivor).kind {
            *init_value = Some(init);
        }
    }
    func.erase_op(copy);
    func.replace_all_uses(source, copy_target);
    func.erase_op(buf);
    log::debug!("erased source {}", func.value(source).name);
    Some(CopyRewrite::SourceErased {
        buffer: source,
        replacement: copy_target,
    })
}

/// Rewrite copies until none matches. Returns the number of rewrites.
pub fn simplify_copies(func: &mut DataflowFunc) -> usize {
    let mut rewrites = 0;
    loop {
        let copies: Vec<OpId> = func
            .walk()
            .into_iter()
            .filter(|&op| matches!(func.op(op).kind, OpKind::Copy { .. }))
            .collect();
        let mut changed = false;
        for copy in copies {
            if func.is_live(copy) && simplify_buffer_copy(func, copy).is_some() {
                rewrites += 1;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    log::info!("{}: {} copies eliminated", PASS_NAME, rewrites);
    rewrites
}

/// Pass wrapper around [`simplify_copies`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplifyCopy;

impl Transform for SimplifyCopy {
    fn apply(&self, func: &mut DataflowFunc) -> Result<bool> {
        Ok(simplify_copies(func) > 0)
    }

    fn is_legal(&self, _func: &DataflowFunc) -> bool {
        true
    }

    fn name(&self) -> &str {
        PASS_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Access, FuncBuilder, Index};

    fn at0(memref: ValueId) -> Access {
        Access::new(memref, vec![Index::Const(0)])
    }

    #[test]
    fn test_target_buffer_replaced_by_argument() {
        let mut b = FuncBuilder::new("f");
        let a = b.argument("A", vec![8]);
        let fill = b.compute(None, "fill", vec![], vec![at0(a)]);
        let t = b.buffer(None, "B", vec![8], None);
        let copy = b.copy(None, a, t);
        let read = b.compute(None, "use", vec![at0(t)], vec![]);
        let mut func = b.finish();
        let t_op = func.defining_op(t).unwrap();

        let rewrite = simplify_buffer_copy(&mut func, copy);
        assert_eq!(rewrite, Some(CopyRewrite::TargetErased { buffer: t, replacement: a }));
        assert!(!func.is_live(copy));
        assert!(!func.is_live(t_op));
        assert_eq!(func.as_compute(read).unwrap().reads[0].memref, a);
        assert_eq!(func.body, vec![fill, read]);
        assert!(func.users(t).is_empty());
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_memory_space_mismatch() {
        let mut b = FuncBuilder::new("f");
        let a = b.argument_in("A", vec![8], 1);
        let t = b.buffer_in(None, "B", vec![8], 2, None);
        let copy = b.copy(None, a, t);
        b.compute(None, "use", vec![at0(t)], vec![]);
        let mut func = b.finish();

        assert_eq!(simplify_buffer_copy(&mut func, copy), None);
        assert!(func.is_live(copy));
    }

    #[test]
    fn test_two_arguments_never_rewritten() {
        let mut b = FuncBuilder::new("f");
        let a = b.argument("A", vec![8]);
        let c = b.argument("C", vec![8]);
        let copy = b.copy(None, a, c);
        let mut func = b.finish();

        assert_eq!(simplify_buffer_copy(&mut func, copy), None);
    }

    #[test]
    fn test_target_used_before_copy() {
        let mut b = FuncBuilder::new("f");
        let a = b.argument("A", vec![8]);
        let t = b.buffer(None, "B", vec![8], None);
        b.compute(None, "early", vec![at0(t)], vec![]);
        let copy = b.copy(None, a, t);
        let mut func = b.finish();

        assert_eq!(simplify_buffer_copy(&mut func, copy), None);
    }

    #[test]
    fn test_source_used_after_copy() {
        let mut b = FuncBuilder::new("f");
        let a = b.argument("A", vec![8]);
        let t = b.buffer(None, "B", vec![8], None);
        let copy = b.copy(None, a, t);
        b.compute(None, "late", vec![], vec![at0(a)]);
        let mut func = b.finish();

        assert_eq!(simplify_buffer_copy(&mut func, copy), None);
    }

    #[test]
    fn test_target_side_preferred() {
        let mut b = FuncBuilder::new("f");
        let out = b.argument("Out", vec![8]);
        let s = b.buffer(None, "S", vec![8], Some(0));
        let t = b.buffer(None, "T", vec![8], None);
        let produce = b.compute(None, "produce", vec![], vec![at0(s)]);
        let copy = b.copy(None, s, t);
        b.copy(None, t, out);
        let mut func = b.finish();
        let t_op = func.defining_op(t).unwrap();

        // Both sides are local buffers; the target is tried first.
        let rewrite = simplify_buffer_copy(&mut func, copy);
        assert_eq!(rewrite, Some(CopyRewrite::TargetErased { buffer: t, replacement: s }));
        assert!(!func.is_live(t_op));
        assert_eq!(func.as_compute(produce).unwrap().writes[0].memref, s);
    }

    #[test]
    fn test_source_erased_when_target_is_viewed() {
        let mut b = FuncBuilder::new("f");
        let s = b.buffer(None, "S", vec![8], Some(7));
        let t = b.buffer(None, "T", vec![16], None);
        let tv = b.view(None, "Tv", t, vec![8]);
        let produce = b.compute(None, "produce", vec![], vec![at0(s)]);
        let copy = b.copy(None, s, tv);
        b.compute(None, "consume", vec![at0(t)], vec![]);
        let mut func = b.finish();
        let s_op = func.defining_op(s).unwrap();
        let t_op = func.defining_op(t).unwrap();

        let rewrite = simplify_buffer_copy(&mut func, copy);
        assert_eq!(rewrite, Some(CopyRewrite::SourceErased { buffer: s, replacement: tv }));
        assert!(!func.is_live(s_op));
        assert_eq!(func.as_compute(produce).unwrap().writes[0].memref, tv);
        assert_eq!(func.op(t_op).kind, OpKind::Buffer { result: t, init_value: Some(7) });
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_initialized_source_needs_local_target() {
        let mut b = FuncBuilder::new("f");
        let out = b.argument("Out", vec![16]);
        let s = b.buffer(None, "S", vec![8], Some(1));
        let ov = b.view(None, "Ov", out, vec![8]);
        b.compute(None, "produce", vec![], vec![at0(s)]);
        let copy = b.copy(None, s, ov);
        let mut func = b.finish();

        assert_eq!(simplify_buffer_copy(&mut func, copy), None);
        assert!(func.is_live(copy));
    }

    #[test]
    fn test_fixed_point_and_idempotence() {
        let mut b = FuncBuilder::new("f");
        let a = b.argument("A", vec![8]);
        let t0 = b.buffer(None, "T0", vec![8], None);
        b.copy(None, a, t0);
        let t1 = b.buffer(None, "T1", vec![8], None);
        b.copy(None, t0, t1);
        let read = b.compute(None, "use", vec![at0(t1)], vec![]);
        let mut func = b.finish();

        assert_eq!(simplify_copies(&mut func), 2);
        assert_eq!(func.as_compute(read).unwrap().reads[0].memref, a);
        assert_eq!(func.body, vec![read]);

        let snapshot = crate::ir::print_func(&func);
        assert_eq!(simplify_copies(&mut func), 0);
        assert_eq!(crate::ir::print_func(&func), snapshot);
        assert!(!SimplifyCopy.apply(&mut func).unwrap());
    }
}
