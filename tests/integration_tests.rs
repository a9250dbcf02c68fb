//! Integration tests for the parallelization and copy simplification passes.

use dfopt::prelude::*;
use dfopt::transform::{
    apply_loop_vectorization, simplify_copies, unify, RealizedKind,
};
use indexmap::IndexMap;

fn at0(memref: ValueId) -> Access {
    Access::new(memref, vec![Index::Const(0)])
}

#[test]
fn test_budget_weighting_and_floor() {
    let mut b = FuncBuilder::new("weights");
    let top = b.schedule(None, "top");
    let heavy = b.node(top, "heavy");
    let light = b.node(top, "light");
    let idle = b.node(top, "idle");
    let mut func = b.finish();

    let pass = ParallelizeDataflowNode::new(ParallelizeConfig::with_max_unroll_factor(8))
        .with_estimator(TableEstimator::new().with(heavy, 30).with(light, 10).with(idle, 0));
    let report = pass.run(&mut func).unwrap();

    assert_eq!(report.budgets[&heavy], 6);
    assert_eq!(report.budgets[&light], 2);
    assert_eq!(report.budgets[&idle], 1);
    assert!(report.budgets.values().all(|&b| b >= 1));
}

#[test]
fn test_increase_annotation_scales_nested_schedule() {
    let mut b = FuncBuilder::new("nested");
    let top = b.schedule(None, "top");
    let outer = b.node(top, "outer");
    let sibling = b.node(top, "sibling");
    let inner_sched = b.schedule(outer, "inner");
    b.annotate(inner_sched, Some(2), None);
    let inner = b.node(inner_sched, "inner_node");
    let mut func = b.finish();

    let est = TableEstimator::new().with(outer, 1).with(sibling, 1).with(inner, 5);
    let report = ParallelizeDataflowNode::new(ParallelizeConfig::with_max_unroll_factor(8))
        .with_estimator(est)
        .run(&mut func)
        .unwrap();

    assert_eq!(report.budgets[&outer], 4);
    // Incoming budget 4 * 2, all of it for the single node.
    assert_eq!(report.budgets[&inner], 8);
}

#[test]
fn test_identity_correlation_propagates_vector() {
    let mut b = FuncBuilder::new("corr");
    let top = b.schedule(None, "top");
    let a = b.node(top, "a");
    let i = b.for_loop(a, "i", 0, 8);
    b.for_loop(i, "j", 0, 8);
    let c = b.node(top, "c");
    let x = b.for_loop(c, "x", 0, 8);
    b.for_loop(x, "y", 0, 8);
    let func = b.finish();

    let edge = Correlation::new(a, c, vec![Some(0), Some(1)], 2);
    let mut correlations = IndexMap::new();
    correlations.insert(a, vec![edge.clone()]);
    correlations.insert(c, vec![edge]);
    let budgets = [(a, 4u64), (c, 4u64)].into_iter().collect();

    let outcome = unify(&func, &budgets, &correlations, &ParallelizeConfig::default());
    assert_eq!(outcome.factors.keys().next(), Some(&a));
    assert_eq!(outcome.factors[&c], outcome.factors[&a]);
}

#[test]
fn test_all_ones_vectorization_never_mutates() {
    let mut b = FuncBuilder::new("serial");
    let s = b.argument("S", vec![1]);
    let n = b.node(None, "n");
    let k = b.for_loop(n, "k", 0, 32);
    b.compute(k, "acc", vec![at0(s)], vec![at0(s)]);
    let mut func = b.finish();
    let before = print_func(&func);

    assert!(apply_loop_vectorization(&mut func, &[k], &[1], &StructuralLegality));
    assert_eq!(print_func(&func), before);
}

/// Producer writes a schedule-level buffer, consumer moves it to the output.
fn producer_consumer(producer_parallel: bool) -> (DataflowFunc, OpId, OpId, OpId, OpId) {
    let mut b = FuncBuilder::new("pc");
    let out = b.argument("Out", vec![16]);
    let top = b.schedule(None, "top");
    let tmp = b.buffer(top, "T", vec![16], None);

    let produce = b.node(top, "produce");
    let i = b.for_loop(produce, "i", 0, 16);
    let w = b.access(tmp, &[i]);
    let reads = if producer_parallel {
        vec![]
    } else {
        vec![Access::new(tmp, vec![Index::Opaque])]
    };
    b.compute(i, "p", reads, vec![w]);

    let consume = b.node(top, "consume");
    let x = b.for_loop(consume, "x", 0, 16);
    let r = b.access(tmp, &[x]);
    let w = b.access(out, &[x]);
    b.compute(x, "c", vec![r], vec![w]);
    (b.finish(), produce, i, consume, x)
}

#[test]
fn test_correlated_external_bands_are_vectorized() {
    let (mut func, produce, i, consume, x) = producer_consumer(true);
    let report = dfopt::parallelize(&mut func, &ParallelizeConfig::with_max_unroll_factor(4)).unwrap();

    assert_eq!(report.factors[&produce], vec![2]);
    assert_eq!(report.factors[&consume], vec![2]);
    assert!(report.transformed.iter().all(|t| t.kind == RealizedKind::Vectorize));
    assert_eq!(func.as_loop(i).unwrap().transform, Some(LoopTransform::Vectorize(2)));
    assert_eq!(func.as_loop(x).unwrap().transform, Some(LoopTransform::Vectorize(2)));
    assert!(func.verify().is_ok());
}

#[test]
fn test_failed_vectorization_is_not_retried() {
    let (mut func, produce, i, consume, x) = producer_consumer(false);
    let report = dfopt::parallelize(&mut func, &ParallelizeConfig::with_max_unroll_factor(4)).unwrap();

    // The producer got factors but its band is serial: it stays untouched,
    // with no unroll-and-jam fallback.
    assert_eq!(report.factors[&produce], vec![2]);
    let producer_loop = func.as_loop(i).unwrap();
    assert_eq!(producer_loop.transform, None);
    assert_eq!(producer_loop.step, 1);
    assert!(report.transformed.iter().all(|t| t.node != produce));
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.op == Some(produce) && d.severity == DiagnosticSeverity::Warning));

    assert_eq!(func.as_loop(x).unwrap().transform, Some(LoopTransform::Vectorize(2)));
    assert_eq!(report.transformed.len(), 1);
    assert_eq!(report.transformed[0].node, consume);
}

#[test]
fn test_point_loop_only_after_tiling() {
    let mut b = FuncBuilder::new("tiled");
    let top = b.schedule(None, "top");
    let n = b.node(top, "n");
    let local = b.buffer(n, "L", vec![16], None);
    let i = b.for_loop(n, "i", 0, 16);
    let w = b.access(local, &[i]);
    b.compute(i, "fill", vec![], vec![w]);
    let mut func = b.finish();

    assert!(LoopTiling::uniform(4).apply(&mut func).unwrap());
    let point = func.op(i).body[0];
    assert_eq!(func.as_loop(point).unwrap().point_of, Some(i));

    let report = dfopt::parallelize(&mut func, &ParallelizeConfig::point_loops(4)).unwrap();
    assert_eq!(report.budgets[&n], 4);
    assert_eq!(report.transformed.len(), 1);
    assert_eq!(report.transformed[0].band, vec![point]);
    assert_eq!(func.as_loop(point).unwrap().transform, Some(LoopTransform::UnrollJam(4)));
    // The tile loop keeps its tiled step.
    let tile = func.as_loop(i).unwrap();
    assert_eq!(tile.transform, None);
    assert_eq!(tile.step, 4);
    assert_eq!(func.op(point).body.len(), 4);
    assert!(func.verify().is_ok());
}

#[test]
fn test_point_loop_only_skips_untiled_bands() {
    let mut b = FuncBuilder::new("untiled");
    let top = b.schedule(None, "top");
    let n = b.node(top, "n");
    let local = b.buffer(n, "L", vec![16], None);
    let i = b.for_loop(n, "i", 0, 16);
    let w = b.access(local, &[i]);
    b.compute(i, "fill", vec![], vec![w]);
    let mut func = b.finish();
    let before = print_func(&func);

    let report = dfopt::parallelize(&mut func, &ParallelizeConfig::point_loops(4)).unwrap();
    assert!(report.transformed.is_empty());
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.op == Some(n) && d.severity == DiagnosticSeverity::Note));
    assert_eq!(print_func(&func), before);
}

#[test]
fn test_unavailable_complexity_aborts_pass() {
    let mut b = FuncBuilder::new("dynamic");
    let top = b.schedule(None, "top");
    let n = b.node(top, "n");
    let l = b.loop_with(n, ForLoop::new("i", 0, None, 1));
    b.compute(l, "s", vec![], vec![]);
    let mut func = b.finish();

    let err = dfopt::parallelize(&mut func, &ParallelizeConfig::with_max_unroll_factor(4)).unwrap_err();
    let transform_err = err.downcast_ref::<TransformError>().unwrap();
    assert_eq!(transform_err.kind, TransformErrorKind::ComplexityUnavailable);
    assert_eq!(func.as_loop(l).unwrap().transform, None);
}

#[test]
fn test_copy_elimination_end_to_end() {
    let mut b = FuncBuilder::new("copy");
    let a = b.argument("A", vec![8]);
    let top = b.schedule(None, "top");
    let n = b.node(top, "n");
    let local = b.buffer(n, "B", vec![8], None);
    b.copy(n, a, local);
    let i = b.for_loop(n, "i", 0, 8);
    let r = b.access(local, &[i]);
    let use_op = b.compute(i, "use", vec![r], vec![]);
    let mut func = b.finish();
    let local_op = func.defining_op(local).unwrap();

    assert_eq!(simplify_copies(&mut func), 1);
    assert_eq!(func.as_compute(use_op).unwrap().reads[0].memref, a);
    assert!(!func.is_live(local_op));
    assert!(func.users(local).is_empty());
    assert_eq!(func.op(n).body, vec![i]);
    assert!(func.verify().is_ok());

    // A second run finds nothing.
    let snapshot = print_func(&func);
    assert_eq!(simplify_copies(&mut func), 0);
    assert_eq!(print_func(&func), snapshot);
}

#[test]
fn test_copy_across_memory_spaces_is_kept() {
    let mut b = FuncBuilder::new("spaces");
    let a = b.argument_in("A", vec![8], 0);
    let local = b.buffer_in(None, "B", vec![8], 1, None);
    let copy = b.copy(None, a, local);
    b.compute(None, "use", vec![at0(local)], vec![]);
    let mut func = b.finish();

    assert_eq!(simplify_copies(&mut func), 0);
    assert!(func.is_live(copy));
}

#[test]
fn test_json_input_runs_through_passes() {
    let (func, _, i, _, _) = producer_consumer(true);
    let json = serde_json::to_string(&func).unwrap();

    let mut loaded = dfopt::load_func(&json).unwrap();
    dfopt::parallelize(&mut loaded, &ParallelizeConfig::flat(2)).unwrap();
    assert_eq!(loaded.as_loop(i).unwrap().transform, Some(LoopTransform::UnrollJam(2)));

    assert!(dfopt::load_func("{\"name\": 3}").is_err());
}

#[test]
fn test_json_with_dangling_definition_is_rejected() {
    let mut b = FuncBuilder::new("ghost");
    let a = b.argument("A", vec![8]);
    let n = b.node(None, "n");
    let mut func = b.finish();
    let ghost = func.add_value("G", vec![8], 0, ValueDef::Op(OpId(999)));
    func.push_op(Some(n), OpKind::Copy { source: ghost, target: a });
    let json = serde_json::to_string(&func).unwrap();

    let err = dfopt::load_func(&json).unwrap_err();
    assert!(format!("{:#}", err).contains("unknown op999"));
}

#[test]
fn test_tiled_producer_correlates_through_point_loops() {
    let mut b = FuncBuilder::new("tiled_pc");
    let out = b.argument("Out", vec![16]);
    let top = b.schedule(None, "top");
    let tmp = b.buffer(top, "T", vec![16], None);
    let produce = b.node(top, "produce");
    let i = b.for_loop(produce, "i", 0, 16);
    let w = b.access(tmp, &[i]);
    b.compute(i, "p", vec![], vec![w]);
    let consume = b.node(top, "consume");
    let x = b.for_loop(consume, "x", 0, 16);
    let r = b.access(tmp, &[x]);
    let w = b.access(out, &[x]);
    b.compute(x, "c", vec![r], vec![w]);
    let mut func = b.finish();

    let band = dfopt::transform::tile_band(&mut func, &[i], &[4]).unwrap();
    let point = band[1];
    let correlations = AccessCorrelation.correlations(&func);
    let edge = &correlations[&produce][0];
    assert_eq!(edge.correlated_node(produce), consume);
    // The tile loop has no partner; the point loop pairs with x.
    assert_eq!(edge.correlate_map(produce), &[None, Some(0)]);

    let oracle = StructuralLegality;
    assert!(oracle.is_parallel(&func, i));
    assert!(oracle.is_parallel(&func, point));
    assert!(func.verify().is_ok());
}
