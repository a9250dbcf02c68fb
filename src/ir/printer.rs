//! Textual dump of a dataflow function.

use super::func::{Access, DataflowFunc, Index, LoopTransform, OpId, OpKind, ValueId};
use crate::utils::pretty::{format_list, format_list_with, CodeFormatter};

/// Render `func` as indented text.
pub fn print_func(func: &DataflowFunc) -> String {
    let mut out = CodeFormatter::new();
    let args = format_list_with(&func.arguments, ", ", |&v| memref_decl(func, v));
    let header = format!("func @{}({})", func.name, args);
    out.block(&header, |out| {
        for &op in &func.body {
            print_op(func, op, out);
        }
    });
    out.finish()
}

fn print_op(func: &DataflowFunc, op: OpId, out: &mut CodeFormatter) {
    let data = func.op(op);
    let header = match &data.kind {
        OpKind::Schedule { name, increase, decrease } => {
            let mut attrs = Vec::new();
            if let Some(v) = increase {
                attrs.push(format!("increase={}", v));
            }
            if let Some(v) = decrease {
                attrs.push(format!("decrease={}", v));
            }
            with_attrs(format!("schedule @{}", name), &attrs)
        }
        OpKind::Node { name } => format!("node @{}", name),
        OpKind::For(l) => {
            let upper = l.upper.map(|u| u.to_string()).unwrap_or_else(|| "?".to_string());
            let mut attrs = Vec::new();
            if l.parallel {
                attrs.push("parallel".to_string());
            }
            if let Some(tile) = l.point_of {
                attrs.push(format!("point_of={}", loop_name(func, tile)));
            }
            match l.transform {
                Some(LoopTransform::UnrollJam(f)) => attrs.push(format!("unroll_jam={}", f)),
                Some(LoopTransform::Vectorize(f)) => attrs.push(format!("vectorize={}", f)),
                None => {}
            }
            with_attrs(
                format!("for %{} = {} to {} step {}", l.name, l.lower, upper, l.step),
                &attrs,
            )
        }
        OpKind::Buffer { result, init_value } => {
            let init = init_value.map(|v| format!(" init {}", v)).unwrap_or_default();
            out.writeln(&format!("{} = buffer{}", memref_decl(func, *result), init));
            return;
        }
        OpKind::View { source, result } => {
            out.writeln(&format!("{} = view {}", memref_decl(func, *result), value_name(func, *source)));
            return;
        }
        OpKind::Copy { source, target } => {
            out.writeln(&format!("copy {} -> {}", value_name(func, *source), value_name(func, *target)));
            return;
        }
        OpKind::Compute(c) => {
            let mut line = format!(
                "compute @{} reads({}) writes({})",
                c.name,
                format_list_with(&c.reads, ", ", |a| access(func, a)),
                format_list_with(&c.writes, ", ", |a| access(func, a)),
            );
            if !c.lanes.is_empty() {
                let lanes = format_list_with(&c.lanes, ", ", |(l, off)| {
                    format!("{}+{}", loop_name(func, *l), off)
                });
                line.push_str(&format!(" lanes({})", lanes));
            }
            out.writeln(&line);
            return;
        }
    };
    out.block(&header, |out| {
        for &child in &data.body {
            print_op(func, child, out);
        }
    });
}

fn with_attrs(header: String, attrs: &[String]) -> String {
    if attrs.is_empty() {
        header
    } else {
        format!("{} [{}]", header, attrs.join(", "))
    }
}

fn value_name(func: &DataflowFunc, v: ValueId) -> String {
    format!("%{}", func.value(v).name)
}

fn memref_decl(func: &DataflowFunc, v: ValueId) -> String {
    let value = func.value(v);
    format!(
        "%{}: memref<{}, {}>",
        value.name,
        format_list(&value.shape, "x"),
        value.memory_space
    )
}

fn loop_name(func: &DataflowFunc, op: OpId) -> String {
    func.as_loop(op)
        .map(|l| l.name.clone())
        .unwrap_or_else(|| op.to_string())
}

fn access(func: &DataflowFunc, a: &Access) -> String {
    let indices = format_list_with(&a.indices, ", ", |idx| match idx {
        Index::Iv(l) => loop_name(func, *l),
        Index::Const(c) => c.to_string(),
        Index::Opaque => "?".to_string(),
        Index::Tiled { tile, point } => format!("{} + {}", loop_name(func, *tile), loop_name(func, *point)),
    });
    format!("{}[{}]", value_name(func, a.memref), indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FuncBuilder;

    #[test]
    fn test_print_structure() {
        let mut b = FuncBuilder::new("kernel");
        let a = b.argument("A", vec![16]);
        let top = b.schedule(None, "top");
        b.annotate(top, Some(2), None);
        let n = b.node(top, "scale");
        let i = b.for_loop(n, "i", 0, 16);
        let acc = b.access(a, &[i]);
        b.compute(i, "s0", vec![acc.clone()], vec![acc]);
        let text = print_func(&b.finish());

        assert!(text.starts_with("func @kernel(%A: memref<16, 0>) {"));
        assert!(text.contains("  schedule @top [increase=2] {"));
        assert!(text.contains("      for %i = 0 to 16 step 1 {"));
        assert!(text.contains("compute @s0 reads(%A[i]) writes(%A[i])"));
    }
}
