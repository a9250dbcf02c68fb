//! Builder for constructing dataflow functions.

use super::func::{
    Access, Compute, DataflowFunc, ForLoop, Index, OpId, OpKind, ValueDef, ValueId,
};
use std::num::NonZeroU64;

/// Incrementally builds a [`DataflowFunc`].
///
/// Every method taking a `parent` accepts either an [`OpId`] or `None` for the
/// function body.
#[derive(Debug)]
pub struct FuncBuilder {
    func: DataflowFunc,
}

impl FuncBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            func: DataflowFunc::new(name),
        }
    }

    /// Add a function argument in the default memory space.
    pub fn argument(&mut self, name: &str, shape: Vec<u64>) -> ValueId {
        self.argument_in(name, shape, 0)
    }

    /// Add a function argument in the given memory space.
    pub fn argument_in(&mut self, name: &str, shape: Vec<u64>, memory_space: u32) -> ValueId {
        let position = self.func.arguments.len();
        let id = self
            .func
            .add_value(name, shape, memory_space, ValueDef::Argument(position));
        self.func.arguments.push(id);
        id
    }

    pub fn schedule(&mut self, parent: impl Into<Option<OpId>>, name: &str) -> OpId {
        self.func.push_op(
            parent.into(),
            OpKind::Schedule {
                name: name.to_string(),
                increase: None,
                decrease: None,
            },
        )
    }

    /// Attach `increase`/`decrease` tuning annotations to a schedule.
    ///
    /// Zero is not a valid annotation and is ignored.
    pub fn annotate(&mut self, schedule: OpId, increase: Option<u64>, decrease: Option<u64>) {
        if let OpKind::Schedule {
            increase: inc,
            decrease: dec,
            ..
        } = &mut self.func.op_mut(schedule).kind
        {
            *inc = increase.and_then(NonZeroU64::new);
            *dec = decrease.and_then(NonZeroU64::new);
        }
    }

    pub fn node(&mut self, parent: impl Into<Option<OpId>>, name: &str) -> OpId {
        self.func
            .push_op(parent.into(), OpKind::Node { name: name.to_string() })
    }

    /// Add a loop `for name = lower to upper step 1`.
    pub fn for_loop(&mut self, parent: impl Into<Option<OpId>>, name: &str, lower: i64, upper: i64) -> OpId {
        self.loop_with(parent, ForLoop::new(name, lower, Some(upper), 1))
    }

    /// Add an arbitrary loop.
    pub fn loop_with(&mut self, parent: impl Into<Option<OpId>>, l: ForLoop) -> OpId {
        self.func.push_op(parent.into(), OpKind::For(l))
    }

    /// Mark a loop as carrying no inter-iteration dependence.
    pub fn mark_parallel(&mut self, loop_op: OpId) {
        if let Some(l) = self.func.as_loop_mut(loop_op) {
            l.parallel = true;
        }
    }

    pub fn buffer(
        &mut self,
        parent: impl Into<Option<OpId>>,
        name: &str,
        shape: Vec<u64>,
        init_value: Option<i64>,
    ) -> ValueId {
        self.buffer_in(parent, name, shape, 0, init_value)
    }

    pub fn buffer_in(
        &mut self,
        parent: impl Into<Option<OpId>>,
        name: &str,
        shape: Vec<u64>,
        memory_space: u32,
        init_value: Option<i64>,
    ) -> ValueId {
        let parent = parent.into();
        let op = self.func.create_op(parent, OpKind::Compute(placeholder()));
        let result = self
            .func
            .add_value(name, shape, memory_space, ValueDef::Op(op));
        self.func.op_mut(op).kind = OpKind::Buffer { result, init_value };
        self.func.block_mut(parent).push(op);
        result
    }

    /// Add a view aliasing `source`, keeping its memory space.
    pub fn view(&mut self, parent: impl Into<Option<OpId>>, name: &str, source: ValueId, shape: Vec<u64>) -> ValueId {
        let parent = parent.into();
        let memory_space = self.func.value(source).memory_space;
        let op = self.func.create_op(parent, OpKind::Compute(placeholder()));
        let result = self
            .func
            .add_value(name, shape, memory_space, ValueDef::Op(op));
        self.func.op_mut(op).kind = OpKind::View { source, result };
        self.func.block_mut(parent).push(op);
        result
    }

    pub fn copy(&mut self, parent: impl Into<Option<OpId>>, source: ValueId, target: ValueId) -> OpId {
        self.func
            .push_op(parent.into(), OpKind::Copy { source, target })
    }

    pub fn compute(
        &mut self,
        parent: impl Into<Option<OpId>>,
        name: &str,
        reads: Vec<Access>,
        writes: Vec<Access>,
    ) -> OpId {
        self.func.push_op(
            parent.into(),
            OpKind::Compute(Compute {
                name: name.to_string(),
                reads,
                writes,
                lanes: Vec::new(),
            }),
        )
    }

    /// Access `memref` indexed by the induction variables of `loops`.
    pub fn access(&self, memref: ValueId, loops: &[OpId]) -> Access {
        Access::new(memref, loops.iter().map(|&l| Index::Iv(l)).collect())
    }

    pub fn func(&self) -> &DataflowFunc {
        &self.func
    }

    pub fn finish(self) -> DataflowFunc {
        self.func
    }
}

fn placeholder() -> Compute {
    Compute {
        name: String::new(),
        reads: Vec::new(),
        writes: Vec::new(),
        lanes: Vec::new(),
    }
}
