//! Arena representation of a dataflow function.
//!
//! A [`DataflowFunc`] owns every operation and value. Operations nest through
//! `parent`/`body` links: top-level operations sit in the function body, all
//! others in the body block of their parent. Ids are stable for the lifetime
//! of the function; erasing an operation only detaches it.

use crate::utils::errors::{IrError, IrErrorKind};
use serde::{Serialize, Deserialize};
use std::fmt;
use std::num::NonZeroU64;

/// A unique identifier for operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub u32);

impl OpId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// A unique identifier for memref values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueDef {
    /// Function argument at the given position (block-scoped external buffer)
    Argument(usize),
    /// Result of a `Buffer` or `View` operation
    Op(OpId),
}

/// A memref value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Value {
    pub id: ValueId,
    pub name: String,
    /// Static shape
    pub shape: Vec<u64>,
    /// Memory space the memref is allocated in
    pub memory_space: u32,
    pub def: ValueDef,
}

impl Value {
    /// Number of elements covered by the memref.
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }
}

/// One subscript of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Index {
    /// Induction variable of a `For` op
    Iv(OpId),
    /// Constant subscript
    Const(i64),
    /// Anything the analyses cannot reason about
    Opaque,
    /// Tiled induction variable: `tile + point`
    Tiled { tile: OpId, point: OpId },
}

impl Index {
    /// Loops whose induction variables drive this subscript.
    pub fn loops(&self) -> impl Iterator<Item = OpId> {
        let (first, second) = match *self {
            Index::Iv(l) => (Some(l), None),
            Index::Tiled { tile, point } => (Some(tile), Some(point)),
            Index::Const(_) | Index::Opaque => (None, None),
        };
        first.into_iter().chain(second)
    }

    pub fn uses(&self, loop_op: OpId) -> bool {
        self.loops().any(|l| l == loop_op)
    }

    /// The loop in the same role as `loop_op` plays in `other`: tile for tile,
    /// point for point. A plain induction variable pairs with a point loop.
    pub fn counterpart(&self, other: &Index, loop_op: OpId) -> Option<OpId> {
        let (in_tile, in_point) = match *other {
            Index::Tiled { tile, point } => (tile == loop_op, point == loop_op),
            Index::Iv(l) => (false, l == loop_op),
            Index::Const(_) | Index::Opaque => (false, false),
        };
        match *self {
            Index::Iv(l) if in_point => Some(l),
            Index::Tiled { tile, .. } if in_tile => Some(tile),
            Index::Tiled { point, .. } if in_point => Some(point),
            _ => None,
        }
    }
}

/// A memory access: memref plus one index per dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub memref: ValueId,
    pub indices: Vec<Index>,
}

impl Access {
    pub fn new(memref: ValueId, indices: Vec<Index>) -> Self {
        Self { memref, indices }
    }

    /// Position of the subscript driven by `loop_op`, if any.
    pub fn position_of(&self, loop_op: OpId) -> Option<usize> {
        self.indices.iter().position(|idx| idx.uses(loop_op))
    }
}

/// A transformation recorded on a loop after it has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopTransform {
    UnrollJam(u64),
    Vectorize(u64),
}

impl LoopTransform {
    pub fn factor(&self) -> u64 {
        match self {
            LoopTransform::UnrollJam(f) | LoopTransform::Vectorize(f) => *f,
        }
    }
}

/// An affine `for` loop with constant bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForLoop {
    /// Induction variable name
    pub name: String,
    pub lower: i64,
    /// Upper bound (exclusive); `None` for a dynamic bound
    pub upper: Option<i64>,
    pub step: i64,
    /// Carries an explicit "no loop-carried dependence" annotation
    pub parallel: bool,
    /// Set on point loops created by tiling; names the tile loop they iterate within
    pub point_of: Option<OpId>,
    /// Transformation applied to this loop
    pub transform: Option<LoopTransform>,
}

impl ForLoop {
    pub fn new(name: impl Into<String>, lower: i64, upper: Option<i64>, step: i64) -> Self {
        Self {
            name: name.into(),
            lower,
            upper,
            step,
            parallel: false,
            point_of: None,
            transform: None,
        }
    }

    /// Number of iterations, if statically known.
    pub fn trip_count(&self) -> Option<u64> {
        let upper = self.upper?;
        if self.step <= 0 {
            return None;
        }
        if upper <= self.lower {
            return Some(0);
        }
        let span = upper.abs_diff(self.lower);
        Some(span.div_ceil(self.step.unsigned_abs()))
    }
}

/// A leaf computation reading and writing memrefs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compute {
    pub name: String,
    pub reads: Vec<Access>,
    pub writes: Vec<Access>,
    /// Per-loop iteration offsets for replicas created by unrolling
    pub lanes: Vec<(OpId, i64)>,
}

impl Compute {
    pub fn accesses(&self) -> impl Iterator<Item = &Access> {
        self.reads.iter().chain(self.writes.iter())
    }
}

/// Operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    /// Pipelined region grouping sibling nodes
    Schedule {
        name: String,
        increase: Option<NonZeroU64>,
        decrease: Option<NonZeroU64>,
    },
    /// Dataflow task
    Node { name: String },
    For(ForLoop),
    /// Local allocation
    Buffer {
        result: ValueId,
        init_value: Option<i64>,
    },
    /// Alias of (part of) another memref
    View { source: ValueId, result: ValueId },
    Copy { source: ValueId, target: ValueId },
    Compute(Compute),
}

impl OpKind {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            OpKind::Schedule { .. } => "schedule",
            OpKind::Node { .. } => "node",
            OpKind::For(_) => "for",
            OpKind::Buffer { .. } => "buffer",
            OpKind::View { .. } => "view",
            OpKind::Copy { .. } => "copy",
            OpKind::Compute(_) => "compute",
        }
    }

    /// Values read by this operation, in operand order.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            OpKind::View { source, .. } => vec![*source],
            OpKind::Copy { source, target } => vec![*source, *target],
            OpKind::Compute(c) => c.accesses().map(|a| a.memref).collect(),
            _ => Vec::new(),
        }
    }

    /// Value defined by this operation.
    pub fn result(&self) -> Option<ValueId> {
        match self {
            OpKind::Buffer { result, .. } | OpKind::View { result, .. } => Some(*result),
            _ => None,
        }
    }

    fn replace_operand(&mut self, from: ValueId, to: ValueId) {
        let swap = |v: &mut ValueId| {
            if *v == from {
                *v = to;
            }
        };
        match self {
            OpKind::View { source, .. } => swap(source),
            OpKind::Copy { source, target } => {
                swap(source);
                swap(target);
            }
            OpKind::Compute(c) => {
                for access in c.reads.iter_mut().chain(c.writes.iter_mut()) {
                    swap(&mut access.memref);
                }
            }
            _ => {}
        }
    }
}

/// An operation in the arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Op {
    pub id: OpId,
    pub kind: OpKind,
    /// Enclosing operation; `None` for the function body
    pub parent: Option<OpId>,
    /// Nested operations in program order
    pub body: Vec<OpId>,
    #[serde(default)]
    pub erased: bool,
}

/// A function made of nested schedules, nodes, loops and buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataflowFunc {
    pub name: String,
    pub arguments: Vec<ValueId>,
    /// Top-level block
    pub body: Vec<OpId>,
    pub ops: Vec<Op>,
    pub values: Vec<Value>,
}

impl DataflowFunc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            body: Vec::new(),
            ops: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn op(&self, id: OpId) -> &Op {
        &self.ops[id.index()]
    }

    pub fn op_mut(&mut self, id: OpId) -> &mut Op {
        &mut self.ops[id.index()]
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    pub fn is_live(&self, id: OpId) -> bool {
        !self.op(id).erased
    }

    /// Allocate a new value.
    pub fn add_value(
        &mut self,
        name: impl Into<String>,
        shape: Vec<u64>,
        memory_space: u32,
        def: ValueDef,
    ) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value {
            id,
            name: name.into(),
            shape,
            memory_space,
            def,
        });
        id
    }

    /// Allocate an operation without inserting it into any block.
    pub fn create_op(&mut self, parent: Option<OpId>, kind: OpKind) -> OpId {
        let id = OpId(self.ops.len() as u32);
        self.ops.push(Op {
            id,
            kind,
            parent,
            body: Vec::new(),
            erased: false,
        });
        id
    }

    /// Allocate an operation and append it to its parent's block.
    pub fn push_op(&mut self, parent: Option<OpId>, kind: OpKind) -> OpId {
        let id = self.create_op(parent, kind);
        self.block_mut(parent).push(id);
        id
    }

    /// The block nested in `parent` (the function body for `None`).
    pub fn block(&self, parent: Option<OpId>) -> &[OpId] {
        match parent {
            Some(p) => &self.op(p).body,
            None => &self.body,
        }
    }

    pub fn block_mut(&mut self, parent: Option<OpId>) -> &mut Vec<OpId> {
        match parent {
            Some(p) => &mut self.op_mut(p).body,
            None => &mut self.body,
        }
    }

    /// Position of `op` within its block.
    pub fn position(&self, op: OpId) -> Option<usize> {
        self.block(self.op(op).parent).iter().position(|&o| o == op)
    }

    /// All live operations in pre-order.
    pub fn walk(&self) -> Vec<OpId> {
        let mut order = Vec::new();
        let mut stack: Vec<OpId> = self.body.iter().rev().copied().collect();
        while let Some(op) = stack.pop() {
            order.push(op);
            stack.extend(self.op(op).body.iter().rev().copied());
        }
        order
    }

    /// `root` and everything nested in it, in pre-order.
    pub fn walk_op(&self, root: OpId) -> Vec<OpId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(op) = stack.pop() {
            order.push(op);
            stack.extend(self.op(op).body.iter().rev().copied());
        }
        order
    }

    /// True if `op` is `ancestor` or nested anywhere inside it.
    pub fn is_ancestor(&self, ancestor: OpId, op: OpId) -> bool {
        let mut current = Some(op);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.op(c).parent;
        }
        false
    }

    /// Nearest strictly enclosing `Node`.
    pub fn enclosing_node(&self, op: OpId) -> Option<OpId> {
        let mut current = self.op(op).parent;
        while let Some(c) = current {
            if matches!(self.op(c).kind, OpKind::Node { .. }) {
                return Some(c);
            }
            current = self.op(c).parent;
        }
        None
    }

    /// Every schedule in pre-order, so enclosing nodes come first.
    pub fn schedules(&self) -> Vec<OpId> {
        self.walk()
            .into_iter()
            .filter(|&op| matches!(self.op(op).kind, OpKind::Schedule { .. }))
            .collect()
    }

    /// Every node in pre-order.
    pub fn nodes(&self) -> Vec<OpId> {
        self.walk()
            .into_iter()
            .filter(|&op| self.is_node(op))
            .collect()
    }

    /// Nodes directly contained in a schedule.
    pub fn schedule_nodes(&self, schedule: OpId) -> Vec<OpId> {
        self.op(schedule)
            .body
            .iter()
            .copied()
            .filter(|&op| self.is_node(op))
            .collect()
    }

    pub fn is_node(&self, op: OpId) -> bool {
        matches!(self.op(op).kind, OpKind::Node { .. })
    }

    pub fn as_loop(&self, op: OpId) -> Option<&ForLoop> {
        match &self.op(op).kind {
            OpKind::For(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_loop_mut(&mut self, op: OpId) -> Option<&mut ForLoop> {
        match &mut self.op_mut(op).kind {
            OpKind::For(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_compute(&self, op: OpId) -> Option<&Compute> {
        match &self.op(op).kind {
            OpKind::Compute(c) => Some(c),
            _ => None,
        }
    }

    /// Human-readable name for diagnostics.
    pub fn name_of(&self, op: OpId) -> String {
        match &self.op(op).kind {
            OpKind::Schedule { name, .. } | OpKind::Node { name } => format!("@{}", name),
            OpKind::For(l) => format!("for %{}", l.name),
            OpKind::Compute(c) => format!("@{}", c.name),
            OpKind::Buffer { result, .. } | OpKind::View { result, .. } => {
                format!("%{}", self.value(*result).name)
            }
            kind @ OpKind::Copy { .. } => format!("{} {}", kind.mnemonic(), op),
        }
    }

    /// Operation defining `value`; `None` for function arguments.
    pub fn defining_op(&self, value: ValueId) -> Option<OpId> {
        match self.value(value).def {
            ValueDef::Op(op) => Some(op),
            ValueDef::Argument(_) => None,
        }
    }

    /// Live operations using `value` as an operand, in pre-order.
    pub fn users(&self, value: ValueId) -> Vec<OpId> {
        self.walk()
            .into_iter()
            .filter(|&op| self.op(op).kind.operands().contains(&value))
            .collect()
    }

    /// Redirect every use of `from` to `to`.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) {
        for op in self.walk() {
            self.op_mut(op).kind.replace_operand(from, to);
        }
    }

    /// Detach `op` from its block and mark it and its body erased.
    pub fn erase_op(&mut self, op: OpId) {
        let parent = self.op(op).parent;
        self.block_mut(parent).retain(|&o| o != op);
        for nested in self.walk_op(op) {
            self.op_mut(nested).erased = true;
        }
    }

    /// Check that parent links, blocks and value definitions agree.
    pub fn verify(&self) -> Result<(), IrError> {
        let n_ops = self.ops.len();
        let n_values = self.values.len();

        for (index, data) in self.ops.iter().enumerate() {
            if data.id.index() != index {
                return Err(IrError::new(
                    IrErrorKind::InconsistentNesting,
                    format!("{} stored at slot {}", data.id, index),
                ));
            }
        }
        for (index, value) in self.values.iter().enumerate() {
            self.verify_value(index, value)?;
        }

        for (position, &arg) in self.arguments.iter().enumerate() {
            if arg.index() >= n_values || self.value(arg).def != ValueDef::Argument(position) {
                return Err(IrError::new(
                    IrErrorKind::UndefinedValue,
                    format!("argument #{} is not bound to {}", position, arg),
                ));
            }
        }

        let mut seen = vec![false; n_ops];
        let mut stack: Vec<(Option<OpId>, OpId)> =
            self.body.iter().map(|&op| (None, op)).collect();
        while let Some((parent, op)) = stack.pop() {
            if op.index() >= n_ops {
                return Err(IrError::new(
                    IrErrorKind::DanglingReference,
                    format!("reference to unknown {}", op),
                ));
            }
            let data = self.op(op);
            if data.erased {
                return Err(IrError::new(IrErrorKind::ErasedOpReachable, "erased op still in a block").at(op));
            }
            if data.parent != parent || seen[op.index()] {
                return Err(IrError::new(
                    IrErrorKind::InconsistentNesting,
                    "op is not owned by the block it appears in",
                )
                .at(op));
            }
            seen[op.index()] = true;
            self.verify_op(op)?;
            stack.extend(data.body.iter().map(|&child| (Some(op), child)));
        }
        Ok(())
    }

    fn verify_value(&self, index: usize, value: &Value) -> Result<(), IrError> {
        if value.id.index() != index {
            return Err(IrError::new(
                IrErrorKind::UndefinedValue,
                format!("{} stored at slot {}", value.id, index),
            ));
        }
        match value.def {
            ValueDef::Argument(position) => {
                if self.arguments.get(position) != Some(&value.id) {
                    return Err(IrError::new(
                        IrErrorKind::UndefinedValue,
                        format!("{} claims argument #{} it is not bound to", value.id, position),
                    ));
                }
            }
            ValueDef::Op(op) => {
                if op.index() >= self.ops.len() {
                    return Err(IrError::new(
                        IrErrorKind::DanglingReference,
                        format!("{} is defined by unknown {}", value.id, op),
                    ));
                }
                if self.op(op).kind.result() != Some(value.id) {
                    return Err(IrError::new(
                        IrErrorKind::UndefinedValue,
                        format!("{} does not define {}", op, value.id),
                    )
                    .at(op));
                }
            }
        }
        Ok(())
    }

    /// True if `target` names a `For` op enclosing `op`.
    fn is_enclosing_loop(&self, target: OpId, op: OpId) -> bool {
        target.index() < self.ops.len() && self.as_loop(target).is_some() && self.is_ancestor(target, op)
    }

    fn verify_op(&self, op: OpId) -> Result<(), IrError> {
        let data = self.op(op);
        for value in data.kind.operands().into_iter().chain(data.kind.result()) {
            if value.index() >= self.values.len() {
                return Err(IrError::new(
                    IrErrorKind::UndefinedValue,
                    format!("use of undefined {}", value),
                )
                .at(op));
            }
            // Value definitions were checked in range before any op.
            if let ValueDef::Op(def) = self.value(value).def {
                if self.op(def).erased {
                    return Err(IrError::new(
                        IrErrorKind::ErasedOpReachable,
                        format!("{} is defined by erased {}", value, def),
                    )
                    .at(op));
                }
            }
        }
        if let Some(result) = data.kind.result() {
            if self.value(result).def != ValueDef::Op(op) {
                return Err(IrError::new(
                    IrErrorKind::UndefinedValue,
                    format!("{} is not defined by this op", result),
                )
                .at(op));
            }
        }
        match &data.kind {
            OpKind::For(l) if l.step <= 0 => Err(IrError::new(
                IrErrorKind::InvalidLoop,
                format!("loop %{} has non-positive step {}", l.name, l.step),
            )
            .at(op)),
            OpKind::For(l) => match l.point_of {
                Some(tile) if tile.index() >= self.ops.len() || self.as_loop(tile).is_none() => {
                    Err(IrError::new(
                        IrErrorKind::DanglingReference,
                        format!("point loop %{} refers to {} which is not a loop", l.name, tile),
                    )
                    .at(op))
                }
                _ => Ok(()),
            },
            OpKind::Compute(c) => {
                let ivs = c.accesses().flat_map(|a| a.indices.iter()).flat_map(|idx| idx.loops());
                for l in ivs.chain(c.lanes.iter().map(|&(l, _)| l)) {
                    if !self.is_enclosing_loop(l, op) {
                        return Err(IrError::new(
                            IrErrorKind::DanglingReference,
                            format!("{} is not an enclosing loop", l),
                        )
                        .at(op));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
