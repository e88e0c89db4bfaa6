//! Minimal SSA IR consumed by the analysis
//!
//! The pass does not depend on any particular compiler's IR; it consumes
//! the capabilities listed here: iterate functions and module constants,
//! enumerate blocks and their terminators, introspect instructions by
//! opcode family, and match constant operands. This module provides a
//! small concrete realization of that facade, plus a [`FunctionBuilder`]
//! used by the test fixtures and the demo driver.
//!
//! Values are referenced by SSA name (a non-empty string, unique within a
//! function) or as immediate constants. Blocks are indexed by [`BbId`].

#![allow(missing_docs)]

// ============================================================================
// Identifiers and values
// ============================================================================

/// Index of a basic block within its function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BbId(pub usize);

impl BbId {
    /// Access the underlying index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// An immediate constant operand.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
}

impl Constant {
    /// The constant as an interval endpoint.
    #[inline]
    pub fn value(&self) -> f64 {
        match *self {
            Constant::Int(v) => v as f64,
            Constant::Float(v) => v,
        }
    }
}

/// An SSA operand: either an immediate constant or a named value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Const(Constant),
    Name(String),
}

impl Value {
    #[inline]
    pub fn int(v: i64) -> Self {
        Value::Const(Constant::Int(v))
    }

    #[inline]
    pub fn float(v: f64) -> Self {
        Value::Const(Constant::Float(v))
    }

    #[inline]
    pub fn var(name: &str) -> Self {
        Value::Name(name.to_string())
    }

    /// Constant matcher.
    #[inline]
    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            Value::Const(c) => Some(c),
            Value::Name(_) => None,
        }
    }

    /// SSA-name matcher.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        match self {
            Value::Name(n) => Some(n.as_str()),
            Value::Const(_) => None,
        }
    }
}

// ============================================================================
// Instructions
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    And,
    Or,
    Xor,
    Shl,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    FNeg,
    Not,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmpPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

/// Opcode families the analyzer dispatches on.
#[derive(Clone, Debug)]
pub enum InstrKind {
    Binary { op: BinOp, lhs: Value, rhs: Value },
    Unary { op: UnOp, arg: Value },
    Cmp { pred: CmpPred, lhs: Value, rhs: Value },
    Phi { incoming: Vec<(Value, BbId)> },
    Call { callee: String, args: Vec<Value> },
}

/// A non-terminator instruction defining the named SSA value.
#[derive(Clone, Debug)]
pub struct Instr {
    /// SSA name of the defined value; may be empty for value-less calls.
    pub name: String,
    pub kind: InstrKind,
}

impl Instr {
    /// True iff this is a PHI node.
    #[inline]
    pub fn is_phi(&self) -> bool {
        matches!(self.kind, InstrKind::Phi { .. })
    }
}

/// Block terminators.
#[derive(Clone, Debug)]
pub enum Terminator {
    Br { dest: BbId },
    CondBr { cond: Value, then_dest: BbId, else_dest: BbId },
    Switch { on: Value, cases: Vec<(i64, BbId)>, default: BbId },
    Ret { value: Option<Value> },
}

impl Terminator {
    /// Successor blocks in terminator order (switch: cases then default).
    pub fn successors(&self) -> Vec<BbId> {
        match self {
            Terminator::Br { dest } => vec![*dest],
            Terminator::CondBr { then_dest, else_dest, .. } => vec![*then_dest, *else_dest],
            Terminator::Switch { cases, default, .. } => {
                let mut out: Vec<BbId> = cases.iter().map(|&(_, d)| d).collect();
                out.push(*default);
                out
            }
            Terminator::Ret { .. } => Vec::new(),
        }
    }

    #[inline]
    pub fn num_successors(&self) -> usize {
        match self {
            Terminator::Br { .. } => 1,
            Terminator::CondBr { .. } => 2,
            Terminator::Switch { cases, .. } => cases.len() + 1,
            Terminator::Ret { .. } => 0,
        }
    }

    #[inline]
    pub fn is_ret(&self) -> bool {
        matches!(self, Terminator::Ret { .. })
    }
}

// ============================================================================
// Blocks, functions, modules
// ============================================================================

/// A basic block: a name, straight-line instructions, one terminator.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub name: String,
    pub instrs: Vec<Instr>,
    pub term: Terminator,
}

/// A function in SSA form.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    /// Named formal parameters.
    pub params: Vec<String>,
    blocks: Vec<BasicBlock>,
    entry: BbId,
}

impl Function {
    /// The function's entry block.
    #[inline]
    pub fn entry_block(&self) -> BbId {
        self.entry
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn block(&self, bb: BbId) -> &BasicBlock {
        &self.blocks[bb.0]
    }

    #[inline]
    pub fn terminator(&self, bb: BbId) -> &Terminator {
        &self.blocks[bb.0].term
    }

    /// Iterate `(id, block)` pairs in index order.
    pub fn blocks(&self) -> impl Iterator<Item = (BbId, &BasicBlock)> {
        self.blocks.iter().enumerate().map(|(i, b)| (BbId(i), b))
    }

    #[inline]
    pub fn successors(&self, bb: BbId) -> Vec<BbId> {
        self.blocks[bb.0].term.successors()
    }

    /// Compute the predecessor table for all blocks.
    pub fn predecessors(&self) -> Preds {
        let mut of = vec![Vec::new(); self.blocks.len()];
        for (i, b) in self.blocks.iter().enumerate() {
            for s in b.term.successors() {
                of[s.0].push(BbId(i));
            }
        }
        Preds { of }
    }
}

/// Predecessor table computed once per function analysis.
#[derive(Clone, Debug)]
pub struct Preds {
    of: Vec<Vec<BbId>>,
}

impl Preds {
    /// Predecessors of `bb`, in block index order of the branch sources.
    #[inline]
    pub fn of(&self, bb: BbId) -> &[BbId] {
        &self.of[bb.0]
    }

    /// The single block all edges into `bb` come from, if there is one.
    /// Mirrors the unique-predecessor fast path of production IRs: multiple
    /// edges from the same source (switch cases) still count as unique.
    pub fn unique(&self, bb: BbId) -> Option<BbId> {
        let preds = &self.of[bb.0];
        let first = *preds.first()?;
        preds.iter().all(|&p| p == first).then_some(first)
    }
}

/// A named module-level constant.
#[derive(Clone, Debug)]
pub struct GlobalConst {
    pub name: String,
    pub init: Initializer,
}

/// Module-constant initialisers; anything beyond scalars is opaque to the
/// analysis and skipped by the driver.
#[derive(Clone, Debug)]
pub enum Initializer {
    Int(i64),
    Float(f64),
    Opaque,
}

/// A module: functions plus module-level named constants.
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub name: String,
    functions: Vec<Function>,
    globals: Vec<GlobalConst>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Module { name: name.to_string(), functions: Vec::new(), globals: Vec::new() }
    }

    pub fn add_function(&mut self, f: Function) {
        self.functions.push(f);
    }

    pub fn add_global(&mut self, name: &str, init: Initializer) {
        self.globals.push(GlobalConst { name: name.to_string(), init });
    }

    #[inline]
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    #[inline]
    pub fn globals(&self) -> &[GlobalConst] {
        &self.globals
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Errors detected when finalizing a [`FunctionBuilder`].
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    #[error("function {0:?} has no blocks")]
    EmptyFunction(String),
    #[error("block {0:?} has no terminator")]
    MissingTerminator(String),
}

/// Incremental function construction for fixtures and demos.
///
/// Blocks are created first (the first one becomes the entry), then filled
/// with instructions and exactly one terminator each.
pub struct FunctionBuilder {
    name: String,
    params: Vec<String>,
    blocks: Vec<(String, Vec<Instr>, Option<Terminator>)>,
}

impl FunctionBuilder {
    pub fn new(name: &str, params: &[&str]) -> Self {
        FunctionBuilder {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            blocks: Vec::new(),
        }
    }

    /// Create a new empty block and return its id.
    pub fn block(&mut self, name: &str) -> BbId {
        self.blocks.push((name.to_string(), Vec::new(), None));
        BbId(self.blocks.len() - 1)
    }

    pub fn binary(&mut self, bb: BbId, name: &str, op: BinOp, lhs: Value, rhs: Value) {
        self.push(bb, name, InstrKind::Binary { op, lhs, rhs });
    }

    pub fn unary(&mut self, bb: BbId, name: &str, op: UnOp, arg: Value) {
        self.push(bb, name, InstrKind::Unary { op, arg });
    }

    pub fn cmp(&mut self, bb: BbId, name: &str, pred: CmpPred, lhs: Value, rhs: Value) {
        self.push(bb, name, InstrKind::Cmp { pred, lhs, rhs });
    }

    pub fn phi(&mut self, bb: BbId, name: &str, incoming: Vec<(Value, BbId)>) {
        self.push(bb, name, InstrKind::Phi { incoming });
    }

    pub fn call(&mut self, bb: BbId, name: &str, callee: &str, args: Vec<Value>) {
        self.push(bb, name, InstrKind::Call { callee: callee.to_string(), args });
    }

    pub fn br(&mut self, bb: BbId, dest: BbId) {
        self.terminate(bb, Terminator::Br { dest });
    }

    pub fn cond_br(&mut self, bb: BbId, cond: Value, then_dest: BbId, else_dest: BbId) {
        self.terminate(bb, Terminator::CondBr { cond, then_dest, else_dest });
    }

    pub fn switch(&mut self, bb: BbId, on: Value, cases: Vec<(i64, BbId)>, default: BbId) {
        self.terminate(bb, Terminator::Switch { on, cases, default });
    }

    pub fn ret(&mut self, bb: BbId, value: Option<Value>) {
        self.terminate(bb, Terminator::Ret { value });
    }

    fn push(&mut self, bb: BbId, name: &str, kind: InstrKind) {
        self.blocks[bb.0].1.push(Instr { name: name.to_string(), kind });
    }

    fn terminate(&mut self, bb: BbId, term: Terminator) {
        self.blocks[bb.0].2 = Some(term);
    }

    /// Validate and produce the finished [`Function`].
    pub fn finish(self) -> Result<Function, IrError> {
        if self.blocks.is_empty() {
            return Err(IrError::EmptyFunction(self.name));
        }
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for (name, instrs, term) in self.blocks {
            let term = term.ok_or_else(|| IrError::MissingTerminator(name.clone()))?;
            blocks.push(BasicBlock { name, instrs, term });
        }
        Ok(Function { name: self.name, params: self.params, blocks, entry: BbId(0) })
    }
}

// ============================================================================
// Tests
// ============================================================================
