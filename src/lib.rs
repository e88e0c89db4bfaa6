//! Crate root: public surface, core aliases, and analysis-wide invariants
//!
//! This crate implements **value range analysis** (VRA) over functions in
//! SSA form: for every named SSA value it computes a conservative interval
//! `[lo, hi]` over the extended reals, and attaches the results to scopes
//! arranged along the dominator structure so downstream consumers can query
//! the range of any value at any program point.
//!
//! ## Invariants
//!
//! - **Lattice.** Intervals use one real-valued representation with ⊥
//!   encoded as `[+∞, −∞]` and ⊤ as `[−∞, +∞]`; `merge` treats ⊥ as its
//!   identity and `fixed` intervals never widen.
//! - **Acyclic resolution.** The operand dependency graph is acyclic by
//!   SSA; the only potential cycle (the loop back-edge through a header
//!   PHI) is broken by synthesizing a `HEAD_`-prefixed snapshot node, so
//!   demand-driven resolution always terminates.
//! - **Single classification.** Every basic block is classified into a
//!   structural role exactly once; partial joins (merges, latches) re-arm
//!   until all paths into them have completed, then analyse exactly once.
//! - **Soft failure.** Unknown operands, unsupported opcodes, possible
//!   division by zero and uncomputable trip counts degrade to conservative
//!   (possibly ⊤) results with a log line; nothing aborts the analysis.
//!
//! The walk itself is single-threaded and synchronous: a FIFO worklist per
//! function, deterministic given the CFG and the oracle outputs.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Interval lattice and loop-aware interval arithmetic.
pub mod range;

/// Minimal SSA IR consumed by the analysis: module, function, builder.
pub mod ir;

/// Dominator-tree oracle (iterative idom computation, dominance queries).
pub mod dom;

/// Natural-loop oracle (headers, latches, exit blocks, nesting).
pub mod loops;

/// Scalar-evolution oracle (trip counts, affine recurrences on header PHIs).
pub mod scev;

/// Parent-chained scope graph and the lazy symbolic-range operand DAG.
pub mod scope;

/// Structural block roles, classification, and the breadcrumb stack.
pub mod block;

/// Instruction analyzer: maps SSA instructions to operand nodes.
pub mod instr;

/// CFG walker: worklist traversal driving classification and analysis.
pub mod analyzer;

/// Module pass driver, pass registry, and analysis configuration.
pub mod pass;

// ============================================================================
// Canonical aliases and root-level re-exports
// ============================================================================

/// Interval endpoint type used across the crate.
pub type Bound = f64;

pub use crate::analyzer::FunctionAnalyzer;
pub use crate::block::{Block, BlockId, BlockRole, Breadcrumb, IterBounds};
pub use crate::ir::{BbId, Function, Module};
pub use crate::pass::{ModulePass, PassRegistry, PreservedAnalyses, VraConfig, VraPass};
pub use crate::range::{Range, RangeError};
pub use crate::scope::{Operand, OperandKind, OperandRef, ScopeArena, ScopeId, ScopeJson};
