//! Structural block roles & classification
//!
//! Every basic block the walker touches is wrapped in a [`Block`] carrying
//! its structural role, join/latch counters, iteration bounds, and (once
//! visited) its scope. Roles are assigned exactly once by [`classify`];
//! traversal may later *upgrade* a merge or loop exit to a fork when its
//! terminator turns out to branch, or a fork to [`BlockRole::InterLoopFork`]
//! when one of its paths breaks out of the enclosing loop.

use crate::ir::{BbId, Function, Preds};
use crate::loops::{LoopId, LoopInfo};
use crate::scope::ScopeId;

/// Index of a block wrapper within one function analysis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

impl BlockId {
    /// Access the underlying index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Structural role of a basic block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockRole {
    /// Straight-line block with nothing noteworthy.
    Simple,
    /// Branch or switch with a join inside the same loop.
    StandardFork,
    /// Join point of a standard fork.
    StandardMerge,
    /// Fork whose join lies outside the enclosing loop (a `break`).
    InterLoopFork,
    /// First block of a loop, carrying the header PHIs.
    LoopHeader,
    /// In-loop block with an edge back to the header.
    LoopLatch,
    /// Block outside a loop reached from inside it.
    LoopExit,
    /// Block terminated by a return.
    Return,
}

/// One frame of the dynamic structure stack: an open fork or loop.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Breadcrumb {
    /// An open fork awaiting its join.
    Fork(BlockId),
    /// An open loop awaiting its latches.
    Loop(BlockId),
}

/// Iteration bounds of the innermost enclosing loop, threaded through the
/// instruction analyzer as a value context.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IterBounds {
    /// Guaranteed number of iterations.
    pub min_iter: u64,
    /// Iteration cap used for widening.
    pub max_iter: u64,
}

impl IterBounds {
    /// Outside any loop: everything happens exactly once.
    pub const ONCE: IterBounds = IterBounds { min_iter: 1, max_iter: 1 };

    /// Default bounds of a block not yet associated with a counted loop.
    pub const UNCOUNTED: IterBounds = IterBounds { min_iter: 0, max_iter: 1 };
}

/// Wrapper around an IR basic block with traversal bookkeeping.
#[derive(Debug)]
pub struct Block {
    /// The underlying IR block.
    pub bb: BbId,
    /// Structural role; assigned once, possibly upgraded to a fork kind.
    pub role: BlockRole,
    /// Innermost loop owning this block, if any.
    pub loop_id: Option<LoopId>,
    /// Loop iteration bounds (meaningful on headers).
    pub iter_bounds: IterBounds,
    /// Back edges not yet seen (headers only).
    pub pending_latches: u32,
    /// Fork paths not yet completed (forks only).
    pub pending_branches: u32,
    /// Scope created when the block was visited.
    pub scope: Option<ScopeId>,
    /// True once the block's handler has run to completion.
    pub analyzed: bool,
}

impl Block {
    /// Fresh wrapper with counters at zero.
    pub fn new(bb: BbId, role: BlockRole, loop_id: Option<LoopId>) -> Self {
        Block {
            bb,
            role,
            loop_id,
            iter_bounds: IterBounds::UNCOUNTED,
            pending_latches: 0,
            pending_branches: 0,
            scope: None,
            analyzed: false,
        }
    }

    /// True once every latch of the loop has been seen.
    #[inline]
    pub fn loop_whole_analyzed(&self) -> bool {
        self.pending_latches == 0
    }

    /// True once every fork path has completed.
    #[inline]
    pub fn fork_whole_analyzed(&self) -> bool {
        self.pending_branches == 0
    }

    /// Record one arrived back edge.
    #[inline]
    pub fn decr_remaining_latches(&mut self) {
        debug_assert!(self.pending_latches > 0, "latch counter underflow");
        self.pending_latches = self.pending_latches.saturating_sub(1);
    }

    /// Record one completed fork path.
    #[inline]
    pub fn decr_remaining_branches(&mut self) {
        debug_assert!(self.pending_branches > 0, "branch counter underflow");
        self.pending_branches = self.pending_branches.saturating_sub(1);
    }
}

/// Assign the structural role of `bb`.
///
/// Order of checks: loop membership first (header, then latch, both with
/// the unique fast path), then exit-of-any-loop, then join (≥2
/// predecessors), then fork (≥2 successors), then return; everything else
/// is a simple block.
pub fn classify(
    bb: BbId,
    f: &Function,
    li: &LoopInfo,
    preds: &Preds,
) -> (BlockRole, Option<LoopId>) {
    let owning = li.loop_for(bb);

    if let Some(l) = owning {
        if li.get(l).header == bb {
            return (BlockRole::LoopHeader, owning);
        }
        if li.is_latch(l, bb) {
            return (BlockRole::LoopLatch, owning);
        }
    }

    if li.exited_loop_of(bb).is_some() {
        return (BlockRole::LoopExit, owning);
    }

    if preds.of(bb).len() >= 2 && preds.unique(bb).is_none() {
        return (BlockRole::StandardMerge, owning);
    }

    if f.terminator(bb).num_successors() >= 2 {
        return (BlockRole::StandardFork, owning);
    }

    if f.terminator(bb).is_ret() {
        return (BlockRole::Return, owning);
    }

    (BlockRole::Simple, owning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::DomTree;
    use crate::ir::{FunctionBuilder, Value};

    fn oracles(f: &Function) -> (LoopInfo, Preds) {
        let dt = DomTree::compute(f);
        (LoopInfo::compute(f, &dt), f.predecessors())
    }

    #[test]
    fn diamond_roles() {
        let mut fb = FunctionBuilder::new("f", &[]);
        let entry = fb.block("entry");
        let t = fb.block("t");
        let e = fb.block("e");
        let join = fb.block("join");
        fb.cond_br(entry, Value::var("c"), t, e);
        fb.br(t, join);
        fb.br(e, join);
        fb.ret(join, Some(Value::var("y")));
        let f = fb.finish().unwrap();
        let (li, preds) = oracles(&f);

        assert_eq!(classify(entry, &f, &li, &preds).0, BlockRole::StandardFork);
        assert_eq!(classify(t, &f, &li, &preds).0, BlockRole::Simple);
        assert_eq!(classify(e, &f, &li, &preds).0, BlockRole::Simple);
        // the join is a merge even though its terminator returns
        assert_eq!(classify(join, &f, &li, &preds).0, BlockRole::StandardMerge);
    }

    #[test]
    fn loop_roles() {
        let mut fb = FunctionBuilder::new("f", &[]);
        let entry = fb.block("entry");
        let header = fb.block("header");
        let body = fb.block("body");
        let latch = fb.block("latch");
        let exit = fb.block("exit");
        fb.br(entry, header);
        fb.cond_br(header, Value::var("c"), body, exit);
        fb.br(body, latch);
        fb.br(latch, header);
        fb.ret(exit, None);
        let f = fb.finish().unwrap();
        let (li, preds) = oracles(&f);

        let (role, l) = classify(header, &f, &li, &preds);
        assert_eq!(role, BlockRole::LoopHeader);
        assert!(l.is_some());
        assert_eq!(classify(latch, &f, &li, &preds).0, BlockRole::LoopLatch);
        assert_eq!(classify(body, &f, &li, &preds).0, BlockRole::Simple);
        let (role, l) = classify(exit, &f, &li, &preds);
        assert_eq!(role, BlockRole::LoopExit);
        // the exit sits outside the loop it closes
        assert_eq!(l, None);
    }

    #[test]
    fn single_block_function_is_a_return_block() {
        let mut fb = FunctionBuilder::new("f", &[]);
        let entry = fb.block("entry");
        fb.ret(entry, Some(Value::var("r")));
        let f = fb.finish().unwrap();
        let (li, preds) = oracles(&f);
        assert_eq!(classify(entry, &f, &li, &preds).0, BlockRole::Return);
    }

    #[test]
    fn counters_reach_zero_once() {
        let mut b = Block::new(BbId(0), BlockRole::LoopHeader, None);
        b.pending_latches = 2;
        assert!(!b.loop_whole_analyzed());
        b.decr_remaining_latches();
        assert!(!b.loop_whole_analyzed());
        b.decr_remaining_latches();
        assert!(b.loop_whole_analyzed());

        let mut fk = Block::new(BbId(1), BlockRole::StandardFork, None);
        fk.pending_branches = 1;
        fk.decr_remaining_branches();
        assert!(fk.fork_whole_analyzed());
    }
}
