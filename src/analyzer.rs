//! CFG walker (FunctionAnalyzer)
//!
//! ## Overview
//! The walker discovers the structural nesting of a function **at traversal
//! time**: a FIFO worklist of basic blocks, a breadcrumb stack of the open
//! forks and loops, and partial-join counting to decide when a merge or a
//! loop body is complete.
//!
//! Key properties
//! - **Block-once:** a basic block is classified on its first pop; blocks
//!   whose handler ran to completion are skipped on later pops. Gated
//!   roles (merges, latches) use each pop as "one more path arrived".
//! - **Scope chaining:** every visited block gets a scope whose parent is
//!   the unique predecessor's scope, or the nearest *dominating* analysed
//!   block's scope; joins with several analysed predecessors additionally
//!   absorb merged copies of each predecessor's local bindings.
//! - **Iteration bounds as context:** the innermost open loop's header
//!   carries `(min_iter, max_iter)`; handlers read them off the breadcrumb
//!   and pass them by value into the instruction sweeps.
//! - **Breaks retype forks:** a successor that leaves the current loop is
//!   not enqueued; instead the nearest enclosing open fork is retyped to
//!   [`BlockRole::InterLoopFork`] and the join is handled at the loop exit.
//!
//! Every handler follows the same four phases: bookkeeping (breadcrumbs,
//! pending counters), scope construction, instruction sweep (PHIs first,
//! then expressions), successor enqueue.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::block::{classify, Block, BlockId, BlockRole, Breadcrumb, IterBounds};
use crate::dom::DomTree;
use crate::instr::InstructionAnalyzer;
use crate::ir::{BbId, Function, Preds, Terminator, Value};
use crate::loops::{LoopId, LoopInfo};
use crate::range::Range;
use crate::scev::{ScalarEvolution, Scev};
use crate::scope::{Operand, OperandKind, ScopeArena, ScopeId};

/// Per-function analysis driver.
///
/// Owns the block arena, the worklist and breadcrumb stack, the function's
/// root scope (chained under the global scope), the instruction analyzer,
/// and the cached per-function oracles.
pub struct FunctionAnalyzer<'f> {
    func: &'f Function,
    dom: DomTree,
    li: LoopInfo,
    se: ScalarEvolution,
    preds: Preds,
    blocks: Vec<Block>,
    block_of: Vec<Option<BlockId>>,
    worklist: VecDeque<BbId>,
    breadcrumb: Vec<Breadcrumb>,
    fn_scope: ScopeId,
    ia: InstructionAnalyzer,
    iter_fallback: u64,
}

impl<'f> FunctionAnalyzer<'f> {
    /// Prepare an analyzer for `func`. The function scope is created under
    /// `global` and seeded with ⊤ operands for the named arguments.
    pub fn new(
        func: &'f Function,
        arena: &mut ScopeArena,
        global: Option<ScopeId>,
        iter_fallback: u64,
    ) -> Self {
        let dom = DomTree::compute(func);
        let li = LoopInfo::compute(func, &dom);
        let se = ScalarEvolution::analyze(func, &li);
        let preds = func.predecessors();

        let fn_scope = arena.new_scope(global);
        for p in &func.params {
            arena.add_operand(
                fn_scope,
                Operand::concrete(p.clone(), OperandKind::Argument, Range::TOP),
            );
        }

        FunctionAnalyzer {
            func,
            dom,
            li,
            se,
            preds,
            blocks: Vec::new(),
            block_of: vec![None; func.num_blocks()],
            worklist: VecDeque::new(),
            breadcrumb: Vec::new(),
            fn_scope,
            ia: InstructionAnalyzer::new(),
            iter_fallback,
        }
    }

    /// The function's root scope (arguments, `return` binding).
    #[inline]
    pub fn function_scope(&self) -> ScopeId {
        self.fn_scope
    }

    /// The wrapper created for `bb` during the walk, if it was reached.
    pub fn block_for(&self, bb: BbId) -> Option<&Block> {
        self.block_of[bb.as_usize()].map(|id| &self.blocks[id.as_usize()])
    }

    /// Run the traversal and return the function scope.
    pub fn analyze(&mut self, arena: &mut ScopeArena) -> ScopeId {
        self.worklist.push_back(self.func.entry_block());

        while let Some(bb) = self.worklist.pop_front() {
            let id = match self.block_of[bb.as_usize()] {
                Some(id) if self.blocks[id.as_usize()].analyzed => continue,
                Some(id) => id,
                None => {
                    let (role, lid) = classify(bb, self.func, &self.li, &self.preds);
                    let id = BlockId(self.blocks.len());
                    self.blocks.push(Block::new(bb, role, lid));
                    self.block_of[bb.as_usize()] = Some(id);
                    debug!(block = %self.func.block(bb).name, ?role, "classified");
                    id
                }
            };
            self.dispatch(arena, id);
        }

        // Resolve everything the walk produced, in deterministic order, so
        // the result scopes are directly queryable.
        let scopes: Vec<ScopeId> = self.blocks.iter().filter_map(|b| b.scope).collect();
        for s in scopes {
            arena.resolve_all(s);
        }
        arena.resolve_all(self.fn_scope);
        self.fn_scope
    }

    fn dispatch(&mut self, arena: &mut ScopeArena, id: BlockId) {
        match self.blocks[id.as_usize()].role {
            BlockRole::LoopHeader => self.init_loop(arena, id),
            BlockRole::LoopLatch => self.process_loop_latch(arena, id),
            BlockRole::LoopExit => self.handle_loop_exit(arena, id),
            BlockRole::StandardFork => self.init_standard_fork(arena, id),
            BlockRole::StandardMerge => self.handle_standard_merge(arena, id),
            // Inter-loop forks were fully analysed when they were forks;
            // reaching one again is a plain passthrough.
            BlockRole::Simple | BlockRole::Return | BlockRole::InterLoopFork => {
                self.process_simple(arena, id)
            }
        }
    }

    // ------------------------------------------------------------------
    // Role handlers
    // ------------------------------------------------------------------

    /// Loop header: open the loop frame, seed header PHIs from the entering
    /// edge, determine the iteration bounds, enqueue the in-loop successor.
    fn init_loop(&mut self, arena: &mut ScopeArena, id: BlockId) {
        let func = self.func;
        let bb = self.blocks[id.as_usize()].bb;
        let lid = self.blocks[id.as_usize()].loop_id.expect("header owns a loop");

        self.breadcrumb.push(Breadcrumb::Loop(id));
        self.blocks[id.as_usize()].pending_latches = self.li.get(lid).latches.len() as u32;

        let scope = self.build_scope_from_dominator(arena, id);
        // The header's own instructions run under the default bounds; the
        // counted bounds are installed after the sweep and apply to the body.
        let bounds = self.current_bounds();
        self.ia
            .sweep_header_phis(arena, scope, func.block(bb), lid, &self.li, &self.se);
        self.ia.sweep_expressions(arena, scope, func.block(bb), bounds);

        let counted = self.loop_iter_bounds(lid);
        self.blocks[id.as_usize()].iter_bounds = counted;

        for s in func.successors(bb) {
            if self.li.loop_for(s) == Some(lid) {
                self.enqueue(s);
                break;
            }
        }
        self.blocks[id.as_usize()].analyzed = true;
    }

    /// Loop latch: count the arrived back edge; when the loop is whole,
    /// rescale the header scope, enqueue the exits, close the loop frame.
    fn process_loop_latch(&mut self, arena: &mut ScopeArena, id: BlockId) {
        let func = self.func;
        let bb = self.blocks[id.as_usize()].bb;

        let header = self.nearest_loop_frame();
        match header {
            Some(h) => self.blocks[h.as_usize()].decr_remaining_latches(),
            None => warn!(block = %func.block(bb).name, "latch outside any open loop"),
        }

        let scope = self.build_scope_from_dominator(arena, id);
        let bounds = self.current_bounds();
        self.ia.sweep_expressions(arena, scope, func.block(bb), bounds);
        self.blocks[id.as_usize()].analyzed = true;

        let Some(h) = header else { return };
        if !self.blocks[h.as_usize()].loop_whole_analyzed() {
            return; // other latches must still arrive
        }

        self.rescale_loop_header(arena, h, scope);

        let lid = self.blocks[h.as_usize()].loop_id.expect("header owns a loop");
        if let Some(e) = self.li.unique_exit_block(lid) {
            self.enqueue(e);
        } else {
            for e in self.li.get(lid).exit_blocks.clone() {
                self.enqueue(e);
            }
        }
        self.pop_loop_frames(h);
    }

    /// Simple or return block: sweep expressions, pass through; a `ret`
    /// terminator completes a fork path and binds the return range.
    fn process_simple(&mut self, arena: &mut ScopeArena, id: BlockId) {
        let func = self.func;
        let bb = self.blocks[id.as_usize()].bb;

        let scope = self.build_scope_from_dominator(arena, id);
        let bounds = self.current_bounds();
        self.ia.sweep_expressions(arena, scope, func.block(bb), bounds);
        self.blocks[id.as_usize()].analyzed = true;

        match func.terminator(bb) {
            Terminator::Br { dest } => {
                if self.leaves_loop(id, *dest) {
                    debug!(block = %func.block(bb).name, "break edge; not enqueued");
                    self.mark_nearest_fork_inter_loop();
                } else {
                    self.enqueue(*dest);
                }
            }
            Terminator::Ret { value } => {
                if let Some(f) = self.nearest_fork_frame() {
                    self.blocks[f.as_usize()].decr_remaining_branches();
                }
                self.handle_return(arena, id, value.clone());
            }
            term => {
                // classification routes multi-way terminators to the fork
                // handler; reaching this arm means the CFG changed under us
                debug!(block = %func.block(bb).name, "unexpected multi-way terminator");
                for s in term.successors() {
                    self.enqueue(s);
                }
            }
        }
    }

    /// Standard fork: open a fork frame, sweep, enqueue the in-loop
    /// successors, record how many paths must complete.
    fn init_standard_fork(&mut self, arena: &mut ScopeArena, id: BlockId) {
        let func = self.func;
        let bb = self.blocks[id.as_usize()].bb;

        self.breadcrumb.push(Breadcrumb::Fork(id));

        let scope = self.build_scope_from_dominator(arena, id);
        let bounds = self.current_bounds();
        self.ia.sweep_phis(arena, scope, func.block(bb));
        self.ia.sweep_expressions(arena, scope, func.block(bb), bounds);

        let succs = func.terminator(bb).successors();
        let n = self.scan_fork_successors(id, &succs);
        self.blocks[id.as_usize()].pending_branches = n;
        self.blocks[id.as_usize()].analyzed = true;
    }

    /// Standard merge: each arrival completes one fork path; the last one
    /// builds the join scope, folds the PHIs, closes the fork frame and
    /// re-examines the terminator.
    fn handle_standard_merge(&mut self, arena: &mut ScopeArena, id: BlockId) {
        if let Some(f) = self.nearest_fork_frame() {
            self.blocks[f.as_usize()].decr_remaining_branches();
            if !self.blocks[f.as_usize()].fork_whole_analyzed() {
                return; // re-armed: the next pop is the next arrived path
            }
        }

        let func = self.func;
        let bb = self.blocks[id.as_usize()].bb;
        let scope = self.build_join_scope(arena, id);
        let bounds = self.current_bounds();
        self.ia.sweep_phis(arena, scope, func.block(bb));
        self.ia.sweep_expressions(arena, scope, func.block(bb), bounds);

        self.pop_fork_frame();
        self.merge_exit_tail(arena, id);
        self.blocks[id.as_usize()].analyzed = true;
    }

    /// Loop exit: the merge's post-analysis steps without pending-branch
    /// gating; arriving here means the loop has produced the exit.
    fn handle_loop_exit(&mut self, arena: &mut ScopeArena, id: BlockId) {
        let func = self.func;
        let bb = self.blocks[id.as_usize()].bb;
        let scope = self.build_join_scope(arena, id);
        let bounds = self.current_bounds();
        self.ia.sweep_phis(arena, scope, func.block(bb));
        self.ia.sweep_expressions(arena, scope, func.block(bb), bounds);

        self.merge_exit_tail(arena, id);
        self.blocks[id.as_usize()].analyzed = true;
    }

    /// Shared tail of merge and exit handlers: single successors pass
    /// through, returns bind the function range, multi-way terminators
    /// retype the block into a fresh fork.
    fn merge_exit_tail(&mut self, arena: &mut ScopeArena, id: BlockId) {
        let func = self.func;
        let bb = self.blocks[id.as_usize()].bb;
        match func.terminator(bb) {
            Terminator::Br { dest } => {
                if self.leaves_loop(id, *dest) {
                    debug!(block = %func.block(bb).name, "break edge; not enqueued");
                    self.mark_nearest_fork_inter_loop();
                } else {
                    self.enqueue(*dest);
                }
            }
            Terminator::Ret { value } => {
                if let Some(f) = self.nearest_fork_frame() {
                    self.blocks[f.as_usize()].decr_remaining_branches();
                }
                self.handle_return(arena, id, value.clone());
            }
            term @ (Terminator::CondBr { .. } | Terminator::Switch { .. }) => {
                // the join opens another fork: retype, push, enqueue
                let succs = term.successors();
                self.blocks[id.as_usize()].role = BlockRole::StandardFork;
                self.breadcrumb.push(Breadcrumb::Fork(id));
                let n = self.scan_fork_successors(id, &succs);
                self.blocks[id.as_usize()].pending_branches = n;
            }
        }
    }

    /// Bind a resolvable returned value into the function scope as
    /// `return`; widening across multiple return sites.
    fn handle_return(&mut self, arena: &mut ScopeArena, id: BlockId, value: Option<Value>) {
        let Some(v) = value else { return };
        let scope = self.blocks[id.as_usize()].scope.expect("scope built before return");
        let Some(op) = self.ia.operand_for_value(arena, scope, &v) else {
            debug!("returned value unknown; no return range");
            return;
        };
        if arena.try_resolve(op) {
            let rg = arena.operand(op).range.expect("resolved").with_fixed(false);
            arena.add_or_enlarge(self.fn_scope, "return", OperandKind::Return, rg);
        } else {
            debug!("returned value unresolved; no return range");
        }
    }

    // ------------------------------------------------------------------
    // Scope construction
    // ------------------------------------------------------------------

    fn scope_of_bb(&self, bb: BbId) -> Option<ScopeId> {
        self.block_of[bb.as_usize()].and_then(|id| self.blocks[id.as_usize()].scope)
    }

    /// Scope of the nearest dominating analysed block, else the function
    /// scope (the entry has no analysed dominator).
    fn nearest_dominating_scope(&self, bb: BbId) -> ScopeId {
        let mut cur = self.dom.idom(bb);
        while let Some(d) = cur {
            if let Some(s) = self.scope_of_bb(d) {
                return s;
            }
            cur = self.dom.idom(d);
        }
        self.fn_scope
    }

    fn build_scope_from_dominator(&mut self, arena: &mut ScopeArena, id: BlockId) -> ScopeId {
        let bb = self.blocks[id.as_usize()].bb;
        let parent = self.nearest_dominating_scope(bb);
        let s = arena.new_scope(Some(parent));
        self.blocks[id.as_usize()].scope = Some(s);
        s
    }

    /// Join-scope construction: a unique analysed predecessor chains the
    /// join directly under it; otherwise the join sits under its nearest
    /// dominating analysed block and absorbs merged copies of every
    /// analysed predecessor's local bindings.
    fn build_join_scope(&mut self, arena: &mut ScopeArena, id: BlockId) -> ScopeId {
        let bb = self.blocks[id.as_usize()].bb;

        if let Some(p) = self.preds.unique(bb) {
            if let Some(ps) = self.scope_of_bb(p) {
                let s = arena.new_scope(Some(ps));
                self.blocks[id.as_usize()].scope = Some(s);
                return s;
            }
        }

        let pred_scopes: Vec<ScopeId> = self
            .preds
            .of(bb)
            .iter()
            .filter_map(|&p| self.scope_of_bb(p))
            .collect();
        let s = self.build_scope_from_dominator(arena, id);
        for ps in pred_scopes {
            arena.merge_into(s, ps);
        }
        s
    }

    // ------------------------------------------------------------------
    // Breadcrumb and successor helpers
    // ------------------------------------------------------------------

    fn nearest_loop_frame(&self) -> Option<BlockId> {
        self.breadcrumb.iter().rev().find_map(|f| match f {
            Breadcrumb::Loop(id) => Some(*id),
            Breadcrumb::Fork(_) => None,
        })
    }

    fn nearest_fork_frame(&self) -> Option<BlockId> {
        self.breadcrumb.iter().rev().find_map(|f| match f {
            Breadcrumb::Fork(id) => Some(*id),
            Breadcrumb::Loop(_) => None,
        })
    }

    /// Iteration bounds in force: the innermost open loop header's, or
    /// `(1, 1)` outside any loop.
    fn current_bounds(&self) -> IterBounds {
        match self.nearest_loop_frame() {
            Some(h) => self.blocks[h.as_usize()].iter_bounds,
            None => IterBounds::ONCE,
        }
    }

    #[inline]
    fn enqueue(&mut self, bb: BbId) {
        self.worklist.push_back(bb);
    }

    /// True iff following `succ` from this block abandons the block's loop
    /// (neither stays in it nor enters a nested one).
    fn leaves_loop(&self, id: BlockId, succ: BbId) -> bool {
        match self.blocks[id.as_usize()].loop_id {
            Some(l) => !self.li.loop_contains(l, succ),
            None => false,
        }
    }

    fn mark_nearest_fork_inter_loop(&mut self) {
        if let Some(f) = self.nearest_fork_frame() {
            if self.blocks[f.as_usize()].role != BlockRole::InterLoopFork {
                debug!(
                    block = %self.func.block(self.blocks[f.as_usize()].bb).name,
                    "fork retyped as inter-loop fork"
                );
                self.blocks[f.as_usize()].role = BlockRole::InterLoopFork;
            }
        }
    }

    /// Enqueue the successors that stay in the loop and count them; break
    /// edges retype the enclosing fork and are left to the loop exit.
    fn scan_fork_successors(&mut self, id: BlockId, succs: &[BbId]) -> u32 {
        let mut n = 0;
        for &s in succs {
            if self.leaves_loop(id, s) {
                debug!("break edge out of fork; not enqueued");
                self.mark_nearest_fork_inter_loop();
            } else {
                self.enqueue(s);
                n += 1;
            }
        }
        n
    }

    fn pop_fork_frame(&mut self) {
        match self.breadcrumb.last() {
            Some(Breadcrumb::Fork(_)) => {
                self.breadcrumb.pop();
            }
            _ => {
                if let Some(pos) = self
                    .breadcrumb
                    .iter()
                    .rposition(|f| matches!(f, Breadcrumb::Fork(_)))
                {
                    debug!("fork frame not on top at join; removing out of order");
                    self.breadcrumb.remove(pos);
                }
            }
        }
    }

    /// Pop frames up to and including the loop frame of `h`. Frames above
    /// it can only be forks whose joins lie outside the loop.
    fn pop_loop_frames(&mut self, h: BlockId) {
        while let Some(top) = self.breadcrumb.pop() {
            match top {
                Breadcrumb::Loop(id) if id == h => break,
                frame => debug!(?frame, "discarding dangling frame at loop completion"),
            }
        }
    }

    // ------------------------------------------------------------------
    // Loop bookkeeping
    // ------------------------------------------------------------------

    /// Trip-count bounds for a loop: the exact constant trip count floors
    /// `min_iter` (0 when unknown); `max_iter` is the constant
    /// backedge-taken count plus one, or the conservative fallback.
    fn loop_iter_bounds(&self, lid: LoopId) -> IterBounds {
        let min_iter = self.se.small_constant_trip_count(lid).unwrap_or(0);
        let max_iter = match self.se.backedge_taken_count(lid) {
            Scev::Constant(c) => c + 1,
            Scev::CouldNotCompute => {
                warn!(
                    fallback = self.iter_fallback,
                    "trip count uncomputable; assuming the fallback cap"
                );
                self.iter_fallback
            }
        };
        debug!(min_iter, max_iter, "loop iteration bounds");
        IterBounds { min_iter, max_iter }
    }

    /// Widen the header scope with everything the loop body bound (the
    /// latch-side scope chain up to the header), then re-fold the header
    /// PHIs over all incoming values so widened ranges propagate to
    /// dependents.
    fn rescale_loop_header(&mut self, arena: &mut ScopeArena, h: BlockId, latch_scope: ScopeId) {
        let func = self.func;
        let Some(hs) = self.blocks[h.as_usize()].scope else { return };

        let mut chain = Vec::new();
        let mut cur = Some(latch_scope);
        while let Some(s) = cur {
            if s == hs || s == self.fn_scope {
                break;
            }
            chain.push(s);
            cur = arena.parent(s);
        }
        for s in chain {
            arena.merge_into(hs, s);
        }

        let bb = self.blocks[h.as_usize()].bb;
        self.ia.resweep_header_phis(arena, hs, func.block(bb));
    }
}

// ============================================================================
// Tests
// ============================================================================
