//! Instruction analyzer
//!
//! Translates the instructions of one basic block into operand nodes of
//! the lazy range DAG. Dispatch is by opcode family:
//!
//! - binary add/sub/mul/div build a two-dependency node whose combine
//!   closure applies the matching interval operator with the iteration
//!   bounds in force when the instruction was analysed;
//! - unary negation builds a one-dependency node; bitwise-not degrades to
//!   ⊤; comparisons become `[0, 1]` constants;
//! - PHIs outside loop headers fold their incoming ranges with `merge`;
//! - PHIs **on loop headers** consider only the entering predecessor and
//!   synthesize a `HEAD_`-prefixed snapshot node, which breaks the
//!   back-edge cycle and seeds the induction range. When scalar evolution
//!   recognizes the PHI as an affine recurrence with a known trip count,
//!   the snapshot is seeded with the whole induction envelope instead.
//!
//! Unsupported opcodes are skipped; dependents that name their results
//! fail resolution and report ⊤. After an instruction defining `name` is
//! processed, the current scope resolves `name` unless the opcode was
//! unsupported.

use tracing::{debug, warn};

use crate::block::IterBounds;
use crate::ir::{BasicBlock, BinOp, InstrKind, UnOp, Value};
use crate::loops::{LoopId, LoopInfo};
use crate::range::{self, Range};
use crate::scev::ScalarEvolution;
use crate::scope::{Combine, Operand, OperandKind, OperandRef, ScopeArena, ScopeId};

/// Folds dependency ranges with `merge`; ⊥ is the identity.
fn merge_fold() -> Combine {
    Box::new(|rs: &[Range]| rs.iter().copied().fold(Range::BOTTOM, range::merge))
}

/// Per-function instruction analyzer. Holds only the counter used to name
/// synthesized constants (`const<N>`); everything else is passed in.
#[derive(Debug, Default)]
pub struct InstructionAnalyzer {
    next_const: usize,
}

impl InstructionAnalyzer {
    /// Fresh analyzer with the constant counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn an IR value into a dependency operand: constants are
    /// synthesized into the current scope, names are looked up through the
    /// scope chain. `None` means the name is unknown here.
    pub fn operand_for_value(
        &mut self,
        arena: &mut ScopeArena,
        scope: ScopeId,
        v: &Value,
    ) -> Option<OperandRef> {
        match v {
            Value::Const(c) => {
                let name = format!("const{}", self.next_const);
                self.next_const += 1;
                Some(arena.add_operand(
                    scope,
                    Operand::concrete(name, OperandKind::Constant, Range::fixed_point(c.value())),
                ))
            }
            Value::Name(n) => {
                let found = arena.lookup(scope, n);
                if found.is_none() {
                    debug!(name = %n, "operand not found in any reachable scope; skipped");
                }
                found
            }
        }
    }

    // ------------------------------------------------------------------
    // Sweeps
    // ------------------------------------------------------------------

    /// One pass over the block's PHI nodes (join blocks).
    pub fn sweep_phis(&mut self, arena: &mut ScopeArena, scope: ScopeId, bb: &BasicBlock) {
        for instr in &bb.instrs {
            if let InstrKind::Phi { incoming } = &instr.kind {
                if instr.name.is_empty() {
                    continue;
                }
                let mut deps = Vec::with_capacity(incoming.len());
                for (v, _) in incoming {
                    match self.operand_for_value(arena, scope, v) {
                        Some(r) => deps.push(r),
                        None => debug!(phi = %instr.name, "incoming value unknown; dropped"),
                    }
                }
                if deps.is_empty() {
                    debug!(phi = %instr.name, "no resolvable incoming values; skipped");
                    continue;
                }
                arena.add_operand(
                    scope,
                    Operand::pending(instr.name.clone(), OperandKind::Local, deps, merge_fold()),
                );
            }
        }
    }

    /// One pass over a loop header's PHI nodes. Only the entering
    /// predecessor is considered; the back edge is deliberately ignored so
    /// the operand DAG stays acyclic.
    pub fn sweep_header_phis(
        &mut self,
        arena: &mut ScopeArena,
        scope: ScopeId,
        bb: &BasicBlock,
        lid: LoopId,
        li: &LoopInfo,
        se: &ScalarEvolution,
    ) {
        for instr in &bb.instrs {
            let InstrKind::Phi { incoming } = &instr.kind else { continue };
            if instr.name.is_empty() {
                continue;
            }
            let head_name = format!("HEAD_{}", instr.name);

            let head = if let (Some(rec), Some(trip @ 1..)) = (
                se.phi_addrec(lid, &instr.name),
                se.small_constant_trip_count(lid),
            ) {
                // Affine recurrence with a known trip count: seed the whole
                // induction envelope [start, start + step·(trip−1)].
                let last = rec.start + rec.step * ((trip - 1) as f64);
                Operand::concrete(head_name, OperandKind::Local, Range::new(rec.start, last))
            } else {
                let entering = incoming.iter().find(|(_, from)| !li.loop_contains(lid, *from));
                let Some((enter_v, _)) = entering else {
                    debug!(phi = %instr.name, "header phi without entering edge; skipped");
                    continue;
                };
                match enter_v {
                    Value::Const(c) => Operand::concrete(
                        head_name,
                        OperandKind::Constant,
                        Range::fixed_point(c.value()),
                    ),
                    Value::Name(n) => match arena.lookup(scope, n) {
                        Some(src) => {
                            let snapshot = arena.force_resolve(src).with_fixed(false);
                            let kind = match arena.operand(src).kind {
                                OperandKind::Argument => OperandKind::ArgumentRef,
                                _ => OperandKind::Local,
                            };
                            Operand::concrete(head_name, kind, snapshot)
                        }
                        None => {
                            debug!(phi = %instr.name, entering = %n, "entering value unknown; skipped");
                            continue;
                        }
                    },
                }
            };

            let href = arena.add_operand(scope, head);
            arena.add_operand(
                scope,
                Operand::pending(instr.name.clone(), OperandKind::Local, vec![href], merge_fold()),
            );
        }
    }

    /// Re-fold a header's PHIs over *all* incoming values, widening the
    /// existing nodes. Runs after the loop body has been analysed and its
    /// bindings merged into the header scope, so back-edge names resolve.
    pub fn resweep_header_phis(&mut self, arena: &mut ScopeArena, scope: ScopeId, bb: &BasicBlock) {
        for instr in &bb.instrs {
            let InstrKind::Phi { incoming } = &instr.kind else { continue };
            if instr.name.is_empty() {
                continue;
            }
            let mut folded = Range::BOTTOM;
            let mut any = false;
            for (v, _) in incoming {
                match v {
                    Value::Const(c) => {
                        folded = range::merge(folded, Range::point(c.value()));
                        any = true;
                    }
                    Value::Name(n) => {
                        if let Some(r) = arena.lookup(scope, n) {
                            folded = range::merge(folded, arena.force_resolve(r));
                            any = true;
                        } else {
                            debug!(phi = %instr.name, incoming = %n, "still unknown at rescale");
                        }
                    }
                }
            }
            if !any {
                continue;
            }
            for target in [instr.name.clone(), format!("HEAD_{}", instr.name)] {
                if let Some(r) = arena.lookup_local(scope, &target) {
                    arena.enlarge(r, folded);
                }
            }
        }
    }

    /// One pass over the block's non-PHI expressions.
    pub fn sweep_expressions(
        &mut self,
        arena: &mut ScopeArena,
        scope: ScopeId,
        bb: &BasicBlock,
        bounds: IterBounds,
    ) {
        for instr in &bb.instrs {
            match &instr.kind {
                InstrKind::Binary { op, lhs, rhs } => {
                    self.analyze_binary(arena, scope, &instr.name, *op, lhs, rhs, bounds)
                }
                InstrKind::Unary { op, arg } => {
                    self.analyze_unary(arena, scope, &instr.name, *op, arg)
                }
                InstrKind::Cmp { .. } => {
                    if !instr.name.is_empty() {
                        arena.add_operand(
                            scope,
                            Operand::concrete(
                                instr.name.clone(),
                                OperandKind::Constant,
                                Range::new(0.0, 1.0),
                            ),
                        );
                    }
                }
                InstrKind::Phi { .. } => {} // handled by the phi sweeps
                InstrKind::Call { callee, .. } => {
                    debug!(callee = %callee, "unsupported opcode, skipped");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Families
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn analyze_binary(
        &mut self,
        arena: &mut ScopeArena,
        scope: ScopeId,
        name: &str,
        op: BinOp,
        lhs: &Value,
        rhs: &Value,
        bounds: IterBounds,
    ) {
        if name.is_empty() {
            return;
        }
        let IterBounds { min_iter, max_iter } = bounds;
        let combine: Combine = match op {
            BinOp::Add => Box::new(move |rs| range::add(rs[0], rs[1], min_iter, max_iter)),
            BinOp::Sub => Box::new(move |rs| range::sub(rs[0], rs[1], min_iter, max_iter)),
            BinOp::Mul if max_iter == 1 => Box::new(|rs| range::mul(rs[0], rs[1])),
            BinOp::Mul => Box::new(move |rs| range::mul_on_loop(rs[0], rs[1], min_iter, max_iter)),
            BinOp::SDiv | BinOp::UDiv => Box::new(|rs| match range::checked_div(rs[0], rs[1]) {
                Ok(r) => r,
                Err(e) => {
                    warn!("{e}; result is unknown");
                    Range::TOP
                }
            }),
            BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Shl => {
                debug!(?op, value = %name, "unsupported binary opcode, skipped");
                return;
            }
        };
        let Some(d1) = self.operand_for_value(arena, scope, lhs) else { return };
        let Some(d2) = self.operand_for_value(arena, scope, rhs) else { return };
        arena.add_operand(
            scope,
            Operand::pending(name.to_string(), OperandKind::Local, vec![d1, d2], combine),
        );
    }

    fn analyze_unary(
        &mut self,
        arena: &mut ScopeArena,
        scope: ScopeId,
        name: &str,
        op: UnOp,
        arg: &Value,
    ) {
        if name.is_empty() {
            return;
        }
        match op {
            UnOp::Neg | UnOp::FNeg => {
                let Some(dep) = self.operand_for_value(arena, scope, arg) else { return };
                let combine: Combine = Box::new(|rs: &[Range]| {
                    if rs[0].is_bottom() {
                        Range::BOTTOM
                    } else {
                        Range::new(-rs[0].max, -rs[0].min)
                    }
                });
                arena.add_operand(
                    scope,
                    Operand::pending(name.to_string(), OperandKind::Local, vec![dep], combine),
                );
            }
            UnOp::Not => {
                // Bit flips have no useful interval image here.
                arena.add_operand(
                    scope,
                    Operand::concrete(name.to_string(), OperandKind::Local, Range::TOP),
                );
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CmpPred, FunctionBuilder};

    fn block_with(build: impl FnOnce(&mut FunctionBuilder, crate::ir::BbId)) -> BasicBlock {
        let mut fb = FunctionBuilder::new("f", &[]);
        let entry = fb.block("entry");
        build(&mut fb, entry);
        fb.ret(entry, None);
        let f = fb.finish().unwrap();
        f.block(f.entry_block()).clone()
    }

    fn resolved(arena: &mut ScopeArena, scope: ScopeId, name: &str) -> Range {
        let r = arena.lookup(scope, name).expect("operand exists");
        assert!(arena.try_resolve(r), "operand resolves");
        arena.operand(r).range.unwrap()
    }

    #[test]
    fn binary_constant_folding_through_resolution() {
        let bb = block_with(|fb, e| {
            fb.binary(e, "r", BinOp::Add, Value::int(3), Value::int(5));
            fb.binary(e, "d", BinOp::SDiv, Value::var("r"), Value::int(2));
        });
        let mut arena = ScopeArena::new();
        let scope = arena.new_scope(None);
        let mut ia = InstructionAnalyzer::new();
        ia.sweep_expressions(&mut arena, scope, &bb, IterBounds::ONCE);

        assert_eq!(resolved(&mut arena, scope, "r"), Range::point(8.0));
        assert_eq!(resolved(&mut arena, scope, "d"), Range::point(4.0));
        // constants got synthesized names and fixed point ranges
        let c0 = arena.lookup(scope, "const0").unwrap();
        assert_eq!(arena.operand(c0).range, Some(Range::fixed_point(3.0)));
        assert_eq!(arena.operand(c0).kind, OperandKind::Constant);
    }

    #[test]
    fn division_by_zero_possible_degrades_to_top() {
        let bb = block_with(|fb, e| {
            fb.binary(e, "q", BinOp::SDiv, Value::int(10), Value::int(0));
        });
        let mut arena = ScopeArena::new();
        let scope = arena.new_scope(None);
        InstructionAnalyzer::new().sweep_expressions(&mut arena, scope, &bb, IterBounds::ONCE);

        assert!(resolved(&mut arena, scope, "q").is_top());
    }

    #[test]
    fn unknown_operand_skips_instruction_and_dependents_fail() {
        let bb = block_with(|fb, e| {
            fb.binary(e, "a", BinOp::Add, Value::var("ghost"), Value::int(1));
            fb.binary(e, "b", BinOp::Add, Value::var("a"), Value::int(1));
        });
        let mut arena = ScopeArena::new();
        let scope = arena.new_scope(None);
        InstructionAnalyzer::new().sweep_expressions(&mut arena, scope, &bb, IterBounds::ONCE);

        // `a` was never created, `b` therefore was not either
        assert!(arena.lookup(scope, "a").is_none());
        assert!(arena.lookup(scope, "b").is_none());
    }

    #[test]
    fn unsupported_opcodes_are_skipped() {
        let bb = block_with(|fb, e| {
            fb.binary(e, "x", BinOp::Xor, Value::int(1), Value::int(2));
            fb.call(e, "c", "sqrt", vec![Value::int(4)]);
        });
        let mut arena = ScopeArena::new();
        let scope = arena.new_scope(None);
        InstructionAnalyzer::new().sweep_expressions(&mut arena, scope, &bb, IterBounds::ONCE);

        assert!(arena.lookup(scope, "x").is_none());
        assert!(arena.lookup(scope, "c").is_none());
    }

    #[test]
    fn compare_yields_zero_one_and_not_yields_top() {
        let bb = block_with(|fb, e| {
            fb.cmp(e, "c", CmpPred::Slt, Value::int(1), Value::int(2));
            fb.unary(e, "n", UnOp::Not, Value::var("c"));
            fb.unary(e, "m", UnOp::Neg, Value::var("c"));
        });
        let mut arena = ScopeArena::new();
        let scope = arena.new_scope(None);
        InstructionAnalyzer::new().sweep_expressions(&mut arena, scope, &bb, IterBounds::ONCE);

        assert_eq!(resolved(&mut arena, scope, "c"), Range::new(0.0, 1.0));
        assert!(resolved(&mut arena, scope, "n").is_top());
        assert_eq!(resolved(&mut arena, scope, "m"), Range::new(-1.0, 0.0));
    }

    #[test]
    fn loop_bounds_are_captured_at_analysis_time() {
        let bb = block_with(|fb, e| {
            fb.binary(e, "acc", BinOp::Add, Value::int(0), Value::int(2));
            fb.binary(e, "g", BinOp::Mul, Value::int(1), Value::int(2));
        });
        let mut arena = ScopeArena::new();
        let scope = arena.new_scope(None);
        let mut ia = InstructionAnalyzer::new();
        ia.sweep_expressions(&mut arena, scope, &bb, IterBounds { min_iter: 3, max_iter: 5 });

        // 0 + [3,5]·2 accumulated
        assert_eq!(resolved(&mut arena, scope, "acc"), Range::new(6.0, 10.0));
        // geometric growth sampled up to 2^5
        assert_eq!(resolved(&mut arena, scope, "g"), Range::new(8.0, 32.0));
    }

    #[test]
    fn non_header_phi_merges_incoming_ranges() {
        let mut fb = FunctionBuilder::new("f", &[]);
        let t = fb.block("t");
        let e = fb.block("e");
        let join = fb.block("join");
        fb.br(t, join);
        fb.br(e, join);
        fb.phi(join, "y", vec![(Value::var("x"), t), (Value::int(50), e)]);
        fb.ret(join, None);
        let f = fb.finish().unwrap();

        let mut arena = ScopeArena::new();
        let parent = arena.new_scope(None);
        arena.add_operand(parent, Operand::concrete("x", OperandKind::Local, Range::new(3.0, 30.0)));
        let scope = arena.new_scope(Some(parent));

        InstructionAnalyzer::new().sweep_phis(&mut arena, scope, f.block(join));
        assert_eq!(resolved(&mut arena, scope, "y"), Range::new(3.0, 50.0));
    }
}
