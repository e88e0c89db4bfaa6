//! Scalar-evolution oracle
//!
//! A deliberately small recurrence analysis that answers the three
//! questions the walker asks about a loop:
//!
//! 1. the exact small constant **trip count** (number of body executions),
//! 2. the **backedge-taken count** as a symbolic value with a constant
//!    variant ([`Scev`]),
//! 3. whether a header PHI is an **affine recurrence** `start + step·i`
//!    with constant start and step ([`AddRec`]), which the instruction
//!    analyzer uses to seed induction ranges.
//!
//! Recognition is pattern-based: a header PHI with one entering and one
//! back-edge incoming, whose back-edge value is `phi ± constant`, compared
//! against a constant bound by the header's exit condition. Anything else
//! is reported as not computable; the walker falls back to its
//! conservative iteration cap.

use std::collections::HashMap;

use tracing::debug;

use crate::ir::{BbId, BinOp, CmpPred, Function, InstrKind, Terminator, Value};
use crate::loops::{LoopId, LoopInfo};

/// A backedge-taken count: either a known constant or not computable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Scev {
    /// The back edge is taken exactly this many times.
    Constant(u64),
    /// The count could not be derived from the IR.
    CouldNotCompute,
}

/// An affine recurrence `start + step·i` over the loop iteration index.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AddRec {
    /// Value on loop entry.
    pub start: f64,
    /// Increment per iteration.
    pub step: f64,
}

/// Scalar-evolution results for one function.
#[derive(Clone, Debug, Default)]
pub struct ScalarEvolution {
    trip: HashMap<LoopId, u64>,
    addrecs: HashMap<(LoopId, String), AddRec>,
}

impl ScalarEvolution {
    /// Analyze every loop of `f`.
    pub fn analyze(f: &Function, li: &LoopInfo) -> Self {
        let mut se = ScalarEvolution::default();
        for (lid, l) in li.loops() {
            se.analyze_loop(f, li, lid, l.header);
        }
        se
    }

    /// The exact constant trip count of `l`, if recognized.
    #[inline]
    pub fn small_constant_trip_count(&self, l: LoopId) -> Option<u64> {
        self.trip.get(&l).copied()
    }

    /// The backedge-taken count of `l`.
    pub fn backedge_taken_count(&self, l: LoopId) -> Scev {
        match self.trip.get(&l) {
            Some(&t) => Scev::Constant(t.saturating_sub(1)),
            None => Scev::CouldNotCompute,
        }
    }

    /// The affine recurrence behind the header PHI `name` of loop `l`.
    pub fn phi_addrec(&self, l: LoopId, name: &str) -> Option<&AddRec> {
        self.addrecs.get(&(l, name.to_string()))
    }

    fn analyze_loop(&mut self, f: &Function, li: &LoopInfo, lid: LoopId, header: BbId) {
        // Collect affine recurrences for every header PHI first; the trip
        // count needs them to interpret the exit comparison.
        for instr in &f.block(header).instrs {
            let InstrKind::Phi { incoming } = &instr.kind else { continue };
            if instr.name.is_empty() || incoming.len() != 2 {
                continue;
            }
            let entering = incoming.iter().find(|(_, bb)| !li.loop_contains(lid, *bb));
            let backedge = incoming.iter().find(|(_, bb)| li.loop_contains(lid, *bb));
            let (Some((enter_v, _)), Some((back_v, _))) = (entering, backedge) else {
                continue;
            };
            let Some(start) = enter_v.as_const().map(|c| c.value()) else { continue };
            let Some(step) = step_of(f, li, lid, &instr.name, back_v) else { continue };
            self.addrecs.insert((lid, instr.name.clone()), AddRec { start, step });
        }

        match self.trip_count(f, li, lid, header) {
            Some(t) => {
                self.trip.insert(lid, t);
            }
            None => {
                debug!(loop_header = %f.block(header).name, "trip count not recognized");
            }
        }
    }

    fn trip_count(&self, f: &Function, li: &LoopInfo, lid: LoopId, header: BbId) -> Option<u64> {
        let Terminator::CondBr { cond, then_dest, else_dest } = f.terminator(header) else {
            return None;
        };
        let cond_name = cond.name()?;
        let cmp = f
            .block(header)
            .instrs
            .iter()
            .find(|i| i.name == cond_name)?;
        let InstrKind::Cmp { pred, lhs, rhs } = &cmp.kind else { return None };

        // Which successor keeps iterating?
        let then_in = li.loop_contains(lid, *then_dest);
        let else_in = li.loop_contains(lid, *else_dest);
        let continue_on_true = match (then_in, else_in) {
            (true, false) => true,
            (false, true) => false,
            _ => return None,
        };

        // Normalize to `phi <pred> bound`.
        let (mut pred, phi_name, bound) = match (lhs.name(), rhs.as_const()) {
            (Some(n), Some(c)) => (*pred, n, c.value()),
            _ => match (lhs.as_const(), rhs.name()) {
                (Some(c), Some(n)) => (mirror(*pred), n, c.value()),
                _ => return None,
            },
        };
        if !continue_on_true {
            pred = negate(pred);
        }
        let rec = self.addrecs.get(&(lid, phi_name.to_string()))?;
        trips(pred, rec.start, rec.step, bound)
    }
}

/// The per-iteration step when the back-edge value is `phi ± constant`.
fn step_of(f: &Function, li: &LoopInfo, lid: LoopId, phi: &str, back_v: &Value) -> Option<f64> {
    let name = back_v.name()?;
    for &bb in &li.get(lid).blocks {
        for instr in &f.block(bb).instrs {
            if instr.name != name {
                continue;
            }
            let InstrKind::Binary { op, lhs, rhs } = &instr.kind else { return None };
            return match op {
                BinOp::Add => match (lhs.name(), rhs.as_const(), lhs.as_const(), rhs.name()) {
                    (Some(n), Some(c), _, _) if n == phi => Some(c.value()),
                    (_, _, Some(c), Some(n)) if n == phi => Some(c.value()),
                    _ => None,
                },
                BinOp::Sub => match (lhs.name(), rhs.as_const()) {
                    (Some(n), Some(c)) if n == phi => Some(-c.value()),
                    _ => None,
                },
                _ => None,
            };
        }
    }
    None
}

fn mirror(p: CmpPred) -> CmpPred {
    match p {
        CmpPred::Slt => CmpPred::Sgt,
        CmpPred::Sle => CmpPred::Sge,
        CmpPred::Sgt => CmpPred::Slt,
        CmpPred::Sge => CmpPred::Sle,
        CmpPred::Ult => CmpPred::Ugt,
        CmpPred::Ule => CmpPred::Uge,
        CmpPred::Ugt => CmpPred::Ult,
        CmpPred::Uge => CmpPred::Ule,
        CmpPred::Eq | CmpPred::Ne => p,
    }
}

fn negate(p: CmpPred) -> CmpPred {
    match p {
        CmpPred::Slt => CmpPred::Sge,
        CmpPred::Sle => CmpPred::Sgt,
        CmpPred::Sgt => CmpPred::Sle,
        CmpPred::Sge => CmpPred::Slt,
        CmpPred::Ult => CmpPred::Uge,
        CmpPred::Ule => CmpPred::Ugt,
        CmpPred::Ugt => CmpPred::Ule,
        CmpPred::Uge => CmpPred::Ult,
        CmpPred::Eq => CmpPred::Ne,
        CmpPred::Ne => CmpPred::Eq,
    }
}

/// Body executions of `for (i = start; i <pred> bound; i += step)`.
fn trips(pred: CmpPred, start: f64, step: f64, bound: f64) -> Option<u64> {
    if step == 0.0 || !step.is_finite() || !start.is_finite() || !bound.is_finite() {
        return None;
    }
    let count = match pred {
        CmpPred::Slt | CmpPred::Ult => {
            if step <= 0.0 {
                return None;
            }
            ((bound - start) / step).ceil()
        }
        CmpPred::Sle | CmpPred::Ule => {
            if step <= 0.0 {
                return None;
            }
            ((bound - start) / step).floor() + 1.0
        }
        CmpPred::Sgt | CmpPred::Ugt => {
            if step >= 0.0 {
                return None;
            }
            ((start - bound) / -step).ceil()
        }
        CmpPred::Sge | CmpPred::Uge => {
            if step >= 0.0 {
                return None;
            }
            ((start - bound) / -step).floor() + 1.0
        }
        CmpPred::Ne => {
            let n = (bound - start) / step;
            if n.fract() != 0.0 || n < 0.0 {
                return None;
            }
            n
        }
        CmpPred::Eq => return None,
    };
    if !count.is_finite() || count > u64::MAX as f64 {
        return None;
    }
    Some(count.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::DomTree;
    use crate::ir::FunctionBuilder;

    /// `for (i = 0; i < 10; i += 1) { ... }` as a header-exiting loop.
    fn counted(bound: i64) -> (Function, LoopInfo, LoopId) {
        let mut fb = FunctionBuilder::new("f", &[]);
        let entry = fb.block("entry");
        let header = fb.block("header");
        let body = fb.block("body");
        let latch = fb.block("latch");
        let exit = fb.block("exit");
        fb.br(entry, header);
        fb.phi(header, "i", vec![(Value::int(0), entry), (Value::var("i.next"), latch)]);
        fb.cmp(header, "c", CmpPred::Slt, Value::var("i"), Value::int(bound));
        fb.cond_br(header, Value::var("c"), body, exit);
        fb.br(body, latch);
        fb.binary(latch, "i.next", BinOp::Add, Value::var("i"), Value::int(1));
        fb.br(latch, header);
        fb.ret(exit, None);
        let f = fb.finish().unwrap();
        let dt = DomTree::compute(&f);
        let li = LoopInfo::compute(&f, &dt);
        let lid = li.loop_for(header).unwrap();
        (f, li, lid)
    }

    #[test]
    fn counted_loop_trip_and_backedge() {
        let (f, li, lid) = counted(10);
        let se = ScalarEvolution::analyze(&f, &li);
        assert_eq!(se.small_constant_trip_count(lid), Some(10));
        assert_eq!(se.backedge_taken_count(lid), Scev::Constant(9));
    }

    #[test]
    fn counted_loop_addrec() {
        let (f, li, lid) = counted(10);
        let se = ScalarEvolution::analyze(&f, &li);
        let rec = se.phi_addrec(lid, "i").expect("i is affine");
        assert_eq!((rec.start, rec.step), (0.0, 1.0));
        assert!(se.phi_addrec(lid, "missing").is_none());
    }

    #[test]
    fn zero_trip_loop() {
        let (f, li, lid) = counted(0);
        let se = ScalarEvolution::analyze(&f, &li);
        assert_eq!(se.small_constant_trip_count(lid), Some(0));
        assert_eq!(se.backedge_taken_count(lid), Scev::Constant(0));
    }

    #[test]
    fn data_dependent_condition_is_not_computable() {
        // while (x != 0) { x = x * 2 } — no affine recurrence, no constant
        // bound recognition.
        let mut fb = FunctionBuilder::new("f", &["x0"]);
        let entry = fb.block("entry");
        let header = fb.block("header");
        let latch = fb.block("latch");
        let exit = fb.block("exit");
        fb.br(entry, header);
        fb.phi(header, "x", vec![(Value::var("x0"), entry), (Value::var("x.next"), latch)]);
        fb.cmp(header, "c", CmpPred::Ne, Value::var("x"), Value::int(0));
        fb.cond_br(header, Value::var("c"), latch, exit);
        fb.binary(latch, "x.next", BinOp::Mul, Value::var("x"), Value::int(2));
        fb.br(latch, header);
        fb.ret(exit, None);
        let f = fb.finish().unwrap();
        let dt = DomTree::compute(&f);
        let li = LoopInfo::compute(&f, &dt);
        let lid = li.loop_for(header).unwrap();

        let se = ScalarEvolution::analyze(&f, &li);
        assert_eq!(se.small_constant_trip_count(lid), None);
        assert_eq!(se.backedge_taken_count(lid), Scev::CouldNotCompute);
        assert!(se.phi_addrec(lid, "x").is_none());
    }

    #[test]
    fn countdown_loop() {
        // for (i = 8; i > 0; i -= 2)
        let mut fb = FunctionBuilder::new("f", &[]);
        let entry = fb.block("entry");
        let header = fb.block("header");
        let latch = fb.block("latch");
        let exit = fb.block("exit");
        fb.br(entry, header);
        fb.phi(header, "i", vec![(Value::int(8), entry), (Value::var("i.next"), latch)]);
        fb.cmp(header, "c", CmpPred::Sgt, Value::var("i"), Value::int(0));
        fb.cond_br(header, Value::var("c"), latch, exit);
        fb.binary(latch, "i.next", BinOp::Sub, Value::var("i"), Value::int(2));
        fb.br(latch, header);
        fb.ret(exit, None);
        let f = fb.finish().unwrap();
        let dt = DomTree::compute(&f);
        let li = LoopInfo::compute(&f, &dt);
        let lid = li.loop_for(header).unwrap();

        let se = ScalarEvolution::analyze(&f, &li);
        assert_eq!(se.small_constant_trip_count(lid), Some(4));
        let rec = se.phi_addrec(lid, "i").unwrap();
        assert_eq!((rec.start, rec.step), (8.0, -2.0));
    }
}
