//! Natural-loop oracle
//!
//! Loops are discovered from back edges (an edge whose target dominates its
//! source); bodies are collected by walking predecessors from the latches
//! back to the header. The surface mirrors what the block classifier and
//! the walker consume: loop-for-block, header, latches, exit blocks, and
//! the nesting relation, with unique-latch / unique-exit fast paths.

use std::collections::BTreeSet;

use crate::dom::DomTree;
use crate::ir::{BbId, Function};

/// Index of a loop within one function's [`LoopInfo`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoopId(pub usize);

impl LoopId {
    /// Access the underlying index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// One natural loop.
#[derive(Clone, Debug)]
pub struct Loop {
    /// The single entry block every iteration passes through.
    pub header: BbId,
    /// In-loop blocks with an edge back to the header.
    pub latches: Vec<BbId>,
    /// All member blocks, header included, ascending by index.
    pub blocks: Vec<BbId>,
    /// Blocks outside the loop reached by an edge from inside it.
    pub exit_blocks: Vec<BbId>,
    /// The innermost strictly-containing loop, if any.
    pub parent: Option<LoopId>,
    /// Nesting depth; top-level loops have depth 1.
    pub depth: usize,
}

/// Loop structure of one function.
#[derive(Clone, Debug)]
pub struct LoopInfo {
    loops: Vec<Loop>,
    /// Innermost containing loop per block.
    innermost: Vec<Option<LoopId>>,
}

impl LoopInfo {
    /// Discover the natural loops of `f`.
    pub fn compute(f: &Function, dt: &DomTree) -> Self {
        let n = f.num_blocks();
        let preds = f.predecessors();

        // Back edges, grouped by header.
        let mut latches_of: Vec<(BbId, Vec<BbId>)> = Vec::new();
        for (bb, _) in f.blocks() {
            if !dt.is_reachable(bb) {
                continue;
            }
            for s in f.successors(bb) {
                if dt.dominates(s, bb) {
                    match latches_of.iter_mut().find(|(h, _)| *h == s) {
                        Some((_, ls)) => ls.push(bb),
                        None => latches_of.push((s, vec![bb])),
                    }
                }
            }
        }

        // Body: header plus everything that reaches a latch without
        // passing through the header.
        let mut loops = Vec::with_capacity(latches_of.len());
        for (header, latches) in latches_of {
            let mut body: BTreeSet<BbId> = BTreeSet::new();
            body.insert(header);
            let mut stack: Vec<BbId> = latches.clone();
            while let Some(bb) = stack.pop() {
                if body.insert(bb) {
                    for &p in preds.of(bb) {
                        stack.push(p);
                    }
                }
            }
            let mut exit_blocks = Vec::new();
            for &bb in &body {
                for s in f.successors(bb) {
                    if !body.contains(&s) && !exit_blocks.contains(&s) {
                        exit_blocks.push(s);
                    }
                }
            }
            loops.push(Loop {
                header,
                latches,
                blocks: body.into_iter().collect(),
                exit_blocks,
                parent: None,
                depth: 1,
            });
        }

        // Nesting: the parent is the smallest strictly-containing loop.
        let contains =
            |outer: &Loop, inner: &Loop| inner.blocks.iter().all(|b| outer.blocks.contains(b));
        for i in 0..loops.len() {
            let mut parent: Option<usize> = None;
            for j in 0..loops.len() {
                if i == j || loops[i].blocks.len() >= loops[j].blocks.len() {
                    continue;
                }
                if contains(&loops[j], &loops[i]) {
                    parent = match parent {
                        Some(p) if loops[p].blocks.len() <= loops[j].blocks.len() => Some(p),
                        _ => Some(j),
                    };
                }
            }
            loops[i].parent = parent.map(LoopId);
        }
        for i in 0..loops.len() {
            let mut depth = 1;
            let mut cur = loops[i].parent;
            while let Some(p) = cur {
                depth += 1;
                cur = loops[p.as_usize()].parent;
            }
            loops[i].depth = depth;
        }

        // Innermost loop per block: the smallest containing body.
        let mut innermost: Vec<Option<LoopId>> = vec![None; n];
        for (i, l) in loops.iter().enumerate() {
            for &bb in &l.blocks {
                innermost[bb.as_usize()] = match innermost[bb.as_usize()] {
                    Some(prev) if loops[prev.as_usize()].blocks.len() <= l.blocks.len() => {
                        Some(prev)
                    }
                    _ => Some(LoopId(i)),
                };
            }
        }

        LoopInfo { loops, innermost }
    }

    /// The innermost loop containing `bb`, if any.
    #[inline]
    pub fn loop_for(&self, bb: BbId) -> Option<LoopId> {
        self.innermost[bb.as_usize()]
    }

    /// Borrow a loop by id.
    #[inline]
    pub fn get(&self, l: LoopId) -> &Loop {
        &self.loops[l.as_usize()]
    }

    /// Iterate all loops.
    pub fn loops(&self) -> impl Iterator<Item = (LoopId, &Loop)> {
        self.loops.iter().enumerate().map(|(i, l)| (LoopId(i), l))
    }

    /// True iff `bb` belongs to `l` directly or through a nested loop.
    pub fn loop_contains(&self, l: LoopId, bb: BbId) -> bool {
        let mut cur = self.loop_for(bb);
        while let Some(c) = cur {
            if c == l {
                return true;
            }
            cur = self.loops[c.as_usize()].parent;
        }
        false
    }

    /// True iff `bb` is a latch of `l` (unique-latch fast path first).
    pub fn is_latch(&self, l: LoopId, bb: BbId) -> bool {
        if let Some(u) = self.unique_latch(l) {
            return u == bb;
        }
        self.loops[l.as_usize()].latches.contains(&bb)
    }

    /// The single latch of `l`, if it has exactly one.
    pub fn unique_latch(&self, l: LoopId) -> Option<BbId> {
        match self.loops[l.as_usize()].latches.as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// The single exit block of `l`, if it has exactly one.
    pub fn unique_exit_block(&self, l: LoopId) -> Option<BbId> {
        match self.loops[l.as_usize()].exit_blocks.as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// The innermost loop for which `bb` is an exit block, if any.
    pub fn exited_loop_of(&self, bb: BbId) -> Option<LoopId> {
        let mut best: Option<LoopId> = None;
        for (i, l) in self.loops.iter().enumerate() {
            if !l.exit_blocks.contains(&bb) {
                continue;
            }
            best = match best {
                Some(prev) if self.loops[prev.as_usize()].blocks.len() <= l.blocks.len() => {
                    Some(prev)
                }
                _ => Some(LoopId(i)),
            };
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Value};

    /// entry -> header -> body -> latch -> header; header -> exit
    fn counted_loop() -> (Function, [BbId; 5]) {
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
        (fb.finish().unwrap(), [entry, header, body, latch, exit])
    }

    #[test]
    fn single_loop_shape() {
        let (f, [entry, header, body, latch, exit]) = counted_loop();
        let dt = DomTree::compute(&f);
        let li = LoopInfo::compute(&f, &dt);

        let l = li.loop_for(header).expect("header is in a loop");
        assert_eq!(li.get(l).header, header);
        assert_eq!(li.unique_latch(l), Some(latch));
        assert!(li.is_latch(l, latch));
        assert!(!li.is_latch(l, body));
        assert_eq!(li.unique_exit_block(l), Some(exit));
        assert_eq!(li.exited_loop_of(exit), Some(l));
        assert_eq!(li.loop_for(entry), None);
        assert_eq!(li.loop_for(exit), None);
        assert!(li.loop_contains(l, body));
        assert!(!li.loop_contains(l, exit));
    }

    #[test]
    fn nested_loops_report_parent_and_depth() {
        // outer: oh -> ih ... -> olatch -> oh; inner: ih -> ibody -> ih
        let mut fb = FunctionBuilder::new("f", &[]);
        let entry = fb.block("entry");
        let oh = fb.block("outer_header");
        let ih = fb.block("inner_header");
        let ibody = fb.block("inner_body");
        let olatch = fb.block("outer_latch");
        let exit = fb.block("exit");
        fb.br(entry, oh);
        fb.cond_br(oh, Value::var("oc"), ih, exit);
        fb.cond_br(ih, Value::var("ic"), ibody, olatch);
        fb.br(ibody, ih);
        fb.br(olatch, oh);
        fb.ret(exit, None);
        let f = fb.finish().unwrap();
        let dt = DomTree::compute(&f);
        let li = LoopInfo::compute(&f, &dt);

        let outer = li.loop_for(oh).unwrap();
        let inner = li.loop_for(ibody).unwrap();
        assert_ne!(outer, inner);
        assert_eq!(li.get(inner).parent, Some(outer));
        assert_eq!(li.get(outer).parent, None);
        assert_eq!(li.get(inner).depth, 2);
        assert_eq!(li.get(outer).depth, 1);
        // the inner header belongs to the inner loop first
        assert_eq!(li.loop_for(ih), Some(inner));
        assert!(li.loop_contains(outer, ibody));
        // the inner loop's exit (outer_latch) is still inside the outer loop
        assert_eq!(li.exited_loop_of(olatch), Some(inner));
        assert!(li.loop_contains(outer, olatch));
    }

    #[test]
    fn loop_with_break_has_two_exit_blocks() {
        // header -> body; body -> break_exit | latch; latch -> header;
        // header -> exit
        let mut fb = FunctionBuilder::new("f", &[]);
        let entry = fb.block("entry");
        let header = fb.block("header");
        let body = fb.block("body");
        let latch = fb.block("latch");
        let exit = fb.block("exit");
        fb.br(entry, header);
        fb.cond_br(header, Value::var("c"), body, exit);
        fb.cond_br(body, Value::var("b"), exit, latch);
        fb.br(latch, header);
        fb.ret(exit, None);
        let f = fb.finish().unwrap();
        let dt = DomTree::compute(&f);
        let li = LoopInfo::compute(&f, &dt);

        let l = li.loop_for(header).unwrap();
        assert_eq!(li.get(l).exit_blocks, vec![exit]);
        assert_eq!(li.unique_exit_block(l), Some(exit));
    }
}
