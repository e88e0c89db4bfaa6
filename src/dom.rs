//! Dominator tree
//!
//! Iterative immediate-dominator computation over a reverse postorder, in
//! the Cooper–Harvey–Kennedy style. The walker only needs two queries:
//! `dominates` and the idom chain walk used to find the nearest dominating
//! analysed block.

use crate::ir::{BbId, Function};

/// Dominator tree of one function.
#[derive(Clone, Debug)]
pub struct DomTree {
    /// Immediate dominator per block; the entry maps to itself, blocks
    /// unreachable from the entry map to `None`.
    idom: Vec<Option<BbId>>,
    entry: BbId,
}

impl DomTree {
    /// Compute the dominator tree of `f`.
    pub fn compute(f: &Function) -> Self {
        let n = f.num_blocks();
        let entry = f.entry_block();

        // Reverse postorder over the successor relation.
        let mut visited = vec![false; n];
        let mut postorder = Vec::with_capacity(n);
        let mut stack = vec![(entry, 0usize)];
        visited[entry.as_usize()] = true;
        while let Some((bb, next)) = stack.last().copied() {
            let succs = f.successors(bb);
            if next < succs.len() {
                stack.last_mut().expect("stack non-empty").1 += 1;
                let s = succs[next];
                if !visited[s.as_usize()] {
                    visited[s.as_usize()] = true;
                    stack.push((s, 0));
                }
            } else {
                postorder.push(bb);
                stack.pop();
            }
        }
        let mut po_index = vec![usize::MAX; n];
        for (i, &bb) in postorder.iter().enumerate() {
            po_index[bb.as_usize()] = i;
        }

        let preds = f.predecessors();
        let mut idom: Vec<Option<BbId>> = vec![None; n];
        idom[entry.as_usize()] = Some(entry);

        let intersect = |idom: &[Option<BbId>], mut a: BbId, mut b: BbId| -> BbId {
            while a != b {
                while po_index[a.as_usize()] < po_index[b.as_usize()] {
                    a = idom[a.as_usize()].expect("processed block has an idom");
                }
                while po_index[b.as_usize()] < po_index[a.as_usize()] {
                    b = idom[b.as_usize()].expect("processed block has an idom");
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &bb in postorder.iter().rev() {
                if bb == entry {
                    continue;
                }
                let mut new_idom: Option<BbId> = None;
                for &p in preds.of(bb) {
                    if idom[p.as_usize()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, p, cur),
                    });
                }
                if new_idom.is_some() && idom[bb.as_usize()] != new_idom {
                    idom[bb.as_usize()] = new_idom;
                    changed = true;
                }
            }
        }

        DomTree { idom, entry }
    }

    /// Immediate dominator of `bb`; `None` for the entry block and for
    /// blocks unreachable from the entry.
    pub fn idom(&self, bb: BbId) -> Option<BbId> {
        if bb == self.entry {
            return None;
        }
        self.idom[bb.as_usize()]
    }

    /// True iff `bb` is reachable from the entry block.
    #[inline]
    pub fn is_reachable(&self, bb: BbId) -> bool {
        self.idom[bb.as_usize()].is_some()
    }

    /// True iff `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: BbId, b: BbId) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(d) => cur = d,
                None => return false,
            }
        }
    }
}
