//! Scopes & the lazy symbolic-range operand DAG
//!
//! ## Overview
//! Ranges are not computed eagerly while walking the CFG; instead every SSA
//! definition becomes an [`Operand`] node holding its dependencies and a
//! `combine` closure, and the actual interval is produced on demand by
//! [`ScopeArena::try_resolve`] / [`ScopeArena::force_resolve`]. Operands
//! live in [`Scope`s](ScopeId) arranged in a parent chain: the global scope
//! (module constants) sits at the root, function scopes below it, and block
//! scopes chain through the dominator tree. `lookup` walks the chain; SSA
//! names are unique within a function, so it finds at most one definition.
//!
//! Key properties
//! - **Acyclic by SSA:** a value depends only on prior definitions; the
//!   loop back-edge never becomes an edge of this DAG (header PHIs snapshot
//!   their entering value instead), so resolution terminates.
//! - **Invalidation under widening:** each resolved operand remembers the
//!   dependency snapshot that produced its range (`resolved_with`); if a
//!   dependency was widened since, the next resolution recomputes.
//! - **Ownership:** scopes own their operands; dependencies are non-owning
//!   `(scope, index)` references into the same arena, valid for the whole
//!   function analysis.
//!
//! The JSON codec at the bottom serializes a scope chain as
//! `{"vars":[{"name","min","max","fixed"},…],"parent":…|null}`; infinite
//! endpoints are spelled `"inf"` / `"-inf"` because JSON numbers cannot
//! carry them.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::range::Range;
use crate::Bound;

/// Index of a scope within a [`ScopeArena`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub usize);

impl ScopeId {
    /// Access the underlying index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Non-owning reference to an operand: owning scope plus position.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OperandRef {
    /// The scope that owns the operand.
    pub scope: ScopeId,
    /// Position within that scope's operand list.
    pub index: usize,
}

/// What an operand stands for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperandKind {
    /// A locally defined SSA value.
    Local,
    /// A function argument.
    Argument,
    /// A synthesized constant (`const<N>`) or module constant.
    Constant,
    /// A snapshot of an argument copied into another scope.
    ArgumentRef,
    /// The function's return value.
    Return,
}

/// Combining function: dependency ranges in, this node's range out.
pub type Combine = Box<dyn Fn(&[Range]) -> Range>;

/// A named node in the symbolic-range DAG.
pub struct Operand {
    /// SSA name; unique within the defining scope.
    pub name: String,
    /// What the operand stands for.
    pub kind: OperandKind,
    /// Current interval; `None` until resolved.
    pub range: Option<Range>,
    /// Ordered dependencies, possibly in ancestor scopes.
    pub deps: Vec<OperandRef>,
    /// How to fold dependency ranges; `None` for concrete nodes.
    pub combine: Option<Combine>,
    /// Dependency snapshot that produced `range`, for invalidation.
    pub resolved_with: Option<Vec<Range>>,
}

impl Operand {
    /// A node whose range is known up front.
    pub fn concrete(name: impl Into<String>, kind: OperandKind, range: Range) -> Self {
        Operand {
            name: name.into(),
            kind,
            range: Some(range),
            deps: Vec::new(),
            combine: None,
            resolved_with: None,
        }
    }

    /// A node resolved on demand from its dependencies.
    pub fn pending(
        name: impl Into<String>,
        kind: OperandKind,
        deps: Vec<OperandRef>,
        combine: Combine,
    ) -> Self {
        Operand {
            name: name.into(),
            kind,
            range: None,
            deps,
            combine: Some(combine),
            resolved_with: None,
        }
    }

    /// True iff the node carries no combining closure.
    #[inline]
    pub fn is_concrete(&self) -> bool {
        self.combine.is_none()
    }
}

impl std::fmt::Debug for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operand")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("range", &self.range)
            .field("deps", &self.deps)
            .field("combine", &self.combine.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[derive(Debug, Default)]
struct ScopeData {
    parent: Option<ScopeId>,
    operands: Vec<Operand>,
}

/// Arena owning every scope (and therefore every operand) of an analysis.
#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<ScopeData>,
}

impl ScopeArena {
    /// An empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a scope chained under `parent`.
    pub fn new_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.scopes.push(ScopeData { parent, operands: Vec::new() });
        ScopeId(self.scopes.len() - 1)
    }

    /// Parent of `s`, if any.
    #[inline]
    pub fn parent(&self, s: ScopeId) -> Option<ScopeId> {
        self.scopes[s.0].parent
    }

    /// Append an operand; the caller guarantees name uniqueness.
    pub fn add_operand(&mut self, s: ScopeId, op: Operand) -> OperandRef {
        let list = &mut self.scopes[s.0].operands;
        list.push(op);
        OperandRef { scope: s, index: list.len() - 1 }
    }

    /// Add a concrete operand, or widen the same-named one if it exists in
    /// `s` itself (not in ancestors) and is not `fixed`.
    pub fn add_or_enlarge(
        &mut self,
        s: ScopeId,
        name: &str,
        kind: OperandKind,
        range: Range,
    ) -> OperandRef {
        match self.lookup_local(s, name) {
            Some(r) => {
                self.enlarge(r, range);
                r
            }
            None => self.add_operand(s, Operand::concrete(name, kind, range)),
        }
    }

    /// Borrow an operand.
    #[inline]
    pub fn operand(&self, r: OperandRef) -> &Operand {
        &self.scopes[r.scope.0].operands[r.index]
    }

    /// Mutably borrow an operand.
    #[inline]
    pub fn operand_mut(&mut self, r: OperandRef) -> &mut Operand {
        &mut self.scopes[r.scope.0].operands[r.index]
    }

    /// Iterate the operands owned by `s` (ancestors excluded).
    pub fn operands(&self, s: ScopeId) -> impl Iterator<Item = (OperandRef, &Operand)> {
        self.scopes[s.0]
            .operands
            .iter()
            .enumerate()
            .map(move |(i, op)| (OperandRef { scope: s, index: i }, op))
    }

    /// Find `name` in `s` only.
    pub fn lookup_local(&self, s: ScopeId, name: &str) -> Option<OperandRef> {
        self.scopes[s.0]
            .operands
            .iter()
            .position(|op| op.name == name)
            .map(|index| OperandRef { scope: s, index })
    }

    /// Find `name` in `s` or the nearest ancestor that defines it.
    pub fn lookup(&self, s: ScopeId, name: &str) -> Option<OperandRef> {
        let mut cur = Some(s);
        while let Some(sc) = cur {
            if let Some(r) = self.lookup_local(sc, name) {
                return Some(r);
            }
            cur = self.scopes[sc.0].parent;
        }
        None
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Resolve `r` if possible: recursively resolves dependencies, then
    /// folds them through the combine closure. Returns false (leaving the
    /// operand untouched) if any dependency cannot resolve. Recomputes when
    /// a dependency range changed since the last resolution.
    pub fn try_resolve(&mut self, r: OperandRef) -> bool {
        let (is_concrete, has_range, deps) = {
            let op = self.operand(r);
            (op.is_concrete(), op.range.is_some(), op.deps.clone())
        };
        if is_concrete {
            return has_range;
        }

        let mut dep_ranges = Vec::with_capacity(deps.len());
        for d in deps {
            if !self.try_resolve(d) {
                trace!(name = %self.operand(r).name, "dependency unresolved");
                return false;
            }
            dep_ranges.push(self.operand(d).range.expect("resolved dependency"));
        }

        let op = self.operand(r);
        if op.range.is_some() && op.resolved_with.as_deref() == Some(dep_ranges.as_slice()) {
            return true;
        }
        let out = (op.combine.as_ref().expect("pending operand"))(&dep_ranges);
        let op = self.operand_mut(r);
        op.range = Some(out);
        op.resolved_with = Some(dep_ranges);
        true
    }

    /// Resolve `r`, substituting ⊤ for dependencies that cannot resolve,
    /// and return the resulting range.
    pub fn force_resolve(&mut self, r: OperandRef) -> Range {
        let (is_concrete, range, deps) = {
            let op = self.operand(r);
            (op.is_concrete(), op.range, op.deps.clone())
        };
        if is_concrete {
            return match range {
                Some(rg) => rg,
                None => {
                    // A concrete node without a range should not exist;
                    // degrade to unknown.
                    self.operand_mut(r).range = Some(Range::TOP);
                    Range::TOP
                }
            };
        }

        let mut dep_ranges = Vec::with_capacity(deps.len());
        for d in deps {
            dep_ranges.push(if self.try_resolve(d) {
                self.operand(d).range.expect("resolved dependency")
            } else {
                Range::TOP
            });
        }

        let op = self.operand(r);
        if let Some(rg) = op.range {
            if op.resolved_with.as_deref() == Some(dep_ranges.as_slice()) {
                return rg;
            }
        }
        let out = (op.combine.as_ref().expect("pending operand"))(&dep_ranges);
        let op = self.operand_mut(r);
        op.range = Some(out);
        op.resolved_with = Some(dep_ranges);
        out
    }

    /// Force-resolve every operand owned by `s`, in definition order.
    pub fn resolve_all(&mut self, s: ScopeId) {
        for i in 0..self.scopes[s.0].operands.len() {
            self.force_resolve(OperandRef { scope: s, index: i });
        }
    }

    /// Widen `r` to cover `by`; `fixed` ranges refuse. Pending operands are
    /// resolved first so there is a range to widen.
    pub fn enlarge(&mut self, r: OperandRef, by: Range) {
        let mut cur = self.force_resolve(r);
        cur.enlarge(&by);
        self.operand_mut(r).range = Some(cur);
    }

    /// Merge the operands of `src` into `dst`: same-named operands are
    /// widened (unless `fixed`), new ones are copied as concrete snapshots.
    /// Pending operands of `src` are force-resolved before copying.
    pub fn merge_into(&mut self, dst: ScopeId, src: ScopeId) {
        let n = self.scopes[src.0].operands.len();
        for i in 0..n {
            self.force_resolve(OperandRef { scope: src, index: i });
        }
        for i in 0..n {
            let (name, kind, range) = {
                let op = &self.scopes[src.0].operands[i];
                (op.name.clone(), op.kind, op.range.unwrap_or(Range::TOP))
            };
            match self.lookup_local(dst, &name) {
                Some(r) => self.enlarge(r, range),
                None => {
                    let kind = match kind {
                        OperandKind::Argument => OperandKind::ArgumentRef,
                        k => k,
                    };
                    self.add_operand(dst, Operand::concrete(name, kind, range));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // JSON
    // ------------------------------------------------------------------

    /// Snapshot a scope chain as its JSON form. Unresolved operands are
    /// reported as ⊤; call [`ScopeArena::resolve_all`] first for exact
    /// results.
    pub fn to_json(&self, s: ScopeId) -> ScopeJson {
        let vars = self.scopes[s.0]
            .operands
            .iter()
            .map(|op| {
                let rg = op.range.unwrap_or(Range::TOP);
                VarJson { name: op.name.clone(), min: rg.min, max: rg.max, fixed: rg.fixed }
            })
            .collect();
        let parent = self.scopes[s.0].parent.map(|p| Box::new(self.to_json(p)));
        ScopeJson { vars, parent }
    }

    /// Rebuild a scope chain from its JSON form, returning the leaf scope.
    /// Every operand comes back concrete with kind `Local`.
    pub fn from_json(&mut self, j: &ScopeJson) -> ScopeId {
        let parent = j.parent.as_ref().map(|p| self.from_json(p));
        let s = self.new_scope(parent);
        for v in &j.vars {
            let range = Range { min: v.min, max: v.max, fixed: v.fixed };
            self.add_operand(s, Operand::concrete(v.name.clone(), OperandKind::Local, range));
        }
        s
    }
}

/// JSON form of one variable binding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VarJson {
    /// SSA name.
    pub name: String,
    /// Lower endpoint.
    #[serde(with = "bound_repr")]
    pub min: Bound,
    /// Upper endpoint.
    #[serde(with = "bound_repr")]
    pub max: Bound,
    /// Widening-immunity flag.
    pub fixed: bool,
}

/// JSON form of a scope chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScopeJson {
    /// Bindings owned by this scope.
    pub vars: Vec<VarJson>,
    /// Enclosing scope, `null` at the root.
    pub parent: Option<Box<ScopeJson>>,
}

/// Interval endpoints as JSON: numbers when finite, `"inf"` / `"-inf"`
/// otherwise (JSON numbers cannot encode infinities).
mod bound_repr {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            s.serialize_f64(*v)
        } else if *v > 0.0 {
            s.serialize_str("inf")
        } else {
            s.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(f64),
            Str(String),
        }
        match Repr::deserialize(d)? {
            Repr::Num(v) => Ok(v),
            Repr::Str(s) => match s.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(de::Error::custom(format!("bad bound {other:?}"))),
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
