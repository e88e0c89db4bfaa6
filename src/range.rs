//! Interval lattice & loop-aware interval arithmetic
//!
//! The analysis represents every SSA value as a closed interval `[min, max]`
//! over the extended reals. Two lattice elements get dedicated encodings:
//!
//! - ⊥ (not yet computed) is `[+∞, −∞]`;
//! - ⊤ (unknown) is `[−∞, +∞]`.
//!
//! `merge` treats ⊥ as its identity; the arithmetic operators propagate ⊥
//! (an uncomputed input can never produce a computed output). The `fixed`
//! flag marks intervals that must survive widening untouched, e.g. module
//! constants.
//!
//! The loop-aware operators (`add`/`sub` with iteration bounds,
//! `mul_on_loop`) model the effect of repeating an accumulation or a
//! geometric growth across a bounded number of iterations; `mul_on_loop`
//! samples representative exponents rather than integrating over all of
//! them, which captures monotone and bouncing growth cheaply.

use crate::Bound;

/// A closed interval over the extended reals.
///
/// Invariant: `min <= max` except for the ⊥ encoding `[+∞, −∞]`. The
/// [`Range::new`] constructor canonicalises swapped endpoints.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Range {
    /// Lower endpoint.
    pub min: Bound,
    /// Upper endpoint.
    pub max: Bound,
    /// When set, the interval is immutable under widening and merge-copy.
    pub fixed: bool,
}

/// Errors surfaced by the interval operators.
#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    /// The divisor interval contains 0, so the quotient is unbounded.
    #[error("divisor range [{0}, {1}] may contain zero")]
    DivByZeroPossible(Bound, Bound),
}

impl Range {
    /// ⊥: the uncomputed interval.
    pub const BOTTOM: Range = Range {
        min: Bound::INFINITY,
        max: Bound::NEG_INFINITY,
        fixed: false,
    };

    /// ⊤: the unknown interval.
    pub const TOP: Range = Range {
        min: Bound::NEG_INFINITY,
        max: Bound::INFINITY,
        fixed: false,
    };

    /// Build an interval, swapping the endpoints if they arrive reversed.
    pub fn new(min: Bound, max: Bound) -> Self {
        if min > max {
            Range { min: max, max: min, fixed: false }
        } else {
            Range { min, max, fixed: false }
        }
    }

    /// The point interval `[v, v]`.
    #[inline]
    pub fn point(v: Bound) -> Self {
        Range { min: v, max: v, fixed: false }
    }

    /// A `fixed` point interval, for constants that must never widen.
    #[inline]
    pub fn fixed_point(v: Bound) -> Self {
        Range { min: v, max: v, fixed: true }
    }

    /// Return the same interval with the `fixed` flag set as given.
    #[inline]
    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    /// True iff this is the ⊥ encoding.
    #[inline]
    pub fn is_bottom(&self) -> bool {
        self.min == Bound::INFINITY && self.max == Bound::NEG_INFINITY
    }

    /// True iff this is the ⊤ encoding.
    #[inline]
    pub fn is_top(&self) -> bool {
        self.min == Bound::NEG_INFINITY && self.max == Bound::INFINITY
    }

    /// True iff `0 ∈ [min, max]`.
    #[inline]
    pub fn contains_zero(&self) -> bool {
        self.min <= 0.0 && 0.0 <= self.max
    }

    /// True iff either endpoint is infinite.
    #[inline]
    pub fn contains_infinity(&self) -> bool {
        self.min.is_infinite() || self.max.is_infinite()
    }

    /// True iff `other` is entirely inside `self`.
    #[inline]
    pub fn contains(&self, other: &Range) -> bool {
        self.min <= other.min && other.max <= self.max
    }

    /// Widen this interval to cover `other`. A `fixed` interval refuses.
    ///
    /// Enlarging by ⊥ is a no-op and enlarging ⊥ adopts `other`, both as a
    /// consequence of the endpoint encodings.
    pub fn enlarge(&mut self, other: &Range) {
        if self.fixed {
            return;
        }
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Least upper bound of two intervals; ⊥ is the identity. The result is
/// never `fixed`, regardless of the inputs.
pub fn merge(a: Range, b: Range) -> Range {
    if a.is_bottom() {
        return b.with_fixed(false);
    }
    if b.is_bottom() {
        return a.with_fixed(false);
    }
    Range {
        min: a.min.min(b.min),
        max: a.max.max(b.max),
        fixed: false,
    }
}

/// `k * v` with the convention that a zero factor annihilates infinities.
///
/// IEEE `0 * ∞` is NaN, which would poison every downstream comparison; for
/// interval scaling the correct reading of "repeated zero times" is 0.
#[inline]
fn scaled(k: Bound, v: Bound) -> Bound {
    if k == 0.0 || v == 0.0 {
        0.0
    } else {
        k * v
    }
}

/// Repeated accumulation: `[a.min + min_iter·b.min, a.max + max_iter·b.max]`.
///
/// With `min_iter = max_iter = 1` this is ordinary interval addition.
pub fn add(a: Range, b: Range, min_iter: u64, max_iter: u64) -> Range {
    if a.is_bottom() || b.is_bottom() {
        return Range::BOTTOM;
    }
    Range::new(
        a.min + scaled(min_iter as Bound, b.min),
        a.max + scaled(max_iter as Bound, b.max),
    )
}

/// Repeated subtraction: `[a.min − max_iter·b.max, a.max − min_iter·b.min]`.
pub fn sub(a: Range, b: Range, min_iter: u64, max_iter: u64) -> Range {
    if a.is_bottom() || b.is_bottom() {
        return Range::BOTTOM;
    }
    Range::new(
        a.min - scaled(max_iter as Bound, b.max),
        a.max - scaled(min_iter as Bound, b.min),
    )
}

/// Four-corners interval multiplication.
pub fn mul(a: Range, b: Range) -> Range {
    if a.is_bottom() || b.is_bottom() {
        return Range::BOTTOM;
    }
    let corners = [
        scaled(a.min, b.min),
        scaled(a.min, b.max),
        scaled(a.max, b.min),
        scaled(a.max, b.max),
    ];
    let mut lo = corners[0];
    let mut hi = corners[0];
    for &c in &corners[1..] {
        lo = lo.min(c);
        hi = hi.max(c);
    }
    Range { min: lo, max: hi, fixed: false }
}

/// The interval of `base^exp`.
///
/// Exponent 0 yields `[1, 1]`. When the base straddles 0 and the exponent
/// is even, the lower bound is clamped to 0 (the corners alone would miss
/// the minimum attained inside the interval).
pub fn pow_interval(base: Range, exp: u64) -> Range {
    if exp == 0 {
        return Range::point(1.0);
    }
    if base.is_bottom() {
        return Range::BOTTOM;
    }
    let e = exp.min(i32::MAX as u64) as i32;
    let c1 = base.min.powi(e);
    let c2 = base.max.powi(e);
    let mut out = Range::new(c1.min(c2), c1.max(c2));
    if exp % 2 == 0 && base.min < 0.0 && base.max > 0.0 {
        out.min = 0.0;
    }
    out
}

/// Growth envelope of `a · b^i` for `i` over the loop's iteration bounds.
///
/// Rather than integrating over every exponent, the operator samples
/// `{min_iter, min_iter+1, max_iter−1, max_iter}` (duplicates removed) and
/// returns the envelope of the sampled products.
pub fn mul_on_loop(a: Range, b: Range, min_iter: u64, max_iter: u64) -> Range {
    if a.is_bottom() || b.is_bottom() {
        return Range::BOTTOM;
    }
    let mut samples = std::collections::BTreeSet::new();
    samples.insert(min_iter);
    samples.insert(min_iter.saturating_add(1));
    samples.insert(max_iter.saturating_sub(1));
    samples.insert(max_iter);

    let mut envelope = Range::BOTTOM;
    for i in samples {
        envelope = merge(envelope, mul(a, pow_interval(b, i)));
    }
    envelope
}

/// Four-corners interval division; fails when the divisor may contain 0.
pub fn checked_div(a: Range, b: Range) -> Result<Range, RangeError> {
    if a.is_bottom() || b.is_bottom() {
        return Ok(Range::BOTTOM);
    }
    if b.contains_zero() {
        return Err(RangeError::DivByZeroPossible(b.min, b.max));
    }
    let corners = [a.min / b.min, a.min / b.max, a.max / b.min, a.max / b.max];
    let mut lo = corners[0];
    let mut hi = corners[0];
    for &c in &corners[1..] {
        lo = lo.min(c);
        hi = hi.max(c);
    }
    Ok(Range { min: lo, max: hi, fixed: false })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn constructor_canonicalises_swapped_endpoints() {
        let r = Range::new(5.0, -3.0);
        assert_eq!((r.min, r.max), (-3.0, 5.0));
        assert!(r.min <= r.max);
    }

    #[test]
    fn bottom_and_top_encodings() {
        assert!(Range::BOTTOM.is_bottom());
        assert!(!Range::BOTTOM.is_top());
        assert!(Range::TOP.is_top());
        assert!(Range::TOP.contains_infinity());
        assert!(Range::TOP.contains_zero());
    }

    #[test]
    fn merge_bottom_is_identity() {
        let x = Range::new(-2.0, 7.0);
        assert_eq!(merge(Range::BOTTOM, x), x);
        assert_eq!(merge(x, Range::BOTTOM), x);
        assert!(merge(Range::BOTTOM, Range::BOTTOM).is_bottom());
    }

    #[test]
    fn merge_is_monotone_on_random_intervals() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let a = Range::new(rng.gen_range(-1e6..1e6), rng.gen_range(-1e6..1e6));
            let b = Range::new(rng.gen_range(-1e6..1e6), rng.gen_range(-1e6..1e6));
            let m = merge(a, b);
            assert!(m.min <= a.min.min(b.min));
            assert!(m.max >= a.max.max(b.max));
            assert!(m.contains(&a) && m.contains(&b));
        }
    }

    #[test]
    fn add_with_unit_bounds_is_plain_interval_addition() {
        let a = Range::new(1.0, 2.0);
        let b = Range::new(10.0, 20.0);
        assert_eq!(add(a, b, 1, 1), Range::new(11.0, 22.0));
    }

    #[test]
    fn add_models_repeated_accumulation() {
        // s in [0,0], step in [0,9], ten iterations at most.
        let s = Range::point(0.0);
        let step = Range::new(0.0, 9.0);
        let r = add(s, step, 10, 10);
        assert_eq!(r, Range::new(0.0, 90.0));
        // Zero minimum iterations keeps the lower endpoint untouched.
        let r0 = add(s, step, 0, 10);
        assert_eq!(r0, Range::new(0.0, 90.0));
    }

    #[test]
    fn sub_models_repeated_subtraction() {
        let a = Range::new(100.0, 100.0);
        let b = Range::new(1.0, 2.0);
        assert_eq!(sub(a, b, 3, 5), Range::new(100.0 - 5.0 * 2.0, 100.0 - 3.0 * 1.0));
    }

    #[test]
    fn arithmetic_propagates_bottom() {
        let x = Range::new(1.0, 2.0);
        assert!(add(Range::BOTTOM, x, 1, 1).is_bottom());
        assert!(sub(x, Range::BOTTOM, 1, 1).is_bottom());
        assert!(mul(Range::BOTTOM, x).is_bottom());
        assert!(mul_on_loop(x, Range::BOTTOM, 0, 4).is_bottom());
        assert!(checked_div(Range::BOTTOM, x).unwrap().is_bottom());
    }

    #[test]
    fn mul_four_corners_with_mixed_signs() {
        let a = Range::new(-2.0, 3.0);
        let b = Range::new(-5.0, 4.0);
        // corners: 10, -8, -15, 12
        assert_eq!(mul(a, b), Range::new(-15.0, 12.0));
    }

    #[test]
    fn mul_zero_times_infinity_is_zero_not_nan() {
        let z = Range::point(0.0);
        let r = mul(z, Range::TOP);
        assert_eq!(r, Range::point(0.0));
        let acc = add(Range::point(1.0), Range::TOP, 0, 0);
        assert_eq!(acc, Range::point(1.0));
    }

    #[test]
    fn pow_interval_rules() {
        assert_eq!(pow_interval(Range::new(-9.0, 9.0), 0), Range::point(1.0));
        assert_eq!(pow_interval(Range::new(2.0, 3.0), 3), Range::new(8.0, 27.0));
        // straddling base, even exponent: lower bound clamps to 0
        let r = pow_interval(Range::new(-3.0, 2.0), 2);
        assert_eq!(r, Range { min: 0.0, max: 9.0, fixed: false });
        // odd exponent keeps the sign
        assert_eq!(pow_interval(Range::new(-3.0, 2.0), 3), Range::new(-27.0, 8.0));
    }

    #[test]
    fn mul_on_loop_tracks_geometric_growth() {
        // x in [1,1] doubled up to 100 times with unknown minimum.
        let x = Range::point(1.0);
        let two = Range::point(2.0);
        let r = mul_on_loop(x, two, 0, 100);
        assert_eq!(r.min, 1.0);
        assert_eq!(r.max, 2f64.powi(100));
    }

    #[test]
    fn mul_on_loop_single_iteration_matches_mul() {
        let a = Range::new(2.0, 3.0);
        let b = Range::new(4.0, 5.0);
        let sampled = mul_on_loop(a, b, 1, 1);
        // with min == max the only surviving extra samples widen, never shrink
        assert!(sampled.contains(&mul(a, b)));
    }

    #[test]
    fn div_rejects_zero_straddling_divisor() {
        let a = Range::new(10.0, 20.0);
        assert!(matches!(
            checked_div(a, Range::new(-1.0, 1.0)),
            Err(RangeError::DivByZeroPossible(_, _))
        ));
        assert!(matches!(
            checked_div(a, Range::point(0.0)),
            Err(RangeError::DivByZeroPossible(_, _))
        ));
        assert_eq!(checked_div(a, Range::point(2.0)).unwrap(), Range::new(5.0, 10.0));
        assert_eq!(
            checked_div(a, Range::new(-4.0, -2.0)).unwrap(),
            Range::new(-10.0, -2.5)
        );
    }

    #[test]
    fn fixed_interval_rejects_enlargement() {
        let mut c = Range::fixed_point(42.0);
        c.enlarge(&Range::new(-1000.0, 1000.0));
        assert_eq!((c.min, c.max), (42.0, 42.0));

        let mut v = Range::new(0.0, 1.0);
        v.enlarge(&Range::new(-2.0, 5.0));
        assert_eq!((v.min, v.max), (-2.0, 5.0));
    }

    #[test]
    fn enlarge_from_bottom_adopts_other() {
        let mut b = Range::BOTTOM;
        b.enlarge(&Range::new(3.0, 4.0));
        assert_eq!(b, Range::new(3.0, 4.0));
    }
}
