//! Order keys for characters in a replicated sequence.
//!
//! Every character carries a [`Position`]: a variable-depth path of
//! `(digit, site)` segments plus the generating site's monotonic counter.
//! Paths compare lexicographically segment by segment, with a shorter path
//! that prefixes a longer one ordering first, so any two distinct positions
//! are strictly ordered — no replica ever has to break a tie with wall-clock
//! time.
//!
//! Allocation between two neighbors walks both bounding paths depth by
//! depth. When a depth has integer room the new digit lands there, biased a
//! small step past the left bound so sequential typing stays shallow. When a
//! depth is saturated the allocator adopts the left bound's segment and
//! descends, so dense same-point insertion grows the path instead of
//! running out of digits.
//!
//! Reference: Weiss, Urso & Molli — Logoot (ICDCS 2009);
//! Nédelec et al. — LSEQ (DocEng 2013)

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Identifies the replica (user session) that created a position.
///
/// The nil UUID is reserved for the virtual begin-of-document sentinel and
/// is never a valid participant site.
pub type SiteId = Uuid;

/// Exclusive upper bound of the digit space at every path depth.
pub const DIGIT_BASE: u64 = 1 << 32;

/// Allocation bias past the left bound. Appending n characters consumes
/// roughly n * STEP of a depth before the allocator descends.
const STEP: u64 = 1 << 16;

/// One path element: a digit in `0..DIGIT_BASE` plus the site that chose it.
///
/// Freshly allocated segments always carry a digit `>= 1`; digit 0 appears
/// only in the shared begin sentinel adopted while descending past an
/// exhausted left bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub digit: u64,
    pub site: SiteId,
}

impl Segment {
    pub fn new(digit: u64, site: SiteId) -> Self {
        Self { digit, site }
    }

    /// The virtual begin-of-document sentinel.
    fn begin() -> Self {
        Self { digit: 0, site: Uuid::nil() }
    }
}

/// A character's place in the document's total order.
///
/// `timestamp` records creation time (seconds since the Unix epoch) for
/// diagnostics and presence display; it takes no part in ordering or
/// equality, since clocks are not monotonic across sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub path: Vec<Segment>,
    pub seq: u64,
    pub timestamp: f64,
}

impl Position {
    /// The site that generated this position (carried by the final segment).
    pub fn site(&self) -> SiteId {
        self.path.last().map(|s| s.site).unwrap_or_else(Uuid::nil)
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Position {}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        // Vec<Segment> compares lexicographically; a strict prefix orders
        // first, which is exactly the rule the allocator relies on.
        self.path
            .cmp(&other.path)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Allocates positions strictly between existing neighbors.
///
/// Keeps one monotonic counter per site, so two positions generated by the
/// same site can never compare equal even if a path were ever re-derived.
#[derive(Debug, Default)]
pub struct PositionGenerator {
    counters: std::collections::HashMap<SiteId, u64>,
}

impl PositionGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a position for `site` strictly between `lo` and `hi`.
    ///
    /// `None` bounds are open: `lo = None` means before the first character,
    /// `hi = None` after the last. Requires `lo < hi` when both are present.
    pub fn next(&mut self, site: SiteId, lo: Option<&Position>, hi: Option<&Position>) -> Position {
        let counter = self.counters.entry(site).or_insert(0);
        *counter += 1;

        let lo_path = lo.map(|p| p.path.as_slice()).unwrap_or(&[]);
        let hi_path = hi.map(|p| p.path.as_slice()).unwrap_or(&[]);

        Position {
            path: path_between(lo_path, hi_path, site),
            seq: *counter,
            timestamp: unix_time(),
        }
    }

    /// Fast-forward a site's counter to at least `seq`.
    ///
    /// Used when reloading a sequence from a snapshot so counters stay
    /// monotonic across process restarts.
    pub fn observe(&mut self, site: SiteId, seq: u64) {
        let counter = self.counters.entry(site).or_insert(0);
        if *counter < seq {
            *counter = seq;
        }
    }

    /// The last counter value handed out for `site`.
    pub fn counter(&self, site: SiteId) -> u64 {
        self.counters.get(&site).copied().unwrap_or(0)
    }
}

/// Build a path strictly between `lo` and `hi` (lexicographic segment order,
/// prefix-first). Terminates because every descent eventually reaches a
/// depth where the left bound is exhausted and the digit space is open.
fn path_between(lo: &[Segment], hi: &[Segment], site: SiteId) -> Vec<Segment> {
    let mut path = Vec::with_capacity(lo.len().max(hi.len()) + 1);
    let mut hi_active = true;
    let mut depth = 0usize;

    loop {
        let lo_seg = lo.get(depth);
        let hi_seg = if hi_active { hi.get(depth) } else { None };
        let floor = lo_seg.map_or(0, |s| s.digit);
        let ceil = hi_seg.map_or(DIGIT_BASE, |s| s.digit);

        if ceil.saturating_sub(floor) >= 2 {
            let bias = ((ceil - floor) / 2).min(STEP);
            path.push(Segment::new(floor + bias, site));
            return path;
        }

        // Saturated depth: adopt the left bound's segment (or the begin
        // sentinel once the left bound is exhausted) and descend. The upper
        // bound keeps constraining deeper digits only while the adopted
        // prefix still matches it exactly.
        let adopted = lo_seg.copied().unwrap_or_else(Segment::begin);
        hi_active = hi_active && hi_seg == Some(&adopted);
        path.push(adopted);
        depth += 1;
    }
}

fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(n: u8) -> SiteId {
        Uuid::from_u128(n as u128 + 1)
    }

    fn gen_between(
        g: &mut PositionGenerator,
        s: SiteId,
        lo: Option<&Position>,
        hi: Option<&Position>,
    ) -> Position {
        let p = g.next(s, lo, hi);
        if let Some(lo) = lo {
            assert!(*lo < p, "allocated position must exceed the left bound");
        }
        if let Some(hi) = hi {
            assert!(p < *hi, "allocated position must precede the right bound");
        }
        p
    }

    #[test]
    fn test_open_allocation_is_ordered() {
        let mut g = PositionGenerator::new();
        let a = g.next(site(1), None, None);
        let b = g.next(site(1), Some(&a), None);
        let c = g.next(site(1), None, Some(&a));
        assert!(c < a && a < b);
    }

    #[test]
    fn test_prefix_orders_first() {
        let a = Position {
            path: vec![Segment::new(5, site(1))],
            seq: 1,
            timestamp: 0.0,
        };
        let b = Position {
            path: vec![Segment::new(5, site(1)), Segment::new(3, site(2))],
            seq: 1,
            timestamp: 0.0,
        };
        assert!(a < b);
    }

    #[test]
    fn test_timestamp_ignored_by_ordering() {
        let mk = |ts| Position {
            path: vec![Segment::new(7, site(1))],
            seq: 4,
            timestamp: ts,
        };
        assert_eq!(mk(1.0), mk(9999.0));
    }

    #[test]
    fn test_equal_paths_tie_break_on_site() {
        // Two sites racing an empty document produce the same digit; the
        // segment's site keeps the order strict and identical everywhere.
        let mut ga = PositionGenerator::new();
        let mut gb = PositionGenerator::new();
        let a = ga.next(site(1), None, None);
        let b = gb.next(site(2), None, None);
        assert_eq!(a.path[0].digit, b.path[0].digit);
        assert_ne!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
    }

    #[test]
    fn test_insert_between_site_tied_neighbors() {
        // lo and hi share a digit and differ only in site; the allocator
        // must adopt lo's segment so the result lands between them.
        let mut ga = PositionGenerator::new();
        let mut gb = PositionGenerator::new();
        let mut gc = PositionGenerator::new();
        let a = ga.next(site(1), None, None);
        let b = gb.next(site(2), None, None);
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let mid = gen_between(&mut gc, site(3), Some(&lo), Some(&hi));
        assert!(mid.path.len() > 1);
    }

    #[test]
    fn test_dense_appends_never_collide() {
        let mut g = PositionGenerator::new();
        let s = site(1);
        let mut last = g.next(s, None, None);
        let mut seen = vec![last.clone()];
        for _ in 0..500 {
            let next = gen_between(&mut g, s, Some(&last), None);
            seen.push(next.clone());
            last = next;
        }
        for w in seen.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn test_dense_prepends_never_collide() {
        // Prepending repeatedly exhausts each depth after ~log2(STEP)
        // halvings; the path must deepen rather than collide.
        let mut g = PositionGenerator::new();
        let s = site(1);
        let mut first = g.next(s, None, None);
        for _ in 0..200 {
            let next = gen_between(&mut g, s, None, Some(&first));
            first = next;
        }
    }

    #[test]
    fn test_dense_midpoint_inserts_never_collide() {
        let mut g = PositionGenerator::new();
        let s = site(1);
        let lo = g.next(s, None, None);
        let mut hi = gen_between(&mut g, s, Some(&lo), None);
        for _ in 0..200 {
            hi = gen_between(&mut g, s, Some(&lo), Some(&hi));
        }
    }

    #[test]
    fn test_per_site_counters_are_independent() {
        let mut g = PositionGenerator::new();
        let a = g.next(site(1), None, None);
        let b = g.next(site(2), Some(&a), None);
        let c = g.next(site(1), Some(&b), None);
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 1);
        assert_eq!(c.seq, 2);
    }

    #[test]
    fn test_observe_fast_forwards_counter() {
        let mut g = PositionGenerator::new();
        g.observe(site(1), 41);
        let p = g.next(site(1), None, None);
        assert_eq!(p.seq, 42);
        // Observing a smaller value never rewinds.
        g.observe(site(1), 3);
        assert_eq!(g.counter(site(1)), 42);
    }

    #[test]
    fn test_fresh_segments_carry_the_generating_site() {
        let mut g = PositionGenerator::new();
        let p = g.next(site(9), None, None);
        assert_eq!(p.site(), site(9));
        assert!(p.path.last().unwrap().digit >= 1);
    }
}
