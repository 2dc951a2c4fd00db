//! Frequency-Domain Resource Bitmaps
//!
//! Semantic bitsets over the BWP width: per-PRB and per-RBG occupancy
//! masks, the half-open PRB interval, and the per-slot usage pair that
//! keeps both granularities consistent.

use common::{ceil_div, BitMask};
use serde::{Deserialize, Serialize};

/// Half-open interval of PRBs `[start, stop)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrbInterval {
    start: u32,
    stop: u32,
}

impl PrbInterval {
    pub fn new(start: u32, stop: u32) -> Self {
        debug_assert!(start <= stop, "invalid PRB interval [{}, {})", start, stop);
        Self { start, stop }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn stop(&self) -> u32 {
        self.stop
    }

    pub fn length(&self) -> u32 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }
}

impl std::fmt::Display for PrbInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}..{})", self.start, self.stop)
    }
}

/// Nominal RBG size P for a BWP width, TS 38.214 table 5.1.2.2.1-1
pub fn nominal_rbg_size(bwp_width: u32, config1: bool) -> u32 {
    match bwp_width {
        0..=36 => {
            if config1 {
                2
            } else {
                4
            }
        }
        37..=72 => {
            if config1 {
                4
            } else {
                8
            }
        }
        73..=144 => {
            if config1 {
                8
            } else {
                16
            }
        }
        _ => 16,
    }
}

/// Number of RBGs needed to cover a BWP
pub fn nof_rbgs(bwp_width: u32, start_rb: u32, p: u32) -> u32 {
    ceil_div(bwp_width + (start_rb % p), p)
}

/// Occupancy mask with one bit per PRB
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrbBitmap(BitMask);

impl PrbBitmap {
    pub fn new(nof_prb: u32) -> Self {
        Self(BitMask::new(nof_prb as usize))
    }

    pub fn len(&self) -> u32 {
        self.0.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn set(&mut self, prb: u32) {
        self.0.set(prb as usize);
    }

    pub fn test(&self, prb: u32) -> bool {
        self.0.test(prb as usize)
    }

    pub fn add_interval(&mut self, interv: PrbInterval) {
        self.0.fill(interv.start() as usize, interv.stop() as usize);
    }

    pub fn count(&self) -> u32 {
        self.0.count() as u32
    }

    pub fn any(&self) -> bool {
        self.0.any()
    }

    pub fn intersects(&self, other: &PrbBitmap) -> bool {
        self.0.intersects(&other.0)
    }

    pub fn union_with(&mut self, other: &PrbBitmap) {
        self.0.union_with(&other.0);
    }

    pub fn reset(&mut self) {
        self.0.reset();
    }

    /// First run of `k` free PRBs with the smallest start, trimmed to
    /// length `k`. Returns an empty interval if no such run exists; a run
    /// of length zero always exists at position 0.
    pub fn first_free_run(&self, k: u32) -> PrbInterval {
        match self.0.find_zero_run(k as usize) {
            Some(start) => PrbInterval::new(start as u32, start as u32 + k),
            None => PrbInterval::default(),
        }
    }
}

/// Occupancy mask with one bit per resource-block group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RbgBitmap(BitMask);

impl RbgBitmap {
    pub fn new(nof_rbgs: u32) -> Self {
        Self(BitMask::new(nof_rbgs as usize))
    }

    pub fn len(&self) -> u32 {
        self.0.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn set(&mut self, rbg: u32) {
        self.0.set(rbg as usize);
    }

    pub fn test(&self, rbg: u32) -> bool {
        self.0.test(rbg as usize)
    }

    pub fn fill(&mut self, lo: u32, hi: u32) {
        self.0.fill(lo as usize, hi as usize);
    }

    pub fn count(&self) -> u32 {
        self.0.count() as u32
    }

    pub fn any(&self) -> bool {
        self.0.any()
    }

    pub fn intersects(&self, other: &RbgBitmap) -> bool {
        self.0.intersects(&other.0)
    }

    pub fn union_with(&mut self, other: &RbgBitmap) {
        self.0.union_with(&other.0);
    }

    pub fn reset(&mut self) {
        self.0.reset();
    }

    /// Start of the first run of `k` free RBGs, if any
    pub fn find_free_run(&self, k: u32) -> Option<u32> {
        self.0.find_zero_run(k as usize).map(|s| s as u32)
    }

    /// Expand to a PRB mask given the RBG size
    pub fn to_prbs(&self, p: u32, nof_prb: u32) -> PrbBitmap {
        let mut prbs = PrbBitmap::new(nof_prb);
        for rbg in 0..self.len() {
            if self.test(rbg) {
                let lo = rbg * p;
                let hi = ((rbg + 1) * p).min(nof_prb);
                if lo < hi {
                    prbs.add_interval(PrbInterval::new(lo, hi));
                }
            }
        }
        prbs
    }

    /// Collapse a PRB mask to RBG granularity: an RBG is marked used if
    /// any of its PRBs is used
    pub fn from_prbs(prbs: &PrbBitmap, p: u32) -> RbgBitmap {
        let mut rbgs = RbgBitmap::new(ceil_div(prbs.len(), p));
        for prb in 0..prbs.len() {
            if prbs.test(prb) {
                let rbg = prb / p;
                if !rbgs.test(rbg) {
                    rbgs.set(rbg);
                }
            }
        }
        rbgs
    }
}

/// A frequency allocation, either a contiguous PRB interval or an RBG mask
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrbGrant {
    Interval(PrbInterval),
    Rbgs(RbgBitmap),
}

impl PrbGrant {
    /// Number of PRBs the grant occupies
    pub fn nof_prbs(&self, p: u32) -> u32 {
        match self {
            PrbGrant::Interval(interv) => interv.length(),
            PrbGrant::Rbgs(mask) => mask.count() * p,
        }
    }

    /// True if this grant spans at least as many resources as `other`.
    /// Grants of different shapes never cover each other.
    pub fn covers(&self, other: &PrbGrant) -> bool {
        match (self, other) {
            (PrbGrant::Interval(a), PrbGrant::Interval(b)) => a.length() >= b.length(),
            (PrbGrant::Rbgs(a), PrbGrant::Rbgs(b)) => a.count() >= b.count(),
            _ => false,
        }
    }
}

impl From<PrbInterval> for PrbGrant {
    fn from(interv: PrbInterval) -> Self {
        PrbGrant::Interval(interv)
    }
}

/// Per-slot, per-direction occupancy kept at both PRB and RBG granularity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RbUsage {
    p: u32,
    nof_prb: u32,
    prbs: PrbBitmap,
    rbgs: RbgBitmap,
}

impl RbUsage {
    pub fn new(nof_prb: u32, start_rb: u32, config1: bool) -> Self {
        let p = nominal_rbg_size(nof_prb, config1);
        Self {
            p,
            nof_prb,
            prbs: PrbBitmap::new(nof_prb),
            rbgs: RbgBitmap::new(nof_rbgs(nof_prb, start_rb, p)),
        }
    }

    pub fn p(&self) -> u32 {
        self.p
    }

    pub fn prbs(&self) -> &PrbBitmap {
        &self.prbs
    }

    pub fn rbgs(&self) -> &RbgBitmap {
        &self.rbgs
    }

    pub fn add_interval(&mut self, interv: PrbInterval) {
        self.prbs.add_interval(interv);
        if !interv.is_empty() {
            self.rbgs
                .fill(interv.start() / self.p, ceil_div(interv.stop(), self.p));
        }
    }

    pub fn add_rbg_mask(&mut self, mask: &RbgBitmap) {
        self.rbgs.union_with(mask);
        let covered = mask.to_prbs(self.p, self.nof_prb);
        self.prbs.union_with(&covered);
    }

    pub fn add_grant(&mut self, grant: &PrbGrant) {
        match grant {
            PrbGrant::Interval(interv) => self.add_interval(*interv),
            PrbGrant::Rbgs(mask) => self.add_rbg_mask(mask),
        }
    }

    pub fn collides_interval(&self, interv: PrbInterval) -> bool {
        (interv.start()..interv.stop()).any(|prb| self.prbs.test(prb))
    }

    pub fn collides(&self, grant: &PrbGrant) -> bool {
        match grant {
            PrbGrant::Interval(interv) => self.collides_interval(*interv),
            PrbGrant::Rbgs(mask) => self.rbgs.intersects(mask),
        }
    }

    pub fn reset(&mut self) {
        self.prbs.reset();
        self.rbgs.reset();
    }
}
