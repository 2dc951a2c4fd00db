//! Allocation Policy Hooks
//!
//! Link adaptation is an external collaborator: the allocator only asks
//! a [`RateStrategy`] for the MCS and initial transport block size of a
//! new transmission. The PDCCH aggregation level and search space the
//! UE-facing allocators use are policy values as well.

/// Chooses MCS and initial TBS for new transmissions
pub trait RateStrategy: Send {
    fn dl_mcs_tbs(&self, dl_cqi: u8, nof_prbs: u32) -> (u8, u32);
    fn ul_mcs_tbs(&self, ul_snr_db: f32, nof_prbs: u32) -> (u8, u32);
}

/// Fixed-rate strategy, independent of channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRate {
    pub mcs: u8,
    pub tbs: u32,
}

impl Default for FixedRate {
    fn default() -> Self {
        Self { mcs: 20, tbs: 100 }
    }
}

impl RateStrategy for FixedRate {
    fn dl_mcs_tbs(&self, _dl_cqi: u8, _nof_prbs: u32) -> (u8, u32) {
        (self.mcs, self.tbs)
    }

    fn ul_mcs_tbs(&self, _ul_snr_db: f32, _nof_prbs: u32) -> (u8, u32) {
        (self.mcs, self.tbs)
    }
}

/// Knobs of the UE-facing allocators
pub struct AllocPolicy {
    /// Aggregation-level index used for UE PDCCH placement
    pub aggr_idx: u8,
    /// UE-specific search space used for data grants
    pub ss_id: u8,
    pub rate: Box<dyn RateStrategy>,
}

impl Default for AllocPolicy {
    fn default() -> Self {
        Self {
            aggr_idx: 2,
            ss_id: 1,
            rate: Box::new(FixedRate::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_rate_defaults() {
        let policy = AllocPolicy::default();
        assert_eq!(policy.aggr_idx, 2);
        assert_eq!(policy.ss_id, 1);
        assert_eq!(policy.rate.dl_mcs_tbs(15, 4), (20, 100));
        assert_eq!(policy.rate.ul_mcs_tbs(30.0, 4), (20, 100));
    }
}
