//! PDCCH CCE Candidate Computation
//!
//! Enumerates the legal control-channel candidate start positions per
//! slot and aggregation level, following the search-space hash of
//! TS 38.213 section 10.1. Tables are computed once when a user is
//! admitted to a BWP (or for the BWP's common search spaces) and reused
//! every slot until the coreset, search space or RNTI changes.

use crate::cfg::{CoresetCfg, SearchSpaceCfg, SearchSpaceType};
use crate::MAX_NOF_AGGR_LEVELS;
use common::Rnti;

/// Maximum candidates per aggregation level in a search space
pub const MAX_NOF_CANDIDATES: usize = 8;

/// Hash multipliers A_p selected by coreset id mod 3
const Y_COEFFS: [u64; 3] = [39827, 39829, 39839];

/// Hash modulus D
const Y_MOD: u64 = 65537;

/// Aggregation level L for an aggregation-level index
pub fn aggr_level(aggr_idx: u8) -> u16 {
    1 << aggr_idx
}

/// Candidate CCE start positions, indexed by slot-in-frame then by
/// aggregation-level index. Each list is ordered by candidate index m.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CceCandidateTable {
    slots: Vec<[Vec<u16>; MAX_NOF_AGGR_LEVELS]>,
}

impl CceCandidateTable {
    /// Compute the table for one (coreset, search space, rnti) triple
    pub fn compute(
        coreset: &CoresetCfg,
        search_space: &SearchSpaceCfg,
        rnti: Rnti,
        slots_per_frame: u32,
    ) -> Self {
        let nof_cces = u64::from(coreset.nof_cces());
        let mut slots = Vec::with_capacity(slots_per_frame as usize);

        // Y_p(-1) = rnti for UE-specific search spaces, 0 for common
        let coeff = Y_COEFFS[coreset.id as usize % Y_COEFFS.len()];
        let mut y: u64 = u64::from(rnti.value());

        for _ in 0..slots_per_frame {
            y = (coeff * y) % Y_MOD;
            let y_slot = match search_space.ss_type {
                SearchSpaceType::Common => 0,
                SearchSpaceType::UeSpecific => y,
            };

            let mut per_level: [Vec<u16>; MAX_NOF_AGGR_LEVELS] = Default::default();
            for (aggr_idx, candidates) in per_level.iter_mut().enumerate() {
                let level = u64::from(aggr_level(aggr_idx as u8));
                let nof_candidates =
                    u64::from(search_space.nof_candidates[aggr_idx].min(MAX_NOF_CANDIDATES as u8));
                if level > nof_cces || nof_candidates == 0 {
                    continue;
                }
                for m in 0..nof_candidates {
                    let ncce =
                        level * ((y_slot + (m * nof_cces) / (level * nof_candidates)) % (nof_cces / level));
                    candidates.push(ncce as u16);
                }
            }
            slots.push(per_level);
        }

        Self { slots }
    }

    /// Ordered candidate starts for one slot and aggregation level
    pub fn candidates(&self, slot_idx: u32, aggr_idx: usize) -> &[u16] {
        &self.slots[slot_idx as usize % self.slots.len()][aggr_idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{CoresetCfg, SearchSpaceCfg, SearchSpaceType};

    fn coreset(id: u8, nof_groups: usize, duration: u8) -> CoresetCfg {
        CoresetCfg {
            id,
            duration,
            freq_resources: vec![true; nof_groups],
            reg_bundle_size: 6,
            interleaved: false,
            shift: 0,
        }
    }

    fn search_space(id: u8, ss_type: SearchSpaceType, candidates: [u8; 5]) -> SearchSpaceCfg {
        SearchSpaceCfg {
            id,
            coreset_id: 0,
            ss_type,
            nof_candidates: candidates,
        }
    }

    #[test]
    fn test_table_is_deterministic() {
        let cs = coreset(0, 8, 1);
        let ss = search_space(1, SearchSpaceType::UeSpecific, [1, 1, 2, 1, 0]);
        let a = CceCandidateTable::compute(&cs, &ss, Rnti(0x4601), 10);
        let b = CceCandidateTable::compute(&cs, &ss, Rnti(0x4601), 10);
        assert_eq!(a, b);

        // A different RNTI hashes to a different sequence in at least one slot
        let c = CceCandidateTable::compute(&cs, &ss, Rnti(0x4602), 10);
        let differs = (0..10).any(|sl| a.candidates(sl, 0) != c.candidates(sl, 0));
        assert!(differs);
    }

    #[test]
    fn test_candidates_fit_in_coreset() {
        let cs = coreset(0, 8, 1);
        let ss = search_space(1, SearchSpaceType::UeSpecific, [8, 8, 8, 8, 8]);
        let table = CceCandidateTable::compute(&cs, &ss, Rnti(0x4601), 10);

        for slot in 0..10 {
            for aggr_idx in 0..MAX_NOF_AGGR_LEVELS {
                let level = aggr_level(aggr_idx as u8);
                for &ncce in table.candidates(slot, aggr_idx) {
                    assert!(ncce + level <= cs.nof_cces(), "candidate overflows coreset");
                    assert_eq!(ncce % level, 0, "candidate not level-aligned");
                }
            }
        }
        // Level 16 exceeds the 8 CCEs of this coreset entirely
        assert!(table.candidates(0, 4).is_empty());
    }

    #[test]
    fn test_common_search_space_ignores_rnti() {
        let cs = coreset(0, 8, 2);
        let ss = search_space(0, SearchSpaceType::Common, [0, 0, 2, 1, 0]);
        let a = CceCandidateTable::compute(&cs, &ss, Rnti(0x4601), 10);
        let b = CceCandidateTable::compute(&cs, &ss, Rnti(0x0000), 10);
        assert_eq!(a, b);
        // Common candidates start from Y = 0 every slot
        assert_eq!(a.candidates(0, 2), a.candidates(7, 2));
        assert_eq!(a.candidates(0, 2)[0], 0);
    }

    #[test]
    fn test_small_coreset_has_no_high_level_candidates() {
        // 6 CCEs cannot host an aggregation-level 8 candidate
        let cs = coreset(1, 6, 1);
        let ss = search_space(1, SearchSpaceType::UeSpecific, [0, 0, 0, 1, 0]);
        let table = CceCandidateTable::compute(&cs, &ss, Rnti(0x4601), 10);
        for slot in 0..10 {
            assert!(table.candidates(slot, 3).is_empty());
        }
    }
}
