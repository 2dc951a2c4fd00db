//! Cell, BWP and UE Configuration
//!
//! Configuration arrives structured over the RRC-facing interface and is
//! validated here into derived parameter blocks: `BwpParams` captures the
//! cell/BWP invariants (RBG size P, RBG count, TDD direction mask,
//! precomputed RAR candidate table) and is shared read-only; `UeBwpCfg`
//! is the per-user projection with one CCE candidate table per configured
//! search space.

use crate::dci::DlDci;
use crate::pdcch::CceCandidateTable;
use crate::rb::{nof_rbgs, nominal_rbg_size};
use crate::{SchedError, MAX_NOF_CORESETS, MAX_NOF_SEARCH_SPACES};
use common::{CellId, Pci, Rnti, SubcarrierSpacing};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Control resource set configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoresetCfg {
    pub id: u8,
    /// Duration in OFDM symbols (1-3)
    pub duration: u8,
    /// Frequency-domain resources, one flag per group of 6 PRBs
    pub freq_resources: Vec<bool>,
    /// REG bundle size
    pub reg_bundle_size: u8,
    /// CCE-to-REG mapping: interleaved or non-interleaved
    pub interleaved: bool,
    /// Interleaver shift
    pub shift: u16,
}

impl CoresetCfg {
    /// Number of CCEs the coreset provides: one CCE is 6 REGs, one
    /// 6-PRB group contributes `duration` CCEs
    pub fn nof_cces(&self) -> u16 {
        let groups = self.freq_resources.iter().filter(|&&g| g).count() as u16;
        groups * u16::from(self.duration)
    }
}

/// Search space type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchSpaceType {
    Common,
    UeSpecific,
}

/// Search space configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpaceCfg {
    pub id: u8,
    pub coreset_id: u8,
    pub ss_type: SearchSpaceType,
    /// Candidates per aggregation-level index (levels 1, 2, 4, 8, 16)
    pub nof_candidates: [u8; 5],
}

/// PDCCH configuration of a BWP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdcchCfg {
    pub coresets: Vec<CoresetCfg>,
    pub search_spaces: Vec<SearchSpaceCfg>,
    /// Common search space used for RAR scheduling
    pub ra_search_space_id: u8,
}

impl PdcchCfg {
    pub fn coreset(&self, id: u8) -> Option<&CoresetCfg> {
        self.coresets.iter().find(|cs| cs.id == id)
    }

    pub fn search_space(&self, id: u8) -> Option<&SearchSpaceCfg> {
        self.search_spaces.iter().find(|ss| ss.id == id)
    }
}

/// Direction a TDD slot admits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotDirection {
    Downlink,
    Uplink,
    Bidirectional,
}

/// Per-slot direction mask repeating over the pattern length
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TddCfg {
    pub pattern: Vec<SlotDirection>,
}

impl TddCfg {
    pub fn is_dl(&self, slot_idx: u32) -> bool {
        matches!(
            self.pattern[slot_idx as usize % self.pattern.len()],
            SlotDirection::Downlink | SlotDirection::Bidirectional
        )
    }

    pub fn is_ul(&self, slot_idx: u32) -> bool {
        matches!(
            self.pattern[slot_idx as usize % self.pattern.len()],
            SlotDirection::Uplink | SlotDirection::Bidirectional
        )
    }
}

/// Bandwidth part configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BwpCfg {
    pub bwp_id: u32,
    /// Width in PRBs
    pub rb_width: u32,
    /// First PRB relative to the carrier
    pub start_rb: u32,
    /// Nominal RBG size configuration 1 (vs configuration 2)
    pub rbg_size_config_1: bool,
    pub pdcch: PdcchCfg,
}

/// Cell configuration delivered at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellCfg {
    pub cell_id: CellId,
    pub pci: Pci,
    pub scs: SubcarrierSpacing,
    /// Carrier width in PRBs
    pub nof_prb: u32,
    /// TDD pattern; `None` means FDD (every slot is DL and UL)
    pub tdd: Option<TddCfg>,
    pub bwps: Vec<BwpCfg>,
}

/// Scheduler-wide tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedCfg {
    /// Maximum retransmissions of a DL HARQ process
    pub max_nof_retx: u8,
    /// Slots a pending RAR may wait before it is dropped
    pub rar_window_slots: u32,
}

impl Default for SchedCfg {
    fn default() -> Self {
        Self {
            max_nof_retx: 4,
            rar_window_slots: 10,
        }
    }
}

/// Derived cell/BWP invariants, immutable after construction
#[derive(Debug)]
pub struct BwpParams {
    pub cc: u32,
    pub bwp_id: u32,
    pub cell_id: CellId,
    pub pci: Pci,
    pub scs: SubcarrierSpacing,
    pub bwp: BwpCfg,
    /// Nominal RBG size P
    pub p: u32,
    /// Number of RBGs covering the BWP
    pub n_rbg: u32,
    pub slots_per_frame: u32,
    tdd: Option<TddCfg>,
    rar_cce_table: CceCandidateTable,
}

impl BwpParams {
    pub fn new(cell: &CellCfg, cc: u32, bwp_id: u32) -> Result<Self, SchedError> {
        let bwp = cell
            .bwps
            .iter()
            .find(|b| b.bwp_id == bwp_id)
            .ok_or_else(|| SchedError::InvalidConfig(format!("bwp id={} not found", bwp_id)))?
            .clone();

        if bwp.rb_width == 0 || bwp.start_rb + bwp.rb_width > cell.nof_prb {
            return Err(SchedError::InvalidConfig(format!(
                "bwp [{}, {}) exceeds the {} PRB carrier",
                bwp.start_rb,
                bwp.start_rb + bwp.rb_width,
                cell.nof_prb
            )));
        }
        for cs in &bwp.pdcch.coresets {
            if usize::from(cs.id) >= MAX_NOF_CORESETS {
                return Err(SchedError::InvalidConfig(format!(
                    "coreset id={} out of range",
                    cs.id
                )));
            }
            if cs.nof_cces() == 0 {
                return Err(SchedError::InvalidConfig(format!(
                    "coreset id={} has no CCEs",
                    cs.id
                )));
            }
        }
        for ss in &bwp.pdcch.search_spaces {
            if usize::from(ss.id) >= MAX_NOF_SEARCH_SPACES {
                return Err(SchedError::InvalidConfig(format!(
                    "search space id={} out of range",
                    ss.id
                )));
            }
            if bwp.pdcch.coreset(ss.coreset_id).is_none() {
                return Err(SchedError::InvalidConfig(format!(
                    "search space id={} references missing coreset id={}",
                    ss.id, ss.coreset_id
                )));
            }
        }

        let ra_ss = bwp
            .pdcch
            .search_space(bwp.pdcch.ra_search_space_id)
            .ok_or_else(|| {
                SchedError::InvalidConfig("RAR search space not configured".into())
            })?;
        if ra_ss.ss_type != SearchSpaceType::Common {
            return Err(SchedError::InvalidConfig(
                "RAR search space must be common".into(),
            ));
        }
        let ra_coreset = bwp
            .pdcch
            .coreset(ra_ss.coreset_id)
            .expect("validated above");

        let slots_per_frame = cell.scs.slots_per_frame();
        let rar_cce_table =
            CceCandidateTable::compute(ra_coreset, ra_ss, Rnti(0), slots_per_frame);

        let p = nominal_rbg_size(bwp.rb_width, bwp.rbg_size_config_1);
        let n_rbg = nof_rbgs(bwp.rb_width, bwp.start_rb, p);

        Ok(Self {
            cc,
            bwp_id,
            cell_id: cell.cell_id,
            pci: cell.pci,
            scs: cell.scs,
            p,
            n_rbg,
            slots_per_frame,
            tdd: cell.tdd.clone(),
            rar_cce_table,
            bwp,
        })
    }

    pub fn nof_prb(&self) -> u32 {
        self.bwp.rb_width
    }

    /// True if the slot admits downlink transmissions
    pub fn is_dl(&self, slot_idx: u32) -> bool {
        self.tdd.as_ref().map_or(true, |tdd| tdd.is_dl(slot_idx))
    }

    /// True if the slot admits uplink transmissions
    pub fn is_ul(&self, slot_idx: u32) -> bool {
        self.tdd.as_ref().map_or(true, |tdd| tdd.is_ul(slot_idx))
    }

    pub fn ra_search_space(&self) -> &SearchSpaceCfg {
        self.bwp
            .pdcch
            .search_space(self.bwp.pdcch.ra_search_space_id)
            .expect("validated at construction")
    }

    /// Common candidate positions for RAR scheduling
    pub fn rar_cce_table(&self) -> &CceCandidateTable {
        &self.rar_cce_table
    }
}

/// One PUCCH resource a DL DCI can point the acknowledgement at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PucchResourceCfg {
    pub id: u8,
    pub starting_prb: u32,
}

/// PUCCH configuration of a UE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PucchCfg {
    pub resources: Vec<PucchResourceCfg>,
}

/// UE configuration delivered over the RRC-facing interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UeCfg {
    /// Carrier the UE is attached to
    pub cc: u32,
    pub active_bwp_id: u32,
    /// Maximum HARQ transmissions on the uplink
    pub maxharq_tx: u8,
    /// Dedicated search spaces; must reference coresets of the BWP
    pub search_spaces: Vec<SearchSpaceCfg>,
    pub pucch: PucchCfg,
}

/// PUCCH resource resolved for one pending acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckResource {
    pub rnti: Rnti,
    pub resource_id: u8,
    pub prb: u32,
}

/// Per-user projection of a BWP: the candidate tables of every search
/// space configured for the user, precomputed at (re)configuration
#[derive(Debug)]
pub struct UeBwpCfg {
    rnti: Rnti,
    bwp: Arc<BwpParams>,
    cfg: UeCfg,
    cce_tables: Vec<CceCandidateTable>,
    ss_to_idx: [Option<u8>; MAX_NOF_SEARCH_SPACES],
}

impl UeBwpCfg {
    pub fn new(rnti: Rnti, bwp: Arc<BwpParams>, cfg: UeCfg) -> Result<Self, SchedError> {
        // Every DL grant points its acknowledgement at one of these
        if cfg.pucch.resources.is_empty() {
            return Err(SchedError::InvalidConfig(format!(
                "rnti={} has no PUCCH resources configured",
                rnti
            )));
        }

        let mut cce_tables = Vec::with_capacity(cfg.search_spaces.len());
        let mut ss_to_idx = [None; MAX_NOF_SEARCH_SPACES];

        for ss in &cfg.search_spaces {
            if usize::from(ss.id) >= MAX_NOF_SEARCH_SPACES {
                return Err(SchedError::InvalidConfig(format!(
                    "search space id={} out of range",
                    ss.id
                )));
            }
            let coreset = bwp.bwp.pdcch.coreset(ss.coreset_id).ok_or_else(|| {
                SchedError::InvalidConfig(format!(
                    "ue search space id={} references missing coreset id={}",
                    ss.id, ss.coreset_id
                ))
            })?;
            ss_to_idx[usize::from(ss.id)] = Some(cce_tables.len() as u8);
            cce_tables.push(CceCandidateTable::compute(
                coreset,
                ss,
                rnti,
                bwp.slots_per_frame,
            ));
        }

        Ok(Self {
            rnti,
            bwp,
            cfg,
            cce_tables,
            ss_to_idx,
        })
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    pub fn active_bwp(&self) -> &BwpParams {
        &self.bwp
    }

    pub fn ue_cfg(&self) -> &UeCfg {
        &self.cfg
    }

    pub fn search_space(&self, ss_id: u8) -> Option<&SearchSpaceCfg> {
        self.cfg.search_spaces.iter().find(|ss| ss.id == ss_id)
    }

    /// Candidate positions for one of the user's search spaces
    pub fn cce_table(&self, ss_id: u8) -> Option<&CceCandidateTable> {
        let idx = (*self.ss_to_idx.get(usize::from(ss_id))?)?;
        Some(&self.cce_tables[usize::from(idx)])
    }

    /// Resolve the PUCCH resource a DL DCI points its acknowledgement at
    pub fn pdsch_ack_resource(&self, dci: &DlDci) -> Option<AckResource> {
        let res = self
            .cfg
            .pucch
            .resources
            .get(usize::from(dci.pucch_resource))?;
        Some(AckResource {
            rnti: self.rnti,
            resource_id: res.id,
            prb: res.starting_prb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_cell_cfg, test_ue_cfg};

    #[test]
    fn test_bwp_params_derivation() {
        let cell = test_cell_cfg();
        let params = BwpParams::new(&cell, 0, 0).unwrap();
        assert_eq!(params.p, 4);
        assert_eq!(params.n_rbg, 13);
        assert_eq!(params.slots_per_frame, 10);
        // FDD: every slot is both directions
        assert!(params.is_dl(3) && params.is_ul(3));
    }

    #[test]
    fn test_tdd_direction_mask() {
        let mut cell = test_cell_cfg();
        cell.tdd = Some(TddCfg {
            pattern: vec![
                SlotDirection::Downlink,
                SlotDirection::Downlink,
                SlotDirection::Bidirectional,
                SlotDirection::Uplink,
                SlotDirection::Uplink,
            ],
        });
        let params = BwpParams::new(&cell, 0, 0).unwrap();
        assert!(params.is_dl(0) && !params.is_ul(0));
        assert!(params.is_dl(2) && params.is_ul(2));
        assert!(!params.is_dl(3) && params.is_ul(3));
        // Pattern repeats: slot 5 behaves like slot 0
        assert!(params.is_dl(5) && !params.is_ul(5));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let mut cell = test_cell_cfg();
        cell.bwps[0].rb_width = 60; // exceeds the 52 PRB carrier
        assert!(BwpParams::new(&cell, 0, 0).is_err());

        let mut cell = test_cell_cfg();
        cell.bwps[0].pdcch.ra_search_space_id = 9;
        assert!(BwpParams::new(&cell, 0, 0).is_err());

        let mut cell = test_cell_cfg();
        cell.bwps[0].pdcch.search_spaces[0].coreset_id = 2;
        assert!(BwpParams::new(&cell, 0, 0).is_err());
    }

    #[test]
    fn test_ue_without_pucch_resources_rejected() {
        // A DL grant would have nowhere to place its acknowledgement
        let cell = test_cell_cfg();
        let params = Arc::new(BwpParams::new(&cell, 0, 0).unwrap());
        let mut cfg = test_ue_cfg();
        cfg.pucch.resources.clear();
        assert!(matches!(
            UeBwpCfg::new(Rnti(0x4601), params, cfg),
            Err(SchedError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ue_bwp_cfg_lookup() {
        let cell = test_cell_cfg();
        let params = Arc::new(BwpParams::new(&cell, 0, 0).unwrap());
        let ue = UeBwpCfg::new(Rnti(0x4601), params, test_ue_cfg()).unwrap();

        assert!(ue.cce_table(1).is_some());
        assert!(ue.cce_table(2).is_none());
        assert_eq!(ue.search_space(1).unwrap().coreset_id, 0);
    }
}
