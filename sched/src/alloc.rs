//! Slot Allocator
//!
//! Admission logic for RAR, PDSCH and PUSCH grants. Every operation is
//! atomic: preconditions are tested before any write, and the only write
//! that can still fail afterwards (RAR DCI synthesis) is explicitly
//! rolled back, so a failed call leaves the resource grid untouched.

use crate::carrier::RarInfo;
use crate::cfg::BwpParams;
use crate::dci::{fill_dci_rar, fill_dl_dci_ue_fields, fill_ul_dci_ue_fields, grant_tbs_bytes};
use crate::grid::{BwpResourceGrid, PdcchGrantKind, PdschRecord, PuschRecord};
use crate::policy::AllocPolicy;
use crate::rb::{PrbGrant, PrbInterval, RbgBitmap};
use crate::ue::SlotUe;
use crate::{AllocError, MAX_GRANTS, MSG3_DELAY_SLOTS};
use common::{ceil_div, SlotPoint};
use std::sync::Arc;
use tracing::{debug, warn};

/// PRBs a single Msg3 occupies
const MSG3_NOF_PRBS: u32 = 3;

/// Transient allocator over a resource grid for one PDCCH slot
pub struct SlotAllocator<'a> {
    cfg: Arc<BwpParams>,
    grid: &'a mut BwpResourceGrid,
    pdcch_slot: SlotPoint,
    policy: &'a AllocPolicy,
    max_nof_retx: u8,
}

impl<'a> SlotAllocator<'a> {
    pub fn new(
        grid: &'a mut BwpResourceGrid,
        pdcch_slot: SlotPoint,
        policy: &'a AllocPolicy,
        max_nof_retx: u8,
    ) -> Self {
        Self {
            cfg: grid.cfg().clone(),
            grid,
            pdcch_slot,
            policy,
            max_nof_retx,
        }
    }

    pub fn pdcch_slot(&self) -> SlotPoint {
        self.pdcch_slot
    }

    /// Schedule a Msg2 DL allocation now and reserve PUSCH resources for
    /// the corresponding Msg3 four slots later. Returns the reserved
    /// Msg3 PRBs.
    pub fn alloc_rar(
        &mut self,
        aggr_idx: u8,
        rar: &RarInfo,
        interv: PrbInterval,
        nof_grants: u32,
    ) -> Result<PrbInterval, AllocError> {
        let msg3_slot = self.pdcch_slot + MSG3_DELAY_SLOTS;

        {
            let pdcch_grid = &self.grid[self.pdcch_slot];
            if pdcch_grid.dl_pdcchs.len() >= MAX_GRANTS {
                warn!("maximum number of DL allocations reached in slot {}", self.pdcch_slot);
                return Err(AllocError::NoGrantSpace);
            }
            if pdcch_grid.dl_prbs.collides_interval(interv) {
                debug!("RAR interval {} collides with an allocation previously made", interv);
                return Err(AllocError::SchCollision);
            }
        }

        // Reserve room for the Msg3 transmissions
        let total_ul_nof_prbs = MSG3_NOF_PRBS * nof_grants;
        let total_ul_nof_rbgs = ceil_div(total_ul_nof_prbs, self.cfg.p);
        let msg3_prbs = self.grid[msg3_slot]
            .ul_prbs()
            .prbs()
            .first_free_run(total_ul_nof_rbgs);
        if msg3_prbs.length() < total_ul_nof_rbgs {
            debug!("no space in PUSCH for Msg3 at slot {}", msg3_slot);
            return Err(AllocError::SchCollision);
        }

        // Find a PDCCH position in the RAR common search space
        let ra_ss = self.cfg.ra_search_space();
        let coreset_id = ra_ss.coreset_id;
        let ss_id = ra_ss.id;
        if !self.grid[self.pdcch_slot].alloc_dci(
            coreset_id,
            PdcchGrantKind::Rar,
            aggr_idx,
            ss_id,
            rar.ra_rnti(),
            None,
        ) {
            debug!("no space in PDCCH for RAR at slot {}", self.pdcch_slot);
            return Err(AllocError::NoCchSpace);
        }

        let pdcch_grid = &mut self.grid[self.pdcch_slot];
        let dci = pdcch_grid
            .dl_pdcchs
            .last_mut()
            .expect("DCI list cannot be empty after allocation");
        if !fill_dci_rar(interv, nof_grants, &self.cfg, dci) {
            // Cancel the ongoing PDCCH allocation
            pdcch_grid.rem_last_dci(coreset_id);
            return Err(AllocError::InvalidCoderate);
        }

        pdcch_grid.dl_prbs.add_interval(interv);
        self.grid[msg3_slot].ul_prbs.add_interval(msg3_prbs);

        Ok(msg3_prbs)
    }

    /// Allocate a PDSCH grant for a UE, placing the DCI in this
    /// allocator's PDCCH slot and the acknowledgement in the UE's UCI
    /// slot.
    pub fn alloc_pdsch(&mut self, ue: &mut SlotUe<'_>, dl_grant: &PrbGrant) -> Result<(), AllocError> {
        if ue.cfg.active_bwp().bwp_id != self.cfg.bwp_id {
            warn!(
                "PDSCH allocation for rnti={} in inactive BWP id={}",
                ue.rnti,
                ue.cfg.active_bwp().bwp_id
            );
            return Err(AllocError::NoRntiOpportunity);
        }
        if ue.h_dl.is_none() {
            warn!("PDSCH allocation for rnti={} with no available HARQs", ue.rnti);
            return Err(AllocError::NoRntiOpportunity);
        }
        {
            let pdsch_grid = &self.grid[ue.pdsch_slot];
            if !pdsch_grid.is_dl {
                warn!(
                    "PDSCH allocation in TDD non-DL slot index={}",
                    pdsch_grid.slot_idx()
                );
                return Err(AllocError::NoSchSpace);
            }
            if pdsch_grid.dl_pdcchs.len() >= MAX_GRANTS {
                warn!("maximum number of DL allocations reached in slot {}", ue.pdsch_slot);
                return Err(AllocError::NoGrantSpace);
            }
        }
        // Collision is checked against the PDCCH slot's DL occupancy, as
        // the slot the DCI lands in. Under same-slot scheduling the PDCCH
        // and PDSCH slots coincide; with cross-slot timings this leaves
        // the PDSCH slot unchecked (known limitation).
        if self.grid[ue.pdcch_slot].dl_prbs.collides(dl_grant) {
            return Err(AllocError::SchCollision);
        }

        let aggr_idx = self.policy.aggr_idx;
        let ss_id = self.policy.ss_id;
        let coreset_id = match ue.cfg.search_space(ss_id) {
            Some(ss) => ss.coreset_id,
            None => {
                warn!("rnti={} has no search space id={}", ue.rnti, ss_id);
                return Err(AllocError::NoCchSpace);
            }
        };
        if !self.grid[ue.pdcch_slot].alloc_dci(
            coreset_id,
            PdcchGrantKind::DlData,
            aggr_idx,
            ss_id,
            ue.rnti,
            Some(&ue.cfg),
        ) {
            return Err(AllocError::NoCchSpace);
        }

        // Bind the HARQ process
        let (mcs, tbs) = self
            .policy
            .rate
            .dl_mcs_tbs(ue.dl_cqi, dl_grant.nof_prbs(self.cfg.p));
        {
            let harq = ue.h_dl.as_mut().expect("checked above");
            if harq.empty() {
                let ok = harq.new_tx(
                    ue.pdsch_slot,
                    ue.uci_slot,
                    dl_grant.clone(),
                    mcs,
                    tbs,
                    self.max_nof_retx,
                );
                assert!(ok, "failed to allocate DL HARQ");
            } else {
                let ok = harq.new_retx(ue.pdsch_slot, ue.uci_slot, dl_grant.clone());
                assert!(ok, "failed to allocate DL HARQ retx");
            }
        }

        // Generate the PDCCH content
        let dai = self.grid[ue.uci_slot]
            .pending_acks
            .iter()
            .filter(|ack| ack.rnti == ue.rnti)
            .count() as u8
            % 4;
        let harq_view = ue.h_dl.as_deref().expect("checked above");
        let dci = {
            let pdcch_grid = &mut self.grid[ue.pdcch_slot];
            let dci = pdcch_grid
                .dl_pdcchs
                .last_mut()
                .expect("DCI list cannot be empty after allocation");
            fill_dl_dci_ue_fields(ue.rnti, dl_grant, harq_view, &self.cfg, dci);
            dci.pucch_resource = 0;
            dci.dai = dai;
            dci.clone()
        };

        // Generate the PUCCH opportunity
        let ack_resource = ue
            .cfg
            .pdsch_ack_resource(&dci)
            .expect("error getting ack resource");
        self.grid[ue.uci_slot].pending_acks.push(ack_resource);

        // Generate the PDSCH
        let conv_tbs = grant_tbs_bytes(dl_grant.nof_prbs(self.cfg.p), dci.mcs);
        assert!(conv_tbs > 0, "error converting DCI to grant");
        let softbuffer = {
            let harq = ue.h_dl.as_mut().expect("checked above");
            if harq.nof_retx() == 0 {
                harq.set_tbs(conv_tbs);
            } else {
                assert_eq!(conv_tbs, harq.tbs(), "TBS did not remain constant in retx");
            }
            harq.softbuffer()
        };
        let pdsch_grid = &mut self.grid[ue.pdsch_slot];
        pdsch_grid.dl_prbs.add_grant(dl_grant);
        pdsch_grid.pdschs.push(PdschRecord {
            rnti: ue.rnti,
            grant: dl_grant.clone(),
            mcs: dci.mcs,
            tbs: conv_tbs,
            softbuffer,
        });

        Ok(())
    }

    /// Allocate a PUSCH grant for a UE: UL DCI in this allocator's PDCCH
    /// slot, data resources in the UE's PUSCH slot.
    pub fn alloc_pusch(&mut self, ue: &mut SlotUe<'_>, ul_mask: &RbgBitmap) -> Result<(), AllocError> {
        if ue.h_ul.is_none() {
            warn!("PUSCH allocation for rnti={} with no available HARQs", ue.rnti);
            return Err(AllocError::NoRntiOpportunity);
        }
        if !self.grid[ue.pusch_slot].is_ul {
            warn!(
                "PUSCH allocation in TDD non-UL slot index={}",
                self.grid[ue.pusch_slot].slot_idx()
            );
            return Err(AllocError::NoSchSpace);
        }
        if self.grid[ue.pdcch_slot].ul_pdcchs.len() >= MAX_GRANTS {
            warn!("maximum number of UL allocations reached in slot {}", ue.pdcch_slot);
            return Err(AllocError::NoGrantSpace);
        }
        if self.grid[ue.pusch_slot].ul_prbs.rbgs().intersects(ul_mask) {
            return Err(AllocError::SchCollision);
        }

        let aggr_idx = self.policy.aggr_idx;
        let ss_id = self.policy.ss_id;
        let coreset_id = match ue.cfg.search_space(ss_id) {
            Some(ss) => ss.coreset_id,
            None => {
                warn!("rnti={} has no search space id={}", ue.rnti, ss_id);
                return Err(AllocError::NoCchSpace);
            }
        };
        if !self.grid[ue.pdcch_slot].alloc_dci(
            coreset_id,
            PdcchGrantKind::UlData,
            aggr_idx,
            ss_id,
            ue.rnti,
            Some(&ue.cfg),
        ) {
            return Err(AllocError::NoCchSpace);
        }

        let (mcs, tbs) = self
            .policy
            .rate
            .ul_mcs_tbs(0.0, ul_mask.count() * self.cfg.p);
        {
            let harq = ue.h_ul.as_mut().expect("checked above");
            let grant = PrbGrant::Rbgs(ul_mask.clone());
            if harq.empty() {
                let ok = harq.new_tx(
                    ue.pusch_slot,
                    ue.pusch_slot,
                    grant,
                    mcs,
                    tbs,
                    ue.maxharq_tx,
                );
                assert!(ok, "failed to allocate UL HARQ");
            } else {
                assert!(
                    harq.new_retx(ue.pusch_slot, ue.pusch_slot, grant),
                    "failed to allocate UL HARQ retx"
                );
            }
        }

        let harq_view = ue.h_ul.as_deref().expect("checked above");
        {
            let pdcch_grid = &mut self.grid[ue.pdcch_slot];
            let dci = pdcch_grid
                .ul_pdcchs
                .last_mut()
                .expect("DCI list cannot be empty after allocation");
            fill_ul_dci_ue_fields(ue.rnti, ul_mask, harq_view, &self.cfg, dci);
        }

        let (pid, h_mcs, h_tbs) = (harq_view.pid(), harq_view.mcs(), harq_view.tbs());
        let pusch_grid = &mut self.grid[ue.pusch_slot];
        pusch_grid.ul_prbs.add_rbg_mask(ul_mask);
        pusch_grid.puschs.push(PuschRecord {
            rnti: ue.rnti,
            mask: ul_mask.clone(),
            mcs: h_mcs,
            tbs: h_tbs,
            pid,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{SlotDirection, TddCfg};
    use crate::grid::BwpResourceGrid;
    use crate::test_support::{test_bwp_params, test_cell_cfg, test_ue_cfg};
    use crate::ue::Ue;
    use common::Rnti;

    fn slot(n: u32) -> SlotPoint {
        SlotPoint::new(0, 0, 0) + n
    }

    fn rar_info(t: SlotPoint) -> RarInfo {
        RarInfo {
            preamble_idx: 2,
            ta_cmd: 31,
            temp_crnti: Rnti(0x4601),
            msg3_size: 7,
            prach_slot: t,
        }
    }

    fn make_ue(rnti: Rnti) -> Ue {
        Ue::new(rnti, test_ue_cfg(), test_bwp_params()).unwrap()
    }

    #[test]
    fn test_rar_reserves_msg2_and_msg3() {
        let mut grid = BwpResourceGrid::new(test_bwp_params());
        let policy = AllocPolicy::default();
        let t = slot(0);

        let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
        let msg3 = alloc
            .alloc_rar(2, &rar_info(t), PrbInterval::new(0, 4), 1)
            .unwrap();

        // One Msg3 of 3 PRBs with P=4 asks for one RBG worth of run
        assert_eq!(msg3, PrbInterval::new(0, 1));
        assert_eq!(grid[t].dl_prbs().prbs().count(), 4);
        for prb in 0..4 {
            assert!(grid[t].dl_prbs().prbs().test(prb));
        }
        assert_eq!(grid[t].dl_pdcchs().len(), 1);
        assert_eq!(grid[t].dl_pdcchs()[0].ctx.rnti, rar_info(t).ra_rnti());
        assert!(grid[t + 4].ul_prbs().rbgs().test(0));
        assert_eq!(grid[t + 4].ul_prbs().rbgs().count(), 1);
    }

    #[test]
    fn test_pdsch_collision_leaves_grid_untouched() {
        let mut grid = BwpResourceGrid::new(test_bwp_params());
        let policy = AllocPolicy::default();
        let t = slot(0);
        let mut ue = make_ue(Rnti(0x4601));

        let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
        alloc
            .alloc_rar(2, &rar_info(t), PrbInterval::new(0, 4), 1)
            .unwrap();

        let dl_prbs_before = grid[t].dl_prbs().clone();
        let dcis_before = grid[t].dl_pdcchs().to_vec();
        let cces_before = grid[t].coreset_region(0).unwrap().used_cces().count();
        let acks_before = grid[t + 4].pending_acks().len();
        let msg3_before = grid[t + 4].ul_prbs().clone();

        let mut slot_ue = ue.make_slot_ue(t);
        let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
        let err = alloc
            .alloc_pdsch(&mut slot_ue, &PrbGrant::Interval(PrbInterval::new(0, 4)))
            .unwrap_err();
        assert_eq!(err, AllocError::SchCollision);

        // The grid is bitwise identical to its state at entry
        assert_eq!(grid[t].dl_prbs(), &dl_prbs_before);
        assert_eq!(grid[t].dl_pdcchs(), &dcis_before[..]);
        assert_eq!(
            grid[t].coreset_region(0).unwrap().used_cces().count(),
            cces_before
        );
        assert_eq!(grid[t + 4].pending_acks().len(), acks_before);
        assert_eq!(grid[t + 4].ul_prbs(), &msg3_before);
        // The HARQ pool was not consumed either
        drop(slot_ue);
        assert!(ue.make_slot_ue(t).h_dl.unwrap().empty());
    }

    #[test]
    fn test_harq_retx_keeps_tbs() {
        let mut grid = BwpResourceGrid::new(test_bwp_params());
        let policy = AllocPolicy::default();
        let t0 = slot(0);
        let mut ue = make_ue(Rnti(0x4601));
        let grant = PrbGrant::Interval(PrbInterval::new(8, 12));

        let tbs = {
            let mut slot_ue = ue.make_slot_ue(t0);
            let mut alloc = SlotAllocator::new(&mut grid, t0, &policy, 4);
            alloc.alloc_pdsch(&mut slot_ue, &grant).unwrap();
            let h = slot_ue.h_dl.as_ref().unwrap();
            assert_eq!(h.nof_retx(), 0);
            h.tbs()
        };
        assert!(tbs > 0);
        let ndi_first = grid[t0].dl_pdcchs()[0].ndi;

        // Negative acknowledgement at the UCI slot
        assert!(ue.dl_ack_info(t0 + 4, 0, false).is_none());

        // Retransmission four slots later with the same grant
        let t1 = t0 + 4;
        let mut slot_ue = ue.make_slot_ue(t1);
        assert!(slot_ue.dl_retx_pending());
        let mut alloc = SlotAllocator::new(&mut grid, t1, &policy, 4);
        alloc.alloc_pdsch(&mut slot_ue, &grant).unwrap();

        let h = slot_ue.h_dl.as_ref().unwrap();
        assert_eq!(h.nof_retx(), 1);
        assert_eq!(h.tbs(), tbs);

        let retx_dci = &grid[t1].dl_pdcchs()[0];
        // NDI is not toggled on a retransmission
        assert_eq!(retx_dci.ndi, ndi_first);
        assert_eq!(retx_dci.rv, 2);
    }

    #[test]
    fn test_pdcch_exhaustion_leaves_harq_untouched() {
        // A 6 CCE coreset and a user search space that only exposes
        // aggregation level 8: no candidate can ever fit
        let mut cell = test_cell_cfg();
        cell.bwps[0].pdcch.coresets[0].freq_resources = vec![true; 6];
        let mut ue_cfg = test_ue_cfg();
        ue_cfg.search_spaces[0].nof_candidates = [0, 0, 0, 1, 0];

        let params = std::sync::Arc::new(crate::cfg::BwpParams::new(&cell, 0, 0).unwrap());
        let mut grid = BwpResourceGrid::new(params.clone());
        let policy = AllocPolicy::default();
        let mut ue = Ue::new(Rnti(0x4601), ue_cfg, params).unwrap();
        let t = slot(0);

        let mut slot_ue = ue.make_slot_ue(t);
        let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
        let err = alloc
            .alloc_pdsch(&mut slot_ue, &PrbGrant::Interval(PrbInterval::new(0, 4)))
            .unwrap_err();
        assert_eq!(err, AllocError::NoCchSpace);

        assert!(slot_ue.h_dl.as_ref().unwrap().empty());
        assert!(grid[t].dl_pdcchs().is_empty());
        assert!(!grid[t].dl_prbs().prbs().any());
        assert!(grid[t + 4].pending_acks().is_empty());
    }

    #[test]
    fn test_dai_accumulates_per_uci_slot() {
        let mut grid = BwpResourceGrid::new(test_bwp_params());
        let policy = AllocPolicy::default();
        let t = slot(0);
        let mut ue = make_ue(Rnti(0x4601));

        {
            let mut slot_ue = ue.make_slot_ue(t);
            let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
            alloc
                .alloc_pdsch(&mut slot_ue, &PrbGrant::Interval(PrbInterval::new(0, 4)))
                .unwrap();
        }
        {
            let mut slot_ue = ue.make_slot_ue(t);
            let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
            alloc
                .alloc_pdsch(&mut slot_ue, &PrbGrant::Interval(PrbInterval::new(4, 8)))
                .unwrap();
        }

        assert_eq!(grid[t].dl_pdcchs()[0].dai, 0);
        assert_eq!(grid[t].dl_pdcchs()[1].dai, 1);
        assert_eq!(grid[t + 4].pending_acks().len(), 2);
        // Two different HARQ processes carry the two transmissions
        assert_ne!(grid[t].dl_pdcchs()[0].pid, grid[t].dl_pdcchs()[1].pid);
    }

    #[test]
    fn test_full_dci_list_rejected_first() {
        let mut grid = BwpResourceGrid::new(test_bwp_params());
        let policy = AllocPolicy::default();
        let t = slot(0);
        let mut ue = make_ue(Rnti(0x4601));

        // Fill the DL DCI list to capacity without touching the CCEs
        let ctx = crate::dci::DciCtx {
            rnti: Rnti(0x0001),
            rnti_type: crate::dci::RntiType::C,
            format: crate::dci::DciFormat::Dl10,
            coreset_id: 0,
            ss_id: 1,
            location: crate::dci::CceLocation { aggr_idx: 0, ncce: 0 },
        };
        for _ in 0..MAX_GRANTS {
            grid[t].dl_pdcchs.push(crate::dci::DlDci::new(ctx));
        }

        let mut slot_ue = ue.make_slot_ue(t);
        let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
        let err = alloc
            .alloc_pdsch(&mut slot_ue, &PrbGrant::Interval(PrbInterval::new(0, 4)))
            .unwrap_err();
        assert_eq!(err, AllocError::NoGrantSpace);

        // Nothing else was touched
        assert!(!grid[t].coreset_region(0).unwrap().used_cces().any());
        assert!(!grid[t].dl_prbs().prbs().any());
        assert!(slot_ue.h_dl.as_ref().unwrap().empty());
    }

    #[test]
    fn test_pdsch_rejected_on_ul_only_slot() {
        let mut cell = test_cell_cfg();
        cell.tdd = Some(TddCfg {
            pattern: vec![SlotDirection::Uplink],
        });
        let params = std::sync::Arc::new(crate::cfg::BwpParams::new(&cell, 0, 0).unwrap());
        let mut grid = BwpResourceGrid::new(params.clone());
        let policy = AllocPolicy::default();
        let mut ue = Ue::new(Rnti(0x4601), test_ue_cfg(), params).unwrap();
        let t = slot(0);

        let mut slot_ue = ue.make_slot_ue(t);
        let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
        let err = alloc
            .alloc_pdsch(&mut slot_ue, &PrbGrant::Interval(PrbInterval::new(0, 4)))
            .unwrap_err();
        assert_eq!(err, AllocError::NoSchSpace);

        // The mirrored check holds for PUSCH on a DL-only pattern
        let mut cell = test_cell_cfg();
        cell.tdd = Some(TddCfg {
            pattern: vec![SlotDirection::Downlink],
        });
        let params = std::sync::Arc::new(crate::cfg::BwpParams::new(&cell, 0, 0).unwrap());
        let mut grid = BwpResourceGrid::new(params.clone());
        let mut ue = Ue::new(Rnti(0x4602), test_ue_cfg(), params.clone()).unwrap();
        let mut slot_ue = ue.make_slot_ue(t);
        let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
        let mask = RbgBitmap::new(params.n_rbg);
        let err = alloc.alloc_pusch(&mut slot_ue, &mask).unwrap_err();
        assert_eq!(err, AllocError::NoSchSpace);
    }

    #[test]
    fn test_rar_coderate_failure_rolls_back_pdcch() {
        let mut grid = BwpResourceGrid::new(test_bwp_params());
        let policy = AllocPolicy::default();
        let t = slot(0);

        // Five grants cannot fit a single PRB at any usable code rate,
        // but every earlier precondition passes
        let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
        let err = alloc
            .alloc_rar(2, &rar_info(t), PrbInterval::new(0, 1), 5)
            .unwrap_err();
        assert_eq!(err, AllocError::InvalidCoderate);

        assert!(grid[t].dl_pdcchs().is_empty());
        assert!(!grid[t].coreset_region(0).unwrap().used_cces().any());
        assert!(!grid[t].dl_prbs().prbs().any());
        assert!(!grid[t + 4].ul_prbs().prbs().any());
    }

    #[test]
    fn test_pusch_round_trip() {
        let mut grid = BwpResourceGrid::new(test_bwp_params());
        let policy = AllocPolicy::default();
        let t = slot(0);
        let mut ue = make_ue(Rnti(0x4601));

        let mut mask = RbgBitmap::new(13);
        mask.fill(0, 2);
        {
            let mut slot_ue = ue.make_slot_ue(t);
            let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
            alloc.alloc_pusch(&mut slot_ue, &mask).unwrap();
        }
        assert_eq!(grid[t].ul_pdcchs().len(), 1);
        assert_eq!(grid[t + 4].puschs().len(), 1);
        assert!(grid[t + 4].ul_prbs().rbgs().test(0));

        // The same mask collides on the second attempt
        let mut slot_ue = ue.make_slot_ue(t);
        let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
        let err = alloc.alloc_pusch(&mut slot_ue, &mask).unwrap_err();
        assert_eq!(err, AllocError::SchCollision);
    }

    #[test]
    fn test_inactive_bwp_rejected() {
        let mut grid = BwpResourceGrid::new(test_bwp_params());
        let policy = AllocPolicy::default();
        let t = slot(0);

        // A user whose active BWP differs from the grid's BWP
        let mut cell = test_cell_cfg();
        cell.bwps[0].bwp_id = 1;
        let other_params =
            std::sync::Arc::new(crate::cfg::BwpParams::new(&cell, 0, 1).unwrap());
        let mut ue_cfg = test_ue_cfg();
        ue_cfg.active_bwp_id = 1;
        let mut ue = Ue::new(Rnti(0x4601), ue_cfg, other_params).unwrap();

        let mut slot_ue = ue.make_slot_ue(t);
        let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
        let err = alloc
            .alloc_pdsch(&mut slot_ue, &PrbGrant::Interval(PrbInterval::new(0, 4)))
            .unwrap_err();
        assert_eq!(err, AllocError::NoRntiOpportunity);
    }

    #[test]
    fn test_no_harq_rejected() {
        let mut grid = BwpResourceGrid::new(test_bwp_params());
        let policy = AllocPolicy::default();
        let t = slot(0);
        let mut ue = make_ue(Rnti(0x4601));

        // Exhaust the DL HARQ pool
        for n in 0..crate::SCHED_NR_NOF_HARQS as u32 {
            let mut slot_ue = ue.make_slot_ue(t);
            let h = slot_ue.h_dl.as_mut().unwrap();
            assert!(h.new_tx(
                t,
                t + 4 + n,
                PrbGrant::Interval(PrbInterval::new(0, 1)),
                20,
                100,
                4
            ));
        }

        let mut slot_ue = ue.make_slot_ue(t);
        assert!(slot_ue.h_dl.is_none());
        let mut alloc = SlotAllocator::new(&mut grid, t, &policy, 4);
        let err = alloc
            .alloc_pdsch(&mut slot_ue, &PrbGrant::Interval(PrbInterval::new(0, 4)))
            .unwrap_err();
        assert_eq!(err, AllocError::NoRntiOpportunity);
    }
}
