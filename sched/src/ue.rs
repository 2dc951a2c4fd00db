//! UE State
//!
//! Per-user scheduler state: the BWP projection with precomputed PDCCH
//! candidates, one HARQ entity per direction, logical-channel queues and
//! the soft channel-state reports fed in from the PHY. `SlotUe` is the
//! transient per-slot view the allocator works on; it borrows the HARQ
//! process chosen for this slot and carries the timing relations
//! (PDCCH, PDSCH, UCI and PUSCH slots).

use crate::cfg::{BwpParams, UeBwpCfg, UeCfg};
use crate::harq::{HarqEntity, HarqProc};
use crate::{SchedError, PUSCH_DELAY_SLOTS, UCI_DELAY_SLOTS};
use common::{LcgId, LcId, Rnti, SlotPoint};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Direction a bearer carries data in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BearerDirection {
    Dl,
    Ul,
    Both,
}

/// Logical-channel (bearer) configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerCfg {
    pub direction: BearerDirection,
    /// Logical channel group for UL buffer status reporting
    pub group: LcgId,
}

/// One configured bearer with its DL queue state
#[derive(Debug, Clone)]
struct Bearer {
    cfg: BearerCfg,
    dl_tx_queue: u32,
    dl_retx_queue: u32,
}

/// Scheduler-side state of one attached terminal
#[derive(Debug)]
pub struct Ue {
    rnti: Rnti,
    bwp_cfg: Arc<UeBwpCfg>,
    dl_harqs: HarqEntity,
    ul_harqs: HarqEntity,
    bearers: Vec<Option<Bearer>>,
    ul_bsr: [u32; LcgId::MAX_NOF_LCGS],
    dl_cqi: u8,
    dl_ri: u8,
    dl_pmi: u8,
    ul_snr_db: f32,
    phr_db: i32,
    sr_pending: bool,
}

impl Ue {
    pub fn new(rnti: Rnti, cfg: UeCfg, bwp: Arc<BwpParams>) -> Result<Self, SchedError> {
        let bwp_cfg = Arc::new(UeBwpCfg::new(rnti, bwp, cfg)?);
        Ok(Self {
            rnti,
            bwp_cfg,
            dl_harqs: HarqEntity::new(),
            ul_harqs: HarqEntity::new(),
            bearers: vec![None; LcId::MAX_NOF_LCIDS],
            ul_bsr: [0; LcgId::MAX_NOF_LCGS],
            dl_cqi: 1,
            dl_ri: 0,
            dl_pmi: 0,
            ul_snr_db: 0.0,
            phr_db: 0,
            sr_pending: false,
        })
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    pub fn bwp_cfg(&self) -> &Arc<UeBwpCfg> {
        &self.bwp_cfg
    }

    /// Reconfigure the user; the BWP projection and its candidate tables
    /// are rebuilt, HARQ and buffer state survive
    pub fn set_cfg(&mut self, cfg: UeCfg, bwp: Arc<BwpParams>) -> Result<(), SchedError> {
        self.bwp_cfg = Arc::new(UeBwpCfg::new(self.rnti, bwp, cfg)?);
        Ok(())
    }

    pub fn set_bearer_cfg(&mut self, lcid: LcId, cfg: BearerCfg) -> Result<(), SchedError> {
        if !lcid.is_valid() || !cfg.group.is_valid() {
            return Err(SchedError::InvalidConfig(format!(
                "invalid bearer lcid={} lcg={}",
                lcid.0, cfg.group.0
            )));
        }
        let slot = &mut self.bearers[usize::from(lcid.0)];
        match slot {
            Some(bearer) => bearer.cfg = cfg,
            None => {
                *slot = Some(Bearer {
                    cfg,
                    dl_tx_queue: 0,
                    dl_retx_queue: 0,
                })
            }
        }
        Ok(())
    }

    pub fn rem_bearer(&mut self, lcid: LcId) {
        if lcid.is_valid() {
            self.bearers[usize::from(lcid.0)] = None;
        }
    }

    /// RLC queue update for one DL logical channel
    pub fn dl_buffer_state(
        &mut self,
        lcid: LcId,
        tx_queue: u32,
        retx_queue: u32,
    ) -> Result<(), SchedError> {
        let bearer = self
            .bearers
            .get_mut(usize::from(lcid.0))
            .and_then(|b| b.as_mut())
            .ok_or_else(|| {
                SchedError::InvalidConfig(format!("bearer lcid={} not configured", lcid.0))
            })?;
        bearer.dl_tx_queue = tx_queue;
        bearer.dl_retx_queue = retx_queue;
        Ok(())
    }

    /// Buffer status report for one logical channel group
    pub fn ul_bsr(&mut self, lcg: LcgId, bsr: u32) -> Result<(), SchedError> {
        if !lcg.is_valid() {
            return Err(SchedError::InvalidConfig(format!(
                "invalid lcg={}",
                lcg.0
            )));
        }
        self.ul_bsr[usize::from(lcg.0)] = bsr;
        Ok(())
    }

    /// Add bytes to the group of one UL logical channel
    pub fn ul_buffer_add(&mut self, lcid: LcId, bytes: u32) -> Result<(), SchedError> {
        let bearer = self
            .bearers
            .get(usize::from(lcid.0))
            .and_then(|b| b.as_ref())
            .ok_or_else(|| {
                SchedError::InvalidConfig(format!("bearer lcid={} not configured", lcid.0))
            })?;
        self.ul_bsr[usize::from(bearer.cfg.group.0)] += bytes;
        Ok(())
    }

    /// Bytes waiting in DL-capable bearers
    pub fn pending_dl_bytes(&self) -> u32 {
        self.bearers
            .iter()
            .flatten()
            .filter(|b| matches!(b.cfg.direction, BearerDirection::Dl | BearerDirection::Both))
            .map(|b| b.dl_tx_queue + b.dl_retx_queue)
            .sum()
    }

    /// Bytes reported pending across all logical channel groups
    pub fn pending_ul_bytes(&self) -> u32 {
        self.ul_bsr.iter().sum()
    }

    pub fn set_sr(&mut self) {
        self.sr_pending = true;
    }

    pub fn clear_sr(&mut self) {
        self.sr_pending = false;
    }

    pub fn sr_pending(&self) -> bool {
        self.sr_pending
    }

    pub fn set_dl_cqi(&mut self, cqi: u8) {
        self.dl_cqi = cqi;
    }

    pub fn set_dl_ri(&mut self, ri: u8) {
        self.dl_ri = ri;
    }

    pub fn set_dl_pmi(&mut self, pmi: u8) {
        self.dl_pmi = pmi;
    }

    pub fn set_ul_snr(&mut self, snr_db: f32) {
        self.ul_snr_db = snr_db;
    }

    pub fn set_ul_phr(&mut self, phr_db: i32) {
        self.phr_db = phr_db;
    }

    pub fn dl_cqi(&self) -> u8 {
        self.dl_cqi
    }

    /// DL acknowledgement feedback; returns the TBS on a positive ack
    pub fn dl_ack_info(&mut self, slot_rx: SlotPoint, tb_idx: u8, ok: bool) -> Option<u32> {
        self.dl_harqs.ack_info(slot_rx, tb_idx, ok)
    }

    /// UL CRC feedback for the PUSCH received at `slot_rx`
    pub fn ul_crc_info(&mut self, slot_rx: SlotPoint, crc: bool) -> Option<u32> {
        self.ul_harqs.ack_info(slot_rx, 0, crc)
    }

    pub fn reset_harqs(&mut self) {
        self.dl_harqs.reset();
        self.ul_harqs.reset();
    }

    /// Build the per-slot view for a PDCCH slot. Picks the HARQ process
    /// per direction: a pending retransmission first, otherwise the first
    /// empty process; `None` when the pool offers neither.
    pub fn make_slot_ue(&mut self, pdcch_slot: SlotPoint) -> SlotUe<'_> {
        let pdsch_slot = pdcch_slot;
        let uci_slot = pdcch_slot + UCI_DELAY_SLOTS;
        let pusch_slot = pdcch_slot + PUSCH_DELAY_SLOTS;

        let dl_pending = self.pending_dl_bytes();
        let ul_pending = self.pending_ul_bytes();
        let dl_cqi = self.dl_cqi;
        let maxharq_tx = self.bwp_cfg.ue_cfg().maxharq_tx;
        let cfg = self.bwp_cfg.clone();

        let h_dl = if self.dl_harqs.has_pending_retx(pdcch_slot) {
            self.dl_harqs.find_retx(pdcch_slot)
        } else {
            self.dl_harqs.find_empty()
        };
        let h_ul = if self.ul_harqs.has_pending_retx(pdcch_slot) {
            self.ul_harqs.find_retx(pdcch_slot)
        } else {
            self.ul_harqs.find_empty()
        };
        if h_dl.is_none() {
            debug!("rnti={} has no DL HARQ available", self.rnti);
        }

        SlotUe {
            rnti: self.rnti,
            cfg,
            pdcch_slot,
            pdsch_slot,
            uci_slot,
            pusch_slot,
            h_dl,
            h_ul,
            dl_pending_bytes: dl_pending,
            ul_pending_bytes: ul_pending,
            dl_cqi,
            maxharq_tx,
        }
    }
}

/// Transient per-slot projection of a UE handed to the allocator
pub struct SlotUe<'a> {
    pub rnti: Rnti,
    pub cfg: Arc<UeBwpCfg>,
    /// Slot the DCI is placed in
    pub pdcch_slot: SlotPoint,
    /// Slot the PDSCH is transmitted in
    pub pdsch_slot: SlotPoint,
    /// Slot the DL acknowledgement is expected in
    pub uci_slot: SlotPoint,
    /// Slot an UL grant would be transmitted in
    pub pusch_slot: SlotPoint,
    pub h_dl: Option<&'a mut HarqProc>,
    pub h_ul: Option<&'a mut HarqProc>,
    pub dl_pending_bytes: u32,
    pub ul_pending_bytes: u32,
    pub dl_cqi: u8,
    pub maxharq_tx: u8,
}

impl SlotUe<'_> {
    /// True if the chosen DL process is a pending retransmission
    pub fn dl_retx_pending(&self) -> bool {
        self.h_dl.as_ref().map_or(false, |h| !h.empty())
    }

    /// True if the chosen UL process is a pending retransmission
    pub fn ul_retx_pending(&self) -> bool {
        self.h_ul.as_ref().map_or(false, |h| !h.empty())
    }
}

/// Log a uniform warning for feedback that references an unknown RNTI
pub(crate) fn unknown_rnti(rnti: Rnti, op: &str) -> SchedError {
    warn!("user rnti={} not found, dropping {}", rnti, op);
    SchedError::UnknownRnti(rnti)
}
