//! Per-Carrier Scheduler
//!
//! Owns the BWP resource grid of one cell and turns a slot tick into a
//! scheduling decision: drains the pending random-access responses that
//! are still inside their window, then runs a round-robin data pass over
//! the attached UEs driven by their buffer state. The decision for a
//! slot is generated exactly once, projected into result buffers for the
//! PHY, and the slot grid is reset for ring reuse.

use crate::alloc::SlotAllocator;
use crate::cfg::{AckResource, BwpParams, CellCfg, SchedCfg};
use crate::dci::{prbs_to_riv, DlDci, UlDci};
use crate::grid::{BwpResourceGrid, PdschRecord, PuschRecord};
use crate::policy::AllocPolicy;
use crate::rb::{PrbGrant, PrbInterval, RbgBitmap};
use crate::ue::Ue;
use crate::SchedError;
use bytes::{BufMut, Bytes, BytesMut};
use common::{ceil_div, Rnti, SlotPoint};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// PRBs reserved for each Msg2 grant
const RAR_PRBS_PER_GRANT: u32 = 4;

/// Rough PDSCH payload per PRB used to size data grants
const APPROX_PRB_BYTES: u32 = 64;

/// Random-access information reported by the PHY on preamble detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RarInfo {
    pub preamble_idx: u8,
    /// Timing advance command
    pub ta_cmd: u16,
    pub temp_crnti: Rnti,
    /// Bytes the terminal asks to carry in Msg3
    pub msg3_size: u32,
    /// Slot the PRACH was detected in
    pub prach_slot: SlotPoint,
}

impl RarInfo {
    /// RA-RNTI addressing the response, derived from the PRACH occasion
    pub fn ra_rnti(&self) -> Rnti {
        Rnti(1 + self.prach_slot.slot_idx() as u16)
    }
}

/// One scheduled random-access response
#[derive(Debug, Clone)]
pub struct RarGrant {
    pub temp_crnti: Rnti,
    pub ta_cmd: u16,
    /// PUSCH resources reserved for Msg3
    pub msg3_prbs: PrbInterval,
    /// Encoded MAC RAR PDU
    pub pdu: Bytes,
}

/// Downlink decision for one slot, copied out to the PHY
#[derive(Debug, Clone, Default)]
pub struct DlSchedResult {
    pub dcis: Vec<DlDci>,
    pub pdschs: Vec<PdschRecord>,
    pub rars: Vec<RarGrant>,
}

/// Uplink decision for one slot, copied out to the PHY
#[derive(Debug, Clone, Default)]
pub struct UlSchedResult {
    pub dcis: Vec<UlDci>,
    pub puschs: Vec<PuschRecord>,
    pub pucchs: Vec<AckResource>,
}

/// Generated decision kept until the ring position is reused
#[derive(Debug, Clone)]
struct SlotResult {
    slot: SlotPoint,
    dl: DlSchedResult,
    ul: UlSchedResult,
}

/// Scheduler state of one carrier
pub struct CellScheduler {
    cc: u32,
    bwp: Arc<BwpParams>,
    grid: BwpResourceGrid,
    policy: AllocPolicy,
    sched_cfg: SchedCfg,
    pending_rars: VecDeque<RarInfo>,
    results: Vec<Option<SlotResult>>,
    rr_next: usize,
}

impl CellScheduler {
    pub fn new(cell: &CellCfg, sched_cfg: SchedCfg, cc: u32) -> Result<Self, SchedError> {
        let bwp_id = cell
            .bwps
            .first()
            .map(|b| b.bwp_id)
            .ok_or_else(|| SchedError::InvalidConfig("cell has no BWPs".into()))?;
        let bwp = Arc::new(BwpParams::new(cell, cc, bwp_id)?);
        let grid = BwpResourceGrid::new(bwp.clone());
        let results = vec![None; bwp.slots_per_frame as usize];
        info!(
            "carrier cc={} configured: {} PRBs, P={}, {} RBGs",
            cc,
            bwp.nof_prb(),
            bwp.p,
            bwp.n_rbg
        );
        Ok(Self {
            cc,
            bwp,
            grid,
            policy: AllocPolicy::default(),
            sched_cfg,
            pending_rars: VecDeque::new(),
            results,
            rr_next: 0,
        })
    }

    pub fn cc(&self) -> u32 {
        self.cc
    }

    pub fn bwp(&self) -> &Arc<BwpParams> {
        &self.bwp
    }

    #[cfg(test)]
    pub(crate) fn grid(&self) -> &BwpResourceGrid {
        &self.grid
    }

    /// Queue a detected random access for Msg2 scheduling
    pub fn dl_rach_info(&mut self, rar: RarInfo) {
        debug!(
            "cc={}: queued RACH preamble={} tc-rnti={} from slot {}",
            self.cc, rar.preamble_idx, rar.temp_crnti, rar.prach_slot
        );
        self.pending_rars.push_back(rar);
    }

    /// True if the decision for `slot` has already been generated
    pub fn is_generated(&self, slot: SlotPoint) -> bool {
        self.results[slot.frame_slot_index()]
            .as_ref()
            .map_or(false, |res| res.slot == slot)
    }

    /// Copy of the DL decision for `slot`, if generated
    pub fn dl_result(&self, slot: SlotPoint) -> Option<DlSchedResult> {
        self.results[slot.frame_slot_index()]
            .as_ref()
            .filter(|res| res.slot == slot)
            .map(|res| res.dl.clone())
    }

    /// Copy of the UL decision for `slot`, if generated
    pub fn ul_result(&self, slot: SlotPoint) -> Option<UlSchedResult> {
        self.results[slot.frame_slot_index()]
            .as_ref()
            .filter(|res| res.slot == slot)
            .map(|res| res.ul.clone())
    }

    /// Generate the decision for `slot`. Idempotence is the caller's
    /// business via [`CellScheduler::is_generated`].
    pub fn generate(&mut self, slot: SlotPoint, ue_db: &mut HashMap<Rnti, Ue>) {
        // One writer per slot ledger; a busy guard means skip, not block
        let token = self.grid[slot].guard().acquire();
        if token.empty() {
            warn!("cc={}: slot {} ledger is busy, skipping generation", self.cc, slot);
            return;
        }

        let rars = self.run_rar_sched(slot);
        self.run_data_sched(slot, ue_db);

        // Project the decision and clear the slot for ring reuse
        let grid_slot = &self.grid[slot];
        let dl = DlSchedResult {
            dcis: grid_slot.dl_pdcchs().to_vec(),
            pdschs: grid_slot.pdschs().to_vec(),
            rars,
        };
        let ul = UlSchedResult {
            dcis: grid_slot.ul_pdcchs().to_vec(),
            puschs: grid_slot.puschs().to_vec(),
            pucchs: grid_slot.pending_acks().to_vec(),
        };
        self.grid[slot].reset();
        self.results[slot.frame_slot_index()] = Some(SlotResult { slot, dl, ul });
    }

    /// Serve pending RARs that are still inside the response window
    fn run_rar_sched(&mut self, slot: SlotPoint) -> Vec<RarGrant> {
        let mut rars = Vec::new();
        while let Some(front) = self.pending_rars.front() {
            let age = slot - front.prach_slot;
            if age < 0 {
                break;
            }
            if age as u32 > self.sched_cfg.rar_window_slots {
                warn!(
                    "cc={}: RAR window expired for tc-rnti={}, dropping",
                    self.cc, front.temp_crnti
                );
                self.pending_rars.pop_front();
                continue;
            }
            if !self.grid[slot].is_dl() {
                break;
            }
            let interv = self.grid[slot]
                .dl_prbs()
                .prbs()
                .first_free_run(RAR_PRBS_PER_GRANT);
            if interv.length() < RAR_PRBS_PER_GRANT {
                break;
            }

            let rar = front.clone();
            let mut alloc = SlotAllocator::new(
                &mut self.grid,
                slot,
                &self.policy,
                self.sched_cfg.max_nof_retx,
            );
            match alloc.alloc_rar(self.policy.aggr_idx, &rar, interv, 1) {
                Ok(msg3_prbs) => {
                    let pdu = build_rar_pdu(&rar, msg3_prbs, self.bwp.nof_prb());
                    info!(
                        "cc={}: RAR for tc-rnti={} at slot {}, Msg3 at {}",
                        self.cc,
                        rar.temp_crnti,
                        slot,
                        msg3_prbs
                    );
                    rars.push(RarGrant {
                        temp_crnti: rar.temp_crnti,
                        ta_cmd: rar.ta_cmd,
                        msg3_prbs,
                        pdu,
                    });
                    self.pending_rars.pop_front();
                }
                Err(err) => {
                    debug!("cc={}: RAR allocation failed at slot {}: {}", self.cc, slot, err);
                    break;
                }
            }
        }
        rars
    }

    /// Round-robin data pass over the attached UEs
    fn run_data_sched(&mut self, slot: SlotPoint, ue_db: &mut HashMap<Rnti, Ue>) {
        if ue_db.is_empty() {
            return;
        }
        let mut rntis: Vec<Rnti> = ue_db.keys().copied().collect();
        rntis.sort_unstable();
        let offset = self.rr_next % rntis.len();
        rntis.rotate_left(offset);
        self.rr_next = self.rr_next.wrapping_add(1);

        for rnti in rntis {
            let ue = match ue_db.get_mut(&rnti) {
                Some(ue) => ue,
                None => continue,
            };
            let sr_pending = ue.sr_pending();
            let mut slot_ue = ue.make_slot_ue(slot);

            // Downlink
            if slot_ue.h_dl.is_some() && (slot_ue.dl_retx_pending() || slot_ue.dl_pending_bytes > 0)
            {
                let grant = if slot_ue.dl_retx_pending() {
                    slot_ue
                        .h_dl
                        .as_ref()
                        .and_then(|h| h.grant().cloned())
                } else {
                    let nof_prb = ceil_div(slot_ue.dl_pending_bytes, APPROX_PRB_BYTES)
                        .clamp(1, self.bwp.nof_prb());
                    let run = self.grid[slot].dl_prbs().prbs().first_free_run(nof_prb);
                    (!run.is_empty()).then(|| PrbGrant::Interval(run))
                };
                if let Some(grant) = grant {
                    let mut alloc = SlotAllocator::new(
                        &mut self.grid,
                        slot,
                        &self.policy,
                        self.sched_cfg.max_nof_retx,
                    );
                    if let Err(err) = alloc.alloc_pdsch(&mut slot_ue, &grant) {
                        debug!("cc={}: PDSCH for rnti={} failed: {}", self.cc, rnti, err);
                    }
                }
            }

            // Uplink
            let mut ul_allocated = false;
            if slot_ue.h_ul.is_some()
                && (slot_ue.ul_retx_pending() || slot_ue.ul_pending_bytes > 0 || sr_pending)
            {
                let mask = if slot_ue.ul_retx_pending() {
                    match slot_ue.h_ul.as_ref().and_then(|h| h.grant()) {
                        Some(PrbGrant::Rbgs(mask)) => Some(mask.clone()),
                        _ => None,
                    }
                } else {
                    let pending = slot_ue.ul_pending_bytes.max(1);
                    let nof_rbgs = ceil_div(pending, APPROX_PRB_BYTES * self.bwp.p)
                        .clamp(1, self.bwp.n_rbg);
                    self.grid[slot_ue.pusch_slot]
                        .ul_prbs()
                        .rbgs()
                        .find_free_run(nof_rbgs)
                        .map(|start| {
                            let mut mask = RbgBitmap::new(self.bwp.n_rbg);
                            mask.fill(start, start + nof_rbgs);
                            mask
                        })
                };
                if let Some(mask) = mask {
                    let mut alloc = SlotAllocator::new(
                        &mut self.grid,
                        slot,
                        &self.policy,
                        self.sched_cfg.max_nof_retx,
                    );
                    match alloc.alloc_pusch(&mut slot_ue, &mask) {
                        Ok(()) => ul_allocated = true,
                        Err(err) => {
                            debug!("cc={}: PUSCH for rnti={} failed: {}", self.cc, rnti, err)
                        }
                    }
                }
            }

            drop(slot_ue);
            if ul_allocated {
                ue.clear_sr();
            }
        }
    }

    /// Drop all scheduling state; configuration survives
    pub fn reset(&mut self) {
        self.grid = BwpResourceGrid::new(self.bwp.clone());
        self.pending_rars.clear();
        for res in &mut self.results {
            *res = None;
        }
        self.rr_next = 0;
    }
}

/// Encode the MAC RAR PDU for one grant: subheader, timing advance,
/// UL grant with the Msg3 allocation, and the temporary C-RNTI
fn build_rar_pdu(rar: &RarInfo, msg3_prbs: PrbInterval, bwp_size: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);

    // Subheader: E=0, T=1, RAPID
    buf.put_u8(0x40 | (rar.preamble_idx & 0x3F));

    // Timing advance command, 12 bits
    let ta = rar.ta_cmd & 0x0FFF;
    buf.put_u8((ta >> 4) as u8);

    // UL grant, 28 bits, carrying the Msg3 frequency allocation
    let grant = prbs_to_riv(msg3_prbs, bwp_size) & 0x0FFF_FFFF;
    buf.put_u8((((ta & 0x0F) << 4) as u8) | ((grant >> 24) as u8 & 0x0F));
    buf.put_u8((grant >> 16) as u8);
    buf.put_u16((grant & 0xFFFF) as u16);

    // Temporary C-RNTI
    buf.put_u16(rar.temp_crnti.value());

    buf.freeze()
}
