//! BWP Resource Grid
//!
//! One `SlotGrid` is the allocation state of a single slot: PRB
//! occupancy per direction, the DCI lists, the pending-acknowledgement
//! list, the PDSCH/PUSCH records and one PDCCH region per configured
//! coreset. `BwpResourceGrid` is a one-frame ring of slot grids indexed
//! by slot point; the scheduler resets each slot after the physical
//! layer has drained it and before the ring position is reused.

use crate::cfg::{AckResource, BwpParams, UeBwpCfg};
use crate::dci::{CceLocation, DciCtx, DciFormat, DlDci, RntiType, UlDci};
use crate::guard::ResourceGuard;
use crate::pdcch::aggr_level;
use crate::rb::{PrbGrant, RbUsage, RbgBitmap};
use crate::MAX_NOF_CORESETS;
use bytes::BytesMut;
use common::{BitMask, Rnti, SlotPoint};
use std::ops::{Index, IndexMut};
use std::sync::{Arc, Mutex};

/// What a PDCCH position was allocated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdcchGrantKind {
    Rar,
    DlData,
    UlData,
}

/// One successful PDCCH placement, kept for rollback
#[derive(Debug, Clone, Copy)]
struct DciPlacement {
    kind: PdcchGrantKind,
    ncce: u16,
    level: u16,
}

/// PDCCH bookkeeping for one coreset in one slot
#[derive(Debug)]
pub struct CoresetRegion {
    nof_cces: u16,
    used_cces: BitMask,
    placements: Vec<DciPlacement>,
}

impl CoresetRegion {
    fn new(nof_cces: u16) -> Self {
        Self {
            nof_cces,
            used_cces: BitMask::new(usize::from(nof_cces)),
            placements: Vec::new(),
        }
    }

    pub fn nof_cces(&self) -> u16 {
        self.nof_cces
    }

    /// CCEs currently occupied by placed DCIs
    pub fn used_cces(&self) -> &BitMask {
        &self.used_cces
    }

    pub fn nof_allocs(&self) -> usize {
        self.placements.len()
    }

    fn reset(&mut self) {
        self.used_cces.reset();
        self.placements.clear();
    }
}

/// Scheduled PDSCH transmission bound to its HARQ soft buffer
#[derive(Debug, Clone)]
pub struct PdschRecord {
    pub rnti: Rnti,
    pub grant: PrbGrant,
    pub mcs: u8,
    pub tbs: u32,
    pub softbuffer: Arc<Mutex<BytesMut>>,
}

/// Scheduled PUSCH reception
#[derive(Debug, Clone)]
pub struct PuschRecord {
    pub rnti: Rnti,
    pub mask: RbgBitmap,
    pub mcs: u8,
    pub tbs: u32,
    pub pid: u8,
}

/// Allocation state of one slot
#[derive(Debug)]
pub struct SlotGrid {
    slot_idx: u32,
    cfg: Arc<BwpParams>,
    guard: ResourceGuard,
    pub(crate) is_dl: bool,
    pub(crate) is_ul: bool,
    pub(crate) dl_prbs: RbUsage,
    pub(crate) ul_prbs: RbUsage,
    pub(crate) dl_pdcchs: Vec<DlDci>,
    pub(crate) ul_pdcchs: Vec<UlDci>,
    pub(crate) pending_acks: Vec<AckResource>,
    pub(crate) pdschs: Vec<PdschRecord>,
    pub(crate) puschs: Vec<PuschRecord>,
    coresets: Vec<Option<CoresetRegion>>,
}

impl SlotGrid {
    fn new(cfg: Arc<BwpParams>, slot_idx: u32) -> Self {
        let mut coresets: Vec<Option<CoresetRegion>> =
            (0..MAX_NOF_CORESETS).map(|_| None).collect();
        for cs in &cfg.bwp.pdcch.coresets {
            coresets[usize::from(cs.id)] = Some(CoresetRegion::new(cs.nof_cces()));
        }

        Self {
            slot_idx,
            is_dl: cfg.is_dl(slot_idx),
            is_ul: cfg.is_ul(slot_idx),
            dl_prbs: RbUsage::new(cfg.bwp.rb_width, cfg.bwp.start_rb, cfg.bwp.rbg_size_config_1),
            ul_prbs: RbUsage::new(cfg.bwp.rb_width, cfg.bwp.start_rb, cfg.bwp.rbg_size_config_1),
            dl_pdcchs: Vec::new(),
            ul_pdcchs: Vec::new(),
            pending_acks: Vec::new(),
            pdschs: Vec::new(),
            puschs: Vec::new(),
            guard: ResourceGuard::new(),
            coresets,
            cfg,
        }
    }

    pub fn slot_idx(&self) -> u32 {
        self.slot_idx
    }

    pub fn is_dl(&self) -> bool {
        self.is_dl
    }

    pub fn is_ul(&self) -> bool {
        self.is_ul
    }

    pub fn guard(&self) -> &ResourceGuard {
        &self.guard
    }

    pub fn dl_prbs(&self) -> &RbUsage {
        &self.dl_prbs
    }

    pub fn ul_prbs(&self) -> &RbUsage {
        &self.ul_prbs
    }

    pub fn dl_pdcchs(&self) -> &[DlDci] {
        &self.dl_pdcchs
    }

    pub fn ul_pdcchs(&self) -> &[UlDci] {
        &self.ul_pdcchs
    }

    pub fn pending_acks(&self) -> &[AckResource] {
        &self.pending_acks
    }

    pub fn pdschs(&self) -> &[PdschRecord] {
        &self.pdschs
    }

    pub fn puschs(&self) -> &[PuschRecord] {
        &self.puschs
    }

    pub fn coreset_region(&self, coreset_id: u8) -> Option<&CoresetRegion> {
        self.coresets.get(usize::from(coreset_id))?.as_ref()
    }

    /// Return the slot to pristine state for reuse
    pub fn reset(&mut self) {
        for region in self.coresets.iter_mut().flatten() {
            region.reset();
        }
        self.dl_prbs.reset();
        self.ul_prbs.reset();
        self.dl_pdcchs.clear();
        self.ul_pdcchs.clear();
        self.pending_acks.clear();
        self.pdschs.clear();
        self.puschs.clear();
    }

    /// Place a DCI in the first free candidate of the requested search
    /// space and aggregation level. On success the covering CCEs are
    /// marked used and a placeholder DCI is appended to the matching
    /// list; on failure nothing changes.
    pub(crate) fn alloc_dci(
        &mut self,
        coreset_id: u8,
        kind: PdcchGrantKind,
        aggr_idx: u8,
        ss_id: u8,
        rnti: Rnti,
        ue: Option<&UeBwpCfg>,
    ) -> bool {
        let cfg = self.cfg.clone();
        let table = match ue {
            Some(ue_cfg) => match ue_cfg.cce_table(ss_id) {
                Some(table) => table,
                None => return false,
            },
            None => cfg.rar_cce_table(),
        };
        let candidates = table.candidates(self.slot_idx, usize::from(aggr_idx));
        let level = aggr_level(aggr_idx);

        let region = match self
            .coresets
            .get_mut(usize::from(coreset_id))
            .and_then(|r| r.as_mut())
        {
            Some(region) => region,
            None => return false,
        };

        for &ncce in candidates {
            if ncce + level > region.nof_cces {
                continue;
            }
            let lo = usize::from(ncce);
            let hi = usize::from(ncce + level);
            if (lo..hi).any(|cce| region.used_cces.test(cce)) {
                continue;
            }

            region.used_cces.fill(lo, hi);
            region.placements.push(DciPlacement { kind, ncce, level });

            let ctx = DciCtx {
                rnti,
                rnti_type: match kind {
                    PdcchGrantKind::Rar => RntiType::Ra,
                    _ => RntiType::C,
                },
                format: match kind {
                    PdcchGrantKind::UlData => DciFormat::Ul00,
                    _ => DciFormat::Dl10,
                },
                coreset_id,
                ss_id,
                location: CceLocation { aggr_idx, ncce },
            };
            match kind {
                PdcchGrantKind::Rar | PdcchGrantKind::DlData => {
                    self.dl_pdcchs.push(DlDci::new(ctx))
                }
                PdcchGrantKind::UlData => self.ul_pdcchs.push(UlDci::new(ctx)),
            }
            return true;
        }
        false
    }

    /// Reverse the most recent successful [`SlotGrid::alloc_dci`]
    pub(crate) fn rem_last_dci(&mut self, coreset_id: u8) {
        let region = match self
            .coresets
            .get_mut(usize::from(coreset_id))
            .and_then(|r| r.as_mut())
        {
            Some(region) => region,
            None => return,
        };
        if let Some(placement) = region.placements.pop() {
            region.used_cces.clear_range(
                usize::from(placement.ncce),
                usize::from(placement.ncce + placement.level),
            );
            match placement.kind {
                PdcchGrantKind::Rar | PdcchGrantKind::DlData => {
                    self.dl_pdcchs.pop();
                }
                PdcchGrantKind::UlData => {
                    self.ul_pdcchs.pop();
                }
            }
        }
    }
}

/// One-frame ring of slot grids for a BWP
#[derive(Debug)]
pub struct BwpResourceGrid {
    cfg: Arc<BwpParams>,
    slots: Vec<SlotGrid>,
}

impl BwpResourceGrid {
    pub fn new(cfg: Arc<BwpParams>) -> Self {
        let slots = (0..cfg.slots_per_frame)
            .map(|sl| SlotGrid::new(cfg.clone(), sl))
            .collect();
        Self { cfg, slots }
    }

    pub fn cfg(&self) -> &Arc<BwpParams> {
        &self.cfg
    }

    pub fn nof_prb(&self) -> u32 {
        self.cfg.nof_prb()
    }
}

impl Index<SlotPoint> for BwpResourceGrid {
    type Output = SlotGrid;

    fn index(&self, slot: SlotPoint) -> &SlotGrid {
        &self.slots[slot.frame_slot_index()]
    }
}

impl IndexMut<SlotPoint> for BwpResourceGrid {
    fn index_mut(&mut self, slot: SlotPoint) -> &mut SlotGrid {
        &mut self.slots[slot.frame_slot_index()]
    }
}
