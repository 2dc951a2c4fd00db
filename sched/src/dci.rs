//! Downlink Control Information
//!
//! DCI records carried on the PDCCH, the field synthesis helpers that
//! populate them from an accepted grant, and a compact bit packing used
//! on the wire towards the lower layers.

use crate::cfg::BwpParams;
use crate::harq::HarqProc;
use crate::rb::{PrbGrant, PrbInterval, RbgBitmap};
use common::Rnti;
use tracing::debug;

/// Redundancy version sequence over retransmissions
pub const RV_SEQ: [u8; 4] = [0, 2, 3, 1];

/// Maximum usable code rate, in 1024ths
pub const MAX_CODERATE_X1024: u32 = 948;

/// Resource elements per PRB available to a PDSCH (12 data symbols)
const PDSCH_RE_PER_PRB: u32 = 144;

/// Bytes of one RAR subPDU (subheader plus MAC RAR)
pub const RAR_SUBPDU_BYTES: u32 = 8;

/// MCS used for RAR transmissions
const RAR_MCS: u8 = 5;

/// Type of RNTI a DCI is scrambled with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RntiType {
    /// C-RNTI of a connected UE
    C,
    /// RA-RNTI addressing a random-access response
    Ra,
    /// Temporary C-RNTI during contention resolution
    Tc,
}

/// DCI format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DciFormat {
    /// Fallback DL format 1_0
    Dl10,
    /// Fallback UL format 0_0
    Ul00,
}

/// Position of a DCI in its coreset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CceLocation {
    /// Aggregation-level index (level is `1 << aggr_idx`)
    pub aggr_idx: u8,
    /// First CCE occupied
    pub ncce: u16,
}

/// Context shared by DL and UL DCIs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DciCtx {
    pub rnti: Rnti,
    pub rnti_type: RntiType,
    pub format: DciFormat,
    pub coreset_id: u8,
    pub ss_id: u8,
    pub location: CceLocation,
}

/// Downlink scheduling DCI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlDci {
    pub ctx: DciCtx,
    /// Frequency-domain assignment (RIV or RBG bits)
    pub freq_assignment: u32,
    pub time_assignment: u8,
    pub mcs: u8,
    pub rv: u8,
    /// New-data indicator
    pub ndi: bool,
    /// HARQ process id
    pub pid: u8,
    /// Downlink assignment index
    pub dai: u8,
    /// PUCCH resource indicator
    pub pucch_resource: u8,
    pub tpc: u8,
}

impl DlDci {
    /// Placeholder record; fields are filled by the allocator after the
    /// PDCCH position is secured
    pub fn new(ctx: DciCtx) -> Self {
        Self {
            ctx,
            freq_assignment: 0,
            time_assignment: 0,
            mcs: 0,
            rv: 0,
            ndi: false,
            pid: 0,
            dai: 0,
            pucch_resource: 0,
            tpc: 0,
        }
    }

    /// Pack the payload fields into a fixed-width bit word. The
    /// frequency assignment gets 18 bits, enough for the RIV of the
    /// widest BWP.
    pub fn pack(&self) -> u64 {
        let mut word = 0u64;
        word |= u64::from(self.freq_assignment) & 0x3FFFF;
        word |= (u64::from(self.time_assignment) & 0xF) << 18;
        word |= (u64::from(self.mcs) & 0x1F) << 22;
        word |= (u64::from(self.rv) & 0x3) << 27;
        word |= u64::from(self.ndi) << 29;
        word |= (u64::from(self.pid) & 0xF) << 30;
        word |= (u64::from(self.dai) & 0x3) << 34;
        word |= (u64::from(self.pucch_resource) & 0x7) << 36;
        word |= (u64::from(self.tpc) & 0x3) << 39;
        word
    }

    /// Inverse of [`DlDci::pack`]
    pub fn unpack(ctx: DciCtx, word: u64) -> Self {
        Self {
            ctx,
            freq_assignment: (word & 0x3FFFF) as u32,
            time_assignment: ((word >> 18) & 0xF) as u8,
            mcs: ((word >> 22) & 0x1F) as u8,
            rv: ((word >> 27) & 0x3) as u8,
            ndi: (word >> 29) & 1 != 0,
            pid: ((word >> 30) & 0xF) as u8,
            dai: ((word >> 34) & 0x3) as u8,
            pucch_resource: ((word >> 36) & 0x7) as u8,
            tpc: ((word >> 39) & 0x3) as u8,
        }
    }
}

/// Uplink scheduling DCI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UlDci {
    pub ctx: DciCtx,
    pub freq_assignment: u32,
    pub time_assignment: u8,
    pub mcs: u8,
    pub rv: u8,
    pub ndi: bool,
    pub pid: u8,
    pub tpc: u8,
}

impl UlDci {
    pub fn new(ctx: DciCtx) -> Self {
        Self {
            ctx,
            freq_assignment: 0,
            time_assignment: 0,
            mcs: 0,
            rv: 0,
            ndi: false,
            pid: 0,
            tpc: 0,
        }
    }

    pub fn pack(&self) -> u64 {
        let mut word = 0u64;
        word |= u64::from(self.freq_assignment) & 0x3FFFF;
        word |= (u64::from(self.time_assignment) & 0xF) << 18;
        word |= (u64::from(self.mcs) & 0x1F) << 22;
        word |= (u64::from(self.rv) & 0x3) << 27;
        word |= u64::from(self.ndi) << 29;
        word |= (u64::from(self.pid) & 0xF) << 30;
        word |= (u64::from(self.tpc) & 0x3) << 34;
        word
    }

    pub fn unpack(ctx: DciCtx, word: u64) -> Self {
        Self {
            ctx,
            freq_assignment: (word & 0x3FFFF) as u32,
            time_assignment: ((word >> 18) & 0xF) as u8,
            mcs: ((word >> 22) & 0x1F) as u8,
            rv: ((word >> 27) & 0x3) as u8,
            ndi: (word >> 29) & 1 != 0,
            pid: ((word >> 30) & 0xF) as u8,
            tpc: ((word >> 34) & 0x3) as u8,
        }
    }
}

/// Encode a contiguous allocation as a resource indication value
pub fn prbs_to_riv(interv: PrbInterval, bwp_size: u32) -> u32 {
    let s = interv.start();
    let l = interv.length();
    debug_assert!(l >= 1 && s + l <= bwp_size, "invalid allocation {}", interv);
    if l - 1 <= bwp_size / 2 {
        bwp_size * (l - 1) + s
    } else {
        bwp_size * (bwp_size - l + 1) + (bwp_size - 1 - s)
    }
}

/// Decode a resource indication value back to the PRB interval
pub fn riv_to_prbs(riv: u32, bwp_size: u32) -> PrbInterval {
    let mut l = riv / bwp_size + 1;
    let mut s = riv % bwp_size;
    if l + s > bwp_size {
        l = bwp_size - l + 2;
        s = bwp_size - 1 - s;
    }
    PrbInterval::new(s, s + l)
}

/// Frequency-domain assignment bits for a grant
fn grant_freq_assignment(grant: &PrbGrant, bwp_size: u32) -> u32 {
    match grant {
        PrbGrant::Interval(interv) => prbs_to_riv(*interv, bwp_size),
        PrbGrant::Rbgs(mask) => rbg_mask_bits(mask),
    }
}

/// RBG mask as assignment bits, first group in the LSB
fn rbg_mask_bits(mask: &RbgBitmap) -> u32 {
    let mut bits = 0u32;
    for rbg in 0..mask.len().min(32) {
        if mask.test(rbg) {
            bits |= 1 << rbg;
        }
    }
    bits
}

/// Transport block size in bytes a PDSCH/PUSCH of `nof_prb` PRBs carries
/// at the given MCS
pub fn grant_tbs_bytes(nof_prb: u32, mcs: u8) -> u32 {
    let qm: u32 = match mcs {
        0..=9 => 2,
        10..=16 => 4,
        _ => 6,
    };
    let rate_x1024 = (120 + 28 * u32::from(mcs)).min(MAX_CODERATE_X1024);
    (nof_prb * PDSCH_RE_PER_PRB * qm * rate_x1024 / 1024) / 8
}

/// Populate a RAR DCI from the accepted Msg2 allocation. Fails when the
/// RAR payload does not fit the interval at an acceptable code rate.
pub fn fill_dci_rar(
    interv: PrbInterval,
    nof_grants: u32,
    bwp: &BwpParams,
    dci: &mut DlDci,
) -> bool {
    let payload_bits = nof_grants * RAR_SUBPDU_BYTES * 8;
    let capacity_bits = interv.length() * PDSCH_RE_PER_PRB * 2;
    if capacity_bits == 0 || payload_bits * 1024 > capacity_bits * MAX_CODERATE_X1024 {
        debug!(
            "RAR payload of {} bits does not fit {} at an acceptable code rate",
            payload_bits, interv
        );
        return false;
    }

    dci.freq_assignment = prbs_to_riv(interv, bwp.nof_prb());
    dci.time_assignment = 0;
    dci.mcs = RAR_MCS;
    dci.rv = 0;
    dci.ndi = false;
    dci.pid = 0;
    dci.dai = 0;
    dci.pucch_resource = 0;
    dci.tpc = 1;
    true
}

/// Populate the UE-addressed fields of a DL DCI from the HARQ state
pub fn fill_dl_dci_ue_fields(
    rnti: Rnti,
    grant: &PrbGrant,
    harq: &HarqProc,
    bwp: &BwpParams,
    dci: &mut DlDci,
) {
    debug_assert_eq!(dci.ctx.rnti, rnti);
    dci.freq_assignment = grant_freq_assignment(grant, bwp.nof_prb());
    dci.time_assignment = 0;
    dci.mcs = harq.mcs();
    dci.rv = RV_SEQ[usize::from(harq.nof_retx()) % RV_SEQ.len()];
    dci.ndi = harq.ndi();
    dci.pid = harq.pid();
    dci.tpc = 1;
}

/// Populate the UE-addressed fields of an UL DCI from the HARQ state
pub fn fill_ul_dci_ue_fields(
    rnti: Rnti,
    mask: &RbgBitmap,
    harq: &HarqProc,
    bwp: &BwpParams,
    dci: &mut UlDci,
) {
    debug_assert_eq!(dci.ctx.rnti, rnti);
    debug_assert_eq!(mask.len(), bwp.n_rbg);
    dci.freq_assignment = rbg_mask_bits(mask);
    dci.time_assignment = 0;
    dci.mcs = harq.mcs();
    dci.rv = RV_SEQ[usize::from(harq.nof_retx()) % RV_SEQ.len()];
    dci.ndi = harq.ndi();
    dci.pid = harq.pid();
    dci.tpc = 1;
}
