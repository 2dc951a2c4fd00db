//! HARQ Process Pool
//!
//! Per-direction stop-and-wait retransmission state. Each UE owns one
//! entity per direction with a fixed pool of processes; the allocator
//! borrows a process when issuing a new transmission or a
//! retransmission. Downlink processes carry an explicit acknowledgement
//! slot, uplink processes reuse the transmission slot.

use crate::rb::PrbGrant;
use crate::SCHED_NR_NOF_HARQS;
use bytes::BytesMut;
use common::SlotPoint;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Lifecycle of one HARQ process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqState {
    /// Free for a new transmission
    Empty,
    /// Transmitted, acknowledgement outstanding
    WaitingAck,
    /// Negatively acknowledged, retransmission outstanding
    WaitingRetx,
}

/// One stop-and-wait process
#[derive(Debug)]
pub struct HarqProc {
    pid: u8,
    state: HarqState,
    ndi: bool,
    retx_count: u8,
    max_nof_retx: u8,
    mcs: u8,
    tbs: u32,
    grant: Option<PrbGrant>,
    tx_slot: Option<SlotPoint>,
    ack_slot: Option<SlotPoint>,
    softbuffer: Arc<Mutex<BytesMut>>,
}

impl HarqProc {
    fn new(pid: u8) -> Self {
        Self {
            pid,
            state: HarqState::Empty,
            ndi: false,
            retx_count: 0,
            max_nof_retx: 0,
            mcs: 0,
            tbs: 0,
            grant: None,
            tx_slot: None,
            ack_slot: None,
            softbuffer: Arc::new(Mutex::new(BytesMut::new())),
        }
    }

    pub fn pid(&self) -> u8 {
        self.pid
    }

    pub fn empty(&self) -> bool {
        self.state == HarqState::Empty
    }

    pub fn state(&self) -> HarqState {
        self.state
    }

    pub fn ndi(&self) -> bool {
        self.ndi
    }

    pub fn mcs(&self) -> u8 {
        self.mcs
    }

    pub fn tbs(&self) -> u32 {
        self.tbs
    }

    /// Update the TBS once the grant has been converted; only meaningful
    /// on the first transmission
    pub fn set_tbs(&mut self, tbs: u32) {
        self.tbs = tbs;
    }

    pub fn nof_retx(&self) -> u8 {
        self.retx_count
    }

    pub fn grant(&self) -> Option<&PrbGrant> {
        self.grant.as_ref()
    }

    pub fn tx_slot(&self) -> Option<SlotPoint> {
        self.tx_slot
    }

    pub fn ack_slot(&self) -> Option<SlotPoint> {
        self.ack_slot
    }

    /// Shared handle to the transmit soft buffer
    pub fn softbuffer(&self) -> Arc<Mutex<BytesMut>> {
        self.softbuffer.clone()
    }

    /// Start a new transmission on an empty process
    pub fn new_tx(
        &mut self,
        tx_slot: SlotPoint,
        ack_slot: SlotPoint,
        grant: PrbGrant,
        mcs: u8,
        tbs: u32,
        max_nof_retx: u8,
    ) -> bool {
        if !self.empty() {
            return false;
        }
        self.state = HarqState::WaitingAck;
        self.ndi = !self.ndi;
        self.retx_count = 0;
        self.max_nof_retx = max_nof_retx;
        self.mcs = mcs;
        self.tbs = tbs;
        self.grant = Some(grant);
        self.tx_slot = Some(tx_slot);
        self.ack_slot = Some(ack_slot);
        true
    }

    /// Start a retransmission. The new grant must span at least the
    /// resources of the original transmission.
    pub fn new_retx(&mut self, tx_slot: SlotPoint, ack_slot: SlotPoint, grant: PrbGrant) -> bool {
        if self.state != HarqState::WaitingRetx {
            return false;
        }
        let covered = self
            .grant
            .as_ref()
            .map_or(false, |old| grant.covers(old));
        if !covered {
            debug!(
                "HARQ pid={} retx grant does not cover the original allocation",
                self.pid
            );
            return false;
        }
        self.state = HarqState::WaitingAck;
        self.retx_count += 1;
        self.grant = Some(grant);
        self.tx_slot = Some(tx_slot);
        self.ack_slot = Some(ack_slot);
        true
    }

    /// Process acknowledgement feedback. Returns the TBS delivered on a
    /// positive acknowledgement.
    pub fn ack(&mut self, tb_idx: u8, ok: bool) -> Option<u32> {
        if self.state != HarqState::WaitingAck {
            debug!(
                "HARQ pid={} received stray ack for tb={} in state {:?}",
                self.pid, tb_idx, self.state
            );
            return None;
        }
        if ok {
            let tbs = self.tbs;
            self.clear();
            return Some(tbs);
        }
        if self.retx_count >= self.max_nof_retx {
            warn!(
                "HARQ pid={} reached {} retransmissions, dropping transport block",
                self.pid, self.retx_count
            );
            self.clear();
        } else {
            self.state = HarqState::WaitingRetx;
        }
        None
    }

    fn clear(&mut self) {
        self.state = HarqState::Empty;
        self.retx_count = 0;
        self.grant = None;
        self.tx_slot = None;
        self.ack_slot = None;
    }
}

/// Fixed pool of HARQ processes for one direction of one UE
#[derive(Debug)]
pub struct HarqEntity {
    procs: Vec<HarqProc>,
}

impl HarqEntity {
    pub fn new() -> Self {
        Self {
            procs: (0..SCHED_NR_NOF_HARQS as u8).map(HarqProc::new).collect(),
        }
    }

    pub fn nof_procs(&self) -> usize {
        self.procs.len()
    }

    pub fn get(&self, pid: u8) -> Option<&HarqProc> {
        self.procs.get(usize::from(pid))
    }

    /// First process free for a new transmission
    pub fn find_empty(&mut self) -> Option<&mut HarqProc> {
        self.procs.iter_mut().find(|h| h.empty())
    }

    /// True if some process awaits a retransmission whose ack slot has
    /// already passed at `slot`
    pub fn has_pending_retx(&self, slot: SlotPoint) -> bool {
        self.procs.iter().any(|h| {
            h.state() == HarqState::WaitingRetx
                && h.ack_slot().map_or(false, |ack| !(ack > slot))
        })
    }

    /// First process awaiting a retransmission at `slot`
    pub fn find_retx(&mut self, slot: SlotPoint) -> Option<&mut HarqProc> {
        self.procs.iter_mut().find(|h| {
            h.state() == HarqState::WaitingRetx
                && h.ack_slot().map_or(false, |ack| !(ack > slot))
        })
    }

    /// Route acknowledgement feedback for `slot` to the matching process
    pub fn ack_info(&mut self, slot: SlotPoint, tb_idx: u8, ok: bool) -> Option<u32> {
        match self
            .procs
            .iter_mut()
            .find(|h| h.state() == HarqState::WaitingAck && h.ack_slot() == Some(slot))
        {
            Some(h) => h.ack(tb_idx, ok),
            None => {
                debug!("no HARQ process awaiting feedback at slot {}", slot);
                None
            }
        }
    }

    pub fn reset(&mut self) {
        for h in &mut self.procs {
            h.clear();
        }
    }
}

impl Default for HarqEntity {
    fn default() -> Self {
        Self::new()
    }
}
