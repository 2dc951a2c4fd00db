//! NR MAC Slot Scheduler
//!
//! On every slot tick the scheduler decides which attached terminals get
//! air-interface resources and produces the control words (DCIs) and data
//! grants handed to the physical layer. The heart of the crate is the
//! bandwidth-part resource grid, a one-frame ring of per-slot allocation
//! state, driven by a slot allocator that admits RAR, PDSCH and PUSCH
//! grants with PDCCH candidate placement, HARQ bookkeeping and collision
//! detection.

pub mod alloc;
pub mod carrier;
pub mod cfg;
pub mod dci;
pub mod grid;
pub mod guard;
pub mod harq;
pub mod pdcch;
pub mod policy;
pub mod rb;
mod sched;
pub mod ue;

#[cfg(test)]
pub(crate) mod test_support;

pub use carrier::{DlSchedResult, RarGrant, RarInfo, UlSchedResult};
pub use cfg::{CellCfg, SchedCfg, UeCfg};
pub use sched::Scheduler;

use common::Rnti;
use thiserror::Error;

/// Number of HARQ processes per UE and direction
pub const SCHED_NR_NOF_HARQS: usize = 16;

/// Aggregation levels 1, 2, 4, 8, 16 indexed 0-4
pub const MAX_NOF_AGGR_LEVELS: usize = 5;

/// Maximum number of DL or UL grants per slot
pub const MAX_GRANTS: usize = 8;

/// Maximum number of coresets per BWP
pub const MAX_NOF_CORESETS: usize = 3;

/// Maximum number of search spaces per BWP
pub const MAX_NOF_SEARCH_SPACES: usize = 10;

/// Slots between the RAR PDCCH and the Msg3 PUSCH opportunity
pub const MSG3_DELAY_SLOTS: u32 = 4;

/// Slots between a PDSCH and the PUCCH carrying its acknowledgement
pub const UCI_DELAY_SLOTS: u32 = 4;

/// Slots between an UL grant PDCCH and the PUSCH it schedules
pub const PUSCH_DELAY_SLOTS: u32 = 4;

/// Outcome of a failed allocator operation. On any of these the resource
/// grid is left exactly as it was at entry.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("resource clash with an allocation previously made")]
    SchCollision,
    #[error("no PDCCH candidate fits")]
    NoCchSpace,
    #[error("maximum number of grants per slot reached")]
    NoGrantSpace,
    #[error("slot direction does not admit the channel")]
    NoSchSpace,
    #[error("no opportunity for this rnti")]
    NoRntiOpportunity,
    #[error("DCI synthesis rejected the code rate")]
    InvalidCoderate,
}

/// Errors on the configuration and feedback surface
#[derive(Error, Debug)]
pub enum SchedError {
    #[error("user rnti={0} not found")]
    UnknownRnti(Rnti),

    #[error("carrier index {0} not found")]
    UnknownCell(u32),

    #[error("scheduler cells not configured")]
    NotConfigured,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
