//! Scheduler Façade
//!
//! The externally visible surface of the MAC scheduler. Configuration
//! and feedback arrive from the RRC and PHY on arbitrary threads and are
//! serialised through a single mutex; `dl_sched`/`ul_sched` advance the
//! slot tick, generate the decision for each carrier exactly once per
//! slot, and hand back copies of the per-slot results. No operation
//! suspends and all complete in bounded time.

use crate::carrier::{CellScheduler, DlSchedResult, RarInfo, UlSchedResult};
use crate::cfg::{CellCfg, SchedCfg, UeCfg};
use crate::ue::{unknown_rnti, BearerCfg, Ue};
use crate::SchedError;
use common::{LcgId, LcId, Rnti, SlotPoint};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

struct SchedInner {
    sched_cfg: SchedCfg,
    cells: Vec<CellScheduler>,
    ue_db: HashMap<Rnti, Ue>,
    last_slot: Option<SlotPoint>,
    configured: bool,
}

/// The MAC scheduler of one base-station instance
pub struct Scheduler {
    inner: Mutex<SchedInner>,
}

impl Scheduler {
    pub fn new(sched_cfg: SchedCfg) -> Self {
        Self {
            inner: Mutex::new(SchedInner {
                sched_cfg,
                cells: Vec::new(),
                ue_db: HashMap::new(),
                last_slot: None,
                configured: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SchedInner> {
        self.inner.lock().expect("scheduler mutex poisoned")
    }

    /// Configure the carriers. Must precede any allocation call.
    pub fn cell_cfg(&self, cells: &[CellCfg]) -> Result<(), SchedError> {
        let mut inner = self.lock();
        let mut carriers = Vec::with_capacity(cells.len());
        for (cc, cell) in cells.iter().enumerate() {
            carriers.push(CellScheduler::new(cell, inner.sched_cfg.clone(), cc as u32)?);
        }
        inner.cells = carriers;
        inner.configured = true;
        info!("scheduler configured with {} carrier(s)", cells.len());
        Ok(())
    }

    /// Create or reconfigure a user
    pub fn ue_cfg(&self, rnti: Rnti, cfg: UeCfg) -> Result<(), SchedError> {
        let mut inner = self.lock();
        let cell = inner
            .cells
            .get(cfg.cc as usize)
            .ok_or(SchedError::UnknownCell(cfg.cc))?;
        if cfg.active_bwp_id != cell.bwp().bwp_id {
            return Err(SchedError::InvalidConfig(format!(
                "active bwp id={} is not served by carrier cc={}",
                cfg.active_bwp_id, cfg.cc
            )));
        }
        let bwp = cell.bwp().clone();
        match inner.ue_db.get_mut(&rnti) {
            Some(ue) => {
                ue.set_cfg(cfg, bwp)?;
                debug!("reconfigured user rnti={}", rnti);
            }
            None => {
                inner.ue_db.insert(rnti, Ue::new(rnti, cfg, bwp)?);
                info!("created user rnti={}", rnti);
            }
        }
        Ok(())
    }

    /// Remove a user
    pub fn ue_rem(&self, rnti: Rnti) -> Result<(), SchedError> {
        let mut inner = self.lock();
        if inner.ue_db.remove(&rnti).is_none() {
            error!("user rnti={} not found", rnti);
            return Err(SchedError::UnknownRnti(rnti));
        }
        info!("removed user rnti={}", rnti);
        Ok(())
    }

    pub fn ue_exists(&self, rnti: Rnti) -> bool {
        self.lock().ue_db.contains_key(&rnti)
    }

    /// Configure one bearer of a user
    pub fn bearer_ue_cfg(&self, rnti: Rnti, lcid: LcId, cfg: BearerCfg) -> Result<(), SchedError> {
        self.ue_db_access(rnti, "bearer_ue_cfg", |ue| ue.set_bearer_cfg(lcid, cfg))?
    }

    /// Remove one bearer of a user
    pub fn bearer_ue_rem(&self, rnti: Rnti, lcid: LcId) -> Result<(), SchedError> {
        self.ue_db_access(rnti, "bearer_ue_rem", |ue| ue.rem_bearer(lcid))
    }

    /// RLC queue update for a DL logical channel
    pub fn dl_buffer_state(
        &self,
        rnti: Rnti,
        lcid: LcId,
        tx_queue: u32,
        retx_queue: u32,
    ) -> Result<(), SchedError> {
        self.ue_db_access(rnti, "dl_buffer_state", |ue| {
            ue.dl_buffer_state(lcid, tx_queue, retx_queue)
        })?
    }

    /// Buffer status report
    pub fn ul_bsr(&self, rnti: Rnti, lcg: LcgId, bsr: u32) -> Result<(), SchedError> {
        self.ue_db_access(rnti, "ul_bsr", |ue| ue.ul_bsr(lcg, bsr))?
    }

    /// Out-of-band addition to an UL buffer estimate
    pub fn ul_buffer_add(&self, rnti: Rnti, lcid: LcId, bytes: u32) -> Result<(), SchedError> {
        self.ue_db_access(rnti, "ul_buffer_add", |ue| ue.ul_buffer_add(lcid, bytes))?
    }

    /// Power headroom report
    pub fn ul_phr(&self, rnti: Rnti, phr_db: i32) -> Result<(), SchedError> {
        self.ue_db_access(rnti, "ul_phr", |ue| ue.set_ul_phr(phr_db))
    }

    /// Scheduling request
    pub fn ul_sr_info(&self, _slot_rx: SlotPoint, rnti: Rnti) -> Result<(), SchedError> {
        self.ue_db_access(rnti, "ul_sr_info", |ue| ue.set_sr())
    }

    /// Wideband CQI report
    pub fn dl_cqi_info(
        &self,
        _slot_rx: SlotPoint,
        rnti: Rnti,
        _cc: u32,
        cqi: u8,
    ) -> Result<(), SchedError> {
        self.ue_db_access(rnti, "dl_cqi_info", |ue| ue.set_dl_cqi(cqi))
    }

    /// Rank indicator report
    pub fn dl_ri_info(
        &self,
        _slot_rx: SlotPoint,
        rnti: Rnti,
        _cc: u32,
        ri: u8,
    ) -> Result<(), SchedError> {
        self.ue_db_access(rnti, "dl_ri_info", |ue| ue.set_dl_ri(ri))
    }

    /// Precoder matrix indicator report
    pub fn dl_pmi_info(
        &self,
        _slot_rx: SlotPoint,
        rnti: Rnti,
        _cc: u32,
        pmi: u8,
    ) -> Result<(), SchedError> {
        self.ue_db_access(rnti, "dl_pmi_info", |ue| ue.set_dl_pmi(pmi))
    }

    /// UL channel quality report
    pub fn ul_snr_info(
        &self,
        _slot_rx: SlotPoint,
        rnti: Rnti,
        _cc: u32,
        snr_db: f32,
    ) -> Result<(), SchedError> {
        self.ue_db_access(rnti, "ul_snr_info", |ue| ue.set_ul_snr(snr_db))
    }

    /// DL HARQ acknowledgement feedback
    pub fn dl_ack_info(
        &self,
        slot_rx: SlotPoint,
        rnti: Rnti,
        _cc: u32,
        tb_idx: u8,
        ack: bool,
    ) -> Result<(), SchedError> {
        self.ue_db_access(rnti, "dl_ack_info", |ue| {
            ue.dl_ack_info(slot_rx, tb_idx, ack);
        })
    }

    /// UL CRC feedback
    pub fn ul_crc_info(
        &self,
        slot_rx: SlotPoint,
        rnti: Rnti,
        _cc: u32,
        crc: bool,
    ) -> Result<(), SchedError> {
        self.ue_db_access(rnti, "ul_crc_info", |ue| {
            ue.ul_crc_info(slot_rx, crc);
        })
    }

    /// Random-access detection from the PHY
    pub fn dl_rach_info(&self, cc: u32, rar: RarInfo) -> Result<(), SchedError> {
        let mut inner = self.lock();
        let cell = inner
            .cells
            .get_mut(cc as usize)
            .ok_or(SchedError::UnknownCell(cc))?;
        cell.dl_rach_info(rar);
        Ok(())
    }

    /// Downlink decision for `slot` on carrier `cc`
    pub fn dl_sched(&self, slot: SlotPoint, cc: u32) -> Result<DlSchedResult, SchedError> {
        let mut inner = self.lock();
        if !inner.configured {
            return Err(SchedError::NotConfigured);
        }
        if cc as usize >= inner.cells.len() {
            return Err(SchedError::UnknownCell(cc));
        }
        Self::new_tti(&mut inner, slot);
        Ok(inner.cells[cc as usize].dl_result(slot).unwrap_or_else(|| {
            warn!("no DL decision generated for slot {} cc={}", slot, cc);
            DlSchedResult::default()
        }))
    }

    /// Uplink decision for `slot` on carrier `cc`
    pub fn ul_sched(&self, slot: SlotPoint, cc: u32) -> Result<UlSchedResult, SchedError> {
        let mut inner = self.lock();
        if !inner.configured {
            return Err(SchedError::NotConfigured);
        }
        if cc as usize >= inner.cells.len() {
            return Err(SchedError::UnknownCell(cc));
        }
        Self::new_tti(&mut inner, slot);
        Ok(inner.cells[cc as usize].ul_result(slot).unwrap_or_else(|| {
            warn!("no UL decision generated for slot {} cc={}", slot, cc);
            UlSchedResult::default()
        }))
    }

    /// Drop all scheduling and user state; carrier configuration survives
    pub fn reset(&self) {
        let mut inner = self.lock();
        for cell in &mut inner.cells {
            cell.reset();
        }
        inner.ue_db.clear();
        inner.last_slot = None;
    }

    /// Generate the decision for `slot` on every carrier, if not yet
    /// generated for this tick
    fn new_tti(inner: &mut SchedInner, slot: SlotPoint) {
        match inner.last_slot {
            Some(last) if !(slot > last) => {}
            _ => inner.last_slot = Some(slot),
        }

        let SchedInner { cells, ue_db, .. } = inner;
        for cell in cells.iter_mut() {
            if !cell.is_generated(slot) {
                cell.generate(slot, ue_db);
            }
        }
    }

    /// Access a user under the scheduler mutex, with uniform logging of
    /// unknown RNTIs
    fn ue_db_access<R>(
        &self,
        rnti: Rnti,
        op: &str,
        f: impl FnOnce(&mut Ue) -> R,
    ) -> Result<R, SchedError> {
        let mut inner = self.lock();
        match inner.ue_db.get_mut(&rnti) {
            Some(ue) => Ok(f(ue)),
            None => Err(unknown_rnti(rnti, op)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_cell_cfg, test_ue_cfg};
    use crate::ue::BearerDirection;

    fn slot(n: u32) -> SlotPoint {
        SlotPoint::new(0, 0, 0) + n
    }

    fn configured_sched() -> Scheduler {
        crate::test_support::init_test_logging();
        let sched = Scheduler::new(SchedCfg::default());
        sched.cell_cfg(&[test_cell_cfg()]).unwrap();
        sched
    }

    #[test]
    fn test_unconfigured_rejects_sched_calls() {
        let sched = Scheduler::new(SchedCfg::default());
        assert!(matches!(
            sched.dl_sched(slot(0), 0),
            Err(SchedError::NotConfigured)
        ));
        assert!(matches!(
            sched.ue_cfg(Rnti(0x4601), test_ue_cfg()),
            Err(SchedError::UnknownCell(0))
        ));
    }

    #[test]
    fn test_unknown_rnti_paths() {
        let sched = configured_sched();
        assert!(matches!(
            sched.ul_bsr(Rnti(0x4601), LcgId(0), 100),
            Err(SchedError::UnknownRnti(_))
        ));
        assert!(matches!(
            sched.ue_rem(Rnti(0x4601)),
            Err(SchedError::UnknownRnti(_))
        ));
        assert!(!sched.ue_exists(Rnti(0x4601)));

        sched.ue_cfg(Rnti(0x4601), test_ue_cfg()).unwrap();
        assert!(sched.ue_exists(Rnti(0x4601)));
        sched.ue_rem(Rnti(0x4601)).unwrap();
        assert!(!sched.ue_exists(Rnti(0x4601)));
    }

    #[test]
    fn test_generation_is_idempotent_per_slot() {
        let sched = configured_sched();
        let rnti = Rnti(0x4601);
        sched.ue_cfg(rnti, test_ue_cfg()).unwrap();
        sched
            .bearer_ue_cfg(
                rnti,
                LcId(1),
                BearerCfg {
                    direction: BearerDirection::Both,
                    group: LcgId(0),
                },
            )
            .unwrap();
        sched.dl_buffer_state(rnti, LcId(1), 100, 0).unwrap();

        let first = sched.dl_sched(slot(0), 0).unwrap();
        assert_eq!(first.dcis.len(), 1);
        // A second query for the same tick returns the same decision
        // without scheduling twice
        let second = sched.dl_sched(slot(0), 0).unwrap();
        assert_eq!(second.dcis.len(), 1);
        assert_eq!(second.dcis, first.dcis);
        // The UL projection of the same tick comes from the same pass
        let ul = sched.ul_sched(slot(0), 0).unwrap();
        assert!(ul.dcis.is_empty());
    }

    #[test]
    fn test_end_to_end_rar_and_data() {
        let sched = configured_sched();
        let tc_rnti = Rnti(0x4601);
        sched
            .dl_rach_info(
                0,
                RarInfo {
                    preamble_idx: 1,
                    ta_cmd: 5,
                    temp_crnti: tc_rnti,
                    msg3_size: 7,
                    prach_slot: slot(0),
                },
            )
            .unwrap();

        let dl = sched.dl_sched(slot(0), 0).unwrap();
        assert_eq!(dl.rars.len(), 1);
        assert_eq!(dl.rars[0].temp_crnti, tc_rnti);

        // Attach the user and drive a data grant plus its feedback
        sched.ue_cfg(tc_rnti, test_ue_cfg()).unwrap();
        sched
            .bearer_ue_cfg(
                tc_rnti,
                LcId(1),
                BearerCfg {
                    direction: BearerDirection::Dl,
                    group: LcgId(0),
                },
            )
            .unwrap();
        sched.dl_buffer_state(tc_rnti, LcId(1), 64, 0).unwrap();

        let dl1 = sched.dl_sched(slot(1), 0).unwrap();
        assert_eq!(dl1.pdschs.len(), 1);
        // The acknowledgement opportunity shows up four slots later
        let ul5 = sched.ul_sched(slot(5), 0).unwrap();
        assert_eq!(ul5.pucchs.len(), 1);
        assert_eq!(ul5.pucchs[0].rnti, tc_rnti);
        sched.dl_ack_info(slot(5), tc_rnti, 0, 0, true).unwrap();
    }

    #[test]
    fn test_reset_clears_users() {
        let sched = configured_sched();
        sched.ue_cfg(Rnti(0x4601), test_ue_cfg()).unwrap();
        sched.reset();
        assert!(!sched.ue_exists(Rnti(0x4601)));
        // Carriers stay configured after a reset
        assert!(sched.dl_sched(slot(0), 0).is_ok());
    }
}
