//! Shared fixtures for the unit tests: a 52 PRB FDD cell with one BWP,
//! one 8 CCE coreset and the common/UE search spaces the allocator uses.

use crate::cfg::{
    BwpCfg, BwpParams, CellCfg, CoresetCfg, PdcchCfg, PucchCfg, PucchResourceCfg, SearchSpaceCfg,
    SearchSpaceType, UeBwpCfg, UeCfg,
};
use common::{CellId, Pci, Rnti, SubcarrierSpacing};
use std::sync::{Arc, Once};

static LOG_INIT: Once = Once::new();

/// Route scheduler logs through a test subscriber, honouring RUST_LOG
pub(crate) fn init_test_logging() {
    LOG_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub(crate) fn test_cell_cfg() -> CellCfg {
    CellCfg {
        cell_id: CellId(1),
        pci: Pci(1),
        scs: SubcarrierSpacing::Scs15,
        nof_prb: 52,
        tdd: None,
        bwps: vec![BwpCfg {
            bwp_id: 0,
            rb_width: 52,
            start_rb: 0,
            rbg_size_config_1: true,
            pdcch: PdcchCfg {
                coresets: vec![CoresetCfg {
                    id: 0,
                    duration: 1,
                    freq_resources: vec![true; 8],
                    reg_bundle_size: 6,
                    interleaved: false,
                    shift: 0,
                }],
                search_spaces: vec![SearchSpaceCfg {
                    id: 0,
                    coreset_id: 0,
                    ss_type: SearchSpaceType::Common,
                    nof_candidates: [0, 0, 2, 1, 0],
                }],
                ra_search_space_id: 0,
            },
        }],
    }
}

pub(crate) fn test_ue_cfg() -> UeCfg {
    UeCfg {
        cc: 0,
        active_bwp_id: 0,
        maxharq_tx: 4,
        search_spaces: vec![SearchSpaceCfg {
            id: 1,
            coreset_id: 0,
            ss_type: SearchSpaceType::UeSpecific,
            nof_candidates: [0, 0, 2, 1, 0],
        }],
        pucch: PucchCfg {
            resources: vec![PucchResourceCfg {
                id: 0,
                starting_prb: 51,
            }],
        },
    }
}

pub(crate) fn test_bwp_params() -> Arc<BwpParams> {
    Arc::new(BwpParams::new(&test_cell_cfg(), 0, 0).unwrap())
}

pub(crate) fn test_ue_bwp_cfg(rnti: Rnti) -> UeBwpCfg {
    UeBwpCfg::new(rnti, test_bwp_params(), test_ue_cfg()).unwrap()
}
