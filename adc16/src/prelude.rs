//! Prelude (helpful reexports) for this package

pub use crate::{
    transport::{
        mock::Mock,
        sim::SimBoard,
        Transport,
    },
    yellow_blocks::snapadc::{
        Calibration,
        CalibrationConfig,
        CalibrationReport,
        CalibrationState,
        Channel,
        Chip,
        ChipSet,
        DemuxMode,
        Failure,
        LockPolicy,
        TestPattern,
    },
};
