//! Interface to the HMCAD1511 ADCs on the SNAP board and the SERDES calibration of their lanes
pub mod bitslip;
pub mod calibration;
pub mod channel;
pub mod chip;
pub mod config;
pub mod controller;
pub mod hmcad1511;
pub mod monitor;
pub mod pattern;
pub mod snapshot;
pub mod taps;
pub mod threewire;

pub use self::{
    bitslip::{
        BitslipAligner,
        BitslipReport,
    },
    calibration::{
        Calibration,
        CalibrationReport,
        CalibrationState,
        ChipReport,
        Failure,
    },
    channel::Channel,
    chip::{
        Chip,
        ChipSet,
    },
    config::{
        CalibrationConfig,
        ConfigError,
        LockPolicy,
    },
    controller::{
        Adc16Controller,
        DemuxMode,
    },
    monitor::ClockMonitor,
    pattern::{
        PatternController,
        TestPattern,
    },
    snapshot::{
        Snapshot,
        SnapshotReader,
    },
    taps::{
        ErrorMatrix,
        RampScoring,
        TapCalibrator,
        TapSelection,
        TapStrategy,
        TapValue,
    },
    threewire::ThreeWire,
};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] crate::transport::Error),
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("The loaded design has no `{0}`, it isn't ADC16 based")]
    DesignMismatch(&'static str),
    #[error("The ADC line clock isn't locked (status word {status:#010x})")]
    ClockNotLocked { status: u32 },
    #[error("No error free delay tap for chip {chip} on {}", fmt_lanes(.channels))]
    CalibrationRange { chip: Chip, channels: Vec<Channel> },
    #[error("Chip {chip} lanes {} still misaligned after {passes} bitslip passes", fmt_lanes(.lanes))]
    BitslipNotConverged {
        chip: Chip,
        lanes: Vec<Channel>,
        passes: usize,
    },
}

fn fmt_lanes(lanes: &[Channel]) -> String {
    lanes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The part of the calibration a failure came from
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Component {
    Controller,
    BitSerialProgrammer,
    PatternController,
    TapCalibrator,
    BitslipAligner,
    ClockMonitor,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Controller => "ADC16 controller",
            Component::BitSerialProgrammer => "3-wire programmer",
            Component::PatternController => "pattern controller",
            Component::TapCalibrator => "tap calibrator",
            Component::BitslipAligner => "bitslip aligner",
            Component::ClockMonitor => "clock monitor",
        };
        write!(f, "{name}")
    }
}
