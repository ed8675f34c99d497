//! The calibration session configuration, validated before any register is touched

use super::{
    chip::ChipSet,
    controller::DemuxMode,
    hmcad1511::ChannelInput,
    pattern::{
        SettleDelay,
        TestPattern,
    },
    taps::{
        RampScoring,
        TapStrategy,
    },
};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid chip `{0}`, expected one of a, b or c")]
    InvalidChip(char),
    #[error("At least one chip must be selected")]
    NoChips,
    #[error("Invalid demux mode `{0}`, expected 1, 2 or 4")]
    InvalidDemux(String),
    #[error("Invalid test pattern `{0}`, expected ramp, deskew, sync or a binary literal of at most 8 bits")]
    InvalidPattern(String),
    #[error("Only the 8 bit resolution HMCAD1511 is supported, got `{0}`")]
    UnsupportedResolution(String),
    #[error("Input routing {inputs:?} doesn't match demux mode {demux}")]
    InputsMismatch {
        inputs: ChannelInput,
        demux: DemuxMode,
    },
    #[error("Input routing {0:?} names an input outside 1 to 4")]
    InputsOutOfRange(ChannelInput),
    #[error("The bitslip aligner needs at least one pass")]
    NoBitslipPasses,
}

/// What to do when the line clock isn't locked during preflight
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum LockPolicy {
    /// Log and keep going, lock can assert late
    #[default]
    Warn,
    /// Abort the calibration
    Fail,
}

/// Everything a calibration run needs to know, passed explicitly to every component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationConfig {
    /// Chips to calibrate
    pub chips: ChipSet,
    /// Demultiplexing mode, shared by the chips and the FPGA
    pub demux: DemuxMode,
    /// Pattern scored during the tap sweep
    pub test_pattern: TestPattern,
    /// Fixed wait after reprogramming the output pattern
    pub settle: SettleDelay,
    pub lock_policy: LockPolicy,
    pub tap_strategy: TapStrategy,
    pub ramp_scoring: RampScoring,
    /// Cap on bitslip correction passes per chip
    pub max_bitslip_passes: usize,
    /// Cross point input routing, left at the chip default when unset
    pub inputs: Option<ChannelInput>,
    /// Measure the FPGA clock through `sys_clkcounter` during preflight
    pub report_board_clock: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            chips: ChipSet::default(),
            demux: DemuxMode::default(),
            test_pattern: TestPattern::Deskew,
            settle: SettleDelay::default(),
            lock_policy: LockPolicy::default(),
            tap_strategy: TapStrategy::default(),
            ramp_scoring: RampScoring::default(),
            max_bitslip_passes: 8,
            inputs: None,
            report_board_clock: false,
        }
    }
}

impl CalibrationConfig {
    #[must_use]
    pub fn builder() -> CalibrationConfigBuilder {
        CalibrationConfigBuilder::default()
    }

    /// # Errors
    /// Returns an error if the settings contradict each other
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bitslip_passes == 0 {
            return Err(ConfigError::NoBitslipPasses);
        }
        if let Some(inputs) = self.inputs {
            if inputs.per_core().is_none() {
                return Err(ConfigError::InputsOutOfRange(inputs));
            }
            if inputs.demux() != self.demux {
                return Err(ConfigError::InputsMismatch {
                    inputs,
                    demux: self.demux,
                });
            }
        }
        Ok(())
    }
}

/// Builds a [`CalibrationConfig`], validating it on [`CalibrationConfigBuilder::build`]
#[derive(Debug, Default, Clone)]
pub struct CalibrationConfigBuilder {
    config: CalibrationConfig,
}

impl CalibrationConfigBuilder {
    /// Start from the metadata the toolflow attaches to the ADC yellow block
    /// # Errors
    /// Returns an error on resolutions other than 8 bits or an unknown input count
    pub fn from_fpg_metadata(adc_resolution: &str, snap_inputs: &str) -> Result<Self, ConfigError> {
        if adc_resolution.trim() != "8" {
            return Err(ConfigError::UnsupportedResolution(adc_resolution.to_string()));
        }
        let demux = DemuxMode::from_snap_inputs(snap_inputs)?;
        Ok(Self::default().demux(demux))
    }

    #[must_use]
    pub fn chips(mut self, chips: ChipSet) -> Self {
        self.config.chips = chips;
        self
    }

    #[must_use]
    pub fn demux(mut self, demux: DemuxMode) -> Self {
        self.config.demux = demux;
        self
    }

    #[must_use]
    pub fn test_pattern(mut self, pattern: TestPattern) -> Self {
        self.config.test_pattern = pattern;
        self
    }

    #[must_use]
    pub fn settle(mut self, delay: Duration) -> Self {
        self.config.settle = SettleDelay::new(delay);
        self
    }

    #[must_use]
    pub fn lock_policy(mut self, policy: LockPolicy) -> Self {
        self.config.lock_policy = policy;
        self
    }

    #[must_use]
    pub fn tap_strategy(mut self, strategy: TapStrategy) -> Self {
        self.config.tap_strategy = strategy;
        self
    }

    #[must_use]
    pub fn ramp_scoring(mut self, scoring: RampScoring) -> Self {
        self.config.ramp_scoring = scoring;
        self
    }

    #[must_use]
    pub fn max_bitslip_passes(mut self, passes: usize) -> Self {
        self.config.max_bitslip_passes = passes;
        self
    }

    #[must_use]
    pub fn inputs(mut self, inputs: ChannelInput) -> Self {
        self.config.inputs = Some(inputs);
        self
    }

    #[must_use]
    pub fn report_board_clock(mut self, report: bool) -> Self {
        self.config.report_board_clock = report;
        self
    }

    /// # Errors
    /// Returns an error if the settings contradict each other
    pub fn build(self) -> Result<CalibrationConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
