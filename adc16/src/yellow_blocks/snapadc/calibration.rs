//! The full bring-up and SERDES calibration sequence.
//!
//! A [`Calibration`] walks the chips through reset, mode configuration and power up, checks the
//! line clock and the design, sweeps and sets the delay taps, aligns lane framing, and finally
//! returns the chips to sampled data. Any failure parks the session in
//! [`CalibrationState::Failed`]; nothing is retried.

use super::{
    bitslip::{
        BitslipAligner,
        BitslipReport,
    },
    chip::Chip,
    channel::Channel,
    config::{
        CalibrationConfig,
        ConfigError,
        LockPolicy,
    },
    controller::{
        Adc16Controller,
        DemuxMode,
        NAME,
    },
    monitor::ClockMonitor,
    pattern::{
        PatternController,
        TestPattern,
    },
    taps::{
        ErrorMatrix,
        TapCalibrator,
        TapSelection,
    },
    Component,
    Error,
};
use crate::transport::Transport;
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

/// Window over which the FPGA clock counter is sampled
const CLOCK_ESTIMATE_WINDOW: Duration = Duration::from_millis(100);

/// Where a calibration session is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationState {
    Uninitialized,
    Reset,
    PoweredDown,
    ModeConfigured,
    PoweredUp,
    ClockChecked,
    DesignChecked,
    TapCalibrated,
    LaneSynced,
    Calibrated,
    /// Terminal until the session is restarted
    Failed {
        component: Component,
        reason: String,
    },
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationState::Uninitialized => write!(f, "uninitialized"),
            CalibrationState::Reset => write!(f, "reset"),
            CalibrationState::PoweredDown => write!(f, "powered down"),
            CalibrationState::ModeConfigured => write!(f, "mode configured"),
            CalibrationState::PoweredUp => write!(f, "powered up"),
            CalibrationState::ClockChecked => write!(f, "clock checked"),
            CalibrationState::DesignChecked => write!(f, "design checked"),
            CalibrationState::TapCalibrated => write!(f, "taps calibrated"),
            CalibrationState::LaneSynced => write!(f, "lanes synced"),
            CalibrationState::Calibrated => write!(f, "calibrated"),
            CalibrationState::Failed { component, reason } => {
                write!(f, "failed in the {component}: {reason}")
            }
        }
    }
}

/// A calibration run that stopped, with the step it stopped in
#[derive(Debug, thiserror::Error)]
#[error("Calibration failed in the {component} after reaching `{state}`")]
pub struct Failure {
    pub component: Component,
    /// The last state the session reached before failing
    pub state: CalibrationState,
    #[source]
    pub source: Error,
}

/// Calibration results for one chip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipReport {
    pub chip: Chip,
    /// The tap sweep this chip's taps were picked from
    pub errors: ErrorMatrix,
    pub taps: BTreeMap<Channel, TapSelection>,
    pub bitslip: BitslipReport,
}

/// Everything a successful calibration found out
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    pub clock_locked: bool,
    /// Whether the gateware accepted the demux mode
    pub demux_supported: bool,
    /// Estimated FPGA clock, when requested
    pub board_clock_mhz: Option<f64>,
    pub chips: Vec<ChipReport>,
}

/// A calibration session over one board
#[derive(Debug)]
pub struct Calibration<T> {
    config: CalibrationConfig,
    state: CalibrationState,
    controller: Adc16Controller<T>,
    patterns: PatternController<T>,
    taps: TapCalibrator<T>,
    aligner: BitslipAligner<T>,
    monitor: ClockMonitor<T>,
}

impl<T> Calibration<T>
where
    T: Transport,
{
    /// Sets up every component against the shared transport. No register is touched until
    /// [`Calibration::run`].
    /// # Errors
    /// Returns an error if `config` doesn't validate
    pub fn new(transport: &Arc<Mutex<T>>, config: CalibrationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let controller = Adc16Controller::new(Arc::downgrade(transport), &config.chips);
        let patterns = PatternController::new(controller.wire().clone(), config.settle);
        let taps = TapCalibrator::new(transport, config.tap_strategy, config.ramp_scoring);
        let aligner = BitslipAligner::new(transport, config.max_bitslip_passes);
        let monitor = ClockMonitor::new(transport);
        Ok(Self {
            config,
            state: CalibrationState::Uninitialized,
            controller,
            patterns,
            taps,
            aligner,
            monitor,
        })
    }

    #[must_use]
    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    #[must_use]
    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Return to [`CalibrationState::Uninitialized`], clearing any failure
    pub fn reset_session(&mut self) {
        self.state = CalibrationState::Uninitialized;
    }

    fn enter(&mut self, state: CalibrationState) {
        info!(%state, "Calibration state");
        self.state = state;
    }

    /// Run one step, parking the session in `Failed` if it errors
    fn attempt<R>(
        &mut self,
        component: Component,
        step: impl FnOnce(&mut Self) -> Result<R, Error>,
    ) -> Result<R, Failure> {
        step(self).map_err(|source| {
            error!(%component, %source, "Calibration step failed");
            let state = std::mem::replace(
                &mut self.state,
                CalibrationState::Failed {
                    component,
                    reason: source.to_string(),
                },
            );
            Failure {
                component,
                state,
                source,
            }
        })
    }

    /// Run the whole sequence from the top. A previous failure is discarded, the chips are reset
    /// again.
    /// # Errors
    /// Returns the failing component and its error. The session stays failed afterwards.
    pub fn run(&mut self) -> Result<CalibrationReport, Failure> {
        self.reset_session();
        let demux = self.config.demux;

        self.attempt(Component::BitSerialProgrammer, |c| {
            c.controller.reset_chips()
        })?;
        self.enter(CalibrationState::Reset);

        self.attempt(Component::BitSerialProgrammer, |c| c.controller.power_down())?;
        self.enter(CalibrationState::PoweredDown);

        let demux_supported = self.attempt(Component::Controller, |c| {
            c.controller.set_demux_adc(demux)?;
            let supported = c.controller.supports_demux()?;
            if supported {
                c.controller.set_demux(demux)?;
            } else if demux != DemuxMode::By1 {
                warn!(%demux, "Gateware doesn't support demux modes, FPGA side left alone");
            }
            if let Some(inputs) = c.config.inputs {
                c.controller.select_inputs(inputs)?;
            }
            Ok(supported)
        })?;
        self.enter(CalibrationState::ModeConfigured);

        self.attempt(Component::BitSerialProgrammer, |c| c.controller.power_up())?;
        self.enter(CalibrationState::PoweredUp);

        let (clock_locked, board_clock_mhz) =
            self.attempt(Component::ClockMonitor, Self::check_clock)?;
        self.enter(CalibrationState::ClockChecked);

        self.attempt(Component::ClockMonitor, |c| {
            if c.monitor.is_expected_design_present()? {
                debug!("Design is ADC16 based");
                Ok(())
            } else {
                Err(Error::DesignMismatch(NAME))
            }
        })?;
        self.enter(CalibrationState::DesignChecked);

        let test_pattern = self.config.test_pattern;
        let expected = self.attempt(Component::PatternController, |c| {
            c.patterns.arm(test_pattern)
        })?;
        let mut chips = vec![];
        for chip in self.config.chips.clone().iter() {
            info!(%chip, "Calibrating delay taps");
            let errors = self.attempt(Component::TapCalibrator, |c| {
                c.taps.sweep_all_lanes(chip, expected)
            })?;
            debug!(%chip, "Tap sweep\n{errors}");
            let taps = self.attempt(Component::TapCalibrator, |c| {
                c.taps.apply_best_taps(chip, &errors)
            })?;
            chips.push(ChipReport {
                chip,
                errors,
                taps,
                bitslip: BitslipReport::default(),
            });
        }
        self.enter(CalibrationState::TapCalibrated);

        self.attempt(Component::PatternController, |c| {
            c.patterns.arm(TestPattern::Sync)
        })?;
        for report in &mut chips {
            let chip = report.chip;
            report.bitslip = self.attempt(Component::BitslipAligner, |c| c.aligner.align(chip))?;
        }
        self.enter(CalibrationState::LaneSynced);

        self.attempt(Component::PatternController, |c| {
            c.patterns.disable_pattern()
        })?;
        self.enter(CalibrationState::Calibrated);

        Ok(CalibrationReport {
            clock_locked,
            demux_supported,
            board_clock_mhz,
            chips,
        })
    }

    fn check_clock(&mut self) -> Result<(bool, Option<f64>), Error> {
        let status = self.monitor.status()?;
        let locked = status.locked();
        if locked {
            info!("ADC clock is locked");
        } else {
            let status = self.monitor.raw_status()?;
            match self.config.lock_policy {
                LockPolicy::Warn => warn!(
                    status = %format_args!("{status:#010x}"),
                    "ADC clock not locked, check the clock source and demux mode"
                ),
                LockPolicy::Fail => return Err(Error::ClockNotLocked { status }),
            }
        }
        let board_clock = if self.config.report_board_clock {
            match self.monitor.board_clock_mhz(CLOCK_ESTIMATE_WINDOW) {
                Ok(mhz) => {
                    info!(mhz, "Estimated FPGA clock");
                    Some(mhz)
                }
                Err(e) => {
                    warn!(error = %e, "Couldn't estimate the FPGA clock");
                    None
                }
            }
        } else {
            None
        };
        Ok((locked, board_clock))
    }
}
