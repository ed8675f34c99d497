//! Switching the chips' LVDS outputs between test patterns and sampled data

use super::{
    config::ConfigError,
    hmcad1511::{
        CustomPattern1,
        DeskewSyncMode,
        DeskewSyncPattern,
        Pattern,
        PatternCtl,
    },
    threewire::ThreeWire,
    Error,
};
use crate::transport::Transport;
use std::{
    fmt,
    str::FromStr,
    time::Duration,
};
use tracing::{
    debug,
    info,
};

/// Byte every lane carries in deskew mode (alternating bits)
pub const DESKEW: u8 = 0x2A;
/// Byte every lane carries in sync mode (one frame of four ones, four zeros)
pub const SYNC: u8 = 0x70;

/// A pattern the chips can emit in place of samples
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TestPattern {
    Ramp,
    Deskew,
    Sync,
    /// An 8-bit literal repeated on every lane
    Custom(u8),
}

impl TestPattern {
    /// What a correctly captured sample looks like under this pattern
    #[must_use]
    pub fn expected(self) -> Expected {
        match self {
            TestPattern::Ramp => Expected::Ramp,
            TestPattern::Deskew => Expected::Value(DESKEW),
            TestPattern::Sync => Expected::Value(SYNC),
            TestPattern::Custom(v) => Expected::Value(v),
        }
    }
}

impl fmt::Display for TestPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestPattern::Ramp => write!(f, "ramp"),
            TestPattern::Deskew => write!(f, "deskew"),
            TestPattern::Sync => write!(f, "sync"),
            TestPattern::Custom(v) => write!(f, "{v:#010b}"),
        }
    }
}

impl FromStr for TestPattern {
    type Err = ConfigError;

    /// Parses `ramp`, `deskew`, `sync` or a binary literal of at most 8 digits
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "ramp" => return Ok(TestPattern::Ramp),
            "deskew" => return Ok(TestPattern::Deskew),
            "sync" => return Ok(TestPattern::Sync),
            _ => (),
        }
        let digits = s.strip_prefix("0b").unwrap_or(s);
        if digits.is_empty() || digits.len() > 8 || !digits.chars().all(|c| c == '0' || c == '1') {
            return Err(ConfigError::InvalidPattern(s.to_string()));
        }
        u8::from_str_radix(digits, 2)
            .map(TestPattern::Custom)
            .map_err(|_| ConfigError::InvalidPattern(s.to_string()))
    }
}

/// The reference every captured sample is scored against
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Expected {
    /// Every sample equals this byte
    Value(u8),
    /// Samples follow the chip's incrementing ramp
    Ramp,
}

/// The fixed wait after reprogramming the output pattern. Nothing on the chips signals the new
/// pattern has reached the outputs, so this is a timing assumption rather than an event wait.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SettleDelay(Duration);

impl SettleDelay {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self(delay)
    }

    #[must_use]
    pub fn duration(self) -> Duration {
        self.0
    }

    /// Block for the settle time
    pub fn wait(self) {
        if !self.0.is_zero() {
            debug!(delay = ?self.0, "Waiting for ADC outputs to settle");
            std::thread::sleep(self.0);
        }
    }
}

impl Default for SettleDelay {
    fn default() -> Self {
        Self(Duration::from_secs(1))
    }
}

/// Programs the output pattern of every chip on a 3-wire bus
#[derive(Debug)]
pub struct PatternController<T> {
    wire: ThreeWire<T>,
    settle: SettleDelay,
    selected: TestPattern,
}

impl<T> PatternController<T>
where
    T: Transport,
{
    pub fn new(wire: ThreeWire<T>, settle: SettleDelay) -> Self {
        Self {
            wire,
            settle,
            selected: TestPattern::Deskew,
        }
    }

    /// Choose the pattern the next [`PatternController::enable_pattern`] programs, returning the
    /// value samples will be scored against
    pub fn select_pattern(&mut self, pattern: TestPattern) -> Expected {
        self.selected = pattern;
        pattern.expected()
    }

    #[must_use]
    pub fn selected(&self) -> TestPattern {
        self.selected
    }

    /// Program the selected pattern into the chips and wait for it to settle
    /// # Errors
    /// Returns an error on bad transport
    pub fn enable_pattern(&self) -> Result<Expected, Error> {
        info!(pattern = %self.selected, "Enabling test pattern");
        self.clear()?;
        match self.selected {
            TestPattern::Ramp => self.wire.send_reg(&PatternCtl {
                pattern: Pattern::Ramp,
            })?,
            TestPattern::Deskew => self.wire.send_reg(&DeskewSyncPattern {
                pat_deskew_sync: DeskewSyncMode::Deskew,
            })?,
            TestPattern::Sync => self.wire.send_reg(&DeskewSyncPattern {
                pat_deskew_sync: DeskewSyncMode::Sync,
            })?,
            TestPattern::Custom(bits) => {
                self.wire.send_reg(&PatternCtl {
                    pattern: Pattern::SingleCustom,
                })?;
                self.wire.send_reg(&CustomPattern1 { bits_custom1: bits })?;
            }
        }
        self.settle.wait();
        Ok(self.selected.expected())
    }

    /// Select and enable in one go
    /// # Errors
    /// Returns an error on bad transport
    pub fn arm(&mut self, pattern: TestPattern) -> Result<Expected, Error> {
        self.select_pattern(pattern);
        self.enable_pattern()
    }

    /// Return the chips to passing through sampled data
    /// # Errors
    /// Returns an error on bad transport
    pub fn disable_pattern(&self) -> Result<(), Error> {
        info!("Disabling test pattern");
        self.clear()
    }

    fn clear(&self) -> Result<(), Error> {
        self.wire.send_reg(&PatternCtl::default())?;
        self.wire.send_reg(&DeskewSyncPattern::default())
    }
}
