//! Register map for the HMCAD1511 ADC from Analog Devices
//! Only the registers touched while bringing up and calibrating the SERDES link are described here.

use super::controller::DemuxMode;
use adc16_derive::address;
use packed_struct::prelude::*;

#[address(0x00)]
#[derive(Debug, PackedStruct, Default, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
pub struct Reset {
    #[packed_field(bits = "0")]
    /// Self-clearing software reset
    pub(crate) reset: bool,
}

#[address(0x0F)]
#[derive(Debug, PackedStruct, Default, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
pub struct SleepPd {
    #[packed_field(bits = "8")]
    /// Go to sleep mode
    pub(crate) sleep: bool,
    #[packed_field(bits = "9")]
    /// Go to power down
    pub(crate) pd: bool,
}

#[address(0x25)]
#[derive(Debug, PackedStruct, Default, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
/// Selects the test pattern driven onto the LVDS outputs in place of samples
pub struct PatternCtl {
    #[packed_field(bits = "4..=6", ty = "enum")]
    pub(crate) pattern: Pattern,
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone, PartialEq, Eq)]
/// Output pattern type
pub enum Pattern {
    #[default]
    Disabled = 0,
    Ramp = 0b100,
    SingleCustom = 0b001,
}

#[address(0x26)]
#[derive(Debug, PackedStruct, Default, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
/// Bits for custom pattern 1
pub struct CustomPattern1 {
    #[packed_field(bits = "8..=15")]
    pub(crate) bits_custom1: u8,
}

#[address(0x31)]
#[derive(Debug, PackedStruct, Default, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
/// Control for the number of channels and clock division factor
pub struct ChanNumClkDiv {
    #[packed_field(bits = "0..=2", ty = "enum")]
    pub(crate) channel_num: ChannelNum,
    #[packed_field(bits = "8..=9", ty = "enum")]
    pub(crate) clk_divide: ClockDivide,
}

impl ChanNumClkDiv {
    /// Channel count and clock divide for a demux mode, written together so neither clobbers the
    /// other
    #[must_use]
    pub fn for_demux(mode: DemuxMode) -> Self {
        let (channel_num, clk_divide) = match mode {
            DemuxMode::By1 => (ChannelNum::Quad, ClockDivide::_1),
            DemuxMode::By2 => (ChannelNum::Dual, ClockDivide::_2),
            DemuxMode::By4 => (ChannelNum::Single, ClockDivide::_4),
        };
        Self {
            channel_num,
            clk_divide,
        }
    }
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone, PartialEq, Eq)]
/// Number of channels
pub enum ChannelNum {
    /// Single channel by interleaving ADC1 to ADC4
    Single = 0b001,
    /// Dual channel where channel 1 is made by interleaving ADC1 and ADC2, channel 2 by
    /// interleaving ADC3 and ADC4
    Dual = 0b010,
    #[default]
    /// Quad channel where channel 1 corresponds to ADC1, channel2 to ADC2, channel3 to ADC3 and
    /// channel 4 to ADC4
    Quad = 0b100,
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone, PartialEq, Eq)]
/// Clock division factor
pub enum ClockDivide {
    #[default]
    /// Input clock / 1
    _1 = 0,
    /// Input clock / 2
    _2 = 1,
    /// Input clock / 4
    _4 = 2,
    /// Input clock / 8
    _8 = 3,
}

#[address(0x3A)]
#[derive(Debug, PackedStruct, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
/// Input select for adc 1 and 2
pub struct InputSelect12 {
    #[packed_field(bits = "0..=4", ty = "enum")]
    pub(crate) inp_sel_adc1: InputSelect,
    #[packed_field(bits = "8..=12", ty = "enum")]
    pub(crate) inp_sel_adc2: InputSelect,
}

impl Default for InputSelect12 {
    fn default() -> Self {
        Self {
            inp_sel_adc1: InputSelect::_1,
            inp_sel_adc2: InputSelect::_2,
        }
    }
}

#[address(0x3B)]
#[derive(Debug, PackedStruct, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
/// Input select for adc 3 and 4
pub struct InputSelect34 {
    #[packed_field(bits = "0..=4", ty = "enum")]
    pub(crate) inp_sel_adc3: InputSelect,
    #[packed_field(bits = "8..=12", ty = "enum")]
    pub(crate) inp_sel_adc4: InputSelect,
}

impl Default for InputSelect34 {
    fn default() -> Self {
        Self {
            inp_sel_adc3: InputSelect::_3,
            inp_sel_adc4: InputSelect::_4,
        }
    }
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone, PartialEq, Eq)]
/// Input select via cross point switch
pub enum InputSelect {
    #[default]
    /// IP1/IN1
    _1 = 0b00010,
    /// IP2/IN2
    _2 = 0b00100,
    /// IP3/IN3
    _3 = 0b01000,
    /// IP4/IN4
    _4 = 0b10000,
}

impl InputSelect {
    fn from_input(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::_1),
            2 => Some(Self::_2),
            3 => Some(Self::_3),
            4 => Some(Self::_4),
            _ => None,
        }
    }
}

/// Which physical inputs feed the logical channels of a chip, numbered 1 to 4
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelInput {
    /// All four ADC cores interleave one input
    Single(u8),
    /// Cores 1 and 2 interleave the first input, cores 3 and 4 the second
    Dual([u8; 2]),
    /// One input per core
    Quad([u8; 4]),
}

impl ChannelInput {
    /// The demux mode whose channel count matches this routing
    #[must_use]
    pub fn demux(self) -> DemuxMode {
        match self {
            ChannelInput::Single(_) => DemuxMode::By4,
            ChannelInput::Dual(_) => DemuxMode::By2,
            ChannelInput::Quad(_) => DemuxMode::By1,
        }
    }

    /// The input each of the four ADC cores samples, or `None` if an input is outside 1 to 4
    #[must_use]
    pub fn per_core(self) -> Option<[InputSelect; 4]> {
        let inputs = match self {
            ChannelInput::Single(i) => [i; 4],
            ChannelInput::Dual([i, j]) => [i, i, j, j],
            ChannelInput::Quad(q) => q,
        };
        Some([
            InputSelect::from_input(inputs[0])?,
            InputSelect::from_input(inputs[1])?,
            InputSelect::from_input(inputs[2])?,
            InputSelect::from_input(inputs[3])?,
        ])
    }
}

#[address(0x45)]
#[derive(Debug, PackedStruct, Copy, Clone, Default)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
pub struct DeskewSyncPattern {
    #[packed_field(bits = "0..=1", ty = "enum")]
    pub(crate) pat_deskew_sync: DeskewSyncMode,
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone, PartialEq, Eq)]
pub enum DeskewSyncMode {
    #[default]
    Disabled = 0,
    Deskew = 1,
    Sync = 2,
}
