//! ADC chip identifiers and the chip select word that addresses them

use super::config::ConfigError;
use packed_struct::prelude::*;
use std::{
    fmt,
    str::FromStr,
};

/// One of the HMCAD1511 chips on the board
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Chip {
    A,
    B,
    C,
}

impl Chip {
    pub const ALL: [Chip; 3] = [Chip::A, Chip::B, Chip::C];

    /// The chip's position, which is both its chip select bit and its capture RAM index
    #[must_use]
    pub fn index(self) -> u8 {
        match self {
            Chip::A => 0,
            Chip::B => 1,
            Chip::C => 2,
        }
    }

    /// Name of the capture RAM holding this chip's snapshots
    #[must_use]
    pub fn ram_name(self) -> String {
        format!("adc16_wb_ram{}", self.index())
    }
}

impl TryFrom<char> for Chip {
    type Error = ConfigError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c.to_ascii_lowercase() {
            'a' => Ok(Chip::A),
            'b' => Ok(Chip::B),
            'c' => Ok(Chip::C),
            _ => Err(ConfigError::InvalidChip(c)),
        }
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Chip::A => 'a',
            Chip::B => 'b',
            Chip::C => 'c',
        };
        write!(f, "{c}")
    }
}

/// An ordered, deduplicated, non-empty set of chips
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipSet(Vec<Chip>);

impl ChipSet {
    /// # Errors
    /// Returns an error if no chips are given
    pub fn new(chips: impl IntoIterator<Item = Chip>) -> Result<Self, ConfigError> {
        let mut chips: Vec<_> = chips.into_iter().collect();
        chips.sort_unstable();
        chips.dedup();
        if chips.is_empty() {
            return Err(ConfigError::NoChips);
        }
        Ok(Self(chips))
    }

    /// Every chip on the board
    #[must_use]
    pub fn all() -> Self {
        Self(Chip::ALL.to_vec())
    }

    pub fn iter(&self) -> impl Iterator<Item = Chip> + '_ {
        self.0.iter().copied()
    }

    /// The chip select word that broadcasts to every chip in the set
    #[must_use]
    pub fn select(&self) -> ChipSelect {
        self.iter().fold(ChipSelect::default(), |cs, chip| cs | chip.into())
    }
}

impl Default for ChipSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromStr for ChipSet {
    type Err = ConfigError;

    /// Parses chip letters, i.e. `"abc"` or `"a,C"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chips = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ',')
            .map(Chip::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(chips)
    }
}

/// One-hot chip select bits, shared by the 3-wire word and the bitslip field of the control word
#[derive(PackedStruct, Default, Debug, PartialEq, Eq, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
#[allow(clippy::struct_excessive_bools)]
pub struct ChipSelect {
    #[packed_field(bits = "0")]
    pub a: bool,
    #[packed_field(bits = "1")]
    pub b: bool,
    #[packed_field(bits = "2")]
    pub c: bool,
    #[packed_field(bits = "3")]
    pub d: bool,
    #[packed_field(bits = "4")]
    pub e: bool,
    #[packed_field(bits = "5")]
    pub f: bool,
    #[packed_field(bits = "6")]
    pub g: bool,
    #[packed_field(bits = "7")]
    pub h: bool,
}

impl ChipSelect {
    /// Nothing selected, the 3-wire idle state
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::none()
    }
}

impl From<Chip> for ChipSelect {
    fn from(chip: Chip) -> Self {
        match chip {
            Chip::A => Self {
                a: true,
                ..Default::default()
            },
            Chip::B => Self {
                b: true,
                ..Default::default()
            },
            Chip::C => Self {
                c: true,
                ..Default::default()
            },
        }
    }
}

impl std::ops::BitOr for ChipSelect {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            a: self.a | rhs.a,
            b: self.b | rhs.b,
            c: self.c | rhs.c,
            d: self.d | rhs.d,
            e: self.e | rhs.e,
            f: self.f | rhs.f,
            g: self.g | rhs.g,
            h: self.h | rhs.h,
        }
    }
}
