//! The eight SERDES lanes each chip presents to the FPGA

use super::chip::Chip;
use std::{
    fmt,
    str::FromStr,
};

/// Number of lanes per chip
pub const LANES: usize = 8;

/// Which of the two delay strobe words latches a lane's tap
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LaneGroup {
    /// Strobed through controller word 2
    A,
    /// Strobed through controller word 3
    B,
}

impl LaneGroup {
    /// Controller word holding the delay strobes for this group
    #[must_use]
    pub fn strobe_word(self) -> usize {
        match self {
            LaneGroup::A => 2,
            LaneGroup::B => 3,
        }
    }
}

/// A logical lane, named by its input pair (1 to 4) and polarity (a or b), i.e. `2a`.
///
/// Lanes are ordered as they interleave in a snapshot: `1a 1b 2a 2b 3a 3b 4a 4b`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel {
    input: u8,
    group: LaneGroup,
}

impl Channel {
    pub const ALL: [Channel; LANES] = [
        Channel::at(1, LaneGroup::A),
        Channel::at(1, LaneGroup::B),
        Channel::at(2, LaneGroup::A),
        Channel::at(2, LaneGroup::B),
        Channel::at(3, LaneGroup::A),
        Channel::at(3, LaneGroup::B),
        Channel::at(4, LaneGroup::A),
        Channel::at(4, LaneGroup::B),
    ];

    const fn at(input: u8, group: LaneGroup) -> Self {
        Self { input, group }
    }

    /// Builds a channel from its input pair number (1 to 4) and lane group
    #[must_use]
    pub fn new(input: u8, group: LaneGroup) -> Option<Self> {
        (1..=4).contains(&input).then_some(Self { input, group })
    }

    /// The channel at position `index` of the snapshot interleave
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// The bitslip lane number, 0 to 7
    #[must_use]
    pub fn lane(self) -> u8 {
        let group = match self.group {
            LaneGroup::A => 0,
            LaneGroup::B => 1,
        };
        2 * (self.input - 1) + group
    }

    /// Position of this lane within each group of eight snapshot samples
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.lane())
    }

    #[must_use]
    pub fn input(self) -> u8 {
        self.input
    }

    #[must_use]
    pub fn group(self) -> LaneGroup {
        self.group
    }

    /// The strobe bit that latches this lane's delay tap on `chip`. Each chip owns a nibble of the
    /// strobe word, one bit per input pair.
    #[must_use]
    pub fn strobe_mask(self, chip: Chip) -> u32 {
        1 << (4 * u32::from(chip.index()) + u32::from(self.input - 1))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let group = match self.group {
            LaneGroup::A => 'a',
            LaneGroup::B => 'b',
        };
        f.pad(&format!("{}{group}", self.input))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid channel `{0}`, expected an input 1-4 followed by a or b")]
pub struct ParseChannelError(String);

impl FromStr for Channel {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseChannelError(s.to_string());
        let mut chars = s.chars();
        let input = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .and_then(|d| u8::try_from(d).ok())
            .ok_or_else(err)?;
        let group = match chars.next().map(|c| c.to_ascii_lowercase()) {
            Some('a') => LaneGroup::A,
            Some('b') => LaneGroup::B,
            _ => return Err(err()),
        };
        if chars.next().is_some() {
            return Err(err());
        }
        Self::new(input, group).ok_or_else(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave_order() {
        let names: Vec<_> = Channel::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["1a", "1b", "2a", "2b", "3a", "3b", "4a", "4b"]);
        for (i, ch) in Channel::ALL.iter().enumerate() {
            assert_eq!(ch.index(), i);
            assert_eq!(Channel::from_index(i), Some(*ch));
        }
        assert_eq!(Channel::from_index(LANES), None);
    }

    #[test]
    fn test_parse() {
        let ch: Channel = "2a".parse().unwrap();
        assert_eq!(ch.input(), 2);
        assert_eq!(ch.group(), LaneGroup::A);
        assert_eq!("4B".parse::<Channel>().unwrap().index(), 7);
        assert!("5a".parse::<Channel>().is_err());
        assert!("0b".parse::<Channel>().is_err());
        assert!("2c".parse::<Channel>().is_err());
        assert!("2ab".parse::<Channel>().is_err());
    }

    #[test]
    fn test_display_padding() {
        let ch: Channel = "1a".parse().unwrap();
        assert_eq!(format!("[{ch:>4}]"), "[  1a]");
        assert_eq!(format!("[{ch:<3}]"), "[1a ]");
        assert_eq!(format!("[{ch}]"), "[1a]");
    }

    #[test]
    fn test_strobe_masks() {
        // Chip A owns the bottom nibble, with bit n-1 for input pair n
        assert_eq!("1a".parse::<Channel>().unwrap().strobe_mask(Chip::A), 0x001);
        assert_eq!("2b".parse::<Channel>().unwrap().strobe_mask(Chip::A), 0x002);
        assert_eq!("3a".parse::<Channel>().unwrap().strobe_mask(Chip::B), 0x040);
        assert_eq!("4b".parse::<Channel>().unwrap().strobe_mask(Chip::C), 0x800);
        assert_eq!("1a".parse::<Channel>().unwrap().group().strobe_word(), 2);
        assert_eq!("1b".parse::<Channel>().unwrap().group().strobe_word(), 3);
    }
}
