//! A simulated SNAP board, modeling the ADC16 controller gateware and three HMCAD1511 chips at the
//! register level.
//!
//! The controller words behave like the gateware: word 0 drives the 3-wire bus, word 1 carries the
//! one-hot control bits, and words 2 and 3 latch the delay tap on rising strobe edges. Every lane
//! has a delay tap "eye" outside of which its samples pick up bit errors, and a framing offset
//! that only bitslips undo.

use super::{
    Error,
    Transport,
    TransportResult,
};
use crate::{
    core::{
        Register,
        RegisterMap,
    },
    yellow_blocks::snapadc::{
        channel::{
            Channel,
            LANES,
        },
        chip::Chip,
        controller::{
            DemuxMode,
            NAME,
        },
        pattern::{
            DESKEW,
            SYNC,
        },
        snapshot::SNAPSHOT_BYTES,
    },
};
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    ops::RangeInclusive,
    time::Instant,
};

const CONTROLLER_BYTES: usize = 16;
const CLOCK_COUNTER: &str = "sys_clkcounter";
/// Rate the simulated `sys_clkcounter` ticks at
const FPGA_CLOCK_MHZ: u128 = 250;
/// Taps that capture cleanly unless told otherwise
const DEFAULT_EYE: RangeInclusive<u8> = 8..=24;

const SCLK: u32 = 1 << 9;
const SDATA: u32 = 1 << 8;
const DEMUX_WRITE: u32 = 1 << 26;
const DEMUX_MODE: u32 = 0b11 << 24;
const SNAP_REQUEST: u32 = 1 << 16;
/// Two chips worth of line clock lock flags, three chips supported, revision 1
const LOCKED: u32 = 0b11 << 28;
const UNLOCKED: u32 = 0b01 << 28;
const STATUS: u32 = (3 << 20) | (1 << 16);

#[derive(Debug, Clone)]
struct SimChip {
    registers: BTreeMap<u8, u16>,
    taps: [u8; LANES],
    eyes: [RangeInclusive<u8>; LANES],
    framing: [u8; LANES],
    slips: [u32; LANES],
}

impl Default for SimChip {
    fn default() -> Self {
        Self {
            registers: BTreeMap::new(),
            taps: [0; LANES],
            eyes: std::array::from_fn(|_| DEFAULT_EYE),
            framing: [0; LANES],
            slips: [0; LANES],
        }
    }
}

impl SimChip {
    fn register(&self, addr: u8) -> u16 {
        self.registers.get(&addr).copied().unwrap_or_default()
    }

    fn program(&mut self, addr: u8, data: u16) {
        if addr == 0x00 && data & 1 == 1 {
            // Software reset self-clears and takes every other register with it
            self.registers.clear();
        } else {
            self.registers.insert(addr, data);
        }
    }

    /// Bits the deserializer boundary is still off by on `lane`
    fn misframing(&self, lane: usize) -> u32 {
        (u32::from(self.framing[lane]) + 8 - self.slips[lane] % 8) % 8
    }

    #[allow(clippy::cast_possible_truncation)]
    fn sample(&self, lane: usize, group: usize) -> u8 {
        let framed = |v: u8| v.rotate_right(self.misframing(lane));
        let value = match (self.register(0x45) & 0b11, (self.register(0x25) >> 4) & 0b111) {
            (1, _) => DESKEW,
            (2, _) => framed(SYNC),
            (_, 0b100) => ((group + lane) & 0xFF) as u8,
            (_, 0b001) => framed((self.register(0x26) >> 8) as u8),
            _ => 0,
        };
        if self.eyes[lane].contains(&self.taps[lane]) {
            value
        } else {
            value ^ (1 << (group % 8))
        }
    }

    fn capture(&self) -> Vec<u8> {
        (0..SNAPSHOT_BYTES)
            .map(|i| self.sample(i % LANES, i / LANES))
            .collect()
    }
}

/// A SNAP board with the ADC16 gateware loaded, simulated in memory
#[derive(Debug, Clone)]
pub struct SimBoard {
    words: [u32; 4],
    chips: [SimChip; 3],
    rams: [Vec<u8>; 3],
    locked: bool,
    demux_supported: bool,
    demux_mode: DemuxMode,
    /// 3-wire bits shifted in so far in the current frame
    shift: u32,
    shifted: u8,
    started: Instant,
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBoard {
    /// A locked board with demux support and every lane's eye at the default taps
    #[must_use]
    pub fn new() -> Self {
        Self {
            words: [SCLK, 0, 0, 0],
            chips: Default::default(),
            rams: std::array::from_fn(|_| vec![0; SNAPSHOT_BYTES]),
            locked: true,
            demux_supported: true,
            demux_mode: DemuxMode::By1,
            shift: 0,
            shifted: 0,
            started: Instant::now(),
        }
    }

    /// Preload a chip register, as if it had been programmed
    #[must_use]
    pub fn with_chip_register(mut self, chip: Chip, addr: u8, data: u16) -> Self {
        self.chip_mut(chip).program(addr, data);
        self
    }

    /// Taps at which `channel` of `chip` captures without errors. An empty range closes the eye.
    #[must_use]
    pub fn with_eye(mut self, chip: Chip, channel: Channel, eye: RangeInclusive<u8>) -> Self {
        self.chip_mut(chip).eyes[channel.index()] = eye;
        self
    }

    /// Misframe `channel` of `chip` by `bits`, needing that many bitslips to undo
    #[must_use]
    pub fn with_framing(mut self, chip: Chip, channel: Channel, bits: u8) -> Self {
        self.chip_mut(chip).framing[channel.index()] = bits % 8;
        self
    }

    /// Latch `tap` into every lane of `chip`, as if its taps had been calibrated
    #[must_use]
    pub fn with_taps(mut self, chip: Chip, tap: u8) -> Self {
        self.chip_mut(chip).taps = [tap; LANES];
        self
    }

    #[must_use]
    pub fn with_lock(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    /// Gateware built without demux support, where the write enable bit reads back as written
    #[must_use]
    pub fn without_demux(mut self) -> Self {
        self.demux_supported = false;
        self
    }

    fn chip(&self, chip: Chip) -> &SimChip {
        &self.chips[usize::from(chip.index())]
    }

    fn chip_mut(&mut self, chip: Chip) -> &mut SimChip {
        &mut self.chips[usize::from(chip.index())]
    }

    /// The last value programmed into register `addr` of `chip`
    #[must_use]
    pub fn chip_register(&self, chip: Chip, addr: u8) -> u16 {
        self.chip(chip).register(addr)
    }

    #[must_use]
    pub fn latched_tap(&self, chip: Chip, channel: Channel) -> u8 {
        self.chip(chip).taps[channel.index()]
    }

    pub fn set_latched_tap(&mut self, chip: Chip, channel: Channel, tap: u8) {
        self.chip_mut(chip).taps[channel.index()] = tap;
    }

    /// Bitslips received per lane of `chip`
    #[must_use]
    pub fn slips(&self, chip: Chip) -> [u32; LANES] {
        self.chip(chip).slips
    }

    #[must_use]
    pub fn demux_mode(&self) -> DemuxMode {
        self.demux_mode
    }

    /// Controller word `i` as the gateware reads it back
    #[must_use]
    pub fn word(&self, i: usize) -> u32 {
        match i {
            0 => {
                let lock = if self.locked { LOCKED } else { UNLOCKED };
                lock | STATUS | (self.words[0] & 0x3FF)
            }
            _ => self.words.get(i).copied().unwrap_or_default(),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn clock_count(&self) -> u32 {
        (self.started.elapsed().as_nanos() * FPGA_CLOCK_MHZ / 1000) as u32
    }

    fn controller_image(&self) -> [u8; CONTROLLER_BYTES] {
        let mut image = [0; CONTROLLER_BYTES];
        for (i, chunk) in image.chunks_exact_mut(4).enumerate() {
            chunk.copy_from_slice(&self.word(i).to_be_bytes());
        }
        image
    }

    fn write_word(&mut self, i: usize, value: u32) {
        let old = self.words[i];
        match i {
            0 => self.three_wire(old, value),
            1 => self.control(old, value),
            _ => self.strobe(i, old, value),
        }
    }

    /// Shift in a bit on every rising clock while a chip is selected
    fn three_wire(&mut self, old: u32, value: u32) {
        let cs = value & 0xFF;
        if cs == 0 {
            self.shift = 0;
            self.shifted = 0;
        } else if value & SCLK != 0 && old & SCLK == 0 {
            self.shift = (self.shift << 1) | u32::from(value & SDATA != 0);
            self.shifted += 1;
            if self.shifted == 24 {
                let [_, addr, hi, lo] = self.shift.to_be_bytes();
                let data = u16::from_be_bytes([hi, lo]);
                for (k, chip) in self.chips.iter_mut().enumerate() {
                    if cs & (1 << k) != 0 {
                        chip.program(addr, data);
                    }
                }
                self.shift = 0;
                self.shifted = 0;
            }
        }
        self.words[0] = value & 0x3FF;
    }

    fn control(&mut self, old: u32, value: u32) {
        let rising = value & !old;
        let lane = ((value >> 5) & 0b111) as usize;
        for (k, chip) in self.chips.iter_mut().enumerate() {
            if rising & (1 << (8 + k)) != 0 {
                chip.slips[lane] += 1;
            }
        }
        if rising & SNAP_REQUEST != 0 {
            for (ram, chip) in self.rams.iter_mut().zip(&self.chips) {
                *ram = chip.capture();
            }
        }
        self.words[1] = if self.demux_supported {
            if value & DEMUX_WRITE != 0 {
                self.demux_mode = match (value & DEMUX_MODE) >> 24 {
                    1 => DemuxMode::By2,
                    2 => DemuxMode::By4,
                    _ => DemuxMode::By1,
                };
            }
            let mode = match self.demux_mode {
                DemuxMode::By1 => 0,
                DemuxMode::By2 => 1,
                DemuxMode::By4 => 2,
            };
            (value & !(DEMUX_WRITE | DEMUX_MODE)) | (mode << 24)
        } else {
            value
        };
    }

    /// Latch the tap in word 1 into every lane whose strobe bit rose
    fn strobe(&mut self, i: usize, old: u32, value: u32) {
        let rising = value & !old;
        let tap = (self.words[1] & 0x1F) as u8;
        for (k, chip) in self.chips.iter_mut().enumerate() {
            for input in 0..4 {
                if rising & (1 << (4 * k + input)) != 0 {
                    chip.taps[2 * input + i - 2] = tap;
                }
            }
        }
        self.words[i] = value;
    }

    fn bounds(device: &str, offset: usize, len: usize, size: usize) -> TransportResult<()> {
        if offset + len > size {
            Err(Error::OutOfBounds {
                device: device.to_string(),
                offset,
                len,
            })
        } else {
            Ok(())
        }
    }

    fn ram_index(device: &str) -> Option<usize> {
        Chip::ALL
            .into_iter()
            .find(|chip| chip.ram_name() == device)
            .map(|chip| usize::from(chip.index()))
    }
}

impl Transport for SimBoard {
    fn is_running(&mut self) -> TransportResult<bool> {
        Ok(true)
    }

    fn read_n_bytes(&mut self, device: &str, offset: usize, n: usize) -> TransportResult<Vec<u8>> {
        if device == NAME {
            Self::bounds(device, offset, n, CONTROLLER_BYTES)?;
            Ok(self.controller_image()[offset..offset + n].to_vec())
        } else if device == CLOCK_COUNTER {
            Self::bounds(device, offset, n, 4)?;
            Ok(self.clock_count().to_be_bytes()[offset..offset + n].to_vec())
        } else if let Some(ram) = Self::ram_index(device) {
            Self::bounds(device, offset, n, SNAPSHOT_BYTES)?;
            Ok(self.rams[ram][offset..offset + n].to_vec())
        } else {
            Err(Error::MissingDevice(device.to_string()))
        }
    }

    fn write_bytes(&mut self, device: &str, offset: usize, data: &[u8]) -> TransportResult<()> {
        if device == NAME {
            Self::bounds(device, offset, data.len(), CONTROLLER_BYTES)?;
            if data.is_empty() {
                return Ok(());
            }
            let mut image = self.controller_image();
            image[offset..offset + data.len()].copy_from_slice(data);
            for i in offset / 4..=(offset + data.len() - 1) / 4 {
                let word = u32::from_be_bytes([
                    image[4 * i],
                    image[4 * i + 1],
                    image[4 * i + 2],
                    image[4 * i + 3],
                ]);
                self.write_word(i, word);
            }
            Ok(())
        } else if device == CLOCK_COUNTER {
            Self::bounds(device, offset, data.len(), 4)
        } else if let Some(ram) = Self::ram_index(device) {
            Self::bounds(device, offset, data.len(), SNAPSHOT_BYTES)?;
            self.rams[ram][offset..offset + data.len()].copy_from_slice(data);
            Ok(())
        } else {
            Err(Error::MissingDevice(device.to_string()))
        }
    }

    fn listdev(&mut self) -> TransportResult<RegisterMap> {
        let mut devices = HashMap::from([
            (
                NAME.into(),
                Register {
                    addr: 0x0,
                    length: CONTROLLER_BYTES,
                },
            ),
            (
                CLOCK_COUNTER.into(),
                Register {
                    addr: 0x100,
                    length: 4,
                },
            ),
        ]);
        for chip in Chip::ALL {
            devices.insert(
                chip.ram_name().into(),
                Register {
                    addr: 0x1000 * (usize::from(chip.index()) + 1),
                    length: SNAPSHOT_BYTES,
                },
            );
        }
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::estimate_fpga_clock,
        yellow_blocks::snapadc::{
            chip::ChipSet,
            controller::Adc16Controller,
        },
    };
    use std::{
        sync::{
            Arc,
            Mutex,
        },
        time::Duration,
    };

    fn ch(name: &str) -> Channel {
        name.parse().unwrap()
    }

    #[test]
    fn test_three_wire_frames() {
        let board = Arc::new(Mutex::new(SimBoard::new()));
        let chips: ChipSet = "ac".parse().unwrap();
        let ctl = Adc16Controller::new(Arc::downgrade(&board), &chips);
        ctl.wire().write_register(0x26, 0xAB00).unwrap();
        let board = board.lock().unwrap();
        assert_eq!(board.chip_register(Chip::A, 0x26), 0xAB00);
        assert_eq!(board.chip_register(Chip::B, 0x26), 0);
        assert_eq!(board.chip_register(Chip::C, 0x26), 0xAB00);
    }

    #[test]
    fn test_reset_clears_registers() {
        let board = Arc::new(Mutex::new(
            SimBoard::new().with_chip_register(Chip::B, 0x45, 2),
        ));
        let ctl = Adc16Controller::new(Arc::downgrade(&board), &ChipSet::all());
        ctl.reset_chips().unwrap();
        assert_eq!(board.lock().unwrap().chip_register(Chip::B, 0x45), 0);
    }

    #[test]
    fn test_status_word() {
        let mut board = SimBoard::new();
        assert_eq!(board.read::<u32, 4>(NAME, 0).unwrap(), 0x3031_0200);
        let mut board = board.with_lock(false);
        assert_eq!(board.read::<u32, 4>(NAME, 0).unwrap(), 0x1031_0200);
    }

    #[test]
    fn test_demux_mode_survives_support_check() {
        let board = Arc::new(Mutex::new(SimBoard::new()));
        let ctl = Adc16Controller::new(Arc::downgrade(&board), &ChipSet::all());
        assert!(ctl.supports_demux().unwrap());
        ctl.set_demux(DemuxMode::By4).unwrap();
        assert_eq!(ctl.get_demux().unwrap(), Some(DemuxMode::By4));
        assert!(ctl.supports_demux().unwrap());
        assert_eq!(board.lock().unwrap().demux_mode(), DemuxMode::By4);
        ctl.set_demux(DemuxMode::By2).unwrap();
        assert_eq!(ctl.get_demux().unwrap(), Some(DemuxMode::By2));
        assert_eq!(board.lock().unwrap().demux_mode(), DemuxMode::By2);

        let board = Arc::new(Mutex::new(SimBoard::new().without_demux()));
        let ctl = Adc16Controller::new(Arc::downgrade(&board), &ChipSet::all());
        assert!(!ctl.supports_demux().unwrap());
        assert_eq!(ctl.get_demux().unwrap(), None);
        assert_eq!(board.lock().unwrap().word(1), 0);
    }

    #[test]
    fn test_strobes_latch_taps() {
        let mut board = SimBoard::new();
        board.write::<u32, 4>(NAME, 4, &17).unwrap();
        // Chip B, input 3, both lane groups
        board.write::<u32, 4>(NAME, 8, &0x40).unwrap();
        board.write::<u32, 4>(NAME, 12, &0x40).unwrap();
        assert_eq!(board.latched_tap(Chip::B, ch("3a")), 17);
        assert_eq!(board.latched_tap(Chip::B, ch("3b")), 17);
        assert_eq!(board.latched_tap(Chip::B, ch("2a")), 0);
        // Holding the strobe high doesn't latch again
        board.write::<u32, 4>(NAME, 4, &5).unwrap();
        board.write::<u32, 4>(NAME, 8, &0x40).unwrap();
        assert_eq!(board.latched_tap(Chip::B, ch("3a")), 17);
    }

    #[test]
    fn test_capture_patterns() {
        let mut board = SimBoard::new()
            .with_chip_register(Chip::A, 0x25, 0x0010)
            .with_chip_register(Chip::A, 0x26, 0x7000)
            .with_framing(Chip::A, ch("1b"), 4)
            .with_chip_register(Chip::C, 0x25, 0x0040)
            .with_taps(Chip::C, 16);
        board.set_latched_tap(Chip::A, ch("1a"), 16);
        board.set_latched_tap(Chip::A, ch("1b"), 16);
        board.write::<u32, 4>(NAME, 4, &SNAP_REQUEST).unwrap();
        let a = board.read_n_bytes("adc16_wb_ram0", 0, 8).unwrap();
        assert_eq!(a[0], SYNC);
        assert_eq!(a[1], SYNC.rotate_right(4));
        // Tap 0 is outside the default eye, so bit 0 is flipped in the first group
        assert_eq!(a[2], SYNC ^ 1);
        let c = board.read_n_bytes("adc16_wb_ram2", 8, 8).unwrap();
        assert_eq!(c, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_bitslip_counts() {
        let mut board = SimBoard::new();
        // Lane 6 of chip C
        board.write::<u32, 4>(NAME, 4, &0x04C0).unwrap();
        board.write::<u32, 4>(NAME, 4, &0).unwrap();
        board.write::<u32, 4>(NAME, 4, &0x04C0).unwrap();
        assert_eq!(board.slips(Chip::C), [0, 0, 0, 0, 0, 0, 2, 0]);
        assert_eq!(board.slips(Chip::A), [0; LANES]);
    }

    #[test]
    fn test_missing_device() {
        let mut board = SimBoard::new();
        assert!(matches!(
            board.read_n_bytes("adc16_wb_ram3", 0, 4),
            Err(Error::MissingDevice(_))
        ));
        assert!(matches!(
            board.read_n_bytes(NAME, 12, 8),
            Err(Error::OutOfBounds { .. })
        ));
        assert_eq!(board.listdev().unwrap().len(), 5);
    }

    #[test]
    fn test_clock_counter_runs() {
        let mut board = SimBoard::new();
        let mhz = estimate_fpga_clock(&mut board, Duration::from_millis(20)).unwrap();
        assert!(mhz > 0.0);
    }
}
