//! Per-lane IDELAY tap calibration.
//!
//! Every one of the 32 taps is applied to all eight lanes of a chip at once, a snapshot is scored
//! against the active test pattern, and the resulting error matrix is reduced to one tap per lane
//! inside that lane's error-free window.

use super::{
    channel::{
        Channel,
        LaneGroup,
        LANES,
    },
    chip::Chip,
    controller::{
        AdcControl,
        DelayAStrobe,
        DelayBStrobe,
        NAME,
    },
    pattern::Expected,
    snapshot::{
        Snapshot,
        SnapshotReader,
    },
    Error,
};
use crate::transport::{
    lock,
    upgrade,
    Transport,
};
use indicatif::ProgressBar;
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        Mutex,
        Weak,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

/// Number of delay line settings
pub const TAPS: usize = 32;

/// A delay line setting, 0 to 31
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TapValue(u8);

impl TapValue {
    pub const MAX: TapValue = TapValue(31);

    #[must_use]
    pub fn new(tap: u8) -> Option<Self> {
        (usize::from(tap) < TAPS).then_some(Self(tap))
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    /// Every tap, in sweep order
    pub fn all() -> impl Iterator<Item = TapValue> {
        (0..=Self::MAX.0).map(TapValue)
    }
}

impl fmt::Display for TapValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Mismatch counts, one row per tap and one column per lane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMatrix {
    rows: [[u32; LANES]; TAPS],
}

impl Default for ErrorMatrix {
    fn default() -> Self {
        Self {
            rows: [[0; LANES]; TAPS],
        }
    }
}

impl ErrorMatrix {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn row(&self, tap: TapValue) -> &[u32; LANES] {
        &self.rows[usize::from(tap.0)]
    }

    pub fn set_row(&mut self, tap: TapValue, row: [u32; LANES]) {
        self.rows[usize::from(tap.0)] = row;
    }

    #[must_use]
    pub fn errors(&self, tap: TapValue, channel: Channel) -> u32 {
        self.row(tap)[channel.index()]
    }

    /// Taps at which `channel` captured the pattern without a single error
    #[must_use]
    pub fn good_taps(&self, channel: Channel) -> Vec<TapValue> {
        TapValue::all()
            .filter(|tap| self.errors(*tap, channel) == 0)
            .collect()
    }
}

impl fmt::Display for ErrorMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tap")?;
        for ch in Channel::ALL {
            write!(f, " {ch:>4}")?;
        }
        writeln!(f)?;
        for (tap, row) in self.rows.iter().enumerate() {
            write!(f, "{tap:>3}")?;
            for errors in row {
                write!(f, " {errors:>4}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// How a tap is picked from a lane's error-free taps
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum TapStrategy {
    /// Halfway between the smallest and largest good tap, assuming the good taps are contiguous
    #[default]
    MidpointOfExtremes,
    /// The middle of the longest contiguous run of good taps
    LongestRun,
}

/// How a ramp capture is scored
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum RampScoring {
    /// Compare against a fixed value that no sample can equal, so every sample mismatches
    #[default]
    Reference,
    /// Each lane's samples must count up by one, wrapping. A lane's first sample only seeds the
    /// comparison.
    Incrementing,
}

/// The outcome of picking one lane's tap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapSelection {
    pub channel: Channel,
    pub good_taps: Vec<TapValue>,
    pub tap: TapValue,
    /// Whether the good taps formed one unbroken run
    pub contiguous: bool,
}

/// Whether sorted taps form one unbroken run
fn is_contiguous(taps: &[TapValue]) -> bool {
    taps.windows(2).all(|w| w[1].0 == w[0].0 + 1)
}

/// Picks a tap out of the sorted error-free taps of a lane, or `None` if there are none
#[must_use]
pub fn select_tap(good: &[TapValue], strategy: TapStrategy) -> Option<TapValue> {
    let (first, last) = (good.first()?, good.last()?);
    match strategy {
        TapStrategy::MidpointOfExtremes => Some(TapValue((first.0 + last.0) / 2)),
        TapStrategy::LongestRun => {
            let mut best: &[TapValue] = &good[..1];
            let mut start = 0;
            for i in 1..=good.len() {
                if i == good.len() || good[i].0 != good[i - 1].0 + 1 {
                    let run = &good[start..i];
                    if run.len() > best.len() {
                        best = run;
                    }
                    start = i;
                }
            }
            let (lo, hi) = (best.first()?, best.last()?);
            Some(TapValue((lo.0 + hi.0) / 2))
        }
    }
}

/// Count, per lane, the samples of `snapshot` that don't match `expected`
#[must_use]
pub fn score(snapshot: &Snapshot, expected: Expected, ramp: RampScoring) -> [u32; LANES] {
    let mut errors = [0u32; LANES];
    match (expected, ramp) {
        (Expected::Value(value), _) => {
            for group in snapshot.groups() {
                for (lane, sample) in group.iter().enumerate() {
                    if *sample != value {
                        errors[lane] += 1;
                    }
                }
            }
        }
        (Expected::Ramp, RampScoring::Reference) => {
            for group in snapshot.groups() {
                for errors in errors.iter_mut().take(group.len()) {
                    *errors += 1;
                }
            }
        }
        (Expected::Ramp, RampScoring::Incrementing) => {
            for (lane, errors) in errors.iter_mut().enumerate() {
                let samples: Vec<u8> = snapshot
                    .as_bytes()
                    .iter()
                    .skip(lane)
                    .step_by(LANES)
                    .copied()
                    .collect();
                *errors = samples
                    .windows(2)
                    .filter(|w| w[1] != w[0].wrapping_add(1))
                    .count()
                    .try_into()
                    .unwrap_or(u32::MAX);
            }
        }
    }
    errors
}

/// Sweeps and sets the IDELAY taps of one chip at a time
#[derive(Debug)]
pub struct TapCalibrator<T> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
    snapshots: SnapshotReader<T>,
    strategy: TapStrategy,
    ramp: RampScoring,
}

impl<T> TapCalibrator<T>
where
    T: Transport,
{
    #[must_use]
    pub fn new(transport: &Arc<Mutex<T>>, strategy: TapStrategy, ramp: RampScoring) -> Self {
        Self {
            transport: Arc::downgrade(transport),
            snapshots: SnapshotReader::new(transport),
            strategy,
            ramp,
        }
    }

    /// Latch `tap` into every lane of `chip`
    /// # Errors
    /// Returns an error on bad transport
    pub fn apply_all(&self, chip: Chip, tap: TapValue) -> Result<(), Error> {
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        let mask = 0xF << (4 * u32::from(chip.index()));
        transport.write_addr(NAME, &DelayAStrobe(0))?;
        transport.write_addr(NAME, &DelayBStrobe(0))?;
        transport.write_addr(NAME, &tap_word(tap))?;
        transport.write_addr(NAME, &DelayAStrobe(mask))?;
        transport.write_addr(NAME, &DelayBStrobe(mask))?;
        clear(&mut *transport)
    }

    /// Latch `tap` into one lane of `chip`
    /// # Errors
    /// Returns an error on bad transport
    pub fn apply(&self, chip: Chip, channel: Channel, tap: TapValue) -> Result<(), Error> {
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        let mask = channel.strobe_mask(chip);
        strobe(&mut *transport, channel.group(), 0)?;
        transport.write_addr(NAME, &tap_word(tap))?;
        strobe(&mut *transport, channel.group(), mask)?;
        clear(&mut *transport)
    }

    /// Apply `tap` to every lane of `chip`, capture, and score against `expected`
    /// # Errors
    /// Returns an error on bad transport
    pub fn score(&self, chip: Chip, tap: TapValue, expected: Expected) -> Result<[u32; LANES], Error> {
        self.apply_all(chip, tap)?;
        let snapshot = self.snapshots.capture(chip)?;
        Ok(score(&snapshot, expected, self.ramp))
    }

    /// Score every tap on `chip`
    /// # Errors
    /// Returns an error on bad transport
    pub fn sweep_all_lanes(&self, chip: Chip, expected: Expected) -> Result<ErrorMatrix, Error> {
        let mut matrix = ErrorMatrix::new();
        let bar = ProgressBar::new(TAPS as u64);
        bar.set_message(format!("Sweeping taps of chip {chip}"));
        for tap in TapValue::all() {
            let row = self.score(chip, tap, expected)?;
            debug!(%chip, %tap, errors = ?row, "Scored tap");
            matrix.set_row(tap, row);
            bar.inc(1);
        }
        bar.finish_and_clear();
        Ok(matrix)
    }

    /// Pick and latch a tap for every lane of `chip` from its sweep. Lanes without a single
    /// error-free tap are left alone and reported together once the others are applied.
    /// # Errors
    /// Returns an error on bad transport or if any lane had no error-free tap
    pub fn apply_best_taps(
        &self,
        chip: Chip,
        matrix: &ErrorMatrix,
    ) -> Result<BTreeMap<Channel, TapSelection>, Error> {
        let mut selections = BTreeMap::new();
        let mut failed = vec![];
        for channel in Channel::ALL {
            let good_taps = matrix.good_taps(channel);
            let Some(tap) = select_tap(&good_taps, self.strategy) else {
                warn!(%chip, %channel, "No error free tap");
                failed.push(channel);
                continue;
            };
            let contiguous = is_contiguous(&good_taps);
            if !contiguous {
                warn!(
                    %chip,
                    %channel,
                    good = ?good_taps.iter().map(|t| t.0).collect::<Vec<_>>(),
                    "Error free taps are not contiguous"
                );
            }
            self.apply(chip, channel, tap)?;
            info!(%chip, %channel, %tap, "Set delay tap");
            selections.insert(
                channel,
                TapSelection {
                    channel,
                    good_taps,
                    tap,
                    contiguous,
                },
            );
        }
        if failed.is_empty() {
            Ok(selections)
        } else {
            Err(Error::CalibrationRange {
                chip,
                channels: failed,
            })
        }
    }
}

fn tap_word(tap: TapValue) -> AdcControl {
    AdcControl {
        delay_tap: tap.0.into(),
        ..Default::default()
    }
}

fn strobe<T: Transport>(transport: &mut T, group: LaneGroup, mask: u32) -> Result<(), Error> {
    match group {
        LaneGroup::A => transport.write_addr(NAME, &DelayAStrobe(mask))?,
        LaneGroup::B => transport.write_addr(NAME, &DelayBStrobe(mask))?,
    }
    Ok(())
}

/// Drop the tap and both strobes, leaving the control word at zero
fn clear<T: Transport>(transport: &mut T) -> Result<(), Error> {
    transport.write_addr(NAME, &AdcControl::default())?;
    transport.write_addr(NAME, &DelayAStrobe(0))?;
    transport.write_addr(NAME, &DelayBStrobe(0))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::Register,
        transport::{
            mock::Mock,
            sim::SimBoard,
        },
        yellow_blocks::snapadc::pattern::DESKEW,
    };
    use std::collections::HashMap;

    fn taps(range: std::ops::RangeInclusive<u8>) -> Vec<TapValue> {
        range.map(TapValue).collect()
    }

    fn ch(name: &str) -> Channel {
        name.parse().unwrap()
    }

    fn controller_mock() -> Arc<Mutex<Mock>> {
        Arc::new(Mutex::new(Mock::new(HashMap::from([(
            NAME.into(),
            Register {
                addr: 0,
                length: 16,
            },
        )]))))
    }

    /// A matrix where each lane is error free exactly on `good[lane]`
    fn matrix_with(good: [std::ops::RangeInclusive<u8>; LANES]) -> ErrorMatrix {
        let mut matrix = ErrorMatrix::new();
        for tap in TapValue::all() {
            let mut row = [0; LANES];
            for (lane, range) in good.iter().enumerate() {
                if !range.contains(&tap.0) {
                    row[lane] = 128;
                }
            }
            matrix.set_row(tap, row);
        }
        matrix
    }

    #[test]
    fn test_tap_value_bounds() {
        assert_eq!(TapValue::new(31), Some(TapValue::MAX));
        assert_eq!(TapValue::new(32), None);
        assert_eq!(TapValue::all().count(), TAPS);
    }

    #[test]
    fn test_midpoint_selection() {
        let good = taps(10..=20);
        assert_eq!(
            select_tap(&good, TapStrategy::MidpointOfExtremes),
            Some(TapValue(15))
        );
        assert_eq!(select_tap(&[], TapStrategy::MidpointOfExtremes), None);
        // Floors on an even span
        assert_eq!(
            select_tap(&taps(3..=6), TapStrategy::MidpointOfExtremes),
            Some(TapValue(4))
        );
    }

    #[test]
    fn test_longest_run_selection() {
        let mut good = taps(0..=2);
        good.extend(taps(20..=30));
        assert_eq!(
            select_tap(&good, TapStrategy::MidpointOfExtremes),
            Some(TapValue(15))
        );
        assert_eq!(select_tap(&good, TapStrategy::LongestRun), Some(TapValue(25)));
        assert!(!is_contiguous(&good));
        assert!(is_contiguous(&taps(4..=9)));
    }

    #[test]
    fn test_score_values() {
        let mut data = vec![DESKEW; 1024];
        // Two misses on 1b, one on 4b
        data[1] = 0;
        data[9] = 0;
        data[1023] = 0x2B;
        let row = score(&Snapshot::new(data), Expected::Value(DESKEW), RampScoring::Reference);
        assert_eq!(row, [0, 2, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_score_ramp() {
        let data: Vec<u8> = (0..1024usize)
            .map(|i| u8::try_from((i / LANES + i % LANES) % 256).unwrap())
            .collect();
        let snap = Snapshot::new(data);
        assert_eq!(
            score(&snap, Expected::Ramp, RampScoring::Reference),
            [128; LANES]
        );
        assert_eq!(
            score(&snap, Expected::Ramp, RampScoring::Incrementing),
            [0; LANES]
        );
    }

    #[test]
    fn test_single_lane_strobe() {
        let transport = controller_mock();
        let cal = TapCalibrator::new(&transport, TapStrategy::default(), RampScoring::default());
        cal.apply(Chip::B, ch("2b"), TapValue(7)).unwrap();
        transport.lock().unwrap().clear_log();
        cal.apply(Chip::B, ch("2b"), TapValue(19)).unwrap();
        let mut mock = transport.lock().unwrap();
        // One strobe cycle: arm, tap, strobe, then clear control and both strobes
        assert_eq!(mock.writes().len(), 6);
        assert_eq!(mock.words_written(NAME, 1), [19, 0]);
        assert_eq!(mock.words_written(NAME, 3), [0, 0x20, 0]);
        assert_eq!(mock.words_written(NAME, 2), [0]);
        let control: u32 = mock.read(NAME, 4).unwrap();
        assert_eq!(control, 0);
    }

    #[test]
    fn test_all_lane_strobe() {
        let transport = controller_mock();
        let cal = TapCalibrator::new(&transport, TapStrategy::default(), RampScoring::default());
        cal.apply_all(Chip::C, TapValue(31)).unwrap();
        let mock = transport.lock().unwrap();
        assert_eq!(mock.writes().len(), 8);
        assert_eq!(mock.words_written(NAME, 1), [31, 0]);
        assert_eq!(mock.words_written(NAME, 2), [0, 0xF00, 0]);
        assert_eq!(mock.words_written(NAME, 3), [0, 0xF00, 0]);
    }

    #[test]
    fn test_best_taps() {
        let board = Arc::new(Mutex::new(SimBoard::new()));
        let cal = TapCalibrator::new(&board, TapStrategy::default(), RampScoring::default());
        let matrix = matrix_with([
            10..=20,
            0..=31,
            5..=9,
            12..=12,
            8..=24,
            8..=24,
            8..=24,
            1..=30,
        ]);
        let selections = cal.apply_best_taps(Chip::A, &matrix).unwrap();
        assert_eq!(selections[&ch("1a")].tap, TapValue(15));
        assert_eq!(selections[&ch("1b")].tap, TapValue(15));
        assert_eq!(selections[&ch("2a")].tap, TapValue(7));
        assert_eq!(selections[&ch("2b")].tap, TapValue(12));
        assert!(selections.values().all(|s| s.contiguous));
        let board = board.lock().unwrap();
        assert_eq!(board.latched_tap(Chip::A, ch("1a")), 15);
        assert_eq!(board.latched_tap(Chip::A, ch("2a")), 7);
        assert_eq!(board.latched_tap(Chip::A, ch("4b")), 15);
        // Other chips are untouched
        assert_eq!(board.latched_tap(Chip::B, ch("1a")), 0);
    }

    #[test]
    fn test_empty_good_range() {
        let board = Arc::new(Mutex::new(SimBoard::new()));
        let cal = TapCalibrator::new(&board, TapStrategy::default(), RampScoring::default());
        let mut matrix = matrix_with([
            10..=20, 10..=20, 10..=20, 10..=20, 10..=20, 10..=20, 10..=20, 10..=20,
        ]);
        for tap in TapValue::all() {
            let mut row = *matrix.row(tap);
            row[ch("3b").index()] = 1;
            matrix.set_row(tap, row);
        }
        board.lock().unwrap().set_latched_tap(Chip::A, ch("3b"), 3);
        let err = cal.apply_best_taps(Chip::A, &matrix).unwrap_err();
        assert!(matches!(
            err,
            Error::CalibrationRange { chip: Chip::A, ref channels } if channels == &[ch("3b")]
        ));
        let board = board.lock().unwrap();
        // The failing lane keeps its tap, the rest are applied
        assert_eq!(board.latched_tap(Chip::A, ch("3b")), 3);
        assert_eq!(board.latched_tap(Chip::A, ch("3a")), 15);
    }

    #[test]
    fn test_sweep_endpoints_match_direct_scores() {
        let board = Arc::new(Mutex::new(
            SimBoard::new()
                .with_chip_register(Chip::A, 0x45, 1)
                .with_eye(Chip::A, ch("1a"), 0..=12)
                .with_eye(Chip::A, ch("3b"), 20..=31),
        ));
        let cal = TapCalibrator::new(&board, TapStrategy::default(), RampScoring::default());
        let expected = Expected::Value(DESKEW);
        let first = cal.score(Chip::A, TapValue(0), expected).unwrap();
        let last = cal.score(Chip::A, TapValue::MAX, expected).unwrap();
        let matrix = cal.sweep_all_lanes(Chip::A, expected).unwrap();
        assert_eq!(matrix.row(TapValue(0)), &first);
        assert_eq!(matrix.row(TapValue::MAX), &last);
        assert_eq!(first[ch("1a").index()], 0);
        assert!(first[ch("3b").index()] > 0);
        assert_eq!(last[ch("3b").index()], 0);
        assert_eq!(matrix.good_taps(ch("1a")), taps(0..=12));
        assert_eq!(matrix.good_taps(ch("2a")), taps(8..=24));
    }

    #[test]
    fn test_matrix_display() {
        let matrix = matrix_with([
            10..=20, 10..=20, 10..=20, 10..=20, 10..=20, 10..=20, 10..=20, 10..=20,
        ]);
        let table = matrix.to_string();
        assert_eq!(
            table.lines().next(),
            Some("tap   1a   1b   2a   2b   3a   3b   4a   4b")
        );
        assert_eq!(format!("{:>3}", TapValue(7)), "  7");
        assert_eq!(table.lines().count(), TAPS + 1);
    }
}
