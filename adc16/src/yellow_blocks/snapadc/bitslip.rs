//! Byte framing alignment of the ISERDES lanes.
//!
//! With the chips emitting the sync pattern, every lane whose first captured byte isn't the sync
//! byte has its deserializer boundary rotated by one bit. A single pass slips each lane at most
//! once, so [`BitslipAligner::align`] repeats passes until one finds nothing to do.

use super::{
    channel::{
        Channel,
        LANES,
    },
    chip::Chip,
    controller::{
        AdcControl,
        NAME,
    },
    pattern::SYNC,
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
use std::sync::{
    Arc,
    Mutex,
    Weak,
};
use tracing::{
    debug,
    info,
};

/// How alignment of one chip went
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitslipReport {
    /// Correction passes run, including the final one that found every lane aligned
    pub passes: usize,
    /// Slips issued per lane, in snapshot order
    pub slips: [u32; LANES],
}

/// Lanes whose first captured byte isn't the sync byte
#[must_use]
pub fn misaligned(snapshot: &Snapshot) -> Vec<Channel> {
    snapshot
        .first_group()
        .map(|group| {
            Channel::ALL
                .into_iter()
                .filter(|ch| group.get(ch.index()) != Some(&SYNC))
                .collect()
        })
        .unwrap_or_else(|| Channel::ALL.to_vec())
}

/// Rotates lane framing until every lane of a chip reports the sync byte
#[derive(Debug)]
pub struct BitslipAligner<T> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
    snapshots: SnapshotReader<T>,
    max_passes: usize,
}

impl<T> BitslipAligner<T>
where
    T: Transport,
{
    #[must_use]
    pub fn new(transport: &Arc<Mutex<T>>, max_passes: usize) -> Self {
        Self {
            transport: Arc::downgrade(transport),
            snapshots: SnapshotReader::new(transport),
            max_passes,
        }
    }

    /// Rotate the framing of one lane of `chip` by one bit
    /// # Errors
    /// Returns an error on bad transport
    pub fn bitslip(&self, chip: Chip, channel: Channel) -> Result<(), Error> {
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        transport.write_addr(NAME, &AdcControl::default())?;
        transport.write_addr(
            NAME,
            &AdcControl {
                bitslip_chips: chip.into(),
                bitslip_lane: channel.lane().into(),
                ..Default::default()
            },
        )?;
        transport.write_addr(NAME, &AdcControl::default())?;
        debug!(%chip, %channel, "Bitslip");
        Ok(())
    }

    /// One correction pass over `chip`, returning the lanes that were slipped. The sync pattern
    /// must already be enabled.
    /// # Errors
    /// Returns an error on bad transport
    pub fn sync_once(&self, chip: Chip) -> Result<Vec<Channel>, Error> {
        let snapshot = self.snapshots.capture(chip)?;
        let lanes = misaligned(&snapshot);
        for channel in &lanes {
            self.bitslip(chip, *channel)?;
        }
        Ok(lanes)
    }

    /// Repeat correction passes until one slips nothing, giving up after the configured number of
    /// passes
    /// # Errors
    /// Returns an error on bad transport or if some lanes never aligned
    pub fn align(&self, chip: Chip) -> Result<BitslipReport, Error> {
        let mut report = BitslipReport::default();
        for pass in 1..=self.max_passes {
            let slipped = self.sync_once(chip)?;
            report.passes = pass;
            if slipped.is_empty() {
                info!(%chip, passes = pass, slips = ?report.slips, "Lanes aligned");
                return Ok(report);
            }
            for channel in slipped {
                report.slips[channel.index()] += 1;
            }
        }
        // The last pass may have fixed everything, check once more without slipping
        let lanes = misaligned(&self.snapshots.capture(chip)?);
        if lanes.is_empty() {
            info!(%chip, passes = report.passes, slips = ?report.slips, "Lanes aligned");
            Ok(report)
        } else {
            Err(Error::BitslipNotConverged {
                chip,
                lanes,
                passes: report.passes,
            })
        }
    }
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
        yellow_blocks::snapadc::snapshot::SNAPSHOT_BYTES,
    };
    use std::collections::HashMap;

    fn ch(name: &str) -> Channel {
        name.parse().unwrap()
    }

    #[test]
    fn test_misaligned() {
        let mut data = vec![SYNC; SNAPSHOT_BYTES];
        data[3] = 0x38;
        data[6] = 0xE0;
        // Only the first group counts
        data[9] = 0;
        assert_eq!(misaligned(&Snapshot::new(data)), [ch("2b"), ch("4a")]);
        assert_eq!(misaligned(&Snapshot::new(vec![])), Channel::ALL.to_vec());
    }

    #[test]
    fn test_single_lane_slip() {
        let transport = Arc::new(Mutex::new(Mock::new(HashMap::from([
            (
                NAME.into(),
                Register {
                    addr: 0,
                    length: 16,
                },
            ),
            (
                "adc16_wb_ram0".into(),
                Register {
                    addr: 0x1000,
                    length: SNAPSHOT_BYTES,
                },
            ),
        ]))));
        {
            let mut mock = transport.lock().unwrap();
            let mut ram = vec![SYNC; SNAPSHOT_BYTES];
            ram[3] = 0x38;
            mock.write_bytes("adc16_wb_ram0", 0, &ram).unwrap();
            mock.clear_log();
        }
        let aligner = BitslipAligner::new(&transport, 8);
        let slipped = aligner.sync_once(Chip::A).unwrap();
        assert_eq!(slipped, [ch("2b")]);
        // Snapshot request, then one pulse for lane 3 of chip A
        assert_eq!(
            transport.lock().unwrap().words_written(NAME, 1),
            [0, 0x0001_0000, 0, 0x0000_0160, 0]
        );
    }

    #[test]
    fn test_align_converges() {
        let board = Arc::new(Mutex::new(
            SimBoard::new()
                .with_chip_register(Chip::B, 0x45, 2)
                .with_taps(Chip::B, 16)
                .with_framing(Chip::B, ch("1a"), 3)
                .with_framing(Chip::B, ch("4b"), 7),
        ));
        let aligner = BitslipAligner::new(&board, 8);
        let report = aligner.align(Chip::B).unwrap();
        assert_eq!(report.slips, [3, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(report.passes, 8);
        let board = board.lock().unwrap();
        assert_eq!(board.slips(Chip::B), [3, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(board.slips(Chip::A), [0; LANES]);
    }

    #[test]
    fn test_already_aligned() {
        let board = Arc::new(Mutex::new(
            SimBoard::new()
                .with_chip_register(Chip::A, 0x45, 2)
                .with_taps(Chip::A, 16),
        ));
        let report = BitslipAligner::new(&board, 8).align(Chip::A).unwrap();
        assert_eq!(report.passes, 1);
        assert_eq!(report.slips, [0; LANES]);
    }

    #[test]
    fn test_not_converged() {
        let board = Arc::new(Mutex::new(
            SimBoard::new()
                .with_chip_register(Chip::C, 0x45, 2)
                .with_taps(Chip::C, 16)
                .with_framing(Chip::C, ch("3a"), 2),
        ));
        let err = BitslipAligner::new(&board, 1).align(Chip::C).unwrap_err();
        assert!(matches!(
            err,
            Error::BitslipNotConverged { chip: Chip::C, ref lanes, passes: 1 } if lanes == &[ch("3a")]
        ));
    }
}
