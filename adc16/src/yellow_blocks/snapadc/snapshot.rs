//! Captures of the deserialized lanes through the controller's snapshot RAMs

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
use tracing::trace;

/// Bytes in one capture, 128 groups of the 8 lane interleave
pub const SNAPSHOT_BYTES: usize = 1024;

/// One capture of a chip's eight lanes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    data: Vec<u8>,
}

impl Snapshot {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The samples as the two's complement values the ADC reports
    #[must_use]
    pub fn signed(&self) -> Vec<i8> {
        self.data.iter().map(|b| i8::from_be_bytes([*b])).collect()
    }

    /// Successive groups of one sample per lane
    pub fn groups(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.data.chunks_exact(LANES)
    }

    /// Every sample of one lane, in capture order
    pub fn lane(&self, channel: Channel) -> impl Iterator<Item = u8> + '_ {
        self.data
            .iter()
            .skip(channel.index())
            .step_by(LANES)
            .copied()
    }

    /// The first sample of every lane
    #[must_use]
    pub fn first_group(&self) -> Option<&[u8]> {
        self.groups().next()
    }
}

/// Triggers captures and reads the snapshot RAMs
#[derive(Debug)]
pub struct SnapshotReader<T> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
}

impl<T> SnapshotReader<T>
where
    T: Transport,
{
    #[must_use]
    pub fn new(transport: &Arc<Mutex<T>>) -> Self {
        Self {
            transport: Arc::downgrade(transport),
        }
    }

    /// Raise the snapshot request, capturing every chip at once
    /// # Errors
    /// Returns an error on bad transport
    pub fn request(&self) -> Result<(), Error> {
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        transport.write_addr(NAME, &AdcControl::default())?;
        transport.write_addr(
            NAME,
            &AdcControl {
                snap_request: true,
                ..Default::default()
            },
        )?;
        Ok(())
    }

    /// Read the last capture of `chip`
    /// # Errors
    /// Returns an error on bad transport or if the capture RAM is missing
    pub fn read(&self, chip: Chip) -> Result<Snapshot, Error> {
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        let data = transport.read_n_bytes(&chip.ram_name(), 0, SNAPSHOT_BYTES)?;
        trace!(%chip, "Read snapshot");
        Ok(Snapshot::new(data))
    }

    /// Request a fresh capture and read back `chip`
    /// # Errors
    /// Returns an error on bad transport
    pub fn capture(&self, chip: Chip) -> Result<Snapshot, Error> {
        self.request()?;
        self.read(chip)
    }
}
