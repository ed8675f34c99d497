//! Defines the register interface that every transport to an ADC16 platform must implement.
//!
//! Establishing the connection itself (and programming the gateware) is left to the transport
//! implementation, the methods here *assume* the platform is already connected and running.

pub mod mock;
pub mod sim;

use crate::{
    core::RegisterMap,
    yellow_blocks::Address,
};
use packed_struct::PackingError;
use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    Weak,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Device `{0}` does not exist on the connected platform")]
    MissingDevice(String),
    #[error("Accessing {len} bytes at byte offset {offset} of `{device}` is out of bounds")]
    OutOfBounds {
        device: String,
        offset: usize,
        len: usize,
    },
    #[error("Failed to pack or unpack a register word")]
    Packing(#[from] PackingError),
    #[error("The transport was dropped while a device still referenced it")]
    Dropped,
    #[error("The transport lock was poisoned")]
    Poisoned,
}

pub type TransportResult<T> = Result<T, Error>;

/// Types that implement this trait can be serialized such that they can be written to FPGA software
/// registers
pub trait Serialize {
    type Chunk;
    /// # Errors
    /// Returns an error if the value can't be packed into its register representation
    fn serialize(&self) -> Result<Self::Chunk, PackingError>;
}

/// Types that implement this trait can be deserialized such that they can be read from FPGA
/// software registers
pub trait Deserialize: Sized {
    type Chunk;
    /// # Errors
    /// Returns an error if the bytes don't describe a valid value
    fn deserialize(chunk: Self::Chunk) -> Result<Self, PackingError>;
}

macro_rules! ser_num {
    ($num:ty) => {
        impl Serialize for $num {
            type Chunk = [u8; std::mem::size_of::<$num>()];
            fn serialize(&self) -> Result<Self::Chunk, PackingError> {
                Ok(self.to_be_bytes())
            }
        }
    };
}

macro_rules! deser_num {
    ($num:ty) => {
        impl Deserialize for $num {
            type Chunk = [u8; std::mem::size_of::<$num>()];
            fn deserialize(chunk: Self::Chunk) -> Result<Self, PackingError> {
                Ok(<$num>::from_be_bytes(chunk))
            }
        }
    };
}

// Implement serdes for all builtin numeric types
ser_num!(u8);
ser_num!(u16);
ser_num!(u32);
ser_num!(u64);
ser_num!(u128);
ser_num!(i8);
ser_num!(i16);
ser_num!(i32);
ser_num!(i64);
ser_num!(i128);
ser_num!(f32);
ser_num!(f64);

deser_num!(u8);
deser_num!(u16);
deser_num!(u32);
deser_num!(u64);
deser_num!(u128);
deser_num!(i8);
deser_num!(i16);
deser_num!(i32);
deser_num!(i64);
deser_num!(i128);
deser_num!(f32);
deser_num!(f64);

/// The register interface of a connected platform.
///
/// Offsets are in bytes, so 32-bit word `w` of a device lives at offset `4 * w`. Every write is
/// blind: nothing is read back to confirm it landed.
pub trait Transport {
    /// Tests to see if the connected FPGA is programmed and running
    /// # Errors
    /// Returns an error on bad transport
    fn is_running(&mut self) -> TransportResult<bool>;

    /// Read `n` bytes from `device` from byte offset `offset`
    /// # Errors
    /// Returns an error on bad transport or out of bounds access
    fn read_n_bytes(&mut self, device: &str, offset: usize, n: usize) -> TransportResult<Vec<u8>>;

    /// Read `N` bytes from `device` from byte offset `offset` into a const-sized array
    /// # Errors
    /// Returns an error on bad transport or out of bounds access
    fn read_bytes<const N: usize>(
        &mut self,
        device: &str,
        offset: usize,
    ) -> TransportResult<[u8; N]> {
        let bytes = self.read_n_bytes(device, offset, N)?;
        bytes.try_into().map_err(|_| Error::OutOfBounds {
            device: device.to_string(),
            offset,
            len: N,
        })
    }

    /// Generically read a `Deserializable` type `T` from the connected platform at `device` and
    /// offset `offset`.
    /// # Example
    /// ```
    /// # use adc16::core::Register;
    /// # use std::collections::HashMap;
    /// # use adc16::transport::mock::Mock;
    /// # let mut transport = Mock::new(HashMap::from([("sys_scratchpad".into(),Register { addr: 0, length: 4 },)]));
    /// # use adc16::transport::Transport;
    /// let my_num: u32 = transport.read("sys_scratchpad",0).unwrap();
    /// ```
    /// # Errors
    /// Returns an error on bad transport or if the bytes don't deserialize
    fn read<T, const N: usize>(&mut self, device: &str, offset: usize) -> TransportResult<T>
    where
        T: Deserialize<Chunk = [u8; N]>,
    {
        let bytes: [u8; N] = self.read_bytes(device, offset)?;
        Ok(T::deserialize(bytes)?)
    }

    /// Read a register that knows its own offset within `device`
    /// # Errors
    /// Returns an error on bad transport or if the bytes don't deserialize
    fn read_addr<R, const N: usize>(&mut self, device: &str) -> TransportResult<R>
    where
        R: Address + Deserialize<Chunk = [u8; N]>,
    {
        self.read(device, R::addr().into())
    }

    /// Write `data` to `device` from byte offset `offset`
    /// # Errors
    /// Returns an error on bad transport or out of bounds access
    fn write_bytes(&mut self, device: &str, offset: usize, data: &[u8]) -> TransportResult<()>;

    /// Generically write a `Serializable` type `T` to the connected platform at `device` and offset
    /// `offset`.
    /// # Example
    /// ```
    /// # use adc16::core::Register;
    /// # use std::collections::HashMap;
    /// # use adc16::transport::mock::Mock;
    /// # let mut transport = Mock::new(HashMap::from([("sys_scratchpad".into(),Register { addr: 0, length: 4 },)]));
    /// # use adc16::transport::Transport;
    /// let my_num = 3.14f32;
    /// transport.write("sys_scratchpad",0, &my_num).unwrap();
    /// ```
    /// # Errors
    /// Returns an error on bad transport or if the value doesn't serialize
    fn write<T, const N: usize>(
        &mut self,
        device: &str,
        offset: usize,
        data: &T,
    ) -> TransportResult<()>
    where
        T: Serialize<Chunk = [u8; N]>,
    {
        // Create bytes from the data and write with `write_bytes`
        self.write_bytes(device, offset, &data.serialize()?)
    }

    /// Write a register that knows its own offset within `device`
    /// # Errors
    /// Returns an error on bad transport or if the value doesn't serialize
    fn write_addr<R, const N: usize>(&mut self, device: &str, data: &R) -> TransportResult<()>
    where
        R: Address + Serialize<Chunk = [u8; N]>,
    {
        self.write(device, R::addr().into(), data)
    }

    /// Retrieve a list of available devices on the (potentially programmed) connected platform
    /// # Errors
    /// Returns an error on bad transport
    fn listdev(&mut self) -> TransportResult<RegisterMap>;
}

/// Upgrade a device's upwards pointer to the shared transport
pub(crate) fn upgrade<T>(transport: &Weak<Mutex<T>>) -> TransportResult<Arc<Mutex<T>>> {
    transport.upgrade().ok_or(Error::Dropped)
}

/// Take exclusive access of the shared transport
pub(crate) fn lock<T>(tarc: &Arc<Mutex<T>>) -> TransportResult<MutexGuard<'_, T>> {
    tarc.lock().map_err(|_| Error::Poisoned)
}
