//! Mock transport implementations used in testing the interface

use super::{
    Error,
    Transport,
    TransportResult,
};
use crate::core::{
    Register,
    RegisterMap,
};
use std::collections::HashMap;

/// A single write as seen by the [`Mock`] transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub device: String,
    pub offset: usize,
    pub data: Vec<u8>,
}

impl Access {
    /// Interpret the written bytes as one big-endian 32-bit word
    #[must_use]
    pub fn word(&self) -> Option<u32> {
        Some(u32::from_be_bytes(self.data.as_slice().try_into().ok()?))
    }
}

/// A platform that mocks reads and writes, useful for testing
#[derive(Debug)]
pub struct Mock {
    memory: HashMap<usize, u8>,
    registers: RegisterMap,
    log: Vec<Access>,
    running: bool,
}

impl Mock {
    /// Construct a new mock platform by providing a device map `devices`
    #[must_use]
    pub fn new(registers: RegisterMap) -> Self {
        // We'll represent each address lazily instead of havig a dense array
        // but it really shouldn't matter
        let mut memory: HashMap<usize, u8> = HashMap::default();

        for Register { addr, length } in registers.values() {
            for i in 0..*length {
                memory.insert(addr + i, 0u8);
            }
        }
        Self {
            memory,
            registers,
            log: vec![],
            running: true,
        }
    }

    /// Every write issued so far, in order
    #[must_use]
    pub fn writes(&self) -> &[Access] {
        &self.log
    }

    /// The 32-bit words written to word `word` of `device`, in order
    #[must_use]
    pub fn words_written(&self, device: &str, word: usize) -> Vec<u32> {
        self.log
            .iter()
            .filter(|a| a.device == device && a.offset == 4 * word)
            .filter_map(Access::word)
            .collect()
    }

    /// Pretend the FPGA has (or hasn't) got a design running
    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Forget the write history
    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn device(&self, device: &str) -> TransportResult<Register> {
        self.registers
            .get(device)
            .copied()
            .ok_or_else(|| Error::MissingDevice(device.to_string()))
    }
}

impl Transport for Mock {
    fn is_running(&mut self) -> TransportResult<bool> {
        Ok(self.running)
    }

    fn read_n_bytes(&mut self, device: &str, offset: usize, n: usize) -> TransportResult<Vec<u8>> {
        // Get the address in memory
        let dev = self.device(device)?;
        if offset + n > dev.length {
            return Err(Error::OutOfBounds {
                device: device.to_string(),
                offset,
                len: n,
            });
        }
        // Pull bytes from memory into bytes vector
        Ok((offset..offset + n)
            .map(|i| self.memory.get(&(dev.addr + i)).copied().unwrap_or_default())
            .collect())
    }

    fn write_bytes(&mut self, device: &str, offset: usize, data: &[u8]) -> TransportResult<()> {
        // Get the address in memory
        let dev = self.device(device)?;
        if offset + data.len() > dev.length {
            return Err(Error::OutOfBounds {
                device: device.to_string(),
                offset,
                len: data.len(),
            });
        }
        for (i, byte) in data.iter().enumerate() {
            self.memory.insert(dev.addr + i + offset, *byte);
        }
        self.log.push(Access {
            device: device.to_string(),
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn listdev(&mut self) -> TransportResult<RegisterMap> {
        Ok(self.registers.clone())
    }
}
