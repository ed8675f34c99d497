//! Bit-banged 3-wire (clock, data, chip select) programming of the HMCAD1511 registers.
//!
//! Every frame is an idle word, 8 address bits then 16 data bits most significant first (each
//! written clock low then clock high), and a closing idle word. All writes are blind.

use super::{
    chip::ChipSelect,
    controller::{
        Adc3Wire,
        NAME,
    },
    Error,
};
use crate::{
    transport::{
        lock,
        upgrade,
        Transport,
    },
    yellow_blocks::Address,
};
use packed_struct::PackedStruct;
use std::sync::{
    Mutex,
    Weak,
};
use tracing::trace;

/// The 3-wire bus of the ADC16 controller, bound to a set of selected chips
#[derive(Debug)]
pub struct ThreeWire<T> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
    /// Chips that receive every frame
    cs: ChipSelect,
}

impl<T> Clone for ThreeWire<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            cs: self.cs,
        }
    }
}

impl<T> ThreeWire<T>
where
    T: Transport,
{
    pub fn new(transport: Weak<Mutex<T>>, cs: ChipSelect) -> Self {
        Self { transport, cs }
    }

    /// The same bus addressing a different set of chips
    #[must_use]
    pub fn with_select(&self, cs: ChipSelect) -> Self {
        Self {
            transport: self.transport.clone(),
            cs,
        }
    }

    #[must_use]
    pub fn chip_select(&self) -> ChipSelect {
        self.cs
    }

    /// Cursed bit-banging to send a bit to the current chip select
    fn send_bit(&self, transport: &mut T, bit: bool) -> Result<(), Error> {
        let mut word = Adc3Wire {
            sclk: false,
            sdata: bit,
            chip_select: self.cs,
            ..Default::default()
        };
        transport.write_addr(NAME, &word)?;
        word.sclk = true;
        transport.write_addr(NAME, &word)?;
        Ok(())
    }

    /// Program register `addr` of every selected chip with `data`. A failed write leaves the
    /// chips in an unknown state, there is no rollback.
    /// # Errors
    /// Returns an error on bad transport
    pub fn write_register(&self, addr: u8, data: u16) -> Result<(), Error> {
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        trace!(addr, data, cs = ?self.cs, "3-wire write");
        transport.write_addr(NAME, &Adc3Wire::idle())?;
        for i in (0..8).rev() {
            self.send_bit(&mut transport, (addr >> i) & 1 == 1)?;
        }
        for i in (0..16).rev() {
            self.send_bit(&mut transport, (data >> i) & 1 == 1)?;
        }
        transport.write_addr(NAME, &Adc3Wire::idle())?;
        Ok(())
    }

    /// Send a register that knows its own address
    /// # Errors
    /// Returns an error on bad transport or if the register doesn't pack
    pub fn send_reg<R>(&self, reg: &R) -> Result<(), Error>
    where
        R: Address + PackedStruct<ByteArray = [u8; 2]>,
    {
        let value = u16::from_be_bytes(reg.pack().map_err(crate::transport::Error::from)?);
        self.write_register(R::addr(), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::Register,
        transport::mock::Mock,
        yellow_blocks::snapadc::{
            chip::Chip,
            hmcad1511::SleepPd,
        },
    };
    use std::{
        collections::HashMap,
        sync::Arc,
    };

    fn controller_mock() -> Arc<Mutex<Mock>> {
        Arc::new(Mutex::new(Mock::new(HashMap::from([(
            NAME.into(),
            Register {
                addr: 0,
                length: 16,
            },
        )]))))
    }

    /// Replays the frame the way the chip's shift register sees it
    fn decode(words: &[u32]) -> (u8, u16) {
        let bits: Vec<u32> = words
            .chunks(2)
            .map(|pair| {
                assert_eq!(pair[0] & 0x200, 0, "clock must start low");
                assert_eq!(pair[1] & 0x200, 0x200, "clock must rise");
                assert_eq!(pair[0] | 0x200, pair[1], "only the clock may change");
                (pair[1] >> 8) & 1
            })
            .collect();
        let value = bits.iter().fold(0u32, |acc, b| (acc << 1) | b);
        (
            u8::try_from(value >> 16).unwrap(),
            u16::try_from(value & 0xFFFF).unwrap(),
        )
    }

    #[test]
    fn test_frame() {
        let transport = controller_mock();
        let wire = ThreeWire::new(
            Arc::downgrade(&transport),
            ChipSelect::from(Chip::A) | ChipSelect::from(Chip::C),
        );
        // Every address, with data exercising both ends of the word and alternating bits
        for addr in 0..=u8::MAX {
            for data in [0x0000, 0x0001, 0x8000, 0xA55A, 0xFFFF] {
                transport.lock().unwrap().clear_log();
                wire.write_register(addr, data).unwrap();
                let words = transport.lock().unwrap().words_written(NAME, 0);
                assert_eq!(words.len(), 2 * (8 + 16) + 2);
                assert_eq!(words[0], 0x200);
                assert_eq!(words[words.len() - 1], 0x200);
                assert!(words[1..words.len() - 1].iter().all(|w| w & 0xFF == 0b101));
                assert_eq!(decode(&words[1..words.len() - 1]), (addr, data), "{addr:#04x}");
            }
        }
    }

    #[test]
    fn test_send_reg() {
        let transport = controller_mock();
        let wire = ThreeWire::new(Arc::downgrade(&transport), ChipSelect::from(Chip::B));
        wire.send_reg(&SleepPd {
            pd: true,
            ..Default::default()
        })
        .unwrap();
        let words = transport.lock().unwrap().words_written(NAME, 0);
        assert_eq!(decode(&words[1..words.len() - 1]), (0x0F, 0x0200));
    }

    #[test]
    fn test_with_select() {
        let transport = controller_mock();
        let wire = ThreeWire::new(Arc::downgrade(&transport), ChipSelect::from(Chip::A));
        let other = wire.with_select(ChipSelect::from(Chip::C));
        assert_eq!(other.chip_select(), ChipSelect::from(Chip::C));
        other.write_register(0x0F, 0).unwrap();
        let words = transport.lock().unwrap().words_written(NAME, 0);
        assert_eq!(words[1] & 0xFF, 0b100);
    }
}
