//! Implementations of the "ADC16" controller, as specified
//! by Dave MacMahon's [Ruby Implementation](https://github.com/david-macmahon/casper_adc16/blob/master/ruby/lib/adc16.rb).
//!
//! This device controls and manages multiple HMCAD1511 ADCs

use super::{
    chip::{
        ChipSelect,
        ChipSet,
    },
    config::ConfigError,
    hmcad1511::{
        ChanNumClkDiv,
        ChannelInput,
        InputSelect12,
        InputSelect34,
        Reset,
        SleepPd,
    },
    threewire::ThreeWire,
    Error,
};
use crate::transport::{
    lock,
    upgrade,
    Transport,
};
use adc16_derive::{
    address,
    CasperSerde,
};
use packed_struct::prelude::*;
use std::{
    fmt,
    str::FromStr,
    sync::{
        Mutex,
        Weak,
    },
};
use tracing::{
    debug,
    info,
};

/// Name of the controller device in the gateware
pub const NAME: &str = "adc16_controller";

/// Controller for the ADC chips themselves
#[derive(Debug)]
pub struct Adc16Controller<T> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
    /// 3-wire programmer broadcasting to every selected chip
    wire: ThreeWire<T>,
}

impl<T> Adc16Controller<T>
where
    T: Transport,
{
    pub fn new(transport: Weak<Mutex<T>>, chips: &ChipSet) -> Self {
        let wire = ThreeWire::new(transport.clone(), chips.select());
        Self { transport, wire }
    }

    /// The 3-wire programmer this controller talks to the chips through
    pub fn wire(&self) -> &ThreeWire<T> {
        &self.wire
    }

    /// Read back the 3-wire status word
    /// # Errors
    /// Returns an error on bad transport
    pub fn status(&self) -> Result<Adc3Wire, Error> {
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        Ok(transport.read_addr(NAME)?)
    }

    /// Gets the number of ADC chips this controller supports
    /// # Errors
    /// Returns an error on bad transport
    pub fn supported_chips(&self) -> Result<u8, Error> {
        Ok(self.status()?.supported_chips.into())
    }

    /// Gets the controller revision
    /// # Errors
    /// Returns an error on bad transport
    pub fn revision(&self) -> Result<u8, Error> {
        Ok(self.status()?.revision.into())
    }

    /// Checks if the gateware supports demultiplexing modes
    /// Demultiplexing modes are used when running the ADC16 in dual and quad
    /// channel configurations. The control word is left as it was found, including the current
    /// demux mode.
    /// # Errors
    /// Returns an error on bad transport
    pub fn supports_demux(&self) -> Result<bool, Error> {
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        let before: AdcControl = transport.read_addr(NAME)?;
        // If we /can't/ set the write enable bit, we /do/ support demux. Writing the mode we just
        // read keeps supporting gateware where it was.
        transport.write_addr(
            NAME,
            &AdcControl {
                demux_write_enable: true,
                ..before
            },
        )?;
        let demux_test: AdcControl = transport.read_addr(NAME)?;
        if demux_test.demux_write_enable {
            // Plain memory holds on to the bit, put the word back
            transport.write_addr(NAME, &before)?;
            Ok(false)
        } else {
            Ok(true)
        }
    }

    /// Gets the current demux mode if the gateware supports it, otherwise returns None. The FPGA
    /// demux mode is unchanged afterwards.
    /// # Errors
    /// Returns an error on bad transport
    pub fn get_demux(&self) -> Result<Option<DemuxMode>, Error> {
        if !self.supports_demux()? {
            return Ok(None);
        }
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        let ctl: AdcControl = transport.read_addr(NAME)?;
        Ok(Some(ctl.demux_mode))
    }

    /// Sets the FPGA side demux mode.
    ///
    /// ### Words of wisdom from Dave
    /// Note that setting the demux mode here only affects the demultiplexing of
    /// the data from the ADC before presenting it to the FPGA fabric.  The
    /// demultiplexing mode set does NOT set the "mode of operation" of the ADC
    /// chips.  That must be done by the user when initializing the ADC16 chips
    /// because it requires a software power down of the ADC chip.  The user is
    /// responsible for ensuring that the "mode of operation" set in the ADC chips
    /// at initialization time is consistent with the demux mode set using this
    /// method. Mismatches will result in improper interpretation of the data.
    /// # Errors
    /// Returns an error on bad transport
    pub fn set_demux(&self, mode: DemuxMode) -> Result<(), Error> {
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        debug!(%mode, "Setting FPGA demux mode");
        transport.write_addr(
            NAME,
            &AdcControl {
                demux_write_enable: true,
                demux_mode: mode,
                ..Default::default()
            },
        )?;
        Ok(())
    }

    /// Resets all the selected chips
    /// # Errors
    /// Returns an error on bad transport
    pub fn reset_chips(&self) -> Result<(), Error> {
        info!("Resetting ADC chips");
        self.wire.send_reg(&Reset { reset: true })
    }

    /// Software power down of all the selected chips
    /// # Errors
    /// Returns an error on bad transport
    pub fn power_down(&self) -> Result<(), Error> {
        debug!("Powering down ADC chips");
        self.wire.send_reg(&SleepPd {
            pd: true,
            ..Default::default()
        })
    }

    /// Power up all the selected chips
    /// # Errors
    /// Returns an error on bad transport
    pub fn power_up(&self) -> Result<(), Error> {
        debug!("Powering up ADC chips");
        self.wire.send_reg(&SleepPd::default())
    }

    /// Power cycles all the selected chips
    /// # Errors
    /// Returns an error on bad transport
    pub fn power_cycle(&self) -> Result<(), Error> {
        info!("Power cycling ADC chips");
        self.power_down()?;
        self.power_up()
    }

    /// Sets the chip side mode of operation (channel count and clock divider). The chips should
    /// be powered down while this changes.
    /// # Errors
    /// Returns an error on bad transport
    pub fn set_demux_adc(&self, mode: DemuxMode) -> Result<(), Error> {
        debug!(%mode, "Setting ADC operating mode");
        self.wire.send_reg(&ChanNumClkDiv::for_demux(mode))
    }

    /// Routes physical inputs to the ADC cores through the cross point switch
    /// # Errors
    /// Returns an error if an input is outside 1 to 4, or on bad transport
    pub fn select_inputs(&self, inputs: ChannelInput) -> Result<(), Error> {
        let [adc1, adc2, adc3, adc4] = inputs
            .per_core()
            .ok_or(ConfigError::InputsOutOfRange(inputs))?;
        debug!(?inputs, "Selecting ADC inputs");
        self.wire.send_reg(&InputSelect12 {
            inp_sel_adc1: adc1,
            inp_sel_adc2: adc2,
        })?;
        self.wire.send_reg(&InputSelect34 {
            inp_sel_adc3: adc3,
            inp_sel_adc4: adc4,
        })
    }
}

#[address(0x0)]
#[derive(Debug, PackedStruct, CasperSerde, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4")]
/// Word 0, the 3-wire bus and read-only status
pub struct Adc3Wire {
    #[packed_field(bits = "28..=29")]
    pub line_lock: Integer<u8, packed_bits::Bits<2>>,
    #[packed_field(bits = "20..=23")]
    pub supported_chips: Integer<u8, packed_bits::Bits<4>>,
    #[packed_field(bits = "16..=17")]
    pub revision: Integer<u8, packed_bits::Bits<2>>,
    #[packed_field(bits = "9")]
    pub sclk: bool,
    #[packed_field(bits = "8")]
    pub sdata: bool,
    #[packed_field(bits = "0..=7")]
    pub chip_select: ChipSelect,
}

impl Adc3Wire {
    /// Returns an IDLE 3-wire state
    #[must_use]
    pub fn idle() -> Self {
        Self {
            sclk: true,
            ..Default::default()
        }
    }

    /// Both line clock lock flags are set. The second flag only carries meaning for some chip
    /// counts but is required regardless.
    #[must_use]
    pub fn locked(&self) -> bool {
        u8::from(self.line_lock) == 0b11
    }
}

#[derive(PrimitiveEnum, Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
/// Number of parallel channels each chip's samples are split into
pub enum DemuxMode {
    /// One channel per chip, four interleaved cores on one input
    #[default]
    By1 = 0,
    /// Two channels per chip
    By2 = 1,
    /// Four channels per chip
    By4 = 2,
}

impl DemuxMode {
    /// Maps the `snap_inputs` yellow block parameter (total inputs across three chips) to a mode
    /// # Errors
    /// Returns an error on an unknown input count
    pub fn from_snap_inputs(snap_inputs: &str) -> Result<Self, ConfigError> {
        match snap_inputs.trim() {
            "12" => Ok(Self::By1),
            "6" => Ok(Self::By2),
            "3" => Ok(Self::By4),
            other => Err(ConfigError::InvalidDemux(other.to_string())),
        }
    }
}

impl fmt::Display for DemuxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            DemuxMode::By1 => 1,
            DemuxMode::By2 => 2,
            DemuxMode::By4 => 4,
        };
        write!(f, "{n}")
    }
}

impl FromStr for DemuxMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Self::By1),
            "2" => Ok(Self::By2),
            "4" => Ok(Self::By4),
            other => Err(ConfigError::InvalidDemux(other.to_string())),
        }
    }
}

#[address(0x4)]
#[derive(Debug, PackedStruct, CasperSerde, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4")]
/// Word 1, the one-hot control bits
pub struct AdcControl {
    #[packed_field(bits = "26")]
    pub demux_write_enable: bool,
    #[packed_field(bits = "24..=25", ty = "enum")]
    pub demux_mode: DemuxMode,
    #[packed_field(bits = "20")]
    pub reset: bool,
    #[packed_field(bits = "16")]
    pub snap_request: bool,
    #[packed_field(bits = "8..=15")]
    pub bitslip_chips: ChipSelect,
    #[packed_field(bits = "5..=7")]
    pub bitslip_lane: Integer<u8, packed_bits::Bits<3>>,
    #[packed_field(bits = "0..=4")]
    pub delay_tap: Integer<u8, packed_bits::Bits<5>>,
}

macro_rules! strobe_register {
    ($name:ident, $addr:literal) => {
        /// Rising edge strobes latching the delay tap, one nibble per chip with a bit per input pair
        #[address($addr)]
        #[derive(Debug, CasperSerde, Default, Copy, Clone, PartialEq, Eq)]
        pub struct $name(pub u32);

        impl PackedStruct for $name {
            type ByteArray = [u8; 4];

            fn pack(&self) -> packed_struct::PackingResult<Self::ByteArray> {
                Ok(self.0.to_be_bytes())
            }

            fn unpack(src: &Self::ByteArray) -> packed_struct::PackingResult<Self> {
                Ok($name(u32::from_be_bytes(*src)))
            }
        }
    };
}

strobe_register!(DelayAStrobe, 0x8);
strobe_register!(DelayBStrobe, 0xC);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::Register,
        transport::{
            mock::Mock,
            sim::SimBoard,
            Deserialize,
            Serialize,
        },
        yellow_blocks::{
            snapadc::chip::Chip,
            Address,
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

    fn word<R: Serialize<Chunk = [u8; 4]>>(reg: &R) -> u32 {
        u32::from_be_bytes(reg.serialize().unwrap())
    }

    #[test]
    fn test_word_layouts() {
        assert_eq!(word(&Adc3Wire::idle()), 0x200);
        assert_eq!(
            word(&Adc3Wire {
                sdata: true,
                chip_select: ChipSelect::from(Chip::C),
                ..Default::default()
            }),
            0x104
        );
        assert_eq!(
            word(&AdcControl {
                snap_request: true,
                ..Default::default()
            }),
            0x0001_0000
        );
        assert_eq!(
            word(&AdcControl {
                demux_write_enable: true,
                demux_mode: DemuxMode::By4,
                ..Default::default()
            }),
            0x0600_0000
        );
        assert_eq!(
            word(&AdcControl {
                bitslip_chips: ChipSelect::from(Chip::B),
                bitslip_lane: 3.into(),
                delay_tap: 31.into(),
                ..Default::default()
            }),
            0x0000_027F
        );
        assert_eq!(word(&DelayBStrobe(0x111)), 0x111);
        assert_eq!(DelayAStrobe::addr(), 0x8);
        assert_eq!(DelayBStrobe::addr(), 0xC);
    }

    #[test]
    fn test_status_fields() {
        let status = Adc3Wire::deserialize(0x3031_0000u32.to_be_bytes()).unwrap();
        assert!(status.locked());
        assert_eq!(u8::from(status.supported_chips), 3);
        assert_eq!(u8::from(status.revision), 1);
        let status = Adc3Wire::deserialize(0x1000_0000u32.to_be_bytes()).unwrap();
        assert!(!status.locked());
    }

    #[test]
    fn test_parse_demux() {
        assert_eq!("2".parse::<DemuxMode>(), Ok(DemuxMode::By2));
        assert_eq!(
            "3".parse::<DemuxMode>(),
            Err(ConfigError::InvalidDemux("3".to_string()))
        );
        assert_eq!(DemuxMode::from_snap_inputs("3"), Ok(DemuxMode::By4));
        assert_eq!(DemuxMode::By4.to_string(), "4");
    }

    #[test]
    fn test_set_demux_fpga() {
        let transport = controller_mock();
        let ctl = Adc16Controller::new(Arc::downgrade(&transport), &ChipSet::all());
        ctl.set_demux(DemuxMode::By2).unwrap();
        assert_eq!(
            transport.lock().unwrap().words_written(NAME, 1),
            [0x0500_0000]
        );
    }

    #[test]
    fn test_demux_support_on_plain_memory() {
        // Plain memory keeps the write enable bit, which is how old gateware behaves
        let transport = controller_mock();
        transport
            .lock()
            .unwrap()
            .write_addr(
                NAME,
                &AdcControl {
                    delay_tap: 9.into(),
                    ..Default::default()
                },
            )
            .unwrap();
        transport.lock().unwrap().clear_log();
        let ctl = Adc16Controller::new(Arc::downgrade(&transport), &ChipSet::all());
        assert!(!ctl.supports_demux().unwrap());
        assert_eq!(ctl.get_demux().unwrap(), None);
        // Every check sets the enable bit, then restores the word it found
        let mut mock = transport.lock().unwrap();
        assert_eq!(
            mock.words_written(NAME, 1),
            [0x0400_0009, 9, 0x0400_0009, 9]
        );
        let ctl: AdcControl = mock.read_addr(NAME).unwrap();
        assert_eq!(u8::from(ctl.delay_tap), 9);
        assert!(!ctl.demux_write_enable);
    }

    #[test]
    fn test_power_cycle() {
        let cycled = controller_mock();
        Adc16Controller::new(Arc::downgrade(&cycled), &ChipSet::all())
            .power_cycle()
            .unwrap();
        let stepped = controller_mock();
        let ctl = Adc16Controller::new(Arc::downgrade(&stepped), &ChipSet::all());
        ctl.power_down().unwrap();
        ctl.power_up().unwrap();
        let cycled = cycled.lock().unwrap();
        assert_eq!(cycled.writes(), stepped.lock().unwrap().writes());
        // Two full 3-wire frames
        assert_eq!(cycled.words_written(NAME, 0).len(), 100);

        let board = Arc::new(Mutex::new(
            SimBoard::new().with_chip_register(Chip::B, 0x0F, 0x0200),
        ));
        let ctl = Adc16Controller::new(Arc::downgrade(&board), &"b".parse().unwrap());
        ctl.power_cycle().unwrap();
        assert_eq!(board.lock().unwrap().chip_register(Chip::B, 0x0F), 0);
    }

    #[test]
    fn test_dropped_transport() {
        let transport = controller_mock();
        let ctl = Adc16Controller::new(Arc::downgrade(&transport), &ChipSet::all());
        drop(transport);
        assert!(matches!(
            ctl.revision(),
            Err(Error::Transport(crate::transport::Error::Dropped))
        ));
    }
}
