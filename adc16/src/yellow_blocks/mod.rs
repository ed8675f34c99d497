//! Logic and implementations for "Yellow Block" devices.

pub mod snapadc;

/// Registers that live at a fixed address, set with the `#[address(..)]` attribute
pub trait Address {
    fn addr() -> u8;
}
