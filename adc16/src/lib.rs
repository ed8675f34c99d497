//! # adc16
//!
//! Monitor, control and SERDES calibration of the HMCAD1511 ADCs that sit behind the CASPER
//! "ADC16" controller gateware (as found on the SNAP board).
//!
//! The calibration core only ever talks to the board through the [`transport::Transport`]
//! register interface, so any connection that can read and write named devices can drive it.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod core;
pub mod prelude;
pub mod transport;
pub mod yellow_blocks;
