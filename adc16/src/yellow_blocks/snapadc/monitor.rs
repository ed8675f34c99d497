//! Preflight checks on the line clock and the loaded design

use super::{
    controller::{
        Adc3Wire,
        NAME,
    },
    Error,
};
use crate::{
    core::estimate_fpga_clock,
    transport::{
        lock,
        upgrade,
        Transport,
    },
};
use std::{
    sync::{
        Arc,
        Mutex,
        Weak,
    },
    time::Duration,
};
use tracing::debug;

#[derive(Debug)]
pub struct ClockMonitor<T> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
}

impl<T> ClockMonitor<T>
where
    T: Transport,
{
    #[must_use]
    pub fn new(transport: &Arc<Mutex<T>>) -> Self {
        Self {
            transport: Arc::downgrade(transport),
        }
    }

    /// Read the status word
    /// # Errors
    /// Returns an error on bad transport
    pub fn status(&self) -> Result<Adc3Wire, Error> {
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        Ok(transport.read_addr(NAME)?)
    }

    /// The status word as it reads on the bus, for reporting
    /// # Errors
    /// Returns an error on bad transport
    pub fn raw_status(&self) -> Result<u32, Error> {
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        Ok(transport.read::<u32, 4>(NAME, 0)?)
    }

    /// Both line clock lock flags are set
    /// # Errors
    /// Returns an error on bad transport
    pub fn is_clock_locked(&self) -> Result<bool, Error> {
        let status = self.status()?;
        debug!(line_lock = u8::from(status.line_lock), "Read line clock lock flags");
        Ok(status.locked())
    }

    /// A design is running and the ADC16 controller is among its devices
    /// # Errors
    /// Returns an error on bad transport
    pub fn is_expected_design_present(&self) -> Result<bool, Error> {
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        if !transport.is_running()? {
            debug!("No design running");
            return Ok(false);
        }
        Ok(transport.listdev()?.contains_key(NAME))
    }

    /// Estimate the FPGA fabric clock in MHz from the free running counter
    /// # Errors
    /// Returns an error on bad transport
    pub fn board_clock_mhz(&self, delay: Duration) -> Result<f64, Error> {
        let tarc = upgrade(&self.transport)?;
        let mut transport = lock(&tarc)?;
        Ok(estimate_fpga_clock(&mut *transport, delay)?)
    }
}
