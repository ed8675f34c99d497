//! The core types and functions for interacting with the connected platform
use crate::transport::{
    Transport,
    TransportResult,
};
use kstring::KString;
use std::{
    collections::HashMap,
    time::{
        Duration,
        Instant,
    },
};

/// The representation of an interal register
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Register {
    /// The offset in FPGA memory of this register
    pub addr: usize,
    /// The number of bytes stored at this location
    pub length: usize,
}

/// The mapping from register names and their data (address and size)
pub type RegisterMap = HashMap<KString, Register>;

/// Read the `sys_clkcounter` register twice, `delay` apart, to estimate the FPGA clock rate in
/// megahertz
/// # Errors
/// Returns an error on bad transport
#[allow(clippy::cast_precision_loss)]
pub fn estimate_fpga_clock<T>(transport: &mut T, delay: Duration) -> TransportResult<f64>
where
    T: Transport,
{
    let earlier = Instant::now();
    let first_count = u64::from(transport.read::<u32, 4>("sys_clkcounter", 0)?);
    let transport_delay = earlier.elapsed().as_secs_f64();
    std::thread::sleep(delay);
    let mut second_count = u64::from(transport.read::<u32, 4>("sys_clkcounter", 0)?);
    if first_count > second_count {
        second_count += 1u64 << 32;
    }
    let window = (delay.as_secs_f64() - transport_delay).max(f64::EPSILON);
    Ok((second_count - first_count) as f64 / (window * 1_000_000_f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::Mock;

    #[test]
    fn test_stopped_counter() {
        let mut transport = Mock::new(HashMap::from([(
            "sys_clkcounter".into(),
            Register { addr: 0, length: 4 },
        )]));
        transport
            .write("sys_clkcounter", 0, &0xDEAD_BEEFu32)
            .unwrap();
        let mhz = estimate_fpga_clock(&mut transport, Duration::from_millis(5)).unwrap();
        assert!(mhz.abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_counter() {
        let mut transport = Mock::new(HashMap::new());
        assert!(estimate_fpga_clock(&mut transport, Duration::ZERO).is_err());
    }
}
