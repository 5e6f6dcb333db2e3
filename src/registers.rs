//! Fixed Modbus register map of the Heidelberg Energy Control wallbox
//!
//! Addresses and their meaning are defined by the wallbox firmware and are
//! deliberately not configurable.

/// Modbus peer (slave) id of the wallbox
pub const PEER_ID: u8 = 5;

/// Instantaneous charging power in W (input register)
pub const POWER: u16 = 14;

/// Energy meter, high word (input register)
pub const ENERGY_HIGH: u16 = 17;

/// Energy meter, low word (input register)
pub const ENERGY_LOW: u16 = 18;

/// Standby/watchdog timeout (holding register, written with 0 to disable)
pub const WATCHDOG_TIMEOUT: u16 = 257;

/// Maximum charge current in tenths of an ampere (holding register)
pub const MAX_CURRENT: u16 = 261;

/// Value that switches the watchdog timeout off
pub const WATCHDOG_DISABLED: u16 = 0;

/// The meter counts in Wh; published totals are kWh
pub const ENERGY_DIVISOR: f64 = 1000.0;

/// Combine the two meter words into the energy total in kWh
pub fn energy_total_kwh(high: u16, low: u16) -> f64 {
    let raw = (u32::from(high) << 16) | u32::from(low);
    f64::from(raw) / ENERGY_DIVISOR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_total_low_word_only() {
        assert!((energy_total_kwh(0, 12345) - 12.345).abs() < 1e-9);
    }

    #[test]
    fn test_energy_total_uses_high_word() {
        assert!((energy_total_kwh(1, 500) - 66.036).abs() < 1e-9);
        assert!((energy_total_kwh(u16::MAX, u16::MAX) - 4_294_967.295).abs() < 1e-6);
    }

    #[test]
    fn test_energy_total_matches_formula() {
        for (high, low) in [(0u16, 0u16), (2, 1), (300, 65535), (65535, 0)] {
            let expected = (f64::from(high) * 65536.0 + f64::from(low)) / 1000.0;
            assert!((energy_total_kwh(high, low) - expected).abs() < 1e-9);
        }
    }
}
