//! Cumulative Energy Conversion
//!
//! The meter does not report kWh directly. It exposes three properties that
//! have to be combined:
//!
//! - the raw cumulative register (unsigned 32-bit count)
//! - a coefficient the register is multiplied by (unsigned 32-bit, 1 if absent)
//! - a unit code selecting how many kWh one count represents
//!
//! ```text
//! kWh = raw × coefficient × scale(unit_code)
//! ```
//!
//! The product `raw × coefficient` is computed in 64-bit integers, then
//! converted to `f64` once and multiplied by the scale. No rounding is applied
//! beyond what IEEE-754 double arithmetic does.

/// Unit of one count of the cumulative-energy register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyUnit {
    /// 0x00: 1 kWh
    Kwh,
    /// 0x01: 0.1 kWh
    DeciKwh,
    /// 0x02: 0.01 kWh
    CentiKwh,
    /// 0x03: 0.001 kWh
    MilliKwh,
    /// 0x04: 0.0001 kWh
    TenthMilliKwh,
    /// 0x0A: 10 kWh
    TenKwh,
    /// 0x0B: 100 kWh
    HundredKwh,
    /// 0x0C: 1000 kWh
    ThousandKwh,
    /// 0x0D: 10000 kWh
    TenThousandKwh,
}

impl EnergyUnit {
    /// Look up a unit code. Returns `None` for codes the meter class does not define.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Kwh),
            0x01 => Some(Self::DeciKwh),
            0x02 => Some(Self::CentiKwh),
            0x03 => Some(Self::MilliKwh),
            0x04 => Some(Self::TenthMilliKwh),
            0x0A => Some(Self::TenKwh),
            0x0B => Some(Self::HundredKwh),
            0x0C => Some(Self::ThousandKwh),
            0x0D => Some(Self::TenThousandKwh),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Kwh => 0x00,
            Self::DeciKwh => 0x01,
            Self::CentiKwh => 0x02,
            Self::MilliKwh => 0x03,
            Self::TenthMilliKwh => 0x04,
            Self::TenKwh => 0x0A,
            Self::HundredKwh => 0x0B,
            Self::ThousandKwh => 0x0C,
            Self::TenThousandKwh => 0x0D,
        }
    }

    /// kWh represented by one register count.
    pub fn scale(self) -> f64 {
        match self {
            Self::Kwh => 1.0,
            Self::DeciKwh => 0.1,
            Self::CentiKwh => 0.01,
            Self::MilliKwh => 0.001,
            Self::TenthMilliKwh => 0.0001,
            Self::TenKwh => 10.0,
            Self::HundredKwh => 100.0,
            Self::ThousandKwh => 1000.0,
            Self::TenThousandKwh => 10000.0,
        }
    }
}

/// Scale factor for a raw unit code; unrecognized codes scale by 1.
pub fn unit_scale(unit_code: u8) -> f64 {
    EnergyUnit::from_code(unit_code).map_or(1.0, EnergyUnit::scale)
}

/// Convert the raw cumulative register into kWh.
pub fn forward_energy_kwh(raw_value: u32, coefficient: u32, unit_code: u8) -> f64 {
    let counts = u64::from(raw_value) * u64::from(coefficient);
    counts as f64 * unit_scale(unit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_conversions() {
        assert_eq!(forward_energy_kwh(100, 1, 0x01), 10.0);
        assert_eq!(forward_energy_kwh(100, 1, 0x00), 100.0);
        assert_eq!(forward_energy_kwh(100, 2, 0x02), 2.0);
    }

    #[test]
    fn test_large_units() {
        assert_eq!(forward_energy_kwh(3, 1, 0x0A), 30.0);
        assert_eq!(forward_energy_kwh(3, 1, 0x0D), 30000.0);
    }

    #[test]
    fn test_unknown_unit_code_scales_by_one() {
        assert_eq!(forward_energy_kwh(42, 1, 0x05), 42.0);
        assert_eq!(forward_energy_kwh(42, 1, 0xFF), 42.0);
    }

    #[test]
    fn test_product_does_not_overflow() {
        let kwh = forward_energy_kwh(u32::MAX, u32::MAX, 0x00);
        assert_eq!(kwh, (u64::from(u32::MAX) * u64::from(u32::MAX)) as f64);
    }

    #[test]
    fn test_unit_code_roundtrip() {
        for code in [0x00, 0x01, 0x02, 0x03, 0x04, 0x0A, 0x0B, 0x0C, 0x0D] {
            let unit = EnergyUnit::from_code(code).unwrap();
            assert_eq!(unit.code(), code);
        }
        assert_eq!(EnergyUnit::from_code(0x09), None);
    }
}
