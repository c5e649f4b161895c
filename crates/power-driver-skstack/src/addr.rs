//! Addresses as the modem prints and parses them.
//!
//! SKSTACK always writes IPv6 addresses fully expanded
//! (`FE80:0000:0000:0000:021C:6400:030C:12A4`) and hardware addresses as
//! 16 uppercase hex digits. Both are kept in that form on output, which is
//! why these are not `std::net::Ipv6Addr`.

use std::fmt;
use std::str::FromStr;

/// IPv6 address in the modem's fully expanded notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv6Address([u8; 16]);

impl Ipv6Address {
    pub const fn from_octets(octets: [u8; 16]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 16] {
        self.0
    }
}

impl fmt::Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pair) in self.0.chunks_exact(2).enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02X}{:02X}", pair[0], pair[1])?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address '{0}'")]
pub struct AddressParseError(String);

impl FromStr for Ipv6Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressParseError(s.to_string());

        let groups: Vec<&str> = s.split(':').collect();
        if groups.len() != 8 {
            return Err(invalid());
        }

        let mut octets = [0u8; 16];
        for (i, group) in groups.iter().enumerate() {
            if group.is_empty() || group.len() > 4 {
                return Err(invalid());
            }
            let padded = format!("{group:0>4}");
            hex::decode_to_slice(&padded, &mut octets[i * 2..i * 2 + 2]).map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

/// 64-bit hardware (extended) address of a radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkAddress([u8; 8]);

impl LinkAddress {
    pub const fn from_octets(octets: [u8; 8]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 8] {
        self.0
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl FromStr for LinkAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 8];
        hex::decode_to_slice(s, &mut octets).map_err(|_| AddressParseError(s.to_string()))?;
        Ok(Self(octets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METER_IP: &str = "FE80:0000:0000:0000:021C:6400:030C:12A4";

    #[test]
    fn test_ipv6_full_form_preserved() {
        let addr: Ipv6Address = METER_IP.parse().unwrap();
        assert_eq!(addr.to_string(), METER_IP);
        assert_eq!(addr.octets()[0], 0xFE);
        assert_eq!(addr.octets()[15], 0xA4);
    }

    #[test]
    fn test_ipv6_short_groups_are_padded() {
        let addr: Ipv6Address = "fe80:0:0:0:21c:6400:30c:12a4".parse().unwrap();
        assert_eq!(addr.to_string(), METER_IP);
    }

    #[test]
    fn test_ipv6_rejects_malformed() {
        assert!("FE80::1".parse::<Ipv6Address>().is_err());
        assert!("FE80:0000:0000:0000:021C:6400:030C".parse::<Ipv6Address>().is_err());
        assert!("FE80:0000:0000:0000:021C:6400:030C:12A4G".parse::<Ipv6Address>().is_err());
        assert!("OK".parse::<Ipv6Address>().is_err());
    }

    #[test]
    fn test_ipv6_rejects_signed_groups() {
        assert!("+E80:0000:0000:0000:021C:6400:030C:12A4".parse::<Ipv6Address>().is_err());
        assert!("FE80:0000:0000:0000:+21C:6400:030C:12A4".parse::<Ipv6Address>().is_err());
        assert!("FE80:0000:0000:0000:021C:6400:030C:-2A4".parse::<Ipv6Address>().is_err());
    }

    #[test]
    fn test_link_address() {
        let mac: LinkAddress = "001C6400030C12A4".parse().unwrap();
        assert_eq!(mac.to_string(), "001C6400030C12A4");
        assert_eq!(mac.octets()[1], 0x1C);
        assert!("001C64".parse::<LinkAddress>().is_err());
    }
}
