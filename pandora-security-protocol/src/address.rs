//! Bluetooth Device Addresses
//!
//! Peer addresses cross the RPC boundary inside the opaque connection cookie
//! and cross the stack boundary as text.
//!
//! ## Encodings
//!
//! - **Text**: six upper-case hex octets separated by colons, e.g.
//!   `AA:BB:CC:DD:EE:FF`. Parsing accepts lower case as well.
//! - **Cookie**: the six raw octets, most significant first.

use crate::{BridgeError, Result};
use std::fmt;
use std::str::FromStr;

/// Number of octets in a Bluetooth device address
pub const ADDRESS_LEN: usize = 6;

/// A Bluetooth device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// Create an address from its raw octets
    pub const fn new(octets: [u8; ADDRESS_LEN]) -> Self {
        Self(octets)
    }

    /// Raw octets, most significant first
    pub fn octets(&self) -> [u8; ADDRESS_LEN] {
        self.0
    }

    /// Decode an address from connection cookie bytes
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::MalformedAnswer` if the cookie is not exactly
    /// six bytes long.
    ///
    /// ```
    /// use pandora_security_protocol::Address;
    ///
    /// let address = Address::from_cookie(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]).unwrap();
    /// assert_eq!(address.to_string(), "AA:BB:CC:DD:EE:FF");
    /// ```
    pub fn from_cookie(bytes: &[u8]) -> Result<Self> {
        let octets: [u8; ADDRESS_LEN] = bytes.try_into().map_err(|_| {
            BridgeError::malformed(format!(
                "address cookie has {} bytes, expected {}",
                bytes.len(),
                ADDRESS_LEN
            ))
        })?;
        Ok(Self(octets))
    }

    /// Encode this address as connection cookie bytes
    pub fn to_cookie(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let octets: Vec<String> = self.0.iter().map(|b| hex::encode_upper([*b])).collect();
        write!(f, "{}", octets.join(":"))
    }
}

impl FromStr for Address {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != ADDRESS_LEN || parts.iter().any(|p| p.len() != 2) {
            return Err(BridgeError::malformed(format!(
                "'{}' is not a Bluetooth address",
                s
            )));
        }

        let bytes = hex::decode(parts.concat())
            .map_err(|e| BridgeError::malformed(format!("'{}': {}", s, e)))?;
        Self::from_cookie(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let address: Address = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(address.octets(), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(address.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_cookie_encoding() {
        let address = Address::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(address.to_cookie(), vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(Address::from_cookie(&address.to_cookie()).unwrap(), address);
    }

    #[test]
    fn test_short_cookie_is_malformed() {
        let error = Address::from_cookie(&[0x01, 0x02, 0x03]).unwrap_err();
        assert!(matches!(error, BridgeError::MalformedAnswer(_)));

        let error = Address::from_cookie(&[]).unwrap_err();
        assert!(matches!(error, BridgeError::MalformedAnswer(_)));
    }

    #[test]
    fn test_rejects_invalid_text() {
        assert!("AA:BB:CC:DD:EE".parse::<Address>().is_err());
        assert!("AA:BB:CC:DD:EE:GG".parse::<Address>().is_err());
        assert!("AABBCCDDEEFF".parse::<Address>().is_err());
        assert!("A:BB:CC:DD:EE:FFF".parse::<Address>().is_err());
    }
}
