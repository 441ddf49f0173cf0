//! Remote device identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MapClientError;

/// 48-bit Bluetooth device address, written `00:01:02:03:04:05`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BluetoothAddress([u8; 6]);

impl BluetoothAddress {
    /// Build from raw bytes (most significant first)
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes
    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for BluetoothAddress {
    type Err = MapClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut bytes {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| MapClientError::InvalidAddress(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| MapClientError::InvalidAddress(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(MapClientError::InvalidAddress(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for BluetoothAddress {
    type Error = MapClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BluetoothAddress> for String {
    fn from(addr: BluetoothAddress) -> Self {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let addr: BluetoothAddress = "00:01:02:03:04:0a".parse().unwrap();
        assert_eq!(addr.bytes(), [0, 1, 2, 3, 4, 10]);
        assert_eq!(addr.to_string(), "00:01:02:03:04:0A");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "00:01:02:03:04", "00:01:02:03:04:05:06", "0:01:02:03:04:05", "zz:01:02:03:04:05"] {
            assert!(bad.parse::<BluetoothAddress>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_serde_as_string() {
        let addr = BluetoothAddress::new([0xAA, 0xBB, 0xCC, 0, 1, 2]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, r#""AA:BB:CC:00:01:02""#);
        let back: BluetoothAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
