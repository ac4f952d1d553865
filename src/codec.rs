// Address codec - textual IPv4/MAC forms to and from device encodings

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AppError, AppResult};

/// Parse a dotted-quad IPv4 address into its numeric form.
///
/// Octets may carry leading zeros (`010.0.0.1` is `10.0.0.1`), but each must be
/// one to three decimal digits in `0..=255`.
pub fn parse_ipv4(text: &str) -> AppResult<u32> {
    let octets: Vec<&str> = text.split('.').collect();
    if octets.len() != 4 {
        return Err(AppError::Format(format!(
            "IPv4 address '{}' must have four octets",
            text
        )));
    }

    let mut addr = 0u32;
    for octet in octets {
        if octet.is_empty() || octet.len() > 3 || !octet.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::Format(format!(
                "invalid octet '{}' in IPv4 address '{}'",
                octet, text
            )));
        }
        let value: u32 = octet
            .parse()
            .map_err(|_| AppError::Format(format!("invalid octet '{}' in '{}'", octet, text)))?;
        if value > 255 {
            return Err(AppError::Format(format!(
                "octet {} out of range in IPv4 address '{}'",
                value, text
            )));
        }
        addr = (addr << 8) | value;
    }

    Ok(addr)
}

pub fn format_ipv4(addr: u32) -> String {
    let [a, b, c, d] = addr.to_be_bytes();
    format!("{}.{}.{}.{}", a, b, c, d)
}

/// Parse a colon-hex MAC address (`xx:xx:xx:xx:xx:xx`, either case).
pub fn parse_mac(text: &str) -> AppResult<[u8; 6]> {
    let groups: Vec<&str> = text.split(':').collect();
    if groups.len() != 6 {
        return Err(AppError::Format(format!(
            "MAC address '{}' must have six colon-separated groups",
            text
        )));
    }

    let mut bytes = [0u8; 6];
    for (i, group) in groups.iter().enumerate() {
        if group.len() != 2 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AppError::Format(format!(
                "invalid group '{}' in MAC address '{}'",
                group, text
            )));
        }
        bytes[i] = u8::from_str_radix(group, 16)
            .map_err(|_| AppError::Format(format!("invalid group '{}' in '{}'", group, text)))?;
    }

    Ok(bytes)
}

/// Lowercase colon-hex form. Uppercase input is normalized, so a document
/// holding `AA:BB:...` is saved and scripted as `aa:bb:...`.
pub fn format_mac(bytes: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

/// Parse CIDR text (`a.b.c.d/len`) into its address and prefix length.
pub fn parse_prefix(text: &str) -> AppResult<(u32, u8)> {
    let (addr, len) = text.split_once('/').ok_or_else(|| {
        AppError::Format(format!("prefix '{}' is missing a '/length' suffix", text))
    })?;

    let addr = parse_ipv4(addr)?;
    let valid = !len.is_empty() && len.len() <= 2 && len.bytes().all(|b| b.is_ascii_digit());
    match len.parse::<u8>() {
        Ok(len) if valid && len <= 32 => Ok((addr, len)),
        _ => Err(AppError::Format(format!(
            "prefix length '{}' in '{}' must be between 0 and 32",
            len, text
        ))),
    }
}

/// Big-endian encoding of `value` in the minimum number of bytes that hold
/// `bitwidth` bits, as device runtimes expect for match and action fields.
pub fn encode_num(value: u64, bitwidth: u32) -> AppResult<Vec<u8>> {
    if bitwidth == 0 || bitwidth > 64 {
        return Err(AppError::Format(format!("unsupported bit width {}", bitwidth)));
    }
    if bitwidth < 64 && value >> bitwidth != 0 {
        return Err(AppError::Format(format!(
            "value {} does not fit in {} bits",
            value, bitwidth
        )));
    }

    let byte_len = bitwidth.div_ceil(8) as usize;
    let bytes = value.to_be_bytes();
    Ok(bytes[8 - byte_len..].to_vec())
}

/// 48-bit hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    pub fn as_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
    }
}

impl FromStr for MacAddress {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        parse_mac(s).map(MacAddress)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_mac(&self.0))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        assert_eq!(parse_ipv4("192.168.1.0").unwrap(), 0xC0A8_0100);
        assert_eq!(parse_ipv4("0.0.0.0").unwrap(), 0);
        assert_eq!(parse_ipv4("255.255.255.255").unwrap(), u32::MAX);
    }

    #[test]
    fn test_parse_ipv4_rejects_malformed() {
        for bad in ["", "10.0.0", "10.0.0.0.1", "256.0.0.1", "10.0.0.-1", "a.b.c.d", "10..0.1", "1000.0.0.1", " 10.0.0.1"] {
            assert!(
                matches!(parse_ipv4(bad), Err(AppError::Format(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_ipv4_roundtrip_normalizes() {
        for s in ["10.0.0.1", "192.168.2.0", "1.2.3.4", "255.0.255.0"] {
            assert_eq!(format_ipv4(parse_ipv4(s).unwrap()), s);
        }
        assert_eq!(format_ipv4(parse_ipv4("010.000.000.001").unwrap()), "10.0.0.1");
    }

    #[test]
    fn test_format_ipv4_inverse_on_samples() {
        for addr in [0u32, 1, 0x0A00_0000, 0xC0A8_0101, 0xDEAD_BEEF, u32::MAX] {
            assert_eq!(parse_ipv4(&format_ipv4(addr)).unwrap(), addr);
        }
    }

    #[test]
    fn test_parse_mac() {
        assert_eq!(parse_mac("02:00:00:00:00:01").unwrap(), [2, 0, 0, 0, 0, 1]);
        assert_eq!(parse_mac("AA:bb:CC:dd:EE:ff").unwrap(), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    }

    #[test]
    fn test_parse_mac_rejects_malformed() {
        for bad in ["02:00:00:00:00", "02:00:00:00:00:01:02", "02:00:00:00:00:0g", "2:00:00:00:00:01", "02-00-00-00-00-01", "020:0:00:00:00:01"] {
            assert!(
                matches!(parse_mac(bad), Err(AppError::Format(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_mac_is_injective() {
        let a = parse_mac("02:00:00:00:00:01").unwrap();
        let b = parse_mac("02:00:00:00:00:02").unwrap();
        let c = parse_mac("20:00:00:00:00:01").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(format_mac(&a), "02:00:00:00:00:01");
    }

    #[test]
    fn test_parse_prefix() {
        assert_eq!(parse_prefix("10.0.0.0/8").unwrap(), (0x0A00_0000, 8));
        assert_eq!(parse_prefix("0.0.0.0/0").unwrap(), (0, 0));
        assert_eq!(parse_prefix("192.168.1.5/32").unwrap(), (0xC0A8_0105, 32));
        for bad in ["10.0.0.0", "10.0.0.0/33", "10.0.0.0/", "10.0.0.0/x", "10.0.0/8", "10.0.0.0/+8"] {
            assert!(parse_prefix(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_encode_num() {
        assert_eq!(encode_num(3, 9).unwrap(), vec![0x00, 0x03]);
        assert_eq!(encode_num(0x0A00_0000, 32).unwrap(), vec![10, 0, 0, 0]);
        assert_eq!(encode_num(0x0200_0000_0001, 48).unwrap(), vec![2, 0, 0, 0, 0, 1]);
        assert!(encode_num(512, 9).is_err());
        assert!(encode_num(1, 0).is_err());
    }

    #[test]
    fn test_mac_address_serde() {
        let mac: MacAddress = serde_json::from_str("\"02:00:00:00:00:0A\"").unwrap();
        assert_eq!(serde_json::to_string(&mac).unwrap(), "\"02:00:00:00:00:0a\"");
        assert_eq!(mac.as_u64(), 0x0200_0000_000A);
        assert!(serde_json::from_str::<MacAddress>("\"nope\"").is_err());
    }
}
