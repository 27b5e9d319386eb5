/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! Conversion between textual values and P4Runtime binary strings.
//!
//! P4Runtime carries every match value, action parameter and packet
//! metadata field as a big-endian byte string.  [`parse_value`] produces
//! the full-width form, `(bitwidth + 7) / 8` bytes long; [`make_canonical`]
//! strips it down to the shortest form when the context asks for it.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{Error, Result};
use crate::options::Options;

/// Number of bytes needed to hold a value of `bitwidth` bits.
pub fn num_bytes(bitwidth: u32) -> usize {
    ((bitwidth as usize) + 7) / 8
}

/// Parses `value` into a big-endian byte string of exactly
/// `num_bytes(bitwidth)` bytes.
///
/// Accepts decimal, `0x` hex, `0o` octal and `0b` binary integers, plus
/// dotted-quad addresses for 32-bit fields, MAC addresses for 48-bit fields
/// and IPv6 addresses for 128-bit fields.
pub fn parse_value(value: &str, bitwidth: u32) -> Result<Vec<u8>> {
    let value = value.trim();
    if bitwidth == 32 && value.contains('.') {
        return value
            .parse::<Ipv4Addr>()
            .map(|ip| ip.octets().to_vec())
            .map_err(|_| Error::Format(format!("'{}' is not a valid IPv4 address", value)));
    }
    if bitwidth == 48 && value.contains(':') {
        return parse_mac(value);
    }
    if bitwidth == 128 && value.contains(':') {
        return value
            .parse::<Ipv6Addr>()
            .map(|ip| ip.octets().to_vec())
            .map_err(|_| Error::Format(format!("'{}' is not a valid IPv6 address", value)));
    }

    let magnitude = parse_integer(value).ok_or_else(|| {
        Error::Format(format!(
            "Invalid value '{}': could not cast to integer, try in hex with 0x prefix",
            value
        ))
    })?;
    if bit_length(&magnitude) > bitwidth as usize {
        return Err(Error::Format(format!(
            "Invalid value '{}': cannot be represented with {} bits",
            value, bitwidth
        )));
    }
    Ok(pad(&magnitude, num_bytes(bitwidth)))
}

fn parse_mac(value: &str) -> Result<Vec<u8>> {
    let bad_mac = || Error::Format(format!("'{}' is not a valid MAC address", value));
    let bytes = value
        .split(':')
        .map(|b| u8::from_str_radix(b.trim(), 16))
        .collect::<std::result::Result<Vec<u8>, _>>()
        .map_err(|_| bad_mac())?;
    if bytes.len() != 6 {
        return Err(bad_mac());
    }
    Ok(bytes)
}

/// Parses an unsigned integer literal of arbitrary size into its minimal
/// big-endian magnitude.  Returns `None` if `s` is not a valid literal.
fn parse_integer(s: &str) -> Option<Vec<u8>> {
    let lower = s.to_ascii_lowercase();
    let (radix, digits) = if let Some(d) = lower.strip_prefix("0x") {
        (16, d)
    } else if let Some(d) = lower.strip_prefix("0o") {
        (8, d)
    } else if let Some(d) = lower.strip_prefix("0b") {
        (2, d)
    } else {
        (10, lower.as_str())
    };
    // Underscores may separate digits, as in "0xdead_beef".
    let digits = digits.strip_prefix('_').unwrap_or(digits);
    if digits.is_empty() || digits.ends_with('_') || digits.contains("__") {
        return None;
    }

    let mut acc: Vec<u8> = Vec::new();
    for c in digits.chars().filter(|&c| c != '_') {
        let mut carry = c.to_digit(radix)?;
        for byte in acc.iter_mut().rev() {
            let v = u32::from(*byte) * radix + carry;
            *byte = v as u8;
            carry = v >> 8;
        }
        while carry > 0 {
            acc.insert(0, carry as u8);
            carry >>= 8;
        }
    }
    Some(acc)
}

/// Number of significant bits in a big-endian magnitude.
fn bit_length(bytes: &[u8]) -> usize {
    match bytes.iter().position(|&b| b != 0) {
        Some(i) => (bytes.len() - i - 1) * 8 + (8 - bytes[i].leading_zeros() as usize),
        None => 0,
    }
}

/// Left-pads `bytes` with zeros to `len` bytes.  `bytes` must not have more
/// than `len` significant bytes.
fn pad(bytes: &[u8], len: usize) -> Vec<u8> {
    let significant = match bytes.iter().position(|&b| b != 0) {
        Some(i) => &bytes[i..],
        None => &[],
    };
    let mut out = vec![0; len.saturating_sub(significant.len())];
    out.extend_from_slice(significant);
    out
}

/// Returns the shortest big-endian form of `bytes`: leading zero bytes are
/// removed and a zero value is a single zero byte.
pub fn to_canonical(bytes: &[u8]) -> Vec<u8> {
    match bytes.iter().position(|&b| b != 0) {
        Some(i) => bytes[i..].to_vec(),
        None => vec![0],
    }
}

/// Applies [`to_canonical`] when `canonical_bytestrings` is enabled.
pub fn make_canonical(bytes: Vec<u8>, options: &Options) -> Vec<u8> {
    if options.canonical_bytestrings() {
        to_canonical(&bytes)
    } else {
        bytes
    }
}

/// A byte string of `bitwidth` bits set to one, in full-width form.
pub fn all_ones(bitwidth: u32) -> Vec<u8> {
    let mut bytes = vec![0xff; num_bytes(bitwidth)];
    let spare = bytes.len() * 8 - bitwidth as usize;
    if let Some(first) = bytes.first_mut() {
        *first >>= spare;
    }
    bytes
}

/// Encodes an integer as a full-width byte string for `bitwidth` bits.
pub fn encode_uint(value: u128, bitwidth: u32) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(16);
    buf.write_u128::<BigEndian>(value)
        .map_err(|e| Error::Format(format!("cannot encode {} ({})", value, e)))?;
    if bit_length(&buf) > bitwidth as usize {
        return Err(Error::Format(format!(
            "Invalid value '{}': cannot be represented with {} bits",
            value, bitwidth
        )));
    }
    Ok(pad(&buf, num_bytes(bitwidth)))
}

/// Interprets a big-endian byte string as an integer, if it fits in 128
/// bits.
pub fn decode_uint(bytes: &[u8]) -> Option<u128> {
    let significant = match bytes.iter().position(|&b| b != 0) {
        Some(i) => &bytes[i..],
        None => return Some(0),
    };
    if significant.len() > 16 {
        return None;
    }
    Some(BigEndian::read_uint128(significant, significant.len()))
}

/// Formats a byte string as lowercase hex, for diagnostics.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(2 + bytes.len() * 2);
    s.push_str("0x");
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers() {
        assert_eq!(parse_value("10", 8).unwrap(), vec![0x0a]);
        assert_eq!(parse_value("0x0a", 16).unwrap(), vec![0x00, 0x0a]);
        assert_eq!(parse_value("0b101", 9).unwrap(), vec![0x00, 0x05]);
        assert_eq!(parse_value("0o17", 8).unwrap(), vec![0x0f]);
        assert_eq!(parse_value(" 1024 ", 32).unwrap(), vec![0, 0, 4, 0]);
        assert_eq!(parse_value("0xdead_beef", 32).unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(parse_value("0", 12).unwrap(), vec![0, 0]);
    }

    #[test]
    fn wide_integers() {
        let value = parse_value("0x0102030405060708090a0b0c0d0e0f1011", 136).unwrap();
        assert_eq!(value.len(), 17);
        assert_eq!(value[0], 0x01);
        assert_eq!(value[16], 0x11);

        let decimal = parse_value("340282366920938463463374607431768211456", 129).unwrap();
        assert_eq!(decimal.len(), 17);
        assert_eq!(decimal[0], 0x01);
        assert!(decimal[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn addresses() {
        assert_eq!(parse_value("10.0.0.1", 32).unwrap(), vec![10, 0, 0, 1]);
        assert_eq!(
            parse_value("aa:bb:cc:dd:ee:ff", 48).unwrap(),
            vec![0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]
        );
        let v6 = parse_value("2001:db8::1", 128).unwrap();
        assert_eq!(v6.len(), 16);
        assert_eq!(&v6[..4], &[0x20, 0x01, 0x0d, 0xb8]);
        assert_eq!(v6[15], 1);
    }

    #[test]
    fn bad_values() {
        assert!(parse_value("256", 8).is_err());
        assert!(parse_value("512", 9).is_err());
        assert!(parse_value("511", 9).is_ok());
        assert!(parse_value("hello", 32).is_err());
        assert!(parse_value("0x", 32).is_err());
        assert!(parse_value("-1", 32).is_err());
        assert!(parse_value("10.0.0.256", 32).is_err());
        assert!(parse_value("aa:bb:cc", 48).is_err());
        assert!(parse_value("aa:bb:cc:dd:ee:gg", 48).is_err());
        assert!(parse_value("10.0.0.1", 16).is_err());
    }

    #[test]
    fn canonical_forms() {
        assert_eq!(to_canonical(&[0, 0, 4, 0]), vec![4, 0]);
        assert_eq!(to_canonical(&[0, 0]), vec![0]);
        assert_eq!(to_canonical(&[]), vec![0]);
        assert_eq!(to_canonical(&[0xab]), vec![0xab]);

        let once = to_canonical(&[0, 0, 1, 2]);
        assert_eq!(to_canonical(&once), once);

        let raw = Options::default().with_canonical_bytestrings(false);
        assert_eq!(make_canonical(vec![0, 1], &raw), vec![0, 1]);
        assert_eq!(make_canonical(vec![0, 1], &Options::default()), vec![1]);
    }

    #[test]
    fn boundary_values_at_every_width() {
        for bitwidth in 1..=128u32 {
            let max = if bitwidth == 128 {
                u128::MAX
            } else {
                (1u128 << bitwidth) - 1
            };
            let top_bit = 1u128 << (bitwidth - 1);
            for value in [0, 1, top_bit, max] {
                for text in [
                    format!("{}", value),
                    format!("{:#x}", value),
                    format!("{:#b}", value),
                ] {
                    let bytes = parse_value(&text, bitwidth).unwrap();
                    assert_eq!(bytes.len(), num_bytes(bitwidth), "{} @ {}", text, bitwidth);
                    assert_eq!(decode_uint(&bytes), Some(value), "{} @ {}", text, bitwidth);

                    let canonical = to_canonical(&bytes);
                    assert_eq!(to_canonical(&canonical), canonical);
                    assert_eq!(decode_uint(&canonical), Some(value));
                }
            }
            if bitwidth < 128 {
                assert!(parse_value(&format!("{}", max + 1), bitwidth).is_err());
            }
        }
    }

    #[test]
    fn masks_and_integers() {
        assert_eq!(all_ones(32), vec![0xff; 4]);
        assert_eq!(all_ones(9), vec![0x01, 0xff]);
        assert_eq!(all_ones(0), Vec::<u8>::new());

        assert_eq!(encode_uint(0x1ff, 9).unwrap(), vec![0x01, 0xff]);
        assert!(encode_uint(0x200, 9).is_err());
        assert_eq!(decode_uint(&[0x01, 0xff]), Some(0x1ff));
        assert_eq!(decode_uint(&[]), Some(0));
        assert_eq!(to_hex(&[0x0a, 0x00]), "0x0a00");
    }
}
