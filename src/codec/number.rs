// SPDX-License-Identifier: MIT
//! Canonical decimal parsing and formatting for the integer codecs
//!
//! A value is accepted only if formatting it again (with the codec's zero
//! padding) reproduces the input exactly. `007` is accepted by `u(3)` but not
//! by `u`, and `+5` is never accepted.

/// Largest value `u` accepts
pub const UNSIGNED_MAX: u64 = (1 << 30) - 1;
/// Largest value `u8` accepts
pub const BYTE_MAX: u64 = 255;
/// Largest magnitude `i` accepts
pub const SIGNED_MAX: u64 = (1 << 29) - 1;
/// Largest magnitude `di` accepts, so every delta fits a signed varint
pub const DELTA_MAX: u64 = (1 << 28) - 1;

/// Upper bound for the zero-padding parameter
pub const MAX_DIGITS: u8 = 19;

#[inline]
pub fn digit_count(mut value: u64) -> usize {
    let mut digits = 1;
    while value >= 10 {
        value /= 10;
        digits += 1;
    }
    digits
}

/// Parse an unsigned decimal without sign
pub fn parse_unsigned(text: &[u8], min_digits: u8, max: u64) -> Option<u64> {
    if text.is_empty() || text.len() > MAX_DIGITS as usize {
        return None;
    }
    let mut value: u64 = 0;
    for &byte in text {
        if !byte.is_ascii_digit() {
            return None;
        }
        value = value * 10 + (byte - b'0') as u64;
    }
    if value > max || text.len() != digit_count(value).max(min_digits as usize) {
        return None;
    }
    Some(value)
}

/// Parse an optionally negative decimal into sign and magnitude
///
/// `-0` is accepted here; callers that cannot keep the sign of zero must
/// reject it themselves.
pub fn parse_signed(text: &[u8], min_digits: u8, max_magnitude: u64) -> Option<(bool, u64)> {
    match text.split_first() {
        Some((b'-', digits)) => {
            parse_unsigned(digits, min_digits, max_magnitude).map(|value| (true, value))
        }
        _ => parse_unsigned(text, min_digits, max_magnitude).map(|value| (false, value)),
    }
}

/// Append `magnitude` in decimal, zero-padded to `min_digits`
pub fn write_decimal(out: &mut Vec<u8>, negative: bool, magnitude: u64, min_digits: u8) {
    if negative {
        out.push(b'-');
    }
    for _ in digit_count(magnitude)..min_digits as usize {
        out.push(b'0');
    }
    let start = out.len();
    let mut value = magnitude;
    loop {
        out.push(b'0' + (value % 10) as u8);
        value /= 10;
        if value == 0 {
            break;
        }
    }
    out[start..].reverse();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsigned_canonical() {
        assert_eq!(parse_unsigned(b"42", 0, UNSIGNED_MAX), Some(42));
        assert_eq!(parse_unsigned(b"0", 0, UNSIGNED_MAX), Some(0));
        assert_eq!(parse_unsigned(b"007", 3, UNSIGNED_MAX), Some(7));
        assert_eq!(parse_unsigned(b"1234", 3, UNSIGNED_MAX), Some(1234));
        assert_eq!(parse_unsigned(b"07", 0, UNSIGNED_MAX), None);
        assert_eq!(parse_unsigned(b"7", 3, UNSIGNED_MAX), None);
        assert_eq!(parse_unsigned(b"", 0, UNSIGNED_MAX), None);
        assert_eq!(parse_unsigned(b"4x", 0, UNSIGNED_MAX), None);
        assert_eq!(parse_unsigned(b"256", 0, BYTE_MAX), None);
        assert_eq!(parse_unsigned(b"99999999999999999999999", 0, UNSIGNED_MAX), None);
    }

    #[test]
    fn test_signed_canonical() {
        assert_eq!(parse_signed(b"-12", 0, SIGNED_MAX), Some((true, 12)));
        assert_eq!(parse_signed(b"-0", 0, SIGNED_MAX), Some((true, 0)));
        assert_eq!(parse_signed(b"12", 0, SIGNED_MAX), Some((false, 12)));
        assert_eq!(parse_signed(b"+12", 0, SIGNED_MAX), None);
        assert_eq!(parse_signed(b"-", 0, SIGNED_MAX), None);
        assert_eq!(parse_signed(b"--1", 0, SIGNED_MAX), None);
    }

    #[test]
    fn test_write_decimal() {
        let mut out = Vec::new();
        write_decimal(&mut out, false, 7, 3);
        assert_eq!(out, b"007");
        out.clear();
        write_decimal(&mut out, true, 120, 0);
        assert_eq!(out, b"-120");
        out.clear();
        write_decimal(&mut out, false, 0, 0);
        assert_eq!(out, b"0");
    }
}
