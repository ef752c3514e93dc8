//! Unit decoding for raw device fields.
//!
//! The meter reports every quantity as a hexadecimal fixed-point integer with
//! a separate scale: a multiplier/divisor pair for demand and summation, a
//! trailing-digit count for price. Timestamps are whole seconds since the
//! device epoch (2000-01-01T00:00:00Z).
//!
//! All functions here are pure.

use std::num::IntErrorKind;

use chrono::{DateTime, Utc};

use crate::error::DecodeError;

/// Unix seconds at the device epoch, 2000-01-01T00:00:00Z.
pub const DEVICE_EPOCH_UNIX_SECS: i64 = 946_684_800;

/// Largest value the meter treats as a positive 32-bit quantity.
const INT32_MAX: i128 = i32::MAX as i128;

/// 2^32, the wraparound modulus for the demand encoding quirk.
const UINT32_RANGE: i128 = 1 << 32;

/// Decode a device timestamp. An absent or empty field counts as `0x0`.
pub fn decode_timestamp(raw: Option<&str>) -> Result<DateTime<Utc>, DecodeError> {
    const FIELD: &str = "TimeStamp";
    let raw = raw.filter(|s| !s.trim().is_empty()).unwrap_or("0x0");
    let offset = parse_hex(FIELD, raw, false)?;

    let out_of_range = || DecodeError::OutOfRange {
        field: FIELD,
        value: raw.to_string(),
    };
    let secs = i64::try_from(offset)
        .ok()
        .and_then(|o| DEVICE_EPOCH_UNIX_SECS.checked_add(o))
        .ok_or_else(out_of_range)?;
    DateTime::from_timestamp(secs, 0).ok_or_else(out_of_range)
}

/// Decode a scaled reading: `raw * multiplier / divisor`.
///
/// A product above `i32::MAX` is folded back into the negative half of the
/// 32-bit two's-complement range before dividing; the meter sends demand as
/// a signed 32-bit quantity that arrives looking unsigned.
pub fn decode_reading(raw: &str, multiplier: &str, divisor: &str) -> Result<f64, DecodeError> {
    let value = parse_hex("reading", raw, true)?;
    let multiplier = parse_hex("Multiplier", multiplier, true)?;
    let divisor_value = parse_hex("Divisor", divisor, true)?;

    let mut scaled = value
        .checked_mul(multiplier)
        .ok_or_else(|| DecodeError::OutOfRange {
            field: "reading",
            value: raw.to_string(),
        })?;
    if scaled > INT32_MAX {
        scaled = -(UINT32_RANGE - scaled);
    }

    if divisor_value == 0 {
        return Err(DecodeError::DivideByZero { field: "Divisor" });
    }
    Ok(scaled as f64 / divisor_value as f64)
}

/// Decode a price: `price / 10^trailing_digits`.
pub fn decode_price(price: &str, trailing_digits: &str) -> Result<f64, DecodeError> {
    let value = parse_hex("Price", price, true)?;
    let digits = parse_hex("TrailingDigits", trailing_digits, false)?;

    let out_of_range = || DecodeError::OutOfRange {
        field: "TrailingDigits",
        value: trailing_digits.to_string(),
    };
    let exponent = i32::try_from(digits).map_err(|_| out_of_range())?;
    let scale = 10f64.powi(exponent);
    if !scale.is_finite() {
        return Err(out_of_range());
    }
    Ok(value as f64 / scale)
}

/// Parse a base-16 integer with an optional `0x`/`0X` prefix.
///
/// Surrounding whitespace is ignored. A leading sign is accepted only when
/// `signed` is set.
fn parse_hex(field: &'static str, raw: &str, signed: bool) -> Result<i128, DecodeError> {
    let format_error = || DecodeError::Format {
        field,
        value: raw.to_string(),
    };

    let s = raw.trim();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') if signed => (true, &s[1..]),
        Some(b'+') if signed => (false, &s[1..]),
        _ => (false, s),
    };
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    // from_str_radix would accept its own sign; the sign was handled above.
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format_error());
    }

    let magnitude = i128::from_str_radix(digits, 16).map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => DecodeError::OutOfRange {
            field,
            value: raw.to_string(),
        },
        _ => format_error(),
    })?;
    Ok(if negative { -magnitude } else { magnitude })
}
