//! Numeric literals and number formatting.

use cfg_if::cfg_if;

/// Enough room for `i32::MIN` in base 2.
pub const FORMAT_BUF_LEN: usize = 33;

/// More places than this would overflow any fraction.
pub const MAX_FIXED_POINT_PLACES: u32 = 9;

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Parses `token` as a 32-bit number.
///
/// A token containing a `.` is read as a decimal fraction and scaled by
/// `10^places`, when fixed-point support is compiled in. Otherwise a leading
/// `%`, `$` or `#` selects base 2, 16 or 10 for this token only, and in base
/// 10 a `0x` prefix selects hex. Values wrap to 32 bits.
pub fn parse(token: &[u8], base: u32, places: u32) -> Option<i32> {
    if token.contains(&b'.') {
        return parse_fixed(token, places);
    }

    let (base, rest) = match token.split_first() {
        Some((b'%', rest)) => (2, rest),
        Some((b'$', rest)) => (16, rest),
        Some((b'#', rest)) => (10, rest),
        _ => (base, token),
    };
    if !(2..=36).contains(&base) {
        return None;
    }

    let (negative, rest) = match rest.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some((b'+', rest)) => (false, rest),
        _ => (false, rest),
    };

    let (base, digits) = match rest {
        [b'0', b'x' | b'X', hex @ ..] if base == 10 => (16, hex),
        _ => (base, rest),
    };
    if digits.is_empty() {
        return None;
    }

    let mut acc: u32 = 0;
    for &d in digits {
        let val = (d as char).to_digit(base)?;
        acc = acc.wrapping_mul(base).wrapping_add(val);
    }
    let val = acc as i32;
    Some(if negative { val.wrapping_neg() } else { val })
}

fn parse_fixed(token: &[u8], places: u32) -> Option<i32> {
    cfg_if! {
        if #[cfg(feature = "fixed-point")] {
            let text = core::str::from_utf8(token).ok()?;
            let mut val: f64 = text.parse().ok()?;
            for _ in 0..places.min(MAX_FIXED_POINT_PLACES) {
                val *= 10.0;
            }
            // truncates toward zero, saturating at the i32 limits
            Some(val as i32)
        } else {
            let _ = (token, places);
            None
        }
    }
}

/// Formats `value` as signed text in `base`.
///
/// Returns `None` for a base outside `2..=36`.
pub fn format(value: i32, base: u32, buf: &mut [u8; FORMAT_BUF_LEN]) -> Option<&[u8]> {
    let start = format_unsigned(value.unsigned_abs(), base, buf)?.len();
    let start = FORMAT_BUF_LEN - start;
    if value < 0 {
        buf[start - 1] = b'-';
        Some(&buf[start - 1..])
    } else {
        Some(&buf[start..])
    }
}

/// Formats the bit pattern of `value` as unsigned text in `base`.
pub fn format_unsigned(mut value: u32, base: u32, buf: &mut [u8; FORMAT_BUF_LEN]) -> Option<&[u8]> {
    if !(2..=36).contains(&base) {
        return None;
    }
    let mut idx = FORMAT_BUF_LEN;
    loop {
        idx -= 1;
        buf[idx] = DIGITS[(value % base) as usize];
        value /= base;
        if value == 0 {
            break;
        }
    }
    Some(&buf[idx..])
}
