use crate::error::CodecError;

/// Digit alphabet, ordered by digit value: `0-9`, then `a-z`, then `A-Z`.
pub const ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

const BASE: u64 = 62;

/// Longest rendering of an id that still fits in `i64`.
pub const MAX_LEN: usize = 11;

/// Renders `id` in base-62, most significant digit first.
///
/// `0` encodes to `"0"`; no other id produces a leading zero, so the mapping
/// is injective.
///
/// # Examples
///
/// ```
/// use tinylink_core::base62;
///
/// assert_eq!(base62::encode(0), "0");
/// assert_eq!(base62::encode(61), "Z");
/// assert_eq!(base62::encode(62), "10");
/// ```
pub fn encode(id: u64) -> String {
    if id == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::with_capacity(MAX_LEN);
    let mut rest = id;
    while rest > 0 {
        digits.push(ALPHABET[(rest % BASE) as usize]);
        rest /= BASE;
    }
    digits.reverse();

    // the alphabet is pure ASCII
    digits.into_iter().map(char::from).collect()
}

/// Parses a base-62 code back into an id.
///
/// Fails when the code is empty, contains a character outside [`ALPHABET`],
/// or denotes a value larger than `i64::MAX` (ids are stored as signed 64-bit
/// integers by the relational backend).
pub fn decode(code: &str) -> Result<u64, CodecError> {
    if code.is_empty() {
        return Err(CodecError::Empty);
    }

    let mut value: u64 = 0;
    for (position, ch) in code.char_indices() {
        let digit = digit_value(ch).ok_or(CodecError::InvalidCharacter { ch, position })?;
        value = value
            .checked_mul(BASE)
            .and_then(|v| v.checked_add(digit))
            .filter(|v| *v <= i64::MAX as u64)
            .ok_or_else(|| CodecError::Overflow(code.to_string()))?;
    }

    Ok(value)
}

fn digit_value(ch: char) -> Option<u64> {
    let value = match ch {
        '0'..='9' => ch as u64 - '0' as u64,
        'a'..='z' => ch as u64 - 'a' as u64 + 10,
        'A'..='Z' => ch as u64 - 'A' as u64 + 36,
        _ => return None,
    };
    Some(value)
}
