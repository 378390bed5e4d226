//! Script number codec.
//!
//! Stack entries are read as integers in little-endian sign-magnitude form:
//! the high bit of the last byte is the sign, every other bit belongs to the
//! magnitude. Zero is the empty byte string, and a minimal encoding never
//! carries a redundant trailing byte.
//!
//! The magnitude is handled as a [`BigInt`], but the byte layout is produced
//! here by hand. A generic signed big-integer serialization uses two's
//! complement and disagrees with the consensus encoding on negative values.

use num_bigint::{BigInt, Sign};
use num_traits::Zero;

use crate::ScriptError;

/// Maximum length of a numeric operand taken from the stack.
///
/// Arithmetic results may be longer; they just cannot be fed back into
/// another numeric opcode.
pub const MAX_NUM_SIZE: usize = 4;

/// Interprets a stack entry as a boolean.
///
/// Any non-zero byte makes the value true, except for a lone sign bit in the
/// last position ("negative zero").
pub fn cast_to_bool(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            if i == data.len() - 1 && byte == 0x80 {
                return false;
            }
            return true;
        }
    }
    false
}

/// Encodes `value` with the minimal sign-magnitude encoding.
pub fn encode_num(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }

    let (sign, mut result) = value.to_bytes_le();
    let negative = sign == Sign::Minus;

    if let Some(last) = result.last_mut() {
        if *last & 0x80 != 0 {
            result.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            *last |= 0x80;
        }
    }

    result
}

/// Decodes a sign-magnitude byte string of any length.
pub fn decode_num(bytes: &[u8]) -> BigInt {
    let Some((&last, rest)) = bytes.split_last() else {
        return BigInt::zero();
    };

    let mut magnitude = Vec::with_capacity(bytes.len());
    magnitude.extend_from_slice(rest);
    magnitude.push(last & 0x7f);

    let value = BigInt::from_bytes_le(Sign::Plus, &magnitude);
    if last & 0x80 != 0 {
        -value
    } else {
        value
    }
}

/// Decodes a numeric operand, rejecting entries longer than `max_len`.
pub fn parse_scriptnum(bytes: &[u8], max_len: usize) -> Result<BigInt, ScriptError> {
    if bytes.len() > max_len {
        return Err(ScriptError::NumOverflow);
    }
    Ok(decode_num(bytes))
}

/// Numeric form of a boolean: one for true, zero for false.
pub fn bool_to_num(value: bool) -> BigInt {
    BigInt::from(u8::from(value))
}
