//! Instruction encoders (component B): pure functions from operands to
//! 32-bit AArch64 encodings.

pub mod base;
pub mod simd;

use thiserror::Error;

/// Domain errors raised by an encoder when an operand falls outside
/// its legal range (§7: *invalid-operand*).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("immediate {value} is not a multiple of {scale}")]
    Misaligned { value: i64, scale: i64 },

    #[error("immediate {value} does not fit in {bits}-bit {signed} field")]
    ImmOutOfRange {
        value: i64,
        bits: u32,
        signed: &'static str,
    },

    #[error("lane index {index} out of range for arrangement with {lanes} lanes")]
    IndexOutOfRange { index: u32, lanes: u32 },

    #[error("unsupported NEON arrangement for this instruction form")]
    UnsupportedArrangement,
}

pub type EncodeResult<T> = Result<T, EncodeError>;

/// Centralizes the scale-and-check routine referenced in the design
/// notes: `offset` must be a non-negative multiple of `scale`, and the
/// scaled value must fit in `bits` unsigned bits. Returns the
/// already-divided field value ready to shift into an instruction.
pub fn scale_unsigned_offset(offset: i64, scale: i64, bits: u32) -> EncodeResult<u32> {
    if offset < 0 || offset % scale != 0 {
        return Err(EncodeError::Misaligned {
            value: offset,
            scale,
        });
    }
    let scaled = offset / scale;
    let max = (1i64 << bits) - 1;
    if scaled < 0 || scaled > max {
        return Err(EncodeError::ImmOutOfRange {
            value: offset,
            bits,
            signed: "unsigned",
        });
    }
    Ok(scaled as u32)
}

/// Same as [`scale_unsigned_offset`] but for signed fields (LDP/STP's
/// 7-bit signed, scaled immediate).
pub fn scale_signed_offset(offset: i64, scale: i64, bits: u32) -> EncodeResult<u32> {
    if offset % scale != 0 {
        return Err(EncodeError::Misaligned {
            value: offset,
            scale,
        });
    }
    let scaled = offset / scale;
    let half = 1i64 << (bits - 1);
    if scaled < -half || scaled > half - 1 {
        return Err(EncodeError::ImmOutOfRange {
            value: offset,
            bits,
            signed: "signed",
        });
    }
    Ok((scaled as u32) & ((1u32 << bits) - 1))
}

/// Checks a PC-relative byte displacement is 4-byte aligned and fits
/// signed `bits` bits once expressed in words, returning the raw
/// (still signed, mask-ready) word-offset field.
pub fn branch_word_offset(byte_offset: i32, bits: u32) -> EncodeResult<u32> {
    if byte_offset % 4 != 0 {
        return Err(EncodeError::Misaligned {
            value: byte_offset as i64,
            scale: 4,
        });
    }
    let words = byte_offset / 4;
    let half = 1i32 << (bits - 1);
    if words < -half || words > half - 1 {
        return Err(EncodeError::ImmOutOfRange {
            value: byte_offset as i64,
            bits,
            signed: "signed",
        });
    }
    Ok((words as u32) & ((1u32 << bits) - 1))
}
