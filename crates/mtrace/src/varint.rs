//! The continuation-bit integer encoding used by workload traces.
//!
//! Values are stored big-endian in groups of 7 bits: the first byte carries the
//! most significant group and every byte except the last has its high bit set.
//! This is the reverse group order of LEB128.

use crate::{cursor::DecodeCursor, error::DecodeError};

const CONTINUATION: u8 = 0x80;
const PAYLOAD_MASK: u8 = 0x7f;
const GROUP_BITS: u32 = 7;

/// Reads a single varint from `cursor`.
///
/// On failure the cursor is left at the first byte of the varint.
pub fn read_varint(cursor: &mut DecodeCursor<'_>) -> Result<u64, DecodeError> {
    let start = cursor.position();
    let mut value = 0_u64;

    loop {
        let byte = match cursor.read_u8() {
            Ok(byte) => byte,
            Err(DecodeError::TruncatedInput { .. }) => {
                let read = cursor.position() - start;
                cursor.rewind_to(start);
                return Err(DecodeError::TruncatedInput {
                    offset: start,
                    needed: read + 1,
                    available: read,
                });
            }
            Err(e) => return Err(e),
        };

        value |= u64::from(byte & PAYLOAD_MASK);

        if byte & CONTINUATION == 0 {
            return Ok(value);
        }

        // Shifting would push set bits past the top of a u64
        if value.leading_zeros() < GROUP_BITS {
            cursor.rewind_to(start);
            return Err(DecodeError::VarintOverflow { offset: start });
        }
        value <<= GROUP_BITS;
    }
}

/// Appends the shortest encoding of `value` to `output`.
pub fn encode_varint(value: u64, output: &mut Vec<u8>) {
    let groups = (u64::BITS - value.leading_zeros()).div_ceil(GROUP_BITS).max(1);

    for group in (0..groups).rev() {
        let payload = ((value >> (group * GROUP_BITS)) as u8) & PAYLOAD_MASK;
        if group == 0 {
            output.push(payload);
        } else {
            output.push(payload | CONTINUATION);
        }
    }
}
