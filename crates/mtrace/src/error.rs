use thiserror::Error;

/// Errors that can occur while decoding a malloc trace.
///
/// Every variant carries the byte offset (relative to the start of the trace
/// buffer) at which decoding failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes remained than a fixed-size read or a varint continuation required.
    #[error("truncated input at offset {offset:#x}: needed {needed} byte(s), {available} available")]
    TruncatedInput {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A varint carried more significant bits than fit into 64 bits.
    #[error("varint starting at offset {offset:#x} does not fit into 64 bits")]
    VarintOverflow { offset: usize },

    /// The `kind` field of a raw trace record is neither a known call type
    /// nor the magic marker.
    #[error("unknown raw record kind {kind} at offset {offset:#x}")]
    UnknownRecordKind { kind: u8, offset: usize },

    /// A workload opcode byte outside the known set. Framing is lost after this.
    #[error("unknown workload opcode {opcode:#04x} at offset {offset:#x}")]
    UnknownOpcode { opcode: u8, offset: usize },
}

impl DecodeError {
    /// Returns the byte offset at which the error was detected.
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::TruncatedInput { offset, .. }
            | DecodeError::VarintOverflow { offset }
            | DecodeError::UnknownRecordKind { offset, .. }
            | DecodeError::UnknownOpcode { offset, .. } => *offset,
        }
    }

    /// Returns `true` if the error aborts the whole decode.
    ///
    /// Only an unknown workload opcode is fatal: the opcode stream carries no
    /// resynchronization marker, so nothing after it can be framed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::UnknownOpcode { .. })
    }
}
