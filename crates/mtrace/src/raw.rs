use std::{fmt, iter::FusedIterator};

use serde::Serialize;

use crate::{
    cursor::DecodeCursor,
    error::DecodeError,
    generic::{DecodeResult, Decoder},
};

// ============================================================================
// On-disk layout of a single raw trace record (little-endian):
//
//   0..4   thread id
//   4..8   bit word: kind in bits 0..8, path flags in bits 8..22
//   8..48  ptr1, size, ptr2, size2, size3
/// Size in bytes of one record in a raw trace.
pub const RAW_RECORD_SIZE: usize = 48;

const KIND_MASK: u32 = 0xff;
const FLAGS_BIT_OFFSET: u32 = 8;
const NUM_FLAGS: usize = 14;
const MAGIC_KIND: u8 = 0xff;
// ============================================================================

/// The allocator entry point that produced a raw trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RawTraceKind {
    Unused,
    Malloc,
    Calloc,
    Free,
    Realloc,
    Memalign,
    Valloc,
    Pvalloc,
    PosixMemalign,
    /// Header/marker record written by the producer, never a real call.
    Magic,
}

impl RawTraceKind {
    /// Returns the on-disk value of this kind.
    pub fn id(&self) -> u8 {
        match self {
            RawTraceKind::Unused => 0,
            RawTraceKind::Malloc => 1,
            RawTraceKind::Calloc => 2,
            RawTraceKind::Free => 3,
            RawTraceKind::Realloc => 4,
            RawTraceKind::Memalign => 5,
            RawTraceKind::Valloc => 6,
            RawTraceKind::Pvalloc => 7,
            RawTraceKind::PosixMemalign => 8,
            RawTraceKind::Magic => MAGIC_KIND,
        }
    }

    /// Maps an on-disk value to a kind, or `None` if the value is out of range.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(RawTraceKind::Unused),
            1 => Some(RawTraceKind::Malloc),
            2 => Some(RawTraceKind::Calloc),
            3 => Some(RawTraceKind::Free),
            4 => Some(RawTraceKind::Realloc),
            5 => Some(RawTraceKind::Memalign),
            6 => Some(RawTraceKind::Valloc),
            7 => Some(RawTraceKind::Pvalloc),
            8 => Some(RawTraceKind::PosixMemalign),
            MAGIC_KIND => Some(RawTraceKind::Magic),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RawTraceKind::Unused => "unused",
            RawTraceKind::Malloc => "malloc",
            RawTraceKind::Calloc => "calloc",
            RawTraceKind::Free => "free",
            RawTraceKind::Realloc => "realloc",
            RawTraceKind::Memalign => "memalign",
            RawTraceKind::Valloc => "valloc",
            RawTraceKind::Pvalloc => "pvalloc",
            RawTraceKind::PosixMemalign => "posix_memalign",
            RawTraceKind::Magic => "magic",
        }
    }
}

impl fmt::Display for RawTraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Internal allocator code paths taken during a single call.
///
/// The flags are independent of each other and any combination is possible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PathFlags {
    pub thread_cache: bool,
    pub cpu_cache: bool,
    pub cpu_cache2: bool,
    pub sbrk: bool,
    pub mmap: bool,
    pub munmap: bool,
    pub m_f_realloc: bool,
    pub hook: bool,
    pub unsorted_add: bool,
    pub unsorted_remove: bool,
    pub unsorted_empty: bool,
    pub fastbin_add: bool,
    pub fastbin_remove: bool,
    pub malloc_consolidate: bool,
}

impl PathFlags {
    /// One display character per flag, in on-disk bit order.
    const SYMBOLS: [char; NUM_FLAGS] = [
        'T', 'c', 'C', 's', 'M', 'U', 'R', 'H', 'U', 'u', 'E', 'F', 'f', 'C',
    ];

    fn from_bits(bits: u32) -> Self {
        let bit = |n: u32| bits & (1 << n) != 0;

        Self {
            thread_cache: bit(0),
            cpu_cache: bit(1),
            cpu_cache2: bit(2),
            sbrk: bit(3),
            mmap: bit(4),
            munmap: bit(5),
            m_f_realloc: bit(6),
            hook: bit(7),
            unsorted_add: bit(8),
            unsorted_remove: bit(9),
            unsorted_empty: bit(10),
            fastbin_add: bit(11),
            fastbin_remove: bit(12),
            malloc_consolidate: bit(13),
        }
    }

    /// Iterates over all flags in on-disk bit order.
    pub fn iter(&self) -> impl Iterator<Item = bool> {
        [
            self.thread_cache,
            self.cpu_cache,
            self.cpu_cache2,
            self.sbrk,
            self.mmap,
            self.munmap,
            self.m_f_realloc,
            self.hook,
            self.unsorted_add,
            self.unsorted_remove,
            self.unsorted_empty,
            self.fastbin_add,
            self.fastbin_remove,
            self.malloc_consolidate,
        ]
        .into_iter()
    }
}

impl fmt::Display for PathFlags {
    /// Renders the flags as a fixed-width string, `-` for each flag that is clear.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (set, symbol) in self.iter().zip(Self::SYMBOLS) {
            if set {
                write!(f, "{symbol}")?;
            } else {
                write!(f, "-")?;
            }
        }
        Ok(())
    }
}

/// A single decoded allocator call from a raw trace.
///
/// The meaning of the operands depends on [`RawTraceKind`]: allocations store
/// the requested size in `size` and the returned pointer in `ptr1`, `free`
/// stores the released pointer in `ptr1`, and `realloc` stores the old pointer
/// in `ptr1`, the new pointer in `ptr2` and the requested size in `size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawTraceRecord {
    pub thread: u32,
    pub kind: RawTraceKind,
    pub path: PathFlags,
    pub ptr1: u64,
    pub size: u64,
    pub ptr2: u64,
    pub size2: u64,
    pub size3: u64,
}

impl RawTraceRecord {
    fn decode(cursor: &mut DecodeCursor<'_>) -> Result<Self, DecodeError> {
        let offset = cursor.position();

        let thread = u32::from_le_bytes(cursor.read_array()?);
        let bits = u32::from_le_bytes(cursor.read_array()?);
        let ptr1 = u64::from_le_bytes(cursor.read_array()?);
        let size = u64::from_le_bytes(cursor.read_array()?);
        let ptr2 = u64::from_le_bytes(cursor.read_array()?);
        let size2 = u64::from_le_bytes(cursor.read_array()?);
        let size3 = u64::from_le_bytes(cursor.read_array()?);

        let kind_id = (bits & KIND_MASK) as u8;
        let kind = RawTraceKind::from_id(kind_id).ok_or(DecodeError::UnknownRecordKind {
            kind: kind_id,
            offset,
        })?;

        Ok(Self {
            thread,
            kind,
            path: PathFlags::from_bits(bits >> FLAGS_BIT_OFFSET),
            ptr1,
            size,
            ptr2,
            size2,
            size3,
        })
    }
}

/// A decoder for raw allocator traces.
pub struct RawTraceDecoder;

impl RawTraceDecoder {
    pub fn new() -> Self {
        Self {}
    }

    /// Number of complete records contained in a buffer of `len` bytes.
    pub fn record_count(len: usize) -> usize {
        len / RAW_RECORD_SIZE
    }
}

impl Default for RawTraceDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RawTraceDecoder {
    type Event = RawTraceRecord;
    type Iter<'a> = RawTraceIter<'a>;

    fn decode<'a>(&mut self, data: &'a [u8]) -> Self::Iter<'a> {
        let trailing = data.len() % RAW_RECORD_SIZE;
        log::debug!(
            "Decoding {} raw trace record(s), ignoring {trailing} trailing byte(s)",
            Self::record_count(data.len())
        );

        // The partial record at the end is never looked at
        let data = &data[..data.len() - trailing];
        RawTraceIter {
            cursor: DecodeCursor::new(data),
            finished: false,
        }
    }

    fn format(&self) -> &'static str {
        "raw"
    }
}

/// Iterator over the records of a raw trace.
///
/// A record with an unknown kind yields an error, after which iteration
/// continues with the following record.
pub struct RawTraceIter<'a> {
    cursor: DecodeCursor<'a>,
    finished: bool,
}

impl<'a> RawTraceIter<'a> {
    /// Byte offset of the next record.
    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    fn inner_next(&mut self) -> Result<Option<RawTraceRecord>, DecodeError> {
        if self.finished {
            return Ok(None);
        }
        if self.cursor.is_empty() {
            self.finished = true;
            log::debug!("Finished raw trace at offset {:#x}", self.cursor.position());
            return Ok(None);
        }

        let mut record = DecodeCursor::new(self.cursor.read_slice(RAW_RECORD_SIZE)?);
        let offset = self.cursor.position() - RAW_RECORD_SIZE;

        match RawTraceRecord::decode(&mut record) {
            Ok(record) => {
                log::trace!("{offset:#x}: {record:?}");
                Ok(Some(record))
            }
            Err(DecodeError::UnknownRecordKind { kind, .. }) => {
                Err(DecodeError::UnknownRecordKind { kind, offset })
            }
            Err(e) => Err(e),
        }
    }
}

impl Iterator for RawTraceIter<'_> {
    type Item = DecodeResult<RawTraceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner_next().transpose()
    }
}

impl FusedIterator for RawTraceIter<'_> {}
