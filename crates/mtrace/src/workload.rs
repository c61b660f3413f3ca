use std::{fmt, iter::FusedIterator};

use serde::Serialize;

use crate::{
    cursor::DecodeCursor,
    error::DecodeError,
    generic::{DecodeResult, Decoder},
    varint::read_varint,
};

/// A single operation of a recorded allocation workload.
///
/// Slots index into the replayer's pointer or sync-object tables, they are
/// never raw addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkloadEvent {
    Nop,
    AllocPtrs { count: u64 },
    AllocSyncs { count: u64 },
    NThreads { count: u64 },
    StartThread { thread: u64 },
    /// Ends the event list of the current logical thread.
    Done,
    Malloc { slot: u64, size: u64 },
    Calloc { slot: u64, size: u64 },
    Realloc { slot: u64, source: u64, size: u64 },
    Free { slot: u64 },
    SyncWrite { slot: u64 },
    SyncRead { slot: u64 },
}

impl WorkloadEvent {
    /// Returns the opcode byte that introduces this event.
    pub fn opcode(&self) -> u8 {
        match self {
            WorkloadEvent::Nop => 0x00,
            WorkloadEvent::AllocPtrs { .. } => 0x01,
            WorkloadEvent::AllocSyncs { .. } => 0x02,
            WorkloadEvent::NThreads { .. } => 0x03,
            WorkloadEvent::StartThread { .. } => 0x04,
            WorkloadEvent::Done => 0x05,
            WorkloadEvent::Malloc { .. } => 0x06,
            WorkloadEvent::Calloc { .. } => 0x07,
            WorkloadEvent::Realloc { .. } => 0x08,
            WorkloadEvent::Free { .. } => 0x09,
            WorkloadEvent::SyncWrite { .. } => 0x0a,
            WorkloadEvent::SyncRead { .. } => 0x0b,
        }
    }

    /// Returns the operands in the order they are stored after the opcode.
    pub fn operands(&self) -> Vec<u64> {
        match *self {
            WorkloadEvent::Nop | WorkloadEvent::Done => vec![],
            WorkloadEvent::AllocPtrs { count }
            | WorkloadEvent::AllocSyncs { count }
            | WorkloadEvent::NThreads { count } => vec![count],
            WorkloadEvent::StartThread { thread } => vec![thread],
            WorkloadEvent::Malloc { slot, size } | WorkloadEvent::Calloc { slot, size } => {
                vec![slot, size]
            }
            WorkloadEvent::Realloc { slot, source, size } => vec![slot, source, size],
            WorkloadEvent::Free { slot }
            | WorkloadEvent::SyncWrite { slot }
            | WorkloadEvent::SyncRead { slot } => vec![slot],
        }
    }
}

impl fmt::Display for WorkloadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadEvent::Nop => write!(f, "Nop"),
            WorkloadEvent::AllocPtrs { count } => write!(f, "AllocPtrs: {count}"),
            WorkloadEvent::AllocSyncs { count } => write!(f, "AllocSyncs: {count}"),
            WorkloadEvent::NThreads { count } => write!(f, "NThreads: {count}"),
            WorkloadEvent::StartThread { thread } => write!(f, "StartThread: {thread:#x}"),
            WorkloadEvent::Done => write!(f, "Done"),
            WorkloadEvent::Malloc { slot, size } => write!(f, "Malloc ({size}) -> {slot}"),
            WorkloadEvent::Calloc { slot, size } => write!(f, "Calloc ({size}) -> {slot}"),
            WorkloadEvent::Realloc { slot, source, size } => {
                write!(f, "Realloc ({source}, {size}) -> {slot}")
            }
            WorkloadEvent::Free { slot } => write!(f, "Free ({slot})"),
            WorkloadEvent::SyncWrite { slot } => write!(f, "SyncW ({slot})"),
            WorkloadEvent::SyncRead { slot } => write!(f, "SyncR ({slot})"),
        }
    }
}

const MAX_OPERANDS: usize = 3;

/// How a single opcode is framed and turned into an event.
struct OpcodeSpec {
    name: &'static str,
    arity: usize,
    build: fn([u64; MAX_OPERANDS]) -> WorkloadEvent,
}

/// Indexed by opcode byte.
#[rustfmt::skip]
const OPCODES: [OpcodeSpec; 12] = [
    OpcodeSpec { name: "Nop", arity: 0, build: |_| WorkloadEvent::Nop },
    OpcodeSpec { name: "AllocPtrs", arity: 1, build: |[count, ..]| WorkloadEvent::AllocPtrs { count } },
    OpcodeSpec { name: "AllocSyncs", arity: 1, build: |[count, ..]| WorkloadEvent::AllocSyncs { count } },
    OpcodeSpec { name: "NThreads", arity: 1, build: |[count, ..]| WorkloadEvent::NThreads { count } },
    OpcodeSpec { name: "StartThread", arity: 1, build: |[thread, ..]| WorkloadEvent::StartThread { thread } },
    OpcodeSpec { name: "Done", arity: 0, build: |_| WorkloadEvent::Done },
    OpcodeSpec { name: "Malloc", arity: 2, build: |[slot, size, _]| WorkloadEvent::Malloc { slot, size } },
    OpcodeSpec { name: "Calloc", arity: 2, build: |[slot, size, _]| WorkloadEvent::Calloc { slot, size } },
    OpcodeSpec { name: "Realloc", arity: 3, build: |[slot, source, size]| WorkloadEvent::Realloc { slot, source, size } },
    OpcodeSpec { name: "Free", arity: 1, build: |[slot, ..]| WorkloadEvent::Free { slot } },
    OpcodeSpec { name: "SyncWrite", arity: 1, build: |[slot, ..]| WorkloadEvent::SyncWrite { slot } },
    OpcodeSpec { name: "SyncRead", arity: 1, build: |[slot, ..]| WorkloadEvent::SyncRead { slot } },
];

/// A decoded workload event together with its position in the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadEntry {
    /// Byte offset of the opcode.
    pub offset: usize,
    /// Logical thread the event belongs to.
    pub thread_index: u64,
    #[serde(flatten)]
    pub event: WorkloadEvent,
}

/// A decoder for workload traces.
pub struct WorkloadDecoder;

impl WorkloadDecoder {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for WorkloadDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WorkloadDecoder {
    type Event = WorkloadEntry;
    type Iter<'a> = WorkloadIter<'a>;

    fn decode<'a>(&mut self, data: &'a [u8]) -> Self::Iter<'a> {
        log::debug!("Decoding {} byte workload trace", data.len());
        WorkloadIter::new(data)
    }

    fn format(&self) -> &'static str {
        "workload"
    }
}

/// Iterator over the events of a workload trace.
///
/// The iterator is fused: after the first error it yields nothing, since the
/// opcode stream cannot be re-framed once a read went wrong.
pub struct WorkloadIter<'a> {
    cursor: DecodeCursor<'a>,
    thread_index: u64,
    finished: bool,
}

impl<'a> WorkloadIter<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: DecodeCursor::new(data),
            thread_index: 0,
            finished: false,
        }
    }

    /// Logical thread the next event will be attributed to.
    ///
    /// Starts at zero and advances by one after every `Done`, regardless of
    /// the index carried by `StartThread`.
    pub fn current_thread_index(&self) -> u64 {
        self.thread_index
    }

    fn inner_next(&mut self) -> Result<Option<WorkloadEntry>, DecodeError> {
        if self.finished {
            return Ok(None);
        }
        if self.cursor.is_empty() {
            self.finished = true;
            log::debug!(
                "Finished workload trace after {} byte(s), {} thread(s) done",
                self.cursor.position(),
                self.thread_index
            );
            return Ok(None);
        }

        let offset = self.cursor.position();
        let opcode = self.cursor.read_u8()?;
        let spec = OPCODES
            .get(usize::from(opcode))
            .ok_or(DecodeError::UnknownOpcode { opcode, offset })?;

        let mut operands = [0; MAX_OPERANDS];
        for operand in operands.iter_mut().take(spec.arity) {
            *operand = read_varint(&mut self.cursor)?;
        }

        let event = (spec.build)(operands);
        log::trace!("{offset:#x}: {} {:?}", spec.name, &operands[..spec.arity]);

        let entry = WorkloadEntry {
            offset,
            thread_index: self.thread_index,
            event,
        };

        if entry.event == WorkloadEvent::Done {
            self.thread_index += 1;
        }

        Ok(Some(entry))
    }
}

impl Iterator for WorkloadIter<'_> {
    type Item = DecodeResult<WorkloadEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.inner_next();
        if next.is_err() {
            self.finished = true;
        }
        next.transpose()
    }
}

impl FusedIterator for WorkloadIter<'_> {}
