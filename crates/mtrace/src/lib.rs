//! Decoders for the two binary trace formats written by an instrumented malloc.
//!
//! A trace file is either a *raw trace* (an array of fixed-size records, one
//! per allocator call, carrying the internal code paths that were taken) or a
//! *workload trace* (an opcode stream describing a replayable multi-thread
//! allocation workload). [`classify`] tells the two apart, [`RawTraceDecoder`]
//! and [`WorkloadDecoder`] turn the bytes into structured events and the
//! renderers in [`render`] print them.
//!
//! ```
//! # use anyhow::Error;
//! # fn main() -> Result<(), Error> {
//! use mtrace::{TextRenderer, TraceFormat};
//!
//! // AllocPtrs(5), NThreads(1), Done
//! let data = [0x01, 0x05, 0x03, 0x01, 0x05];
//! let mut output = Vec::new();
//!
//! let format = mtrace::dump(&data, &mut TextRenderer::default(), &mut output)?;
//! assert_eq!(format, TraceFormat::WorkloadTrace);
//! assert_eq!(String::from_utf8(output)?.lines().count(), 3);
//! # Ok(())
//! # }
//! ```

use std::io::Write;

use anyhow::Error;

use crate::generic::{Decoder, Renderer};

mod cursor;
mod error;
/// Generic traits shared by decoders and renderers
pub mod generic;
mod raw;
/// Text and JSON output for decoded events
pub mod render;
mod sniff;
/// The big-endian continuation-bit integer encoding of workload traces
pub mod varint;
mod workload;

pub use cursor::DecodeCursor;
pub use error::DecodeError;
pub use raw::{
    PathFlags, RAW_RECORD_SIZE, RawTraceDecoder, RawTraceIter, RawTraceKind, RawTraceRecord,
};
pub use render::{JsonRenderer, RenderOptions, TextRenderer};
pub use sniff::{SNIFF_WINDOW, TraceFormat, classify};
pub use workload::{WorkloadDecoder, WorkloadEntry, WorkloadEvent, WorkloadIter};

/// Something that can render the events of both trace formats.
pub trait TraceRenderer: Renderer<RawTraceRecord> + Renderer<WorkloadEntry> {
    /// Called once before the records of a raw trace are rendered.
    fn raw_preamble(&mut self, _data_len: usize, _output: &mut dyn Write) -> Result<(), Error> {
        Ok(())
    }
}

impl TraceRenderer for TextRenderer {
    fn raw_preamble(&mut self, data_len: usize, output: &mut dyn Write) -> Result<(), Error> {
        self.write_raw_header(data_len, output)
    }
}

impl TraceRenderer for JsonRenderer {}

/// Detects the format of `data`, decodes it and renders every event to `output`.
///
/// Returns the detected format. Decode errors are returned after all events
/// preceding them have been written.
pub fn dump<R: TraceRenderer, W: Write>(
    data: &[u8],
    renderer: &mut R,
    output: W,
) -> Result<TraceFormat, Error> {
    let format = classify(data);
    dump_as(format, data, renderer, output)?;
    Ok(format)
}

/// Decodes `data` as the given `format`, bypassing detection.
pub fn dump_as<R: TraceRenderer, W: Write>(
    format: TraceFormat,
    data: &[u8],
    renderer: &mut R,
    mut output: W,
) -> Result<(), Error> {
    match format {
        TraceFormat::RawTrace => {
            let mut decoder = RawTraceDecoder::new();
            log::info!(
                "Rendering {} trace as {}",
                decoder.format(),
                <R as Renderer<RawTraceRecord>>::format(renderer)
            );

            renderer.raw_preamble(data.len(), &mut output)?;
            <R as Renderer<RawTraceRecord>>::render(renderer, decoder.decode(data), &mut output)
        }
        TraceFormat::WorkloadTrace => {
            let mut decoder = WorkloadDecoder::new();
            log::info!(
                "Rendering {} trace as {}",
                decoder.format(),
                <R as Renderer<WorkloadEntry>>::format(renderer)
            );

            <R as Renderer<WorkloadEntry>>::render(renderer, decoder.decode(data), &mut output)
        }
    }
}
