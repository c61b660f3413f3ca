use std::{io::Write, path::Path};

use anyhow::Error;
use clap::ValueEnum;
use mtrace::{JsonRenderer, RenderOptions, TextRenderer, TraceFormat};

/// Logger setup for the command line tool.
pub mod logging;
mod mapping;

pub use mapping::TraceFile;

/// How decoded events are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Fixed-width columns, one event per line
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Overrides the format detection heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ForcedFormat {
    Raw,
    Workload,
}

impl From<ForcedFormat> for TraceFormat {
    fn from(value: ForcedFormat) -> Self {
        match value {
            ForcedFormat::Raw => TraceFormat::RawTrace,
            ForcedFormat::Workload => TraceFormat::WorkloadTrace,
        }
    }
}

/// Everything that controls a single dump.
#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    pub output: OutputFormat,
    pub force: Option<ForcedFormat>,
    pub render: RenderOptions,
}

/// Dumps an in-memory trace buffer to `output`.
///
/// The format of `data` is detected with [`mtrace::classify`] unless
/// `options.force` says otherwise. Returns the format that was decoded.
///
/// # Errors
///
/// Returns the first [`mtrace::DecodeError`] encountered (wrapped in an
/// [`anyhow::Error`]) after every event decoded before it has been written,
/// or any I/O error raised by `output`.
pub fn dump_buffer<W: Write>(
    data: &[u8],
    options: &DumpOptions,
    output: W,
) -> Result<TraceFormat, Error> {
    let format = match options.force {
        Some(forced) => {
            log::info!("Format detection overridden, decoding as {forced:?}");
            TraceFormat::from(forced)
        }
        None => mtrace::classify(data),
    };

    match options.output {
        OutputFormat::Text => {
            mtrace::dump_as(format, data, &mut TextRenderer::new(options.render), output)?
        }
        OutputFormat::Json => {
            mtrace::dump_as(format, data, &mut JsonRenderer::new(options.render), output)?
        }
    }

    Ok(format)
}

/// Maps the trace file at `path` into memory and dumps it to `output`.
///
/// See [`dump_buffer`] for the error behavior.
pub fn dump_file<P: AsRef<Path>, W: Write>(
    path: P,
    options: &DumpOptions,
    output: W,
) -> Result<TraceFormat, Error> {
    let trace = TraceFile::open(path)?;
    log::info!(
        "Dumping {} ({} bytes)",
        trace.path().display(),
        trace.bytes().len()
    );

    dump_buffer(trace.bytes(), options, output)
}
