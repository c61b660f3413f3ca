use std::io::Write;

use anyhow::Error;

use crate::error::DecodeError;

/// Shared iterator item type for [`Decoder`] and [`Renderer`] implementations.
pub type DecodeResult<E> = Result<E, DecodeError>;

/// Common trait for decoders of malloc traces
pub trait Decoder {
    /// The structured event produced for each record or opcode.
    type Event;

    /// A lazy, finite iterator borrowing the trace buffer.
    type Iter<'a>: Iterator<Item = DecodeResult<Self::Event>>;

    /// Decodes a malloc trace of some specific format.
    fn decode<'a>(&mut self, data: &'a [u8]) -> Self::Iter<'a>;

    /// Returns a string identifying the trace format of this decoder.
    fn format(&self) -> &'static str;
}

/// Common trait for renderers of decoded malloc trace events
pub trait Renderer<E> {
    /// Writes all events of `input` to `output`.
    ///
    /// Rendering stops at the first decode error unless the renderer was told
    /// to skip recoverable ones. Either way the first error is returned after
    /// every successfully decoded event has been written.
    fn render<W: Write, I: IntoIterator<Item = DecodeResult<E>>>(
        &mut self,
        input: I,
        output: W,
    ) -> Result<(), Error>;

    /// Returns a string identifying the output format of this renderer.
    fn format(&self) -> &'static str;
}
