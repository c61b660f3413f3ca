use std::io::Write;

use anyhow::Error;
use serde::Serialize;

use crate::{
    error::DecodeError,
    generic::{DecodeResult, Renderer},
    raw::{RawTraceDecoder, RawTraceKind, RawTraceRecord},
    workload::WorkloadEntry,
};

/// Settings shared by all renderers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Also emit raw trace records of kind `unused`.
    pub show_unused: bool,
    /// Skip records that failed to decode with a recoverable error instead of
    /// stopping at the first one.
    pub keep_going: bool,
}

impl RenderOptions {
    pub fn show_unused(mut self, show: bool) -> Self {
        self.show_unused = show;
        self
    }

    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }
}

/// Feeds `input` to `row` and applies the error policy of `options`.
///
/// Returns the error that stopped rendering, or else the first error that was
/// skipped.
fn drive<E, W, I, F>(
    options: &RenderOptions,
    input: I,
    mut output: W,
    mut row: F,
) -> Result<(), Error>
where
    W: Write,
    I: IntoIterator<Item = DecodeResult<E>>,
    F: FnMut(&E, &mut W) -> Result<(), Error>,
{
    let mut skipped: Option<DecodeError> = None;

    for event in input {
        match event {
            Ok(event) => row(&event, &mut output)?,
            Err(e) if options.keep_going && !e.is_fatal() => {
                log::warn!("Skipping undecodable data: {e}");
                skipped.get_or_insert(e);
            }
            Err(e) => {
                output.flush()?;
                return Err(e.into());
            }
        }
    }

    output.flush()?;

    match skipped {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// A renderer that emits the classic human-readable dump layout.
pub struct TextRenderer {
    options: RenderOptions,
}

impl TextRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    /// Writes the record count and the column header of a raw trace dump.
    pub fn write_raw_header<W: Write>(&self, data_len: usize, mut output: W) -> Result<(), Error> {
        let records = RawTraceDecoder::record_count(data_len);
        writeln!(output, "{records} out of {records} events captured")?;
        writeln!(
            output,
            "{:>8} {:>8} {:>8} {:>16} {:>16} {:>16} {:>16} {:>16}",
            "threadid", "type", "path", "ptr1", "size", "ptr2", "size2", "size3"
        )?;
        Ok(())
    }

    fn raw_row(record: &RawTraceRecord) -> String {
        format!(
            "{:08x} {:>8} {} {:016x} {:016x} {:016x} {:016x} {:016x}",
            record.thread,
            record.kind.name(),
            record.path,
            record.ptr1,
            record.size,
            record.ptr2,
            record.size2,
            record.size3
        )
    }

    fn workload_row(entry: &WorkloadEntry) -> String {
        format!("{:016x}: {:4}: {}", entry.offset, entry.thread_index, entry.event)
    }
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self::new(RenderOptions::default())
    }
}

impl Renderer<RawTraceRecord> for TextRenderer {
    fn render<W: Write, I: IntoIterator<Item = DecodeResult<RawTraceRecord>>>(
        &mut self,
        input: I,
        output: W,
    ) -> Result<(), Error> {
        let show_unused = self.options.show_unused;

        drive(&self.options, input, output, |record, output| {
            if record.kind != RawTraceKind::Unused || show_unused {
                writeln!(output, "{}", Self::raw_row(record))?;
            }
            Ok(())
        })
    }

    fn format(&self) -> &'static str {
        "text"
    }
}

impl Renderer<WorkloadEntry> for TextRenderer {
    fn render<W: Write, I: IntoIterator<Item = DecodeResult<WorkloadEntry>>>(
        &mut self,
        input: I,
        output: W,
    ) -> Result<(), Error> {
        drive(&self.options, input, output, |entry, output| {
            writeln!(output, "{}", Self::workload_row(entry))?;
            Ok(())
        })
    }

    fn format(&self) -> &'static str {
        "text"
    }
}

/// A renderer that emits one JSON object per line.
pub struct JsonRenderer {
    options: RenderOptions,
}

impl JsonRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    fn write_line<T: Serialize, W: Write>(value: &T, output: &mut W) -> Result<(), Error> {
        serde_json::to_writer(&mut *output, value)?;
        writeln!(output)?;
        Ok(())
    }
}

impl Default for JsonRenderer {
    fn default() -> Self {
        Self::new(RenderOptions::default())
    }
}

impl Renderer<RawTraceRecord> for JsonRenderer {
    fn render<W: Write, I: IntoIterator<Item = DecodeResult<RawTraceRecord>>>(
        &mut self,
        input: I,
        output: W,
    ) -> Result<(), Error> {
        let show_unused = self.options.show_unused;

        drive(&self.options, input, output, |record, output| {
            if record.kind != RawTraceKind::Unused || show_unused {
                Self::write_line(record, output)?;
            }
            Ok(())
        })
    }

    fn format(&self) -> &'static str {
        "json"
    }
}

impl Renderer<WorkloadEntry> for JsonRenderer {
    fn render<W: Write, I: IntoIterator<Item = DecodeResult<WorkloadEntry>>>(
        &mut self,
        input: I,
        output: W,
    ) -> Result<(), Error> {
        drive(&self.options, input, output, |entry, output| {
            Self::write_line(entry, output)
        })
    }

    fn format(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use anyhow::Error;

    use super::{JsonRenderer, RenderOptions, TextRenderer};
    use crate::{
        error::DecodeError,
        generic::{DecodeResult, Renderer},
        raw::{PathFlags, RawTraceKind, RawTraceRecord},
        workload::{WorkloadEntry, WorkloadEvent},
    };

    fn raw_trace() -> Vec<RawTraceRecord> {
        vec![
            RawTraceRecord {
                thread: 0x1f,
                kind: RawTraceKind::Malloc,
                path: PathFlags {
                    thread_cache: true,
                    sbrk: true,
                    ..Default::default()
                },
                ptr1: 0x5555_0000_1000,
                size: 0x20,
                ptr2: 0,
                size2: 0,
                size3: 0,
            },
            RawTraceRecord {
                thread: 0,
                kind: RawTraceKind::Unused,
                path: PathFlags::default(),
                ptr1: 0,
                size: 0,
                ptr2: 0,
                size2: 0,
                size3: 0,
            },
            RawTraceRecord {
                thread: 0x1f,
                kind: RawTraceKind::PosixMemalign,
                path: PathFlags {
                    malloc_consolidate: true,
                    ..Default::default()
                },
                ptr1: 0x10,
                size: 0x40,
                ptr2: 0,
                size2: 0,
                size3: 0,
            },
        ]
    }

    fn entry(offset: usize, thread_index: u64, event: WorkloadEvent) -> WorkloadEntry {
        WorkloadEntry {
            offset,
            thread_index,
            event,
        }
    }

    fn render_text<E>(
        renderer: &mut TextRenderer,
        trace: Vec<DecodeResult<E>>,
    ) -> (Result<(), Error>, String)
    where
        TextRenderer: Renderer<E>,
    {
        let mut buffer = Cursor::new(Vec::new());
        let result = renderer.render(trace, &mut buffer);
        (result, String::from_utf8(buffer.into_inner()).unwrap())
    }

    #[test]
    fn render_raw_trace() -> Result<(), Error> {
        let mut renderer = TextRenderer::default();
        let trace: Vec<DecodeResult<RawTraceRecord>> = raw_trace().into_iter().map(Ok).collect();
        let (result, text) = render_text(&mut renderer, trace);
        result?;

        let expected = [
            "0000001f   malloc T--s---------- 0000555500001000 0000000000000020 0000000000000000 0000000000000000 0000000000000000",
            "0000001f posix_memalign -------------C 0000000000000010 0000000000000040 0000000000000000 0000000000000000 0000000000000000\n",
        ]
        .join("\n");
        assert_eq!(text, expected);

        Ok(())
    }

    #[test]
    fn render_unused_on_request() -> Result<(), Error> {
        let mut renderer = TextRenderer::new(RenderOptions::default().show_unused(true));
        let trace: Vec<DecodeResult<RawTraceRecord>> = raw_trace().into_iter().map(Ok).collect();
        let (result, text) = render_text(&mut renderer, trace);
        result?;

        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(1).unwrap().contains("  unused --------------"));

        Ok(())
    }

    #[test]
    fn raw_header() -> Result<(), Error> {
        let mut buffer = Cursor::new(Vec::new());
        TextRenderer::default().write_raw_header(48 * 3 + 5, &mut buffer)?;

        let text = String::from_utf8(buffer.into_inner())?;
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("3 out of 3 events captured"));
        assert_eq!(
            lines.next(),
            Some("threadid     type     path             ptr1             size             ptr2            size2            size3")
        );

        Ok(())
    }

    #[test]
    fn render_workload() -> Result<(), Error> {
        let trace: Vec<DecodeResult<WorkloadEntry>> = vec![
            entry(0, 0, WorkloadEvent::NThreads { count: 2 }),
            entry(2, 0, WorkloadEvent::StartThread { thread: 10 }),
            entry(4, 0, WorkloadEvent::Malloc { slot: 0, size: 16 }),
            entry(
                7,
                0,
                WorkloadEvent::Realloc {
                    slot: 1,
                    source: 0,
                    size: 32,
                },
            ),
            entry(11, 0, WorkloadEvent::Done),
            entry(12, 1, WorkloadEvent::SyncWrite { slot: 3 }),
            entry(14, 1, WorkloadEvent::Free { slot: 1 }),
        ]
        .into_iter()
        .map(Ok)
        .collect();

        let (result, text) = render_text(&mut TextRenderer::default(), trace);
        result?;

        let expected = [
            "0000000000000000:    0: NThreads: 2",
            "0000000000000002:    0: StartThread: 0xa",
            "0000000000000004:    0: Malloc (16) -> 0",
            "0000000000000007:    0: Realloc (0, 32) -> 1",
            "000000000000000b:    0: Done",
            "000000000000000c:    1: SyncW (3)",
            "000000000000000e:    1: Free (1)\n",
        ]
        .join("\n");
        assert_eq!(text, expected);

        Ok(())
    }

    #[test]
    fn stop_at_first_error() {
        let trace = vec![
            Ok(entry(0, 0, WorkloadEvent::AllocPtrs { count: 5 })),
            Err(DecodeError::UnknownOpcode {
                opcode: 0xff,
                offset: 2,
            }),
            Ok(entry(3, 0, WorkloadEvent::Done)),
        ];

        let (result, text) = render_text(&mut TextRenderer::default(), trace);
        let error = result.unwrap_err();

        assert_eq!(text, "0000000000000000:    0: AllocPtrs: 5\n");
        assert_eq!(
            error.downcast_ref::<DecodeError>(),
            Some(&DecodeError::UnknownOpcode {
                opcode: 0xff,
                offset: 2
            })
        );
    }

    #[test]
    fn keep_going_skips_recoverable_errors() {
        let mut records: Vec<DecodeResult<RawTraceRecord>> =
            raw_trace().into_iter().map(Ok).collect();
        records.insert(
            1,
            Err(DecodeError::UnknownRecordKind {
                kind: 12,
                offset: 48,
            }),
        );

        let mut renderer = TextRenderer::new(RenderOptions::default().keep_going(true));
        let (result, text) = render_text(&mut renderer, records.clone());
        assert_eq!(text.lines().count(), 2);
        result.unwrap_err();

        let (result, text) = render_text(&mut TextRenderer::default(), records);
        assert_eq!(text.lines().count(), 1);
        result.unwrap_err();
    }

    #[test]
    fn keep_going_still_stops_on_fatal_errors() {
        let trace = vec![
            Err(DecodeError::UnknownOpcode {
                opcode: 0x42,
                offset: 0,
            }),
            Ok(entry(1, 0, WorkloadEvent::Done)),
        ];

        let mut renderer = TextRenderer::new(RenderOptions::default().keep_going(true));
        let (result, text) = render_text(&mut renderer, trace);
        assert!(text.is_empty());
        assert!(
            result
                .unwrap_err()
                .downcast_ref::<DecodeError>()
                .unwrap()
                .is_fatal()
        );
    }

    #[test]
    fn render_json_lines() -> Result<(), Error> {
        let trace: Vec<DecodeResult<WorkloadEntry>> = vec![
            Ok(entry(0, 0, WorkloadEvent::Malloc { slot: 1, size: 8 })),
            Ok(entry(3, 0, WorkloadEvent::Done)),
        ];

        let mut buffer = Cursor::new(Vec::new());
        JsonRenderer::default().render(trace, &mut buffer)?;

        let text = String::from_utf8(buffer.into_inner())?;
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;

        assert_eq!(
            lines,
            vec![
                serde_json::json!({"offset": 0, "thread_index": 0, "op": "malloc", "slot": 1, "size": 8}),
                serde_json::json!({"offset": 3, "thread_index": 0, "op": "done"}),
            ]
        );

        Ok(())
    }

    #[test]
    fn render_raw_json() -> Result<(), Error> {
        let trace: Vec<DecodeResult<RawTraceRecord>> = raw_trace().into_iter().map(Ok).collect();
        let mut buffer = Cursor::new(Vec::new());
        JsonRenderer::default().render(trace, &mut buffer)?;

        let text = String::from_utf8(buffer.into_inner())?;
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap())?;

        assert_eq!(text.lines().count(), 2);
        assert_eq!(first["kind"], "malloc");
        assert_eq!(first["thread"], 0x1f);
        assert_eq!(first["path"]["sbrk"], true);
        assert_eq!(first["path"]["mmap"], false);

        Ok(())
    }
}
