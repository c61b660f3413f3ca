use std::fmt;

/// Number of candidate start positions examined in buffers larger than [`SNIFF_WINDOW`].
const SNIFF_LIMIT: usize = 1020;

/// Buffers up to this size are scanned up to their last four bytes.
pub const SNIFF_WINDOW: usize = 1024;

/// The two on-disk encodings a malloc trace file may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    /// Fixed-size records, one per allocator call.
    RawTrace,
    /// Opcode/varint byte stream describing a replayable workload.
    WorkloadTrace,
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceFormat::RawTrace => write!(f, "raw trace"),
            TraceFormat::WorkloadTrace => write!(f, "workload trace"),
        }
    }
}

/// Guesses the encoding of `data`.
///
/// Raw traces almost always contain a run of four zero bytes early on (a NULL
/// pointer or an all-clear flag word), whereas workload streams rarely do.
/// This is a heuristic and unusual input may be misclassified.
pub fn classify(data: &[u8]) -> TraceFormat {
    let limit = if data.len() > SNIFF_WINDOW {
        SNIFF_LIMIT
    } else {
        data.len().saturating_sub(4)
    };

    let found = (0..limit).any(|i| data[i..i + 4] == [0; 4]);

    let format = if found {
        TraceFormat::RawTrace
    } else {
        TraceFormat::WorkloadTrace
    };
    log::debug!(
        "Classified {} byte buffer as {format} (scanned {limit} positions)",
        data.len()
    );

    format
}

#[cfg(test)]
mod tests {
    use super::{TraceFormat, classify};

    #[test]
    fn zero_run_means_raw_trace() {
        assert_eq!(classify(&[1, 0, 0, 0, 0, 2, 3]), TraceFormat::RawTrace);
        assert_eq!(
            classify(&[0x01, 0x05, 0x03, 0x02, 0x04]),
            TraceFormat::WorkloadTrace
        );
    }

    #[test]
    fn short_buffers_are_workloads() {
        assert_eq!(classify(&[]), TraceFormat::WorkloadTrace);
        assert_eq!(classify(&[0, 0, 0]), TraceFormat::WorkloadTrace);
        // Only the positions before the final four bytes are candidates
        assert_eq!(classify(&[0, 0, 0, 0]), TraceFormat::WorkloadTrace);
        assert_eq!(classify(&[0, 0, 0, 0, 0]), TraceFormat::RawTrace);
    }

    #[test]
    fn three_zeros_are_not_enough() {
        let data: Vec<u8> = (0..64).map(|i| if i % 4 == 0 { 1 } else { 0 }).collect();
        assert_eq!(classify(&data), TraceFormat::WorkloadTrace);
    }

    #[test]
    fn bytes_past_window_are_ignored() {
        let mut data = vec![0x11; 1024];
        assert_eq!(classify(&data), TraceFormat::WorkloadTrace);

        data.extend([0; 4096]);
        assert_eq!(classify(&data), TraceFormat::WorkloadTrace);

        let mut data = vec![0x11; 2048];
        data[1010..1014].fill(0);
        assert_eq!(classify(&data), TraceFormat::RawTrace);
        data.extend([0x22; 100]);
        assert_eq!(classify(&data), TraceFormat::RawTrace);
    }

    #[test]
    fn zero_run_right_after_window_is_missed() {
        let mut data = vec![0x11; 1100];
        data[1020..1024].fill(0);
        assert_eq!(classify(&data), TraceFormat::WorkloadTrace);
    }
}
