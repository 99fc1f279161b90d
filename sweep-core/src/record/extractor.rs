//! Line reassembly for streamed radio console output.
//!
//! Serial reads arrive in arbitrary fragments and are polluted with terminal
//! control sequences. The extractor strips escapes (even when an escape is
//! split across reads), treats both `\r` and `\n` as line breaks and keeps the
//! trailing partial line in a fixed-capacity buffer. Once that buffer is full
//! the oldest bytes are discarded, so a device that never sends a newline
//! cannot grow memory.

use alloc::string::String;
use alloc::vec::Vec;

use heapless::Deque;

use super::{MeasurementRecord, PacketSummary};

/// Default capacity of the partial-line buffer in bytes.
pub const DEFAULT_LINE_CAPACITY: usize = 1024;

const ESC: u8 = 0x1B;

/// Classification of a completed line.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LineKind {
    Record(MeasurementRecord),
    Summary(PacketSummary),
    Text,
}

/// A complete, escape-free line of device output.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedLine {
    pub text: String,
    pub kind: LineKind,
}

impl ExtractedLine {
    pub fn record(&self) -> Option<MeasurementRecord> {
        match self.kind {
            LineKind::Record(record) => Some(record),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum EscapeState {
    Ground,
    Escape,
    Csi,
}

/// Stateful per-role record parser.
pub struct RecordExtractor<const CAP: usize = DEFAULT_LINE_CAPACITY> {
    pending: Deque<u8, CAP>,
    escape: EscapeState,
    dropped_bytes: usize,
}

impl<const CAP: usize> RecordExtractor<CAP> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Deque::new(),
            escape: EscapeState::Ground,
            dropped_bytes: 0,
        }
    }

    /// Feeds one chunk of raw output and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ExtractedLine> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if let Some(line) = self.step(byte) {
                lines.push(line);
            }
        }
        lines
    }

    /// Number of bytes currently held for an incomplete line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Total bytes discarded because the partial line exceeded capacity.
    pub const fn dropped_bytes(&self) -> usize {
        self.dropped_bytes
    }

    /// Forgets any partial line, e.g. after the link closed.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.escape = EscapeState::Ground;
    }

    fn step(&mut self, byte: u8) -> Option<ExtractedLine> {
        match self.escape {
            EscapeState::Escape => match byte {
                b'[' => {
                    self.escape = EscapeState::Csi;
                    return None;
                }
                ESC => return None,
                0x40..=0x5F => {
                    self.escape = EscapeState::Ground;
                    return None;
                }
                _ => self.escape = EscapeState::Ground,
            },
            EscapeState::Csi => match byte {
                0x20..=0x3F => return None,
                0x40..=0x7E => {
                    self.escape = EscapeState::Ground;
                    return None;
                }
                // Malformed sequence; resume with the byte as plain output.
                _ => self.escape = EscapeState::Ground,
            },
            EscapeState::Ground => {}
        }

        match byte {
            ESC => {
                self.escape = EscapeState::Escape;
                None
            }
            b'\r' | b'\n' => self.finish_line(),
            _ => {
                self.buffer(byte);
                None
            }
        }
    }

    fn buffer(&mut self, byte: u8) {
        if self.pending.is_full() {
            self.pending.pop_front();
            self.dropped_bytes = self.dropped_bytes.saturating_add(1);
        }
        // Cannot fail: a slot was freed above when the deque was full.
        let _ = self.pending.push_back(byte);
    }

    fn finish_line(&mut self) -> Option<ExtractedLine> {
        if self.pending.is_empty() {
            return None;
        }
        let bytes: Vec<u8> = self.pending.iter().copied().collect();
        self.pending.clear();

        let text = String::from_utf8_lossy(&bytes);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let kind = if let Some(record) = MeasurementRecord::parse_line(text) {
            LineKind::Record(record)
        } else if let Some(summary) = PacketSummary::find_in(text) {
            LineKind::Summary(summary)
        } else {
            LineKind::Text
        };

        Some(ExtractedLine {
            text: String::from(text),
            kind,
        })
    }
}

impl<const CAP: usize> Default for RecordExtractor<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;
    use alloc::string::ToString;

    fn records(lines: &[ExtractedLine]) -> Vec<MeasurementRecord> {
        lines.iter().filter_map(ExtractedLine::record).collect()
    }

    #[test]
    fn reassembles_record_split_across_chunks() {
        let mut extractor: RecordExtractor = RecordExtractor::new();
        assert!(extractor.push(b"pdc,1").is_empty());
        assert!(extractor.push(b"0,0,").is_empty());
        let lines = extractor.push(b"3\n");

        let found = records(&lines);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].to_string(), "pdc,10,0,3");
    }

    #[test]
    fn emits_every_record_in_one_chunk() {
        let mut extractor: RecordExtractor = RecordExtractor::new();
        let lines = extractor.push(b"pdc,1,0,2\r\npcc_err,0,0,2\rpartial");
        let found = records(&lines);
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].kind, RecordKind::PccErr);
        assert_eq!(extractor.pending_len(), "partial".len());
    }

    #[test]
    fn strips_escape_sequences_split_across_chunks() {
        let mut extractor: RecordExtractor = RecordExtractor::new();
        assert!(extractor.push(b"\x1b[1;3").is_empty());
        assert!(extractor.push(b"2mpdc,5,1,4\x1b").is_empty());
        let lines = extractor.push(b"[0m\n");

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "pdc,5,1,4");
        assert!(lines[0].record().is_some());
    }

    #[test]
    fn surfaces_text_and_summary_lines() {
        let mut extractor: RecordExtractor = RecordExtractor::new();
        let lines = extractor.push(b"uart:~$ \x1b[Kdect perf stop\nsent packets: 42\n\n");

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "uart:~$ dect perf stop");
        assert_eq!(lines[0].kind, LineKind::Text);
        assert_eq!(lines[1].kind, LineKind::Summary(PacketSummary::Sent(42)));
    }

    #[test]
    fn partial_buffer_never_exceeds_capacity() {
        let mut extractor = RecordExtractor::<16>::new();
        for _ in 0..10 {
            extractor.push(b"abcdefghij");
            assert!(extractor.pending_len() <= 16);
        }
        assert_eq!(extractor.pending_len(), 16);
        assert_eq!(extractor.dropped_bytes(), 84);

        let lines = extractor.push(b"\n");
        assert_eq!(lines[0].text, "efghijabcdefghij");
    }
}
