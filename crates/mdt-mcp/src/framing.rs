//! Newline-delimited frame reassembly
//!
//! Reads from a child's stdout arrive in arbitrary chunks: one chunk may hold
//! several frames, and one frame may span several chunks. [`LineBuffer`] keeps
//! the trailing incomplete fragment until its terminating `\n` shows up.
//! A frame longer than the configured maximum is dropped up to its delimiter.

use tracing::warn;

/// Frame delimiter
pub const FRAME_DELIMITER: u8 = b'\n';

/// Default upper bound on a single frame
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Accumulates raw bytes and yields complete lines
#[derive(Debug)]
pub struct LineBuffer {
    /// Bytes received after the last delimiter
    pending: Vec<u8>,
    max_frame_len: usize,
    /// Inside an oversized frame; bytes are dropped until the next delimiter
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }
}

impl LineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer that drops frames longer than `max_frame_len` bytes
    #[must_use]
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_frame_len,
            discarding: false,
        }
    }

    /// Feed a chunk and return every line it completed, in order
    ///
    /// Lines are returned without the delimiter (and without a trailing `\r`).
    /// Blank lines and oversized frames are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == FRAME_DELIMITER) {
            let segment = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.pending.len() + segment.len() > self.max_frame_len {
                self.drop_oversized(segment.len());
                self.discarding = false;
                continue;
            }
            self.pending.extend_from_slice(segment);

            let frame = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&frame);
            let line = line.trim_end_matches('\r');
            if !line.trim().is_empty() {
                lines.push(line.to_string());
            }
        }

        if !self.discarding {
            if self.pending.len() + rest.len() > self.max_frame_len {
                self.drop_oversized(rest.len());
            } else {
                self.pending.extend_from_slice(rest);
            }
        }
        lines
    }

    fn drop_oversized(&mut self, incoming: usize) {
        warn!(
            "Dropping frame longer than {} bytes ({} bytes buffered)",
            self.max_frame_len,
            self.pending.len() + incoming
        );
        self.pending = Vec::new();
        self.discarding = true;
    }

    /// Number of bytes held back waiting for a delimiter
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop and return the incomplete trailing fragment (used at end of stream)
    pub fn take_remainder(&mut self) -> Option<String> {
        self.discarding = false;
        if self.pending.is_empty() {
            return None;
        }
        let frame = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&frame).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_line() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"{\"id\":1}\n"), vec!["{\"id\":1}"]);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"{\"jsonrpc\":\"2.0\",").is_empty());
        assert!(buffer.push(b"\"id\":4").is_empty());
        assert_eq!(buffer.pending_len(), 23);
        assert_eq!(
            buffer.push(b"2}\n"),
            vec!["{\"jsonrpc\":\"2.0\",\"id\":42}"]
        );
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_many_lines_and_trailing_fragment() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"a\nb\r\n\n  \nc");
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(buffer.take_remainder().as_deref(), Some("c"));
        assert!(buffer.take_remainder().is_none());
    }

    #[test]
    fn test_multibyte_char_split_between_chunks() {
        let text = "❌ fail\n".as_bytes();
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&text[..2]).is_empty());
        assert_eq!(buffer.push(&text[2..]), vec!["❌ fail"]);
    }

    #[test]
    fn test_oversized_frame_is_dropped() {
        let mut buffer = LineBuffer::with_max_frame_len(8);
        assert!(buffer.push(b"0123456789").is_empty());
        assert_eq!(buffer.pending_len(), 0);

        // The rest of the oversized frame is skipped, the next frame survives
        assert_eq!(buffer.push(b"abcdef\n{\"id\":1}\n"), vec!["{\"id\":1}"]);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_oversized_frame_within_one_chunk() {
        let mut buffer = LineBuffer::with_max_frame_len(4);
        assert_eq!(buffer.push(b"toolong\nok\n"), vec!["ok"]);
        assert_eq!(buffer.push(b"abc\n"), vec!["abc"]);
    }

    #[test]
    fn test_frame_at_limit_is_kept() {
        let mut buffer = LineBuffer::with_max_frame_len(4);
        assert!(buffer.push(b"ab").is_empty());
        assert_eq!(buffer.push(b"cd\n"), vec!["abcd"]);
    }
}
