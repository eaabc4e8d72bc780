//! Line-buffered NDJSON decoding
//!
//! The Generator streams one JSON object per line. Chunk boundaries do not
//! respect line boundaries, so bytes are buffered until a newline arrives;
//! the trailing partial line is held until the next chunk (or end of
//! stream). Malformed lines are logged and skipped rather than failing the
//! whole stream.

use crate::types::action::ActionDescriptor;

/// Incremental splitter over a byte stream.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every line completed by it.
    ///
    /// Splitting at `\n` is UTF-8 safe: no multi-byte sequence contains the
    /// newline byte.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // the newline itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Drain the trailing partial line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Decode one NDJSON line into an action descriptor.
///
/// Blank lines, unparseable JSON and untagged objects all yield `None`;
/// the two failure cases log a warning so a broken server is visible.
pub fn decode_action_line(line: &str) -> Option<ActionDescriptor> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, line = trimmed, "skipping malformed NDJSON line");
            return None;
        }
    };
    match ActionDescriptor::from_wire(value) {
        Some(action) => Some(action),
        None => {
            tracing::warn!(line = trimmed, "skipping NDJSON line without an action tag");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_partial_lines_across_chunks() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(b"{\"action\":{\"act").is_empty());
        let lines = decoder.push(b"ion\":\"add\",\"content\":\"hi\"}}\n{\"action\"");
        assert_eq!(lines.len(), 1);
        let action = decode_action_line(&lines[0]).unwrap();
        assert_eq!(action.kind, "add");

        let lines = decoder.push(b":{\"action\":\"finish_thinking\"}}\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(decode_action_line(&lines[0]).unwrap().kind, "finish_thinking");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn tolerates_blank_lines_and_crlf() {
        let mut decoder = NdjsonDecoder::new();
        let lines = decoder.push(b"\r\n{\"action\":{\"action\":\"update_title\",\"title\":\"T\"}}\r\n\n");
        assert_eq!(lines.len(), 3);
        assert!(decode_action_line(&lines[0]).is_none());
        assert_eq!(decode_action_line(&lines[1]).unwrap().kind, "update_title");
        assert!(decode_action_line(&lines[2]).is_none());
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        assert!(decode_action_line("{not json").is_none());
        assert!(decode_action_line("42").is_none());
        assert!(decode_action_line("{\"action\":{\"action\":\"exec\",\"codecell_id\":\"c\"}}").is_some());
    }

    #[test]
    fn finish_returns_unterminated_tail() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(b"{\"action\":{\"action\":\"finish_thinking\"}}").is_empty());
        let tail = decoder.finish().unwrap();
        assert_eq!(decode_action_line(&tail).unwrap().kind, "finish_thinking");
    }
}
