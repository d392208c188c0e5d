//! JSONL streaming for the script channel
//!
//! This module provides:
//! - `parse_envelope_graceful` for classifying one line
//! - `serialize_message` for writing one line
//! - `JsonlReader` for streaming reads that skip anything malformed

use std::io::{BufRead, BufReader, Read};

use serde_json::Value;
use tracing::{debug, warn};

use super::message::{Envelope, EnvelopeError};

/// Maximum length for raw JSON in logs (prevents huge base64 data in logs)
const MAX_RAW_LOG_PREVIEW: usize = 200;

/// Get a truncated preview of raw JSON for logging
pub fn log_preview(raw: &str) -> (&str, usize) {
    let len = raw.len();
    if len <= MAX_RAW_LOG_PREVIEW {
        return (raw, len);
    }
    let mut end = MAX_RAW_LOG_PREVIEW;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    (&raw[..end], len)
}

#[derive(Debug)]
pub enum ParseResult {
    Ok(Envelope),
    /// Valid JSON that is not a `{pid, channel}` object
    BadShape(EnvelopeError),
    /// JSON parsing failed entirely (syntax error)
    ParseError(serde_json::Error),
}

/// Parse one line. Does not log; the reader decides what to report.
pub fn parse_envelope_graceful(line: &str) -> ParseResult {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return ParseResult::ParseError(e),
    };
    match Envelope::from_value(value) {
        Ok(envelope) => ParseResult::Ok(envelope),
        Err(e) => ParseResult::BadShape(e),
    }
}

/// Serialize a message to one line (without the newline)
pub fn serialize_message(msg: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Reads envelopes one at a time from a script's channel.
///
/// Uses a reusable line buffer to avoid allocating per line read.
pub struct JsonlReader<R: Read> {
    reader: BufReader<R>,
    line_buffer: Vec<u8>,
}

impl<R: Read> JsonlReader<R> {
    pub fn new(reader: R) -> Self {
        JsonlReader {
            reader: BufReader::new(reader),
            line_buffer: Vec::with_capacity(1024),
        }
    }

    /// Next valid envelope.
    ///
    /// Malformed lines, including lines that are not UTF-8, are logged and skipped.
    ///
    /// # Returns
    /// * `Ok(Some(Envelope))` - Next valid message
    /// * `Ok(None)` - End of stream
    /// * `Err(e)` - IO error
    pub fn next_envelope(&mut self) -> Result<Option<Envelope>, std::io::Error> {
        loop {
            self.line_buffer.clear();
            if self.reader.read_until(b'\n', &mut self.line_buffer)? == 0 {
                debug!("Reached end of JSONL stream");
                return Ok(None);
            }

            let line = match std::str::from_utf8(&self.line_buffer) {
                Ok(line) => line,
                Err(e) => {
                    warn!(
                        error = %e,
                        raw_len = self.line_buffer.len(),
                        "Skipping channel line that is not UTF-8"
                    );
                    continue;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let (preview, raw_len) = log_preview(trimmed);
            match parse_envelope_graceful(trimmed) {
                ParseResult::Ok(envelope) => return Ok(Some(envelope)),
                ParseResult::BadShape(e) => {
                    warn!(
                        error = %e,
                        raw_preview = %preview,
                        raw_len = raw_len,
                        "Dropping malformed channel message"
                    );
                }
                ParseResult::ParseError(e) => {
                    warn!(
                        error = %e,
                        raw_preview = %preview,
                        raw_len = raw_len,
                        "Skipping malformed JSON message"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Channel;
    use std::io::Cursor;

    #[test]
    fn test_log_preview_truncation() {
        let (preview, len) = log_preview("hello");
        assert_eq!(preview, "hello");
        assert_eq!(len, 5);

        let long = "a".repeat(500);
        let (preview, len) = log_preview(&long);
        assert_eq!(preview.len(), 200);
        assert_eq!(len, 500);
    }

    #[test]
    fn test_log_preview_respects_char_boundaries() {
        let long = "é".repeat(150);
        let (preview, _) = log_preview(&long);
        assert!(preview.len() <= 200);
        assert!(preview.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_parse_envelope_graceful_classification() {
        assert!(matches!(
            parse_envelope_graceful(r#"{"pid":1,"channel":7}"#),
            ParseResult::Ok(Envelope { channel: Channel::Show, .. })
        ));
        assert!(matches!(
            parse_envelope_graceful(r#"{"channel":7}"#),
            ParseResult::BadShape(EnvelopeError::BadPid)
        ));
        assert!(matches!(
            parse_envelope_graceful("not valid json at all"),
            ParseResult::ParseError(_)
        ));
    }

    #[test]
    fn test_jsonl_reader_skips_bad_lines() {
        let jsonl = "\n{\"pid\":1,\"channel\":6}\nnot json\n{\"pid\":1}\n\n{\"pid\":1,\"channel\":7}\n";
        let mut reader = JsonlReader::new(Cursor::new(jsonl));

        let first = reader.next_envelope().unwrap().unwrap();
        assert_eq!(first.channel, Channel::Hide);
        let second = reader.next_envelope().unwrap().unwrap();
        assert_eq!(second.channel, Channel::Show);
        assert!(reader.next_envelope().unwrap().is_none());
    }

    #[test]
    fn test_jsonl_reader_skips_non_utf8_lines() {
        let mut bytes = b"\xff\xfe garbage\n".to_vec();
        bytes.extend_from_slice(b"{\"pid\":1,\"channel\":7}\n");
        let mut reader = JsonlReader::new(Cursor::new(bytes));

        let envelope = reader.next_envelope().unwrap().unwrap();
        assert_eq!(envelope.channel, Channel::Show);
        assert!(reader.next_envelope().unwrap().is_none());
    }
}
