//! Streaming console decoder
//!
//! The kernel writes console output in arbitrary chunks. A UTF-8 sequence
//! split across two writes is completed by the second one; invalid bytes
//! become U+FFFD. Output is released one line at a time.

use std::str;

/// Longest incomplete UTF-8 prefix that can be carried to the next write
const MAX_PENDING: usize = 3;

#[derive(Debug, Default)]
pub struct ConsoleDecoder {
    /// Trailing bytes of an incomplete UTF-8 sequence
    pending: Vec<u8>,
    /// Current partial line
    line: String,
}

impl ConsoleDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one write; returns the lines it completed, without terminators.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut rest = &input[..];
        loop {
            match str::from_utf8(rest) {
                Ok(text) => {
                    self.append(text, &mut lines);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    if let Ok(text) = str::from_utf8(valid) {
                        self.append(text, &mut lines);
                    }
                    match e.error_len() {
                        Some(bad) => {
                            self.append("\u{FFFD}", &mut lines);
                            rest = &after[bad..];
                        }
                        None => {
                            debug_assert!(after.len() <= MAX_PENDING);
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        lines
    }

    /// Release the partial line, if any. Incomplete sequences become U+FFFD.
    pub fn flush(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            self.pending.clear();
            self.line.push('\u{FFFD}');
        }
        if self.line.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.line))
        }
    }

    pub fn has_partial(&self) -> bool {
        !self.line.is_empty() || !self.pending.is_empty()
    }

    fn append(&mut self, text: &str, lines: &mut Vec<String>) {
        let mut parts = text.split('\n');
        if let Some(first) = parts.next() {
            self.line.push_str(first);
        }
        for part in parts {
            let mut done = std::mem::take(&mut self.line);
            if done.ends_with('\r') {
                done.pop();
            }
            lines.push(done);
            self.line.push_str(part);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_across_writes() {
        let mut console = ConsoleDecoder::new();
        assert!(console.push(b"Linux version").is_empty());
        assert_eq!(console.push(b" 6.1\nCPU0: up\r\nrest"), ["Linux version 6.1", "CPU0: up"]);
        assert!(console.has_partial());
        assert_eq!(console.flush().as_deref(), Some("rest"));
        assert_eq!(console.flush(), None);
    }

    #[test]
    fn test_split_multibyte_sequence() {
        let mut console = ConsoleDecoder::new();
        let euro = "€".as_bytes();
        assert!(console.push(&euro[..1]).is_empty());
        assert!(console.push(&euro[1..2]).is_empty());
        assert_eq!(console.push(&[euro[2], b'\n']), ["€"]);
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut console = ConsoleDecoder::new();
        assert_eq!(console.push(b"a\xffb\n"), ["a\u{FFFD}b"]);
    }

    #[test]
    fn test_flush_incomplete_sequence() {
        let mut console = ConsoleDecoder::new();
        console.push(&[b'x', 0xe2, 0x82]);
        assert_eq!(console.flush().as_deref(), Some("x\u{FFFD}"));
    }

    #[test]
    fn test_empty_lines_kept() {
        let mut console = ConsoleDecoder::new();
        assert_eq!(console.push(b"\n\n"), ["", ""]);
    }
}
