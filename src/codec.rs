//! Newline-delimited line codec
//!
//! Turns a byte stream into complete lines regardless of how the bytes were
//! split across reads. Trailing `\r`, `\n` and NUL padding are stripped.
//! A line longer than the limit is cut at the limit and the rest of it is
//! dropped up to the next newline.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Line framing for both directions of a chat connection
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Where to resume the newline scan in the buffer
    next_index: usize,
    /// Dropping the tail of an overlong line
    discarding: bool,
}

impl LineCodec {
    /// Create a codec that keeps at most `max_length` bytes per line
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    /// The configured line limit
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn finish_line(&self, raw: &[u8]) -> String {
        let mut end = raw.len();
        while end > 0 && matches!(raw[end - 1], b'\r' | b'\n' | b'\0') {
            end -= 1;
        }

        if end > self.max_length {
            end = self.max_length;
            // Back off to a UTF-8 boundary
            while end > 0 && (raw[end] & 0b1100_0000) == 0b1000_0000 {
                end -= 1;
            }
        }

        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            let newline = buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| offset + self.next_index);

            match newline {
                Some(index) => {
                    let raw = buf.split_to(index + 1);
                    self.next_index = 0;

                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }

                    return Ok(Some(self.finish_line(&raw)));
                }
                None if self.discarding => {
                    buf.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                None if buf.len() > self.max_length => {
                    let line = self.finish_line(&buf[..]);
                    buf.advance(buf.len());
                    self.next_index = 0;
                    self.discarding = true;
                    return Ok(Some(line));
                }
                None => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }

        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }

        let raw = buf.split();
        self.next_index = 0;
        Ok(Some(self.finish_line(&raw)))
    }
}

impl Encoder<String> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.extend_from_slice(line.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LineCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_many_lines_in_one_read() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from("alice\nhello\r\nbye\n");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["alice", "hello", "bye"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_spanning_reads() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from("hel");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"lo wor");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"ld\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("hello world"));
    }

    #[test]
    fn test_strips_nul_padding() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from(&b"bob\r\n\0\0\0\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["bob", ""]);
    }

    #[test]
    fn test_overlong_line_truncated_and_tail_dropped() {
        let mut codec = LineCodec::new(4);
        assert_eq!(codec.max_length(), 4);
        let mut buf = BytesMut::from("abcdefgh");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("abcd"));
        buf.extend_from_slice(b"ijk\nnext\n");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["next"]);
    }

    #[test]
    fn test_overlong_line_with_newline_truncated() {
        let mut codec = LineCodec::new(3);
        let mut buf = BytesMut::from("hello\nok\n");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["hel", "ok"]);
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        let mut codec = LineCodec::new(2);
        let mut buf = BytesMut::from("aé\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_unterminated_line_at_eof() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from("last words");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("last words"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_encode_verbatim() {
        let mut codec = LineCodec::new(64);
        let mut dst = BytesMut::new();
        codec.encode("alice: hi\n".to_string(), &mut dst).unwrap();
        assert_eq!(&dst[..], b"alice: hi\n");
    }
}
