//! Tokio codec for the line-oriented control protocol

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::message::Command;

/// Longest line accepted from a control connection, in bytes.
///
/// Control replies and notices are short; anything longer means the peer is
/// not speaking this protocol.
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

/// One line read from a control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlLine {
    /// Line without its terminator. Bytes that are not UTF-8 are replaced
    /// with U+FFFD.
    Text(String),
    /// A line longer than [`MAX_LINE_LENGTH`], dropped unread
    Oversized,
}

/// Codec that decodes inbound lines and encodes [`Command`]s with CRLF
/// terminators.
///
/// Decoding never fails on content: a bad line must not end the stream,
/// since `Framed` stops after the first decode error.
#[derive(Debug, Default)]
pub struct ControlCodec {
    /// Where the newline search resumes in the buffer
    next_index: usize,
    /// Inside an oversized line, skipping to its end
    discarding: bool,
}

impl ControlCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::default()
    }
}

fn text_line(raw: &[u8]) -> Option<ControlLine> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    // Blank keepalive lines carry nothing
    if line.trim().is_empty() {
        None
    } else {
        Some(ControlLine::Text(line.into_owned()))
    }
}

impl Decoder for ControlCodec {
    type Item = ControlLine;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let read_to = src.len().min(MAX_LINE_LENGTH + 1);
            let start = self.next_index.min(read_to);
            let newline = src[start..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|i| i + start);

            match (self.discarding, newline) {
                (true, Some(end)) => {
                    src.advance(end + 1);
                    self.discarding = false;
                    self.next_index = 0;
                    return Ok(Some(ControlLine::Oversized));
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(end)) => {
                    let raw = src.split_to(end + 1);
                    self.next_index = 0;
                    if let Some(line) = text_line(&raw) {
                        return Ok(Some(line));
                    }
                }
                (false, None) if src.len() > MAX_LINE_LENGTH => {
                    self.discarding = true;
                    self.next_index = 0;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            src.clear();
            return Ok(Some(ControlLine::Oversized));
        }
        let raw = src.split();
        Ok(text_line(&raw))
    }
}

impl Encoder<Command> for ControlCodec {
    type Error = ProtocolError;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = command.to_string();
        if line.len() > MAX_LINE_LENGTH {
            return Err(ProtocolError::LineTooLong {
                max: MAX_LINE_LENGTH,
            });
        }

        dst.reserve(line.len() + 2);
        dst.extend_from_slice(line.as_bytes());
        dst.extend_from_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;

    fn text(line: &str) -> ControlLine {
        ControlLine::Text(line.to_string())
    }

    #[test]
    fn test_encode_appends_crlf() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(
                Command::Start {
                    session: SessionId::new(9),
                    duration_secs: 20,
                },
                &mut buf,
            )
            .unwrap();

        assert_eq!(&buf[..], b"START 9 20\r\n");
    }

    #[test]
    fn test_decode_strips_crlf_and_skips_blank_lines() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::from(&b"250 OK\r\n\r\n650 SPEEDTEST OPENED 3\r\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(text("250 OK")));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(text("650 SPEEDTEST OPENED 3"))
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_partial_read() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::from(&b"NOTICE STAR"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"TED 5\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(text("NOTICE STARTED 5")));
    }

    #[test]
    fn test_oversized_line_is_skipped() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::from(vec![b'a'; MAX_LINE_LENGTH + 1].as_slice());

        // Nothing to report until the end of the long line is seen
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&[b'a'; 100]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"aaa\r\nNOTICE CLOSED 4\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(ControlLine::Oversized));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(text("NOTICE CLOSED 4")));
    }

    #[test]
    fn test_invalid_utf8_does_not_end_stream() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::from(&b"650 SPEEDTEST OPENED \xff\xfe\r\nNOTICE OPENED 5\r\n"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(text("650 SPEEDTEST OPENED \u{FFFD}\u{FFFD}"))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(text("NOTICE OPENED 5")));
    }

    #[test]
    fn test_decode_eof_flushes_unterminated_line() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::from(&b"NOTICE CLOSED 2"[..]);

        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(text("NOTICE CLOSED 2")));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }
}
