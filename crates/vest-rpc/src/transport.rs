//! Newline-delimited transport codec.
//!
//! Each frame is one UTF-8 JSON object terminated by `\n` (a preceding `\r`
//! is tolerated). There is no length header.
//!
//! Unlike `tokio_util::codec::LinesCodec`, a line over the size limit or with
//! invalid UTF-8 is reported as an item rather than a stream error, so the
//! connection survives and the peer can be told what went wrong.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Default upper bound for a single inbound line (64 KiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// A line the codec could not hand over as text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Frame too large: {length} bytes (max: {max})")]
    TooLarge { length: usize, max: usize },

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Codec for newline-delimited JSON text
#[derive(Debug)]
pub struct LineCodec {
    max_length: usize,
    next_index: usize,
    discarded: Option<usize>,
}

impl LineCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_FRAME_BYTES)
    }

    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarded: None,
        }
    }

    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn too_large(&self, length: usize) -> FrameError {
        FrameError::TooLarge {
            length,
            max: self.max_length,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

impl Decoder for LineCodec {
    type Item = Result<String, FrameError>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match (self.discarded, newline) {
                (Some(discarded), Some(pos)) => {
                    let length = discarded + trim_line(&src[..pos]).len();
                    src.advance(pos + 1);
                    self.discarded = None;
                    self.next_index = 0;
                    return Ok(Some(Err(self.too_large(length))));
                }
                (Some(discarded), None) => {
                    let len = src.len();
                    src.advance(len);
                    self.discarded = Some(discarded + len);
                    self.next_index = 0;
                    return Ok(None);
                }
                (None, Some(pos)) => {
                    self.next_index = 0;
                    let raw = src.split_to(pos + 1);
                    let line = trim_line(&raw[..pos]);

                    if line.len() > self.max_length {
                        return Ok(Some(Err(self.too_large(line.len()))));
                    }
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Ok(Some(
                        std::str::from_utf8(line)
                            .map(str::to_string)
                            .map_err(|_| FrameError::InvalidUtf8),
                    ));
                }
                (None, None) => {
                    // A trailing `\r` may still be the first half of a CRLF.
                    let pending_cr = usize::from(src.last() == Some(&b'\r'));
                    if src.len() > self.max_length + pending_cr {
                        // Keep reading until the newline, then report the whole line once.
                        let len = src.len();
                        src.advance(len);
                        self.discarded = Some(len);
                        self.next_index = 0;
                    } else {
                        self.next_index = src.len();
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }

        if let Some(discarded) = self.discarded.take() {
            return Ok(Some(Err(self.too_large(discarded))));
        }

        self.next_index = 0;
        if src.is_empty() {
            return Ok(None);
        }

        let raw = src.split_to(src.len());
        let line = trim_line(&raw);
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(
            std::str::from_utf8(line)
                .map(str::to_string)
                .map_err(|_| FrameError::InvalidUtf8),
        ))
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.as_ref();
        if line.contains('\n') {
            return Err(CodecError::EmbeddedNewline);
        }

        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');

        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Outbound frame contains a newline")]
    EmbeddedNewline,
}
