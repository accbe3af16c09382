//! Line codec for the wire protocol.
//!
//! Wraps [`LinesCodec`] so that an over-long line comes out as an
//! [`Inbound::Oversized`] item rather than a decoder error. `FramedRead`
//! ends the stream once after any decoder error, which would make a single
//! bad line look like a hangup. Only real I/O errors are errors here.
//!
//! Outbound lines must not contain `\n` or `\r`; the encoder refuses them
//! instead of splitting one frame into two.

use std::io;

use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::frame::{validate_plaintext, MAX_LINE_LENGTH};

/// One decoded unit of inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete line, terminator stripped.
    Line(String),
    /// A line longer than the limit. Its bytes have been discarded.
    Oversized,
}

/// Newline framing with a per-line limit.
#[derive(Debug, Clone)]
pub struct LineCodec {
    inner: LinesCodec,
    max_line_length: usize,
}

impl LineCodec {
    /// Codec rejecting inbound lines longer than `max_line_length` bytes.
    pub fn new(max_line_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_length),
            max_line_length,
        }
    }

    /// Configured inbound limit.
    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}

fn lift(decoded: Result<Option<String>, LinesCodecError>) -> io::Result<Option<Inbound>> {
    match decoded {
        Ok(line) => Ok(line.map(Inbound::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Inbound::Oversized)),
        Err(LinesCodecError::Io(e)) => Err(e),
    }
}

impl Decoder for LineCodec {
    type Item = Inbound;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Inbound>> {
        lift(self.inner.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<Inbound>> {
        lift(self.inner.decode_eof(buf))
    }
}

impl Encoder<String> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> io::Result<()> {
        validate_plaintext(&line).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.inner.encode(line, dst).map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidInput, other),
        })
    }
}
