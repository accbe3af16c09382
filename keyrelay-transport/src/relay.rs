//! Line connection to the relay.
//!
//! Internal module wrapping a TCP stream in newline framing.
//!
//! # Framing
//!
//! - One `send_line()` writes exactly one line; text containing a newline is
//!   refused by the codec
//! - One `recv_line()` yields exactly one line with the terminator stripped
//! - An inbound line longer than the configured maximum is an error for that
//!   read only, never silently truncated; the next line reads normally

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use keyrelay_core::{FrameError, Inbound, LineCodec};

use crate::error::TransportError;

pub(crate) type LineReader = FramedRead<OwnedReadHalf, LineCodec>;
pub(crate) type LineWriter = FramedWrite<OwnedWriteHalf, LineCodec>;

/// Internal line transport.
///
/// Used whole during the handshake, then split so reading and writing can
/// proceed from different tasks.
pub(crate) struct LineConnection {
    reader: LineReader,
    writer: LineWriter,
    max_line_length: usize,
}

impl LineConnection {
    /// Open a TCP connection to `addr`.
    pub(crate) async fn connect(addr: &str, max_line_length: usize) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::ConnectionFailed {
                addr: addr.to_string(),
                source,
            })?;
        // Lines are small and interactive.
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let codec = LineCodec::new(max_line_length);
        Ok(Self {
            reader: FramedRead::new(read_half, codec.clone()),
            writer: FramedWrite::new(write_half, codec),
            max_line_length,
        })
    }

    /// Write one line.
    pub(crate) async fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        Ok(self.writer.send(line.to_owned()).await?)
    }

    /// Read one line. `None` when the relay closed the connection.
    pub(crate) async fn recv_line(&mut self) -> Result<Option<String>, TransportError> {
        match self.reader.next().await.transpose()? {
            None => Ok(None),
            Some(Inbound::Line(line)) => Ok(Some(line)),
            Some(Inbound::Oversized) => Err(FrameError::LineTooLong {
                max: self.max_line_length,
            }
            .into()),
        }
    }

    /// Split into independently owned halves.
    pub(crate) fn into_split(self) -> (LineReader, LineWriter) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for LineConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineConnection")
            .field("max_line_length", &self.max_line_length)
            .finish()
    }
}
