//! Framed Channel
//!
//! Ordered reads of server messages and ordered, immediately flushed writes
//! of client messages over one byte stream. Every outgoing frame is encoded
//! in full before the first byte hits the socket.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::TcpStream;

use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::ClientError;
use crate::model::Model;
use crate::network::protocol::{decode_payload, ClientMessage, ProtocolRevision, ServerMessage};

/// Message counters for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Server messages and raw values read.
    pub messages_read: u64,
    /// Client messages written.
    pub messages_written: u64,
    /// Bytes written, handshake included.
    pub bytes_written: u64,
}

/// Bidirectional message channel over a buffered reader and writer.
pub struct FramedChannel {
    reader: Box<dyn BufRead + Send>,
    writer: Box<dyn Write + Send>,
    revision: ProtocolRevision,
    stats: ChannelStats,
    broken: bool,
}

impl FramedChannel {
    /// Create a channel over an arbitrary reader / writer pair.
    pub fn new<R, W>(reader: R, writer: W, revision: ProtocolRevision) -> Self
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            revision,
            stats: ChannelStats::default(),
            broken: false,
        }
    }

    /// Create a channel over a connected socket.
    ///
    /// Enables `TCP_NODELAY` and buffers both directions over clones of the
    /// same socket.
    pub fn from_tcp(stream: &TcpStream, revision: ProtocolRevision) -> std::io::Result<Self> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream.try_clone()?);
        Ok(Self::new(reader, writer, revision))
    }

    /// Protocol revision spoken on this channel.
    pub fn revision(&self) -> ProtocolRevision {
        self.revision
    }

    /// Counters so far.
    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Whether an earlier failure made the channel unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Block until one complete server message is available.
    pub fn read_message<M: Model>(&mut self) -> Result<ServerMessage<M>, ClientError> {
        self.ensure_usable()?;
        let result = ServerMessage::read_from(&mut self.reader, self.revision);
        let message = self.track(result)?;
        self.stats.messages_read += 1;
        trace!(message = message.name(), "Frame read");
        Ok(message)
    }

    /// Encode, write and flush one client message.
    pub fn write_message<M: Model>(
        &mut self,
        message: &ClientMessage<M>,
    ) -> Result<(), ClientError> {
        self.ensure_usable()?;
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                self.broken = true;
                return Err(e.into());
            }
        };
        #[cfg(feature = "debug-tracing")]
        trace!(message = message.name(), frame = %hex::encode(&frame), "Frame write");
        self.send_raw(&frame)?;
        self.stats.messages_written += 1;
        Ok(())
    }

    /// Read one raw codec value that is not wrapped in an envelope.
    ///
    /// A stream that ends before the first byte of the value is a closed
    /// connection, as for [`FramedChannel::read_message`].
    pub fn read_value<T: DeserializeOwned>(&mut self) -> Result<T, ClientError> {
        self.ensure_usable()?;
        let result = match self.reader.fill_buf().map(|buf| buf.is_empty()) {
            Ok(true) => Err(ClientError::closed_by_peer()),
            Ok(false) => decode_payload(&mut self.reader),
            Err(e) => Err(ClientError::Transport(e)),
        };
        let value = self.track(result)?;
        self.stats.messages_read += 1;
        Ok(value)
    }

    /// Write pre-encoded bytes and flush.
    pub(crate) fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.ensure_usable()?;
        let result = self
            .writer
            .write_all(bytes)
            .and_then(|()| self.writer.flush())
            .map_err(ClientError::Transport);
        self.track(result)?;
        self.stats.bytes_written += bytes.len() as u64;
        Ok(())
    }

    fn ensure_usable(&self) -> Result<(), ClientError> {
        if self.broken {
            Err(ClientError::ChannelBroken)
        } else {
            Ok(())
        }
    }

    fn track<T>(&mut self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if result.is_err() {
            self.broken = true;
        }
        result
    }
}

impl std::fmt::Debug for FramedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedChannel")
            .field("revision", &self.revision)
            .field("stats", &self.stats)
            .field("broken", &self.broken)
            .finish()
    }
}
