//! Client Errors
//!
//! Every error that ends a session. There is no recoverable class: a
//! session either runs to the terminal message or fails with one of these.

use thiserror::Error;

/// Violations of the envelope protocol.
///
/// These indicate a version mismatch between client and server and are
/// never swallowed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Variant discriminator not known to the configured revision.
    #[error("unknown message tag {0}")]
    UnknownTag(u32),
    /// Stream ended after part of a message had been read.
    #[error("stream ended in the middle of a message")]
    Truncated,
    /// Payload could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// Payload could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(String),
    /// Message exists but cannot be expressed in the configured revision.
    #[error("{0} is not supported by the {1} protocol revision")]
    Unsupported(&'static str, &'static str),
    /// Token does not fit the i32 length prefix.
    #[error("token of {0} bytes does not fit the handshake length prefix")]
    TokenTooLong(usize),
    /// Handshake length prefix is negative.
    #[error("negative token length {0}")]
    NegativeLength(i32),
    /// Handshake token bytes are not UTF-8.
    #[error("token is not valid UTF-8")]
    InvalidToken,
    /// Well-formed message that is not allowed at this point of the exchange.
    #[error("unexpected {0}")]
    Unexpected(&'static str),
}

/// Errors surfaced by a client session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connect refused, read/write failure or premature close.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Unrecognized tag, malformed envelope or codec failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The strategy failed during `get_action` or `debug_update`.
    #[error("strategy failed: {0:#}")]
    Strategy(anyhow::Error),

    /// The channel already failed once and must not be used again.
    #[error("channel is unusable after an earlier failure")]
    ChannelBroken,

    /// The dispatcher already received the terminal message.
    #[error("session already finished")]
    SessionFinished,
}

impl ClientError {
    /// Transport error for a peer that closed the stream between messages.
    pub(crate) fn closed_by_peer() -> Self {
        Self::Transport(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        ))
    }

    /// Whether this error came from the transport layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether this error is a protocol violation.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

/// Classify a codec error as transport or protocol.
///
/// An unexpected EOF inside a payload means the frame was cut short, which
/// is a protocol error; any other I/O failure belongs to the transport.
pub(crate) fn classify_decode(err: bincode::Error) -> ClientError {
    match *err {
        bincode::ErrorKind::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            ClientError::Protocol(ProtocolError::Truncated)
        }
        bincode::ErrorKind::Io(e) => ClientError::Transport(e),
        other => ClientError::Protocol(ProtocolError::Malformed(other.to_string())),
    }
}
