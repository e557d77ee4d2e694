//! Protocol Messages
//!
//! Envelope format for client-server communication over the game socket.
//! Payloads are encoded with bincode (fixed-width little-endian integers);
//! each envelope starts with a variant tag whose width depends on the
//! protocol revision.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::error::{classify_decode, ClientError, ProtocolError};
use crate::model::Model;

// =============================================================================
// PROTOCOL REVISIONS
// =============================================================================

/// Server message shape spoken on a connection.
///
/// The two revisions are wire-incompatible and are never auto-detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolRevision {
    /// `GetAction` / `Finish` / `DebugUpdate` behind a `u32` tag.
    #[default]
    Tagged,
    /// Single `{ player_view: Option<_> }` shape; an absent view ends the game.
    OptionalView,
}

impl ProtocolRevision {
    /// Name used in configuration and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tagged => "tagged",
            Self::OptionalView => "optional-view",
        }
    }

    /// Whether the server can send `DebugUpdate` in this revision.
    pub fn supports_debug_updates(&self) -> bool {
        matches!(self, Self::Tagged)
    }

    /// Whether the client may send `DebugMessage` commands.
    ///
    /// `DebugDataMessage` is accepted by both revisions.
    pub fn supports_debug_commands(&self) -> bool {
        matches!(self, Self::Tagged)
    }
}

impl fmt::Display for ProtocolRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProtocolRevision {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "tagged" => Ok(Self::Tagged),
            "optional-view" => Ok(Self::OptionalView),
            _ => Err(ConfigError::UnknownProtocol(s.to_string())),
        }
    }
}

// =============================================================================
// WIRE TAGS
// =============================================================================

/// Tags of [`ServerMessage`] in the tagged revision.
pub mod server_tag {
    /// `GetAction`
    pub const GET_ACTION: u32 = 0;
    /// `Finish`
    pub const FINISH: u32 = 1;
    /// `DebugUpdate`
    pub const DEBUG_UPDATE: u32 = 2;
}

/// Tags of [`ClientMessage`], identical in both revisions.
pub mod client_tag {
    /// `DebugMessage`
    pub const DEBUG_MESSAGE: u32 = 0;
    /// `ActionMessage`
    pub const ACTION_MESSAGE: u32 = 1;
    /// `DebugUpdateDone`
    pub const DEBUG_UPDATE_DONE: u32 = 2;
    /// `RequestDebugState`
    pub const REQUEST_DEBUG_STATE: u32 = 3;
    /// `DebugDataMessage`
    pub const DEBUG_DATA_MESSAGE: u32 = 4;
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage<M: Model> {
    /// Request for the next action. Always answered by one `ActionMessage`.
    GetAction {
        /// Snapshot the strategy decides on.
        player_view: M::PlayerView,
    },

    /// End of the game. No reply.
    Finish,

    /// Debug refresh. The strategy may emit debug messages, no action reply.
    DebugUpdate {
        /// Snapshot to visualize.
        player_view: M::PlayerView,
    },
}

impl<M: Model> ServerMessage<M> {
    /// Variant name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetAction { .. } => "GetAction",
            Self::Finish => "Finish",
            Self::DebugUpdate { .. } => "DebugUpdate",
        }
    }

    /// Whether this message ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish)
    }

    /// Read one message, blocking until it is complete.
    pub fn read_from<R: Read + ?Sized>(
        reader: &mut R,
        revision: ProtocolRevision,
    ) -> Result<Self, ClientError> {
        match revision {
            ProtocolRevision::Tagged => {
                let mut tag = [0u8; 4];
                read_header(reader, &mut tag)?;
                match u32::from_le_bytes(tag) {
                    server_tag::GET_ACTION => Ok(Self::GetAction {
                        player_view: decode_payload(reader)?,
                    }),
                    server_tag::FINISH => Ok(Self::Finish),
                    server_tag::DEBUG_UPDATE => Ok(Self::DebugUpdate {
                        player_view: decode_payload(reader)?,
                    }),
                    other => Err(ProtocolError::UnknownTag(other).into()),
                }
            }
            ProtocolRevision::OptionalView => {
                let mut flag = [0u8; 1];
                read_header(reader, &mut flag)?;
                match flag[0] {
                    0 => Ok(Self::Finish),
                    1 => Ok(Self::GetAction {
                        player_view: decode_payload(reader)?,
                    }),
                    other => Err(ProtocolError::UnknownTag(other as u32).into()),
                }
            }
        }
    }

    /// Encode into a complete frame.
    pub fn encode(&self, revision: ProtocolRevision) -> Result<Vec<u8>, ProtocolError> {
        let mut frame = Vec::new();
        match (revision, self) {
            (ProtocolRevision::Tagged, Self::GetAction { player_view }) => {
                frame.extend_from_slice(&server_tag::GET_ACTION.to_le_bytes());
                encode_payload(&mut frame, player_view)?;
            }
            (ProtocolRevision::Tagged, Self::Finish) => {
                frame.extend_from_slice(&server_tag::FINISH.to_le_bytes());
            }
            (ProtocolRevision::Tagged, Self::DebugUpdate { player_view }) => {
                frame.extend_from_slice(&server_tag::DEBUG_UPDATE.to_le_bytes());
                encode_payload(&mut frame, player_view)?;
            }
            (ProtocolRevision::OptionalView, Self::GetAction { player_view }) => {
                frame.push(1);
                encode_payload(&mut frame, player_view)?;
            }
            (ProtocolRevision::OptionalView, Self::Finish) => {
                frame.push(0);
            }
            (ProtocolRevision::OptionalView, Self::DebugUpdate { .. }) => {
                return Err(ProtocolError::Unsupported(
                    "DebugUpdate",
                    ProtocolRevision::OptionalView.name(),
                ));
            }
        }
        Ok(frame)
    }
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
///
/// Variant order is the wire tag order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum ClientMessage<M: Model> {
    /// Debug command for the app to perform.
    DebugMessage {
        /// Command to perform.
        command: M::DebugCommand,
    },

    /// Reply to `ServerMessage::GetAction`.
    ActionMessage {
        /// Player's action.
        action: M::Action,
    },

    /// Signals the end of a debug update.
    DebugUpdateDone,

    /// Asks the app for its debug state; answered by one raw `DebugState` value.
    RequestDebugState,

    /// Arbitrary inspection payload.
    DebugDataMessage {
        /// Payload to display.
        data: M::DebugData,
    },
}

impl<M: Model> ClientMessage<M> {
    /// Variant name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DebugMessage { .. } => "DebugMessage",
            Self::ActionMessage { .. } => "ActionMessage",
            Self::DebugUpdateDone => "DebugUpdateDone",
            Self::RequestDebugState => "RequestDebugState",
            Self::DebugDataMessage { .. } => "DebugDataMessage",
        }
    }

    /// Encode into a complete frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Read one message, blocking until it is complete.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, ClientError> {
        let mut tag = [0u8; 4];
        read_header(reader, &mut tag)?;
        let value = u32::from_le_bytes(tag);
        if value > client_tag::DEBUG_DATA_MESSAGE {
            return Err(ProtocolError::UnknownTag(value).into());
        }
        let mut framed = (&tag[..]).chain(reader);
        bincode::deserialize_from(&mut framed).map_err(classify_decode)
    }
}

// =============================================================================
// CODEC HELPERS
// =============================================================================

/// Fill `buf` with the leading bytes of a message.
///
/// A clean EOF before the first byte is a closed connection; an EOF after
/// some bytes is a truncated frame.
fn read_header<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<(), ClientError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Err(ClientError::closed_by_peer()),
            Ok(0) => return Err(ProtocolError::Truncated.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ClientError::Transport(e)),
        }
    }
    Ok(())
}

/// Decode one bincode value that continues an already started frame.
pub(crate) fn decode_payload<T, R>(reader: &mut R) -> Result<T, ClientError>
where
    T: serde::de::DeserializeOwned,
    R: Read + ?Sized,
{
    bincode::deserialize_from(reader).map_err(classify_decode)
}

fn encode_payload<T: Serialize>(frame: &mut Vec<u8>, value: &T) -> Result<(), ProtocolError> {
    bincode::serialize_into(frame, value).map_err(|e| ProtocolError::Encode(e.to_string()))
}
