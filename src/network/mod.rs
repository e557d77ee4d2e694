//! Network Layer
//!
//! Everything that touches the socket: the handshake, the message envelope,
//! the client dispatch loop and its debug sub-channel, plus a minimal host
//! that speaks the server side of the same protocol.

pub mod channel;
pub mod debug;
pub mod handshake;
pub mod host;
pub mod protocol;
pub mod runner;

pub use channel::{ChannelStats, FramedChannel};
pub use debug::{DebugInterface, DebugSession};
pub use handshake::Token;
pub use host::{DebugRecord, HostError, HostOptions, PlayerHost, RemotePlayer};
pub use protocol::{ClientMessage, ProtocolRevision, ServerMessage};
pub use runner::{DispatchState, Runner, RunnerOptions, SessionSummary};
