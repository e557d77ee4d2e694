//! Player Host
//!
//! Server side of the protocol: listens for exactly one player connection
//! and drives it with action requests and debug updates. Used for local
//! sparring and by the integration tests.

use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_HOST, DEFAULT_PORT};
use crate::error::{ClientError, ProtocolError};
use crate::model::Model;
use crate::network::handshake::Token;
use crate::network::protocol::{ClientMessage, ProtocolRevision, ServerMessage};

/// How often a non-blocking listener is polled while waiting for a player.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Host-side errors.
#[derive(Debug, Error)]
pub enum HostError {
    /// Socket failure, including read / write timeouts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Player sent something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Handshake token differs from the expected one.
    #[error("token mismatch")]
    TokenMismatch,
    /// No player connected in time.
    #[error("no player connected within {0:?}")]
    AcceptTimeout(Duration),
    /// Operation not available with the current options.
    #[error("{0} is not supported")]
    Unsupported(&'static str),
    /// Connection closed after an earlier failure or `finish`.
    #[error("player connection is closed")]
    Closed,
}

impl From<ClientError> for HostError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Transport(e) => Self::Io(e),
            ClientError::Protocol(e) => Self::Protocol(e),
            ClientError::Strategy(_)
            | ClientError::ChannelBroken
            | ClientError::SessionFinished => Self::Closed,
        }
    }
}

/// Listener options.
#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Interface to bind.
    pub host: String,
    /// Port to bind; `0` picks a free one.
    pub port: u16,
    /// Give up waiting for a player after this long.
    pub accept_timeout: Option<Duration>,
    /// Read / write timeout on the accepted connection.
    pub timeout: Option<Duration>,
    /// Token the player must present. Any token is accepted when `None`.
    pub token: Option<String>,
    /// Server message shape to send.
    pub revision: ProtocolRevision,
    /// Wait for `DebugUpdateDone` after every debug update.
    pub debug_update_done: bool,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            accept_timeout: None,
            timeout: None,
            token: None,
            revision: ProtocolRevision::default(),
            debug_update_done: false,
        }
    }
}

// =============================================================================
// LISTENER
// =============================================================================

/// Bound listener waiting for one player.
#[derive(Debug)]
pub struct PlayerHost {
    listener: TcpListener,
    options: HostOptions,
}

impl PlayerHost {
    /// Bind the listening socket.
    pub fn bind(options: HostOptions) -> Result<Self, HostError> {
        let listener = TcpListener::bind((options.host.as_str(), options.port))?;
        listener.set_nonblocking(true)?;
        info!("Waiting for connection on {}", listener.local_addr()?);
        Ok(Self { listener, options })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Options this host was bound with.
    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    /// Wait for a player and read its token.
    pub fn accept<M: Model>(&self) -> Result<RemotePlayer<M>, HostError> {
        let started = Instant::now();
        loop {
            if let Some(limit) = self.options.accept_timeout {
                if started.elapsed() > limit {
                    info!("Timeout accepting player on {:?}", self.local_addr().ok());
                    return Err(HostError::AcceptTimeout(limit));
                }
            }
            match self.listener.accept() {
                Ok((stream, peer)) => return self.admit(stream, peer),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn admit<M: Model>(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<RemotePlayer<M>, HostError> {
        info!("Got connection from {}", peer);
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(self.options.timeout)?;
        stream.set_write_timeout(self.options.timeout)?;
        stream.set_nodelay(true)?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream.try_clone()?);

        let token = Token::read_from(&mut reader)?;
        if let Some(expected) = &self.options.token {
            if token.as_str() != expected {
                warn!(token = %token.fingerprint(), "Token mismatch from {}", peer);
                let _ = stream.shutdown(Shutdown::Both);
                return Err(HostError::TokenMismatch);
            }
        }
        debug!(token = %token.fingerprint(), "Player authenticated");

        Ok(RemotePlayer {
            stream: Some(PlayerStream {
                reader,
                writer,
                socket: stream,
            }),
            peer,
            token,
            revision: self.options.revision,
            debug_update_done: self.options.debug_update_done,
            records: Vec::new(),
            debug_state: None,
            finished: false,
        })
    }
}

// =============================================================================
// CONNECTED PLAYER
// =============================================================================

/// Debug traffic received from the player.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugRecord<M: Model> {
    /// `DebugMessage`
    Command(M::DebugCommand),
    /// `DebugDataMessage`
    Data(M::DebugData),
}

type DebugStateProvider<M> = Box<dyn FnMut() -> <M as Model>::DebugState + Send>;

struct PlayerStream {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    socket: TcpStream,
}

/// What ends a read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    Nothing,
    Action,
    UpdateDone,
}

/// One connected player.
pub struct RemotePlayer<M: Model> {
    stream: Option<PlayerStream>,
    peer: SocketAddr,
    token: Token,
    revision: ProtocolRevision,
    debug_update_done: bool,
    records: Vec<DebugRecord<M>>,
    debug_state: Option<DebugStateProvider<M>>,
    finished: bool,
}

impl<M: Model> RemotePlayer<M> {
    /// Player's address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Token the player presented.
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Whether the connection is still usable.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Answer `RequestDebugState` with values from `provider`.
    pub fn set_debug_state<F>(&mut self, provider: F)
    where
        F: FnMut() -> M::DebugState + Send + 'static,
    {
        self.debug_state = Some(Box::new(provider));
    }

    /// Debug traffic received so far, oldest first.
    pub fn take_debug_records(&mut self) -> Vec<DebugRecord<M>> {
        std::mem::take(&mut self.records)
    }

    /// Request an action and wait for it.
    ///
    /// Debug traffic arriving before the action is recorded.
    pub fn get_action(&mut self, player_view: M::PlayerView) -> Result<M::Action, HostError> {
        let reply = self.exchange(ServerMessage::GetAction { player_view }, Awaiting::Action)?;
        reply.ok_or(HostError::Protocol(ProtocolError::Unexpected("DebugUpdateDone")))
    }

    /// Send a debug update.
    ///
    /// Waits for `DebugUpdateDone` only when the host was configured to.
    pub fn debug_update(&mut self, player_view: M::PlayerView) -> Result<(), HostError> {
        if !self.revision.supports_debug_updates() {
            return Err(HostError::Unsupported(
                "DebugUpdate in the optional-view protocol revision",
            ));
        }
        let awaiting = if self.debug_update_done {
            Awaiting::UpdateDone
        } else {
            Awaiting::Nothing
        };
        self.exchange(ServerMessage::DebugUpdate { player_view }, awaiting)?;
        Ok(())
    }

    /// End the game and close the connection.
    pub fn finish(mut self) -> Result<(), HostError> {
        self.send_finish()
    }

    /// Close without telling the player.
    pub fn abort(mut self) {
        self.finished = true;
        self.close();
    }

    fn send_finish(&mut self) -> Result<(), HostError> {
        self.finished = true;
        self.exchange(ServerMessage::Finish, Awaiting::Nothing)?;
        self.close();
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.socket.shutdown(Shutdown::Both) {
                debug!("Socket shutdown failed: {}", e);
            }
        }
    }

    fn exchange(
        &mut self,
        message: ServerMessage<M>,
        awaiting: Awaiting,
    ) -> Result<Option<M::Action>, HostError> {
        let mut stream = self.stream.take().ok_or(HostError::Closed)?;
        let result = self.drive(&mut stream, &message, awaiting);
        match &result {
            Ok(_) => self.stream = Some(stream),
            Err(e) => {
                warn!("Closing player {} after {} failed: {}", self.peer, message.name(), e);
                let _ = stream.socket.shutdown(Shutdown::Both);
            }
        }
        result
    }

    fn drive(
        &mut self,
        stream: &mut PlayerStream,
        message: &ServerMessage<M>,
        awaiting: Awaiting,
    ) -> Result<Option<M::Action>, HostError> {
        let frame = message.encode(self.revision)?;
        stream.writer.write_all(&frame)?;
        stream.writer.flush()?;
        debug!(message = message.name(), "Sent to player");

        if awaiting == Awaiting::Nothing {
            return Ok(None);
        }

        loop {
            let reply = ClientMessage::<M>::read_from(&mut stream.reader)?;
            debug!(message = reply.name(), "Received from player");
            match reply {
                ClientMessage::DebugMessage { command } => {
                    self.records.push(DebugRecord::Command(command));
                }
                ClientMessage::DebugDataMessage { data } => {
                    self.records.push(DebugRecord::Data(data));
                }
                ClientMessage::RequestDebugState => {
                    let provider = self.debug_state.as_mut().ok_or(HostError::Unsupported(
                        "RequestDebugState without a debug state provider",
                    ))?;
                    let state = provider();
                    let bytes = bincode::serialize(&state)
                        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
                    stream.writer.write_all(&bytes)?;
                    stream.writer.flush()?;
                }
                ClientMessage::ActionMessage { action } if awaiting == Awaiting::Action => {
                    return Ok(Some(action));
                }
                ClientMessage::DebugUpdateDone if awaiting == Awaiting::UpdateDone => {
                    return Ok(None);
                }
                other => return Err(ProtocolError::Unexpected(other.name()).into()),
            }
        }
    }
}

impl<M: Model> Drop for RemotePlayer<M> {
    fn drop(&mut self) {
        if !self.finished && self.stream.is_some() {
            if let Err(e) = self.send_finish() {
                warn!("Failed to send finish to {}: {}", self.peer, e);
            }
        }
        self.close();
    }
}

impl<M: Model> std::fmt::Debug for RemotePlayer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePlayer")
            .field("peer", &self.peer)
            .field("token", &self.token)
            .field("revision", &self.revision)
            .field("open", &self.stream.is_some())
            .finish()
    }
}
