//! Debug Sub-Channel
//!
//! Debug commands share the connection with the action traffic. Sending is
//! allowed from both strategy callbacks; the `get_state` round trip reads
//! from the shared stream and is therefore only available while handling a
//! debug update, when no server message can be in flight.
//!
//! The optional-view revision only carries free-form debug data, so its
//! handle rejects commands.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use tracing::debug;

use crate::error::{ClientError, ProtocolError};
use crate::model::Model;
use crate::network::channel::FramedChannel;
use crate::network::protocol::ClientMessage;

/// Send-only debug handle.
pub struct DebugInterface<'a, M: Model> {
    channel: &'a mut FramedChannel,
    _model: PhantomData<fn() -> M>,
}

impl<'a, M: Model> DebugInterface<'a, M> {
    pub(crate) fn new(channel: &'a mut FramedChannel) -> Self {
        Self {
            channel,
            _model: PhantomData,
        }
    }

    /// Whether [`DebugInterface::send`] is available on this connection.
    pub fn supports_commands(&self) -> bool {
        self.channel.revision().supports_debug_commands()
    }

    /// Send one debug command. Written and flushed before returning.
    ///
    /// Fails with [`ProtocolError::Unsupported`] in the optional-view
    /// revision without touching the stream.
    pub fn send(&mut self, command: M::DebugCommand) -> Result<(), ClientError> {
        if !self.supports_commands() {
            let revision = self.channel.revision().name();
            return Err(ProtocolError::Unsupported("DebugMessage", revision).into());
        }
        debug!("Sending debug command");
        self.channel
            .write_message::<M>(&ClientMessage::DebugMessage { command })
    }

    /// Send a free-form inspection payload.
    pub fn send_data(&mut self, data: M::DebugData) -> Result<(), ClientError> {
        debug!("Sending debug data");
        self.channel
            .write_message::<M>(&ClientMessage::DebugDataMessage { data })
    }
}

/// Debug handle passed to `debug_update`.
///
/// Dereferences to [`DebugInterface`] and adds the synchronous state query.
pub struct DebugSession<'a, M: Model> {
    inner: DebugInterface<'a, M>,
}

impl<'a, M: Model> DebugSession<'a, M> {
    pub(crate) fn new(channel: &'a mut FramedChannel) -> Self {
        Self {
            inner: DebugInterface::new(channel),
        }
    }

    /// Ask the app for its debug state and block until the answer arrives.
    pub fn get_state(&mut self) -> Result<M::DebugState, ClientError> {
        self.inner
            .channel
            .write_message::<M>(&ClientMessage::RequestDebugState)?;
        self.inner.channel.read_value()
    }
}

impl<'a, M: Model> Deref for DebugSession<'a, M> {
    type Target = DebugInterface<'a, M>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a, M: Model> DerefMut for DebugSession<'a, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
