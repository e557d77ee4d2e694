//! Session Runner
//!
//! The client receive loop. Reads one server message at a time, hands it to
//! the strategy and writes the reply before the next read. There is no read
//! ahead and no pipelining: the server drives the pace.

use std::marker::PhantomData;
use std::net::{Shutdown, TcpStream};

use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::model::Model;
use crate::network::channel::{ChannelStats, FramedChannel};
use crate::network::debug::{DebugInterface, DebugSession};
use crate::network::handshake::{self, Token};
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::strategy::Strategy;

/// Dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Waiting for the next server message.
    AwaitingMessage,
    /// Terminal message received or the session failed.
    Stopped,
}

/// Dispatcher options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Write `DebugUpdateDone` after every handled debug update.
    pub debug_update_done: bool,
}

impl From<&ClientConfig> for RunnerOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            debug_update_done: config.debug_update_done,
        }
    }
}

/// Totals reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// `ActionMessage`s written.
    pub actions_sent: u64,
    /// `DebugUpdate`s handled.
    pub debug_updates: u64,
    /// Channel counters.
    pub channel: ChannelStats,
}

/// Drives one connection from handshake to the terminal message.
pub struct Runner<M: Model, S: Strategy<M>> {
    channel: FramedChannel,
    strategy: S,
    options: RunnerOptions,
    state: DispatchState,
    socket: Option<TcpStream>,
    actions_sent: u64,
    debug_updates: u64,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model, S: Strategy<M>> Runner<M, S> {
    /// Connect to the server and send the token.
    #[instrument(skip(config, strategy), fields(host = %config.host, port = config.port))]
    pub fn connect(config: &ClientConfig, strategy: S) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(config.addr())?;
        let mut channel = FramedChannel::from_tcp(&stream, config.protocol)?;
        info!("Connected to {}:{} ({})", config.host, config.port, config.protocol);

        handshake::perform(&mut channel, &Token::new(config.token.as_str()))?;

        let mut runner = Self::with_channel(channel, strategy, RunnerOptions::from(config));
        runner.socket = Some(stream);
        Ok(runner)
    }

    /// Run over a channel whose handshake is already done.
    pub fn with_channel(channel: FramedChannel, strategy: S, options: RunnerOptions) -> Self {
        Self {
            channel,
            strategy,
            options,
            state: DispatchState::AwaitingMessage,
            socket: None,
            actions_sent: 0,
            debug_updates: 0,
            _model: PhantomData,
        }
    }

    /// Current dispatcher state.
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// The strategy being driven.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Mutable access to the strategy between steps.
    pub fn strategy_mut(&mut self) -> &mut S {
        &mut self.strategy
    }

    /// Totals so far.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            actions_sent: self.actions_sent,
            debug_updates: self.debug_updates,
            channel: self.channel.stats(),
        }
    }

    /// Handle exactly one server message.
    ///
    /// Any error stops the session and closes the connection.
    pub fn step(&mut self) -> Result<DispatchState, ClientError> {
        if self.state == DispatchState::Stopped {
            return Err(ClientError::SessionFinished);
        }

        match self.dispatch() {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!("Session failed: {}", e);
                self.state = DispatchState::Stopped;
                self.close();
                Err(e)
            }
        }
    }

    /// Handle messages until the terminal one.
    #[instrument(skip(self))]
    pub fn run(&mut self) -> Result<SessionSummary, ClientError> {
        while self.step()? == DispatchState::AwaitingMessage {}

        let summary = self.summary();
        info!(
            actions = summary.actions_sent,
            debug_updates = summary.debug_updates,
            "Session finished"
        );
        Ok(summary)
    }

    fn dispatch(&mut self) -> Result<DispatchState, ClientError> {
        let message = self.channel.read_message::<M>()?;
        debug!(message = message.name(), "Dispatching server message");

        match message {
            ServerMessage::GetAction { player_view } => {
                let mut debug = DebugInterface::new(&mut self.channel);
                let action = self
                    .strategy
                    .get_action(&player_view, Some(&mut debug))
                    .map_err(strategy_error)?;

                self.channel
                    .write_message::<M>(&ClientMessage::ActionMessage { action })?;
                self.actions_sent += 1;
            }
            ServerMessage::DebugUpdate { player_view } => {
                let mut session = DebugSession::new(&mut self.channel);
                self.strategy
                    .debug_update(&player_view, &mut session)
                    .map_err(strategy_error)?;

                if self.options.debug_update_done {
                    self.channel
                        .write_message::<M>(&ClientMessage::DebugUpdateDone)?;
                }
                self.debug_updates += 1;
            }
            ServerMessage::Finish => {
                info!("Finish received");
                self.state = DispatchState::Stopped;
                self.close();
            }
        }

        Ok(self.state)
    }

    fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!("Socket shutdown failed: {}", e);
            }
        }
    }
}

impl<M: Model, S: Strategy<M>> Drop for Runner<M, S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Keep client errors raised through the debug handle as they are.
fn strategy_error(err: anyhow::Error) -> ClientError {
    match err.downcast::<ClientError>() {
        Ok(client) => client,
        Err(other) => ClientError::Strategy(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_model::{Command, Move, TestGame, View};
    use crate::network::protocol::ProtocolRevision;
    use crate::strategy::from_fn;
    use std::collections::VecDeque;
    use std::io::{BufReader, Cursor, Read, Write};
    use std::sync::{Arc, Mutex};

    // =========================================================================
    // LOCKSTEP HARNESS
    // =========================================================================

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        /// Frame `n` of the script started being read.
        Served(usize),
        /// Script exhausted.
        Eof,
        /// One flushed client message.
        Flushed(ClientMessage<TestGame>),
        /// Strategy callback with the view tick.
        Called(&'static str, u64),
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    /// Hands out one frame at a time; the next frame is only touched once
    /// the client asks for more bytes.
    struct ScriptReader {
        frames: VecDeque<Vec<u8>>,
        current: Cursor<Vec<u8>>,
        served: usize,
        log: Log,
    }

    impl Read for ScriptReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.current.position() as usize == self.current.get_ref().len() {
                match self.frames.pop_front() {
                    Some(frame) => {
                        self.log.lock().unwrap().push(Event::Served(self.served));
                        self.served += 1;
                        self.current = Cursor::new(frame);
                    }
                    None => {
                        self.log.lock().unwrap().push(Event::Eof);
                        return Ok(0);
                    }
                }
            }
            self.current.read(buf)
        }
    }

    struct RecordingWriter {
        pending: Vec<u8>,
        log: Log,
    }

    impl Write for RecordingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.pending.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.pending.is_empty() {
                let frame = std::mem::take(&mut self.pending);
                let message = ClientMessage::read_from(&mut Cursor::new(frame))
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                self.log.lock().unwrap().push(Event::Flushed(message));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Scripted {
        log: Log,
        fail_on: Option<u32>,
        debug_in_action: bool,
        query_state: bool,
    }

    impl Strategy<TestGame> for Scripted {
        fn get_action(
            &mut self,
            view: &View,
            debug: Option<&mut DebugInterface<'_, TestGame>>,
        ) -> anyhow::Result<Move> {
            self.log
                .lock()
                .unwrap()
                .push(Event::Called("get_action", view.tick as u64));
            if self.fail_on == Some(view.tick) {
                anyhow::bail!("strategy gave up at tick {}", view.tick);
            }
            if let (true, Some(debug)) = (self.debug_in_action, debug) {
                if debug.supports_commands() {
                    debug.send(Command::Text {
                        message: format!("tick {}", view.tick),
                    })?;
                }
                debug.send_data(format!("units {}", view.units.len()))?;
            }
            Ok(Move {
                target: view.tick as i32,
            })
        }

        fn debug_update(
            &mut self,
            view: &View,
            debug: &mut DebugSession<'_, TestGame>,
        ) -> anyhow::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(Event::Called("debug_update", view.tick as u64));
            if self.query_state {
                let state = debug.get_state()?;
                self.log.lock().unwrap().push(Event::Called("state", state));
            }
            debug.send(Command::Clear)?;
            Ok(())
        }
    }

    fn tagged(message: ServerMessage<TestGame>) -> Vec<u8> {
        message.encode(ProtocolRevision::Tagged).unwrap()
    }

    fn get_action_frame(tick: u32) -> Vec<u8> {
        tagged(ServerMessage::GetAction {
            player_view: View::at(tick),
        })
    }

    fn debug_update_frame(tick: u32) -> Vec<u8> {
        tagged(ServerMessage::DebugUpdate {
            player_view: View::at(tick),
        })
    }

    fn channel(frames: Vec<Vec<u8>>, revision: ProtocolRevision, log: &Log) -> FramedChannel {
        let reader = ScriptReader {
            frames: frames.into(),
            current: Cursor::new(Vec::new()),
            served: 0,
            log: log.clone(),
        };
        let writer = RecordingWriter {
            pending: Vec::new(),
            log: log.clone(),
        };
        FramedChannel::new(BufReader::new(reader), writer, revision)
    }

    fn runner(
        frames: Vec<Vec<u8>>,
        strategy: impl FnOnce(Log) -> Scripted,
        options: RunnerOptions,
    ) -> (Runner<TestGame, Scripted>, Log) {
        let log = Log::default();
        let channel = channel(frames, ProtocolRevision::Tagged, &log);
        (Runner::with_channel(channel, strategy(log.clone()), options), log)
    }

    fn basic(log: Log) -> Scripted {
        Scripted {
            log,
            ..Default::default()
        }
    }

    fn events(log: &Log) -> Vec<Event> {
        log.lock().unwrap().clone()
    }

    fn action(target: i32) -> Event {
        Event::Flushed(ClientMessage::ActionMessage {
            action: Move { target },
        })
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    #[test]
    fn test_get_action_reply_before_next_read() {
        let (mut runner, log) = runner(vec![get_action_frame(1)], basic, RunnerOptions::default());

        assert_eq!(runner.step().unwrap(), DispatchState::AwaitingMessage);
        assert_eq!(
            events(&log),
            vec![Event::Served(0), Event::Called("get_action", 1), action(1)]
        );
    }

    #[test]
    fn test_debug_update_then_get_action() {
        let (mut runner, log) = runner(
            vec![
                debug_update_frame(1),
                get_action_frame(2),
                tagged(ServerMessage::Finish),
            ],
            basic,
            RunnerOptions::default(),
        );

        let summary = runner.run().unwrap();
        assert_eq!(summary.actions_sent, 1);
        assert_eq!(summary.debug_updates, 1);
        assert_eq!(
            events(&log),
            vec![
                Event::Served(0),
                Event::Called("debug_update", 1),
                Event::Flushed(ClientMessage::DebugMessage {
                    command: Command::Clear
                }),
                Event::Served(1),
                Event::Called("get_action", 2),
                action(2),
                Event::Served(2),
            ]
        );
    }

    #[test]
    fn test_finish_first_writes_nothing() {
        let (mut runner, log) = runner(
            vec![tagged(ServerMessage::Finish)],
            basic,
            RunnerOptions::default(),
        );

        let summary = runner.run().unwrap();
        assert_eq!(summary.actions_sent, 0);
        assert_eq!(summary.channel.messages_written, 0);
        assert_eq!(events(&log), vec![Event::Served(0)]);
        assert_eq!(runner.state(), DispatchState::Stopped);

        assert!(matches!(runner.step(), Err(ClientError::SessionFinished)));
        assert_eq!(events(&log), vec![Event::Served(0)]);
    }

    #[test]
    fn test_close_while_waiting_is_transport_error() {
        let (mut runner, log) = runner(vec![get_action_frame(1)], basic, RunnerOptions::default());

        let err = runner.run().unwrap_err();
        assert!(err.is_transport(), "{err}");
        assert_eq!(events(&log).last(), Some(&Event::Eof));
        assert_eq!(runner.state(), DispatchState::Stopped);
    }

    #[test]
    fn test_strategy_failure_aborts_without_reply() {
        let (mut runner, log) = runner(
            vec![
                get_action_frame(1),
                tagged(ServerMessage::Finish),
            ],
            |log| Scripted {
                log,
                fail_on: Some(1),
                ..Default::default()
            },
            RunnerOptions::default(),
        );

        let err = runner.run().unwrap_err();
        match err {
            ClientError::Strategy(e) => assert!(e.to_string().contains("gave up at tick 1")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            events(&log),
            vec![Event::Served(0), Event::Called("get_action", 1)]
        );
        assert_eq!(runner.state(), DispatchState::Stopped);
        assert!(matches!(runner.step(), Err(ClientError::SessionFinished)));
    }

    #[test]
    fn test_unknown_tag_aborts() {
        let (mut runner, _log) = runner(vec![vec![3, 0, 0, 0]], basic, RunnerOptions::default());
        let err = runner.run().unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_debug_send_during_get_action() {
        let (mut runner, log) = runner(
            vec![
                get_action_frame(4),
                tagged(ServerMessage::Finish),
            ],
            |log| Scripted {
                log,
                debug_in_action: true,
                ..Default::default()
            },
            RunnerOptions::default(),
        );

        runner.run().unwrap();
        assert_eq!(
            events(&log),
            vec![
                Event::Served(0),
                Event::Called("get_action", 4),
                Event::Flushed(ClientMessage::DebugMessage {
                    command: Command::Text {
                        message: "tick 4".into()
                    },
                }),
                Event::Flushed(ClientMessage::DebugDataMessage {
                    data: "units 2".into()
                }),
                action(4),
                Event::Served(1),
            ]
        );
    }

    #[test]
    fn test_debug_update_done_acknowledged() {
        let (mut runner, log) = runner(
            vec![
                debug_update_frame(1),
                tagged(ServerMessage::Finish),
            ],
            basic,
            RunnerOptions {
                debug_update_done: true,
            },
        );

        runner.run().unwrap();
        assert_eq!(
            events(&log),
            vec![
                Event::Served(0),
                Event::Called("debug_update", 1),
                Event::Flushed(ClientMessage::DebugMessage {
                    command: Command::Clear
                }),
                Event::Flushed(ClientMessage::DebugUpdateDone),
                Event::Served(1),
            ]
        );
    }

    #[test]
    fn test_get_state_inside_debug_update() {
        let (mut runner, log) = runner(
            vec![
                debug_update_frame(1),
                bincode::serialize(&7u64).unwrap(),
                tagged(ServerMessage::Finish),
            ],
            |log| Scripted {
                log,
                query_state: true,
                ..Default::default()
            },
            RunnerOptions::default(),
        );

        runner.run().unwrap();
        assert_eq!(
            events(&log),
            vec![
                Event::Served(0),
                Event::Called("debug_update", 1),
                Event::Flushed(ClientMessage::RequestDebugState),
                Event::Served(1),
                Event::Called("state", 7),
                Event::Flushed(ClientMessage::DebugMessage {
                    command: Command::Clear
                }),
                Event::Served(2),
            ]
        );
    }

    #[test]
    fn test_client_error_from_strategy_kept() {
        let log = Log::default();
        let channel = channel(
            vec![get_action_frame(1)],
            ProtocolRevision::Tagged,
            &log,
        );
        let strategy = from_fn::<TestGame, _>(|_: &View| Err(ClientError::ChannelBroken.into()));
        let mut runner: Runner<TestGame, _> =
            Runner::with_channel(channel, strategy, RunnerOptions::default());

        assert!(matches!(runner.run(), Err(ClientError::ChannelBroken)));
    }

    fn optional_view_frames() -> Vec<Vec<u8>> {
        [
            ServerMessage::<TestGame>::GetAction {
                player_view: View::at(2),
            },
            ServerMessage::<TestGame>::Finish,
        ]
        .iter()
        .map(|message| message.encode(ProtocolRevision::OptionalView).unwrap())
        .collect()
    }

    #[test]
    fn test_optional_view_sends_debug_data_only() {
        let log = Log::default();
        let channel = channel(optional_view_frames(), ProtocolRevision::OptionalView, &log);
        let strategy = Scripted {
            log: log.clone(),
            debug_in_action: true,
            ..Default::default()
        };
        let mut runner: Runner<TestGame, _> =
            Runner::with_channel(channel, strategy, RunnerOptions::default());

        let summary = runner.run().unwrap();
        assert_eq!(summary.actions_sent, 1);
        assert_eq!(
            events(&log),
            vec![
                Event::Served(0),
                Event::Called("get_action", 2),
                Event::Flushed(ClientMessage::DebugDataMessage {
                    data: "units 2".into()
                }),
                action(2),
                Event::Served(1),
            ]
        );
    }

    #[test]
    fn test_optional_view_rejects_debug_command() {
        struct Chatty;

        impl Strategy<TestGame> for Chatty {
            fn get_action(
                &mut self,
                _view: &View,
                debug: Option<&mut DebugInterface<'_, TestGame>>,
            ) -> anyhow::Result<Move> {
                if let Some(debug) = debug {
                    debug.send(Command::Clear)?;
                }
                Ok(Move::default())
            }
        }

        let log = Log::default();
        let channel = channel(optional_view_frames(), ProtocolRevision::OptionalView, &log);
        let mut runner: Runner<TestGame, _> =
            Runner::with_channel(channel, Chatty, RunnerOptions::default());

        let err = runner.run().unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(crate::error::ProtocolError::Unsupported("DebugMessage", _))
        ));
        assert_eq!(events(&log), vec![Event::Served(0)]);
    }

    #[test]
    fn test_exactly_one_action_per_request() {
        let mut frames: Vec<Vec<u8>> = (0..5)
            .map(get_action_frame)
            .collect();
        frames.push(tagged(ServerMessage::Finish));
        let (mut runner, log) = runner(frames, basic, RunnerOptions::default());

        let summary = runner.run().unwrap();
        assert_eq!(summary.actions_sent, 5);
        assert_eq!(summary.channel.messages_read, 6);

        let events = events(&log);
        for (index, window) in events.windows(3).enumerate() {
            if let Event::Served(n) = window[0] {
                if n < 5 {
                    assert_eq!(window[2], action(n as i32), "at event {index}");
                }
            }
        }
    }
}
