//! # CodeGame Client Runtime
//!
//! Connects a player strategy to a game server over TCP and runs the
//! turn protocol: token handshake, tagged message dispatch, one action
//! reply per request, and a debug sub-channel on the same connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CODEGAME CLIENT                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  model.rs        - Payload types of one game                 │
//! │  strategy.rs     - User decision logic contract              │
//! │  config.rs       - Host / port / token / revision            │
//! │  error.rs        - Client and protocol errors                │
//! │  logging.rs      - Subscriber setup                          │
//! │                                                              │
//! │  network/        - Socket side (blocking, single thread)     │
//! │  ├── protocol.rs - Envelope codec                            │
//! │  ├── channel.rs  - Framed read / write + flush               │
//! │  ├── handshake.rs- Token exchange                            │
//! │  ├── debug.rs    - Debug commands and state query            │
//! │  ├── runner.rs   - Dispatch loop                             │
//! │  └── host.rs     - Server side for local play and tests      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantee
//!
//! The client never reads ahead. Every `GetAction` is answered with exactly
//! one `ActionMessage`, flushed before the next server message is read.
//!
//! ```no_run
//! use codegame_client::{ClientConfig, IdleStrategy, Runner};
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Serialize, Deserialize)] struct View;
//! # #[derive(Default, Serialize, Deserialize)] struct Action;
//! # struct Game;
//! # impl codegame_client::Model for Game {
//! #     type PlayerView = View;
//! #     type Action = Action;
//! #     type DebugCommand = ();
//! #     type DebugData = ();
//! #     type DebugState = ();
//! # }
//!
//! codegame_client::logging::init();
//! let config = ClientConfig::from_env()?;
//! let summary = Runner::<Game, _>::connect(&config, IdleStrategy)?.run()?;
//! println!("sent {} actions", summary.actions_sent);
//! # Ok::<(), anyhow::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod network;
pub mod strategy;

// Re-export commonly used types
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ProtocolError};
pub use model::Model;
pub use network::{
    ClientMessage, DebugInterface, DebugSession, FramedChannel, ProtocolRevision, Runner,
    ServerMessage, SessionSummary, Token,
};
pub use strategy::{from_fn, IdleStrategy, Strategy};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
