//! Game Model Binding
//!
//! The runtime never looks inside player views, actions or debug payloads.
//! A game plugs its schema in by implementing [`Model`] on a marker type;
//! every associated type only has to be serializable with serde.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Payload types of one game.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use codegame_client::Model;
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// pub struct View { pub tick: u32 }
///
/// #[derive(Debug, Clone, PartialEq)]
/// pub struct MyGame;
///
/// impl Model for MyGame {
///     type PlayerView = View;
///     type Action = Vec<u8>;
///     type DebugCommand = String;
///     type DebugData = String;
///     type DebugState = u32;
/// }
/// ```
pub trait Model: 'static {
    /// Snapshot of the game visible to one player.
    type PlayerView: Serialize + DeserializeOwned;
    /// Reply to `GetAction`.
    type Action: Serialize + DeserializeOwned;
    /// Visualization / inspection instruction sent in `DebugMessage`.
    type DebugCommand: Serialize + DeserializeOwned;
    /// Free-form inspection payload sent in `DebugDataMessage`.
    type DebugData: Serialize + DeserializeOwned;
    /// Answer to `RequestDebugState`.
    type DebugState: Serialize + DeserializeOwned;
}
