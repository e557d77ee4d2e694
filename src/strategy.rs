//! Player Strategy
//!
//! The contract between the runtime and user code: one callback per action
//! request and one optional callback per debug update.

use std::marker::PhantomData;

use crate::model::Model;
use crate::network::debug::{DebugInterface, DebugSession};

/// User-supplied decision logic.
///
/// Errors are returned as [`anyhow::Error`] and end the session unmodified.
pub trait Strategy<M: Model> {
    /// Decide the action for this tick.
    ///
    /// The runner always passes a handle. In the optional-view revision it
    /// only carries debug data; see [`DebugInterface::supports_commands`].
    fn get_action(
        &mut self,
        view: &M::PlayerView,
        debug: Option<&mut DebugInterface<'_, M>>,
    ) -> anyhow::Result<M::Action>;

    /// React to a debug refresh. Does nothing unless overridden.
    fn debug_update(
        &mut self,
        view: &M::PlayerView,
        debug: &mut DebugSession<'_, M>,
    ) -> anyhow::Result<()> {
        let _ = (view, debug);
        Ok(())
    }
}

impl<M: Model, S: Strategy<M> + ?Sized> Strategy<M> for Box<S> {
    fn get_action(
        &mut self,
        view: &M::PlayerView,
        debug: Option<&mut DebugInterface<'_, M>>,
    ) -> anyhow::Result<M::Action> {
        (**self).get_action(view, debug)
    }

    fn debug_update(
        &mut self,
        view: &M::PlayerView,
        debug: &mut DebugSession<'_, M>,
    ) -> anyhow::Result<()> {
        (**self).debug_update(view, debug)
    }
}

/// Strategy that answers every request with the default action.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleStrategy;

impl<M: Model> Strategy<M> for IdleStrategy
where
    M::Action: Default,
{
    fn get_action(
        &mut self,
        _view: &M::PlayerView,
        _debug: Option<&mut DebugInterface<'_, M>>,
    ) -> anyhow::Result<M::Action> {
        Ok(M::Action::default())
    }
}

/// Strategy built from a closure. See [`from_fn`].
pub struct FnStrategy<M, F> {
    f: F,
    _model: PhantomData<fn() -> M>,
}

/// Build a strategy whose `get_action` is `f` and whose debug updates are ignored.
pub fn from_fn<M, F>(f: F) -> FnStrategy<M, F>
where
    M: Model,
    F: FnMut(&M::PlayerView) -> anyhow::Result<M::Action>,
{
    FnStrategy {
        f,
        _model: PhantomData,
    }
}

impl<M, F> Strategy<M> for FnStrategy<M, F>
where
    M: Model,
    F: FnMut(&M::PlayerView) -> anyhow::Result<M::Action>,
{
    fn get_action(
        &mut self,
        view: &M::PlayerView,
        _debug: Option<&mut DebugInterface<'_, M>>,
    ) -> anyhow::Result<M::Action> {
        (self.f)(view)
    }
}
