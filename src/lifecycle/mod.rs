//! Lifecycle host contract.
//!
//! A lifecycle owner exposes its current state and notifies handlers on every
//! state transition. Events bind observers to an owner so that the binding is
//! active only inside an [`ActiveRange`](crate::event::ActiveRange) and is
//! removed when the owner reaches [`LifecycleState::Destroyed`].
//!
//! States are ordered like a component's lifecycle:
//! DESTROYED < INITIALIZED < CREATED < STARTED < RESUMED

mod registry;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::types::{OwnerId, TransitionToken};

pub use registry::LifecycleRegistry;

/// Lifecycle state of an owner. Ordering follows the enum declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Destroyed,
    Initialized,
    Created,
    Started,
    Resumed,
}

impl LifecycleState {
    pub fn is_at_least(self, other: LifecycleState) -> bool {
        self >= other
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Destroyed => "DESTROYED",
            LifecycleState::Initialized => "INITIALIZED",
            LifecycleState::Created => "CREATED",
            LifecycleState::Started => "STARTED",
            LifecycleState::Resumed => "RESUMED",
        };
        f.write_str(name)
    }
}

/// Lifecycle transition issued by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Create,
    Start,
    Resume,
    Pause,
    Stop,
    Destroy,
}

impl Transition {
    /// State the owner must be in for this transition to apply.
    pub fn source(self) -> LifecycleState {
        match self {
            Transition::Create => LifecycleState::Initialized,
            Transition::Start | Transition::Destroy => LifecycleState::Created,
            Transition::Resume | Transition::Stop => LifecycleState::Started,
            Transition::Pause => LifecycleState::Resumed,
        }
    }

    /// State the owner is in once the transition has applied.
    pub fn target(self) -> LifecycleState {
        match self {
            Transition::Create | Transition::Stop => LifecycleState::Created,
            Transition::Start | Transition::Pause => LifecycleState::Started,
            Transition::Resume => LifecycleState::Resumed,
            Transition::Destroy => LifecycleState::Destroyed,
        }
    }

    /// Next single step on the way from `from` to `to`, if any.
    pub fn step_towards(from: LifecycleState, to: LifecycleState) -> Option<Transition> {
        use LifecycleState::*;
        // INITIALIZED is never re-entered and nothing leaves DESTROYED.
        if from == to || from == Destroyed || to == Initialized {
            return None;
        }
        let step = match (from, to) {
            (Initialized, _) => Transition::Create,
            (Created, Destroyed) => Transition::Destroy,
            (Created, _) => Transition::Start,
            (Started, Resumed) => Transition::Resume,
            (Started, _) => Transition::Stop,
            (Resumed, _) => Transition::Pause,
            (Destroyed, _) => return None,
        };
        Some(step)
    }
}

/// Callback invoked with the owner's new state after each transition.
pub type TransitionHandler = Arc<dyn Fn(LifecycleState) + Send + Sync>;

/// Capability a host exposes so events can bind observers to its lifecycle.
pub trait LifecycleOwner: Send + Sync {
    /// Identity used as a removal key.
    fn owner_id(&self) -> &OwnerId;

    fn current_state(&self) -> LifecycleState;

    /// Subscribe to state transitions.
    fn on_transition(&self, handler: TransitionHandler) -> TransitionToken;

    /// Unsubscribe a handler. Unknown tokens are ignored.
    fn remove_transition_handler(&self, token: TransitionToken);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering() {
        assert!(LifecycleState::Resumed.is_at_least(LifecycleState::Started));
        assert!(LifecycleState::Created.is_at_least(LifecycleState::Initialized));
        assert!(!LifecycleState::Destroyed.is_at_least(LifecycleState::Initialized));
    }

    #[test]
    fn test_transition_source_and_target_chain() {
        for t in [
            Transition::Create,
            Transition::Start,
            Transition::Resume,
            Transition::Pause,
            Transition::Stop,
            Transition::Destroy,
        ] {
            assert_ne!(t.source(), t.target());
            assert_eq!(Transition::step_towards(t.source(), t.target()), Some(t));
        }
    }

    #[test]
    fn test_step_towards_from_resumed_to_destroyed() {
        let mut state = LifecycleState::Resumed;
        let mut steps = Vec::new();
        while let Some(step) = Transition::step_towards(state, LifecycleState::Destroyed) {
            steps.push(step);
            state = step.target();
        }
        assert_eq!(
            steps,
            vec![Transition::Pause, Transition::Stop, Transition::Destroy]
        );
    }
}
