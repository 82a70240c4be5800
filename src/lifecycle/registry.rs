//! Concrete lifecycle owner driven by host transitions.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use super::{LifecycleOwner, LifecycleState, Transition, TransitionHandler};
use crate::types::{Error, OwnerId, Result, TransitionToken};

struct RegistryState {
    state: LifecycleState,
    handlers: Vec<(TransitionToken, TransitionHandler)>,
}

/// Lifecycle state machine owned by a host component.
///
/// INITIALIZED → CREATED → STARTED → RESUMED, back down through
/// PAUSE/STOP, and finally DESTROYED. Handlers are notified in registration
/// order, with no lock held, after each applied transition. Once DESTROYED
/// all handlers are dropped.
pub struct LifecycleRegistry {
    id: OwnerId,
    name: String,
    inner: Mutex<RegistryState>,
}

impl fmt::Debug for LifecycleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("LifecycleRegistry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("handler_count", &inner.handlers.len())
            .finish()
    }
}

impl LifecycleRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: OwnerId::new(),
            name: name.into(),
            inner: Mutex::new(RegistryState {
                state: LifecycleState::Initialized,
                handlers: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler_count(&self) -> usize {
        self.lock().handlers.len()
    }

    /// Apply a single transition.
    pub fn handle_transition(&self, transition: Transition) -> Result<LifecycleState> {
        let (target, handlers) = {
            let mut inner = self.lock();
            if inner.state != transition.source() {
                tracing::warn!(
                    owner = %self.name,
                    state = %inner.state,
                    ?transition,
                    "rejected lifecycle transition"
                );
                return Err(Error::state_transition(format!(
                    "cannot apply {:?} to {}: state is {}, expected {}",
                    transition,
                    self.name,
                    inner.state,
                    transition.source()
                )));
            }

            inner.state = transition.target();
            let handlers: Vec<TransitionHandler> =
                inner.handlers.iter().map(|(_, h)| h.clone()).collect();
            if inner.state == LifecycleState::Destroyed {
                inner.handlers.clear();
            }
            (inner.state, handlers)
        };

        tracing::debug!(owner = %self.name, ?transition, state = %target, "lifecycle transition");

        for handler in handlers {
            handler(target);
        }
        Ok(target)
    }

    /// Step through every intermediate transition until `target` is reached.
    pub fn move_to(&self, target: LifecycleState) -> Result<LifecycleState> {
        let mut state = self.current_state();
        while state != target {
            let step = Transition::step_towards(state, target).ok_or_else(|| {
                Error::state_transition(format!(
                    "{} cannot move from {} to {}",
                    self.name, state, target
                ))
            })?;
            state = self.handle_transition(step)?;
        }
        Ok(state)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LifecycleOwner for LifecycleRegistry {
    fn owner_id(&self) -> &OwnerId {
        &self.id
    }

    fn current_state(&self) -> LifecycleState {
        self.lock().state
    }

    fn on_transition(&self, handler: TransitionHandler) -> TransitionToken {
        let token = TransitionToken::next();
        let mut inner = self.lock();
        // A destroyed owner never transitions again; keep nothing.
        if inner.state != LifecycleState::Destroyed {
            inner.handlers.push((token, handler));
        }
        token
    }

    fn remove_transition_handler(&self, token: TransitionToken) {
        self.lock().handlers.retain(|(t, _)| *t != token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recording_handler(registry: &LifecycleRegistry) -> Arc<Mutex<Vec<LifecycleState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        registry.on_transition(Arc::new(move |state: LifecycleState| s.lock().unwrap().push(state)));
        seen
    }

    #[test]
    fn test_full_lifecycle() {
        let registry = LifecycleRegistry::new("activity");
        let seen = recording_handler(&registry);

        registry.move_to(LifecycleState::Resumed).unwrap();
        registry.move_to(LifecycleState::Destroyed).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                LifecycleState::Created,
                LifecycleState::Started,
                LifecycleState::Resumed,
                LifecycleState::Started,
                LifecycleState::Created,
                LifecycleState::Destroyed,
            ]
        );
        assert_eq!(registry.handler_count(), 0);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let registry = LifecycleRegistry::new("activity");
        let err = registry.handle_transition(Transition::Start).unwrap_err();
        assert!(matches!(err, Error::StateTransition(_)));
        assert_eq!(registry.current_state(), LifecycleState::Initialized);
    }

    #[test]
    fn test_cannot_leave_destroyed() {
        let registry = LifecycleRegistry::new("activity");
        registry.move_to(LifecycleState::Destroyed).unwrap();
        assert!(registry.move_to(LifecycleState::Started).is_err());
        assert_eq!(registry.current_state(), LifecycleState::Destroyed);
    }

    #[test]
    fn test_removed_handler_not_notified() {
        let registry = LifecycleRegistry::new("activity");
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        let token = registry.on_transition(Arc::new(move |_: LifecycleState| *h.lock().unwrap() += 1));

        registry.handle_transition(Transition::Create).unwrap();
        registry.remove_transition_handler(token);
        registry.remove_transition_handler(token);
        registry.handle_transition(Transition::Start).unwrap();

        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_handler_may_query_state_reentrantly() {
        let registry = Arc::new(LifecycleRegistry::new("activity"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (r, s) = (registry.clone(), seen.clone());
        registry.on_transition(Arc::new(move |_: LifecycleState| s.lock().unwrap().push(r.current_state())));

        registry.handle_transition(Transition::Create).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![LifecycleState::Created]);
    }
}
