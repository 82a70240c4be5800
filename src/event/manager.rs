//! Bulk removal of bindings across events.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::LifecycleEvent;
use crate::types::{BindingId, ManagerId};

/// Type-erased handle that removes one binding from whichever event owns it.
pub(crate) trait Detach: Send + Sync {
    fn detach(&self);
}

pub(crate) struct ManagerShared {
    id: ManagerId,
    bindings: Mutex<HashMap<BindingId, Box<dyn Detach>>>,
}

impl ManagerShared {
    fn lock(&self) -> MutexGuard<'_, HashMap<BindingId, Box<dyn Detach>>> {
        self.bindings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop bookkeeping for a binding that was removed by its event.
    pub(crate) fn forget(&self, id: BindingId) {
        self.lock().remove(&id);
    }
}

/// Removal-trigger aggregator.
///
/// Holds no values. Bindings registered through it (directly or via
/// [`LifecycleEvent::observe_managed`]) are detached from their events, of
/// any value type, by a single [`clear_all_observer`](Self::clear_all_observer).
/// Cloning yields another handle to the same set.
#[derive(Clone)]
pub struct AutoRemoveObserverManager {
    shared: Arc<ManagerShared>,
}

impl fmt::Debug for AutoRemoveObserverManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoRemoveObserverManager")
            .field("id", &self.shared.id)
            .field("managed", &self.len())
            .finish()
    }
}

impl Default for AutoRemoveObserverManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoRemoveObserverManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ManagerShared {
                id: ManagerId::new(),
                bindings: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn id(&self) -> &ManagerId {
        &self.shared.id
    }

    /// Put an existing binding of `event` under this manager.
    ///
    /// Returns false when the event has no such binding.
    pub fn register<T>(&self, event: &LifecycleEvent<T>, id: BindingId) -> bool
    where
        T: Clone + Send + 'static,
    {
        if !event.attach_manager(id, Arc::downgrade(&self.shared)) {
            return false;
        }
        self.insert(id, event.detacher(id));
        true
    }

    pub(crate) fn insert(&self, id: BindingId, detacher: Box<dyn Detach>) {
        self.shared.lock().insert(id, detacher);
    }

    pub(crate) fn downgrade(&self) -> Weak<ManagerShared> {
        Arc::downgrade(&self.shared)
    }

    /// Stop managing a binding without detaching it.
    pub fn unregister(&self, id: BindingId) -> bool {
        self.shared.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: BindingId) -> bool {
        self.shared.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detach every managed binding and empty the set.
    ///
    /// Returns the number of bindings detached.
    pub fn clear_all_observer(&self) -> usize {
        let drained: Vec<(BindingId, Box<dyn Detach>)> = self.shared.lock().drain().collect();
        let count = drained.len();
        for (_, detacher) in drained {
            detacher.detach();
        }
        tracing::debug!(manager = %self.shared.id, count, "cleared managed observers");
        count
    }
}
