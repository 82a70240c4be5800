//! Lifecycle-aware single-slot events.
//!
//! A [`LifecycleEvent`] stores the most recent value together with a version
//! counter and delivers it to bindings in registration order. Each binding
//! remembers the last version it consumed, so a value is delivered to a
//! binding at most once. The [`ReplayPolicy`] decides whether a binding that
//! registers after a publish still receives the current value.
//!
//! Bindings come in three scopes:
//! - **Lifecycle**: active while the owner's state is inside the event's
//!   [`ActiveRange`], removed when the owner is destroyed.
//! - **Managed**: always active, removed in bulk by an
//!   [`AutoRemoveObserverManager`].
//! - **Forever**: always active until [`LifecycleEvent::remove_observer`].
//!
//! All mutation and delivery happen on the dispatcher's thread. Calls made
//! from other threads are posted to the dispatcher and return immediately.

mod manager;
mod policy;

pub use manager::AutoRemoveObserverManager;
pub use policy::{ActiveRange, EventOptions, ReplayPolicy};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use manager::{Detach, ManagerShared};

use crate::dispatch::Dispatcher;
use crate::lifecycle::{LifecycleOwner, LifecycleState, TransitionHandler};
use crate::types::{BindingId, Config, Result, TransitionToken};

/// Observer callback.
pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Called with `true` when the first binding becomes active and with `false`
/// when the last active binding goes inactive or is removed.
pub type ActiveHook = Arc<dyn Fn(bool) + Send + Sync>;

/// What a new binding is tied to.
#[derive(Clone)]
pub enum ObserveScope {
    Lifecycle(Arc<dyn LifecycleOwner>),
    Managed(AutoRemoveObserverManager),
    Forever,
}

impl ObserveScope {
    pub fn lifecycle<O: LifecycleOwner + 'static>(owner: Arc<O>) -> Self {
        ObserveScope::Lifecycle(owner)
    }
}

impl fmt::Debug for ObserveScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserveScope::Lifecycle(owner) => f
                .debug_tuple("Lifecycle")
                .field(owner.owner_id())
                .finish(),
            ObserveScope::Managed(manager) => f.debug_tuple("Managed").field(manager.id()).finish(),
            ObserveScope::Forever => f.write_str("Forever"),
        }
    }
}

enum Scope {
    Lifecycle {
        owner: Arc<dyn LifecycleOwner>,
        token: TransitionToken,
    },
    Forever,
}

struct Binding<T> {
    id: BindingId,
    observer: Observer<T>,
    /// Last version delivered, or deliberately skipped at registration.
    last_seen: u64,
    /// Event version at the moment the binding was inserted.
    joined_at: u64,
    active: bool,
    scope: Scope,
    manager: Option<Weak<ManagerShared>>,
}

enum Request {
    Live,
    Replay(BindingId),
}

type Delivery<T> = (Observer<T>, T, BindingId, u64);

struct EventState<T> {
    value: Option<T>,
    version: u64,
    /// Registrations still entitled to a replay of the current version.
    replay_budget: usize,
    /// Deliveries of the current version so far.
    consumed: usize,
    /// Keyed by insertion slot, so iteration order is delivery order.
    bindings: BTreeMap<u64, Binding<T>>,
    slots: HashMap<BindingId, u64>,
    next_slot: u64,
    active_count: usize,
    dispatching: bool,
    /// A publish pass is running; activations fold into it.
    in_live_pass: bool,
    invalidated: bool,
    pending_replays: VecDeque<BindingId>,
}

impl<T: Clone> EventState<T> {
    fn new() -> Self {
        Self {
            value: None,
            version: 0,
            replay_budget: 0,
            consumed: 0,
            bindings: BTreeMap::new(),
            slots: HashMap::new(),
            next_slot: 0,
            active_count: 0,
            dispatching: false,
            in_live_pass: false,
            invalidated: false,
            pending_replays: VecDeque::new(),
        }
    }

    /// Adjust the active count. Returns the new `has_active_observers` value
    /// when it flipped.
    fn track_active(&mut self, active: bool) -> Option<bool> {
        let before = self.active_count > 0;
        if active {
            self.active_count += 1;
        } else {
            self.active_count -= 1;
        }
        let after = self.active_count > 0;
        (before != after).then_some(after)
    }

    /// Initial `last_seen` for a binding registered now.
    fn registration_mark(&mut self, policy: ReplayPolicy) -> u64 {
        if self.version == 0 {
            return 0;
        }
        match policy {
            ReplayPolicy::NoSticky => self.version,
            ReplayPolicy::StickyForever | ReplayPolicy::SendOnce => 0,
            ReplayPolicy::StickyCount(_) => {
                if self.replay_budget > 0 {
                    self.replay_budget -= 1;
                    0
                } else {
                    self.version
                }
            }
        }
    }

    /// Decide whether the binding at `slot` gets the current value, and
    /// record the delivery if so. `live` is true inside a publish pass.
    /// `flipped` receives the activity change if the binding had to be
    /// deactivated.
    fn consider(
        &mut self,
        slot: u64,
        live: bool,
        options: &EventOptions,
        flipped: &mut Option<bool>,
    ) -> Option<Delivery<T>> {
        let version = self.version;
        let binding = self.bindings.get_mut(&slot)?;
        if !binding.active {
            return None;
        }

        // The owner may have left the active range before its handler ran.
        if let Scope::Lifecycle { owner, .. } = &binding.scope {
            if !options.active_range.contains(owner.current_state()) {
                binding.active = false;
                *flipped = self.track_active(false);
                return None;
            }
        }

        if binding.last_seen >= version {
            return None;
        }
        let value = self.value.as_ref()?;

        let present_at_publish = binding.joined_at < version;
        if options.replay == ReplayPolicy::SendOnce
            && self.consumed > 0
            && !(live && present_at_publish)
        {
            binding.last_seen = version;
            return None;
        }

        binding.last_seen = version;
        self.consumed += 1;
        Some((binding.observer.clone(), value.clone(), binding.id, version))
    }
}

struct Shared<T> {
    label: String,
    options: EventOptions,
    dispatcher: Arc<dyn Dispatcher>,
    state: Mutex<EventState<T>>,
    /// Value waiting for a queued `post_value` task.
    posted: Mutex<Option<T>>,
    active_hook: Mutex<Option<ActiveHook>>,
}

/// Resets dispatch bookkeeping even if an observer panics.
struct DispatchGuard<'a, T> {
    shared: &'a Shared<T>,
}

impl<T> Drop for DispatchGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.dispatching = false;
        state.in_live_pass = false;
        state.invalidated = false;
        state.pending_replays.clear();
    }
}

/// Single-slot, lifecycle-aware event holder.
///
/// Cloning yields another handle to the same event.
pub struct LifecycleEvent<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for LifecycleEvent<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for LifecycleEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f.debug_struct("LifecycleEvent")
            .field("label", &self.shared.label)
            .field("options", &self.shared.options)
            .field("version", &state.version)
            .field("observers", &state.bindings.len())
            .field("active_observers", &state.active_count)
            .finish()
    }
}

impl<T: Clone + Send + 'static> LifecycleEvent<T> {
    /// Event with default options: sticky forever, active while alive.
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::build("event", dispatcher, EventOptions::default())
    }

    pub fn with_options(dispatcher: Arc<dyn Dispatcher>, options: EventOptions) -> Result<Self> {
        Self::named("event", dispatcher, options)
    }

    /// Event with a label used in log output.
    pub fn named(
        label: impl Into<String>,
        dispatcher: Arc<dyn Dispatcher>,
        options: EventOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self::build(label, dispatcher, options))
    }

    pub fn from_config(dispatcher: Arc<dyn Dispatcher>, config: &Config) -> Result<Self> {
        Self::with_options(dispatcher, config.defaults)
    }

    fn build(label: impl Into<String>, dispatcher: Arc<dyn Dispatcher>, options: EventOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                options,
                dispatcher,
                state: Mutex::new(EventState::new()),
                posted: Mutex::new(None),
                active_hook: Mutex::new(None),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn options(&self) -> EventOptions {
        self.shared.options
    }

    /// Install a hook fired when the event gains its first active binding
    /// or loses its last one. Replaces any previous hook.
    pub fn on_active_change<F>(&self, hook: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        *self
            .shared
            .active_hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(hook));
    }

    fn active_changed(&self, flipped: Option<bool>) {
        let Some(active) = flipped else {
            return;
        };
        let hook = self
            .shared
            .active_hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        tracing::trace!(event = %self.shared.label, active, "activity changed");
        if let Some(hook) = hook {
            hook(active);
        }
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Store `value`, bump the version and deliver to every active binding.
    ///
    /// Runs inline on the dispatch thread, otherwise posts and returns.
    pub fn publish(&self, value: T) -> Result<()> {
        self.run_or_post(move |event| event.publish_now(value))
    }

    /// Always post. Values posted before the queue runs coalesce, so only the
    /// last one is published.
    pub fn post_value(&self, value: T) -> Result<()> {
        let needs_task = {
            let mut posted = self.lock_posted();
            let was_empty = posted.is_none();
            *posted = Some(value);
            was_empty
        };
        if !needs_task {
            return Ok(());
        }

        let event = self.clone();
        let result = self.shared.dispatcher.post(Box::new(move || {
            let value = event.lock_posted().take();
            if let Some(value) = value {
                event.publish_now(value);
            }
        }));
        if result.is_err() {
            self.lock_posted().take();
        }
        result
    }

    fn publish_now(&self, value: T) {
        let (version, active) = {
            let mut state = self.lock();
            state.version += 1;
            state.value = Some(value);
            state.consumed = 0;
            state.replay_budget = self.shared.options.replay.budget();
            (state.version, state.active_count)
        };
        tracing::debug!(event = %self.shared.label, version, active, "publish");
        self.dispatch(Request::Live);
    }

    // =========================================================================
    // Observing
    // =========================================================================

    /// Bind `observer` to a lifecycle owner.
    pub fn observe_lifecycle<O, F>(&self, owner: Arc<O>, observer: F) -> Result<BindingId>
    where
        O: LifecycleOwner + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.observe(ObserveScope::lifecycle(owner), Arc::new(observer))
    }

    /// Register an always-active binding removed only explicitly.
    pub fn observe_forever<F>(&self, observer: F) -> Result<BindingId>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.observe(ObserveScope::Forever, Arc::new(observer))
    }

    /// Register an always-active binding removed by `manager`.
    pub fn observe_managed<F>(&self, manager: &AutoRemoveObserverManager, observer: F) -> Result<BindingId>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.observe(ObserveScope::Managed(manager.clone()), Arc::new(observer))
    }

    /// Register `observer` under `scope`.
    ///
    /// The id is returned immediately; off the dispatch thread the
    /// registration itself is queued. Registering against a destroyed owner
    /// is a silent no-op.
    pub fn observe(&self, scope: ObserveScope, observer: Observer<T>) -> Result<BindingId> {
        let id = BindingId::next();
        self.run_or_post(move |event| event.observe_now(id, scope, observer))?;
        Ok(id)
    }

    fn observe_now(&self, id: BindingId, scope: ObserveScope, observer: Observer<T>) {
        let (scope, manager, initially_active) = match scope {
            ObserveScope::Lifecycle(owner) => {
                let state = owner.current_state();
                if state == LifecycleState::Destroyed {
                    tracing::debug!(
                        event = %self.shared.label,
                        binding = %id,
                        owner = %owner.owner_id(),
                        "owner destroyed, registration ignored"
                    );
                    return;
                }
                let token = owner.on_transition(self.transition_handler(id));
                let active = self.shared.options.active_range.contains(state);
                (Scope::Lifecycle { owner, token }, None, active)
            }
            ObserveScope::Managed(manager) => (Scope::Forever, Some(manager), true),
            ObserveScope::Forever => (Scope::Forever, None, true),
        };

        {
            let mut state = self.lock();
            let joined_at = state.version;
            let last_seen = state.registration_mark(self.shared.options.replay);
            let slot = state.next_slot;
            state.next_slot += 1;
            state.slots.insert(id, slot);
            state.bindings.insert(
                slot,
                Binding {
                    id,
                    observer,
                    last_seen,
                    joined_at,
                    active: false,
                    scope,
                    manager: manager.as_ref().map(AutoRemoveObserverManager::downgrade),
                },
            );
        }

        if let Some(manager) = manager {
            manager.insert(id, self.detacher(id));
        }

        tracing::debug!(event = %self.shared.label, binding = %id, "observer registered");
        self.set_active(id, initially_active);
    }

    fn transition_handler(&self, id: BindingId) -> TransitionHandler {
        let weak = Arc::downgrade(&self.shared);
        Arc::new(move |state: LifecycleState| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let event = LifecycleEvent { shared };
            if let Err(err) = event.run_or_post(move |event| event.on_owner_state(id, state)) {
                tracing::warn!(binding = %id, %err, "dropped lifecycle transition");
            }
        })
    }

    fn on_owner_state(&self, id: BindingId, state: LifecycleState) {
        if state == LifecycleState::Destroyed {
            self.remove_now(id);
        } else {
            self.set_active(id, self.shared.options.active_range.contains(state));
        }
    }

    fn set_active(&self, id: BindingId, active: bool) {
        let flipped = {
            let mut state = self.lock();
            let Some(slot) = state.slots.get(&id).copied() else {
                return;
            };
            let Some(binding) = state.bindings.get_mut(&slot) else {
                return;
            };
            if binding.active == active {
                return;
            }
            binding.active = active;
            state.track_active(active)
        };

        tracing::trace!(event = %self.shared.label, binding = %id, active, "active state changed");
        self.active_changed(flipped);
        if active {
            self.dispatch(Request::Replay(id));
        }
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Detach a binding. Idempotent.
    pub fn remove_observer(&self, id: BindingId) -> Result<()> {
        self.run_or_post(move |event| {
            event.remove_now(id);
        })
    }

    /// Detach every binding bound to `owner`.
    pub fn remove_observers(&self, owner: &dyn LifecycleOwner) -> Result<()> {
        let owner_id = owner.owner_id().clone();
        self.run_or_post(move |event| {
            let ids: Vec<BindingId> = event
                .lock()
                .bindings
                .values()
                .filter(|binding| {
                    matches!(&binding.scope, Scope::Lifecycle { owner, .. } if owner.owner_id() == &owner_id)
                })
                .map(|binding| binding.id)
                .collect();
            for id in ids {
                event.remove_now(id);
            }
        })
    }

    fn remove_now(&self, id: BindingId) -> bool {
        let (removed, flipped) = {
            let mut state = self.lock();
            let Some(slot) = state.slots.remove(&id) else {
                return false;
            };
            let Some(binding) = state.bindings.remove(&slot) else {
                return false;
            };
            let flipped = if binding.active {
                state.track_active(false)
            } else {
                None
            };
            (binding, flipped)
        };

        if let Scope::Lifecycle { owner, token } = &removed.scope {
            owner.remove_transition_handler(*token);
        }
        if let Some(manager) = removed.manager.as_ref().and_then(Weak::upgrade) {
            manager.forget(id);
        }

        tracing::debug!(event = %self.shared.label, binding = %id, "observer removed");
        self.active_changed(flipped);
        true
    }

    /// Move the binding under `manager`. A binding has at most one manager;
    /// the previous one forgets it.
    pub(crate) fn attach_manager(&self, id: BindingId, manager: Weak<ManagerShared>) -> bool {
        let previous = {
            let mut state = self.lock();
            let Some(slot) = state.slots.get(&id).copied() else {
                return false;
            };
            let Some(binding) = state.bindings.get_mut(&slot) else {
                return false;
            };
            binding.manager.replace(manager.clone())
        };

        if let Some(previous) = previous.filter(|previous| !previous.ptr_eq(&manager)) {
            if let Some(previous) = previous.upgrade() {
                previous.forget(id);
            }
        }
        true
    }

    pub(crate) fn detacher(&self, id: BindingId) -> Box<dyn Detach> {
        Box::new(EventDetacher {
            event: Arc::downgrade(&self.shared),
            id,
        })
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    fn dispatch(&self, request: Request) {
        {
            let mut state = self.lock();
            if state.dispatching {
                // Nested request from inside an observer: fold it into the
                // running dispatch instead of delivering out of order.
                // An activation during a publish pass restarts the pass, so
                // the binding is served as if it had been active at publish.
                match request {
                    Request::Live => state.invalidated = true,
                    Request::Replay(_) if state.in_live_pass => state.invalidated = true,
                    Request::Replay(id) => state.pending_replays.push_back(id),
                }
                return;
            }
            state.dispatching = true;
        }
        let _guard = DispatchGuard {
            shared: &self.shared,
        };

        let mut next = Some(request);
        while let Some(request) = next.take() {
            match request {
                Request::Live => {
                    self.lock().in_live_pass = true;
                    self.live_pass();
                    self.lock().in_live_pass = false;
                }
                Request::Replay(id) => self.replay(id),
            }
            let mut state = self.lock();
            next = if std::mem::take(&mut state.invalidated) {
                Some(Request::Live)
            } else {
                state.pending_replays.pop_front().map(Request::Replay)
            };
        }
    }

    /// Deliver the current version to every active binding in slot order.
    /// Stops early when a newer publish invalidates the pass.
    fn live_pass(&self) {
        let mut after: Option<u64> = None;
        loop {
            let mut flipped = None;
            let delivery = {
                let mut state = self.lock();
                if state.invalidated {
                    return;
                }
                let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
                let Some(slot) = state
                    .bindings
                    .range((lower, Bound::Unbounded))
                    .next()
                    .map(|(slot, _)| *slot)
                else {
                    return;
                };
                after = Some(slot);
                state.consider(slot, true, &self.shared.options, &mut flipped)
            };
            self.active_changed(flipped);
            if let Some(delivery) = delivery {
                self.deliver(delivery);
            }
        }
    }

    fn replay(&self, id: BindingId) {
        let mut flipped = None;
        let delivery = {
            let mut state = self.lock();
            let Some(slot) = state.slots.get(&id).copied() else {
                return;
            };
            state.consider(slot, false, &self.shared.options, &mut flipped)
        };
        self.active_changed(flipped);
        if let Some(delivery) = delivery {
            self.deliver(delivery);
        }
    }

    fn deliver(&self, (observer, value, id, version): Delivery<T>) {
        tracing::trace!(event = %self.shared.label, binding = %id, version, "deliver");
        observer(&value);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Latest published value.
    pub fn value(&self) -> Option<T> {
        self.lock().value.clone()
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn has_observers(&self) -> bool {
        !self.lock().bindings.is_empty()
    }

    pub fn has_active_observers(&self) -> bool {
        self.lock().active_count > 0
    }

    pub fn observer_count(&self) -> usize {
        self.lock().bindings.len()
    }

    pub fn is_observing(&self, id: BindingId) -> bool {
        self.lock().slots.contains_key(&id)
    }

    pub fn is_active(&self, id: BindingId) -> bool {
        let state = self.lock();
        state
            .slots
            .get(&id)
            .and_then(|slot| state.bindings.get(slot))
            .is_some_and(|binding| binding.active)
    }

    fn run_or_post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&LifecycleEvent<T>) + Send + 'static,
    {
        if self.shared.dispatcher.is_dispatch_thread() {
            f(self);
            return Ok(());
        }
        let event = self.clone();
        self.shared.dispatcher.post(Box::new(move || f(&event)))
    }

    fn lock(&self) -> MutexGuard<'_, EventState<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_posted(&self) -> MutexGuard<'_, Option<T>> {
        self.shared
            .posted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct EventDetacher<T> {
    event: Weak<Shared<T>>,
    id: BindingId,
}

impl<T: Clone + Send + 'static> Detach for EventDetacher<T> {
    fn detach(&self) {
        let Some(shared) = self.event.upgrade() else {
            return;
        };
        let event = LifecycleEvent { shared };
        if let Err(err) = event.remove_observer(self.id) {
            tracing::warn!(binding = %self.id, %err, "failed to detach managed observer");
        }
    }
}
