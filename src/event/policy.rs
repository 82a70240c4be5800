//! Replay policy and activation range for lifecycle events.

use serde::{Deserialize, Serialize};

use crate::lifecycle::LifecycleState;
use crate::types::{Error, Result};

/// How an already-published value is replayed to bindings registered after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum ReplayPolicy {
    /// Registrants only see values published after they register.
    NoSticky,
    /// Every registrant receives the current value once.
    #[default]
    StickyForever,
    /// The first `n` registrations after a publish receive the current value.
    StickyCount(usize),
    /// The current value is replayed only while nobody has consumed it yet.
    SendOnce,
}

impl ReplayPolicy {
    pub fn sticky_count(count: usize) -> Result<Self> {
        let policy = ReplayPolicy::StickyCount(count);
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ReplayPolicy::StickyCount(0) => Err(Error::validation(
                "sticky count must be at least 1, use NoSticky to disable replay",
            )),
            _ => Ok(()),
        }
    }

    /// Registration budget granted to each newly published version.
    pub(crate) fn budget(&self) -> usize {
        match self {
            ReplayPolicy::StickyCount(n) => *n,
            _ => 0,
        }
    }
}

/// Lifecycle states in which an owner-bound binding receives values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveRange {
    /// Any state except DESTROYED.
    #[default]
    Alive,
    /// STARTED or RESUMED.
    Started,
    /// RESUMED only; bindings go inactive on pause.
    Resumed,
}

impl ActiveRange {
    pub fn contains(self, state: LifecycleState) -> bool {
        match self {
            ActiveRange::Alive => state != LifecycleState::Destroyed,
            ActiveRange::Started => state.is_at_least(LifecycleState::Started),
            ActiveRange::Resumed => state.is_at_least(LifecycleState::Resumed),
        }
    }
}

/// Per-event configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventOptions {
    #[serde(default)]
    pub replay: ReplayPolicy,

    #[serde(default)]
    pub active_range: ActiveRange,
}

impl EventOptions {
    pub fn new(replay: ReplayPolicy, active_range: ActiveRange) -> Self {
        Self {
            replay,
            active_range,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.replay.validate()
    }
}
