//! # Lifecycle Event - lifecycle-aware single-slot events
//!
//! Event holders that retain their latest value and deliver it to observers
//! bound to a host lifecycle:
//! - Versioned single-slot storage with at-most-once delivery per observer
//! - Replay policies: no-sticky, sticky-forever, sticky-count, send-once
//! - Lifecycle-bound observers that follow owner state and auto-remove on destroy
//! - Bulk observer removal through an auto-remove manager
//! - Serial dispatch queue so every delivery happens on one thread
//!
//! ## Architecture
//!
//! ```text
//!   any thread ── publish ──▶ ┌──────────────┐
//!                             │  MainQueue   │ (serial, one thread)
//!                             └──────┬───────┘
//!                                    ▼
//!   ┌───────────────────┐   ┌─────────────────┐   ┌──────────────────────────┐
//!   │ LifecycleRegistry │──▶│ LifecycleEvent  │◀──│ AutoRemoveObserverManager│
//!   │  (owner states)   │   │ value + version │   │   (bulk detach)          │
//!   └───────────────────┘   └────────┬────────┘   └──────────────────────────┘
//!                                    ▼
//!                        observers, registration order
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod dispatch;
pub mod event;
pub mod lifecycle;
pub mod types;

// Internal utilities
pub mod observability;

pub use dispatch::{Dispatcher, MainQueue};
pub use event::{
    ActiveHook, ActiveRange, AutoRemoveObserverManager, EventOptions, LifecycleEvent,
    ObserveScope, ReplayPolicy,
};
pub use lifecycle::{LifecycleOwner, LifecycleRegistry, LifecycleState, Transition};
pub use types::{BindingId, Config, Error, Result};
