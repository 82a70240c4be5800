//! Lifecycle event demo - replays a component's create/start/resume/pause
//! sequence against a set of events and logs every delivery.
//!
//! Each scenario highlights one behaviour:
//! - sticky: value published from a background thread, observed later
//! - no_sticky: late registrant sees nothing
//! - sticky_count: only the first late registrant gets a replay
//! - active_forever / not_forever: delivery in CREATED vs after STARTED
//! - send_once: a consumed value is not replayed
//! - auto_remove: managed observers are cleared on pause

use clap::Parser;
use std::sync::Arc;

use lifecycle_event::observability::init_tracing_with;
use lifecycle_event::{
    ActiveRange, AutoRemoveObserverManager, Config, Dispatcher, EventOptions, LifecycleEvent,
    LifecycleOwner, LifecycleRegistry, LifecycleState, MainQueue, ReplayPolicy, Transition,
};

#[derive(Debug, Parser)]
#[command(name = "lifecycle-event-demo", about = "Replay lifecycle event scenarios")]
struct Args {
    /// Optional JSON config file.
    #[arg(long, env = "LIFECYCLE_EVENT_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Override the log level.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs.
    #[arg(long)]
    json: bool,

    /// Stop and destroy the owner after the pause step.
    #[arg(long)]
    destroy: bool,
}

struct Scenario {
    queue: Arc<MainQueue>,
    owner: Arc<LifecycleRegistry>,
    manager: AutoRemoveObserverManager,
    sticky: LifecycleEvent<i32>,
    no_sticky: LifecycleEvent<i32>,
    sticky_count: LifecycleEvent<i32>,
    active_forever: LifecycleEvent<i32>,
    not_forever: LifecycleEvent<i32>,
    send_once: LifecycleEvent<i32>,
    send_once_alive: LifecycleEvent<i32>,
    auto_remove: LifecycleEvent<i32>,
}

impl Scenario {
    fn new() -> lifecycle_event::Result<Self> {
        let queue = Arc::new(MainQueue::new());
        let dispatcher: Arc<dyn Dispatcher> = queue.clone();
        let make = |label: &str, replay, range| {
            LifecycleEvent::named(label, dispatcher.clone(), EventOptions::new(replay, range))
        };

        let auto_remove = make("auto_remove", ReplayPolicy::StickyForever, ActiveRange::Alive)?;
        auto_remove.publish(0)?;

        Ok(Self {
            owner: Arc::new(LifecycleRegistry::new("main_activity")),
            manager: AutoRemoveObserverManager::new(),
            sticky: make("sticky", ReplayPolicy::StickyForever, ActiveRange::Alive)?,
            no_sticky: make("no_sticky", ReplayPolicy::NoSticky, ActiveRange::Alive)?,
            sticky_count: make("sticky_count", ReplayPolicy::sticky_count(1)?, ActiveRange::Alive)?,
            active_forever: make("active_forever", ReplayPolicy::StickyForever, ActiveRange::Alive)?,
            not_forever: make("not_forever", ReplayPolicy::StickyForever, ActiveRange::Started)?,
            send_once: make("send_once", ReplayPolicy::SendOnce, ActiveRange::Started)?,
            send_once_alive: make("send_once_alive", ReplayPolicy::SendOnce, ActiveRange::Alive)?,
            auto_remove,
            queue,
        })
    }

    fn log(&self, scenario: &'static str, message: &'static str) -> impl Fn(&i32) + Send + Sync + 'static {
        let owner = self.owner.clone();
        move |value: &i32| {
            tracing::info!(scenario, value = *value, state = %owner.current_state(), "{message}");
        }
    }

    fn on_create(&self) -> lifecycle_event::Result<()> {
        self.sticky_from_background()?;

        self.no_sticky
            .observe_lifecycle(self.owner.clone(), self.log("no_sticky", "registered before set"))?;
        self.no_sticky.publish(0)?;
        self.no_sticky
            .observe_lifecycle(self.owner.clone(), self.log("no_sticky", "registered after set"))?;

        self.sticky_count
            .observe_lifecycle(self.owner.clone(), self.log("sticky_count", "registered before set"))?;
        self.sticky_count.publish(1)?;
        self.sticky_count
            .observe_lifecycle(self.owner.clone(), self.log("sticky_count", "first sticky replay"))?;
        self.sticky_count
            .observe_lifecycle(self.owner.clone(), self.log("sticky_count", "second sticky replay"))?;

        self.active_forever
            .observe_lifecycle(self.owner.clone(), self.log("active_forever", "delivered while created"))?;
        self.not_forever
            .observe_lifecycle(self.owner.clone(), self.log("not_forever", "delivered once started"))?;
        self.active_forever.publish(1)?;
        self.not_forever.publish(1)?;

        self.send_once
            .observe_lifecycle(self.owner.clone(), self.log("send_once", "event one, first observer"))?;
        self.send_once.publish(1)?;
        self.send_once
            .observe_lifecycle(self.owner.clone(), self.log("send_once", "event one, second observer"))?;
        self.send_once_alive
            .observe_lifecycle(self.owner.clone(), self.log("send_once", "event two, first observer"))?;
        self.send_once_alive.publish(1)?;
        self.send_once_alive
            .observe_lifecycle(self.owner.clone(), self.log("send_once", "event two, second observer"))?;

        self.auto_remove.observe_managed(
            &self.manager,
            self.log("auto_remove", "not delivered after pause"),
        )?;
        Ok(())
    }

    /// Publish from a worker thread, then queue an observer registration
    /// behind it.
    fn sticky_from_background(&self) -> lifecycle_event::Result<()> {
        let sticky = self.sticky.clone();
        let queue = self.queue.clone();
        let owner = self.owner.clone();
        let observer = self.log("sticky", "sticky value received");

        let worker = std::thread::spawn(move || -> lifecycle_event::Result<()> {
            sticky.publish(-1)?;
            let registering = sticky.clone();
            queue.post(Box::new(move || {
                if let Err(err) = registering.observe_lifecycle(owner, observer) {
                    tracing::warn!(%err, "sticky registration failed");
                }
            }))
        });
        worker
            .join()
            .map_err(|_| lifecycle_event::Error::internal("sticky worker panicked"))?
    }

    fn on_pause(&self) -> lifecycle_event::Result<()> {
        let cleared = self.manager.clear_all_observer();
        tracing::info!(cleared, "cleared managed observers");
        self.auto_remove.publish(1)
    }

    fn step(&self, transition: Transition) -> lifecycle_event::Result<()> {
        self.owner.handle_transition(transition)?;
        self.queue.run_pending()?;
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }
    config.observability.json_logs |= args.json;

    // Initialize observability
    init_tracing_with(&config.observability);

    let scenario = Scenario::new()?;
    tracing::info!(owner = scenario.owner.name(), "starting lifecycle replay");

    scenario.on_create()?;
    scenario.queue.run_pending()?;
    scenario.step(Transition::Create)?;
    scenario.step(Transition::Start)?;
    scenario.step(Transition::Resume)?;

    scenario.step(Transition::Pause)?;
    scenario.on_pause()?;
    scenario.queue.run_pending()?;

    if args.destroy {
        scenario.owner.move_to(LifecycleState::Destroyed)?;
        scenario.queue.run_pending()?;
    }

    tracing::info!(state = %scenario.owner.current_state(), "lifecycle replay finished");
    Ok(())
}
