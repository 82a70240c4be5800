//! Event integration tests: cross-thread publishing through the main queue,
//! auto-remove managers and lifecycle-driven delivery.

use lifecycle_event::{
    ActiveRange, AutoRemoveObserverManager, Dispatcher, EventOptions, LifecycleEvent,
    LifecycleOwner, LifecycleRegistry, LifecycleState, MainQueue, ReplayPolicy, Transition,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

type Log<T> = Arc<Mutex<Vec<T>>>;

/// Helper: queue owned by the test thread plus an event using it.
fn setup(replay: ReplayPolicy, range: ActiveRange) -> (Arc<MainQueue>, LifecycleEvent<i32>) {
    let queue = Arc::new(MainQueue::new());
    let dispatcher: Arc<dyn Dispatcher> = queue.clone();
    let event = LifecycleEvent::named("test", dispatcher, EventOptions::new(replay, range)).unwrap();
    (queue, event)
}

fn collect(log: &Log<i32>) -> impl Fn(&i32) + Send + Sync + 'static {
    let log = log.clone();
    move |v: &i32| log.lock().unwrap().push(*v)
}

// =============================================================================
// Dispatch
// =============================================================================

#[test]
fn test_background_publish_is_queued() {
    let (queue, event) = setup(ReplayPolicy::StickyForever, ActiveRange::Alive);
    let log = Log::default();
    event.observe_forever(collect(&log)).unwrap();

    let remote = event.clone();
    std::thread::spawn(move || remote.publish(42).unwrap())
        .join()
        .unwrap();

    // Nothing happens until the owning thread drains the queue.
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(event.version(), 0);

    assert_eq!(queue.run_pending().unwrap(), 1);
    assert_eq!(*log.lock().unwrap(), vec![42]);
    assert_eq!(event.version(), 1);
}

#[test]
fn test_background_publishes_keep_total_order() {
    let (queue, event) = setup(ReplayPolicy::NoSticky, ActiveRange::Alive);
    let log = Log::default();
    event.observe_forever(collect(&log)).unwrap();

    let remote = event.clone();
    std::thread::spawn(move || {
        for i in 0..10 {
            remote.publish(i).unwrap();
        }
    })
    .join()
    .unwrap();

    queue.run_pending().unwrap();
    assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_post_value_coalesces() {
    let (queue, event) = setup(ReplayPolicy::NoSticky, ActiveRange::Alive);
    let log = Log::default();
    event.observe_forever(collect(&log)).unwrap();

    event.post_value(1).unwrap();
    event.post_value(2).unwrap();
    event.post_value(3).unwrap();
    assert_eq!(queue.run_pending().unwrap(), 1);
    assert_eq!(*log.lock().unwrap(), vec![3]);

    // A later post schedules a fresh task.
    event.post_value(4).unwrap();
    queue.run_pending().unwrap();
    assert_eq!(*log.lock().unwrap(), vec![3, 4]);
}

#[test]
fn test_publish_then_post_observe_from_background() {
    let (queue, event) = setup(ReplayPolicy::StickyForever, ActiveRange::Alive);
    let owner = Arc::new(LifecycleRegistry::new("activity"));
    let log = Log::default();

    let (remote, remote_owner, remote_log) = (event.clone(), owner.clone(), log.clone());
    std::thread::spawn(move || {
        remote.publish(-1).unwrap();
        remote
            .observe_lifecycle(remote_owner, collect(&remote_log))
            .unwrap();
    })
    .join()
    .unwrap();

    assert!(!event.has_observers());
    queue.run_pending().unwrap();
    assert_eq!(*log.lock().unwrap(), vec![-1]);
    assert!(event.has_active_observers());
}

#[test]
fn test_background_remove_is_queued() {
    let (queue, event) = setup(ReplayPolicy::NoSticky, ActiveRange::Alive);
    let log = Log::default();
    let id = event.observe_forever(collect(&log)).unwrap();

    let remote = event.clone();
    std::thread::spawn(move || remote.remove_observer(id).unwrap())
        .join()
        .unwrap();
    assert!(event.is_observing(id));

    queue.run_pending().unwrap();
    assert!(!event.is_observing(id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_from_blocking_tasks() {
    let (queue, event) = setup(ReplayPolicy::NoSticky, ActiveRange::Alive);
    let log = Log::default();
    event.observe_forever(collect(&log)).unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let ev = event.clone();
        handles.push(tokio::task::spawn_blocking(move || ev.publish(i).unwrap()));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert!(log.lock().unwrap().is_empty());

    assert_eq!(queue.run_pending().unwrap(), 4);
    let mut seen = log.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3]);
    assert_eq!(event.version(), 4);
}

// =============================================================================
// Auto-remove manager
// =============================================================================

#[test]
fn test_clear_all_observer_spans_events() {
    let (_queue, numbers) = setup(ReplayPolicy::StickyForever, ActiveRange::Alive);
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(MainQueue::new());
    let names: LifecycleEvent<String> = LifecycleEvent::new(dispatcher);
    let manager = AutoRemoveObserverManager::new();

    let number_log = Log::default();
    let name_log: Log<String> = Log::default();
    let unrelated = Log::default();

    numbers.publish(0).unwrap();
    numbers.observe_managed(&manager, collect(&number_log)).unwrap();
    let nl = name_log.clone();
    names
        .observe_managed(&manager, move |s: &String| nl.lock().unwrap().push(s.clone()))
        .unwrap();
    numbers.observe_forever(collect(&unrelated)).unwrap();
    assert_eq!(manager.len(), 2);

    assert_eq!(manager.clear_all_observer(), 2);
    assert!(manager.is_empty());

    numbers.publish(1).unwrap();
    names.publish("after".to_string()).unwrap();

    assert_eq!(*number_log.lock().unwrap(), vec![0]);
    assert!(name_log.lock().unwrap().is_empty());
    assert_eq!(*unrelated.lock().unwrap(), vec![0, 1]);
    assert_eq!(numbers.observer_count(), 1);
}

#[test]
fn test_manager_forgets_explicitly_removed_binding() {
    let (_queue, event) = setup(ReplayPolicy::NoSticky, ActiveRange::Alive);
    let manager = AutoRemoveObserverManager::new();
    let id = event.observe_managed(&manager, |_: &i32| {}).unwrap();
    assert!(manager.contains(id));

    event.remove_observer(id).unwrap();
    assert!(!manager.contains(id));
    assert_eq!(manager.clear_all_observer(), 0);
}

#[test]
fn test_register_existing_binding() {
    let (_queue, event) = setup(ReplayPolicy::NoSticky, ActiveRange::Alive);
    let manager = AutoRemoveObserverManager::new();
    let log = Log::default();
    let id = event.observe_forever(collect(&log)).unwrap();

    assert!(manager.register(&event, id));
    manager.clear_all_observer();
    event.publish(1).unwrap();
    assert!(log.lock().unwrap().is_empty());

    // Unknown bindings are refused.
    assert!(!manager.register(&event, id));
}

#[test]
fn test_second_manager_takes_over_binding() {
    let (_queue, event) = setup(ReplayPolicy::NoSticky, ActiveRange::Alive);
    let first = AutoRemoveObserverManager::new();
    let second = AutoRemoveObserverManager::new();
    let id = event.observe_managed(&first, |_: &i32| {}).unwrap();

    assert!(second.register(&event, id));
    assert!(!first.contains(id));
    assert!(second.contains(id));

    event.remove_observer(id).unwrap();
    assert!(first.is_empty());
    assert!(second.is_empty());
}

#[test]
fn test_reregister_with_same_manager_keeps_binding() {
    let (_queue, event) = setup(ReplayPolicy::NoSticky, ActiveRange::Alive);
    let manager = AutoRemoveObserverManager::new();
    let id = event.observe_managed(&manager, |_: &i32| {}).unwrap();

    assert!(manager.register(&event, id));
    assert_eq!(manager.len(), 1);
    assert_eq!(manager.clear_all_observer(), 1);
    assert!(!event.is_observing(id));
}

#[test]
fn test_unregister_keeps_binding_attached() {
    let (_queue, event) = setup(ReplayPolicy::NoSticky, ActiveRange::Alive);
    let manager = AutoRemoveObserverManager::new();
    let log = Log::default();
    let id = event.observe_managed(&manager, collect(&log)).unwrap();

    assert!(manager.unregister(id));
    assert_eq!(manager.clear_all_observer(), 0);
    event.publish(5).unwrap();
    assert_eq!(*log.lock().unwrap(), vec![5]);
}

#[test]
fn test_clear_does_not_touch_lifecycle_bindings() {
    let (_queue, event) = setup(ReplayPolicy::NoSticky, ActiveRange::Alive);
    let owner = Arc::new(LifecycleRegistry::new("activity"));
    let manager = AutoRemoveObserverManager::new();
    let log = Log::default();

    event.observe_lifecycle(owner.clone(), collect(&log)).unwrap();
    event.observe_managed(&manager, |_: &i32| {}).unwrap();
    manager.clear_all_observer();

    event.publish(9).unwrap();
    assert_eq!(*log.lock().unwrap(), vec![9]);
}

// =============================================================================
// Sample lifecycle replay
// =============================================================================

#[test]
fn test_send_once_across_start() {
    let (queue, event) = setup(ReplayPolicy::SendOnce, ActiveRange::Started);
    let owner = Arc::new(LifecycleRegistry::new("activity"));
    let log: Log<&'static str> = Log::default();

    let l = log.clone();
    event
        .observe_lifecycle(owner.clone(), move |_: &i32| l.lock().unwrap().push("first"))
        .unwrap();
    event.publish(1).unwrap();
    let l = log.clone();
    event
        .observe_lifecycle(owner.clone(), move |_: &i32| l.lock().unwrap().push("second"))
        .unwrap();
    assert!(log.lock().unwrap().is_empty());

    owner.move_to(LifecycleState::Started).unwrap();
    queue.run_pending().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["first"]);
}

#[test]
fn test_lifecycle_bound_vs_forever() {
    let (_queue, event) = setup(ReplayPolicy::StickyForever, ActiveRange::Started);
    let owner = Arc::new(LifecycleRegistry::new("activity"));
    owner.handle_transition(Transition::Create).unwrap();
    let bound = Log::default();
    let forever = Log::default();

    event.observe_lifecycle(owner.clone(), collect(&bound)).unwrap();
    event.observe_forever(collect(&forever)).unwrap();

    event.publish(1).unwrap();
    event.publish(2).unwrap();
    assert!(bound.lock().unwrap().is_empty());
    assert_eq!(*forever.lock().unwrap(), vec![1, 2]);

    owner.handle_transition(Transition::Start).unwrap();
    assert_eq!(*bound.lock().unwrap(), vec![2]);

    owner.move_to(LifecycleState::Destroyed).unwrap();
    assert_eq!(owner.current_state(), LifecycleState::Destroyed);
    assert_eq!(event.observer_count(), 1);
}
