//! Serial dispatch queue.
//!
//! Every slot mutation and observer callback runs on one designated thread.
//! Work issued from any other thread is posted as a [`Task`] and executed
//! when the owning thread drains the queue; the poster never blocks.

use std::fmt;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use tokio::sync::mpsc;

use crate::types::{Error, Result};

/// Unit of work posted to a dispatcher.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Serial task-posting capability supplied by the host.
pub trait Dispatcher: Send + Sync {
    /// Enqueue a task. Must not run it inline and must not block.
    fn post(&self, task: Task) -> Result<()>;

    /// True when the calling thread is the one that drains this queue.
    fn is_dispatch_thread(&self) -> bool;
}

/// Unbounded serial queue bound to the thread that created it.
///
/// The host calls [`MainQueue::run_pending`] from that thread (its event loop
/// tick) to execute everything posted so far.
pub struct MainQueue {
    tx: mpsc::UnboundedSender<Task>,
    rx: Mutex<mpsc::UnboundedReceiver<Task>>,
    thread: ThreadId,
}

impl fmt::Debug for MainQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainQueue")
            .field("thread", &self.thread)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl MainQueue {
    /// Create a queue owned by the current thread.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            thread: thread::current().id(),
        }
    }

    /// Run every queued task, including tasks posted by the tasks themselves.
    ///
    /// Returns the number of tasks executed.
    pub fn run_pending(&self) -> Result<usize> {
        if !self.is_dispatch_thread() {
            return Err(Error::wrong_thread(format!(
                "run_pending called from {:?}, queue belongs to {:?}",
                thread::current().id(),
                self.thread
            )));
        }

        let mut executed = 0;
        // The receiver lock is released before each task runs so tasks may post.
        while let Some(task) = self.next_task() {
            task();
            executed += 1;
        }

        if executed > 0 {
            tracing::trace!(executed, "drained main queue");
        }
        Ok(executed)
    }

    fn next_task(&self) -> Option<Task> {
        let mut rx = self.rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rx.try_recv().ok()
    }
}

impl Default for MainQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for MainQueue {
    fn post(&self, task: Task) -> Result<()> {
        self.tx
            .send(task)
            .map_err(|_| Error::dispatch_closed("main queue receiver dropped"))
    }

    fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.thread
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_post_does_not_run_inline() {
        let queue = MainQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        queue
            .post(Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert_eq!(queue.run_pending().unwrap(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tasks_run_in_post_order() {
        let queue = MainQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let o = order.clone();
            queue
                .post(Box::new(move || o.lock().unwrap().push(i)))
                .unwrap();
        }
        queue.run_pending().unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_nested_posts_drain_in_same_pass() {
        let queue = Arc::new(MainQueue::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let q = queue.clone();
        let h = hits.clone();
        queue
            .post(Box::new(move || {
                let h2 = h.clone();
                q.post(Box::new(move || {
                    h2.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
            }))
            .unwrap();

        assert_eq!(queue.run_pending().unwrap(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_pending_off_thread_fails() {
        let queue = Arc::new(MainQueue::new());
        let q = queue.clone();
        let result = std::thread::spawn(move || {
            assert!(!q.is_dispatch_thread());
            q.run_pending()
        })
        .join()
        .unwrap();

        assert!(matches!(result, Err(Error::WrongThread(_))));
        assert!(queue.is_dispatch_thread());
    }
}
