//! Completion counting for a run
//!
//! The orchestrator knows up front how many flattened requests it will
//! enqueue. Storage workers call [`CompletionGroup::complete`] once per job
//! after every target accepted the payload; the orchestrator awaits
//! [`CompletionGroup::wait`].

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Counts completions toward an expected total
#[derive(Debug)]
pub struct CompletionGroup {
    expected: usize,
    completed: AtomicUsize,
    notify: Notify,
}

impl CompletionGroup {
    /// Create a group expecting `expected` completions.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            completed: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    /// Expected completion count
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Completions so far
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Whether the expected count has been reached
    pub fn is_done(&self) -> bool {
        self.completed() >= self.expected
    }

    /// Record one completion. Returns the new count.
    pub fn complete(&self) -> usize {
        let count = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.expected {
            self.notify.notify_waiters();
        }
        count
    }

    /// Wait until the expected count is reached.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }
}
