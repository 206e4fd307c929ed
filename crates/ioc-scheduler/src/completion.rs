//! Completion signalling for detached post-actions

use crate::blocking_queue::BlockingQueue;
use crate::schedulable::TaskId;
use crate::worker_pool::Wakeup;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Channel through which detached tasks report that they are done.
///
/// Cloning is cheap; every clone feeds the same queue.
#[derive(Clone)]
pub struct CompletionNotifier {
    queue: Arc<BlockingQueue<TaskId>>,
    wakeup: Option<Arc<dyn Wakeup>>,
}

impl CompletionNotifier {
    /// Create a notifier, optionally waking a passive poller on each report.
    pub fn new(wakeup: Option<Arc<dyn Wakeup>>) -> Self {
        Self {
            queue: Arc::new(BlockingQueue::new()),
            wakeup,
        }
    }

    pub(crate) fn handle(&self, id: TaskId) -> DetachedCompletion {
        DetachedCompletion {
            id,
            notifier: self.clone(),
        }
    }

    fn notify(&self, id: TaskId) {
        self.queue.push(id);
        if let Some(wakeup) = &self.wakeup {
            wakeup.signal_passive_polling();
        }
    }

    pub(crate) fn try_next(&self) -> Option<TaskId> {
        self.queue.try_pop()
    }
}

impl fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionNotifier")
            .field("pending", &self.queue.len())
            .field("wakeup", &self.wakeup.is_some())
            .finish()
    }
}

/// Handle owned by a task whose post-action continues asynchronously.
///
/// Calling [`DetachedCompletion::complete`] may happen on any thread; the
/// runner picks the report up during its next `schedule()` round.
#[must_use = "a detached task stays pending until its completion is reported"]
#[derive(Debug)]
pub struct DetachedCompletion {
    id: TaskId,
    notifier: CompletionNotifier,
}

impl DetachedCompletion {
    /// Task this handle belongs to.
    pub fn task_id(&self) -> TaskId {
        self.id
    }

    /// Report the detached post-action as done.
    pub fn complete(self) {
        self.notifier.notify(self.id);
    }
}

type DoneFn = Box<dyn FnOnce() + Send>;

struct JoinInner {
    remaining: AtomicUsize,
    on_done: Mutex<Option<DoneFn>>,
}

/// Countdown shared by the parts of a split operation.
///
/// Each part calls [`JoinCounter::arrive`] when it completes; the arrival
/// that brings the count to zero runs the completion closure, once.
#[derive(Clone)]
pub struct JoinCounter {
    inner: Arc<JoinInner>,
}

impl JoinCounter {
    /// Counter expecting `parts` arrivals. `parts` must be positive.
    pub fn new<F>(parts: usize, on_done: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        assert!(parts > 0, "a join counter needs at least one part");
        Self {
            inner: Arc::new(JoinInner {
                remaining: AtomicUsize::new(parts),
                on_done: Mutex::new(Some(Box::new(on_done))),
            }),
        }
    }

    /// Record one finished part. Returns `true` for the last one.
    pub fn arrive(&self) -> bool {
        let previous = self.inner.remaining.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "join counter received more arrivals than parts");
        if previous != 1 {
            return false;
        }
        let on_done = self.inner.on_done.lock().take();
        if let Some(on_done) = on_done {
            on_done();
        }
        true
    }

    /// Arrivals still expected.
    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }
}

impl fmt::Debug for JoinCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinCounter")
            .field("remaining", &self.remaining())
            .finish()
    }
}
