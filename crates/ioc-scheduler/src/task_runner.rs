//! Glue between the scheduler and the worker pool
//!
//! ```text
//!  push_task ──► Scheduler ──ready──► prepare ──► WorkerPool ──► action
//!                    ▲                                              │
//!                    │                                              ▼
//!                 release ◄── post (or detached completion) ◄── schedule()
//! ```
//!
//! The runner is driven by a single thread (the network thread in the
//! server). Only the action stage ever leaves that thread.

use crate::completion::CompletionNotifier;
use crate::error::SchedulerResult;
use crate::schedulable::{SchedulableTask, TaskArena, TaskId};
use crate::scheduler::Scheduler;
use crate::task::{PostContext, PrepareContext, StageContext, Task, TaskStage};
use crate::worker_pool::{Wakeup, WorkerPool};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace};

/// Runs tasks through their stages while honoring their dependencies.
pub struct TaskRunner {
    arena: TaskArena,
    scheduler: Scheduler,
    workers: WorkerPool,
    completions: CompletionNotifier,
    pending: usize,
}

impl TaskRunner {
    /// Create a runner backed by `workers` threads (zero runs every action
    /// inline).
    pub fn new(workers: usize) -> SchedulerResult<Self> {
        Self::build(workers, None)
    }

    /// Same as [`TaskRunner::new`], signalling `wakeup` whenever an action
    /// or a detached post-action completes.
    pub fn with_wakeup(workers: usize, wakeup: Arc<dyn Wakeup>) -> SchedulerResult<Self> {
        Self::build(workers, Some(wakeup))
    }

    fn build(workers: usize, wakeup: Option<Arc<dyn Wakeup>>) -> SchedulerResult<Self> {
        Ok(Self {
            arena: TaskArena::new(),
            scheduler: Scheduler::new(),
            workers: WorkerPool::new(workers, wakeup.clone())?,
            completions: CompletionNotifier::new(wakeup),
            pending: 0,
        })
    }

    /// Submit a task. It starts as soon as it conflicts with nothing older.
    pub fn push_task(&mut self, task: SchedulableTask) -> TaskId {
        let id = self.arena.insert(task);
        self.pending += 1;
        if self.scheduler.push_task(&mut self.arena, id) {
            self.prepare_and_dispatch(id);
        } else {
            trace!(task = %id, "task deferred");
        }
        id
    }

    /// Handle every task whose action or detached post-action completed.
    ///
    /// Runs post-actions, releases dependents and starts those that became
    /// runnable. Never blocks. Returns the number of tasks handled.
    ///
    /// A panic raised by an action on a worker thread resumes here.
    pub fn schedule(&mut self) -> usize {
        let mut handled = 0;
        while let Some((id, task)) = self.workers.poll_finished_task(false) {
            self.run_post(id, task);
            handled += 1;
        }
        while let Some(id) = self.completions.try_next() {
            self.terminate_detached_post(id);
            handled += 1;
        }
        handled
    }

    /// Finish a task whose post-action detached.
    ///
    /// Usually reached through a [`crate::DetachedCompletion`] handle and
    /// [`TaskRunner::schedule`].
    pub fn terminate_detached_post(&mut self, id: TaskId) {
        let task = &self.arena[id];
        assert!(task.is_detached_post(), "task {id} did not detach its post-action");
        assert_eq!(task.stage(), TaskStage::Finished, "detached task {id} is not finished");
        trace!(task = %id, "detached post-action done");
        self.release(id);
    }

    /// Drive [`TaskRunner::schedule`] until every submitted task is done.
    pub fn wait_all_finished(&mut self) {
        while self.pending > 0 {
            if self.schedule() == 0 {
                thread::yield_now();
            }
        }
    }

    /// Tasks submitted and not yet released.
    pub fn pending_tasks(&self) -> usize {
        self.pending
    }

    /// Scheduling state of a live task.
    pub fn task(&self, id: TaskId) -> Option<&SchedulableTask> {
        self.arena.get(id)
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers.workers()
    }

    fn prepare_and_dispatch(&mut self, id: TaskId) {
        let entry = &mut self.arena[id];
        if entry.stage() == TaskStage::Prepare {
            let mut ctx = PrepareContext::new();
            entry
                .task_mut()
                .run_stage(TaskStage::Prepare, StageContext::Prepare(&mut ctx));
            if let Some(ranges) = ctx.into_mem_ranges() {
                entry.set_mem_ranges(ranges);
            }
            if !self.scheduler.can_schedule_prepared_task(&mut self.arena, id) {
                trace!(task = %id, "task deferred after prepare");
                return;
            }
        }
        let task = self.arena[id].take_task();
        self.workers.push_task(id, task);
    }

    fn run_post(&mut self, id: TaskId, mut task: Task) {
        let mut ctx = PostContext::new(id, self.completions.clone());
        task.run_stage(TaskStage::Post, StageContext::Post(&mut ctx));

        let entry = &mut self.arena[id];
        entry.restore_task(task);
        if ctx.is_detached() {
            entry.set_detached_post();
            trace!(task = %id, "post-action detached");
        } else {
            self.release(id);
        }
    }

    fn release(&mut self, id: TaskId) {
        let runnable = self.scheduler.pop_finished_task(&mut self.arena, id);
        for next in runnable {
            self.prepare_and_dispatch(next);
        }
        self.arena.remove(id);
        self.pending -= 1;
        trace!(task = %id, pending = self.pending, "task released");
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        if self.pending > 0 && !thread::panicking() {
            debug!(pending = self.pending, "task runner dropped with pending tasks");
        }
    }
}
