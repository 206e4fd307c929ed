//! Worker threads running task actions

use crate::blocking_queue::BlockingQueue;
use crate::error::{SchedulerError, SchedulerResult};
use crate::schedulable::TaskId;
use crate::task::{StageContext, Task, TaskStage};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

/// Wakes a thread sleeping in passive polling when results are ready.
///
/// Implemented by the transport layer; workers call it after pushing a
/// finished task.
pub trait Wakeup: Send + Sync {
    /// Interrupt the passive poll, if one is in progress.
    fn signal_passive_polling(&self);
}

enum WorkerMessage {
    Run(TaskId, Task),
    Exit,
}

/// A task whose action has run.
pub type FinishedTask = (TaskId, Task);

enum Finished {
    Done(TaskId, Task),
    Panicked(TaskId, Box<dyn Any + Send>),
}

/// Fixed set of threads executing the action stage of tasks.
///
/// With zero workers every action runs inline on the submitting thread.
pub struct WorkerPool {
    inbound: Arc<BlockingQueue<WorkerMessage>>,
    finished: Arc<BlockingQueue<Finished>>,
    wakeup: Option<Arc<dyn Wakeup>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` threads.
    pub fn new(workers: usize, wakeup: Option<Arc<dyn Wakeup>>) -> SchedulerResult<Self> {
        let mut pool = Self {
            inbound: Arc::new(BlockingQueue::new()),
            finished: Arc::new(BlockingQueue::new()),
            wakeup,
            workers: Vec::with_capacity(workers),
        };

        for index in 0..workers {
            let inbound = Arc::clone(&pool.inbound);
            let finished = Arc::clone(&pool.finished);
            let wakeup = pool.wakeup.clone();
            let handle = thread::Builder::new()
                .name(format!("ioc-worker-{index}"))
                .spawn(move || worker_main(index, &inbound, &finished, wakeup.as_deref()))
                .map_err(|source| SchedulerError::WorkerSpawn { index, source })?;
            pool.workers.push(handle);
        }

        debug!(workers, "worker pool started");
        Ok(pool)
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Run the action of a task.
    ///
    /// The task must be in [`TaskStage::Action`]. Immediate tasks, and every
    /// task when the pool has no thread, run before this returns.
    pub fn push_task(&self, id: TaskId, mut task: Task) {
        assert_eq!(task.stage(), TaskStage::Action, "task {id} pushed before prepare");
        if self.workers.is_empty() || task.is_immediate() {
            trace!(task = %id, "running action inline");
            task.run_stage(TaskStage::Action, StageContext::Action);
            self.finished.push(Finished::Done(id, task));
            if let Some(wakeup) = &self.wakeup {
                wakeup.signal_passive_polling();
            }
        } else {
            self.inbound.push(WorkerMessage::Run(id, task));
        }
    }

    /// Fetch a task whose action has run, optionally waiting for one.
    ///
    /// An action that panicked on a worker resumes its panic here.
    pub fn poll_finished_task(&self, wait: bool) -> Option<FinishedTask> {
        let finished = if wait {
            Some(self.finished.pop())
        } else {
            self.finished.try_pop()
        };
        match finished? {
            Finished::Done(id, task) => Some((id, task)),
            Finished::Panicked(id, payload) => {
                error!(task = %id, "task action panicked on a worker");
                panic::resume_unwind(payload)
            }
        }
    }

    /// Number of finished tasks not yet polled.
    pub fn finished_len(&self) -> usize {
        self.finished.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for _ in 0..self.workers.len() {
            self.inbound.push(WorkerMessage::Exit);
        }
        let mut crashed = None;
        for handle in self.workers.drain(..) {
            if let Err(payload) = handle.join() {
                crashed.get_or_insert(payload);
            }
        }
        if thread::panicking() {
            return;
        }
        if let Some(payload) = crashed {
            panic::resume_unwind(payload);
        }
        assert!(
            self.inbound.is_empty(),
            "worker pool stopped with queued tasks"
        );
        debug!("worker pool stopped");
    }
}

fn worker_main(
    index: usize,
    inbound: &BlockingQueue<WorkerMessage>,
    finished: &BlockingQueue<Finished>,
    wakeup: Option<&dyn Wakeup>,
) {
    trace!(worker = index, "worker started");
    loop {
        match inbound.pop() {
            WorkerMessage::Run(id, mut task) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    task.run_stage(TaskStage::Action, StageContext::Action)
                }));
                match outcome {
                    Ok(_) => finished.push(Finished::Done(id, task)),
                    Err(payload) => finished.push(Finished::Panicked(id, payload)),
                }
                if let Some(wakeup) = wakeup {
                    wakeup.signal_passive_polling();
                }
            }
            WorkerMessage::Exit => break,
        }
    }
    trace!(worker = index, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{PrepareContext, TaskOps};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountAction {
        runs: Arc<AtomicUsize>,
        thread_name: Arc<parking_lot::Mutex<Option<String>>>,
    }

    impl TaskOps for CountAction {
        fn run_action(&mut self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            *self.thread_name.lock() = thread::current().name().map(str::to_string);
        }
    }

    struct CountWakeup(AtomicUsize);

    impl Wakeup for CountWakeup {
        fn signal_passive_polling(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanicAction;

    impl TaskOps for PanicAction {
        fn run_action(&mut self) {
            panic!("action failed");
        }
    }

    fn prepared(ops: impl TaskOps + 'static) -> Task {
        let mut task = Task::new(ops);
        let mut ctx = PrepareContext::new();
        task.run_stage(TaskStage::Prepare, StageContext::Prepare(&mut ctx));
        task
    }

    fn counting() -> (CountAction, Arc<AtomicUsize>, Arc<parking_lot::Mutex<Option<String>>>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let name = Arc::new(parking_lot::Mutex::new(None));
        let ops = CountAction {
            runs: Arc::clone(&runs),
            thread_name: Arc::clone(&name),
        };
        (ops, runs, name)
    }

    #[test]
    fn test_zero_workers_runs_inline() {
        let wakeup = Arc::new(CountWakeup(AtomicUsize::new(0)));
        let shared: Arc<dyn Wakeup> = wakeup.clone();
        let pool = WorkerPool::new(0, Some(shared)).unwrap();
        let (ops, runs, _) = counting();

        pool.push_task(TaskId::new(5), prepared(ops));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(wakeup.0.load(Ordering::SeqCst), 1);

        let (id, task) = pool.poll_finished_task(false).unwrap();
        assert_eq!(id, TaskId::new(5));
        assert_eq!(task.stage(), TaskStage::Post);
        assert!(pool.poll_finished_task(false).is_none());
    }

    #[test]
    fn test_immediate_task_skips_workers() {
        let pool = WorkerPool::new(2, None).unwrap();
        let (ops, runs, name) = counting();
        let mut task = prepared(ops);
        task.mark_as_immediate();

        pool.push_task(TaskId::new(1), task);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(*name.lock(), thread::current().name().map(str::to_string));
        assert!(pool.poll_finished_task(false).is_some());
    }

    #[test]
    fn test_workers_run_actions() {
        let wakeup = Arc::new(CountWakeup(AtomicUsize::new(0)));
        let shared: Arc<dyn Wakeup> = wakeup.clone();
        let pool = WorkerPool::new(4, Some(shared)).unwrap();
        assert_eq!(pool.workers(), 4);

        let runs = Arc::new(AtomicUsize::new(0));
        for i in 0..100 {
            let ops = CountAction {
                runs: Arc::clone(&runs),
                thread_name: Arc::new(parking_lot::Mutex::new(None)),
            };
            pool.push_task(TaskId::new(i), prepared(ops));
        }

        let mut seen: Vec<usize> = (0..100)
            .map(|_| pool.poll_finished_task(true).unwrap().0.as_usize())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        assert_eq!(runs.load(Ordering::SeqCst), 100);
        assert_eq!(wakeup.0.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_action_runs_on_named_worker() {
        let pool = WorkerPool::new(1, None).unwrap();
        let (ops, _, name) = counting();
        pool.push_task(TaskId::new(0), prepared(ops));
        pool.poll_finished_task(true).unwrap();
        assert_eq!(name.lock().as_deref(), Some("ioc-worker-0"));
    }

    #[test]
    fn test_drop_joins_idle_workers() {
        let pool = WorkerPool::new(3, None).unwrap();
        thread::sleep(Duration::from_millis(10));
        drop(pool);
    }

    #[test]
    #[should_panic(expected = "action failed")]
    fn test_worker_panic_resumes_on_poll() {
        let pool = WorkerPool::new(1, None).unwrap();
        pool.push_task(TaskId::new(0), prepared(PanicAction));
        pool.poll_finished_task(true);
    }

    #[test]
    fn test_worker_survives_panicking_action() {
        let pool = WorkerPool::new(1, None).unwrap();
        pool.push_task(TaskId::new(0), prepared(PanicAction));
        let caught = panic::catch_unwind(AssertUnwindSafe(|| pool.poll_finished_task(true)));
        assert!(caught.is_err());

        let (ops, runs, _) = counting();
        pool.push_task(TaskId::new(1), prepared(ops));
        assert_eq!(pool.poll_finished_task(true).unwrap().0, TaskId::new(1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "before prepare")]
    fn test_push_unprepared_task_panics() {
        let pool = WorkerPool::new(0, None).unwrap();
        let (ops, _, _) = counting();
        pool.push_task(TaskId::new(0), Task::new(ops));
    }
}
