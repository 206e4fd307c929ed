//! Task lifecycle: prepare, action, post-action
//!
//! A [`Task`] wraps an operation-specific [`TaskOps`] implementation and
//! walks it through a fixed sequence of stages:
//!
//! ```text
//!   Prepare ──► Action ──► Post ──► Finished
//!   (network)   (worker)   (network)
//! ```
//!
//! Prepare and post run on the thread driving the runner. The action may run
//! on any worker thread, so implementations must be `Send`.

use crate::completion::{CompletionNotifier, DetachedCompletion};
use crate::range_set::RangeSet;
use crate::schedulable::TaskId;
use std::fmt;

/// Stage a task is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStage {
    /// Waiting for its prepare step
    Prepare,
    /// Waiting for its main action
    Action,
    /// Waiting for its post-action
    Post,
    /// Every stage has run
    Finished,
}

impl TaskStage {
    /// Stage following this one. Panics on `Finished`.
    pub fn next(self) -> TaskStage {
        match self {
            TaskStage::Prepare => TaskStage::Action,
            TaskStage::Action => TaskStage::Post,
            TaskStage::Post => TaskStage::Finished,
            TaskStage::Finished => panic!("a finished task has no next stage"),
        }
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStage::Prepare => "prepare",
            TaskStage::Action => "action",
            TaskStage::Post => "post",
            TaskStage::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Handed to the prepare step.
///
/// Prepare typically fetches the buffers the action will touch; it can then
/// declare their addresses so that the scheduler protects them.
#[derive(Debug, Default)]
pub struct PrepareContext {
    mem_ranges: Option<RangeSet>,
}

impl PrepareContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the memory ranges protected for this task.
    ///
    /// The set must be complete.
    pub fn protect_mem_ranges(&mut self, ranges: RangeSet) {
        assert!(ranges.is_ready(), "protected memory ranges must be complete");
        self.mem_ranges = Some(ranges);
    }

    /// Memory ranges declared during prepare, if any.
    pub fn into_mem_ranges(self) -> Option<RangeSet> {
        self.mem_ranges
    }
}

/// Handed to the post-action step.
pub struct PostContext {
    id: TaskId,
    notifier: CompletionNotifier,
    detached: bool,
}

impl PostContext {
    /// Create the context for task `id`.
    pub fn new(id: TaskId, notifier: CompletionNotifier) -> Self {
        Self {
            id,
            notifier,
            detached: false,
        }
    }

    /// Id of the task running its post-action.
    pub fn task_id(&self) -> TaskId {
        self.id
    }

    /// Keep the task alive after the post-action returns.
    ///
    /// Dependents stay blocked until [`DetachedCompletion::complete`] is
    /// called on the returned handle. Can be called once.
    pub fn detach(&mut self) -> DetachedCompletion {
        assert!(!self.detached, "task {} already detached its post-action", self.id);
        self.detached = true;
        self.notifier.handle(self.id)
    }

    /// Whether [`PostContext::detach`] was called.
    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

impl fmt::Debug for PostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostContext")
            .field("id", &self.id)
            .field("detached", &self.detached)
            .finish()
    }
}

/// Context matching the stage being run.
#[derive(Debug)]
pub enum StageContext<'a> {
    /// For [`TaskStage::Prepare`]
    Prepare(&'a mut PrepareContext),
    /// For [`TaskStage::Action`]
    Action,
    /// For [`TaskStage::Post`]
    Post(&'a mut PostContext),
}

/// Operation-specific behavior of a task.
pub trait TaskOps: Send {
    /// Runs on the network thread before the action is scheduled.
    fn run_prepare(&mut self, _ctx: &mut PrepareContext) {}

    /// Main work, possibly on a worker thread.
    fn run_action(&mut self);

    /// Runs on the network thread once the action is done.
    fn run_post_action(&mut self, _ctx: &mut PostContext) {}
}

/// A unit of work driven through its stages by the runner.
pub struct Task {
    stage: TaskStage,
    immediate: bool,
    ops: Box<dyn TaskOps>,
}

impl Task {
    /// Wrap an operation, starting at [`TaskStage::Prepare`].
    pub fn new<O>(ops: O) -> Self
    where
        O: TaskOps + 'static,
    {
        Self {
            stage: TaskStage::Prepare,
            immediate: false,
            ops: Box::new(ops),
        }
    }

    /// Current stage.
    pub fn stage(&self) -> TaskStage {
        self.stage
    }

    /// Whether the action runs inline instead of on a worker.
    pub fn is_immediate(&self) -> bool {
        self.immediate
    }

    /// Run the action on the submitting thread. Cannot be undone.
    pub fn mark_as_immediate(&mut self) {
        self.immediate = true;
    }

    /// Builder form of [`Task::mark_as_immediate`].
    pub fn immediate(mut self) -> Self {
        self.mark_as_immediate();
        self
    }

    /// Run the handler of the current stage and advance.
    ///
    /// Returns `true` when the task reaches [`TaskStage::Finished`]. Panics
    /// if the task is already finished or if `ctx` does not match the stage.
    pub fn run_next_stage(&mut self, ctx: StageContext<'_>) -> bool {
        match (self.stage, ctx) {
            (TaskStage::Prepare, StageContext::Prepare(ctx)) => self.ops.run_prepare(ctx),
            (TaskStage::Action, StageContext::Action) => self.ops.run_action(),
            (TaskStage::Post, StageContext::Post(ctx)) => self.ops.run_post_action(ctx),
            (TaskStage::Finished, _) => panic!("cannot run a stage of a finished task"),
            (stage, ctx) => panic!("stage {stage} cannot run with context {ctx:?}"),
        }
        self.stage = self.stage.next();
        self.stage == TaskStage::Finished
    }

    /// Same as [`Task::run_next_stage`] after checking the current stage.
    pub fn run_stage(&mut self, expected: TaskStage, ctx: StageContext<'_>) -> bool {
        assert_eq!(
            self.stage, expected,
            "task is in stage {} but {} was requested",
            self.stage, expected
        );
        self.run_next_stage(ctx)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("stage", &self.stage)
            .field("immediate", &self.immediate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::Range;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        prepare: AtomicUsize,
        action: AtomicUsize,
        post: AtomicUsize,
    }

    struct CountingOps(Arc<Counters>);

    impl TaskOps for CountingOps {
        fn run_prepare(&mut self, ctx: &mut PrepareContext) {
            self.0.prepare.fetch_add(1, Ordering::SeqCst);
            ctx.protect_mem_ranges(RangeSet::from_ranges([Range::new(0x1000, 64)]));
        }

        fn run_action(&mut self) {
            self.0.action.fetch_add(1, Ordering::SeqCst);
        }

        fn run_post_action(&mut self, _ctx: &mut PostContext) {
            self.0.post.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ActionOnly;

    impl TaskOps for ActionOnly {
        fn run_action(&mut self) {}
    }

    fn post_ctx() -> PostContext {
        PostContext::new(TaskId::new(0), CompletionNotifier::new(None))
    }

    #[test]
    fn test_full_lifecycle() {
        let counters = Arc::new(Counters::default());
        let mut task = Task::new(CountingOps(Arc::clone(&counters)));
        assert_eq!(task.stage(), TaskStage::Prepare);

        let mut prepare = PrepareContext::new();
        assert!(!task.run_next_stage(StageContext::Prepare(&mut prepare)));
        assert_eq!(
            prepare.into_mem_ranges(),
            Some(RangeSet::from_ranges([Range::new(0x1000, 64)]))
        );
        assert_eq!(task.stage(), TaskStage::Action);

        assert!(!task.run_next_stage(StageContext::Action));
        assert_eq!(task.stage(), TaskStage::Post);

        let mut post = post_ctx();
        assert!(task.run_next_stage(StageContext::Post(&mut post)));
        assert_eq!(task.stage(), TaskStage::Finished);
        assert!(!post.is_detached());

        assert_eq!(counters.prepare.load(Ordering::SeqCst), 1);
        assert_eq!(counters.action.load(Ordering::SeqCst), 1);
        assert_eq!(counters.post.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_prepare_and_post_are_noops() {
        let mut task = Task::new(ActionOnly);
        let mut prepare = PrepareContext::new();
        task.run_stage(TaskStage::Prepare, StageContext::Prepare(&mut prepare));
        assert!(prepare.into_mem_ranges().is_none());
        task.run_stage(TaskStage::Action, StageContext::Action);
        let mut post = post_ctx();
        assert!(task.run_stage(TaskStage::Post, StageContext::Post(&mut post)));
    }

    #[test]
    #[should_panic(expected = "finished task")]
    fn test_run_after_finished_panics() {
        let mut task = Task::new(ActionOnly);
        let mut prepare = PrepareContext::new();
        task.run_next_stage(StageContext::Prepare(&mut prepare));
        task.run_next_stage(StageContext::Action);
        let mut post = post_ctx();
        task.run_next_stage(StageContext::Post(&mut post));
        task.run_next_stage(StageContext::Action);
    }

    #[test]
    #[should_panic(expected = "cannot run with context")]
    fn test_wrong_context_panics() {
        let mut task = Task::new(ActionOnly);
        task.run_next_stage(StageContext::Action);
    }

    #[test]
    #[should_panic(expected = "was requested")]
    fn test_run_stage_checks_expected_stage() {
        let mut task = Task::new(ActionOnly);
        task.run_stage(TaskStage::Action, StageContext::Action);
    }

    #[test]
    fn test_mark_as_immediate() {
        let mut task = Task::new(ActionOnly);
        assert!(!task.is_immediate());
        task.mark_as_immediate();
        assert!(task.is_immediate());
        assert!(Task::new(ActionOnly).immediate().is_immediate());
    }

    #[test]
    #[should_panic(expected = "already detached")]
    fn test_double_detach_panics() {
        let mut post = post_ctx();
        let _first = post.detach();
        let _second = post.detach();
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(TaskStage::Prepare.next(), TaskStage::Action);
        assert_eq!(TaskStage::Action.next(), TaskStage::Post);
        assert_eq!(TaskStage::Post.next(), TaskStage::Finished);
    }
}
