//! Scheduling metadata attached to each task

use crate::object_range::ObjectRangeSet;
use crate::range_set::RangeSet;
use crate::task::{Task, TaskStage};
use slab::Slab;
use std::fmt;
use std::ops::{Index, IndexMut};

/// Handle of a task stored in a [`TaskArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(usize);

impl TaskId {
    /// Wrap a raw slot index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Raw slot index.
    pub const fn as_usize(&self) -> usize {
        self.0
    }
}

impl From<usize> for TaskId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a task accesses the data it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoKind {
    /// Shared access
    Read,
    /// Exclusive access
    Write,
}

/// A task plus everything the scheduler needs to order it.
pub struct SchedulableTask {
    io_kind: IoKind,
    object_ranges: ObjectRangeSet,
    mem_ranges: RangeSet,
    blocking_dependencies: usize,
    to_unblock: Vec<TaskId>,
    active: bool,
    detached_post: bool,
    /// Absent while a worker runs the action.
    task: Option<Task>,
}

impl SchedulableTask {
    /// Wrap `task`, protecting the given object and memory ranges.
    ///
    /// Both sets must be complete.
    pub fn new(io_kind: IoKind, object_ranges: ObjectRangeSet, mem_ranges: RangeSet, task: Task) -> Self {
        assert!(object_ranges.is_ready(), "object ranges must be complete");
        assert!(mem_ranges.is_ready(), "memory ranges must be complete");
        Self {
            io_kind,
            object_ranges,
            mem_ranges,
            blocking_dependencies: 0,
            to_unblock: Vec::new(),
            active: false,
            detached_post: false,
            task: Some(task),
        }
    }

    /// Access kind.
    pub fn io_kind(&self) -> IoKind {
        self.io_kind
    }

    /// Object ranges touched.
    pub fn object_ranges(&self) -> &ObjectRangeSet {
        &self.object_ranges
    }

    /// Memory ranges touched.
    pub fn mem_ranges(&self) -> &RangeSet {
        &self.mem_ranges
    }

    /// Replace the protected memory ranges, typically after prepare.
    pub fn set_mem_ranges(&mut self, ranges: RangeSet) {
        assert!(ranges.is_ready(), "memory ranges must be complete");
        self.mem_ranges = ranges;
    }

    /// Whether the two tasks touch a common object byte or memory byte.
    pub fn collide(&self, other: &SchedulableTask) -> bool {
        self.object_ranges.collide(&other.object_ranges) || self.mem_ranges.collide(&other.mem_ranges)
    }

    /// Whether the two tasks may run at the same time if they collide.
    pub fn can_run_concurrently(&self, other: &SchedulableTask) -> bool {
        matches!((self.io_kind, other.io_kind), (IoKind::Read, IoKind::Read))
    }

    /// Drop one blocking dependency. Returns `true` when none remain.
    pub fn unblock(&mut self) -> bool {
        assert!(
            self.blocking_dependencies > 0,
            "unblocking a task that has no blocking dependency"
        );
        self.blocking_dependencies -= 1;
        self.blocking_dependencies == 0
    }

    /// Whether the task waits on another one.
    pub fn is_blocked(&self) -> bool {
        self.blocking_dependencies > 0
    }

    /// Number of tasks this one waits on.
    pub fn blocking_dependencies(&self) -> usize {
        self.blocking_dependencies
    }

    /// Tasks waiting for this one, in registration order.
    pub fn dependents(&self) -> &[TaskId] {
        &self.to_unblock
    }

    pub(crate) fn take_dependents(&mut self) -> Vec<TaskId> {
        std::mem::take(&mut self.to_unblock)
    }

    /// Mark as cleared to run.
    pub fn activate(&mut self) {
        self.active = true;
    }

    pub(crate) fn deactivate(&mut self) {
        self.active = false;
    }

    /// Whether the scheduler cleared the task to run.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Mark the post-action as continuing after it returned.
    pub fn set_detached_post(&mut self) {
        self.detached_post = true;
    }

    /// Whether the post-action detached.
    pub fn is_detached_post(&self) -> bool {
        self.detached_post
    }

    /// Stage of the wrapped task. Panics while a worker holds it.
    pub fn stage(&self) -> TaskStage {
        self.task().stage()
    }

    /// The wrapped task. Panics while a worker holds it.
    pub fn task(&self) -> &Task {
        match &self.task {
            Some(task) => task,
            None => panic!("task is currently held by a worker"),
        }
    }

    /// The wrapped task, mutably. Panics while a worker holds it.
    pub fn task_mut(&mut self) -> &mut Task {
        match &mut self.task {
            Some(task) => task,
            None => panic!("task is currently held by a worker"),
        }
    }

    /// Whether the task is currently out on a worker.
    pub fn is_dispatched(&self) -> bool {
        self.task.is_none()
    }

    pub(crate) fn take_task(&mut self) -> Task {
        match self.task.take() {
            Some(task) => task,
            None => panic!("task dispatched twice"),
        }
    }

    pub(crate) fn restore_task(&mut self, task: Task) {
        assert!(self.task.is_none(), "restoring a task that was never dispatched");
        self.task = Some(task);
    }
}

impl fmt::Debug for SchedulableTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulableTask")
            .field("io_kind", &self.io_kind)
            .field("object_ranges", &self.object_ranges)
            .field("mem_ranges", &self.mem_ranges)
            .field("blocking_dependencies", &self.blocking_dependencies)
            .field("to_unblock", &self.to_unblock)
            .field("active", &self.active)
            .field("detached_post", &self.detached_post)
            .field("task", &self.task)
            .finish()
    }
}

/// Storage for every live task, addressed by [`TaskId`].
#[derive(Debug, Default)]
pub struct TaskArena {
    slots: Slab<SchedulableTask>,
}

impl TaskArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a task and return its id.
    pub fn insert(&mut self, task: SchedulableTask) -> TaskId {
        TaskId(self.slots.insert(task))
    }

    /// Remove a task. Panics on an unknown id.
    pub fn remove(&mut self, id: TaskId) -> SchedulableTask {
        assert!(self.slots.contains(id.0), "unknown task {id}");
        self.slots.remove(id.0)
    }

    /// Task stored under `id`, if any.
    pub fn get(&self, id: TaskId) -> Option<&SchedulableTask> {
        self.slots.get(id.0)
    }

    /// Mutable access to the task stored under `id`, if any.
    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut SchedulableTask> {
        self.slots.get_mut(id.0)
    }

    /// Whether `id` refers to a live task.
    pub fn contains(&self, id: TaskId) -> bool {
        self.slots.contains(id.0)
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no task is stored.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Make `dependent` wait for `blocker`.
    ///
    /// The two tasks must collide and must not be able to run concurrently.
    pub fn register_to_unblock(&mut self, blocker: TaskId, dependent: TaskId) {
        assert_ne!(blocker, dependent, "task {blocker} cannot depend on itself");
        let Some((blocker_task, dependent_task)) = self.slots.get2_mut(blocker.0, dependent.0) else {
            panic!("unknown task in dependency {blocker} -> {dependent}");
        };
        assert!(
            blocker_task.collide(dependent_task),
            "task {dependent} registered on {blocker} without colliding"
        );
        assert!(
            !blocker_task.can_run_concurrently(dependent_task),
            "task {dependent} registered on {blocker} although they can run concurrently"
        );
        blocker_task.to_unblock.push(dependent);
        dependent_task.blocking_dependencies += 1;
    }
}

impl Index<TaskId> for TaskArena {
    type Output = SchedulableTask;

    fn index(&self, id: TaskId) -> &SchedulableTask {
        match self.slots.get(id.0) {
            Some(task) => task,
            None => panic!("unknown task {id}"),
        }
    }
}

impl IndexMut<TaskId> for TaskArena {
    fn index_mut(&mut self, id: TaskId) -> &mut SchedulableTask {
        match self.slots.get_mut(id.0) {
            Some(task) => task,
            None => panic!("unknown task {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_range::{ObjectId, ObjectRange};
    use crate::range::Range;
    use crate::task::TaskOps;

    struct Noop;

    impl TaskOps for Noop {
        fn run_action(&mut self) {}
    }

    fn io_task(kind: IoKind, object: i64, offset: usize, size: usize) -> SchedulableTask {
        let ranges = ObjectRangeSet::single(ObjectRange::new(ObjectId::new(0, object), offset, size));
        SchedulableTask::new(kind, ranges, RangeSet::default(), Task::new(Noop))
    }

    fn mem_task(kind: IoKind, addr: usize, size: usize) -> SchedulableTask {
        let mem = RangeSet::from_ranges([Range::new(addr, size)]);
        SchedulableTask::new(kind, ObjectRangeSet::default(), mem, Task::new(Noop))
    }

    // ==================== Collision ====================

    #[test]
    fn test_collide_on_object_ranges() {
        let a = io_task(IoKind::Read, 1, 0, 100);
        let b = io_task(IoKind::Write, 1, 50, 100);
        let c = io_task(IoKind::Write, 2, 50, 100);
        assert!(a.collide(&b));
        assert!(!a.collide(&c));
    }

    #[test]
    fn test_collide_on_mem_ranges() {
        let a = mem_task(IoKind::Write, 0x1000, 0x100);
        let b = mem_task(IoKind::Write, 0x10f0, 0x100);
        let c = mem_task(IoKind::Write, 0x1100, 0x100);
        assert!(a.collide(&b));
        assert!(!a.collide(&c));
    }

    #[test]
    fn test_concurrency_rules() {
        let r1 = io_task(IoKind::Read, 1, 0, 10);
        let r2 = io_task(IoKind::Read, 1, 0, 10);
        let w = io_task(IoKind::Write, 1, 0, 10);
        assert!(r1.can_run_concurrently(&r2));
        assert!(!r1.can_run_concurrently(&w));
        assert!(!w.can_run_concurrently(&r1));
        assert!(!w.can_run_concurrently(&w));
    }

    // ==================== Dependencies ====================

    #[test]
    fn test_register_and_unblock() {
        let mut arena = TaskArena::new();
        let write = arena.insert(io_task(IoKind::Write, 1, 0, 100));
        let read = arena.insert(io_task(IoKind::Read, 1, 10, 10));

        arena.register_to_unblock(write, read);
        assert_eq!(arena[write].dependents(), &[read]);
        assert!(arena[read].is_blocked());
        assert_eq!(arena[read].blocking_dependencies(), 1);

        assert!(arena[read].unblock());
        assert!(!arena[read].is_blocked());
    }

    #[test]
    #[should_panic(expected = "can run concurrently")]
    fn test_register_concurrent_tasks_panics() {
        let mut arena = TaskArena::new();
        let a = arena.insert(io_task(IoKind::Read, 1, 0, 100));
        let b = arena.insert(io_task(IoKind::Read, 1, 0, 100));
        arena.register_to_unblock(a, b);
    }

    #[test]
    #[should_panic(expected = "without colliding")]
    fn test_register_disjoint_tasks_panics() {
        let mut arena = TaskArena::new();
        let a = arena.insert(io_task(IoKind::Write, 1, 0, 100));
        let b = arena.insert(io_task(IoKind::Write, 1, 100, 100));
        arena.register_to_unblock(a, b);
    }

    #[test]
    #[should_panic(expected = "no blocking dependency")]
    fn test_unblock_unblocked_task_panics() {
        let mut task = io_task(IoKind::Read, 1, 0, 1);
        task.unblock();
    }

    // ==================== Flags & storage ====================

    #[test]
    fn test_flags() {
        let mut task = io_task(IoKind::Write, 1, 0, 1);
        assert!(!task.is_active());
        assert!(!task.is_detached_post());
        task.activate();
        task.set_detached_post();
        assert!(task.is_active());
        assert!(task.is_detached_post());
        assert_eq!(task.stage(), TaskStage::Prepare);
    }

    #[test]
    fn test_take_and_restore_task() {
        let mut task = io_task(IoKind::Read, 1, 0, 1);
        let inner = task.take_task();
        assert!(task.is_dispatched());
        task.restore_task(inner);
        assert!(!task.is_dispatched());
    }

    #[test]
    fn test_arena_reuses_slots() {
        let mut arena = TaskArena::new();
        let a = arena.insert(io_task(IoKind::Read, 1, 0, 1));
        assert_eq!(arena.len(), 1);
        arena.remove(a);
        assert!(arena.is_empty());
        assert!(!arena.contains(a));
        let b = arena.insert(io_task(IoKind::Read, 1, 0, 1));
        assert_eq!(a, b);
    }

    #[test]
    #[should_panic(expected = "unknown task")]
    fn test_index_unknown_task_panics() {
        let arena = TaskArena::new();
        let _ = &arena[TaskId::new(3)];
    }
}
