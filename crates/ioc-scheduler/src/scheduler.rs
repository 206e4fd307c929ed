//! Dependency tracking between live tasks
//!
//! Tasks are kept in arrival order. A new task is checked against the tasks
//! that arrived before it, most recent first; the first one it conflicts with
//! becomes its single blocker. When a blocker finishes, each released task is
//! checked again and may find a new blocker further back, so conflicts always
//! resolve in arrival order.
//!
//! The scheduler only stores ids. Task data lives in the [`TaskArena`]
//! passed to every call, and both are owned by the thread driving the
//! runner, so nothing here is synchronized.

use crate::schedulable::{TaskArena, TaskId};
use crate::task::TaskStage;
use std::collections::VecDeque;
use tracing::trace;

/// Arrival-ordered registry of live tasks.
#[derive(Debug, Default)]
pub struct Scheduler {
    registry: VecDeque<TaskId>,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task. Returns `true` if it may start right away.
    pub fn push_task(&mut self, arena: &mut TaskArena, id: TaskId) -> bool {
        assert!(arena.contains(id), "unknown task {id}");
        assert!(!self.contains(id), "task {id} registered twice");
        self.registry.push_back(id);
        self.can_schedule(arena, id)
    }

    /// Check a task again once its prepare step has run.
    ///
    /// Prepare may have changed the memory ranges it protects, so it can now
    /// conflict with an earlier task.
    pub fn can_schedule_prepared_task(&mut self, arena: &mut TaskArena, id: TaskId) -> bool {
        assert_eq!(
            arena[id].stage(),
            TaskStage::Action,
            "task {id} was not prepared"
        );
        self.can_schedule(arena, id)
    }

    /// Drop a finished task and return the dependents that may now run.
    ///
    /// Runnable tasks are returned in the order they registered on `id`.
    pub fn pop_finished_task(&mut self, arena: &mut TaskArena, id: TaskId) -> Vec<TaskId> {
        assert!(arena[id].is_active(), "task {id} finished without being active");
        let position = self
            .registry
            .iter()
            .position(|&t| t == id)
            .unwrap_or_else(|| panic!("finished task {id} is not registered"));
        self.registry.remove(position);

        let mut runnable = Vec::new();
        for dependent in arena[id].take_dependents() {
            if arena[dependent].unblock() && self.can_schedule(arena, dependent) {
                runnable.push(dependent);
            }
        }
        trace!(task = %id, released = runnable.len(), "popped finished task");
        runnable
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: TaskId) -> bool {
        self.registry.contains(&id)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether no task is registered.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Registered tasks in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.registry.iter().copied()
    }

    fn can_schedule(&self, arena: &mut TaskArena, id: TaskId) -> bool {
        let mut earlier = self.registry.iter().rev().skip_while(|&&t| t != id);
        assert!(earlier.next().is_some(), "task {id} is not registered");

        let task = &arena[id];
        let blocker = earlier
            .copied()
            .find(|&other| {
                let other = &arena[other];
                task.collide(other) && !task.can_run_concurrently(other)
            });

        match blocker {
            Some(blocker) => {
                arena.register_to_unblock(blocker, id);
                arena[id].deactivate();
                trace!(task = %id, blocker = %blocker, "task blocked");
                false
            }
            None => {
                let task = &mut arena[id];
                assert!(!task.is_blocked(), "task {id} has no blocker but is still blocked");
                task.activate();
                true
            }
        }
    }
}
