//! # ioc-scheduler
//!
//! Task scheduling and dependency tracking for the IOCatcher server.
//!
//! Every I/O request becomes a task covering a set of object byte ranges and
//! memory ranges. Tasks that touch common bytes and cannot share them (any
//! write is exclusive) are ordered by arrival; everything else runs in
//! parallel on a pool of worker threads.
//!
//! Features:
//! - Range and object-range collision
//! - Arrival-ordered dependency tracking with cascade release
//! - Three-stage task lifecycle (prepare, action, post-action)
//! - Worker pool with inline fallback and passive-polling wakeups
//! - Detached post-actions for asynchronous completions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blocking_queue;
pub mod completion;
pub mod error;
pub mod object_range;
pub mod range;
pub mod range_set;
pub mod schedulable;
pub mod scheduler;
pub mod task;
pub mod task_runner;
pub mod worker_pool;

pub use blocking_queue::BlockingQueue;
pub use completion::{CompletionNotifier, DetachedCompletion, JoinCounter};
pub use error::{SchedulerError, SchedulerResult};
pub use object_range::{ObjectId, ObjectRange, ObjectRangeSet};
pub use range::{Collide, MemRange, Range};
pub use range_set::{RangeList, RangeSet};
pub use schedulable::{IoKind, SchedulableTask, TaskArena, TaskId};
pub use scheduler::Scheduler;
pub use task::{PostContext, PrepareContext, StageContext, Task, TaskOps, TaskStage};
pub use task_runner::TaskRunner;
pub use worker_pool::{FinishedTask, Wakeup, WorkerPool};
