//! Flush of dirty segments to the backend

use super::{take_responder, IoContext, Responder};
use crate::protocol::{ClientId, ObjFlush, ResponseKind};
use ioc_scheduler::{
    IoKind, ObjectRange, ObjectRangeSet, PostContext, PrepareContext, RangeSet, SchedulableTask, Task, TaskOps,
};
use ioc_storage::{DeferredOperationList, SharedContainer};
use tracing::debug;

/// Writes back the dirty segments of an object range.
///
/// Scheduled as a read: it only reads memory, so it runs alongside other
/// reads but after every earlier write to the range.
pub struct FlushTask {
    container: SharedContainer,
    responder: Option<Responder>,
    request: ObjFlush,
    ops: DeferredOperationList,
    status: i64,
}

impl FlushTask {
    /// Task flushing `request` for `client`.
    pub fn new(ctx: &IoContext, client: ClientId, request: ObjFlush) -> Self {
        Self {
            container: ctx.container.clone(),
            responder: Some(ctx.responder(client, ResponseKind::FlushAck)),
            request,
            ops: DeferredOperationList::new(),
            status: -1,
        }
    }

    /// Wrap for the runner. `None` when the requested range is empty or
    /// overflows.
    pub fn into_schedulable(self) -> Option<SchedulableTask> {
        let req = self.request;
        let range = ObjectRange::requested(req.object_id, req.offset, req.size)?;
        Some(SchedulableTask::new(
            IoKind::Read,
            ObjectRangeSet::single(range),
            RangeSet::default(),
            Task::new(self),
        ))
    }
}

impl TaskOps for FlushTask {
    fn run_prepare(&mut self, ctx: &mut PrepareContext) {
        let req = self.request;
        if let Some(object) = self.container.lock().object(req.object_id) {
            self.ops = object.flush(req.offset, req.size);
        }
        ctx.protect_mem_ranges(self.ops.build_mem_ranges());
    }

    fn run_action(&mut self) {
        debug!(object = %self.request.object_id, ops = self.ops.len(), "flushing");
        self.status = self.ops.run_all() as i64;
    }

    fn run_post_action(&mut self, _ctx: &mut PostContext) {
        take_responder(&mut self.responder).send(self.status, None);
    }
}
