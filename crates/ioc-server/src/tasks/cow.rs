//! Copy-on-write clone of an object or of one of its ranges

use super::{take_responder, IoContext, Responder};
use crate::protocol::{ClientId, ObjCow, ResponseKind};
use ioc_scheduler::{
    IoKind, MemRange, ObjectId, ObjectRange, ObjectRangeSet, PostContext, PrepareContext, RangeSet, SchedulableTask,
    Task, TaskOps,
};
use ioc_storage::{Container, SharedContainer};
use tracing::warn;

/// Shares the buffers of the source object with the destination.
///
/// Scheduled as a write on both objects.
pub struct CowTask {
    container: SharedContainer,
    responder: Option<Responder>,
    request: ObjCow,
    status: i64,
}

impl CowTask {
    /// Task applying `request` for `client`.
    pub fn new(ctx: &IoContext, client: ClientId, request: ObjCow) -> Self {
        Self {
            container: ctx.container.clone(),
            responder: Some(ctx.responder(client, ResponseKind::CowAck)),
            request,
            status: -1,
        }
    }

    /// Wrap for the runner. `None` when the requested range is empty or
    /// overflows.
    pub fn into_schedulable(self) -> Option<SchedulableTask> {
        let mut ranges = ObjectRangeSet::new(2);
        ranges.push(self.object_range(self.request.source)?);
        ranges.push(self.object_range(self.request.dest)?);
        Some(SchedulableTask::new(IoKind::Write, ranges, RangeSet::default(), Task::new(self)))
    }

    fn object_range(&self, id: ObjectId) -> Option<ObjectRange> {
        ObjectRange::requested(id, self.request.range_offset, self.request.range_size)
    }

    fn mem_ranges(&self, container: &Container, id: ObjectId) -> Vec<MemRange> {
        let (Some(range), Some(object)) = (self.object_range(id), container.object(id)) else {
            return Vec::new();
        };
        object.mem_ranges(range.range.offset, range.range.size).iter().copied().collect()
    }
}

impl TaskOps for CowTask {
    fn run_prepare(&mut self, ctx: &mut PrepareContext) {
        let container = self.container.lock();
        let mut ranges = self.mem_ranges(&container, self.request.source);
        ranges.extend(self.mem_ranges(&container, self.request.dest));
        ctx.protect_mem_ranges(RangeSet::from_ranges(ranges));
    }

    fn run_action(&mut self) {
        let req = self.request;
        let mut container = self.container.lock();
        let result = if req.range_size == 0 {
            container.make_object_full_cow(req.source, req.dest, req.allow_exist)
        } else {
            container.make_object_range_cow(req.source, req.dest, req.allow_exist, req.range_offset, req.range_size)
        };
        self.status = match result {
            Ok(()) => 0,
            Err(err) => {
                warn!(source = %req.source, dest = %req.dest, error = %err, "copy-on-write failed");
                -1
            }
        };
    }

    fn run_post_action(&mut self, _ctx: &mut PostContext) {
        take_responder(&mut self.responder).send(self.status, None);
    }
}
