//! Small write carrying its data inline

use super::{take_responder, IoContext, Responder};
use crate::protocol::{ClientId, ObjReadWrite, ResponseKind};
use crate::stats::ServerStats;
use bytes::Bytes;
use ioc_scheduler::{
    IoKind, ObjectRange, ObjectRangeSet, PostContext, PrepareContext, RangeSet, SchedulableTask, Task, TaskOps,
};
use ioc_storage::{slices_mem_ranges, write_slices, AccessMode, DeferredOperationList, SegmentSlice, SharedContainer};
use std::sync::Arc;
use tracing::{debug, warn};

/// Write of the request payload into the object.
pub struct WriteEagerTask {
    container: SharedContainer,
    stats: Arc<ServerStats>,
    responder: Option<Responder>,
    request: ObjReadWrite,
    data: Bytes,
    ops: DeferredOperationList,
    slices: Option<Vec<SegmentSlice>>,
    status: i64,
}

impl WriteEagerTask {
    /// Task storing `data` as described by `request`.
    ///
    /// `data` must be exactly `request.size` bytes long.
    pub fn new(ctx: &IoContext, client: ClientId, request: ObjReadWrite, data: Bytes) -> Self {
        assert_eq!(data.len(), request.size, "inline data does not match the request size");
        Self {
            container: ctx.container.clone(),
            stats: Arc::clone(&ctx.stats),
            responder: Some(ctx.responder(client, ResponseKind::WriteAck)),
            request,
            data,
            ops: DeferredOperationList::new(),
            slices: None,
            status: -1,
        }
    }

    /// Wrap for the runner.
    pub fn into_schedulable(self) -> SchedulableTask {
        let range = ObjectRange::new(self.request.object_id, self.request.offset, self.request.size);
        SchedulableTask::new(
            IoKind::Write,
            ObjectRangeSet::single(range),
            RangeSet::default(),
            Task::new(self),
        )
    }
}

impl TaskOps for WriteEagerTask {
    fn run_prepare(&mut self, ctx: &mut PrepareContext) {
        let req = &self.request;
        let fetched = self.container.lock().get_object(req.object_id).get_buffers(
            &mut self.ops,
            req.offset,
            req.size,
            AccessMode::Write,
            true,
        );
        match fetched {
            Ok(slices) => {
                ctx.protect_mem_ranges(slices_mem_ranges(&slices));
                self.slices = Some(slices);
            }
            Err(err) => warn!(object = %req.object_id, error = %err, "eager write buffers unavailable"),
        }
    }

    fn run_action(&mut self) {
        let Some(slices) = &self.slices else {
            return;
        };
        if self.ops.run_all() < 0 {
            debug!(object = %self.request.object_id, "eager write failed to load");
            return;
        }
        write_slices(slices, &self.data);
        self.stats.add_write(self.data.len());
        self.status = 0;
    }

    fn run_post_action(&mut self, _ctx: &mut PostContext) {
        if self.status == 0 {
            if let Some(slices) = &self.slices {
                slices.iter().for_each(SegmentSlice::mark_dirty);
            }
        }
        take_responder(&mut self.responder).send(self.status, None);
    }
}
