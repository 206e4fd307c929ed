//! Small read answered inline with the acknowledgement

use super::{take_responder, IoContext, Responder};
use crate::protocol::{ClientId, ObjReadWrite, ResponseKind};
use crate::stats::ServerStats;
use bytes::Bytes;
use ioc_scheduler::{
    IoKind, ObjectRange, ObjectRangeSet, PostContext, PrepareContext, RangeSet, SchedulableTask, Task, TaskOps,
};
use ioc_storage::{read_slices, slices_mem_ranges, AccessMode, DeferredOperationList, SegmentSlice, SharedContainer};
use std::sync::Arc;
use tracing::{debug, warn};

/// Read copied into the response payload.
pub struct ReadEagerTask {
    container: SharedContainer,
    stats: Arc<ServerStats>,
    responder: Option<Responder>,
    request: ObjReadWrite,
    ops: DeferredOperationList,
    slices: Option<Vec<SegmentSlice>>,
    status: i64,
    payload: Option<Bytes>,
}

impl ReadEagerTask {
    /// Task answering `request` for `client`.
    pub fn new(ctx: &IoContext, client: ClientId, request: ObjReadWrite) -> Self {
        Self {
            container: ctx.container.clone(),
            stats: Arc::clone(&ctx.stats),
            responder: Some(ctx.responder(client, ResponseKind::ReadAck)),
            request,
            ops: DeferredOperationList::new(),
            slices: None,
            status: -1,
            payload: None,
        }
    }

    /// Wrap for the runner.
    pub fn into_schedulable(self) -> SchedulableTask {
        let range = ObjectRange::new(self.request.object_id, self.request.offset, self.request.size);
        SchedulableTask::new(
            IoKind::Read,
            ObjectRangeSet::single(range),
            RangeSet::default(),
            Task::new(self),
        )
    }
}

impl TaskOps for ReadEagerTask {
    fn run_prepare(&mut self, ctx: &mut PrepareContext) {
        let req = &self.request;
        let fetched = self.container.lock().get_object(req.object_id).get_buffers(
            &mut self.ops,
            req.offset,
            req.size,
            AccessMode::Read,
            true,
        );
        match fetched {
            Ok(slices) => {
                ctx.protect_mem_ranges(slices_mem_ranges(&slices));
                self.slices = Some(slices);
            }
            Err(err) => warn!(object = %req.object_id, error = %err, "eager read buffers unavailable"),
        }
    }

    fn run_action(&mut self) {
        let Some(slices) = &self.slices else {
            return;
        };
        if self.ops.run_all() < 0 {
            debug!(object = %self.request.object_id, "eager read failed to load");
            return;
        }
        let mut data = vec![0u8; self.request.size];
        read_slices(slices, &mut data);
        self.stats.add_read(data.len());
        self.status = data.len() as i64;
        self.payload = Some(Bytes::from(data));
    }

    fn run_post_action(&mut self, _ctx: &mut PostContext) {
        take_responder(&mut self.responder).send(self.status, self.payload.take());
    }
}
