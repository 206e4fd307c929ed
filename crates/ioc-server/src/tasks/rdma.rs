//! Read or write moving the data by RDMA
//!
//! The post-action detaches: transfers complete asynchronously and the task
//! keeps its ranges protected until the last one is done.

use super::{take_responder, IoContext, Responder};
use crate::protocol::{ClientId, ObjReadWrite, ResponseKind};
use crate::stats::ServerStats;
use crate::transport::Connection;
use ioc_scheduler::{
    DetachedCompletion, IoKind, JoinCounter, ObjectRange, ObjectRangeSet, PostContext, PrepareContext, RangeSet,
    SchedulableTask, Task, TaskOps,
};
use ioc_storage::{slices_mem_ranges, AccessMode, DeferredOperationList, SegmentSlice, SharedContainer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Which way the bytes travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdmaDirection {
    /// Object to client (client read)
    ToClient,
    /// Client to object (client write)
    FromClient,
}

impl RdmaDirection {
    fn io_kind(self) -> IoKind {
        match self {
            RdmaDirection::ToClient => IoKind::Read,
            RdmaDirection::FromClient => IoKind::Write,
        }
    }

    fn access_mode(self) -> AccessMode {
        match self {
            RdmaDirection::ToClient => AccessMode::Read,
            RdmaDirection::FromClient => AccessMode::Write,
        }
    }

    fn response_kind(self) -> ResponseKind {
        match self {
            RdmaDirection::ToClient => ResponseKind::ReadAck,
            RdmaDirection::FromClient => ResponseKind::WriteAck,
        }
    }
}

/// Object read or write whose payload moves by RDMA.
pub struct ReadWriteRdmaTask {
    direction: RdmaDirection,
    container: SharedContainer,
    connection: Arc<dyn Connection>,
    stats: Arc<ServerStats>,
    responder: Option<Responder>,
    request: ObjReadWrite,
    max_segments: usize,
    ops: DeferredOperationList,
    slices: Option<Vec<SegmentSlice>>,
    status: i64,
}

impl ReadWriteRdmaTask {
    /// Task serving `request` for `client`. Each RDMA operation moves at
    /// most `max_segments` segments.
    pub fn new(
        ctx: &IoContext,
        client: ClientId,
        request: ObjReadWrite,
        direction: RdmaDirection,
        max_segments: usize,
    ) -> Self {
        assert!(max_segments > 0, "rdma operations need at least one segment");
        Self {
            direction,
            container: ctx.container.clone(),
            connection: Arc::clone(&ctx.connection),
            stats: Arc::clone(&ctx.stats),
            responder: Some(ctx.responder(client, direction.response_kind())),
            request,
            max_segments,
            ops: DeferredOperationList::new(),
            slices: None,
            status: -1,
        }
    }

    /// Wrap for the runner.
    pub fn into_schedulable(self) -> SchedulableTask {
        let range = ObjectRange::new(self.request.object_id, self.request.offset, self.request.size);
        SchedulableTask::new(
            self.direction.io_kind(),
            ObjectRangeSet::single(range),
            RangeSet::default(),
            Task::new(self),
        )
    }

    fn start_transfers(&mut self, slices: Vec<SegmentSlice>, completion: DetachedCompletion) {
        let responder = take_responder(&mut self.responder);
        let client = responder.client();
        let groups = slices.len().div_ceil(self.max_segments);
        let failed = Arc::new(AtomicBool::new(false));

        let join = {
            let failed = Arc::clone(&failed);
            let stats = Arc::clone(&self.stats);
            let direction = self.direction;
            let size = self.request.size;
            JoinCounter::new(groups, move || {
                let status = if failed.load(Ordering::Acquire) {
                    -1
                } else {
                    match direction {
                        RdmaDirection::ToClient => stats.add_read(size),
                        RdmaDirection::FromClient => stats.add_write(size),
                    }
                    0
                };
                responder.send(status, None);
                completion.complete();
            })
        };

        trace!(client, groups, segments = slices.len(), "starting rdma transfers");
        let mut remote = Some(self.request.iov);
        for group in slices.chunks(self.max_segments) {
            let bytes: usize = group.iter().map(SegmentSlice::len).sum();
            let join = join.clone();
            let failed = Arc::clone(&failed);
            let on_done = Box::new(move |ok: bool| {
                if !ok {
                    failed.store(true, Ordering::Release);
                }
                join.arrive();
            });
            let Some(target) = remote else {
                warn!(client, "rdma target past the client address space");
                on_done(false);
                continue;
            };
            match self.direction {
                RdmaDirection::ToClient => self.connection.rdma_write(client, group.to_vec(), target, on_done),
                RdmaDirection::FromClient => self.connection.rdma_read(client, group.to_vec(), target, on_done),
            }
            remote = target.advance(bytes);
        }
    }
}

impl TaskOps for ReadWriteRdmaTask {
    fn run_prepare(&mut self, ctx: &mut PrepareContext) {
        let req = &self.request;
        let fetched = self.container.lock().get_object(req.object_id).get_buffers(
            &mut self.ops,
            req.offset,
            req.size,
            self.direction.access_mode(),
            true,
        );
        match fetched {
            Ok(slices) => {
                ctx.protect_mem_ranges(slices_mem_ranges(&slices));
                self.slices = Some(slices);
            }
            Err(err) => warn!(object = %req.object_id, error = %err, "rdma buffers unavailable"),
        }
    }

    fn run_action(&mut self) {
        if self.slices.is_none() {
            return;
        }
        self.status = if self.ops.run_all() < 0 { -1 } else { 0 };
        if self.status < 0 {
            debug!(object = %self.request.object_id, "rdma request failed to load");
        }
    }

    fn run_post_action(&mut self, ctx: &mut PostContext) {
        let slices = match self.slices.take() {
            Some(slices) if self.status >= 0 => slices,
            _ => {
                take_responder(&mut self.responder).send(-1, None);
                return;
            }
        };
        if self.direction == RdmaDirection::FromClient {
            slices.iter().for_each(SegmentSlice::mark_dirty);
        }
        let completion = ctx.detach();
        self.start_transfers(slices, completion);
    }
}
