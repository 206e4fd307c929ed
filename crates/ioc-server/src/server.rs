//! Request dispatch

use crate::config::ServerConfig;
use crate::consistency::ConsistencyRegistry;
use crate::error::ServerResult;
use crate::protocol::{ClientId, ObjReadWrite, Request};
use crate::stats::ServerStats;
use crate::tasks::{CowTask, FlushTask, IoContext, RdmaDirection, ReadEagerTask, ReadWriteRdmaTask, WriteEagerTask};
use crate::transport::Connection;
use ioc_scheduler::{SchedulableTask, TaskId, TaskRunner, Wakeup};
use ioc_storage::{Container, SharedContainer, StorageBackend};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns client requests into tasks and drives them.
///
/// Must be owned and polled by a single network thread.
pub struct Server {
    config: ServerConfig,
    runner: TaskRunner,
    ctx: IoContext,
    consistency: ConsistencyRegistry,
}

impl Server {
    /// Create a server answering through `connection`. Objects are loaded
    /// from and flushed to `backend`, when one is given.
    pub fn new(
        config: ServerConfig,
        connection: Arc<dyn Connection>,
        backend: Option<Arc<dyn StorageBackend>>,
    ) -> ServerResult<Self> {
        Self::build(config, connection, backend, None)
    }

    /// Same as [`Server::new`], signalling `wakeup` whenever work completes
    /// off the network thread.
    pub fn with_wakeup(
        config: ServerConfig,
        connection: Arc<dyn Connection>,
        backend: Option<Arc<dyn StorageBackend>>,
        wakeup: Arc<dyn Wakeup>,
    ) -> ServerResult<Self> {
        Self::build(config, connection, backend, Some(wakeup))
    }

    fn build(
        config: ServerConfig,
        connection: Arc<dyn Connection>,
        backend: Option<Arc<dyn StorageBackend>>,
        wakeup: Option<Arc<dyn Wakeup>>,
    ) -> ServerResult<Self> {
        config.validate()?;
        let runner = match wakeup {
            Some(wakeup) => TaskRunner::with_wakeup(config.workers, wakeup)?,
            None => TaskRunner::new(config.workers)?,
        };
        let container = Container::new(backend, config.segment_alignment).into_shared();
        info!(
            workers = config.workers,
            eager_max_read = config.eager_max_read,
            max_rdma_segments = config.max_rdma_segments,
            "server ready"
        );
        Ok(Self {
            runner,
            ctx: IoContext::new(container, connection, Arc::new(ServerStats::new())),
            consistency: ConsistencyRegistry::new(),
            config,
        })
    }

    /// Submit `request` from `client`.
    ///
    /// Malformed requests are answered with -1 right away and yield no task.
    /// Range registrations are answered right away too: the status is the
    /// registration id, 0 for a release, or -1.
    pub fn on_request(&mut self, client: ClientId, request: Request) -> Option<TaskId> {
        let kind = request.response_kind();
        let task = match request {
            Request::RangeRegister(req) => {
                let status = self.consistency.register(&req).map_or(-1, i64::from);
                self.ctx.responder(client, kind).send(status, None);
                return None;
            }
            Request::RangeUnregister(req) => {
                let status = if self.consistency.unregister(&req) { 0 } else { -1 };
                self.ctx.responder(client, kind).send(status, None);
                return None;
            }
            request => self.build_task(client, request),
        };
        let Some(task) = task else {
            self.ctx.responder(client, kind).send(-1, None);
            return None;
        };
        let id = self.runner.push_task(task);
        debug!(client, task = %id, %kind, "request submitted");
        Some(id)
    }

    fn build_task(&self, client: ClientId, request: Request) -> Option<SchedulableTask> {
        let ctx = &self.ctx;
        let task = match request {
            Request::Read(req) => {
                check_range(client, &req)?;
                if req.size <= self.config.eager_max_read {
                    ReadEagerTask::new(ctx, client, req).into_schedulable()
                } else {
                    self.rdma(client, req, RdmaDirection::ToClient)?
                }
            }
            Request::Write(mut req) => {
                check_range(client, &req)?;
                match req.data.take() {
                    Some(data) if data.len() == req.size => WriteEagerTask::new(ctx, client, req, data).into_schedulable(),
                    Some(data) => {
                        warn!(client, size = req.size, inline = data.len(), "inline data size mismatch");
                        return None;
                    }
                    None => self.rdma(client, req, RdmaDirection::FromClient)?,
                }
            }
            Request::Flush(req) => match FlushTask::new(ctx, client, req).into_schedulable() {
                Some(task) => task,
                None => {
                    warn!(client, offset = req.offset, size = req.size, "invalid flush range");
                    return None;
                }
            },
            Request::Cow(req) => match CowTask::new(ctx, client, req).into_schedulable() {
                Some(task) => task,
                None => {
                    warn!(client, offset = req.range_offset, size = req.range_size, "invalid cow range");
                    return None;
                }
            },
            Request::RangeRegister(_) | Request::RangeUnregister(_) => return None,
        };
        Some(task)
    }

    fn rdma(&self, client: ClientId, req: ObjReadWrite, direction: RdmaDirection) -> Option<SchedulableTask> {
        if req.iov.advance(req.size).is_none() {
            warn!(client, addr = req.iov.addr, size = req.size, "rdma target overflows");
            return None;
        }
        Some(ReadWriteRdmaTask::new(&self.ctx, client, req, direction, self.config.max_rdma_segments).into_schedulable())
    }

    /// Handle completed work without blocking. Returns the number of tasks
    /// handled.
    pub fn poll(&mut self) -> usize {
        self.runner.schedule()
    }

    /// Poll until every submitted request is answered.
    pub fn wait_all_finished(&mut self) {
        self.runner.wait_all_finished();
    }

    /// Requests submitted and not yet released.
    pub fn pending_requests(&self) -> usize {
        self.runner.pending_tasks()
    }

    /// Server counters.
    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.ctx.stats
    }

    /// Objects served.
    pub fn container(&self) -> &SharedContainer {
        &self.ctx.container
    }

    /// Client range registrations.
    pub fn consistency(&self) -> &ConsistencyRegistry {
        &self.consistency
    }

    /// Active configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn check_range(client: ClientId, req: &ObjReadWrite) -> Option<()> {
    if req.size == 0 || req.offset.checked_add(req.size).is_none() {
        warn!(client, object = %req.object_id, offset = req.offset, size = req.size, "invalid request range");
        return None;
    }
    Some(())
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("pending", &self.runner.pending_tasks())
            .finish_non_exhaustive()
    }
}
