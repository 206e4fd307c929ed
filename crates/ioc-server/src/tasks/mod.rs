//! I/O tasks built from client requests
//!
//! Each request type maps to a [`TaskOps`](ioc_scheduler::TaskOps)
//! implementation. Buffers are fetched in prepare on the network thread,
//! backend transfers and copies run in the action, and the acknowledgement
//! goes out in the post-action.

mod cow;
mod flush;
mod rdma;
mod read_eager;
mod write_eager;

pub use cow::CowTask;
pub use flush::FlushTask;
pub use rdma::{RdmaDirection, ReadWriteRdmaTask};
pub use read_eager::ReadEagerTask;
pub use write_eager::WriteEagerTask;

use crate::protocol::{ClientId, ResponseKind};
use crate::stats::ServerStats;
use crate::transport::Connection;
use bytes::Bytes;
use ioc_storage::SharedContainer;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Shared handles every task needs.
#[derive(Clone)]
pub struct IoContext {
    /// Objects served
    pub container: SharedContainer,
    /// Transport to the clients
    pub connection: Arc<dyn Connection>,
    /// Server counters
    pub stats: Arc<ServerStats>,
}

impl IoContext {
    /// Bundle the handles.
    pub fn new(container: SharedContainer, connection: Arc<dyn Connection>, stats: Arc<ServerStats>) -> Self {
        Self {
            container,
            connection,
            stats,
        }
    }

    /// Responder answering `client` with `kind`, timed from now.
    pub fn responder(&self, client: ClientId, kind: ResponseKind) -> Responder {
        Responder {
            connection: Arc::clone(&self.connection),
            stats: Arc::clone(&self.stats),
            client,
            kind,
            received: Instant::now(),
        }
    }
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext").finish_non_exhaustive()
    }
}

/// Sends the single acknowledgement of a request.
///
/// Consumed by [`Responder::send`], so a request cannot be answered twice.
pub struct Responder {
    connection: Arc<dyn Connection>,
    stats: Arc<ServerStats>,
    client: ClientId,
    kind: ResponseKind,
    received: Instant,
}

impl Responder {
    /// Client to answer.
    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Send the acknowledgement and record it.
    pub fn send(self, status: i64, payload: Option<Bytes>) {
        trace!(client = self.client, kind = %self.kind, status, "ack");
        self.connection.send_response(self.kind, self.client, status, payload);
        self.stats.record_ack(self.kind, status, self.received.elapsed());
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("client", &self.client)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Take the responder of a task that answers once.
fn take_responder(slot: &mut Option<Responder>) -> Responder {
    match slot.take() {
        Some(responder) => responder,
        None => panic!("request already acknowledged"),
    }
}
