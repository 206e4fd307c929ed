//! Connection seam between the tasks and the network transport

use crate::protocol::{ClientId, RemoteIov, ResponseKind};
use bytes::Bytes;
use ioc_scheduler::{BlockingQueue, Wakeup};
use ioc_storage::SegmentSlice;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// Called once an RDMA transfer finished, with its success state.
///
/// May run on any thread.
pub type RdmaCallback = Box<dyn FnOnce(bool) + Send>;

/// Operations the tasks need from the transport.
pub trait Connection: Send + Sync {
    /// Send an acknowledgement, with an optional inline payload.
    fn send_response(&self, kind: ResponseKind, client: ClientId, status: i64, payload: Option<Bytes>);

    /// Copy client memory starting at `remote` into `local`, in order.
    fn rdma_read(&self, client: ClientId, local: Vec<SegmentSlice>, remote: RemoteIov, on_done: RdmaCallback);

    /// Copy `local`, in order, into client memory starting at `remote`.
    fn rdma_write(&self, client: ClientId, local: Vec<SegmentSlice>, remote: RemoteIov, on_done: RdmaCallback);
}

/// Acknowledgement recorded by [`LoopbackConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentResponse {
    /// Acknowledgement kind
    pub kind: ResponseKind,
    /// Destination client
    pub client: ClientId,
    /// Status code
    pub status: i64,
    /// Inline payload
    pub payload: Option<Bytes>,
}

/// In-process transport.
///
/// Each client owns a flat memory region addressed from 0, RDMA transfers
/// copy to and from it, and responses are queued for the caller to inspect.
/// Transfers can be held back with [`LoopbackConnection::hold_rdma`] to
/// emulate an asynchronous network.
#[derive(Default)]
pub struct LoopbackConnection {
    memory: Mutex<HashMap<ClientId, Vec<u8>>>,
    responses: BlockingQueue<SentResponse>,
    held: Mutex<Option<Vec<(bool, RdmaCallback)>>>,
    wakeups: AtomicUsize,
}

impl LoopbackConnection {
    /// Create a transport with no client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `client` a zeroed memory region of `size` bytes.
    pub fn register_client(&self, client: ClientId, size: usize) {
        self.memory.lock().insert(client, vec![0; size]);
    }

    /// Overwrite client memory at `addr`.
    pub fn write_client_memory(&self, client: ClientId, addr: u64, data: &[u8]) {
        let mut memory = self.memory.lock();
        let region = memory.entry(client).or_default();
        let start = addr as usize;
        if region.len() < start + data.len() {
            region.resize(start + data.len(), 0);
        }
        region[start..start + data.len()].copy_from_slice(data);
    }

    /// Copy of `len` bytes of client memory at `addr`.
    pub fn read_client_memory(&self, client: ClientId, addr: u64, len: usize) -> Option<Vec<u8>> {
        let span = Self::span(addr, len)?;
        self.memory.lock().get(&client)?.get(span).map(<[u8]>::to_vec)
    }

    /// Next queued response, if any.
    pub fn try_response(&self) -> Option<SentResponse> {
        self.responses.try_pop()
    }

    /// Next queued response, waiting for one.
    pub fn wait_response(&self) -> SentResponse {
        self.responses.pop()
    }

    /// Number of responses not yet taken.
    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }

    /// Keep transfer callbacks until [`LoopbackConnection::release_rdma`].
    pub fn hold_rdma(&self) {
        let mut held = self.held.lock();
        if held.is_none() {
            *held = Some(Vec::new());
        }
    }

    /// Fire every held callback and stop holding. Returns how many fired.
    pub fn release_rdma(&self) -> usize {
        let held = self.held.lock().take().unwrap_or_default();
        let fired = held.len();
        for (ok, on_done) in held {
            on_done(ok);
        }
        fired
    }

    /// Number of passive-polling signals received.
    pub fn wakeups(&self) -> usize {
        self.wakeups.load(Ordering::Acquire)
    }

    fn finish(&self, ok: bool, on_done: RdmaCallback) {
        {
            let mut held = self.held.lock();
            if let Some(queue) = held.as_mut() {
                queue.push((ok, on_done));
                return;
            }
        }
        on_done(ok);
    }

    /// Client memory covered by a transfer of `local`, `None` on overflow.
    fn target(remote: RemoteIov, local: &[SegmentSlice]) -> Option<std::ops::Range<usize>> {
        Self::span(remote.addr, local.iter().map(SegmentSlice::len).sum())
    }

    fn span(addr: u64, len: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(addr).ok()?;
        Some(start..start.checked_add(len)?)
    }
}

impl Connection for LoopbackConnection {
    fn send_response(&self, kind: ResponseKind, client: ClientId, status: i64, payload: Option<Bytes>) {
        self.responses.push(SentResponse {
            kind,
            client,
            status,
            payload,
        });
    }

    fn rdma_read(&self, client: ClientId, local: Vec<SegmentSlice>, remote: RemoteIov, on_done: RdmaCallback) {
        let copied = {
            let memory = self.memory.lock();
            let src = match (memory.get(&client), Self::target(remote, &local)) {
                (Some(region), Some(span)) => region.get(span),
                _ => None,
            };
            match src {
                Some(mut src) => {
                    for slice in &local {
                        let (head, tail) = src.split_at(slice.len());
                        slice.write_from(head);
                        src = tail;
                    }
                    true
                }
                None => false,
            }
        };
        if !copied {
            warn!(client, addr = remote.addr, "rdma read outside client memory");
        }
        self.finish(copied, on_done);
    }

    fn rdma_write(&self, client: ClientId, local: Vec<SegmentSlice>, remote: RemoteIov, on_done: RdmaCallback) {
        let copied = {
            let mut memory = self.memory.lock();
            let dst = match (memory.get_mut(&client), Self::target(remote, &local)) {
                (Some(region), Some(span)) => region.get_mut(span),
                _ => None,
            };
            match dst {
                Some(mut dst) => {
                    for slice in &local {
                        let (head, tail) = std::mem::take(&mut dst).split_at_mut(slice.len());
                        slice.read_into(head);
                        dst = tail;
                    }
                    true
                }
                None => false,
            }
        };
        if !copied {
            warn!(client, addr = remote.addr, "rdma write outside client memory");
        }
        self.finish(copied, on_done);
    }
}

impl Wakeup for LoopbackConnection {
    fn signal_passive_polling(&self) {
        self.wakeups.fetch_add(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for LoopbackConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackConnection")
            .field("clients", &self.memory.lock().len())
            .field("responses", &self.responses.len())
            .finish_non_exhaustive()
    }
}
