//! Decoded client requests and response kinds
//!
//! Messages reach the server already deserialized; the wire layout is owned
//! by the transport.

use bytes::Bytes;
use ioc_scheduler::ObjectId;
use std::fmt;

/// Transport-assigned client identifier.
pub type ClientId = u64;

/// Client memory region targeted by an RDMA transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteIov {
    /// Remote address of the first byte
    pub addr: u64,
    /// Remote protection key
    pub key: u64,
}

impl RemoteIov {
    /// Region starting `offset` bytes further, `None` past the end of the
    /// address space.
    pub fn advance(&self, offset: usize) -> Option<RemoteIov> {
        let addr = u64::try_from(offset).ok().and_then(|offset| self.addr.checked_add(offset))?;
        Some(RemoteIov { addr, key: self.key })
    }
}

/// Read or write of a byte range of an object.
#[derive(Debug, Clone)]
pub struct ObjReadWrite {
    /// Target object
    pub object_id: ObjectId,
    /// First byte in the object
    pub offset: usize,
    /// Number of bytes
    pub size: usize,
    /// Client buffer for RDMA transfers
    pub iov: RemoteIov,
    /// Data carried inline with a write request
    pub data: Option<Bytes>,
}

/// Flush of the dirty segments of an object range to the backend.
#[derive(Debug, Clone, Copy)]
pub struct ObjFlush {
    /// Target object
    pub object_id: ObjectId,
    /// First byte in the object
    pub offset: usize,
    /// Number of bytes, 0 for the whole object
    pub size: usize,
}

/// Copy-on-write clone of an object, or of a range of it.
#[derive(Debug, Clone, Copy)]
pub struct ObjCow {
    /// Object cloned
    pub source: ObjectId,
    /// Object created or updated
    pub dest: ObjectId,
    /// Accept an existing destination
    pub allow_exist: bool,
    /// First byte of the range
    pub range_offset: usize,
    /// Bytes of the range, 0 for the whole object
    pub range_size: usize,
}

/// Registration of an object range mapped by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjRangeRegister {
    /// Target object
    pub object_id: ObjectId,
    /// First byte in the object
    pub offset: usize,
    /// Number of bytes
    pub size: usize,
    /// Exclusive write access instead of shared read access
    pub write: bool,
}

/// Release of a range registered with [`ObjRangeRegister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjRangeUnregister {
    /// Id returned when the range was registered
    pub id: i32,
    /// Target object
    pub object_id: ObjectId,
    /// First byte of a range enclosing the registration
    pub offset: usize,
    /// Number of bytes
    pub size: usize,
    /// Access the range was registered with
    pub write: bool,
}

/// Request handled by the server.
#[derive(Debug, Clone)]
pub enum Request {
    /// Object read
    Read(ObjReadWrite),
    /// Object write
    Write(ObjReadWrite),
    /// Object flush
    Flush(ObjFlush),
    /// Copy-on-write
    Cow(ObjCow),
    /// Range registration
    RangeRegister(ObjRangeRegister),
    /// Range release
    RangeUnregister(ObjRangeUnregister),
}

impl Request {
    /// Acknowledgement kind answering this request.
    pub fn response_kind(&self) -> ResponseKind {
        match self {
            Request::Read(_) => ResponseKind::ReadAck,
            Request::Write(_) => ResponseKind::WriteAck,
            Request::Flush(_) => ResponseKind::FlushAck,
            Request::Cow(_) => ResponseKind::CowAck,
            Request::RangeRegister(_) => ResponseKind::RangeRegisterAck,
            Request::RangeUnregister(_) => ResponseKind::RangeUnregisterAck,
        }
    }
}

/// Kind of acknowledgement sent to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// Answer to [`Request::Read`]
    ReadAck,
    /// Answer to [`Request::Write`]
    WriteAck,
    /// Answer to [`Request::Flush`]
    FlushAck,
    /// Answer to [`Request::Cow`]
    CowAck,
    /// Answer to [`Request::RangeRegister`], carrying the registration id
    RangeRegisterAck,
    /// Answer to [`Request::RangeUnregister`]
    RangeUnregisterAck,
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseKind::ReadAck => "read-ack",
            ResponseKind::WriteAck => "write-ack",
            ResponseKind::FlushAck => "flush-ack",
            ResponseKind::CowAck => "cow-ack",
            ResponseKind::RangeRegisterAck => "range-register-ack",
            ResponseKind::RangeUnregisterAck => "range-unregister-ack",
        };
        f.write_str(name)
    }
}
