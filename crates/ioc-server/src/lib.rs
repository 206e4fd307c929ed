//! # ioc-server
//!
//! Request handling of the IOCatcher server.
//!
//! Decoded client requests are turned into tasks and handed to the
//! [`ioc_scheduler::TaskRunner`], which orders those touching the same bytes
//! and runs the rest in parallel:
//! - small reads return their data inline with the acknowledgement
//! - writes carrying inline data are copied straight into the object
//! - larger transfers move by RDMA, in groups of segments
//! - flushes write dirty segments back to the storage backend
//! - copy-on-write requests clone objects or object ranges
//! - range registrations track the object ranges clients map, shared for
//!   readers and exclusive for writers
//!
//! The network transport plugs in through the [`Connection`] trait; an
//! in-process [`LoopbackConnection`] is provided.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod consistency;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod tasks;
pub mod transport;

pub use config::{ConfigError, ConfigResult, ServerConfig};
pub use consistency::{ConsistencyMode, ConsistencyRegistry, ConsistencyTracker};
pub use error::{ServerError, ServerResult};
pub use protocol::{
    ClientId, ObjCow, ObjFlush, ObjRangeRegister, ObjRangeUnregister, ObjReadWrite, RemoteIov, Request, ResponseKind,
};
pub use server::Server;
pub use stats::{LatencyHistogram, ServerStats, StatsSnapshot};
pub use transport::{Connection, LoopbackConnection, RdmaCallback, SentResponse};
