//! A shared receive queue (SRQ) for an RDMA-style verbs provider.
//!
//! The crate models the provider side of `ibv_create_srq`, `ibv_post_srq_recv`,
//! `ibv_modify_srq`, `ibv_query_srq` and `ibv_destroy_srq`, plus the internal
//! `pop` a receiving queue pair uses to fetch the next buffer when a message
//! arrives. Device capabilities, the backing allocator and the asynchronous
//! event channel are narrow traits and plain values supplied by the embedder.
pub use tracing;

pub mod alloc;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod ordering;
pub mod srq;
pub mod wr;

pub(crate) mod resource;

pub use alloc::{AllocationError, ObjectAllocator, ObjectKind, QuotaAllocator, SystemAllocator};
pub use config::DeviceConfig;
pub use device::{Behavior, Device, DeviceAttr, ProtectionDomain};
pub use error::{Error, PostError, Result};
pub use event::{AsyncEvent, EventHandler, EventKind};
pub use ordering::{OrderingMode, OrderingPolicy};
pub use srq::{Srq, SrqAttr, SrqAttrMask, SrqInitAttr};
pub use wr::{RecvWqe, RecvWr, Sge, MAX_PAYLOAD_LEN};

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u64);

impl Handle {
    pub const INVALID: Handle = Handle(u64::MAX);
}
