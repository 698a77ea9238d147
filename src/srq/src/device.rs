//! The device an SRQ is created on: capability limits, behaviour switches,
//! the backing allocator and the table of live SRQs.
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::alloc::{ObjectAllocator, SystemAllocator};
use crate::config::DeviceConfig;
use crate::ordering::{OrderingMode, OrderingPolicy};
use crate::resource::ResourceTable;
use crate::srq::{Srq, SrqAttr, SrqAttrMask, SrqInitAttr};
use crate::{Error, Handle, Result};

/// Device limits relevant to SRQs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAttr {
    pub max_srq_wr: u32,
    pub max_srq_sge: u32,
}

bitflags! {
    /// Device behaviour switches.
    #[derive(Default)]
    pub struct Behavior: u32 {
        /// A zero-length SGE counts as a `MAX_PAYLOAD_LEN` buffer.
        const ZERO_LEN_SGE_AS_MAX_LEN = 0b00000001;
        /// Alternate between tail-append and head-insert when posting to an SRQ.
        const SRQ_SHUFFLE = 0b00000010;
        /// Reject receive requests longer than `MAX_PAYLOAD_LEN`.
        const ENFORCE_MAX_PAYLOAD = 0b00000100;
    }
}

pub struct Device {
    attr: DeviceAttr,
    behavior: Behavior,
    ordering: OrderingPolicy,
    allocator: Arc<dyn ObjectAllocator>,
    pub(crate) srqs: ResourceTable<Srq>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("attr", &self.attr)
            .field("behavior", &self.behavior)
            .field("ordering", &self.ordering.mode())
            .field("num_srqs", &self.srqs.len())
            .finish()
    }
}

impl Device {
    pub fn open(config: &DeviceConfig, allocator: Arc<dyn ObjectAllocator>) -> Arc<Self> {
        let behavior = config.behavior();
        let mode = if behavior.contains(Behavior::SRQ_SHUFFLE) {
            tracing::warn!("SRQ shuffle is enabled, receive WQEs will be consumed out of order");
            OrderingMode::Shuffle
        } else {
            OrderingMode::Fifo
        };
        let device = Device {
            attr: config.attr(),
            behavior,
            ordering: OrderingPolicy::new(mode),
            allocator,
            srqs: ResourceTable::default(),
        };
        tracing::debug!("device opened: {:?}", device);
        Arc::new(device)
    }

    pub fn with_system_allocator(config: &DeviceConfig) -> Arc<Self> {
        Self::open(config, Arc::new(SystemAllocator::new()))
    }

    #[inline]
    pub fn attr(&self) -> DeviceAttr {
        self.attr
    }

    #[inline]
    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    #[inline]
    pub fn ordering(&self) -> &OrderingPolicy {
        &self.ordering
    }

    #[inline]
    pub fn allocator(&self) -> &Arc<dyn ObjectAllocator> {
        &self.allocator
    }

    pub fn alloc_pd(self: &Arc<Self>) -> ProtectionDomain {
        ProtectionDomain {
            device: Arc::clone(self),
        }
    }

    /// Number of SRQs created on this device and not yet destroyed.
    pub fn num_srqs(&self) -> usize {
        self.srqs.len()
    }

    pub fn srq(&self, handle: Handle) -> Result<Arc<Srq>> {
        self.srqs
            .get(&handle)
            .ok_or(Error::InvalidArgument("unknown SRQ handle"))
    }

    pub fn query_srq(&self, handle: Handle) -> Result<SrqAttr> {
        Ok(self.srq(handle)?.query())
    }

    pub fn modify_srq(&self, handle: Handle, mask: SrqAttrMask, attr: &SrqAttr) -> Result<()> {
        self.srq(handle)?.modify(mask, attr)
    }

    /// Destroys the SRQ behind `handle` and returns the number of WQEs freed.
    /// An unknown handle is not an error.
    pub fn destroy_srq(&self, handle: Handle) -> usize {
        match self.srqs.get(&handle) {
            Some(srq) => srq.destroy(),
            None => 0,
        }
    }
}

pub struct ProtectionDomain {
    device: Arc<Device>,
}

impl fmt::Debug for ProtectionDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("ProtectionDomain<{:p}>", Arc::as_ptr(&self.device)))
    }
}

impl ProtectionDomain {
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn create_srq(&self, init_attr: &SrqInitAttr) -> Result<Arc<Srq>> {
        Srq::create(self, init_attr)
    }
}
