//! Shared receive queue.
//!
//! An SRQ is a bounded pool of receive WQEs that many receiving endpoints draw
//! from. Producers post batches with [`Srq::post_recv`]; an endpoint that has
//! data to place takes the next WQE with [`Srq::pop`]. When the pool runs low,
//! a one-shot `SrqLimitReached` event is delivered to the SRQ's event handler.
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use static_assertions::assert_impl_all;

use crate::alloc::{ObjectKind, Slot};
use crate::device::{Behavior, Device, DeviceAttr, ProtectionDomain};
use crate::event::{AsyncEvent, EventHandler, EventKind};
use crate::wr::{RecvWqe, RecvWr, MAX_PAYLOAD_LEN};
use crate::{Error, Handle, PostError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SrqAttr {
    /// Maximum number of outstanding receive WQEs.
    pub max_wr: u32,
    /// Maximum number of SGEs per receive WQE.
    pub max_sge: u32,
    /// Low watermark. 0 disables the limit event.
    pub srq_limit: u32,
}

#[derive(Default)]
pub struct SrqInitAttr {
    /// `srq_limit` is ignored here, the limit can only be armed through `modify`.
    pub attr: SrqAttr,
    /// Opaque value handed back in every event of this SRQ.
    pub srq_context: u64,
    /// Not owned by the SRQ. Events are dropped once the handler is gone.
    pub event_handler: Option<Weak<dyn EventHandler>>,
}

impl fmt::Debug for SrqInitAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrqInitAttr")
            .field("attr", &self.attr)
            .field("srq_context", &self.srq_context)
            .field("event_handler", &self.event_handler.is_some())
            .finish()
    }
}

bitflags! {
    /// Attributes to change in `Srq::modify`.
    #[derive(Default)]
    pub struct SrqAttrMask: u32 {
        /// Resize the SRQ. Not supported.
        const MAX_WR = 0b00000001;
        /// Set `srq_limit` and rearm the limit event.
        const LIMIT = 0b00000010;
    }
}

struct Inner {
    queue: VecDeque<RecvWqe>,
    srq_limit: u32,
    armed: bool,
    destroyed: bool,
}

pub struct Srq {
    handle: Handle,
    device: Arc<Device>,
    max_wr: u32,
    max_sge: u32,
    srq_context: u64,
    event_handler: Option<Weak<dyn EventHandler>>,
    inner: spin::Mutex<Inner>,
    _slot: Slot,
}

assert_impl_all!(Srq: Send, Sync);

impl fmt::Debug for Srq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Srq")
            .field("handle", &self.handle)
            .field("max_wr", &self.max_wr)
            .field("max_sge", &self.max_sge)
            .finish()
    }
}

#[inline]
fn attr_is_ok(dev: &DeviceAttr, attr: &SrqAttr) -> bool {
    (1..=dev.max_srq_wr).contains(&attr.max_wr) && (1..=dev.max_srq_sge).contains(&attr.max_sge)
}

impl Srq {
    pub(crate) fn create(pd: &ProtectionDomain, init_attr: &SrqInitAttr) -> Result<Arc<Self>> {
        let device = pd.device();
        if !attr_is_ok(&device.attr(), &init_attr.attr) {
            return Err(Error::InvalidArgument(
                "max_wr or max_sge out of the device's range",
            ));
        }

        let slot = Slot::acquire(device.allocator(), ObjectKind::Srq)?;
        let handle = device.srqs.allocate_handle();
        let srq = Arc::new(Srq {
            handle,
            device: Arc::clone(device),
            max_wr: init_attr.attr.max_wr,
            max_sge: init_attr.attr.max_sge,
            srq_context: init_attr.srq_context,
            event_handler: init_attr.event_handler.clone(),
            inner: spin::Mutex::new(Inner {
                queue: VecDeque::with_capacity(init_attr.attr.max_wr as usize),
                srq_limit: 0,
                armed: false,
                destroyed: false,
            }),
            _slot: slot,
        });
        device.srqs.insert(handle, &srq);

        tracing::debug!(
            "created SRQ {:?}, max_wr: {}, max_sge: {}",
            handle,
            srq.max_wr,
            srq.max_sge
        );
        Ok(srq)
    }

    /// Frees every queued WQE and unregisters the SRQ from its device. Returns
    /// the number of WQEs freed. Calling it again is a no-op.
    ///
    /// Must not race with any other operation on this SRQ.
    pub fn destroy(&self) -> usize {
        let freed = {
            let mut inner = self.inner.lock();
            inner.destroyed = true;
            let n = inner.queue.len();
            inner.queue.clear();
            n
        };
        if self.device.srqs.remove(&self.handle) {
            tracing::debug!("destroyed SRQ {:?}, {} WQEs freed", self.handle, freed);
        }
        freed
    }

    pub fn modify(&self, mask: SrqAttrMask, attr: &SrqAttr) -> Result<()> {
        if mask.contains(SrqAttrMask::MAX_WR) {
            return Err(Error::NotImplemented("resizing an SRQ"));
        }

        if mask.contains(SrqAttrMask::LIMIT) {
            let mut inner = self.inner.lock();
            inner.srq_limit = attr.srq_limit;
            inner.armed = false;
            tracing::debug!("SRQ {:?} limit set to {}", self.handle, attr.srq_limit);
        }

        Ok(())
    }

    /// Like `modify`, for a mask in its wire representation.
    pub fn modify_raw(&self, mask: u32, attr: &SrqAttr) -> Result<()> {
        let mask = SrqAttrMask::from_bits(mask)
            .ok_or(Error::InvalidArgument("unsupported SRQ attribute mask"))?;
        self.modify(mask, attr)
    }

    pub fn query(&self) -> SrqAttr {
        let inner = self.inner.lock();
        SrqAttr {
            max_wr: self.max_wr,
            max_sge: self.max_sge,
            srq_limit: inner.srq_limit,
        }
    }

    /// Posts a batch of receive requests, in order.
    ///
    /// The batch is not atomic. On failure, the requests before `index` stay
    /// queued and nothing from `index` on is.
    pub fn post_recv(&self, wrs: &[RecvWr]) -> std::result::Result<(), PostError> {
        if wrs.is_empty() {
            return Err(PostError::new(0, Error::InvalidArgument("empty batch")));
        }

        let behavior = self.device.behavior();
        for (index, wr) in wrs.iter().enumerate() {
            self.post_one(wr, behavior)
                .map_err(|e| PostError::new(index, e))?;
        }
        Ok(())
    }

    fn post_one(&self, wr: &RecvWr, behavior: Behavior) -> Result<()> {
        if wr.num_sge() < 1 || wr.num_sge() > self.max_sge as usize {
            return Err(Error::InvalidArgument("num_sge out of range"));
        }

        let slot = Slot::acquire(self.device.allocator(), ObjectKind::RecvWqe)?;
        let wqe = RecvWqe::build(
            wr,
            behavior.contains(Behavior::ZERO_LEN_SGE_AS_MAX_LEN),
            slot,
        );
        if behavior.contains(Behavior::ENFORCE_MAX_PAYLOAD) && wqe.total_length() > MAX_PAYLOAD_LEN
        {
            return Err(Error::InvalidArgument("total length exceeds max payload"));
        }

        let mut inner = self.inner.lock();
        if inner.destroyed {
            return Err(Error::InvalidArgument("SRQ destroyed"));
        }
        if inner.queue.len() + 1 > self.max_wr as usize {
            drop(inner);
            tracing::debug!("SRQ {:?} full, wr_id: {}", self.handle, wr.wr_id);
            return Err(Error::ResourceExhausted("SRQ full"));
        }
        self.device.ordering().insert(&mut inner.queue, wqe);
        tracing::trace!(
            "SRQ {:?} posted wr_id: {}, outstanding: {}",
            self.handle,
            wr.wr_id,
            inner.queue.len()
        );
        Ok(())
    }

    /// Takes the next receive WQE, if any.
    ///
    /// If this pop brings the SRQ below an unarmed, non-zero `srq_limit`, the
    /// limit event is delivered before returning, with the SRQ lock held.
    pub fn pop(&self) -> Option<RecvWqe> {
        let mut inner = self.inner.lock();
        let wqe = inner.queue.pop_front()?;

        if inner.srq_limit != 0 && !inner.armed && inner.queue.len() < inner.srq_limit as usize {
            inner.armed = true;
            self.raise_event(EventKind::SrqLimitReached);
        }

        Some(wqe)
    }

    fn raise_event(&self, kind: EventKind) {
        let event = AsyncEvent {
            kind,
            srq: self.handle,
            srq_context: self.srq_context,
        };
        match self.event_handler.as_ref().and_then(Weak::upgrade) {
            Some(handler) => {
                tracing::debug!("SRQ {:?} delivering {:?}", self.handle, kind);
                handler.deliver(event);
            }
            None => tracing::debug!(
                "SRQ {:?} has no event handler, {:?} dropped",
                self.handle,
                kind
            ),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the limit event has fired since the limit was last set.
    #[inline]
    pub fn is_armed(&self) -> bool {
        self.inner.lock().armed
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    #[inline]
    pub fn context(&self) -> u64 {
        self.srq_context
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for Srq {
    fn drop(&mut self) {
        self.device.srqs.remove(&self.handle);
    }
}
