//! Receive work requests and the descriptors an SRQ keeps for them.
use crate::alloc::Slot;

/// Largest message an SRQ descriptor is meant to describe (2 GiB).
pub const MAX_PAYLOAD_LEN: u64 = 1 << 31;

/// A scatter/gather element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sge {
    pub addr: u64,
    pub length: u32,
    pub lkey: u32,
}

impl Sge {
    #[inline]
    pub fn new(addr: u64, length: u32, lkey: u32) -> Self {
        Sge { addr, length, lkey }
    }
}

/// A receive request as handed to `post_recv`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecvWr {
    pub wr_id: u64,
    pub sg_list: Vec<Sge>,
}

impl RecvWr {
    pub fn new(wr_id: u64, sg_list: Vec<Sge>) -> Self {
        RecvWr { wr_id, sg_list }
    }

    #[inline]
    pub fn num_sge(&self) -> usize {
        self.sg_list.len()
    }
}

/// A queued receive descriptor.
///
/// Built by `post_recv`, never changed afterwards. Popping one out of an SRQ
/// moves it to the caller; dropping it returns its memory to the allocator.
#[derive(Debug)]
pub struct RecvWqe {
    wr_id: u64,
    sg_list: Vec<Sge>,
    total_length: u64,
    _slot: Slot,
}

impl RecvWqe {
    /// Copies the SGEs of `wr` and sums their lengths. With `zero_len_as_max`,
    /// an empty SGE counts as `MAX_PAYLOAD_LEN` in the sum but is stored as given.
    pub(crate) fn build(wr: &RecvWr, zero_len_as_max: bool, slot: Slot) -> Self {
        let total_length = wr
            .sg_list
            .iter()
            .map(|sge| match sge.length {
                0 if zero_len_as_max => MAX_PAYLOAD_LEN,
                len => len as u64,
            })
            .sum();
        RecvWqe {
            wr_id: wr.wr_id,
            sg_list: wr.sg_list.clone(),
            total_length,
            _slot: slot,
        }
    }

    #[inline]
    pub fn wr_id(&self) -> u64 {
        self.wr_id
    }

    #[inline]
    pub fn sg_list(&self) -> &[Sge] {
        &self.sg_list
    }

    #[inline]
    pub fn num_sge(&self) -> usize {
        self.sg_list.len()
    }

    #[inline]
    pub fn total_length(&self) -> u64 {
        self.total_length
    }
}
