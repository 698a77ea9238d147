use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Where `post_recv` puts a new descriptor. `pop` always takes the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderingMode {
    /// Strict arrival order.
    #[default]
    Fifo,
    /// Test-only. Alternates between tail-append and head-insert.
    Shuffle,
}

/// Device-wide insertion policy shared by every SRQ of a device.
#[derive(Debug, Default)]
pub struct OrderingPolicy {
    mode: OrderingMode,
    // Only perturbs the order. Racing posts may observe the same value.
    rotation: AtomicUsize,
}

impl OrderingPolicy {
    pub fn new(mode: OrderingMode) -> Self {
        OrderingPolicy {
            mode,
            rotation: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn mode(&self) -> OrderingMode {
        self.mode
    }

    pub(crate) fn insert<T>(&self, queue: &mut VecDeque<T>, item: T) {
        match self.mode {
            OrderingMode::Fifo => queue.push_back(item),
            OrderingMode::Shuffle => {
                if self.rotation.fetch_add(1, Ordering::Relaxed) % 2 == 0 {
                    queue.push_back(item);
                } else {
                    queue.push_front(item);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_appends() {
        let policy = OrderingPolicy::new(OrderingMode::Fifo);
        let mut queue = VecDeque::new();
        for i in 0..4 {
            policy.insert(&mut queue, i);
        }
        assert_eq!(queue, [0, 1, 2, 3]);
    }

    #[test]
    fn shuffle_alternates_tail_and_head() {
        let policy = OrderingPolicy::new(OrderingMode::Shuffle);
        let mut queue = VecDeque::new();
        for i in 0..5 {
            policy.insert(&mut queue, i);
        }
        // 0 tail, 1 head, 2 tail, 3 head, 4 tail
        assert_eq!(queue, [3, 1, 0, 2, 4]);
    }

    #[test]
    fn shuffle_rotation_is_shared_across_queues() {
        let policy = OrderingPolicy::new(OrderingMode::Shuffle);
        let mut a = VecDeque::new();
        let mut b = VecDeque::new();
        policy.insert(&mut a, 0);
        policy.insert(&mut b, 0);
        policy.insert(&mut b, 1);
        // b saw rotation values 1 and 2: head-insert, then tail-append
        assert_eq!(b, [0, 1]);
        policy.insert(&mut a, 1);
        // a's second insert saw rotation 3
        assert_eq!(a, [1, 0]);
    }
}
