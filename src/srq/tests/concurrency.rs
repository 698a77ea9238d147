use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::thread;
use rand::prelude::*;
use rand::{rngs::StdRng, SeedableRng};

use srq::{
    AsyncEvent, Device, DeviceConfig, Error, EventHandler, ObjectAllocator, ObjectKind, RecvWr,
    Sge, SrqAttr, SrqAttrMask, SrqInitAttr, SystemAllocator,
};

const NUM_POSTERS: usize = 4;
const NUM_POPPERS: usize = 4;
const WRS_PER_POSTER: u64 = 20_000;
const MAX_WR: u32 = 64;
const SEED: u64 = 999;

#[derive(Default)]
struct LimitCounter(AtomicUsize);

impl EventHandler for LimitCounter {
    fn deliver(&self, _event: AsyncEvent) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn random_wr(rng: &mut StdRng, wr_id: u64, max_sge: usize) -> RecvWr {
    let num_sge = rng.gen_range(1..=max_sge);
    let sg_list = (0..num_sge)
        .map(|_| Sge::new(rng.gen(), rng.gen_range(1..4096), rng.gen()))
        .collect();
    RecvWr::new(wr_id, sg_list)
}

/// Posters retry on a full SRQ, poppers drain it. Every WQE must come out
/// exactly once and the count must never exceed `max_wr`.
#[test]
fn concurrent_post_and_pop() {
    let system = Arc::new(SystemAllocator::new());
    let device = Device::open(
        &DeviceConfig::default(),
        system.clone() as Arc<dyn ObjectAllocator>,
    );
    let srq = device
        .alloc_pd()
        .create_srq(&SrqInitAttr {
            attr: SrqAttr {
                max_wr: MAX_WR,
                max_sge: 4,
                srq_limit: 0,
            },
            ..Default::default()
        })
        .unwrap();

    let done_posting = AtomicUsize::new(0);
    let popped: Vec<Vec<u64>> = thread::scope(|s| {
        for p in 0..NUM_POSTERS {
            let srq = &srq;
            let done_posting = &done_posting;
            s.spawn(move |_| {
                let mut rng = StdRng::seed_from_u64(SEED + p as u64);
                for i in 0..WRS_PER_POSTER {
                    let wr_id = ((p as u64) << 32) | i;
                    let wr = random_wr(&mut rng, wr_id, 4);
                    loop {
                        match srq.post_recv(std::slice::from_ref(&wr)) {
                            Ok(()) => break,
                            Err(e) => {
                                assert_eq!(e.index, 0);
                                assert!(matches!(e.error, Error::ResourceExhausted(_)));
                                std::thread::yield_now();
                            }
                        }
                    }
                    assert!(srq.len() <= MAX_WR as usize);
                }
                done_posting.fetch_add(1, Ordering::SeqCst);
            });
        }

        let poppers: Vec<_> = (0..NUM_POPPERS)
            .map(|_| {
                let srq = &srq;
                let done_posting = &done_posting;
                s.spawn(move |_| {
                    let mut ids = Vec::new();
                    loop {
                        match srq.pop() {
                            Some(wqe) => {
                                assert!((1..=4).contains(&wqe.num_sge()));
                                ids.push(wqe.wr_id());
                            }
                            None if done_posting.load(Ordering::SeqCst) == NUM_POSTERS => {
                                match srq.pop() {
                                    Some(wqe) => ids.push(wqe.wr_id()),
                                    None => break,
                                }
                            }
                            None => std::thread::yield_now(),
                        }
                        assert!(srq.len() <= MAX_WR as usize);
                    }
                    ids
                })
            })
            .collect();

        poppers.into_iter().map(|h| h.join().unwrap()).collect()
    })
    .unwrap();

    let total = NUM_POSTERS * WRS_PER_POSTER as usize;
    let unique: HashSet<u64> = popped.iter().flatten().copied().collect();
    assert_eq!(popped.iter().map(Vec::len).sum::<usize>(), total);
    assert_eq!(unique.len(), total);
    assert!(srq.is_empty());
    assert_eq!(system.live(ObjectKind::RecvWqe), 0);
}

/// Each WQE popped by a single consumer under FIFO keeps the per-poster order.
#[test]
fn fifo_order_per_poster() {
    let device = Device::with_system_allocator(&DeviceConfig::default());
    let srq = device
        .alloc_pd()
        .create_srq(&SrqInitAttr {
            attr: SrqAttr {
                max_wr: MAX_WR,
                max_sge: 1,
                srq_limit: 0,
            },
            ..Default::default()
        })
        .unwrap();

    let finished = AtomicBool::new(false);
    thread::scope(|s| {
        let poster = s.spawn(|_| {
            for i in 0..WRS_PER_POSTER {
                let wr = RecvWr::new(i, vec![Sge::new(i, 64, 0)]);
                while srq.post_recv(std::slice::from_ref(&wr)).is_err() {
                    std::thread::yield_now();
                }
            }
            finished.store(true, Ordering::SeqCst);
        });
        let popper = s.spawn(|_| {
            let mut expected = 0;
            while expected < WRS_PER_POSTER {
                match srq.pop() {
                    Some(wqe) => {
                        assert_eq!(wqe.wr_id(), expected);
                        expected += 1;
                    }
                    None => std::thread::yield_now(),
                }
            }
        });
        poster.join().unwrap();
        popper.join().unwrap();
    })
    .unwrap();
    assert!(finished.load(Ordering::SeqCst));
}

/// With many concurrent poppers, the limit event still fires exactly once per arming.
#[test]
fn limit_event_fires_once_under_contention() {
    let counter = Arc::new(LimitCounter::default());
    let device = Device::with_system_allocator(&DeviceConfig::default());
    let srq = device
        .alloc_pd()
        .create_srq(&SrqInitAttr {
            attr: SrqAttr {
                max_wr: MAX_WR,
                max_sge: 1,
                srq_limit: 0,
            },
            event_handler: Some(Arc::downgrade(&counter) as Weak<dyn EventHandler>),
            ..Default::default()
        })
        .unwrap();

    for round in 1..=10 {
        let wrs: Vec<_> = (0..MAX_WR as u64)
            .map(|i| RecvWr::new(i, vec![Sge::new(i, 64, 0)]))
            .collect();
        srq.post_recv(&wrs).unwrap();
        let limit = SrqAttr {
            srq_limit: MAX_WR / 2,
            ..srq.query()
        };
        srq.modify(SrqAttrMask::LIMIT, &limit).unwrap();

        thread::scope(|s| {
            for _ in 0..NUM_POPPERS {
                s.spawn(|_| while srq.pop().is_some() {});
            }
        })
        .unwrap();

        assert!(srq.is_empty());
        assert_eq!(counter.0.load(Ordering::SeqCst), round);
    }
}
