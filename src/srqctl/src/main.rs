//! Drives one SRQ with concurrent posters and poppers and reports what happened.
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::Parser;
use crossbeam::channel;
use rand::prelude::*;
use rand::rngs::StdRng;

use srq::{
    AsyncEvent, Device, Error, EventHandler, EventKind, RecvWr, Sge, Srq, SrqAttr, SrqAttrMask,
    SrqInitAttr,
};

pub(crate) mod config;
pub(crate) mod logging;

use config::{Config, WorkloadConfig};

#[derive(Debug, Clone, Parser)]
#[command(name = "srqctl", about = "Stress a shared receive queue.")]
struct Opts {
    /// Config path
    #[arg(short, long, default_value = "srqctl.toml")]
    config: PathBuf,
    /// Override the number of WRs each poster submits
    #[arg(long)]
    wrs_per_poster: Option<u64>,
    #[arg(long)]
    no_ansi: bool,
}

#[derive(Debug, Default)]
struct Stats {
    posted: AtomicU64,
    full: AtomicU64,
    popped: AtomicU64,
    refilled: AtomicU64,
    limit_events: AtomicU64,
}

fn make_wr(rng: &mut StdRng, wr_id: u64, max_sge: u32) -> RecvWr {
    let num_sge = rng.gen_range(1..=max_sge as usize);
    let sg_list = (0..num_sge)
        .map(|i| Sge::new((wr_id << 8) | i as u64, rng.gen_range(64..=4096), 0x1))
        .collect();
    RecvWr::new(wr_id, sg_list)
}

/// Posts `batch`-sized chunks, resubmitting the tail of a chunk that hit a full SRQ.
fn post_all(srq: &Srq, wrs: &[RecvWr], stats: &Stats) -> Result<()> {
    let mut rest = wrs;
    while !rest.is_empty() {
        match srq.post_recv(rest) {
            Ok(()) => {
                stats.posted.fetch_add(rest.len() as u64, Ordering::Relaxed);
                rest = &[];
            }
            Err(e) if matches!(e.error, Error::ResourceExhausted(_)) => {
                stats.posted.fetch_add(e.index as u64, Ordering::Relaxed);
                stats.full.fetch_add(1, Ordering::Relaxed);
                rest = &rest[e.index..];
                std::thread::yield_now();
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn run_poster(id: usize, srq: &Srq, workload: &WorkloadConfig, stats: &Stats) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(workload.seed.wrapping_add(id as u64));
    let max_sge = srq.query().max_sge;
    let mut next = 0;
    while next < workload.wrs_per_poster {
        let n = (workload.wrs_per_poster - next).min(workload.batch as u64);
        let batch: Vec<_> = (next..next + n)
            .map(|i| make_wr(&mut rng, ((id as u64) << 40) | i, max_sge))
            .collect();
        post_all(srq, &batch, stats)?;
        next += n;
    }
    tracing::debug!("poster {} finished", id);
    Ok(())
}

fn run_popper(srq: &Srq, posting: &AtomicBool, stats: &Stats) {
    loop {
        match srq.pop() {
            Some(wqe) => {
                debug_assert!(wqe.total_length() > 0);
                stats.popped.fetch_add(1, Ordering::Relaxed);
            }
            None if !posting.load(Ordering::Acquire) => {
                if srq.is_empty() {
                    break;
                }
            }
            None => std::thread::yield_now(),
        }
    }
}

/// Consumes limit events outside of the SRQ lock: tops the SRQ up and rearms it.
fn run_refiller(
    srq: &Srq,
    events: &channel::Receiver<AsyncEvent>,
    posting: &AtomicBool,
    refill_on_limit: bool,
    stats: &Stats,
) -> Result<()> {
    let attr = srq.query();
    let mut rng = StdRng::seed_from_u64(u64::MAX);
    let mut wr_id = u64::MAX >> 1;
    while posting.load(Ordering::Acquire) {
        let event = match events.recv_timeout(Duration::from_millis(10)) {
            Ok(event) => event,
            Err(channel::RecvTimeoutError::Timeout) => continue,
            Err(channel::RecvTimeoutError::Disconnected) => break,
        };
        assert_eq!(event.kind, EventKind::SrqLimitReached);
        stats.limit_events.fetch_add(1, Ordering::Relaxed);
        tracing::info!("SRQ {:?} below limit, {} queued", event.srq, srq.len());
        if !refill_on_limit {
            continue;
        }

        // Posters may have topped the SRQ up already; rearm regardless.
        let room = (attr.max_wr as usize).saturating_sub(srq.len());
        if room > 0 {
            let wrs: Vec<_> = (0..room)
                .map(|_| {
                    wr_id += 1;
                    make_wr(&mut rng, wr_id, attr.max_sge)
                })
                .collect();
            if let Err(e) = srq.post_recv(&wrs) {
                if !matches!(e.error, Error::ResourceExhausted(_)) {
                    return Err(e.into());
                }
            }
            stats.refilled.fetch_add(1, Ordering::Relaxed);
        }
        srq.modify(SrqAttrMask::LIMIT, &attr)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    let mut config = Config::from_path(&opts.config)?;
    if let Some(n) = opts.wrs_per_poster {
        config.workload.wrs_per_poster = n;
    }
    logging::init_log(&config, !opts.no_ansi)?;
    tracing::info!("{:?}", config);

    if config.workload.posters == 0 || config.workload.poppers == 0 || config.workload.batch == 0 {
        bail!("posters, poppers and batch must all be non-zero");
    }

    let device = Device::with_system_allocator(&config.device);
    let pd = device.alloc_pd();

    let (tx, rx) = channel::unbounded::<AsyncEvent>();
    let tx = Arc::new(tx);
    let srq = pd.create_srq(&SrqInitAttr {
        attr: SrqAttr {
            max_wr: config.srq.max_wr,
            max_sge: config.srq.max_sge,
            srq_limit: 0,
        },
        srq_context: 0,
        event_handler: Some(Arc::downgrade(&tx) as Weak<dyn EventHandler>),
    })?;
    if config.srq.srq_limit != 0 {
        let attr = SrqAttr {
            srq_limit: config.srq.srq_limit,
            ..srq.query()
        };
        srq.modify(SrqAttrMask::LIMIT, &attr)?;
    }

    let stats = Stats::default();
    let posting = AtomicBool::new(true);
    let start = Instant::now();

    let (srq_ref, stats_ref, posting_ref, rx_ref) = (&*srq, &stats, &posting, &rx);
    let workload = &config.workload;
    crossbeam::thread::scope(|s| -> Result<()> {
        let posters = (0..workload.posters)
            .map(|id| {
                s.builder()
                    .name(format!("poster-{}", id))
                    .spawn(move |_| run_poster(id, srq_ref, workload, stats_ref))
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        let poppers = (0..workload.poppers)
            .map(|id| {
                s.builder()
                    .name(format!("popper-{}", id))
                    .spawn(move |_| run_popper(srq_ref, posting_ref, stats_ref))
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        let refill_on_limit = workload.refill_on_limit;
        let refiller = s.builder().name("refiller".to_owned()).spawn(move |_| {
            run_refiller(srq_ref, rx_ref, posting_ref, refill_on_limit, stats_ref)
        })?;

        let mut result = Ok(());
        for poster in posters {
            let ret = poster
                .join()
                .map_err(|_| anyhow::anyhow!("poster panicked"))?;
            result = result.and(ret);
        }
        posting.store(false, Ordering::Release);
        for popper in poppers {
            popper
                .join()
                .map_err(|_| anyhow::anyhow!("popper panicked"))?;
        }
        refiller
            .join()
            .map_err(|_| anyhow::anyhow!("refiller panicked"))??;
        result
    })
    .map_err(|_| anyhow::anyhow!("worker thread panicked"))??;

    let elapsed = start.elapsed();
    let freed = srq.destroy();
    let popped = stats.popped.load(Ordering::Relaxed);
    tracing::info!(
        "posted: {}, full: {}, popped: {}, limit events: {}, refills: {}",
        stats.posted.load(Ordering::Relaxed),
        stats.full.load(Ordering::Relaxed),
        popped,
        stats.limit_events.load(Ordering::Relaxed),
        stats.refilled.load(Ordering::Relaxed),
    );
    tracing::info!(
        "freed on destroy: {}, elapsed: {:?}, {:.2} Mpop/s",
        freed,
        elapsed,
        popped as f64 / elapsed.as_secs_f64() / 1e6,
    );
    Ok(())
}
