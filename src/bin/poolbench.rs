use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use framepool::config::Config;
use framepool::error::{Error, Result};
use framepool::storage::heap::{AccessType, BufferPoolManager, PageId, PAGE_SIZE};
use log::{debug, info};
use rand::Rng;

#[derive(Default)]
struct Stats {
    reads: AtomicUsize,
    writes: AtomicUsize,
    /// bytes checked against the stamp of their page.
    verified: AtomicU64,
}

fn main() -> Result<()> {
    let args = clap::command!()
        .arg(
            clap::Arg::new("config")
                .short('c')
                .long("config")
                .help("Configuration file path for the buffer pool")
                .default_value(""),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .value_parser(clap::value_parser!(usize))
                .default_value("4"),
        )
        .arg(
            clap::Arg::new("pages")
                .short('p')
                .long("pages")
                .help("Number of distinct pages the workload touches")
                .value_parser(clap::value_parser!(usize))
                .default_value("256"),
        )
        .arg(
            clap::Arg::new("ops")
                .short('n')
                .long("ops")
                .help("Operations per thread")
                .value_parser(clap::value_parser!(usize))
                .default_value("10000"),
        )
        .arg(
            clap::Arg::new("write-ratio")
                .short('w')
                .long("write-ratio")
                .value_parser(clap::value_parser!(f64))
                .default_value("0.3"),
        )
        .get_matches();

    let file = args.get_one::<String>("config").map(String::as_str).unwrap_or_default();
    let cfg = Config::new(file)?;
    let loglevel = cfg.log_level.parse::<log::LevelFilter>()?;
    env_logger::builder().filter_level(loglevel).try_init()?;

    let threads = args.get_one::<usize>("threads").copied().unwrap_or(4);
    let pages = args.get_one::<usize>("pages").copied().unwrap_or(256);
    let ops = args.get_one::<usize>("ops").copied().unwrap_or(10000);
    let write_ratio = args.get_one::<f64>("write-ratio").copied().unwrap_or(0.3);
    if pages == 0 || !(0.0..=1.0).contains(&write_ratio) {
        return Err(Error::Value(format!(
            "invalid workload: {} pages, write ratio {}",
            pages, write_ratio
        )));
    }

    let bpm = BufferPoolManager::from_config(&cfg)?;
    let page_ids = (0..pages).map(|_| bpm.new_page()).collect::<Vec<_>>();
    info!(
        "run {} threads x {} ops over {} pages, pool size {}, k {}",
        threads, ops, pages, cfg.pool_size, cfg.replacer_k
    );

    let stats = Stats::default();
    let start = Instant::now();
    std::thread::scope(|s| {
        let handles = (0..threads)
            .map(|_| s.spawn(|| run(&bpm, &page_ids, ops, write_ratio, &stats)))
            .collect::<Vec<_>>();
        handles.into_iter().try_for_each(|h| {
            h.join().map_err(|_| Error::Internal("worker thread panicked".to_string()))?
        })
    })?;
    bpm.flush_all_pages()?;
    let elapsed = start.elapsed();

    let reads = stats.reads.load(Ordering::Relaxed);
    let writes = stats.writes.load(Ordering::Relaxed);
    info!(
        "{} reads, {} writes in {:?}, {:.0} ops/s, {} bytes verified",
        reads,
        writes,
        elapsed,
        (reads + writes) as f64 / elapsed.as_secs_f64(),
        stats.verified.load(Ordering::Relaxed)
    );
    Ok(())
}

fn run(
    bpm: &BufferPoolManager,
    page_ids: &[PageId],
    ops: usize,
    write_ratio: f64,
    stats: &Stats,
) -> Result<()> {
    let mut rng = rand::thread_rng();
    for _ in 0..ops {
        let page_id = page_ids[rng.gen_range(0..page_ids.len())];
        if rng.gen_bool(write_ratio) {
            let mut guard = bpm.write_page(page_id, AccessType::Lookup)?;
            let version = check(&guard, page_id)? + 1;
            stamp(&mut guard, page_id, version);
            stats.writes.fetch_add(1, Ordering::Relaxed);
        } else {
            let guard = bpm.read_page(page_id, AccessType::Lookup)?;
            check(&guard, page_id)?;
            stats.reads.fetch_add(1, Ordering::Relaxed);
        }
        stats.verified.fetch_add(PAGE_SIZE as u64, Ordering::Relaxed);
    }
    debug!("worker {:?} done", std::thread::current().id());
    Ok(())
}

// page id and version up front, the rest is filled with a checksum byte
// of both so a torn or misplaced image is noticed.
fn stamp(data: &mut [u8], page_id: PageId, version: u64) {
    data[..8].copy_from_slice(&page_id.to_le_bytes());
    data[8..16].copy_from_slice(&version.to_le_bytes());
    let fill = checksum(page_id, version);
    data[16..].fill(fill);
}

fn check(data: &[u8], page_id: PageId) -> Result<u64> {
    if data.iter().all(|&b| b == 0) {
        return Ok(0);
    }
    let mut id = [0u8; 8];
    id.copy_from_slice(&data[..8]);
    let mut version = [0u8; 8];
    version.copy_from_slice(&data[8..16]);
    let (id, version) = (PageId::from_le_bytes(id), u64::from_le_bytes(version));
    let fill = checksum(id, version);
    if id != page_id || data[16..].iter().any(|&b| b != fill) {
        return Err(Error::Internal(format!(
            "page {} holds a corrupted image of page {} version {}",
            page_id, id, version
        )));
    }
    Ok(version)
}

fn checksum(page_id: PageId, version: u64) -> u8 {
    // never zero, a stamped page is told apart from a fresh one.
    (page_id as u64 ^ version.rotate_left(17)) as u8 | 1
}
