use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::time::Duration;

use framepool::config::Config;
use framepool::error::Result;
use framepool::storage::heap::{AccessType, BufferPoolManager, PageId, PAGE_SIZE};
use log::info;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use super::stamp::{stamp, verify};

#[test]
fn test_pool_from_config() -> Result<()> {
    let cfg = Config::new("")?;
    let bpm = BufferPoolManager::from_config(&cfg)?;
    assert_eq!(cfg.pool_size, bpm.size());

    let page_id = bpm.new_page();
    let mut guard = bpm.write_page(page_id, AccessType::Unknown)?;
    stamp(&mut guard, page_id, 1);
    drop(guard);
    assert_eq!(1, verify(&bpm.read_page(page_id, AccessType::Unknown)?, page_id));
    Ok(())
}

#[test]
fn test_shared_readers() -> Result<()> {
    setup!(bpm, 2);
    let page_id = bpm.new_page();
    let readers = 8;
    let barrier = Barrier::new(readers);

    // every reader holds its guard until all readers hold one, which only
    // works out if the latch is shared.
    std::thread::scope(|s| {
        let handles = (0..readers)
            .map(|_| {
                s.spawn(|| -> Result<()> {
                    let guard = bpm.read_page(page_id, AccessType::Lookup)?;
                    barrier.wait();
                    assert!(guard.iter().all(|&b| b == 0));
                    Ok(())
                })
            })
            .collect::<Vec<_>>();
        handles.into_iter().try_for_each(|h| h.join().unwrap())
    })?;
    assert_eq!(Some(0), bpm.get_pin_count(page_id));
    Ok(())
}

#[test]
fn test_writers_are_exclusive() -> Result<()> {
    setup!(bpm, 2);
    let counter = bpm.new_page();
    let others = (0..6).map(|_| bpm.new_page()).collect::<Vec<_>>();
    let threads = 8;
    let rounds = 200;

    std::thread::scope(|s| {
        let handles = (0..threads)
            .map(|t| {
                let (bpm, others) = (&bpm, &others);
                s.spawn(move || -> Result<()> {
                    let mut rng = StdRng::seed_from_u64(t);
                    for _ in 0..rounds {
                        {
                            let mut guard = bpm.write_page(counter, AccessType::Unknown)?;
                            let n = u64::from_le_bytes(guard[..8].try_into().unwrap());
                            guard[..8].copy_from_slice(&(n + 1).to_le_bytes());
                        }
                        // churn the pool so the counter page gets evicted now and then.
                        let other = others[rng.gen_range(0..others.len())];
                        drop(bpm.read_page(other, AccessType::Scan)?);
                    }
                    Ok(())
                })
            })
            .collect::<Vec<_>>();
        handles.into_iter().try_for_each(|h| h.join().unwrap())
    })?;

    let guard = bpm.read_page(counter, AccessType::Unknown)?;
    let n = u64::from_le_bytes(guard[..8].try_into().unwrap());
    assert_eq!(threads * rounds, n);
    Ok(())
}

#[test]
fn test_concurrent_round_trip() -> Result<()> {
    setup!(bpm, 8, 3);
    let threads = 4;
    let pages_per_thread = 16;
    let versions = 5;

    std::thread::scope(|s| {
        let handles = (0..threads)
            .map(|_| {
                let bpm = &bpm;
                s.spawn(move || -> Result<Vec<PageId>> {
                    let pages = (0..pages_per_thread).map(|_| bpm.new_page()).collect::<Vec<_>>();
                    for version in 1..=versions {
                        for &page_id in &pages {
                            let mut guard = bpm.write_page(page_id, AccessType::Unknown)?;
                            assert_eq!(version - 1, verify(&guard, page_id));
                            stamp(&mut guard, page_id, version);
                        }
                    }
                    Ok(pages)
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            let pages = h.join().unwrap()?;
            for page_id in pages {
                let guard = bpm.read_page(page_id, AccessType::Unknown)?;
                assert_eq!(versions, verify(&guard, page_id));
            }
        }
        Ok::<(), framepool::error::Error>(())
    })?;

    bpm.flush_all_pages()?;
    for page_id in bpm.page_ids() {
        assert_eq!(Some(0), bpm.get_pin_count(page_id));
    }
    Ok(())
}

#[test]
fn test_checked_fetch_never_blocks() -> Result<()> {
    setup!(bpm, 3);
    let pages = (0..4).map(|_| bpm.new_page()).collect::<Vec<_>>();

    let guards = pages[..3]
        .iter()
        .map(|&page_id| bpm.checked_read_page(page_id, AccessType::Unknown))
        .collect::<Result<Vec<_>>>()?;
    assert!(guards.iter().all(|g| g.is_some()));

    // all frames pinned, the fourth page has nowhere to go.
    assert!(bpm.checked_write_page(pages[3], AccessType::Unknown)?.is_none());
    assert!(bpm.checked_read_page(pages[3], AccessType::Unknown)?.is_none());
    // resident pages are still reachable.
    assert!(bpm.checked_read_page(pages[0], AccessType::Unknown)?.is_some());

    drop(guards);
    assert!(bpm.checked_write_page(pages[3], AccessType::Unknown)?.is_some());
    Ok(())
}

#[test]
fn test_blocked_writers_make_progress() -> Result<()> {
    setup!(bpm, 1);
    let pages = (0..4).map(|_| bpm.new_page()).collect::<Vec<_>>();
    let finished = AtomicUsize::new(0);

    std::thread::scope(|s| {
        let handles = pages
            .iter()
            .map(|&page_id| {
                let (bpm, finished) = (&bpm, &finished);
                s.spawn(move || -> Result<()> {
                    let mut guard = bpm.write_page(page_id, AccessType::Unknown)?;
                    stamp(&mut guard, page_id, 7);
                    std::thread::sleep(Duration::from_millis(5));
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect::<Vec<_>>();
        handles.into_iter().try_for_each(|h| h.join().unwrap())
    })?;
    assert_eq!(pages.len(), finished.load(Ordering::SeqCst));

    for &page_id in &pages {
        assert_eq!(7, verify(&bpm.read_page(page_id, AccessType::Unknown)?, page_id));
    }
    Ok(())
}

// single threaded random operations checked against a model of what every
// page should contain.
#[test]
fn test_random_ops_against_model() -> Result<()> {
    setup!(bpm, 4, 2);
    let mut rng = StdRng::seed_from_u64(42);
    let mut model: HashMap<PageId, u64> = HashMap::new();
    let mut pages: Vec<PageId> = vec![];

    for i in 0..3000u64 {
        if pages.is_empty() || rng.gen_bool(0.05) {
            pages.push(bpm.new_page());
            continue;
        }
        let page_id = pages[rng.gen_range(0..pages.len())];
        let expected = model.get(&page_id).copied().unwrap_or(0);
        match rng.gen_range(0..10) {
            0..=3 => {
                let guard = bpm.checked_read_page(page_id, AccessType::Unknown)?.unwrap();
                assert_eq!(expected, verify(&guard, page_id));
            }
            4..=6 => {
                let mut guard = bpm.checked_write_page(page_id, AccessType::Unknown)?.unwrap();
                assert_eq!(expected, verify(&guard, page_id));
                stamp(&mut guard, page_id, i + 1);
                model.insert(page_id, i + 1);
            }
            7 => {
                let resident = bpm.get_pin_count(page_id).is_some();
                assert_eq!(resident, bpm.flush_page(page_id)?);
            }
            8 => {
                assert!(bpm.delete_page(page_id)?);
                model.remove(&page_id);
                assert_eq!(None, bpm.get_pin_count(page_id));
            }
            _ => bpm.flush_all_pages()?,
        }
        assert!(bpm.page_ids().len() <= bpm.size());
    }
    info!("{} pages touched, {} resident", pages.len(), bpm.page_ids().len());

    for &page_id in &pages {
        let expected = model.get(&page_id).copied().unwrap_or(0);
        let guard = bpm.read_page(page_id, AccessType::Unknown)?;
        assert_eq!(PAGE_SIZE, guard.len());
        assert_eq!(expected, verify(&guard, page_id));
    }
    Ok(())
}
