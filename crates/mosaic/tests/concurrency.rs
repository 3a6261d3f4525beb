//! The handle budget holds under concurrent queries.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mosaico::{Error, Mosaic, MosaicOptions, Rect, SourceReader, Subsampling, TileDescriptor, TileSource};

/// Counts readers that are open right now and the most ever open at once.
#[derive(Debug, Default)]
struct Gauge {
    open: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Debug)]
struct CountingSource {
    id: String,
    gauge: Arc<Gauge>,
}

struct CountingReader {
    gauge: Arc<Gauge>,
}

impl SourceReader for CountingReader {
    fn read_range(&self, start: u64, buf: &mut [u8]) -> io::Result<usize> {
        buf.fill(start as u8);
        Ok(buf.len())
    }

    fn close(&self) -> io::Result<()> {
        self.gauge.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

impl TileSource for CountingSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn open(&self) -> io::Result<Box<dyn SourceReader>> {
        let now = self.gauge.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_micros(200));
        Ok(Box::new(CountingReader {
            gauge: Arc::clone(&self.gauge),
        }))
    }
}

/// 4x3 lattice of 64x64 tiles, each with its own source.
fn lattice(gauge: &Arc<Gauge>) -> Vec<TileDescriptor> {
    let mut tiles = Vec::new();
    for row in 0..3i64 {
        for col in 0..4i64 {
            let id = format!("r{row}c{col}");
            tiles.push(TileDescriptor::new(
                id.clone(),
                Rect::new(col * 64, row * 64, col * 64 + 64, row * 64 + 64).unwrap(),
                Subsampling::FULL,
                Arc::new(CountingSource {
                    id,
                    gauge: Arc::clone(gauge),
                }),
            ));
        }
    }
    tiles
}

#[test]
fn test_open_handles_never_exceed_budget() {
    const BUDGET: usize = 4;
    const THREADS: usize = 8;
    const QUERIES: usize = 60;

    let gauge = Arc::new(Gauge::default());
    let options = MosaicOptions::default()
        .with_max_open_handles(BUDGET)
        .with_acquire_timeout(Duration::from_secs(10));
    let mosaic = Mosaic::open_with(lattice(&gauge), options).unwrap();

    let served = AtomicUsize::new(0);
    let timed_out = AtomicUsize::new(0);

    thread::scope(|scope| {
        for t in 0..THREADS {
            let mosaic = &mosaic;
            let served = &served;
            let timed_out = &timed_out;
            scope.spawn(move || {
                for q in 0..QUERIES {
                    // 40x40 regions touch at most a 2x2 block of tiles
                    let x = ((t * 37 + q * 53) % 216) as i64;
                    let y = ((t * 17 + q * 29) % 152) as i64;
                    let region = Rect::new(x, y, x + 40, y + 40).unwrap();

                    match mosaic.query(&region, Subsampling::FULL) {
                        Ok(result) => {
                            assert!(result.is_fully_open());
                            for handle in &result.handles {
                                let mut buf = [0u8; 8];
                                handle.read_range_exact(3, &mut buf).unwrap();
                                assert_eq!(buf, [3u8; 8]);
                            }
                            result.release();
                            served.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(Error::HandleBudgetExhausted { .. }) => {
                            timed_out.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => panic!("query failed: {e}"),
                    }
                }
            });
        }
    });

    assert!(gauge.peak.load(Ordering::SeqCst) <= BUDGET);
    let stats = mosaic.handle_stats();
    assert!(stats.peak_open <= BUDGET);
    assert!(stats.open <= BUDGET);
    assert_eq!(stats.leases, 0);
    assert_eq!(
        served.load(Ordering::SeqCst) + timed_out.load(Ordering::SeqCst),
        THREADS * QUERIES
    );
    assert!(served.load(Ordering::SeqCst) > 0);

    let report = mosaic.dispose().unwrap();
    assert!(report.is_clean());
    assert_eq!(gauge.open.load(Ordering::SeqCst), 0);
}

#[test]
fn test_concurrent_planning_is_lock_free_and_consistent() {
    let gauge = Arc::new(Gauge::default());
    let mosaic = Mosaic::open(lattice(&gauge)).unwrap();
    let region = Rect::new(10, 10, 200, 150).unwrap();
    let expected = mosaic.plan(&region, Subsampling::FULL).unwrap();

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    assert_eq!(mosaic.plan(&region, Subsampling::FULL).unwrap(), expected);
                }
            });
        }
    });

    // Planning never opens a source
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 0);
    assert_eq!(mosaic.handle_stats().opened_total, 0);
}

#[test]
fn test_oversized_plan_leases_up_to_budget() {
    let gauge = Arc::new(Gauge::default());
    let options = MosaicOptions::default().with_max_open_handles(2);
    let mosaic = Mosaic::open_with(lattice(&gauge), options).unwrap();

    let whole = mosaic.bounds();
    let result = mosaic.query(&whole, Subsampling::FULL).unwrap();
    assert_eq!(result.plan.len(), 12);
    assert_eq!(result.handles.len(), 2);
    assert_eq!(result.failed.len(), 10);
    assert!(result
        .failed
        .iter()
        .all(|f| matches!(f.error, Error::HandleBudgetExceeded { needed: 12, max: 2 })));
    assert_eq!(gauge.open.load(Ordering::SeqCst), 2);
    result.release();

    mosaic.dispose().unwrap();
    assert_eq!(gauge.open.load(Ordering::SeqCst), 0);
}
