//! Bounded pool of open tile-source handles.
//!
//! Handles are keyed by source id, so tiles sharing a source share one open
//! reader. A caller receives a [`Handle`], a lease on that reader; the reader
//! stays open while any lease is held. Released readers stay open in LRU order
//! until the budget forces the least recently released one to close.
//!
//! All bookkeeping happens under one mutex. Opening a source happens outside it,
//! against a slot reserved beforehand, so the budget also bounds readers that are
//! still being opened.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use lru::LruCache;
use mosaico_core::{Error, Result, SourceReader, TileDescriptor, TileId, TileSource};
use tracing::{debug, warn};

/// An open reader owned by the manager.
pub struct OpenHandle {
    source_id: String,
    reader: Box<dyn SourceReader>,
    closed: AtomicBool,
}

impl OpenHandle {
    fn new(source_id: String, reader: Box<dyn SourceReader>) -> Self {
        Self {
            source_id,
            reader,
            closed: AtomicBool::new(false),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the reader. A second call fails with [`Error::HandleClosed`].
    pub(crate) fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::HandleClosed {
                source_id: self.source_id.clone(),
            });
        }
        self.reader.close().map_err(Error::Io)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::HandleClosed {
                source_id: self.source_id.clone(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for OpenHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenHandle")
            .field("source_id", &self.source_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A caller's lease on an open source.
///
/// Give it back with [`Handle::release`]. Dropping it releases it too, but is
/// logged as an improper disposal.
#[derive(Debug)]
pub struct Handle {
    tile: TileId,
    inner: Arc<OpenHandle>,
    pool: Weak<Pool>,
    released: bool,
}

impl Handle {
    pub fn tile_id(&self) -> &TileId {
        &self.tile
    }

    pub fn source_id(&self) -> &str {
        self.inner.source_id()
    }

    /// Whether the underlying reader has been closed, e.g. by disposal of the mosaic.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn read_range(&self, start: u64, buf: &mut [u8]) -> Result<usize> {
        self.inner.ensure_open()?;
        Ok(self.inner.reader.read_range(start, buf)?)
    }

    pub fn read_range_exact(&self, start: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.ensure_open()?;
        Ok(self.inner.reader.read_range_exact(start, buf)?)
    }

    pub fn read_range_to_vec(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        self.inner.ensure_open()?;
        Ok(self.inner.reader.read_range_to_vec(start, end)?)
    }

    /// Return the lease, making the source eligible for eviction once unused.
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.release(&self.inner);
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.released && self.inner.is_closed() {
            warn!(
                "handle for tile {} ({}) outlived its mosaic",
                self.tile,
                self.inner.source_id()
            );
            self.give_back();
        } else if !self.released {
            debug!(
                "handle for tile {} ({}) dropped without release",
                self.tile,
                self.inner.source_id()
            );
            self.give_back();
        }
    }
}

/// Counters describing the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleStats {
    pub max_open: usize,
    /// Open readers plus slots reserved for readers being opened.
    pub open: usize,
    /// Open readers with no lease.
    pub idle: usize,
    /// Leases currently held.
    pub leases: usize,
    /// Highest `open` ever observed.
    pub peak_open: usize,
    pub opened_total: u64,
    pub evicted_total: u64,
}

/// Outcome of closing every tracked handle.
#[derive(Debug, Default)]
pub struct DisposeReport {
    /// Readers closed by this call.
    pub closed: usize,
    /// Close failures, by source id.
    pub failures: Vec<(String, Error)>,
}

impl DisposeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

enum Slot {
    /// Reserved while a reader is being opened outside the lock.
    Opening,
    Ready { handle: Arc<OpenHandle>, leases: usize },
}

struct PoolState {
    slots: HashMap<String, Slot>,
    /// Ready slots without leases, least recently released first.
    idle: LruCache<String, ()>,
    disposed: bool,
    peak_open: usize,
    opened_total: u64,
    evicted_total: u64,
}

impl PoolState {
    fn note_open(&mut self) {
        self.peak_open = self.peak_open.max(self.slots.len());
    }
}

struct Pool {
    state: Mutex<PoolState>,
    changed: Condvar,
    max_open: usize,
    timeout: Duration,
}

impl Pool {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Every critical section leaves the state consistent, so a poisoned
        // lock still guards valid data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, handle: &Arc<OpenHandle>) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        let id = handle.source_id();
        let now_idle = match state.slots.get_mut(id) {
            Some(Slot::Ready { handle: h, leases }) if Arc::ptr_eq(h, handle) => {
                *leases = leases.saturating_sub(1);
                *leases == 0
            }
            _ => false,
        };
        if now_idle {
            state.idle.put(id.to_string(), ());
        }
        drop(state);
        self.changed.notify_all();
    }
}

/// A per-tile acquisition result.
pub type Acquired = (TileId, Result<Handle>);

/// Opens, shares, evicts and closes tile-source handles within a budget.
#[derive(Clone)]
pub struct HandleManager {
    pool: Arc<Pool>,
}

impl std::fmt::Debug for HandleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleManager")
            .field("max_open", &self.pool.max_open)
            .field("timeout", &self.pool.timeout)
            .finish_non_exhaustive()
    }
}

impl HandleManager {
    /// `max_open` bounds concurrently open readers; `timeout` bounds how long an
    /// acquisition waits for leased readers to be released.
    pub fn new(max_open: usize, timeout: Duration) -> Self {
        Self {
            pool: Arc::new(Pool {
                state: Mutex::new(PoolState {
                    slots: HashMap::new(),
                    idle: LruCache::unbounded(),
                    disposed: false,
                    peak_open: 0,
                    opened_total: 0,
                    evicted_total: 0,
                }),
                changed: Condvar::new(),
                max_open: max_open.max(1),
                timeout,
            }),
        }
    }

    pub fn max_open(&self) -> usize {
        self.pool.max_open
    }

    /// Lease a handle on `tile`'s source, opening it if needed.
    pub fn acquire(&self, tile: &TileDescriptor) -> Result<Handle> {
        let mut results = self.acquire_many(std::slice::from_ref(tile))?;
        match results.pop() {
            Some((_, result)) => result,
            None => Err(Error::MosaicClosed),
        }
    }

    /// Lease handles for several tiles at once.
    ///
    /// Budget for all sources is reserved in one step, so concurrent callers never
    /// hold part of their handles while waiting for the rest. Results follow the
    /// order of `tiles`. The outer error is returned when no tile can be served at
    /// all: the manager is disposed, or the request alone exceeds the budget.
    pub fn acquire_many(&self, tiles: &[TileDescriptor]) -> Result<Vec<Acquired>> {
        let mut sources: Vec<(&str, &Arc<dyn TileSource>)> = Vec::new();
        let mut lease_counts: HashMap<&str, usize> = HashMap::new();
        for tile in tiles {
            let id = tile.source_id();
            let count = lease_counts.entry(id).or_insert(0);
            if *count == 0 {
                sources.push((id, tile.source()));
            }
            *count += 1;
        }

        if sources.len() > self.pool.max_open {
            return Err(Error::HandleBudgetExceeded {
                needed: sources.len(),
                max: self.pool.max_open,
            });
        }

        let started = Instant::now();
        // A timeout too large for the clock waits without bound
        let deadline = started.checked_add(self.pool.timeout);
        let mut state = self.pool.lock();

        let (mut ready, to_open) = loop {
            if state.disposed {
                return Err(Error::MosaicClosed);
            }
            if sources.is_empty() {
                break (HashMap::new(), Vec::new());
            }

            drop_closed_slots(&mut state, &sources);

            let in_flight = sources
                .iter()
                .any(|(id, _)| matches!(state.slots.get(*id), Some(Slot::Opening)));

            if !in_flight {
                let reused: Vec<&str> = sources
                    .iter()
                    .map(|(id, _)| *id)
                    .filter(|id| state.slots.contains_key(*id))
                    .collect();
                let new_count = sources.len() - reused.len();
                let free = self.pool.max_open.saturating_sub(state.slots.len());
                let reused_idle = reused.iter().filter(|id| state.idle.contains(**id)).count();
                let evictable = state.idle.len() - reused_idle;

                if new_count <= free + evictable {
                    break self.commit(&mut state, &sources, &reused, &lease_counts, new_count - new_count.min(free));
                }
            }

            let now = Instant::now();
            let Some(deadline) = deadline else {
                state = self
                    .pool
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            if now >= deadline {
                drop(state);
                warn!(
                    "handle budget of {} stayed full for {:?}",
                    self.pool.max_open,
                    now - started
                );
                return Ok(tiles
                    .iter()
                    .map(|t| {
                        let err = Error::HandleBudgetExhausted {
                            max: self.pool.max_open,
                            waited: now - started,
                        };
                        (t.id().clone(), Err(err))
                    })
                    .collect());
            }
            state = self
                .pool
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        };
        drop(state);

        let mut failures: HashMap<&str, std::io::Error> = HashMap::new();
        let mut opened: Vec<(&str, std::result::Result<Box<dyn SourceReader>, std::io::Error>)> =
            Vec::with_capacity(to_open.len());
        for (id, source) in &to_open {
            opened.push((*id, source.open()));
        }

        let mut state = self.pool.lock();
        for (id, result) in opened {
            match result {
                Ok(reader) if !state.disposed => {
                    let handle = Arc::new(OpenHandle::new(id.to_string(), reader));
                    state.slots.insert(
                        id.to_string(),
                        Slot::Ready {
                            handle: Arc::clone(&handle),
                            leases: lease_counts[id],
                        },
                    );
                    state.opened_total += 1;
                    ready.insert(id, handle);
                }
                Ok(reader) => {
                    // Disposed while opening: nothing may stay open
                    if let Err(e) = reader.close() {
                        warn!("closing {} after disposal failed: {}", id, e);
                    }
                }
                Err(e) => {
                    warn!("cannot open source {}: {}", id, e);
                    state.slots.remove(id);
                    failures.insert(id, e);
                }
            }
        }
        drop(state);
        self.pool.changed.notify_all();

        let pool = Arc::downgrade(&self.pool);
        Ok(tiles
            .iter()
            .map(|tile| {
                let id = tile.source_id();
                let result = match (ready.get(id), failures.get(id)) {
                    (Some(handle), _) => Ok(Handle {
                        tile: tile.id().clone(),
                        inner: Arc::clone(handle),
                        pool: pool.clone(),
                        released: false,
                    }),
                    (None, Some(e)) => Err(Error::SourceUnavailable {
                        tile: tile.id().clone(),
                        source_id: id.to_string(),
                        source: std::io::Error::new(e.kind(), e.to_string()),
                    }),
                    (None, None) => Err(Error::MosaicClosed),
                };
                (tile.id().clone(), result)
            })
            .collect())
    }

    /// Lease existing readers, evict idle ones to make room and reserve slots
    /// for the rest. Returns the leased readers and the sources left to open.
    #[allow(clippy::type_complexity)]
    fn commit<'t>(
        &self,
        state: &mut PoolState,
        sources: &[(&'t str, &'t Arc<dyn TileSource>)],
        reused: &[&'t str],
        lease_counts: &HashMap<&str, usize>,
        mut evict: usize,
    ) -> (HashMap<&'t str, Arc<OpenHandle>>, Vec<(&'t str, &'t Arc<dyn TileSource>)>) {
        let mut ready = HashMap::with_capacity(reused.len());
        for id in reused {
            if let Some(Slot::Ready { handle, leases }) = state.slots.get_mut(*id) {
                *leases += lease_counts[id];
                ready.insert(*id, Arc::clone(handle));
            }
            state.idle.pop(*id);
        }

        while evict > 0 {
            let Some((victim, ())) = state.idle.pop_lru() else {
                break;
            };
            if let Some(Slot::Ready { handle, .. }) = state.slots.remove(&victim) {
                debug!("evicting handle for {}", victim);
                if let Err(e) = handle.close() {
                    warn!("closing evicted handle {} failed: {}", victim, e);
                }
            }
            state.evicted_total += 1;
            evict -= 1;
        }

        let to_open: Vec<_> = sources
            .iter()
            .filter(|(id, _)| !ready.contains_key(id))
            .copied()
            .collect();
        for (id, _) in &to_open {
            state.slots.insert(id.to_string(), Slot::Opening);
        }
        state.note_open();

        (ready, to_open)
    }

    /// Give a lease back. Equivalent to [`Handle::release`].
    pub fn release(&self, handle: Handle) {
        handle.release();
    }

    pub fn stats(&self) -> HandleStats {
        let state = self.pool.lock();
        let leases = state
            .slots
            .values()
            .map(|s| match s {
                Slot::Ready { leases, .. } => *leases,
                Slot::Opening => 0,
            })
            .sum();
        HandleStats {
            max_open: self.pool.max_open,
            open: state.slots.len(),
            idle: state.idle.len(),
            leases,
            peak_open: state.peak_open,
            opened_total: state.opened_total,
            evicted_total: state.evicted_total,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.pool.lock().disposed
    }

    /// Close every tracked reader, leased or not, and refuse further use.
    ///
    /// Close failures are collected, not raised. A second call fails with
    /// [`Error::MosaicClosed`] and closes nothing.
    pub fn dispose(&self) -> Result<DisposeReport> {
        let mut state = self.pool.lock();
        if state.disposed {
            return Err(Error::MosaicClosed);
        }
        state.disposed = true;
        state.idle.clear();

        let mut report = DisposeReport::default();
        for (id, slot) in state.slots.drain() {
            if let Slot::Ready { handle, .. } = slot {
                if handle.is_closed() {
                    continue;
                }
                match handle.close() {
                    Ok(()) => report.closed += 1,
                    Err(e) => {
                        warn!("closing handle {} failed: {}", id, e);
                        report.failures.push((id, e));
                    }
                }
            }
        }
        drop(state);
        self.pool.changed.notify_all();

        report.failures.sort_by(|a, b| a.0.cmp(&b.0));
        debug!("disposed {} handles, {} failures", report.closed, report.failures.len());
        Ok(report)
    }
}

/// Forget ready slots whose reader was closed behind the pool's back, so the
/// caller re-opens them instead of leasing a dead reader.
fn drop_closed_slots(state: &mut PoolState, sources: &[(&str, &Arc<dyn TileSource>)]) {
    let stale: HashSet<&str> = sources
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| {
            matches!(state.slots.get(*id), Some(Slot::Ready { handle, .. }) if handle.is_closed())
        })
        .collect();
    for id in stale {
        debug!("re-acquiring closed handle for {}", id);
        state.slots.remove(id);
        state.idle.pop(id);
    }
}
