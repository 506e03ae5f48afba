//! Scope-Aware Memory Manager: scope stack, RETAIN semantics, and the
//! background cleanup worker (§4.E).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::tracked_heap::TrackedHeap;

/// Index of a scope on the stack. `ScopeIndex(0)` is the global scope,
/// which is never popped (§4.E "the bottom-most scope is the program's
/// global scope and is never popped").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScopeIndex(pub usize);

/// Which reclaimer owns a pointer SAMM is tracking, mirroring
/// [`crate::tracked_heap::Origin`] but recorded independently so the
/// background worker can dispatch without taking the tracked heap's block
/// map lock on the hot path (§4.E: "a set of freelist-origin pointers and
/// a set of string-pool-origin pointers so the background worker can
/// dispatch each cleanup to the correct underlying reclaimer").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackedOrigin {
    Heap,
    Freelist,
    StringPool,
}

#[derive(Debug, Clone, Copy)]
struct TrackedPointer {
    addr: usize,
    origin: TrackedOrigin,
}

type ScopeList = Vec<TrackedPointer>;

/// Construction parameters for [`Samm`].
#[derive(Debug, Clone, Copy)]
pub struct SammConfig {
    /// Initial capacity hint for a freshly-pushed scope's pointer list.
    pub scope_capacity_hint: usize,
}

impl Default for SammConfig {
    fn default() -> Self {
        SammConfig {
            scope_capacity_hint: 64,
        }
    }
}

/// Point-in-time counters, mostly for tests exercising the seed scenarios
/// (§8 scenario 3: "popping a scope asynchronously frees every object it
/// owned").
#[derive(Debug, Clone, Copy, Default)]
pub struct SammStats {
    /// Objects reclaimed by the background worker or by
    /// `handle_memory_pressure`, cumulative.
    pub objects_cleaned: u64,
    /// Scopes pushed, cumulative.
    pub scopes_entered: u64,
    /// Scopes popped, cumulative.
    pub scopes_exited: u64,
}

/// The scope-aware memory manager (§4.E). Holds a stack of scopes, each a
/// list of origin-tagged pointers; popping a scope hands its list to a
/// background worker (or, under `handle_memory_pressure`, reclaims it
/// synchronously on the caller's thread) rather than blocking the caller.
pub struct Samm {
    heap: Arc<TrackedHeap>,
    scopes: Mutex<Vec<ScopeList>>,
    config: SammConfig,
    enabled: AtomicBool,
    cleanup_tx: Sender<ScopeList>,
    /// A second handle onto the cleanup channel, used only by
    /// `handle_memory_pressure` to drain queued batches on the caller's
    /// thread. Crossbeam's channel is MPMC, so this competes fairly with
    /// the worker's own receiver for whatever is still queued rather than
    /// duplicating any batch.
    cleanup_rx: Receiver<ScopeList>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pending: Mutex<u64>,
    drained: Condvar,
    objects_cleaned: AtomicU64,
    scopes_entered: AtomicU64,
    scopes_exited: AtomicU64,
}

impl Samm {
    /// Build a manager with a single global scope already on the stack,
    /// and spawn its background cleanup worker.
    pub fn new(config: SammConfig, heap: Arc<TrackedHeap>) -> Arc<Samm> {
        let (cleanup_tx, cleanup_rx) = unbounded::<ScopeList>();
        let worker_rx = cleanup_rx.clone();

        let samm = Arc::new(Samm {
            heap,
            scopes: Mutex::new(vec![Vec::with_capacity(config.scope_capacity_hint)]),
            config,
            enabled: AtomicBool::new(true),
            cleanup_tx,
            cleanup_rx,
            worker: Mutex::new(None),
            pending: Mutex::new(0),
            drained: Condvar::new(),
            objects_cleaned: AtomicU64::new(0),
            scopes_entered: AtomicU64::new(0),
            scopes_exited: AtomicU64::new(0),
        });

        let worker_samm = Arc::clone(&samm);
        let handle = std::thread::Builder::new()
            .name("corvid-samm-worker".to_string())
            .spawn(move || worker_samm.run_worker(worker_rx))
            .expect("failed to spawn SAMM worker thread");
        *samm.worker.lock() = Some(handle);

        samm
    }

    fn run_worker(&self, cleanup_rx: Receiver<ScopeList>) {
        while let Ok(batch) = cleanup_rx.recv() {
            self.reclaim_batch(batch);
            self.mark_batch_drained();
        }
    }

    fn reclaim_batch(&self, batch: ScopeList) {
        for pointer in batch {
            self.reclaim_one(pointer);
        }
    }

    fn reclaim_one(&self, pointer: TrackedPointer) {
        match pointer.origin {
            TrackedOrigin::Heap => {
                self.heap.free(pointer.addr);
            }
            TrackedOrigin::Freelist => {
                self.heap.note_samm_reclaimed(pointer.addr);
                // Safety: this pointer came from `TrackedHeap::alloc_list`
                // (via `Freelist::headers::get`) and is reachable from
                // exactly one scope's tracked-pointer list.
                let header = unsafe {
                    std::ptr::NonNull::new_unchecked(
                        pointer.addr as *mut crate::cells::RawListHeader,
                    )
                };
                self.heap.free_list_cascade(header);
                self.heap.free_list_header_only(header);
            }
            TrackedOrigin::StringPool => {
                self.heap.note_samm_reclaimed(pointer.addr);
                // Safety: this pointer came from `TrackedHeap::alloc_string_payload`
                // and is reachable from exactly one scope's tracked-pointer list.
                let payload = unsafe { std::ptr::NonNull::new_unchecked(pointer.addr as *mut u8) };
                unsafe {
                    self.heap.free_string_payload_only(payload);
                }
            }
        }
        self.objects_cleaned.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_batch_drained(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    /// Globally enable or disable SAMM. When disabled, `exit_scope` still
    /// pops the stack but leaves the popped pointers untracked — matching
    /// §4.E "when disabled, popping a scope does not enqueue any cleanup".
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether SAMM is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Push a new, empty scope.
    pub fn enter_scope(&self) -> ScopeIndex {
        let mut scopes = self.scopes.lock();
        scopes.push(Vec::with_capacity(self.config.scope_capacity_hint));
        self.scopes_entered.fetch_add(1, Ordering::Relaxed);
        ScopeIndex(scopes.len() - 1)
    }

    /// Pop the top scope and hand its pointers to the background worker
    /// (§4.E "Popping a scope ... hands the list to a background worker").
    /// No-op beyond the pop itself if SAMM is disabled or the global scope
    /// would be popped.
    pub fn exit_scope(&self) {
        let popped = {
            let mut scopes = self.scopes.lock();
            if scopes.len() <= 1 {
                return;
            }
            scopes.pop()
        };
        self.scopes_exited.fetch_add(1, Ordering::Relaxed);
        let Some(batch) = popped else { return };
        if batch.is_empty() || !self.is_enabled() {
            return;
        }
        *self.pending.lock() += 1;
        if self.cleanup_tx.send(batch).is_err() {
            // Worker already shut down; reclaim synchronously rather than
            // leaking.
            self.mark_batch_drained();
        }
    }

    fn track_with_origin(&self, addr: usize, origin: TrackedOrigin) {
        let mut scopes = self.scopes.lock();
        let top = scopes.last_mut().expect("global scope is never popped");
        top.push(TrackedPointer { addr, origin });
    }

    /// Track a pointer allocated directly through the tracked heap
    /// (objects, vectors, general strings).
    pub fn track(&self, addr: usize) {
        self.track_with_origin(addr, TrackedOrigin::Heap);
    }

    /// Track a list header allocated through the freelist.
    pub fn track_freelist(&self, addr: usize) {
        self.track_with_origin(addr, TrackedOrigin::Freelist);
    }

    /// Track a string payload allocated through the string pool.
    pub fn track_string_pool(&self, addr: usize) {
        self.track_with_origin(addr, TrackedOrigin::StringPool);
    }

    /// Move `ptr` from the current top scope into the scope `levels_up`
    /// ancestors above it (`RETAIN`, §4.E). A no-op, not an error, if that
    /// ancestor scope does not exist (P3: "if no such scope exists, `p`
    /// remains in the top scope and no error is raised") — `ptr` is left
    /// in the top scope rather than moved to the global scope.
    pub fn retain(&self, ptr: usize, levels_up: usize) {
        let mut scopes = self.scopes.lock();
        let top = scopes.len() - 1;
        if levels_up > top {
            return;
        }
        let Some(pos) = scopes[top].iter().position(|p| p.addr == ptr) else {
            return;
        };
        let pointer = scopes[top].remove(pos);
        let target = top - levels_up;
        scopes[target].push(pointer);
    }

    /// Synchronously drain the cleanup queue on the calling thread (§4.E,
    /// §9 "the producer drains the channel synchronously"). Pulls whatever
    /// batches are already queued off the channel itself and reclaims them
    /// here rather than waiting on the background worker to make progress,
    /// so this still completes even if the worker is wedged.
    pub fn handle_memory_pressure(&self) {
        while let Ok(batch) = self.cleanup_rx.try_recv() {
            self.reclaim_batch(batch);
            self.mark_batch_drained();
        }
    }

    /// Block until every enqueued cleanup batch has been processed.
    pub fn wait_for_drain(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.drained.wait(&mut pending);
        }
    }

    /// A snapshot of this manager's counters.
    pub fn stats(&self) -> SammStats {
        SammStats {
            objects_cleaned: self.objects_cleaned.load(Ordering::Relaxed),
            scopes_entered: self.scopes_entered.load(Ordering::Relaxed),
            scopes_exited: self.scopes_exited.load(Ordering::Relaxed),
        }
    }

    /// Drain any remaining batches synchronously and release every pointer
    /// still tracked in any scope (including the global one). The
    /// background worker itself stops when the last `Arc<Samm>` drops
    /// (see the `Drop` impl below); this just forces reclamation of
    /// whatever hadn't been popped as a scope yet.
    pub fn shutdown(&self) {
        self.wait_for_drain();
        let remaining: Vec<ScopeList> = {
            let mut scopes = self.scopes.lock();
            std::mem::take(&mut *scopes)
        };
        for batch in remaining {
            self.reclaim_batch(batch);
        }
    }
}

impl Drop for Samm {
    fn drop(&mut self) {
        // Swap out the real sender and drop it explicitly: it is the
        // worker's only sender, so dropping it closes the channel and
        // ends `run_worker`'s `recv` loop before we try to join.
        let (scratch_tx, _scratch_rx) = unbounded::<ScopeList>();
        let real_tx = std::mem::replace(&mut self.cleanup_tx, scratch_tx);
        drop(real_tx);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freelist::Freelist;
    use crate::string_pool::StringPool;
    use crate::tracked_heap::HeapConfig;

    fn samm() -> Arc<Samm> {
        let heap = Arc::new(TrackedHeap::new(
            HeapConfig::default(),
            Arc::new(Freelist::default()),
            Arc::new(StringPool::default()),
        ));
        Samm::new(SammConfig::default(), heap)
    }

    #[test]
    fn global_scope_cannot_be_popped() {
        let samm = samm();
        samm.exit_scope();
        assert_eq!(samm.stats().scopes_exited, 0);
    }

    #[test]
    fn popping_a_scope_eventually_frees_its_objects() {
        let samm = samm();
        let heap = Arc::clone(&samm.heap);
        samm.enter_scope();
        let payload = heap.alloc_object(16).unwrap();
        samm.track(payload.as_ptr() as usize);
        samm.exit_scope();
        samm.wait_for_drain();
        assert_eq!(samm.stats().objects_cleaned, 1);
        assert_eq!(heap.live_block_count(), 0);
    }

    #[test]
    fn retain_moves_pointer_to_ancestor_scope() {
        let samm = samm();
        let heap = Arc::clone(&samm.heap);
        samm.enter_scope();
        samm.enter_scope();
        let payload = heap.alloc_object(16).unwrap();
        let addr = payload.as_ptr() as usize;
        samm.track(addr);
        samm.retain(addr, 1);
        samm.exit_scope();
        samm.wait_for_drain();
        // Retained up to the middle scope, so it must have survived the
        // inner scope's exit.
        assert_eq!(heap.live_block_count(), 1);
    }

    #[test]
    fn retain_past_the_top_is_a_no_op() {
        let samm = samm();
        let heap = Arc::clone(&samm.heap);
        samm.enter_scope();
        let payload = heap.alloc_object(16).unwrap();
        let addr = payload.as_ptr() as usize;
        samm.track(addr);
        samm.retain(addr, 100);
        // No ancestor 100 levels up exists, so `ptr` stays in the scope
        // just entered and is reclaimed when that scope exits.
        samm.exit_scope();
        samm.wait_for_drain();
        assert_eq!(heap.live_block_count(), 0);
    }

    #[test]
    fn disabled_samm_does_not_enqueue_cleanup() {
        let samm = samm();
        let heap = Arc::clone(&samm.heap);
        samm.set_enabled(false);
        samm.enter_scope();
        let payload = heap.alloc_object(16).unwrap();
        samm.track(payload.as_ptr() as usize);
        samm.exit_scope();
        samm.wait_for_drain();
        assert_eq!(samm.stats().objects_cleaned, 0);
        assert_eq!(heap.live_block_count(), 1);
    }
}
