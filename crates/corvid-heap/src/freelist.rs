//! Freelist allocator for list atoms and list headers (§4.B).
//!
//! Two independent, mutex-guarded intrusive singly-linked free chains —
//! one per cell shape — each backed by slabs allocated from the system
//! allocator in adaptively-growing chunks.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cells::{RawAtom, RawListHeader};

/// Construction parameters for a freelist pool (§9 "Configuration": an
/// explicit construction parameter rather than a compile-time constant).
#[derive(Debug, Clone, Copy)]
pub struct FreelistConfig {
    /// Number of records allocated on the first replenishment.
    pub initial_chunk: usize,
    /// Ceiling `current_chunk_size` is capped at.
    pub max_chunk: usize,
    /// Multiplier applied to `current_chunk_size` when two replenishments
    /// land within `rapid_replenish_window` of each other.
    pub scale_factor: usize,
    /// "Short wall-clock window" from §4.B: two replenishments inside this
    /// window count as sustained pressure and trigger scaling.
    pub rapid_replenish_window: Duration,
}

impl Default for FreelistConfig {
    fn default() -> Self {
        FreelistConfig {
            initial_chunk: 256,
            max_chunk: 1 << 20,
            scale_factor: 4,
            rapid_replenish_window: Duration::from_millis(50),
        }
    }
}

/// Point-in-time counters for one pool, for diagnostics and the testable
/// property P9 ("freelist replenishment only ever grows").
#[derive(Debug, Clone, Copy, Default)]
pub struct FreelistStats {
    /// Records ever obtained from the system allocator.
    pub total_allocated: u64,
    /// `get` calls satisfied from the free chain without a replenish.
    pub total_reused: u64,
    /// Current slab size the next replenish will request.
    pub current_chunk_size: usize,
    /// Number of times `current_chunk_size` has been scaled up.
    pub scaling_events: u64,
}

struct SlabPool<T> {
    config: FreelistConfig,
    free_head: *mut u8,
    chunk_size: usize,
    total_allocated: u64,
    total_reused: u64,
    scaling_events: u64,
    last_replenish: Option<Instant>,
    slabs: Vec<(NonNull<u8>, Layout, usize)>,
    _marker: std::marker::PhantomData<T>,
}

// SAFETY: a `SlabPool<T>` only ever exposes its raw pointers through
// `FreelistPool`'s `Mutex`-guarded API; no alias escapes without the lock.
unsafe impl<T> Send for SlabPool<T> {}

impl<T> SlabPool<T> {
    fn new(config: FreelistConfig) -> SlabPool<T> {
        SlabPool {
            chunk_size: config.initial_chunk,
            config,
            free_head: std::ptr::null_mut(),
            total_allocated: 0,
            total_reused: 0,
            scaling_events: 0,
            last_replenish: None,
            slabs: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    fn element_layout() -> Layout {
        let size = std::mem::size_of::<T>().max(std::mem::size_of::<usize>());
        let align = std::mem::align_of::<T>().max(std::mem::align_of::<usize>());
        Layout::from_size_align(size, align).expect("cell layout must be valid")
    }

    fn replenish(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_replenish {
            if now.duration_since(last) <= self.config.rapid_replenish_window {
                let scaled = self.chunk_size.saturating_mul(self.config.scale_factor);
                if scaled > self.chunk_size {
                    self.chunk_size = scaled.min(self.config.max_chunk);
                    self.scaling_events += 1;
                }
            }
        }
        self.last_replenish = Some(now);

        let element_layout = Self::element_layout();
        let count = self.chunk_size;
        let (slab_layout, stride) = repeat_layout(element_layout, count);

        let raw = unsafe { alloc(slab_layout) };
        let slab_ptr = NonNull::new(raw).expect("system allocator returned null");

        for i in 0..count {
            unsafe {
                let cell = raw.add(i * stride);
                let next = if i + 1 < count {
                    raw.add((i + 1) * stride) as usize
                } else {
                    0
                };
                (cell as *mut usize).write(next);
            }
        }

        self.free_head = raw;
        self.slabs.push((slab_ptr, slab_layout, stride));
        self.total_allocated += count as u64;
    }

    fn get(&mut self) -> NonNull<T> {
        if self.free_head.is_null() {
            self.replenish();
        } else {
            self.total_reused += 1;
        }
        let cell = self.free_head;
        debug_assert!(!cell.is_null());
        self.free_head = unsafe { (cell as *mut usize).read() as *mut u8 };
        unsafe { NonNull::new_unchecked(cell as *mut T) }
    }

    fn put(&mut self, ptr: NonNull<T>) {
        let cell = ptr.as_ptr() as *mut u8;
        unsafe {
            (cell as *mut usize).write(self.free_head as usize);
        }
        self.free_head = cell;
    }

    fn cleanup(&mut self) {
        for (slab_ptr, layout, _stride) in self.slabs.drain(..) {
            unsafe {
                dealloc(slab_ptr.as_ptr(), layout);
            }
        }
        self.free_head = std::ptr::null_mut();
    }

    fn stats(&self) -> FreelistStats {
        FreelistStats {
            total_allocated: self.total_allocated,
            total_reused: self.total_reused,
            current_chunk_size: self.chunk_size,
            scaling_events: self.scaling_events,
        }
    }
}

impl<T> Drop for SlabPool<T> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Returns `(layout-of-count-elements, stride)`, with `stride` padded so
/// each element satisfies `element_layout`'s alignment.
fn repeat_layout(element_layout: Layout, count: usize) -> (Layout, usize) {
    let stride = element_layout.pad_to_align().size();
    let total = stride.checked_mul(count).expect("slab size overflow");
    let layout = Layout::from_size_align(total.max(1), element_layout.align())
        .expect("slab layout must be valid");
    (layout, stride)
}

/// A single mutex-guarded pool of fixed-size records (§4.B "All operations
/// take a single pool mutex; operations are O(1) amortized").
pub struct FreelistPool<T> {
    inner: Mutex<SlabPool<T>>,
}

impl<T> FreelistPool<T> {
    fn new(config: FreelistConfig) -> FreelistPool<T> {
        FreelistPool {
            inner: Mutex::new(SlabPool::new(config)),
        }
    }

    /// Pop one record off the free chain, replenishing from the system
    /// allocator first if the chain is empty.
    pub fn get(&self) -> NonNull<T> {
        self.inner.lock().get()
    }

    /// Prepend `ptr` back onto the free chain.
    ///
    /// # Safety
    /// `ptr` must have come from this pool's `get` and must not be used
    /// again until a later `get` returns it.
    pub unsafe fn put(&self, ptr: NonNull<T>) {
        self.inner.lock().put(ptr);
    }

    /// Release every slab this pool ever allocated back to the system
    /// allocator (`cleanup_freelists`, §4.B). The pool is empty and usable
    /// afterward — the next `get` replenishes from scratch.
    pub fn cleanup(&self) {
        self.inner.lock().cleanup();
    }

    /// A snapshot of this pool's counters.
    pub fn stats(&self) -> FreelistStats {
        self.inner.lock().stats()
    }
}

/// The two freelist pools named in §4.B: one for [`RawAtom`] cells, one
/// for [`RawListHeader`] sentinels.
pub struct Freelist {
    /// Pool of list-atom cells.
    pub atoms: FreelistPool<RawAtom>,
    /// Pool of list-header sentinels.
    pub headers: FreelistPool<RawListHeader>,
}

impl Freelist {
    /// Build both pools with the same configuration.
    pub fn new(config: FreelistConfig) -> Freelist {
        Freelist {
            atoms: FreelistPool::new(config),
            headers: FreelistPool::new(config),
        }
    }

    /// Release every slab in both pools.
    pub fn cleanup_freelists(&self) {
        self.atoms.cleanup();
        self.headers.cleanup();
    }
}

impl Default for Freelist {
    fn default() -> Self {
        Freelist::new(FreelistConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_replenishes_on_first_call() {
        let pool: FreelistPool<RawAtom> = FreelistPool::new(FreelistConfig::default());
        let atom = pool.get();
        unsafe {
            atom.as_ptr().write(RawAtom::ZERO);
        }
        let stats = pool.stats();
        assert!(stats.total_allocated >= 1);
    }

    #[test]
    fn returned_record_is_reused_before_replenishing_again() {
        let config = FreelistConfig {
            initial_chunk: 4,
            ..FreelistConfig::default()
        };
        let pool: FreelistPool<RawAtom> = FreelistPool::new(config);
        let a = pool.get();
        unsafe {
            pool.put(a);
        }
        let allocated_before = pool.stats().total_allocated;
        let b = pool.get();
        assert_eq!(pool.stats().total_allocated, allocated_before);
        assert_eq!(pool.stats().total_reused, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn chunk_size_scales_under_rapid_pressure() {
        let config = FreelistConfig {
            initial_chunk: 2,
            max_chunk: 1000,
            scale_factor: 4,
            rapid_replenish_window: Duration::from_secs(10),
        };
        let pool: FreelistPool<RawAtom> = FreelistPool::new(config);

        // Exhaust the first chunk of 2, forcing a second replenish inside
        // the (generously long) rapid-pressure window.
        let mut held = Vec::new();
        for _ in 0..2 {
            held.push(pool.get());
        }
        let before = pool.stats().current_chunk_size;
        let _third = pool.get();
        let after = pool.stats().current_chunk_size;
        assert!(after > before);
        assert_eq!(after, before * 4);
        assert_eq!(pool.stats().scaling_events, 1);
    }

    #[test]
    fn chunk_size_never_shrinks_and_is_capped() {
        let config = FreelistConfig {
            initial_chunk: 2,
            max_chunk: 10,
            scale_factor: 4,
            rapid_replenish_window: Duration::from_secs(10),
        };
        let pool: FreelistPool<RawAtom> = FreelistPool::new(config);
        let mut held = Vec::new();
        for _ in 0..40 {
            held.push(pool.get());
        }
        assert!(pool.stats().current_chunk_size <= 10);
    }

    #[test]
    fn cleanup_frees_all_slabs_and_resets_free_chain() {
        let pool: FreelistPool<RawAtom> = FreelistPool::new(FreelistConfig::default());
        let a = pool.get();
        unsafe {
            pool.put(a);
        }
        pool.cleanup();
        // A subsequent get should replenish again from zero reused state
        // tracked internally (we only assert it doesn't panic / UB here).
        let _b = pool.get();
    }

    #[test]
    fn freelist_atoms_and_headers_pools_are_independent() {
        let freelist = Freelist::default();
        let atom = freelist.atoms.get();
        let header = freelist.headers.get();
        assert_ne!(atom.as_ptr() as usize, header.as_ptr() as usize);
    }
}
