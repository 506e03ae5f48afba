//! The tracked heap: central allocator, block bookkeeping, double-free
//! detection, and the signal-safe shadow table (§4.D).

use std::alloc::{alloc, alloc_zeroed, dealloc, realloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use corvid_sdk::{set_error, AtomTag, ErrorCode};

use crate::bloom::{BloomConfig, BloomFilter, RecentFrees};
use crate::cells::{RawAtom, RawListHeader};
use crate::freelist::Freelist;
use crate::string_pool::StringPool;

/// Which kind of payload a [`BlockRecord`] describes (§3 "Tracked heap
/// block").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AllocKind {
    /// A length-prefixed vector of 8-byte slots.
    Vec = 0,
    /// A length-prefixed, NUL-terminated UTF-32 string payload.
    String = 1,
    /// A zero-filled class instance.
    Object = 2,
    /// A list header (§3 "List header").
    List = 3,
    /// A slot that has been freed; retained transiently only for shadow
    /// table bookkeeping (§3 "Shadow heap table").
    Free = 4,
    /// Any other untyped allocation.
    Generic = 5,
}

/// Which underlying reclaimer owns a block, so `free` dispatches it
/// correctly (§4.D "free policy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Plain `alloc`/`dealloc` through the system allocator.
    Heap,
    /// A list header, reclaimed back through [`Freelist::headers`].
    Freelist,
    /// A string payload allocated through [`StringPool::alloc_chars`].
    StringPool,
}

/// One entry in the tracked-heap block map, keyed by the block's *base*
/// address (§3: "base pointer sits at `base`" for objects/lists, `base =
/// payload - 8` for vectors/strings).
#[derive(Debug, Clone)]
pub struct BlockRecord {
    /// The block's base address.
    pub base: usize,
    /// What this block holds.
    pub kind: AllocKind,
    /// Total bytes reserved for the block (including any length prefix).
    pub size: usize,
    /// Which reclaimer owns this block.
    pub origin: Origin,
    /// Freeform debugging annotation (e.g. a class name for objects).
    pub annotation: Option<String>,
}

/// Construction parameters for a [`TrackedHeap`].
#[derive(Debug, Clone, Copy)]
pub struct HeapConfig {
    /// Bloom filter sizing (§4.A).
    pub bloom: BloomConfig,
    /// Size of the exact-set recent-frees cache consulted on a Bloom hit
    /// (§9 Design Note "Bloom filter interaction with real double-free").
    pub recent_frees_capacity: usize,
    /// Whether the shadow heap table (§3) starts out populated.
    pub tracing_enabled: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            bloom: BloomConfig::default(),
            recent_frees_capacity: 4096,
            tracing_enabled: true,
        }
    }
}

const SHADOW_CAPACITY: usize = 128;

struct ShadowSlot {
    base: AtomicUsize,
    size: AtomicUsize,
    kind: AtomicU64,
}

/// A fixed-capacity, lock-free-readable ring of recently live blocks (§3
/// "Shadow heap table"). It is a *sampling device*, not an audit log (§9
/// Design Note iii): 128 entries is far smaller than a typical live-block
/// count, so a post-mortem dump sees only the most recent allocations.
struct ShadowHeapTable {
    slots: [ShadowSlot; SHADOW_CAPACITY],
    next: AtomicUsize,
    enabled: AtomicBool,
}

impl ShadowHeapTable {
    fn new(enabled: bool) -> ShadowHeapTable {
        ShadowHeapTable {
            slots: std::array::from_fn(|_| ShadowSlot {
                base: AtomicUsize::new(0),
                size: AtomicUsize::new(0),
                kind: AtomicU64::new(AllocKind::Free as u64),
            }),
            next: AtomicUsize::new(0),
            enabled: AtomicBool::new(enabled),
        }
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn record(&self, base: usize, size: usize, kind: AllocKind) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % SHADOW_CAPACITY;
        let slot = &self.slots[idx];
        slot.kind.store(AllocKind::Free as u64, Ordering::Relaxed);
        slot.base.store(base, Ordering::Relaxed);
        slot.size.store(size, Ordering::Relaxed);
        slot.kind.store(kind as u64, Ordering::Release);
    }

    fn erase(&self, base: usize) {
        for slot in &self.slots {
            if slot.base.load(Ordering::Relaxed) == base {
                slot.kind.store(AllocKind::Free as u64, Ordering::Relaxed);
            }
        }
    }

    /// Visit every occupied slot, async-signal-safe: only `Relaxed` atomic
    /// loads, no allocation, no locking.
    ///
    /// # Safety
    /// Callable from a signal handler. `f` must itself be async-signal-safe.
    unsafe fn for_each_signal_safe(&self, mut f: impl FnMut(usize, usize, u8)) {
        for slot in &self.slots {
            let kind = slot.kind.load(Ordering::Relaxed);
            if kind != AllocKind::Free as u64 {
                f(
                    slot.base.load(Ordering::Relaxed),
                    slot.size.load(Ordering::Relaxed),
                    kind as u8,
                );
            }
        }
    }
}

/// The central allocator (§4.D). Owns the block map, Bloom filter, and
/// shadow table; cooperates with [`Freelist`] and [`StringPool`] for list
/// cells and string payloads respectively.
pub struct TrackedHeap {
    blocks: Mutex<FxHashMap<usize, BlockRecord>>,
    bloom: Mutex<BloomFilter>,
    recent_frees: Mutex<RecentFrees>,
    samm_reclaimed: Mutex<rustc_hash::FxHashSet<usize>>,
    shadow: ShadowHeapTable,
    freelist: std::sync::Arc<Freelist>,
    string_pool: std::sync::Arc<StringPool>,
    bytes_freed_vec: AtomicU64,
    bytes_freed_string: AtomicU64,
    bytes_freed_object: AtomicU64,
    bytes_freed_list: AtomicU64,
    double_free_count: AtomicU64,
    bloom_false_positive_count: AtomicU64,
}

impl TrackedHeap {
    /// Build a heap sharing `freelist` and `string_pool` with the rest of
    /// the runtime.
    pub fn new(
        config: HeapConfig,
        freelist: std::sync::Arc<Freelist>,
        string_pool: std::sync::Arc<StringPool>,
    ) -> TrackedHeap {
        TrackedHeap {
            blocks: Mutex::new(FxHashMap::default()),
            bloom: Mutex::new(BloomFilter::new(config.bloom)),
            recent_frees: Mutex::new(RecentFrees::new(config.recent_frees_capacity)),
            samm_reclaimed: Mutex::new(rustc_hash::FxHashSet::default()),
            shadow: ShadowHeapTable::new(config.tracing_enabled),
            freelist,
            string_pool,
            bytes_freed_vec: AtomicU64::new(0),
            bytes_freed_string: AtomicU64::new(0),
            bytes_freed_object: AtomicU64::new(0),
            bytes_freed_list: AtomicU64::new(0),
            double_free_count: AtomicU64::new(0),
            bloom_false_positive_count: AtomicU64::new(0),
        }
    }

    /// Enable or disable shadow-table population (§3: "populated
    /// synchronously with the primary map only while tracing is enabled").
    pub fn set_tracing_enabled(&self, enabled: bool) {
        self.shadow.set_enabled(enabled);
    }

    fn register(&self, base: usize, kind: AllocKind, size: usize, origin: Origin) {
        self.blocks.lock().insert(
            base,
            BlockRecord {
                base,
                kind,
                size,
                origin,
                annotation: None,
            },
        );
        self.shadow.record(base, size, kind);
    }

    /// Reserve `8 + 8·n` bytes, 16-byte aligned, write length `n` at
    /// offset 0, and return the payload pointer at `base + 8`.
    pub fn alloc_vec(&self, n: usize) -> Option<NonNull<u8>> {
        let size = 8 + 8 * n;
        let layout = Layout::from_size_align(size, 16).ok()?;
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            set_error(ErrorCode::OutOfMemory, "alloc_vec", "system allocator returned null");
            return None;
        }
        unsafe {
            (base as *mut u64).write(n as u64);
        }
        self.register(base as usize, AllocKind::Vec, size, Origin::Heap);
        Some(unsafe { NonNull::new_unchecked(base.add(8)) })
    }

    /// Reserve `8 + 4·(n+1)` bytes, 16-byte aligned; writes length and a
    /// terminator word. This is the *general* string allocator (class
    /// fields, standalone string variables); atom payloads for list
    /// strings go through [`TrackedHeap::alloc_string_payload`] instead so
    /// they can be pooled (§4.C).
    pub fn alloc_string(&self, n: usize) -> Option<NonNull<u8>> {
        let size = 8 + 4 * (n + 1);
        let layout = Layout::from_size_align(size, 16).ok()?;
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            set_error(ErrorCode::OutOfMemory, "alloc_string", "system allocator returned null");
            return None;
        }
        unsafe {
            (base as *mut u64).write(n as u64);
            let terminator = (base.add(8) as *mut u32).add(n);
            terminator.write(0);
        }
        self.register(base as usize, AllocKind::String, size, Origin::Heap);
        Some(unsafe { NonNull::new_unchecked(base.add(8)) })
    }

    /// Allocate a string payload through the pool when it fits a size
    /// class, falling back to a direct allocation otherwise (§4.C
    /// "Oversized requests bypass the pool"). Used by `corvid-runtime`'s
    /// list/string ops to back `STRING` atom payloads.
    pub fn alloc_string_payload(&self, n: usize) -> Option<NonNull<u8>> {
        if let Some(payload) = self.string_pool.alloc_chars(n) {
            let base = unsafe { payload.as_ptr().sub(8) } as usize;
            let class_cap = crate::string_pool::STRING_POOL_SIZE_CLASSES
                [self.string_pool.class_for(n).unwrap()];
            self.register(
                base,
                AllocKind::String,
                16 + 4 * (class_cap + 1),
                Origin::StringPool,
            );
            return Some(payload);
        }
        self.alloc_string(n)
    }

    /// Reserve `size` bytes, 16-byte aligned, zero-filled.
    pub fn alloc_object(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(size, 16).ok()?;
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            set_error(ErrorCode::OutOfMemory, "alloc_object", "system allocator returned null");
            return None;
        }
        self.register(base as usize, AllocKind::Object, size, Origin::Heap);
        Some(unsafe { NonNull::new_unchecked(base) })
    }

    /// Pop an empty header from the freelist and register it as an
    /// `ALLOC_LIST` block.
    pub fn alloc_list(&self) -> NonNull<RawListHeader> {
        let header = self.freelist.headers.get();
        unsafe {
            header.as_ptr().write(RawListHeader::EMPTY);
        }
        self.register(
            header.as_ptr() as usize,
            AllocKind::List,
            std::mem::size_of::<RawListHeader>(),
            Origin::Freelist,
        );
        header
    }

    /// Resize a vector payload in place via `realloc`, preserving the
    /// length prefix (updated to `new_n`).
    pub fn resize_vec(&self, payload: NonNull<u8>, new_n: usize) -> Option<NonNull<u8>> {
        let base = unsafe { payload.as_ptr().sub(8) };
        let old_size = self.blocks.lock().get(&(base as usize)).map(|b| b.size)?;
        let old_layout = Layout::from_size_align(old_size, 16).ok()?;
        let new_size = 8 + 8 * new_n;
        let new_base = unsafe { realloc(base, old_layout, new_size) };
        if new_base.is_null() {
            set_error(ErrorCode::OutOfMemory, "resize_vec", "realloc returned null");
            return None;
        }
        unsafe {
            (new_base as *mut u64).write(new_n as u64);
        }
        let mut blocks = self.blocks.lock();
        blocks.remove(&(base as usize));
        blocks.insert(
            new_base as usize,
            BlockRecord {
                base: new_base as usize,
                kind: AllocKind::Vec,
                size: new_size,
                origin: Origin::Heap,
                annotation: None,
            },
        );
        drop(blocks);
        self.shadow.erase(base as usize);
        self.shadow.record(new_base as usize, new_size, AllocKind::Vec);
        Some(unsafe { NonNull::new_unchecked(new_base.add(8)) })
    }

    /// Resize a string payload in place via `realloc`, preserving the
    /// length prefix (updated to `new_n`) and terminator.
    pub fn resize_string(&self, payload: NonNull<u8>, new_n: usize) -> Option<NonNull<u8>> {
        let base = unsafe { payload.as_ptr().sub(8) };
        let old_size = self.blocks.lock().get(&(base as usize)).map(|b| b.size)?;
        let old_layout = Layout::from_size_align(old_size, 16).ok()?;
        let new_size = 8 + 4 * (new_n + 1);
        let new_base = unsafe { realloc(base, old_layout, new_size) };
        if new_base.is_null() {
            set_error(ErrorCode::OutOfMemory, "resize_string", "realloc returned null");
            return None;
        }
        unsafe {
            (new_base as *mut u64).write(new_n as u64);
            let terminator = (new_base.add(8) as *mut u32).add(new_n);
            terminator.write(0);
        }
        let mut blocks = self.blocks.lock();
        blocks.remove(&(base as usize));
        blocks.insert(
            new_base as usize,
            BlockRecord {
                base: new_base as usize,
                kind: AllocKind::String,
                size: new_size,
                origin: Origin::Heap,
                annotation: None,
            },
        );
        drop(blocks);
        self.shadow.erase(base as usize);
        self.shadow.record(new_base as usize, new_size, AllocKind::String);
        Some(unsafe { NonNull::new_unchecked(new_base.add(8)) })
    }

    /// Record that SAMM's background worker (or `handle_memory_pressure`)
    /// has already reclaimed `base` directly, bypassing `free`, so a later
    /// explicit `free` call is suppressed (§4.D "free policy" step 1, §4.E
    /// "the tracked-heap free consults this set first").
    pub fn note_samm_reclaimed(&self, base: usize) {
        self.samm_reclaimed.lock().insert(base);
        self.blocks.lock().remove(&base);
        self.shadow.erase(base);
    }

    /// Whether `ptr` was already reclaimed by SAMM (either as a base or as
    /// a vector/string payload, which SAMM tracks at the payload address).
    fn is_samm_reclaimed(&self, ptr: usize) -> bool {
        self.samm_reclaimed.lock().contains(&ptr)
    }

    /// Free a payload pointer (§4.D "free policy").
    pub fn free(&self, payload: usize) {
        if self.is_samm_reclaimed(payload) {
            return;
        }

        {
            let bloom = self.bloom.lock();
            let hit = bloom.check(payload) || bloom.check(payload.wrapping_sub(8));
            drop(bloom);
            if hit {
                let recent = self.recent_frees.lock();
                let confirmed = recent.contains(payload) || recent.contains(payload.wrapping_sub(8));
                drop(recent);
                if confirmed {
                    self.double_free_count.fetch_add(1, Ordering::Relaxed);
                    set_error(ErrorCode::DoubleFree, "free", "pointer was already freed");
                } else {
                    self.bloom_false_positive_count.fetch_add(1, Ordering::Relaxed);
                }
                return;
            }
        }

        let (base, record) = {
            let mut blocks = self.blocks.lock();
            if let Some(record) = blocks.remove(&payload) {
                (payload, record)
            } else if let Some(record) = blocks.remove(&payload.wrapping_sub(8)) {
                (payload.wrapping_sub(8), record)
            } else {
                set_error(ErrorCode::InvalidPointer, "free", "pointer does not name a live allocation");
                return;
            }
        };

        self.reclaim_record(base, &record);

        let mut bloom = self.bloom.lock();
        bloom.add(base);
        if base != payload {
            bloom.add(payload);
        }
        drop(bloom);
        let mut recent = self.recent_frees.lock();
        recent.record(base);
        if base != payload {
            recent.record(payload);
        }
        drop(recent);
        self.shadow.erase(base);
    }

    fn reclaim_record(&self, base: usize, record: &BlockRecord) {
        match (record.kind, record.origin) {
            (AllocKind::List, _) => {
                let header = unsafe { NonNull::new_unchecked(base as *mut RawListHeader) };
                self.free_list_cascade(header);
                unsafe {
                    self.freelist.headers.put(header);
                }
                self.bytes_freed_list.fetch_add(record.size as u64, Ordering::Relaxed);
            }
            (AllocKind::String, Origin::StringPool) => {
                let payload = unsafe { NonNull::new_unchecked((base + 8) as *mut u8) };
                unsafe {
                    self.string_pool.free_chars(payload);
                }
                self.bytes_freed_string.fetch_add(record.size as u64, Ordering::Relaxed);
            }
            (kind, Origin::Heap) => {
                let layout = Layout::from_size_align(record.size, 16)
                    .expect("recorded layout must have been valid at alloc time");
                unsafe {
                    dealloc(base as *mut u8, layout);
                }
                match kind {
                    AllocKind::Vec => self.bytes_freed_vec.fetch_add(record.size as u64, Ordering::Relaxed),
                    AllocKind::String => {
                        self.bytes_freed_string.fetch_add(record.size as u64, Ordering::Relaxed)
                    }
                    _ => self.bytes_freed_object.fetch_add(record.size as u64, Ordering::Relaxed),
                };
            }
            (_, Origin::Freelist) => {
                // Only list headers use freelist origin; handled above.
                unreachable!("non-list block recorded with Freelist origin");
            }
            (_, Origin::StringPool) => {
                unreachable!("non-string block recorded with StringPool origin");
            }
        }
    }

    /// Return a list-header sentinel directly to the freelist, without
    /// touching the block map or Bloom filter. Used by SAMM's background
    /// worker, which has already called [`TrackedHeap::note_samm_reclaimed`]
    /// and cascaded the header's atoms itself (§4.E).
    pub fn free_list_header_only(&self, header: NonNull<RawListHeader>) {
        unsafe {
            self.freelist.headers.put(header);
        }
    }

    /// Return a string-pool payload directly to its size class, without
    /// touching the block map or Bloom filter. Used by SAMM's background
    /// worker for the same reason as [`TrackedHeap::free_list_header_only`].
    ///
    /// # Safety
    /// `payload` must have come from this heap's [`StringPool`] and must
    /// not be freed twice.
    pub unsafe fn free_string_payload_only(&self, payload: NonNull<u8>) {
        self.string_pool.free_chars(payload);
    }

    /// Walk a list header's atom chain, releasing each atom back to the
    /// freelist and recursively releasing `STRING`/`LIST` payloads
    /// (§4.F "Ownership semantics": "Freeing a header releases all atoms
    /// reachable from it back to the freelist").
    pub fn free_list_cascade(&self, header: NonNull<RawListHeader>) {
        let mut atom_ptr = unsafe { (*header.as_ptr()).head };
        while atom_ptr != 0 {
            let atom = atom_ptr as *mut RawAtom;
            let next = unsafe { (*atom).next };
            match AtomTag::from_u64(unsafe { (*atom).tag }) {
                Some(AtomTag::String) => {
                    let payload = unsafe { (*atom).payload } as *mut u8;
                    if let Some(ptr) = NonNull::new(payload) {
                        self.free(ptr.as_ptr() as usize);
                    }
                }
                Some(AtomTag::List) => {
                    let nested = unsafe { (*atom).payload } as *mut RawListHeader;
                    if let Some(nested) = NonNull::new(nested) {
                        self.free(nested.as_ptr() as usize);
                    }
                }
                _ => {}
            }
            unsafe {
                self.freelist.atoms.put(NonNull::new_unchecked(atom));
            }
            atom_ptr = next;
        }
    }

    /// Cumulative bytes freed, by kind, since construction.
    pub fn bytes_freed(&self) -> (u64, u64, u64, u64) {
        (
            self.bytes_freed_vec.load(Ordering::Relaxed),
            self.bytes_freed_string.load(Ordering::Relaxed),
            self.bytes_freed_object.load(Ordering::Relaxed),
            self.bytes_freed_list.load(Ordering::Relaxed),
        )
    }

    /// Confirmed double-free attempts (Bloom hit + exact-cache match).
    pub fn double_free_count(&self) -> u64 {
        self.double_free_count.load(Ordering::Relaxed)
    }

    /// Bloom hits that the exact-cache subsequently classified as false
    /// positives (§9 Design Note).
    pub fn bloom_false_positive_count(&self) -> u64 {
        self.bloom_false_positive_count.load(Ordering::Relaxed)
    }

    /// Number of blocks currently tracked.
    pub fn live_block_count(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Async-signal-safe shadow table dump: formats `address: value` pairs
    /// for each occupied slot using only raw `write(2)`, no allocation, no
    /// locking (§4.K step 4).
    ///
    /// # Safety
    /// Callable from within a signal handler.
    pub unsafe fn dump_shadow_signal_safe(&self, fd: i32) {
        self.shadow.for_each_signal_safe(|base, size, kind| {
            corvid_sdk::sig_safe::write_labeled_hex(fd, b"base=", base as u64);
            corvid_sdk::sig_safe::write_labeled_hex(fd, b"size=", size as u64);
            corvid_sdk::sig_safe::write_labeled_hex(fd, b"kind=", kind as u64);
        });
    }
}
