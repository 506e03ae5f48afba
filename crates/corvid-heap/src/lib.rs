//! The tracked heap, SAMM scope engine, freelist allocator, string pool,
//! and Bloom filter (§4.A-§4.E).
//!
//! Allocation flows downward through this crate: `TrackedHeap` is the
//! single source of truth for "who owns this block" (§9 "Pointer
//! ownership"); it cooperates with `Freelist` for list cells and
//! `StringPool` for string payloads, and consults `BloomFilter` on every
//! free to catch double frees. `Samm` sits above `TrackedHeap` and tracks
//! allocations per lexical scope, handing popped scopes to a background
//! worker for off-thread reclamation.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod bloom;
mod cells;
mod freelist;
mod samm;
mod string_pool;
mod tracked_heap;

pub use bloom::{BloomConfig, BloomFilter, RecentFrees};
pub use cells::{RawAtom, RawListHeader, ATOM_TAG_SENTINEL};
pub use freelist::{Freelist, FreelistConfig, FreelistStats};
pub use samm::{Samm, SammConfig, SammStats, ScopeIndex};
pub use string_pool::{
    copy_bytes_as_utf32, StringPool, StringPoolConfig, STRING_POOL_SIZE_CLASSES,
};
pub use tracked_heap::{AllocKind, BlockRecord, HeapConfig, Origin, TrackedHeap};
