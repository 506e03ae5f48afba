//! The process-wide `Runtime` singleton (§9 "Singletons and global state").
//!
//! spec.md presents the tracked heap, SAMM engine, freelist, and string
//! pool as independent singletons; §9's own rewrite guidance is to bundle
//! them into one explicit `Runtime` value and expose the flat C ABI as
//! thin wrappers that look the value up through a single process-wide
//! atomic pointer. `Runtime` is that value; [`init`]/[`current`] are the
//! lookup, built on a lazily-initialized process-wide cell.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use corvid_heap::{Freelist, FreelistConfig, HeapConfig, Samm, SammConfig, StringPool, StringPoolConfig, TrackedHeap};

/// Construction parameters for every pooled allocator the shim sits on
/// top of. Bundled into one struct so a single `corvid_runtime_init` call
/// configures the whole heap subsystem (§9 Ambient stack "Configuration").
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Tracked-heap construction parameters (§4.D).
    pub heap: HeapConfig,
    /// SAMM scope-engine construction parameters (§4.E).
    pub samm: SammConfig,
    /// Freelist allocator construction parameters (§4.B).
    pub freelist: FreelistConfig,
    /// String pool construction parameters (§4.C).
    pub string_pool: StringPoolConfig,
}

/// The bundle of allocators the C shim dispatches every call through.
pub struct Runtime {
    /// Central tracked-heap allocator (§4.D).
    pub heap: Arc<TrackedHeap>,
    /// Scope-aware memory manager (§4.E).
    pub samm: Arc<Samm>,
    /// Shared atom/header freelist (§4.B).
    pub freelist: Arc<Freelist>,
    /// Shared string-pool allocator (§4.C).
    pub string_pool: Arc<StringPool>,
}

impl Runtime {
    fn new(config: RuntimeConfig) -> Runtime {
        let freelist = Arc::new(Freelist::new(config.freelist));
        let string_pool = Arc::new(StringPool::new(config.string_pool));
        let heap = Arc::new(TrackedHeap::new(config.heap, freelist.clone(), string_pool.clone()));
        let samm = Samm::new(config.samm, heap.clone());
        Runtime {
            heap,
            samm,
            freelist,
            string_pool,
        }
    }
}

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Build and publish the process-wide runtime. Idempotent: a second call
/// (with any config) is a no-op and returns the runtime installed by the
/// first. Emitted code's start-up sequence is expected to call this (or
/// rely on [`current`]'s lazy default) exactly once before any other shim
/// entry point runs.
pub fn init(config: RuntimeConfig) -> &'static Runtime {
    RUNTIME.get_or_init(|| Runtime::new(config))
}

/// Look up the process-wide runtime, lazily installing one with default
/// configuration if [`init`] was never called. This mirrors the flat C
/// ABI's expectation that every shim entry point "just works" without an
/// explicit setup call, while still letting an embedder that cares about
/// sizing call [`init`] first.
pub fn current() -> &'static Runtime {
    RUNTIME.get_or_init(|| Runtime::new(RuntimeConfig::default()))
}
