//! The `extern "C"` HeapManager shim emitted AArch64 code links against
//! (§4.N).
//!
//! This crate carries no allocator logic of its own — it is a thin,
//! `#[no_mangle]`-exported façade over [`corvid_heap::TrackedHeap`] and
//! [`corvid_heap::Samm`], bundled into one process-wide [`Runtime`]
//! singleton per §9's "Singletons and global state" rewrite guidance.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod runtime;
pub mod shim;

pub use runtime::{init, Runtime, RuntimeConfig};
