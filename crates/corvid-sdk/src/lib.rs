//! Shared error codes, error ring, and POD value primitives for Corvid.
//!
//! Every other crate in the workspace — `corvid-heap`, `corvid-linker`,
//! `corvid-jit`, `corvid-preprocess`, `corvid-native` — depends on this one
//! for the error vocabulary (§7) and the tagged-atom primitives (§3) it
//! exports, so it sits at the bottom of the dependency graph with no
//! internal dependencies of its own.

#![warn(missing_docs)]

mod error_code;
mod error_ring;
pub mod sig_safe;
mod value;

pub use error_code::{CorvidError, ErrorCode};
pub use error_ring::{
    clear_errors, clear_last_error, for_each_recent_error_signal_safe, get_last_error,
    recent_errors, set_error, ErrorRecord,
};
pub use value::{AtomPayload, AtomTag};
