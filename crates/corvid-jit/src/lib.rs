//! The JIT executor's private stack switch and the post-mortem signal
//! handler (§4.J, §4.K).
//!
//! `JitExecutor` owns the anonymously-mapped stack emitted code runs on
//! and publishes it through a lock-free global so `signal::install`'s
//! handler can locate it without acquiring any lock, matching §5's
//! signal-safety requirement that the handler touch only volatile POD
//! state and lock-free atomics.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod error;
pub mod executor;
pub mod signal;

pub use error::JitError;
pub use executor::{ExecutorConfig, JitExecutor, DEFAULT_STACK_SIZE};
