//! Errors raised while standing up a JIT executor (§4.J).

/// Failure modes for [`crate::executor::JitExecutor::new`].
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// The anonymous `mmap` for the private execution stack failed.
    #[error("failed to map a {requested_bytes}-byte JIT stack: {errno}")]
    StackMapFailed {
        /// Bytes requested from `mmap`.
        requested_bytes: usize,
        /// The OS error reported by `mmap`.
        errno: std::io::Error,
    },
}
