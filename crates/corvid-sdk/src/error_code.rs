//! Error codes shared by every tier of the runtime (§7 of SPEC_FULL.md).
//!
//! `ErrorCode` crosses the Rust/emitted-code ABI boundary, so it is a plain
//! `#[repr(u32)]` enum rather than a `thiserror` type — emitted AArch64 code
//! and the C shim (`corvid-native`) read it as an integer.

/// One of the fixed runtime error codes. Mirrors spec.md §6 "Error codes".
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// No error.
    Ok = 0,
    /// The system allocator or a pooled allocator could not satisfy a request.
    OutOfMemory = 1,
    /// A pointer passed to `free`/`resize` does not name a live allocation.
    InvalidPointer = 2,
    /// A pointer was freed twice (detected via the Bloom filter + exact cache).
    DoubleFree = 3,
    /// An argument violated a documented precondition.
    InvalidArgument = 4,
    /// A preprocessor `GET` directive named a file that does not exist.
    FileNotFound = 5,
    /// A read/write against the filesystem failed for a reason other than
    /// "not found".
    FileIo = 6,
}

impl ErrorCode {
    /// True for [`ErrorCode::Ok`].
    pub fn is_ok(self) -> bool {
        matches!(self, ErrorCode::Ok)
    }
}

impl Default for ErrorCode {
    fn default() -> Self {
        ErrorCode::Ok
    }
}

/// Idiomatic Rust-side error type for tier-1 recoverable runtime errors
/// (§7). This is an ergonomic facade: constructing one also posts to the
/// error ring via [`crate::error_ring::set_error`], so Rust callers can use
/// `?` while the underlying POD ring stays available to emitted code and
/// the signal handler.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum CorvidError {
    /// See [`ErrorCode::OutOfMemory`].
    #[error("out of memory")]
    OutOfMemory,
    /// See [`ErrorCode::InvalidPointer`].
    #[error("invalid pointer")]
    InvalidPointer,
    /// See [`ErrorCode::DoubleFree`].
    #[error("double free")]
    DoubleFree,
    /// See [`ErrorCode::InvalidArgument`].
    #[error("invalid argument")]
    InvalidArgument,
    /// See [`ErrorCode::FileNotFound`].
    #[error("file not found")]
    FileNotFound,
    /// See [`ErrorCode::FileIo`].
    #[error("file I/O error")]
    FileIo,
}

impl CorvidError {
    /// The [`ErrorCode`] this variant reports through the error ring.
    pub fn code(self) -> ErrorCode {
        match self {
            CorvidError::OutOfMemory => ErrorCode::OutOfMemory,
            CorvidError::InvalidPointer => ErrorCode::InvalidPointer,
            CorvidError::DoubleFree => ErrorCode::DoubleFree,
            CorvidError::InvalidArgument => ErrorCode::InvalidArgument,
            CorvidError::FileNotFound => ErrorCode::FileNotFound,
            CorvidError::FileIo => ErrorCode::FileIo,
        }
    }

    /// Construct a `CorvidError` and post it to the error ring (§4.L) under
    /// `function`, with `self`'s `Display` text as the message. Callers that
    /// want a `?`-friendly `Result` should prefer this over building the
    /// variant directly, since it keeps the POD error ring in sync with
    /// whatever the emitted JIT code would observe through
    /// `get_last_error`.
    pub fn report(self, function: &str) -> CorvidError {
        crate::error_ring::set_error(self.code(), function, &self.to_string());
        self
    }
}
