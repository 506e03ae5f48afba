//! Preprocessor failure modes (§4.M).

use std::path::PathBuf;

/// A fatal preprocessing error. The driver (out of scope for this crate,
/// per spec.md §1) is expected to report one of these and stop; nothing
/// here is retried.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PreprocessError {
    /// A `GET` directive's inclusion chain revisits a file already on the
    /// stack. `chain` lists the canonicalized paths from the outermost
    /// file down to the one that closes the cycle.
    #[error("circular include detected: {}", format_chain(.0))]
    CircularInclude(Vec<PathBuf>),
    /// Neither the including file's directory nor any configured include
    /// path contained the requested file.
    #[error("file not found: {path} (tried: {tried:?})")]
    FileNotFound { path: String, tried: Vec<PathBuf> },
    /// A read against a file that does exist failed for some other reason.
    #[error("I/O error reading '{path}': {message}")]
    Io { path: PathBuf, message: String },
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
