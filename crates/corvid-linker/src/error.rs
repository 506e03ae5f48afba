//! Linker failure modes (§4.H "Failure model", §7 tier 2).
//!
//! These are ordinary `Result` values, per Design Note "Exceptions": only
//! the top-level driver converts one into a process exit.

/// A fatal, non-retryable linker error.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LinkerError {
    /// A label was defined more than once.
    #[error("label '{0}' already defined")]
    DuplicateLabel(String),
    /// A relocation named a label that is neither a registered runtime
    /// function nor a locally defined label.
    #[error("undefined label '{0}' encountered during linking")]
    UndefinedLabel(String),
    /// An instruction carried a relocation kind the linker does not know
    /// how to apply.
    #[error("unsupported relocation kind on instruction targeting '{0}'")]
    UnsupportedRelocation(String),
    /// A runtime function name was registered twice (after upper-casing).
    #[error("runtime function '{0}' already registered")]
    DuplicateRuntimeFunction(String),
    /// The runtime symbol table's fixed 65536 slots are all taken.
    #[error("runtime symbol table is full (65536 slots)")]
    RuntimeSymbolTableFull,
    /// A lookup named a runtime function that was never registered.
    #[error("runtime function '{0}' is not registered")]
    UnknownRuntimeFunction(String),
}
