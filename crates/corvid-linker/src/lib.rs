//! Label and runtime-symbol tables, the two-pass AArch64 linker, and
//! veneer synthesis (§4.H, §4.I).

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod error;
mod label;
mod linker;
mod patch;
mod runtime_symbols;
mod veneer;

pub use error::LinkerError;
pub use label::LabelManager;
pub use linker::{LinkConfig, Linker, LinkedModule};
pub use patch::{apply_absolute, apply_movz_movk, apply_pc_relative, is_branch_in_range};
pub use runtime_symbols::{
    RuntimeFunction, RuntimeSymbolTable, RUNTIME_SYMBOL_TABLE_BASE_OFFSET,
    RUNTIME_SYMBOL_TABLE_SLOTS,
};
pub use veneer::{VeneerBuilder, VENEER_SIZE_BYTES};
