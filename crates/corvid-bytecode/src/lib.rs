//! Instruction stream, segments, and relocation records (§3, §4.G).
//!
//! This crate defines the data the code generator hands to `corvid-linker`:
//! it has no opinion on how instructions get resolved, only on their shape.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod instruction;
mod listing;
mod relocation;
mod segment;

pub use instruction::{Instruction, InstructionStream};
pub use listing::{format_listing, format_numbered_listing};
pub use relocation::{JitAttribute, RelocationKind};
pub use segment::Segment;
