//! The `GET "path"` include-chain preprocessor (§4.M).
//!
//! Sits in front of the (out-of-scope, per spec.md §1) lexer: it turns a
//! root file plus a tree of `GET`-linked includes into one flat character
//! stream with `//LINE` boundary markers, so later passes can still map a
//! token back to the original file and line it came from.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod directive;
mod error;
mod preprocessor;

pub use error::PreprocessError;
pub use preprocessor::{PreprocessConfig, Preprocessor};
