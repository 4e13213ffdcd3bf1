//! Shared infrastructure for the Magpie runtime.
//!
//! This crate holds the pieces shared by the core runtime and the external
//! compiler seam: the append-only symbol table and source-file management.

pub mod source;
pub mod symbol;

pub use source::SourceFile;
pub use symbol::{SymbolId, SymbolTable};
