//! ELF (Executable and Linkable Format) data structures and utilities.
//!
//! Everything here reads an image that the dynamic linker already mapped;
//! nothing is loaded from disk.

mod defs;
pub(crate) mod dynamic;
mod ehdr;
pub(crate) mod hash;
pub(crate) mod packed;
pub(crate) mod symbol;

// Internal module re-exports for use within the crate
pub(crate) use defs::*;
pub(crate) use dynamic::{ElfDynamic, PackedTable, RelTable};
pub(crate) use ehdr::ElfHeader;
pub(crate) use packed::PackedRelocs;
pub(crate) use symbol::SymbolTable;

// Public API exports
/// Core ELF data types for program headers, relocations, and symbols.
pub use defs::{
    DT_ANDROID_REL, DT_ANDROID_RELA, DT_ANDROID_RELASZ, DT_ANDROID_RELSZ, ElfPhdr, ElfRel,
    ElfSymbol, RelocInfo,
};
