//! ELF64 structures and byte-level plumbing shared by the reader and writer.

pub mod constants;
pub mod io;
pub mod object;
pub mod string_table;

#[cfg(test)]
pub(crate) mod builder;

pub use object::{parse_object, InputSection, InputSymbol, ObjectFile, Rela, RelocKind, SectionKind};
pub use string_table::StringTable;
