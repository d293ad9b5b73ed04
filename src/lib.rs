//! uld: a static ELF linker for x86-64.
//!
//! Links relocatable object files and static archives into a standalone
//! `ET_EXEC` executable. The crate is organized into:
//! - `config`: CLI configuration and library search.
//! - `elf`: ELF64 constants, binary io helpers, and object parsing.
//! - `archive`: GNU `ar` archives with lazy member extraction.
//! - `symtab`: global symbol resolution.
//! - `layout`: virtual-address and file layout of the output image.
//! - `got`: global offset table construction.
//! - `reloc`: relocation application.
//! - `writer`: executable emission.
//! - `linker`: the pipeline tying the above together.

pub mod archive;
pub mod config;
pub mod elf;
pub mod error;
pub mod got;
pub mod layout;
pub mod linker;
pub mod reloc;
pub mod symtab;
pub mod writer;

pub use error::{LinkError, Result};
pub use linker::Linker;
