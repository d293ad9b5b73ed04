//! Link pipeline orchestration.
//!
//! `Linker` collects parsed inputs, then `link()` runs the fixed pipeline:
//! resolve symbols (pulling archive members as needed), lay out the image,
//! build the GOT, emit the file skeleton, and patch relocations into it.
//! Inputs borrow their backing file data, so the caller keeps the maps alive
//! for the linker's lifetime.

use tracing::{debug, info};

use crate::archive::{self, Archive};
use crate::elf::{parse_object, ObjectFile};
use crate::error::{LinkError, Result};
use crate::got::GotTable;
use crate::layout;
use crate::reloc;
use crate::symtab::SymbolTable;
use crate::writer;

/// Entry symbol used when the command line does not override it.
pub const DEFAULT_ENTRY: &str = "_start";

pub struct Linker<'a> {
    entry_symbol: String,
    objects: Vec<ObjectFile>,
    archives: Vec<Archive<'a>>,
}

impl<'a> Linker<'a> {
    pub fn new(entry_symbol: &str) -> Linker<'a> {
        Linker {
            entry_symbol: entry_symbol.to_string(),
            objects: Vec::new(),
            archives: Vec::new(),
        }
    }

    /// Register one input file, sniffing the format from its magic. Objects
    /// join the link unconditionally; archives only contribute the members
    /// that resolution pulls in.
    pub fn add_input(&mut self, name: &str, data: &'a [u8]) -> Result<()> {
        if archive::is_archive(data) {
            self.archives.push(Archive::parse(data, name)?);
        } else {
            self.objects.push(parse_object(data, name)?);
        }
        Ok(())
    }

    /// Run the pipeline and return the finished executable image.
    pub fn link(mut self) -> Result<Vec<u8>> {
        let mut table = SymbolTable::new();
        for (idx, obj) in self.objects.iter().enumerate() {
            table.merge_object(idx, obj)?;
        }
        table.resolve_archives(&self.archives, &mut self.objects)?;
        table.require_resolved()?;

        let got = GotTable::build(&self.objects);
        let lay = layout::compute(&self.objects, &table.commons(), got.size_bytes());

        let entry = table
            .get(&self.entry_symbol)
            .and_then(|sym| lay.symbol_address(sym))
            .ok_or_else(|| LinkError::NoEntryPoint { symbol: self.entry_symbol.clone() })?;
        debug!(symbol = %self.entry_symbol, address = format_args!("{:#x}", entry), "entry point");

        let got_bytes = got.fill(&self.objects, &table, &lay)?;
        let mut image = writer::build_image(&self.objects, &lay, &got_bytes, entry);
        reloc::apply(&mut image, &self.objects, &table, &lay, &got)?;

        info!(
            objects = self.objects.len(),
            segments = lay.segments.len(),
            bytes = image.len(),
            "link complete"
        );
        Ok(image)
    }
}
