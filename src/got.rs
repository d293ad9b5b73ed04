//! Global offset table construction.
//!
//! `R_X86_64_GOTPCREL` and friends address a symbol through an 8-byte slot
//! holding its absolute address; even a fully static link has to provide the
//! slot because the compiler may leave the memory access un-relaxed. Slots are
//! assigned on first use scanning relocations in link order, which makes the
//! table layout a pure function of the inputs.

use std::collections::HashMap;

use tracing::debug;

use crate::elf::ObjectFile;
use crate::error::{LinkError, Result};
use crate::layout::Layout;
use crate::symtab::SymbolTable;

/// Identity of a GOT slot owner. Locals never share slots across objects even
/// when their names collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GotKey {
    Global(String),
    Local { object: usize, sym: u32 },
}

/// The output `.got`: one 8-byte slot per distinct referenced symbol.
#[derive(Default)]
pub struct GotTable {
    entries: Vec<GotKey>,
    index: HashMap<GotKey, usize>,
}

pub const GOT_SLOT_SIZE: u64 = 8;

impl GotTable {
    /// Scan every object's relocations and assign slots in first-use order.
    pub fn build(objects: &[ObjectFile]) -> GotTable {
        let mut table = GotTable::default();
        for (oi, obj) in objects.iter().enumerate() {
            for relas in &obj.relocations {
                for rela in relas {
                    if !rela.kind.needs_got() {
                        continue;
                    }
                    table.add(got_key(oi, obj, rela.sym_idx));
                }
            }
        }
        if !table.entries.is_empty() {
            debug!(slots = table.entries.len(), "built GOT");
        }
        table
    }

    fn add(&mut self, key: GotKey) {
        if !self.index.contains_key(&key) {
            self.index.insert(key.clone(), self.entries.len());
            self.entries.push(key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> u64 {
        self.entries.len() as u64 * GOT_SLOT_SIZE
    }

    /// Virtual address of the slot for `key`, given the table's base address.
    pub fn slot_address(&self, got_addr: u64, key: &GotKey) -> Option<u64> {
        self.index.get(key).map(|&i| got_addr + i as u64 * GOT_SLOT_SIZE)
    }

    /// Serialize the table: each slot holds the resolved absolute address of
    /// its symbol, or zero for an undefined weak reference.
    pub fn fill(
        &self,
        objects: &[ObjectFile],
        table: &SymbolTable,
        layout: &Layout,
    ) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; self.size_bytes() as usize];
        for (i, key) in self.entries.iter().enumerate() {
            let addr = match key {
                GotKey::Global(name) => match table.get(name) {
                    Some(global) => layout.symbol_address(global).ok_or_else(|| {
                        LinkError::MalformedObject {
                            source_name: global.source.clone(),
                            detail: format!("symbol '{}' is not in a loadable section", name),
                        }
                    })?,
                    // Undefined weak references read as null.
                    None => 0,
                },
                GotKey::Local { object, sym } => {
                    let obj = &objects[*object];
                    let s = obj.symbol(*sym);
                    layout.input_symbol_address(*object, s).ok_or_else(|| {
                        LinkError::MalformedObject {
                            source_name: obj.source_name.clone(),
                            detail: format!("symbol '{}' is not in a loadable section", s.name),
                        }
                    })?
                }
            };
            bytes[i * 8..i * 8 + 8].copy_from_slice(&addr.to_le_bytes());
        }
        Ok(bytes)
    }
}

/// Slot identity for the symbol a relocation references.
pub fn got_key(object: usize, obj: &ObjectFile, sym_idx: u32) -> GotKey {
    let sym = obj.symbol(sym_idx);
    if sym.is_local() {
        GotKey::Local { object, sym: sym_idx }
    } else {
        GotKey::Global(sym.name.clone())
    }
}
