//! Global symbol resolution across input objects.
//!
//! Objects are merged in link order. Strong definitions conflict, weak
//! definitions yield to strong ones, tentative (COMMON) definitions merge by
//! taking the largest size and alignment. Local symbols never enter the table;
//! they resolve inside their defining object only.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::archive::Archive;
use crate::elf::ObjectFile;
use crate::error::{LinkError, Result};

/// Where a global symbol's value comes from.
#[derive(Debug, Clone)]
pub enum Definition {
    /// `value` bytes into `section` of the object at `object` in link order.
    Section { object: usize, section: usize, value: u64 },
    /// `SHN_ABS`: the value is final and survives relocation untouched.
    Absolute { value: u64 },
    /// `SHN_COMMON`: merged tentative definition, placed in `.bss` at layout.
    Common { size: u64, align: u64 },
}

/// One resolved global, with the source that defined it for diagnostics.
#[derive(Debug, Clone)]
pub struct GlobalSymbol {
    pub name: String,
    pub def: Definition,
    pub weak: bool,
    pub source: String,
}

impl GlobalSymbol {
    /// Resolution precedence: strong beats tentative beats weak.
    fn rank(&self) -> u8 {
        if self.weak {
            1
        } else if matches!(self.def, Definition::Common { .. }) {
            2
        } else {
            3
        }
    }
}

/// The global symbol table for one link invocation.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, GlobalSymbol>,
    /// Names referenced by a non-weak undefined symbol and not (yet) defined.
    /// Ordered so archive probing and the final error are deterministic.
    undefined: BTreeSet<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&GlobalSymbol> {
        self.symbols.get(name)
    }

    pub fn undefined_names(&self) -> &BTreeSet<String> {
        &self.undefined
    }

    /// All symbols still tentative after resolution, sorted by name so `.bss`
    /// placement is reproducible.
    pub fn commons(&self) -> Vec<(&str, u64, u64)> {
        let mut out: Vec<(&str, u64, u64)> = self
            .symbols
            .values()
            .filter_map(|g| match g.def {
                Definition::Common { size, align } => Some((g.name.as_str(), size, align)),
                _ => None,
            })
            .collect();
        out.sort_by_key(|&(name, _, _)| name);
        out
    }

    /// Merge one object's external symbols. `object_idx` is the object's
    /// position in link order and is recorded in section definitions.
    pub fn merge_object(&mut self, object_idx: usize, obj: &ObjectFile) -> Result<()> {
        for sym in &obj.symbols {
            if sym.is_local() || sym.name.is_empty() {
                continue;
            }
            if sym.is_undefined() {
                // A weak reference never forces resolution; it reads as zero
                // if nothing defines it.
                if !sym.is_weak() && !self.symbols.contains_key(&sym.name) {
                    self.undefined.insert(sym.name.clone());
                }
                continue;
            }
            let def = if sym.is_common() {
                // For COMMON symbols st_value carries the required alignment.
                Definition::Common { size: sym.size, align: sym.value.max(1) }
            } else if sym.is_absolute() {
                Definition::Absolute { value: sym.value }
            } else {
                Definition::Section {
                    object: object_idx,
                    section: sym.shndx as usize,
                    value: sym.value,
                }
            };
            self.define(GlobalSymbol {
                name: sym.name.clone(),
                def,
                weak: sym.is_weak(),
                source: obj.source_name.clone(),
            })?;
        }
        Ok(())
    }

    fn define(&mut self, incoming: GlobalSymbol) -> Result<()> {
        use std::collections::hash_map::Entry;
        match self.symbols.entry(incoming.name.clone()) {
            Entry::Vacant(slot) => {
                self.undefined.remove(&incoming.name);
                slot.insert(incoming);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                match (incoming.rank(), existing.rank()) {
                    (3, 3) => {
                        return Err(LinkError::DuplicateSymbol {
                            name: incoming.name,
                            first: existing.source.clone(),
                            second: incoming.source,
                        });
                    }
                    (2, 2) => {
                        // Tentative definitions coalesce; the first source
                        // name stands in diagnostics.
                        if let (
                            Definition::Common { size, align },
                            Definition::Common { size: new_size, align: new_align },
                        ) = (&mut existing.def, &incoming.def)
                        {
                            *size = (*size).max(*new_size);
                            *align = (*align).max(*new_align);
                        }
                    }
                    (new, old) if new > old => {
                        debug!(
                            symbol = %incoming.name,
                            superseded = %existing.source,
                            winner = %incoming.source,
                            "stronger definition replaces earlier one"
                        );
                        *existing = incoming;
                    }
                    // Weaker or equally weak incoming: first definition stands.
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Pull archive members until no archive satisfies any undefined name.
    ///
    /// Runs as a work-list over the currently-undefined set: each round picks
    /// one name some archive defines, merges the defining member (appending it
    /// to `objects`), and goes again, since the member may introduce fresh
    /// undefined references. Every round permanently resolves at least one
    /// name, so the loop reaches a fixed point.
    pub fn resolve_archives(
        &mut self,
        archives: &[Archive],
        objects: &mut Vec<ObjectFile>,
    ) -> Result<()> {
        loop {
            let next = self.undefined.iter().find_map(|name| {
                archives
                    .iter()
                    .position(|ar| ar.defines(name))
                    .map(|ar_idx| (ar_idx, name.clone()))
            });
            let Some((ar_idx, name)) = next else {
                return Ok(());
            };
            let (_, obj) = archives[ar_idx].extract(&name)?;
            debug!(symbol = %name, member = %obj.source_name, "pulling archive member");
            let object_idx = objects.len();
            objects.push(obj);
            self.merge_object(object_idx, &objects[object_idx])?;
        }
    }

    /// Error out with every name still undefined, or succeed.
    pub fn require_resolved(&self) -> Result<()> {
        if self.undefined.is_empty() {
            return Ok(());
        }
        Err(LinkError::UnresolvedSymbols {
            names: self.undefined.iter().cloned().collect(),
        })
    }
}
