//! Relocation application.
//!
//! Runs after symbol resolution and layout, when every referenced address is
//! final. Values are computed modulo 2^64 the way the psABI specifies, then
//! width-checked before patching: a value that does not fit its field is a
//! hard error, never silently truncated.

use tracing::trace;

use crate::elf::{InputSymbol, ObjectFile, RelocKind, SectionKind};
use crate::error::{LinkError, Result};
use crate::got::{got_key, GotTable};
use crate::layout::Layout;
use crate::symtab::SymbolTable;

/// Patch every relocation in `image`, which already holds the laid-out
/// section content.
pub fn apply(
    image: &mut [u8],
    objects: &[ObjectFile],
    table: &SymbolTable,
    layout: &Layout,
    got: &GotTable,
) -> Result<()> {
    for chunk in &layout.chunks {
        let obj = &objects[chunk.object];
        if obj.sections[chunk.section].kind == SectionKind::ZeroFill {
            continue;
        }
        for rela in &obj.relocations[chunk.section] {
            let sym = obj.symbol(rela.sym_idx);
            let target = resolve(obj, chunk.object, sym, table, layout)?;

            // P: address of the field being patched.
            let place = chunk.addr + rela.offset;
            let absolute = target.wrapping_add(rela.addend as u64);
            let field = &mut image[(chunk.file_offset + rela.offset) as usize..];

            match rela.kind {
                RelocKind::None => {}
                RelocKind::Abs64 => {
                    field[..8].copy_from_slice(&absolute.to_le_bytes());
                }
                RelocKind::Abs32 => {
                    if absolute > u32::MAX as u64 {
                        return Err(overflow(obj, sym, rela.kind, place, absolute as i64));
                    }
                    field[..4].copy_from_slice(&(absolute as u32).to_le_bytes());
                }
                RelocKind::Abs32Signed => {
                    let value = absolute as i64;
                    if i32::try_from(value).is_err() {
                        return Err(overflow(obj, sym, rela.kind, place, value));
                    }
                    field[..4].copy_from_slice(&(value as i32).to_le_bytes());
                }
                RelocKind::Pc32 | RelocKind::Plt32 => {
                    let value = absolute.wrapping_sub(place) as i64;
                    if i32::try_from(value).is_err() {
                        return Err(overflow(obj, sym, rela.kind, place, value));
                    }
                    field[..4].copy_from_slice(&(value as i32).to_le_bytes());
                }
                RelocKind::GotPc32 => {
                    let key = got_key(chunk.object, obj, rela.sym_idx);
                    let slot = got.slot_address(layout.got_addr, &key).ok_or_else(|| {
                        LinkError::MalformedObject {
                            source_name: obj.source_name.clone(),
                            detail: format!("no GOT slot for symbol '{}'", sym.name),
                        }
                    })?;
                    let value = slot.wrapping_add(rela.addend as u64).wrapping_sub(place) as i64;
                    if i32::try_from(value).is_err() {
                        return Err(overflow(obj, sym, rela.kind, place, value));
                    }
                    field[..4].copy_from_slice(&(value as i32).to_le_bytes());
                }
            }
            trace!(
                kind = rela.kind.name(),
                place = format_args!("{:#x}", place),
                symbol = %sym.name,
                "applied relocation"
            );
        }
    }
    Ok(())
}

/// S: the referenced symbol's virtual address. Locals and section symbols
/// resolve inside their own object; globals go through the symbol table, with
/// undefined weak references reading as zero.
fn resolve(
    obj: &ObjectFile,
    object_idx: usize,
    sym: &InputSymbol,
    table: &SymbolTable,
    layout: &Layout,
) -> Result<u64> {
    let unplaced = || LinkError::MalformedObject {
        source_name: obj.source_name.clone(),
        detail: format!(
            "relocation against '{}', which is outside the loadable image",
            symbol_label(obj, sym)
        ),
    };
    if sym.is_local() {
        return layout.input_symbol_address(object_idx, sym).ok_or_else(unplaced);
    }
    match table.get(&sym.name) {
        Some(global) => layout.symbol_address(global).ok_or_else(unplaced),
        None if sym.is_weak() => Ok(0),
        None => Err(LinkError::UnresolvedSymbols { names: vec![sym.name.clone()] }),
    }
}

/// Section symbols have empty names; label them by their section instead.
fn symbol_label(obj: &ObjectFile, sym: &InputSymbol) -> String {
    if !sym.name.is_empty() {
        return sym.name.clone();
    }
    obj.sections
        .get(sym.shndx as usize)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| "<unnamed>".to_string())
}

fn overflow(
    obj: &ObjectFile,
    sym: &InputSymbol,
    kind: RelocKind,
    place: u64,
    value: i64,
) -> LinkError {
    LinkError::RelocationOverflow {
        source_name: obj.source_name.clone(),
        symbol: symbol_label(obj, sym),
        kind: kind.name(),
        address: place,
        value,
    }
}
