//! Output image layout.
//!
//! Input sections are gathered by kind into a fixed output order: `.text`,
//! `.rodata`, `.data`, `.got`, `.bss`. Within each output section the
//! contributions of every object are concatenated in link order, aligned to
//! each chunk's requirement. A permission change starts a new page-aligned
//! `PT_LOAD` segment. Every virtual address is `BASE_ADDR` plus its file
//! offset, so offsets and addresses stay congruent modulo the page size and
//! the loader can map the file directly.

use std::collections::HashMap;

use tracing::debug;

use crate::elf::constants::*;
use crate::elf::io::align_up;
use crate::elf::{InputSymbol, ObjectFile, SectionKind};
use crate::symtab::{Definition, GlobalSymbol};

/// Load address of the first byte of the image (the ELF header).
pub const BASE_ADDR: u64 = 0x400000;
pub const PAGE_SIZE: u64 = 0x1000;

/// One output section in image order.
#[derive(Debug)]
pub struct OutputSection {
    pub name: &'static str,
    pub sh_type: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub align: u64,
}

/// Placement of one input section inside the image.
#[derive(Debug)]
pub struct Chunk {
    pub object: usize,
    pub section: usize,
    pub addr: u64,
    /// Where the section's bytes land in the file. Zero-fill chunks carry no
    /// bytes; the field is zero for them.
    pub file_offset: u64,
    pub size: u64,
}

/// One `PT_LOAD` segment of the output image.
#[derive(Debug)]
pub struct Segment {
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
}

/// Fully computed image layout: addresses for every input section, merged
/// COMMON symbol, and the GOT, plus the segment table that describes it all.
#[derive(Debug)]
pub struct Layout {
    pub sections: Vec<OutputSection>,
    pub chunks: Vec<Chunk>,
    pub segments: Vec<Segment>,
    /// Bytes of header plus section content; string/section tables follow.
    pub content_size: u64,
    /// ELF header plus program headers, mapped read-only at `BASE_ADDR`.
    pub header_size: u64,
    pub got_addr: u64,
    pub got_offset: u64,
    section_va: HashMap<(usize, usize), u64>,
    common_va: HashMap<String, u64>,
}

impl Layout {
    /// Virtual address of an input section, if it was placed.
    pub fn section_address(&self, object: usize, section: usize) -> Option<u64> {
        self.section_va.get(&(object, section)).copied()
    }

    /// Final virtual address of a resolved global.
    pub fn symbol_address(&self, symbol: &GlobalSymbol) -> Option<u64> {
        match symbol.def {
            Definition::Section { object, section, value } => {
                self.section_address(object, section).map(|base| base + value)
            }
            Definition::Absolute { value } => Some(value),
            Definition::Common { .. } => self.common_va.get(&symbol.name).copied(),
        }
    }

    /// Address of a symbol as seen from its own object, for locals and
    /// section symbols that never enter the global table.
    pub fn input_symbol_address(&self, object: usize, sym: &InputSymbol) -> Option<u64> {
        if sym.is_absolute() {
            Some(sym.value)
        } else {
            self.section_address(object, sym.shndx as usize).map(|base| base + sym.value)
        }
    }
}

/// Lay out `objects` in link order. `commons` are the merged tentative
/// definitions bound for `.bss` and `got_size` is the byte size of the GOT,
/// both already final.
pub fn compute(objects: &[ObjectFile], commons: &[(&str, u64, u64)], got_size: u64) -> Layout {
    // The program header count decides where content starts, so the groups
    // that will exist have to be known up front.
    let kind_size = |kind: SectionKind| -> u64 {
        objects
            .iter()
            .flat_map(|o| o.sections.iter())
            .filter(|s| s.kind == kind)
            .map(|s| s.size)
            .sum()
    };
    let text_size = kind_size(SectionKind::Code);
    let rodata_size = kind_size(SectionKind::ReadOnlyData);
    let data_size = kind_size(SectionKind::Data);
    let bss_size =
        kind_size(SectionKind::ZeroFill) + commons.iter().map(|&(_, size, _)| size).sum::<u64>();

    let mut phdr_count = 1; // headers
    if text_size > 0 {
        phdr_count += 1;
    }
    if rodata_size > 0 {
        phdr_count += 1;
    }
    if data_size + got_size + bss_size > 0 {
        phdr_count += 1;
    }
    let header_size = (ELF64_EHDR_SIZE + phdr_count * ELF64_PHDR_SIZE) as u64;

    let mut layout = Layout {
        sections: Vec::new(),
        chunks: Vec::new(),
        segments: Vec::new(),
        content_size: header_size,
        header_size,
        got_addr: 0,
        got_offset: 0,
        section_va: HashMap::new(),
        common_va: HashMap::new(),
    };
    layout.segments.push(Segment {
        flags: PF_R,
        offset: 0,
        vaddr: BASE_ADDR,
        filesz: header_size,
        memsz: header_size,
    });

    let mut addr = BASE_ADDR + header_size;

    // Code, read-execute.
    addr = align_up(addr, PAGE_SIZE);
    let seg_start = addr;
    addr = place_kind(
        objects,
        SectionKind::Code,
        ".text",
        SHT_PROGBITS,
        SHF_ALLOC | SHF_EXECINSTR,
        addr,
        &mut layout,
    );
    if addr > seg_start {
        layout.segments.push(Segment {
            flags: PF_R | PF_X,
            offset: seg_start - BASE_ADDR,
            vaddr: seg_start,
            filesz: addr - seg_start,
            memsz: addr - seg_start,
        });
        layout.content_size = addr - BASE_ADDR;
    }

    // Read-only data.
    addr = align_up(addr, PAGE_SIZE);
    let seg_start = addr;
    addr = place_kind(
        objects,
        SectionKind::ReadOnlyData,
        ".rodata",
        SHT_PROGBITS,
        SHF_ALLOC,
        addr,
        &mut layout,
    );
    if addr > seg_start {
        layout.segments.push(Segment {
            flags: PF_R,
            offset: seg_start - BASE_ADDR,
            vaddr: seg_start,
            filesz: addr - seg_start,
            memsz: addr - seg_start,
        });
        layout.content_size = addr - BASE_ADDR;
    }

    // Writable data, then the GOT, then the zero-fill tail. The tail takes
    // address space but no file bytes, so the segment's filesz stops at the
    // end of the GOT while memsz runs to the end of `.bss`.
    addr = align_up(addr, PAGE_SIZE);
    let seg_start = addr;
    addr = place_kind(
        objects,
        SectionKind::Data,
        ".data",
        SHT_PROGBITS,
        SHF_ALLOC | SHF_WRITE,
        addr,
        &mut layout,
    );
    if got_size > 0 {
        addr = align_up(addr, 8);
        layout.got_addr = addr;
        layout.got_offset = addr - BASE_ADDR;
        layout.sections.push(OutputSection {
            name: ".got",
            sh_type: SHT_PROGBITS,
            flags: SHF_ALLOC | SHF_WRITE,
            addr,
            offset: addr - BASE_ADDR,
            size: got_size,
            align: 8,
        });
        addr += got_size;
    }
    let file_end = addr;

    let mut bss_start: Option<u64> = None;
    let mut bss_align = 1u64;
    for (oi, obj) in objects.iter().enumerate() {
        for (si, sec) in obj.sections.iter().enumerate() {
            if sec.kind != SectionKind::ZeroFill {
                continue;
            }
            let align = sec.align.max(1);
            addr = align_up(addr, align);
            bss_align = bss_align.max(align);
            bss_start.get_or_insert(addr);
            layout.section_va.insert((oi, si), addr);
            layout.chunks.push(Chunk { object: oi, section: si, addr, file_offset: 0, size: sec.size });
            addr += sec.size;
        }
    }
    for &(name, size, align) in commons {
        addr = align_up(addr, align.max(1));
        bss_align = bss_align.max(align.max(1));
        bss_start.get_or_insert(addr);
        layout.common_va.insert(name.to_string(), addr);
        addr += size;
    }
    if let Some(start) = bss_start {
        if addr > start {
            layout.sections.push(OutputSection {
                name: ".bss",
                sh_type: SHT_NOBITS,
                flags: SHF_ALLOC | SHF_WRITE,
                addr: start,
                offset: file_end - BASE_ADDR,
                size: addr - start,
                align: bss_align,
            });
        }
    }
    if addr > seg_start {
        layout.segments.push(Segment {
            flags: PF_R | PF_W,
            offset: seg_start - BASE_ADDR,
            vaddr: seg_start,
            filesz: file_end - seg_start,
            memsz: addr - seg_start,
        });
        layout.content_size = layout.content_size.max(file_end - BASE_ADDR);
    }

    for sec in &layout.sections {
        debug!(
            section = sec.name,
            addr = format_args!("{:#x}", sec.addr),
            size = sec.size,
            "placed output section"
        );
    }
    layout
}

/// Place every input section of `kind` in link order, appending the output
/// section if anything ended up in it. Returns the advanced address cursor.
fn place_kind(
    objects: &[ObjectFile],
    kind: SectionKind,
    name: &'static str,
    sh_type: u32,
    flags: u64,
    mut addr: u64,
    layout: &mut Layout,
) -> u64 {
    let mut start: Option<u64> = None;
    let mut max_align = 1u64;
    for (oi, obj) in objects.iter().enumerate() {
        for (si, sec) in obj.sections.iter().enumerate() {
            if sec.kind != kind {
                continue;
            }
            let align = sec.align.max(1);
            addr = align_up(addr, align);
            max_align = max_align.max(align);
            start.get_or_insert(addr);
            layout.section_va.insert((oi, si), addr);
            layout.chunks.push(Chunk {
                object: oi,
                section: si,
                addr,
                file_offset: addr - BASE_ADDR,
                size: sec.size,
            });
            addr += sec.size;
        }
    }
    if let Some(start) = start {
        if addr > start {
            layout.sections.push(OutputSection {
                name,
                sh_type,
                flags,
                addr: start,
                offset: start - BASE_ADDR,
                size: addr - start,
                align: max_align,
            });
        }
    }
    addr
}
