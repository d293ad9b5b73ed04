//! ELF relocatable object (.o) parsing.
//!
//! Reads one ELF64 x86-64 relocatable file into an `ObjectFile`: sections,
//! symbols, and relocations grouped by the section they apply to. Parsing is
//! self-contained; it never consults other objects. Anything structurally
//! wrong is a `MalformedObject` error naming the offending structure.

use crate::error::{LinkError, Result};

use super::constants::*;
use super::io::{read_cstr, read_i64, read_u16, read_u32, read_u64};

/// Layout classification of an input section, derived from its header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Executable code (`.text` and friends).
    Code,
    /// Non-writable allocated data (`.rodata`, allocated notes, `.eh_frame`).
    ReadOnlyData,
    /// Writable initialized data (`.data`).
    Data,
    /// Writable zero-initialized data (`SHT_NOBITS`: `.bss`).
    ZeroFill,
    /// Not part of the loaded image (`.comment`, `.symtab`, debug info).
    Other,
}

impl SectionKind {
    /// Classify a section from its header type and flags. Name suffixes like
    /// `.text.foo` need no special casing; the flags already say everything.
    pub fn classify(sh_type: u32, sh_flags: u64) -> SectionKind {
        if sh_flags & SHF_ALLOC == 0 {
            SectionKind::Other
        } else if sh_type == SHT_NOBITS {
            SectionKind::ZeroFill
        } else if sh_flags & SHF_EXECINSTR != 0 {
            SectionKind::Code
        } else if sh_flags & SHF_WRITE != 0 {
            SectionKind::Data
        } else {
            SectionKind::ReadOnlyData
        }
    }

    /// Whether sections of this kind occupy virtual address space.
    pub fn is_alloc(self) -> bool {
        self != SectionKind::Other
    }
}

/// Relocation kinds understood by the applier. A closed set: anything else in
/// an allocatable section is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// R_X86_64_64: `S + A`, 64-bit field.
    Abs64,
    /// R_X86_64_32: `S + A`, zero-extended 32-bit field.
    Abs32,
    /// R_X86_64_32S: `S + A`, sign-extended 32-bit field.
    Abs32Signed,
    /// R_X86_64_PC32: `S + A - P`.
    Pc32,
    /// R_X86_64_PLT32: same as `Pc32` once everything is statically resolved.
    Plt32,
    /// R_X86_64_GOTPCREL / GOTPCRELX / REX_GOTPCRELX: `G + A - P`, where `G`
    /// is the symbol's `.got` slot address.
    GotPc32,
    /// R_X86_64_NONE: no fixup.
    None,
}

impl RelocKind {
    pub fn from_r_type(r_type: u32) -> Option<RelocKind> {
        match r_type {
            R_X86_64_NONE => Some(RelocKind::None),
            R_X86_64_64 => Some(RelocKind::Abs64),
            R_X86_64_32 => Some(RelocKind::Abs32),
            R_X86_64_32S => Some(RelocKind::Abs32Signed),
            R_X86_64_PC32 => Some(RelocKind::Pc32),
            R_X86_64_PLT32 => Some(RelocKind::Plt32),
            R_X86_64_GOTPCREL | R_X86_64_GOTPCRELX | R_X86_64_REX_GOTPCRELX => {
                Some(RelocKind::GotPc32)
            }
            _ => None,
        }
    }

    /// Canonical psABI name, for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            RelocKind::Abs64 => "R_X86_64_64",
            RelocKind::Abs32 => "R_X86_64_32",
            RelocKind::Abs32Signed => "R_X86_64_32S",
            RelocKind::Pc32 => "R_X86_64_PC32",
            RelocKind::Plt32 => "R_X86_64_PLT32",
            RelocKind::GotPc32 => "R_X86_64_GOTPCREL",
            RelocKind::None => "R_X86_64_NONE",
        }
    }

    /// Width in bytes of the patched field.
    pub fn width(self) -> u64 {
        match self {
            RelocKind::Abs64 => 8,
            RelocKind::None => 0,
            _ => 4,
        }
    }

    /// Whether this kind addresses the symbol through a `.got` slot.
    pub fn needs_got(self) -> bool {
        self == RelocKind::GotPc32
    }
}

/// Parsed input section header.
#[derive(Debug, Clone)]
pub struct InputSection {
    pub name: String,
    pub kind: SectionKind,
    pub sh_type: u32,
    pub flags: u64,
    /// Declared size. For zero-fill sections this exceeds the (empty) content.
    pub size: u64,
    pub align: u64,
}

/// Parsed input symbol.
#[derive(Debug, Clone)]
pub struct InputSymbol {
    pub name: String,
    pub info: u8,
    pub shndx: u16,
    pub value: u64,
    pub size: u64,
}

impl InputSymbol {
    pub fn binding(&self) -> u8 {
        self.info >> 4
    }

    pub fn sym_type(&self) -> u8 {
        self.info & 0xf
    }

    pub fn is_undefined(&self) -> bool {
        self.shndx == SHN_UNDEF
    }

    pub fn is_local(&self) -> bool {
        self.binding() == STB_LOCAL
    }

    pub fn is_weak(&self) -> bool {
        self.binding() == STB_WEAK
    }

    pub fn is_common(&self) -> bool {
        self.shndx == SHN_COMMON
    }

    pub fn is_absolute(&self) -> bool {
        self.shndx == SHN_ABS
    }

    /// True for global and weak symbols that define something (not undefined,
    /// including COMMON and absolute definitions).
    pub fn is_external_definition(&self) -> bool {
        !self.is_local() && !self.is_undefined()
    }
}

/// Parsed relocation with explicit addend.
#[derive(Debug, Clone)]
pub struct Rela {
    /// Offset of the patched field within the target section.
    pub offset: u64,
    /// Index into the object's symbol table.
    pub sym_idx: u32,
    pub kind: RelocKind,
    pub addend: i64,
}

/// One parsed relocatable object, immutable once read.
#[derive(Debug)]
pub struct ObjectFile {
    /// Path, or `archive.a(member.o)` for archive members.
    pub source_name: String,
    pub sections: Vec<InputSection>,
    /// Raw content per section; empty for zero-fill sections.
    pub section_data: Vec<Vec<u8>>,
    pub symbols: Vec<InputSymbol>,
    /// Relocations indexed by the section they apply to. Only populated for
    /// allocatable target sections; debug-info relocations are dropped.
    pub relocations: Vec<Vec<Rela>>,
}

impl ObjectFile {
    pub fn symbol(&self, idx: u32) -> &InputSymbol {
        &self.symbols[idx as usize]
    }
}

fn malformed(source_name: &str, detail: String) -> LinkError {
    LinkError::MalformedObject { source_name: source_name.to_string(), detail }
}

/// Parse an ELF64 x86-64 relocatable object file.
pub fn parse_object(data: &[u8], source_name: &str) -> Result<ObjectFile> {
    if data.len() < ELF64_EHDR_SIZE {
        return Err(malformed(source_name, "file too small for ELF header".into()));
    }
    if data[0..4] != ELF_MAGIC {
        return Err(malformed(source_name, "not an ELF file".into()));
    }
    if data[4] != ELFCLASS64 {
        return Err(malformed(source_name, "not 64-bit ELF".into()));
    }
    if data[5] != ELFDATA2LSB {
        return Err(malformed(source_name, "not little-endian ELF".into()));
    }

    let e_type = read_u16(data, 16);
    if e_type != ET_REL {
        return Err(malformed(
            source_name,
            format!("not a relocatable object (type={})", e_type),
        ));
    }
    let e_machine = read_u16(data, 18);
    if e_machine != EM_X86_64 {
        return Err(malformed(
            source_name,
            format!("not x86-64 (machine={})", e_machine),
        ));
    }

    let e_shoff = read_u64(data, 40) as usize;
    let e_shentsize = read_u16(data, 58) as usize;
    let e_shnum = read_u16(data, 60) as usize;
    let e_shstrndx = read_u16(data, 62) as usize;

    if e_shoff == 0 || e_shnum == 0 {
        return Err(malformed(source_name, "no section headers".into()));
    }
    if e_shentsize != ELF64_SHDR_SIZE {
        return Err(malformed(
            source_name,
            format!("unexpected section header entry size {}", e_shentsize),
        ));
    }

    // Section headers. sh_addr is always zero in relocatables and not kept.
    struct RawShdr {
        name_idx: u32,
        sh_type: u32,
        flags: u64,
        offset: u64,
        size: u64,
        link: u32,
        info: u32,
        addralign: u64,
    }
    let mut raw = Vec::with_capacity(e_shnum);
    for i in 0..e_shnum {
        let off = e_shoff + i * e_shentsize;
        if off + e_shentsize > data.len() {
            return Err(malformed(source_name, format!("section header {} out of bounds", i)));
        }
        raw.push(RawShdr {
            name_idx: read_u32(data, off),
            sh_type: read_u32(data, off + 4),
            flags: read_u64(data, off + 8),
            offset: read_u64(data, off + 24),
            size: read_u64(data, off + 32),
            link: read_u32(data, off + 40),
            info: read_u32(data, off + 44),
            addralign: read_u64(data, off + 48),
        });
    }

    // Section names from the header string table.
    if e_shstrndx >= raw.len() {
        return Err(malformed(
            source_name,
            format!("section name table index {} out of range", e_shstrndx),
        ));
    }
    let shstr = &raw[e_shstrndx];
    let shstr_end = shstr.offset as usize + shstr.size as usize;
    if shstr_end > data.len() {
        return Err(malformed(source_name, "section name table out of bounds".into()));
    }
    let shstrtab = &data[shstr.offset as usize..shstr_end];

    let mut sections = Vec::with_capacity(e_shnum);
    let mut section_data = Vec::with_capacity(e_shnum);
    for shdr in &raw {
        let name = read_cstr(shstrtab, shdr.name_idx as usize);
        // Zero-fill sections declare a size but carry no file content.
        if shdr.sh_type == SHT_NOBITS || shdr.size == 0 {
            section_data.push(Vec::new());
        } else {
            let start = shdr.offset as usize;
            let end = start + shdr.size as usize;
            if end > data.len() {
                return Err(malformed(
                    source_name,
                    format!("section '{}' data out of bounds", name),
                ));
            }
            section_data.push(data[start..end].to_vec());
        }
        sections.push(InputSection {
            name,
            kind: SectionKind::classify(shdr.sh_type, shdr.flags),
            sh_type: shdr.sh_type,
            flags: shdr.flags,
            size: shdr.size,
            align: shdr.addralign,
        });
    }

    // Symbol table and its string table.
    let mut symbols = Vec::new();
    for (i, shdr) in raw.iter().enumerate() {
        if shdr.sh_type != SHT_SYMTAB {
            continue;
        }
        let strtab_idx = shdr.link as usize;
        if strtab_idx >= section_data.len() {
            return Err(malformed(
                source_name,
                format!("symbol string table index {} out of range", strtab_idx),
            ));
        }
        let strtab = &section_data[strtab_idx];
        let sym_data = &section_data[i];
        let count = sym_data.len() / ELF64_SYM_SIZE;
        for j in 0..count {
            let off = j * ELF64_SYM_SIZE;
            let name_idx = read_u32(sym_data, off);
            let sym = InputSymbol {
                name: read_cstr(strtab, name_idx as usize),
                info: sym_data[off + 4],
                shndx: read_u16(sym_data, off + 6),
                value: read_u64(sym_data, off + 8),
                size: read_u64(sym_data, off + 16),
            };
            if sym.shndx as usize >= raw.len()
                && !sym.is_undefined()
                && !sym.is_common()
                && !sym.is_absolute()
            {
                return Err(malformed(
                    source_name,
                    format!("symbol '{}' section index {} out of range", sym.name, sym.shndx),
                ));
            }
            symbols.push(sym);
        }
        break;
    }

    // Relocations, grouped by target section. Targets outside the loadable
    // image (debug info, .comment) are skipped wholesale so objects built
    // with -g still link; unknown types in allocatable sections are errors.
    let mut relocations = vec![Vec::new(); e_shnum];
    for (i, shdr) in raw.iter().enumerate() {
        let target = shdr.info as usize;
        if shdr.sh_type == SHT_REL {
            if target < sections.len() && sections[target].kind.is_alloc() {
                return Err(malformed(
                    source_name,
                    format!(
                        "section '{}' uses REL relocations (only RELA is supported)",
                        sections[i].name
                    ),
                ));
            }
            continue;
        }
        if shdr.sh_type != SHT_RELA {
            continue;
        }
        if target >= sections.len() {
            return Err(malformed(
                source_name,
                format!("relocation section '{}' targets section {} out of range", sections[i].name, target),
            ));
        }
        if !sections[target].kind.is_alloc() {
            continue;
        }

        let rela_data = &section_data[i];
        let count = rela_data.len() / ELF64_RELA_SIZE;
        let mut relas = Vec::with_capacity(count);
        for j in 0..count {
            let off = j * ELF64_RELA_SIZE;
            let r_offset = read_u64(rela_data, off);
            let r_info = read_u64(rela_data, off + 8);
            let sym_idx = (r_info >> 32) as u32;
            let r_type = (r_info & 0xffff_ffff) as u32;
            let kind = RelocKind::from_r_type(r_type).ok_or_else(|| {
                malformed(
                    source_name,
                    format!(
                        "unsupported relocation type {} in section '{}'",
                        r_type, sections[target].name
                    ),
                )
            })?;
            if sym_idx as usize >= symbols.len() {
                return Err(malformed(
                    source_name,
                    format!(
                        "relocation symbol index {} out of range in section '{}'",
                        sym_idx, sections[target].name
                    ),
                ));
            }
            let in_bounds = r_offset
                .checked_add(kind.width())
                .is_some_and(|end| end <= sections[target].size);
            if !in_bounds {
                return Err(malformed(
                    source_name,
                    format!(
                        "relocation offset {:#x} out of bounds in section '{}'",
                        r_offset, sections[target].name
                    ),
                ));
            }
            relas.push(Rela {
                offset: r_offset,
                sym_idx,
                kind,
                addend: read_i64(rela_data, off + 16),
            });
        }
        relocations[target] = relas;
    }

    Ok(ObjectFile {
        source_name: source_name.to_string(),
        sections,
        section_data,
        symbols,
        relocations,
    })
}
