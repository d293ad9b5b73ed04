//! Test-only builder for synthetic relocatable objects and archives.
//!
//! Serializes a minimal but well-formed ELF64 x86-64 `.o`: NULL section,
//! content sections in insertion order, `.rela.*` sections, `.symtab`,
//! `.strtab`, `.shstrtab`. The symbol table follows the ELF ordering rules
//! the reader relies on: NULL entry, section symbols, locals, then globals,
//! with `sh_info` pointing at the first global.

use super::constants::*;
use super::string_table::StringTable;

const UNDEF_SECTION: &str = "*UND*";
const COMMON_SECTION: &str = "*COM*";
const ABS_SECTION: &str = "*ABS*";

struct BuildSection {
    name: String,
    sh_type: u32,
    flags: u64,
    data: Vec<u8>,
    size: u64,
    align: u64,
    relas: Vec<BuildRela>,
}

struct BuildRela {
    offset: u64,
    symbol: String,
    r_type: u32,
    addend: i64,
}

struct BuildSymbol {
    name: String,
    info: u8,
    section: String,
    value: u64,
    size: u64,
}

/// Fluent builder for one synthetic object file.
pub struct TestObject {
    sections: Vec<BuildSection>,
    symbols: Vec<BuildSymbol>,
}

impl TestObject {
    pub fn new() -> Self {
        Self { sections: Vec::new(), symbols: Vec::new() }
    }

    /// Add an arbitrary section. `size` is taken from `data` unless the
    /// section is `SHT_NOBITS`.
    pub fn section(
        mut self,
        name: &str,
        sh_type: u32,
        flags: u64,
        data: &[u8],
        size: u64,
        align: u64,
    ) -> Self {
        let size = if sh_type == SHT_NOBITS { size } else { data.len() as u64 };
        self.sections.push(BuildSection {
            name: name.to_string(),
            sh_type,
            flags,
            data: data.to_vec(),
            size,
            align,
            relas: Vec::new(),
        });
        self
    }

    pub fn text(self, data: &[u8], align: u64) -> Self {
        self.section(".text", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, data, 0, align)
    }

    pub fn rodata(self, data: &[u8], align: u64) -> Self {
        self.section(".rodata", SHT_PROGBITS, SHF_ALLOC, data, 0, align)
    }

    pub fn data(self, data: &[u8], align: u64) -> Self {
        self.section(".data", SHT_PROGBITS, SHF_ALLOC | SHF_WRITE, data, 0, align)
    }

    pub fn bss(self, size: u64, align: u64) -> Self {
        self.section(".bss", SHT_NOBITS, SHF_ALLOC | SHF_WRITE, &[], size, align)
    }

    fn symbol(mut self, name: &str, binding: u8, sym_type: u8, section: &str, value: u64, size: u64) -> Self {
        self.symbols.push(BuildSymbol {
            name: name.to_string(),
            info: (binding << 4) | sym_type,
            section: section.to_string(),
            value,
            size,
        });
        self
    }

    pub fn global_func(self, name: &str, section: &str, value: u64) -> Self {
        self.symbol(name, STB_GLOBAL, STT_FUNC, section, value, 0)
    }

    pub fn global_object(self, name: &str, section: &str, value: u64, size: u64) -> Self {
        self.symbol(name, STB_GLOBAL, STT_OBJECT, section, value, size)
    }

    pub fn weak_func(self, name: &str, section: &str, value: u64) -> Self {
        self.symbol(name, STB_WEAK, STT_FUNC, section, value, 0)
    }

    pub fn local_object(self, name: &str, section: &str, value: u64, size: u64) -> Self {
        self.symbol(name, STB_LOCAL, STT_OBJECT, section, value, size)
    }

    pub fn undefined(self, name: &str) -> Self {
        self.symbol(name, STB_GLOBAL, STT_NOTYPE, UNDEF_SECTION, 0, 0)
    }

    pub fn weak_undefined(self, name: &str) -> Self {
        self.symbol(name, STB_WEAK, STT_NOTYPE, UNDEF_SECTION, 0, 0)
    }

    /// A COMMON (tentative) definition; `st_value` carries the alignment.
    pub fn common(self, name: &str, size: u64, align: u64) -> Self {
        self.symbol(name, STB_GLOBAL, STT_OBJECT, COMMON_SECTION, align, size)
    }

    pub fn absolute(self, name: &str, value: u64) -> Self {
        self.symbol(name, STB_GLOBAL, STT_NOTYPE, ABS_SECTION, value, 0)
    }

    /// Attach a relocation to a previously added section.
    pub fn rela(mut self, section: &str, offset: u64, symbol: &str, r_type: u32, addend: i64) -> Self {
        let sec = self
            .sections
            .iter_mut()
            .find(|s| s.name == section)
            .unwrap_or_else(|| panic!("no section {} to relocate", section));
        sec.relas.push(BuildRela {
            offset,
            symbol: symbol.to_string(),
            r_type,
            addend,
        });
        self
    }

    pub fn rela_text(self, offset: u64, symbol: &str, r_type: u32, addend: i64) -> Self {
        self.rela(".text", offset, symbol, r_type, addend)
    }

    /// Serialize to ELF bytes.
    pub fn build(&self) -> Vec<u8> {
        let n_content = self.sections.len();

        // Symbol table layout: NULL, one section symbol per content section,
        // locals, globals.
        let mut strtab = StringTable::new();
        struct SymEntry {
            st_name: u32,
            st_info: u8,
            st_shndx: u16,
            st_value: u64,
            st_size: u64,
        }
        let mut sym_entries = vec![SymEntry { st_name: 0, st_info: 0, st_shndx: 0, st_value: 0, st_size: 0 }];
        for i in 0..n_content {
            sym_entries.push(SymEntry {
                st_name: 0,
                st_info: (STB_LOCAL << 4) | STT_SECTION,
                st_shndx: (1 + i) as u16,
                st_value: 0,
                st_size: 0,
            });
        }

        let shndx_of = |section: &str| -> u16 {
            match section {
                UNDEF_SECTION => SHN_UNDEF,
                COMMON_SECTION => SHN_COMMON,
                ABS_SECTION => SHN_ABS,
                _ => self
                    .sections
                    .iter()
                    .position(|s| s.name == section)
                    .map(|i| (1 + i) as u16)
                    .unwrap_or_else(|| panic!("symbol references unknown section {}", section)),
            }
        };

        let (locals, globals): (Vec<_>, Vec<_>) =
            self.symbols.iter().partition(|s| s.info >> 4 == STB_LOCAL);
        let mut name_to_index = std::collections::HashMap::new();
        for sym in locals.iter().chain(globals.iter()) {
            name_to_index.insert(sym.name.clone(), sym_entries.len() as u32);
            sym_entries.push(SymEntry {
                st_name: strtab.add(&sym.name),
                st_info: sym.info,
                st_shndx: shndx_of(&sym.section),
                st_value: sym.value,
                st_size: sym.size,
            });
        }
        let first_global = 1 + n_content + locals.len();

        // Relocation symbol: a section name resolves to its section symbol.
        let sym_index_of = |name: &str| -> u32 {
            if let Some(i) = self.sections.iter().position(|s| s.name == name) {
                return (1 + i) as u32;
            }
            *name_to_index
                .get(name)
                .unwrap_or_else(|| panic!("relocation references unknown symbol {}", name))
        };

        // Section name table. Order: contents, relas, symtab, strtab, shstrtab.
        let mut shstrtab = StringTable::new();
        for sec in &self.sections {
            shstrtab.add(&sec.name);
        }
        let rela_secs: Vec<usize> = (0..n_content).filter(|&i| !self.sections[i].relas.is_empty()).collect();
        for &i in &rela_secs {
            shstrtab.add(&format!(".rela{}", self.sections[i].name));
        }
        shstrtab.add(".symtab");
        shstrtab.add(".strtab");
        shstrtab.add(".shstrtab");

        // File layout.
        let align8 = |v: usize| (v + 7) & !7;
        let mut offset = ELF64_EHDR_SIZE;
        let mut content_offsets = Vec::with_capacity(n_content);
        for sec in &self.sections {
            let a = sec.align.max(1) as usize;
            offset = (offset + a - 1) & !(a - 1);
            content_offsets.push(offset);
            if sec.sh_type != SHT_NOBITS {
                offset += sec.data.len();
            }
        }
        let mut rela_offsets = Vec::with_capacity(rela_secs.len());
        for &i in &rela_secs {
            offset = align8(offset);
            rela_offsets.push(offset);
            offset += self.sections[i].relas.len() * ELF64_RELA_SIZE;
        }
        offset = align8(offset);
        let symtab_offset = offset;
        offset += sym_entries.len() * ELF64_SYM_SIZE;
        let strtab_offset = offset;
        offset += strtab.len();
        let shstrtab_offset = offset;
        offset += shstrtab.len();
        let shdr_offset = align8(offset);

        let n_sections = 1 + n_content + rela_secs.len() + 3;
        let symtab_shndx = 1 + n_content + rela_secs.len();
        let shstrtab_shndx = n_sections - 1;

        // ELF header.
        let mut out = Vec::with_capacity(shdr_offset + n_sections * ELF64_SHDR_SIZE);
        out.extend_from_slice(&ELF_MAGIC);
        out.push(ELFCLASS64);
        out.push(ELFDATA2LSB);
        out.push(EV_CURRENT);
        out.push(ELFOSABI_SYSV);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&ET_REL.to_le_bytes());
        out.extend_from_slice(&EM_X86_64.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes()); // e_version
        out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        out.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
        out.extend_from_slice(&(shdr_offset as u64).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&(ELF64_EHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&(ELF64_SHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(n_sections as u16).to_le_bytes());
        out.extend_from_slice(&(shstrtab_shndx as u16).to_le_bytes());

        // Content data.
        for (i, sec) in self.sections.iter().enumerate() {
            out.resize(content_offsets[i], 0);
            if sec.sh_type != SHT_NOBITS {
                out.extend_from_slice(&sec.data);
            }
        }

        // Relocation entries.
        for (ri, &i) in rela_secs.iter().enumerate() {
            out.resize(rela_offsets[ri], 0);
            for r in &self.sections[i].relas {
                out.extend_from_slice(&r.offset.to_le_bytes());
                let r_info = ((sym_index_of(&r.symbol) as u64) << 32) | r.r_type as u64;
                out.extend_from_slice(&r_info.to_le_bytes());
                out.extend_from_slice(&r.addend.to_le_bytes());
            }
        }

        // Symbol table, string tables.
        out.resize(symtab_offset, 0);
        for sym in &sym_entries {
            out.extend_from_slice(&sym.st_name.to_le_bytes());
            out.push(sym.st_info);
            out.push(0); // st_other
            out.extend_from_slice(&sym.st_shndx.to_le_bytes());
            out.extend_from_slice(&sym.st_value.to_le_bytes());
            out.extend_from_slice(&sym.st_size.to_le_bytes());
        }
        out.extend_from_slice(strtab.as_bytes());
        out.extend_from_slice(shstrtab.as_bytes());

        // Section headers.
        out.resize(shdr_offset, 0);
        let mut shdrs = Vec::new();
        super::io::write_shdr64(&mut shdrs, 0, SHT_NULL, 0, 0, 0, 0, 0, 0, 0, 0);
        for (i, sec) in self.sections.iter().enumerate() {
            let sh_offset = if sec.sh_type == SHT_NOBITS { 0 } else { content_offsets[i] as u64 };
            super::io::write_shdr64(
                &mut shdrs,
                shstrtab.add(&sec.name),
                sec.sh_type,
                sec.flags,
                0,
                sh_offset,
                sec.size,
                0,
                0,
                sec.align,
                0,
            );
        }
        for (ri, &i) in rela_secs.iter().enumerate() {
            super::io::write_shdr64(
                &mut shdrs,
                shstrtab.add(&format!(".rela{}", self.sections[i].name)),
                SHT_RELA,
                0,
                0,
                rela_offsets[ri] as u64,
                (self.sections[i].relas.len() * ELF64_RELA_SIZE) as u64,
                symtab_shndx as u32,
                (1 + i) as u32,
                8,
                ELF64_RELA_SIZE as u64,
            );
        }
        super::io::write_shdr64(
            &mut shdrs,
            shstrtab.add(".symtab"),
            SHT_SYMTAB,
            0,
            0,
            symtab_offset as u64,
            (sym_entries.len() * ELF64_SYM_SIZE) as u64,
            (symtab_shndx + 1) as u32,
            first_global as u32,
            8,
            ELF64_SYM_SIZE as u64,
        );
        super::io::write_shdr64(
            &mut shdrs,
            shstrtab.add(".strtab"),
            SHT_STRTAB,
            0,
            0,
            strtab_offset as u64,
            strtab.len() as u64,
            0,
            0,
            1,
            0,
        );
        super::io::write_shdr64(
            &mut shdrs,
            shstrtab.add(".shstrtab"),
            SHT_STRTAB,
            0,
            0,
            shstrtab_offset as u64,
            shstrtab.len() as u64,
            0,
            0,
            1,
            0,
        );
        out.extend_from_slice(&shdrs);
        out
    }
}

/// Serialize a GNU-format archive from `(member_name, bytes)` pairs. Long
/// names go through a `//` extended-name table like `ar` produces.
pub fn build_archive(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"!<arch>\n");

    let needs_ext = members.iter().any(|(name, _)| name.len() + 1 > 16);
    let mut ext_names = Vec::new();
    let mut ext_offsets = Vec::new();
    if needs_ext {
        for (name, _) in members {
            if name.len() + 1 > 16 {
                ext_offsets.push(Some(ext_names.len()));
                ext_names.extend_from_slice(name.as_bytes());
                ext_names.extend_from_slice(b"/\n");
            } else {
                ext_offsets.push(None);
            }
        }
        write_ar_header(&mut out, "//", ext_names.len());
        out.extend_from_slice(&ext_names);
        if out.len() % 2 != 0 {
            out.push(b'\n');
        }
    } else {
        ext_offsets = vec![None; members.len()];
    }

    for (i, (name, data)) in members.iter().enumerate() {
        let header_name = match ext_offsets[i] {
            Some(off) => format!("/{}", off),
            None => format!("{}/", name),
        };
        write_ar_header(&mut out, &header_name, data.len());
        out.extend_from_slice(data);
        if out.len() % 2 != 0 {
            out.push(b'\n');
        }
    }
    out
}

fn write_ar_header(out: &mut Vec<u8>, name: &str, size: usize) {
    // name(16) date(12) uid(6) gid(6) mode(8) size(10) magic(2)
    let header = format!("{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n", name, 0, 0, 0, 644, size);
    assert_eq!(header.len(), 60);
    out.extend_from_slice(header.as_bytes());
}
