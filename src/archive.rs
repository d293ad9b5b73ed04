//! GNU static archive (`.a`) reading.
//!
//! An archive is scanned once when added: the member table is walked and each
//! ELF member's symbol table is read into an index of defined globals. Full
//! object parsing happens only when `extract` pulls a member into the link, so
//! members nothing references are never materialized.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::elf::constants::*;
use crate::elf::io::{read_cstr, read_u16, read_u32, read_u64};
use crate::elf::{parse_object, ObjectFile};
use crate::error::{LinkError, Result};

const ARCHIVE_MAGIC: &[u8] = b"!<arch>\n";

/// Whether `data` starts with the `!<arch>\n` magic.
pub fn is_archive(data: &[u8]) -> bool {
    data.starts_with(ARCHIVE_MAGIC)
}

#[derive(Debug)]
struct Member {
    name: String,
    /// Content span within the archive file.
    offset: usize,
    size: usize,
}

/// A static archive: member table plus an index of which member defines which
/// global symbol. First definition wins when two members define the same name,
/// matching in-archive order.
#[derive(Debug)]
pub struct Archive<'a> {
    name: String,
    data: &'a [u8],
    members: Vec<Member>,
    index: HashMap<String, usize>,
}

impl<'a> Archive<'a> {
    pub fn parse(data: &'a [u8], name: &str) -> Result<Archive<'a>> {
        let members = parse_member_table(data, name)?;
        let mut index = HashMap::new();
        for (i, member) in members.iter().enumerate() {
            let content = &data[member.offset..member.offset + member.size];
            if !content.starts_with(&ELF_MAGIC) {
                // Archives may carry non-object members (symbol tables are
                // already skipped; some toolchains add text members).
                debug!(archive = name, member = %member.name, "skipping non-ELF member");
                continue;
            }
            match scan_defined_globals(content) {
                Ok(symbols) => {
                    for symbol in symbols {
                        index.entry(symbol).or_insert(i);
                    }
                }
                Err(detail) => {
                    warn!(archive = name, member = %member.name, detail, "skipping member");
                }
            }
        }
        debug!(archive = name, members = members.len(), symbols = index.len(), "scanned archive");
        Ok(Archive { name: name.to_string(), data, members, index })
    }

    /// The archive path as given on the command line.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether some member defines `symbol`.
    pub fn defines(&self, symbol: &str) -> bool {
        self.index.contains_key(symbol)
    }

    /// Parse the member defining `symbol` into an `ObjectFile`, returning the
    /// member's index so callers can avoid merging the same member twice.
    pub fn extract(&self, symbol: &str) -> Result<(usize, ObjectFile)> {
        let &idx = self.index.get(symbol).ok_or_else(|| LinkError::SymbolNotInArchive {
            archive: self.name.clone(),
            symbol: symbol.to_string(),
        })?;
        let member = &self.members[idx];
        debug!(archive = %self.name, member = %member.name, symbol, "extracting member");
        let content = &self.data[member.offset..member.offset + member.size];
        let obj = parse_object(content, &format!("{}({})", self.name, member.name))?;
        Ok((idx, obj))
    }
}

/// Walk the archive member headers, resolving extended (`//`) names and
/// skipping the symbol-table pseudo-members (`/`, `/SYM64/`).
fn parse_member_table(data: &[u8], archive_name: &str) -> Result<Vec<Member>> {
    let malformed = |detail: String| LinkError::MalformedObject {
        source_name: archive_name.to_string(),
        detail,
    };
    if !is_archive(data) {
        return Err(malformed("not a static archive".to_string()));
    }

    let mut members = Vec::new();
    let mut pos = ARCHIVE_MAGIC.len();
    let mut extended_names: Option<&[u8]> = None;

    while pos + 60 <= data.len() {
        let name_raw = std::str::from_utf8(&data[pos..pos + 16]).unwrap_or("").trim_end();
        let size_str = std::str::from_utf8(&data[pos + 48..pos + 58]).unwrap_or("").trim();
        if &data[pos + 58..pos + 60] != b"`\n" {
            return Err(malformed(format!("bad member header at offset {}", pos)));
        }
        let size: usize = size_str
            .parse()
            .map_err(|_| malformed(format!("bad member size '{}' at offset {}", size_str, pos)))?;
        let data_start = pos + 60;
        if data_start + size > data.len() {
            return Err(malformed(format!(
                "member '{}' extends past end of archive",
                name_raw
            )));
        }

        if name_raw == "/" || name_raw == "/SYM64/" {
            // Archive symbol table; the index is rebuilt from member symtabs.
        } else if name_raw == "//" {
            extended_names = Some(&data[data_start..data_start + size]);
        } else {
            let name = if let Some(rest) = name_raw.strip_prefix('/') {
                let name_off: usize = rest.parse().map_err(|_| {
                    malformed(format!("bad extended name reference '{}'", name_raw))
                })?;
                let ext = extended_names
                    .ok_or_else(|| malformed("extended name used before '//' table".to_string()))?;
                if name_off >= ext.len() {
                    return Err(malformed(format!(
                        "extended name offset {} out of range",
                        name_off
                    )));
                }
                let end = ext[name_off..]
                    .iter()
                    .position(|&b| b == b'/' || b == b'\n' || b == 0)
                    .unwrap_or(ext.len() - name_off);
                String::from_utf8_lossy(&ext[name_off..name_off + end]).to_string()
            } else {
                name_raw.trim_end_matches('/').to_string()
            };
            members.push(Member { name, offset: data_start, size });
        }

        // Member data is padded to a 2-byte boundary.
        pos = data_start + size;
        if pos % 2 != 0 {
            pos += 1;
        }
    }

    Ok(members)
}

/// Read the external definitions out of one ELF member's symbol table without
/// building a full `ObjectFile`.
fn scan_defined_globals(data: &[u8]) -> std::result::Result<Vec<String>, &'static str> {
    if data.len() < ELF64_EHDR_SIZE {
        return Err("truncated ELF header");
    }
    if data[4] != ELFCLASS64 || data[5] != ELFDATA2LSB {
        return Err("not a 64-bit little-endian object");
    }
    if read_u16(data, 16) != ET_REL || read_u16(data, 18) != EM_X86_64 {
        return Err("not an x86-64 relocatable object");
    }
    let e_shoff = read_u64(data, 40) as usize;
    let e_shnum = read_u16(data, 60) as usize;
    if e_shoff == 0 || e_shnum == 0 || e_shoff + e_shnum * ELF64_SHDR_SIZE > data.len() {
        return Err("section header table out of bounds");
    }

    for i in 0..e_shnum {
        let shdr = e_shoff + i * ELF64_SHDR_SIZE;
        if read_u32(data, shdr + 4) != SHT_SYMTAB {
            continue;
        }
        let sym_off = read_u64(data, shdr + 24) as usize;
        let sym_size = read_u64(data, shdr + 32) as usize;
        let link = read_u32(data, shdr + 40) as usize;
        if sym_off + sym_size > data.len() || link >= e_shnum {
            return Err("symbol table out of bounds");
        }
        let str_shdr = e_shoff + link * ELF64_SHDR_SIZE;
        let str_off = read_u64(data, str_shdr + 24) as usize;
        let str_size = read_u64(data, str_shdr + 32) as usize;
        if str_off + str_size > data.len() {
            return Err("symbol string table out of bounds");
        }
        let strtab = &data[str_off..str_off + str_size];

        let mut names = Vec::new();
        for j in 0..sym_size / ELF64_SYM_SIZE {
            let sym = sym_off + j * ELF64_SYM_SIZE;
            let binding = data[sym + 4] >> 4;
            let shndx = read_u16(data, sym + 6);
            if binding == STB_LOCAL || shndx == SHN_UNDEF {
                continue;
            }
            let name = read_cstr(strtab, read_u32(data, sym) as usize);
            if !name.is_empty() {
                names.push(name);
            }
        }
        return Ok(names);
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::builder::{build_archive, TestObject};

    fn member(define: &str, need: Option<&str>) -> Vec<u8> {
        let mut obj = TestObject::new()
            .text(&[0xc3], 1)
            .global_func(define, ".text", 0);
        if let Some(name) = need {
            obj = obj.undefined(name);
        }
        obj.build()
    }

    #[test]
    fn test_is_archive_sniff() {
        assert!(is_archive(b"!<arch>\nrest"));
        assert!(!is_archive(&member("f", None)));
    }

    #[test]
    fn test_index_and_lazy_extract() {
        let data = build_archive(&[
            ("alpha.o", member("alpha", None)),
            ("beta.o", member("beta", Some("alpha"))),
        ]);
        let ar = Archive::parse(&data, "libab.a").unwrap();

        assert!(ar.defines("alpha"));
        assert!(ar.defines("beta"));
        assert!(!ar.defines("gamma"));

        let (idx, obj) = ar.extract("beta").unwrap();
        assert_eq!(idx, 1);
        assert_eq!(obj.source_name, "libab.a(beta.o)");
        assert!(obj.symbols.iter().any(|s| s.name == "beta" && s.is_external_definition()));
        assert!(obj.symbols.iter().any(|s| s.name == "alpha" && s.is_undefined()));
    }

    #[test]
    fn test_extract_unknown_symbol() {
        let data = build_archive(&[("alpha.o", member("alpha", None))]);
        let ar = Archive::parse(&data, "liba.a").unwrap();
        let err = ar.extract("nope").unwrap_err();
        match err {
            LinkError::SymbolNotInArchive { archive, symbol } => {
                assert_eq!(archive, "liba.a");
                assert_eq!(symbol, "nope");
            }
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_first_member_wins() {
        let data = build_archive(&[
            ("one.o", member("dup", None)),
            ("two.o", member("dup", None)),
        ]);
        let ar = Archive::parse(&data, "libdup.a").unwrap();
        let (idx, obj) = ar.extract("dup").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(obj.source_name, "libdup.a(one.o)");
    }

    #[test]
    fn test_long_member_names_via_extended_table() {
        let data = build_archive(&[(
            "a_member_with_a_really_long_name.o",
            member("longname", None),
        )]);
        let ar = Archive::parse(&data, "liblong.a").unwrap();
        let (_, obj) = ar.extract("longname").unwrap();
        assert_eq!(obj.source_name, "liblong.a(a_member_with_a_really_long_name.o)");
    }

    #[test]
    fn test_non_elf_member_skipped() {
        let data = build_archive(&[
            ("notes.txt", b"just some text\n".to_vec()),
            ("alpha.o", member("alpha", None)),
        ]);
        let ar = Archive::parse(&data, "libmixed.a").unwrap();
        assert!(ar.defines("alpha"));
        let (idx, _) = ar.extract("alpha").unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_truncated_member_rejected() {
        let mut data = build_archive(&[("alpha.o", member("alpha", None))]);
        data.truncate(data.len() - 10);
        let err = Archive::parse(&data, "libtrunc.a").unwrap_err();
        assert!(matches!(err, LinkError::MalformedObject { .. }), "{}", err);
    }

    #[test]
    fn test_weak_definition_indexed() {
        let obj = TestObject::new()
            .text(&[0xc3], 1)
            .weak_func("fallback", ".text", 0)
            .build();
        let data = build_archive(&[("weak.o", obj)]);
        let ar = Archive::parse(&data, "libweak.a").unwrap();
        assert!(ar.defines("fallback"));
    }
}
