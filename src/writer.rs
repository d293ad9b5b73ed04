//! Executable emission.
//!
//! The whole output is assembled in memory from the computed layout, so the
//! bytes are a pure function of the inputs, then written through a temporary
//! file and renamed into place. A failed link never leaves anything at the
//! output path.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::info;

use crate::elf::constants::*;
use crate::elf::io::{align_up, w16, w32, w64, wphdr, write_bytes, write_shdr64};
use crate::elf::{ObjectFile, SectionKind, StringTable};
use crate::error::Result;
use crate::layout::{Layout, PAGE_SIZE};

/// Assemble the complete `ET_EXEC` image: ELF header, program headers,
/// section content, GOT, then section name table and section headers.
pub fn build_image(objects: &[ObjectFile], layout: &Layout, got_bytes: &[u8], entry: u64) -> Vec<u8> {
    let mut shstrtab = StringTable::new();
    let name_offsets: Vec<u32> = layout.sections.iter().map(|sec| shstrtab.add(sec.name)).collect();
    let shstrtab_name = shstrtab.add(".shstrtab");

    // Section headers are not loaded; they follow the content and the name
    // table at the end of the file.
    let shstrtab_offset = layout.content_size;
    let shoff = align_up(shstrtab_offset + shstrtab.len() as u64, 8);
    let shnum = 1 + layout.sections.len() + 1;
    let total = shoff as usize + shnum * ELF64_SHDR_SIZE;

    let mut image = vec![0u8; total];

    image[0..4].copy_from_slice(&ELF_MAGIC);
    image[4] = ELFCLASS64;
    image[5] = ELFDATA2LSB;
    image[6] = EV_CURRENT;
    image[7] = ELFOSABI_SYSV;
    w16(&mut image, 16, ET_EXEC);
    w16(&mut image, 18, EM_X86_64);
    w32(&mut image, 20, 1); // e_version
    w64(&mut image, 24, entry);
    w64(&mut image, 32, ELF64_EHDR_SIZE as u64); // e_phoff
    w64(&mut image, 40, shoff);
    w16(&mut image, 52, ELF64_EHDR_SIZE as u16);
    w16(&mut image, 54, ELF64_PHDR_SIZE as u16);
    w16(&mut image, 56, layout.segments.len() as u16);
    w16(&mut image, 58, ELF64_SHDR_SIZE as u16);
    w16(&mut image, 60, shnum as u16);
    w16(&mut image, 62, (shnum - 1) as u16); // .shstrtab is last

    for (i, seg) in layout.segments.iter().enumerate() {
        let off = ELF64_EHDR_SIZE + i * ELF64_PHDR_SIZE;
        wphdr(
            &mut image,
            off,
            PT_LOAD,
            seg.flags,
            seg.offset,
            seg.vaddr,
            seg.filesz,
            seg.memsz,
            PAGE_SIZE,
        );
    }

    // Content in layout order; gaps stay zero. Zero-fill chunks own no bytes.
    for chunk in &layout.chunks {
        let obj = &objects[chunk.object];
        if obj.sections[chunk.section].kind == SectionKind::ZeroFill {
            continue;
        }
        write_bytes(&mut image, chunk.file_offset as usize, &obj.section_data[chunk.section]);
    }
    if !got_bytes.is_empty() {
        write_bytes(&mut image, layout.got_offset as usize, got_bytes);
    }

    write_bytes(&mut image, shstrtab_offset as usize, shstrtab.as_bytes());

    let mut shdrs = Vec::with_capacity(shnum * ELF64_SHDR_SIZE);
    write_shdr64(&mut shdrs, 0, SHT_NULL, 0, 0, 0, 0, 0, 0, 0, 0);
    for (sec, &name) in layout.sections.iter().zip(&name_offsets) {
        write_shdr64(
            &mut shdrs,
            name,
            sec.sh_type,
            sec.flags,
            sec.addr,
            sec.offset,
            sec.size,
            0,
            0,
            sec.align,
            0,
        );
    }
    write_shdr64(
        &mut shdrs,
        shstrtab_name,
        SHT_STRTAB,
        0,
        0,
        shstrtab_offset,
        shstrtab.len() as u64,
        0,
        0,
        1,
        0,
    );
    write_bytes(&mut image, shoff as usize, &shdrs);

    image
}

/// Write `image` to `path` through a temporary file in the same directory,
/// making the executable appear atomically with mode 0755.
pub fn write_output(path: &Path, image: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(image)?;
    tmp.as_file().set_permissions(fs::Permissions::from_mode(0o755))?;
    tmp.persist(path).map_err(|e| e.error)?;
    info!(path = %path.display(), bytes = image.len(), "wrote executable");
    Ok(())
}
