//! ELF64 format constants used by the object reader and the executable writer.

// ── ELF identification ───────────────────────────────────────────────────────

pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const EV_CURRENT: u8 = 1;
pub const ELFOSABI_SYSV: u8 = 0;

// ── Object types ─────────────────────────────────────────────────────────────

pub const ET_REL: u16 = 1;
pub const ET_EXEC: u16 = 2;

// ── Machine types ────────────────────────────────────────────────────────────

pub const EM_X86_64: u16 = 62;

// ── Section header types ─────────────────────────────────────────────────────

pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_REL: u32 = 9;

// ── Section header flags ─────────────────────────────────────────────────────

pub const SHF_WRITE: u64 = 0x1;
pub const SHF_ALLOC: u64 = 0x2;
pub const SHF_EXECINSTR: u64 = 0x4;

// ── Symbol binding ───────────────────────────────────────────────────────────

pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;

// ── Symbol types ─────────────────────────────────────────────────────────────

pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;
pub const STT_SECTION: u8 = 3;
pub const STT_FILE: u8 = 4;

// ── Special section indices ──────────────────────────────────────────────────

pub const SHN_UNDEF: u16 = 0;
pub const SHN_ABS: u16 = 0xfff1;
pub const SHN_COMMON: u16 = 0xfff2;

// ── Program header types and flags ───────────────────────────────────────────

pub const PT_LOAD: u32 = 1;

pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;

// ── x86-64 relocation types ──────────────────────────────────────────────────

pub const R_X86_64_NONE: u32 = 0;
pub const R_X86_64_64: u32 = 1;
pub const R_X86_64_PC32: u32 = 2;
pub const R_X86_64_PLT32: u32 = 4;
pub const R_X86_64_GOTPCREL: u32 = 9;
pub const R_X86_64_32: u32 = 10;
pub const R_X86_64_32S: u32 = 11;
pub const R_X86_64_GOTPCRELX: u32 = 41;
pub const R_X86_64_REX_GOTPCRELX: u32 = 42;

// ── Fixed structure sizes ────────────────────────────────────────────────────

/// Size of the ELF64 file header in bytes.
pub const ELF64_EHDR_SIZE: usize = 64;
/// Size of an ELF64 section header in bytes.
pub const ELF64_SHDR_SIZE: usize = 64;
/// Size of an ELF64 program header in bytes.
pub const ELF64_PHDR_SIZE: usize = 56;
/// Size of an ELF64 symbol table entry in bytes.
pub const ELF64_SYM_SIZE: usize = 24;
/// Size of an ELF64 RELA relocation entry in bytes.
pub const ELF64_RELA_SIZE: usize = 24;
