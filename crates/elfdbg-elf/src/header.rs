//! ELF header structures and the records built from them.

use std::fmt;

use crate::constants::*;

/// ELF file header.
#[derive(Clone, Debug, Default)]
pub struct ElfHeader {
    pub class: u8,
    pub data: u8,
    pub version: u8,
    pub abi: u8,
    pub e_type: u16,
    pub machine: u16,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

impl ElfHeader {
    pub const fn is_64bit(&self) -> bool {
        self.class == ELF_CLASS_64
    }

    pub const fn is_little_endian(&self) -> bool {
        self.data == ELF_DATA_LSB
    }
}

/// Program header.
#[derive(Clone, Debug, Default)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

impl ProgramHeader {
    pub const fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    pub const fn is_executable(&self) -> bool {
        self.flags & PF_X != 0
    }

    /// Check whether `addr` falls inside the file-backed part of the segment.
    pub const fn contains_file_vaddr(&self, addr: u64) -> bool {
        addr >= self.vaddr && addr - self.vaddr < self.filesz
    }

    pub const fn contains_offset(&self, offset: u64) -> bool {
        offset >= self.offset && offset - self.offset < self.filesz
    }
}

/// Raw section header.
#[derive(Clone, Debug, Default)]
pub struct SectionHeader {
    pub name: u32,
    pub sh_type: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

/// Section with its resolved name and file contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub virtual_address: u64,
    pub size: u64,
    pub file_offset: u64,
    pub section_type: u32,
    pub flags: u64,
    /// File contents; empty for `SHT_NOBITS` and for sections beyond the size bound.
    pub data: Vec<u8>,
}

impl Section {
    pub const fn is_executable(&self) -> bool {
        self.flags & SHF_EXECINSTR != 0
    }

    pub const fn is_writable(&self) -> bool {
        self.flags & SHF_WRITE != 0
    }

    /// Allocated sections are readable once mapped.
    pub const fn is_readable(&self) -> bool {
        self.flags & SHF_ALLOC != 0
    }

    pub const fn is_allocated(&self) -> bool {
        self.flags & SHF_ALLOC != 0
    }

    pub const fn is_tls(&self) -> bool {
        self.flags & SHF_TLS != 0
    }

    pub const fn end_address(&self) -> u64 {
        self.virtual_address.saturating_add(self.size)
    }

    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.virtual_address && addr < self.end_address()
    }

    pub const fn type_name(&self) -> &'static str {
        section_type_name(self.section_type)
    }

    /// Flag letters in `readelf` order (`W`, `A`, `X`, `M`, `S`, `I`, `T`).
    pub fn flags_string(&self) -> String {
        [
            (SHF_WRITE, 'W'),
            (SHF_ALLOC, 'A'),
            (SHF_EXECINSTR, 'X'),
            (SHF_MERGE, 'M'),
            (SHF_STRINGS, 'S'),
            (SHF_INFO_LINK, 'I'),
            (SHF_TLS, 'T'),
        ]
        .iter()
        .filter(|(bit, _)| self.flags & bit != 0)
        .map(|&(_, c)| c)
        .collect()
    }
}

pub const fn section_type_name(sh_type: u32) -> &'static str {
    match sh_type {
        SHT_NULL => "NULL",
        SHT_PROGBITS => "PROGBITS",
        SHT_SYMTAB => "SYMTAB",
        SHT_STRTAB => "STRTAB",
        SHT_RELA => "RELA",
        SHT_HASH => "HASH",
        SHT_DYNAMIC => "DYNAMIC",
        SHT_NOTE => "NOTE",
        SHT_NOBITS => "NOBITS",
        SHT_REL => "REL",
        SHT_DYNSYM => "DYNSYM",
        SHT_INIT_ARRAY => "INIT_ARRAY",
        SHT_FINI_ARRAY => "FINI_ARRAY",
        SHT_PREINIT_ARRAY => "PREINIT_ARRAY",
        SHT_GROUP => "GROUP",
        SHT_GNU_HASH => "GNU_HASH",
        SHT_GNU_VERNEED => "VERNEED",
        SHT_GNU_VERSYM => "VERSYM",
        _ => "UNKNOWN",
    }
}

/// Symbol type from the low nibble of `st_info`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    #[default]
    NoType,
    Object,
    Func,
    Section,
    File,
    Common,
    Tls,
    IFunc,
    Other(u8),
}

impl SymbolKind {
    pub const fn from_info(info: u8) -> Self {
        match info & 0xF {
            STT_NOTYPE => Self::NoType,
            STT_OBJECT => Self::Object,
            STT_FUNC => Self::Func,
            STT_SECTION => Self::Section,
            STT_FILE => Self::File,
            STT_COMMON => Self::Common,
            STT_TLS => Self::Tls,
            STT_GNU_IFUNC => Self::IFunc,
            other => Self::Other(other),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoType => "NOTYPE",
            Self::Object => "OBJECT",
            Self::Func => "FUNC",
            Self::Section => "SECTION",
            Self::File => "FILE",
            Self::Common => "COMMON",
            Self::Tls => "TLS",
            Self::IFunc => "IFUNC",
            Self::Other(_) => "OTHER",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbol binding from the high nibble of `st_info`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SymbolBinding {
    #[default]
    Local,
    Global,
    Weak,
    Unique,
    Other(u8),
}

impl SymbolBinding {
    pub const fn from_info(info: u8) -> Self {
        match info >> 4 {
            STB_LOCAL => Self::Local,
            STB_GLOBAL => Self::Global,
            STB_WEAK => Self::Weak,
            STB_GNU_UNIQUE => Self::Unique,
            other => Self::Other(other),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Global => "GLOBAL",
            Self::Weak => "WEAK",
            Self::Unique => "UNIQUE",
            Self::Other(_) => "OTHER",
        }
    }

    pub const fn is_visible(self) -> bool {
        matches!(self, Self::Global | Self::Weak | Self::Unique)
    }
}

impl fmt::Display for SymbolBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ELF symbol.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub kind: SymbolKind,
    pub binding: SymbolBinding,
    /// Name of the section the symbol is defined in; empty when undefined or absolute.
    pub section_name: String,
    pub is_function: bool,
    pub is_imported: bool,
    pub is_exported: bool,
}

impl Symbol {
    /// Check whether `addr` lies inside `[address, address + size)`.
    ///
    /// Zero-sized symbols only contain their own address.
    pub const fn contains(&self, addr: u64) -> bool {
        if self.size == 0 {
            addr == self.address
        } else {
            addr >= self.address && addr - self.address < self.size
        }
    }
}

/// Undefined dynamic symbol resolved at load time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Import {
    pub name: String,
    /// Providing library from symbol versioning; empty when unknown.
    pub library: String,
    /// GOT slot patched by the dynamic linker, or 0 when no relocation names it.
    pub address: u64,
    pub kind: SymbolKind,
}

/// Defined global symbol visible to other modules.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub address: u64,
    pub kind: SymbolKind,
}

pub const fn file_type_name(e_type: u16) -> &'static str {
    match e_type {
        ET_NONE => "NONE",
        ET_REL => "Relocatable",
        ET_EXEC => "Executable",
        ET_DYN => "Shared object",
        ET_CORE => "Core",
        _ => "Unknown",
    }
}

pub const fn machine_name(machine: u16) -> &'static str {
    match machine {
        EM_386 => "Intel 80386",
        EM_X86_64 => "x86-64",
        EM_ARM => "ARM",
        EM_AARCH64 => "AArch64",
        EM_RISCV => "RISC-V",
        _ => "Unknown",
    }
}
