//! Loaded ELF image and its lookup tables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use elfdbg_isa::Architecture;
use tracing::{debug, info};

use crate::constants::*;
use crate::file::ElfFile;
use crate::header::*;
use crate::reader::to_usize;
use crate::{ElfError, LoadOptions, Result};

/// Bytes of the first executable `PT_LOAD` segment.
///
/// `data` holds at most `LoadOptions::max_code_bytes` of the segment's
/// file-backed bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodeSegment {
    pub address: u64,
    pub file_offset: u64,
    /// Size of the segment in memory.
    pub memory_size: u64,
    pub data: Vec<u8>,
}

impl CodeSegment {
    pub const fn end_address(&self) -> u64 {
        self.address.saturating_add(self.data.len() as u64)
    }

    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.address && addr < self.end_address()
    }
}

/// Header summary of a loaded image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElfInfo {
    pub path: Option<PathBuf>,
    pub architecture: Architecture,
    pub machine: &'static str,
    pub file_type: &'static str,
    pub entry_point: u64,
    pub is_64bit: bool,
    pub is_little_endian: bool,
    pub interpreter: Option<String>,
    pub needed: Vec<String>,
    pub section_count: usize,
    pub symbol_count: usize,
    pub import_count: usize,
    pub export_count: usize,
}

/// Parsed ELF image.
///
/// Built once from file bytes and never mutated; reloading builds a new one.
#[derive(Clone, Debug)]
pub struct ElfImage {
    path: Option<PathBuf>,
    header: ElfHeader,
    architecture: Architecture,
    segments: Vec<ProgramHeader>,
    sections: Vec<Section>,
    symbols: Vec<Symbol>,
    /// Largest symbol size; bounds the backward walk in address lookups.
    max_symbol_size: u64,
    imports: Vec<Import>,
    exports: Vec<Export>,
    needed: Vec<String>,
    interpreter: Option<String>,
    code: Option<CodeSegment>,
}

/// Map `e_machine` to a decoder architecture.
pub const fn machine_to_architecture(machine: u16) -> Architecture {
    match machine {
        EM_386 => Architecture::X86,
        EM_X86_64 => Architecture::X86_64,
        EM_ARM => Architecture::Arm,
        EM_AARCH64 => Architecture::Arm64,
        _ => Architecture::Unknown,
    }
}

impl ElfImage {
    /// Parse ELF from raw bytes.
    pub fn parse(data: &[u8], options: &LoadOptions) -> Result<Self> {
        let elf = ElfFile::parse(data)?;

        let segments: Vec<ProgramHeader> = elf
            .program_headers
            .iter()
            .filter(|ph| ph.is_load())
            .cloned()
            .collect();
        let code = Self::load_code_segment(&elf, &segments, options.max_code_bytes);
        let sections = elf.sections(options.max_section_bytes);
        let symbols = elf.symbols();
        let max_symbol_size = symbols.iter().map(|s| s.size).max().unwrap_or(0);
        let imports = elf.imports();
        let exports = symbols
            .iter()
            .filter(|s| s.is_exported && s.address != 0)
            .map(|s| Export {
                name: s.name.clone(),
                address: s.address,
                kind: s.kind,
            })
            .collect();

        Ok(Self {
            path: None,
            architecture: machine_to_architecture(elf.header.machine),
            needed: elf.needed_libraries(),
            interpreter: elf.interpreter(),
            header: elf.header,
            segments,
            sections,
            symbols,
            max_symbol_size,
            imports,
            exports,
            code,
        })
    }

    /// Read and parse the file at `path`.
    pub fn from_path(path: impl AsRef<Path>, options: &LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| ElfError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut image = Self::parse(&data, options)?;
        image.path = Some(path.to_path_buf());

        info!(
            path = %path.display(),
            arch = %image.architecture,
            sections = image.sections.len(),
            symbols = image.symbols.len(),
            code_bytes = image.get_code_section_data().len(),
            "loaded ELF"
        );
        Ok(image)
    }

    fn load_code_segment(
        elf: &ElfFile<'_>,
        segments: &[ProgramHeader],
        max_code_bytes: usize,
    ) -> Option<CodeSegment> {
        let Some(ph) = segments.iter().find(|ph| ph.is_executable()) else {
            debug!("no executable PT_LOAD segment");
            return None;
        };
        let len = to_usize(ph.filesz).min(max_code_bytes);
        let data = elf.reader().bytes_clipped(to_usize(ph.offset), len).to_vec();
        if data.len() < len {
            debug!(
                offset = ph.offset,
                filesz = ph.filesz,
                read = data.len(),
                "code segment clipped to file"
            );
        }
        Some(CodeSegment {
            address: ph.vaddr,
            file_offset: ph.offset,
            memory_size: ph.memsz,
            data,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub const fn header(&self) -> &ElfHeader {
        &self.header
    }

    pub const fn detect_architecture(&self) -> Architecture {
        self.architecture
    }

    pub const fn is_64bit(&self) -> bool {
        self.header.is_64bit()
    }

    pub const fn is_little_endian(&self) -> bool {
        self.header.is_little_endian()
    }

    pub const fn get_entry_point(&self) -> u64 {
        self.header.entry
    }

    pub const fn file_type(&self) -> &'static str {
        file_type_name(self.header.e_type)
    }

    pub const fn machine_name(&self) -> &'static str {
        machine_name(self.header.machine)
    }

    /// `PT_LOAD` program headers in file order.
    pub fn segments(&self) -> &[ProgramHeader] {
        &self.segments
    }

    pub fn get_sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn get_section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Contents of the named section; empty when it is absent.
    pub fn get_section_data(&self, name: &str) -> &[u8] {
        self.get_section(name).map_or(&[], |s| s.data.as_slice())
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.get_section(name).is_some()
    }

    /// Allocated section containing `addr`.
    pub fn section_containing(&self, addr: u64) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.is_allocated() && !s.is_tls() && s.contains(addr))
    }

    pub const fn code_segment(&self) -> Option<&CodeSegment> {
        self.code.as_ref()
    }

    /// Executable segment, or `MissingSegment` when the file has none.
    pub fn require_code(&self) -> Result<&CodeSegment> {
        self.code.as_ref().ok_or(ElfError::MissingSegment)
    }

    /// Executable segment bytes; empty when there is no executable segment.
    pub fn get_code_section_data(&self) -> &[u8] {
        self.code.as_ref().map_or(&[], |c| c.data.as_slice())
    }

    /// Symbols sorted by address.
    pub fn get_symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn get_functions(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(|s| s.is_function)
    }

    pub fn find_symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Symbols at the greatest address not above `addr`, skipping undefined ones.
    fn preceding_group(&self, addr: u64) -> &[Symbol] {
        let end = self.symbols.partition_point(|s| s.address <= addr);
        let Some(last) = end.checked_sub(1).map(|i| &self.symbols[i]) else {
            return &[];
        };
        if last.address == 0 && last.is_imported {
            return &[];
        }
        let start = self.symbols[..end].partition_point(|s| s.address < last.address);
        &self.symbols[start..end]
    }

    /// Innermost symbol accepted by `keep` whose range contains `addr`.
    ///
    /// Walks back past symbols that start below `addr` but end before it, so
    /// a label inside a function does not hide the function. Functions win
    /// over other symbols at the same address.
    fn containing(&self, addr: u64, keep: impl Fn(&Symbol) -> bool) -> Option<&Symbol> {
        let end = self.symbols.partition_point(|s| s.address <= addr);
        let mut found: Option<&Symbol> = None;
        for sym in self.symbols[..end].iter().rev() {
            if found.is_some_and(|f| f.address != sym.address)
                || addr - sym.address > self.max_symbol_size
            {
                break;
            }
            if sym.is_imported || !keep(sym) || !sym.contains(addr) {
                continue;
            }
            if found.is_none_or(|f| sym.is_function && !f.is_function) {
                found = Some(sym);
            }
        }
        found
    }

    /// Symbol whose `[address, address + size)` range contains `addr`.
    pub fn find_symbol_by_address(&self, addr: u64) -> Option<&Symbol> {
        self.containing(addr, |_| true)
    }

    /// Name of the function containing `addr`.
    pub fn get_function_name(&self, addr: u64) -> Option<&str> {
        self.containing(addr, |s| s.is_function)
            .map(|s| s.name.as_str())
    }

    /// Closest symbol at or below `addr` with the offset from its start.
    pub fn nearest_symbol(&self, addr: u64) -> Option<(&Symbol, u64)> {
        let group = self.preceding_group(addr);
        let sym = group.iter().max_by_key(|s| s.is_function)?;
        Some((sym, addr - sym.address))
    }

    /// Address to name for every defined symbol; the first name per address wins.
    pub fn build_address_to_symbol_map(&self) -> BTreeMap<u64, String> {
        let mut map = BTreeMap::new();
        for sym in self.symbols.iter().filter(|s| s.address != 0) {
            map.entry(sym.address).or_insert_with(|| sym.name.clone());
        }
        map
    }

    pub fn get_imports(&self) -> &[Import] {
        &self.imports
    }

    pub fn get_exports(&self) -> &[Export] {
        &self.exports
    }

    /// Libraries named by `DT_NEEDED`.
    pub fn needed_libraries(&self) -> &[String] {
        &self.needed
    }

    pub fn interpreter(&self) -> Option<&str> {
        self.interpreter.as_deref()
    }

    /// File offset of a virtual address inside a loaded segment.
    pub fn virtual_to_file_offset(&self, addr: u64) -> Option<u64> {
        self.segments
            .iter()
            .find(|ph| ph.contains_file_vaddr(addr))
            .map(|ph| ph.offset + (addr - ph.vaddr))
    }

    /// Virtual address of a file offset inside a loaded segment.
    pub fn file_to_virtual_offset(&self, offset: u64) -> Option<u64> {
        self.segments
            .iter()
            .find(|ph| ph.contains_offset(offset))
            .map(|ph| ph.vaddr + (offset - ph.offset))
    }

    /// Virtual addresses in allocated sections where `needle` occurs.
    pub fn find_string_references(&self, needle: &str) -> Vec<u64> {
        let needle = needle.as_bytes();
        if needle.is_empty() {
            return Vec::new();
        }
        self.sections
            .iter()
            .filter(|s| s.is_allocated() && !s.data.is_empty())
            .flat_map(|s| {
                s.data
                    .windows(needle.len())
                    .enumerate()
                    .filter(|(_, w)| *w == needle)
                    .map(move |(i, _)| s.virtual_address + i as u64)
            })
            .collect()
    }

    /// Header summary.
    pub fn info(&self) -> ElfInfo {
        ElfInfo {
            path: self.path.clone(),
            architecture: self.architecture,
            machine: self.machine_name(),
            file_type: self.file_type(),
            entry_point: self.header.entry,
            is_64bit: self.is_64bit(),
            is_little_endian: self.is_little_endian(),
            interpreter: self.interpreter.clone(),
            needed: self.needed.clone(),
            section_count: self.sections.len(),
            symbol_count: self.symbols.len(),
            import_count: self.imports.len(),
            export_count: self.exports.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ElfBuilder, sample_x86_64};

    #[test]
    fn test_sample_header() {
        let image = ElfImage::parse(&sample_x86_64(), &LoadOptions::default()).unwrap();
        assert_eq!(image.detect_architecture(), Architecture::X86_64);
        assert!(image.is_64bit());
        assert!(image.is_little_endian());
        assert_eq!(image.get_entry_point(), 0x40_1000);
        assert_eq!(image.file_type(), "Executable");
        assert_eq!(image.machine_name(), "x86-64");
    }

    #[test]
    fn test_code_segment() {
        let image = ElfImage::parse(&sample_x86_64(), &LoadOptions::default()).unwrap();
        let code = image.require_code().unwrap();
        assert_eq!(code.address, 0x40_1000);
        assert_eq!(image.get_code_section_data(), image.get_section_data(".text"));
        assert_eq!(image.get_code_section_data()[0], 0x55);
    }

    #[test]
    fn test_code_bounded() {
        let options = LoadOptions::default().with_max_code_bytes(4);
        let image = ElfImage::parse(&sample_x86_64(), &options).unwrap();
        assert_eq!(image.get_code_section_data().len(), 4);
    }

    #[test]
    fn test_sections() {
        let image = ElfImage::parse(&sample_x86_64(), &LoadOptions::default()).unwrap();
        let text = image.get_section(".text").unwrap();
        assert_eq!(text.type_name(), "PROGBITS");
        assert_eq!(text.flags_string(), "AX");
        assert!(text.is_executable() && text.is_readable() && !text.is_writable());

        let bss = image.get_section(".bss").unwrap();
        assert_eq!(bss.type_name(), "NOBITS");
        assert!(bss.data.is_empty());
        assert!(bss.is_writable());

        assert!(image.get_section(".missing").is_none());
        assert!(image.get_section_data(".missing").is_empty());
        assert!(!image.has_section(".missing"));
    }

    #[test]
    fn test_symbol_lookup() {
        let image = ElfImage::parse(&sample_x86_64(), &LoadOptions::default()).unwrap();
        let symbols = image.get_symbols();
        assert!(symbols.windows(2).all(|w| w[0].address <= w[1].address));

        let main = image.find_symbol("main").unwrap();
        assert!(main.is_function);
        assert_eq!(main.section_name, ".text");

        assert_eq!(image.get_function_name(0x40_1000), Some("_start"));
        assert_eq!(image.get_function_name(main.address + 2), Some("main"));
        assert_eq!(image.get_function_name(0x40_4000), None);
        assert_eq!(
            image.find_symbol_by_address(0x40_4000).map(|s| s.name.as_str()),
            Some("counter")
        );
        assert!(image.find_symbol_by_address(0x10).is_none());
        assert!(image.find_symbol("$x").is_none());

        let (sym, off) = image.nearest_symbol(main.address + 3).unwrap();
        assert_eq!((sym.name.as_str(), off), ("main", 3));

        let map = image.build_address_to_symbol_map();
        assert_eq!(map.get(&main.address).map(String::as_str), Some("main"));
        assert!(!map.contains_key(&0));
    }

    #[test]
    fn test_lookup_past_inner_label() {
        let image = ElfImage::parse(&sample_x86_64(), &LoadOptions::default()).unwrap();
        let label = image.find_symbol(".Lepilogue").unwrap();
        assert_eq!(label.address, 0x40_1009);
        assert_eq!(label.size, 0);

        // the label itself answers for its own address only
        let at_label = image.find_symbol_by_address(0x40_1009).unwrap();
        assert_eq!(at_label.name, ".Lepilogue");
        assert_eq!(image.get_function_name(0x40_1009), Some("_start"));

        // past it, the enclosing function still covers the address
        let after = image.find_symbol_by_address(0x40_100a).unwrap();
        assert_eq!(after.name, "_start");
        assert_eq!(image.get_function_name(0x40_100a), Some("_start"));
        assert_eq!(image.get_function_name(0x40_1000), Some("_start"));
    }

    #[test]
    fn test_imports_and_exports() {
        let image = ElfImage::parse(&sample_x86_64(), &LoadOptions::default()).unwrap();
        let imports = image.get_imports();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].name, "puts");
        assert_eq!(imports[0].library, "libc.so.6");
        assert_eq!(imports[0].address, 0x40_3018);

        let puts = image.find_symbol("puts").unwrap();
        assert!(puts.is_imported);
        assert!(!puts.is_exported);

        let exports: Vec<_> = image.get_exports().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(exports, vec!["main"]);

        assert_eq!(image.needed_libraries(), ["libc.so.6"]);
    }

    #[test]
    fn test_address_translation() {
        let image = ElfImage::parse(&sample_x86_64(), &LoadOptions::default()).unwrap();
        let text = image.get_section(".text").unwrap();
        let offset = image.virtual_to_file_offset(0x40_1004).unwrap();
        assert_eq!(offset, text.file_offset + 4);
        assert_eq!(image.file_to_virtual_offset(offset), Some(0x40_1004));
        assert_eq!(image.virtual_to_file_offset(0x10), None);
    }

    #[test]
    fn test_string_references() {
        let image = ElfImage::parse(&sample_x86_64(), &LoadOptions::default()).unwrap();
        let rodata = image.get_section(".rodata").unwrap();
        assert_eq!(
            image.find_string_references("hello"),
            vec![rodata.virtual_address]
        );
        assert!(image.find_string_references("absent").is_empty());
    }

    #[test]
    fn test_overlapping_sections_dropped() {
        let mut builder = ElfBuilder::new(true, true, EM_X86_64);
        builder.section(".a", SHT_PROGBITS, SHF_ALLOC, 0x1000, vec![0; 0x20]);
        builder.section(".b", SHT_PROGBITS, SHF_ALLOC, 0x1010, vec![0; 0x20]);
        builder.section(".tbss", SHT_NOBITS, SHF_ALLOC | SHF_WRITE | SHF_TLS, 0x1000, Vec::new());
        builder.section(".c", SHT_PROGBITS, SHF_ALLOC, 0x1020, vec![0; 0x10]);
        let image = ElfImage::parse(&builder.build(), &LoadOptions::default()).unwrap();

        let names: Vec<_> = image.get_sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![".a", ".tbss", ".c", ".shstrtab"]);
    }

    #[test]
    fn test_missing_code_segment() {
        let mut builder = ElfBuilder::new(true, true, EM_X86_64);
        builder.section(".data", SHT_PROGBITS, SHF_ALLOC | SHF_WRITE, 0x2000, vec![1; 8]);
        let image = ElfImage::parse(&builder.build(), &LoadOptions::default()).unwrap();
        assert!(image.code_segment().is_none());
        assert!(image.get_code_section_data().is_empty());
        assert!(matches!(image.require_code(), Err(ElfError::MissingSegment)));
    }

    #[test]
    fn test_arm_big_endian_32() {
        let mut builder = ElfBuilder::new(false, false, EM_ARM);
        builder.entry = 0x8000;
        let text = builder.section(
            ".text",
            SHT_PROGBITS,
            SHF_ALLOC | SHF_EXECINSTR,
            0x8000,
            vec![0xE1, 0xA0, 0x00, 0x00],
        );
        builder.load_segment(text, PF_R | PF_X);
        let image = ElfImage::parse(&builder.build(), &LoadOptions::default()).unwrap();

        assert_eq!(image.detect_architecture(), Architecture::Arm);
        assert!(!image.is_64bit());
        assert!(!image.is_little_endian());
        assert_eq!(image.get_entry_point(), 0x8000);
        assert_eq!(image.get_code_section_data(), &[0xE1, 0xA0, 0x00, 0x00]);
        assert_eq!(image.get_section(".text").unwrap().virtual_address, 0x8000);
    }

    #[test]
    fn test_unknown_machine() {
        let image =
            ElfImage::parse(&ElfBuilder::new(true, true, EM_RISCV).build(), &LoadOptions::default())
                .unwrap();
        assert_eq!(image.detect_architecture(), Architecture::Unknown);
        assert_eq!(image.machine_name(), "RISC-V");
    }
}
