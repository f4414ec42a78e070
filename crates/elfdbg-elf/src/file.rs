//! ELF file parser.
//!
//! Only the identification bytes and the file header are mandatory. Program
//! headers, section headers and every table reached through them are parsed
//! best-effort: an entry that points outside the file is skipped and logged,
//! never turned into an error or a panic.

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::constants::*;
use crate::header::*;
use crate::reader::{Reader, to_usize};
use crate::{ElfError, Result};

/// Parsed ELF file borrowing the raw bytes.
pub struct ElfFile<'a> {
    reader: Reader<'a>,
    pub header: ElfHeader,
    pub program_headers: Vec<ProgramHeader>,
    pub section_headers: Vec<SectionHeader>,
    /// Section names, parallel to `section_headers`.
    pub section_names: Vec<String>,
}

/// Symbol table entry before name and section resolution.
#[derive(Clone, Debug)]
struct RawSymbol {
    name: String,
    value: u64,
    size: u64,
    info: u8,
    shndx: u16,
}

impl<'a> ElfFile<'a> {
    /// Parse the header tables of `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = parse_header(data)?;
        let reader = Reader::new(data, header.is_little_endian(), header.is_64bit());

        let program_headers = parse_program_headers(&reader, &header);
        let section_headers = parse_section_headers(&reader, &header);
        let section_names = resolve_section_names(&reader, &header, &section_headers);

        debug!(
            phnum = program_headers.len(),
            shnum = section_headers.len(),
            class64 = header.is_64bit(),
            little = header.is_little_endian(),
            "parsed ELF tables"
        );

        Ok(Self {
            reader,
            header,
            program_headers,
            section_headers,
            section_names,
        })
    }

    pub(crate) const fn reader(&self) -> &Reader<'a> {
        &self.reader
    }

    fn section_name(&self, index: usize) -> &str {
        self.section_names.get(index).map_or("", String::as_str)
    }

    fn find_section_by_type(&self, sh_type: u32) -> Option<(usize, &SectionHeader)> {
        self.section_headers
            .iter()
            .enumerate()
            .find(|(_, sh)| sh.sh_type == sh_type)
    }

    /// File bytes of a section, clipped to the file and to `limit`.
    fn section_bytes(&self, sh: &SectionHeader, limit: usize) -> &'a [u8] {
        if sh.sh_type == SHT_NOBITS {
            return &[];
        }
        let size = to_usize(sh.size);
        if size > limit {
            return &[];
        }
        let bytes = self.reader.bytes_clipped(to_usize(sh.offset), size);
        if bytes.len() < size {
            debug!(offset = sh.offset, size, "section extends beyond file");
        }
        bytes
    }

    /// Build the section list, keeping allocated sections free of overlaps.
    pub fn sections(&self, max_section_bytes: usize) -> Vec<Section> {
        let mut sections: Vec<Section> = Vec::with_capacity(self.section_headers.len());

        for (index, sh) in self.section_headers.iter().enumerate() {
            if sh.sh_type == SHT_NULL {
                continue;
            }
            let section = Section {
                name: self.section_name(index).to_string(),
                virtual_address: sh.addr,
                size: sh.size,
                file_offset: sh.offset,
                section_type: sh.sh_type,
                flags: sh.flags,
                data: self.section_bytes(sh, max_section_bytes).to_vec(),
            };

            if occupies_memory(&section) {
                let clash = sections.iter().find(|other| {
                    occupies_memory(other)
                        && section.virtual_address < other.end_address()
                        && other.virtual_address < section.end_address()
                });
                if let Some(other) = clash {
                    warn!(
                        section = %section.name,
                        overlaps = %other.name,
                        addr = format_args!("{:#x}", section.virtual_address),
                        "dropping overlapping section"
                    );
                    continue;
                }
            }
            sections.push(section);
        }

        sections
    }

    fn raw_symbols(&self, table_index: usize) -> Vec<RawSymbol> {
        let Some(table) = self.section_headers.get(table_index) else {
            return Vec::new();
        };
        let Some(strtab) = self.section_headers.get(table.link as usize) else {
            return Vec::new();
        };

        let class_size = if self.reader.is_64bit() {
            ELF64_SYM_SIZE
        } else {
            ELF32_SYM_SIZE
        };
        let entsize = match to_usize(table.entsize) {
            0 => class_size,
            n => n,
        };
        let strtab_offset = to_usize(strtab.offset);
        let base = to_usize(table.offset);
        let count = to_usize(table.size) / entsize;

        let mut symbols = Vec::with_capacity(count.min(MAX_HEADER_ENTRIES * 4));
        for i in 0..count {
            let Some(offset) = i.checked_mul(entsize).and_then(|o| o.checked_add(base)) else {
                break;
            };
            match self.parse_symbol(offset, strtab_offset) {
                Some(sym) => symbols.push(sym),
                None => {
                    debug!(index = i, "symbol table truncated");
                    break;
                }
            }
        }
        symbols
    }

    fn parse_symbol(&self, offset: usize, strtab_offset: usize) -> Option<RawSymbol> {
        let r = &self.reader;
        let name_idx = to_usize(u64::from(r.u32(offset)?));
        let (value, size, info, shndx) = if r.is_64bit() {
            (
                r.u64(offset + 8)?,
                r.u64(offset + 16)?,
                r.u8(offset + 4)?,
                r.u16(offset + 6)?,
            )
        } else {
            (
                u64::from(r.u32(offset + 4)?),
                u64::from(r.u32(offset + 8)?),
                r.u8(offset + 12)?,
                r.u16(offset + 14)?,
            )
        };
        let name = strtab_offset
            .checked_add(name_idx)
            .map(|o| r.cstr(o))
            .unwrap_or_default();
        Some(RawSymbol {
            name,
            value,
            size,
            info,
            shndx,
        })
    }

    fn owning_section(&self, shndx: u16) -> String {
        match shndx {
            SHN_UNDEF | SHN_ABS | SHN_COMMON => String::new(),
            idx => self.section_name(usize::from(idx)).to_string(),
        }
    }

    /// Named symbols from `.symtab` and `.dynsym`, sorted by address with
    /// duplicates (same name and address) collapsed.
    pub fn symbols(&self) -> Vec<Symbol> {
        let symtab = self.find_section_by_type(SHT_SYMTAB).map(|(i, _)| i);
        let dynsym = self.find_section_by_type(SHT_DYNSYM).map(|(i, _)| i);

        let mut symbols: Vec<Symbol> = Vec::new();
        let mut seen: FxHashMap<(String, u64), usize> = FxHashMap::default();
        for (table, dynamic) in [(symtab, false), (dynsym, true)] {
            let Some(index) = table else { continue };
            for raw in self.raw_symbols(index) {
                let kind = SymbolKind::from_info(raw.info);
                if raw.name.is_empty()
                    || matches!(kind, SymbolKind::File | SymbolKind::Section)
                    || is_mapping_symbol(&raw.name)
                {
                    continue;
                }
                let binding = SymbolBinding::from_info(raw.info);
                let defined = raw.shndx != SHN_UNDEF;
                let exported = defined
                    && binding.is_visible()
                    && (dynamic || dynsym.is_none());
                // .symtab entries come first; a .dynsym twin only adds visibility
                if let Some(&existing) = seen.get(&(raw.name.clone(), raw.value)) {
                    symbols[existing].is_exported |= exported;
                    continue;
                }
                seen.insert((raw.name.clone(), raw.value), symbols.len());
                symbols.push(Symbol {
                    section_name: self.owning_section(raw.shndx),
                    address: raw.value,
                    size: raw.size,
                    kind,
                    binding,
                    is_function: matches!(kind, SymbolKind::Func | SymbolKind::IFunc),
                    is_imported: !defined,
                    is_exported: exported,
                    name: raw.name,
                });
            }
        }

        symbols.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.name.cmp(&b.name)));
        symbols
    }

    /// Undefined `.dynsym` entries with their library and GOT slot.
    pub fn imports(&self) -> Vec<Import> {
        let Some((dynsym_index, _)) = self.find_section_by_type(SHT_DYNSYM) else {
            return Vec::new();
        };
        let raw = self.raw_symbols(dynsym_index);
        let versions = self.symbol_versions(raw.len());
        let libraries = self.version_libraries();
        let slots = self.relocation_slots(dynsym_index);

        raw.iter()
            .enumerate()
            .filter(|(_, sym)| sym.shndx == SHN_UNDEF && !sym.name.is_empty())
            .map(|(index, sym)| {
                let library = versions
                    .get(index)
                    .and_then(|v| libraries.get(&(v & !VERSYM_HIDDEN)))
                    .cloned()
                    .unwrap_or_default();
                Import {
                    name: sym.name.clone(),
                    library,
                    address: slots.get(&index).copied().unwrap_or(0),
                    kind: SymbolKind::from_info(sym.info),
                }
            })
            .collect()
    }

    /// `.gnu.version` entries, one per dynamic symbol.
    fn symbol_versions(&self, count: usize) -> Vec<u16> {
        let Some((_, sh)) = self.find_section_by_type(SHT_GNU_VERSYM) else {
            return Vec::new();
        };
        let base = to_usize(sh.offset);
        (0..count)
            .map_while(|i| self.reader.u16(base.checked_add(i * 2)?))
            .collect()
    }

    /// Version index to library name, from `.gnu.version_r`.
    fn version_libraries(&self) -> FxHashMap<u16, String> {
        let mut map = FxHashMap::default();
        let Some((_, sh)) = self.find_section_by_type(SHT_GNU_VERNEED) else {
            return map;
        };
        let Some(strtab) = self.section_headers.get(sh.link as usize) else {
            return map;
        };
        let r = &self.reader;
        let str_base = to_usize(strtab.offset);
        let end = to_usize(sh.offset.saturating_add(sh.size));
        let mut offset = to_usize(sh.offset);

        // Bounded by sh_info (entry count) and by the section extent.
        for _ in 0..sh.info.max(1) {
            let (Some(cnt), Some(file), Some(aux), Some(next)) = (
                r.u16(offset.saturating_add(2)),
                r.u32(offset.saturating_add(4)),
                r.u32(offset.saturating_add(8)),
                r.u32(offset.saturating_add(12)),
            ) else {
                break;
            };
            let library = r.cstr(str_base.saturating_add(file as usize));

            let mut aux_offset = offset.saturating_add(aux as usize);
            for _ in 0..cnt {
                let (Some(other), Some(aux_next)) = (
                    r.u16(aux_offset.saturating_add(6)),
                    r.u32(aux_offset.saturating_add(12)),
                ) else {
                    break;
                };
                map.insert(other & !VERSYM_HIDDEN, library.clone());
                if aux_next == 0 {
                    break;
                }
                aux_offset = aux_offset.saturating_add(aux_next as usize);
            }

            if next == 0 {
                break;
            }
            offset = offset.saturating_add(next as usize);
            if offset >= end {
                break;
            }
        }
        map
    }

    /// Dynamic symbol index to relocated slot address. PLT relocations take
    /// precedence over data relocations for the same symbol.
    fn relocation_slots(&self, dynsym_index: usize) -> FxHashMap<usize, u64> {
        let mut slots = FxHashMap::default();
        let mut tables: Vec<(usize, &SectionHeader)> = self
            .section_headers
            .iter()
            .enumerate()
            .filter(|(_, sh)| {
                matches!(sh.sh_type, SHT_REL | SHT_RELA) && sh.link as usize == dynsym_index
            })
            .collect();
        // non-PLT first so PLT entries overwrite them
        tables.sort_by_key(|(i, _)| self.section_name(*i).ends_with(".plt"));

        let r = &self.reader;
        for (_, sh) in tables {
            let entsize = match (sh.sh_type == SHT_RELA, r.is_64bit()) {
                (true, true) => ELF64_RELA_SIZE,
                (true, false) => ELF32_RELA_SIZE,
                (false, true) => ELF64_REL_SIZE,
                (false, false) => ELF32_REL_SIZE,
            };
            let base = to_usize(sh.offset);
            for i in 0..to_usize(sh.size) / entsize {
                let offset = base.saturating_add(i * entsize);
                let word = r.word_size();
                let (Some(r_offset), Some(r_info)) =
                    (r.word(offset), r.word(offset.saturating_add(word)))
                else {
                    break;
                };
                let sym = if r.is_64bit() { r_info >> 32 } else { r_info >> 8 };
                if sym != 0 {
                    slots.insert(to_usize(sym), r_offset);
                }
            }
        }
        slots
    }

    /// `DT_NEEDED` entries of the dynamic section.
    pub fn needed_libraries(&self) -> Vec<String> {
        let Some((_, sh)) = self.find_section_by_type(SHT_DYNAMIC) else {
            return Vec::new();
        };
        let Some(strtab) = self.section_headers.get(sh.link as usize) else {
            return Vec::new();
        };
        let r = &self.reader;
        let word = r.word_size();
        let base = to_usize(sh.offset);
        let str_base = to_usize(strtab.offset);

        let mut needed = Vec::new();
        for i in 0..to_usize(sh.size) / (2 * word) {
            let offset = base.saturating_add(i * 2 * word);
            let (Some(tag), Some(value)) = (r.word(offset), r.word(offset.saturating_add(word)))
            else {
                break;
            };
            match tag {
                DT_NULL => break,
                DT_NEEDED => needed.push(r.cstr(str_base.saturating_add(to_usize(value)))),
                _ => {}
            }
        }
        needed
    }

    /// Program interpreter named by `PT_INTERP`.
    pub fn interpreter(&self) -> Option<String> {
        let ph = self.program_headers.iter().find(|ph| ph.p_type == PT_INTERP)?;
        let bytes = self.reader.bytes(to_usize(ph.offset), to_usize(ph.filesz))?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

/// Allocated non-TLS sections with a non-empty address range.
const fn occupies_memory(section: &Section) -> bool {
    section.is_allocated() && !section.is_tls() && section.size > 0
}

/// Validate identification bytes and read the file header.
pub fn parse_header(data: &[u8]) -> Result<ElfHeader> {
    if data.len() < ELF_MAGIC.len() {
        return Err(ElfError::TooSmall);
    }
    if data[..ELF_MAGIC.len()] != ELF_MAGIC {
        return Err(ElfError::InvalidMagic);
    }
    if data.len() < EI_NIDENT {
        return Err(ElfError::TooSmall);
    }

    let class = data[EI_CLASS];
    let encoding = data[EI_DATA];
    let header_size = match class {
        ELF_CLASS_32 => ELF32_HEADER_SIZE,
        ELF_CLASS_64 => ELF64_HEADER_SIZE,
        other => return Err(ElfError::UnsupportedClass(other)),
    };
    if !matches!(encoding, ELF_DATA_LSB | ELF_DATA_MSB) {
        return Err(ElfError::UnsupportedEncoding(encoding));
    }
    if data.len() < header_size {
        return Err(ElfError::HeaderOutOfBounds);
    }

    let r = Reader::new(data, encoding == ELF_DATA_LSB, class == ELF_CLASS_64);
    let field = |value: Option<u64>| value.ok_or(ElfError::HeaderOutOfBounds);
    let half = |offset: usize| r.u16(offset).ok_or(ElfError::HeaderOutOfBounds);

    // e_entry, e_phoff and e_shoff are address sized; later fields shift by class
    let w = r.word_size();
    let tail = 24 + 3 * w;
    Ok(ElfHeader {
        class,
        data: encoding,
        version: data[6],
        abi: data[7],
        e_type: half(16)?,
        machine: half(18)?,
        entry: field(r.word(24))?,
        phoff: field(r.word(24 + w))?,
        shoff: field(r.word(24 + 2 * w))?,
        flags: r.u32(tail).ok_or(ElfError::HeaderOutOfBounds)?,
        ehsize: half(tail + 4)?,
        phentsize: half(tail + 6)?,
        phnum: half(tail + 8)?,
        shentsize: half(tail + 10)?,
        shnum: half(tail + 12)?,
        shstrndx: half(tail + 14)?,
    })
}

fn table_entries(
    reader: &Reader<'_>,
    offset: u64,
    count: u16,
    entsize: u16,
    min_entsize: usize,
    what: &'static str,
) -> Vec<usize> {
    let entsize = usize::from(entsize);
    if count == 0 || offset == 0 {
        return Vec::new();
    }
    if entsize < min_entsize {
        warn!(table = what, entsize, "bad table entry size");
        return Vec::new();
    }
    let base = to_usize(offset);
    let mut offsets = Vec::with_capacity(usize::from(count));
    for i in 0..usize::from(count) {
        let Some(entry) = base.checked_add(i * entsize) else {
            break;
        };
        if reader.bytes(entry, min_entsize).is_none() {
            warn!(table = what, index = i, "table truncated");
            break;
        }
        offsets.push(entry);
    }
    offsets
}

fn parse_program_headers(r: &Reader<'_>, header: &ElfHeader) -> Vec<ProgramHeader> {
    let min = if r.is_64bit() { 56 } else { 32 };
    table_entries(r, header.phoff, header.phnum, header.phentsize, min, "program headers")
        .into_iter()
        .filter_map(|offset| parse_program_header(r, offset))
        .collect()
}

fn parse_program_header(r: &Reader<'_>, offset: usize) -> Option<ProgramHeader> {
    if r.is_64bit() {
        Some(ProgramHeader {
            p_type: r.u32(offset)?,
            flags: r.u32(offset + 4)?,
            offset: r.u64(offset + 8)?,
            vaddr: r.u64(offset + 16)?,
            paddr: r.u64(offset + 24)?,
            filesz: r.u64(offset + 32)?,
            memsz: r.u64(offset + 40)?,
            align: r.u64(offset + 48)?,
        })
    } else {
        Some(ProgramHeader {
            p_type: r.u32(offset)?,
            offset: u64::from(r.u32(offset + 4)?),
            vaddr: u64::from(r.u32(offset + 8)?),
            paddr: u64::from(r.u32(offset + 12)?),
            filesz: u64::from(r.u32(offset + 16)?),
            memsz: u64::from(r.u32(offset + 20)?),
            flags: r.u32(offset + 24)?,
            align: u64::from(r.u32(offset + 28)?),
        })
    }
}

fn parse_section_headers(r: &Reader<'_>, header: &ElfHeader) -> Vec<SectionHeader> {
    let min = if r.is_64bit() { 64 } else { 40 };
    table_entries(r, header.shoff, header.shnum, header.shentsize, min, "section headers")
        .into_iter()
        .filter_map(|offset| parse_section_header(r, offset))
        .collect()
}

fn parse_section_header(r: &Reader<'_>, offset: usize) -> Option<SectionHeader> {
    Some(SectionHeader {
        name: r.u32(offset)?,
        sh_type: r.u32(offset + 4)?,
        flags: r.word(offset + 8)?,
        addr: r.word(offset + 8 + r.word_size())?,
        offset: r.word(offset + 8 + 2 * r.word_size())?,
        size: r.word(offset + 8 + 3 * r.word_size())?,
        link: r.u32(offset + 8 + 4 * r.word_size())?,
        info: r.u32(offset + 12 + 4 * r.word_size())?,
        addralign: r.word(offset + 16 + 4 * r.word_size())?,
        entsize: r.word(offset + 16 + 5 * r.word_size())?,
    })
}

fn resolve_section_names(
    r: &Reader<'_>,
    header: &ElfHeader,
    sections: &[SectionHeader],
) -> Vec<String> {
    let Some(strtab) = sections.get(usize::from(header.shstrndx)) else {
        return vec![String::new(); sections.len()];
    };
    let base = to_usize(strtab.offset);
    sections
        .iter()
        .map(|sh| {
            base.checked_add(sh.name as usize)
                .map(|offset| r.cstr(offset))
                .unwrap_or_default()
        })
        .collect()
}

/// ARM and AArch64 mapping symbols (`$a`, `$t`, `$d`, `$x`, optionally with
/// a `.suffix`) mark instruction set changes, not code or data.
fn is_mapping_symbol(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('$') else {
        return false;
    };
    let mut chars = rest.chars();
    matches!(chars.next(), Some('a' | 'd' | 't' | 'x'))
        && matches!(chars.next(), None | Some('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_symbols() {
        for name in ["$x", "$d", "$a.1", "$t.foo"] {
            assert!(is_mapping_symbol(name), "{name}");
        }
        for name in ["$", "$xyz", "$p", "x", "main"] {
            assert!(!is_mapping_symbol(name), "{name}");
        }
    }

    #[test]
    fn test_invalid_magic() {
        let data = [0x00, 0x00, 0x00, 0x00, 0x02];
        assert!(matches!(parse_header(&data), Err(ElfError::InvalidMagic)));
        assert!(matches!(parse_header(b"MZ\x90\x00"), Err(ElfError::InvalidMagic)));
    }

    #[test]
    fn test_too_small() {
        assert!(matches!(parse_header(&[0x7F, b'E']), Err(ElfError::TooSmall)));
        assert!(matches!(
            parse_header(&[0x7F, b'E', b'L', b'F', 2]),
            Err(ElfError::TooSmall)
        ));
    }

    #[test]
    fn test_truncated_header() {
        let mut data = vec![0u8; 40];
        data[..4].copy_from_slice(&ELF_MAGIC);
        data[EI_CLASS] = ELF_CLASS_64;
        data[EI_DATA] = ELF_DATA_LSB;
        assert!(matches!(parse_header(&data), Err(ElfError::HeaderOutOfBounds)));
    }

    #[test]
    fn test_unsupported_class() {
        let mut data = vec![0u8; 64];
        data[..4].copy_from_slice(&ELF_MAGIC);
        data[EI_CLASS] = 3;
        assert!(matches!(parse_header(&data), Err(ElfError::UnsupportedClass(3))));
    }

    #[test]
    fn test_garbage_tables_do_not_panic() {
        let mut data = vec![0xFFu8; 128];
        data[..4].copy_from_slice(&ELF_MAGIC);
        data[EI_CLASS] = ELF_CLASS_64;
        data[EI_DATA] = ELF_DATA_LSB;
        let elf = ElfFile::parse(&data).unwrap();
        assert!(elf.program_headers.is_empty());
        assert!(elf.section_headers.is_empty());
        assert!(elf.symbols().is_empty());
        assert!(elf.imports().is_empty());
    }
}
