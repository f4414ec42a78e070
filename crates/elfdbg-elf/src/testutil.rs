//! In-memory ELF writer for tests.

use crate::constants::*;

pub struct StrTab {
    data: Vec<u8>,
}

impl StrTab {
    pub fn new() -> Self {
        Self { data: vec![0] }
    }

    pub fn add(&mut self, s: &str) -> u32 {
        let offset = u32::try_from(self.data.len()).unwrap();
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        offset
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

struct BuiltSection {
    name: String,
    sh_type: u32,
    flags: u64,
    addr: u64,
    data: Vec<u8>,
    size: u64,
    link: u32,
    info: u32,
    entsize: u64,
}

pub struct ElfBuilder {
    class64: bool,
    little: bool,
    machine: u16,
    pub entry: u64,
    pub e_type: u16,
    sections: Vec<BuiltSection>,
    segments: Vec<(usize, u32)>,
}

impl ElfBuilder {
    pub const fn new(class64: bool, little: bool, machine: u16) -> Self {
        Self {
            class64,
            little,
            machine,
            entry: 0,
            e_type: ET_EXEC,
            sections: Vec::new(),
            segments: Vec::new(),
        }
    }

    /// Add a section and return its section header index.
    pub fn section(&mut self, name: &str, sh_type: u32, flags: u64, addr: u64, data: Vec<u8>) -> usize {
        self.sections.push(BuiltSection {
            name: name.to_string(),
            sh_type,
            flags,
            addr,
            size: data.len() as u64,
            data,
            link: 0,
            info: 0,
            entsize: 0,
        });
        self.sections.len()
    }

    pub fn link(&mut self, index: usize, link: usize, info: u32, entsize: u64) {
        let s = &mut self.sections[index - 1];
        s.link = u32::try_from(link).unwrap();
        s.info = info;
        s.entsize = entsize;
    }

    pub fn set_size(&mut self, index: usize, size: u64) {
        self.sections[index - 1].size = size;
    }

    /// Map a section with a `PT_LOAD` program header.
    pub fn load_segment(&mut self, index: usize, flags: u32) {
        self.segments.push((index, flags));
    }

    fn u16(&self, out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&if self.little { v.to_le_bytes() } else { v.to_be_bytes() });
    }

    fn u32(&self, out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&if self.little { v.to_le_bytes() } else { v.to_be_bytes() });
    }

    fn u64(&self, out: &mut Vec<u8>, v: u64) {
        out.extend_from_slice(&if self.little { v.to_le_bytes() } else { v.to_be_bytes() });
    }

    fn word(&self, out: &mut Vec<u8>, v: u64) {
        if self.class64 {
            self.u64(out, v);
        } else {
            self.u32(out, u32::try_from(v).unwrap());
        }
    }

    pub fn half_bytes(&self, values: &[u16]) -> Vec<u8> {
        let mut out = Vec::new();
        for &v in values {
            self.u16(&mut out, v);
        }
        out
    }

    /// Symbol table entry.
    pub fn sym(&self, name: u32, value: u64, size: u64, info: u8, shndx: u16) -> Vec<u8> {
        let mut out = Vec::new();
        self.u32(&mut out, name);
        if self.class64 {
            out.push(info);
            out.push(0);
            self.u16(&mut out, shndx);
            self.u64(&mut out, value);
            self.u64(&mut out, size);
        } else {
            self.word(&mut out, value);
            self.word(&mut out, size);
            out.push(info);
            out.push(0);
            self.u16(&mut out, shndx);
        }
        out
    }

    pub fn rela(&self, offset: u64, sym: u64, r_type: u64, addend: u64) -> Vec<u8> {
        let info = if self.class64 {
            (sym << 32) | r_type
        } else {
            (sym << 8) | r_type
        };
        let mut out = Vec::new();
        self.word(&mut out, offset);
        self.word(&mut out, info);
        self.word(&mut out, addend);
        out
    }

    pub fn dyn_entry(&self, tag: u64, value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        self.word(&mut out, tag);
        self.word(&mut out, value);
        out
    }

    /// One `Elf_Verneed` followed by one `Elf_Vernaux`.
    pub fn verneed(&self, file: u32, version_name: u32, version_index: u16) -> Vec<u8> {
        let mut out = Vec::new();
        self.u16(&mut out, 1);
        self.u16(&mut out, 1);
        self.u32(&mut out, file);
        self.u32(&mut out, 16);
        self.u32(&mut out, 0);
        self.u32(&mut out, 0x0d69_6910);
        self.u16(&mut out, 0);
        self.u16(&mut out, version_index);
        self.u32(&mut out, version_name);
        self.u32(&mut out, 0);
        out
    }

    pub fn build(&self) -> Vec<u8> {
        let (ehsize, phentsize, shentsize) = if self.class64 { (64, 56, 64) } else { (52, 32, 40) };

        let mut shstrtab = StrTab::new();
        let names: Vec<u32> = self.sections.iter().map(|s| shstrtab.add(&s.name)).collect();
        let shstrtab_name = shstrtab.add(".shstrtab");
        let shstrtab = shstrtab.into_bytes();

        let mut offset = ehsize + self.segments.len() * phentsize;
        let mut offsets = Vec::new();
        for s in &self.sections {
            offset = offset.next_multiple_of(8);
            offsets.push(offset);
            if s.sh_type != SHT_NOBITS {
                offset += s.data.len();
            }
        }
        let shstrtab_offset = offset;
        offset += shstrtab.len();
        let shoff = offset.next_multiple_of(8);

        let mut out = Vec::new();
        out.extend_from_slice(&ELF_MAGIC);
        out.push(if self.class64 { ELF_CLASS_64 } else { ELF_CLASS_32 });
        out.push(if self.little { ELF_DATA_LSB } else { ELF_DATA_MSB });
        out.push(1);
        out.resize(EI_NIDENT, 0);
        self.u16(&mut out, self.e_type);
        self.u16(&mut out, self.machine);
        self.u32(&mut out, 1);
        self.word(&mut out, self.entry);
        self.word(&mut out, if self.segments.is_empty() { 0 } else { ehsize as u64 });
        self.word(&mut out, shoff as u64);
        self.u32(&mut out, 0);
        self.u16(&mut out, u16::try_from(ehsize).unwrap());
        self.u16(&mut out, u16::try_from(phentsize).unwrap());
        self.u16(&mut out, u16::try_from(self.segments.len()).unwrap());
        self.u16(&mut out, u16::try_from(shentsize).unwrap());
        self.u16(&mut out, u16::try_from(self.sections.len() + 2).unwrap());
        self.u16(&mut out, u16::try_from(self.sections.len() + 1).unwrap());
        assert_eq!(out.len(), ehsize);

        for &(index, flags) in &self.segments {
            let s = &self.sections[index - 1];
            let file_offset = offsets[index - 1] as u64;
            let filesz = if s.sh_type == SHT_NOBITS { 0 } else { s.data.len() as u64 };
            self.u32(&mut out, PT_LOAD);
            if self.class64 {
                self.u32(&mut out, flags);
            }
            self.word(&mut out, file_offset);
            self.word(&mut out, s.addr);
            self.word(&mut out, s.addr);
            self.word(&mut out, filesz);
            self.word(&mut out, s.size);
            if !self.class64 {
                self.u32(&mut out, flags);
            }
            self.word(&mut out, 0x1000);
        }

        for (s, &off) in self.sections.iter().zip(&offsets) {
            out.resize(off, 0);
            if s.sh_type != SHT_NOBITS {
                out.extend_from_slice(&s.data);
            }
        }
        out.resize(shstrtab_offset, 0);
        out.extend_from_slice(&shstrtab);
        out.resize(shoff, 0);

        // null section header
        out.resize(shoff + shentsize, 0);
        for (i, s) in self.sections.iter().enumerate() {
            self.section_header(
                &mut out,
                names[i],
                s.sh_type,
                s.flags,
                s.addr,
                offsets[i] as u64,
                s.size,
                s.link,
                s.info,
                s.entsize,
            );
        }
        self.section_header(
            &mut out,
            shstrtab_name,
            SHT_STRTAB,
            0,
            0,
            shstrtab_offset as u64,
            shstrtab.len() as u64,
            0,
            0,
            0,
        );
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn section_header(
        &self,
        out: &mut Vec<u8>,
        name: u32,
        sh_type: u32,
        flags: u64,
        addr: u64,
        offset: u64,
        size: u64,
        link: u32,
        info: u32,
        entsize: u64,
    ) {
        self.u32(out, name);
        self.u32(out, sh_type);
        self.word(out, flags);
        self.word(out, addr);
        self.word(out, offset);
        self.word(out, size);
        self.u32(out, link);
        self.u32(out, info);
        self.word(out, 8);
        self.word(out, entsize);
    }
}

/// A small dynamically linked x86-64 executable.
///
/// `_start` at 0x401000 calls `main` at 0x40100b; `main` is exported and
/// `puts` is imported from `libc.so.6` through a GOT slot at 0x403018.
/// `_start` also carries a local `.Lepilogue` label and an AArch64-style `$x`
/// mapping symbol.
pub fn sample_x86_64() -> Vec<u8> {
    let mut b = ElfBuilder::new(true, true, EM_X86_64);
    b.entry = 0x40_1000;

    #[rustfmt::skip]
    let code = vec![
        // _start
        0x55,                         // push rbp
        0x48, 0x89, 0xe5,             // mov rbp, rsp
        0xe8, 0x02, 0x00, 0x00, 0x00, // call main
        0x5d,                         // pop rbp
        0xc3,                         // ret
        // main
        0x55,                         // push rbp
        0x48, 0x89, 0xe5,             // mov rbp, rsp
        0xb8, 0x00, 0x00, 0x00, 0x00, // mov eax, 0
        0x5d,                         // pop rbp
        0xc3,                         // ret
    ];
    let text = b.section(".text", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 0x40_1000, code);
    b.load_segment(text, PF_R | PF_X);
    b.section(".rodata", SHT_PROGBITS, SHF_ALLOC, 0x40_2000, b"hello\0".to_vec());
    b.section(".got.plt", SHT_PROGBITS, SHF_ALLOC | SHF_WRITE, 0x40_3000, vec![0; 32]);
    let bss = b.section(".bss", SHT_NOBITS, SHF_ALLOC | SHF_WRITE, 0x40_4000, Vec::new());
    b.set_size(bss, 0x10);

    let mut dynstr = StrTab::new();
    let libc = dynstr.add("libc.so.6");
    let puts_dyn = dynstr.add("puts");
    let main_dyn = dynstr.add("main");
    let glibc = dynstr.add("GLIBC_2.2.5");
    let dynstr_idx = b.section(".dynstr", SHT_STRTAB, SHF_ALLOC, 0x40_0300, dynstr.into_bytes());

    let global_func = (STB_GLOBAL << 4) | STT_FUNC;
    let text_idx = u16::try_from(text).unwrap();
    let mut dynsym = vec![0u8; ELF64_SYM_SIZE];
    dynsym.extend(b.sym(puts_dyn, 0, 0, global_func, SHN_UNDEF));
    dynsym.extend(b.sym(main_dyn, 0x40_100b, 11, global_func, text_idx));
    let dynsym_idx = b.section(".dynsym", SHT_DYNSYM, SHF_ALLOC, 0x40_0200, dynsym);
    b.link(dynsym_idx, dynstr_idx, 1, ELF64_SYM_SIZE as u64);

    let versym = b.half_bytes(&[0, 2, 1]);
    let versym_idx = b.section(".gnu.version", SHT_GNU_VERSYM, SHF_ALLOC, 0x40_0400, versym);
    b.link(versym_idx, dynsym_idx, 0, 2);

    let verneed = b.verneed(libc, glibc, 2);
    let verneed_idx = b.section(".gnu.version_r", SHT_GNU_VERNEED, SHF_ALLOC, 0x40_0420, verneed);
    b.link(verneed_idx, dynstr_idx, 1, 0);

    // R_X86_64_JUMP_SLOT
    let rela = b.rela(0x40_3018, 1, 7, 0);
    let rela_idx = b.section(".rela.plt", SHT_RELA, SHF_ALLOC | SHF_INFO_LINK, 0x40_0480, rela);
    b.link(rela_idx, dynsym_idx, 3, ELF64_RELA_SIZE as u64);

    let mut dynamic = b.dyn_entry(DT_NEEDED, u64::from(libc));
    dynamic.extend(b.dyn_entry(DT_NULL, 0));
    let dynamic_idx = b.section(".dynamic", SHT_DYNAMIC, SHF_ALLOC | SHF_WRITE, 0x40_3e00, dynamic);
    b.link(dynamic_idx, dynstr_idx, 0, 16);

    let mut strtab = StrTab::new();
    let start = strtab.add("_start");
    let main = strtab.add("main");
    let counter = strtab.add("counter");
    let puts = strtab.add("puts");
    let label = strtab.add(".Lepilogue");
    let mapping = strtab.add("$x");
    let strtab_idx = b.section(".strtab", SHT_STRTAB, 0, 0, strtab.into_bytes());

    let mut symtab = vec![0u8; ELF64_SYM_SIZE];
    symtab.extend(b.sym(start, 0x40_1000, 11, global_func, text_idx));
    symtab.extend(b.sym(main, 0x40_100b, 11, global_func, text_idx));
    symtab.extend(b.sym(
        counter,
        0x40_4000,
        8,
        (STB_LOCAL << 4) | STT_OBJECT,
        u16::try_from(bss).unwrap(),
    ));
    symtab.extend(b.sym(puts, 0, 0, global_func, SHN_UNDEF));
    // zero-size labels inside `_start`
    let local_notype = (STB_LOCAL << 4) | STT_NOTYPE;
    symtab.extend(b.sym(label, 0x40_1009, 0, local_notype, text_idx));
    symtab.extend(b.sym(mapping, 0x40_1000, 0, local_notype, text_idx));
    let symtab_idx = b.section(".symtab", SHT_SYMTAB, 0, 0, symtab);
    b.link(symtab_idx, strtab_idx, 3, ELF64_SYM_SIZE as u64);

    b.build()
}
