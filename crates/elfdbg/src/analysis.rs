//! Static analysis of one ELF image.

use std::path::Path;
use std::time::Instant;

use elfdbg_cfg::{Function, FunctionTable};
use elfdbg_elf::{ElfImage, LoadOptions};
use elfdbg_isa::{Architecture, DecodeOptions, Instruction, InstructionDecoder, scan_strings};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{Error, Result, metrics, parse_address};

/// Bounds and decoder settings for [`Analysis::from_path`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub load: LoadOptions,
    pub decode: DecodeOptions,
}

impl AnalysisOptions {
    #[must_use]
    pub const fn with_load(mut self, load: LoadOptions) -> Self {
        self.load = load;
        self
    }

    #[must_use]
    pub const fn with_decode(mut self, decode: DecodeOptions) -> Self {
        self.decode = decode;
        self
    }
}

/// A printable string found in an allocated section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocatedString {
    pub address: u64,
    pub section: String,
    pub text: String,
}

/// Loaded image plus its decoded code segment and recovered functions.
pub struct Analysis {
    image: ElfImage,
    decoder: InstructionDecoder,
    instructions: Vec<Instruction>,
    functions: FunctionTable,
}

impl Analysis {
    /// Load `path`, decode its executable segment and recover functions.
    pub fn from_path(path: impl AsRef<Path>, options: &AnalysisOptions) -> Result<Self> {
        let image = ElfImage::from_path(path, &options.load)?;
        Self::from_image(image, options.decode)
    }

    /// Analyze an already parsed image.
    ///
    /// An image without an executable segment yields an empty instruction
    /// stream rather than an error.
    pub fn from_image(image: ElfImage, decode: DecodeOptions) -> Result<Self> {
        let start = Instant::now();
        let mut decoder = InstructionDecoder::with_options(decode);
        decoder.initialize(image.detect_architecture())?;

        let instructions = match image.code_segment() {
            Some(code) => decoder.disassemble(&code.data, code.address),
            None => {
                warn!("image has no executable segment, nothing to decode");
                Vec::new()
            }
        };
        let code_len = image.get_code_section_data().len();
        let decoded_len: usize = instructions.iter().map(|insn| insn.size).sum();
        if decoded_len < code_len {
            debug!(
                decoded = decoded_len,
                total = code_len,
                "decode stopped before the end of the code segment"
            );
        }

        let mut functions = FunctionTable::build(decoder.architecture(), &instructions);
        functions.name_with(|addr| symbol_name_at(&image, addr));

        let elapsed = start.elapsed().as_secs_f64();
        metrics::record_analysis(
            decoder.architecture_name(),
            instructions.len(),
            functions.len(),
            elapsed,
        );
        info!(
            arch = %decoder.architecture(),
            instructions = instructions.len(),
            functions = functions.len(),
            "analysis complete"
        );

        Ok(Self {
            image,
            decoder,
            instructions,
            functions,
        })
    }

    pub const fn image(&self) -> &ElfImage {
        &self.image
    }

    pub const fn decoder(&self) -> &InstructionDecoder {
        &self.decoder
    }

    pub fn architecture(&self) -> Architecture {
        self.decoder.architecture()
    }

    /// Every instruction decoded from the executable segment, in address order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub const fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// Decoded instructions inside `[start, end)`.
    pub fn instructions_in(&self, start: u64, end: u64) -> &[Instruction] {
        let lo = self.instructions.partition_point(|insn| insn.address < start);
        let hi = self.instructions.partition_point(|insn| insn.address < end);
        &self.instructions[lo..hi.max(lo)]
    }

    /// First `count` instructions at or after `start`.
    pub fn instructions_from(&self, start: u64, count: usize) -> &[Instruction] {
        let lo = self.instructions.partition_point(|insn| insn.address < start);
        let hi = lo.saturating_add(count).min(self.instructions.len());
        &self.instructions[lo..hi]
    }

    pub fn function_at(&self, addr: u64) -> Option<&Function> {
        self.functions.function_at(addr)
    }

    /// Addresses of direct jumps and calls to `target`.
    pub fn xrefs_to(&self, target: u64) -> &[u64] {
        self.functions.xrefs().references_to(target)
    }

    /// Unique hexadecimal constants in operand text.
    pub fn constants(&self) -> Vec<u64> {
        self.decoder.find_constants(&self.instructions)
    }

    /// `symbol+0xoff` for `addr` from the symbol table or, failing that, the
    /// recovered function containing it.
    pub fn symbolize(&self, addr: u64) -> Option<String> {
        if let Some(sym) = self
            .image
            .find_symbol_by_address(addr)
            .filter(|s| !s.name.is_empty())
        {
            return Some(with_offset(&sym.name, addr - sym.address));
        }
        self.functions
            .function_at(addr)
            .map(|f| with_offset(&f.name, addr - f.start_address))
    }

    /// [`symbolize`](Self::symbolize), or the bare address.
    pub fn describe_address(&self, addr: u64) -> String {
        self.symbolize(addr)
            .unwrap_or_else(|| format!("{addr:#x}"))
    }

    /// Address of a symbol or recovered function name with an optional
    /// `+offset`.
    pub fn resolve_symbol(&self, location: &str) -> Option<u64> {
        let location = location.trim();
        let (base, offset) = match location.split_once('+') {
            Some((base, off)) => (base.trim(), parse_address(off)?),
            None => (location, 0),
        };
        self.image
            .find_symbol(base)
            .filter(|s| s.address != 0)
            .map(|s| s.address)
            .or_else(|| self.functions.function_by_name(base).map(|f| f.start_address))
            .map(|addr| addr.wrapping_add(offset))
    }

    /// [`resolve_symbol`](Self::resolve_symbol), falling back to a hex address.
    pub fn resolve(&self, location: &str) -> Result<u64> {
        self.resolve_symbol(location)
            .or_else(|| parse_address(location))
            .ok_or_else(|| Error::UnknownSymbol(location.trim().to_string()))
    }

    /// Printable strings in allocated sections with their virtual addresses.
    pub fn strings(&self) -> Vec<LocatedString> {
        let min_len = self.decoder.options().min_string_len;
        let mut found: Vec<LocatedString> = self
            .image
            .get_sections()
            .par_iter()
            .filter(|s| s.is_allocated() && !s.is_executable() && !s.data.is_empty())
            .flat_map_iter(|section| {
                scan_strings(&section.data, min_len)
                    .into_iter()
                    .map(move |s| LocatedString {
                        address: section.virtual_address + s.offset as u64,
                        section: section.name.clone(),
                        text: s.text,
                    })
            })
            .collect();
        found.sort_by_key(|s| s.address);
        found
    }
}

fn with_offset(name: &str, offset: u64) -> String {
    if offset == 0 {
        name.to_string()
    } else {
        format!("{name}+{offset:#x}")
    }
}

/// Name of the symbol starting exactly at `addr`.
fn symbol_name_at(image: &ElfImage, addr: u64) -> Option<String> {
    image
        .find_symbol_by_address(addr)
        .filter(|s| s.address == addr && !s.name.is_empty())
        .map(|s| s.name.clone())
}
