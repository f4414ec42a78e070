//! Architecture-selecting instruction decoder.

use tracing::{debug, warn};

use crate::strings::{self, scan_strings};
use crate::{Architecture, DecodeError, DecodeTable, Instruction, Result};

/// Decoder configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Minimum printable run reported by [`InstructionDecoder::extract_strings`].
    pub min_string_len: usize,
    /// Request capstone instruction detail (groups and operands).
    pub detail: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            min_string_len: strings::MIN_STRING_LEN,
            detail: true,
        }
    }
}

impl DecodeOptions {
    #[must_use]
    pub const fn with_min_string_len(mut self, len: usize) -> Self {
        self.min_string_len = len;
        self
    }

    #[must_use]
    pub const fn with_detail(mut self, detail: bool) -> Self {
        self.detail = detail;
        self
    }
}

/// Decodes raw bytes for one architecture at a time.
///
/// Construct with [`InstructionDecoder::new`] and call
/// [`initialize`](Self::initialize) before decoding. Decoding an
/// uninitialized decoder yields no instructions.
#[derive(Default)]
pub struct InstructionDecoder {
    table: Option<DecodeTable>,
    options: DecodeOptions,
    last_error: Option<String>,
}

impl InstructionDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: DecodeOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Create and initialize a decoder in one step.
    pub fn for_architecture(arch: Architecture) -> Result<Self> {
        let mut decoder = Self::new();
        decoder.initialize(arch)?;
        Ok(decoder)
    }

    /// Select the decode table for `arch`, dropping any previous one.
    pub fn initialize(&mut self, arch: Architecture) -> Result<()> {
        self.table = None;
        match DecodeTable::new(arch, self.options.detail) {
            Ok(table) => {
                debug!(arch = %arch, "decoder initialized");
                self.table = Some(table);
                Ok(())
            }
            Err(err) => {
                warn!(arch = %arch, error = %err, "decoder initialization failed");
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub const fn is_initialized(&self) -> bool {
        self.table.is_some()
    }

    pub fn architecture(&self) -> Architecture {
        self.table
            .as_ref()
            .map_or(Architecture::Unknown, DecodeTable::architecture)
    }

    pub fn architecture_name(&self) -> &'static str {
        self.architecture().name()
    }

    pub const fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Most recent failure message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn table(&self) -> Result<&DecodeTable> {
        self.table.as_ref().ok_or(DecodeError::NotInitialized)
    }

    /// Decode `bytes` as a linear stream starting at `base`.
    ///
    /// Undecodable input truncates the stream; the instructions decoded so
    /// far are returned.
    pub fn disassemble(&self, bytes: &[u8], base: u64) -> Vec<Instruction> {
        match self.table() {
            Ok(table) => table.decode(bytes, base),
            Err(err) => {
                debug!(error = %err, "disassemble skipped");
                Vec::new()
            }
        }
    }

    /// Decode the part of `bytes` (loaded at `base`) covering `[start, end)`.
    pub fn disassemble_range(
        &self,
        bytes: &[u8],
        base: u64,
        start: u64,
        end: u64,
    ) -> Vec<Instruction> {
        let limit = base.saturating_add(bytes.len() as u64);
        let start = start.max(base);
        let end = end.min(limit);
        if start >= end {
            return Vec::new();
        }
        let (Ok(lo), Ok(hi)) = (
            usize::try_from(start - base),
            usize::try_from(end - base),
        ) else {
            return Vec::new();
        };
        self.disassemble(&bytes[lo..hi], start)
    }

    /// Decode the single instruction at the start of `bytes`.
    pub fn decode_one(&self, bytes: &[u8], address: u64) -> Option<Instruction> {
        let table = self.table().ok()?;
        // longest encodings: 15 bytes on x86, 4 on ARM
        let window = &bytes[..bytes.len().min(16)];
        table.decode(window, address).into_iter().next()
    }

    /// Unique hexadecimal constants in operand text.
    pub fn find_constants(&self, instructions: &[Instruction]) -> Vec<u64> {
        strings::find_constants(instructions)
    }

    /// Printable ASCII runs at least `min_string_len` bytes long.
    pub fn extract_strings(&self, bytes: &[u8]) -> Vec<String> {
        scan_strings(bytes, self.options.min_string_len)
            .into_iter()
            .map(|s| s.text)
            .collect()
    }
}
