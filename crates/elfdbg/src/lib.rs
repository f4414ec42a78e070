//! elfdbg - ELF inspection and live debugging
//!
//! Ties the workspace together: [`Analysis`] loads an ELF image, decodes its
//! executable segment and recovers functions and cross-references, and
//! [`DebugSession`] drives a traced process while resolving addresses
//! against that analysis.
//!
//! # Example
//!
//! ```ignore
//! use elfdbg::{Analysis, AnalysisOptions};
//!
//! let analysis = Analysis::from_path("/bin/true", &AnalysisOptions::default())?;
//! for function in analysis.functions().functions() {
//!     println!("{:#x} {}", function.start_address, function.name);
//! }
//! ```

// Re-export from sub-crates
pub use elfdbg_cfg::{AnalyzeExt, Function, FunctionTable, XrefIndex, default_function_name};
pub use elfdbg_elf::{
    CodeSegment, DEFAULT_MAX_CODE_BYTES, ElfError, ElfImage, ElfInfo, ElfLoader, Export, Import,
    LoadOptions, ProgramHeader, Section, Symbol, SymbolBinding, SymbolKind,
};
pub use elfdbg_isa::{
    Architecture, DecodeError, DecodeOptions, FoundString, Instruction, InstructionDecoder,
    format_hex_bytes,
};
pub use elfdbg_trace::{
    Breakpoint, BreakpointKind, BreakpointSpec, DebuggerConfig, MemoryRegion, ProcessDebugger,
    ProcessState, Register, SharedDebugger, StackFrame, StopReason, TraceError,
};

mod analysis;
mod error;
pub mod metrics;
mod project;
mod session;

pub use analysis::*;
pub use error::{Error, Result};
pub use project::ProjectFile;
pub use session::*;

/// Parse an address written as `0x`-prefixed or bare hexadecimal.
pub fn parse_address(text: &str) -> Option<u64> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x401000"), Some(0x40_1000));
        assert_eq!(parse_address("401000"), Some(0x40_1000));
        assert_eq!(parse_address(" 0XfF "), Some(0xff));
        assert_eq!(parse_address("0x"), None);
        assert_eq!(parse_address("main"), None);
        assert_eq!(parse_address(""), None);
    }
}
