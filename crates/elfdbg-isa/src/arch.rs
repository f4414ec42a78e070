//! Architecture tags shared by the ELF loader, decoder and tracer.

use std::fmt;

use crate::Instruction;
use crate::tables::{arm, arm64, x86};

/// Instruction set architecture of a binary or a decode table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Architecture {
    X86,
    X86_64,
    Arm,
    Arm64,
    #[default]
    Unknown,
}

impl Architecture {
    /// Architecture of the machine this code runs on.
    pub const fn host() -> Self {
        if cfg!(target_arch = "x86_64") {
            Self::X86_64
        } else if cfg!(target_arch = "x86") {
            Self::X86
        } else if cfg!(target_arch = "aarch64") {
            Self::Arm64
        } else if cfg!(target_arch = "arm") {
            Self::Arm
        } else {
            Self::Unknown
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::X86_64 => "x86-64",
            Self::Arm => "ARM",
            Self::Arm64 => "ARM64",
            Self::Unknown => "Unknown",
        }
    }

    /// Pointer width in bytes.
    pub const fn pointer_size(self) -> usize {
        match self {
            Self::X86 | Self::Arm => 4,
            Self::X86_64 | Self::Arm64 | Self::Unknown => 8,
        }
    }

    pub const fn is_64bit(self) -> bool {
        matches!(self, Self::X86_64 | Self::Arm64)
    }

    pub const fn is_x86(self) -> bool {
        matches!(self, Self::X86 | Self::X86_64)
    }

    /// Encoding of the software breakpoint instruction.
    pub const fn trap_instruction(self) -> &'static [u8] {
        match self {
            Self::X86 | Self::X86_64 | Self::Unknown => &[0xCC],
            // udf #16 (the Linux ARM breakpoint)
            Self::Arm => &[0xF0, 0x01, 0xF0, 0xE7],
            // brk #0
            Self::Arm64 => &[0x00, 0x00, 0x20, 0xD4],
        }
    }

    /// Bytes the kernel has advanced the instruction pointer past a trap
    /// when it reports the stop.
    pub const fn trap_pc_adjust(self) -> u64 {
        match self {
            Self::X86 | Self::X86_64 | Self::Unknown => 1,
            Self::Arm | Self::Arm64 => 0,
        }
    }

    /// Check whether `insn` is a function-entry idiom on this architecture.
    pub fn is_prologue(self, insn: &Instruction) -> bool {
        match self {
            Self::X86 | Self::X86_64 => x86::is_prologue(insn),
            Self::Arm => arm::is_prologue(insn),
            Self::Arm64 => arm64::is_prologue(insn),
            Self::Unknown => false,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x86" | "i386" | "i686" => Ok(Self::X86),
            "x64" | "x86-64" | "x86_64" | "amd64" => Ok(Self::X86_64),
            "arm" | "arm32" => Ok(Self::Arm),
            "arm64" | "aarch64" => Ok(Self::Arm64),
            other => Err(format!("unknown architecture: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_sizes() {
        assert_eq!(Architecture::X86.pointer_size(), 4);
        assert_eq!(Architecture::Arm.pointer_size(), 4);
        assert_eq!(Architecture::X86_64.pointer_size(), 8);
        assert_eq!(Architecture::Arm64.pointer_size(), 8);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("x64".parse::<Architecture>(), Ok(Architecture::X86_64));
        assert_eq!("AArch64".parse::<Architecture>(), Ok(Architecture::Arm64));
        assert!("mips".parse::<Architecture>().is_err());
    }

    #[test]
    fn test_x86_trap() {
        assert_eq!(Architecture::X86_64.trap_instruction(), &[0xCC]);
        assert_eq!(Architecture::X86_64.trap_pc_adjust(), 1);
    }
}
