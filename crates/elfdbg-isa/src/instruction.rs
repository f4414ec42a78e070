//! Decoded instruction record.

use std::fmt::{self, Write};

/// A single decoded machine instruction.
///
/// Produced by the decoder and never mutated afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Instruction {
    pub address: u64,
    pub mnemonic: String,
    /// Operand text as printed by the decoder (Intel syntax on x86).
    pub operands: String,
    pub bytes: Vec<u8>,
    /// Decoder-reported size in bytes. Never zero.
    pub size: usize,
    pub is_jump: bool,
    pub is_call: bool,
    pub is_return: bool,
    /// Direct branch target, or 0 when the target is not statically known.
    pub target_address: u64,
}

impl Instruction {
    /// Address of the byte after this instruction.
    pub const fn end_address(&self) -> u64 {
        self.address.wrapping_add(self.size as u64)
    }

    /// True for jumps, calls and returns.
    pub const fn is_control_flow(&self) -> bool {
        self.is_jump || self.is_call || self.is_return
    }

    /// True when the instruction transfers control to a resolved address.
    pub const fn has_direct_target(&self) -> bool {
        (self.is_jump || self.is_call) && self.target_address != 0
    }

    /// Instruction bytes as space-separated hex.
    pub fn hex_bytes(&self) -> String {
        format_hex_bytes(&self.bytes)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operands.is_empty() {
            write!(f, "{:#x}: {}", self.address, self.mnemonic)
        } else {
            write!(f, "{:#x}: {} {}", self.address, self.mnemonic, self.operands)
        }
    }
}

/// Format bytes as lowercase hex pairs separated by spaces.
pub fn format_hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_address() {
        let insn = Instruction {
            address: 0x1000,
            mnemonic: "call".into(),
            operands: "0x2000".into(),
            bytes: vec![0xe8, 0xfb, 0x0f, 0x00, 0x00],
            size: 5,
            is_call: true,
            target_address: 0x2000,
            ..Default::default()
        };
        assert_eq!(insn.end_address(), 0x1005);
        assert!(insn.has_direct_target());
        assert_eq!(insn.to_string(), "0x1000: call 0x2000");
        assert_eq!(insn.hex_bytes(), "e8 fb 0f 00 00");
    }
}
