//! Per-architecture decode tables.

pub(crate) mod arm;
pub(crate) mod arm64;
pub(crate) mod x86;

use capstone::arch::ArchOperand;
use capstone::{Capstone, Insn};
use tracing::{debug, trace};

use crate::{Architecture, DecodeError, Instruction, Result};

// capstone generic instruction groups (cs_group_type)
const CS_GRP_JUMP: u8 = 1;
const CS_GRP_CALL: u8 = 2;
const CS_GRP_RET: u8 = 3;
const CS_GRP_IRET: u8 = 5;

/// Control-flow classification of one instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlFlow {
    pub jump: bool,
    pub call: bool,
    pub ret: bool,
}

impl ControlFlow {
    /// A return or call is never also reported as a plain jump.
    const fn normalized(self) -> Self {
        Self {
            jump: self.jump && !self.call && !self.ret,
            call: self.call && !self.ret,
            ret: self.ret,
        }
    }

    const fn union(self, other: Self) -> Self {
        Self {
            jump: self.jump || other.jump,
            call: self.call || other.call,
            ret: self.ret || other.ret,
        }
    }
}

/// Decode table selected by architecture.
pub enum DecodeTable {
    X86(x86::X86Table),
    Arm(arm::ArmTable),
    Arm64(arm64::Arm64Table),
}

impl DecodeTable {
    /// Build the table for `arch`.
    pub fn new(arch: Architecture, detail: bool) -> Result<Self> {
        match arch {
            Architecture::X86 => Ok(Self::X86(x86::X86Table::new(false, detail)?)),
            Architecture::X86_64 => Ok(Self::X86(x86::X86Table::new(true, detail)?)),
            Architecture::Arm => Ok(Self::Arm(arm::ArmTable::new(detail)?)),
            Architecture::Arm64 => Ok(Self::Arm64(arm64::Arm64Table::new(detail)?)),
            Architecture::Unknown => Err(DecodeError::UnsupportedArchitecture(arch)),
        }
    }

    pub const fn architecture(&self) -> Architecture {
        match self {
            Self::X86(table) => {
                if table.is_64bit() {
                    Architecture::X86_64
                } else {
                    Architecture::X86
                }
            }
            Self::Arm(_) => Architecture::Arm,
            Self::Arm64(_) => Architecture::Arm64,
        }
    }

    const fn capstone(&self) -> &Capstone {
        match self {
            Self::X86(table) => table.capstone(),
            Self::Arm(table) => table.capstone(),
            Self::Arm64(table) => table.capstone(),
        }
    }

    fn classify(&self, mnemonic: &str, operands: &str) -> ControlFlow {
        match self {
            Self::X86(_) => x86::classify(mnemonic, operands),
            Self::Arm(_) => arm::classify(mnemonic, operands),
            Self::Arm64(_) => arm64::classify(mnemonic, operands),
        }
    }

    fn immediate_target(&self, op: &ArchOperand) -> Option<u64> {
        match self {
            Self::X86(_) => x86::immediate_target(op),
            Self::Arm(_) => arm::immediate_target(op),
            Self::Arm64(_) => arm64::immediate_target(op),
        }
    }

    /// Decode `bytes` linearly starting at `base`.
    ///
    /// Stops at the first undecodable sequence and returns what was decoded
    /// up to that point.
    pub fn decode(&self, bytes: &[u8], base: u64) -> Vec<Instruction> {
        if bytes.is_empty() {
            return Vec::new();
        }

        let cs = self.capstone();
        let insns = match cs.disasm_all(bytes, base) {
            Ok(insns) => insns,
            Err(err) => {
                debug!(base = format_args!("{base:#x}"), error = %err, "decode failed");
                return Vec::new();
            }
        };

        let mut out = Vec::with_capacity(insns.len());
        let mut decoded = 0usize;
        for insn in insns.iter() {
            if insn.len() == 0 {
                break;
            }
            decoded += insn.len();
            out.push(self.convert(insn));
        }

        if decoded < bytes.len() {
            debug!(
                at = format_args!("{:#x}", base.wrapping_add(decoded as u64)),
                remaining = bytes.len() - decoded,
                "decode truncated"
            );
        }
        out
    }

    fn convert(&self, insn: &Insn<'_>) -> Instruction {
        let mnemonic = insn.mnemonic().unwrap_or_default().to_string();
        let operands = insn.op_str().unwrap_or_default().to_string();
        let mut flow = self.classify(&mnemonic, &operands);
        let mut target = None;

        match self.capstone().insn_detail(insn) {
            Ok(detail) => {
                let mut groups = ControlFlow::default();
                for group in detail.groups() {
                    match group.0 {
                        CS_GRP_JUMP => groups.jump = true,
                        CS_GRP_CALL => groups.call = true,
                        CS_GRP_RET | CS_GRP_IRET => groups.ret = true,
                        _ => {}
                    }
                }
                flow = flow.union(groups).normalized();
                if flow.jump || flow.call {
                    target = detail
                        .arch_detail()
                        .operands()
                        .iter()
                        .rev()
                        .find_map(|op| self.immediate_target(op));
                }
            }
            Err(err) => {
                trace!(error = %err, "no instruction detail");
                flow = flow.normalized();
                if flow.jump || flow.call {
                    target = parse_target_text(&operands);
                }
            }
        }

        Instruction {
            address: insn.address(),
            mnemonic,
            operands,
            bytes: insn.bytes().to_vec(),
            size: insn.len(),
            is_jump: flow.jump,
            is_call: flow.call,
            is_return: flow.ret,
            target_address: target.unwrap_or(0),
        }
    }
}

/// Parse a branch operand printed as a bare address (`0x401000` or `#0x8000`).
fn parse_target_text(operands: &str) -> Option<u64> {
    let text = operands.rsplit(',').next()?.trim();
    let text = text.strip_prefix('#').unwrap_or(text);
    let hex = text.strip_prefix("0x")?;
    u64::from_str_radix(hex, 16).ok()
}

/// Split an operand list on top-level commas, ignoring commas inside
/// brackets and braces.
pub(crate) fn split_operands(operands: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in operands.char_indices() {
        match c {
            '[' | '{' => depth += 1,
            ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(operands[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = operands[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}
