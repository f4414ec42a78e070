//! x86 and x86-64 decode table.

use capstone::arch::x86::{ArchMode, X86OperandType};
use capstone::arch::{self, ArchOperand, BuildsCapstone, BuildsCapstoneSyntax};
use capstone::Capstone;

use super::{ControlFlow, split_operands};
use crate::{Instruction, Result};

pub struct X86Table {
    cs: Capstone,
    mode64: bool,
}

impl X86Table {
    pub fn new(mode64: bool, detail: bool) -> Result<Self> {
        let mode = if mode64 {
            ArchMode::Mode64
        } else {
            ArchMode::Mode32
        };
        let cs = Capstone::new()
            .x86()
            .mode(mode)
            .syntax(arch::x86::ArchSyntax::Intel)
            .detail(detail)
            .build()?;
        Ok(Self { cs, mode64 })
    }

    pub const fn capstone(&self) -> &Capstone {
        &self.cs
    }

    pub const fn is_64bit(&self) -> bool {
        self.mode64
    }
}

pub fn classify(mnemonic: &str, _operands: &str) -> ControlFlow {
    let m = mnemonic.trim_start_matches("bnd ").trim_start_matches("notrack ");
    ControlFlow {
        jump: m.starts_with('j') || m.starts_with("loop") || m == "jrcxz",
        call: m == "call" || m == "lcall",
        ret: matches!(m, "ret" | "retf" | "retn" | "iret" | "iretd" | "iretq"),
    }
}

/// `push rbp`/`push ebp` or a stack-pointer adjusting `sub`.
pub fn is_prologue(insn: &Instruction) -> bool {
    let ops = split_operands(&insn.operands);
    match insn.mnemonic.as_str() {
        "push" => matches!(ops.as_slice(), ["rbp" | "ebp" | "bp"]),
        "sub" => matches!(ops.first(), Some(&("rsp" | "esp" | "sp"))),
        _ => false,
    }
}

pub fn immediate_target(op: &ArchOperand) -> Option<u64> {
    match op {
        ArchOperand::X86Operand(op) => match op.op_type {
            X86OperandType::Imm(imm) => Some(imm as u64),
            _ => None,
        },
        _ => None,
    }
}
