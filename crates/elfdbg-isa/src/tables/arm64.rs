//! AArch64 (A64) decode table.

use capstone::arch::arm64::{ArchMode, Arm64OperandType};
use capstone::arch::{ArchOperand, BuildsCapstone};
use capstone::Capstone;

use super::{ControlFlow, split_operands};
use crate::{Instruction, Result};

pub struct Arm64Table {
    cs: Capstone,
}

impl Arm64Table {
    pub fn new(detail: bool) -> Result<Self> {
        let cs = Capstone::new()
            .arm64()
            .mode(ArchMode::Arm)
            .detail(detail)
            .build()?;
        Ok(Self { cs })
    }

    pub const fn capstone(&self) -> &Capstone {
        &self.cs
    }
}

pub fn classify(mnemonic: &str, _operands: &str) -> ControlFlow {
    ControlFlow {
        jump: matches!(mnemonic, "b" | "br" | "cbz" | "cbnz" | "tbz" | "tbnz")
            || mnemonic.starts_with("b."),
        call: matches!(mnemonic, "bl" | "blr"),
        ret: matches!(mnemonic, "ret" | "retaa" | "retab" | "eret"),
    }
}

/// `stp x29, x30, [sp, ...]` or `str x30, [sp, ...]`.
pub fn is_prologue(insn: &Instruction) -> bool {
    let ops = split_operands(&insn.operands);
    match insn.mnemonic.as_str() {
        "stp" => ops.iter().take(2).any(|reg| *reg == "x30" || *reg == "lr"),
        "str" => ops.first().is_some_and(|reg| *reg == "x30" || *reg == "lr"),
        _ => false,
    }
}

pub fn immediate_target(op: &ArchOperand) -> Option<u64> {
    match op {
        ArchOperand::Arm64Operand(op) => match op.op_type {
            Arm64OperandType::Imm(imm) => Some(imm as u64),
            _ => None,
        },
        _ => None,
    }
}
