//! 32-bit ARM (A32) decode table.

use capstone::arch::arm::{ArchMode, ArmOperandType};
use capstone::arch::{ArchOperand, BuildsCapstone};
use capstone::Capstone;

use super::{ControlFlow, split_operands};
use crate::{Instruction, Result};

const CONDITION_CODES: [&str; 17] = [
    "eq", "ne", "cs", "hs", "cc", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt",
    "le", "al",
];

pub struct ArmTable {
    cs: Capstone,
}

impl ArmTable {
    pub fn new(detail: bool) -> Result<Self> {
        let cs = Capstone::new()
            .arm()
            .mode(ArchMode::Arm)
            .detail(detail)
            .build()?;
        Ok(Self { cs })
    }

    pub const fn capstone(&self) -> &Capstone {
        &self.cs
    }
}

/// Strip a trailing condition code (`bne` -> `b`, `blxeq` -> `blx`, `bxle` -> `bx`).
fn base_mnemonic(mnemonic: &str) -> &str {
    for cc in CONDITION_CODES {
        if let Some(base) = mnemonic.strip_suffix(cc) {
            if matches!(base, "b" | "bl" | "blx" | "bx" | "pop" | "ldm" | "mov") {
                return base;
            }
        }
    }
    mnemonic
}

fn writes_pc(operands: &str) -> bool {
    operands
        .trim_matches(|c| c == '{' || c == '}')
        .split(',')
        .any(|reg| reg.trim().trim_end_matches('}') == "pc")
}

pub fn classify(mnemonic: &str, operands: &str) -> ControlFlow {
    let m = base_mnemonic(mnemonic);
    let ops = split_operands(operands);
    let ret = match m {
        "bx" => ops.first() == Some(&"lr"),
        "mov" => ops.first() == Some(&"pc") && ops.get(1) == Some(&"lr"),
        "pop" => writes_pc(operands),
        _ if m.starts_with("ldm") => ops.get(1).is_some_and(|regs| writes_pc(regs)),
        _ => false,
    };
    ControlFlow {
        jump: !ret && matches!(m, "b" | "bx" | "cbz" | "cbnz"),
        call: matches!(m, "bl" | "blx"),
        ret,
    }
}

/// `push {.., lr}` or `stmdb sp!, {.., lr}`.
pub fn is_prologue(insn: &Instruction) -> bool {
    let saves_lr = |regs: &str| regs.contains("lr");
    match insn.mnemonic.as_str() {
        "push" => saves_lr(&insn.operands),
        "stmdb" | "stmfd" => {
            let ops = split_operands(&insn.operands);
            ops.first() == Some(&"sp!") && ops.get(1).is_some_and(|regs| saves_lr(regs))
        }
        _ => false,
    }
}

pub fn immediate_target(op: &ArchOperand) -> Option<u64> {
    match op {
        ArchOperand::ArmOperand(op) => match op.op_type {
            ArmOperandType::Imm(imm) => Some(u64::from(imm as u32)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insn(mnemonic: &str, operands: &str) -> Instruction {
        Instruction {
            mnemonic: mnemonic.into(),
            operands: operands.into(),
            size: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_returns() {
        assert!(classify("bx", "lr").ret);
        assert!(classify("pop", "{r4, r5, pc}").ret);
        assert!(classify("ldm", "sp!, {r4, pc}").ret);
        assert!(!classify("bx", "r3").ret);
        assert!(classify("bx", "r3").jump);
    }

    #[test]
    fn test_calls_and_jumps() {
        assert!(classify("bl", "#0x8000").call);
        assert!(classify("blx", "r3").call);
        assert!(classify("bne", "#0x8010").jump);
        assert!(!classify("bic", "r0, r0, #1").jump);
    }

    #[test]
    fn test_prologue() {
        assert!(is_prologue(&insn("push", "{r4, fp, lr}")));
        assert!(is_prologue(&insn("stmdb", "sp!, {r4, lr}")));
        assert!(!is_prologue(&insn("push", "{r4, r5}")));
    }
}
