//! Prologue-driven function recovery.

use elfdbg_isa::{Architecture, Instruction};
use tracing::debug;

/// A recovered function.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub start_address: u64,
    /// One past the last byte of the closing instruction.
    pub end_address: u64,
    pub instructions: Vec<Instruction>,
    /// Addresses of instructions that call or jump to `start_address`.
    pub xrefs: Vec<u64>,
    /// False when the stream ended before a return was seen.
    pub has_return: bool,
}

/// Placeholder name for an unnamed function.
pub fn default_function_name(address: u64) -> String {
    format!("sub_{address:x}")
}

impl Function {
    fn open(start: u64) -> Self {
        Self {
            name: default_function_name(start),
            start_address: start,
            end_address: start,
            ..Self::default()
        }
    }

    /// Append `insn`; returns true when it closes the function.
    fn push(&mut self, insn: &Instruction) -> bool {
        self.end_address = insn.end_address();
        self.instructions.push(insn.clone());
        if insn.is_return {
            self.has_return = true;
        }
        insn.is_return
    }

    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.start_address && addr < self.end_address
    }

    pub const fn size(&self) -> u64 {
        self.end_address - self.start_address
    }

    /// Direct call targets in instruction order.
    pub fn call_targets(&self) -> impl Iterator<Item = u64> + '_ {
        self.instructions
            .iter()
            .filter(|insn| insn.is_call && insn.target_address != 0)
            .map(|insn| insn.target_address)
    }
}

/// Recover functions from a linear instruction stream.
///
/// A function opens at a prologue instruction while no function is open and
/// closes at the first return. A function still open when the stream ends
/// closes at the last instruction.
pub fn analyze_functions(arch: Architecture, instructions: &[Instruction]) -> Vec<Function> {
    let mut functions = Vec::new();
    let mut current: Option<Function> = None;

    for insn in instructions {
        if current.is_none() && arch.is_prologue(insn) {
            current = Some(Function::open(insn.address));
        }
        let closed = current.as_mut().is_some_and(|function| function.push(insn));
        if closed {
            functions.extend(current.take());
        }
    }

    if let Some(function) = current {
        debug!(
            start = format_args!("{:#x}", function.start_address),
            "stream ended inside function"
        );
        functions.push(function);
    }

    debug!(arch = %arch, count = functions.len(), "recovered functions");
    functions
}

/// Recover the function starting at `start` with the same closing rules,
/// without requiring a prologue at `start`.
pub fn analyze_function(instructions: &[Instruction], start: u64) -> Option<Function> {
    let first = instructions.iter().position(|insn| insn.address == start)?;
    let mut function = Function::open(start);
    for insn in &instructions[first..] {
        if function.push(insn) {
            break;
        }
    }
    Some(function)
}

/// Addresses of instructions whose direct target is `address`.
///
/// Unresolved targets are stored as 0, so querying 0 yields nothing.
pub fn find_cross_references(address: u64, instructions: &[Instruction]) -> Vec<u64> {
    if address == 0 {
        return Vec::new();
    }
    instructions
        .iter()
        .filter(|insn| insn.target_address == address)
        .map(|insn| insn.address)
        .collect()
}
