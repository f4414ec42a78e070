//! Function recovery and cross-reference analysis over decoded instruction
//! streams.
//!
//! Functions are recovered with a single linear pass keyed on prologue
//! idioms and closed at the first return. Cross-references live in a
//! separate reverse index ([`XrefIndex`]) so that instructions and functions
//! never point at each other.

mod function;
mod table;
mod xref;

pub use function::*;
pub use table::*;
pub use xref::*;

use elfdbg_isa::{Instruction, InstructionDecoder};

/// Function analysis over the architecture an [`InstructionDecoder`] was
/// initialized for.
pub trait AnalyzeExt {
    /// Recover functions from a linear instruction stream.
    fn analyze_functions(&self, instructions: &[Instruction]) -> Vec<Function>;

    /// Recover the function starting at `start`.
    fn analyze_function(&self, instructions: &[Instruction], start: u64) -> Option<Function>;

    /// Addresses of instructions whose direct target is `address`.
    fn find_cross_references(&self, address: u64, instructions: &[Instruction]) -> Vec<u64>;
}

impl AnalyzeExt for InstructionDecoder {
    fn analyze_functions(&self, instructions: &[Instruction]) -> Vec<Function> {
        analyze_functions(self.architecture(), instructions)
    }

    fn analyze_function(&self, instructions: &[Instruction], start: u64) -> Option<Function> {
        analyze_function(instructions, start)
    }

    fn find_cross_references(&self, address: u64, instructions: &[Instruction]) -> Vec<u64> {
        find_cross_references(address, instructions)
    }
}
