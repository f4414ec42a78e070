//! Instruction decoding for x86, x86-64, ARM and AArch64.
//!
//! Each architecture has its own decode table under `tables/`. A table owns a
//! capstone handle plus the control-flow and prologue rules for its
//! instruction set; [`InstructionDecoder`] selects one table and exposes a
//! single decode interface over all of them.

mod arch;
mod decoder;
mod instruction;
mod strings;
mod tables;

pub use arch::*;
pub use decoder::*;
pub use instruction::*;
pub use strings::*;
pub use tables::DecodeTable;

use thiserror::Error;

/// Decoder errors.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(Architecture),
    #[error("Capstone error: {0}")]
    Capstone(String),
    #[error("Decoder not initialized")]
    NotInitialized,
}

impl From<capstone::Error> for DecodeError {
    fn from(value: capstone::Error) -> Self {
        Self::Capstone(format!("{value}"))
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
