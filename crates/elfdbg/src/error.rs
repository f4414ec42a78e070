//! Façade error type.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the façade and the CLI.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ELF error: {0}")]
    Elf(#[from] elfdbg_elf::ElfError),
    #[error("Decode error: {0}")]
    Decode(#[from] elfdbg_isa::DecodeError),
    #[error("Debugger error: {0}")]
    Trace(#[from] elfdbg_trace::TraceError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Project file line {line}: {message}")]
    Project { line: usize, message: String },
    #[error("Unknown symbol or address: {0}")]
    UnknownSymbol(String),
    #[error("No analysis loaded")]
    NoAnalysis,
    #[error("No target binary (pass a path or a project file naming one)")]
    NoTarget,
    #[error("Failed to write {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
