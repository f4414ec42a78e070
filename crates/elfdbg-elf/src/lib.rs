//! ELF image loader for x86, x86-64, ARM and AArch64 binaries.
//!
//! Parsing is bounds-checked throughout: only a missing or broken file header
//! is an error, anything reached through the header tables is best-effort.

mod constants;
mod file;
mod header;
mod image;
mod loader;
mod reader;

#[cfg(test)]
mod testutil;

pub use constants::*;
pub use file::*;
pub use header::*;
pub use image::*;
pub use loader::*;

use std::path::PathBuf;

use thiserror::Error;

/// ELF parsing errors.
#[derive(Error, Debug)]
pub enum ElfError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ELF data too small")]
    TooSmall,
    #[error("Not a valid ELF file (bad magic)")]
    InvalidMagic,
    #[error("Unsupported ELF class: {0}")]
    UnsupportedClass(u8),
    #[error("Unsupported ELF data encoding: {0}")]
    UnsupportedEncoding(u8),
    #[error("ELF header truncated")]
    HeaderOutOfBounds,
    #[error("No executable loadable segment found")]
    MissingSegment,
}

pub type Result<T> = std::result::Result<T, ElfError>;
