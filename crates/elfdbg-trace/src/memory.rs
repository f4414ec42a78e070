//! Word-granular memory access through `PTRACE_PEEKDATA`/`PTRACE_POKEDATA`.
//!
//! The kernel moves one pointer-width word per request. Reads assemble the
//! requested range from consecutive aligned words; writes read each affected
//! word, splice the new bytes in and write it back so neighbouring bytes are
//! preserved exactly.

use nix::errno::Errno;
use nix::libc::c_long;
use nix::sys::ptrace::{self, AddressType};
use nix::unistd::Pid;

use crate::{Result, TraceError, tracing_error};

/// Bytes moved per tracing request.
pub const WORD_SIZE: usize = size_of::<c_long>();

const WORD_MASK: u64 = !(WORD_SIZE as u64 - 1);

fn address(addr: u64) -> Result<AddressType> {
    let addr = usize::try_from(addr).map_err(|_| TraceError::InvalidAddress(addr))?;
    Ok(addr as AddressType)
}

/// Unmapped or unreadable addresses surface as [`TraceError::InvalidAddress`].
fn memory_error(op: &'static str, addr: u64, err: Errno) -> TraceError {
    match err {
        Errno::EIO | Errno::EFAULT => TraceError::InvalidAddress(addr),
        other => tracing_error(op, other),
    }
}

/// Read the aligned word at `addr`.
pub fn read_word(pid: Pid, addr: u64) -> Result<[u8; WORD_SIZE]> {
    let word = ptrace::read(pid, address(addr)?).map_err(|e| memory_error("peek", addr, e))?;
    Ok(word.to_ne_bytes())
}

/// Write the aligned word at `addr`.
pub fn write_word(pid: Pid, addr: u64, word: [u8; WORD_SIZE]) -> Result<()> {
    ptrace::write(pid, address(addr)?, c_long::from_ne_bytes(word))
        .map_err(|e| memory_error("poke", addr, e))
}

/// Aligned word addresses covering `[addr, addr + len)`.
fn covering_words(addr: u64, len: usize) -> Result<impl Iterator<Item = u64>> {
    let end = u64::try_from(len)
        .ok()
        .and_then(|len| addr.checked_add(len))
        .ok_or(TraceError::InvalidAddress(addr))?;
    let first = addr & WORD_MASK;
    Ok((first..end).step_by(WORD_SIZE))
}

/// Overwrite `word` with the part of `data` that falls inside it.
///
/// `word_addr` is the aligned address of `word`; `addr` is where `data`
/// starts. Bytes outside the overlap are left untouched.
pub(crate) fn splice_word(word: &mut [u8; WORD_SIZE], word_addr: u64, addr: u64, data: &[u8]) {
    for (i, byte) in word.iter_mut().enumerate() {
        let Some(offset) = (word_addr + i as u64).checked_sub(addr) else {
            continue;
        };
        if let Some(&value) = usize::try_from(offset).ok().and_then(|o| data.get(o)) {
            *byte = value;
        }
    }
}

/// Read `len` bytes starting at `addr`.
pub fn read_bytes(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let mut raw = Vec::with_capacity(len + WORD_SIZE);
    for word_addr in covering_words(addr, len)? {
        raw.extend_from_slice(&read_word(pid, word_addr)?);
    }
    let skip = usize::try_from(addr & !WORD_MASK).unwrap_or_default();
    Ok(raw[skip..skip + len].to_vec())
}

/// Write `data` starting at `addr`, preserving neighbouring bytes.
pub fn write_bytes(pid: Pid, addr: u64, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    for word_addr in covering_words(addr, data.len())? {
        let mut word = read_word(pid, word_addr)?;
        splice_word(&mut word, word_addr, addr, data);
        write_word(pid, word_addr, word)?;
    }
    Ok(())
}

/// Read `count` pointer-width values starting at `addr`.
pub fn read_words(pid: Pid, addr: u64, count: usize) -> Result<Vec<u64>> {
    let bytes = read_bytes(pid, addr, count.saturating_mul(WORD_SIZE))?;
    Ok(bytes
        .chunks_exact(WORD_SIZE)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            u64::from_le_bytes(word)
        })
        .collect())
}
