//! Memory mappings from `/proc/<pid>/maps`.

use std::fmt;

use nix::unistd::Pid;
use proc_maps::MapRange;

use crate::{Result, TraceError};

/// One mapping of the traced process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start_address: u64,
    /// Exclusive.
    pub end_address: u64,
    /// `rwx` letters with `-` for missing permissions.
    pub permissions: String,
    /// Backing path, or empty for anonymous mappings.
    pub name: String,
}

impl MemoryRegion {
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.start_address && addr < self.end_address
    }

    pub const fn size(&self) -> u64 {
        self.end_address - self.start_address
    }

    pub fn is_executable(&self) -> bool {
        self.permissions.as_bytes().get(2) == Some(&b'x')
    }
}

impl From<&MapRange> for MemoryRegion {
    fn from(range: &MapRange) -> Self {
        let start = range.start() as u64;
        let permissions: String = [
            if range.is_read() { 'r' } else { '-' },
            if range.is_write() { 'w' } else { '-' },
            if range.is_exec() { 'x' } else { '-' },
        ]
        .into_iter()
        .collect();
        Self {
            start_address: start,
            end_address: start + range.size() as u64,
            permissions,
            name: range
                .filename()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#014x}-{:#014x} {} {}",
            self.start_address, self.end_address, self.permissions, self.name
        )
    }
}

/// Current mappings of `pid`, in address order.
pub fn read_regions(pid: Pid) -> Result<Vec<MemoryRegion>> {
    let ranges = proc_maps::get_process_maps(pid.into()).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TraceError::ProcessVanished
        } else {
            TraceError::Process(format!("failed to read memory map of {pid}: {e}"))
        }
    })?;
    Ok(ranges.iter().map(MemoryRegion::from).collect())
}

/// Region containing `addr`.
pub fn region_containing(regions: &[MemoryRegion], addr: u64) -> Option<&MemoryRegion> {
    regions.iter().find(|r| r.contains(addr))
}

/// Unique backing files in first-mapped order.
pub fn module_paths(regions: &[MemoryRegion]) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for region in regions {
        if region.name.starts_with('/') && !paths.contains(&region.name) {
            paths.push(region.name.clone());
        }
    }
    paths
}
