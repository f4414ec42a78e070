//! Breakpoint records and the per-session breakpoint table.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;

use crate::Condition;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BreakpointKind {
    #[default]
    Software,
    Hardware,
    Conditional,
}

impl BreakpointKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Hardware => "hardware",
            Self::Conditional => "conditional",
        }
    }
}

impl fmt::Display for BreakpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreakpointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "software" | "sw" => Ok(Self::Software),
            "hardware" | "hw" => Ok(Self::Hardware),
            "conditional" | "cond" => Ok(Self::Conditional),
            other => Err(format!("unknown breakpoint kind: {other}")),
        }
    }
}

/// A breakpoint owned by the debugger's table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Breakpoint {
    pub address: u64,
    pub kind: BreakpointKind,
    pub enabled: bool,
    /// Bytes under the trap while it is patched in; `None` while disabled.
    pub original_bytes: Option<Vec<u8>>,
    pub condition: Option<Condition>,
    pub hit_count: u64,
    /// Internal step target, hidden from listings.
    pub(crate) temporary: bool,
}

impl Breakpoint {
    pub(crate) const fn new(address: u64, kind: BreakpointKind, condition: Option<Condition>) -> Self {
        Self {
            address,
            kind,
            enabled: false,
            original_bytes: None,
            condition,
            hit_count: 0,
            temporary: false,
        }
    }

    /// True while the trap instruction is written into the process.
    pub const fn is_patched(&self) -> bool {
        self.original_bytes.is_some()
    }

    /// First overwritten byte.
    pub fn original_byte(&self) -> Option<u8> {
        self.original_bytes.as_ref().and_then(|b| b.first().copied())
    }

    /// Saved description for re-arming in a later session.
    pub fn spec(&self) -> BreakpointSpec {
        BreakpointSpec {
            address: self.address,
            kind: self.kind,
            enabled: self.enabled,
            condition: self.condition.as_ref().map(ToString::to_string),
        }
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#x} {} {} hits={}",
            self.address,
            self.kind,
            if self.enabled { "enabled" } else { "disabled" },
            self.hit_count
        )?;
        if let Some(cond) = &self.condition {
            write!(f, " if {cond}")?;
        }
        Ok(())
    }
}

/// Flat breakpoint description persisted by project files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakpointSpec {
    pub address: u64,
    pub kind: BreakpointKind,
    pub enabled: bool,
    pub condition: Option<String>,
}

impl BreakpointSpec {
    pub const fn software(address: u64) -> Self {
        Self {
            address,
            kind: BreakpointKind::Software,
            enabled: true,
            condition: None,
        }
    }
}

/// Patch bookkeeping for a write that overlaps patched traps.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ShadowedWrite {
    /// Bytes to write into the process, traps kept in place.
    pub bytes: Vec<u8>,
    /// New saved bytes for each overlapped breakpoint.
    pub originals: Vec<(u64, Vec<u8>)>,
}

/// Breakpoints keyed by address.
#[derive(Debug, Default)]
pub(crate) struct BreakpointTable {
    entries: FxHashMap<u64, Breakpoint>,
}

impl BreakpointTable {
    pub fn get(&self, addr: u64) -> Option<&Breakpoint> {
        self.entries.get(&addr)
    }

    pub fn get_mut(&mut self, addr: u64) -> Option<&mut Breakpoint> {
        self.entries.get_mut(&addr)
    }

    pub fn insert(&mut self, bp: Breakpoint) {
        self.entries.insert(bp.address, bp);
    }

    pub fn remove(&mut self, addr: u64) -> Option<Breakpoint> {
        self.entries.remove(&addr)
    }

    /// Patched breakpoint at `addr`, if any.
    pub fn patched_at(&self, addr: u64) -> Option<&Breakpoint> {
        self.get(addr).filter(|bp| bp.is_patched())
    }

    /// User-visible breakpoints sorted by address.
    pub fn listed(&self) -> Vec<&Breakpoint> {
        let mut list: Vec<_> = self.entries.values().filter(|bp| !bp.temporary).collect();
        list.sort_unstable_by_key(|bp| bp.address);
        list
    }

    /// Addresses of every patched breakpoint.
    pub fn patched_addresses(&self) -> Vec<u64> {
        let mut addrs: Vec<u64> = self
            .entries
            .values()
            .filter(|bp| bp.is_patched())
            .map(|bp| bp.address)
            .collect();
        addrs.sort_unstable();
        addrs
    }

    /// Overwrite trap bytes inside `buf` (read from `addr`) with the saved
    /// originals.
    pub fn unpatch_view(&self, addr: u64, buf: &mut [u8]) {
        for bp in self.entries.values() {
            let Some(original) = &bp.original_bytes else {
                continue;
            };
            for (i, &byte) in original.iter().enumerate() {
                if let Some(slot) = index_in(addr, buf.len(), bp.address + i as u64) {
                    buf[slot] = byte;
                }
            }
        }
    }

    /// Redirect the bytes of a write at `addr` that land under patched
    /// traps into the saved originals.
    pub fn shadow_write(&self, addr: u64, data: &[u8], trap: &[u8]) -> ShadowedWrite {
        let mut bytes = data.to_vec();
        let mut originals = Vec::new();
        for bp in self.entries.values() {
            let Some(original) = &bp.original_bytes else {
                continue;
            };
            let mut updated = original.clone();
            let mut touched = false;
            for (i, saved) in updated.iter_mut().enumerate() {
                if let Some(slot) = index_in(addr, data.len(), bp.address + i as u64) {
                    *saved = data[slot];
                    bytes[slot] = trap.get(i).copied().unwrap_or(data[slot]);
                    touched = true;
                }
            }
            if touched {
                originals.push((bp.address, updated));
            }
        }
        ShadowedWrite { bytes, originals }
    }
}

/// Position of `target` inside `[base, base + len)`.
fn index_in(base: u64, len: usize, target: u64) -> Option<usize> {
    let offset = usize::try_from(target.checked_sub(base)?).ok()?;
    (offset < len).then_some(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patched(addr: u64, original: &[u8]) -> Breakpoint {
        Breakpoint {
            enabled: true,
            original_bytes: Some(original.to_vec()),
            ..Breakpoint::new(addr, BreakpointKind::Software, None)
        }
    }

    #[test]
    fn test_unpatch_view() {
        let mut table = BreakpointTable::default();
        table.insert(patched(0x1002, &[0x55]));
        table.insert(patched(0x2000, &[0x90]));
        let mut buf = [0x48, 0x89, 0xCC, 0xE5];
        table.unpatch_view(0x1000, &mut buf);
        assert_eq!(buf, [0x48, 0x89, 0x55, 0xE5]);
    }

    #[test]
    fn test_shadow_write_keeps_trap() {
        let mut table = BreakpointTable::default();
        table.insert(patched(0x1001, &[0x55]));
        // a disabled entry has nothing patched and is left alone
        table.insert(Breakpoint::new(0x1002, BreakpointKind::Software, None));

        let write = table.shadow_write(0x1000, &[1, 2, 3], &[0xCC]);
        assert_eq!(write.bytes, vec![1, 0xCC, 3]);
        assert_eq!(write.originals, vec![(0x1001, vec![2])]);

        let untouched = table.shadow_write(0x1002, &[7], &[0xCC]);
        assert_eq!(untouched.bytes, vec![7]);
        assert!(untouched.originals.is_empty());
    }

    #[test]
    fn test_multi_byte_trap() {
        let mut table = BreakpointTable::default();
        table.insert(patched(0x1000, &[1, 2, 3, 4]));
        let write = table.shadow_write(0x1002, &[9, 9, 9], &[0x00, 0x00, 0x20, 0xD4]);
        assert_eq!(write.bytes, vec![0x20, 0xD4, 9]);
        assert_eq!(write.originals, vec![(0x1000, vec![1, 2, 9, 9])]);
    }

    #[test]
    fn test_listing_hides_temporary() {
        let mut table = BreakpointTable::default();
        table.insert(patched(0x30, &[0]));
        table.insert(patched(0x10, &[0]));
        table.insert(Breakpoint {
            temporary: true,
            ..patched(0x20, &[0])
        });
        let listed: Vec<u64> = table.listed().iter().map(|bp| bp.address).collect();
        assert_eq!(listed, vec![0x10, 0x30]);
        assert_eq!(table.patched_addresses(), vec![0x10, 0x20, 0x30]);
    }

    #[test]
    fn test_kind_and_spec() {
        assert_eq!("HW".parse::<BreakpointKind>(), Ok(BreakpointKind::Hardware));
        assert!("watch".parse::<BreakpointKind>().is_err());
        let bp = patched(0x401000, &[0x55]);
        assert_eq!(bp.original_byte(), Some(0x55));
        assert_eq!(bp.spec(), BreakpointSpec::software(0x401000));
        assert_eq!(bp.to_string(), "0x401000 software enabled hits=0");
    }
}
