//! Name-keyed access to the traced process's general-purpose registers.
//!
//! Names follow the x86-64 `user_regs_struct` layout and are matched
//! case-insensitively; `pc`, `sp`, `fp` and `flags` are accepted as aliases.
//! Other hosts report [`TraceError::UnsupportedHost`].

use std::fmt;

#[cfg(not(target_arch = "x86_64"))]
use elfdbg_isa::Architecture;

use crate::{Result, TraceError};

/// A register name with its current value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Register {
    /// Upper-case register name, e.g. `RIP`.
    pub name: String,
    pub value: u64,
    /// Width in bytes.
    pub size: usize,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<8} {:#018x}", self.name, self.value)
    }
}

macro_rules! register_file {
    ($($name:ident),* $(,)?) => {
        /// Register names accepted by lookups, in display order.
        pub const REGISTER_NAMES: &[&str] = &[$(stringify!($name)),*];

        #[cfg(target_arch = "x86_64")]
        fn slot<'a>(regs: &'a mut nix::libc::user_regs_struct, name: &str) -> Option<&'a mut u64> {
            match name {
                $(stringify!($name) => Some(&mut regs.$name),)*
                _ => None,
            }
        }
    };
}

register_file!(
    rax, rbx, rcx, rdx, rsi, rdi, rbp, rsp, r8, r9, r10, r11, r12, r13, r14, r15, rip, eflags,
    cs, ss, ds, es, fs, gs, fs_base, gs_base, orig_rax,
);

/// Resolve `name` (any case, aliases allowed) to its canonical lower-case
/// register name.
pub fn canonical_register_name(name: &str) -> Option<&'static str> {
    let lower = name.trim().to_ascii_lowercase();
    let lower = match lower.as_str() {
        "pc" => "rip",
        "sp" => "rsp",
        "fp" => "rbp",
        "flags" | "rflags" => "eflags",
        other => other,
    };
    REGISTER_NAMES.iter().copied().find(|n| *n == lower)
}

fn lookup(name: &str) -> Result<&'static str> {
    canonical_register_name(name).ok_or_else(|| TraceError::UnknownRegister(name.to_string()))
}

/// Instruction, stack and frame pointer captured in one request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameRegisters {
    pub pc: u64,
    pub sp: u64,
    pub fp: u64,
}

#[cfg(target_arch = "x86_64")]
mod host {
    use nix::libc::user_regs_struct;
    use nix::sys::ptrace;
    use nix::unistd::Pid;

    use super::{FrameRegisters, REGISTER_NAMES, Register, lookup, slot};
    use crate::{Result, TraceError, tracing_error};

    fn get(pid: Pid) -> Result<user_regs_struct> {
        ptrace::getregs(pid).map_err(|e| tracing_error("getregs", e))
    }

    fn set(pid: Pid, regs: user_regs_struct) -> Result<()> {
        ptrace::setregs(pid, regs).map_err(|e| tracing_error("setregs", e))
    }

    pub fn read_all(pid: Pid) -> Result<Vec<Register>> {
        let mut regs = get(pid)?;
        Ok(REGISTER_NAMES
            .iter()
            .filter_map(|name| {
                slot(&mut regs, name).map(|value| Register {
                    name: name.to_ascii_uppercase(),
                    value: *value,
                    size: 8,
                })
            })
            .collect())
    }

    pub fn read(pid: Pid, name: &str) -> Result<u64> {
        let canonical = lookup(name)?;
        let mut regs = get(pid)?;
        slot(&mut regs, canonical)
            .map(|value| *value)
            .ok_or_else(|| TraceError::UnknownRegister(name.to_string()))
    }

    pub fn write(pid: Pid, name: &str, value: u64) -> Result<()> {
        let canonical = lookup(name)?;
        let mut regs = get(pid)?;
        let target =
            slot(&mut regs, canonical).ok_or_else(|| TraceError::UnknownRegister(name.to_string()))?;
        *target = value;
        set(pid, regs)
    }

    pub fn frame(pid: Pid) -> Result<FrameRegisters> {
        let regs = get(pid)?;
        Ok(FrameRegisters {
            pc: regs.rip,
            sp: regs.rsp,
            fp: regs.rbp,
        })
    }

    pub fn set_pc(pid: Pid, pc: u64) -> Result<()> {
        let mut regs = get(pid)?;
        regs.rip = pc;
        set(pid, regs)
    }
}

#[cfg(not(target_arch = "x86_64"))]
mod host {
    use nix::unistd::Pid;

    use super::{Architecture, FrameRegisters, Register};
    use crate::{Result, TraceError};

    const fn unsupported<T>() -> Result<T> {
        Err(TraceError::UnsupportedHost(Architecture::host()))
    }

    pub fn read_all(_pid: Pid) -> Result<Vec<Register>> {
        unsupported()
    }

    pub fn read(_pid: Pid, _name: &str) -> Result<u64> {
        unsupported()
    }

    pub fn write(_pid: Pid, _name: &str, _value: u64) -> Result<()> {
        unsupported()
    }

    pub fn frame(_pid: Pid) -> Result<FrameRegisters> {
        unsupported()
    }

    pub fn set_pc(_pid: Pid, _pc: u64) -> Result<()> {
        unsupported()
    }
}

pub(crate) use host::{frame, read, read_all, set_pc, write};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_names() {
        assert_eq!(canonical_register_name("RIP"), Some("rip"));
        assert_eq!(canonical_register_name("rax"), Some("rax"));
        assert_eq!(canonical_register_name(" Sp "), Some("rsp"));
        assert_eq!(canonical_register_name("flags"), Some("eflags"));
        assert_eq!(canonical_register_name("xmm0"), None);
    }

    #[test]
    fn test_unknown_register() {
        assert!(matches!(lookup("bogus"), Err(TraceError::UnknownRegister(n)) if n == "bogus"));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_every_name_has_a_slot() {
        // SAFETY: user_regs_struct is plain integers
        let mut regs: nix::libc::user_regs_struct = unsafe { std::mem::zeroed() };
        for name in REGISTER_NAMES {
            assert!(slot(&mut regs, name).is_some(), "{name}");
        }
        *slot(&mut regs, "rip").unwrap() = 0x401000;
        assert_eq!(regs.rip, 0x401000);
    }
}
