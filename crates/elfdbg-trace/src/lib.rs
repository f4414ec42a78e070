//! Live process control over `ptrace`.
//!
//! [`ProcessDebugger`] owns at most one traced process. Every control
//! operation is synchronous: it issues the tracing request and, where the
//! operation implies a stop, blocks in `waitpid` until the stop is observed
//! and reported as a [`StopReason`]. Software breakpoints patch the
//! architecture's trap instruction over the first bytes of the target
//! instruction and keep the overwritten bytes in the breakpoint table.
//!
//! Register access is implemented for x86-64 hosts.

mod breakpoint;
mod condition;
mod config;
mod debugger;
mod maps;
mod memory;
mod registers;
mod shared;
mod state;

pub use breakpoint::{Breakpoint, BreakpointKind, BreakpointSpec};
pub use condition::{CompareOp, Condition};
pub use config::DebuggerConfig;
pub use debugger::{ProcessDebugger, StackFrame};
pub use maps::MemoryRegion;
pub use registers::{REGISTER_NAMES, Register, canonical_register_name};
pub use shared::SharedDebugger;
pub use state::{ProcessState, StopReason};

use elfdbg_isa::{Architecture, DecodeError};
use nix::errno::Errno;
use thiserror::Error;

/// Debugger errors.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Process error: {0}")]
    Process(String),

    #[error("{op} failed: {source}")]
    Tracing {
        op: &'static str,
        #[source]
        source: Errno,
    },

    #[error("No active debug session")]
    NoActiveSession,

    #[error("Invalid address: {0:#x}")]
    InvalidAddress(u64),

    #[error("Operation not valid while the process is {0}")]
    InvalidState(ProcessState),

    #[error("Traced process no longer exists")]
    ProcessVanished,

    #[error("Unknown register: {0}")]
    UnknownRegister(String),

    #[error("Unsupported breakpoint kind: {0}")]
    UnsupportedBreakpoint(BreakpointKind),

    #[error("Invalid breakpoint condition: {0}")]
    InvalidCondition(String),

    #[error("Register access is not supported on {0}")]
    UnsupportedHost(Architecture),

    #[error("No breakpoint at {0:#x}")]
    UnknownBreakpoint(u64),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl TraceError {
    /// True when the traced process is gone and the session cannot continue.
    pub const fn is_vanished(&self) -> bool {
        matches!(self, Self::ProcessVanished)
    }
}

/// Map a failed tracing request to an error, folding "no such process"
/// into [`TraceError::ProcessVanished`].
pub(crate) const fn tracing_error(op: &'static str, source: Errno) -> TraceError {
    match source {
        Errno::ESRCH | Errno::ECHILD => TraceError::ProcessVanished,
        _ => TraceError::Tracing { op, source },
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;
