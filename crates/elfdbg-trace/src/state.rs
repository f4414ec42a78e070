//! Session lifecycle states and stop reports.

use std::fmt;

use nix::sys::signal::Signal;

/// Lifecycle of the traced process as seen by the debugger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// No process is launched or attached.
    #[default]
    NotRunning,
    Running,
    Paused,
    /// The process exited or was killed.
    Stopped,
    /// A control request failed in a way that leaves the session untrusted.
    Error,
}

impl ProcessState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotRunning => "not running",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Error => "in error",
        }
    }

    /// True while a process is attached (running or paused).
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a blocking wait returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// Stopped on an enabled breakpoint at this address.
    BreakpointHit(u64),
    /// Stopped after a single step or at a temporary step target.
    SteppedTo(u64),
    /// Stopped by a signal that will be re-delivered on the next resume.
    SignalDelivered(i32),
    /// Exited normally with this status.
    Exited(i32),
    /// Killed by this signal.
    Terminated(i32),
}

impl StopReason {
    /// True when the process no longer exists.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exited(_) | Self::Terminated(_))
    }

    /// Instruction pointer at the stop, when the report carries one.
    pub const fn address(self) -> Option<u64> {
        match self {
            Self::BreakpointHit(addr) | Self::SteppedTo(addr) => Some(addr),
            _ => None,
        }
    }
}

fn signal_name(signo: i32) -> String {
    Signal::try_from(signo).map_or_else(|_| format!("signal {signo}"), |s| s.as_str().to_string())
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BreakpointHit(addr) => write!(f, "breakpoint hit at {addr:#x}"),
            Self::SteppedTo(addr) => write!(f, "stopped at {addr:#x}"),
            Self::SignalDelivered(sig) => write!(f, "received {}", signal_name(*sig)),
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Terminated(sig) => write!(f, "terminated by {}", signal_name(*sig)),
        }
    }
}
