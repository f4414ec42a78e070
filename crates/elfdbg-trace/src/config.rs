//! Debugger configuration.

/// Default bound on frames produced by a backtrace.
pub const DEFAULT_MAX_BACKTRACE_FRAMES: usize = 64;

/// Knobs applied when launching or attaching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebuggerConfig {
    /// Launch children with address-space randomization disabled.
    pub disable_aslr: bool,
    /// Kill launched children when the tracer exits.
    pub exit_kill: bool,
    pub max_backtrace_frames: usize,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            disable_aslr: true,
            exit_kill: true,
            max_backtrace_frames: DEFAULT_MAX_BACKTRACE_FRAMES,
        }
    }
}

impl DebuggerConfig {
    #[must_use]
    pub const fn with_disable_aslr(mut self, disable: bool) -> Self {
        self.disable_aslr = disable;
        self
    }

    #[must_use]
    pub const fn with_exit_kill(mut self, exit_kill: bool) -> Self {
        self.exit_kill = exit_kill;
        self
    }

    #[must_use]
    pub const fn with_max_backtrace_frames(mut self, frames: usize) -> Self {
        self.max_backtrace_frames = frames;
        self
    }
}
