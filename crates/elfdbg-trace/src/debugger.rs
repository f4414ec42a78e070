//! The session-owning debugger.

use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use elfdbg_isa::{Architecture, Instruction, InstructionDecoder};
use nix::errno::Errno;
use nix::sys::personality::{self, Persona};
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, execv, fork};
use tracing::{debug, info, trace, warn};

use crate::breakpoint::BreakpointTable;
use crate::maps::{self, MemoryRegion};
use crate::memory::{self, WORD_SIZE};
use crate::registers::{self, Register};
use crate::{
    Breakpoint, BreakpointKind, BreakpointSpec, Condition, DebuggerConfig, ProcessState, Result,
    StopReason, TraceError, tracing_error,
};

/// Longest instruction fetched for decoding at the instruction pointer.
const MAX_INSTRUCTION_BYTES: u64 = 16;
const PAGE_SIZE: u64 = 0x1000;

/// One frame of a frame-pointer backtrace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StackFrame {
    pub pc: u64,
    pub frame_pointer: u64,
    pub stack_pointer: u64,
    /// 0 when the frame chain ends here.
    pub return_address: u64,
}

/// State owned by one launched or attached process.
#[derive(Debug)]
struct Session {
    pid: Pid,
    /// Launched by us (killed on drop) rather than attached (detached on drop).
    launched: bool,
    breakpoints: BreakpointTable,
    /// Signal observed at the last stop, re-delivered on the next resume.
    pending_signal: Option<Signal>,
    /// The last step executed a call, so the return address is at the top
    /// of the stack.
    at_call_entry: bool,
}

impl Session {
    fn new(pid: Pid, launched: bool) -> Self {
        Self {
            pid,
            launched,
            breakpoints: BreakpointTable::default(),
            pending_signal: None,
            at_call_entry: false,
        }
    }
}

/// Outcome of a stop observed while continuing.
enum Trap {
    Stop(StopReason),
    /// A conditional breakpoint evaluated false; resume transparently.
    Resume,
}

/// How a run-to target is armed.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Arming {
    /// A patched user breakpoint already sits at the target.
    Existing,
    /// A disabled user breakpoint was enabled for the run.
    Enabled,
    /// An internal breakpoint was inserted for the run.
    Temporary,
}

/// Controls one traced process at a time.
///
/// Every public operation returns a [`Result`]; failures are also kept as
/// text in [`last_error`](Self::last_error). A failed operation leaves the
/// lifecycle state unchanged unless the process itself has vanished, in
/// which case the state becomes [`ProcessState::Error`] and only
/// [`detach`](Self::detach) or [`stop_execution`](Self::stop_execution)
/// remain valid.
///
/// `ptrace` ties the tracee to the thread that launched or attached it, so
/// control operations must be issued from that thread.
#[derive(Debug)]
pub struct ProcessDebugger {
    config: DebuggerConfig,
    arch: Architecture,
    state: ProcessState,
    session: Option<Session>,
    last_error: Option<String>,
    last_stop: Option<StopReason>,
    /// A stop observed while `continue_execution` stepped off a breakpoint.
    queued_stop: Option<StopReason>,
}

impl Default for ProcessDebugger {
    fn default() -> Self {
        Self::with_config(DebuggerConfig::default())
    }
}

impl ProcessDebugger {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_config(config: DebuggerConfig) -> Self {
        Self {
            config,
            arch: Architecture::host(),
            state: ProcessState::NotRunning,
            session: None,
            last_error: None,
            last_stop: None,
            queued_stop: None,
        }
    }

    pub const fn config(&self) -> &DebuggerConfig {
        &self.config
    }

    pub const fn architecture(&self) -> Architecture {
        self.arch
    }

    pub const fn current_state(&self) -> ProcessState {
        self.state
    }

    /// Pid of the traced process.
    pub fn pid(&self) -> Option<Pid> {
        self.session.as_ref().map(|s| s.pid)
    }

    pub const fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Most recent failure message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The most recent stop report.
    pub const fn last_stop(&self) -> Option<StopReason> {
        self.last_stop
    }

    fn record<T>(&mut self, op: &'static str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            warn!(op, error = %err, "debugger operation failed");
            if err.is_vanished() && self.session.is_some() {
                self.state = ProcessState::Error;
            }
            self.last_error = Some(err.to_string());
        }
        result
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(TraceError::NoActiveSession)
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(TraceError::NoActiveSession)
    }

    /// Pid of the session when it is in `state`.
    fn require(&self, state: ProcessState) -> Result<Pid> {
        let pid = self.session()?.pid;
        if self.state == state {
            Ok(pid)
        } else {
            Err(TraceError::InvalidState(self.state))
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.session.is_some() {
            return Err(TraceError::InvalidState(self.state));
        }
        Ok(())
    }

    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(pid = %session.pid, "session ended");
        }
        self.state = ProcessState::Stopped;
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Launch `path` with `args` under tracing and stop before its first
    /// instruction.
    pub fn launch(&mut self, path: impl AsRef<Path>, args: &[String]) -> Result<Pid> {
        let result = self.launch_inner(path.as_ref(), args);
        self.record("launch", result)
    }

    fn launch_inner(&mut self, path: &Path, args: &[String]) -> Result<Pid> {
        self.ensure_idle()?;
        if !path.is_file() {
            return Err(TraceError::Process(format!(
                "{} is not an executable file",
                path.display()
            )));
        }
        let nul = |_| TraceError::Process(format!("{} contains a NUL byte", path.display()));
        let program = CString::new(path.as_os_str().as_bytes()).map_err(nul)?;
        let mut argv = vec![program.clone()];
        for arg in args {
            argv.push(CString::new(arg.as_bytes()).map_err(nul)?);
        }
        let disable_aslr = self.config.disable_aslr;

        // SAFETY: the child only calls traceme, personality and execv, then _exit on failure.
        let forked = unsafe { fork() }
            .map_err(|e| TraceError::Process(format!("fork failed: {e}")))?;
        let pid = match forked {
            ForkResult::Child => exec_traced(&program, &argv, disable_aslr),
            ForkResult::Parent { child } => child,
        };

        match waitpid(pid, None) {
            Ok(WaitStatus::Stopped(_, Signal::SIGTRAP)) => {}
            Ok(WaitStatus::Exited(_, code)) => {
                return Err(TraceError::Process(format!(
                    "{} exited with status {code} before its first instruction",
                    path.display()
                )));
            }
            Ok(other) => {
                let _ = signal::kill(pid, Signal::SIGKILL);
                let _ = waitpid(pid, None);
                return Err(TraceError::Process(format!(
                    "unexpected initial stop of {}: {other:?}",
                    path.display()
                )));
            }
            Err(e) => return Err(TraceError::Process(format!("waitpid failed: {e}"))),
        }

        if self.config.exit_kill {
            if let Err(e) = ptrace::setoptions(pid, Options::PTRACE_O_EXITKILL) {
                warn!(pid = %pid, error = %e, "failed to set PTRACE_O_EXITKILL");
            }
        }

        self.session = Some(Session::new(pid, true));
        self.state = ProcessState::Paused;
        self.last_stop = None;
        self.queued_stop = None;
        info!(pid = %pid, path = %path.display(), "launched");
        Ok(pid)
    }

    /// Attach to a running process and stop it.
    pub fn attach(&mut self, pid: i32) -> Result<()> {
        let result = self.attach_inner(Pid::from_raw(pid));
        self.record("attach", result)
    }

    fn attach_inner(&mut self, pid: Pid) -> Result<()> {
        self.ensure_idle()?;
        ptrace::attach(pid)
            .map_err(|e| TraceError::Process(format!("attach to {pid} failed: {e}")))?;

        // other signals may arrive ahead of the attach stop; pass them on
        loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Stopped(_, Signal::SIGSTOP)) => break,
                Ok(WaitStatus::Stopped(_, sig)) => {
                    trace!(pid = %pid, signal = %sig, "forwarding signal during attach");
                    if let Err(e) = ptrace::cont(pid, sig) {
                        let _ = ptrace::detach(pid, None);
                        return Err(tracing_error("cont", e));
                    }
                }
                Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => {
                    return Err(TraceError::Process(format!("{pid} exited during attach")));
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = ptrace::detach(pid, None);
                    return Err(TraceError::Process(format!("waitpid failed: {e}")));
                }
            }
        }

        self.session = Some(Session::new(pid, false));
        self.state = ProcessState::Paused;
        self.last_stop = None;
        self.queued_stop = None;
        info!(pid = %pid, "attached");
        Ok(())
    }

    /// Kill the traced process.
    pub fn stop_execution(&mut self) -> Result<()> {
        let result = self.stop_inner();
        self.record("stop", result)
    }

    fn stop_inner(&mut self) -> Result<()> {
        let pid = self.session()?.pid;
        match signal::kill(pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(tracing_error("kill", e)),
        }
        loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        self.end_session();
        self.queued_stop = None;
        info!(pid = %pid, "killed");
        Ok(())
    }

    /// Remove every breakpoint and release the process without killing it.
    pub fn detach(&mut self) -> Result<()> {
        let result = self.detach_inner();
        self.record("detach", result)
    }

    fn detach_inner(&mut self) -> Result<()> {
        let pid = self.session()?.pid;
        if self.state == ProcessState::Running {
            self.interrupt(pid)?;
            if self.session.is_none() {
                // exited before the stop arrived
                return Ok(());
            }
        }

        if let Some(session) = self.session.as_ref() {
            for addr in session.breakpoints.patched_addresses() {
                let Some(original) = session
                    .breakpoints
                    .get(addr)
                    .and_then(|bp| bp.original_bytes.clone())
                else {
                    continue;
                };
                match memory::write_bytes(pid, addr, &original) {
                    Ok(()) => {}
                    Err(err) if err.is_vanished() => break,
                    Err(err) => return Err(err),
                }
            }
        }

        let signal = self.session_mut()?.pending_signal.take();
        match ptrace::detach(pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(tracing_error("detach", e)),
        }
        self.session = None;
        self.state = ProcessState::NotRunning;
        self.queued_stop = None;
        info!(pid = %pid, "detached");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Execution control
    // ---------------------------------------------------------------------

    /// Resume the process without waiting for it to stop.
    pub fn continue_execution(&mut self) -> Result<()> {
        let result = self.continue_inner();
        self.record("continue", result)
    }

    fn continue_inner(&mut self) -> Result<()> {
        self.require(ProcessState::Paused)?;
        if let Some(stop) = self.resume()? {
            self.queued_stop = Some(stop);
        }
        Ok(())
    }

    /// Block until the running process stops.
    pub fn wait_for_stop(&mut self) -> Result<StopReason> {
        let result = self
            .wait_inner(None)
            .and_then(|stop| stop.ok_or(TraceError::InvalidState(ProcessState::Running)));
        self.record("wait", result)
    }

    /// Check for a stop without blocking; `None` while still running.
    pub fn poll_stop(&mut self) -> Result<Option<StopReason>> {
        let result = self.wait_inner(Some(WaitPidFlag::WNOHANG));
        self.record("poll", result)
    }

    /// Resume and block until the next stop.
    pub fn continue_and_wait(&mut self) -> Result<StopReason> {
        self.continue_execution()?;
        self.wait_for_stop()
    }

    fn wait_inner(&mut self, flags: Option<WaitPidFlag>) -> Result<Option<StopReason>> {
        if let Some(stop) = self.queued_stop.take() {
            return Ok(Some(stop));
        }
        loop {
            let pid = self.require(ProcessState::Running)?;
            let status = waitpid(pid, flags).map_err(|e| tracing_error("waitpid", e))?;
            if status == WaitStatus::StillAlive {
                return Ok(None);
            }
            match self.classify(status, false)? {
                Trap::Stop(stop) => return Ok(Some(stop)),
                Trap::Resume => {
                    if let Some(stop) = self.resume()? {
                        return Ok(Some(stop));
                    }
                }
            }
        }
    }

    /// Stop a running process.
    pub fn pause_execution(&mut self) -> Result<StopReason> {
        let result = self
            .require(ProcessState::Running)
            .and_then(|pid| self.interrupt(pid));
        self.record("pause", result)
    }

    /// Stop the process with `SIGSTOP` and consume that stop.
    ///
    /// A different stop may be observed first while the `SIGSTOP` is still
    /// queued. That stop is reported, but the process is resumed once more
    /// so the queued `SIGSTOP` is delivered here rather than on a later
    /// resume. Signal delivery happens before any further instruction runs.
    fn interrupt(&mut self, pid: Pid) -> Result<StopReason> {
        signal::kill(pid, Signal::SIGSTOP).map_err(|e| tracing_error("kill", e))?;
        let mut first: Option<StopReason> = None;
        loop {
            let status = waitpid(pid, None).map_err(|e| tracing_error("waitpid", e))?;
            let stop = match self.classify(status, false)? {
                Trap::Stop(stop) => stop,
                Trap::Resume => match self.resume()? {
                    Some(stop) => stop,
                    None => continue,
                },
            };
            if stop.is_terminal() {
                return Ok(stop);
            }
            if stop == StopReason::SignalDelivered(Signal::SIGSTOP as i32) {
                let stop = first.unwrap_or(stop);
                self.last_stop = Some(stop);
                return Ok(stop);
            }
            trace!(pid = %pid, %stop, "stop ahead of the requested SIGSTOP");
            first.get_or_insert(stop);
            // the held signal, if any, stays pending for the next resume
            ptrace::cont(pid, None).map_err(|e| tracing_error("cont", e))?;
            self.state = ProcessState::Running;
        }
    }

    /// Execute exactly one instruction.
    pub fn step_into(&mut self) -> Result<StopReason> {
        let result = self.step_into_inner();
        self.record("step", result)
    }

    fn step_into_inner(&mut self) -> Result<StopReason> {
        let pid = self.require(ProcessState::Paused)?;
        let pc = registers::frame(pid)?.pc;
        let is_call = self
            .decode_at(pid, pc)
            .ok()
            .flatten()
            .is_some_and(|insn| insn.is_call);
        let stop = self.step_raw()?;
        if let Some(session) = self.session.as_mut() {
            session.at_call_entry = is_call && matches!(stop, StopReason::SteppedTo(_));
        }
        Ok(stop)
    }

    /// Step one instruction, running through calls.
    ///
    /// At a call a temporary breakpoint is placed on the following
    /// instruction and execution continues until it fires in the caller's
    /// frame, or until any other stop.
    pub fn step_over(&mut self) -> Result<StopReason> {
        let result = self.step_over_inner();
        self.record("next", result)
    }

    fn step_over_inner(&mut self) -> Result<StopReason> {
        let pid = self.require(ProcessState::Paused)?;
        let regs = registers::frame(pid)?;
        match self.decode_at(pid, regs.pc)? {
            Some(insn) if insn.is_call => {
                debug!(
                    call = format_args!("{:#x}", insn.address),
                    "stepping over call"
                );
                let stop = self.run_to(insn.end_address(), |sp| sp >= regs.sp)?;
                if let Some(session) = self.session.as_mut() {
                    session.at_call_entry = false;
                }
                Ok(stop)
            }
            _ => self.step_into_inner(),
        }
    }

    /// Run until the current function returns to its caller.
    pub fn step_out(&mut self) -> Result<StopReason> {
        let result = self.step_out_inner();
        self.record("finish", result)
    }

    fn step_out_inner(&mut self) -> Result<StopReason> {
        let pid = self.require(ProcessState::Paused)?;
        let regs = registers::frame(pid)?;
        let slot = self.return_slot(pid, regs.pc, regs.sp, regs.fp)?;
        let return_address = memory::read_words(pid, slot, 1)?
            .first()
            .copied()
            .unwrap_or_default();
        if return_address == 0 {
            return Err(TraceError::InvalidAddress(slot));
        }
        debug!(
            slot = format_args!("{slot:#x}"),
            target = format_args!("{return_address:#x}"),
            "stepping out"
        );
        let stop = self.run_to(return_address, |sp| sp > regs.sp)?;
        if let Some(session) = self.session.as_mut() {
            session.at_call_entry = false;
        }
        Ok(stop)
    }

    /// Stack address holding the current function's return address.
    fn return_slot(&self, pid: Pid, pc: u64, sp: u64, fp: u64) -> Result<u64> {
        if self.session()?.at_call_entry {
            return Ok(sp);
        }
        let insn = self.decode_at(pid, pc)?;
        let (mnemonic, operands) = insn
            .as_ref()
            .map_or(("", ""), |i| (i.mnemonic.as_str(), i.operands.as_str()));
        let word = WORD_SIZE as u64;
        match (mnemonic, operands) {
            // frame not built yet, or already torn down
            ("endbr64" | "endbr32" | "ret", _) | ("push", "rbp" | "ebp") => Ok(sp),
            ("mov", "rbp, rsp" | "ebp, esp") => Ok(sp + word),
            _ if fp == 0 => Err(TraceError::InvalidAddress(fp)),
            _ => Ok(fp + word),
        }
    }

    // ---------------------------------------------------------------------
    // Stop handling
    // ---------------------------------------------------------------------

    /// Single-step, lifting a patched breakpoint at the pc for the step.
    fn step_raw(&mut self) -> Result<StopReason> {
        let trap = self.arch.trap_instruction();
        let session = self.session_mut()?;
        let pid = session.pid;
        let pc = registers::frame(pid)?.pc;
        let lifted = session
            .breakpoints
            .patched_at(pc)
            .and_then(|bp| bp.original_bytes.clone());
        if let Some(original) = &lifted {
            trace!(addr = format_args!("{pc:#x}"), "lifting breakpoint for step");
            memory::write_bytes(pid, pc, original)?;
        }

        let signal = session.pending_signal.take();
        let status = ptrace::step(pid, signal)
            .map_err(|e| tracing_error("step", e))
            .and_then(|()| waitpid(pid, None).map_err(|e| tracing_error("waitpid", e)));
        if status.is_err() {
            session.pending_signal = signal;
        }

        let alive = !matches!(
            status,
            Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..))
        );
        if lifted.is_some() && alive {
            memory::write_bytes(pid, pc, trap)?;
        }
        match self.classify(status?, true)? {
            Trap::Stop(stop) => Ok(stop),
            // steps never evaluate conditions
            Trap::Resume => Err(TraceError::InvalidState(self.state)),
        }
    }

    /// Resume without waiting.
    ///
    /// A patched breakpoint at the pc is stepped over first; if that step
    /// already stopped for another reason, the stop is returned and the
    /// process is not resumed.
    fn resume(&mut self) -> Result<Option<StopReason>> {
        let pid = self.session()?.pid;
        let pc = registers::frame(pid)?.pc;
        if self.session()?.breakpoints.patched_at(pc).is_some() {
            match self.step_raw()? {
                StopReason::SteppedTo(_) => {}
                other => return Ok(Some(other)),
            }
        }

        let session = self.session_mut()?;
        session.at_call_entry = false;
        let signal = session.pending_signal.take();
        if let Err(e) = ptrace::cont(pid, signal) {
            session.pending_signal = signal;
            return Err(tracing_error("cont", e));
        }
        self.state = ProcessState::Running;
        Ok(None)
    }

    /// Turn a wait status into a stop report and update the session.
    fn classify(&mut self, status: WaitStatus, stepping: bool) -> Result<Trap> {
        let stop = match status {
            WaitStatus::Exited(pid, code) => {
                info!(pid = %pid, code, "process exited");
                self.end_session();
                StopReason::Exited(code)
            }
            WaitStatus::Signaled(pid, sig, _) => {
                info!(pid = %pid, signal = %sig, "process terminated");
                self.end_session();
                StopReason::Terminated(sig as i32)
            }
            WaitStatus::Stopped(pid, Signal::SIGTRAP) => {
                self.state = ProcessState::Paused;
                if stepping {
                    StopReason::SteppedTo(registers::frame(pid)?.pc)
                } else {
                    return self.breakpoint_stop(pid);
                }
            }
            WaitStatus::Stopped(pid, sig) => {
                self.state = ProcessState::Paused;
                if sig != Signal::SIGSTOP {
                    debug!(pid = %pid, signal = %sig, "signal held for re-delivery");
                    self.session_mut()?.pending_signal = Some(sig);
                }
                StopReason::SignalDelivered(sig as i32)
            }
            other => {
                let pid = self.session()?.pid;
                self.state = ProcessState::Paused;
                debug!(pid = %pid, status = ?other, "unexpected stop");
                StopReason::SteppedTo(registers::frame(pid)?.pc)
            }
        };
        self.last_stop = Some(stop);
        Ok(Trap::Stop(stop))
    }

    /// Handle a trap while continuing: rewind the pc onto a hit breakpoint
    /// and evaluate its condition.
    fn breakpoint_stop(&mut self, pid: Pid) -> Result<Trap> {
        let pc = registers::frame(pid)?.pc;
        let hit = pc.wrapping_sub(self.arch.trap_pc_adjust());
        let condition = match self.session()?.breakpoints.patched_at(hit) {
            Some(bp) => bp.condition.clone(),
            None => {
                let stop = StopReason::SteppedTo(pc);
                self.last_stop = Some(stop);
                return Ok(Trap::Stop(stop));
            }
        };
        if hit != pc {
            registers::set_pc(pid, hit)?;
        }
        if let Some(condition) = condition {
            let value = registers::read(pid, condition.register)?;
            if !condition.evaluate(value) {
                trace!(addr = format_args!("{hit:#x}"), %condition, "condition false");
                return Ok(Trap::Resume);
            }
        }
        if let Some(bp) = self.session_mut()?.breakpoints.get_mut(hit) {
            bp.hit_count += 1;
        }
        debug!(addr = format_args!("{hit:#x}"), "breakpoint hit");
        let stop = StopReason::BreakpointHit(hit);
        self.last_stop = Some(stop);
        Ok(Trap::Stop(stop))
    }

    /// Continue until `target` is reached with a stack pointer accepted by
    /// `frame_ok`, or until any other stop.
    fn run_to(&mut self, target: u64, frame_ok: impl Fn(u64) -> bool) -> Result<StopReason> {
        let trap = self.arch.trap_instruction();
        let session = self.session_mut()?;
        let pid = session.pid;
        let arming = match session.breakpoints.get(target) {
            Some(bp) if bp.is_patched() => Arming::Existing,
            Some(_) => Arming::Enabled,
            None => Arming::Temporary,
        };
        if arming != Arming::Existing {
            let original = patch(pid, target, trap)?;
            match session.breakpoints.get_mut(target) {
                Some(bp) => bp.original_bytes = Some(original),
                None => session.breakpoints.insert(Breakpoint {
                    enabled: true,
                    original_bytes: Some(original),
                    temporary: true,
                    ..Breakpoint::new(target, BreakpointKind::Software, None)
                }),
            }
        }

        let outcome = self.run_until(target, &frame_ok);

        if arming != Arming::Existing {
            self.disarm(target, arming == Arming::Temporary);
        }
        let stop = match outcome? {
            StopReason::BreakpointHit(addr) if addr == target && arming != Arming::Existing => {
                StopReason::SteppedTo(addr)
            }
            other => other,
        };
        self.last_stop = Some(stop);
        Ok(stop)
    }

    fn run_until(&mut self, target: u64, frame_ok: &impl Fn(u64) -> bool) -> Result<StopReason> {
        loop {
            if let Some(stop) = self.resume()? {
                return Ok(stop);
            }
            let pid = self.session()?.pid;
            let status = waitpid(pid, None).map_err(|e| tracing_error("waitpid", e))?;
            match self.classify(status, false)? {
                Trap::Resume => {}
                Trap::Stop(StopReason::BreakpointHit(addr)) if addr == target => {
                    if frame_ok(registers::frame(pid)?.sp) {
                        return Ok(StopReason::BreakpointHit(addr));
                    }
                    trace!(addr = format_args!("{addr:#x}"), "target hit in a deeper frame");
                }
                Trap::Stop(stop) => return Ok(stop),
            }
        }
    }

    /// Undo the arming of a run-to target, if the process is still alive.
    fn disarm(&mut self, target: u64, remove: bool) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let original = session
            .breakpoints
            .get(target)
            .and_then(|bp| bp.original_bytes.clone());
        if let Some(original) = original {
            if let Err(err) = memory::write_bytes(session.pid, target, &original) {
                warn!(addr = format_args!("{target:#x}"), error = %err, "failed to restore step target");
                return;
            }
        }
        if remove {
            session.breakpoints.remove(target);
        } else if let Some(bp) = session.breakpoints.get_mut(target) {
            bp.original_bytes = None;
        }
    }

    /// Whether the last stop was a hit of the breakpoint at `address`.
    pub fn is_breakpoint_hit(&self, address: u64) -> bool {
        self.last_stop == Some(StopReason::BreakpointHit(address))
    }

    // ---------------------------------------------------------------------
    // Breakpoints
    // ---------------------------------------------------------------------

    /// Insert and enable a breakpoint at `address`.
    pub fn add_breakpoint(&mut self, address: u64, kind: BreakpointKind) -> Result<()> {
        let result = self.insert_breakpoint(address, kind, None, true);
        self.record("add breakpoint", result)
    }

    /// Insert a breakpoint that stops only when `condition` holds.
    pub fn add_conditional_breakpoint(&mut self, address: u64, condition: &str) -> Result<()> {
        let result = condition.parse::<Condition>().and_then(|condition| {
            self.insert_breakpoint(address, BreakpointKind::Conditional, Some(condition), true)
        });
        self.record("add breakpoint", result)
    }

    fn insert_breakpoint(
        &mut self,
        address: u64,
        kind: BreakpointKind,
        condition: Option<Condition>,
        enabled: bool,
    ) -> Result<()> {
        let pid = self.require(ProcessState::Paused)?;
        match kind {
            BreakpointKind::Hardware => return Err(TraceError::UnsupportedBreakpoint(kind)),
            BreakpointKind::Conditional if condition.is_none() => {
                return Err(TraceError::InvalidCondition("missing condition".into()));
            }
            _ => {}
        }

        let regions = maps::read_regions(pid)?;
        if maps::region_containing(&regions, address).is_none() {
            return Err(TraceError::InvalidAddress(address));
        }

        let trap = self.arch.trap_instruction();
        let session = self.session_mut()?;
        // keep an already patched trap's saved bytes
        let patched = session
            .breakpoints
            .get(address)
            .and_then(|bp| bp.original_bytes.clone());
        let original_bytes = match (patched, enabled) {
            (Some(original), true) => Some(original),
            (None, true) => Some(patch(pid, address, trap)?),
            (Some(original), false) => {
                memory::write_bytes(pid, address, &original)?;
                None
            }
            (None, false) => None,
        };

        session.breakpoints.insert(Breakpoint {
            enabled,
            original_bytes,
            ..Breakpoint::new(address, kind, condition)
        });
        info!(addr = format_args!("{address:#x}"), %kind, "breakpoint set");
        Ok(())
    }

    /// Restore the original bytes at `address` and forget the breakpoint.
    pub fn remove_breakpoint(&mut self, address: u64) -> Result<()> {
        let result = self.remove_inner(address);
        self.record("remove breakpoint", result)
    }

    fn remove_inner(&mut self, address: u64) -> Result<()> {
        let pid = self.require(ProcessState::Paused)?;
        let session = self.session_mut()?;
        let bp = session
            .breakpoints
            .get(address)
            .filter(|bp| !bp.temporary)
            .ok_or(TraceError::UnknownBreakpoint(address))?;
        if let Some(original) = &bp.original_bytes {
            memory::write_bytes(pid, address, original)?;
        }
        session.breakpoints.remove(address);
        info!(addr = format_args!("{address:#x}"), "breakpoint removed");
        Ok(())
    }

    /// Patch the trap back in for a disabled breakpoint.
    pub fn enable_breakpoint(&mut self, address: u64) -> Result<()> {
        let result = self.set_enabled(address, true);
        self.record("enable breakpoint", result)
    }

    /// Restore the original bytes but keep the breakpoint in the table.
    pub fn disable_breakpoint(&mut self, address: u64) -> Result<()> {
        let result = self.set_enabled(address, false);
        self.record("disable breakpoint", result)
    }

    fn set_enabled(&mut self, address: u64, enabled: bool) -> Result<()> {
        let pid = self.require(ProcessState::Paused)?;
        let trap = self.arch.trap_instruction();
        let session = self.session_mut()?;
        let bp = session
            .breakpoints
            .get_mut(address)
            .filter(|bp| !bp.temporary)
            .ok_or(TraceError::UnknownBreakpoint(address))?;
        if enabled && !bp.is_patched() {
            bp.original_bytes = Some(patch(pid, address, trap)?);
        } else if !enabled {
            if let Some(original) = &bp.original_bytes {
                memory::write_bytes(pid, address, original)?;
            }
            bp.original_bytes = None;
        }
        bp.enabled = enabled;
        Ok(())
    }

    /// User breakpoints sorted by address.
    pub fn get_breakpoints(&self) -> Vec<Breakpoint> {
        self.session
            .as_ref()
            .map(|s| s.breakpoints.listed().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_breakpoint(&self, address: u64) -> Option<&Breakpoint> {
        self.session
            .as_ref()
            .and_then(|s| s.breakpoints.get(address))
            .filter(|bp| !bp.temporary)
    }

    /// Flat list of user breakpoints for saving.
    pub fn breakpoint_specs(&self) -> Vec<BreakpointSpec> {
        self.get_breakpoints().iter().map(Breakpoint::spec).collect()
    }

    /// Re-insert saved breakpoints; returns how many were armed.
    ///
    /// Entries that cannot be armed are skipped and logged.
    pub fn rearm(&mut self, specs: &[BreakpointSpec]) -> Result<usize> {
        self.require(ProcessState::Paused)?;
        let mut armed = 0;
        for spec in specs {
            let condition = match spec.condition.as_deref().map(str::parse::<Condition>) {
                Some(Err(err)) => {
                    let _ = self.record::<()>("rearm", Err(err));
                    continue;
                }
                Some(Ok(condition)) => Some(condition),
                None => None,
            };
            let result = self.insert_breakpoint(spec.address, spec.kind, condition, spec.enabled);
            if self.record("rearm", result).is_ok() {
                armed += 1;
            }
        }
        info!(armed, total = specs.len(), "breakpoints re-armed");
        Ok(armed)
    }

    // ---------------------------------------------------------------------
    // Registers and memory
    // ---------------------------------------------------------------------

    pub fn get_registers(&mut self) -> Result<Vec<Register>> {
        let result = self
            .require(ProcessState::Paused)
            .and_then(registers::read_all);
        self.record("read registers", result)
    }

    pub fn get_register(&mut self, name: &str) -> Result<u64> {
        let result = self
            .require(ProcessState::Paused)
            .and_then(|pid| registers::read(pid, name));
        self.record("read register", result)
    }

    pub fn set_register(&mut self, name: &str, value: u64) -> Result<()> {
        let result = self
            .require(ProcessState::Paused)
            .and_then(|pid| registers::write(pid, name, value));
        self.record("write register", result)
    }

    pub fn get_instruction_pointer(&mut self) -> Result<u64> {
        self.get_register("rip")
    }

    pub fn get_stack_pointer(&mut self) -> Result<u64> {
        self.get_register("rsp")
    }

    pub fn get_frame_pointer(&mut self) -> Result<u64> {
        self.get_register("rbp")
    }

    /// Bytes as the process currently sees them, traps included.
    pub fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        let result = self
            .require(ProcessState::Paused)
            .and_then(|pid| memory::read_bytes(pid, address, len));
        self.record("read memory", result)
    }

    /// Bytes with every patched trap replaced by its saved original.
    pub fn read_original_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        let result = self.read_original_inner(address, len);
        self.record("read memory", result)
    }

    fn read_original_inner(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        let pid = self.require(ProcessState::Paused)?;
        let mut bytes = memory::read_bytes(pid, address, len)?;
        self.session()?.breakpoints.unpatch_view(address, &mut bytes);
        Ok(bytes)
    }

    /// Write `data` at `address`.
    ///
    /// Bytes landing under a patched trap update the breakpoint's saved
    /// bytes; the trap stays in place.
    pub fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<()> {
        let result = self.write_inner(address, data);
        self.record("write memory", result)
    }

    fn write_inner(&mut self, address: u64, data: &[u8]) -> Result<()> {
        let pid = self.require(ProcessState::Paused)?;
        let trap = self.arch.trap_instruction();
        let session = self.session_mut()?;
        let shadowed = session.breakpoints.shadow_write(address, data, trap);
        memory::write_bytes(pid, address, &shadowed.bytes)?;
        for (addr, original) in shadowed.originals {
            if let Some(bp) = session.breakpoints.get_mut(addr) {
                bp.original_bytes = Some(original);
            }
        }
        Ok(())
    }

    /// `count` pointer-width words starting at the stack pointer.
    pub fn get_stack_data(&mut self, count: usize) -> Result<Vec<u64>> {
        let result = self.require(ProcessState::Paused).and_then(|pid| {
            let sp = registers::frame(pid)?.sp;
            memory::read_words(pid, sp, count)
        });
        self.record("read stack", result)
    }

    /// Walk the frame-pointer chain from the current frame.
    pub fn get_stack_trace(&mut self) -> Result<Vec<StackFrame>> {
        let result = self.stack_trace_inner();
        self.record("backtrace", result)
    }

    fn stack_trace_inner(&self) -> Result<Vec<StackFrame>> {
        let pid = self.require(ProcessState::Paused)?;
        let regs = registers::frame(pid)?;
        let word = WORD_SIZE as u64;
        let mut frames = Vec::new();
        let (mut pc, mut fp, mut sp) = (regs.pc, regs.fp, regs.sp);

        while frames.len() < self.config.max_backtrace_frames {
            let link = if fp == 0 || fp % word != 0 {
                None
            } else {
                memory::read_words(pid, fp, 2).ok()
            };
            let Some(&[saved_fp, return_address]) = link.as_deref() else {
                frames.push(StackFrame {
                    pc,
                    frame_pointer: fp,
                    stack_pointer: sp,
                    return_address: 0,
                });
                break;
            };
            frames.push(StackFrame {
                pc,
                frame_pointer: fp,
                stack_pointer: sp,
                return_address,
            });
            // frames live at increasing addresses
            if return_address == 0 || saved_fp <= fp {
                break;
            }
            sp = fp + 2 * word;
            pc = return_address;
            fp = saved_fp;
        }
        Ok(frames)
    }

    /// Mappings of the traced process.
    pub fn get_memory_regions(&mut self) -> Result<Vec<MemoryRegion>> {
        let result = self.session().and_then(|s| maps::read_regions(s.pid));
        self.record("read maps", result)
    }

    /// Files mapped into the traced process.
    pub fn get_loaded_modules(&mut self) -> Result<Vec<String>> {
        self.get_memory_regions()
            .map(|regions| maps::module_paths(&regions))
    }

    /// Decode the instruction at the instruction pointer, traps hidden.
    pub fn current_instruction(&mut self) -> Result<Option<Instruction>> {
        let result = self.require(ProcessState::Paused).and_then(|pid| {
            let pc = registers::frame(pid)?.pc;
            self.decode_at(pid, pc)
        });
        self.record("decode", result)
    }

    fn decode_at(&self, pid: Pid, pc: u64) -> Result<Option<Instruction>> {
        let len = MAX_INSTRUCTION_BYTES.min(PAGE_SIZE - pc % PAGE_SIZE);
        let len = usize::try_from(len).unwrap_or_default();
        let mut bytes = memory::read_bytes(pid, pc, len)?;
        self.session()?.breakpoints.unpatch_view(pc, &mut bytes);
        let decoder = InstructionDecoder::for_architecture(self.arch)?;
        Ok(decoder.decode_one(&bytes, pc))
    }
}

impl Drop for ProcessDebugger {
    fn drop(&mut self) {
        let Some(launched) = self.session.as_ref().map(|s| s.launched) else {
            return;
        };
        let _ = if launched {
            self.stop_execution()
        } else {
            self.detach()
        };
    }
}

/// Write the trap over `addr`, returning the bytes it replaced.
fn patch(pid: Pid, addr: u64, trap: &[u8]) -> Result<Vec<u8>> {
    let original = memory::read_bytes(pid, addr, trap.len())?;
    memory::write_bytes(pid, addr, trap)?;
    Ok(original)
}

/// Child side of [`ProcessDebugger::launch`].
fn exec_traced(program: &CStr, argv: &[CString], disable_aslr: bool) -> ! {
    if ptrace::traceme().is_ok() {
        if disable_aslr {
            if let Ok(persona) = personality::get() {
                let _ = personality::set(persona | Persona::ADDR_NO_RANDOMIZE);
            }
        }
        let _ = execv(program, argv);
    }
    // SAFETY: _exit skips the parent's atexit handlers and stdio buffers.
    unsafe { nix::libc::_exit(127) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_session_errors() {
        let mut dbg = ProcessDebugger::new();
        assert!(matches!(dbg.continue_execution(), Err(TraceError::NoActiveSession)));
        assert!(matches!(dbg.step_into(), Err(TraceError::NoActiveSession)));
        assert!(matches!(
            dbg.add_breakpoint(0x1000, BreakpointKind::Software),
            Err(TraceError::NoActiveSession)
        ));
        assert!(matches!(dbg.detach(), Err(TraceError::NoActiveSession)));
        assert_eq!(dbg.current_state(), ProcessState::NotRunning);
        assert_eq!(dbg.last_error(), Some("No active debug session"));
        assert!(dbg.get_breakpoints().is_empty());
        assert!(!dbg.is_breakpoint_hit(0x1000));
    }

    #[test]
    fn test_launch_missing_file() {
        let mut dbg = ProcessDebugger::new();
        let err = dbg.launch("/nonexistent/elfdbg-target", &[]).unwrap_err();
        assert!(matches!(err, TraceError::Process(_)));
        assert_eq!(dbg.current_state(), ProcessState::NotRunning);
        assert!(!dbg.has_session());
        assert!(dbg.last_error().is_some_and(|e| e.contains("not an executable")));
    }

    #[test]
    fn test_wait_without_session() {
        let mut dbg = ProcessDebugger::new();
        assert!(dbg.wait_for_stop().is_err());
        assert!(dbg.poll_stop().is_err());
    }
}
