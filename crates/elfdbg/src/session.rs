//! A debugged process paired with the static analysis of its binary.

use std::path::{Path, PathBuf};

use elfdbg_elf::{ET_DYN, ProgramHeader};
use elfdbg_isa::Instruction;
use elfdbg_trace::{
    BreakpointKind, BreakpointSpec, DebuggerConfig, MemoryRegion, ProcessDebugger, StopReason,
};
use tracing::{debug, info, warn};

use crate::metrics::{self, StepKind};
use crate::{Analysis, Error, ProjectFile, Result, parse_address};

const PAGE_MASK: u64 = 0xfff;

/// Distance between where the lowest `PT_LOAD` segment of `target` was
/// linked and where it is mapped in `regions`.
///
/// `None` when no region is backed by `target`.
pub fn load_bias(
    regions: &[MemoryRegion],
    target: &Path,
    segments: &[ProgramHeader],
) -> Option<u64> {
    let mapped = regions
        .iter()
        .filter(|r| Path::new(&r.name) == target)
        .map(|r| r.start_address)
        .min()?;
    let linked = segments
        .iter()
        .filter(|ph| ph.is_load())
        .map(|ph| ph.vaddr & !PAGE_MASK)
        .min()
        .unwrap_or(0);
    mapped.checked_sub(linked)
}

/// [`ProcessDebugger`] plus optional [`Analysis`] of the traced binary.
///
/// Symbol names resolve to link-time addresses; the session shifts them by
/// the load bias of position-independent executables. Project files store
/// link-time addresses so they survive address randomization.
pub struct DebugSession {
    analysis: Option<Analysis>,
    debugger: ProcessDebugger,
    load_bias: u64,
}

impl DebugSession {
    pub fn new(analysis: Option<Analysis>, config: DebuggerConfig) -> Self {
        Self {
            analysis,
            debugger: ProcessDebugger::with_config(config),
            load_bias: 0,
        }
    }

    pub const fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    pub const fn debugger(&self) -> &ProcessDebugger {
        &self.debugger
    }

    pub const fn debugger_mut(&mut self) -> &mut ProcessDebugger {
        &mut self.debugger
    }

    pub const fn load_bias(&self) -> u64 {
        self.load_bias
    }

    /// Path of the analyzed binary.
    pub fn target(&self) -> Option<&Path> {
        self.analysis.as_ref().and_then(|a| a.image().path())
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Launch the analyzed binary; returns the child pid.
    pub fn launch(&mut self, args: &[String]) -> Result<i32> {
        let path = self.target().map(Path::to_path_buf).ok_or(Error::NoTarget)?;
        let pid = self.debugger.launch(&path, args)?;
        self.refresh_load_bias();
        Ok(pid.as_raw())
    }

    pub fn attach(&mut self, pid: i32) -> Result<()> {
        self.debugger.attach(pid)?;
        self.refresh_load_bias();
        Ok(())
    }

    pub fn detach(&mut self) -> Result<()> {
        self.debugger.detach()?;
        Ok(())
    }

    pub fn kill(&mut self) -> Result<()> {
        self.debugger.stop_execution()?;
        Ok(())
    }

    fn refresh_load_bias(&mut self) {
        self.load_bias = 0;
        let Some(analysis) = &self.analysis else {
            return;
        };
        let image = analysis.image();
        if image.header().e_type != ET_DYN {
            return;
        }
        let Some(path) = image.path() else {
            return;
        };
        let target: PathBuf = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        match self.debugger.get_memory_regions() {
            Ok(regions) => match load_bias(&regions, &target, image.segments()) {
                Some(bias) => {
                    debug!(bias = format_args!("{bias:#x}"), "load bias");
                    self.load_bias = bias;
                }
                None => warn!(path = %target.display(), "binary not found in process mappings"),
            },
            Err(err) => warn!(error = %err, "cannot read mappings for load bias"),
        }
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    pub fn step_into(&mut self) -> Result<StopReason> {
        let reason = self.debugger.step_into()?;
        metrics::record_step(StepKind::Into);
        Ok(self.observe(reason))
    }

    pub fn step_over(&mut self) -> Result<StopReason> {
        let reason = self.debugger.step_over()?;
        metrics::record_step(StepKind::Over);
        Ok(self.observe(reason))
    }

    pub fn step_out(&mut self) -> Result<StopReason> {
        let reason = self.debugger.step_out()?;
        metrics::record_step(StepKind::Out);
        Ok(self.observe(reason))
    }

    /// Resume and block until the next stop.
    pub fn continue_and_wait(&mut self) -> Result<StopReason> {
        let reason = self.debugger.continue_and_wait()?;
        Ok(self.observe(reason))
    }

    fn observe(&self, reason: StopReason) -> StopReason {
        if let StopReason::BreakpointHit(addr) = reason {
            metrics::record_breakpoint_hit();
            info!(at = %self.describe(addr), "breakpoint hit");
        }
        reason
    }

    // ---------------------------------------------------------------------
    // Addresses
    // ---------------------------------------------------------------------

    /// Runtime address of a symbol (`main`, `main+0x10`) or a hex address.
    ///
    /// Hex addresses are taken as runtime addresses unchanged.
    pub fn resolve_address(&self, location: &str) -> Result<u64> {
        if let Some(addr) = self.analysis.as_ref().and_then(|a| a.resolve_symbol(location)) {
            return Ok(addr.wrapping_add(self.load_bias));
        }
        parse_address(location).ok_or_else(|| Error::UnknownSymbol(location.trim().to_string()))
    }

    /// Link-time address for a runtime address.
    pub fn to_static(&self, runtime: u64) -> u64 {
        runtime.checked_sub(self.load_bias).unwrap_or(runtime)
    }

    pub const fn to_runtime(&self, address: u64) -> u64 {
        address.wrapping_add(self.load_bias)
    }

    /// `0x5555...1139 <main+0x4>` style rendering of a runtime address.
    pub fn describe(&self, runtime: u64) -> String {
        match self
            .analysis
            .as_ref()
            .and_then(|a| a.symbolize(self.to_static(runtime)))
        {
            Some(symbol) => format!("{runtime:#x} <{symbol}>"),
            None => format!("{runtime:#x}"),
        }
    }

    /// Current instruction pointer, described.
    pub fn location(&mut self) -> Result<String> {
        let pc = self.debugger.get_instruction_pointer()?;
        Ok(self.describe(pc))
    }

    pub fn current_instruction(&mut self) -> Result<Option<Instruction>> {
        Ok(self.debugger.current_instruction()?)
    }

    // ---------------------------------------------------------------------
    // Breakpoints
    // ---------------------------------------------------------------------

    /// Set a breakpoint at `location`, conditional when `condition` is given.
    /// Returns the runtime address.
    pub fn break_at(&mut self, location: &str, condition: Option<&str>) -> Result<u64> {
        let addr = self.resolve_address(location)?;
        match condition {
            Some(condition) => self.debugger.add_conditional_breakpoint(addr, condition)?,
            None => self.debugger.add_breakpoint(addr, BreakpointKind::Software)?,
        }
        Ok(addr)
    }

    /// Re-arm the breakpoints saved in `project`; returns how many were armed.
    pub fn apply_project(&mut self, project: &ProjectFile) -> Result<usize> {
        let specs: Vec<BreakpointSpec> = project
            .breakpoints
            .values()
            .map(|spec| BreakpointSpec {
                address: self.to_runtime(spec.address),
                ..spec.clone()
            })
            .collect();
        Ok(self.debugger.rearm(&specs)?)
    }

    /// Current user breakpoints with link-time addresses, ready for saving.
    pub fn project_breakpoints(&self) -> Vec<BreakpointSpec> {
        self.debugger
            .breakpoint_specs()
            .into_iter()
            .map(|spec| BreakpointSpec {
                address: self.to_static(spec.address),
                ..spec
            })
            .collect()
    }
}
