//! Drive a real traced process.
//!
//! Most tests launch `/bin/true`, which stops in the dynamic loader's entry
//! point. The loader's `_start` calls `_dl_start` within a few instructions
//! and that call returns, which gives a deterministic call to step over and
//! out of. Tests skip when the host cannot trace.

use std::path::Path;
use std::thread;
use std::time::Duration;

use elfdbg_isa::Instruction;
use elfdbg_trace::{
    BreakpointKind, BreakpointSpec, DebuggerConfig, ProcessDebugger, ProcessState, StopReason,
    TraceError,
};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

const MAX_STEPS: usize = 10_000;

fn launch_host(candidates: &[&str], args: &[&str]) -> Option<ProcessDebugger> {
    if !cfg!(target_arch = "x86_64") {
        eprintln!("Skipping test: register access needs an x86-64 host");
        return None;
    }
    let Some(path) = candidates.iter().find(|p| Path::new(p).exists()) else {
        eprintln!("Skipping test: none of {candidates:?} on this host");
        return None;
    };
    let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
    let mut dbg = ProcessDebugger::with_config(DebuggerConfig::default());
    match dbg.launch(path, &args) {
        Ok(_) => Some(dbg),
        Err(err) => {
            eprintln!("Skipping test: cannot trace {path}: {err}");
            None
        }
    }
}

fn launch_true() -> Option<ProcessDebugger> {
    launch_host(&["/bin/true", "/usr/bin/true"], &[])
}

/// A target that keeps running long enough to be interrupted.
fn launch_sleep() -> Option<ProcessDebugger> {
    launch_host(&["/bin/sleep", "/usr/bin/sleep"], &["5"])
}

fn sigstop() -> StopReason {
    StopReason::SignalDelivered(Signal::SIGSTOP as i32)
}

/// Run state letter from `/proc/<pid>/stat`.
fn proc_state(pid: Pid) -> Option<char> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    stat.rsplit_once(')')?.1.trim_start().chars().next()
}

/// Single-step until the next instruction is a call.
fn step_to_call(dbg: &mut ProcessDebugger) -> Option<Instruction> {
    for _ in 0..MAX_STEPS {
        let insn = dbg.current_instruction().unwrap()?;
        if insn.is_call {
            return Some(insn);
        }
        if dbg.step_into().unwrap().is_terminal() {
            return None;
        }
    }
    None
}

#[test]
fn test_attach_to_missing_process() {
    let mut dbg = ProcessDebugger::new();
    let err = dbg.attach(0x7fff_fff0).unwrap_err();
    assert!(matches!(err, TraceError::Process(_)));
    assert_eq!(dbg.current_state(), ProcessState::NotRunning);
    assert!(!dbg.has_session());
    assert!(dbg.last_error().is_some());
}

#[test]
fn test_launch_pauses_at_entry() {
    let Some(mut dbg) = launch_true() else { return };
    assert_eq!(dbg.current_state(), ProcessState::Paused);
    assert!(dbg.pid().is_some());

    let regs = dbg.get_registers().unwrap();
    let rip = regs.iter().find(|r| r.name == "RIP").unwrap();
    assert_eq!(rip.value, dbg.get_instruction_pointer().unwrap());
    assert!(dbg.get_stack_pointer().unwrap() != 0);

    // launching again while a session is live is refused
    assert!(matches!(
        dbg.launch("/bin/true", &[]),
        Err(TraceError::InvalidState(ProcessState::Paused))
    ));
    assert_eq!(dbg.current_state(), ProcessState::Paused);

    let modules = dbg.get_loaded_modules().unwrap();
    assert!(!modules.is_empty());
}

#[test]
fn test_insert_remove_restores_bytes() {
    let Some(mut dbg) = launch_true() else { return };
    let pc = dbg.get_instruction_pointer().unwrap();
    let before = dbg.read_memory(pc, 8).unwrap();

    dbg.add_breakpoint(pc, BreakpointKind::Software).unwrap();
    let patched = dbg.read_memory(pc, 8).unwrap();
    assert_eq!(patched[0], 0xCC);
    assert_eq!(&patched[1..], &before[1..]);
    assert_eq!(dbg.read_original_memory(pc, 8).unwrap(), before);
    assert_eq!(dbg.get_breakpoint(pc).unwrap().original_byte(), Some(before[0]));

    dbg.remove_breakpoint(pc).unwrap();
    assert_eq!(dbg.read_memory(pc, 8).unwrap(), before);
    assert!(dbg.get_breakpoints().is_empty());
    assert!(matches!(
        dbg.remove_breakpoint(pc),
        Err(TraceError::UnknownBreakpoint(_))
    ));
}

#[test]
fn test_breakpoint_rejections() {
    let Some(mut dbg) = launch_true() else { return };
    let pc = dbg.get_instruction_pointer().unwrap();
    assert!(matches!(
        dbg.add_breakpoint(pc, BreakpointKind::Hardware),
        Err(TraceError::UnsupportedBreakpoint(BreakpointKind::Hardware))
    ));
    assert!(matches!(
        dbg.add_breakpoint(0x10, BreakpointKind::Software),
        Err(TraceError::InvalidAddress(0x10))
    ));
    assert!(matches!(
        dbg.add_conditional_breakpoint(pc, "rax ~ 1"),
        Err(TraceError::InvalidCondition(_))
    ));
    assert!(dbg.get_breakpoints().is_empty());
    assert_eq!(dbg.current_state(), ProcessState::Paused);
}

#[test]
fn test_write_memory_keeps_trap() {
    let Some(mut dbg) = launch_true() else { return };
    let pc = dbg.get_instruction_pointer().unwrap();
    let before = dbg.read_memory(pc, 4).unwrap();
    dbg.add_breakpoint(pc + 1, BreakpointKind::Software).unwrap();

    dbg.write_memory(pc, &[0x90, 0x90, 0x90]).unwrap();
    assert_eq!(dbg.read_memory(pc, 4).unwrap(), vec![0x90, 0xCC, 0x90, before[3]]);
    assert_eq!(dbg.get_breakpoint(pc + 1).unwrap().original_byte(), Some(0x90));

    dbg.remove_breakpoint(pc + 1).unwrap();
    assert_eq!(dbg.read_memory(pc, 4).unwrap(), vec![0x90, 0x90, 0x90, before[3]]);
}

#[test]
fn test_step_over_call() {
    let Some(mut dbg) = launch_true() else { return };
    let Some(call) = step_to_call(&mut dbg) else {
        eprintln!("Skipping test: no call reached");
        return;
    };
    let stop = dbg.step_over().unwrap();
    if stop.is_terminal() {
        eprintln!("Skipping test: first call does not return");
        return;
    }
    assert_eq!(stop, StopReason::SteppedTo(call.end_address()));
    assert_eq!(dbg.get_instruction_pointer().unwrap(), call.end_address());
    // the temporary breakpoint is gone
    assert!(dbg.get_breakpoints().is_empty());
    let bytes = dbg.read_memory(call.end_address(), 1).unwrap();
    assert_ne!(bytes[0], 0xCC);
}

#[test]
fn test_step_into_then_out() {
    let Some(mut dbg) = launch_true() else { return };
    let Some(call) = step_to_call(&mut dbg) else {
        eprintln!("Skipping test: no call reached");
        return;
    };
    dbg.step_into().unwrap();
    let inside = dbg.get_instruction_pointer().unwrap();
    if call.target_address != 0 {
        assert_eq!(inside, call.target_address);
    }
    let frames = dbg.get_stack_trace().unwrap();
    assert_eq!(frames[0].pc, inside);

    let stop = dbg.step_out().unwrap();
    if stop.is_terminal() {
        eprintln!("Skipping test: first call does not return");
        return;
    }
    assert_eq!(dbg.get_instruction_pointer().unwrap(), call.end_address());
}

#[test]
fn test_removed_breakpoint_leaves_neighbour() {
    let Some(mut dbg) = launch_true() else { return };
    let Some(call) = step_to_call(&mut dbg) else {
        eprintln!("Skipping test: no call reached");
        return;
    };
    let a = call.end_address();
    let next = dbg.step_over().unwrap();
    if next.is_terminal() {
        eprintln!("Skipping test: first call does not return");
        return;
    }
    let after_a = dbg.current_instruction().unwrap().unwrap();
    let b = after_a.end_address();

    // A is the current pc, B the instruction after it
    dbg.add_breakpoint(a, BreakpointKind::Software).unwrap();
    dbg.add_breakpoint(b, BreakpointKind::Software).unwrap();
    dbg.remove_breakpoint(a).unwrap();
    assert_eq!(dbg.read_memory(b, 1).unwrap(), vec![0xCC]);

    let stop = dbg.continue_and_wait().unwrap();
    assert_eq!(stop, StopReason::BreakpointHit(b));
    assert!(dbg.is_breakpoint_hit(b));
    assert!(!dbg.is_breakpoint_hit(a));
    assert_eq!(dbg.get_instruction_pointer().unwrap(), b);
    assert_eq!(dbg.get_breakpoint(b).unwrap().hit_count, 1);

    // continuing past the hit breakpoint does not re-trap on it
    let stop = dbg.continue_and_wait().unwrap();
    assert_eq!(stop, StopReason::Exited(0));
    assert_eq!(dbg.current_state(), ProcessState::Stopped);
    assert!(!dbg.has_session());
}

#[test]
fn test_false_condition_runs_through() {
    let Some(mut dbg) = launch_true() else { return };
    let Some(call) = step_to_call(&mut dbg) else {
        eprintln!("Skipping test: no call reached");
        return;
    };
    dbg.add_conditional_breakpoint(call.end_address(), "rip == 0x1")
        .unwrap();
    let stop = dbg.continue_and_wait().unwrap();
    assert_eq!(stop, StopReason::Exited(0));
}

#[test]
fn test_rearm_specs() {
    let Some(mut dbg) = launch_true() else { return };
    let pc = dbg.get_instruction_pointer().unwrap();
    let specs = vec![
        BreakpointSpec::software(pc),
        BreakpointSpec {
            address: pc + 3,
            kind: BreakpointKind::Conditional,
            enabled: false,
            condition: Some("rax != 0".into()),
        },
        // unmapped: skipped
        BreakpointSpec::software(0x10),
    ];
    assert_eq!(dbg.rearm(&specs).unwrap(), 2);
    let saved = dbg.breakpoint_specs();
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0], BreakpointSpec::software(pc));
    assert!(!saved[1].enabled);
    assert_eq!(saved[1].condition.as_deref(), Some("rax != 0x0"));
}

#[test]
fn test_registers_and_stop() {
    let Some(mut dbg) = launch_true() else { return };
    dbg.set_register("RAX", 0x1234).unwrap();
    assert_eq!(dbg.get_register("rax").unwrap(), 0x1234);
    assert!(matches!(
        dbg.get_register("xmm0"),
        Err(TraceError::UnknownRegister(_))
    ));
    let stack = dbg.get_stack_data(4).unwrap();
    assert_eq!(stack.len(), 4);

    dbg.continue_execution().unwrap();
    assert!(dbg.current_state() == ProcessState::Running || dbg.last_stop().is_some());
    dbg.stop_execution().unwrap();
    assert_eq!(dbg.current_state(), ProcessState::Stopped);
    assert!(dbg.pid().is_none());
    assert!(matches!(dbg.step_into(), Err(TraceError::NoActiveSession)));
}

#[test]
fn test_detach_restores_code() {
    let Some(mut dbg) = launch_true() else { return };
    let pc = dbg.get_instruction_pointer().unwrap();
    dbg.add_breakpoint(pc, BreakpointKind::Software).unwrap();
    dbg.detach().unwrap();
    assert_eq!(dbg.current_state(), ProcessState::NotRunning);
    assert!(!dbg.has_session());
}

#[test]
fn test_poll_then_pause_running_process() {
    let Some(mut dbg) = launch_sleep() else {
        return;
    };
    dbg.continue_execution().unwrap();
    assert_eq!(dbg.current_state(), ProcessState::Running);
    assert_eq!(dbg.poll_stop().unwrap(), None);
    assert_eq!(dbg.current_state(), ProcessState::Running);

    assert_eq!(dbg.pause_execution().unwrap(), sigstop());
    assert_eq!(dbg.current_state(), ProcessState::Paused);
    assert_eq!(dbg.last_stop(), Some(sigstop()));
    assert!(dbg.get_instruction_pointer().is_ok());

    // pausing twice is rejected rather than queueing another SIGSTOP
    assert!(matches!(
        dbg.pause_execution(),
        Err(TraceError::InvalidState(ProcessState::Paused))
    ));

    dbg.stop_execution().unwrap();
    assert_eq!(dbg.current_state(), ProcessState::Stopped);
    assert!(!dbg.has_session());
}

#[test]
fn test_pause_leaves_no_stop_behind() {
    let Some(mut dbg) = launch_sleep() else {
        return;
    };
    for _ in 0..3 {
        dbg.continue_execution().unwrap();
        assert_eq!(dbg.pause_execution().unwrap(), sigstop());
    }

    // a SIGSTOP left queued by a pause would stop the process right away
    dbg.continue_execution().unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(dbg.poll_stop().unwrap(), None);
    assert_eq!(dbg.current_state(), ProcessState::Running);

    dbg.stop_execution().unwrap();
}

#[test]
fn test_detach_while_running_leaves_process_running() {
    let Some(mut dbg) = launch_sleep() else {
        return;
    };
    let pid = dbg.pid().unwrap();
    dbg.continue_execution().unwrap();
    dbg.detach().unwrap();
    assert_eq!(dbg.current_state(), ProcessState::NotRunning);

    thread::sleep(Duration::from_millis(100));
    let state = proc_state(pid);
    let _ = signal::kill(pid, Signal::SIGKILL);
    let _ = waitpid(pid, None);
    assert!(
        matches!(state, Some('S' | 'R')),
        "detached process in state {state:?}"
    );
}

#[test]
fn test_attach_then_detach_releases_process() {
    if !cfg!(target_arch = "x86_64") {
        eprintln!("Skipping test: register access needs an x86-64 host");
        return;
    }
    let Ok(mut child) = std::process::Command::new("sleep").arg("5").spawn() else {
        eprintln!("Skipping test: cannot spawn sleep");
        return;
    };
    let pid = Pid::from_raw(i32::try_from(child.id()).unwrap());

    let mut dbg = ProcessDebugger::new();
    if let Err(err) = dbg.attach(pid.as_raw()) {
        eprintln!("Skipping test: cannot attach to {pid}: {err}");
        let _ = child.kill();
        let _ = child.wait();
        return;
    }
    assert_eq!(dbg.current_state(), ProcessState::Paused);
    assert_eq!(dbg.pid(), Some(pid));
    dbg.detach().unwrap();
    assert!(!dbg.has_session());

    thread::sleep(Duration::from_millis(100));
    let state = proc_state(pid);
    let _ = child.kill();
    let _ = child.wait();
    assert!(
        matches!(state, Some('S' | 'R')),
        "released process in state {state:?}"
    );
}
