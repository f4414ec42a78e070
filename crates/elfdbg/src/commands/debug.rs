//! Interactive debugger loop.

use std::io::{self, BufRead, Write};
use std::path::Path;

use elfdbg::{AnalysisOptions, DebugSession, ProjectFile, StopReason, parse_address};
use tracing::{error, info, warn};

use super::analyze;
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, debugger_config};
use crate::terminal;

const DEFAULT_EXAMINE_LEN: usize = 64;
const DEFAULT_STACK_WORDS: usize = 8;

pub struct DebugArgs<'a> {
    pub input: Option<&'a Path>,
    pub pid: Option<i32>,
    pub project: Option<&'a Path>,
    pub aslr: bool,
    pub args: &'a [String],
    pub options: AnalysisOptions,
}

/// One line of debugger input.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Break {
        location: String,
        condition: Option<String>,
    },
    Delete(String),
    Enable(String),
    Disable(String),
    List,
    Continue,
    Step(usize),
    Next,
    Finish,
    Regs(Option<String>),
    Set { register: String, value: u64 },
    Examine { location: String, len: usize },
    Stack(usize),
    Backtrace,
    Maps,
    Info,
    Kill,
    Detach,
    Quit,
}

/// Hex with `0x`, otherwise decimal.
fn parse_value(text: &str) -> Option<u64> {
    if text.starts_with("0x") || text.starts_with("0X") {
        parse_address(text)
    } else {
        text.parse().ok()
    }
}

fn parse_count(arg: Option<&str>, default: usize) -> Result<usize, String> {
    arg.map_or(Ok(default), |s| {
        s.parse().map_err(|_| format!("bad count: {s}"))
    })
}

impl Command {
    fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            // empty line steps
            return Ok(Self::Step(1));
        };
        let args: Vec<&str> = parts.collect();
        let first = args.first().copied();
        let location = |usage: &str| {
            first
                .map(str::to_string)
                .ok_or_else(|| format!("Usage: {usage}"))
        };

        let command = match cmd {
            "help" | "h" | "?" => Self::Help,
            "break" | "b" => {
                let location = location("break <location> [if <reg> <op> <value>]")?;
                let condition = match args.get(1) {
                    None => None,
                    Some(&"if") if args.len() > 2 => Some(args[2..].join(" ")),
                    Some(_) => return Err("Usage: break <location> [if <reg> <op> <value>]".into()),
                };
                Self::Break {
                    location,
                    condition,
                }
            }
            "delete" | "d" => Self::Delete(location("delete <location>")?),
            "enable" => Self::Enable(location("enable <location>")?),
            "disable" => Self::Disable(location("disable <location>")?),
            "list" | "l" => Self::List,
            "continue" | "c" => Self::Continue,
            "step" | "s" | "si" => Self::Step(parse_count(first, 1)?),
            "next" | "n" | "ni" => Self::Next,
            "finish" | "fin" => Self::Finish,
            "regs" | "r" => Self::Regs(first.map(str::to_string)),
            "set" => {
                let (Some(register), Some(value)) = (first, args.get(1)) else {
                    return Err("Usage: set <register> <value>".into());
                };
                let value = parse_value(value).ok_or_else(|| format!("bad value: {value}"))?;
                Self::Set {
                    register: register.to_string(),
                    value,
                }
            }
            "x" | "mem" | "m" => Self::Examine {
                location: location("x <location> [len]")?,
                len: parse_count(args.get(1).copied(), DEFAULT_EXAMINE_LEN)?,
            },
            "stack" => Self::Stack(parse_count(first, DEFAULT_STACK_WORDS)?),
            "bt" | "backtrace" => Self::Backtrace,
            "maps" => Self::Maps,
            "info" | "i" => Self::Info,
            "kill" => Self::Kill,
            "detach" => Self::Detach,
            "quit" | "q" | "exit" => Self::Quit,
            other => return Err(format!("Unknown command: {other}. Type 'help' for commands.")),
        };
        Ok(command)
    }
}

fn print_help() {
    println!("Commands:");
    println!("  break <loc> [if <cond>], b  - Set a breakpoint (symbol, symbol+0xN or hex)");
    println!("  delete <loc>, d             - Delete breakpoint");
    println!("  enable <loc> / disable <loc> - Toggle a breakpoint");
    println!("  list, l                     - List breakpoints");
    println!("  continue, c                 - Continue until breakpoint or exit");
    println!("  step [N], s [N]             - Step N instructions (default: 1)");
    println!("  next, n                     - Step over calls");
    println!("  finish                      - Run until the current function returns");
    println!("  regs [name], r              - Show registers");
    println!("  set <reg> <value>           - Write a register");
    println!("  x <loc|$reg> [len]          - Show memory (hex)");
    println!("  stack [N]                   - Show N words at the stack pointer");
    println!("  bt                          - Frame-pointer backtrace");
    println!("  maps                        - Memory mappings");
    println!("  info                        - Session state");
    println!("  kill / detach               - End the session");
    println!("  quit, q                     - Exit debugger");
    println!();
}

pub fn cmd_debug(args: &DebugArgs<'_>) -> i32 {
    let mut project = match load_project(args) {
        Ok(project) => project,
        Err(e) => {
            error!("{e}");
            return EXIT_FAILURE;
        }
    };

    let binary = args.input.map(Path::to_path_buf).or_else(|| project.binary.clone());
    let analysis = match &binary {
        Some(path) => match analyze(path, &args.options) {
            Some(analysis) => Some(analysis),
            None => return EXIT_FAILURE,
        },
        None => None,
    };
    let mut session = DebugSession::new(analysis, debugger_config(args.aslr));

    let started = match args.pid {
        Some(pid) => session.attach(pid).map(|()| pid),
        None => session.launch(args.args),
    };
    match started {
        Ok(pid) => terminal::success(&format!("Debugging pid {pid}")),
        Err(e) => {
            error!("{e}");
            return EXIT_FAILURE;
        }
    }

    if args.project.is_some() && !project.breakpoints.is_empty() {
        match session.apply_project(&project) {
            Ok(armed) => info!(armed, "re-armed project breakpoints"),
            Err(e) => warn!("cannot re-arm project breakpoints: {e}"),
        }
    }
    if project.binary.is_none() {
        project.binary = binary;
    }

    println!("Interactive debugger. Type 'help' for commands.");
    report_location(&mut session);
    run_loop(&mut session, &mut project, args.project.is_some());

    if let Some(path) = args.project {
        match project.save(path) {
            Ok(()) => terminal::info(&format!("Saved project to {}", path.display())),
            Err(e) => {
                error!("{e}");
                return EXIT_FAILURE;
            }
        }
    }
    EXIT_SUCCESS
}

fn load_project(args: &DebugArgs<'_>) -> elfdbg::Result<ProjectFile> {
    match args.project {
        Some(path) if path.exists() => ProjectFile::load(path),
        _ => Ok(ProjectFile::new(args.input.map(Path::to_path_buf))),
    }
}

fn run_loop(session: &mut DebugSession, project: &mut ProjectFile, track_project: bool) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("(elfdbg) ");
        let _ = stdout.flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            println!();
            break;
        }

        let command = match Command::parse(line.trim()) {
            Ok(command) => command,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        let changes_breakpoints = matches!(
            command,
            Command::Break { .. } | Command::Delete(_) | Command::Enable(_) | Command::Disable(_)
        );
        if let Err(e) = execute(session, command) {
            terminal::error(&e.to_string());
        }
        // the table is gone once the process exits, so snapshot while it lives
        if track_project && changes_breakpoints && session.debugger().has_session() {
            project.set_breakpoints(session.project_breakpoints());
        }
    }
}

/// Like [`DebugSession::resolve_address`], plus `$reg` for a register value.
fn resolve(session: &mut DebugSession, location: &str) -> elfdbg::Result<u64> {
    match location.strip_prefix('$') {
        Some(register) => Ok(session.debugger_mut().get_register(register)?),
        None => session.resolve_address(location),
    }
}

fn execute(session: &mut DebugSession, command: Command) -> elfdbg::Result<()> {
    match command {
        Command::Help => print_help(),
        Command::Break {
            location,
            condition,
        } => {
            let addr = session.break_at(&location, condition.as_deref())?;
            println!("Breakpoint set at {}", session.describe(addr));
        }
        Command::Delete(location) => {
            let addr = session.resolve_address(&location)?;
            session.debugger_mut().remove_breakpoint(addr)?;
            println!("Breakpoint deleted at {}", session.describe(addr));
        }
        Command::Enable(location) => {
            let addr = session.resolve_address(&location)?;
            session.debugger_mut().enable_breakpoint(addr)?;
        }
        Command::Disable(location) => {
            let addr = session.resolve_address(&location)?;
            session.debugger_mut().disable_breakpoint(addr)?;
        }
        Command::List => {
            let breakpoints = session.debugger().get_breakpoints();
            if breakpoints.is_empty() {
                println!("No breakpoints set");
            }
            for (i, bp) in breakpoints.iter().enumerate() {
                println!("  {i}: {bp}  {}", session.describe(bp.address));
            }
        }
        Command::Continue => {
            let reason = session.continue_and_wait()?;
            report(session, reason);
        }
        Command::Step(count) => {
            for _ in 0..count {
                let reason = session.step_into()?;
                if !matches!(reason, StopReason::SteppedTo(_)) || count == 1 {
                    report(session, reason);
                }
                if reason.is_terminal() {
                    break;
                }
            }
            if count > 1 && session.debugger().has_session() {
                report_location(session);
            }
        }
        Command::Next => {
            let reason = session.step_over()?;
            report(session, reason);
        }
        Command::Finish => {
            let reason = session.step_out()?;
            report(session, reason);
        }
        Command::Regs(None) => print_registers(session)?,
        Command::Regs(Some(name)) => {
            let value = session.debugger_mut().get_register(&name)?;
            println!("{name} = {value:#x} ({value})");
        }
        Command::Set { register, value } => {
            session.debugger_mut().set_register(&register, value)?;
            println!("{register} = {value:#x}");
        }
        Command::Examine { location, len } => {
            let addr = resolve(session, &location)?;
            let bytes = session.debugger_mut().read_original_memory(addr, len)?;
            print_memory(addr, &bytes);
        }
        Command::Stack(count) => {
            let sp = session.debugger_mut().get_stack_pointer()?;
            let words = session.debugger_mut().get_stack_data(count)?;
            for (i, word) in words.iter().enumerate() {
                let addr = sp + (i as u64) * 8;
                println!("  {addr:#x}: {word:#018x}  {}", session.describe(*word));
            }
        }
        Command::Backtrace => {
            let frames = session.debugger_mut().get_stack_trace()?;
            for (i, frame) in frames.iter().enumerate() {
                println!(
                    "  #{i:<2} {}  fp={:#x} sp={:#x}",
                    session.describe(frame.pc),
                    frame.frame_pointer,
                    frame.stack_pointer
                );
            }
        }
        Command::Maps => {
            for region in session.debugger_mut().get_memory_regions()? {
                println!("  {region}");
            }
        }
        Command::Info => print_info(session),
        Command::Kill => {
            session.kill()?;
            println!("Process killed");
        }
        Command::Detach => {
            session.detach()?;
            println!("Detached");
        }
        Command::Quit => {}
    }
    Ok(())
}

/// Print a stop and, while the process lives, where it stopped.
fn report(session: &mut DebugSession, reason: StopReason) {
    match reason {
        StopReason::BreakpointHit(addr) => {
            println!("Breakpoint hit at {}", session.describe(addr));
        }
        StopReason::SteppedTo(_) => {}
        StopReason::SignalDelivered(_) => println!("Program {reason}"),
        StopReason::Exited(_) | StopReason::Terminated(_) => {
            println!("Program {reason}");
            return;
        }
    }
    report_location(session);
}

fn report_location(session: &mut DebugSession) {
    match session.current_instruction() {
        Ok(Some(insn)) => println!(
            "=> {}:  {} {}",
            session.describe(insn.address),
            insn.mnemonic,
            insn.operands
        ),
        Ok(None) => match session.location() {
            Ok(location) => println!("=> {location}"),
            Err(e) => terminal::error(&e.to_string()),
        },
        Err(e) => terminal::error(&e.to_string()),
    }
}

fn print_registers(session: &mut DebugSession) -> elfdbg::Result<()> {
    let registers = session.debugger_mut().get_registers()?;
    for (i, reg) in registers.iter().enumerate() {
        print!("{:<8} = {:#018x}  ", reg.name.to_ascii_lowercase(), reg.value);
        if (i + 1) % 3 == 0 {
            println!();
        }
    }
    if registers.len() % 3 != 0 {
        println!();
    }
    Ok(())
}

fn print_info(session: &mut DebugSession) {
    let debugger = session.debugger();
    println!("State:       {}", debugger.current_state());
    if let Some(pid) = debugger.pid() {
        println!("Pid:         {pid}");
    }
    if let Some(stop) = debugger.last_stop() {
        println!("Last stop:   {stop}");
    }
    if let Some(error) = debugger.last_error() {
        println!("Last error:  {error}");
    }
    println!("Breakpoints: {}", debugger.get_breakpoints().len());
    if let Some(target) = session.target() {
        println!("Target:      {}", target.display());
    }
    println!("Load bias:   {:#x}", session.load_bias());
    if session.debugger().has_session() {
        report_location(session);
    }
}

fn print_memory(addr: u64, bytes: &[u8]) {
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let mut line = format!("{:#010x}:  ", addr + (i * 16) as u64);
        for byte in chunk {
            line.push_str(&format!("{byte:02x} "));
        }
        for _ in chunk.len()..16 {
            line.push_str("   ");
        }
        line.push_str(" |");
        for &byte in chunk {
            let c = byte as char;
            line.push(if c.is_ascii_graphic() || c == ' ' { c } else { '.' });
        }
        line.push('|');
        println!("{line}");
    }
}
