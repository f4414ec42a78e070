//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use elfdbg::{
    AnalysisOptions, DEFAULT_MAX_CODE_BYTES, DebuggerConfig, DecodeOptions, LoadOptions,
};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "elfdbg")]
#[command(about = "ELF inspector and ptrace debugger")]
#[command(version)]
pub struct Cli {
    /// Show metrics summary after execution
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Loader and decoder bounds shared by every subcommand that reads an ELF.
#[derive(Args, Clone, Copy, Debug)]
pub struct LoadArgs {
    /// Upper bound on executable segment bytes to decode
    #[arg(long, default_value_t = DEFAULT_MAX_CODE_BYTES)]
    pub max_code_bytes: usize,

    /// Minimum printable run reported as a string
    #[arg(long, default_value_t = 4)]
    pub min_string_len: usize,
}

impl LoadArgs {
    pub fn options(self) -> AnalysisOptions {
        AnalysisOptions::default()
            .with_load(LoadOptions::default().with_max_code_bytes(self.max_code_bytes))
            .with_decode(DecodeOptions::default().with_min_string_len(self.min_string_len))
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the ELF header summary
    Info {
        #[arg(value_name = "ELF")]
        input: PathBuf,
        #[command(flatten)]
        load: LoadArgs,
    },

    /// List sections
    Sections {
        #[arg(value_name = "ELF")]
        input: PathBuf,
        #[command(flatten)]
        load: LoadArgs,
    },

    /// List symbols, imports or exports
    Symbols {
        #[arg(value_name = "ELF")]
        input: PathBuf,

        /// Which table to list
        #[arg(long, value_enum, default_value = "all")]
        kind: SymbolFilter,

        /// Only names containing this text
        #[arg(long)]
        filter: Option<String>,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Disassemble the executable segment, a function or an address range
    Disasm {
        #[arg(value_name = "ELF")]
        input: PathBuf,

        /// Function name or address to disassemble
        #[arg(short, long, conflicts_with = "start")]
        function: Option<String>,

        /// First address (symbol or hex)
        #[arg(long)]
        start: Option<String>,

        /// Maximum number of instructions
        #[arg(short = 'n', long, default_value = "64")]
        count: usize,

        /// Show raw instruction bytes
        #[arg(long)]
        bytes: bool,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// List recovered functions
    Functions {
        #[arg(value_name = "ELF")]
        input: PathBuf,
        #[command(flatten)]
        load: LoadArgs,
    },

    /// Show direct calls and jumps to an address or symbol
    Xrefs {
        #[arg(value_name = "ELF")]
        input: PathBuf,

        /// Target symbol or hex address
        target: String,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// List printable strings in allocated data sections
    Strings {
        #[arg(value_name = "ELF")]
        input: PathBuf,
        #[command(flatten)]
        load: LoadArgs,
    },

    /// Launch or attach to a process and debug it interactively
    Debug {
        /// Binary to launch (optional with --pid or --project)
        #[arg(value_name = "ELF")]
        input: Option<PathBuf>,

        /// Attach to a running process instead of launching
        #[arg(short, long)]
        pid: Option<i32>,

        /// Project file to re-arm breakpoints from and save to on exit
        #[arg(long)]
        project: Option<PathBuf>,

        /// Keep address space randomization enabled in the launched child
        #[arg(long)]
        aslr: bool,

        /// Arguments passed to the launched program
        #[arg(last = true)]
        args: Vec<String>,

        #[command(flatten)]
        load: LoadArgs,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SymbolFilter {
    #[default]
    All,
    Functions,
    Imports,
    Exports,
}

/// Debugger configuration for the `debug` subcommand.
pub fn debugger_config(aslr: bool) -> DebuggerConfig {
    DebuggerConfig::default().with_disable_aslr(!aslr)
}
