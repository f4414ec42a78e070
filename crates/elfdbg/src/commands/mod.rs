//! Command implementations.
//!
//! Static inspection commands live in `inspect` and `disasm`; `debug` runs
//! the interactive debugger loop.

mod debug;
mod disasm;
mod inspect;

use std::path::Path;

use elfdbg::{Analysis, AnalysisOptions};
use tracing::debug;

use crate::cli::{Cli, Commands};
use crate::terminal::Spinner;

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Info { input, load } => inspect::cmd_info(input, &load.options()),
        Commands::Sections { input, load } => inspect::cmd_sections(input, &load.options()),
        Commands::Symbols {
            input,
            kind,
            filter,
            load,
        } => inspect::cmd_symbols(input, *kind, filter.as_deref(), &load.options()),
        Commands::Functions { input, load } => inspect::cmd_functions(input, &load.options()),
        Commands::Xrefs {
            input,
            target,
            load,
        } => inspect::cmd_xrefs(input, target, &load.options()),
        Commands::Strings { input, load } => inspect::cmd_strings(input, &load.options()),
        Commands::Disasm {
            input,
            function,
            start,
            count,
            bytes,
            load,
        } => disasm::cmd_disasm(
            input,
            function.as_deref().or(start.as_deref()),
            *count,
            *bytes,
            &load.options(),
        ),
        Commands::Debug {
            input,
            pid,
            project,
            aslr,
            args,
            load,
        } => debug::cmd_debug(&debug::DebugArgs {
            input: input.as_deref(),
            pid: *pid,
            project: project.as_deref(),
            aslr: *aslr,
            args,
            options: load.options(),
        }),
    }
}

/// Run the full analysis behind a spinner; logs and returns `None` on failure.
fn analyze(input: &Path, options: &AnalysisOptions) -> Option<Analysis> {
    let spinner = Spinner::new(format!("Analyzing {}", input.display()));
    match Analysis::from_path(input, options) {
        Ok(analysis) => {
            spinner.finish_with_success(&format!(
                "{} instructions, {} functions",
                analysis.instructions().len(),
                analysis.functions().len()
            ));
            Some(analysis)
        }
        Err(e) => {
            spinner.finish_with_failure(&format!("Analysis failed: {e}"));
            debug!(path = %input.display(), error = %e, "analysis failed");
            None
        }
    }
}
