//! elfdbg CLI - ELF inspector and debugger

mod cli;
mod commands;
mod terminal;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let metrics_handle = if cli.metrics {
        elfdbg::metrics::CliRecorder::new().install()
    } else {
        None
    };
    elfdbg::metrics::init();

    // the directive prefix also covers the elfdbg_* crates
    let default_level = if cli.verbose {
        "elfdbg=debug"
    } else if cli.silent {
        "elfdbg=error"
    } else {
        "elfdbg=info"
    };
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = default_level.parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let exit_code = commands::run_command(&cli);

    if let Some(handle) = metrics_handle {
        handle.print_summary();
    }

    std::process::exit(exit_code);
}
