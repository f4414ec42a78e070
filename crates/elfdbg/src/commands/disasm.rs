//! Disassembly listing.

use std::path::Path;

use elfdbg::{Analysis, AnalysisOptions, Instruction};
use tracing::error;

use super::analyze;
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal;

pub fn cmd_disasm(
    input: &Path,
    location: Option<&str>,
    count: usize,
    show_bytes: bool,
    options: &AnalysisOptions,
) -> i32 {
    let Some(analysis) = analyze(input, options) else {
        return EXIT_FAILURE;
    };

    let instructions = match location {
        Some(location) => {
            let start = match analysis.resolve(location) {
                Ok(start) => start,
                Err(e) => {
                    error!("{e}");
                    return EXIT_FAILURE;
                }
            };
            // a whole function when the location starts one
            match analysis
                .function_at(start)
                .filter(|f| f.start_address == start)
            {
                Some(function) => {
                    let listed = function.instructions.len().min(count);
                    &function.instructions[..listed]
                }
                None => analysis.instructions_from(start, count),
            }
        }
        None => analysis.instructions_from(0, count),
    };

    if instructions.is_empty() {
        terminal::warning("No instructions decoded at that location");
        return EXIT_FAILURE;
    }

    let mut current_function = None;
    for insn in instructions {
        if let Some(function) = analysis
            .function_at(insn.address)
            .filter(|f| Some(f.start_address) != current_function)
        {
            current_function = Some(function.start_address);
            println!("\n{:#x} <{}>:", function.start_address, function.name);
        }
        println!("{}", format_line(&analysis, insn, show_bytes));
    }
    EXIT_SUCCESS
}

fn format_line(analysis: &Analysis, insn: &Instruction, show_bytes: bool) -> String {
    let mut line = format!("  {:#x}:", insn.address);
    if show_bytes {
        line.push_str(&format!("  {:<24}", insn.hex_bytes()));
    }
    line.push_str(&format!("  {:<8} {}", insn.mnemonic, insn.operands));
    if insn.has_direct_target() {
        line.push_str(&format!(
            "  ; {}",
            analysis.describe_address(insn.target_address)
        ));
    }
    line
}
