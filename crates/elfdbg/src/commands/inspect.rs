//! Static inspection commands.

use std::path::Path;

use elfdbg::{AnalysisOptions, ElfImage, format_hex_bytes};
use tracing::error;

use super::analyze;
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, SymbolFilter};
use crate::terminal::{self, Alignment, Table};

fn load_image(input: &Path, options: &AnalysisOptions) -> Option<ElfImage> {
    match ElfImage::from_path(input, &options.load) {
        Ok(image) => Some(image),
        Err(e) => {
            error!("{e}");
            None
        }
    }
}

pub fn cmd_info(input: &Path, options: &AnalysisOptions) -> i32 {
    let Some(image) = load_image(input, options) else {
        return EXIT_FAILURE;
    };
    let info = image.info();

    terminal::header(&input.display().to_string());
    println!("  Type:         {}", info.file_type);
    println!("  Machine:      {} ({})", info.machine, info.architecture);
    println!(
        "  Class:        {}, {} endian",
        if info.is_64bit { "ELF64" } else { "ELF32" },
        if info.is_little_endian { "little" } else { "big" }
    );
    println!("  Entry point:  {:#x}", info.entry_point);
    if let Some(interp) = &info.interpreter {
        println!("  Interpreter:  {interp}");
    }
    match image.code_segment() {
        Some(code) => println!(
            "  Code:         {:#x}..{:#x} ({} bytes read)",
            code.address,
            code.end_address(),
            code.data.len()
        ),
        None => println!("  Code:         no executable segment"),
    }
    println!(
        "  Counts:       {} sections, {} symbols, {} imports, {} exports",
        info.section_count, info.symbol_count, info.import_count, info.export_count
    );
    for lib in &info.needed {
        println!("  Needs:        {lib}");
    }
    EXIT_SUCCESS
}

pub fn cmd_sections(input: &Path, options: &AnalysisOptions) -> i32 {
    let Some(image) = load_image(input, options) else {
        return EXIT_FAILURE;
    };

    let mut table = Table::new(&["Name", "Type", "Address", "Offset", "Size", "Flags"])
        .with_alignments(vec![
            Alignment::Left,
            Alignment::Left,
            Alignment::Right,
            Alignment::Right,
            Alignment::Right,
            Alignment::Left,
        ]);
    for section in image.get_sections() {
        table.add_row(vec![
            section.name.clone(),
            section.type_name().to_string(),
            format!("{:#x}", section.virtual_address),
            format!("{:#x}", section.file_offset),
            format!("{:#x}", section.size),
            section.flags_string(),
        ]);
    }
    table.print();
    EXIT_SUCCESS
}

pub fn cmd_symbols(
    input: &Path,
    kind: SymbolFilter,
    filter: Option<&str>,
    options: &AnalysisOptions,
) -> i32 {
    let Some(image) = load_image(input, options) else {
        return EXIT_FAILURE;
    };
    let keep = |name: &str| filter.is_none_or(|f| name.contains(f));

    match kind {
        SymbolFilter::All | SymbolFilter::Functions => {
            let mut table = Table::new(&["Address", "Size", "Type", "Bind", "Section", "Name"])
                .with_alignments(vec![Alignment::Right, Alignment::Right]);
            for sym in image.get_symbols() {
                if (kind == SymbolFilter::Functions && !sym.is_function) || !keep(&sym.name) {
                    continue;
                }
                table.add_row(vec![
                    format!("{:#x}", sym.address),
                    sym.size.to_string(),
                    sym.kind.to_string(),
                    sym.binding.to_string(),
                    sym.section_name.clone(),
                    sym.name.clone(),
                ]);
            }
            table.print();
        }
        SymbolFilter::Imports => {
            let mut table = Table::new(&["Slot", "Library", "Name"]);
            for import in image.get_imports().iter().filter(|i| keep(&i.name)) {
                table.add_row(vec![
                    format!("{:#x}", import.address),
                    import.library.clone(),
                    import.name.clone(),
                ]);
            }
            table.print();
        }
        SymbolFilter::Exports => {
            let mut table = Table::new(&["Address", "Type", "Name"]);
            for export in image.get_exports().iter().filter(|e| keep(&e.name)) {
                table.add_row(vec![
                    format!("{:#x}", export.address),
                    export.kind.to_string(),
                    export.name.clone(),
                ]);
            }
            table.print();
        }
    }
    EXIT_SUCCESS
}

pub fn cmd_functions(input: &Path, options: &AnalysisOptions) -> i32 {
    let Some(analysis) = analyze(input, options) else {
        return EXIT_FAILURE;
    };

    let mut table = Table::new(&["Start", "End", "Insns", "Xrefs", "Name"]).with_alignments(vec![
        Alignment::Right,
        Alignment::Right,
        Alignment::Right,
        Alignment::Right,
    ]);
    for function in analysis.functions().functions() {
        let mut name = function.name.clone();
        if !function.has_return {
            name.push_str(" (no return)");
        }
        table.add_row(vec![
            format!("{:#x}", function.start_address),
            format!("{:#x}", function.end_address),
            function.instructions.len().to_string(),
            function.xrefs.len().to_string(),
            name,
        ]);
    }
    table.print();
    EXIT_SUCCESS
}

pub fn cmd_xrefs(input: &Path, target: &str, options: &AnalysisOptions) -> i32 {
    let Some(analysis) = analyze(input, options) else {
        return EXIT_FAILURE;
    };
    let address = match analysis.resolve(target) {
        Ok(address) => address,
        Err(e) => {
            error!("{e}");
            return EXIT_FAILURE;
        }
    };

    let refs = analysis.xrefs_to(address);
    if refs.is_empty() {
        terminal::warning(&format!(
            "No direct references to {}",
            analysis.describe_address(address)
        ));
        return EXIT_SUCCESS;
    }

    terminal::header(&format!(
        "{} references to {}",
        refs.len(),
        analysis.describe_address(address)
    ));
    for &from in refs {
        let text = analysis
            .instructions_from(from, 1)
            .first()
            .filter(|insn| insn.address == from)
            .map(|insn| {
                format!(
                    "{:<24} {} {}",
                    format_hex_bytes(&insn.bytes),
                    insn.mnemonic,
                    insn.operands
                )
            })
            .unwrap_or_default();
        println!(
            "  {from:#x}  {:<32} {text}",
            analysis.describe_address(from)
        );
    }
    EXIT_SUCCESS
}

pub fn cmd_strings(input: &Path, options: &AnalysisOptions) -> i32 {
    let Some(analysis) = analyze(input, options) else {
        return EXIT_FAILURE;
    };
    for found in analysis.strings() {
        println!("{:#010x} {:<12} {}", found.address, found.section, found.text);
    }
    EXIT_SUCCESS
}
