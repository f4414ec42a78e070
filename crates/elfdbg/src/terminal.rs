//! Terminal UI utilities for progress indication and styled output.

use std::borrow::Cow;
use std::fmt::Write;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Spinner for indeterminate progress, drawn on stderr.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    pub fn finish_with_success(&self, message: &str) {
        self.bar.finish_and_clear();
        success(message);
    }

    pub fn finish_with_failure(&self, message: &str) {
        self.bar.finish_and_clear();
        error(message);
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

// ============================================================================
// Styled output helpers
// ============================================================================

pub fn info(message: &str) {
    eprintln!("{} {}", style("→").cyan(), message);
}

pub fn success(message: &str) {
    eprintln!("{} {}", style("✓").green().bold(), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", style("!").yellow().bold(), message);
}

/// Section title on stdout.
pub fn header(message: &str) {
    println!("\n{}", style(message).bold());
}

// ============================================================================
// Table output
// ============================================================================

/// Column alignment.
#[derive(Clone, Copy, Default)]
pub enum Alignment {
    #[default]
    Left,
    Right,
}

/// A builder for markdown tables.
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    alignments: Vec<Alignment>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| (*h).to_string()).collect(),
            rows: Vec::new(),
            alignments: vec![Alignment::Left; headers.len()],
        }
    }

    #[must_use]
    pub fn with_alignments(mut self, alignments: Vec<Alignment>) -> Self {
        self.alignments = alignments;
        self
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn render(&self) -> String {
        if self.headers.is_empty() {
            return String::new();
        }

        let mut widths: Vec<usize> = self.headers.iter().map(String::len).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }

        let mut output = String::new();

        output.push('|');
        for (header, &w) in self.headers.iter().zip(&widths) {
            let _ = write!(output, " {header:^w$} |");
        }
        output.push('\n');

        output.push('|');
        for (i, &w) in widths.iter().enumerate() {
            let _ = match self.alignments.get(i).copied().unwrap_or_default() {
                Alignment::Left => write!(output, ":{:-<w$}|", "", w = w + 1),
                Alignment::Right => write!(output, "{:-<w$}:|", "", w = w + 1),
            };
        }
        output.push('\n');

        for row in &self.rows {
            output.push('|');
            for (i, (cell, &w)) in row.iter().zip(&widths).enumerate() {
                let _ = match self.alignments.get(i).copied().unwrap_or_default() {
                    Alignment::Left => write!(output, " {cell:<w$} |"),
                    Alignment::Right => write!(output, " {cell:>w$} |"),
                };
            }
            output.push('\n');
        }

        output
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}
