//! Breakpoints and annotations saved between sessions.
//!
//! The file is plain `key=value` lines:
//!
//! ```text
//! binary=/usr/bin/true
//! breakpoint.401000=software,true,
//! breakpoint.401020=conditional,false,rax == 0x1
//! comment.401000=entry point
//! label.401020=loop_head
//! ```
//!
//! Addresses are static (file) addresses in hex. Blank lines and lines
//! starting with `#` are ignored.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use elfdbg_trace::{BreakpointKind, BreakpointSpec};
use tracing::debug;

use crate::{Error, Result, parse_address};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectFile {
    pub binary: Option<PathBuf>,
    /// Keyed by address; a later line for the same address replaces an earlier one.
    pub breakpoints: BTreeMap<u64, BreakpointSpec>,
    pub comments: BTreeMap<u64, String>,
    pub labels: BTreeMap<u64, String>,
}

impl ProjectFile {
    pub fn new(binary: Option<PathBuf>) -> Self {
        Self {
            binary,
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let project = Self::parse(&text)?;
        debug!(
            path = %path.display(),
            breakpoints = project.breakpoints.len(),
            comments = project.comments.len(),
            labels = project.labels.len(),
            "loaded project"
        );
        Ok(project)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.render()).map_err(|source| Error::Save {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Saved breakpoints in address order.
    pub fn breakpoint_list(&self) -> Vec<BreakpointSpec> {
        self.breakpoints.values().cloned().collect()
    }

    /// Replace the saved breakpoints with `specs`.
    pub fn set_breakpoints(&mut self, specs: impl IntoIterator<Item = BreakpointSpec>) {
        self.breakpoints = specs.into_iter().map(|s| (s.address, s)).collect();
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut project = Self::default();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let entry = raw.trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }
            let fail = |message: String| Error::Project { line, message };

            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| fail(format!("expected key=value, got {entry:?}")))?;
            let key = key.trim();

            if key == "binary" {
                let value = value.trim();
                project.binary = (!value.is_empty()).then(|| PathBuf::from(value));
                continue;
            }

            let (prefix, addr) = key
                .split_once('.')
                .ok_or_else(|| fail(format!("unknown key {key:?}")))?;
            let address =
                parse_address(addr).ok_or_else(|| fail(format!("bad address {addr:?}")))?;

            match prefix {
                "breakpoint" => {
                    let spec = parse_breakpoint(address, value).map_err(fail)?;
                    project.breakpoints.insert(address, spec);
                }
                "comment" => {
                    project.comments.insert(address, value.to_string());
                }
                "label" => {
                    project.labels.insert(address, value.trim().to_string());
                }
                other => return Err(fail(format!("unknown key prefix {other:?}"))),
            }
        }
        Ok(project)
    }

    pub fn render(&self) -> String {
        let mut out = String::from("# elfdbg project\n");
        if let Some(binary) = &self.binary {
            let _ = writeln!(out, "binary={}", binary.display());
        }
        for spec in self.breakpoints.values() {
            let _ = writeln!(
                out,
                "breakpoint.{:x}={},{},{}",
                spec.address,
                spec.kind,
                spec.enabled,
                spec.condition.as_deref().unwrap_or("")
            );
        }
        for (addr, text) in &self.comments {
            let _ = writeln!(out, "comment.{addr:x}={text}");
        }
        for (addr, text) in &self.labels {
            let _ = writeln!(out, "label.{addr:x}={text}");
        }
        out
    }
}

/// `<kind>,<enabled>,<condition>`; the condition may be empty.
fn parse_breakpoint(address: u64, value: &str) -> std::result::Result<BreakpointSpec, String> {
    let mut fields = value.splitn(3, ',');
    let kind: BreakpointKind = fields.next().unwrap_or_default().parse()?;
    let enabled = match fields.next().map(str::trim) {
        None | Some("") | Some("true") => true,
        Some("false") => false,
        Some(other) => return Err(format!("bad enabled flag {other:?}")),
    };
    let condition = fields
        .next()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    if kind == BreakpointKind::Conditional && condition.is_none() {
        return Err("conditional breakpoint without a condition".to_string());
    }
    Ok(BreakpointSpec {
        address,
        kind,
        enabled,
        condition,
    })
}
