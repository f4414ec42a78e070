//! Recovered functions with their cross-references.

use elfdbg_isa::{Architecture, Instruction};
use rayon::prelude::*;
use tracing::debug;

use crate::{Function, XrefIndex, analyze_functions};

/// Functions sorted by start address plus the reverse xref index.
#[derive(Clone, Debug, Default)]
pub struct FunctionTable {
    functions: Vec<Function>,
    xrefs: XrefIndex,
}

impl FunctionTable {
    /// Recover functions and cross-references from `instructions`.
    pub fn build(arch: Architecture, instructions: &[Instruction]) -> Self {
        let mut functions = analyze_functions(arch, instructions);
        let xrefs = XrefIndex::build(instructions);

        functions.par_iter_mut().for_each(|function| {
            function.xrefs = xrefs.references_to(function.start_address).to_vec();
        });
        functions.sort_by_key(|f| f.start_address);

        debug!(
            functions = functions.len(),
            targets = xrefs.len(),
            "built function table"
        );
        Self { functions, xrefs }
    }

    /// Replace placeholder names with names from `resolve`.
    pub fn name_with<F>(&mut self, resolve: F)
    where
        F: Fn(u64) -> Option<String> + Sync,
    {
        self.functions.par_iter_mut().for_each(|function| {
            if let Some(name) = resolve(function.start_address) {
                function.name = name;
            }
        });
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub const fn xrefs(&self) -> &XrefIndex {
        &self.xrefs
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Function whose range contains `addr`.
    pub fn function_at(&self, addr: u64) -> Option<&Function> {
        let idx = self
            .functions
            .partition_point(|f| f.start_address <= addr)
            .checked_sub(1)?;
        self.functions.get(idx).filter(|f| f.contains(addr))
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}
