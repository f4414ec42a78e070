//! Reverse cross-reference index.

use elfdbg_isa::Instruction;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

/// Map from target address to the sorted, de-duplicated addresses of the
/// instructions that reach it directly.
#[derive(Clone, Debug, Default)]
pub struct XrefIndex {
    refs: FxHashMap<u64, Vec<u64>>,
}

impl XrefIndex {
    /// Build the index from resolved jump and call targets.
    pub fn build(instructions: &[Instruction]) -> Self {
        // Build partial maps in parallel, then merge
        let mut refs = instructions
            .par_iter()
            .filter(|insn| insn.has_direct_target())
            .fold(
                FxHashMap::default,
                |mut partial: FxHashMap<u64, Vec<u64>>, insn| {
                    partial
                        .entry(insn.target_address)
                        .or_default()
                        .push(insn.address);
                    partial
                },
            )
            .reduce(FxHashMap::default, |mut a, b| {
                for (target, sources) in b {
                    a.entry(target).or_default().extend(sources);
                }
                a
            });

        refs.par_iter_mut().for_each(|(_, sources)| {
            sources.sort_unstable();
            sources.dedup();
        });
        Self { refs }
    }

    /// Addresses referencing `target`; empty when there are none.
    pub fn references_to(&self, target: u64) -> &[u64] {
        self.refs.get(&target).map_or(&[], Vec::as_slice)
    }

    pub fn contains(&self, target: u64) -> bool {
        self.refs.contains_key(&target)
    }

    /// Referenced addresses in ascending order.
    pub fn targets(&self) -> Vec<u64> {
        let mut targets: Vec<u64> = self.refs.keys().copied().collect();
        targets.sort_unstable();
        targets
    }

    /// Number of distinct targets.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::tests::{call, insn, ret};

    #[test]
    fn test_reverse_index() {
        let jump = Instruction {
            is_jump: true,
            target_address: 0x40,
            ..insn(0x30, 2, "jmp", "0x40")
        };
        let stream = vec![
            call(0x20, 0x40),
            call(0x10, 0x40),
            call(0x25, 0x80),
            jump,
            call(0x2a, 0),
            ret(0x2f),
        ];
        let index = XrefIndex::build(&stream);
        assert_eq!(index.references_to(0x40), &[0x10, 0x20, 0x30]);
        assert_eq!(index.references_to(0x80), &[0x25]);
        assert!(index.references_to(0).is_empty());
        assert_eq!(index.targets(), vec![0x40, 0x80]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_empty_stream() {
        let index = XrefIndex::build(&[]);
        assert!(index.is_empty());
        assert!(index.references_to(0x1000).is_empty());
    }
}
