//! Mapping between global atom indices and the local storage of one rank.

use std::collections::HashMap;
use std::ops::Range;

pub trait Domain {
    /// Local index of a global atom, or `None` if this rank does not own it.
    fn local_index(&self, global: usize) -> Option<usize>;
}

/// Every atom is local and stored at its global index.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeSystem;

impl Domain for WholeSystem {
    fn local_index(&self, global: usize) -> Option<usize> {
        Some(global)
    }
}

/// A rank owning one contiguous slice of the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedRange {
    pub range: Range<usize>,
}

impl OwnedRange {
    pub fn new(range: Range<usize>) -> Self {
        Self { range }
    }

    /// Splits `total` atoms into `ranks` contiguous slices that never cut
    /// through a block of `block` atoms.
    pub fn partition(total: usize, block: usize, ranks: usize) -> Vec<OwnedRange> {
        let block = block.max(1);
        let ranks = ranks.max(1);
        let blocks = total.div_ceil(block);
        (0..ranks)
            .map(|r| {
                let start = (blocks * r / ranks * block).min(total);
                let end = (blocks * (r + 1) / ranks * block).min(total);
                OwnedRange::new(start..end)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

impl Domain for OwnedRange {
    fn local_index(&self, global: usize) -> Option<usize> {
        self.range
            .contains(&global)
            .then(|| global - self.range.start)
    }
}

impl Domain for HashMap<usize, usize> {
    fn local_index(&self, global: usize) -> Option<usize> {
        self.get(&global).copied()
    }
}
