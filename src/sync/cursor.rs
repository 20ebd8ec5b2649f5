//! Scan cursor

use crate::store::Sequence;

/// Lower bound of the next change scan, as a store commit sequence.
///
/// Process-local and never persisted: a restarted node starts from the
/// beginning and rescans everything once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncCursor {
    next_sequence: Sequence,
}

impl SyncCursor {
    /// A cursor before the first write
    pub fn new() -> Self {
        Self::default()
    }

    /// First sequence the next scan reads
    pub fn next_sequence(&self) -> Sequence {
        self.next_sequence
    }

    /// Move the cursor to `next`, returning the bound the current scan uses
    pub fn advance(&mut self, next: Sequence) -> Sequence {
        std::mem::replace(&mut self.next_sequence, next)
    }

    /// Put the cursor back after a scan that did not finish
    pub fn rewind(&mut self, to: Sequence) {
        self.next_sequence = self.next_sequence.min(to);
    }
}
