//! Per-root sequence counter

use serde::{Deserialize, Serialize};

use crate::error::{DriveError, DriveResult};

/// Tracks the last sequence number applied to a root
///
/// Sequence numbers start at 0 and grow by exactly one per event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceCounter {
    last_applied: Option<u64>,
}

impl SequenceCounter {
    /// Counter positioned after `last_applied`
    pub fn new(last_applied: Option<u64>) -> Self {
        Self { last_applied }
    }

    /// Last applied sequence number, `None` before the first event
    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    /// The number the next event must carry
    pub fn next(&self) -> u64 {
        self.last_applied.map_or(0, |n| n + 1)
    }

    /// Whether `n` directly follows the last applied number
    pub fn is_valid_successor(&self, n: u64) -> bool {
        n == self.next()
    }

    /// Accept `n` as applied
    pub fn advance(&mut self, n: u64) -> DriveResult<()> {
        if !self.is_valid_successor(n) {
            return Err(DriveError::SequenceGap {
                expected: self.next(),
                got: n,
            });
        }
        self.last_applied = Some(n);
        Ok(())
    }
}
