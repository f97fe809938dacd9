//! Contiguous completion tracking.
//!
//! Slabs finish out of order. The frontier only moves past a block once every
//! lower-indexed block has finished, so the checkpoint derived from it never
//! claims data that may still be missing from the destination.

use crate::{retry::Role, types::TimeRange};
use serde::Serialize;
use std::collections::BTreeMap;

/// A range abandoned under a `skip` action. The destination has a gap here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRange {
    pub role: Role,
    pub range: TimeRange,
    pub first_block: u64,
    pub last_block: u64,
    pub reason: String,
}

#[derive(Debug)]
pub struct Frontier {
    next_block: u64,
    frontier_ms: i64,
    /// Finished spans waiting for a lower index, keyed by first block.
    pending: BTreeMap<u64, (u64, i64)>,
    skipped: Vec<SkippedRange>,
}

impl Frontier {
    pub fn new(start_ms: i64) -> Self {
        Self {
            next_block: 0,
            frontier_ms: start_ms,
            pending: BTreeMap::new(),
            skipped: Vec::new(),
        }
    }

    pub fn frontier_ms(&self) -> i64 {
        self.frontier_ms
    }

    /// Index of the lowest block not yet finished.
    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    pub fn pending_spans(&self) -> usize {
        self.pending.len()
    }

    pub fn skipped(&self) -> &[SkippedRange] {
        &self.skipped
    }

    pub fn take_skipped(&mut self) -> Vec<SkippedRange> {
        std::mem::take(&mut self.skipped)
    }

    /// Marks blocks `first..=last` finished. Returns the new frontier if it moved.
    pub fn complete(&mut self, first_block: u64, last_block: u64, end_ms: i64) -> Option<i64> {
        if last_block < self.next_block {
            return None;
        }
        self.pending.insert(first_block, (last_block, end_ms));

        let before = self.frontier_ms;
        while let Some((last, end)) = self.pending.remove(&self.next_block) {
            self.next_block = last + 1;
            self.frontier_ms = self.frontier_ms.max(end);
        }
        (self.frontier_ms > before).then_some(self.frontier_ms)
    }

    /// Records a gap and finishes its blocks so later data can still advance.
    pub fn record_skip(&mut self, skipped: SkippedRange) -> Option<i64> {
        let (first, last, end) = (
            skipped.first_block,
            skipped.last_block,
            skipped.range.end_ms,
        );
        self.skipped.push(skipped);
        self.complete(first, last, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skip(first_block: u64, last_block: u64, start_ms: i64, end_ms: i64) -> SkippedRange {
        SkippedRange {
            role: Role::Writer,
            range: TimeRange::new(start_ms, end_ms),
            first_block,
            last_block,
            reason: "request timed out".to_owned(),
        }
    }

    #[test]
    fn advances_in_order() {
        let mut frontier = Frontier::new(0);
        assert_eq!(frontier.complete(0, 0, 100), Some(100));
        assert_eq!(frontier.complete(1, 2, 300), Some(300));
        assert_eq!(frontier.next_block(), 3);
    }

    #[test]
    fn waits_for_lower_blocks() {
        let mut frontier = Frontier::new(0);
        assert_eq!(frontier.complete(2, 2, 300), None);
        assert_eq!(frontier.complete(1, 1, 200), None);
        assert_eq!(frontier.frontier_ms(), 0);
        assert_eq!(frontier.pending_spans(), 2);

        assert_eq!(frontier.complete(0, 0, 100), Some(300));
        assert_eq!(frontier.next_block(), 3);
        assert_eq!(frontier.pending_spans(), 0);
    }

    #[test]
    fn skips_advance_and_are_recorded() {
        let mut frontier = Frontier::new(0);
        assert_eq!(frontier.complete(1, 1, 200), None);
        assert_eq!(frontier.record_skip(skip(0, 0, 0, 100)), Some(200));
        assert_eq!(frontier.skipped().len(), 1);
        assert_eq!(frontier.take_skipped()[0].range, TimeRange::new(0, 100));
        assert!(frontier.skipped().is_empty());
    }

    #[test]
    fn never_regresses() {
        let mut frontier = Frontier::new(500);
        assert_eq!(frontier.complete(0, 0, 400), None);
        assert_eq!(frontier.frontier_ms(), 500);
        assert_eq!(frontier.next_block(), 1);
        // stale duplicate
        assert_eq!(frontier.complete(0, 0, 900), None);
        assert_eq!(frontier.frontier_ms(), 500);
    }
}
