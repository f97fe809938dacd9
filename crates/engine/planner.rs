//! Splits the migration interval into blocks.
//!
//! Block width adapts to how the source behaves: slow or oversized reads
//! shrink the next block by one lookahead increment, fast reads grow it.

use crate::{
    config::MigrationPlan,
    types::{Block, TimeRange},
};
use std::time::Duration;

/// Fraction of the latency budget at or above which the width shrinks.
pub const DEFAULT_SHRINK_RATIO: f64 = 0.9;
/// Fraction of the latency budget at or below which the width grows.
pub const DEFAULT_GROW_RATIO: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct SizingStrategy {
    pub increment_ms: i64,
    pub min_width_ms: i64,
    pub max_width_ms: i64,
    pub latency_budget: Duration,
    pub max_bytes: u64,
    pub shrink_ratio: f64,
    pub grow_ratio: f64,
}

impl SizingStrategy {
    pub fn from_plan(plan: &MigrationPlan) -> Self {
        let increment_ms = duration_ms(plan.lookahead_increment).max(1);
        Self {
            increment_ms,
            min_width_ms: increment_ms,
            max_width_ms: duration_ms(plan.max_read_duration).max(increment_ms),
            latency_budget: plan.max_read_latency,
            max_bytes: plan.max_slab_bytes,
            shrink_ratio: DEFAULT_SHRINK_RATIO,
            grow_ratio: DEFAULT_GROW_RATIO,
        }
    }

    pub fn with_min_width(mut self, min_width_ms: i64) -> Self {
        self.min_width_ms = min_width_ms.clamp(1, self.max_width_ms);
        self
    }

    fn clamp(&self, width_ms: i64) -> i64 {
        width_ms.clamp(self.min_width_ms, self.max_width_ms)
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// What the reader observed for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    pub elapsed: Duration,
    pub bytes: u64,
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSizer {
    pub width_ms: i64,
}

impl BlockSizer {
    pub fn new(strategy: &SizingStrategy) -> Self {
        Self {
            width_ms: strategy.clamp(strategy.increment_ms),
        }
    }

    pub fn next(self, strategy: &SizingStrategy, outcome: &ReadOutcome) -> Self {
        let budget = strategy.latency_budget.as_secs_f64();
        let elapsed = outcome.elapsed.as_secs_f64();

        let width_ms = if outcome.skipped
            || outcome.bytes > strategy.max_bytes
            || elapsed >= budget * strategy.shrink_ratio
        {
            self.width_ms.saturating_sub(strategy.increment_ms)
        } else if elapsed <= budget * strategy.grow_ratio {
            self.width_ms.saturating_add(strategy.increment_ms)
        } else {
            self.width_ms
        };

        Self {
            width_ms: strategy.clamp(width_ms),
        }
    }
}

#[derive(Debug)]
pub struct Planner {
    strategy: SizingStrategy,
    sizer: BlockSizer,
    cursor_ms: i64,
    maxt: i64,
    next_index: u64,
}

impl Planner {
    pub fn new(strategy: SizingStrategy, range: TimeRange) -> Self {
        Self {
            sizer: BlockSizer::new(&strategy),
            strategy,
            cursor_ms: range.start_ms,
            maxt: range.end_ms,
            next_index: 0,
        }
    }

    pub fn width_ms(&self) -> i64 {
        self.sizer.width_ms
    }

    /// Blocks handed out so far.
    pub fn emitted(&self) -> u64 {
        self.next_index
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor_ms >= self.maxt
    }

    pub fn next_block(&mut self) -> Option<Block> {
        if self.is_exhausted() {
            return None;
        }
        let end_ms = self.cursor_ms.saturating_add(self.sizer.width_ms).min(self.maxt);
        let block = Block {
            index: self.next_index,
            range: TimeRange::new(self.cursor_ms, end_ms),
        };
        self.cursor_ms = end_ms;
        self.next_index += 1;
        Some(block)
    }

    pub fn observe(&mut self, outcome: &ReadOutcome) {
        self.sizer = self.sizer.next(&self.strategy, outcome);
    }
}

impl Iterator for Planner {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        self.next_block()
    }
}
