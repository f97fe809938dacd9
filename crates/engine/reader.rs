//! Reader pool: pulls blocks from the source and batches them into slabs.

use crate::{
    engine::Shared,
    error::MigrationError,
    frontier::SkippedRange,
    planner::{Planner, ReadOutcome},
    remote::{ReadRequest, Source},
    retry::{Attempted, RetryPolicy, Role},
    types::{Block, Label, Slab, TimeRange, TimeSeries, payload_size},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Accumulates consecutive blocks into a slab bounded by `max_bytes`.
///
/// A single block larger than the bound still becomes a slab of its own.
#[derive(Debug)]
pub struct SlabBuilder {
    max_bytes: u64,
    current: Option<Slab>,
    /// Position of each label set inside the current slab.
    positions: HashMap<Vec<Label>, usize>,
}

impl SlabBuilder {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            current: None,
            positions: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// Adds a pulled block, returning the previous slab when it had to be
    /// closed first.
    pub fn push(&mut self, block: Block, series: Vec<TimeSeries>) -> Option<Slab> {
        let size = payload_size(&series);
        let must_flush = self.current.as_ref().is_some_and(|current| {
            block.index != current.last_block + 1
                || (current.size_bytes + size) as u64 > self.max_bytes
        });
        let flushed = if must_flush { self.flush() } else { None };

        let slab = self.current.get_or_insert_with(|| Slab {
            first_block: block.index,
            last_block: block.index,
            range: block.range,
            series: Vec::new(),
            size_bytes: 0,
        });
        slab.last_block = block.index;
        slab.range = TimeRange::new(slab.range.start_ms, block.range.end_ms);
        slab.size_bytes += size;

        for series in series {
            match self.positions.get(&series.labels) {
                Some(position) => {
                    if let Some(existing) = slab.series.get_mut(*position) {
                        existing.samples.extend(series.samples);
                    }
                }
                None => {
                    self.positions.insert(series.labels.clone(), slab.series.len());
                    slab.series.push(series);
                }
            }
        }

        flushed
    }

    pub fn flush(&mut self) -> Option<Slab> {
        self.positions.clear();
        self.current.take()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ReaderContext {
    pub source: Arc<dyn Source>,
    pub planner: Arc<Mutex<Planner>>,
    pub policy: RetryPolicy,
    pub selector: String,
    pub max_slab_bytes: u64,
    pub slabs: mpsc::Sender<Slab>,
    pub shared: Arc<Shared>,
}

impl ReaderContext {
    fn next_block(&self) -> Option<Block> {
        self.planner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_block()
    }

    fn observe(&self, outcome: ReadOutcome) {
        let mut planner = self.planner.lock().unwrap_or_else(PoisonError::into_inner);
        planner.observe(&outcome);
        debug!(width_ms = planner.width_ms(), "next block width");
    }

    async fn send(&self, slab: Slab) -> Result<(), MigrationError> {
        debug!(
            first_block = slab.first_block,
            last_block = slab.last_block,
            bytes = slab.size_bytes,
            "slab ready"
        );
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(MigrationError::Cancelled),
            // Writers only go away early when the run is failing.
            sent = self.slabs.send(slab) => sent.map_err(|_| MigrationError::Cancelled),
        }
    }
}

pub(crate) async fn run_reader(worker: usize, ctx: ReaderContext) -> Result<(), MigrationError> {
    let mut builder = SlabBuilder::new(ctx.max_slab_bytes);

    while let Some(block) = ctx.next_block() {
        let range = ctx.shared.time_format.range(&block.range);
        debug!(worker, block = block.index, %range, "pulling block");

        let started = Instant::now();
        let attempted = ctx
            .policy
            .run(&ctx.shared.cancel, || {
                ctx.source.read(ReadRequest {
                    range: block.range,
                    selector: ctx.selector.clone(),
                })
            })
            .await?;
        let elapsed = started.elapsed();
        ctx.shared.counters.record_attempts(attempted.attempts());

        match attempted {
            Attempted::Done { value, .. } => {
                ctx.observe(ReadOutcome {
                    elapsed,
                    bytes: payload_size(&value) as u64,
                    skipped: false,
                });
                ctx.shared.counters.record_block();
                if let Some(slab) = builder.push(block, value) {
                    ctx.send(slab).await?;
                }
            }
            Attempted::Skipped { error, attempts } => {
                ctx.observe(ReadOutcome {
                    elapsed,
                    bytes: 0,
                    skipped: true,
                });
                if let Some(slab) = builder.flush() {
                    ctx.send(slab).await?;
                }
                warn!(worker, block = block.index, %range, attempts, %error, "skipping block");
                ctx.shared
                    .skip(SkippedRange {
                        role: Role::Reader,
                        range: block.range,
                        first_block: block.index,
                        last_block: block.index,
                        reason: error.to_string(),
                    })
                    .await?;
            }
        }
    }

    if let Some(slab) = builder.flush() {
        ctx.send(slab).await?;
    }
    debug!(worker, "reader finished");
    Ok(())
}
