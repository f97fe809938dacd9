//! Runs a validated migration end to end.

use crate::{
    bytesize::format_byte_size,
    config::ValidatedConfig,
    error::MigrationError,
    frontier::{Frontier, SkippedRange},
    planner::{Planner, SizingStrategy},
    progress::{ProgressTracker, resume_point},
    reader::{ReaderContext, run_reader},
    remote::{CheckpointReader, Destination, Source},
    types::{Slab, TimeFormat, TimeRange},
    writer::{WriterContext, run_writer},
};
use serde::Serialize;
use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    blocks_read: AtomicU64,
    slabs_written: AtomicU64,
    samples_written: AtomicU64,
    bytes_written: AtomicU64,
    retries: AtomicU64,
}

impl RunCounters {
    pub fn record_block(&self) {
        self.blocks_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slab(&self, slab: &Slab) {
        self.slabs_written.fetch_add(1, Ordering::Relaxed);
        self.samples_written
            .fetch_add(slab.sample_count() as u64, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(slab.size_bytes as u64, Ordering::Relaxed);
    }

    pub fn record_attempts(&self, attempts: u32) {
        self.retries
            .fetch_add(u64::from(attempts.saturating_sub(1)), Ordering::Relaxed);
    }
}

/// State every worker of a run coordinates through.
#[derive(Debug)]
pub(crate) struct Shared {
    pub frontier: Mutex<Frontier>,
    pub progress: ProgressTracker,
    pub counters: RunCounters,
    pub cancel: CancellationToken,
    pub time_format: TimeFormat,
}

impl Shared {
    fn frontier(&self) -> std::sync::MutexGuard<'_, Frontier> {
        self.frontier.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn complete(
        &self,
        first_block: u64,
        last_block: u64,
        end_ms: i64,
    ) -> Result<(), MigrationError> {
        let advanced = self.frontier().complete(first_block, last_block, end_ms);
        self.checkpoint(advanced).await
    }

    pub async fn skip(&self, skipped: SkippedRange) -> Result<(), MigrationError> {
        let advanced = self.frontier().record_skip(skipped);
        self.checkpoint(advanced).await
    }

    async fn checkpoint(&self, advanced: Option<i64>) -> Result<(), MigrationError> {
        let Some(frontier) = advanced else {
            return Ok(());
        };
        info!(frontier = %self.time_format.timestamp(frontier), "migration progress");
        self.progress.record(frontier, &self.cancel).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// The checkpoint already covered the whole interval.
    UpToDate,
    Completed,
    /// Completed, but some ranges were skipped.
    Partial,
}

impl MigrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpToDate => "up_to_date",
            Self::Completed => "completed",
            Self::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub mint: i64,
    /// Start after applying a stored checkpoint.
    pub effective_mint: i64,
    pub maxt: i64,
    pub frontier: i64,
    pub blocks_read: u64,
    pub slabs_written: u64,
    pub samples_written: u64,
    pub bytes_written: u64,
    pub retries_performed: u64,
    pub skipped: Vec<SkippedRange>,
    pub elapsed_ms: u64,
}

impl MigrationSummary {
    pub fn status(&self) -> MigrationStatus {
        if !self.skipped.is_empty() {
            MigrationStatus::Partial
        } else if self.effective_mint > self.mint && self.effective_mint >= self.maxt {
            MigrationStatus::UpToDate
        } else {
            MigrationStatus::Completed
        }
    }

    /// Turns a run with gaps into [`MigrationError::Partial`].
    pub fn into_result(self) -> Result<Self, MigrationError> {
        if self.skipped.is_empty() {
            Ok(self)
        } else {
            Err(MigrationError::Partial {
                skipped: self.skipped,
            })
        }
    }
}

pub struct Migrator {
    config: ValidatedConfig,
    source: Arc<dyn Source>,
    destination: Arc<dyn Destination>,
    checkpoint_reader: Option<Arc<dyn CheckpointReader>>,
    sizing: SizingStrategy,
    cancel: CancellationToken,
}

impl Migrator {
    pub fn new(
        config: ValidatedConfig,
        source: Arc<dyn Source>,
        destination: Arc<dyn Destination>,
    ) -> Self {
        Self {
            sizing: SizingStrategy::from_plan(&config.plan),
            config,
            source,
            destination,
            checkpoint_reader: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_checkpoint_reader(mut self, reader: Arc<dyn CheckpointReader>) -> Self {
        self.checkpoint_reader = Some(reader);
        self
    }

    pub fn with_sizing(mut self, sizing: SizingStrategy) -> Self {
        self.sizing = sizing;
        self
    }

    /// Cancelling `cancel` stops the run; it then fails with
    /// [`MigrationError::Cancelled`] after persisting the frontier.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<MigrationSummary, MigrationError> {
        let started = Instant::now();
        let plan = &self.config.plan;
        let time_format = plan.time_format();
        // Internal aborts must not cancel the caller's token.
        let cancel = self.cancel.child_token();

        // The checkpoint lives in the destination.
        let effective_mint = resume_point(
            plan,
            self.checkpoint_reader.as_deref(),
            &self.config.writer.retry_policy(),
            &cancel,
        )
        .await?;

        let mut summary = MigrationSummary {
            mint: plan.mint,
            effective_mint,
            maxt: plan.maxt,
            frontier: effective_mint,
            blocks_read: 0,
            slabs_written: 0,
            samples_written: 0,
            bytes_written: 0,
            retries_performed: 0,
            skipped: Vec::new(),
            elapsed_ms: 0,
        };
        if effective_mint >= plan.maxt {
            info!(
                maxt = %time_format.timestamp(plan.maxt),
                "nothing to migrate, checkpoint already reached the end"
            );
            summary.elapsed_ms = elapsed_ms(started);
            return Ok(summary);
        }

        info!(
            name = %plan.name,
            start = %time_format.timestamp(effective_mint),
            end = %time_format.timestamp(plan.maxt),
            concurrent_pull = plan.concurrent_pull,
            concurrent_push = plan.concurrent_push,
            max_slab = %format_byte_size(plan.max_slab_bytes),
            "starting migration"
        );

        let shared = Arc::new(Shared {
            frontier: Mutex::new(Frontier::new(effective_mint)),
            progress: ProgressTracker::new(
                plan,
                self.destination.clone(),
                self.config.writer.retry_policy(),
            )
            .starting_at(effective_mint),
            counters: RunCounters::default(),
            cancel: cancel.clone(),
            time_format,
        });
        let planner = Arc::new(Mutex::new(Planner::new(
            self.sizing.clone(),
            TimeRange::new(effective_mint, plan.maxt),
        )));
        let (sender, receiver) = mpsc::channel(plan.concurrent_push);
        let receiver = Arc::new(AsyncMutex::new(receiver));

        let mut workers = JoinSet::new();
        for worker in 0..plan.concurrent_pull {
            workers.spawn(run_reader(
                worker,
                ReaderContext {
                    source: self.source.clone(),
                    planner: planner.clone(),
                    policy: self.config.reader.retry_policy(),
                    selector: plan.selector.clone(),
                    max_slab_bytes: plan.max_slab_bytes,
                    slabs: sender.clone(),
                    shared: shared.clone(),
                },
            ));
        }
        // Writers stop once every reader dropped its sender.
        drop(sender);
        for worker in 0..plan.concurrent_push {
            workers.spawn(run_writer(
                worker,
                WriterContext {
                    destination: self.destination.clone(),
                    policy: self.config.writer.retry_policy(),
                    slabs: receiver.clone(),
                    shared: shared.clone(),
                },
            ));
        }
        drop(receiver);

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            let error = match joined {
                Ok(Ok(())) | Ok(Err(MigrationError::Cancelled)) => continue,
                Ok(Err(error)) => error,
                Err(join_error) => MigrationError::Worker(join_error.to_string()),
            };
            if failure.is_none() {
                error!(%error, "migration failed, stopping workers");
                cancel.cancel();
                failure = Some(error);
            }
        }

        let (frontier, skipped) = {
            let mut state = shared.frontier();
            (state.frontier_ms(), state.take_skipped())
        };
        if let Err(error) = shared.progress.finish(frontier).await {
            if failure.is_some() {
                warn!(%error, "final checkpoint write failed");
            } else {
                failure = Some(error);
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }
        if cancel.is_cancelled() {
            warn!(
                frontier = %time_format.timestamp(frontier),
                "migration cancelled"
            );
            return Err(MigrationError::Cancelled);
        }

        let counters = &shared.counters;
        summary.frontier = frontier;
        summary.blocks_read = counters.blocks_read.load(Ordering::Relaxed);
        summary.slabs_written = counters.slabs_written.load(Ordering::Relaxed);
        summary.samples_written = counters.samples_written.load(Ordering::Relaxed);
        summary.bytes_written = counters.bytes_written.load(Ordering::Relaxed);
        summary.retries_performed = counters.retries.load(Ordering::Relaxed);
        summary.skipped = skipped;
        summary.elapsed_ms = elapsed_ms(started);

        let planned = planner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .emitted();
        info!(
            status = summary.status().as_str(),
            planned,
            blocks = summary.blocks_read,
            samples = summary.samples_written,
            skipped = summary.skipped.len(),
            elapsed_ms = summary.elapsed_ms,
            "migration finished"
        );
        Ok(summary)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
