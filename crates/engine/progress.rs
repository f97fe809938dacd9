//! Resumable checkpoints.
//!
//! The checkpoint is a sample of the progress metric written to the
//! destination next to the migrated data. Its labels identify the migration
//! (`job`, original start `si` and end `ei` in seconds), its timestamp is the
//! frontier in milliseconds and its value the frontier in seconds.

use crate::{
    config::MigrationPlan,
    error::MigrationError,
    remote::{CheckpointQuery, CheckpointReader, Destination},
    retry::{Action, Attempted, RetryPolicy},
    types::{Label, METRIC_NAME_LABEL, Sample, TimeSeries},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub fn checkpoint_query(plan: &MigrationPlan) -> CheckpointQuery {
    CheckpointQuery {
        metric_name: plan.progress.metric_name.clone(),
        job: plan.name.clone(),
        start_s: plan.mint / 1000,
        end_s: plan.maxt / 1000,
    }
}

/// Start of the work still to do: the stored checkpoint when it lies inside
/// `(mint, maxt]`, clamped to `maxt`, and `mint` otherwise.
pub async fn resume_point(
    plan: &MigrationPlan,
    reader: Option<&dyn CheckpointReader>,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<i64, MigrationError> {
    let Some(reader) = reader.filter(|_| plan.progress.enabled) else {
        return Ok(plan.mint);
    };
    let query = checkpoint_query(plan);

    let checkpoint = match policy
        .run(cancel, || reader.latest_checkpoint(&query))
        .await?
    {
        Attempted::Done { value, .. } => value,
        Attempted::Skipped { error, .. } => {
            warn!(%error, "could not read the last checkpoint, starting from the beginning");
            None
        }
    };

    Ok(match checkpoint {
        Some(last) if last > plan.mint => {
            let resume = last.min(plan.maxt);
            info!(
                checkpoint = %plan.time_format().timestamp(last),
                "resuming from the last checkpoint"
            );
            resume
        }
        _ => plan.mint,
    })
}

#[derive(Debug)]
pub struct ProgressTracker {
    enabled: bool,
    labels: Vec<Label>,
    destination: Arc<dyn Destination>,
    policy: RetryPolicy,
    /// Checkpoints at or below this add nothing.
    floor_ms: i64,
    last_persisted: Mutex<Option<i64>>,
}

impl ProgressTracker {
    pub fn new(
        plan: &MigrationPlan,
        destination: Arc<dyn Destination>,
        policy: RetryPolicy,
    ) -> Self {
        let query = checkpoint_query(plan);
        Self {
            enabled: plan.progress.enabled,
            labels: vec![
                Label::new(METRIC_NAME_LABEL, query.metric_name),
                Label::new("job", query.job),
                Label::new("si", query.start_s.to_string()),
                Label::new("ei", query.end_s.to_string()),
            ],
            destination,
            policy,
            floor_ms: plan.mint,
            last_persisted: Mutex::new(None),
        }
    }

    /// Start of this run, usually the resume point.
    pub fn starting_at(mut self, start_ms: i64) -> Self {
        self.floor_ms = start_ms;
        self
    }

    pub async fn last_persisted(&self) -> Option<i64> {
        *self.last_persisted.lock().await
    }

    pub fn checkpoint_series(&self, frontier_ms: i64) -> TimeSeries {
        TimeSeries::new(
            self.labels.clone(),
            vec![Sample::new(frontier_ms, frontier_ms as f64 / 1000.0)],
        )
    }

    /// Persists `frontier_ms` unless an equal or later checkpoint already is.
    /// Returns whether a sample was written.
    pub async fn record(
        &self,
        frontier_ms: i64,
        cancel: &CancellationToken,
    ) -> Result<bool, MigrationError> {
        self.persist(frontier_ms, &self.policy, cancel).await
    }

    /// Final write once the workers stopped. Runs even when the migration
    /// was cancelled, as a single attempt under the endpoint timeout whose
    /// failure is only logged.
    pub async fn finish(&self, frontier_ms: i64) -> Result<bool, MigrationError> {
        let once = RetryPolicy {
            on_timeout: Action::Skip,
            on_error: Action::Skip,
            ..self.policy.clone()
        };
        self.persist(frontier_ms, &once, &CancellationToken::new()).await
    }

    async fn persist(
        &self,
        frontier_ms: i64,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<bool, MigrationError> {
        if !self.enabled || frontier_ms <= self.floor_ms {
            return Ok(false);
        }
        let mut last = self.last_persisted.lock().await;
        if last.is_some_and(|last| frontier_ms <= last) {
            return Ok(false);
        }

        let payload = [self.checkpoint_series(frontier_ms)];
        match policy
            .run(cancel, || self.destination.write(&payload))
            .await?
        {
            Attempted::Done { .. } => {
                debug!(frontier = frontier_ms, "checkpoint persisted");
                *last = Some(frontier_ms);
                Ok(true)
            }
            Attempted::Skipped { error, .. } => {
                warn!(frontier = frontier_ms, %error, "checkpoint write skipped");
                Ok(false)
            }
        }
    }
}
