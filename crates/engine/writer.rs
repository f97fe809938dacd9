//! Writer pool: pushes slabs to the destination and reports completion.

use crate::{
    engine::Shared,
    error::MigrationError,
    frontier::SkippedRange,
    remote::Destination,
    retry::{Attempted, RetryPolicy, Role},
    types::Slab,
};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub(crate) struct WriterContext {
    pub destination: Arc<dyn Destination>,
    pub policy: RetryPolicy,
    /// Shared by all writers; whoever holds the lock takes the next slab.
    pub slabs: Arc<Mutex<mpsc::Receiver<Slab>>>,
    pub shared: Arc<Shared>,
}

impl WriterContext {
    async fn next_slab(&self) -> Result<Option<Slab>, MigrationError> {
        let mut slabs = self.slabs.lock().await;
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(MigrationError::Cancelled),
            slab = slabs.recv() => Ok(slab),
        }
    }
}

pub(crate) async fn run_writer(worker: usize, ctx: WriterContext) -> Result<(), MigrationError> {
    while let Some(slab) = ctx.next_slab().await? {
        let range = ctx.shared.time_format.range(&slab.range);

        if slab.is_empty() {
            debug!(worker, first_block = slab.first_block, %range, "nothing to push");
            ctx.shared
                .complete(slab.first_block, slab.last_block, slab.range.end_ms)
                .await?;
            continue;
        }

        debug!(
            worker,
            first_block = slab.first_block,
            last_block = slab.last_block,
            %range,
            "pushing slab"
        );
        let attempted = ctx
            .policy
            .run(&ctx.shared.cancel, || ctx.destination.write(&slab.series))
            .await?;
        ctx.shared.counters.record_attempts(attempted.attempts());

        match attempted {
            Attempted::Done { .. } => {
                ctx.shared.counters.record_slab(&slab);
                ctx.shared
                    .complete(slab.first_block, slab.last_block, slab.range.end_ms)
                    .await?;
            }
            Attempted::Skipped { error, attempts } => {
                warn!(
                    worker,
                    first_block = slab.first_block,
                    last_block = slab.last_block,
                    %range,
                    attempts,
                    %error,
                    "skipping slab"
                );
                ctx.shared
                    .skip(SkippedRange {
                        role: Role::Writer,
                        range: slab.range,
                        first_block: slab.first_block,
                        last_block: slab.last_block,
                        reason: error.to_string(),
                    })
                    .await?;
            }
        }
    }

    debug!(worker, "writer finished");
    Ok(())
}
