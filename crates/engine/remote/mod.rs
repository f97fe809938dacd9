//! Endpoint seams.
//!
//! The engine only talks to storage through these traits. `memory` backs
//! tests and dry runs, `http` talks to real remote storage.

pub mod http;
pub mod memory;

use crate::{
    error::EndpointError,
    types::{TimeRange, TimeSeries},
};
use std::fmt::Debug;

pub use http::{HttpDestination, HttpSource, PrometheusCheckpointReader};
pub use memory::MemoryStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub range: TimeRange,
    pub selector: String,
}

/// Identifies the checkpoint series of one migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointQuery {
    pub metric_name: String,
    pub job: String,
    /// Original start of the migration, in seconds.
    pub start_s: i64,
    /// End of the migration, in seconds.
    pub end_s: i64,
}

// async_trait keeps the traits object safe (`Arc<dyn Source>`).
#[async_trait::async_trait]
pub trait Source: Debug + Send + Sync {
    /// Every series with at least one sample inside `request.range`.
    async fn read(&self, request: ReadRequest) -> Result<Vec<TimeSeries>, EndpointError>;
}

#[async_trait::async_trait]
pub trait Destination: Debug + Send + Sync {
    async fn write(&self, series: &[TimeSeries]) -> Result<(), EndpointError>;
}

#[async_trait::async_trait]
pub trait CheckpointReader: Debug + Send + Sync {
    /// Last persisted checkpoint in milliseconds, if any.
    async fn latest_checkpoint(&self, query: &CheckpointQuery)
    -> Result<Option<i64>, EndpointError>;
}
