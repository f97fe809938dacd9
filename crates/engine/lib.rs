//! Migrates historical time-series data between two remote storages.
//!
//! A [`config::RawConfig`] is validated into a [`config::ValidatedConfig`],
//! which a [`Migrator`] runs against a [`remote::Source`] and a
//! [`remote::Destination`]. Progress is checkpointed to the destination so an
//! interrupted migration resumes where it stopped.

pub mod auth;
pub mod bytesize;
pub mod config;
pub mod engine;
pub mod error;
pub mod frontier;
pub mod planner;
pub mod progress;
pub mod reader;
pub mod remote;
pub mod retry;
pub mod types;
mod writer;

pub use config::{RawConfig, ValidatedConfig, validate};
pub use engine::{MigrationStatus, MigrationSummary, Migrator};
pub use error::{EndpointError, MigrationError};
