//! Paginated VK city/university catalog ingest into Postgres.
//!
//! [`orchestrator::Orchestrator`] pages through cities and hands each one to a
//! fixed pool of workers; every worker writes its city and then drains that
//! city's universities. Writes are insert-or-ignore on natural keys, so a run
//! can be repeated without creating duplicates.
pub mod config;
pub mod context;
pub mod database_ops;
pub mod error;
pub mod orchestrator;
pub mod tracing;

pub mod util {
    pub mod env;
}

#[cfg(test)]
pub(crate) mod testkit;

pub use config::{DbConfig, IngestConfig, VkApiConfig};
pub use context::RunContext;
pub use orchestrator::{Orchestrator, RunReport};
