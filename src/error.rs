//! Error taxonomy for the fetch-and-ingest pipeline.
//!
//! Fetch failures abort the cursor they happened in, store failures stop the
//! worker that hit them. A conflict on a natural key is not an error and never
//! shows up here.
use serde::Serialize;
use thiserror::Error;

/// Why a run stopped early at a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Interrupt {
    #[error("run cancelled")]
    Cancelled,
    #[error("run deadline exceeded")]
    DeadlineExceeded,
}

/// One page request failed; the cursor that issued it is dead.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("decode: response envelope {0}")]
    Envelope(&'static str),
    #[error(transparent)]
    Interrupted(#[from] Interrupt),
}

impl FetchError {
    pub fn interrupt(&self) -> Option<Interrupt> {
        match self {
            FetchError::Interrupted(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// A write or lookup failed for a reason other than an existing natural key.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Interrupted(#[from] Interrupt),
}

/// Failure while ingesting one city; terminates the worker that raised it.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("city '{city}': insert (id = {remote_id}): {source}")]
    City {
        city: String,
        remote_id: i64,
        #[source]
        source: StoreError,
    },
    #[error("city '{city}': get universities, offset {offset}: {source}")]
    Universities {
        city: String,
        offset: u32,
        #[source]
        source: FetchError,
    },
    #[error("city '{city}': insert university '{university}' (id = {remote_id}): {source}")]
    University {
        city: String,
        university: String,
        remote_id: i64,
        #[source]
        source: StoreError,
    },
}

impl IngestError {
    pub fn interrupt(&self) -> Option<Interrupt> {
        match self {
            IngestError::City { source, .. } | IngestError::University { source, .. } => {
                match source {
                    StoreError::Interrupted(reason) => Some(*reason),
                    StoreError::Database(_) => None,
                }
            }
            IngestError::Universities { source, .. } => source.interrupt(),
        }
    }
}

/// Every worker has exited; nobody will ever accept another item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("handoff closed: no worker left to accept items")]
pub struct HandoffClosed;
