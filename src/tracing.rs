//! Log bootstrap for the ingest binary.
use anyhow::anyhow;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::util::env::env_opt;

/// Used when `RUST_LOG` is unset: pipeline at info, sqlx quiet.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Line layout, picked with `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Target, thread id, file and line on every event.
    #[default]
    Full,
    /// Single-line events without source locations.
    Compact,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" | "" => Some(Self::Full),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }

    /// Unknown values fall back to `Full`.
    pub fn from_env() -> Self {
        env_opt("LOG_FORMAT")
            .and_then(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global subscriber. Thread ids are kept in both layouts since
/// workers run on the multi-threaded runtime.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> anyhow::Result<()> {
    let events = fmt::layer().with_target(true).with_thread_ids(true);
    let registry = tracing_subscriber::registry().with(env_filter(default_filter));
    match format {
        LogFormat::Full => registry
            .with(events.with_file(true).with_line_number(true))
            .try_init(),
        LogFormat::Compact => registry.with(events.compact()).try_init(),
    }
    .map_err(|e| anyhow!("failed to initialize tracing: {e}"))
}
