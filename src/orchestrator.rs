//! Drives one ingest run: a single dispatch loop pages through cities and
//! hands each one to the worker pool, then waits for the pool to drain.
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::context::RunContext;
use crate::database_ops::catalog_store::CatalogStore;
use crate::database_ops::city_ingest::{CityWorker, IngestStats, StatsSnapshot};
use crate::database_ops::vk::pagination::PageCursor;
use crate::database_ops::vk::{PageFetcher, RemoteItem, Resource};
use crate::database_ops::worker_pool::{handoff, HandoffSender, WorkerExit, WorkerOutcome, WorkerPool};
use crate::error::Interrupt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    FetchingOuter,
    Dispatching,
    Draining,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::FetchingOuter => "fetching_outer",
            RunPhase::Dispatching => "dispatching",
            RunPhase::Draining => "draining",
            RunPhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Why the dispatch loop stopped handing out cities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchEnd {
    /// Every city page was fetched and handed off.
    Exhausted,
    /// A city page failed; later pages were never requested.
    FetchFailed { offset: u32, error: String },
    /// Every worker exited; the remaining cities had nowhere to go.
    PoolExhausted,
    Interrupted { reason: Interrupt },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub dispatch_end: DispatchEnd,
    pub city_pages: u64,
    pub cities_dispatched: u64,
    /// Fetched but never accepted by a worker.
    pub cities_undelivered: u64,
    pub stats: StatsSnapshot,
    pub workers: Vec<WorkerOutcome>,
}

impl RunReport {
    pub fn failed_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| !matches!(w.exit, WorkerExit::Drained))
            .count()
    }

    /// Every fetched city was delivered and every worker drained cleanly.
    pub fn is_complete(&self) -> bool {
        self.dispatch_end == DispatchEnd::Exhausted
            && self.cities_undelivered == 0
            && self.failed_workers() == 0
    }
}

struct DispatchSummary {
    end: DispatchEnd,
    pages: u64,
    dispatched: u64,
    undelivered: u64,
}

pub struct Orchestrator {
    config: IngestConfig,
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn CatalogStore>,
    phase: watch::Sender<RunPhase>,
}

impl Orchestrator {
    pub fn new(
        config: IngestConfig,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn CatalogStore>,
    ) -> Self {
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            config,
            fetcher,
            store,
            phase,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Follow phase changes from another task, e.g. a signal handler.
    pub fn watch_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    fn enter(&self, phase: RunPhase) {
        debug!(%phase, "orchestrator phase");
        self.phase.send_replace(phase);
    }

    /// Run to completion. Partial failures are reported, not returned: the
    /// run always reaches `Done` with every accepted city fully processed.
    pub async fn run(&self, ctx: &RunContext) -> RunReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let stats = Arc::new(IngestStats::default());

        let (tx, rx) = handoff::<RemoteItem>();
        let worker = Arc::new(CityWorker::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.store),
            self.config.university_page_size,
            Arc::clone(&stats),
            ctx.clone(),
        ));
        let pool = WorkerPool::spawn(self.config.workers, rx, worker);
        info!(
            workers = pool.size(),
            need_all = self.config.need_all_cities,
            city_page_size = self.config.city_page_size,
            university_page_size = self.config.university_page_size,
            "ingest run started"
        );

        let summary = self.dispatch_cities(&tx, ctx).await;
        // Closing the handoff lets idle workers exit once nothing is pending.
        drop(tx);

        self.enter(RunPhase::Draining);
        let workers = pool.join().await;
        self.enter(RunPhase::Done);

        let report = RunReport {
            started_at,
            elapsed_ms: clock.elapsed().as_millis() as u64,
            dispatch_end: summary.end,
            city_pages: summary.pages,
            cities_dispatched: summary.dispatched,
            cities_undelivered: summary.undelivered,
            stats: stats.snapshot(),
            workers,
        };
        info!(
            cities_dispatched = report.cities_dispatched,
            cities_undelivered = report.cities_undelivered,
            failed_workers = report.failed_workers(),
            elapsed_ms = report.elapsed_ms,
            "done"
        );
        report
    }

    async fn dispatch_cities(&self, tx: &HandoffSender<RemoteItem>, ctx: &RunContext) -> DispatchSummary {
        let mut cursor = PageCursor::new(
            Arc::clone(&self.fetcher),
            Resource::Cities {
                need_all: self.config.need_all_cities,
            },
            self.config.city_page_size,
        );
        let mut summary = DispatchSummary {
            end: DispatchEnd::Exhausted,
            pages: 0,
            dispatched: 0,
            undelivered: 0,
        };

        loop {
            self.enter(RunPhase::FetchingOuter);
            let offset = cursor.offset().unwrap_or_default();
            let page = match cursor.next_page(ctx).await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(err) => {
                    summary.end = match err.interrupt() {
                        Some(reason) => {
                            warn!(offset, %reason, "city pagination interrupted");
                            DispatchEnd::Interrupted { reason }
                        }
                        None => {
                            error!(offset, error = %err, "failed to get cities");
                            DispatchEnd::FetchFailed {
                                offset,
                                error: err.to_string(),
                            }
                        }
                    };
                    break;
                }
            };
            summary.pages += 1;
            info!(count = page.len(), offset, "fetched cities");

            self.enter(RunPhase::Dispatching);
            let total = page.len() as u64;
            for (i, city) in page.items.into_iter().enumerate() {
                let sent = match ctx.interrupted() {
                    Some(reason) => Err(reason),
                    None => tx.send_until(city, ctx.until_interrupted()).await,
                };
                let stop = match sent {
                    Ok(Ok(())) => {
                        summary.dispatched += 1;
                        None
                    }
                    Ok(Err(closed)) => {
                        error!(offset, error = %closed, "all workers exited; abandoning dispatch");
                        Some(DispatchEnd::PoolExhausted)
                    }
                    Err(reason) => {
                        warn!(offset, %reason, "dispatch interrupted");
                        Some(DispatchEnd::Interrupted { reason })
                    }
                };
                if let Some(end) = stop {
                    summary.undelivered += total - i as u64;
                    summary.end = end;
                    return summary;
                }
            }
        }
        summary
    }
}
