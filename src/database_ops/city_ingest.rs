use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use super::catalog_store::CatalogStore;
use super::vk::pagination::PageCursor;
use super::vk::{PageFetcher, RemoteItem, Resource};
use super::worker_pool::TaskWorker;
use crate::context::RunContext;
use crate::error::{IngestError, StoreError};

/// Write counters shared by all workers of one run.
#[derive(Debug, Default)]
pub struct IngestStats {
    cities_inserted: AtomicU64,
    cities_existing: AtomicU64,
    universities_inserted: AtomicU64,
    universities_existing: AtomicU64,
    university_pages: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cities_inserted: u64,
    pub cities_existing: u64,
    pub universities_inserted: u64,
    pub universities_existing: u64,
    pub university_pages: u64,
}

impl StatsSnapshot {
    pub fn attempted_writes(&self) -> u64 {
        self.cities_inserted
            + self.cities_existing
            + self.universities_inserted
            + self.universities_existing
    }

    pub fn conflicts(&self) -> u64 {
        self.cities_existing + self.universities_existing
    }
}

impl IngestStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cities_inserted: self.cities_inserted.load(Ordering::Relaxed),
            cities_existing: self.cities_existing.load(Ordering::Relaxed),
            universities_inserted: self.universities_inserted.load(Ordering::Relaxed),
            universities_existing: self.universities_existing.load(Ordering::Relaxed),
            university_pages: self.university_pages.load(Ordering::Relaxed),
        }
    }

    fn record_city(&self, existed: bool) {
        let counter = if existed {
            &self.cities_existing
        } else {
            &self.cities_inserted
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_university(&self, existed: bool) {
        let counter = if existed {
            &self.universities_existing
        } else {
            &self.universities_inserted
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Ingests one city end to end: the city row first, then every university
/// page for it.
pub struct CityWorker {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn CatalogStore>,
    university_page_size: u32,
    stats: Arc<IngestStats>,
    ctx: RunContext,
}

impl CityWorker {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn CatalogStore>,
        university_page_size: u32,
        stats: Arc<IngestStats>,
        ctx: RunContext,
    ) -> Self {
        Self {
            fetcher,
            store,
            university_page_size,
            stats,
            ctx,
        }
    }

    pub async fn ingest_city(&self, worker_id: usize, city: RemoteItem) -> Result<(), IngestError> {
        let name = city.name().to_string();

        let row = self
            .ctx
            .guard(self.store.upsert_city(&name))
            .await
            .map_err(StoreError::from)
            .and_then(|res| res)
            .map_err(|source| IngestError::City {
                city: name.clone(),
                remote_id: city.id,
                source,
            })?;
        self.stats.record_city(row.existed);
        if row.existed {
            info!(city = %name, city_id = row.id, "city exists");
        }

        let mut cursor = PageCursor::new(
            Arc::clone(&self.fetcher),
            Resource::Universities { city_id: city.id },
            self.university_page_size,
        );
        loop {
            let offset = cursor.offset().unwrap_or_default();
            let page = match cursor.next_page(&self.ctx).await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(source) => {
                    return Err(IngestError::Universities {
                        city: name,
                        offset,
                        source,
                    })
                }
            };
            self.stats.university_pages.fetch_add(1, Ordering::Relaxed);
            info!(worker = worker_id, city = %name, count = page.len(), offset, "fetched universities");

            let total = page.len();
            for (i, uni) in page.items.into_iter().enumerate() {
                let uni_name = uni.name();
                let existed = self
                    .ctx
                    .guard(self.store.insert_university(row.id, uni_name))
                    .await
                    .map_err(StoreError::from)
                    .and_then(|res| res)
                    .map_err(|source| IngestError::University {
                        city: name.clone(),
                        university: uni_name.to_string(),
                        remote_id: uni.id,
                        source,
                    })?;
                self.stats.record_university(existed);
                if existed {
                    info!(
                        city = %name,
                        university_id = uni.id,
                        university = %uni_name,
                        "university exists, skipping: {}/{}",
                        i,
                        total
                    );
                }
            }
        }
        debug!(worker = worker_id, city = %name, "city done");
        Ok(())
    }
}

#[async_trait]
impl TaskWorker<RemoteItem> for CityWorker {
    async fn process(&self, worker_id: usize, task: RemoteItem) -> Result<(), IngestError> {
        self.ingest_city(worker_id, task).await
    }
}
