//! In-memory doubles for the fetch and store seams, used by unit tests.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::database_ops::catalog_store::{CatalogStore, CityRow};
use crate::database_ops::vk::{PageFetcher, RemoteItem, Resource};
use crate::error::{FetchError, StoreError};

/// `n` items with consecutive ids starting at `first`.
pub fn items(first: i64, n: usize) -> Vec<RemoteItem> {
    (0..n as i64)
        .map(|i| RemoteItem::new(first + i, format!("City {}", first + i)))
        .collect()
}

pub fn injected_db_error() -> StoreError {
    StoreError::Database(sqlx::Error::Protocol("injected failure".into()))
}

/// City pages are scripted in call order; university lists are sliced by
/// offset/count per city. Every call is recorded.
#[derive(Default)]
pub struct StubFetcher {
    city_pages: Mutex<VecDeque<Result<Vec<RemoteItem>, FetchError>>>,
    universities: HashMap<i64, Vec<RemoteItem>>,
    failing_universities: HashSet<i64>,
    stall_cities_after: Option<usize>,
    calls: Mutex<Vec<(Resource, u32, u32)>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cities(mut self, pages: Vec<Result<Vec<RemoteItem>, FetchError>>) -> Self {
        self.city_pages = Mutex::new(pages.into());
        self
    }

    pub fn with_universities(mut self, city_id: i64, names: &[&str]) -> Self {
        let list = names
            .iter()
            .enumerate()
            .map(|(i, n)| RemoteItem::new(city_id * 1000 + i as i64, *n))
            .collect();
        self.universities.insert(city_id, list);
        self
    }

    pub fn failing_universities(mut self, city_id: i64) -> Self {
        self.failing_universities.insert(city_id);
        self
    }

    /// City requests after the first `n` never complete.
    pub fn stall_cities_after(mut self, n: usize) -> Self {
        self.stall_cities_after = Some(n);
        self
    }

    pub fn calls(&self) -> Vec<(Resource, u32, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn city_offsets(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter(|(r, _, _)| matches!(r, Resource::Cities { .. }))
            .map(|(_, offset, _)| offset)
            .collect()
    }

    pub fn city_calls(&self) -> usize {
        self.city_offsets().len()
    }

    pub fn university_calls(&self, city_id: i64) -> usize {
        self.calls()
            .into_iter()
            .filter(|(r, _, _)| *r == Resource::Universities { city_id })
            .count()
    }
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch_page(
        &self,
        resource: Resource,
        offset: u32,
        count: u32,
    ) -> Result<Vec<RemoteItem>, FetchError> {
        let previous_city_calls = self.city_calls();
        self.calls.lock().unwrap().push((resource, offset, count));
        match resource {
            Resource::Cities { .. } => {
                if matches!(self.stall_cities_after, Some(n) if previous_city_calls >= n) {
                    futures::future::pending::<()>().await;
                }
                let next = self.city_pages.lock().unwrap().pop_front();
                next.unwrap_or_else(|| Ok(Vec::new()))
            }
            Resource::Universities { city_id } => {
                if self.failing_universities.contains(&city_id) {
                    return Err(FetchError::Status {
                        status: 503,
                        body: "unavailable".into(),
                    });
                }
                let all = self.universities.get(&city_id).cloned().unwrap_or_default();
                Ok(all
                    .into_iter()
                    .skip(offset as usize)
                    .take(count as usize)
                    .collect())
            }
        }
    }
}

#[derive(Default)]
struct Tables {
    /// Row id is index + 1.
    cities: Vec<String>,
    universities: HashSet<(i32, String)>,
}

/// Catalog tables in memory, with per-name failure injection.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing_cities: HashSet<String>,
    failing_universities: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_city(mut self, name: &str) -> Self {
        self.failing_cities.insert(name.to_string());
        self
    }

    pub fn failing_university(mut self, name: &str) -> Self {
        self.failing_universities.insert(name.to_string());
        self
    }

    pub fn city_names(&self) -> Vec<String> {
        self.tables.lock().unwrap().cities.clone()
    }

    pub fn city_count(&self) -> usize {
        self.tables.lock().unwrap().cities.len()
    }

    pub fn university_count(&self) -> usize {
        self.tables.lock().unwrap().universities.len()
    }

    pub fn universities_of(&self, city: &str) -> Vec<String> {
        let tables = self.tables.lock().unwrap();
        let Some(idx) = tables.cities.iter().position(|c| c == city) else {
            return Vec::new();
        };
        let id = idx as i32 + 1;
        let mut names: Vec<String> = tables
            .universities
            .iter()
            .filter(|(city_id, _)| *city_id == id)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn upsert_city(&self, name: &str) -> Result<CityRow, StoreError> {
        if self.failing_cities.contains(name) {
            return Err(injected_db_error());
        }
        let mut tables = self.tables.lock().unwrap();
        if let Some(idx) = tables.cities.iter().position(|c| c == name) {
            return Ok(CityRow {
                id: idx as i32 + 1,
                existed: true,
            });
        }
        tables.cities.push(name.to_string());
        Ok(CityRow {
            id: tables.cities.len() as i32,
            existed: false,
        })
    }

    async fn insert_university(&self, city_id: i32, name: &str) -> Result<bool, StoreError> {
        if self.failing_universities.contains(name) {
            return Err(injected_db_error());
        }
        let inserted = self
            .tables
            .lock()
            .unwrap()
            .universities
            .insert((city_id, name.to_string()));
        Ok(!inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upserting_the_same_city_twice_reports_existence() {
        let store = MemoryStore::new();
        let first = store.upsert_city("Bar").await.unwrap();
        let second = store.upsert_city("Bar").await.unwrap();
        assert!(!first.existed);
        assert!(second.existed);
        assert_eq!(first.id, second.id);
        assert_eq!(store.city_count(), 1);
    }

    #[tokio::test]
    async fn universities_are_scoped_by_city() {
        let store = MemoryStore::new();
        let a = store.upsert_city("A").await.unwrap();
        let b = store.upsert_city("B").await.unwrap();
        assert!(!store.insert_university(a.id, "Polytech").await.unwrap());
        assert!(!store.insert_university(b.id, "Polytech").await.unwrap());
        assert!(store.insert_university(a.id, "Polytech").await.unwrap());
        assert_eq!(store.university_count(), 2);
    }
}
