pub mod client;
pub mod pagination;

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::FetchError;

/// One `{id, title}` entry of a VK list response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteItem {
    pub id: i64,
    pub title: String,
}

impl RemoteItem {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
        }
    }

    /// Display name as stored: surrounding whitespace removed.
    pub fn name(&self) -> &str {
        self.title.trim()
    }
}

/// Paginated VK resources together with their scope filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// `database.getCities`; `need_all` requests every settlement, not only major cities.
    Cities { need_all: bool },
    /// `database.getUniversities` scoped to one remote city id.
    Universities { city_id: i64 },
}

impl Resource {
    pub fn method(&self) -> &'static str {
        match self {
            Resource::Cities { .. } => "database.getCities",
            Resource::Universities { .. } => "database.getUniversities",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Cities { need_all } => write!(f, "cities(need_all={need_all})"),
            Resource::Universities { city_id } => write!(f, "universities(city_id={city_id})"),
        }
    }
}

/// One network round trip for one page of a resource.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(
        &self,
        resource: Resource,
        offset: u32,
        count: u32,
    ) -> Result<Vec<RemoteItem>, FetchError>;
}
