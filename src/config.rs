//! Run configuration, built once in `main` and handed to constructors.
use std::time::Duration;

use anyhow::{bail, Result};

use crate::util::env::{env_flag, env_opt, env_parse, env_parse_opt};

/// VK caps `database.getCities` at 1000 items per call.
pub const CITY_PAGE_SIZE: u32 = 1000;
/// VK caps `database.getUniversities` at 10000 items per call.
pub const UNIVERSITY_PAGE_SIZE: u32 = 10_000;

pub const DEFAULT_API_BASE: &str = "https://api.vk.com";
pub const DEFAULT_API_VERSION: &str = "5.103";
/// Russia.
pub const DEFAULT_COUNTRY_ID: i64 = 1;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Ask for every city (`need_all=1`) instead of the major-city subset.
    pub need_all_cities: bool,
    pub city_page_size: u32,
    pub university_page_size: u32,
    /// Upper bound for the whole run; `None` runs to completion.
    pub deadline: Option<Duration>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            need_all_cities: false,
            city_page_size: CITY_PAGE_SIZE,
            university_page_size: UNIVERSITY_PAGE_SIZE,
            deadline: None,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_parse_opt::<usize>("INGEST_WORKERS") {
            cfg.workers = n;
        }
        cfg.need_all_cities = env_flag("INGEST_ALL_CITIES", cfg.need_all_cities);
        cfg.city_page_size = env_parse("INGEST_CITY_PAGE_SIZE", cfg.city_page_size);
        cfg.university_page_size =
            env_parse("INGEST_UNIVERSITY_PAGE_SIZE", cfg.university_page_size);
        if let Some(secs) = env_parse_opt::<u64>("INGEST_DEADLINE_SECS") {
            cfg.deadline = (secs > 0).then(|| Duration::from_secs(secs));
        }
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("worker count must be at least 1");
        }
        if self.city_page_size == 0 || self.university_page_size == 0 {
            bail!(
                "page sizes must be positive (cities={}, universities={})",
                self.city_page_size,
                self.university_page_size
            );
        }
        // Above the cap VK returns a short first page, which reads as the last one.
        if self.city_page_size > CITY_PAGE_SIZE {
            bail!(
                "city page size {} exceeds the API limit of {CITY_PAGE_SIZE}",
                self.city_page_size
            );
        }
        if self.university_page_size > UNIVERSITY_PAGE_SIZE {
            bail!(
                "university page size {} exceeds the API limit of {UNIVERSITY_PAGE_SIZE}",
                self.university_page_size
            );
        }
        Ok(())
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone)]
pub struct VkApiConfig {
    pub token: String,
    pub base_url: String,
    pub version: String,
    pub country_id: i64,
    pub timeout: Duration,
}

impl VkApiConfig {
    /// Everything except the token, which is usually supplied on the command line.
    pub fn from_env() -> Self {
        Self {
            token: env_opt("VK_TOKEN").unwrap_or_default(),
            base_url: env_opt("VK_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            version: env_opt("VK_API_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.into()),
            country_id: env_parse("VK_COUNTRY_ID", DEFAULT_COUNTRY_ID),
            timeout: Duration::from_secs(env_parse("VK_HTTP_TIMEOUT_SECS", 30u64)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            bail!("vk access token isn't provided (--token or VK_TOKEN)");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    /// Applies to pool bootstrap only, never to the ingest path.
    pub connect_timeout: Duration,
    /// Keep sqlx's prepared statement cache (off for PgBouncer txn mode).
    pub use_prepared: bool,
}

impl DbConfig {
    pub fn from_env(url: String) -> Self {
        Self {
            url,
            max_connections: env_parse("DB_MAX_CONNS", 10u32),
            connect_timeout: Duration::from_secs(env_parse("DB_CONNECT_TIMEOUT_SECS", 5u64)),
            use_prepared: env_flag("USE_PREPARED", false),
        }
    }
}
