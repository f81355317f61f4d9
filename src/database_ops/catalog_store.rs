//! Idempotent writes for the city/university catalog.
//!
//! Cities are keyed by trimmed name. Universities are keyed by
//! `(city row id, trimmed name)` with a foreign key to `city`, so two cities
//! may each own a university of the same name. An existing key is reported
//! through the return value, never as an error.
use async_trait::async_trait;
use tracing::{debug, instrument};

use super::db::Db;
use crate::error::StoreError;

/// Stored city row and whether it was there before this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CityRow {
    pub id: i32,
    pub existed: bool,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert the city unless its name is taken; either way return its row id.
    async fn upsert_city(&self, name: &str) -> Result<CityRow, StoreError>;

    /// Insert the university unless `(city_id, name)` is taken. Returns `true`
    /// when the row already existed.
    async fn insert_university(&self, city_id: i32, name: &str) -> Result<bool, StoreError>;
}

#[async_trait]
impl CatalogStore for Db {
    #[instrument(skip(self))]
    async fn upsert_city(&self, name: &str) -> Result<CityRow, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted: Option<i32> = sqlx::query_scalar(
            "INSERT INTO city (name) VALUES ($1) ON CONFLICT DO NOTHING RETURNING id",
        )
        .persistent(false)
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match inserted {
            Some(id) => CityRow { id, existed: false },
            None => {
                let id: i32 = sqlx::query_scalar("SELECT id FROM city WHERE name = $1")
                    .persistent(false)
                    .bind(name)
                    .fetch_one(&mut *tx)
                    .await?;
                debug!(city_id = id, "city already stored");
                CityRow { id, existed: true }
            }
        };

        tx.commit().await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    async fn insert_university(&self, city_id: i32, name: &str) -> Result<bool, StoreError> {
        let res = sqlx::query(
            "INSERT INTO university (city, name) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .persistent(false)
        .bind(city_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 0)
    }
}
