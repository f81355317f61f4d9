use anyhow::{Context, Result};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::DbConfig;

/// Tables the ingest path writes to. Nothing here creates them; see `sql/schema.sql`.
pub const CATALOG_TABLES: [&str; 2] = ["city", "university"];

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    /// Connect the shared pool. `connect_timeout` bounds this call only; once
    /// connected, the ingest path is governed by the run context instead.
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(cfg), fields(max_connections = cfg.max_connections))]
    pub async fn connect(cfg: &DbConfig) -> Result<Self> {
        let mut connect_options =
            PgConnectOptions::from_str(&cfg.url).context("invalid database URL")?;

        if cfg.url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }
        if !cfg.use_prepared {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let connecting = PgPoolOptions::new()
            .max_connections(cfg.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(cfg.connect_timeout, connecting)
            .await
            .with_context(|| {
                format!(
                    "database connect timed out after {}s",
                    cfg.connect_timeout.as_secs()
                )
            })?
            .context("failed to connect to database")?;
        info!("connected to db");
        Ok(Self { pool })
    }

    /// Fail fast when the catalog tables are missing. This binary never runs migrations.
    pub async fn require_catalog_schema(&self) -> Result<()> {
        let wanted: Vec<String> = CATALOG_TABLES.iter().map(|s| s.to_string()).collect();
        let missing: Vec<String> =
            sqlx::query_scalar("SELECT t FROM unnest($1::text[]) AS t WHERE to_regclass(t) IS NULL")
                .persistent(false)
                .bind(&wanted)
                .fetch_all(&self.pool)
                .await?;

        if !missing.is_empty() {
            return Err(anyhow::anyhow!(
                "missing catalog tables in target DB: {missing:?}. Apply sql/schema.sql first."
            ));
        }
        Ok(())
    }
}
