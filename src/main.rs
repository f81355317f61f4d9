use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use catalog_ingest::config::{DbConfig, IngestConfig, VkApiConfig};
use catalog_ingest::context::RunContext;
use catalog_ingest::database_ops::db::Db;
use catalog_ingest::database_ops::vk::client::VkClient;
use catalog_ingest::orchestrator::Orchestrator;
use catalog_ingest::util::env as env_util;
use clap::{ArgAction, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_DB_CONNSTR: &str = "postgres@localhost:5432";
const DEFAULT_DB_NAME: &str = "postgres";

#[derive(Parser, Debug)]
#[command(
    name = "catalog_ingest",
    version,
    about = "Ingest the VK city/university catalog into Postgres"
)]
struct Cli {
    /// VK access token (falls back to VK_TOKEN)
    #[arg(long)]
    token: Option<String>,
    /// Request every city (about 158k) instead of the major-city subset
    #[arg(long = "all-cities", action = ArgAction::SetTrue)]
    all_cities: bool,
    /// Parallel fetcher/writer workers (default: INGEST_WORKERS or CPU count)
    #[arg(long)]
    workers: Option<usize>,
    /// Full database URL; takes precedence over --db-connstr/--db-name
    #[arg(long)]
    db_url: Option<String>,
    /// Connection string without scheme and database, e.g. user@host:5432
    #[arg(long)]
    db_connstr: Option<String>,
    /// Database name used with --db-connstr
    #[arg(long)]
    db_name: Option<String>,
    /// Abort the run after this many seconds (default: INGEST_DEADLINE_SECS or unbounded)
    #[arg(long)]
    deadline_secs: Option<u64>,
    /// Print the run report as JSON on stdout when done
    #[arg(long = "summary-json", action = ArgAction::SetTrue)]
    summary_json: bool,
}

impl Cli {
    fn ingest_config(&self) -> Result<IngestConfig> {
        let mut cfg = IngestConfig::from_env();
        if let Some(n) = self.workers {
            cfg.workers = n;
        }
        if self.all_cities {
            cfg.need_all_cities = true;
        }
        if let Some(secs) = self.deadline_secs {
            cfg.deadline = (secs > 0).then(|| Duration::from_secs(secs));
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn api_config(&self) -> Result<VkApiConfig> {
        let mut cfg = VkApiConfig::from_env();
        if let Some(token) = &self.token {
            cfg.token = token.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn db_url(&self) -> String {
        if let Some(url) = &self.db_url {
            return url.clone();
        }
        if self.db_connstr.is_some() || self.db_name.is_some() {
            return env_util::compose_db_url(
                self.db_connstr.as_deref().unwrap_or(DEFAULT_DB_CONNSTR),
                self.db_name.as_deref().unwrap_or(DEFAULT_DB_NAME),
            );
        }
        env_util::db_url().unwrap_or_else(|err| {
            warn!(error = %err, "falling back to default local database");
            env_util::compose_db_url(DEFAULT_DB_CONNSTR, DEFAULT_DB_NAME)
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    catalog_ingest::tracing::init_tracing(
        catalog_ingest::tracing::DEFAULT_FILTER,
        catalog_ingest::tracing::LogFormat::from_env(),
    )?;

    let cli = Cli::parse();
    let ingest_cfg = cli.ingest_config()?;
    let api_cfg = cli.api_config()?;
    let db_cfg = DbConfig::from_env(cli.db_url());

    env_util::preflight_check(
        "catalog-ingest",
        &[
            ("VK_TOKEN", api_cfg.token.clone()),
            ("VK_API_BASE", api_cfg.base_url.clone()),
            ("VK_API_VERSION", api_cfg.version.clone()),
            ("INGEST_WORKERS", ingest_cfg.workers.to_string()),
            ("INGEST_ALL_CITIES", ingest_cfg.need_all_cities.to_string()),
            ("INGEST_CITY_PAGE_SIZE", ingest_cfg.city_page_size.to_string()),
            (
                "INGEST_UNIVERSITY_PAGE_SIZE",
                ingest_cfg.university_page_size.to_string(),
            ),
            (
                "INGEST_DEADLINE_SECS",
                ingest_cfg
                    .deadline
                    .map(|d| d.as_secs().to_string())
                    .unwrap_or_default(),
            ),
            ("DATABASE_URL", db_cfg.url.clone()),
            ("DB_MAX_CONNS", db_cfg.max_connections.to_string()),
            (
                "LOG_FORMAT",
                env_util::env_opt("LOG_FORMAT").unwrap_or_else(|| "full".into()),
            ),
        ],
    );

    let db = Db::connect(&db_cfg)
        .await
        .context("Db::connect failed")?;
    db.require_catalog_schema().await?;

    let client = VkClient::new(&api_cfg, ingest_cfg.workers)?;

    let cancel = CancellationToken::new();
    let mut ctx = RunContext::new(cancel.clone());
    if let Some(deadline) = ingest_cfg.deadline {
        ctx = ctx.with_timeout(deadline);
    }
    let orchestrator = Orchestrator::new(ingest_cfg, Arc::new(client), Arc::new(db.clone()));
    let phases = orchestrator.watch_phase();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let phase = *phases.borrow();
            warn!(%phase, "ctrl-c received; cancelling run");
            cancel.cancel();
        }
    });

    let report = orchestrator.run(&ctx).await;

    info!(
        complete = report.is_complete(),
        cities_inserted = report.stats.cities_inserted,
        cities_existing = report.stats.cities_existing,
        universities_inserted = report.stats.universities_inserted,
        universities_existing = report.stats.universities_existing,
        failed_workers = report.failed_workers(),
        "ingest summary"
    );
    if cli.summary_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    db.pool.close().await;
    Ok(())
}
