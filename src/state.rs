use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: reqwest::Client,
    /// slug -> guest page row; `None` caches a confirmed miss.
    pub guest_page_cache: Cache<String, Option<Value>>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = db::build_pool(&config)?;
        if db_pool.is_none() {
            tracing::warn!("DATABASE_URL is not set — persistence-backed routes will fail");
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        let guest_page_cache = Cache::builder()
            .time_to_live(Duration::from_secs(config.guest_page_cache_ttl_seconds))
            .max_capacity(config.guest_page_cache_max_entries)
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http_client,
            guest_page_cache,
        })
    }
}
