use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::db::store::PgStateStore;

pub type DbPool = PgPool;

/// Database client wrapper
#[derive(Clone)]
pub struct DBClient {
    pub pool: Arc<DbPool>,
}

impl DBClient {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.get_db_url()?)
            .await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&*self.pool).await?;
        Ok(())
    }

    pub fn state_store(&self) -> PgStateStore {
        PgStateStore::new((*self.pool).clone())
    }
}
