use std::sync::Arc;

use anyhow::Context;
use log::info;

use crate::config::PostgresSettings;

pub mod postgres;

pub use postgres::PostgresClient;

/// Database handle shared by the HTTP workers.
///
/// PostgreSQL holds both source tables; the engine only reads from it.
#[derive(Clone)]
pub struct Database {
    pub postgres: Arc<PostgresClient>,
}

impl Database {
    pub async fn new(settings: &PostgresSettings) -> anyhow::Result<Self> {
        let postgres = PostgresClient::new(settings.clone())
            .await
            .context("Failed to initialize PostgreSQL")?;

        if settings.run_migrations {
            postgres.migrate().await?;
        } else {
            info!("Skipping migrations (postgres.run_migrations = false)");
        }

        Ok(Self {
            postgres: Arc::new(postgres),
        })
    }

    pub fn pool(&self) -> deadpool_postgres::Pool {
        self.postgres.pool.clone()
    }
}
