use std::time::Duration;

use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::{info, warn};
use tokio_postgres::NoTls;

use crate::config::PostgresSettings;

const SCHEMA_PATH: &str = "schema/postgres.sql";
const CONNECT_ATTEMPTS: u32 = 3;

/// Split a SQL script on `;`, leaving `$$ ... $$` bodies intact.
fn split_sql_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut in_dollar_quote = false;
    let mut start = 0;
    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'$') => {
                in_dollar_quote = !in_dollar_quote;
                i += 2;
                continue;
            },
            b';' if !in_dollar_quote => {
                statements.push(&sql[start..i]);
                start = i + 1;
            },
            _ => {},
        }
        i += 1;
    }
    statements.push(&sql[start..]);

    statements.retain(|stmt| !stmt.trim().is_empty());
    statements
}

/// Pooled PostgreSQL access shared by every SQL source.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
}

impl PostgresClient {
    /// Build the pool and wait for a first connection, with exponential backoff.
    pub async fn new(settings: PostgresSettings) -> anyhow::Result<Self> {
        info!(
            "Connecting to PostgreSQL at {}:{}/{}",
            settings.host, settings.port, settings.database
        );

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .password(&settings.password)
            .dbname(&settings.database)
            .application_name("swapstats");

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(settings.pool_size)
            .build()
            .context("Failed to create PostgreSQL connection pool")?;

        let mut attempt = 1;
        loop {
            match pool.get().await {
                Ok(_conn) => {
                    info!("Connected to PostgreSQL (pool size {})", settings.pool_size);
                    return Ok(Self { pool });
                },
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    let delay = Duration::from_millis(100 * 2_u64.pow(attempt));
                    warn!(
                        "Failed to connect to PostgreSQL (attempt {}/{}): {}, retrying in {:?}",
                        attempt, CONNECT_ATTEMPTS, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => {
                    return Err(anyhow::anyhow!(
                        "Failed to connect to PostgreSQL after {} attempts: {}",
                        CONNECT_ATTEMPTS,
                        e
                    ));
                },
            }
        }
    }

    /// Verify a pooled connection can still run a query.
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .context("PostgreSQL health check failed")?;
        Ok(())
    }

    /// Apply `schema/postgres.sql`. Every statement is idempotent.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Applying {}", SCHEMA_PATH);
        let client = self.pool.get().await?;

        let schema = tokio::fs::read_to_string(SCHEMA_PATH)
            .await
            .with_context(|| format!("Failed to read {}", SCHEMA_PATH))?;

        let statements = split_sql_statements(&schema);
        for stmt in &statements {
            let stmt = stmt.trim();
            client
                .batch_execute(stmt)
                .await
                .with_context(|| format!("Failed to execute migration statement: {}", stmt))?;
        }

        info!("PostgreSQL schema applied ({} statements)", statements.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_sql_statements() {
        let sql = "CREATE TABLE a (id INT);\n\nCREATE INDEX a_idx ON a (id);\n";
        let statements: Vec<&str> = split_sql_statements(sql).into_iter().map(str::trim).collect();
        assert_eq!(statements, vec!["CREATE TABLE a (id INT)", "CREATE INDEX a_idx ON a (id)"]);
    }

    #[test]
    fn test_split_sql_statements_keeps_dollar_quoted_bodies() {
        let sql = "CREATE FUNCTION f() RETURNS int AS $$ BEGIN RETURN 1; END; $$ LANGUAGE plpgsql; SELECT 1";
        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("RETURN 1; END;"));
        assert_eq!(statements[1].trim(), "SELECT 1");
    }

    #[test]
    fn test_schema_file_declares_both_sources() {
        let schema = include_str!("../../../schema/postgres.sql");
        let statements = split_sql_statements(schema);
        assert!(statements.iter().any(|s| s.contains("CREATE TABLE IF NOT EXISTS swaps")));
        assert!(statements
            .iter()
            .any(|s| s.contains("CREATE TABLE IF NOT EXISTS dex_aggregator_revenue")));
    }
}
