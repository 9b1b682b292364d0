use std::env;

use anyhow::{Context, Result};
use ledger::pg::run_migrations;
use sqlx::{Executor, PgPool};
use uuid::Uuid;

/// Provisions one throwaway database per test so integration tests never
/// share state. Construction fails (and tests skip with a notice) when
/// neither `TEST_ADMIN_URL` nor `DATABASE_URL` is configured.
pub struct DbFixture {
    admin_url: String,
}

impl DbFixture {
    pub fn from_env() -> Result<Self> {
        let admin_url = env::var("TEST_ADMIN_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .context("TEST_ADMIN_URL or DATABASE_URL must be set for tests")?;
        Ok(Self { admin_url })
    }

    /// Creates a uuid-suffixed database, runs the migrations, and hands
    /// back a handle that can drop it again.
    pub async fn create(&self, prefix: &str) -> Result<DatabaseHandle> {
        let name = format!("{}_{}", prefix, Uuid::new_v4().simple());
        let admin = PgPool::connect(&self.admin_url).await?;
        admin
            .execute(format!("CREATE DATABASE \"{name}\"").as_str())
            .await
            .with_context(|| format!("creating test database {name}"))?;

        let url = format!("{}/{}", self.admin_url, name);
        let pool = PgPool::connect(&url).await?;
        run_migrations(&pool).await?;

        Ok(DatabaseHandle {
            pool,
            url,
            name,
            admin_url: self.admin_url.clone(),
        })
    }
}

pub struct DatabaseHandle {
    pool: PgPool,
    url: String,
    name: String,
    admin_url: String,
}

impl DatabaseHandle {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.url
    }

    /// Terminates lingering connections and drops the database.
    pub async fn cleanup(self) -> Result<()> {
        let DatabaseHandle {
            pool,
            name,
            admin_url,
            ..
        } = self;
        drop(pool);

        let admin = PgPool::connect(&admin_url).await?;
        admin
            .execute(
                format!(
                    "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = '{name}'"
                )
                .as_str(),
            )
            .await?;
        admin
            .execute(format!("DROP DATABASE IF EXISTS \"{name}\"").as_str())
            .await?;
        Ok(())
    }
}
