use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tokio::time::{sleep, Duration};
use tracing::{instrument, warn};

use crate::errors::{LedgerError, Result};
use crate::models::{
    AiDecision, ContributionCounters, DailyContributionResponse, UserPatch, UserRecord,
};
use crate::store::{DecisionStore, Ledger, UserStore};

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(LedgerError::Migration)
}

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
    user_store: Arc<PgUserStore>,
    decision_store: Arc<PgDecisionStore>,
}

impl PgLedger {
    pub async fn connect(database_url: &str) -> Result<Self> {
        const MAX_ATTEMPTS: u32 = 5;
        const BASE_DELAY_MS: u64 = 500;

        let mut attempts = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
            {
                Ok(pool) => {
                    run_migrations(&pool).await?;
                    return Ok(Self::from_pool(pool));
                }
                Err(err) => {
                    attempts += 1;
                    if attempts >= MAX_ATTEMPTS {
                        return Err(LedgerError::Unavailable(err));
                    }

                    let exp = (attempts - 1).min(5);
                    let backoff = Duration::from_millis(BASE_DELAY_MS * (1u64 << exp));
                    warn!(
                        attempts,
                        error = %err,
                        wait_ms = backoff.as_millis(),
                        "database connection failed; retrying"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        let user_store = Arc::new(PgUserStore { pool: pool.clone() });
        let decision_store = Arc::new(PgDecisionStore { pool: pool.clone() });

        Self {
            pool,
            user_store,
            decision_store,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Ledger for PgLedger {
    fn users(&self) -> &dyn UserStore {
        &*self.user_store
    }

    fn decisions(&self) -> &dyn DecisionStore {
        &*self.decision_store
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    user_handle: String,
    github_name: Option<String>,
    repositories: Json<Vec<String>>,
    total_daily_contribution_number: i64,
    total_qualified_daily_contribution_number: i64,
    qualified_daily_contribution_number_by_month: Json<BTreeMap<String, i64>>,
    qualified_daily_contribution_dates: Json<BTreeSet<NaiveDate>>,
    qualified_daily_contribution_streak: i64,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            user_handle: row.user_handle,
            github_name: row.github_name,
            repositories: row.repositories.0,
            total_daily_contribution_number: row.total_daily_contribution_number,
            total_qualified_daily_contribution_number: row
                .total_qualified_daily_contribution_number,
            qualified_daily_contribution_number_by_month: row
                .qualified_daily_contribution_number_by_month
                .0,
            qualified_daily_contribution_dates: row.qualified_daily_contribution_dates.0,
            qualified_daily_contribution_streak: row.qualified_daily_contribution_streak,
        }
    }
}

const USER_COLUMNS: &str = r#"
    user_handle, github_name, repositories,
    total_daily_contribution_number, total_qualified_daily_contribution_number,
    qualified_daily_contribution_number_by_month, qualified_daily_contribution_dates,
    qualified_daily_contribution_streak
"#;

fn map_insert_error(err: sqlx::Error, handle: &str) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return LedgerError::DuplicateHandle(handle.to_string());
        }
    }
    LedgerError::Query(err)
}

#[derive(Clone)]
struct PgUserStore {
    pool: PgPool,
}

#[async_trait]
impl UserStore for PgUserStore {
    #[instrument(skip(self, user), fields(handle = %user.user_handle))]
    async fn create_user(&self, user: UserRecord) -> Result<String> {
        user.validate()?;

        sqlx::query(
            r#"
            INSERT INTO users (
                user_handle, github_name, repositories,
                total_daily_contribution_number, total_qualified_daily_contribution_number,
                qualified_daily_contribution_number_by_month, qualified_daily_contribution_dates,
                qualified_daily_contribution_streak
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&user.user_handle)
        .bind(&user.github_name)
        .bind(Json(&user.repositories))
        .bind(user.total_daily_contribution_number)
        .bind(user.total_qualified_daily_contribution_number)
        .bind(Json(&user.qualified_daily_contribution_number_by_month))
        .bind(Json(&user.qualified_daily_contribution_dates))
        .bind(user.qualified_daily_contribution_streak)
        .execute(&self.pool)
        .await
        .map(|_| user.user_handle.clone())
        .map_err(|err| map_insert_error(err, &user.user_handle))
    }

    async fn get_user(&self, handle: &str) -> Result<Option<UserRecord>> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_handle = $1"
        ))
        .bind(handle)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(UserRecord::from))
        .map_err(LedgerError::Query)
    }

    #[instrument(skip(self, user), fields(handle = %handle))]
    async fn update_user(&self, handle: &str, user: UserRecord) -> Result<bool> {
        user.validate()?;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET user_handle = $2,
                github_name = $3,
                repositories = $4,
                total_daily_contribution_number = $5,
                total_qualified_daily_contribution_number = $6,
                qualified_daily_contribution_number_by_month = $7,
                qualified_daily_contribution_dates = $8,
                qualified_daily_contribution_streak = $9,
                updated_at = now()
            WHERE user_handle = $1
            "#,
        )
        .bind(handle)
        .bind(&user.user_handle)
        .bind(&user.github_name)
        .bind(Json(&user.repositories))
        .bind(user.total_daily_contribution_number)
        .bind(user.total_qualified_daily_contribution_number)
        .bind(Json(&user.qualified_daily_contribution_number_by_month))
        .bind(Json(&user.qualified_daily_contribution_dates))
        .bind(user.qualified_daily_contribution_streak)
        .execute(&self.pool)
        .await
        .map_err(|err| map_insert_error(err, &user.user_handle))?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_field(&self, handle: &str, patch: UserPatch) -> Result<bool> {
        patch.validate()?;

        let result = match patch {
            UserPatch::RenameHandle(new_handle) => {
                sqlx::query("UPDATE users SET user_handle = $2, updated_at = now() WHERE user_handle = $1")
                    .bind(handle)
                    .bind(&new_handle)
                    .execute(&self.pool)
                    .await
                    .map_err(|err| map_insert_error(err, &new_handle))?
            }
            UserPatch::SetGithubName(github_name) => {
                sqlx::query("UPDATE users SET github_name = $2, updated_at = now() WHERE user_handle = $1")
                    .bind(handle)
                    .bind(github_name)
                    .execute(&self.pool)
                    .await
                    .map_err(LedgerError::Query)?
            }
            UserPatch::SetRepositories(repositories) => {
                sqlx::query("UPDATE users SET repositories = $2, updated_at = now() WHERE user_handle = $1")
                    .bind(handle)
                    .bind(Json(repositories))
                    .execute(&self.pool)
                    .await
                    .map_err(LedgerError::Query)?
            }
            UserPatch::SetTotalContributions(total) => {
                sqlx::query("UPDATE users SET total_daily_contribution_number = $2, updated_at = now() WHERE user_handle = $1")
                    .bind(handle)
                    .bind(total)
                    .execute(&self.pool)
                    .await
                    .map_err(LedgerError::Query)?
            }
            UserPatch::SetTotalQualified(total) => {
                sqlx::query("UPDATE users SET total_qualified_daily_contribution_number = $2, updated_at = now() WHERE user_handle = $1")
                    .bind(handle)
                    .bind(total)
                    .execute(&self.pool)
                    .await
                    .map_err(LedgerError::Query)?
            }
            UserPatch::SetMonthlyQualified(by_month) => {
                sqlx::query("UPDATE users SET qualified_daily_contribution_number_by_month = $2, updated_at = now() WHERE user_handle = $1")
                    .bind(handle)
                    .bind(Json(by_month))
                    .execute(&self.pool)
                    .await
                    .map_err(LedgerError::Query)?
            }
            UserPatch::SetQualifiedDates(dates) => {
                sqlx::query("UPDATE users SET qualified_daily_contribution_dates = $2, updated_at = now() WHERE user_handle = $1")
                    .bind(handle)
                    .bind(Json(dates))
                    .execute(&self.pool)
                    .await
                    .map_err(LedgerError::Query)?
            }
            UserPatch::SetBestStreak(best) => {
                sqlx::query("UPDATE users SET qualified_daily_contribution_streak = $2, updated_at = now() WHERE user_handle = $1")
                    .bind(handle)
                    .bind(best)
                    .execute(&self.pool)
                    .await
                    .map_err(LedgerError::Query)?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    async fn update_counters(
        &self,
        handle: &str,
        counters: ContributionCounters,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET total_daily_contribution_number = $2,
                total_qualified_daily_contribution_number = $3,
                qualified_daily_contribution_number_by_month = $4,
                qualified_daily_contribution_dates = $5,
                qualified_daily_contribution_streak = $6,
                updated_at = now()
            WHERE user_handle = $1
            "#,
        )
        .bind(handle)
        .bind(counters.total_daily_contribution_number)
        .bind(counters.total_qualified_daily_contribution_number)
        .bind(Json(&counters.qualified_daily_contribution_number_by_month))
        .bind(Json(&counters.qualified_daily_contribution_dates))
        .bind(counters.qualified_daily_contribution_streak)
        .execute(&self.pool)
        .await
        .map_err(LedgerError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_user(&self, handle: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE user_handle = $1")
            .bind(handle)
            .execute(&self.pool)
            .await
            .map_err(LedgerError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY user_handle"
        ))
        .fetch_all(&self.pool)
        .await
        .map(|rows| rows.into_iter().map(UserRecord::from).collect())
        .map_err(LedgerError::Query)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DecisionRow {
    username: String,
    repository: String,
    decision_date: NaiveDate,
    is_qualified: bool,
    explanation: String,
}

impl From<DecisionRow> for AiDecision {
    fn from(row: DecisionRow) -> Self {
        Self {
            response: DailyContributionResponse {
                username: row.username.clone(),
                date: row.decision_date,
                is_qualified: row.is_qualified,
                explanation: row.explanation,
            },
            username: row.username,
            repository: row.repository,
            date: row.decision_date,
        }
    }
}

const DECISION_COLUMNS: &str =
    "username, repository, decision_date, is_qualified, explanation";

#[derive(Clone)]
struct PgDecisionStore {
    pool: PgPool,
}

#[async_trait]
impl DecisionStore for PgDecisionStore {
    #[instrument(skip(self, decisions), fields(handle = %handle, count = decisions.len()))]
    async fn add_decisions(
        &self,
        handle: &str,
        decisions: Vec<AiDecision>,
    ) -> Result<UserRecord> {
        let mut tx = self.pool.begin().await.map_err(LedgerError::Query)?;

        let exists: Option<(String,)> =
            sqlx::query_as("SELECT user_handle FROM users WHERE user_handle = $1")
                .bind(handle)
                .fetch_optional(&mut *tx)
                .await
                .map_err(LedgerError::Query)?;
        if exists.is_none() {
            return Err(LedgerError::UnknownUser(handle.to_string()));
        }

        for decision in &decisions {
            sqlx::query(
                r#"
                INSERT INTO ai_decisions (username, repository, decision_date, is_qualified, explanation)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(handle)
            .bind(&decision.repository)
            .bind(decision.date)
            .bind(decision.response.is_qualified)
            .bind(&decision.response.explanation)
            .execute(&mut *tx)
            .await
            .map_err(LedgerError::Query)?;
        }

        tx.commit().await.map_err(LedgerError::Query)?;

        let user = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_handle = $1"
        ))
        .bind(handle)
        .fetch_optional(&self.pool)
        .await
        .map_err(LedgerError::Query)?;

        user.map(UserRecord::from)
            .ok_or_else(|| LedgerError::UnknownUser(handle.to_string()))
    }

    async fn decisions_for_user(&self, handle: &str) -> Result<Vec<AiDecision>> {
        sqlx::query_as::<_, DecisionRow>(&format!(
            r#"
            SELECT {DECISION_COLUMNS}
            FROM ai_decisions
            WHERE username = $1
            ORDER BY decision_date, repository
            "#
        ))
        .bind(handle)
        .fetch_all(&self.pool)
        .await
        .map(|rows| rows.into_iter().map(AiDecision::from).collect())
        .map_err(LedgerError::Query)
    }

    async fn decisions_for_user_between(
        &self,
        handle: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<AiDecision>> {
        sqlx::query_as::<_, DecisionRow>(&format!(
            r#"
            SELECT {DECISION_COLUMNS}
            FROM ai_decisions
            WHERE username = $1 AND decision_date BETWEEN $2 AND $3
            ORDER BY decision_date, repository
            "#
        ))
        .bind(handle)
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map(|rows| rows.into_iter().map(AiDecision::from).collect())
        .map_err(LedgerError::Query)
    }
}
