use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::Result;
use crate::models::{AiDecision, ContributionCounters, UserPatch, UserRecord};

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Persists a new user. Validation runs before any write; a duplicate
    /// handle fails with `DuplicateHandle` and leaves the first record
    /// untouched. Returns the persisted handle.
    async fn create_user(&self, user: UserRecord) -> Result<String>;

    /// Absence is an expected case and comes back as `None`, never an error.
    async fn get_user(&self, handle: &str) -> Result<Option<UserRecord>>;

    /// Replaces all mutable fields (a handle rename included). Not an
    /// upsert: returns `false` when `handle` does not exist.
    async fn update_user(&self, handle: &str, user: UserRecord) -> Result<bool>;

    /// Patches exactly one field, leaving the rest untouched. Returns
    /// `false` when `handle` does not exist.
    async fn update_field(&self, handle: &str, patch: UserPatch) -> Result<bool>;

    /// Writes the recomputed counter projection in one statement.
    async fn update_counters(&self, handle: &str, counters: ContributionCounters)
        -> Result<bool>;

    /// Returns `true` iff a record was removed. Decisions are not
    /// cascade-deleted; see DESIGN.md on orphaned decisions.
    async fn delete_user(&self, handle: &str) -> Result<bool>;

    async fn list_users(&self) -> Result<Vec<UserRecord>>;
}

#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Appends classifier decisions for an existing user and returns the
    /// user projection after the append. Fails with `UnknownUser` when the
    /// handle does not exist.
    async fn add_decisions(&self, handle: &str, decisions: Vec<AiDecision>)
        -> Result<UserRecord>;

    async fn decisions_for_user(&self, handle: &str) -> Result<Vec<AiDecision>>;

    /// Decisions whose date falls in `[since, until]`, inclusive on both
    /// ends at day granularity.
    async fn decisions_for_user_between(
        &self,
        handle: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<AiDecision>>;
}

pub trait Ledger: Send + Sync {
    fn users(&self) -> &dyn UserStore;
    fn decisions(&self) -> &dyn DecisionStore;
}
