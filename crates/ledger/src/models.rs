use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::{LedgerError, Result};

/// A tracked community member and the counters derived from their decision
/// history. The counter fields are eventually-consistent projections; the
/// decision log is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_handle: String,
    #[serde(default)]
    pub github_name: Option<String>,
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub total_daily_contribution_number: i64,
    #[serde(default)]
    pub total_qualified_daily_contribution_number: i64,
    #[serde(default)]
    pub qualified_daily_contribution_number_by_month: BTreeMap<String, i64>,
    #[serde(default)]
    pub qualified_daily_contribution_dates: BTreeSet<NaiveDate>,
    #[serde(default)]
    pub qualified_daily_contribution_streak: i64,
}

impl UserRecord {
    pub fn new(
        user_handle: impl Into<String>,
        github_name: Option<String>,
        repositories: Vec<String>,
    ) -> Self {
        Self {
            user_handle: user_handle.into(),
            github_name,
            repositories,
            total_daily_contribution_number: 0,
            total_qualified_daily_contribution_number: 0,
            qualified_daily_contribution_number_by_month: BTreeMap::new(),
            qualified_daily_contribution_dates: BTreeSet::new(),
            qualified_daily_contribution_streak: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_handle(&self.user_handle)
    }

    /// Builds a record from an incoming JSON document, enforcing the shape
    /// checks the typed fields alone cannot express. A string where the
    /// repository list belongs is the classic malformed-import case.
    pub fn from_document(doc: serde_json::Value) -> Result<Self> {
        if let Some(repositories) = doc.get("repositories") {
            if !repositories.is_array() {
                return Err(LedgerError::validation(
                    "repositories must be a list, not a scalar",
                ));
            }
        }
        let user: Self = serde_json::from_value(doc)
            .map_err(|err| LedgerError::Validation(err.to_string()))?;
        user.validate()?;
        Ok(user)
    }
}

pub fn validate_handle(handle: &str) -> Result<()> {
    if handle.trim().is_empty() {
        return Err(LedgerError::validation("user handle must not be empty"));
    }
    Ok(())
}

/// The classifier's verdict for one user-day, embedded in each decision so
/// the record stays self-contained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyContributionResponse {
    pub username: String,
    pub date: NaiveDate,
    pub is_qualified: bool,
    pub explanation: String,
}

/// One judged (user, repository, day) unit. Append-only: decisions are
/// accumulated as classifier output arrives and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiDecision {
    pub username: String,
    pub repository: String,
    pub date: NaiveDate,
    pub response: DailyContributionResponse,
}

/// Single-field update, one variant per mutable field. A closed set keeps
/// the patch path compile-time checked instead of matching on field-name
/// strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum UserPatch {
    RenameHandle(String),
    SetGithubName(Option<String>),
    SetRepositories(Vec<String>),
    SetTotalContributions(i64),
    SetTotalQualified(i64),
    SetMonthlyQualified(BTreeMap<String, i64>),
    SetQualifiedDates(BTreeSet<NaiveDate>),
    SetBestStreak(i64),
}

impl UserPatch {
    pub fn validate(&self) -> Result<()> {
        match self {
            UserPatch::RenameHandle(handle) => validate_handle(handle),
            _ => Ok(()),
        }
    }
}

/// Recomputed counter fields, written back after a decision append. Produced
/// by the engine's projection; the store only persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionCounters {
    pub total_daily_contribution_number: i64,
    pub total_qualified_daily_contribution_number: i64,
    pub qualified_daily_contribution_number_by_month: BTreeMap<String, i64>,
    pub qualified_daily_contribution_dates: BTreeSet<NaiveDate>,
    pub qualified_daily_contribution_streak: i64,
}
