use chrono::NaiveDate;
use engine::{MonthlyStreak, StreakReport};
use ledger::{AiDecision, DailyContributionResponse};
use serde::{Deserialize, Serialize};

/// Classifier verdict as it arrives on the wire; the handle in the URL
/// names the user, so the payload carries only the per-decision fields.
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionPayload {
    pub repository: String,
    pub date: NaiveDate,
    pub is_qualified: bool,
    #[serde(default)]
    pub explanation: String,
}

impl DecisionPayload {
    pub fn into_decision(self, handle: &str) -> AiDecision {
        AiDecision {
            username: handle.to_string(),
            repository: self.repository,
            date: self.date,
            response: DailyContributionResponse {
                username: handle.to_string(),
                date: self.date,
                is_qualified: self.is_qualified,
                explanation: self.explanation,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DecisionDto {
    pub repository: String,
    pub date: NaiveDate,
    pub is_qualified: bool,
    pub explanation: String,
}

impl From<AiDecision> for DecisionDto {
    fn from(decision: AiDecision) -> Self {
        Self {
            repository: decision.repository,
            date: decision.date,
            is_qualified: decision.response.is_qualified,
            explanation: decision.response.explanation,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StreakDto {
    pub rank: usize,
    pub user_handle: String,
    pub length: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct StreakReportDto {
    pub month: String,
    pub streaks: Vec<StreakDto>,
    /// Handles whose all-time best streak was raised by this report.
    pub updated: Vec<String>,
}

impl StreakReportDto {
    pub fn from_report(month: String, report: StreakReport) -> Self {
        let streaks = report
            .streaks
            .into_iter()
            .enumerate()
            .map(|(index, streak)| streak_dto(index + 1, streak))
            .collect();
        let updated = report
            .updates
            .into_iter()
            .map(|update| update.user_handle)
            .collect();
        Self {
            month,
            streaks,
            updated,
        }
    }
}

fn streak_dto(rank: usize, streak: MonthlyStreak) -> StreakDto {
    StreakDto {
        rank,
        user_handle: streak.user_handle,
        length: streak.span.length,
        start: streak.span.start,
        end: streak.span.end,
    }
}

#[derive(Debug, Serialize)]
pub struct JobDto {
    pub name: String,
    pub state: &'static str,
}
