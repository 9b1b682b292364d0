use std::collections::BTreeMap;

use chrono::NaiveDate;
use engine::DayTally;
use ledger::{AiDecision, UserRecord};

const USER_COLUMNS: [&str; 8] = [
    "User Handle",
    "Github Name",
    "Repositories",
    "Total Daily Contribution Number",
    "Total Qualified Daily Contribution Number",
    "Qualified Daily Contribution Number by Month",
    "Qualified Daily Contribution Dates",
    "Best Streak",
];

const DECISION_COLUMNS: [&str; 5] = [
    "username",
    "repository",
    "date",
    "is_qualified",
    "explanation",
];

fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn line(cells: &[String]) -> String {
    cells
        .iter()
        .map(|cell| escape(cell))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn render_csv(header: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    out.push_str(&line(header));
    out.push('\n');
    for row in rows {
        out.push_str(&line(row));
        out.push('\n');
    }
    out
}

/// One row per user, all counter fields included, sheet column order.
pub fn users_csv(users: &[UserRecord]) -> String {
    let header: Vec<String> = USER_COLUMNS.iter().map(|c| c.to_string()).collect();
    let rows: Vec<Vec<String>> = users
        .iter()
        .map(|user| {
            let by_month = serde_json::to_string(
                &user.qualified_daily_contribution_number_by_month,
            )
            .unwrap_or_default();
            let dates = user
                .qualified_daily_contribution_dates
                .iter()
                .map(|date| date.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            vec![
                user.user_handle.clone(),
                user.github_name.clone().unwrap_or_default(),
                user.repositories.join(", "),
                user.total_daily_contribution_number.to_string(),
                user.total_qualified_daily_contribution_number.to_string(),
                by_month,
                dates,
                user.qualified_daily_contribution_streak.to_string(),
            ]
        })
        .collect();
    render_csv(&header, &rows)
}

/// One user's month, one row per judged day with a running qualified count.
pub fn user_month_csv(username: &str, tallies: &BTreeMap<NaiveDate, DayTally>) -> String {
    let header: Vec<String> = ["username", "date", "is_qualified", "total_qualified_so_far"]
        .iter()
        .map(|c| c.to_string())
        .collect();

    let mut total_qualified = 0u32;
    let rows: Vec<Vec<String>> = tallies
        .iter()
        .map(|(date, tally)| {
            let qualified = tally.is_qualified();
            if qualified {
                total_qualified += 1;
            }
            vec![
                username.to_string(),
                date.to_string(),
                qualified.to_string(),
                total_qualified.to_string(),
            ]
        })
        .collect();
    render_csv(&header, &rows)
}

/// Raw decisions flattened together with their embedded response fields.
pub fn decisions_csv(decisions: &[AiDecision]) -> String {
    let header: Vec<String> = DECISION_COLUMNS.iter().map(|c| c.to_string()).collect();
    let rows: Vec<Vec<String>> = decisions
        .iter()
        .map(|decision| {
            vec![
                decision.username.clone(),
                decision.repository.clone(),
                decision.date.to_string(),
                decision.response.is_qualified.to_string(),
                decision.response.explanation.clone(),
            ]
        })
        .collect();
    render_csv(&header, &rows)
}
