use common::Month;
use ledger::UserRecord;
use serde::Serialize;
use tracing::debug;

/// Users below this many qualified days in a month are left off the table
/// unless the caller passes its own filter.
pub const DEFAULT_MIN_CONTRIBUTIONS: i64 = 10;

/// Column names shared with the spreadsheet and CSV consumers; the header
/// travels with the table so no caller re-derives column semantics.
pub const COLUMNS: [&str; 9] = [
    "Rank",
    "User Handle",
    "Github Name",
    "Repositories",
    "Total Daily Contribution Number",
    "Total Qualified Daily Contribution Number",
    "Qualified Days This Month",
    "Qualified Daily Contribution Dates",
    "Best Streak",
];

/// Header row plus ranked data rows, all cells stringly typed for the
/// export adapters. An empty month still carries the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leaderboard {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Leaderboard {
    /// The sheet form: header first, then the data rows.
    pub fn into_table(self) -> Vec<Vec<String>> {
        let mut table = Vec::with_capacity(self.rows.len() + 1);
        table.push(self.header);
        table.extend(self.rows);
        table
    }
}

/// Ranks users by qualified days in `month`. Ordering is fully
/// deterministic: monthly count descending, all-time qualified total
/// descending, then handle ascending.
pub fn build(users: &[UserRecord], month: Month, min_contributions: i64) -> Leaderboard {
    let key = month.key();

    let mut ranked: Vec<(&UserRecord, i64)> = users
        .iter()
        .map(|user| {
            let monthly = user
                .qualified_daily_contribution_number_by_month
                .get(&key)
                .copied()
                .unwrap_or(0);
            (user, monthly)
        })
        .filter(|(_, monthly)| *monthly >= min_contributions)
        .collect();

    ranked.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| {
                b.0.total_qualified_daily_contribution_number
                    .cmp(&a.0.total_qualified_daily_contribution_number)
            })
            .then_with(|| a.0.user_handle.cmp(&b.0.user_handle))
    });

    debug!(
        month = %month,
        candidates = users.len(),
        ranked = ranked.len(),
        min_contributions,
        "built leaderboard"
    );

    let rows = ranked
        .into_iter()
        .enumerate()
        .map(|(index, (user, monthly))| {
            let dates = user
                .qualified_daily_contribution_dates
                .iter()
                .map(|date| date.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            vec![
                (index + 1).to_string(),
                user.user_handle.clone(),
                user.github_name.clone().unwrap_or_default(),
                user.repositories.join(", "),
                user.total_daily_contribution_number.to_string(),
                user.total_qualified_daily_contribution_number.to_string(),
                monthly.to_string(),
                dates,
                user.qualified_daily_contribution_streak.to_string(),
            ]
        })
        .collect();

    Leaderboard {
        header: COLUMNS.iter().map(|column| column.to_string()).collect(),
        rows,
    }
}
