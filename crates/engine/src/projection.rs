use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use ledger::{AiDecision, ContributionCounters};

use crate::aggregate::daily_tallies;
use crate::streak::longest_run;

fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Recomputes every derived counter on the user record from the full
/// decision history. Counters are not a source of truth; after an append
/// the caller persists this snapshot, and a lost write is repaired by the
/// next projection. The best streak only ever ratchets upward.
pub fn project_counters(decisions: &[AiDecision], prior_best_streak: i64) -> ContributionCounters {
    let tallies = daily_tallies(decisions);

    let qualified_dates: BTreeSet<NaiveDate> = tallies
        .iter()
        .filter(|(_, tally)| tally.is_qualified())
        .map(|(date, _)| *date)
        .collect();

    let mut by_month: BTreeMap<String, i64> = BTreeMap::new();
    for date in &qualified_dates {
        *by_month.entry(month_key(*date)).or_insert(0) += 1;
    }

    let best_run = longest_run(qualified_dates.iter().copied())
        .map(|span| i64::from(span.length))
        .unwrap_or(0);

    ContributionCounters {
        total_daily_contribution_number: tallies.len() as i64,
        total_qualified_daily_contribution_number: qualified_dates.len() as i64,
        qualified_daily_contribution_number_by_month: by_month,
        qualified_daily_contribution_streak: best_run.max(prior_best_streak),
        qualified_daily_contribution_dates: qualified_dates,
    }
}
