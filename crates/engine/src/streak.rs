use chrono::{Days, NaiveDate};
use common::Month;
use ledger::UserRecord;
use serde::Serialize;

/// A maximal run of exactly-consecutive calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreakSpan {
    pub length: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyStreak {
    pub user_handle: String,
    pub span: StreakSpan,
}

/// Instruction for the store to ratchet a user's all-time best streak.
/// The calculator stays read-only; the caller applies these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreakUpdate {
    pub user_handle: String,
    pub best: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreakReport {
    pub streaks: Vec<MonthlyStreak>,
    pub updates: Vec<StreakUpdate>,
}

/// Finds the longest run of consecutive days in an ascending date sequence.
/// The earliest run wins a length tie. Any gap of two or more calendar days
/// breaks a run.
pub fn longest_run<I>(dates: I) -> Option<StreakSpan>
where
    I: IntoIterator<Item = NaiveDate>,
{
    let mut dates = dates.into_iter();
    let first = dates.next()?;

    let mut best = StreakSpan {
        length: 1,
        start: first,
        end: first,
    };
    let mut run_start = first;
    let mut prev = first;

    for date in dates {
        if prev.checked_add_days(Days::new(1)) == Some(date) {
            prev = date;
        } else {
            run_start = date;
            prev = date;
        }
        let length = (prev - run_start).num_days() as u32 + 1;
        if length > best.length {
            best = StreakSpan {
                length,
                start: run_start,
                end: prev,
            };
        }
    }

    Some(best)
}

/// Computes each user's longest qualified run within `month` from the
/// qualified-date set on the user record. Runs never span the month
/// boundary: the date set is restricted to the month before scanning.
/// Sorted by streak length descending, then all-time qualified total
/// descending, then handle ascending.
pub fn monthly_streaks(users: &[UserRecord], month: Month) -> StreakReport {
    let mut streaks = Vec::new();
    let mut updates = Vec::new();

    for user in users {
        let month_dates = user
            .qualified_daily_contribution_dates
            .iter()
            .copied()
            .filter(|date| month.contains(*date));
        let Some(span) = longest_run(month_dates) else {
            continue;
        };

        if i64::from(span.length) > user.qualified_daily_contribution_streak {
            updates.push(StreakUpdate {
                user_handle: user.user_handle.clone(),
                best: i64::from(span.length),
            });
        }
        streaks.push((
            span,
            user.total_qualified_daily_contribution_number,
            user.user_handle.clone(),
        ));
    }

    streaks.sort_by(|a, b| {
        b.0.length
            .cmp(&a.0.length)
            .then_with(|| b.1.cmp(&a.1))
            .then_with(|| a.2.cmp(&b.2))
    });

    StreakReport {
        streaks: streaks
            .into_iter()
            .map(|(span, _, user_handle)| MonthlyStreak { user_handle, span })
            .collect(),
        updates,
    }
}
