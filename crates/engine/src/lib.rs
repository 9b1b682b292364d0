pub mod aggregate;
pub mod leaderboard;
pub mod projection;
pub mod streak;

pub use aggregate::{daily_tallies, monthly_tallies, qualified_days, DayTally};
pub use leaderboard::{build as build_leaderboard, Leaderboard, DEFAULT_MIN_CONTRIBUTIONS};
pub use projection::project_counters;
pub use streak::{longest_run, monthly_streaks, MonthlyStreak, StreakReport, StreakSpan, StreakUpdate};
