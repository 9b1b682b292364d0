use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Utc};

/// A calendar month, the scope for leaderboards and streak queries.
///
/// Parses from the wire format `"YYYY-MM"`; anything else is rejected at
/// the caller boundary before it can reach the store or the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid month '{0}', expected YYYY-MM")]
pub struct InvalidMonth(pub String);

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

impl Month {
    pub fn new(year: i32, month: u32) -> Result<Self, InvalidMonth> {
        if !(1..=12).contains(&month) || !(0..=9999).contains(&year) {
            return Err(InvalidMonth(format!("{year}-{month}")));
        }
        Ok(Self { year, month })
    }

    /// The current calendar month, the default when a command omits a date.
    pub fn current() -> Self {
        let today = Utc::now().date_naive();
        Self {
            year: today.year(),
            month: today.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("validated on construction")
    }

    pub fn last_day(&self) -> NaiveDate {
        let (next_year, next_month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .expect("validated on construction")
            .pred_opt()
            .expect("month has at least one day")
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// The `"YYYY-MM"` key used by the per-month counter map.
    pub fn key(&self) -> String {
        self.to_string()
    }

    pub fn name(&self) -> &'static str {
        MONTH_NAMES[(self.month - 1) as usize]
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = InvalidMonth;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let err = || InvalidMonth(input.to_string());
        let (year, month) = input.split_once('-').ok_or_else(err)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(err());
        }
        let year: i32 = year.parse().map_err(|_| err())?;
        let month: u32 = month.parse().map_err(|_| err())?;
        Self::new(year, month).map_err(|_| err())
    }
}
