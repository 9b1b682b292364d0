use std::collections::BTreeMap;

use chrono::NaiveDate;
use common::Month;
use ledger::AiDecision;

/// Per-day decision tally. A day counts as qualified when at least one of
/// its decisions was judged qualified; the raw split is kept for
/// diagnostics and the per-user monthly CSV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayTally {
    pub non_qualified: u32,
    pub qualified: u32,
}

impl DayTally {
    pub fn is_qualified(&self) -> bool {
        self.qualified > 0
    }
}

/// Groups decisions by date. Days with no decisions are simply absent from
/// the map, never reported as non-qualified.
pub fn daily_tallies(decisions: &[AiDecision]) -> BTreeMap<NaiveDate, DayTally> {
    let mut tallies: BTreeMap<NaiveDate, DayTally> = BTreeMap::new();
    for decision in decisions {
        let tally = tallies.entry(decision.date).or_default();
        if decision.response.is_qualified {
            tally.qualified += 1;
        } else {
            tally.non_qualified += 1;
        }
    }
    tallies
}

/// As `daily_tallies`, restricted to the days of one calendar month.
pub fn monthly_tallies(decisions: &[AiDecision], month: Month) -> BTreeMap<NaiveDate, DayTally> {
    let mut tallies: BTreeMap<NaiveDate, DayTally> = BTreeMap::new();
    for decision in decisions {
        if !month.contains(decision.date) {
            continue;
        }
        let tally = tallies.entry(decision.date).or_default();
        if decision.response.is_qualified {
            tally.qualified += 1;
        } else {
            tally.non_qualified += 1;
        }
    }
    tallies
}

pub fn qualified_days(tallies: &BTreeMap<NaiveDate, DayTally>) -> u32 {
    tallies.values().filter(|tally| tally.is_qualified()).count() as u32
}
