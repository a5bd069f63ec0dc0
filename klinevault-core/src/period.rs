//! Calendar months, the unit the provider publishes archives in.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// First year the upstream provider has monthly archives for.
pub const PROVIDER_EPOCH_YEAR: i32 = 2017;

/// One calendar month. Ordered by (year, month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// Returns `None` when `month` is outside 1..=12.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The calendar month before this one.
    pub fn prev(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// The newest month whose archive can exist on `today`.
    ///
    /// Monthly archives only appear after the month has closed, so this is
    /// the month before `today`.
    pub fn latest_published(today: NaiveDate) -> Self {
        Self {
            year: today.year(),
            month: today.month(),
        }
        .prev()
    }

    /// Walk backward from `latest` to January of `earliest_year`, newest first.
    pub fn walk_back(latest: Period, earliest_year: i32) -> WalkBack {
        WalkBack {
            next: Some(latest),
            earliest_year,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Iterator returned by [`Period::walk_back`].
#[derive(Debug, Clone)]
pub struct WalkBack {
    next: Option<Period>,
    earliest_year: i32,
}

impl Iterator for WalkBack {
    type Item = Period;

    fn next(&mut self) -> Option<Period> {
        let current = self.next?;
        if current.year < self.earliest_year {
            self.next = None;
            return None;
        }
        let prev = current.prev();
        self.next = (prev.year >= self.earliest_year).then_some(prev);
        Some(current)
    }
}
