//! Audit history — the append-only record of membership changes.
//!
//! Entries are written once per committed membership mutation and are never
//! updated or deleted.

use std::fmt;

use chrono::{DateTime, Datelike as _, NaiveDate, TimeZone as _, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, membership::UserId};

/// The kind of membership change an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
  Add,
  Remove,
}

impl Operation {
  /// The string stored in the `operation` column and written to reports.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Add => "add",
      Self::Remove => "remove",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "add" => Some(Self::Add),
      "remove" => Some(Self::Remove),
      _ => None,
    }
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One add or remove event for one user and one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub user_id:      UserId,
  /// The slug is stored by value so history outlives segment deletion.
  pub segment_slug: String,
  pub operation:    Operation,
  pub recorded_at:  DateTime<Utc>,
}

/// A calendar month in UTC, the granularity of history reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportPeriod {
  year:  i32,
  month: u32,
}

impl ReportPeriod {
  pub fn new(year: i32, month: u32) -> Result<Self> {
    if !(1..=12).contains(&month) {
      return Err(Error::validation(format!(
        "month must be between 1 and 12, got {month}"
      )));
    }
    if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
      return Err(Error::validation(format!("year {year} is out of range")));
    }
    Ok(Self { year, month })
  }

  /// The month containing `at`.
  pub fn containing(at: DateTime<Utc>) -> Self {
    Self { year: at.year(), month: at.month() }
  }

  pub fn year(&self) -> i32 { self.year }

  pub fn month(&self) -> u32 { self.month }

  /// Half-open `[start, end)` bounds of the month.
  pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
    let (next_year, next_month) = if self.month == 12 {
      (self.year + 1, 1)
    } else {
      (self.year, self.month + 1)
    };
    (
      first_instant(self.year, self.month),
      first_instant(next_year, next_month),
    )
  }

  pub fn contains(&self, at: DateTime<Utc>) -> bool {
    let (start, end) = self.bounds();
    start <= at && at < end
  }
}

fn first_instant(year: i32, month: u32) -> DateTime<Utc> {
  // `new` rejects years chrono cannot represent, and the year after a valid
  // one is far inside chrono's range.
  Utc
    .with_ymd_and_hms(year, month, 1, 0, 0, 0)
    .single()
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
