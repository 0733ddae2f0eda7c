//! History report rendering.
//!
//! A report is plain text with one `;`-separated row per entry:
//!
//! ```text
//! 7;beta;add;2024-03-01 12:00:00
//! 7;beta;remove;2024-03-02 08:30:15
//! ```

use std::fmt::Write as _;

use cohort_core::{
  Error, Result,
  history::{HistoryEntry, ReportPeriod},
  membership::UserId,
};

pub const SEPARATOR: char = ';';

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render `entries` as report rows, each terminated by a newline.
///
/// An empty slice is [`Error::NoData`]; a report is never empty.
pub fn render(entries: &[HistoryEntry]) -> Result<String> {
  if entries.is_empty() {
    return Err(Error::NoData);
  }

  let mut out = String::with_capacity(entries.len() * 48);
  for entry in entries {
    // Writing to a String cannot fail.
    let _ = writeln!(
      out,
      "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
      entry.user_id,
      entry.segment_slug,
      entry.operation,
      entry.recorded_at.format(TIMESTAMP_FORMAT),
    );
  }
  Ok(out)
}

/// The download name for a user's report, e.g. `history_7_2024_03.csv`.
pub fn file_name(user_id: UserId, period: ReportPeriod) -> String {
  format!("history_{user_id}_{}_{:02}.csv", period.year(), period.month())
}
