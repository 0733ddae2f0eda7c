//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`
//! suffix) so that SQL text comparison orders them chronologically. UUIDs
//! are stored as hyphenated lowercase strings.

use chrono::{DateTime, SecondsFormat, Utc};
use cohort_core::{
  history::{HistoryEntry, Operation},
  segment::Segment,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Operation ───────────────────────────────────────────────────────────────

pub fn decode_operation(s: &str) -> Result<Operation> {
  Operation::parse(s).ok_or_else(|| Error::UnknownOperation(s.to_owned()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `segments` row.
pub struct RawSegment {
  pub segment_id: String,
  pub slug:       String,
  pub created_at: String,
}

impl RawSegment {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      segment_id: row.get(0)?,
      slug:       row.get(1)?,
      created_at: row.get(2)?,
    })
  }

  pub fn into_segment(self) -> Result<Segment> {
    Ok(Segment {
      segment_id: decode_uuid(&self.segment_id)?,
      slug:       self.slug,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw values read directly from a `history` row.
pub struct RawHistoryEntry {
  pub user_id:      i64,
  pub segment_slug: String,
  pub operation:    String,
  pub recorded_at:  String,
}

impl RawHistoryEntry {
  pub fn into_entry(self) -> Result<HistoryEntry> {
    Ok(HistoryEntry {
      user_id:      self.user_id,
      segment_slug: self.segment_slug,
      operation:    decode_operation(&self.operation)?,
      recorded_at:  decode_dt(&self.recorded_at)?,
    })
  }
}
