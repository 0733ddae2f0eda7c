//! Segment — a named cohort identified by its slug.
//!
//! The slug is the identity callers use. `segment_id` is a surrogate key the
//! store uses for joins; it never leaves the service boundary except in the
//! create response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Upper bound on slug length, in bytes.
pub const MAX_SLUG_LEN: usize = 128;

/// A persisted segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
  pub segment_id: Uuid,
  pub slug:       String,
  pub created_at: DateTime<Utc>,
}

/// Check that `slug` is usable as a segment identity.
///
/// Slugs end up as a field of the `;`-separated history report, so the
/// separator and whitespace are rejected along with empty input.
pub fn validate_slug(slug: &str) -> Result<()> {
  if slug.trim().is_empty() {
    return Err(Error::validation("segment slug must not be empty"));
  }
  if slug.len() > MAX_SLUG_LEN {
    return Err(Error::validation(format!(
      "segment slug must be at most {MAX_SLUG_LEN} bytes"
    )));
  }
  if slug.chars().any(|c| c.is_whitespace() || c == ';') {
    return Err(Error::validation(format!(
      "segment slug {slug:?} contains whitespace or ';'"
    )));
  }
  Ok(())
}

/// Check that an auto-join percentage lies in `0..=100`.
pub fn validate_percent(percent: i64) -> Result<u8> {
  u8::try_from(percent)
    .ok()
    .filter(|p| *p <= 100)
    .ok_or_else(|| {
      Error::validation(format!(
        "auto-join percent must be between 0 and 100, got {percent}"
      ))
    })
}
