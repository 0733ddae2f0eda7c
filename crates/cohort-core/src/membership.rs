//! Memberships and the lookup results the store hands back for them.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike as _, SubsecRound as _, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, segment::Segment};

/// Expirations must fall in years `0..=9999`; later years render with a sign
/// prefix and no longer sort as text.
pub const MAX_EXPIRATION_YEAR: i32 = 9999;

/// Users are identified by the integer id of the upstream user service.
pub type UserId = i64;

/// The fact that a user belongs to a segment, optionally until
/// `expiration_time`. `(user_id, segment_id)` is unique in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
  pub user_id:         UserId,
  pub segment_id:      Uuid,
  pub expiration_time: Option<DateTime<Utc>>,
}

impl Membership {
  /// A membership is active at `at` iff it never expires or expires strictly
  /// after `at`.
  pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
    self.expiration_time.is_none_or(|exp| exp > at)
  }
}

/// Bring an expiration to the precision the store keeps (microseconds), so
/// activity checks agree before and after a round trip. Rejects years the
/// store cannot order.
pub fn normalize_expiration(exp: DateTime<Utc>) -> Result<DateTime<Utc>> {
  if !(0..=MAX_EXPIRATION_YEAR).contains(&exp.year()) {
    return Err(Error::validation(format!(
      "expiration time {exp} is out of range, the year must be at most {MAX_EXPIRATION_YEAR}"
    )));
  }
  Ok(exp.trunc_subsecs(6))
}

/// Result of resolving a batch of slugs in a single lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlugResolution {
  /// Slugs that name an existing segment, with their ids.
  pub resolved: BTreeMap<String, Uuid>,
  /// Requested slugs with no matching segment, in request order, deduplicated.
  pub missing:  Vec<String>,
}

impl SlugResolution {
  /// Build a resolution from the requested slugs and whatever the store
  /// found for them.
  pub fn new(requested: &[String], found: BTreeMap<String, Uuid>) -> Self {
    let mut missing: Vec<String> = Vec::new();
    for slug in requested {
      if !found.contains_key(slug) && !missing.contains(slug) {
        missing.push(slug.clone());
      }
    }
    Self { resolved: found, missing }
  }

  pub fn is_complete(&self) -> bool { self.missing.is_empty() }

  /// Ids for `slugs` in the given order, skipping unresolved ones.
  pub fn ids_for(&self, slugs: &[String]) -> Vec<Uuid> {
    slugs
      .iter()
      .filter_map(|s| self.resolved.get(s).copied())
      .collect()
  }
}

/// What a segment deletion removed, returned from the store's cascade.
#[derive(Debug, Clone)]
pub struct DeletedSegment {
  pub segment:       Segment,
  /// Users whose membership was still active when the segment was deleted.
  pub evicted_users: Vec<UserId>,
}

/// Memberships removed by one expiration sweep, grouped by user.
pub type ExpiredMemberships = BTreeMap<UserId, Vec<Uuid>>;
