//! The storage contracts the engine is written against.
//!
//! [`MembershipStore`] owns segments and memberships; [`AuditStore`] owns the
//! append-only history. A backend may implement both (e.g.
//! `cohort-store-sqlite`), but the engine only relies on the two contracts,
//! never on a concrete backend.
//!
//! All methods return `Send` futures so the traits can be used in
//! multi-threaded async runtimes (e.g. tokio with `axum`).

use std::{
  collections::{BTreeMap, BTreeSet},
  future::Future,
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  history::{HistoryEntry, ReportPeriod},
  membership::{DeletedSegment, ExpiredMemberships, SlugResolution, UserId},
  segment::Segment,
};

// ─── Memberships ─────────────────────────────────────────────────────────────

/// Transactional access to segments and `(user, segment, expiration)` rows.
///
/// Every multi-row write is a single transaction: either all rows of the call
/// are applied or none are.
pub trait MembershipStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Segments ──────────────────────────────────────────────────────────

  /// Insert a new segment. Returns `None` if the slug is already taken; the
  /// check must come from the store's uniqueness constraint, not a prior
  /// read.
  fn create_segment(
    &self,
    slug: String,
  ) -> impl Future<Output = Result<Option<Segment>, Self::Error>> + Send + '_;

  /// Delete a segment and every membership referencing it, in one
  /// transaction. Returns `None` if no segment has this slug.
  ///
  /// `now` decides which of the removed memberships count as evicted
  /// (active at `now`).
  fn delete_segment(
    &self,
    slug: String,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<DeletedSegment>, Self::Error>> + Send + '_;

  /// All segments, ordered by slug.
  fn list_segments(
    &self,
  ) -> impl Future<Output = Result<Vec<Segment>, Self::Error>> + Send + '_;

  /// Resolve slugs to ids in a single lookup, reporting the ones that do
  /// not exist.
  fn resolve_slugs(
    &self,
    slugs: Vec<String>,
  ) -> impl Future<Output = Result<SlugResolution, Self::Error>> + Send + '_;

  /// Map segment ids back to slugs. Ids with no segment are absent from the
  /// result.
  fn resolve_ids(
    &self,
    ids: Vec<Uuid>,
  ) -> impl Future<Output = Result<BTreeMap<Uuid, String>, Self::Error>> + Send + '_;

  // ── Memberships ───────────────────────────────────────────────────────

  /// Upsert `(user_id, id, expiration)` for every id. An existing row has its
  /// expiration overwritten. Returns the ids written, in input order.
  fn upsert_memberships(
    &self,
    user_id: UserId,
    segment_ids: Vec<Uuid>,
    expiration: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  /// Delete `(user_id, id)` for every id. Returns the ids that existed.
  fn delete_memberships(
    &self,
    user_id: UserId,
    segment_ids: Vec<Uuid>,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  /// Insert permanent memberships of `user_ids` in one segment, leaving
  /// existing rows untouched. Returns the users actually inserted.
  fn add_users_to_segment(
    &self,
    segment_id: Uuid,
    user_ids: Vec<UserId>,
  ) -> impl Future<Output = Result<Vec<UserId>, Self::Error>> + Send + '_;

  /// Atomically delete every membership with an expiration at or before
  /// `now`, returning what was removed grouped by user.
  fn delete_expired(
    &self,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<ExpiredMemberships, Self::Error>> + Send + '_;

  /// Every user that has ever had a membership recorded.
  fn list_known_users(
    &self,
  ) -> impl Future<Output = Result<BTreeSet<UserId>, Self::Error>> + Send + '_;

  /// Slugs of the user's memberships that are active at `at`, ordered by
  /// slug.
  fn active_segments(
    &self,
    user_id: UserId,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;
}

// ─── History ─────────────────────────────────────────────────────────────────

/// Append-only storage for [`HistoryEntry`] rows.
pub trait AuditStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Append all `entries` in one transaction.
  fn append_history(
    &self,
    entries: Vec<HistoryEntry>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Entries for `user_id` recorded within `period`, oldest first.
  fn query_history(
    &self,
    user_id: UserId,
    period: ReportPeriod,
  ) -> impl Future<Output = Result<Vec<HistoryEntry>, Self::Error>> + Send + '_;
}
