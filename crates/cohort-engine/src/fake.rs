//! A store wrapper with switchable failures and call counters.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use chrono::{DateTime, Utc};
use cohort_core::{
  history::{HistoryEntry, ReportPeriod},
  membership::{DeletedSegment, ExpiredMemberships, SlugResolution, UserId},
  segment::Segment,
  store::{AuditStore, MembershipStore},
};
use cohort_store_sqlite::SqliteStore;
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum FakeError {
  #[error("injected failure in {0}")]
  Injected(&'static str),

  #[error(transparent)]
  Store(#[from] cohort_store_sqlite::Error),
}

type Result<T> = std::result::Result<T, FakeError>;

/// Delegates to an in-memory [`SqliteStore`] unless a failure is switched on.
pub struct FlakyStore {
  inner: SqliteStore,

  pub fail_delete_memberships: AtomicBool,
  pub fail_append_history:     AtomicBool,

  /// When set, `delete_expired` signals `expired_entered` and waits on
  /// `expired_release` before touching the store.
  pub hold_delete_expired: AtomicBool,
  pub expired_entered:     Notify,
  pub expired_release:     Notify,

  /// Calls that reached a membership-mutating method.
  pub membership_writes: AtomicUsize,
  /// Calls that reached `append_history`.
  pub history_writes:    AtomicUsize,
}

impl FlakyStore {
  pub async fn new() -> Self {
    Self {
      inner: SqliteStore::open_in_memory().await.expect("in-memory store"),
      fail_delete_memberships: AtomicBool::new(false),
      fail_append_history: AtomicBool::new(false),
      hold_delete_expired: AtomicBool::new(false),
      expired_entered: Notify::new(),
      expired_release: Notify::new(),
      membership_writes: AtomicUsize::new(0),
      history_writes: AtomicUsize::new(0),
    }
  }

  pub fn membership_writes(&self) -> usize { self.membership_writes.load(Ordering::SeqCst) }

  pub fn history_writes(&self) -> usize { self.history_writes.load(Ordering::SeqCst) }

  fn wrote_membership(&self) { self.membership_writes.fetch_add(1, Ordering::SeqCst); }
}

impl MembershipStore for FlakyStore {
  type Error = FakeError;

  async fn create_segment(&self, slug: String) -> Result<Option<Segment>> {
    Ok(self.inner.create_segment(slug).await?)
  }

  async fn delete_segment(
    &self,
    slug: String,
    now: DateTime<Utc>,
  ) -> Result<Option<DeletedSegment>> {
    self.wrote_membership();
    Ok(self.inner.delete_segment(slug, now).await?)
  }

  async fn list_segments(&self) -> Result<Vec<Segment>> {
    Ok(self.inner.list_segments().await?)
  }

  async fn resolve_slugs(&self, slugs: Vec<String>) -> Result<SlugResolution> {
    Ok(self.inner.resolve_slugs(slugs).await?)
  }

  async fn resolve_ids(&self, ids: Vec<Uuid>) -> Result<BTreeMap<Uuid, String>> {
    Ok(self.inner.resolve_ids(ids).await?)
  }

  async fn upsert_memberships(
    &self,
    user_id: UserId,
    segment_ids: Vec<Uuid>,
    expiration: Option<DateTime<Utc>>,
  ) -> Result<Vec<Uuid>> {
    self.wrote_membership();
    Ok(self.inner.upsert_memberships(user_id, segment_ids, expiration).await?)
  }

  async fn delete_memberships(&self, user_id: UserId, segment_ids: Vec<Uuid>) -> Result<Vec<Uuid>> {
    if self.fail_delete_memberships.load(Ordering::SeqCst) {
      return Err(FakeError::Injected("delete_memberships"));
    }
    self.wrote_membership();
    Ok(self.inner.delete_memberships(user_id, segment_ids).await?)
  }

  async fn add_users_to_segment(
    &self,
    segment_id: Uuid,
    user_ids: Vec<UserId>,
  ) -> Result<Vec<UserId>> {
    self.wrote_membership();
    Ok(self.inner.add_users_to_segment(segment_id, user_ids).await?)
  }

  async fn delete_expired(&self, now: DateTime<Utc>) -> Result<ExpiredMemberships> {
    if self.hold_delete_expired.load(Ordering::SeqCst) {
      self.expired_entered.notify_one();
      self.expired_release.notified().await;
    }
    self.wrote_membership();
    Ok(self.inner.delete_expired(now).await?)
  }

  async fn list_known_users(&self) -> Result<BTreeSet<UserId>> {
    Ok(self.inner.list_known_users().await?)
  }

  async fn active_segments(&self, user_id: UserId, at: DateTime<Utc>) -> Result<Vec<String>> {
    Ok(self.inner.active_segments(user_id, at).await?)
  }
}

impl AuditStore for FlakyStore {
  type Error = FakeError;

  async fn append_history(&self, entries: Vec<HistoryEntry>) -> Result<()> {
    self.history_writes.fetch_add(1, Ordering::SeqCst);
    if self.fail_append_history.load(Ordering::SeqCst) {
      return Err(FakeError::Injected("append_history"));
    }
    Ok(self.inner.append_history(entries).await?)
  }

  async fn query_history(&self, user_id: UserId, period: ReportPeriod) -> Result<Vec<HistoryEntry>> {
    Ok(self.inner.query_history(user_id, period).await?)
  }
}
