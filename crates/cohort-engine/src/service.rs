//! [`SegmentService`] — the single entry point the API layer talks to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cohort_core::{
  Result,
  history::ReportPeriod,
  membership::UserId,
  segment::Segment,
  store::{AuditStore, MembershipStore},
};
use tokio::sync::Mutex;

use crate::{
  audit::AuditLog,
  membership::{ActionOutcome, MembershipEngine, SegmentAction},
  registry::{CreatedSegment, SegmentRegistry},
  report,
  sweeper::ExpirationSweeper,
};

/// A rendered history report ready to be handed to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryReport {
  pub file_name: String,
  pub body:      String,
}

/// Wires the registry, membership engine and audit log over one pair of
/// stores.
pub struct SegmentService<M, A> {
  store:      Arc<M>,
  audit:      AuditLog<A>,
  registry:   SegmentRegistry<M, A>,
  members:    MembershipEngine<M, A>,
  /// Shared by every sweeper this service builds.
  sweep_lock: Arc<Mutex<()>>,
}

impl<M, A> SegmentService<M, A>
where
  M: MembershipStore,
  A: AuditStore,
{
  pub fn new(store: Arc<M>, audit_store: Arc<A>) -> Self {
    let audit = AuditLog::new(audit_store);
    let members = MembershipEngine::new(Arc::clone(&store), audit.clone());
    let registry = SegmentRegistry::new(Arc::clone(&store), audit.clone(), members.clone());
    Self {
      store,
      audit,
      registry,
      members,
      sweep_lock: Arc::new(Mutex::new(())),
    }
  }

  /// A sweeper sharing this service's stores and sweep lock, so sweeps from
  /// any of its sweepers never overlap.
  pub fn sweeper(&self) -> ExpirationSweeper<M, A> {
    ExpirationSweeper::with_lock(
      Arc::clone(&self.store),
      self.audit.clone(),
      Arc::clone(&self.sweep_lock),
    )
  }

  // ── Segments ──────────────────────────────────────────────────────────

  pub async fn create_segment(
    &self,
    slug:              String,
    auto_join_percent: i64,
  ) -> Result<CreatedSegment> {
    self.registry.create_segment(slug, auto_join_percent).await
  }

  pub async fn delete_segment(&self, slug: &str) -> Result<Vec<UserId>> {
    self.registry.delete_segment(slug).await
  }

  pub async fn list_segments(&self) -> Result<Vec<Segment>> {
    self.registry.list_segments().await
  }

  // ── Memberships ───────────────────────────────────────────────────────

  pub async fn execute_user_segment_action(
    &self,
    action: SegmentAction,
  ) -> Result<ActionOutcome> {
    self.members.execute_user_segment_action(action).await
  }

  pub async fn add_user_to_segments(
    &self,
    user_id:    UserId,
    slugs:      Vec<String>,
    expiration: Option<DateTime<Utc>>,
  ) -> Result<Vec<String>> {
    self.members.add_user_to_segments(user_id, slugs, expiration).await
  }

  pub async fn remove_user_from_segments(
    &self,
    user_id: UserId,
    slugs:   Vec<String>,
  ) -> Result<Vec<String>> {
    self.members.remove_user_from_segments(user_id, slugs).await
  }

  pub async fn active_segments(&self, user_id: UserId) -> Result<Vec<String>> {
    self.members.active_segments(user_id).await
  }

  // ── History ───────────────────────────────────────────────────────────

  /// Render the user's history for one calendar month. Fails with
  /// [`cohort_core::Error::NoData`] when the month has no entries.
  pub async fn history_report(
    &self,
    user_id: UserId,
    year:    i32,
    month:   u32,
  ) -> Result<HistoryReport> {
    let period = ReportPeriod::new(year, month)?;
    let entries = self.audit.query(user_id, period).await?;
    let body = report::render(&entries)?;
    Ok(HistoryReport { file_name: report::file_name(user_id, period), body })
  }
}
