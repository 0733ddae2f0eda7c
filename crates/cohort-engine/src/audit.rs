//! [`AuditLog`] — batches membership changes into history entries.

use std::sync::Arc;

use chrono::Utc;
use cohort_core::{
  Error, Result,
  history::{HistoryEntry, Operation, ReportPeriod},
  membership::UserId,
  store::AuditStore,
};
use tracing::debug;

/// Append-only writer and reader of membership history.
///
/// Every entry of one batch shares a single timestamp, taken when the batch
/// is recorded.
pub struct AuditLog<A> {
  store: Arc<A>,
}

impl<A> Clone for AuditLog<A> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<A: AuditStore> AuditLog<A> {
  pub fn new(store: Arc<A>) -> Self { Self { store } }

  /// Record `operation` for one user across `slugs`. An empty batch never
  /// reaches the store.
  pub async fn record_batch(
    &self,
    user_id:   UserId,
    slugs:     &[String],
    operation: Operation,
  ) -> Result<()> {
    if slugs.is_empty() {
      return Ok(());
    }

    let recorded_at = Utc::now();
    let entries = slugs
      .iter()
      .map(|slug| HistoryEntry {
        user_id,
        segment_slug: slug.clone(),
        operation,
        recorded_at,
      })
      .collect();

    self.store.append_history(entries).await.map_err(Error::storage)?;
    debug!(user_id, count = slugs.len(), %operation, "recorded history batch");
    Ok(())
  }

  /// Record `operation` for many users against one segment.
  pub async fn record_batch_multi_user(
    &self,
    slug:      &str,
    user_ids:  &[UserId],
    operation: Operation,
  ) -> Result<()> {
    if user_ids.is_empty() {
      return Ok(());
    }

    let recorded_at = Utc::now();
    let entries = user_ids
      .iter()
      .map(|&user_id| HistoryEntry {
        user_id,
        segment_slug: slug.to_owned(),
        operation,
        recorded_at,
      })
      .collect();

    self.store.append_history(entries).await.map_err(Error::storage)?;
    debug!(slug, count = user_ids.len(), %operation, "recorded history batch");
    Ok(())
  }

  /// History of `user_id` within `period`, oldest first. Empty when nothing
  /// matches.
  pub async fn query(
    &self,
    user_id: UserId,
    period:  ReportPeriod,
  ) -> Result<Vec<HistoryEntry>> {
    self
      .store
      .query_history(user_id, period)
      .await
      .map_err(Error::storage)
  }
}
