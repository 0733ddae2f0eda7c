//! [`MembershipEngine`] — per-user segment assignment and bulk enrollment.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cohort_core::{
  Error, Result,
  history::Operation,
  membership::{SlugResolution, UserId, normalize_expiration},
  store::{AuditStore, MembershipStore},
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::AuditLog;

/// One request to change a user's segments.
#[derive(Debug, Clone, Default)]
pub struct SegmentAction {
  pub user_id:    UserId,
  pub add:        Vec<String>,
  pub remove:     Vec<String>,
  /// Applies to every slug in `add`. `None` means permanent.
  pub expiration: Option<DateTime<Utc>>,
}

/// The slugs an action actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
  pub added:   Vec<String>,
  pub removed: Vec<String>,
}

/// Orchestrates membership writes and their history batches.
///
/// Every write is followed by exactly one history batch covering what the
/// store reports as changed. A failed history write leaves the membership
/// change committed; the error is returned to the caller.
pub struct MembershipEngine<M, A> {
  store: Arc<M>,
  audit: AuditLog<A>,
}

impl<M, A> Clone for MembershipEngine<M, A> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), audit: self.audit.clone() }
  }
}

impl<M, A> MembershipEngine<M, A>
where
  M: MembershipStore,
  A: AuditStore,
{
  pub fn new(store: Arc<M>, audit: AuditLog<A>) -> Self { Self { store, audit } }

  /// Add `user_id` to every segment in `slugs`, overwriting the expiration
  /// of memberships that already exist.
  ///
  /// Fails with [`Error::Validation`] naming every unknown slug, or on an
  /// expiration the store cannot hold, before anything is written. Returns
  /// the slugs written, all of which are recorded as `add` events.
  pub async fn add_user_to_segments(
    &self,
    user_id:    UserId,
    slugs:      Vec<String>,
    expiration: Option<DateTime<Utc>>,
  ) -> Result<Vec<String>> {
    let expiration = expiration.map(normalize_expiration).transpose()?;
    let slugs = dedup(slugs);
    if slugs.is_empty() {
      return Ok(Vec::new());
    }
    let resolution = self.resolve(slugs.clone()).await?;
    self.add_resolved(user_id, &slugs, &resolution, expiration).await
  }

  /// Remove `user_id` from every segment in `slugs`. Slugs the user was not
  /// in are left out of the result; unknown slugs fail the call up front.
  pub async fn remove_user_from_segments(
    &self,
    user_id: UserId,
    slugs:   Vec<String>,
  ) -> Result<Vec<String>> {
    let slugs = dedup(slugs);
    if slugs.is_empty() {
      return Ok(Vec::new());
    }
    let resolution = self.resolve(slugs.clone()).await?;
    self.remove_resolved(user_id, &slugs, &resolution).await
  }

  /// Validate and apply a combined add/remove request.
  ///
  /// All slugs of both lists are checked in one lookup; any unknown slug
  /// fails the whole action with nothing written. Additions are applied
  /// before removals. If the removal step fails, the additions and their
  /// history stay committed.
  pub async fn execute_user_segment_action(
    &self,
    action: SegmentAction,
  ) -> Result<ActionOutcome> {
    let expiration = validate_action(&action, Utc::now())?;

    let SegmentAction { user_id, add, remove, .. } = action;
    let add = dedup(add);
    let remove = dedup(remove);

    let mut all = add.clone();
    all.extend(remove.iter().cloned());
    let resolution = self.resolve(dedup(all)).await?;

    let added = self.add_resolved(user_id, &add, &resolution, expiration).await?;

    let removed = match self.remove_resolved(user_id, &remove, &resolution).await {
      Ok(removed) => removed,
      Err(e) => {
        if !added.is_empty() {
          warn!(
            user_id,
            added = ?added,
            error = %e,
            "segment removal failed after additions were committed"
          );
        }
        return Err(e);
      }
    };

    Ok(ActionOutcome { added, removed })
  }

  /// Enroll many users in one segment as permanent members, recording an
  /// `add` for exactly the users inserted. Existing members are untouched.
  pub async fn add_users_to_segment(
    &self,
    segment_id: Uuid,
    slug:       &str,
    user_ids:   Vec<UserId>,
  ) -> Result<Vec<UserId>> {
    if user_ids.is_empty() {
      return Ok(Vec::new());
    }

    let inserted = self
      .store
      .add_users_to_segment(segment_id, user_ids)
      .await
      .map_err(Error::storage)?;

    self
      .audit
      .record_batch_multi_user(slug, &inserted, Operation::Add)
      .await?;

    info!(slug, count = inserted.len(), "enrolled users in segment");
    Ok(inserted)
  }

  /// Slugs of the user's memberships active right now.
  pub async fn active_segments(&self, user_id: UserId) -> Result<Vec<String>> {
    self.active_segments_at(user_id, Utc::now()).await
  }

  pub async fn active_segments_at(
    &self,
    user_id: UserId,
    at:      DateTime<Utc>,
  ) -> Result<Vec<String>> {
    self
      .store
      .active_segments(user_id, at)
      .await
      .map_err(Error::storage)
  }

  // ── Internals ─────────────────────────────────────────────────────────────

  async fn resolve(&self, slugs: Vec<String>) -> Result<SlugResolution> {
    let resolution = self
      .store
      .resolve_slugs(slugs)
      .await
      .map_err(Error::storage)?;
    if !resolution.is_complete() {
      return Err(missing_segments(&resolution.missing));
    }
    Ok(resolution)
  }

  async fn add_resolved(
    &self,
    user_id:    UserId,
    slugs:      &[String],
    resolution: &SlugResolution,
    expiration: Option<DateTime<Utc>>,
  ) -> Result<Vec<String>> {
    if slugs.is_empty() {
      return Ok(Vec::new());
    }

    let written = self
      .store
      .upsert_memberships(user_id, resolution.ids_for(slugs), expiration)
      .await
      .map_err(Error::storage)?;
    let added = slugs_for(slugs, resolution, &written);

    self.audit.record_batch(user_id, &added, Operation::Add).await?;

    info!(user_id, added = ?added, "added user to segments");
    Ok(added)
  }

  async fn remove_resolved(
    &self,
    user_id:    UserId,
    slugs:      &[String],
    resolution: &SlugResolution,
  ) -> Result<Vec<String>> {
    if slugs.is_empty() {
      return Ok(Vec::new());
    }

    let deleted = self
      .store
      .delete_memberships(user_id, resolution.ids_for(slugs))
      .await
      .map_err(Error::storage)?;
    let removed = slugs_for(slugs, resolution, &deleted);

    self.audit.record_batch(user_id, &removed, Operation::Remove).await?;

    info!(user_id, removed = ?removed, "removed user from segments");
    Ok(removed)
  }
}

/// Input checks the store cannot do: user id, non-empty request, and an
/// expiration that lies in the future and within the storable range.
/// Returns the expiration truncated to stored precision.
fn validate_action(
  action: &SegmentAction,
  now:    DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
  if action.user_id < 1 {
    return Err(Error::validation(format!(
      "user id must be positive, got {}",
      action.user_id
    )));
  }
  if action.add.is_empty() && action.remove.is_empty() {
    return Err(Error::validation("no segments specified"));
  }
  let expiration = action.expiration.map(normalize_expiration).transpose()?;
  if let Some(exp) = expiration
    && exp <= now
  {
    return Err(Error::validation("expiration time must be in the future"));
  }
  Ok(expiration)
}

fn missing_segments(missing: &[String]) -> Error {
  Error::validation(format!(
    "these segments do not exist: [{}]",
    missing.join(", ")
  ))
}

/// The slugs among `slugs` whose ids the store reported in `changed`.
fn slugs_for(slugs: &[String], resolution: &SlugResolution, changed: &[Uuid]) -> Vec<String> {
  slugs
    .iter()
    .filter(|slug| {
      resolution
        .resolved
        .get(slug.as_str())
        .is_some_and(|id| changed.contains(id))
    })
    .cloned()
    .collect()
}

/// Drop repeated slugs, keeping first-seen order.
fn dedup(slugs: Vec<String>) -> Vec<String> {
  let mut out: Vec<String> = Vec::with_capacity(slugs.len());
  for slug in slugs {
    if !out.contains(&slug) {
      out.push(slug);
    }
  }
  out
}
