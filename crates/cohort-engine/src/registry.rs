//! [`SegmentRegistry`] — segment creation, auto-join, and deletion cascades.

use std::sync::Arc;

use chrono::Utc;
use cohort_core::{
  Error, Result,
  history::Operation,
  membership::UserId,
  segment::{Segment, validate_percent, validate_slug},
  store::{AuditStore, MembershipStore},
};
use serde::Serialize;
use tracing::{error, info};

use crate::{audit::AuditLog, membership::MembershipEngine, sampler::AutoJoinSampler};

/// A freshly created segment and the users auto-join put in it.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedSegment {
  pub segment:     Segment,
  pub auto_joined: Vec<UserId>,
}

pub struct SegmentRegistry<M, A> {
  store:   Arc<M>,
  audit:   AuditLog<A>,
  sampler: AutoJoinSampler<M>,
  members: MembershipEngine<M, A>,
}

impl<M, A> SegmentRegistry<M, A>
where
  M: MembershipStore,
  A: AuditStore,
{
  pub fn new(store: Arc<M>, audit: AuditLog<A>, members: MembershipEngine<M, A>) -> Self {
    Self {
      sampler: AutoJoinSampler::new(Arc::clone(&store)),
      store,
      audit,
      members,
    }
  }

  /// Create a segment and enroll `auto_join_percent` of the known users.
  ///
  /// A taken slug fails with [`Error::Conflict`]. If auto-join fails after
  /// the segment row is committed, the segment stays and the error is
  /// returned.
  pub async fn create_segment(
    &self,
    slug:              String,
    auto_join_percent: i64,
  ) -> Result<CreatedSegment> {
    validate_slug(&slug)?;
    let percent = validate_percent(auto_join_percent)?;

    let segment = self
      .store
      .create_segment(slug.clone())
      .await
      .map_err(Error::storage)?
      .ok_or(Error::Conflict(slug))?;

    info!(slug = %segment.slug, percent, "created segment");

    if percent == 0 {
      return Ok(CreatedSegment { segment, auto_joined: Vec::new() });
    }

    let sampled = self.sampler.sample_users(percent).await?;
    let auto_joined = self
      .members
      .add_users_to_segment(segment.segment_id, &segment.slug, sampled)
      .await?;

    Ok(CreatedSegment { segment, auto_joined })
  }

  /// Delete a segment and all of its memberships, then record a `remove`
  /// for every user whose membership was still active.
  ///
  /// Returns the evicted users. The deletion is committed before history is
  /// written; a failed history write is logged and returned, not undone.
  pub async fn delete_segment(&self, slug: &str) -> Result<Vec<UserId>> {
    let deleted = self
      .store
      .delete_segment(slug.to_owned(), Utc::now())
      .await
      .map_err(Error::storage)?
      .ok_or_else(|| Error::NotFound(slug.to_owned()))?;

    let evicted = deleted.evicted_users;
    if let Err(e) = self
      .audit
      .record_batch_multi_user(slug, &evicted, Operation::Remove)
      .await
    {
      error!(slug, count = evicted.len(), error = %e, "segment deleted but removal history was not recorded");
      return Err(e);
    }

    info!(slug, evicted = evicted.len(), "deleted segment");
    Ok(evicted)
  }

  pub async fn list_segments(&self) -> Result<Vec<Segment>> {
    self.store.list_segments().await.map_err(Error::storage)
  }
}
