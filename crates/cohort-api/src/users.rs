//! Handlers for `/users/{user_id}/segments`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/users/{user_id}/segments` | Active segments only |
//! | `POST` | `/users/{user_id}/segments` | Body: [`ActionBody`] |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use chrono::{DateTime, Utc};
use cohort_core::{
  membership::UserId,
  store::{AuditStore, MembershipStore},
};
use cohort_engine::{
  SegmentService,
  membership::{ActionOutcome, SegmentAction},
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

// ─── Active segments ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ActiveBody {
  pub user_id:  UserId,
  pub segments: Vec<String>,
}

/// `GET /users/{user_id}/segments`
pub async fn active<M, A>(
  State(service): State<Arc<SegmentService<M, A>>>,
  Path(user_id): Path<UserId>,
) -> Result<Json<ActiveBody>, ApiError>
where
  M: MembershipStore,
  A: AuditStore,
{
  let segments = service.active_segments(user_id).await?;
  Ok(Json(ActiveBody { user_id, segments }))
}

// ─── Action ───────────────────────────────────────────────────────────────────

/// JSON body accepted by `POST /users/{user_id}/segments`.
#[derive(Debug, Deserialize)]
pub struct ActionBody {
  #[serde(default)]
  pub add:             Vec<String>,
  #[serde(default)]
  pub remove:          Vec<String>,
  /// RFC 3339; applies to every slug in `add`. Absent or `null` is permanent.
  pub expiration_time: Option<DateTime<Utc>>,
}

/// `POST /users/{user_id}/segments`: returns the slugs actually changed.
pub async fn execute<M, A>(
  State(service): State<Arc<SegmentService<M, A>>>,
  Path(user_id): Path<UserId>,
  Json(body): Json<ActionBody>,
) -> Result<Json<ActionOutcome>, ApiError>
where
  M: MembershipStore,
  A: AuditStore,
{
  let outcome = service
    .execute_user_segment_action(SegmentAction {
      user_id,
      add: body.add,
      remove: body.remove,
      expiration: body.expiration_time,
    })
    .await?;
  Ok(Json(outcome))
}
