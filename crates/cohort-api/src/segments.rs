//! Handlers for `/segments` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/segments` | Ordered by slug |
//! | `POST`   | `/segments` | Body: `{"slug":"vip","auto_join_percent":50}` |
//! | `DELETE` | `/segments/{slug}` | 204; 404 if not found |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use cohort_core::{
  membership::UserId,
  segment::Segment,
  store::{AuditStore, MembershipStore},
};
use cohort_engine::SegmentService;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /segments`
pub async fn list<M, A>(
  State(service): State<Arc<SegmentService<M, A>>>,
) -> Result<Json<Vec<Segment>>, ApiError>
where
  M: MembershipStore,
  A: AuditStore,
{
  Ok(Json(service.list_segments().await?))
}

// ─── Create ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub slug:              String,
  #[serde(default)]
  pub auto_join_percent: i64,
}

#[derive(Debug, Serialize)]
pub struct CreatedBody {
  pub id:          Uuid,
  pub slug:        String,
  pub auto_joined: Vec<UserId>,
}

/// `POST /segments`: returns 201 with the new segment id.
pub async fn create<M, A>(
  State(service): State<Arc<SegmentService<M, A>>>,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  M: MembershipStore,
  A: AuditStore,
{
  let created = service
    .create_segment(body.slug, body.auto_join_percent)
    .await?;
  Ok((
    StatusCode::CREATED,
    Json(CreatedBody {
      id:          created.segment.segment_id,
      slug:        created.segment.slug,
      auto_joined: created.auto_joined,
    }),
  ))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// `DELETE /segments/{slug}`
pub async fn delete_one<M, A>(
  State(service): State<Arc<SegmentService<M, A>>>,
  Path(slug): Path<String>,
) -> Result<StatusCode, ApiError>
where
  M: MembershipStore,
  A: AuditStore,
{
  service.delete_segment(&slug).await?;
  Ok(StatusCode::NO_CONTENT)
}
