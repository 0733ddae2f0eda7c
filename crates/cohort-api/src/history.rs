//! Handler for `GET /users/{user_id}/history`.
//!
//! Serves the month's report as a `text/csv` attachment.

use std::sync::Arc;

use axum::{
  extract::{Path, Query, State},
  http::header,
  response::IntoResponse,
};
use cohort_core::{
  membership::UserId,
  store::{AuditStore, MembershipStore},
};
use cohort_engine::SegmentService;
use serde::Deserialize;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
  pub year:  i32,
  pub month: u32,
}

/// `GET /users/{user_id}/history?year=YYYY&month=M`
pub async fn report<M, A>(
  State(service): State<Arc<SegmentService<M, A>>>,
  Path(user_id): Path<UserId>,
  Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError>
where
  M: MembershipStore,
  A: AuditStore,
{
  let report = service
    .history_report(user_id, params.year, params.month)
    .await?;
  let disposition = format!("attachment; filename=\"{}\"", report.file_name);
  Ok((
    [
      (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_owned()),
      (header::CONTENT_DISPOSITION, disposition),
    ],
    report.body,
  ))
}
