//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use cohort_core::Error as EngineError;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Engine(#[from] EngineError),
}

impl ApiError {
  fn status(&self) -> StatusCode {
    let ApiError::Engine(e) = self;
    match e {
      EngineError::Validation(_) => StatusCode::BAD_REQUEST,
      EngineError::Conflict(_) => StatusCode::CONFLICT,
      EngineError::NotFound(_) | EngineError::NoData => StatusCode::NOT_FOUND,
      EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    let message = match &self {
      ApiError::Engine(EngineError::Storage(e)) => {
        tracing::error!(error = %e, "storage failure");
        "internal server error".to_owned()
      }
      ApiError::Engine(e) => e.to_string(),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
