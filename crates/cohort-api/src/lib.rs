//! JSON REST API for Cohort.
//!
//! Exposes an axum [`Router`] backed by a [`SegmentService`] over any pair of
//! stores. Auth, TLS, timeouts and transport concerns are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .merge(cohort_api::api_router(service.clone()))
//! ```

pub mod error;
pub mod history;
pub mod segments;
pub mod users;

use std::sync::Arc;

use axum::{
  Router,
  routing::{delete, get},
};
use cohort_core::store::{AuditStore, MembershipStore};
use cohort_engine::SegmentService;

pub use error::ApiError;

/// Build a fully-materialised API router for `service`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<M, A>(service: Arc<SegmentService<M, A>>) -> Router<()>
where
  M: MembershipStore + 'static,
  A: AuditStore + 'static,
{
  Router::new()
    // Segments
    .route("/segments", get(segments::list::<M, A>).post(segments::create::<M, A>))
    .route("/segments/{slug}", delete(segments::delete_one::<M, A>))
    // Users
    .route(
      "/users/{user_id}/segments",
      get(users::active::<M, A>).post(users::execute::<M, A>),
    )
    .route("/users/{user_id}/history", get(history::report::<M, A>))
    .with_state(service)
}
