//! SQLite backend for the Cohort segmentation service.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. [`SqliteStore`] implements both
//! [`cohort_core::store::MembershipStore`] and
//! [`cohort_core::store::AuditStore`] over one connection.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
