//! Core types and trait definitions for the Cohort segmentation service.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod error;
pub mod history;
pub mod membership;
pub mod segment;
pub mod store;

pub use error::{Error, Result};
