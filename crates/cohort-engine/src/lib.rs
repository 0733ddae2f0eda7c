//! The membership and audit engine.
//!
//! Every component here is generic over the storage contracts in
//! [`cohort_core::store`] and receives its stores at construction. Nothing
//! reaches for a global handle.
//!
//! Membership writes always come before the matching history write, and the
//! two are separate store calls. When the second fails the first stays
//! committed; each component documents what that leaves behind.

pub mod audit;
pub mod membership;
pub mod registry;
pub mod report;
pub mod sampler;
pub mod service;
pub mod sweeper;

pub use cohort_core::{Error, Result};
pub use service::SegmentService;
pub use sweeper::ExpirationSweeper;

#[cfg(test)]
mod fake;
#[cfg(test)]
mod tests;
