//! [`AutoJoinSampler`] — picks the users a new segment starts with.

use std::sync::Arc;

use cohort_core::{Error, Result, membership::UserId, store::MembershipStore};
use rand::{Rng, seq::SliceRandom as _};
use tracing::debug;

/// Draws a uniform random subset of all users the store has ever seen.
pub struct AutoJoinSampler<M> {
  store: Arc<M>,
}

impl<M: MembershipStore> AutoJoinSampler<M> {
  pub fn new(store: Arc<M>) -> Self { Self { store } }

  /// `percent` of the known users, rounded down, without replacement.
  ///
  /// `percent` must already be validated to `0..=100`. Every call uses fresh
  /// thread-local randomness, so only the size of the result is stable.
  pub async fn sample_users(&self, percent: u8) -> Result<Vec<UserId>> {
    if percent == 0 {
      return Ok(Vec::new());
    }

    let known = self.store.list_known_users().await.map_err(Error::storage)?;
    let population = known.len();
    let sampled = sample(known.into_iter().collect(), percent, &mut rand::rng());

    debug!(percent, population, sampled = sampled.len(), "sampled auto-join users");
    Ok(sampled)
  }
}

/// Number of users `percent` selects out of `population`.
pub fn sample_size(population: usize, percent: u8) -> usize {
  population * usize::from(percent.min(100)) / 100
}

/// Shuffle `users` and keep the first [`sample_size`] of them, sorted.
pub fn sample<R>(mut users: Vec<UserId>, percent: u8, rng: &mut R) -> Vec<UserId>
where
  R: Rng + ?Sized,
{
  let take = sample_size(users.len(), percent);
  users.shuffle(rng);
  users.truncate(take);
  users.sort_unstable();
  users
}
