//! Expiration sweeper: evicts expired memberships on a fixed interval.
//!
//! Sweeper behavior:
//! - Deletion of expired rows is one atomic store call
//! - History is written afterwards, one `remove` batch per affected user
//! - A crash or failure between the two leaves the eviction in place with no
//!   history for it; this is logged, never compensated
//! - Sweeps never overlap: missed ticks are skipped, and a sweep requested
//!   while another is running returns `None`. Sweepers built by the same
//!   [`crate::SegmentService`] share one lock

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use cohort_core::{
  Error, Result,
  history::Operation,
  membership::UserId,
  store::{AuditStore, MembershipStore},
};
use tokio::{
  sync::{Mutex, watch},
  time::{MissedTickBehavior, interval},
};
use tracing::{debug, error, info, warn};

use crate::audit::AuditLog;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Slugs evicted by one sweep, per user.
pub type SweepReport = BTreeMap<UserId, Vec<String>>;

/// Periodically deletes memberships whose expiration has passed.
pub struct ExpirationSweeper<M, A> {
  store:    Arc<M>,
  audit:    AuditLog<A>,
  interval: Duration,
  /// Held for the duration of a sweep; may be shared between sweepers.
  running:  Arc<Mutex<()>>,
}

impl<M, A> ExpirationSweeper<M, A>
where
  M: MembershipStore,
  A: AuditStore,
{
  pub fn new(store: Arc<M>, audit: AuditLog<A>) -> Self {
    Self::with_lock(store, audit, Arc::new(Mutex::new(())))
  }

  /// A sweeper that skips while any other holder of `running` is sweeping.
  pub(crate) fn with_lock(store: Arc<M>, audit: AuditLog<A>, running: Arc<Mutex<()>>) -> Self {
    Self {
      store,
      audit,
      interval: DEFAULT_SWEEP_INTERVAL,
      running,
    }
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn interval(&self) -> Duration { self.interval }

  /// Run one sweep now.
  pub async fn sweep(&self) -> Result<Option<SweepReport>> {
    self.sweep_at(Utc::now()).await
  }

  /// Run one sweep treating `now` as the current time.
  ///
  /// Returns `None` if another sweep is in progress. On a failed history
  /// write the sweep stops and returns the error; memberships already
  /// deleted stay deleted.
  pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<Option<SweepReport>> {
    let Ok(_guard) = self.running.try_lock() else {
      debug!("previous sweep still running, skipping");
      return Ok(None);
    };

    let expired = self.store.delete_expired(now).await.map_err(Error::storage)?;
    if expired.is_empty() {
      return Ok(Some(SweepReport::new()));
    }

    let ids = expired.values().flatten().copied().collect();
    let slugs_by_id = match self.store.resolve_ids(ids).await {
      Ok(map) => map,
      Err(e) => {
        warn!(
          users = expired.len(),
          error = %e,
          "expired memberships deleted but their slugs could not be resolved; history not recorded"
        );
        return Err(Error::storage(e));
      }
    };

    let mut report = SweepReport::new();
    for (user_id, segment_ids) in expired {
      let slugs: Vec<String> = segment_ids
        .iter()
        .filter_map(|id| slugs_by_id.get(id).cloned())
        .collect();
      if slugs.len() < segment_ids.len() {
        warn!(
          user_id,
          missing = segment_ids.len() - slugs.len(),
          "expired memberships reference deleted segments; history not recorded for them"
        );
      }

      if let Err(e) = self.audit.record_batch(user_id, &slugs, Operation::Remove).await {
        warn!(
          user_id,
          slugs = ?slugs,
          error = %e,
          "expired memberships deleted but removal history was not recorded"
        );
        return Err(e);
      }
      report.insert(user_id, slugs);
    }

    Ok(Some(report))
  }

  /// Sweep every interval until `shutdown` changes or its sender is dropped.
  ///
  /// A sweep in progress when shutdown arrives runs to completion first.
  pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_secs = self.interval.as_secs(), "expiration sweeper started");

    loop {
      tokio::select! {
        _ = ticker.tick() => {
          match self.sweep().await {
            Ok(Some(report)) if !report.is_empty() => {
              let evicted: usize = report.values().map(Vec::len).sum();
              info!(users = report.len(), evicted, "evicted expired memberships");
            }
            Ok(_) => debug!("sweep found nothing to evict"),
            Err(e) => error!(error = %e, "expiration sweep failed"),
          }
        }
        _ = shutdown.changed() => {
          info!("expiration sweeper stopping");
          break;
        }
      }
    }
  }
}

impl<M, A> ExpirationSweeper<M, A>
where
  M: MembershipStore + 'static,
  A: AuditStore + 'static,
{
  /// Spawn [`Self::run`] as a background task.
  pub fn start(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { self.run(shutdown).await })
  }
}
