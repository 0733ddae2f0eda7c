//! Engine tests against an in-memory SQLite store, with failures injected
//! through [`FlakyStore`].

use std::{collections::BTreeSet, sync::Arc, sync::atomic::Ordering, time::Duration as StdDuration};

use chrono::{Duration, TimeZone as _, Utc};
use cohort_core::{
  Error,
  history::{HistoryEntry, Operation, ReportPeriod},
  membership::UserId,
  store::{AuditStore, MembershipStore},
};
use tokio::sync::watch;

use crate::{SegmentService, fake::FlakyStore, membership::SegmentAction};

async fn setup() -> (Arc<FlakyStore>, SegmentService<FlakyStore, FlakyStore>) {
  let store = Arc::new(FlakyStore::new().await);
  let service = SegmentService::new(Arc::clone(&store), Arc::clone(&store));
  (store, service)
}

fn slugs(xs: &[&str]) -> Vec<String> { xs.iter().map(|s| s.to_string()).collect() }

/// Months a test's writes can fall in: the current one and, if a month
/// boundary passed during the last hour, the one before it.
fn recent_periods() -> Vec<ReportPeriod> {
  let now = Utc::now();
  let current = ReportPeriod::containing(now);
  let earlier = ReportPeriod::containing(now - Duration::hours(1));
  if earlier == current { vec![current] } else { vec![earlier, current] }
}

/// Recent history for `user_id`, oldest first.
async fn history(store: &FlakyStore, user_id: UserId) -> Vec<HistoryEntry> {
  let mut entries = Vec::new();
  for period in recent_periods() {
    entries.extend(store.query_history(user_id, period).await.unwrap());
  }
  entries
}

async fn count(store: &FlakyStore, user_id: UserId, slug: &str, op: Operation) -> usize {
  history(store, user_id)
    .await
    .iter()
    .filter(|e| e.segment_slug == slug && e.operation == op)
    .count()
}

/// Make `users` known to the sampler by giving each a membership in `seed`.
async fn seed_users(service: &SegmentService<FlakyStore, FlakyStore>, users: impl IntoIterator<Item = UserId>) {
  service.create_segment("seed".into(), 0).await.unwrap();
  for u in users {
    service.add_user_to_segments(u, slugs(&["seed"]), None).await.unwrap();
  }
}

// ─── Segment registry ────────────────────────────────────────────────────────

#[tokio::test]
async fn create_twice_conflicts() {
  let (_, service) = setup().await;

  let created = service.create_segment("s".into(), 0).await.unwrap();
  assert_eq!(created.segment.slug, "s");
  assert!(created.auto_joined.is_empty());

  let err = service.create_segment("s".into(), 50).await.unwrap_err();
  assert!(matches!(err, Error::Conflict(ref slug) if slug == "s"));
}

#[tokio::test]
async fn create_rejects_bad_input() {
  let (_, service) = setup().await;

  for slug in ["", "   ", "has space", "semi;colon"] {
    let err = service.create_segment(slug.into(), 0).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "slug {slug:?}");
  }
  for percent in [-1, 101] {
    let err = service.create_segment("ok".into(), percent).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "percent {percent}");
  }
  assert!(service.list_segments().await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_unknown_is_not_found() {
  let (_, service) = setup().await;
  let err = service.delete_segment("ghost").await.unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn delete_empty_segment_writes_no_history() {
  let (store, service) = setup().await;
  service.create_segment("lonely".into(), 0).await.unwrap();

  let evicted = service.delete_segment("lonely").await.unwrap();
  assert!(evicted.is_empty());
  assert_eq!(store.history_writes(), 0);
  assert!(service.list_segments().await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_skips_expired_members_in_history() {
  let (store, service) = setup().await;
  service.create_segment("promo".into(), 0).await.unwrap();
  service.add_user_to_segments(1, slugs(&["promo"]), None).await.unwrap();
  service
    .add_user_to_segments(2, slugs(&["promo"]), Some(Utc::now() - Duration::seconds(5)))
    .await
    .unwrap();

  let evicted = service.delete_segment("promo").await.unwrap();
  assert_eq!(evicted, vec![1]);
  assert_eq!(count(&store, 1, "promo", Operation::Remove).await, 1);
  assert_eq!(count(&store, 2, "promo", Operation::Remove).await, 0);
}

// ─── Auto-join ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn vip_half_of_four_then_delete() {
  let (store, service) = setup().await;
  seed_users(&service, 1..=4).await;

  let created = service.create_segment("vip".into(), 50).await.unwrap();
  let joined: BTreeSet<UserId> = created.auto_joined.iter().copied().collect();
  assert_eq!(joined.len(), 2);
  assert!(joined.iter().all(|u| (1..=4).contains(u)));

  let mut adds = 0;
  for u in 1..=4 {
    let active = service.active_segments(u).await.unwrap();
    assert_eq!(active.contains(&"vip".to_string()), joined.contains(&u));
    adds += count(&store, u, "vip", Operation::Add).await;
  }
  assert_eq!(adds, 2);

  let mut evicted = service.delete_segment("vip").await.unwrap();
  evicted.sort_unstable();
  assert_eq!(evicted, joined.iter().copied().collect::<Vec<_>>());

  let mut removes = 0;
  for u in 1..=4 {
    assert!(!service.active_segments(u).await.unwrap().contains(&"vip".to_string()));
    removes += count(&store, u, "vip", Operation::Remove).await;
  }
  assert_eq!(removes, 2);
}

#[tokio::test]
async fn auto_join_sizes() {
  let (_, service) = setup().await;
  seed_users(&service, 1..=10).await;

  assert_eq!(service.create_segment("all".into(), 100).await.unwrap().auto_joined.len(), 10);
  assert_eq!(service.create_segment("third".into(), 33).await.unwrap().auto_joined.len(), 3);
  assert!(service.create_segment("none".into(), 0).await.unwrap().auto_joined.is_empty());
}

#[tokio::test]
async fn auto_join_without_users_is_empty() {
  let (store, service) = setup().await;
  let created = service.create_segment("early".into(), 100).await.unwrap();
  assert!(created.auto_joined.is_empty());
  assert_eq!(store.history_writes(), 0);
}

// ─── Membership engine ───────────────────────────────────────────────────────

#[tokio::test]
async fn add_then_remove() {
  let (store, service) = setup().await;
  service.create_segment("s".into(), 0).await.unwrap();

  let added = service.add_user_to_segments(1, slugs(&["s"]), None).await.unwrap();
  assert_eq!(added, slugs(&["s"]));
  assert_eq!(service.active_segments(1).await.unwrap(), slugs(&["s"]));

  let removed = service.remove_user_from_segments(1, slugs(&["s"])).await.unwrap();
  assert_eq!(removed, slugs(&["s"]));
  assert!(service.active_segments(1).await.unwrap().is_empty());

  let ops: Vec<_> = history(&store, 1).await.into_iter().map(|e| e.operation).collect();
  assert_eq!(ops, [Operation::Add, Operation::Remove]);
}

#[tokio::test]
async fn removing_unassigned_slug_is_silent() {
  let (store, service) = setup().await;
  service.create_segment("s".into(), 0).await.unwrap();

  let removed = service.remove_user_from_segments(1, slugs(&["s"])).await.unwrap();
  assert!(removed.is_empty());
  assert_eq!(store.history_writes(), 0);
}

#[tokio::test]
async fn readd_records_another_add() {
  let (store, service) = setup().await;
  service.create_segment("s".into(), 0).await.unwrap();

  service.add_user_to_segments(1, slugs(&["s"]), None).await.unwrap();
  service
    .add_user_to_segments(1, slugs(&["s"]), Some(Utc::now() + Duration::days(1)))
    .await
    .unwrap();
  assert_eq!(count(&store, 1, "s", Operation::Add).await, 2);
}

#[tokio::test]
async fn empty_or_unknown_slugs_write_nothing() {
  let (store, service) = setup().await;

  assert!(service.add_user_to_segments(1, vec![], None).await.unwrap().is_empty());
  assert!(service.remove_user_from_segments(1, vec![]).await.unwrap().is_empty());

  let err = service.add_user_to_segments(1, slugs(&["ghost"]), None).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
  let err = service.remove_user_from_segments(1, slugs(&["ghost"])).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));

  assert_eq!(store.membership_writes(), 0);
  assert_eq!(store.history_writes(), 0);
}

#[tokio::test]
async fn action_with_fake_slug_mutates_nothing() {
  let (store, service) = setup().await;
  service.create_segment("real".into(), 0).await.unwrap();

  let err = service
    .execute_user_segment_action(SegmentAction {
      user_id: 1,
      add: slugs(&["real", "fake"]),
      remove: slugs(&["gone"]),
      ..SegmentAction::default()
    })
    .await
    .unwrap_err();

  let Error::Validation(msg) = err else { panic!("expected validation error") };
  assert!(msg.contains("fake") && msg.contains("gone"), "{msg}");
  assert_eq!(store.membership_writes(), 0);
  assert_eq!(store.history_writes(), 0);
  assert!(service.active_segments(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn action_adds_then_removes() {
  let (_, service) = setup().await;
  for s in ["a", "b", "c"] {
    service.create_segment(s.into(), 0).await.unwrap();
  }
  service.add_user_to_segments(1, slugs(&["c"]), None).await.unwrap();

  let outcome = service
    .execute_user_segment_action(SegmentAction {
      user_id: 1,
      add: slugs(&["a", "b"]),
      remove: slugs(&["b", "c"]),
      expiration: Some(Utc::now() + Duration::hours(1)),
    })
    .await
    .unwrap();

  assert_eq!(outcome.added, slugs(&["a", "b"]));
  assert_eq!(outcome.removed, slugs(&["b", "c"]));
  assert_eq!(service.active_segments(1).await.unwrap(), slugs(&["a"]));
}

#[tokio::test]
async fn failed_removal_keeps_additions() {
  let (store, service) = setup().await;
  service.create_segment("a".into(), 0).await.unwrap();
  service.create_segment("b".into(), 0).await.unwrap();
  service.add_user_to_segments(1, slugs(&["b"]), None).await.unwrap();

  store.fail_delete_memberships.store(true, Ordering::SeqCst);
  let err = service
    .execute_user_segment_action(SegmentAction {
      user_id: 1,
      add: slugs(&["a"]),
      remove: slugs(&["b"]),
      ..SegmentAction::default()
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Storage(_)));

  assert_eq!(service.active_segments(1).await.unwrap(), slugs(&["a", "b"]));
  assert_eq!(count(&store, 1, "a", Operation::Add).await, 1);
  assert_eq!(count(&store, 1, "b", Operation::Remove).await, 0);
}

#[tokio::test]
async fn failed_history_keeps_membership() {
  let (store, service) = setup().await;
  service.create_segment("s".into(), 0).await.unwrap();

  store.fail_append_history.store(true, Ordering::SeqCst);
  let err = service.add_user_to_segments(1, slugs(&["s"]), None).await.unwrap_err();
  assert!(matches!(err, Error::Storage(_)));
  assert_eq!(service.active_segments(1).await.unwrap(), slugs(&["s"]));
}

#[tokio::test]
async fn expiration_past_year_9999_is_rejected_before_writing() {
  let (store, service) = setup().await;
  service.create_segment("s".into(), 0).await.unwrap();
  let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();

  let err = service
    .execute_user_segment_action(SegmentAction {
      user_id: 1,
      add: slugs(&["s"]),
      expiration: Some(far),
      ..SegmentAction::default()
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(_)));

  let err = service.add_user_to_segments(1, slugs(&["s"]), Some(far)).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));

  assert_eq!(store.membership_writes(), 0);
  assert_eq!(store.history_writes(), 0);
}

#[tokio::test]
async fn latest_storable_expiration_stays_active() {
  let (_, service) = setup().await;
  service.create_segment("s".into(), 0).await.unwrap();
  let last = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();

  service
    .execute_user_segment_action(SegmentAction {
      user_id: 1,
      add: slugs(&["s"]),
      expiration: Some(last),
      ..SegmentAction::default()
    })
    .await
    .unwrap();

  assert_eq!(service.active_segments(1).await.unwrap(), slugs(&["s"]));
  assert!(service.sweeper().sweep().await.unwrap().unwrap().is_empty());
  assert_eq!(service.active_segments(1).await.unwrap(), slugs(&["s"]));
}

#[tokio::test]
async fn action_validation() {
  let (_, service) = setup().await;
  service.create_segment("s".into(), 0).await.unwrap();

  let cases = [
    SegmentAction { user_id: 0, add: slugs(&["s"]), ..SegmentAction::default() },
    SegmentAction { user_id: 1, ..SegmentAction::default() },
    SegmentAction {
      user_id: 1,
      add: slugs(&["s"]),
      expiration: Some(Utc::now() - Duration::minutes(1)),
      ..SegmentAction::default()
    },
  ];
  for action in cases {
    let err = service.execute_user_segment_action(action).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }
}

// ─── Expiration ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn expiration_is_exclusive_and_swept_once() {
  let (store, service) = setup().await;
  service.create_segment("trial".into(), 0).await.unwrap();
  let t = Utc::now() + Duration::hours(1);
  service.add_user_to_segments(3, slugs(&["trial"]), Some(t)).await.unwrap();

  let before = store.active_segments(3, t - Duration::seconds(1)).await.unwrap();
  assert_eq!(before, slugs(&["trial"]));
  assert!(store.active_segments(3, t).await.unwrap().is_empty());

  let sweeper = service.sweeper();
  let first = sweeper.sweep_at(t).await.unwrap().unwrap();
  assert_eq!(first.get(&3), Some(&slugs(&["trial"])));
  let second = sweeper.sweep_at(t + Duration::seconds(1)).await.unwrap().unwrap();
  assert!(second.is_empty());
  assert_eq!(count(&store, 3, "trial", Operation::Remove).await, 1);
}

#[tokio::test]
async fn beta_sweep_for_user_seven() {
  let (store, service) = setup().await;
  service.create_segment("beta".into(), 0).await.unwrap();
  service
    .add_user_to_segments(7, slugs(&["beta"]), Some(Utc::now() - Duration::seconds(1)))
    .await
    .unwrap();

  let report = service.sweeper().sweep().await.unwrap().unwrap();
  assert_eq!(report.len(), 1);
  assert_eq!(report[&7], slugs(&["beta"]));

  assert!(service.active_segments(7).await.unwrap().is_empty());
  assert_eq!(count(&store, 7, "beta", Operation::Remove).await, 1);
}

#[tokio::test]
async fn sweep_leaves_permanent_memberships() {
  let (_, service) = setup().await;
  service.create_segment("forever".into(), 0).await.unwrap();
  service.add_user_to_segments(1, slugs(&["forever"]), None).await.unwrap();

  let report = service.sweeper().sweep_at(Utc::now() + Duration::days(365)).await.unwrap().unwrap();
  assert!(report.is_empty());
  assert_eq!(service.active_segments(1).await.unwrap(), slugs(&["forever"]));
}

#[tokio::test]
async fn sweep_history_failure_keeps_deletion() {
  let (store, service) = setup().await;
  service.create_segment("beta".into(), 0).await.unwrap();
  service
    .add_user_to_segments(7, slugs(&["beta"]), Some(Utc::now() - Duration::seconds(1)))
    .await
    .unwrap();

  store.fail_append_history.store(true, Ordering::SeqCst);
  let sweeper = service.sweeper();
  assert!(matches!(sweeper.sweep().await, Err(Error::Storage(_))));

  store.fail_append_history.store(false, Ordering::SeqCst);
  assert!(sweeper.sweep().await.unwrap().unwrap().is_empty());
  assert!(service.active_segments(7).await.unwrap().is_empty());
  assert_eq!(count(&store, 7, "beta", Operation::Remove).await, 0);
}

#[tokio::test]
async fn overlapping_sweeps_from_one_service_skip() {
  let (store, service) = setup().await;
  service.create_segment("beta".into(), 0).await.unwrap();
  service
    .add_user_to_segments(7, slugs(&["beta"]), Some(Utc::now() - Duration::seconds(1)))
    .await
    .unwrap();

  store.hold_delete_expired.store(true, Ordering::SeqCst);
  let first = service.sweeper();
  let running = tokio::spawn(async move { first.sweep().await });
  store.expired_entered.notified().await;

  assert!(service.sweeper().sweep().await.unwrap().is_none());

  store.expired_release.notify_one();
  let report = running.await.unwrap().unwrap().unwrap();
  assert_eq!(report[&7], slugs(&["beta"]));
  assert_eq!(count(&store, 7, "beta", Operation::Remove).await, 1);

  store.hold_delete_expired.store(false, Ordering::SeqCst);
  assert!(service.sweeper().sweep().await.unwrap().unwrap().is_empty());
}

#[tokio::test]
async fn sweeper_stops_on_shutdown() {
  let (_, service) = setup().await;
  let (tx, rx) = watch::channel(false);

  let handle = service
    .sweeper()
    .with_interval(StdDuration::from_millis(10))
    .start(rx);
  tokio::time::sleep(StdDuration::from_millis(30)).await;
  tx.send(true).unwrap();

  tokio::time::timeout(StdDuration::from_secs(5), handle)
    .await
    .expect("sweeper did not stop")
    .unwrap();
}

// ─── Reports ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_report_renders_month() {
  let (_, service) = setup().await;
  service.create_segment("s".into(), 0).await.unwrap();
  service.add_user_to_segments(5, slugs(&["s"]), None).await.unwrap();

  let mut reports = Vec::new();
  for period in recent_periods() {
    match service.history_report(5, period.year(), period.month()).await {
      Ok(report) => reports.push(report),
      Err(Error::NoData) => {}
      Err(e) => panic!("unexpected error: {e}"),
    }
  }
  assert_eq!(reports.len(), 1);
  let report = &reports[0];
  assert!(report.body.starts_with("5;s;add;"), "{}", report.body);
  assert!(report.body.ends_with('\n'));
  assert_eq!(report.body.lines().count(), 1);
  assert!(report.file_name.starts_with("history_5_"));
}

#[tokio::test]
async fn history_report_errors() {
  let (_, service) = setup().await;

  assert!(matches!(service.history_report(5, 2020, 1).await, Err(Error::NoData)));
  assert!(matches!(service.history_report(5, 2020, 13).await, Err(Error::Validation(_))));
  assert!(matches!(service.history_report(5, 2020, 0).await, Err(Error::Validation(_))));
}
