//! [`SqliteStore`] — the SQLite implementation of [`MembershipStore`] and
//! [`AuditStore`].

use std::{
  collections::{BTreeMap, BTreeSet},
  path::Path,
};

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, ffi};
use uuid::Uuid;

use cohort_core::{
  history::{HistoryEntry, ReportPeriod},
  membership::{DeletedSegment, ExpiredMemberships, SlugResolution, UserId},
  segment::Segment,
  store::{AuditStore, MembershipStore},
};

use crate::{
  encode::{RawHistoryEntry, RawSegment, decode_dt, decode_uuid, encode_dt, encode_uuid},
  schema::SCHEMA,
  Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Cohort store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted, and every
/// call is serialised onto the connection's thread.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

/// `?1, ?2, ..., ?n` for a dynamic `IN (...)` list.
fn placeholders(n: usize) -> String {
  (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(e, _)
      if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
  )
}

// ─── MembershipStore impl ────────────────────────────────────────────────────

impl MembershipStore for SqliteStore {
  type Error = crate::Error;

  // ── Segments ──────────────────────────────────────────────────────────────

  async fn create_segment(&self, slug: String) -> Result<Option<Segment>> {
    let segment = Segment {
      segment_id: Uuid::new_v4(),
      slug,
      created_at: Utc::now(),
    };

    let id_str   = encode_uuid(segment.segment_id);
    let slug_str = segment.slug.clone();
    let at_str   = encode_dt(segment.created_at);

    let inserted: bool = self
      .conn
      .call(move |conn| {
        match conn.execute(
          "INSERT INTO segments (segment_id, slug, created_at) VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, slug_str, at_str],
        ) {
          Ok(_) => Ok(true),
          Err(e) if is_unique_violation(&e) => Ok(false),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    Ok(inserted.then_some(segment))
  }

  async fn delete_segment(
    &self,
    slug: String,
    now:  DateTime<Utc>,
  ) -> Result<Option<DeletedSegment>> {
    type Removed = (RawSegment, Vec<(i64, Option<String>)>);

    let removed: Option<Removed> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let raw = tx
          .query_row(
            "SELECT segment_id, slug, created_at FROM segments WHERE slug = ?1",
            rusqlite::params![slug],
            RawSegment::from_row,
          )
          .optional()?;
        let Some(raw) = raw else {
          return Ok(None);
        };

        let members = {
          let mut stmt = tx.prepare(
            "DELETE FROM memberships WHERE segment_id = ?1
             RETURNING user_id, expiration_time",
          )?;
          stmt
            .query_map(rusqlite::params![raw.segment_id], |row| {
              Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        tx.execute(
          "DELETE FROM segments WHERE segment_id = ?1",
          rusqlite::params![raw.segment_id],
        )?;
        tx.commit()?;

        Ok(Some((raw, members)))
      })
      .await?;

    let Some((raw, members)) = removed else {
      return Ok(None);
    };

    let mut evicted_users = Vec::with_capacity(members.len());
    for (user_id, expiration) in members {
      let active = match expiration {
        Some(s) => decode_dt(&s)? > now,
        None    => true,
      };
      if active {
        evicted_users.push(user_id);
      }
    }
    evicted_users.sort_unstable();

    Ok(Some(DeletedSegment { segment: raw.into_segment()?, evicted_users }))
  }

  async fn list_segments(&self) -> Result<Vec<Segment>> {
    let raws: Vec<RawSegment> = self
      .conn
      .call(|conn| {
        let mut stmt = conn
          .prepare("SELECT segment_id, slug, created_at FROM segments ORDER BY slug")?;
        let rows = stmt
          .query_map([], RawSegment::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSegment::into_segment).collect()
  }

  async fn resolve_slugs(&self, slugs: Vec<String>) -> Result<SlugResolution> {
    if slugs.is_empty() {
      return Ok(SlugResolution::default());
    }

    let mut unique = slugs.clone();
    unique.sort();
    unique.dedup();

    let rows: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT slug, segment_id FROM segments WHERE slug IN ({})",
          placeholders(unique.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(unique.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        Ok(rows)
      })
      .await?;

    let found = rows
      .into_iter()
      .map(|(slug, id)| decode_uuid(&id).map(|id| (slug, id)))
      .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(SlugResolution::new(&slugs, found))
  }

  async fn resolve_ids(&self, ids: Vec<Uuid>) -> Result<BTreeMap<Uuid, String>> {
    if ids.is_empty() {
      return Ok(BTreeMap::new());
    }

    let mut id_strs: Vec<String> = ids.into_iter().map(encode_uuid).collect();
    id_strs.sort();
    id_strs.dedup();

    let rows: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT segment_id, slug FROM segments WHERE segment_id IN ({})",
          placeholders(id_strs.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(id_strs.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(id, slug)| decode_uuid(&id).map(|id| (id, slug)))
      .collect()
  }

  // ── Memberships ───────────────────────────────────────────────────────────

  async fn upsert_memberships(
    &self,
    user_id:     UserId,
    segment_ids: Vec<Uuid>,
    expiration:  Option<DateTime<Utc>>,
  ) -> Result<Vec<Uuid>> {
    if segment_ids.is_empty() {
      return Ok(Vec::new());
    }

    let exp_str = expiration.map(encode_dt);

    let written = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut written = Vec::with_capacity(segment_ids.len());
        {
          // Selecting through `segments` skips ids deleted since they were
          // resolved instead of failing the whole batch on the foreign key.
          let mut stmt = tx.prepare(
            "INSERT INTO memberships (user_id, segment_id, expiration_time)
             SELECT ?1, segment_id, ?3 FROM segments WHERE segment_id = ?2
             ON CONFLICT (user_id, segment_id)
             DO UPDATE SET expiration_time = excluded.expiration_time",
          )?;
          for id in segment_ids {
            let changed = stmt.execute(rusqlite::params![
              user_id,
              encode_uuid(id),
              exp_str.as_deref(),
            ])?;
            if changed > 0 {
              written.push(id);
            }
          }
        }
        tx.commit()?;
        Ok(written)
      })
      .await?;

    Ok(written)
  }

  async fn delete_memberships(
    &self,
    user_id:     UserId,
    segment_ids: Vec<Uuid>,
  ) -> Result<Vec<Uuid>> {
    if segment_ids.is_empty() {
      return Ok(Vec::new());
    }

    let removed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut removed = Vec::with_capacity(segment_ids.len());
        {
          let mut stmt = tx.prepare(
            "DELETE FROM memberships WHERE user_id = ?1 AND segment_id = ?2",
          )?;
          for id in segment_ids {
            if stmt.execute(rusqlite::params![user_id, encode_uuid(id)])? > 0 {
              removed.push(id);
            }
          }
        }
        tx.commit()?;
        Ok(removed)
      })
      .await?;

    Ok(removed)
  }

  async fn add_users_to_segment(
    &self,
    segment_id: Uuid,
    user_ids:   Vec<UserId>,
  ) -> Result<Vec<UserId>> {
    if user_ids.is_empty() {
      return Ok(Vec::new());
    }

    let id_str = encode_uuid(segment_id);

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(user_ids.len());
        {
          let mut stmt = tx.prepare(
            "INSERT INTO memberships (user_id, segment_id, expiration_time)
             SELECT ?1, segment_id, NULL FROM segments WHERE segment_id = ?2
             ON CONFLICT (user_id, segment_id) DO NOTHING",
          )?;
          for user_id in user_ids {
            if stmt.execute(rusqlite::params![user_id, id_str])? > 0 {
              inserted.push(user_id);
            }
          }
        }
        tx.commit()?;
        Ok(inserted)
      })
      .await?;

    Ok(inserted)
  }

  async fn delete_expired(&self, now: DateTime<Utc>) -> Result<ExpiredMemberships> {
    let now_str = encode_dt(now);

    let rows: Vec<(i64, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "DELETE FROM memberships
           WHERE expiration_time IS NOT NULL AND expiration_time <= ?1
           RETURNING user_id, segment_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![now_str], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<(i64, String)>>>()?;
        Ok(rows)
      })
      .await?;

    let mut expired = ExpiredMemberships::new();
    for (user_id, segment_id) in rows {
      expired.entry(user_id).or_default().push(decode_uuid(&segment_id)?);
    }
    Ok(expired)
  }

  async fn list_known_users(&self) -> Result<BTreeSet<UserId>> {
    let users: Vec<i64> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT user_id FROM memberships UNION SELECT user_id FROM history",
        )?;
        let rows = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(users.into_iter().collect())
  }

  async fn active_segments(&self, user_id: UserId, at: DateTime<Utc>) -> Result<Vec<String>> {
    let at_str = encode_dt(at);

    let slugs = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT s.slug
           FROM memberships m
           JOIN segments s ON s.segment_id = m.segment_id
           WHERE m.user_id = ?1
             AND (m.expiration_time IS NULL OR m.expiration_time > ?2)
           ORDER BY s.slug",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![user_id, at_str], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(slugs)
  }
}

// ─── AuditStore impl ─────────────────────────────────────────────────────────

impl AuditStore for SqliteStore {
  type Error = crate::Error;

  async fn append_history(&self, entries: Vec<HistoryEntry>) -> Result<()> {
    if entries.is_empty() {
      return Ok(());
    }

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO history (user_id, segment_slug, operation, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
          )?;
          for entry in &entries {
            stmt.execute(rusqlite::params![
              entry.user_id,
              entry.segment_slug,
              entry.operation.as_str(),
              encode_dt(entry.recorded_at),
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn query_history(
    &self,
    user_id: UserId,
    period:  ReportPeriod,
  ) -> Result<Vec<HistoryEntry>> {
    let (start, end) = period.bounds();
    let start_str = encode_dt(start);
    let end_str   = encode_dt(end);

    let raws: Vec<RawHistoryEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT user_id, segment_slug, operation, recorded_at
           FROM history
           WHERE user_id = ?1 AND recorded_at >= ?2 AND recorded_at < ?3
           ORDER BY recorded_at, history_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![user_id, start_str, end_str], |row| {
            Ok(RawHistoryEntry {
              user_id:      row.get(0)?,
              segment_slug: row.get(1)?,
              operation:    row.get(2)?,
              recorded_at:  row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHistoryEntry::into_entry).collect()
  }
}
