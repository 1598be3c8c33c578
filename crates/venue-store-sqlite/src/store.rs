//! [`SqliteStore`], the SQLite implementation of [`BookingStore`].

use std::{collections::HashMap, path::Path, time::Duration};

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use uuid::Uuid;

use venue_core::{
  capacity::CapacityConfig,
  reservation::{
    NewReservation, Reservation, ReservationQuery, ReservationStatus,
    StatusCounts, StatusUpdate,
  },
  resource::Resource,
  store::{
    BookingStore, ConfigOutcome, ReleaseOutcome, ReserveOutcome, UpdateOutcome,
  },
  subject::Subject,
};

use crate::{
  Error, Result,
  encode::{
    CONFIG_COLUMNS, RESERVATION_COLUMNS, RawConfig, RawReservation, RawSubject,
    decode_key, decode_status, decode_uuid, encode_dt, encode_uuid,
  },
  schema::{ACTIVE, SCHEMA},
};

/// How long a connection waits on a lock held by another process before
/// reporting `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Note written on reservations cancelled by orphan reconciliation, unless an
/// administrator already left one.
const ORPHAN_NOTE: &str = "cancelled: subject no longer exists";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A booking store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// Status decisions made inside a transaction, before the row is decoded.
enum Mutation {
  Missing,
  Rejected(ReservationStatus),
  Applied(RawReservation),
}

/// Outcome of the reserve transaction before decoding.
enum RawReserve {
  Unknown,
  Duplicate(String),
  Exceeded(u32),
  Reserved,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
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
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Registry lookup used by the store tests.
  #[cfg(test)]
  pub(crate) async fn subject_exists(&self, subject_id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(subject_id);

    let exists = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM subjects WHERE subject_id = ?1",
              rusqlite::params![id_str],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    Ok(exists)
  }
}

/// Read one reservation of `kind` by id.
fn read_reservation(
  conn: &rusqlite::Connection,
  id: &str,
  kind: &str,
) -> rusqlite::Result<Option<RawReservation>> {
  conn
    .query_row(
      &format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations
         WHERE reservation_id = ?1 AND kind = ?2"
      ),
      rusqlite::params![id, kind],
      RawReservation::from_row,
    )
    .optional()
}

/// Surface a decode failure from inside a connection closure.
fn decode_in_call<T>(r: Result<T>) -> tokio_rusqlite::Result<T> {
  r.map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))
}

// ─── BookingStore impl ───────────────────────────────────────────────────────

impl BookingStore for SqliteStore {
  type Error = Error;

  // ── Capacity configs ──────────────────────────────────────────────────────

  async fn put_config<R: Resource>(
    &self,
    config: CapacityConfig<R::ConfigKey>,
  ) -> Result<ConfigOutcome<R::ConfigKey>> {
    let kind        = R::KIND.as_ref().to_owned();
    let key_str     = config.key.to_string();
    let max_units   = config.max_units;
    let active      = config.active;
    let eligibility = config.eligibility.as_ref().to_owned();
    let closes_at   = config.closes_at.map(encode_dt);
    let label       = config.label.clone();
    let updated_at  = encode_dt(config.updated_at);

    let consumed: Option<u32> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let consumed: Option<u32> = tx.query_row(
          &format!(
            "SELECT MAX(total) FROM (
               SELECT SUM(units) AS total FROM reservations
               WHERE kind = ?1 AND config_key = ?2 AND {ACTIVE}
               GROUP BY resource_key
             )"
          ),
          rusqlite::params![kind, key_str],
          |r| r.get(0),
        )?;

        if let Some(consumed) = consumed
          && consumed > max_units
        {
          return Ok(Some(consumed));
        }

        tx.execute(
          "INSERT INTO capacity_configs (
             kind, config_key, max_units, active, eligibility,
             closes_at, label, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
           ON CONFLICT (kind, config_key) DO UPDATE SET
             max_units   = excluded.max_units,
             active      = excluded.active,
             eligibility = excluded.eligibility,
             closes_at   = excluded.closes_at,
             label       = excluded.label,
             updated_at  = excluded.updated_at",
          rusqlite::params![
            kind,
            key_str,
            max_units,
            active,
            eligibility,
            closes_at,
            label,
            updated_at,
          ],
        )?;
        tx.commit()?;
        Ok(None)
      })
      .await?;

    Ok(match consumed {
      Some(consumed) => ConfigOutcome::BelowConsumed { consumed },
      None => ConfigOutcome::Saved(config),
    })
  }

  async fn get_config<R: Resource>(
    &self,
    key: R::ConfigKey,
  ) -> Result<Option<CapacityConfig<R::ConfigKey>>> {
    let kind    = R::KIND.as_ref().to_owned();
    let key_str = key.to_string();

    let raw: Option<RawConfig> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {CONFIG_COLUMNS} FROM capacity_configs
                 WHERE kind = ?1 AND config_key = ?2"
              ),
              rusqlite::params![kind, key_str],
              RawConfig::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawConfig::into_config).transpose()
  }

  async fn list_configs<R: Resource>(
    &self,
  ) -> Result<Vec<CapacityConfig<R::ConfigKey>>> {
    let kind = R::KIND.as_ref().to_owned();

    let raws: Vec<RawConfig> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CONFIG_COLUMNS} FROM capacity_configs WHERE kind = ?1"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![kind], RawConfig::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut configs = raws
      .into_iter()
      .map(RawConfig::into_config)
      .collect::<Result<Vec<CapacityConfig<R::ConfigKey>>>>()?;
    configs.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(configs)
  }

  // ── Ledger ────────────────────────────────────────────────────────────────

  async fn consumed_units<R: Resource>(&self, key: R::Key) -> Result<u32> {
    let kind    = R::KIND.as_ref().to_owned();
    let key_str = key.to_string();

    let consumed = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &format!(
            "SELECT COALESCE(SUM(units), 0) FROM reservations
             WHERE kind = ?1 AND resource_key = ?2 AND {ACTIVE}"
          ),
          rusqlite::params![kind, key_str],
          |r| r.get::<_, u32>(0),
        )?)
      })
      .await?;
    Ok(consumed)
  }

  async fn consumed_units_many<R: Resource>(
    &self,
    keys: Vec<R::Key>,
  ) -> Result<HashMap<R::Key, u32>> {
    let kind     = R::KIND.as_ref().to_owned();
    let key_strs = keys.iter().map(ToString::to_string).collect::<Vec<_>>();

    let sums: Vec<u32> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let sums = {
          let mut stmt = tx.prepare(&format!(
            "SELECT COALESCE(SUM(units), 0) FROM reservations
             WHERE kind = ?1 AND resource_key = ?2 AND {ACTIVE}"
          ))?;
          key_strs
            .iter()
            .map(|k| stmt.query_row(rusqlite::params![kind, k], |r| r.get(0)))
            .collect::<rusqlite::Result<Vec<u32>>>()?
        };
        tx.commit()?;
        Ok(sums)
      })
      .await?;

    Ok(
      keys
        .into_iter()
        .zip(sums)
        .filter(|(_, sum)| *sum > 0)
        .collect(),
    )
  }

  async fn try_reserve<R: Resource>(
    &self,
    intent: NewReservation<R::Key>,
  ) -> Result<ReserveOutcome<R::Key>> {
    let kind           = R::KIND.as_ref().to_owned();
    let id_str         = encode_uuid(intent.id);
    let key_str        = intent.key.to_string();
    let config_key_str = R::config_key(&intent.key).to_string();
    let subject_str    = encode_uuid(intent.subject_id);
    let units          = intent.units;
    let status_str     = intent.status.as_ref().to_owned();
    let contact_name   = intent.contact.as_ref().map(|c| c.name.clone());
    let contact_phone  = intent.contact.as_ref().map(|c| c.phone.clone());
    let created_str    = encode_dt(intent.created_at);

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let config: Option<(u32, bool)> = tx
          .query_row(
            "SELECT max_units, active FROM capacity_configs
             WHERE kind = ?1 AND config_key = ?2",
            rusqlite::params![kind, config_key_str],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;
        let max_units = match config {
          Some((max_units, true)) => max_units,
          _ => return Ok(RawReserve::Unknown),
        };

        let existing: Option<String> = tx
          .query_row(
            &format!(
              "SELECT reservation_id FROM reservations
               WHERE kind = ?1 AND resource_key = ?2 AND subject_id = ?3
                 AND {ACTIVE}"
            ),
            rusqlite::params![kind, key_str, subject_str],
            |r| r.get(0),
          )
          .optional()?;
        if let Some(existing) = existing {
          return Ok(RawReserve::Duplicate(existing));
        }

        let consumed: u32 = tx.query_row(
          &format!(
            "SELECT COALESCE(SUM(units), 0) FROM reservations
             WHERE kind = ?1 AND resource_key = ?2 AND {ACTIVE}"
          ),
          rusqlite::params![kind, key_str],
          |r| r.get(0),
        )?;
        let available = max_units.saturating_sub(consumed);
        if units > available {
          return Ok(RawReserve::Exceeded(available));
        }

        tx.execute(
          "INSERT OR IGNORE INTO subjects (subject_id, registered_at)
           VALUES (?1, ?2)",
          rusqlite::params![subject_str, created_str],
        )?;
        tx.execute(
          "INSERT INTO reservations (
             reservation_id, kind, resource_key, config_key, subject_id,
             units, status, contact_name, contact_phone, notes,
             created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?10)",
          rusqlite::params![
            id_str,
            kind,
            key_str,
            config_key_str,
            subject_str,
            units,
            status_str,
            contact_name,
            contact_phone,
            created_str,
          ],
        )?;
        tx.commit()?;
        Ok(RawReserve::Reserved)
      })
      .await?;

    Ok(match raw {
      RawReserve::Unknown => ReserveOutcome::UnknownResource,
      RawReserve::Duplicate(existing) => ReserveOutcome::Duplicate {
        existing: decode_uuid(&existing)?,
      },
      RawReserve::Exceeded(available) => {
        ReserveOutcome::CapacityExceeded { available }
      }
      RawReserve::Reserved => ReserveOutcome::Reserved(Reservation {
        id:         intent.id,
        subject_id: intent.subject_id,
        kind:       R::KIND,
        key:        intent.key,
        units:      intent.units,
        status:     intent.status,
        contact:    intent.contact,
        notes:      None,
        created_at: intent.created_at,
        updated_at: intent.created_at,
      }),
    })
  }

  async fn release<R: Resource>(
    &self,
    id: Uuid,
    owner: Option<Uuid>,
    at: DateTime<Utc>,
  ) -> Result<ReleaseOutcome<R::Key>> {
    let kind      = R::KIND.as_ref().to_owned();
    let id_str    = encode_uuid(id);
    let owner_str = owner.map(encode_uuid);
    let at_str    = encode_dt(at);

    let mutation = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<(String, String)> = tx
          .query_row(
            "SELECT subject_id, status FROM reservations
             WHERE reservation_id = ?1 AND kind = ?2",
            rusqlite::params![id_str, kind],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;
        let Some((subject, status)) = current else {
          return Ok(Mutation::Missing);
        };
        if owner_str.as_ref().is_some_and(|o| *o != subject) {
          return Ok(Mutation::Missing);
        }

        let status = decode_in_call(decode_status(&status))?;
        if status == ReservationStatus::Cancelled || status.is_terminal() {
          return Ok(Mutation::Rejected(status));
        }

        tx.execute(
          "UPDATE reservations SET status = 'cancelled', updated_at = ?2
           WHERE reservation_id = ?1",
          rusqlite::params![id_str, at_str],
        )?;
        let row = read_reservation(&tx, &id_str, &kind)?
          .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        Ok(Mutation::Applied(row))
      })
      .await?;

    Ok(match mutation {
      Mutation::Missing => ReleaseOutcome::NotFound,
      Mutation::Rejected(ReservationStatus::Cancelled) => {
        ReleaseOutcome::AlreadyCancelled
      }
      Mutation::Rejected(status) => ReleaseOutcome::Immutable(status),
      Mutation::Applied(raw) => ReleaseOutcome::Released(raw.into_reservation()?),
    })
  }

  async fn update_status<R: Resource>(
    &self,
    id: Uuid,
    update: StatusUpdate,
    at: DateTime<Utc>,
  ) -> Result<UpdateOutcome<R::Key>> {
    let kind   = R::KIND.as_ref().to_owned();
    let id_str = encode_uuid(id);
    let at_str = encode_dt(at);

    let mutation = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<String> = tx
          .query_row(
            "SELECT status FROM reservations
             WHERE reservation_id = ?1 AND kind = ?2",
            rusqlite::params![id_str, kind],
            |r| r.get(0),
          )
          .optional()?;
        let Some(current) = current else {
          return Ok(Mutation::Missing);
        };
        let from = decode_in_call(decode_status(&current))?;

        let to = match update.status {
          Some(to) if to != from => {
            if !R::can_transition(from, to) {
              return Ok(Mutation::Rejected(from));
            }
            to
          }
          _ => from,
        };

        tx.execute(
          "UPDATE reservations
           SET status = ?2, notes = COALESCE(?3, notes), updated_at = ?4
           WHERE reservation_id = ?1",
          rusqlite::params![id_str, to.as_ref(), update.notes, at_str],
        )?;
        let row = read_reservation(&tx, &id_str, &kind)?
          .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        Ok(Mutation::Applied(row))
      })
      .await?;

    Ok(match mutation {
      Mutation::Missing => UpdateOutcome::NotFound,
      Mutation::Rejected(from) => UpdateOutcome::Illegal { from },
      Mutation::Applied(raw) => UpdateOutcome::Updated(raw.into_reservation()?),
    })
  }

  async fn purge<R: Resource>(&self, id: Uuid) -> Result<bool> {
    let kind   = R::KIND.as_ref().to_owned();
    let id_str = encode_uuid(id);

    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM reservations WHERE reservation_id = ?1 AND kind = ?2",
          rusqlite::params![id_str, kind],
        )?)
      })
      .await?;
    Ok(deleted > 0)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn get_reservation<R: Resource>(
    &self,
    id: Uuid,
  ) -> Result<Option<Reservation<R::Key>>> {
    let kind   = R::KIND.as_ref().to_owned();
    let id_str = encode_uuid(id);

    let raw = self
      .conn
      .call(move |conn| Ok(read_reservation(conn, &id_str, &kind)?))
      .await?;

    raw.map(RawReservation::into_reservation).transpose()
  }

  async fn list_reservations<R: Resource>(
    &self,
    query: ReservationQuery,
  ) -> Result<Vec<Reservation<R::Key>>> {
    let kind        = R::KIND.as_ref().to_owned();
    let subject_str = query.subject_id.map(encode_uuid);
    let status_str  = query.status.map(|s| s.as_ref().to_owned());
    let key_str     = query.key;
    // SQLite treats a negative LIMIT as "no limit".
    let limit_val   = query.limit.map_or(-1, |l| l as i64);
    let offset_val  = query.offset.unwrap_or(0) as i64;

    let raws: Vec<RawReservation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RESERVATION_COLUMNS} FROM reservations
           WHERE kind = ?1
             AND (?2 IS NULL OR subject_id = ?2)
             AND (?3 IS NULL OR status = ?3)
             AND (?4 IS NULL OR resource_key = ?4)
           ORDER BY created_at DESC, reservation_id
           LIMIT ?5 OFFSET ?6"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![
              kind,
              subject_str,
              status_str,
              key_str,
              limit_val,
              offset_val,
            ],
            RawReservation::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawReservation::into_reservation).collect()
  }

  async fn count_by_status<R: Resource>(&self) -> Result<StatusCounts> {
    let kind = R::KIND.as_ref().to_owned();

    let rows: Vec<(String, u64)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT status, COUNT(*) FROM reservations
           WHERE kind = ?1 GROUP BY status",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![kind], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut counts = StatusCounts::default();
    for (status, n) in rows {
      counts.add(decode_status(&status)?, n);
    }
    Ok(counts)
  }

  // ── Subject registry ──────────────────────────────────────────────────────

  async fn register_subject(
    &self,
    subject_id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<Subject> {
    let id_str = encode_uuid(subject_id);
    let at_str = encode_dt(at);

    let raw = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO subjects (subject_id, registered_at)
           VALUES (?1, ?2)",
          rusqlite::params![id_str, at_str],
        )?;
        Ok(conn.query_row(
          "SELECT subject_id, registered_at FROM subjects WHERE subject_id = ?1",
          rusqlite::params![id_str],
          |row| {
            Ok(RawSubject {
              subject_id:    row.get(0)?,
              registered_at: row.get(1)?,
            })
          },
        )?)
      })
      .await?;

    raw.into_subject()
  }

  async fn remove_subject(&self, subject_id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(subject_id);

    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM subjects WHERE subject_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;
    Ok(deleted > 0)
  }

  // ── Reconciliation ────────────────────────────────────────────────────────

  async fn cancel_orphans<R: Resource>(
    &self,
    key: R::Key,
    at: DateTime<Utc>,
  ) -> Result<Vec<Uuid>> {
    let kind    = R::KIND.as_ref().to_owned();
    let key_str = key.to_string();
    let at_str  = encode_dt(at);

    let ids: Vec<String> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let orphan_filter = format!(
          "kind = ?1 AND resource_key = ?2 AND {ACTIVE}
           AND subject_id NOT IN (SELECT subject_id FROM subjects)"
        );

        let ids = {
          let mut stmt = tx.prepare(&format!(
            "SELECT reservation_id FROM reservations WHERE {orphan_filter}
             ORDER BY created_at"
          ))?;
          stmt
            .query_map(rusqlite::params![kind, key_str], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?
        };

        if !ids.is_empty() {
          tx.execute(
            &format!(
              "UPDATE reservations
               SET status = 'cancelled', updated_at = ?3,
                   notes = COALESCE(notes, ?4)
               WHERE {orphan_filter}"
            ),
            rusqlite::params![kind, key_str, at_str, ORPHAN_NOTE],
          )?;
        }
        tx.commit()?;
        Ok(ids)
      })
      .await?;

    if !ids.is_empty() {
      tracing::debug!(
        kind = %R::KIND,
        key = %key,
        count = ids.len(),
        "cancelled orphaned reservations"
      );
    }
    ids.iter().map(|s| decode_uuid(s)).collect()
  }

  async fn orphaned_keys<R: Resource>(&self) -> Result<Vec<R::Key>> {
    let kind = R::KIND.as_ref().to_owned();

    let keys: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT DISTINCT resource_key FROM reservations
           WHERE kind = ?1 AND {ACTIVE}
             AND subject_id NOT IN (SELECT subject_id FROM subjects)"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![kind], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    let mut keys = keys
      .iter()
      .map(|s| decode_key(s))
      .collect::<Result<Vec<R::Key>>>()?;
    keys.sort();
    Ok(keys)
  }
}
