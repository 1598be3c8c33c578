//! SQL schema for the venue SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Live subjects. Maintained by the identity collaborator.
CREATE TABLE IF NOT EXISTS subjects (
    subject_id    TEXT PRIMARY KEY,
    registered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS capacity_configs (
    kind        TEXT    NOT NULL,   -- 'visit' | 'activity'
    config_key  TEXT    NOT NULL,   -- time slot or activity id
    max_units   INTEGER NOT NULL CHECK (max_units > 0),
    active      INTEGER NOT NULL DEFAULT 1,
    eligibility TEXT    NOT NULL DEFAULT 'any_day',
    closes_at   TEXT,               -- RFC 3339 UTC or NULL
    label       TEXT,
    updated_at  TEXT    NOT NULL,
    PRIMARY KEY (kind, config_key)
);

-- Consumed capacity is SUM(units) over the active rows of a resource_key;
-- there is no counter column.
-- subject_id carries no foreign key: removing a subject leaves its
-- reservations behind as orphans for reconciliation.
CREATE TABLE IF NOT EXISTS reservations (
    reservation_id TEXT    PRIMARY KEY,
    kind           TEXT    NOT NULL,
    resource_key   TEXT    NOT NULL,   -- text form of the reservation key
    config_key     TEXT    NOT NULL,   -- text form of the governing config key
    subject_id     TEXT    NOT NULL,
    units          INTEGER NOT NULL CHECK (units > 0),
    status         TEXT    NOT NULL,   -- pending | confirmed | cancelled | completed | attended
    contact_name   TEXT,
    contact_phone  TEXT,
    notes          TEXT,
    created_at     TEXT    NOT NULL,
    updated_at     TEXT    NOT NULL
);

-- At most one active reservation per subject per key.
CREATE UNIQUE INDEX IF NOT EXISTS reservations_one_active_idx
    ON reservations(kind, resource_key, subject_id)
    WHERE status IN ('pending', 'confirmed');

CREATE INDEX IF NOT EXISTS reservations_key_idx
    ON reservations(kind, resource_key, status);
CREATE INDEX IF NOT EXISTS reservations_config_idx
    ON reservations(kind, config_key, status);
CREATE INDEX IF NOT EXISTS reservations_subject_idx
    ON reservations(subject_id);

PRAGMA user_version = 1;
";

/// SQL predicate selecting rows whose units count against capacity.
pub const ACTIVE: &str = "status IN ('pending', 'confirmed')";
