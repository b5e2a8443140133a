//! SQL schema for the Vigil SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS dim_signatures (
    dim_signature_id TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    exec             TEXT NOT NULL,
    UNIQUE (name, exec)
);

-- One row per ingested file per (name, signature, processor version).
-- ingestion_duration_ms stays NULL until the OK status; a non-NULL value
-- makes the row immutable. content_json holds the raw operation payload of
-- a failed ingestion and is cleared on success.
CREATE TABLE IF NOT EXISTS sources (
    source_id             TEXT PRIMARY KEY,
    name                  TEXT NOT NULL,
    dim_signature_id      TEXT NOT NULL REFERENCES dim_signatures(dim_signature_id),
    processor_version     TEXT NOT NULL,
    generation_time       TEXT NOT NULL,
    validity_start        TEXT NOT NULL,
    validity_stop         TEXT NOT NULL,
    priority              INTEGER,
    ingestion_time        TEXT NOT NULL,
    ingestion_duration_ms INTEGER,
    parse_error           TEXT,
    content_json          TEXT,
    UNIQUE (name, dim_signature_id, processor_version)
);

-- Append-only status history per source.
CREATE TABLE IF NOT EXISTS source_statuses (
    status_id   TEXT PRIMARY KEY,
    source_id   TEXT NOT NULL REFERENCES sources(source_id) ON DELETE CASCADE,
    status      TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

-- system is stored as '' for \"no system\" so the natural key stays unique
-- (SQLite treats NULLs as distinct inside UNIQUE).
CREATE TABLE IF NOT EXISTS gauges (
    gauge_id         TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    system           TEXT NOT NULL DEFAULT '',
    dim_signature_id TEXT NOT NULL REFERENCES dim_signatures(dim_signature_id),
    UNIQUE (name, system, dim_signature_id)
);

CREATE TABLE IF NOT EXISTS annotation_cnfs (
    annotation_cnf_id TEXT PRIMARY KEY,
    name              TEXT NOT NULL,
    system            TEXT NOT NULL DEFAULT '',
    dim_signature_id  TEXT NOT NULL REFERENCES dim_signatures(dim_signature_id),
    UNIQUE (name, system, dim_signature_id)
);

CREATE TABLE IF NOT EXISTS explicit_ref_groups (
    group_id TEXT PRIMARY KEY,
    name     TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS explicit_refs (
    explicit_ref_id TEXT PRIMARY KEY,
    name            TEXT NOT NULL UNIQUE,
    group_id        TEXT REFERENCES explicit_ref_groups(group_id),
    ingestion_time  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS explicit_ref_links (
    link_id              TEXT PRIMARY KEY,
    explicit_ref_id_from TEXT NOT NULL REFERENCES explicit_refs(explicit_ref_id),
    explicit_ref_id_to   TEXT NOT NULL REFERENCES explicit_refs(explicit_ref_id),
    name                 TEXT NOT NULL,
    UNIQUE (explicit_ref_id_from, explicit_ref_id_to, name)
);

CREATE TABLE IF NOT EXISTS events (
    event_uuid      TEXT PRIMARY KEY,
    start           TEXT NOT NULL,
    stop            TEXT NOT NULL,
    gauge_id        TEXT NOT NULL REFERENCES gauges(gauge_id),
    explicit_ref_id TEXT REFERENCES explicit_refs(explicit_ref_id),
    source_id       TEXT NOT NULL REFERENCES sources(source_id),
    visible         INTEGER NOT NULL DEFAULT 0,
    ingestion_time  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS event_keys (
    key_id           TEXT PRIMARY KEY,
    event_key        TEXT NOT NULL,
    dim_signature_id TEXT NOT NULL REFERENCES dim_signatures(dim_signature_id),
    event_uuid       TEXT NOT NULL REFERENCES events(event_uuid) ON DELETE CASCADE,
    visible          INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS event_links (
    link_id         TEXT PRIMARY KEY,
    event_uuid_from TEXT NOT NULL REFERENCES events(event_uuid) ON DELETE CASCADE,
    event_uuid_to   TEXT NOT NULL REFERENCES events(event_uuid) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    UNIQUE (event_uuid_from, event_uuid_to, name)
);

CREATE TABLE IF NOT EXISTS event_values (
    value_id        TEXT PRIMARY KEY,
    event_uuid      TEXT NOT NULL REFERENCES events(event_uuid) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    kind            TEXT NOT NULL,
    payload         TEXT,
    level_position  INTEGER NOT NULL,
    parent_level    INTEGER NOT NULL,
    parent_position INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS annotations (
    annotation_uuid   TEXT PRIMARY KEY,
    annotation_cnf_id TEXT NOT NULL REFERENCES annotation_cnfs(annotation_cnf_id),
    explicit_ref_id   TEXT NOT NULL REFERENCES explicit_refs(explicit_ref_id),
    source_id         TEXT NOT NULL REFERENCES sources(source_id),
    visible           INTEGER NOT NULL DEFAULT 0,
    ingestion_time    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS annotation_values (
    value_id        TEXT PRIMARY KEY,
    annotation_uuid TEXT NOT NULL REFERENCES annotations(annotation_uuid) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    kind            TEXT NOT NULL,
    payload         TEXT,
    level_position  INTEGER NOT NULL,
    parent_level    INTEGER NOT NULL,
    parent_position INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS events_gauge_idx       ON events(gauge_id);
CREATE INDEX IF NOT EXISTS events_source_idx      ON events(source_id);
CREATE INDEX IF NOT EXISTS event_keys_key_idx     ON event_keys(event_key);
CREATE INDEX IF NOT EXISTS event_keys_event_idx   ON event_keys(event_uuid);
CREATE INDEX IF NOT EXISTS event_links_from_idx   ON event_links(event_uuid_from);
CREATE INDEX IF NOT EXISTS event_links_to_idx     ON event_links(event_uuid_to);
CREATE INDEX IF NOT EXISTS event_values_owner_idx ON event_values(event_uuid);
CREATE INDEX IF NOT EXISTS annotations_scope_idx  ON annotations(annotation_cnf_id, explicit_ref_id);
CREATE INDEX IF NOT EXISTS ann_values_owner_idx   ON annotation_values(annotation_uuid);
CREATE INDEX IF NOT EXISTS source_statuses_idx    ON source_statuses(source_id);

PRAGMA user_version = 1;
";
