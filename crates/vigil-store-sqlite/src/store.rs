//! [`VigilStore`] — SQLite storage primitives for the ingestion engine.
//!
//! Every method is a thin, self-contained database round trip. Multi-row
//! writes (the writer's staged batch, the resolver's mutation batch) run in a
//! single transaction so an operation either commits whole or not at all.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use vigil_core::{
  model::{
    Annotation, AnnotationCnf, DimSignature, Event, EventKey, EventLink,
    ExplicitRef, ExplicitRefGroup, ExplicitRefLink, Gauge, Source,
  },
  status::ProcessingStatus,
  values::ValueRow,
};

use crate::{
  Error, Result,
  encode::{
    RawAnnotation, RawAnnotationCnf, RawDimSignature, RawEvent, RawEventKey,
    RawEventLink, RawExplicitRef, RawExplicitRefGroup, RawExplicitRefLink,
    RawGauge, RawSource, RawValueRow, encode_dt, encode_system, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Write batch types ───────────────────────────────────────────────────────

/// A value row bound to the event/annotation that owns it.
#[derive(Debug, Clone)]
pub struct OwnedValueRow {
  pub owner: Uuid,
  pub row:   ValueRow,
}

/// Everything one operation's writer stages, applied in one transaction.
#[derive(Debug, Clone, Default)]
pub struct StagedBatch {
  pub events:            Vec<Event>,
  pub event_keys:        Vec<EventKey>,
  pub event_values:      Vec<OwnedValueRow>,
  pub event_links:       Vec<EventLink>,
  pub annotations:       Vec<Annotation>,
  pub annotation_values: Vec<OwnedValueRow>,
}

/// One deprecation pass's mutations, applied in one transaction.
///
/// Inserts run before deletions so re-pointed links can reference fragment
/// events created in the same batch; deletions cascade keys/values/links of
/// the removed rows.
#[derive(Debug, Clone, Default)]
pub struct ResolutionBatch {
  pub new_events:              Vec<Event>,
  pub new_event_keys:          Vec<EventKey>,
  pub new_event_values:        Vec<OwnedValueRow>,
  pub new_event_links:         Vec<EventLink>,
  pub delete_event_links:      Vec<Uuid>,
  pub delete_events:           Vec<Uuid>,
  pub set_visible_events:      Vec<Uuid>,
  pub delete_annotations:      Vec<Uuid>,
  pub set_visible_annotations: Vec<Uuid>,
}

impl ResolutionBatch {
  pub fn is_empty(&self) -> bool {
    self.new_events.is_empty()
      && self.new_event_keys.is_empty()
      && self.new_event_values.is_empty()
      && self.new_event_links.is_empty()
      && self.delete_event_links.is_empty()
      && self.delete_events.is_empty()
      && self.set_visible_events.is_empty()
      && self.delete_annotations.is_empty()
      && self.set_visible_annotations.is_empty()
  }
}

/// An event joined with the source that supplied it.
#[derive(Debug, Clone)]
pub struct EventWithSource {
  pub event:  Event,
  pub source: Source,
}

/// One row of a source's append-only status history.
#[derive(Debug, Clone)]
pub struct SourceStatus {
  pub status:      ProcessingStatus,
  pub recorded_at: DateTime<Utc>,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Vigil store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct VigilStore {
  conn: tokio_rusqlite::Connection,
}

impl VigilStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
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

  // ── DIM signatures ────────────────────────────────────────────────────────

  pub async fn find_dim_signature(
    &self,
    name: &str,
    exec: &str,
  ) -> Result<Option<DimSignature>> {
    let name = name.to_owned();
    let exec = exec.to_owned();
    let raw: Option<RawDimSignature> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT dim_signature_id, name, exec FROM dim_signatures
               WHERE name = ?1 AND exec = ?2",
              rusqlite::params![name, exec],
              |row| {
                Ok(RawDimSignature {
                  dim_signature_id: row.get(0)?,
                  name:             row.get(1)?,
                  exec:             row.get(2)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawDimSignature::into_model).transpose()
  }

  pub async fn insert_dim_signature(&self, ds: &DimSignature) -> Result<()> {
    let id_str = encode_uuid(ds.dim_signature_id);
    let name = ds.name.clone();
    let exec = ds.exec.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO dim_signatures (dim_signature_id, name, exec)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, name, exec],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Gauges ────────────────────────────────────────────────────────────────

  pub async fn find_gauge(
    &self,
    name: &str,
    system: &Option<String>,
    dim_signature_id: Uuid,
  ) -> Result<Option<Gauge>> {
    let name = name.to_owned();
    let system = encode_system(system);
    let dim_str = encode_uuid(dim_signature_id);
    let raw: Option<RawGauge> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT gauge_id, name, system, dim_signature_id FROM gauges
               WHERE name = ?1 AND system = ?2 AND dim_signature_id = ?3",
              rusqlite::params![name, system, dim_str],
              |row| {
                Ok(RawGauge {
                  gauge_id:         row.get(0)?,
                  name:             row.get(1)?,
                  system:           row.get(2)?,
                  dim_signature_id: row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawGauge::into_model).transpose()
  }

  pub async fn insert_gauge(&self, gauge: &Gauge) -> Result<()> {
    let id_str = encode_uuid(gauge.gauge_id);
    let name = gauge.name.clone();
    let system = encode_system(&gauge.system);
    let dim_str = encode_uuid(gauge.dim_signature_id);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO gauges (gauge_id, name, system, dim_signature_id)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, name, system, dim_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Annotation configurations ─────────────────────────────────────────────

  pub async fn find_annotation_cnf(
    &self,
    name: &str,
    system: &Option<String>,
    dim_signature_id: Uuid,
  ) -> Result<Option<AnnotationCnf>> {
    let name = name.to_owned();
    let system = encode_system(system);
    let dim_str = encode_uuid(dim_signature_id);
    let raw: Option<RawAnnotationCnf> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT annotation_cnf_id, name, system, dim_signature_id
               FROM annotation_cnfs
               WHERE name = ?1 AND system = ?2 AND dim_signature_id = ?3",
              rusqlite::params![name, system, dim_str],
              |row| {
                Ok(RawAnnotationCnf {
                  annotation_cnf_id: row.get(0)?,
                  name:              row.get(1)?,
                  system:            row.get(2)?,
                  dim_signature_id:  row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawAnnotationCnf::into_model).transpose()
  }

  pub async fn insert_annotation_cnf(&self, cnf: &AnnotationCnf) -> Result<()> {
    let id_str = encode_uuid(cnf.annotation_cnf_id);
    let name = cnf.name.clone();
    let system = encode_system(&cnf.system);
    let dim_str = encode_uuid(cnf.dim_signature_id);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO annotation_cnfs (annotation_cnf_id, name, system, dim_signature_id)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, name, system, dim_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Explicit reference groups ─────────────────────────────────────────────

  pub async fn find_explicit_ref_group(
    &self,
    name: &str,
  ) -> Result<Option<ExplicitRefGroup>> {
    let name = name.to_owned();
    let raw: Option<RawExplicitRefGroup> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT group_id, name FROM explicit_ref_groups WHERE name = ?1",
              rusqlite::params![name],
              |row| {
                Ok(RawExplicitRefGroup {
                  group_id: row.get(0)?,
                  name:     row.get(1)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawExplicitRefGroup::into_model).transpose()
  }

  pub async fn insert_explicit_ref_group(
    &self,
    group: &ExplicitRefGroup,
  ) -> Result<()> {
    let id_str = encode_uuid(group.group_id);
    let name = group.name.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO explicit_ref_groups (group_id, name) VALUES (?1, ?2)",
          rusqlite::params![id_str, name],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Explicit references ───────────────────────────────────────────────────

  pub async fn find_explicit_ref(
    &self,
    name: &str,
  ) -> Result<Option<ExplicitRef>> {
    let name = name.to_owned();
    let raw: Option<RawExplicitRef> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT explicit_ref_id, name, group_id, ingestion_time
               FROM explicit_refs WHERE name = ?1",
              rusqlite::params![name],
              |row| {
                Ok(RawExplicitRef {
                  explicit_ref_id: row.get(0)?,
                  name:            row.get(1)?,
                  group_id:        row.get(2)?,
                  ingestion_time:  row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawExplicitRef::into_model).transpose()
  }

  pub async fn insert_explicit_ref(&self, er: &ExplicitRef) -> Result<()> {
    let id_str = encode_uuid(er.explicit_ref_id);
    let name = er.name.clone();
    let group_str = er.group_id.map(encode_uuid);
    let at_str = encode_dt(er.ingestion_time);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO explicit_refs (explicit_ref_id, name, group_id, ingestion_time)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, name, group_str, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Attach a group to a reference that does not have one yet. A reference
  /// that already carries a group is left untouched.
  pub async fn attach_explicit_ref_group(
    &self,
    explicit_ref_id: Uuid,
    group_id: Uuid,
  ) -> Result<()> {
    let ref_str = encode_uuid(explicit_ref_id);
    let group_str = encode_uuid(group_id);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE explicit_refs SET group_id = ?2
           WHERE explicit_ref_id = ?1 AND group_id IS NULL",
          rusqlite::params![ref_str, group_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Explicit reference links ──────────────────────────────────────────────

  pub async fn find_explicit_ref_link(
    &self,
    from: Uuid,
    to: Uuid,
    name: &str,
  ) -> Result<Option<ExplicitRefLink>> {
    let from_str = encode_uuid(from);
    let to_str = encode_uuid(to);
    let name = name.to_owned();
    let raw: Option<RawExplicitRefLink> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT link_id, explicit_ref_id_from, explicit_ref_id_to, name
               FROM explicit_ref_links
               WHERE explicit_ref_id_from = ?1 AND explicit_ref_id_to = ?2
                 AND name = ?3",
              rusqlite::params![from_str, to_str, name],
              |row| {
                Ok(RawExplicitRefLink {
                  link_id:              row.get(0)?,
                  explicit_ref_id_from: row.get(1)?,
                  explicit_ref_id_to:   row.get(2)?,
                  name:                 row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawExplicitRefLink::into_model).transpose()
  }

  pub async fn insert_explicit_ref_link(
    &self,
    link: &ExplicitRefLink,
  ) -> Result<()> {
    let id_str = encode_uuid(link.link_id);
    let from_str = encode_uuid(link.explicit_ref_id_from);
    let to_str = encode_uuid(link.explicit_ref_id_to);
    let name = link.name.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO explicit_ref_links
             (link_id, explicit_ref_id_from, explicit_ref_id_to, name)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, from_str, to_str, name],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Sources ───────────────────────────────────────────────────────────────

  pub async fn find_source(
    &self,
    name: &str,
    dim_signature_id: Uuid,
    processor_version: &str,
  ) -> Result<Option<Source>> {
    let name = name.to_owned();
    let dim_str = encode_uuid(dim_signature_id);
    let version = processor_version.to_owned();
    let raw: Option<RawSource> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT source_id, name, dim_signature_id, processor_version,
                      generation_time, validity_start, validity_stop, priority,
                      ingestion_time, ingestion_duration_ms, parse_error
               FROM sources
               WHERE name = ?1 AND dim_signature_id = ?2
                 AND processor_version = ?3",
              rusqlite::params![name, dim_str, version],
              map_raw_source,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawSource::into_model).transpose()
  }

  pub async fn get_source(&self, source_id: Uuid) -> Result<Option<Source>> {
    let id_str = encode_uuid(source_id);
    let raw: Option<RawSource> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT source_id, name, dim_signature_id, processor_version,
                      generation_time, validity_start, validity_stop, priority,
                      ingestion_time, ingestion_duration_ms, parse_error
               FROM sources WHERE source_id = ?1",
              rusqlite::params![id_str],
              map_raw_source,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawSource::into_model).transpose()
  }

  pub async fn insert_source(&self, source: &Source) -> Result<()> {
    let source = source.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO sources
             (source_id, name, dim_signature_id, processor_version,
              generation_time, validity_start, validity_stop, priority,
              ingestion_time, ingestion_duration_ms, parse_error)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, NULL)",
          rusqlite::params![
            encode_uuid(source.source_id),
            source.name,
            encode_uuid(source.dim_signature_id),
            source.processor_version,
            encode_dt(source.generation_time),
            encode_dt(source.validity_start),
            encode_dt(source.validity_stop),
            source.priority,
            encode_dt(source.ingestion_time),
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Re-target a source row whose previous ingestion attempt never finished.
  /// Guarded on `ingestion_duration_ms IS NULL`: completed rows are immutable.
  pub async fn retarget_source(&self, source: &Source) -> Result<()> {
    let source = source.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE sources SET
             generation_time = ?2, validity_start = ?3, validity_stop = ?4,
             priority = ?5, ingestion_time = ?6, parse_error = NULL,
             content_json = NULL
           WHERE source_id = ?1 AND ingestion_duration_ms IS NULL",
          rusqlite::params![
            encode_uuid(source.source_id),
            encode_dt(source.generation_time),
            encode_dt(source.validity_start),
            encode_dt(source.validity_stop),
            source.priority,
            encode_dt(source.ingestion_time),
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn insert_source_status(
    &self,
    source_id: Uuid,
    status: ProcessingStatus,
    recorded_at: DateTime<Utc>,
  ) -> Result<()> {
    let id_str = encode_uuid(Uuid::new_v4());
    let source_str = encode_uuid(source_id);
    let status_str = status.as_str();
    let at_str = encode_dt(recorded_at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO source_statuses (status_id, source_id, status, recorded_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, source_str, status_str, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Record a terminal failure: append the status row and retain the raw
  /// operation payload for postmortem.
  pub async fn record_source_failure(
    &self,
    source_id: Uuid,
    status: ProcessingStatus,
    recorded_at: DateTime<Utc>,
    content_json: Option<String>,
  ) -> Result<()> {
    let status_id = encode_uuid(Uuid::new_v4());
    let source_str = encode_uuid(source_id);
    let status_str = status.as_str();
    let at_str = encode_dt(recorded_at);
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO source_statuses (status_id, source_id, status, recorded_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![status_id, source_str, status_str, at_str],
        )?;
        if content_json.is_some() {
          tx.execute(
            "UPDATE sources SET content_json = ?2 WHERE source_id = ?1",
            rusqlite::params![source_str, content_json],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Record success: append the OK status, set the ingestion duration and
  /// clear any retained payload.
  pub async fn finalize_source_ok(
    &self,
    source_id: Uuid,
    recorded_at: DateTime<Utc>,
    duration_ms: i64,
  ) -> Result<()> {
    let status_id = encode_uuid(Uuid::new_v4());
    let source_str = encode_uuid(source_id);
    let at_str = encode_dt(recorded_at);
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO source_statuses (status_id, source_id, status, recorded_at)
           VALUES (?1, ?2, 'OK', ?3)",
          rusqlite::params![status_id, source_str, at_str],
        )?;
        tx.execute(
          "UPDATE sources SET ingestion_duration_ms = ?2, content_json = NULL
           WHERE source_id = ?1",
          rusqlite::params![source_str, duration_ms],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn source_statuses(
    &self,
    source_id: Uuid,
  ) -> Result<Vec<SourceStatus>> {
    let source_str = encode_uuid(source_id);
    let raws: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT status, recorded_at FROM source_statuses
           WHERE source_id = ?1 ORDER BY recorded_at, rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![source_str], |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(status, at)| {
        Ok(SourceStatus {
          status:      ProcessingStatus::decode(&status)
            .map_err(Error::Core)?,
          recorded_at: crate::encode::decode_dt(&at)?,
        })
      })
      .collect()
  }

  pub async fn source_content(
    &self,
    source_id: Uuid,
  ) -> Result<Option<String>> {
    let source_str = encode_uuid(source_id);
    let content: Option<Option<String>> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT content_json FROM sources WHERE source_id = ?1",
              rusqlite::params![source_str],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(content.flatten())
  }

  // ── Staged writes ─────────────────────────────────────────────────────────

  /// Apply one operation's staged rows in a single transaction.
  pub async fn apply_staged(&self, batch: StagedBatch) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO events
               (event_uuid, start, stop, gauge_id, explicit_ref_id, source_id,
                visible, ingestion_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          )?;
          for event in &batch.events {
            insert_event(&mut stmt, event)?;
          }

          let mut stmt = tx.prepare(
            "INSERT INTO event_keys
               (key_id, event_key, dim_signature_id, event_uuid, visible)
             VALUES (?1, ?2, ?3, ?4, ?5)",
          )?;
          for key in &batch.event_keys {
            insert_event_key(&mut stmt, key)?;
          }

          insert_value_rows(&tx, "event_values", "event_uuid", &batch.event_values)?;

          let mut stmt = tx.prepare(
            "INSERT INTO annotations
               (annotation_uuid, annotation_cnf_id, explicit_ref_id, source_id,
                visible, ingestion_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          )?;
          for annotation in &batch.annotations {
            stmt.execute(rusqlite::params![
              encode_uuid(annotation.annotation_uuid),
              encode_uuid(annotation.annotation_cnf_id),
              encode_uuid(annotation.explicit_ref_id),
              encode_uuid(annotation.source_id),
              annotation.visible,
              encode_dt(annotation.ingestion_time),
            ])?;
          }

          insert_value_rows(
            &tx,
            "annotation_values",
            "annotation_uuid",
            &batch.annotation_values,
          )?;

          // Links go last: a dangling by_uuid target fails here and rolls
          // back the whole operation.
          let mut stmt = tx.prepare(
            "INSERT INTO event_links (link_id, event_uuid_from, event_uuid_to, name)
             VALUES (?1, ?2, ?3, ?4)",
          )?;
          for link in &batch.event_links {
            insert_event_link(&mut stmt, link)?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Resolver queries ──────────────────────────────────────────────────────

  pub async fn events_with_sources_for_gauge(
    &self,
    gauge_id: Uuid,
  ) -> Result<Vec<EventWithSource>> {
    let gauge_str = encode_uuid(gauge_id);
    self
      .events_with_sources(
        "SELECT e.event_uuid, e.start, e.stop, e.gauge_id, e.explicit_ref_id,
                e.source_id, e.visible, e.ingestion_time,
                s.source_id, s.name, s.dim_signature_id, s.processor_version,
                s.generation_time, s.validity_start, s.validity_stop,
                s.priority, s.ingestion_time, s.ingestion_duration_ms,
                s.parse_error
         FROM events e JOIN sources s ON s.source_id = e.source_id
         WHERE e.gauge_id = ?1",
        gauge_str,
      )
      .await
  }

  pub async fn events_with_sources_for_key(
    &self,
    event_key: &str,
  ) -> Result<Vec<EventWithSource>> {
    self
      .events_with_sources(
        "SELECT DISTINCT e.event_uuid, e.start, e.stop, e.gauge_id,
                e.explicit_ref_id, e.source_id, e.visible, e.ingestion_time,
                s.source_id, s.name, s.dim_signature_id, s.processor_version,
                s.generation_time, s.validity_start, s.validity_stop,
                s.priority, s.ingestion_time, s.ingestion_duration_ms,
                s.parse_error
         FROM events e
         JOIN sources s ON s.source_id = e.source_id
         JOIN event_keys k ON k.event_uuid = e.event_uuid
         WHERE k.event_key = ?1",
        event_key.to_owned(),
      )
      .await
  }

  async fn events_with_sources(
    &self,
    sql: &'static str,
    param: String,
  ) -> Result<Vec<EventWithSource>> {
    let raws: Vec<(RawEvent, RawSource)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
          .query_map(rusqlite::params![param], |row| {
            Ok((
              RawEvent {
                event_uuid:      row.get(0)?,
                start:           row.get(1)?,
                stop:            row.get(2)?,
                gauge_id:        row.get(3)?,
                explicit_ref_id: row.get(4)?,
                source_id:       row.get(5)?,
                visible:         row.get(6)?,
                ingestion_time:  row.get(7)?,
              },
              RawSource {
                source_id:             row.get(8)?,
                name:                  row.get(9)?,
                dim_signature_id:      row.get(10)?,
                processor_version:     row.get(11)?,
                generation_time:       row.get(12)?,
                validity_start:        row.get(13)?,
                validity_stop:         row.get(14)?,
                priority:              row.get(15)?,
                ingestion_time:        row.get(16)?,
                ingestion_duration_ms: row.get(17)?,
                parse_error:           row.get(18)?,
              },
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(event, source)| {
        Ok(EventWithSource {
          event:  event.into_model()?,
          source: source.into_model()?,
        })
      })
      .collect()
  }

  pub async fn annotations_with_sources_for_scope(
    &self,
    annotation_cnf_id: Uuid,
    explicit_ref_id: Uuid,
  ) -> Result<Vec<(Annotation, Source)>> {
    let cnf_str = encode_uuid(annotation_cnf_id);
    let ref_str = encode_uuid(explicit_ref_id);
    let raws: Vec<(RawAnnotation, RawSource)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT a.annotation_uuid, a.annotation_cnf_id, a.explicit_ref_id,
                  a.source_id, a.visible, a.ingestion_time,
                  s.source_id, s.name, s.dim_signature_id, s.processor_version,
                  s.generation_time, s.validity_start, s.validity_stop,
                  s.priority, s.ingestion_time, s.ingestion_duration_ms,
                  s.parse_error
           FROM annotations a JOIN sources s ON s.source_id = a.source_id
           WHERE a.annotation_cnf_id = ?1 AND a.explicit_ref_id = ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![cnf_str, ref_str], |row| {
            Ok((
              RawAnnotation {
                annotation_uuid:   row.get(0)?,
                annotation_cnf_id: row.get(1)?,
                explicit_ref_id:   row.get(2)?,
                source_id:         row.get(3)?,
                visible:           row.get(4)?,
                ingestion_time:    row.get(5)?,
              },
              RawSource {
                source_id:             row.get(6)?,
                name:                  row.get(7)?,
                dim_signature_id:      row.get(8)?,
                processor_version:     row.get(9)?,
                generation_time:       row.get(10)?,
                validity_start:        row.get(11)?,
                validity_stop:         row.get(12)?,
                priority:              row.get(13)?,
                ingestion_time:        row.get(14)?,
                ingestion_duration_ms: row.get(15)?,
                parse_error:           row.get(16)?,
              },
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(annotation, source)| {
        Ok((annotation.into_model()?, source.into_model()?))
      })
      .collect()
  }

  /// Value rows for the given events, for replication onto split fragments.
  pub async fn values_for_events(
    &self,
    event_uuids: &[Uuid],
  ) -> Result<Vec<OwnedValueRow>> {
    self
      .values_for_owners("event_values", "event_uuid", event_uuids)
      .await
  }

  pub async fn values_for_annotations(
    &self,
    annotation_uuids: &[Uuid],
  ) -> Result<Vec<OwnedValueRow>> {
    self
      .values_for_owners("annotation_values", "annotation_uuid", annotation_uuids)
      .await
  }

  async fn values_for_owners(
    &self,
    table: &'static str,
    owner_column: &'static str,
    owners: &[Uuid],
  ) -> Result<Vec<OwnedValueRow>> {
    let owner_strs: Vec<String> = owners.iter().copied().map(encode_uuid).collect();
    let raws: Vec<RawValueRow> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {owner_column}, name, kind, payload, level_position,
                  parent_level, parent_position
           FROM {table} WHERE {owner_column} = ?1
           ORDER BY parent_level, level_position"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut out = Vec::new();
        for owner in &owner_strs {
          let rows = stmt
            .query_map(rusqlite::params![owner], |row| {
              Ok(RawValueRow {
                owner:           row.get(0)?,
                name:            row.get(1)?,
                kind:            row.get(2)?,
                payload:         row.get(3)?,
                level_position:  row.get(4)?,
                parent_level:    row.get(5)?,
                parent_position: row.get(6)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          out.extend(rows);
        }
        Ok(out)
      })
      .await?;

    raws
      .into_iter()
      .map(|raw| {
        let (owner, row) = raw.into_model()?;
        Ok(OwnedValueRow { owner, row })
      })
      .collect()
  }

  /// Key rows carried by the given events.
  pub async fn keys_for_events(
    &self,
    event_uuids: &[Uuid],
  ) -> Result<Vec<EventKey>> {
    let owner_strs: Vec<String> =
      event_uuids.iter().copied().map(encode_uuid).collect();
    let raws: Vec<RawEventKey> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT key_id, event_key, dim_signature_id, event_uuid, visible
           FROM event_keys WHERE event_uuid = ?1",
        )?;
        let mut out = Vec::new();
        for owner in &owner_strs {
          let rows = stmt
            .query_map(rusqlite::params![owner], |row| {
              Ok(RawEventKey {
                key_id:           row.get(0)?,
                event_key:        row.get(1)?,
                dim_signature_id: row.get(2)?,
                event_uuid:       row.get(3)?,
                visible:          row.get(4)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          out.extend(rows);
        }
        Ok(out)
      })
      .await?;

    raws.into_iter().map(RawEventKey::into_model).collect()
  }

  /// Link rows with either endpoint among the given events.
  pub async fn links_touching_events(
    &self,
    event_uuids: &[Uuid],
  ) -> Result<Vec<EventLink>> {
    let owner_strs: Vec<String> =
      event_uuids.iter().copied().map(encode_uuid).collect();
    let raws: Vec<RawEventLink> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT link_id, event_uuid_from, event_uuid_to, name
           FROM event_links WHERE event_uuid_from = ?1 OR event_uuid_to = ?1",
        )?;
        let mut out: Vec<RawEventLink> = Vec::new();
        for owner in &owner_strs {
          let rows = stmt
            .query_map(rusqlite::params![owner], |row| {
              Ok(RawEventLink {
                link_id:         row.get(0)?,
                event_uuid_from: row.get(1)?,
                event_uuid_to:   row.get(2)?,
                name:            row.get(3)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          for row in rows {
            if !out.iter().any(|seen| seen.link_id == row.link_id) {
              out.push(row);
            }
          }
        }
        Ok(out)
      })
      .await?;

    raws.into_iter().map(RawEventLink::into_model).collect()
  }

  // ── Resolver mutations ────────────────────────────────────────────────────

  /// Apply one deprecation pass's mutations in a single transaction.
  pub async fn apply_resolution(&self, batch: ResolutionBatch) -> Result<()> {
    if batch.is_empty() {
      return Ok(());
    }
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO events
               (event_uuid, start, stop, gauge_id, explicit_ref_id, source_id,
                visible, ingestion_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          )?;
          for event in &batch.new_events {
            insert_event(&mut stmt, event)?;
          }

          let mut stmt = tx.prepare(
            "INSERT INTO event_keys
               (key_id, event_key, dim_signature_id, event_uuid, visible)
             VALUES (?1, ?2, ?3, ?4, ?5)",
          )?;
          for key in &batch.new_event_keys {
            insert_event_key(&mut stmt, key)?;
          }

          insert_value_rows(
            &tx,
            "event_values",
            "event_uuid",
            &batch.new_event_values,
          )?;

          let mut stmt = tx.prepare(
            "INSERT INTO event_links (link_id, event_uuid_from, event_uuid_to, name)
             VALUES (?1, ?2, ?3, ?4)",
          )?;
          for link in &batch.new_event_links {
            insert_event_link(&mut stmt, link)?;
          }

          let mut stmt =
            tx.prepare("DELETE FROM event_links WHERE link_id = ?1")?;
          for link_id in &batch.delete_event_links {
            stmt.execute(rusqlite::params![encode_uuid(*link_id)])?;
          }

          let mut stmt =
            tx.prepare("DELETE FROM events WHERE event_uuid = ?1")?;
          for event_uuid in &batch.delete_events {
            stmt.execute(rusqlite::params![encode_uuid(*event_uuid)])?;
          }

          let mut ev_stmt =
            tx.prepare("UPDATE events SET visible = 1 WHERE event_uuid = ?1")?;
          let mut key_stmt = tx
            .prepare("UPDATE event_keys SET visible = 1 WHERE event_uuid = ?1")?;
          for event_uuid in &batch.set_visible_events {
            let id_str = encode_uuid(*event_uuid);
            ev_stmt.execute(rusqlite::params![&id_str])?;
            key_stmt.execute(rusqlite::params![&id_str])?;
          }

          let mut stmt =
            tx.prepare("DELETE FROM annotations WHERE annotation_uuid = ?1")?;
          for annotation_uuid in &batch.delete_annotations {
            stmt.execute(rusqlite::params![encode_uuid(*annotation_uuid)])?;
          }

          let mut stmt = tx.prepare(
            "UPDATE annotations SET visible = 1 WHERE annotation_uuid = ?1",
          )?;
          for annotation_uuid in &batch.set_visible_annotations {
            stmt.execute(rusqlite::params![encode_uuid(*annotation_uuid)])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Param helpers ───────────────────────────────────────────────────────────

fn map_raw_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSource> {
  Ok(RawSource {
    source_id:             row.get(0)?,
    name:                  row.get(1)?,
    dim_signature_id:      row.get(2)?,
    processor_version:     row.get(3)?,
    generation_time:       row.get(4)?,
    validity_start:        row.get(5)?,
    validity_stop:         row.get(6)?,
    priority:              row.get(7)?,
    ingestion_time:        row.get(8)?,
    ingestion_duration_ms: row.get(9)?,
    parse_error:           row.get(10)?,
  })
}

fn insert_event(
  stmt: &mut rusqlite::Statement<'_>,
  event: &Event,
) -> rusqlite::Result<()> {
  stmt.execute(rusqlite::params![
    encode_uuid(event.event_uuid),
    encode_dt(event.start),
    encode_dt(event.stop),
    encode_uuid(event.gauge_id),
    event.explicit_ref_id.map(encode_uuid),
    encode_uuid(event.source_id),
    event.visible,
    encode_dt(event.ingestion_time),
  ])?;
  Ok(())
}

fn insert_event_key(
  stmt: &mut rusqlite::Statement<'_>,
  key: &EventKey,
) -> rusqlite::Result<()> {
  stmt.execute(rusqlite::params![
    encode_uuid(key.key_id),
    key.event_key,
    encode_uuid(key.dim_signature_id),
    encode_uuid(key.event_uuid),
    key.visible,
  ])?;
  Ok(())
}

fn insert_event_link(
  stmt: &mut rusqlite::Statement<'_>,
  link: &EventLink,
) -> rusqlite::Result<()> {
  stmt.execute(rusqlite::params![
    encode_uuid(link.link_id),
    encode_uuid(link.event_uuid_from),
    encode_uuid(link.event_uuid_to),
    link.name,
  ])?;
  Ok(())
}

fn insert_value_rows(
  tx: &rusqlite::Transaction<'_>,
  table: &str,
  owner_column: &str,
  rows: &[OwnedValueRow],
) -> rusqlite::Result<()> {
  let sql = format!(
    "INSERT INTO {table}
       (value_id, {owner_column}, name, kind, payload, level_position,
        parent_level, parent_position)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
  );
  let mut stmt = tx.prepare(&sql)?;
  for owned in rows {
    stmt.execute(rusqlite::params![
      encode_uuid(Uuid::new_v4()),
      encode_uuid(owned.owner),
      owned.row.name,
      owned.row.kind.as_str(),
      owned.row.payload,
      owned.row.level_position,
      owned.row.parent_level,
      owned.row.parent_position,
    ])?;
  }
  Ok(())
}
