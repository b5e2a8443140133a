//! Integration tests for `VigilStore` against an in-memory database.

use chrono::{TimeZone, Utc};
use uuid::Uuid;
use vigil_core::{
  model::{
    Annotation, AnnotationCnf, DimSignature, Event, EventKey, EventLink,
    ExplicitRef, ExplicitRefGroup, Gauge, Source,
  },
  status::ProcessingStatus,
  values::{ValueKind, ValueRow},
};

use crate::{Error, OwnedValueRow, ResolutionBatch, StagedBatch, VigilStore};

async fn store() -> VigilStore {
  VigilStore::open_in_memory().await.expect("in-memory store")
}

fn ts(hour: u32) -> chrono::DateTime<Utc> {
  Utc.with_ymd_and_hms(2020, 6, 5, hour, 0, 0).unwrap()
}

async fn seeded(store: &VigilStore) -> (DimSignature, Source, Gauge) {
  let dim = DimSignature {
    dim_signature_id: Uuid::new_v4(),
    name:             "DIM".to_owned(),
    exec:             "proc".to_owned(),
  };
  store.insert_dim_signature(&dim).await.unwrap();

  let source = Source {
    source_id:             Uuid::new_v4(),
    name:                  "file.json".to_owned(),
    dim_signature_id:      dim.dim_signature_id,
    processor_version:     "1.0".to_owned(),
    generation_time:       ts(0),
    validity_start:        ts(0),
    validity_stop:         ts(10),
    priority:              None,
    ingestion_time:        ts(0),
    ingestion_duration_ms: None,
    parse_error:           None,
  };
  store.insert_source(&source).await.unwrap();

  let gauge = Gauge {
    gauge_id:         Uuid::new_v4(),
    name:             "GAUGE".to_owned(),
    system:           Some("SYS".to_owned()),
    dim_signature_id: dim.dim_signature_id,
  };
  store.insert_gauge(&gauge).await.unwrap();

  (dim, source, gauge)
}

fn event(source: &Source, gauge: &Gauge, start_h: u32, stop_h: u32) -> Event {
  Event {
    event_uuid:      Uuid::new_v4(),
    start:           ts(start_h),
    stop:            ts(stop_h),
    gauge_id:        gauge.gauge_id,
    explicit_ref_id: None,
    source_id:       source.source_id,
    visible:         true,
    ingestion_time:  ts(0),
  }
}

// ─── Registry rows ───────────────────────────────────────────────────────────

#[tokio::test]
async fn dim_signature_round_trips() {
  let s = store().await;
  let (dim, _, _) = seeded(&s).await;

  let found = s.find_dim_signature("DIM", "proc").await.unwrap().unwrap();
  assert_eq!(found.dim_signature_id, dim.dim_signature_id);

  assert!(s.find_dim_signature("DIM", "other").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_natural_key_is_a_unique_violation() {
  let s = store().await;
  let (dim, _, _) = seeded(&s).await;

  let duplicate = DimSignature {
    dim_signature_id: Uuid::new_v4(),
    name:             dim.name.clone(),
    exec:             dim.exec.clone(),
  };
  let err = s.insert_dim_signature(&duplicate).await.unwrap_err();
  assert!(matches!(err, Error::UniqueViolation(_)));
  assert!(err.is_constraint_violation());
}

#[tokio::test]
async fn gauges_without_system_share_one_row() {
  let s = store().await;
  let (dim, _, _) = seeded(&s).await;

  let gauge = Gauge {
    gauge_id:         Uuid::new_v4(),
    name:             "NO_SYSTEM".to_owned(),
    system:           None,
    dim_signature_id: dim.dim_signature_id,
  };
  s.insert_gauge(&gauge).await.unwrap();

  // A second insert with the same (name, no system) must violate the key.
  let twin = Gauge { gauge_id: Uuid::new_v4(), ..gauge.clone() };
  let err = s.insert_gauge(&twin).await.unwrap_err();
  assert!(matches!(err, Error::UniqueViolation(_)));

  let found = s
    .find_gauge("NO_SYSTEM", &None, dim.dim_signature_id)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(found.gauge_id, gauge.gauge_id);
  assert_eq!(found.system, None);
}

#[tokio::test]
async fn explicit_ref_group_attachment_is_one_shot() {
  let s = store().await;

  let er = ExplicitRef {
    explicit_ref_id: Uuid::new_v4(),
    name:            "PRODUCT_A".to_owned(),
    group_id:        None,
    ingestion_time:  ts(0),
  };
  s.insert_explicit_ref(&er).await.unwrap();

  let g1 = ExplicitRefGroup { group_id: Uuid::new_v4(), name: "G1".to_owned() };
  let g2 = ExplicitRefGroup { group_id: Uuid::new_v4(), name: "G2".to_owned() };
  s.insert_explicit_ref_group(&g1).await.unwrap();
  s.insert_explicit_ref_group(&g2).await.unwrap();

  s.attach_explicit_ref_group(er.explicit_ref_id, g1.group_id)
    .await
    .unwrap();
  // A second attachment must not overwrite the first.
  s.attach_explicit_ref_group(er.explicit_ref_id, g2.group_id)
    .await
    .unwrap();

  let found = s.find_explicit_ref("PRODUCT_A").await.unwrap().unwrap();
  assert_eq!(found.group_id, Some(g1.group_id));
}

// ─── Sources and statuses ────────────────────────────────────────────────────

#[tokio::test]
async fn source_status_history_is_ordered() {
  let s = store().await;
  let (_, source, _) = seeded(&s).await;

  s.insert_source_status(source.source_id, ProcessingStatus::Registered, ts(1))
    .await
    .unwrap();
  s.insert_source_status(
    source.source_id,
    ProcessingStatus::IngestionStarted,
    ts(2),
  )
  .await
  .unwrap();
  s.finalize_source_ok(source.source_id, ts(3), 1500).await.unwrap();

  let history = s.source_statuses(source.source_id).await.unwrap();
  let statuses: Vec<_> = history.iter().map(|row| row.status).collect();
  assert_eq!(statuses, vec![
    ProcessingStatus::Registered,
    ProcessingStatus::IngestionStarted,
    ProcessingStatus::Ok,
  ]);

  let reread = s.get_source(source.source_id).await.unwrap().unwrap();
  assert_eq!(reread.ingestion_duration_ms, Some(1500));
}

#[tokio::test]
async fn failure_retains_payload_and_success_clears_it() {
  let s = store().await;
  let (_, source, _) = seeded(&s).await;

  s.record_source_failure(
    source.source_id,
    ProcessingStatus::WrongValue,
    ts(1),
    Some("{\"operations\":[]}".to_owned()),
  )
  .await
  .unwrap();
  assert_eq!(
    s.source_content(source.source_id).await.unwrap().as_deref(),
    Some("{\"operations\":[]}")
  );

  s.finalize_source_ok(source.source_id, ts(2), 10).await.unwrap();
  assert!(s.source_content(source.source_id).await.unwrap().is_none());
}

#[tokio::test]
async fn retarget_skips_completed_sources() {
  let s = store().await;
  let (_, source, _) = seeded(&s).await;
  s.finalize_source_ok(source.source_id, ts(1), 10).await.unwrap();

  let retargeted = Source { generation_time: ts(5), ..source.clone() };
  s.retarget_source(&retargeted).await.unwrap();

  let reread = s.get_source(source.source_id).await.unwrap().unwrap();
  // Completed rows are immutable.
  assert_eq!(reread.generation_time, ts(0));
}

// ─── Staged writes ───────────────────────────────────────────────────────────

#[tokio::test]
async fn staged_batch_commits_events_keys_values_and_links() {
  let s = store().await;
  let (dim, source, gauge) = seeded(&s).await;

  let a = event(&source, &gauge, 1, 2);
  let b = event(&source, &gauge, 3, 4);
  let batch = StagedBatch {
    events:       vec![a.clone(), b.clone()],
    event_keys:   vec![EventKey {
      key_id:           Uuid::new_v4(),
      event_key:        "K1".to_owned(),
      dim_signature_id: dim.dim_signature_id,
      event_uuid:       a.event_uuid,
      visible:          true,
    }],
    event_values: vec![OwnedValueRow {
      owner: a.event_uuid,
      row:   ValueRow {
        name:            "T".to_owned(),
        kind:            ValueKind::Text,
        payload:         Some("x".to_owned()),
        level_position:  0,
        parent_level:    -1,
        parent_position: 0,
      },
    }],
    event_links:  vec![EventLink {
      link_id:         Uuid::new_v4(),
      event_uuid_from: a.event_uuid,
      event_uuid_to:   b.event_uuid,
      name:            "PAIR".to_owned(),
    }],
    ..Default::default()
  };
  s.apply_staged(batch).await.unwrap();

  let rows = s.events_with_sources_for_gauge(gauge.gauge_id).await.unwrap();
  assert_eq!(rows.len(), 2);

  let keyed = s.events_with_sources_for_key("K1").await.unwrap();
  assert_eq!(keyed.len(), 1);
  assert_eq!(keyed[0].event.event_uuid, a.event_uuid);

  let values = s.values_for_events(&[a.event_uuid]).await.unwrap();
  assert_eq!(values.len(), 1);
  assert_eq!(values[0].row.payload.as_deref(), Some("x"));

  let links = s.links_touching_events(&[a.event_uuid]).await.unwrap();
  assert_eq!(links.len(), 1);
}

#[tokio::test]
async fn dangling_link_target_rolls_back_the_whole_batch() {
  let s = store().await;
  let (_, source, gauge) = seeded(&s).await;

  let a = event(&source, &gauge, 1, 2);
  let batch = StagedBatch {
    events: vec![a.clone()],
    event_links: vec![EventLink {
      link_id:         Uuid::new_v4(),
      event_uuid_from: a.event_uuid,
      event_uuid_to:   Uuid::new_v4(),
      name:            "DANGLING".to_owned(),
    }],
    ..Default::default()
  };
  let err = s.apply_staged(batch).await.unwrap_err();
  assert!(err.is_constraint_violation());

  // Nothing from the batch may have survived.
  let rows = s.events_with_sources_for_gauge(gauge.gauge_id).await.unwrap();
  assert!(rows.is_empty());
}

// ─── Resolver mutations ──────────────────────────────────────────────────────

#[tokio::test]
async fn resolution_batch_applies_inserts_deletes_and_visibility() {
  let s = store().await;
  let (_, source, gauge) = seeded(&s).await;

  let keep = Event { visible: false, ..event(&source, &gauge, 1, 2) };
  let discard = event(&source, &gauge, 3, 4);
  s.apply_staged(StagedBatch {
    events: vec![keep.clone(), discard.clone()],
    ..Default::default()
  })
  .await
  .unwrap();

  let fragment = event(&source, &gauge, 4, 5);
  s.apply_resolution(ResolutionBatch {
    new_events:         vec![fragment.clone()],
    delete_events:      vec![discard.event_uuid],
    set_visible_events: vec![keep.event_uuid],
    ..Default::default()
  })
  .await
  .unwrap();

  let rows = s.events_with_sources_for_gauge(gauge.gauge_id).await.unwrap();
  let mut uuids: Vec<_> = rows.iter().map(|r| r.event.event_uuid).collect();
  uuids.sort();
  let mut expected = vec![keep.event_uuid, fragment.event_uuid];
  expected.sort();
  assert_eq!(uuids, expected);

  let kept = rows
    .iter()
    .find(|r| r.event.event_uuid == keep.event_uuid)
    .unwrap();
  assert!(kept.event.visible);
}

#[tokio::test]
async fn deleting_an_event_cascades_keys_values_and_links() {
  let s = store().await;
  let (dim, source, gauge) = seeded(&s).await;

  let a = event(&source, &gauge, 1, 2);
  let b = event(&source, &gauge, 2, 3);
  s.apply_staged(StagedBatch {
    events:       vec![a.clone(), b.clone()],
    event_keys:   vec![EventKey {
      key_id:           Uuid::new_v4(),
      event_key:        "K".to_owned(),
      dim_signature_id: dim.dim_signature_id,
      event_uuid:       a.event_uuid,
      visible:          true,
    }],
    event_values: vec![OwnedValueRow {
      owner: a.event_uuid,
      row:   ValueRow {
        name:            "T".to_owned(),
        kind:            ValueKind::Text,
        payload:         Some("x".to_owned()),
        level_position:  0,
        parent_level:    -1,
        parent_position: 0,
      },
    }],
    event_links:  vec![EventLink {
      link_id:         Uuid::new_v4(),
      event_uuid_from: a.event_uuid,
      event_uuid_to:   b.event_uuid,
      name:            "PAIR".to_owned(),
    }],
    ..Default::default()
  })
  .await
  .unwrap();

  s.apply_resolution(ResolutionBatch {
    delete_events: vec![a.event_uuid],
    ..Default::default()
  })
  .await
  .unwrap();

  assert!(s.events_with_sources_for_key("K").await.unwrap().is_empty());
  assert!(s.values_for_events(&[a.event_uuid]).await.unwrap().is_empty());
  assert!(s.links_touching_events(&[b.event_uuid]).await.unwrap().is_empty());
}

// ─── Annotations ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn annotation_scope_query_and_mutations() {
  let s = store().await;
  let (dim, source, _) = seeded(&s).await;

  let cnf = AnnotationCnf {
    annotation_cnf_id: Uuid::new_v4(),
    name:              "CNF".to_owned(),
    system:            None,
    dim_signature_id:  dim.dim_signature_id,
  };
  s.insert_annotation_cnf(&cnf).await.unwrap();

  let er = ExplicitRef {
    explicit_ref_id: Uuid::new_v4(),
    name:            "PRODUCT".to_owned(),
    group_id:        None,
    ingestion_time:  ts(0),
  };
  s.insert_explicit_ref(&er).await.unwrap();

  let older = Annotation {
    annotation_uuid:   Uuid::new_v4(),
    annotation_cnf_id: cnf.annotation_cnf_id,
    explicit_ref_id:   er.explicit_ref_id,
    source_id:         source.source_id,
    visible:           false,
    ingestion_time:    ts(0),
  };
  let newer = Annotation { annotation_uuid: Uuid::new_v4(), ..older.clone() };
  s.apply_staged(StagedBatch {
    annotations: vec![older.clone(), newer.clone()],
    annotation_values: vec![OwnedValueRow {
      owner: older.annotation_uuid,
      row:   ValueRow {
        name:            "N".to_owned(),
        kind:            ValueKind::Text,
        payload:         Some("note".to_owned()),
        level_position:  0,
        parent_level:    -1,
        parent_position: 0,
      },
    }],
    ..Default::default()
  })
  .await
  .unwrap();

  s.apply_resolution(ResolutionBatch {
    delete_annotations:      vec![older.annotation_uuid],
    set_visible_annotations: vec![newer.annotation_uuid],
    ..Default::default()
  })
  .await
  .unwrap();

  let scoped = s
    .annotations_with_sources_for_scope(cnf.annotation_cnf_id, er.explicit_ref_id)
    .await
    .unwrap();
  assert_eq!(scoped.len(), 1);
  assert_eq!(scoped[0].0.annotation_uuid, newer.annotation_uuid);
  assert!(scoped[0].0.visible);

  // Values of the deleted annotation are gone with it.
  assert!(
    s.values_for_annotations(&[older.annotation_uuid])
      .await
      .unwrap()
      .is_empty()
  );
}
