//! The event/annotation writer.
//!
//! Staging is pure: it turns one operation's specs plus the registry's id
//! maps into the flat rows of a [`StagedBatch`], validating periods and
//! values and resolving symbolic links as it goes. The batch is applied by
//! the store in a single transaction; nothing is half-written.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use vigil_core::{
  Fault,
  model::{Annotation, Event, EventKey, EventLink},
  operation::{EventLinkSpec, InsertOperation, InsertionType, LinkMode},
  values,
};
use vigil_store_sqlite::{OwnedValueRow, StagedBatch};

use crate::context::{IngestContext, scope_key};

/// Stage one operation's rows.
///
/// Every named gauge/configuration/reference must already be present in the
/// context (the registry runs first); a miss is a sequencing bug, not a
/// recoverable condition.
pub fn stage(
  ctx: &mut IngestContext,
  op: &InsertOperation,
  now: DateTime<Utc>,
) -> Result<StagedBatch, Fault> {
  let mut batch = StagedBatch::default();
  let mut link_refs: HashMap<String, Uuid> = HashMap::new();
  let mut link_requests: Vec<(Uuid, EventLinkSpec)> = Vec::new();

  for spec in &op.events {
    validate_event_period(ctx, spec)?;

    let gauge = ctx
      .gauges
      .get(&scope_key(&spec.gauge.name, &spec.gauge.system))
      .expect("gauge resolved during registration");
    let visible = spec.gauge.insertion_type.seed_visible();
    let event_uuid = Uuid::new_v4();

    match spec.gauge.insertion_type {
      InsertionType::SimpleUpdate => {}
      InsertionType::EraseAndReplace => {
        ctx.pending_erase_gauges.insert(gauge.gauge_id);
      }
      InsertionType::EventKeys => {
        if let Some(key) = &spec.key {
          ctx.pending_event_keys.insert(key.clone());
        }
      }
    }

    let explicit_ref_id = spec.explicit_reference.as_ref().map(|name| {
      ctx
        .explicit_refs
        .get(name)
        .expect("explicit reference resolved during registration")
        .explicit_ref_id
    });

    batch.events.push(Event {
      event_uuid,
      start: spec.start,
      stop: spec.stop,
      gauge_id: gauge.gauge_id,
      explicit_ref_id,
      source_id: ctx.source.source_id,
      visible,
      ingestion_time: now,
    });

    if let Some(key) = &spec.key {
      batch.event_keys.push(EventKey {
        key_id: Uuid::new_v4(),
        event_key: key.clone(),
        dim_signature_id: ctx.dim_signature.dim_signature_id,
        event_uuid,
        visible,
      });
    }

    for row in values::encode(&spec.values)? {
      batch.event_values.push(OwnedValueRow { owner: event_uuid, row });
    }

    if let Some(link_ref) = &spec.link_ref
      && link_refs.insert(link_ref.clone(), event_uuid).is_some()
    {
      return Err(Fault::DuplicatedEventLinkRef(link_ref.clone()));
    }

    for link in &spec.links {
      link_requests.push((event_uuid, link.clone()));
    }
  }

  for (from, link) in link_requests {
    let to = resolve_link_target(&link, &link_refs)?;
    batch.event_links.push(EventLink {
      link_id: Uuid::new_v4(),
      event_uuid_from: from,
      event_uuid_to: to,
      name: link.name.clone(),
    });
    if let Some(back_name) = &link.back_ref {
      batch.event_links.push(EventLink {
        link_id:         Uuid::new_v4(),
        event_uuid_from: to,
        event_uuid_to:   from,
        name:            back_name.clone(),
      });
    }
  }

  for spec in &op.annotations {
    let cnf = ctx
      .annotation_cnfs
      .get(&scope_key(&spec.annotation_cnf.name, &spec.annotation_cnf.system))
      .expect("annotation configuration resolved during registration");
    let explicit_ref = ctx
      .explicit_refs
      .get(&spec.explicit_reference)
      .expect("explicit reference resolved during registration");
    let annotation_uuid = Uuid::new_v4();

    ctx
      .pending_annotation_scopes
      .insert((cnf.annotation_cnf_id, explicit_ref.explicit_ref_id));

    batch.annotations.push(Annotation {
      annotation_uuid,
      annotation_cnf_id: cnf.annotation_cnf_id,
      explicit_ref_id: explicit_ref.explicit_ref_id,
      source_id: ctx.source.source_id,
      visible: false,
      ingestion_time: now,
    });

    for row in values::encode(&spec.values)? {
      batch
        .annotation_values
        .push(OwnedValueRow { owner: annotation_uuid, row });
    }
  }

  Ok(batch)
}

fn validate_event_period(
  ctx: &IngestContext,
  spec: &vigil_core::operation::EventSpec,
) -> Result<(), Fault> {
  if spec.stop < spec.start {
    return Err(Fault::WrongPeriod(format!(
      "event of gauge {} stops before it starts",
      spec.gauge.name
    )));
  }
  if spec.start < ctx.source.validity_start
    || spec.stop > ctx.source.validity_stop
  {
    return Err(Fault::WrongPeriod(format!(
      "event of gauge {} falls outside the validity of source {}",
      spec.gauge.name, ctx.source.name
    )));
  }
  Ok(())
}

fn resolve_link_target(
  link: &EventLinkSpec,
  link_refs: &HashMap<String, Uuid>,
) -> Result<Uuid, Fault> {
  match link.link_mode {
    LinkMode::ByRef => link_refs
      .get(&link.link)
      .copied()
      .ok_or_else(|| Fault::UndefinedEventLink(link.link.clone())),
    // A target that is not even a well-formed identifier can never resolve;
    // it is the same inconsistency a dangling target would produce at insert.
    LinkMode::ByUuid => {
      Uuid::parse_str(&link.link).map_err(|_| Fault::LinksInconsistency)
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};
  use uuid::Uuid;
  use vigil_core::{
    Fault,
    model::{DimSignature, Gauge, Source},
    operation::{InsertOperation, Operation, OperationBatch},
  };

  use super::stage;
  use crate::context::{IngestContext, scope_key};

  fn ts(hour: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 6, 5, hour, 0, 0).unwrap()
  }

  fn context() -> IngestContext {
    let dim = DimSignature {
      dim_signature_id: Uuid::new_v4(),
      name:             "DIM".to_owned(),
      exec:             "proc".to_owned(),
    };
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
    let mut ctx = IngestContext::new(dim, source);
    ctx.gauges.insert(
      scope_key("GAUGE", &Some("SYS".to_owned())),
      Gauge {
        gauge_id:         Uuid::new_v4(),
        name:             "GAUGE".to_owned(),
        system:           Some("SYS".to_owned()),
        dim_signature_id: ctx.dim_signature.dim_signature_id,
      },
    );
    ctx
  }

  fn operation(events: serde_json::Value) -> InsertOperation {
    let batch: OperationBatch = serde_json::from_value(serde_json::json!({
      "operations": [{
        "mode": "insert",
        "dim_signature": {"name": "DIM", "exec": "proc", "version": "1.0"},
        "source": {
          "name": "file.json",
          "generation_time": "2020-06-05T00:00:00",
          "validity_start": "2020-06-05T00:00:00",
          "validity_stop": "2020-06-05T10:00:00"
        },
        "events": events
      }]
    }))
    .unwrap();
    let Operation::Insert(op) = batch.operations.into_iter().next().unwrap();
    op
  }

  #[test]
  fn event_outside_validity_is_wrong_period() {
    let op = operation(serde_json::json!([{
      "gauge": {"name": "GAUGE", "system": "SYS", "insertion_type": "SIMPLE_UPDATE"},
      "start": "2020-06-05T01:00:00",
      "stop": "2020-06-05T12:00:00"
    }]));
    let err = stage(&mut context(), &op, ts(0)).unwrap_err();
    assert!(matches!(err, Fault::WrongPeriod(_)));
  }

  #[test]
  fn duplicated_link_ref_is_rejected() {
    let op = operation(serde_json::json!([
      {
        "link_ref": "X",
        "gauge": {"name": "GAUGE", "system": "SYS", "insertion_type": "SIMPLE_UPDATE"},
        "start": "2020-06-05T01:00:00",
        "stop": "2020-06-05T02:00:00"
      },
      {
        "link_ref": "X",
        "gauge": {"name": "GAUGE", "system": "SYS", "insertion_type": "SIMPLE_UPDATE"},
        "start": "2020-06-05T03:00:00",
        "stop": "2020-06-05T04:00:00"
      }
    ]));
    let err = stage(&mut context(), &op, ts(0)).unwrap_err();
    assert!(matches!(err, Fault::DuplicatedEventLinkRef(r) if r == "X"));
  }

  #[test]
  fn undefined_link_ref_is_rejected() {
    let op = operation(serde_json::json!([{
      "gauge": {"name": "GAUGE", "system": "SYS", "insertion_type": "SIMPLE_UPDATE"},
      "start": "2020-06-05T01:00:00",
      "stop": "2020-06-05T02:00:00",
      "links": [{"link": "NOWHERE", "link_mode": "by_ref", "name": "L"}]
    }]));
    let err = stage(&mut context(), &op, ts(0)).unwrap_err();
    assert!(matches!(err, Fault::UndefinedEventLink(r) if r == "NOWHERE"));
  }

  #[test]
  fn back_ref_stages_the_mirrored_row() {
    let op = operation(serde_json::json!([
      {
        "link_ref": "X",
        "gauge": {"name": "GAUGE", "system": "SYS", "insertion_type": "SIMPLE_UPDATE"},
        "start": "2020-06-05T01:00:00",
        "stop": "2020-06-05T02:00:00"
      },
      {
        "gauge": {"name": "GAUGE", "system": "SYS", "insertion_type": "SIMPLE_UPDATE"},
        "start": "2020-06-05T03:00:00",
        "stop": "2020-06-05T04:00:00",
        "links": [{"link": "X", "link_mode": "by_ref", "name": "TO_X", "back_ref": "FROM_X"}]
      }
    ]));
    let batch = stage(&mut context(), &op, ts(0)).unwrap();
    assert_eq!(batch.event_links.len(), 2);
    assert_eq!(batch.event_links[0].name, "TO_X");
    assert_eq!(batch.event_links[1].name, "FROM_X");
    assert_eq!(
      batch.event_links[0].event_uuid_from,
      batch.event_links[1].event_uuid_to
    );
  }
}
