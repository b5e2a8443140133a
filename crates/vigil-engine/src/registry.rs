//! The reference registry: race-safe get-or-create for every reference kind.
//!
//! The pattern is the same everywhere: query by natural key; if absent,
//! insert; if the insert loses a race on the uniqueness constraint, re-query —
//! the concurrent writer's row is now visible. No lock is held across the
//! query/insert gap, so the loop is the retry mechanism.

use chrono::Utc;
use uuid::Uuid;
use vigil_core::{
  model::{
    AnnotationCnf, DimSignature, ExplicitRef, ExplicitRefGroup,
    ExplicitRefLink, Gauge,
  },
  operation::InsertOperation,
};
use vigil_store_sqlite::{Error as StoreError, VigilStore};

use crate::{
  Result,
  context::{IngestContext, scope_key},
};

pub async fn get_or_create_dim_signature(
  store: &VigilStore,
  name: &str,
  exec: &str,
) -> Result<DimSignature> {
  loop {
    if let Some(existing) = store.find_dim_signature(name, exec).await? {
      return Ok(existing);
    }
    let candidate = DimSignature {
      dim_signature_id: Uuid::new_v4(),
      name:             name.to_owned(),
      exec:             exec.to_owned(),
    };
    match store.insert_dim_signature(&candidate).await {
      Ok(()) => return Ok(candidate),
      Err(StoreError::UniqueViolation(_)) => continue,
      Err(e) => return Err(e.into()),
    }
  }
}

async fn get_or_create_gauge(
  store: &VigilStore,
  dim_signature_id: Uuid,
  name: &str,
  system: &Option<String>,
) -> Result<Gauge> {
  loop {
    if let Some(existing) =
      store.find_gauge(name, system, dim_signature_id).await?
    {
      return Ok(existing);
    }
    let candidate = Gauge {
      gauge_id: Uuid::new_v4(),
      name: name.to_owned(),
      system: system.clone(),
      dim_signature_id,
    };
    match store.insert_gauge(&candidate).await {
      Ok(()) => return Ok(candidate),
      Err(StoreError::UniqueViolation(_)) => continue,
      Err(e) => return Err(e.into()),
    }
  }
}

async fn get_or_create_annotation_cnf(
  store: &VigilStore,
  dim_signature_id: Uuid,
  name: &str,
  system: &Option<String>,
) -> Result<AnnotationCnf> {
  loop {
    if let Some(existing) =
      store.find_annotation_cnf(name, system, dim_signature_id).await?
    {
      return Ok(existing);
    }
    let candidate = AnnotationCnf {
      annotation_cnf_id: Uuid::new_v4(),
      name: name.to_owned(),
      system: system.clone(),
      dim_signature_id,
    };
    match store.insert_annotation_cnf(&candidate).await {
      Ok(()) => return Ok(candidate),
      Err(StoreError::UniqueViolation(_)) => continue,
      Err(e) => return Err(e.into()),
    }
  }
}

async fn get_or_create_group(
  store: &VigilStore,
  name: &str,
) -> Result<ExplicitRefGroup> {
  loop {
    if let Some(existing) = store.find_explicit_ref_group(name).await? {
      return Ok(existing);
    }
    let candidate =
      ExplicitRefGroup { group_id: Uuid::new_v4(), name: name.to_owned() };
    match store.insert_explicit_ref_group(&candidate).await {
      Ok(()) => return Ok(candidate),
      Err(StoreError::UniqueViolation(_)) => continue,
      Err(e) => return Err(e.into()),
    }
  }
}

async fn get_or_create_explicit_ref(
  store: &VigilStore,
  name: &str,
  group_id: Option<Uuid>,
) -> Result<ExplicitRef> {
  loop {
    if let Some(existing) = store.find_explicit_ref(name).await? {
      // Lazy group attachment: a reference first seen bare adopts the group
      // of a later declaration, but never switches groups.
      if existing.group_id.is_none()
        && let Some(group_id) = group_id
      {
        store
          .attach_explicit_ref_group(existing.explicit_ref_id, group_id)
          .await?;
        return Ok(ExplicitRef { group_id: Some(group_id), ..existing });
      }
      return Ok(existing);
    }
    let candidate = ExplicitRef {
      explicit_ref_id: Uuid::new_v4(),
      name: name.to_owned(),
      group_id,
      ingestion_time: Utc::now(),
    };
    match store.insert_explicit_ref(&candidate).await {
      Ok(()) => return Ok(candidate),
      Err(StoreError::UniqueViolation(_)) => continue,
      Err(e) => return Err(e.into()),
    }
  }
}

async fn get_or_create_ref_link(
  store: &VigilStore,
  from: Uuid,
  to: Uuid,
  name: &str,
) -> Result<ExplicitRefLink> {
  loop {
    if let Some(existing) = store.find_explicit_ref_link(from, to, name).await?
    {
      return Ok(existing);
    }
    let candidate = ExplicitRefLink {
      link_id: Uuid::new_v4(),
      explicit_ref_id_from: from,
      explicit_ref_id_to: to,
      name: name.to_owned(),
    };
    match store.insert_explicit_ref_link(&candidate).await {
      Ok(()) => return Ok(candidate),
      Err(StoreError::UniqueViolation(_)) => continue,
      Err(e) => return Err(e.into()),
    }
  }
}

/// Resolve every reference the operation names into the context's id maps,
/// creating the missing ones.
pub async fn register_references(
  store: &VigilStore,
  ctx: &mut IngestContext,
  op: &InsertOperation,
) -> Result<()> {
  let dim_id = ctx.dim_signature.dim_signature_id;

  for event in &op.events {
    let key = scope_key(&event.gauge.name, &event.gauge.system);
    if !ctx.gauges.contains_key(&key) {
      let gauge =
        get_or_create_gauge(store, dim_id, &event.gauge.name, &event.gauge.system)
          .await?;
      ctx.gauges.insert(key, gauge);
    }
    if let Some(name) = &event.explicit_reference
      && !ctx.explicit_refs.contains_key(name)
    {
      let er = get_or_create_explicit_ref(store, name, None).await?;
      ctx.explicit_refs.insert(name.clone(), er);
    }
  }

  for annotation in &op.annotations {
    let key =
      scope_key(&annotation.annotation_cnf.name, &annotation.annotation_cnf.system);
    if !ctx.annotation_cnfs.contains_key(&key) {
      let cnf = get_or_create_annotation_cnf(
        store,
        dim_id,
        &annotation.annotation_cnf.name,
        &annotation.annotation_cnf.system,
      )
      .await?;
      ctx.annotation_cnfs.insert(key, cnf);
    }
    let name = &annotation.explicit_reference;
    if !ctx.explicit_refs.contains_key(name) {
      let er = get_or_create_explicit_ref(store, name, None).await?;
      ctx.explicit_refs.insert(name.clone(), er);
    }
  }

  // Explicit declarations come last so a declared group wins over the bare
  // creation performed for an event/annotation reference above.
  for declaration in &op.explicit_references {
    let group_id = match &declaration.group {
      Some(group_name) => Some(get_or_create_group(store, group_name).await?.group_id),
      None => None,
    };
    let er =
      get_or_create_explicit_ref(store, &declaration.name, group_id).await?;
    ctx.explicit_refs.insert(declaration.name.clone(), er.clone());

    for link in &declaration.links {
      let target = match ctx.explicit_refs.get(&link.link) {
        Some(known) => known.clone(),
        None => {
          let created =
            get_or_create_explicit_ref(store, &link.link, None).await?;
          ctx.explicit_refs.insert(link.link.clone(), created.clone());
          created
        }
      };
      get_or_create_ref_link(
        store,
        er.explicit_ref_id,
        target.explicit_ref_id,
        &link.name,
      )
      .await?;
      if let Some(back_name) = &link.back_ref {
        get_or_create_ref_link(
          store,
          target.explicit_ref_id,
          er.explicit_ref_id,
          back_name,
        )
        .await?;
      }
    }
  }

  Ok(())
}
