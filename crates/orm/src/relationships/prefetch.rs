//! Batched relationship resolution
//!
//! After a result set fetches, each queued relationship resolves for the
//! whole batch at once: one extra query for a to-one or to-many
//! relationship, two for many-to-many. Results land in each record's
//! per-instance cache, which the relationship accessors consult before
//! falling back to individual queries.

use tracing::debug;

use crate::dataset::{Dataset, DatasetRegistry};
use crate::error::{OrmError, OrmResult};
use crate::record::{Prefetched, Record};
use crate::relationships::{Relationship, RelationshipKind};
use crate::value::Value;

/// Resolve the named relationships for every record in the batch
pub(crate) fn run_prefetch(
    records: &mut [Record],
    dataset: &Dataset,
    registry: &DatasetRegistry,
    names: &[String],
) -> OrmResult<()> {
    for name in names {
        let relationship = dataset.relationship(name)?.clone();
        debug!(
            "Prefetching {} for {} records of {}",
            name,
            records.len(),
            dataset.name()
        );
        match &relationship.kind {
            RelationshipKind::BelongsTo => {
                prefetch_to_one(records, &relationship, registry)?;
            }
            RelationshipKind::HasMany { foreign_key } => {
                prefetch_to_many(records, &relationship, foreign_key, dataset, registry)?;
            }
            RelationshipKind::ManyToMany {
                join,
                near_key,
                far_key,
            } => {
                prefetch_many_to_many(
                    records,
                    &relationship,
                    join,
                    near_key,
                    far_key,
                    dataset,
                    registry,
                )?;
            }
        }
    }
    Ok(())
}

// One query: related rows whose identity is among the batch's foreign-key
// values, mapped back by identity.
fn prefetch_to_one(
    records: &mut [Record],
    relationship: &Relationship,
    registry: &DatasetRegistry,
) -> OrmResult<()> {
    let related = registry.dataset(&relationship.related)?;
    let pk_name = related.schema().identity().name.clone();

    let foreign_keys = collect_values(records, &relationship.name);
    let fetched = if foreign_keys.is_empty() {
        Vec::new()
    } else {
        registry
            .query(&relationship.related)?
            .filter([(format!("{}__in", pk_name), Value::List(foreign_keys))])
            .into_records()?
    };

    for record in records {
        let foreign_key = record
            .raw_value(&relationship.name)
            .cloned()
            .map(Value::into_raw)
            .unwrap_or(Value::Null);
        let resolved = if foreign_key.is_null() {
            None
        } else {
            fetched
                .iter()
                .find(|candidate| candidate.identity() == foreign_key)
                .cloned()
        };
        record
            .prefetch_cache
            .insert(relationship.name.clone(), Prefetched::One(resolved));
    }
    Ok(())
}

// One query: related rows whose foreign key is among the batch's
// identities, bucketed by foreign-key value.
fn prefetch_to_many(
    records: &mut [Record],
    relationship: &Relationship,
    foreign_key: &str,
    dataset: &Dataset,
    registry: &DatasetRegistry,
) -> OrmResult<()> {
    let related = registry.dataset(&relationship.related)?;
    let fk_name = related
        .schema()
        .logical_for_storage(foreign_key)
        .ok_or_else(|| {
            OrmError::Configuration(format!(
                "Related dataset {} has no field stored as {}",
                relationship.related, foreign_key
            ))
        })?
        .to_string();
    let pk_name = dataset.schema().identity().name.clone();

    let identities = collect_values(records, &pk_name);
    let fetched = if identities.is_empty() {
        Vec::new()
    } else {
        registry
            .query(&relationship.related)?
            .filter([(format!("{}__in", fk_name), Value::List(identities))])
            .into_records()?
    };

    for record in records {
        let identity = record.identity();
        let bucket: Vec<Record> = fetched
            .iter()
            .filter(|candidate| {
                candidate
                    .raw_value(&fk_name)
                    .map_or(false, |value| *value == identity)
            })
            .cloned()
            .collect();
        record
            .prefetch_cache
            .insert(relationship.name.clone(), Prefetched::Many(bucket));
    }
    Ok(())
}

// Two queries: join rows keyed by the near foreign key, then far rows keyed
// by the collected far foreign keys, grouped per batch record.
fn prefetch_many_to_many(
    records: &mut [Record],
    relationship: &Relationship,
    join: &str,
    near_key: &str,
    far_key: &str,
    dataset: &Dataset,
    registry: &DatasetRegistry,
) -> OrmResult<()> {
    let join_ds = registry.dataset(join)?;
    let near_name = resolve_join_field(&join_ds, join, near_key)?;
    let far_name = resolve_join_field(&join_ds, join, far_key)?;
    let related = registry.dataset(&relationship.related)?;
    let related_pk = related.schema().identity().name.clone();
    let pk_name = dataset.schema().identity().name.clone();

    let identities = collect_values(records, &pk_name);
    let join_rows = if identities.is_empty() {
        Vec::new()
    } else {
        registry
            .query(join)?
            .filter([(format!("{}__in", near_name), Value::List(identities))])
            .into_records()?
    };

    let mut far_ids = Vec::new();
    for row in &join_rows {
        if let Some(value) = row.raw_value(&far_name) {
            if !value.is_null() && !far_ids.contains(value) {
                far_ids.push(value.clone());
            }
        }
    }

    let far_records = if far_ids.is_empty() {
        Vec::new()
    } else {
        registry
            .query(&relationship.related)?
            .filter([(format!("{}__in", related_pk), Value::List(far_ids))])
            .into_records()?
    };

    for record in records {
        let identity = record.identity();
        // Far records in join-row order.
        let mut bucket = Vec::new();
        for row in &join_rows {
            let near = row.raw_value(&near_name);
            if near.map_or(true, |value| *value != identity) {
                continue;
            }
            let Some(far) = row.raw_value(&far_name) else {
                continue;
            };
            if let Some(found) = far_records
                .iter()
                .find(|candidate| candidate.identity() == *far)
            {
                bucket.push(found.clone());
            }
        }
        record
            .prefetch_cache
            .insert(relationship.name.clone(), Prefetched::Many(bucket));
    }
    Ok(())
}

fn resolve_join_field(join_ds: &Dataset, join: &str, storage_key: &str) -> OrmResult<String> {
    join_ds
        .schema()
        .logical_for_storage(storage_key)
        .map(str::to_string)
        .ok_or_else(|| {
            OrmError::Configuration(format!(
                "Join dataset {} has no field stored as {}",
                join, storage_key
            ))
        })
}

// Distinct, non-null resolved values of a field across the batch.
fn collect_values(records: &[Record], name: &str) -> Vec<Value> {
    let mut values = Vec::new();
    for record in records {
        if let Some(value) = record.raw_value(name) {
            let value = value.clone().into_raw();
            if !value.is_null() && !values.contains(&value) {
                values.push(value);
            }
        }
    }
    values
}
