//! Records
//!
//! A record holds the current field values of one row (with placeholders
//! for deferred columns), a snapshot of the last persisted values, and a
//! per-instance cache of prefetched relationships. Attribute access
//! resolves calculated fields, wraps domain-coded values, and loads
//! deferred columns on first use.

mod lifecycle;

use std::collections::HashMap;
use std::sync::Arc;

use crate::conditions::Condition;
use crate::dataset::{Dataset, DatasetRegistry};
use crate::error::{OrmError, OrmResult};
use crate::query::compiler::QueryCompiler;
use crate::query::queryset::QuerySet;
use crate::relationships::RelationshipKind;
use crate::schema::field::FieldDescriptor;
use crate::value::{DeferredValue, Value};

/// One stored attribute: a value, or a placeholder for a column that has
/// not been fetched yet
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Value(Value),
    Deferred(DeferredValue),
}

/// A relationship resolved ahead of time for this record
#[derive(Debug, Clone)]
pub enum Prefetched {
    One(Option<Record>),
    Many(Vec<Record>),
}

/// A single row of a dataset
#[derive(Debug, Clone)]
pub struct Record {
    dataset: Arc<Dataset>,
    registry: DatasetRegistry,
    values: HashMap<String, Slot>,
    /// Persisted values by storage name; deferred columns are absent
    snapshot: HashMap<String, Value>,
    pub(crate) prefetch_cache: HashMap<String, Prefetched>,
}

impl Record {
    /// Construct an unsaved record from field pairs
    pub fn new<I, K, V>(
        dataset: Arc<Dataset>,
        registry: DatasetRegistry,
        values: I,
    ) -> OrmResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut record = Self {
            dataset,
            registry,
            values: HashMap::new(),
            snapshot: HashMap::new(),
            prefetch_cache: HashMap::new(),
        };
        for (name, value) in values {
            record.set(name.as_ref(), value)?;
        }
        Ok(record)
    }

    /// Materialize a record from a fetched row, keyed by storage name.
    /// Columns the schema knows but the row lacks become deferred slots.
    pub(crate) fn from_row(
        dataset: Arc<Dataset>,
        registry: DatasetRegistry,
        row: HashMap<String, Value>,
    ) -> Self {
        let mut values = HashMap::new();
        for field in dataset.schema().fields() {
            let slot = match row.get(&field.storage_name) {
                Some(value) => Slot::Value(value.clone()),
                None => Slot::Deferred(DeferredValue::new(
                    field.name.clone(),
                    field.storage_name.clone(),
                )),
            };
            values.insert(field.name.clone(), slot);
        }
        Self {
            dataset,
            registry,
            values,
            snapshot: row,
            prefetch_cache: HashMap::new(),
        }
    }

    pub fn dataset(&self) -> &Dataset {
        self.dataset.as_ref()
    }

    /// Current value of a field, resolving calculated fields and loading a
    /// deferred column; the loaded value is cached on the record
    pub fn get(&mut self, name: &str) -> OrmResult<Value> {
        let field = self.dataset.schema().descriptor(name)?.clone();
        if field.is_calculated() {
            return field.compute(self);
        }
        if let Some(Slot::Deferred(_)) = self.values.get(name) {
            let loaded = self.fetch_deferred(&field)?;
            self.values
                .insert(name.to_string(), Slot::Value(loaded.clone()));
            return Ok(wrap_coded(&field, loaded));
        }
        self.value(name)
    }

    /// Current value of a field without caching a deferred load
    pub fn value(&self, name: &str) -> OrmResult<Value> {
        let field = self.dataset.schema().descriptor(name)?;
        if field.is_calculated() {
            return field.compute(self);
        }
        match self.values.get(name) {
            None => Ok(Value::Null),
            Some(Slot::Value(value)) => Ok(wrap_coded(field, value.clone())),
            Some(Slot::Deferred(_)) => {
                let loaded = self.fetch_deferred(field)?;
                Ok(wrap_coded(field, loaded))
            }
        }
    }

    /// The stored value of a field, if it is resolved; no computation, no
    /// deferred loading
    pub(crate) fn raw_value(&self, name: &str) -> Option<&Value> {
        match self.values.get(name) {
            Some(Slot::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn slot(&self, name: &str) -> Option<&Slot> {
        self.values.get(name)
    }

    /// Set a field value. Calculated fields reject assignment; setting a
    /// field drops any prefetched relationship cached under its name.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> OrmResult<()> {
        let field = self.dataset.schema().descriptor(name)?;
        if field.is_calculated() {
            return Err(OrmError::InvalidField(format!(
                "{} is calculated and cannot be assigned",
                name
            )));
        }
        self.values
            .insert(name.to_string(), Slot::Value(value.into()));
        self.prefetch_cache.remove(name);
        Ok(())
    }

    /// Set a domain-coded field to the code matching the given label
    pub fn set_label(&mut self, name: &str, label: &str) -> OrmResult<()> {
        let field = self.dataset.schema().descriptor(name)?;
        let domain = field.domain.clone().ok_or_else(|| {
            OrmError::Domain(format!("Field {} has no domain", name))
        })?;
        let code = self.dataset.store().coded_value(&domain, label)?;
        self.set(name, code)
    }

    /// The domain label for the current value of a field
    pub fn label_for(&self, name: &str) -> OrmResult<Option<String>> {
        let field = self.dataset.schema().descriptor(name)?;
        let value = self.value(name)?;
        if value.is_null() {
            return Ok(None);
        }
        if let Value::Coded(coded) = &value {
            return Ok(Some(coded.label.clone()));
        }
        let Some(coded_values) = &field.coded_values else {
            return Err(OrmError::Domain(format!("Field {} has no domain", name)));
        };
        Ok(coded_values
            .iter()
            .find(|(code, _)| code == value.raw())
            .map(|(_, label)| label.clone()))
    }

    /// The identity value, or null when the record has not been saved
    pub fn identity(&self) -> Value {
        let identity = self.dataset.schema().identity();
        self.raw_value(&identity.name)
            .cloned()
            .map(Value::into_raw)
            .unwrap_or(Value::Null)
    }

    /// A record is persisted once its identity is assigned
    pub fn is_persisted(&self) -> bool {
        !self.identity().is_null()
    }

    /// The single related record behind a to-one relationship. Consults the
    /// prefetch cache first; a miss falls back to an individual query.
    pub fn related(&self, name: &str) -> OrmResult<Option<Record>> {
        let relationship = self.dataset.relationship(name)?.clone();
        if relationship.kind != RelationshipKind::BelongsTo {
            return Err(OrmError::Configuration(format!(
                "Relationship {} is not to-one; use related_set",
                name
            )));
        }

        if let Some(Prefetched::One(cached)) = self.prefetch_cache.get(name) {
            return Ok(cached.clone());
        }

        let foreign_key = self.value(name)?.into_raw();
        if foreign_key.is_null() {
            return Ok(None);
        }
        let related = self.registry.dataset(&relationship.related)?;
        let pk_name = related.schema().identity().name.clone();
        let record = self
            .registry
            .query(&relationship.related)?
            .get([(pk_name, foreign_key)])?;
        Ok(Some(record))
    }

    /// A query over the records behind a to-many or many-to-many
    /// relationship. A prefetched relationship pre-populates the result
    /// cache, so iterating it issues no further queries.
    pub fn related_set(&self, name: &str) -> OrmResult<QuerySet> {
        let relationship = self.dataset.relationship(name)?.clone();
        let identity = self.identity();

        match &relationship.kind {
            RelationshipKind::BelongsTo => Err(OrmError::Configuration(format!(
                "Relationship {} is to-one; use related",
                name
            ))),
            RelationshipKind::HasMany { foreign_key } => {
                let related = self.registry.dataset(&relationship.related)?;
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
                let mut qs = self
                    .registry
                    .query(&relationship.related)?
                    .filter([(fk_name, identity)]);
                if let Some(Prefetched::Many(records)) = self.prefetch_cache.get(name) {
                    qs.cache = Some(records.clone());
                }
                Ok(qs)
            }
            RelationshipKind::ManyToMany {
                join,
                near_key,
                far_key,
            } => {
                let related = self.registry.dataset(&relationship.related)?;
                let pk_name = related.schema().identity().name.clone();

                if let Some(Prefetched::Many(records)) = self.prefetch_cache.get(name) {
                    let ids: Vec<Value> =
                        records.iter().map(Record::identity).collect();
                    let mut qs = self
                        .registry
                        .query(&relationship.related)?
                        .filter([(format!("{}__in", pk_name), Value::List(ids))]);
                    qs.cache = Some(records.clone());
                    return Ok(qs);
                }

                // Fallback: resolve the join rows first, then query the far
                // side. Two queries instead of the batched prefetch.
                let join_ds = self.registry.dataset(join)?;
                let near_name = join_ds
                    .schema()
                    .logical_for_storage(near_key)
                    .ok_or_else(|| {
                        OrmError::Configuration(format!(
                            "Join dataset {} has no field stored as {}",
                            join, near_key
                        ))
                    })?
                    .to_string();
                let far_name = join_ds
                    .schema()
                    .logical_for_storage(far_key)
                    .ok_or_else(|| {
                        OrmError::Configuration(format!(
                            "Join dataset {} has no field stored as {}",
                            join, far_key
                        ))
                    })?
                    .to_string();

                let join_rows = self
                    .registry
                    .query(join)?
                    .filter([(near_name, identity)])
                    .into_records()?;
                let mut far_ids = Vec::new();
                for row in &join_rows {
                    if let Some(value) = row.raw_value(&far_name) {
                        if !value.is_null() && !far_ids.contains(value) {
                            far_ids.push(value.clone());
                        }
                    }
                }
                Ok(self
                    .registry
                    .query(&relationship.related)?
                    .filter([(format!("{}__in", pk_name), Value::List(far_ids))]))
            }
        }
    }

    // Load a deferred column with a single-row query by identity.
    fn fetch_deferred(&self, field: &FieldDescriptor) -> OrmResult<Value> {
        let identity = self.identity();
        if identity.is_null() {
            return Err(OrmError::Configuration(format!(
                "Cannot load deferred field {} on an unsaved record",
                field.name
            )));
        }
        let where_clause = self.identity_clause(&identity)?;
        let row = self.dataset.store().get_one(
            self.dataset.table(),
            &[field.storage_name.clone()],
            Some(&where_clause),
        )?;
        Ok(row.into_iter().next().unwrap_or(Value::Null))
    }

    pub(crate) fn identity_clause(&self, identity: &Value) -> OrmResult<String> {
        let identity_name = self.dataset.schema().identity().name.clone();
        let condition = Condition::from_pairs([(identity_name, identity.clone())]);
        QueryCompiler::new(self.dataset.as_ref(), &self.registry).compile(&condition)
    }
}

// Wrap a raw value in its coded-value form when the field is bound to a
// coded domain.
fn wrap_coded(field: &FieldDescriptor, value: Value) -> Value {
    if value.is_null() || matches!(value, Value::Coded(_)) {
        return value;
    }
    let Some(coded_values) = &field.coded_values else {
        return value;
    };
    match coded_values.iter().find(|(code, _)| code == &value) {
        Some((code, label)) => Value::coded(code.clone(), label.clone()),
        None => value,
    }
}
