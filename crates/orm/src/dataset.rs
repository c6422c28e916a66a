//! Datasets
//!
//! A dataset is a record-type schema bound to a concrete table of a row
//! store. Registration fills in storage bindings, domain choices, and
//! numeric ranges from the backend; the result is immutable until an
//! explicit rebind (`sync_fields`). The dataset registry is the explicit
//! entry point for queries and record construction.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::backends::{ColumnInfo, ColumnKind, RowStore};
use crate::error::{OrmError, OrmResult};
use crate::query::queryset::QuerySet;
use crate::record::Record;
use crate::relationships::Relationship;
use crate::schema::field::{FieldDescriptor, FieldKind, MethodFn};
use crate::schema::Schema;
use crate::value::Value;

/// A record type declaration awaiting registration with a store
pub struct DatasetDef {
    name: String,
    table: Option<String>,
    schema: Option<Schema>,
    relationships: Vec<Relationship>,
    methods: Vec<(String, MethodFn)>,
}

impl DatasetDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            schema: None,
            relationships: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Bind to a table name different from the dataset name
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Register a named computation routine used by method-calculated fields
    pub fn method(mut self, name: impl Into<String>, method: MethodFn) -> Self {
        self.methods.push((name.into(), method));
        self
    }
}

/// A schema bound to a store table
pub struct Dataset {
    name: String,
    table: String,
    store: Arc<dyn RowStore>,
    schema: Schema,
    relationships: HashMap<String, Relationship>,
    methods: HashMap<String, MethodFn>,
}

impl Dataset {
    /// Bind a definition to a store, filling storage information from the
    /// backend table. Fails when a field has no storage column and no
    /// storage spec to create one from.
    pub fn register(def: DatasetDef, store: Arc<dyn RowStore>) -> OrmResult<Self> {
        let DatasetDef {
            name,
            table,
            schema,
            relationships,
            methods,
        } = def;
        let table = table.unwrap_or_else(|| name.clone());
        let mut schema = schema.ok_or_else(|| {
            OrmError::Configuration(format!("Dataset {} has no schema", name))
        })?;

        let columns = store.schema(&table)?;
        for field in schema.fields_mut() {
            bind_field(field, &columns, store.as_ref(), &table)?;
        }

        let mut relationship_map = HashMap::new();
        for relationship in relationships {
            relationship.validate_local(&schema)?;
            if relationship_map
                .insert(relationship.name.clone(), relationship)
                .is_some()
            {
                return Err(OrmError::Configuration(format!(
                    "Duplicate relationship name in dataset {}",
                    name
                )));
            }
        }

        debug!("Registered dataset {} against table {}", name, table);
        Ok(Self {
            name,
            table,
            store,
            schema,
            relationships: relationship_map,
            methods: methods.into_iter().collect(),
        })
    }

    /// Build a definition by introspecting an existing table
    pub fn introspect(
        name: impl Into<String>,
        table: impl Into<String>,
        store: &dyn RowStore,
    ) -> OrmResult<DatasetDef> {
        let name = name.into();
        let table = table.into();
        let mut builder = Schema::builder();
        for column in store.schema(&table)? {
            let name = column.name.as_str();
            let mut field = match column.kind {
                ColumnKind::ObjectId => FieldDescriptor::object_id(name, name),
                ColumnKind::GlobalId => FieldDescriptor::global_id(name, name),
                ColumnKind::Geometry => FieldDescriptor::geometry(name, name),
                ColumnKind::Text => FieldDescriptor::string(name, name),
                ColumnKind::Blob => FieldDescriptor::blob(name, name),
                // Dates and anything else store as numerics for now.
                _ => FieldDescriptor::numeric(name, name),
            };
            if column.required {
                field = field.required();
            }
            builder = builder.field(field);
        }
        Ok(DatasetDef::new(name).table(table).schema(builder.build()?))
    }

    /// Re-run storage binding against the current backend table
    pub(crate) fn rebind(&self) -> OrmResult<Self> {
        let columns = self.store.schema(&self.table)?;
        let mut schema = self.schema.clone();
        for field in schema.fields_mut() {
            field.bound = false;
            bind_field(field, &columns, self.store.as_ref(), &self.table)?;
        }
        Ok(Self {
            name: self.name.clone(),
            table: self.table.clone(),
            store: self.store.clone(),
            schema,
            relationships: self.relationships.clone(),
            methods: self.methods.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn store(&self) -> &dyn RowStore {
        self.store.as_ref()
    }

    pub(crate) fn store_arc(&self) -> Arc<dyn RowStore> {
        self.store.clone()
    }

    pub fn relationship(&self, name: &str) -> OrmResult<&Relationship> {
        self.relationships
            .get(name)
            .ok_or_else(|| OrmError::InvalidField(name.to_string()))
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    /// A named computation routine
    pub fn method(&self, name: &str) -> OrmResult<&MethodFn> {
        self.methods.get(name).ok_or_else(|| {
            OrmError::Configuration(format!(
                "Dataset {} has no method named {}",
                self.name, name
            ))
        })
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("schema", &self.schema)
            .field("relationships", &self.relationships)
            .finish_non_exhaustive()
    }
}

// Bind one field to its storage column, pulling domain and range
// information from the backend.
fn bind_field(
    field: &mut FieldDescriptor,
    columns: &[ColumnInfo],
    store: &dyn RowStore,
    table: &str,
) -> OrmResult<()> {
    let column = columns.iter().find(|column| column.name == field.storage_name);
    let Some(column) = column else {
        // A field with a storage spec stays unbound until sync_fields
        // creates its column; a calculated field without one is virtual.
        if field.storage.is_some() || field.is_calculated() {
            field.bound = false;
            return Ok(());
        }
        return Err(OrmError::Configuration(format!(
            "Field {} has no storage column {} in table {}",
            field.name, field.storage_name, table
        )));
    };

    field.bound = true;
    if field.domain.is_none() {
        field.domain = column.domain.clone();
    }
    if let Some(domain) = field.domain.clone() {
        let info = store.domain_info(&domain)?;
        if !info.coded_values.is_empty() {
            if field.choices.is_empty() {
                field.choices = info
                    .coded_values
                    .iter()
                    .map(|(code, _)| code.clone())
                    .collect();
            }
            field.coded_values = Some(info.coded_values);
        }
        if let (FieldKind::Numeric { min, max }, Some((lo, hi))) = (&mut field.kind, info.range) {
            if min.is_none() {
                *min = Some(lo);
            }
            if max.is_none() {
                *max = Some(hi);
            }
        }
    }
    if let (FieldKind::Numeric { min, max }, Some((lo, hi))) = (&mut field.kind, column.range) {
        if min.is_none() {
            *min = Some(lo);
        }
        if max.is_none() {
            *max = Some(hi);
        }
    }
    Ok(())
}

/// Explicit name → dataset map; the entry point for queries.
///
/// Cheap to clone; clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    inner: Arc<DashMap<String, Arc<Dataset>>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dataset definition against a store
    pub fn register(&self, def: DatasetDef, store: Arc<dyn RowStore>) -> OrmResult<Arc<Dataset>> {
        let dataset = Arc::new(Dataset::register(def, store)?);
        self.inner.insert(dataset.name().to_string(), dataset.clone());
        Ok(dataset)
    }

    /// Look up a registered dataset
    pub fn dataset(&self, name: &str) -> OrmResult<Arc<Dataset>> {
        self.inner.get(name).map(|entry| entry.clone()).ok_or_else(|| {
            OrmError::Configuration(format!(
                "Dataset {} must be registered before it can be queried",
                name
            ))
        })
    }

    /// A query over all records of a dataset
    pub fn query(&self, name: &str) -> OrmResult<QuerySet> {
        Ok(QuerySet::new(self.dataset(name)?, self.clone()))
    }

    /// Construct an unsaved record from field pairs
    pub fn record<I, K, V>(&self, name: &str, values: I) -> OrmResult<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        Record::new(self.dataset(name)?, self.clone(), values)
    }

    /// Create storage columns for unbound fields carrying a storage spec,
    /// then rebind the dataset
    pub fn sync_fields(&self, name: &str) -> OrmResult<Vec<String>> {
        let dataset = self.dataset(name)?;
        let mut added = Vec::new();
        for field in dataset.schema().fields() {
            if field.is_bound() {
                continue;
            }
            if let Some(spec) = &field.storage {
                let mut spec = spec.clone();
                if spec.alias.is_none() {
                    spec.alias = Some(field.label.clone());
                }
                dataset
                    .store()
                    .add_column(dataset.table(), &field.storage_name, &spec)?;
                added.push(field.name.clone());
            }
        }
        let rebound = Arc::new(dataset.rebind()?);
        self.inner.insert(rebound.name().to_string(), rebound);
        Ok(added)
    }

    /// Drop every registered dataset
    pub fn clear(&self) {
        self.inner.clear();
    }
}
