//! Record lifecycle: validate, serialize, diff, save
//!
//! A record is constructed (identity absent), then persisted by `save`,
//! which inserts or updates inside a scoped edit session and folds the
//! written values into the persisted snapshot. Change detection runs
//! through each field's storage scale so backend rounding never reports a
//! spurious change.

use tracing::debug;

use crate::backends::with_edit;
use crate::error::{OrmError, OrmResult};
use crate::record::{Record, Slot};
use crate::value::Value;

impl Record {
    /// Validate every resolved, non-relationship, non-calculated field and
    /// return the collected messages. Validation never fails the record;
    /// callers batch-report the messages.
    pub fn validate(&self) -> Vec<String> {
        let mut messages = Vec::new();
        for field in self.dataset().schema().fields() {
            if field.is_calculated() || field.is_relationship() {
                continue;
            }
            let value = match self.slot(&field.name) {
                // Unloaded columns are not validated.
                Some(Slot::Deferred(_)) => continue,
                Some(Slot::Value(value)) => value.clone(),
                None => Value::Null,
            };

            // Conditional requirements need the whole record, so they are
            // checked here rather than by the field.
            let conditionally_missing = value.is_null()
                && field
                    .required_if
                    .as_ref()
                    .map_or(false, |required_if| required_if(self));
            if conditionally_missing {
                messages.push(format!("{} is missing", field.label));
            } else {
                messages.extend(field.validate(&value));
            }
        }
        messages
    }

    /// Storage values for every bound field whose value is resolved.
    /// Identity and foreign-key values pass through raw; calculated fields
    /// contribute their computed value.
    pub fn serialize(&self) -> OrmResult<Vec<(String, Value)>> {
        let mut values = Vec::new();
        for field in self.dataset().schema().fields() {
            if !field.is_bound() {
                continue;
            }
            let value = if field.is_calculated() {
                field.compute(self)?.into_raw()
            } else {
                match self.slot(&field.name) {
                    Some(Slot::Deferred(_)) => continue,
                    Some(Slot::Value(value)) => value.clone().into_raw(),
                    None => Value::Null,
                }
            };
            values.push((field.storage_name.clone(), value));
        }
        Ok(values)
    }

    /// Per-field changes against the persisted snapshot, keyed by logical
    /// name, comparing at each field's storage scale
    pub fn diff(&self) -> OrmResult<Vec<(String, (Value, Value))>> {
        let schema = self.dataset().schema();
        let mut changes = Vec::new();
        for (storage_name, new) in self.serialize()? {
            let Some(logical) = schema.logical_for_storage(&storage_name) else {
                continue;
            };
            let field = schema.descriptor(logical)?;
            let old = self
                .snapshot
                .get(&storage_name)
                .cloned()
                .unwrap_or(Value::Null);
            if field.has_changed(&old, &new) {
                changes.push((logical.to_string(), (old, new)));
            }
        }
        Ok(changes)
    }

    /// Persist the record: insert when the identity is absent, otherwise
    /// update the changed fields by identity. Returns whether anything was
    /// written. An update matching zero rows is fatal — the row is gone.
    pub fn save(&mut self) -> OrmResult<bool> {
        if self.identity().is_null() {
            self.insert()
        } else {
            self.update()
        }
    }

    fn insert(&mut self) -> OrmResult<bool> {
        let identity_field = self.dataset().schema().identity().clone();
        let values: Vec<(String, Value)> = self
            .serialize()?
            .into_iter()
            .filter(|(storage_name, _)| *storage_name != identity_field.storage_name)
            .collect();
        let columns: Vec<String> = values.iter().map(|(name, _)| name.clone()).collect();
        let row: Vec<Value> = values.iter().map(|(_, value)| value.clone()).collect();

        let store = self.dataset().store_arc();
        let table = self.dataset().table().to_string();
        let identity = with_edit(store.as_ref(), || store.insert(&table, &columns, &row))?;
        debug!("Inserted {} row {:?}", table, identity);

        self.set(&identity_field.name, identity.clone())?;
        for (storage_name, value) in values {
            self.snapshot.insert(storage_name, value);
        }
        self.snapshot
            .insert(identity_field.storage_name.clone(), identity);
        Ok(true)
    }

    fn update(&mut self) -> OrmResult<bool> {
        let changes = self.diff()?;
        if changes.is_empty() {
            return Ok(false);
        }

        let schema = self.dataset().schema();
        let mut columns = Vec::with_capacity(changes.len());
        let mut row = Vec::with_capacity(changes.len());
        for (logical, (_, new)) in &changes {
            columns.push(schema.storage_name(logical)?.to_string());
            row.push(new.clone());
        }

        let identity = self.identity();
        let where_clause = self.identity_clause(&identity)?;
        let store = self.dataset().store_arc();
        let table = self.dataset().table().to_string();

        with_edit(store.as_ref(), || {
            let mut affected = 0;
            for (_, handle) in
                store.iterate(&table, &columns, true, Some(&where_clause), None, None, None)?
            {
                let handle = handle.ok_or_else(|| {
                    OrmError::Backend("Store returned no write handle".to_string())
                })?;
                store.update(&handle, &columns, &row)?;
                affected += 1;
            }
            if affected == 0 {
                return Err(OrmError::RowVanished(where_clause.clone()));
            }
            Ok(())
        })?;
        debug!("Updated {} fields on {} {}", columns.len(), table, where_clause);

        for (column, value) in columns.iter().zip(row) {
            self.snapshot.insert(column.clone(), value);
        }
        Ok(true)
    }
}
