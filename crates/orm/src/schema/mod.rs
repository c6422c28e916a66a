//! Record-type schemas
//!
//! An ordered collection of field descriptors with the structural
//! invariants checked at build time: unique logical names, exactly one
//! identity field, at most one geometry field. Fields are listed once per
//! record type through the builder; ordering is the explicit `order` key
//! with declaration order breaking ties.

pub mod field;
pub mod scales;

use std::collections::HashMap;

use crate::error::{OrmError, OrmResult};
use crate::schema::field::FieldDescriptor;

/// The ordered field schema of a record type
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, usize>,
    identity: usize,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder { fields: Vec::new() }
    }

    /// Look up a field by logical name
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name).map(|&idx| &self.fields[idx])
    }

    /// Look up a field by logical name, failing on unknown names
    pub fn descriptor(&self, name: &str) -> OrmResult<&FieldDescriptor> {
        self.field(name)
            .ok_or_else(|| OrmError::InvalidField(name.to_string()))
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub(crate) fn fields_mut(&mut self) -> &mut [FieldDescriptor] {
        &mut self.fields
    }

    /// The identity field
    pub fn identity(&self) -> &FieldDescriptor {
        &self.fields[self.identity]
    }

    /// The geometry field, if the schema has one
    pub fn geometry(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.is_geometry())
    }

    /// Resolve a logical name to its storage name
    pub fn storage_name(&self, name: &str) -> OrmResult<&str> {
        self.descriptor(name).map(|field| field.storage_name.as_str())
    }

    /// Reverse lookup: the logical name bound to a storage column
    pub fn logical_for_storage(&self, storage_name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.storage_name == storage_name)
            .map(|field| field.name.as_str())
    }

    /// Logical names in schema order
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.name.as_str()).collect()
    }

    /// Storage names of the columns fetched by default: bound, not deferred
    pub fn fetch_storage_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|field| field.is_bound() && !field.deferred)
            .map(|field| field.storage_name.clone())
            .collect()
    }
}

/// Builds a schema, assigning declaration order and checking invariants
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<FieldDescriptor>,
}

impl SchemaBuilder {
    pub fn field(mut self, mut field: FieldDescriptor) -> Self {
        field.creation_index = self.fields.len();
        self.fields.push(field);
        self
    }

    pub fn build(self) -> OrmResult<Schema> {
        let mut fields = self.fields;
        fields.sort_by_key(|field| (field.order, field.creation_index));

        let mut by_name = HashMap::new();
        for (idx, field) in fields.iter().enumerate() {
            if by_name.insert(field.name.clone(), idx).is_some() {
                return Err(OrmError::Configuration(format!(
                    "Duplicate field name: {}",
                    field.name
                )));
            }
        }

        let identities: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.is_identity())
            .map(|(idx, _)| idx)
            .collect();
        let identity = match identities.as_slice() {
            [idx] => *idx,
            [] => {
                return Err(OrmError::Configuration(
                    "Schema requires exactly one identity field".to_string(),
                ))
            }
            _ => {
                return Err(OrmError::Configuration(
                    "Schema has more than one identity field".to_string(),
                ))
            }
        };

        let geometries = fields.iter().filter(|field| field.is_geometry()).count();
        if geometries > 1 {
            return Err(OrmError::Configuration(
                "Schema has more than one geometry field".to_string(),
            ));
        }

        Ok(Schema {
            fields,
            by_name,
            identity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget_schema() -> OrmResult<Schema> {
        Schema::builder()
            .field(FieldDescriptor::object_id("OBJECTID", "OID"))
            .field(FieldDescriptor::string("widget_name", "Widget Name").required())
            .field(FieldDescriptor::numeric("widget_number", "Widget Number"))
            .field(FieldDescriptor::geometry("Shape", "Shape"))
            .build()
    }

    #[test]
    fn fields_keep_declaration_order() {
        let schema = widget_schema().unwrap();
        assert_eq!(
            schema.names(),
            vec!["OBJECTID", "widget_name", "widget_number", "Shape"]
        );
    }

    #[test]
    fn explicit_order_overrides_declaration_order() {
        let schema = Schema::builder()
            .field(FieldDescriptor::object_id("OBJECTID", "OID"))
            .field(FieldDescriptor::string("b", "B"))
            .field(FieldDescriptor::string("a", "A").with_order(-1))
            .build()
            .unwrap();
        assert_eq!(schema.names(), vec!["a", "OBJECTID", "b"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = Schema::builder()
            .field(FieldDescriptor::object_id("OBJECTID", "OID"))
            .field(FieldDescriptor::string("name", "Name"))
            .field(FieldDescriptor::string("name", "Name Again"))
            .build();
        assert!(matches!(result, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn exactly_one_identity_required() {
        let result = Schema::builder()
            .field(FieldDescriptor::string("name", "Name"))
            .build();
        assert!(matches!(result, Err(OrmError::Configuration(_))));

        let result = Schema::builder()
            .field(FieldDescriptor::object_id("a", "A"))
            .field(FieldDescriptor::object_id("b", "B"))
            .build();
        assert!(matches!(result, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn at_most_one_geometry() {
        let result = Schema::builder()
            .field(FieldDescriptor::object_id("OBJECTID", "OID"))
            .field(FieldDescriptor::geometry("Shape", "Shape"))
            .field(FieldDescriptor::geometry("Shape2", "Shape 2"))
            .build();
        assert!(matches!(result, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn unknown_field_lookup_fails() {
        let schema = widget_schema().unwrap();
        assert!(matches!(
            schema.descriptor("nope"),
            Err(OrmError::InvalidField(_))
        ));
    }
}
