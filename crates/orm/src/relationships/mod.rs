//! Relationships between datasets
//!
//! Metadata for the three relationship shapes (to-one via a foreign-key
//! field, to-many via a foreign key on the related table, and many-to-many
//! via an explicit join dataset), plus the batched prefetch executors that
//! resolve a relationship for an entire fetched result set at once.

pub mod prefetch;

use crate::dataset::{Dataset, DatasetRegistry};
use crate::error::{OrmError, OrmResult};
use crate::schema::field::FieldKind;
use crate::schema::Schema;

/// The shape of a relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipKind {
    /// This dataset holds a foreign-key field named after the relationship
    BelongsTo,
    /// The related table holds a foreign key referencing this identity
    HasMany {
        /// Storage column on the related table
        foreign_key: String,
    },
    /// Rows relate through a join dataset holding both foreign keys
    ManyToMany {
        /// Join dataset name
        join: String,
        /// Join column referencing this dataset's identity
        near_key: String,
        /// Join column referencing the related dataset's identity
        far_key: String,
    },
}

/// A named relationship from one dataset to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub name: String,
    pub related: String,
    pub kind: RelationshipKind,
}

/// Keys resolved for compiling a relationship-scoped condition into a
/// correlated sub-select
#[derive(Debug, Clone)]
pub(crate) struct ScopeKeys {
    /// Column compared on the outer table
    pub outer: String,
    /// Column selected from the inner table
    pub inner: String,
    /// Inner table name
    pub table: String,
}

impl Relationship {
    /// A to-one relationship through the foreign-key field `name`
    pub fn belongs_to(name: impl Into<String>, related: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            related: related.into(),
            kind: RelationshipKind::BelongsTo,
        }
    }

    /// A to-many relationship keyed by `foreign_key` on the related table
    pub fn has_many(
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            related: related.into(),
            kind: RelationshipKind::HasMany {
                foreign_key: foreign_key.into(),
            },
        }
    }

    /// A many-to-many relationship through the join dataset `join`
    pub fn many_to_many(
        name: impl Into<String>,
        related: impl Into<String>,
        join: impl Into<String>,
        near_key: impl Into<String>,
        far_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            related: related.into(),
            kind: RelationshipKind::ManyToMany {
                join: join.into(),
                near_key: near_key.into(),
                far_key: far_key.into(),
            },
        }
    }

    /// Check the parts of the relationship visible from the owning schema
    pub(crate) fn validate_local(&self, schema: &Schema) -> OrmResult<()> {
        match &self.kind {
            RelationshipKind::BelongsTo => {
                let field = schema.descriptor(&self.name).map_err(|_| {
                    OrmError::Configuration(format!(
                        "Relationship {} has no matching foreign-key field",
                        self.name
                    ))
                })?;
                match &field.kind {
                    FieldKind::ForeignKey { related } if *related == self.related => Ok(()),
                    FieldKind::ForeignKey { related } => Err(OrmError::Configuration(format!(
                        "Foreign-key field {} references {}, not {}",
                        self.name, related, self.related
                    ))),
                    _ => Err(OrmError::Configuration(format!(
                        "Relationship {} requires a foreign-key field",
                        self.name
                    ))),
                }
            }
            RelationshipKind::HasMany { foreign_key } | RelationshipKind::ManyToMany {
                near_key: foreign_key,
                ..
            } => {
                if foreign_key.is_empty() {
                    return Err(OrmError::Configuration(format!(
                        "Relationship {} is missing its foreign key",
                        self.name
                    )));
                }
                Ok(())
            }
        }
    }

    /// Resolve the correlation keys used to compile a scoped condition
    pub(crate) fn scope_keys(
        &self,
        origin: &Dataset,
        registry: &DatasetRegistry,
    ) -> OrmResult<ScopeKeys> {
        let related = registry.dataset(&self.related)?;
        match &self.kind {
            RelationshipKind::HasMany { foreign_key } => Ok(ScopeKeys {
                outer: origin.schema().identity().storage_name.clone(),
                inner: foreign_key.clone(),
                table: related.table().to_string(),
            }),
            RelationshipKind::BelongsTo => Ok(ScopeKeys {
                outer: origin.schema().storage_name(&self.name)?.to_string(),
                inner: related.schema().identity().storage_name.clone(),
                table: related.table().to_string(),
            }),
            RelationshipKind::ManyToMany { .. } => Err(OrmError::Configuration(format!(
                "Conditions cannot traverse many-to-many relationship {}; filter through the join dataset",
                self.name
            ))),
        }
    }
}
