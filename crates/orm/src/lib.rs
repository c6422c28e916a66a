//! # atlas-orm: object mapping for tabular record stores
//!
//! A client-side query and object-mapping layer: declarative filter
//! expressions compiled to backend query text, lazily fetched result sets
//! with batched relationship prefetching, derived field values, and a
//! record lifecycle (validate, diff, save) over a pluggable synchronous
//! row-store contract.
//!
//! The physical store lives behind the [`backends::RowStore`] trait; an
//! in-memory implementation backs the test suite and small tools.

pub mod backends;
pub mod conditions;
pub mod dataset;
pub mod error;
pub mod query;
pub mod record;
pub mod relationships;
pub mod schema;
pub mod value;

// Re-export the core surface
pub use backends::memory::MemoryStore;
pub use backends::registry::StoreRegistry;
pub use backends::{
    with_edit, ColumnInfo, ColumnKind, DomainInfo, RowStore, StatKind, StorageSpec,
};
pub use conditions::ordering::{Direction, OrderBy};
pub use conditions::{CompareOp, Condition};
pub use dataset::{Dataset, DatasetDef, DatasetRegistry};
pub use error::{OrmError, OrmResult};
pub use query::queryset::{QuerySet, SummaryRow, SummaryStat};
pub use record::Record;
pub use relationships::Relationship;
pub use schema::field::{FieldDescriptor, ScaleOption};
pub use schema::scales::{Level, Scale};
pub use schema::Schema;
pub use value::{CodedValue, Label, Value};
