//! Row-store backends
//!
//! The mapping layer owns no storage. Everything it needs from the physical
//! store is expressed by the `RowStore` trait: schema introspection, row
//! iteration against rendered query text, single-row lookup, writes behind
//! opaque handles, domain lookups, aggregates, and a scoped edit session.
//! Calls are synchronous and blocking; the store either completes or fails.

pub mod memory;
pub mod registry;

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::error::OrmResult;
use crate::value::Value;

/// Storage-level column types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    ObjectId,
    GlobalId,
    Geometry,
    Text,
    Integer,
    Double,
    Date,
    Blob,
}

/// A column as reported by the store's schema introspection
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
    pub required: bool,
    pub domain: Option<String>,
    pub range: Option<(f64, f64)>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            domain: None,
            range: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }
}

/// Column definition used when adding a storage field
#[derive(Debug, Clone)]
pub struct StorageSpec {
    pub kind: ColumnKind,
    pub alias: Option<String>,
    pub domain: Option<String>,
}

impl StorageSpec {
    pub fn new(kind: ColumnKind) -> Self {
        Self {
            kind,
            alias: None,
            domain: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// A coded-value or range domain as reported by the store
#[derive(Debug, Clone)]
pub struct DomainInfo {
    pub name: String,
    pub kind: ColumnKind,
    /// Code/label pairs for coded-value domains
    pub coded_values: Vec<(Value, String)>,
    pub range: Option<(f64, f64)>,
}

/// Cardinality of a backend relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    OneToMany,
    ManyToMany,
}

/// A relationship as reported by the store
#[derive(Debug, Clone)]
pub struct RelationshipInfo {
    pub origin: String,
    pub destination: String,
    pub primary_key: String,
    pub foreign_key: String,
    pub cardinality: Cardinality,
}

/// Aggregate statistics supported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Count,
    Sum,
    Mean,
    Min,
    Max,
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatKind::Count => write!(f, "COUNT"),
            StatKind::Sum => write!(f, "SUM"),
            StatKind::Mean => write!(f, "MEAN"),
            StatKind::Min => write!(f, "MIN"),
            StatKind::Max => write!(f, "MAX"),
        }
    }
}

/// Opaque handle to a fetched row opened for writing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteHandle {
    pub table: String,
    pub token: u64,
}

/// A fetched row paired with its write handle when opened mutable
pub type FetchedRow = (Vec<Value>, Option<WriteHandle>);

/// The contract the mapping layer requires from a physical row store.
///
/// Implementations must report zero and multiple matches distinctly from
/// `get_one`, and `update` must target exactly the row behind the handle.
pub trait RowStore: fmt::Debug + Send + Sync {
    /// Columns of a table, in storage order
    fn schema(&self, table: &str) -> OrmResult<Vec<ColumnInfo>>;

    /// Number of rows matching the rendered where clause
    fn count(&self, table: &str, where_clause: Option<&str>) -> OrmResult<usize>;

    /// Fetch rows, optionally opened for writing. `prefix` and `postfix`
    /// carry rendered query decorations such as `ORDER BY` clauses.
    #[allow(clippy::too_many_arguments)]
    fn iterate(
        &self,
        table: &str,
        columns: &[String],
        mutable: bool,
        where_clause: Option<&str>,
        limit: Option<usize>,
        prefix: Option<&str>,
        postfix: Option<&str>,
    ) -> OrmResult<Vec<FetchedRow>>;

    /// Fetch exactly one row; zero matches and multiple matches fail with
    /// distinct errors
    fn get_one(
        &self,
        table: &str,
        columns: &[String],
        where_clause: Option<&str>,
    ) -> OrmResult<Vec<Value>>;

    /// Write column values through a handle returned by a mutable iterate
    fn update(&self, handle: &WriteHandle, columns: &[String], values: &[Value]) -> OrmResult<()>;

    /// Insert a row and return the generated identity
    fn insert(&self, table: &str, columns: &[String], values: &[Value]) -> OrmResult<Value>;

    /// Add a storage column to a table
    fn add_column(&self, table: &str, name: &str, spec: &StorageSpec) -> OrmResult<()>;

    /// Resolve a domain label to its stored code
    fn coded_value(&self, domain: &str, label: &str) -> OrmResult<Value>;

    /// Describe a domain
    fn domain_info(&self, domain: &str) -> OrmResult<DomainInfo>;

    /// Compute statistics over matching rows, keyed by sanitized
    /// `STAT_column` names
    fn aggregate(
        &self,
        table: &str,
        stats: &[(String, StatKind)],
        where_clause: Option<&str>,
    ) -> OrmResult<HashMap<String, Value>>;

    /// Relationships the table participates in
    fn relationship_info(&self, table: &str) -> OrmResult<Vec<RelationshipInfo>>;

    /// Open an edit session
    fn begin_edit(&self) -> OrmResult<()>;

    /// Commit the active edit session
    fn commit_edit(&self) -> OrmResult<()>;

    /// Abort the active edit session, discarding its writes
    fn abort_edit(&self) -> OrmResult<()>;
}

/// Run `f` inside a scoped edit session: begin, commit on success, abort on
/// error. Sessions are never nested and never retried.
pub fn with_edit<T>(
    store: &dyn RowStore,
    f: impl FnOnce() -> OrmResult<T>,
) -> OrmResult<T> {
    store.begin_edit()?;
    debug!("Edit session started");
    match f() {
        Ok(value) => {
            store.commit_edit()?;
            debug!("Edit session committed");
            Ok(value)
        }
        Err(err) => {
            warn!("Edit session aborted: {}", err);
            // The original error wins over a failing abort.
            let _ = store.abort_edit();
            Err(err)
        }
    }
}

/// Key for an aggregate result: `STAT_column` with anything outside
/// `[A-Za-z0-9]` replaced by underscores
pub fn stat_key(column: &str, stat: StatKind) -> String {
    let pattern = regex::Regex::new(r"[^A-Za-z0-9]").expect("static pattern");
    pattern
        .replace_all(&format!("{}_{}", stat, column), "_")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_keys_are_sanitized() {
        assert_eq!(stat_key("widget_number", StatKind::Sum), "SUM_widget_number");
        assert_eq!(stat_key("odd name", StatKind::Mean), "MEAN_odd_name");
    }
}
