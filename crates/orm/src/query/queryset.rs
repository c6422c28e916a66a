//! Lazy result sets
//!
//! A `QuerySet` pairs a dataset with a query and a fetch cache. Refining
//! calls (`filter`, `exclude`, `order_by`, `prefetch_related`) clone first
//! and never touch an existing cache; once fetched, the cache is never
//! mutated. Prefetched relationships are resolved in bulk right after the
//! primary fetch.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::backends::StatKind;
use crate::conditions::ordering::OrderBy;
use crate::conditions::Condition;
use crate::dataset::{Dataset, DatasetRegistry};
use crate::error::{OrmError, OrmResult};
use crate::query::compiler::QueryCompiler;
use crate::query::Query;
use crate::record::Record;
use crate::relationships::prefetch::run_prefetch;
use crate::schema::scales::Level;
use crate::value::Value;

/// An additional aggregate computed per summary bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryStat {
    /// Sum of a field across the bucket
    Sum(String),
    /// Mean of a field across the bucket
    Mean(String),
    /// Minimum of a field across the bucket
    Min(String),
    /// Maximum of a field across the bucket
    Max(String),
}

/// One bucket of a summary: a reachable level, the record count, and any
/// extra aggregates
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub level: Level,
    pub count: usize,
    pub extras: HashMap<String, Option<f64>>,
}

/// A lazily fetched, cacheable sequence of records
#[derive(Debug, Clone)]
pub struct QuerySet {
    dataset: Arc<Dataset>,
    registry: DatasetRegistry,
    query: Query,
    pub(crate) cache: Option<Vec<Record>>,
    prefetch: Vec<String>,
}

impl QuerySet {
    pub(crate) fn new(dataset: Arc<Dataset>, registry: DatasetRegistry) -> Self {
        let query = {
            let schema = dataset.schema();
            let mut query = Query::new(schema.fetch_storage_names());
            query.set_order(vec![OrderBy::asc(schema.identity().name.clone())]);
            query
        };
        Self {
            dataset,
            registry,
            query,
            cache: None,
            prefetch: Vec::new(),
        }
    }

    // A refinement always starts from a fresh cache.
    fn refine(&self) -> Self {
        Self {
            dataset: self.dataset.clone(),
            registry: self.registry.clone(),
            query: self.query.clone(),
            cache: None,
            prefetch: self.prefetch.clone(),
        }
    }

    /// A clone preserving an already fetched cache
    pub fn all(&self) -> Self {
        self.clone()
    }

    /// Restrict to records matching the given filter pairs
    pub fn filter<I, K, V>(&self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.filter_condition(Condition::from_pairs(pairs))
    }

    /// Restrict to records matching an already built condition
    pub fn filter_condition(&self, condition: Condition) -> Self {
        let mut refined = self.refine();
        refined.query.add_filter(condition);
        refined
    }

    /// Exclude records matching the given filter pairs
    pub fn exclude<I, K, V>(&self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.filter_condition(!Condition::from_pairs(pairs))
    }

    /// Order by the given fields; a `-` prefix sorts descending
    pub fn order_by(&self, fields: &[&str]) -> Self {
        self.order_by_terms(fields.iter().map(|spec| OrderBy::parse(spec)).collect())
    }

    pub fn order_by_terms(&self, order: Vec<OrderBy>) -> Self {
        let mut refined = self.refine();
        refined.query.set_order(order);
        refined
    }

    /// Queue relationships for batched resolution after the next fetch
    pub fn prefetch_related(&self, names: &[&str]) -> Self {
        let mut cloned = self.clone();
        for name in names {
            if !cloned.prefetch.iter().any(|existing| existing == name) {
                cloned.prefetch.push(name.to_string());
            }
        }
        cloned
    }

    /// The rendered where clause, if the query has a filter
    pub fn where_sql(&self) -> OrmResult<Option<String>> {
        match self.query.filter() {
            Some(condition) => {
                let compiler = QueryCompiler::new(self.dataset.as_ref(), &self.registry);
                compiler.compile(condition).map(Some)
            }
            None => Ok(None),
        }
    }

    // Rendered ORDER BY clause with logical names resolved to storage names.
    fn order_postfix(&self) -> OrmResult<Option<String>> {
        if self.query.order().is_empty() {
            return Ok(None);
        }
        let schema = self.dataset.schema();
        let terms: Vec<String> = self
            .query
            .order()
            .iter()
            .map(|term| {
                schema
                    .storage_name(&term.field)
                    .map(|storage| format!("{} {}", storage, term.direction))
            })
            .collect::<OrmResult<_>>()?;
        Ok(Some(format!("ORDER BY {}", terms.join(", "))))
    }

    /// Fetch and cache all matching records, then resolve any queued
    /// prefetches in bulk
    pub fn fetch(&mut self) -> OrmResult<()> {
        if self.cache.is_some() {
            return Ok(());
        }
        let records = self.run_query(None)?;
        let prefetch = self.prefetch.clone();
        let mut records = records;
        if !records.is_empty() && !prefetch.is_empty() {
            run_prefetch(&mut records, self.dataset.as_ref(), &self.registry, &prefetch)?;
        }
        self.cache = Some(records);
        Ok(())
    }

    /// The fetched records, fetching on first access
    pub fn records(&mut self) -> OrmResult<&[Record]> {
        self.fetch()?;
        Ok(self.cache.as_deref().unwrap_or_default())
    }

    /// Consume the set, returning its records
    pub fn into_records(mut self) -> OrmResult<Vec<Record>> {
        self.fetch()?;
        Ok(self.cache.unwrap_or_default())
    }

    // Execute the query without touching the cache.
    fn run_query(&self, limit: Option<usize>) -> OrmResult<Vec<Record>> {
        let where_clause = self.where_sql()?;
        let postfix = self.order_postfix()?;
        debug!(
            "Fetching {} where {:?}",
            self.dataset.name(),
            where_clause.as_deref().unwrap_or("<all>")
        );
        let rows = self.dataset.store().iterate(
            self.dataset.table(),
            self.query.fields(),
            false,
            where_clause.as_deref(),
            limit,
            None,
            postfix.as_deref(),
        )?;
        Ok(rows
            .into_iter()
            .map(|(row, _)| self.materialize(row))
            .collect())
    }

    // Zip a fetched row against the requested storage names; schema columns
    // missing from the projection become deferred placeholders.
    fn materialize(&self, row: Vec<Value>) -> Record {
        let row_map: HashMap<String, Value> = self
            .query
            .fields()
            .iter()
            .cloned()
            .zip(row)
            .collect();
        Record::from_row(self.dataset.clone(), self.registry.clone(), row_map)
    }

    /// Fetch with an exactly-one expectation after applying extra filters
    pub fn get<I, K, V>(&self, pairs: I) -> OrmResult<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut filtered = self.filter(pairs);
        filtered.fetch()?;
        let described = filtered
            .where_sql()?
            .unwrap_or_else(|| "<all records>".to_string());
        let mut records = filtered.cache.take().unwrap_or_default();
        match records.len() {
            1 => Ok(records.swap_remove(0)),
            0 => Err(OrmError::ObjectNotFound(described)),
            _ => Err(OrmError::MultipleObjectsFound(described)),
        }
    }

    /// Number of matching records; uses the cache when fetched
    pub fn count(&self) -> OrmResult<usize> {
        if let Some(cache) = &self.cache {
            return Ok(cache.len());
        }
        self.dataset
            .store()
            .count(self.dataset.table(), self.where_sql()?.as_deref())
    }

    /// Whether any record matches
    pub fn exists(&self) -> OrmResult<bool> {
        if let Some(cache) = &self.cache {
            return Ok(!cache.is_empty());
        }
        Ok(self.first()?.is_some())
    }

    /// Fetch records directly, bypassing and leaving the cache untouched
    pub fn iterator(&self, limit: Option<usize>) -> OrmResult<Vec<Record>> {
        self.run_query(limit)
    }

    /// The first matching record. Issues a single-row query when the cache
    /// is empty.
    pub fn first(&self) -> OrmResult<Option<Record>> {
        if let Some(cache) = &self.cache {
            return Ok(cache.first().cloned());
        }
        Ok(self.run_query(Some(1))?.into_iter().next())
    }

    /// The last matching record, via a reversed single-row query when the
    /// cache is empty
    pub fn last(&self) -> OrmResult<Option<Record>> {
        if let Some(cache) = &self.cache {
            return Ok(cache.last().cloned());
        }
        let mut reversed = self.refine();
        reversed.query.reverse_order();
        reversed.first()
    }

    /// Bulk updates are not supported; records are written one at a time
    /// through `Record::save`
    pub fn update(&self) -> OrmResult<()> {
        Err(OrmError::Configuration(
            "Bulk updates through a query are not supported".to_string(),
        ))
    }

    /// Bulk deletion is not supported
    pub fn delete(&self) -> OrmResult<()> {
        Err(OrmError::Configuration(
            "Bulk deletion through a query is not supported".to_string(),
        ))
    }

    /// Backend statistics over the matching rows, keyed by sanitized
    /// `STAT_column` names
    pub fn aggregate(&self, stats: &[(&str, StatKind)]) -> OrmResult<HashMap<String, Value>> {
        let schema = self.dataset.schema();
        let resolved: Vec<(String, StatKind)> = stats
            .iter()
            .map(|(field, stat)| {
                schema
                    .storage_name(field)
                    .map(|storage| (storage.to_string(), *stat))
            })
            .collect::<OrmResult<_>>()?;
        self.dataset.store().aggregate(
            self.dataset.table(),
            &resolved,
            self.where_sql()?.as_deref(),
        )
    }

    /// Bucket every fetched record by the level of a scale-calculated
    /// field. Every reachable level appears, zero-seeded, so empty buckets
    /// still show up; `extras` adds named aggregates per bucket.
    pub fn summarize(
        &mut self,
        field_name: &str,
        extras: &[(String, SummaryStat)],
    ) -> OrmResult<Vec<SummaryRow>> {
        let field = self.dataset.schema().descriptor(field_name)?.clone();
        let levels = field.get_levels()?;
        self.fetch()?;
        let records = self.cache.as_deref().unwrap_or_default();

        let mut buckets: Vec<(Level, usize, Vec<StatAcc>)> = levels
            .into_iter()
            .map(|level| (level, 0, extras.iter().map(|_| StatAcc::default()).collect()))
            .collect();

        for record in records {
            let Some(level) = field.scale_level(record)? else {
                continue;
            };
            let idx = match buckets.iter().position(|(seeded, _, _)| *seeded == level) {
                Some(idx) => idx,
                None => {
                    buckets.push((level, 0, extras.iter().map(|_| StatAcc::default()).collect()));
                    buckets.len() - 1
                }
            };
            let bucket = &mut buckets[idx];
            bucket.1 += 1;
            for ((_, stat), acc) in extras.iter().zip(bucket.2.iter_mut()) {
                let source = match stat {
                    SummaryStat::Sum(field)
                    | SummaryStat::Mean(field)
                    | SummaryStat::Min(field)
                    | SummaryStat::Max(field) => field,
                };
                if let Some(value) = record.value(source)?.as_f64() {
                    acc.push(value);
                }
            }
        }

        Ok(buckets
            .into_iter()
            .map(|(level, count, accs)| {
                let extras = extras
                    .iter()
                    .zip(accs)
                    .map(|((name, stat), acc)| (name.clone(), acc.finish(stat)))
                    .collect();
                SummaryRow {
                    level,
                    count,
                    extras,
                }
            })
            .collect())
    }
}

#[derive(Debug, Default)]
struct StatAcc {
    sum: f64,
    count: usize,
    min: Option<f64>,
    max: Option<f64>,
}

impl StatAcc {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn finish(&self, stat: &SummaryStat) -> Option<f64> {
        match stat {
            SummaryStat::Sum(_) => (self.count > 0).then_some(self.sum),
            SummaryStat::Mean(_) => (self.count > 0).then(|| self.sum / self.count as f64),
            SummaryStat::Min(_) => self.min,
            SummaryStat::Max(_) => self.max,
        }
    }
}
