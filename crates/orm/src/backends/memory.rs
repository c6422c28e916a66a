//! In-memory row store
//!
//! Backs the test suite and small tools with a complete `RowStore`
//! implementation: ordered tables with generated identities, coded-value
//! domains, declared relationships, and snapshot/restore edit sessions.
//! Rendered where clauses are parsed with `sqlparser` and evaluated against
//! the stored rows, including correlated `IN (SELECT ...)` sub-selects, so
//! compiled query text is executed rather than pattern-matched.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::RwLock;

use regex::Regex;
use sqlparser::ast::{
    BinaryOperator, Expr, Select, SelectItem, SetExpr, Statement, TableFactor, UnaryOperator,
    Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::debug;
use uuid::Uuid;

use crate::backends::{
    stat_key, ColumnInfo, ColumnKind, DomainInfo, FetchedRow, RelationshipInfo, RowStore,
    StatKind, StorageSpec, WriteHandle,
};
use crate::error::{OrmError, OrmResult};
use crate::value::Value;

#[derive(Debug, Clone)]
struct MemTable {
    columns: Vec<ColumnInfo>,
    rows: BTreeMap<i64, Vec<Value>>,
    next_id: i64,
}

impl MemTable {
    fn column_index(&self, name: &str) -> OrmResult<usize> {
        self.columns
            .iter()
            .position(|column| column.name == name)
            .ok_or_else(|| OrmError::Backend(format!("Unknown column: {}", name)))
    }

    fn identity_index(&self) -> OrmResult<usize> {
        self.columns
            .iter()
            .position(|column| column.kind == ColumnKind::ObjectId)
            .ok_or_else(|| OrmError::Backend("Table has no identity column".to_string()))
    }
}

#[derive(Debug, Default)]
struct MemInner {
    tables: HashMap<String, MemTable>,
    domains: HashMap<String, DomainInfo>,
    relationships: Vec<RelationshipInfo>,
    backup: Option<HashMap<String, MemTable>>,
}

impl MemInner {
    fn table(&self, name: &str) -> OrmResult<&MemTable> {
        self.tables
            .get(name)
            .ok_or_else(|| OrmError::Backend(format!("Unknown table: {}", name)))
    }

    fn table_mut(&mut self, name: &str) -> OrmResult<&mut MemTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| OrmError::Backend(format!("Unknown table: {}", name)))
    }

    // Identities of rows matching the where clause, in identity order.
    fn matching_ids(&self, table_name: &str, where_clause: Option<&str>) -> OrmResult<Vec<i64>> {
        let table = self.table(table_name)?;
        let filter = where_clause.map(parse_where).transpose()?;
        let mut ids = Vec::new();
        for (&id, row) in &table.rows {
            let keep = match &filter {
                Some(expr) => {
                    let ctx = EvalContext { inner: self, table };
                    ctx.eval_predicate(expr, row)?.unwrap_or(false)
                }
                None => true,
            };
            if keep {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

/// An in-process row store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemInner>,
    reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of row fetches issued so far; used to assert batching
    /// behavior in tests
    pub fn read_count(&self) -> usize {
        self.reads.load(AtomicOrdering::Relaxed)
    }

    /// Create a table. Exactly one column must be the identity.
    pub fn create_table(&self, name: impl Into<String>, columns: Vec<ColumnInfo>) -> OrmResult<()> {
        let identities = columns
            .iter()
            .filter(|column| column.kind == ColumnKind::ObjectId)
            .count();
        if identities != 1 {
            return Err(OrmError::Backend(
                "Table requires exactly one identity column".to_string(),
            ));
        }
        let mut inner = self.write();
        inner.tables.insert(
            name.into(),
            MemTable {
                columns,
                rows: BTreeMap::new(),
                next_id: 1,
            },
        );
        Ok(())
    }

    /// Register a coded-value or range domain
    pub fn create_domain(&self, domain: DomainInfo) {
        self.write().domains.insert(domain.name.clone(), domain);
    }

    /// Declare a relationship between two tables
    pub fn declare_relationship(&self, info: RelationshipInfo) {
        self.write().relationships.push(info);
    }

    /// Bulk-load fixture rows
    pub fn load(
        &self,
        table: &str,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> OrmResult<()> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        for row in rows {
            self.insert(table, &columns, &row)?;
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemInner> {
        self.inner.read().expect("store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemInner> {
        self.inner.write().expect("store lock poisoned")
    }
}

impl RowStore for MemoryStore {
    fn schema(&self, table: &str) -> OrmResult<Vec<ColumnInfo>> {
        Ok(self.read().table(table)?.columns.clone())
    }

    fn count(&self, table: &str, where_clause: Option<&str>) -> OrmResult<usize> {
        Ok(self.read().matching_ids(table, where_clause)?.len())
    }

    fn iterate(
        &self,
        table_name: &str,
        columns: &[String],
        mutable: bool,
        where_clause: Option<&str>,
        limit: Option<usize>,
        prefix: Option<&str>,
        postfix: Option<&str>,
    ) -> OrmResult<Vec<FetchedRow>> {
        self.reads.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(
            "{}: SELECT {}{} FROM {}{}{}",
            if mutable { "update" } else { "search" },
            prefix.map(|p| format!("{} ", p)).unwrap_or_default(),
            columns.join(", "),
            table_name,
            where_clause
                .map(|w| format!(" WHERE {}", w))
                .unwrap_or_default(),
            postfix.map(|p| format!(" {}", p)).unwrap_or_default(),
        );

        let inner = self.read();
        let table = inner.table(table_name)?;
        let indexes: Vec<usize> = columns
            .iter()
            .map(|column| table.column_index(column))
            .collect::<OrmResult<_>>()?;

        let mut ids = inner.matching_ids(table_name, where_clause)?;
        if let Some(postfix) = postfix {
            sort_ids(&mut ids, table, postfix)?;
        }
        if let Some(limit) = limit {
            ids.truncate(limit);
        }

        Ok(ids
            .into_iter()
            .map(|id| {
                let row = &table.rows[&id];
                let values = indexes.iter().map(|&idx| row[idx].clone()).collect();
                let handle = mutable.then(|| WriteHandle {
                    table: table_name.to_string(),
                    token: id as u64,
                });
                (values, handle)
            })
            .collect())
    }

    fn get_one(
        &self,
        table: &str,
        columns: &[String],
        where_clause: Option<&str>,
    ) -> OrmResult<Vec<Value>> {
        let mut rows = self.iterate(table, columns, false, where_clause, Some(2), None, None)?;
        match rows.len() {
            1 => Ok(rows.remove(0).0),
            0 => Err(OrmError::ObjectNotFound(
                where_clause.unwrap_or("<all rows>").to_string(),
            )),
            _ => Err(OrmError::MultipleObjectsFound(
                where_clause.unwrap_or("<all rows>").to_string(),
            )),
        }
    }

    fn update(&self, handle: &WriteHandle, columns: &[String], values: &[Value]) -> OrmResult<()> {
        if columns.len() != values.len() {
            return Err(OrmError::Backend(
                "Column and value counts differ".to_string(),
            ));
        }
        let mut inner = self.write();
        let table = inner.table_mut(&handle.table)?;
        let indexes: Vec<usize> = columns
            .iter()
            .map(|column| table.column_index(column))
            .collect::<OrmResult<_>>()?;
        let row = table
            .rows
            .get_mut(&(handle.token as i64))
            .ok_or_else(|| OrmError::Backend("Stale write handle".to_string()))?;
        for (&idx, value) in indexes.iter().zip(values) {
            row[idx] = value.clone().into_raw();
        }
        Ok(())
    }

    fn insert(&self, table_name: &str, columns: &[String], values: &[Value]) -> OrmResult<Value> {
        if columns.len() != values.len() {
            return Err(OrmError::Backend(
                "Column and value counts differ".to_string(),
            ));
        }
        let mut inner = self.write();
        let table = inner.table_mut(table_name)?;
        let identity_idx = table.identity_index()?;
        let indexes: Vec<usize> = columns
            .iter()
            .map(|column| table.column_index(column))
            .collect::<OrmResult<_>>()?;

        let mut row: Vec<Value> = table
            .columns
            .iter()
            .map(|column| match column.kind {
                ColumnKind::GlobalId => Value::Uuid(Uuid::new_v4()),
                _ => Value::Null,
            })
            .collect();
        for (&idx, value) in indexes.iter().zip(values) {
            // A null never clobbers a generated global identifier.
            if table.columns[idx].kind == ColumnKind::GlobalId && value.is_null() {
                continue;
            }
            row[idx] = value.clone().into_raw();
        }

        let id = table.next_id;
        table.next_id += 1;
        row[identity_idx] = Value::Int(id);
        table.rows.insert(id, row);
        Ok(Value::Int(id))
    }

    fn add_column(&self, table_name: &str, name: &str, spec: &StorageSpec) -> OrmResult<()> {
        let mut inner = self.write();
        let table = inner.table_mut(table_name)?;
        if table.column_index(name).is_ok() {
            return Err(OrmError::Backend(format!("Column already exists: {}", name)));
        }
        let mut column = ColumnInfo::new(name, spec.kind);
        if let Some(domain) = &spec.domain {
            column = column.with_domain(domain.clone());
        }
        table.columns.push(column);
        for row in table.rows.values_mut() {
            row.push(Value::Null);
        }
        Ok(())
    }

    fn coded_value(&self, domain: &str, label: &str) -> OrmResult<Value> {
        let inner = self.read();
        let info = inner
            .domains
            .get(domain)
            .ok_or_else(|| OrmError::Domain(format!("Invalid domain name: {}", domain)))?;
        info.coded_values
            .iter()
            .find(|(_, coded_label)| coded_label == label)
            .map(|(code, _)| code.clone())
            .ok_or_else(|| {
                OrmError::Domain(format!(
                    "Domain {} has no code for label {}",
                    domain, label
                ))
            })
    }

    fn domain_info(&self, domain: &str) -> OrmResult<DomainInfo> {
        self.read()
            .domains
            .get(domain)
            .cloned()
            .ok_or_else(|| OrmError::Domain(format!("Invalid domain name: {}", domain)))
    }

    fn aggregate(
        &self,
        table_name: &str,
        stats: &[(String, StatKind)],
        where_clause: Option<&str>,
    ) -> OrmResult<HashMap<String, Value>> {
        let inner = self.read();
        let table = inner.table(table_name)?;
        let ids = inner.matching_ids(table_name, where_clause)?;

        let mut results = HashMap::new();
        for (column, stat) in stats {
            let idx = table.column_index(column)?;
            let values: Vec<f64> = ids
                .iter()
                .filter_map(|id| table.rows[id][idx].as_f64())
                .collect();
            let value = match stat {
                StatKind::Count => Value::Int(values.len() as i64),
                StatKind::Sum => Value::Float(values.iter().sum()),
                StatKind::Mean => {
                    if values.is_empty() {
                        Value::Null
                    } else {
                        Value::Float(values.iter().sum::<f64>() / values.len() as f64)
                    }
                }
                StatKind::Min => values
                    .iter()
                    .copied()
                    .reduce(f64::min)
                    .map(Value::Float)
                    .unwrap_or(Value::Null),
                StatKind::Max => values
                    .iter()
                    .copied()
                    .reduce(f64::max)
                    .map(Value::Float)
                    .unwrap_or(Value::Null),
            };
            results.insert(stat_key(column, *stat), value);
        }
        Ok(results)
    }

    fn relationship_info(&self, table: &str) -> OrmResult<Vec<RelationshipInfo>> {
        Ok(self
            .read()
            .relationships
            .iter()
            .filter(|info| info.origin == table || info.destination == table)
            .cloned()
            .collect())
    }

    fn begin_edit(&self) -> OrmResult<()> {
        let mut inner = self.write();
        if inner.backup.is_some() {
            return Err(OrmError::Backend("Edit session already active".to_string()));
        }
        inner.backup = Some(inner.tables.clone());
        Ok(())
    }

    fn commit_edit(&self) -> OrmResult<()> {
        let mut inner = self.write();
        if inner.backup.take().is_none() {
            return Err(OrmError::Backend("No active edit session".to_string()));
        }
        Ok(())
    }

    fn abort_edit(&self) -> OrmResult<()> {
        let mut inner = self.write();
        let backup = inner
            .backup
            .take()
            .ok_or_else(|| OrmError::Backend("No active edit session".to_string()))?;
        inner.tables = backup;
        Ok(())
    }
}

// Where-clause evaluation

fn parse_where(clause: &str) -> OrmResult<Expr> {
    let sql = format!("SELECT * FROM t WHERE {}", clause);
    let statements = Parser::parse_sql(&GenericDialect {}, &sql)
        .map_err(|err| OrmError::Backend(format!("Unparseable where clause: {}", err)))?;
    let Some(Statement::Query(query)) = statements.into_iter().next() else {
        return Err(OrmError::Backend("Unparseable where clause".to_string()));
    };
    let SetExpr::Select(select) = *query.body else {
        return Err(OrmError::Backend("Unparseable where clause".to_string()));
    };
    select
        .selection
        .ok_or_else(|| OrmError::Backend("Empty where clause".to_string()))
}

struct EvalContext<'a> {
    inner: &'a MemInner,
    table: &'a MemTable,
}

impl EvalContext<'_> {
    // SQL three-valued logic: `None` means unknown, which the caller treats
    // as not matching.
    fn eval_predicate(&self, expr: &Expr, row: &[Value]) -> OrmResult<Option<bool>> {
        match expr {
            Expr::Nested(inner) => self.eval_predicate(inner, row),
            Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr,
            } => Ok(self.eval_predicate(expr, row)?.map(|b| !b)),
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And => {
                    let a = self.eval_predicate(left, row)?;
                    let b = self.eval_predicate(right, row)?;
                    Ok(match (a, b) {
                        (Some(false), _) | (_, Some(false)) => Some(false),
                        (Some(true), Some(true)) => Some(true),
                        _ => None,
                    })
                }
                BinaryOperator::Or => {
                    let a = self.eval_predicate(left, row)?;
                    let b = self.eval_predicate(right, row)?;
                    Ok(match (a, b) {
                        (Some(true), _) | (_, Some(true)) => Some(true),
                        (Some(false), Some(false)) => Some(false),
                        _ => None,
                    })
                }
                BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Gt
                | BinaryOperator::Lt
                | BinaryOperator::GtEq
                | BinaryOperator::LtEq => {
                    let a = self.eval_value(left, row)?;
                    let b = self.eval_value(right, row)?;
                    if a.is_null() || b.is_null() {
                        return Ok(None);
                    }
                    let ordering = compare(&a, &b);
                    Ok(ordering.map(|ord| match op {
                        BinaryOperator::Eq => ord == Ordering::Equal,
                        BinaryOperator::NotEq => ord != Ordering::Equal,
                        BinaryOperator::Gt => ord == Ordering::Greater,
                        BinaryOperator::Lt => ord == Ordering::Less,
                        BinaryOperator::GtEq => ord != Ordering::Less,
                        BinaryOperator::LtEq => ord != Ordering::Greater,
                        _ => unreachable!(),
                    }))
                }
                other => Err(OrmError::Backend(format!(
                    "Unsupported operator in where clause: {:?}",
                    other
                ))),
            },
            Expr::IsNull(inner) => Ok(Some(self.eval_value(inner, row)?.is_null())),
            Expr::IsNotNull(inner) => Ok(Some(!self.eval_value(inner, row)?.is_null())),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let needle = self.eval_value(expr, row)?;
                if needle.is_null() {
                    return Ok(None);
                }
                let mut values = Vec::with_capacity(list.len());
                for item in list {
                    values.push(self.eval_value(item, row)?);
                }
                Ok(membership(&needle, &values, *negated))
            }
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let needle = self.eval_value(expr, row)?;
                if needle.is_null() {
                    return Ok(None);
                }
                let values = self.eval_subquery(subquery)?;
                Ok(membership(&needle, &values, *negated))
            }
            Expr::Like {
                negated,
                expr,
                pattern,
                ..
            } => {
                let value = self.eval_value(expr, row)?;
                let pattern = self.eval_value(pattern, row)?;
                let (Some(value), Some(pattern)) = (value.as_str(), pattern.as_str()) else {
                    return Ok(None);
                };
                let matched = like_matches(value, pattern)?;
                Ok(Some(matched != *negated))
            }
            other => Err(OrmError::Backend(format!(
                "Unsupported where clause expression: {:?}",
                other
            ))),
        }
    }

    fn eval_value(&self, expr: &Expr, row: &[Value]) -> OrmResult<Value> {
        match expr {
            Expr::Nested(inner) => self.eval_value(inner, row),
            Expr::Identifier(ident) => {
                let idx = self.table.column_index(&ident.value)?;
                Ok(row[idx].clone())
            }
            Expr::Value(literal) => literal_value(literal),
            Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr,
            } => match self.eval_value(expr, row)? {
                Value::Int(i) => Ok(Value::Int(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(OrmError::Backend(format!(
                    "Cannot negate non-numeric value {:?}",
                    other
                ))),
            },
            other => Err(OrmError::Backend(format!(
                "Unsupported value expression: {:?}",
                other
            ))),
        }
    }

    // Evaluate `SELECT column FROM table WHERE ...` and collect the
    // projected column of every matching row.
    fn eval_subquery(&self, subquery: &sqlparser::ast::Query) -> OrmResult<Vec<Value>> {
        let SetExpr::Select(select) = subquery.body.as_ref() else {
            return Err(OrmError::Backend("Unsupported subquery shape".to_string()));
        };
        let (table_name, column) = subquery_parts(select)?;
        let table = self.inner.table(&table_name)?;
        let idx = table.column_index(&column)?;

        let ctx = EvalContext {
            inner: self.inner,
            table,
        };
        let mut values = Vec::new();
        for row in table.rows.values() {
            let keep = match &select.selection {
                Some(selection) => ctx.eval_predicate(selection, row)?.unwrap_or(false),
                None => true,
            };
            if keep {
                values.push(row[idx].clone());
            }
        }
        Ok(values)
    }
}

fn subquery_parts(select: &Select) -> OrmResult<(String, String)> {
    let column = match select.projection.as_slice() {
        [SelectItem::UnnamedExpr(Expr::Identifier(ident))] => ident.value.clone(),
        _ => {
            return Err(OrmError::Backend(
                "Subquery must project a single column".to_string(),
            ))
        }
    };
    let table = match select.from.as_slice() {
        [table_with_joins] => match &table_with_joins.relation {
            TableFactor::Table { name, .. } => name
                .0
                .last()
                .map(|ident| ident.value.clone())
                .ok_or_else(|| OrmError::Backend("Subquery has no table".to_string()))?,
            _ => {
                return Err(OrmError::Backend(
                    "Subquery must select from a plain table".to_string(),
                ))
            }
        },
        _ => {
            return Err(OrmError::Backend(
                "Subquery must select from a single table".to_string(),
            ))
        }
    };
    Ok((table, column))
}

fn literal_value(literal: &SqlValue) -> OrmResult<Value> {
    match literal {
        SqlValue::Null => Ok(Value::Null),
        SqlValue::Boolean(b) => Ok(Value::Bool(*b)),
        SqlValue::Number(text, _) => {
            if let Ok(i) = text.parse::<i64>() {
                Ok(Value::Int(i))
            } else {
                text.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| OrmError::Backend(format!("Invalid number literal: {}", text)))
            }
        }
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
            Ok(Value::Str(s.clone()))
        }
        other => Err(OrmError::Backend(format!(
            "Unsupported literal: {:?}",
            other
        ))),
    }
}

fn membership(needle: &Value, values: &[Value], negated: bool) -> Option<bool> {
    if values.iter().any(|value| value == needle) {
        return Some(!negated);
    }
    if values.iter().any(Value::is_null) {
        return None;
    }
    Some(negated)
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return Some(x.total_cmp(&y));
    }
    match (a.raw(), b.raw()) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        // Dates arrive as quoted ISO strings in query text.
        (Value::Date(x), Value::Str(y)) => Some(x.to_string().as_str().cmp(y.as_str())),
        (Value::Str(x), Value::Date(y)) => Some(x.as_str().cmp(y.to_string().as_str())),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Uuid(x), Value::Str(y)) => Some(x.to_string().as_str().cmp(y.as_str())),
        (Value::Str(x), Value::Uuid(y)) => Some(x.as_str().cmp(y.to_string().as_str())),
        _ => None,
    }
}

fn like_matches(value: &str, pattern: &str) -> OrmResult<bool> {
    let mut regex_pattern = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => regex_pattern.push_str(".*"),
            '_' => regex_pattern.push('.'),
            other => regex_pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex_pattern.push('$');
    let regex = Regex::new(&regex_pattern)
        .map_err(|err| OrmError::Backend(format!("Invalid LIKE pattern: {}", err)))?;
    Ok(regex.is_match(value))
}

// Parse `ORDER BY col [ASC|DESC], ...` and sort identities accordingly.
fn sort_ids(ids: &mut [i64], table: &MemTable, postfix: &str) -> OrmResult<()> {
    let spec = postfix
        .trim()
        .strip_prefix("ORDER BY ")
        .or_else(|| postfix.trim().strip_prefix("order by "))
        .ok_or_else(|| OrmError::Backend(format!("Unsupported postfix: {}", postfix)))?;

    let mut terms = Vec::new();
    for term in spec.split(',') {
        let mut parts = term.split_whitespace();
        let column = parts
            .next()
            .ok_or_else(|| OrmError::Backend("Empty ordering term".to_string()))?;
        let descending = match parts.next() {
            None => false,
            Some(dir) if dir.eq_ignore_ascii_case("asc") => false,
            Some(dir) if dir.eq_ignore_ascii_case("desc") => true,
            Some(dir) => {
                return Err(OrmError::Backend(format!(
                    "Unsupported ordering direction: {}",
                    dir
                )))
            }
        };
        terms.push((table.column_index(column)?, descending));
    }

    ids.sort_by(|a, b| {
        for &(idx, descending) in &terms {
            let va = &table.rows[a][idx];
            let vb = &table.rows[b][idx];
            // Nulls sort first ascending.
            let ordering = match (va.is_null(), vb.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => compare(va, vb).unwrap_or(Ordering::Equal),
            };
            let ordering = if descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_table(
                "Widget",
                vec![
                    ColumnInfo::new("OBJECTID", ColumnKind::ObjectId),
                    ColumnInfo::new("widget_name", ColumnKind::Text),
                    ColumnInfo::new("widget_number", ColumnKind::Integer),
                ],
            )
            .unwrap();
        store
            .load(
                "Widget",
                &["widget_name", "widget_number"],
                vec![
                    vec![Value::from("Widget A+ Awesome"), Value::Int(12345)],
                    vec![Value::from("B-Widgety Widget"), Value::Null],
                    vec![Value::from("My Widget C"), Value::Int(7)],
                ],
            )
            .unwrap();
        store
    }

    fn names(rows: &[FetchedRow]) -> Vec<String> {
        rows.iter()
            .map(|(values, _)| values[0].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn filters_with_comparisons() {
        let store = widget_store();
        let rows = store
            .iterate(
                "Widget",
                &["widget_name".to_string()],
                false,
                Some("widget_number > 100"),
                None,
                None,
                None,
            )
            .unwrap();
        assert_eq!(names(&rows), vec!["Widget A+ Awesome"]);
    }

    #[test]
    fn null_comparisons_do_not_match() {
        let store = widget_store();
        let rows = store
            .iterate(
                "Widget",
                &["widget_name".to_string()],
                false,
                Some("widget_number <> 7"),
                None,
                None,
                None,
            )
            .unwrap();
        // The null row is unknown, not a match.
        assert_eq!(names(&rows), vec!["Widget A+ Awesome"]);
    }

    #[test]
    fn is_null_and_like() {
        let store = widget_store();
        let rows = store
            .iterate(
                "Widget",
                &["widget_name".to_string()],
                false,
                Some("widget_number IS NULL"),
                None,
                None,
                None,
            )
            .unwrap();
        assert_eq!(names(&rows), vec!["B-Widgety Widget"]);

        let rows = store
            .iterate(
                "Widget",
                &["widget_name".to_string()],
                false,
                Some("widget_name LIKE '%Widget%'"),
                None,
                None,
                None,
            )
            .unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn ordering_and_limit() {
        let store = widget_store();
        let rows = store
            .iterate(
                "Widget",
                &["widget_name".to_string()],
                false,
                None,
                Some(2),
                None,
                Some("ORDER BY widget_number DESC"),
            )
            .unwrap();
        assert_eq!(names(&rows), vec!["Widget A+ Awesome", "My Widget C"]);
    }

    #[test]
    fn in_subquery_correlates_tables() {
        let store = widget_store();
        store
            .create_table(
                "Part",
                vec![
                    ColumnInfo::new("OBJECTID", ColumnKind::ObjectId),
                    ColumnInfo::new("widget_id", ColumnKind::Integer),
                ],
            )
            .unwrap();
        store
            .load(
                "Part",
                &["widget_id"],
                vec![vec![Value::Int(1)], vec![Value::Int(3)]],
            )
            .unwrap();

        let rows = store
            .iterate(
                "Widget",
                &["widget_name".to_string()],
                false,
                Some("OBJECTID IN (SELECT widget_id FROM Part WHERE widget_id > 1)"),
                None,
                None,
                None,
            )
            .unwrap();
        assert_eq!(names(&rows), vec!["My Widget C"]);
    }

    #[test]
    fn get_one_distinguishes_zero_and_many() {
        let store = widget_store();
        let row = store
            .get_one(
                "Widget",
                &["widget_name".to_string()],
                Some("OBJECTID = 2"),
            )
            .unwrap();
        assert_eq!(row[0], Value::from("B-Widgety Widget"));

        assert!(matches!(
            store.get_one("Widget", &["widget_name".to_string()], Some("OBJECTID = 5")),
            Err(OrmError::ObjectNotFound(_))
        ));
        assert!(matches!(
            store.get_one(
                "Widget",
                &["widget_name".to_string()],
                Some("widget_name LIKE '%Widget%'")
            ),
            Err(OrmError::MultipleObjectsFound(_))
        ));
    }

    #[test]
    fn update_through_handle() {
        let store = widget_store();
        let rows = store
            .iterate(
                "Widget",
                &["widget_number".to_string()],
                true,
                Some("OBJECTID = 1"),
                None,
                None,
                None,
            )
            .unwrap();
        let handle = rows[0].1.clone().unwrap();
        store
            .update(&handle, &["widget_number".to_string()], &[Value::Int(10)])
            .unwrap();

        let row = store
            .get_one(
                "Widget",
                &["widget_number".to_string()],
                Some("OBJECTID = 1"),
            )
            .unwrap();
        assert_eq!(row[0], Value::Int(10));
    }

    #[test]
    fn abort_restores_tables() {
        let store = widget_store();
        store.begin_edit().unwrap();
        store
            .insert(
                "Widget",
                &["widget_name".to_string()],
                &[Value::from("Doomed Widget")],
            )
            .unwrap();
        assert_eq!(store.count("Widget", None).unwrap(), 4);
        store.abort_edit().unwrap();
        assert_eq!(store.count("Widget", None).unwrap(), 3);

        // Sessions do not nest.
        store.begin_edit().unwrap();
        assert!(store.begin_edit().is_err());
        store.commit_edit().unwrap();
    }

    #[test]
    fn declared_relationships_are_reported_for_both_tables() {
        let store = widget_store();
        store.declare_relationship(RelationshipInfo {
            origin: "Warehouse".to_string(),
            destination: "Widget".to_string(),
            primary_key: "OBJECTID".to_string(),
            foreign_key: "warehouse_id".to_string(),
            cardinality: crate::backends::Cardinality::OneToMany,
        });

        let from_widget = store.relationship_info("Widget").unwrap();
        let from_warehouse = store.relationship_info("Warehouse").unwrap();
        assert_eq!(from_widget.len(), 1);
        assert_eq!(from_warehouse.len(), 1);
        assert_eq!(from_widget[0].foreign_key, "warehouse_id");
        assert!(store.relationship_info("Elsewhere").unwrap().is_empty());
    }

    #[test]
    fn aggregates_skip_nulls() {
        let store = widget_store();
        let stats = store
            .aggregate(
                "Widget",
                &[
                    ("widget_number".to_string(), StatKind::Count),
                    ("widget_number".to_string(), StatKind::Sum),
                ],
                None,
            )
            .unwrap();
        assert_eq!(stats["COUNT_widget_number"], Value::Int(2));
        assert_eq!(stats["SUM_widget_number"], Value::Float(12352.0));
    }
}
