//! Condition compilation
//!
//! Renders a condition tree into backend query text against a bound
//! dataset. Logical names resolve to storage names, relationship scopes
//! become correlated `IN (SELECT ...)` sub-selects, and label values are
//! resolved to their stored codes through the store's domain lookup.

use crate::conditions::{CompareOp, Condition, Comparison, Logic, Node};
use crate::dataset::{Dataset, DatasetRegistry};
use crate::error::{OrmError, OrmResult};
use crate::value::Value;

/// Renders conditions for one dataset
pub struct QueryCompiler<'a> {
    dataset: &'a Dataset,
    registry: &'a DatasetRegistry,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(dataset: &'a Dataset, registry: &'a DatasetRegistry) -> Self {
        Self { dataset, registry }
    }

    /// Compile a condition tree to a where clause
    pub fn compile(&self, condition: &Condition) -> OrmResult<String> {
        let simplified = condition.clone().simplify();
        self.render(&simplified, false)
    }

    fn render(&self, node: &Condition, inner: bool) -> OrmResult<String> {
        let mut parts = Vec::with_capacity(node.children.len());
        for child in &node.children {
            match child {
                Node::Group(group) if group.rel.is_some() => parts.push(self.subquery(group)?),
                Node::Group(group) => parts.push(self.render(group, true)?),
                Node::Leaf(comparison) => parts.push(self.comparison(comparison)?),
            }
        }

        let separator = format!(" {} ", node.logic);
        let mut sql = parts.join(&separator);
        if parts.len() > 1 && (node.negated || (inner && node.logic == Logic::Or)) {
            sql = format!("({})", sql);
        }
        if node.negated {
            sql = format!("NOT {}", sql);
        }
        Ok(sql)
    }

    // A relationship-scoped subtree compiles to
    // `outer_key IN (SELECT inner_key FROM related WHERE <inner>)`,
    // with the inner expression resolved against the related schema.
    fn subquery(&self, group: &Condition) -> OrmResult<String> {
        let rel_name = group.rel.as_deref().unwrap_or_default();
        let relationship = self.dataset.relationship(rel_name)?;
        let keys = relationship.scope_keys(self.dataset, self.registry)?;
        let related = self.registry.dataset(&relationship.related)?;

        let mut unscoped = group.clone();
        unscoped.rel = None;
        unscoped.negated = false;
        let inner_sql =
            QueryCompiler::new(related.as_ref(), self.registry).render(&unscoped, false)?;

        let sql = format!(
            "{} IN (SELECT {} FROM {} WHERE {})",
            keys.outer, keys.inner, keys.table, inner_sql
        );
        Ok(if group.negated {
            format!("NOT {}", sql)
        } else {
            sql
        })
    }

    fn comparison(&self, comparison: &Comparison) -> OrmResult<String> {
        let field = self.dataset.schema().descriptor(&comparison.field)?;
        let rendered = self.render_value(&comparison.value, comparison.op, field.domain.as_deref())?;
        Ok(format!(
            "{} {} {}",
            field.storage_name, comparison.op, rendered
        ))
    }

    fn render_value(
        &self,
        value: &Value,
        op: CompareOp,
        domain: Option<&str>,
    ) -> OrmResult<String> {
        match value {
            Value::Null => Ok("NULL".to_string()),
            Value::Str(s) => {
                let escaped = s.replace('\'', "''");
                if op == CompareOp::Like {
                    Ok(format!("'%{}%'", escaped))
                } else {
                    Ok(format!("'{}'", escaped))
                }
            }
            Value::List(values) => {
                let rendered: Vec<String> = values
                    .iter()
                    .map(|v| self.render_value(v, op, domain))
                    .collect::<OrmResult<_>>()?;
                Ok(format!("({})", rendered.join(", ")))
            }
            Value::Coded(coded) => self.render_value(&coded.code, op, domain),
            Value::Label(label) => {
                let domain = domain.ok_or_else(|| {
                    OrmError::Domain(format!(
                        "Cannot compare label {:?} against a field without a domain",
                        label
                    ))
                })?;
                let code = self.dataset.store().coded_value(domain, label)?;
                self.render_value(&code, op, Some(domain))
            }
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Uuid(u) => Ok(format!("'{}'", u)),
            Value::Date(d) => Ok(format!("'{}'", d)),
            Value::Bytes(_) => Err(OrmError::Configuration(
                "Binary values cannot appear in query conditions".to_string(),
            )),
        }
    }
}
