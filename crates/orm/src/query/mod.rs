//! Queries
//!
//! The clonable `Query` value type (projection, filter, ordering), the
//! compiler that renders conditions to backend query text, and the lazy
//! `QuerySet` built on both. Cloning is the only mutation mechanism: a
//! shared query is never refined in place.

pub mod compiler;
pub mod queryset;

use crate::conditions::ordering::OrderBy;
use crate::conditions::Condition;

/// Projection, filter, and ordering for one fetch
#[derive(Debug, Clone)]
pub struct Query {
    /// Storage column names to select
    pub(crate) fields: Vec<String>,
    pub(crate) filter: Option<Condition>,
    /// Ordering terms by logical field name
    pub(crate) order: Vec<OrderBy>,
}

impl Query {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            filter: None,
            order: Vec::new(),
        }
    }

    /// AND a condition onto the existing filter
    pub fn add_filter(&mut self, condition: Condition) {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing & condition,
            None => condition,
        });
    }

    pub fn set_order(&mut self, order: Vec<OrderBy>) {
        self.order = order;
    }

    pub fn reverse_order(&mut self) {
        self.order = self.order.iter().map(OrderBy::reversed).collect();
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn filter(&self) -> Option<&Condition> {
        self.filter.as_ref()
    }

    pub fn order(&self) -> &[OrderBy] {
        &self.order
    }
}
