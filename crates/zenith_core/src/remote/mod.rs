//! Contract for the hosted tabular backend, plus the backends the workspace
//! ships with.
//!
//! Records cross this boundary as JSON objects; typed decoding belongs to the
//! caller. Access control is the backend's job: every call is implicitly
//! scoped to the rows the signed-in user may see.

use crate::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

mod http;
mod memory;

pub use http::RestStore;
pub use memory::{MemoryStore, StoreOperation};

pub const TASKS: &str = "tasks";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<String>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, AppError>;

    /// Returns the record as the backend stored it, including the assigned
    /// `id` and `created_at`.
    async fn insert(&self, collection: &str, record: Value) -> Result<Value, AppError>;

    /// Fails when no visible row has `id`.
    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), AppError>;

    /// Fails when no visible row has `id`.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError>;
}

/// Renders a JSON scalar the way equality filters compare it.
pub(crate) fn filter_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

pub(crate) fn record_has_id(record: &Value, id: &str) -> bool {
    record
        .get("id")
        .and_then(filter_text)
        .is_some_and(|value| value == id)
}

/// Applies `query` to a set of records held locally. Shared by the local
/// backends so they filter and order exactly alike.
pub(crate) fn apply_query(records: &[Value], query: &Query) -> Vec<Value> {
    let mut selected: Vec<Value> = records
        .iter()
        .filter(|record| {
            query.filters.iter().all(|filter| {
                record
                    .get(&filter.column)
                    .and_then(filter_text)
                    .is_some_and(|text| text == filter.value)
            })
        })
        .cloned()
        .collect();

    if let Some(order) = query.order.as_ref() {
        selected.sort_by(|left, right| {
            let ordering = compare_column(left.get(&order.column), right.get(&order.column));
            if order.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    if let Some(limit) = query.limit {
        selected.truncate(limit);
    }

    selected
}

/// Timestamps compare chronologically and numbers numerically; anything else
/// falls back to text. Missing values sort first.
fn compare_column(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (Some(Value::Number(left)), Some(Value::Number(right))) => left
            .as_f64()
            .partial_cmp(&right.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(left)), Some(Value::String(right))) => {
            match (
                OffsetDateTime::parse(left, &Rfc3339),
                OffsetDateTime::parse(right, &Rfc3339),
            ) {
                (Ok(left), Ok(right)) => left.cmp(&right),
                _ => left.cmp(right),
            }
        }
        (left, right) => left.and_then(filter_text).cmp(&right.and_then(filter_text)),
    }
}
