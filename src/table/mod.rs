//! Backing key-value table protocol.
//!
//! Items are attribute maps. A [`TableClient`] serves any number of named
//! tables and supports four round trips: point get, equality query on a
//! named secondary index, conditional partial update returning the
//! post-write image, and full-item put.
//!
//! [`MemoryTables`] is a deterministic in-process implementation.

mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::expression::UpdateExpression;

pub use memory::{MemoryTables, TableSchema};

/// A stored item (or key) as a map of attribute name to value.
pub type Item = Map<String, Value>;

/// Equality query against a single-attribute secondary index.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub index: String,
    pub attribute: String,
    pub value: Value,
}

impl Query {
    pub fn new(index: &str, attribute: &str, value: impl Into<Value>) -> Self {
        Self {
            index: index.to_string(),
            attribute: attribute.to_string(),
            value: value.into(),
        }
    }
}

/// Guard evaluated against the currently stored item before an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The stored item exists and `attribute` equals `value`.
    AttributeEquals { attribute: String, value: Value },
}

impl Condition {
    pub fn equals(attribute: &str, value: impl Into<Value>) -> Self {
        Condition::AttributeEquals {
            attribute: attribute.to_string(),
            value: value.into(),
        }
    }

    pub fn holds(&self, current: Option<&Item>) -> bool {
        match self {
            Condition::AttributeEquals { attribute, value } => {
                current.and_then(|item| item.get(attribute)) == Some(value)
            }
        }
    }
}

/// Partial update of a single item. Missing items are created from the key
/// plus the assignments unless a condition rejects the write.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateItem {
    pub key: Item,
    pub expression: UpdateExpression,
    pub condition: Option<Condition>,
}

/// Failures reported by a table client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("the conditional request failed")]
    ConditionalCheckFailed,
    #[error("requested resource not found: {0}")]
    ResourceNotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("request was throttled")]
    Throttled,
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TableClient: Send + Sync {
    /// Fetches the item stored under `key`, if any.
    async fn get_item(
        &self,
        table: &str,
        key: Item,
        consistent_read: bool,
    ) -> Result<Option<Item>, TableError>;

    /// Returns every item whose indexed attribute equals the query value,
    /// in primary-key order.
    async fn query(&self, table: &str, query: Query) -> Result<Vec<Item>, TableError>;

    /// Applies the update and returns the item as stored afterwards.
    async fn update_item(&self, table: &str, update: UpdateItem) -> Result<Item, TableError>;

    /// Replaces the item stored under the item's key. Returns the previous
    /// item when one existed.
    async fn put_item(&self, table: &str, item: Item) -> Result<Option<Item>, TableError>;
}

/// Builds a key item from `(attribute, value)` pairs.
pub fn key<const N: usize>(attributes: [(&str, &str); N]) -> Item {
    attributes
        .into_iter()
        .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
        .collect()
}
