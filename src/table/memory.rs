use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Item, Query, TableClient, TableError, UpdateItem};

/// Key attributes and secondary indexes of one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    key: Vec<String>,
    /// Index name to the attribute it is keyed on.
    indexes: BTreeMap<String, String>,
}

impl TableSchema {
    pub fn new(name: &str, key: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            key: key.iter().map(|k| k.to_string()).collect(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn with_index(mut self, index: &str, attribute: &str) -> Self {
        self.indexes.insert(index.to_string(), attribute.to_string());
        self
    }

    fn storage_key(&self, item: &Item) -> Result<Vec<String>, TableError> {
        self.key
            .iter()
            .map(|attribute| match item.get(attribute) {
                Some(Value::String(value)) if !value.is_empty() => Ok(value.clone()),
                _ => Err(TableError::Validation(format!(
                    "missing string key attribute {attribute} for table {}",
                    self.name
                ))),
            })
            .collect()
    }

    fn is_key_attribute(&self, attribute: &str) -> bool {
        self.key.iter().any(|k| k == attribute)
    }
}

struct MemoryTable {
    schema: TableSchema,
    items: BTreeMap<Vec<String>, Item>,
}

/// In-process table client. All tables share one lock, so every conditional
/// update is evaluated and applied atomically.
pub struct MemoryTables {
    tables: RwLock<HashMap<String, MemoryTable>>,
}

impl MemoryTables {
    pub fn new(schemas: impl IntoIterator<Item = TableSchema>) -> Self {
        let tables = schemas
            .into_iter()
            .map(|schema| {
                (
                    schema.name.clone(),
                    MemoryTable {
                        schema,
                        items: BTreeMap::new(),
                    },
                )
            })
            .collect();
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Number of items currently stored in `table` (zero for unknown tables).
    pub async fn item_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map_or(0, |t| t.items.len())
    }
}

fn missing_table(table: &str) -> TableError {
    TableError::ResourceNotFound(format!("table {table}"))
}

#[async_trait]
impl TableClient for MemoryTables {
    // Reads are always strongly consistent here.
    async fn get_item(
        &self,
        table: &str,
        key: Item,
        _consistent_read: bool,
    ) -> Result<Option<Item>, TableError> {
        let tables = self.tables.read().await;
        let table = tables.get(table).ok_or_else(|| missing_table(table))?;
        let key = table.schema.storage_key(&key)?;
        Ok(table.items.get(&key).cloned())
    }

    async fn query(&self, table: &str, query: Query) -> Result<Vec<Item>, TableError> {
        let tables = self.tables.read().await;
        let table = tables.get(table).ok_or_else(|| missing_table(table))?;
        let attribute = table.schema.indexes.get(&query.index).ok_or_else(|| {
            TableError::ResourceNotFound(format!(
                "index {} on table {}",
                query.index, table.schema.name
            ))
        })?;
        if *attribute != query.attribute {
            return Err(TableError::Validation(format!(
                "index {} is keyed on {attribute}, not {}",
                query.index, query.attribute
            )));
        }

        Ok(table
            .items
            .values()
            .filter(|item| item.get(attribute) == Some(&query.value))
            .cloned()
            .collect())
    }

    async fn update_item(&self, table: &str, update: UpdateItem) -> Result<Item, TableError> {
        let mut tables = self.tables.write().await;
        let table = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        let key = table.schema.storage_key(&update.key)?;

        let current = table.items.get(&key);
        if let Some(condition) = &update.condition {
            if !condition.holds(current) {
                return Err(TableError::ConditionalCheckFailed);
            }
        }

        let mut next = current.cloned().unwrap_or_else(|| update.key.clone());
        for (attribute, value) in update.expression.assignments() {
            if table.schema.is_key_attribute(attribute) {
                return Err(TableError::Validation(format!(
                    "cannot update key attribute {attribute}"
                )));
            }
            next.insert(attribute.clone(), value.clone());
        }

        table.items.insert(key, next.clone());
        Ok(next)
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<Option<Item>, TableError> {
        let mut tables = self.tables.write().await;
        let table = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        let key = table.schema.storage_key(&item)?;
        Ok(table.items.insert(key, item))
    }
}
