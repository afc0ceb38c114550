use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Row-level change classes a filter can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostgresChangeEvent {
    #[serde(rename = "*")]
    All,
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

impl PostgresChangeEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "*",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// A database-change subscription filter, sent in the join payload and
/// echoed back (with a server-assigned id) in the join reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresChangesFilter {
    pub event: PostgresChangeEvent,
    pub schema: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl PostgresChangesFilter {
    pub fn new(event: PostgresChangeEvent, schema: impl Into<String>) -> Self {
        Self {
            event,
            schema: schema.into(),
            table: None,
            filter: None,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Flatten into the binding-filter form used for registration,
    /// structural removal equality, and the join payload.
    pub fn to_hash_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("event".to_string(), self.event.as_str().to_string());
        map.insert("schema".to_string(), self.schema.clone());
        if let Some(table) = &self.table {
            map.insert("table".to_string(), table.clone());
        }
        if let Some(filter) = &self.filter {
            map.insert("filter".to_string(), filter.clone());
        }
        map
    }
}

/// Column metadata carried in every change frame; drives the payload
/// transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// The `data` object of an inbound `postgres_changes` frame, as sent by
/// the server.
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresChangeData {
    pub schema: String,
    pub table: String,
    pub commit_timestamp: String,
    #[serde(rename = "type")]
    pub change_type: String,
    #[serde(default)]
    pub errors: Value,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub record: Map<String, Value>,
    #[serde(default)]
    pub old_record: Map<String, Value>,
}

/// The reshaped change payload delivered to bound callbacks: `new` is
/// populated for INSERT/UPDATE, `old` for UPDATE/DELETE, both typed by
/// the column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresChangePayload {
    pub schema: String,
    pub table: String,
    pub commit_timestamp: String,
    #[serde(rename = "type")]
    pub change_type: String,
    pub errors: Value,
    pub new: Map<String, Value>,
    pub old: Map<String, Value>,
}

impl PostgresChangePayload {
    pub fn from_data(data: PostgresChangeData) -> Self {
        let mut new = Map::new();
        let mut old = Map::new();

        if data.change_type == "INSERT" || data.change_type == "UPDATE" {
            new = super::transform::transform_change_data(&data.columns, &data.record, false);
        }
        if data.change_type == "UPDATE" || data.change_type == "DELETE" {
            old = super::transform::transform_change_data(&data.columns, &data.old_record, false);
        }

        Self {
            schema: data.schema,
            table: data.table,
            commit_timestamp: data.commit_timestamp,
            change_type: data.change_type,
            errors: data.errors,
            new,
            old,
        }
    }
}
