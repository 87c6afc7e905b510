use async_trait::async_trait;
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorLayer, HierarchyError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcSqlBindingType {
    Boolean,
    Double,
    Id,
    IdSet,
    Int,
    Long,
    String,
    Point2d,
    Point3d,
}

/// A positional query parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EcSqlBinding {
    #[serde(rename = "type")]
    pub binding_type: EcSqlBindingType,
    pub value: Value,
}

impl EcSqlBinding {
    pub fn new(binding_type: EcSqlBindingType, value: Value) -> Self {
        EcSqlBinding {
            binding_type,
            value,
        }
    }
}

/// A query as handed to the row source.  `ctes` are prepended to the query as
/// a `WITH RECURSIVE` clause by the row source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcSqlQueryDef {
    pub ecsql: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<EcSqlBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ctes: Vec<String>,
}

impl EcSqlQueryDef {
    pub fn new(ecsql: &str) -> Self {
        EcSqlQueryDef {
            ecsql: ecsql.to_string(),
            bindings: vec![],
            ctes: vec![],
        }
    }

    pub fn with_bindings(mut self, bindings: Vec<EcSqlBinding>) -> Self {
        self.bindings = bindings;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowFormat {
    /// Rows are objects keyed by column name.
    #[default]
    ColumnNames,
    /// Rows are objects keyed by column index.
    Indexes,
}

/// How many rows a hierarchy level may have before the row source gives up
/// with `HierarchyError::RowsLimitExceeded`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RowsLimit {
    Unbounded,
    Limit(u32),
}

impl RowsLimit {
    pub fn fingerprint(&self) -> String {
        match self {
            RowsLimit::Unbounded => "unbounded".to_string(),
            RowsLimit::Limit(n) => n.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryReaderOptions {
    pub row_format: RowFormat,
    /// `None` leaves the limit up to the row source.
    pub limit: Option<RowsLimit>,
    /// Reads sharing a restart token cancel the previous read with the same
    /// token.
    pub restart_token: Option<String>,
}

/// A single row produced by the row source, keyed by column name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub Map<String, Value>);

impl Row {
    pub fn new() -> Self {
        Row(Map::new())
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.0.insert(column.to_string(), value.into());
        self
    }

    /// Absent columns and SQL NULLs are the same thing to us.
    pub fn get(&self, column: &str) -> Option<&Value> {
        match self.0.get(column) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v),
        }
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(|v| v.as_str())
    }

    pub fn require_str(&self, column: &str) -> Result<&str> {
        self.get_str(column).ok_or_else(|| {
            HierarchyError::sticky(
                ErrorLayer::DataLayer,
                format!("Row is missing the {} column", column),
            )
        })
    }

    /// SQLite hands booleans back as integers, so accept both.
    pub fn get_bool(&self, column: &str) -> Option<bool> {
        match self.get(column)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            Value::String(s) => match s.as_str() {
                "1" | "true" => Some(true),
                "0" | "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Read a column that holds JSON, either as serialized text or as an
    /// already-parsed value.
    pub fn get_json(&self, column: &str) -> Result<Option<Value>> {
        match self.get(column) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(serde_json::from_str(s)?)),
            Some(v) => Ok(Some(v.clone())),
        }
    }
}

/// Executes queries on behalf of the pipeline.
///
/// Implementations should report exceeding `QueryReaderOptions::limit` via
/// `HierarchyError::RowsLimitExceeded` rather than silently truncating.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn create_query_reader(
        &self,
        query: &EcSqlQueryDef,
        options: QueryReaderOptions,
    ) -> Result<BoxStream<'static, Result<Row>>>;
}

/// Schema knowledge the pipeline needs but does not own.
#[async_trait]
pub trait ClassHierarchyInspector: Send + Sync {
    /// Whether `derived` is `base` or inherits from it, directly or not.
    async fn class_derives_from(&self, derived: &str, base: &str) -> Result<bool>;

    /// Human readable label of the class for class grouping nodes.
    async fn class_label(&self, full_class_name: &str) -> Result<String>;

    /// Unique key of the data source, used to reject identifiers that come
    /// from some other data source.
    fn imodel_key(&self) -> &str;
}
