use serde::{Deserialize, Serialize};
use std::fmt;

use super::{BatchError, Result, Value};

pub type Row = Vec<Value>;

/// Declared storage type of a column, used to cast literals inside `VALUES` tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    Numeric,
    Timestamp,
    TextArray,
}

impl DataType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Float, Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Numeric, Value::Integer(_) | Value::Float(_)) => true,
            (Self::Numeric, Value::Text(s)) => s.parse::<f64>().is_ok(),
            (Self::Timestamp, Value::Text(_)) => true,
            (Self::TextArray, Value::TextArray(_)) => true,
            _ => false,
        }
    }

    /// Type name used in `literal::type` casts.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer => "bigint",
            Self::Float => "double precision",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Numeric => "numeric",
            Self::Timestamp => "timestamptz",
            Self::TextArray => "text[]",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_type())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(BatchError::TypeMismatch(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(BatchError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

/// Everything the batch engine needs to know about one target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
    primary_key: Vec<String>,
    #[serde(default)]
    sequence_name: Option<String>,
    #[serde(default)]
    version_column: Option<String>,
}

impl TableSchema {
    /// Creates a schema whose primary key is the conventional `id` column.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: vec!["id".to_string()],
            sequence_name: None,
            version_column: None,
        }
    }

    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn sequence(mut self, sequence_name: impl Into<String>) -> Self {
        self.sequence_name = Some(sequence_name.into());
        self
    }

    pub fn version_column(mut self, column: impl Into<String>) -> Self {
        self.version_column = Some(column.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_key
    }

    pub fn sequence_name(&self) -> Option<&str> {
        self.sequence_name.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version_column.as_deref()
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.find_column_index(name).is_some()
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|pk| pk == name)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Checks that key and version columns are declared.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BatchError::Schema("table name must not be empty".to_string()));
        }
        if self.primary_key.is_empty() {
            return Err(BatchError::Schema(format!(
                "table '{}' has no primary key",
                self.name
            )));
        }
        for pk in &self.primary_key {
            if !self.has_column(pk) {
                return Err(BatchError::Schema(format!(
                    "primary key column '{}' not found in table '{}'",
                    pk, self.name
                )));
            }
        }
        if let Some(version) = &self.version_column {
            if !self.has_column(version) {
                return Err(BatchError::Schema(format!(
                    "version column '{}' not found in table '{}'",
                    version, self.name
                )));
            }
            if self.is_primary_key(version) {
                return Err(BatchError::Schema(format!(
                    "version column '{}' cannot be part of the primary key",
                    version
                )));
            }
        }
        Ok(())
    }
}
