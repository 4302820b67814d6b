use serde::{Deserialize, Serialize};

use crate::core::{BatchError, Result, TableSchema};

/// How changes of one source table are mirrored into its log table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Tracked attributes; empty means every non-key column of the source table
    pub attributes: Vec<String>,

    /// Log table name; `None` means `<source>_log`
    pub log_table: Option<String>,

    /// Log column holding the source record's key
    pub doc_id_field: String,

    /// Log column holding the `{a,b}` set of changed attributes
    pub changed_attributes_field: String,

    /// Log column holding the actor, if any
    pub changed_by_field: Option<String>,

    /// Timestamp attribute stamped on every changed record
    pub time_field: String,

    /// Version attribute copied into the log; `None` uses the source table's version column
    pub version_field: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            attributes: Vec::new(),
            log_table: None,
            doc_id_field: "doc_id".to_string(),
            changed_attributes_field: "changed_attributes".to_string(),
            changed_by_field: Some("changed_by".to_string()),
            time_field: "atime".to_string(),
            version_field: None,
        }
    }
}

impl AuditConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a JSON document; absent keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn log_table(mut self, table: &str) -> Self {
        self.log_table = Some(table.to_string());
        self
    }

    pub fn doc_id_field(mut self, field: &str) -> Self {
        self.doc_id_field = field.to_string();
        self
    }

    pub fn changed_attributes_field(mut self, field: &str) -> Self {
        self.changed_attributes_field = field.to_string();
        self
    }

    pub fn changed_by_field(mut self, field: Option<&str>) -> Self {
        self.changed_by_field = field.map(str::to_string);
        self
    }

    pub fn time_field(mut self, field: &str) -> Self {
        self.time_field = field.to_string();
        self
    }

    pub fn version_field(mut self, field: &str) -> Self {
        self.version_field = Some(field.to_string());
        self
    }

    pub fn log_table_for(&self, source_table: &str) -> String {
        self.log_table
            .clone()
            .unwrap_or_else(|| format!("{}_log", source_table))
    }

    /// Tracked attributes for `source`, falling back to its non-key columns.
    pub fn tracked_attributes(&self, source: &TableSchema) -> Vec<String> {
        if !self.attributes.is_empty() {
            return self.attributes.clone();
        }
        source
            .columns()
            .iter()
            .filter(|column| !source.is_primary_key(&column.name))
            .map(|column| column.name.clone())
            .collect()
    }

    /// Version attribute copied into log rows, if any.
    pub fn version_attribute<'a>(&'a self, source: &'a TableSchema) -> Option<&'a str> {
        self.version_field.as_deref().or(source.version())
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("doc_id_field", &self.doc_id_field),
            ("changed_attributes_field", &self.changed_attributes_field),
            ("time_field", &self.time_field),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(BatchError::Config(format!("{} cannot be empty", name)));
            }
        }
        if self.doc_id_field == self.changed_attributes_field {
            return Err(BatchError::Config(
                "doc_id_field and changed_attributes_field must differ".to_string(),
            ));
        }
        Ok(())
    }
}
