use chrono::Local;
use std::collections::BTreeMap;

use crate::audit::AuditConfig;
use crate::core::{TableSchema, Value};
use crate::persist::Record;

/// Wall-clock time with microseconds and UTC offset, e.g. `2024-03-01 12:00:00.123456+02:00`.
pub fn timestamp_now() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string()
}

/// One log row derived from a saved source record.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditLogEntry {
    pub doc_id: Value,
    /// Tracked attribute values as they were written, plus static and computed extras.
    pub mirrored: BTreeMap<String, Value>,
    pub changed_attributes: Vec<String>,
    pub changed_by: Option<Value>,
    pub atime: Option<Value>,
    /// Version attribute name and the token the source record was saved with.
    pub version: Option<(String, Value)>,
}

impl AuditLogEntry {
    /// Projects the entry onto `log`; attributes the log table has no column for are dropped.
    pub fn into_record(self, log: &TableSchema, config: &AuditConfig) -> Record {
        let mut values = self.mirrored;
        if let Some((name, version)) = self.version {
            values.insert(name, version);
        }
        if let Some(atime) = self.atime {
            values.insert(config.time_field.clone(), atime);
        }
        values.insert(config.doc_id_field.clone(), self.doc_id);
        values.insert(
            config.changed_attributes_field.clone(),
            Value::TextArray(self.changed_attributes),
        );
        if let Some(field) = &config.changed_by_field {
            match self.changed_by {
                Some(actor) => {
                    values.insert(field.clone(), actor);
                }
                None => {
                    values.entry(field.clone()).or_insert(Value::Null);
                }
            }
        }

        let mut record = Record::new();
        for (name, value) in values {
            if log.has_column(&name) && !log.is_primary_key(&name) {
                record.set(name, value);
            }
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};

    fn log_schema() -> TableSchema {
        TableSchema::new(
            "docs_log",
            vec![
                Column::new("id", DataType::Integer).not_null(),
                Column::new("doc_id", DataType::Integer).not_null(),
                Column::new("name", DataType::Text),
                Column::new("changed_attributes", DataType::TextArray),
                Column::new("changed_by", DataType::Integer),
                Column::new("atime", DataType::Timestamp),
                Column::new("version", DataType::Numeric),
            ],
        )
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp_now();
        // 2024-03-01 12:00:00.123456+02:00
        assert_eq!(ts.len(), 32);
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[19..20], ".");
        assert!(matches!(&ts[26..27], "+" | "-"));
    }

    #[test]
    fn test_into_record_projects_onto_log_columns() {
        let entry = AuditLogEntry {
            doc_id: Value::Integer(7),
            mirrored: BTreeMap::from([
                ("id".to_string(), Value::Integer(7)),
                ("name".to_string(), Value::from("a")),
                ("secret".to_string(), Value::from("dropped")),
            ]),
            changed_attributes: vec!["name".to_string(), "atime".to_string()],
            changed_by: None,
            atime: Some(Value::from("2024-03-01 12:00:00.000000+00:00")),
            version: Some(("version".to_string(), Value::from("42"))),
        };

        let record = entry.into_record(&log_schema(), &AuditConfig::default());
        assert!(record.is_new());
        assert_eq!(record.get("doc_id"), Some(&Value::Integer(7)));
        assert_eq!(record.get("id"), None);
        assert_eq!(record.get("secret"), None);
        assert_eq!(record.get("changed_by"), Some(&Value::Null));
        assert_eq!(record.get("version"), Some(&Value::from("42")));
        assert_eq!(
            record.get("changed_attributes"),
            Some(&Value::TextArray(vec!["name".into(), "atime".into()]))
        );
    }
}
