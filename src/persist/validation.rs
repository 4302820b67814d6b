use lazy_static::lazy_static;
use regex::Regex;

use crate::core::{FieldErrors, TableSchema, Value};
use crate::persist::Record;

lazy_static! {
    static ref VERSION_PATTERN: Regex = Regex::new(r"^[0-9]+$").unwrap();
}

const VERSION_MAX_LEN: usize = 50;

/// Record-level rule set run before a batch writes anything.
pub trait RecordValidator: Send + Sync {
    fn validate(&self, schema: &TableSchema, record: &Record) -> FieldErrors;
}

impl<F> RecordValidator for F
where
    F: Fn(&TableSchema, &Record) -> FieldErrors + Send + Sync,
{
    fn validate(&self, schema: &TableSchema, record: &Record) -> FieldErrors {
        self(schema, record)
    }
}

/// Column types, NOT NULL constraints and the version token format.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    fn check_version(&self, name: &str, value: Option<&Value>, errors: &mut FieldErrors) {
        match value {
            None | Some(Value::Null) => errors.add(name, "cannot be blank"),
            Some(Value::Integer(i)) if *i < 0 => errors.add(name, "must contain digits only"),
            Some(Value::Integer(_)) => {}
            Some(Value::Text(token)) => {
                if token.len() > VERSION_MAX_LEN {
                    errors.add(
                        name,
                        format!("should contain at most {} characters", VERSION_MAX_LEN),
                    );
                }
                if !VERSION_PATTERN.is_match(token) {
                    errors.add(name, "must contain digits only");
                }
            }
            Some(other) => errors.add(name, format!("must be a string, got {}", other.type_name())),
        }
    }
}

impl RecordValidator for SchemaValidator {
    fn validate(&self, schema: &TableSchema, record: &Record) -> FieldErrors {
        let mut errors = FieldErrors::new();

        for (name, value) in record.attributes() {
            if let Some(column) = schema.get_column(name) {
                if let Err(err) = column.validate(value) {
                    errors.add(name, err.to_string());
                }
            }
        }

        if record.is_new() {
            for column in schema.columns() {
                if column.nullable || schema.is_primary_key(&column.name) {
                    continue;
                }
                if record.get(&column.name).is_none() {
                    errors.add(&column.name, "cannot be blank");
                }
            }
        } else if let Some(version) = schema.version() {
            self.check_version(version, record.get(version), &mut errors);
        }

        errors
    }
}
