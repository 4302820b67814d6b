use tracing::{Level, event};

use crate::core::{BatchError, Column, Result, TableSchema, Value};
use crate::executor::{SqlExecutor, StaleCheckPlan, Statement};
use crate::persist::Record;

/// Key of an existing row plus the version token the caller believes it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedVersion {
    pub key: Vec<Value>,
    pub version: Value,
}

impl ExpectedVersion {
    /// `None` for new records and for tables without a version column.
    pub fn of(record: &Record, schema: &TableSchema) -> Option<Self> {
        let version_column = schema.version()?;
        if record.is_new() {
            return None;
        }
        Some(Self {
            key: record.primary_key_values(schema),
            version: record.get(version_column).cloned().unwrap_or(Value::Null),
        })
    }
}

/// One query per batch comparing expected version tokens against the live table.
pub struct StaleVersionChecker<'a> {
    schema: &'a TableSchema,
}

impl<'a> StaleVersionChecker<'a> {
    pub fn new(schema: &'a TableSchema) -> Self {
        Self { schema }
    }

    pub fn plan(&self, expected: &[ExpectedVersion]) -> Result<Option<StaleCheckPlan>> {
        let Some(version_name) = self.schema.version() else {
            return Ok(None);
        };
        if expected.is_empty() {
            return Ok(None);
        }

        let key_columns = self
            .schema
            .primary_keys()
            .iter()
            .map(|pk| self.column(pk))
            .collect::<Result<Vec<Column>>>()?;
        let version_column = self.column(version_name)?;

        let rows = expected
            .iter()
            .map(|entry| {
                let mut row = entry.key.clone();
                row.push(entry.version.clone());
                row
            })
            .collect();

        Ok(Some(StaleCheckPlan {
            table: self.schema.name().to_string(),
            key_columns,
            version_column,
            rows,
        }))
    }

    /// Fails with `StaleWrite` listing every outdated or deleted key.
    pub async fn check_expected(
        &self,
        executor: &dyn SqlExecutor,
        expected: &[ExpectedVersion],
    ) -> Result<()> {
        let Some(plan) = self.plan(expected)? else {
            return Ok(());
        };
        let checked = plan.rows.len();
        let result = executor.execute(&Statement::StaleCheck(plan)).await?;
        event!(
            Level::DEBUG,
            table = self.schema.name(),
            checked,
            stale = result.row_count(),
            "stale version check"
        );

        if result.is_empty() {
            return Ok(());
        }
        Err(BatchError::StaleWrite {
            table: self.schema.name().to_string(),
            stale: result.rows,
        })
    }

    /// Checks records against the version tokens they currently hold.
    pub async fn check(&self, executor: &dyn SqlExecutor, records: &[&Record]) -> Result<()> {
        let expected: Vec<ExpectedVersion> = records
            .iter()
            .filter_map(|record| ExpectedVersion::of(record, self.schema))
            .collect();
        self.check_expected(executor, &expected).await
    }

    fn column(&self, name: &str) -> Result<Column> {
        self.schema.get_column(name).cloned().ok_or_else(|| {
            BatchError::Schema(format!(
                "Column '{}' not found in table '{}'",
                name,
                self.schema.name()
            ))
        })
    }
}
