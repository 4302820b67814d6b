pub mod memory;
pub mod sql;
pub mod statement;

pub use memory::{ExecutedStatement, MemoryExecutor};
pub use statement::{
    EXPECTED_VERSION_ALIAS, HistoryQuery, InsertPlan, StaleCheckPlan, Statement, StatementKind,
    UpdatePlan, VersionGuard,
};

use async_trait::async_trait;
use std::collections::HashMap;

use crate::core::{BatchError, Result, TableSchema};
use crate::result::QueryResult;

/// Storage seam of the batch engine.
///
/// The engine never builds connections itself; it hands composed statements to an
/// executor and reads back affected counts, returned rows and generated ids.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Executor name for diagnostics.
    fn name(&self) -> &'static str;

    async fn execute(&self, statement: &Statement) -> Result<QueryResult>;

    /// Last id generated for `table` (or its named sequence) on this connection.
    async fn last_insert_id(&self, table: &str, sequence: Option<&str>) -> Result<i64>;

    /// Whether `INSERT ... RETURNING` hands back generated keys row by row.
    fn supports_returning(&self) -> bool {
        false
    }

    async fn begin(&self) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;
}

/// Column metadata lookup.
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    async fn table_schema(&self, table: &str) -> Result<TableSchema>;
}

/// Fixed set of table schemas, registered up front.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: HashMap<String, TableSchema>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: TableSchema) -> Result<()> {
        schema.validate()?;
        self.tables.insert(schema.name().to_string(), schema);
        Ok(())
    }

    pub fn with_table(mut self, schema: TableSchema) -> Result<Self> {
        self.register(schema)?;
        Ok(self)
    }

    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }
}

#[async_trait]
impl SchemaIntrospector for SchemaCatalog {
    async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        self.get(table)
            .cloned()
            .ok_or_else(|| BatchError::Schema(format!("Table '{}' not found", table)))
    }
}
