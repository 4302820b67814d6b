// ============================================================================
// In-memory executor
// ============================================================================
//
// Runs composed statements against plain in-process tables, with a single level
// of snapshot transactions, generated integer keys and a statement journal.
// Used by the test suite and by callers who want the batch engine without a
// database behind it.
//
// ============================================================================

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Level, event};

use super::{
    HistoryQuery, InsertPlan, SchemaIntrospector, SqlExecutor, StaleCheckPlan, Statement,
    StatementKind, UpdatePlan,
};
use crate::core::{BatchError, DataType, Result, Row, TableSchema, Value};
use crate::result::QueryResult;

type StoredRow = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<StoredRow>,
    next_id: i64,
}

impl MemoryTable {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            next_id: 1,
        }
    }

    fn key_of(&self, row: &StoredRow) -> Vec<Value> {
        self.schema
            .primary_keys()
            .iter()
            .map(|pk| row.get(pk).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn position_by_key(&self, key: &[Value]) -> Option<usize> {
        self.rows.iter().position(|row| self.key_of(row) == key)
    }

    /// Fills defaults and generated keys, then checks column constraints.
    fn prepare_row(&mut self, mut row: StoredRow) -> Result<StoredRow> {
        for column in self.schema.columns().to_vec() {
            let generated = self.schema.is_primary_key(&column.name)
                && column.data_type == DataType::Integer
                && row.get(&column.name).is_none_or(Value::is_null);
            if generated {
                let id = self.next_id;
                self.advance_past(id)?;
                row.insert(column.name.clone(), Value::Integer(id));
                continue;
            }
            let value = row.entry(column.name.clone()).or_insert(Value::Null);
            if let Value::Integer(explicit) = *value {
                if self.schema.is_primary_key(&column.name) && explicit >= self.next_id {
                    self.advance_past(explicit)?;
                }
            }
        }

        for name in row.keys() {
            if !self.schema.has_column(name) {
                return Err(BatchError::ExecutionFailed(format!(
                    "Column '{}' not found in table '{}'",
                    name,
                    self.schema.name()
                )));
            }
        }
        self.check_row(&row)?;
        Ok(row)
    }

    fn advance_past(&mut self, id: i64) -> Result<()> {
        self.next_id = id.checked_add(1).ok_or_else(|| {
            BatchError::ExecutionFailed(format!(
                "key sequence of table '{}' is exhausted",
                self.schema.name()
            ))
        })?;
        Ok(())
    }

    fn check_row(&self, row: &StoredRow) -> Result<()> {
        for column in self.schema.columns() {
            let value = row.get(&column.name).unwrap_or(&Value::Null);
            column
                .validate(value)
                .map_err(|err| BatchError::ExecutionFailed(err.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    pub kind: StatementKind,
    pub table: String,
    pub sql: String,
    pub affected_rows: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    last_insert_ids: HashMap<String, i64>,
    snapshot: Option<(HashMap<String, MemoryTable>, HashMap<String, i64>)>,
    journal: Vec<ExecutedStatement>,
    injected_failures: Vec<(String, StatementKind)>,
}

impl MemoryState {
    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| BatchError::ExecutionFailed(format!("Table '{}' not found", name)))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| BatchError::ExecutionFailed(format!("Table '{}' not found", name)))
    }

    fn take_injected_failure(&mut self, table: &str, kind: StatementKind) -> bool {
        let found = self
            .injected_failures
            .iter()
            .position(|(t, k)| t == table && *k == kind);
        match found {
            Some(idx) => {
                self.injected_failures.remove(idx);
                true
            }
            None => false,
        }
    }

    fn run_insert(&mut self, plan: &InsertPlan) -> Result<QueryResult> {
        let table = self.table_mut(&plan.table)?;
        let mut prepared = Vec::with_capacity(plan.rows.len());
        for values in &plan.rows {
            if values.len() != plan.columns.len() {
                return Err(BatchError::ExecutionFailed(format!(
                    "INSERT row has {} values for {} columns",
                    values.len(),
                    plan.columns.len()
                )));
            }
            let row: StoredRow = plan
                .columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect();
            prepared.push(table.prepare_row(row)?);
        }

        for row in &prepared {
            let key = table.key_of(row);
            let duplicate = table.position_by_key(&key).is_some()
                || prepared
                    .iter()
                    .filter(|other| table.key_of(other) == key)
                    .count()
                    > 1;
            if duplicate {
                return Err(BatchError::ExecutionFailed(format!(
                    "duplicate key value in table '{}'",
                    plan.table
                )));
            }
        }

        let returned: Vec<Row> = prepared
            .iter()
            .map(|row| {
                plan.returning
                    .iter()
                    .map(|col| row.get(col).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        let last_id = table.next_id - 1;
        let sequence = table.schema.sequence_name().map(str::to_string);
        let affected = prepared.len() as u64;
        table.rows.extend(prepared);

        self.last_insert_ids
            .insert(sequence.unwrap_or_else(|| plan.table.clone()), last_id);

        if plan.returning.is_empty() {
            Ok(QueryResult::affected(affected))
        } else {
            Ok(QueryResult::new(plan.returning.clone(), returned).with_affected(affected))
        }
    }

    fn run_update(&mut self, plan: &UpdatePlan) -> Result<QueryResult> {
        let value_columns = plan.value_columns();
        let table = self.table_mut(&plan.table)?;
        let mut staged = table.rows.clone();
        let mut affected = 0u64;

        for (idx, values) in plan.rows.iter().enumerate() {
            let source: HashMap<&str, &Value> = value_columns
                .iter()
                .map(|c| c.name.as_str())
                .zip(values.iter())
                .collect();
            let key: Vec<Value> = plan
                .key_columns
                .iter()
                .map(|pk| source.get(pk.as_str()).map_or(Value::Null, |v| (*v).clone()))
                .collect();
            let Some(position) = staged.iter().position(|row| table.key_of(row) == key) else {
                continue;
            };
            if let (Some(guard), Some(expected)) = (&plan.version_guard, plan.expected_version(idx))
            {
                let current = staged[position]
                    .get(&guard.column.name)
                    .unwrap_or(&Value::Null);
                if current != expected || expected.is_null() {
                    continue;
                }
            }
            for column in &plan.set_columns {
                let value = source
                    .get(column.as_str())
                    .map_or(Value::Null, |v| (*v).clone());
                staged[position].insert(column.clone(), value);
            }
            table.check_row(&staged[position])?;
            affected += 1;
        }

        table.rows = staged;
        Ok(QueryResult::affected(affected))
    }

    fn run_stale_check(&self, plan: &StaleCheckPlan) -> Result<QueryResult> {
        let table = self.table(&plan.table)?;
        let key_count = plan.key_columns.len();
        let mut stale = Vec::new();

        for values in &plan.rows {
            let key = values[..key_count.min(values.len())].to_vec();
            let supplied = values.get(key_count).unwrap_or(&Value::Null);
            let live = table
                .position_by_key(&key)
                .and_then(|idx| table.rows[idx].get(&plan.version_column.name));
            match live {
                Some(version) if version == supplied => {}
                _ => stale.push(key),
            }
        }

        let columns = plan.key_columns.iter().map(|c| c.name.clone()).collect();
        Ok(QueryResult::new(columns, stale))
    }

    fn run_history(&self, query: &HistoryQuery) -> Result<QueryResult> {
        let table = self.table(&query.table)?;
        let mut matched: Vec<&StoredRow> = table
            .rows
            .iter()
            .filter(|row| row.get(&query.doc_id_field) == Some(&query.doc_id))
            .filter(|row| {
                if query.attributes.is_empty() {
                    return true;
                }
                row.get(&query.changed_attributes_field)
                    .and_then(Value::as_text_array)
                    .is_some_and(|names| names.iter().any(|n| query.attributes.contains(n)))
            })
            .collect();
        if let Some(order_by) = &query.order_by {
            matched.sort_by(|a, b| {
                compare_for_sort(
                    a.get(order_by).unwrap_or(&Value::Null),
                    b.get(order_by).unwrap_or(&Value::Null),
                )
            });
        }

        let columns: Vec<String> = table.schema.columns().iter().map(|c| c.name.clone()).collect();
        let rows = matched
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(QueryResult::new(columns, rows))
    }
}

fn compare_for_sort(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Shared handle to an in-memory table store; clones see the same tables.
#[derive(Clone, Default)]
pub struct MemoryExecutor {
    state: Arc<Mutex<MemoryState>>,
    returning: bool,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands generated keys back through `RETURNING` instead of `last_insert_id`.
    pub fn with_returning(mut self, returning: bool) -> Self {
        self.returning = returning;
        self
    }

    pub async fn create_table(&self, schema: TableSchema) -> Result<()> {
        schema.validate()?;
        let mut state = self.state.lock().await;
        let name = schema.name().to_string();
        if state.tables.contains_key(&name) {
            return Err(BatchError::Schema(format!("Table '{}' already exists", name)));
        }
        state.tables.insert(name, MemoryTable::new(schema));
        Ok(())
    }

    /// Writes a row directly, bypassing the journal; returns its primary key values.
    pub async fn seed<I, S>(&self, table: &str, values: I) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        let memory_table = state.table_mut(table)?;
        let row = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let row = memory_table.prepare_row(row)?;
        let key = memory_table.key_of(&row);
        memory_table.rows.push(row);
        Ok(key)
    }

    /// Overwrites one column of an existing row, as a concurrent writer would.
    pub async fn overwrite(
        &self,
        table: &str,
        key: &[Value],
        column: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let memory_table = state.table_mut(table)?;
        let idx = memory_table
            .position_by_key(key)
            .ok_or_else(|| BatchError::ExecutionFailed(format!("no row with key {:?}", key)))?;
        memory_table.rows[idx].insert(column.to_string(), value.into());
        Ok(())
    }

    pub async fn delete(&self, table: &str, key: &[Value]) -> Result<bool> {
        let mut state = self.state.lock().await;
        let memory_table = state.table_mut(table)?;
        match memory_table.position_by_key(key) {
            Some(idx) => {
                memory_table.rows.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn rows(&self, table: &str) -> Result<Vec<BTreeMap<String, Value>>> {
        let state = self.state.lock().await;
        Ok(state.table(table)?.rows.clone())
    }

    pub async fn row_count(&self, table: &str) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.table(table)?.rows.len())
    }

    pub async fn find(&self, table: &str, key: &[Value]) -> Result<Option<BTreeMap<String, Value>>> {
        let state = self.state.lock().await;
        let memory_table = state.table(table)?;
        Ok(memory_table
            .position_by_key(key)
            .map(|idx| memory_table.rows[idx].clone()))
    }

    /// Every statement that ran successfully, oldest first.
    pub async fn journal(&self) -> Vec<ExecutedStatement> {
        self.state.lock().await.journal.clone()
    }

    pub async fn clear_journal(&self) {
        self.state.lock().await.journal.clear();
    }

    /// Makes the next statement of `kind` against `table` fail.
    pub async fn fail_next(&self, table: &str, kind: StatementKind) {
        self.state
            .lock()
            .await
            .injected_failures
            .push((table.to_string(), kind));
    }

    pub async fn in_transaction(&self) -> bool {
        self.state.lock().await.snapshot.is_some()
    }
}

#[async_trait]
impl SqlExecutor for MemoryExecutor {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn execute(&self, statement: &Statement) -> Result<QueryResult> {
        let mut state = self.state.lock().await;
        let sql = statement.to_sql();
        event!(Level::TRACE, sql = %sql, "memory executor statement");

        if state.take_injected_failure(statement.table(), statement.kind()) {
            return Err(BatchError::ExecutionFailed(format!(
                "injected {} failure on '{}'",
                statement.kind(),
                statement.table()
            )));
        }

        let result = match statement {
            Statement::Insert(plan) => state.run_insert(plan)?,
            Statement::Update(plan) => state.run_update(plan)?,
            Statement::StaleCheck(plan) => state.run_stale_check(plan)?,
            Statement::History(query) => state.run_history(query)?,
        };

        state.journal.push(ExecutedStatement {
            kind: statement.kind(),
            table: statement.table().to_string(),
            sql,
            affected_rows: result.affected_rows,
        });
        Ok(result)
    }

    async fn last_insert_id(&self, table: &str, sequence: Option<&str>) -> Result<i64> {
        let state = self.state.lock().await;
        let key = sequence.unwrap_or(table);
        state.last_insert_ids.get(key).copied().ok_or_else(|| {
            BatchError::ExecutionFailed(format!("no id generated yet for '{}'", key))
        })
    }

    fn supports_returning(&self) -> bool {
        self.returning
    }

    async fn begin(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.snapshot.is_some() {
            return Err(BatchError::ExecutionFailed(
                "Nested transactions are not supported".to_string(),
            ));
        }
        let snapshot = (state.tables.clone(), state.last_insert_ids.clone());
        state.snapshot = Some(snapshot);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.snapshot.take().is_none() {
            return Err(BatchError::ExecutionFailed(
                "No active transaction to commit".to_string(),
            ));
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let (tables, last_insert_ids) = state.snapshot.take().ok_or_else(|| {
            BatchError::ExecutionFailed("No active transaction to roll back".to_string())
        })?;
        state.tables = tables;
        state.last_insert_ids = last_insert_ids;
        Ok(())
    }
}

#[async_trait]
impl SchemaIntrospector for MemoryExecutor {
    async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        let state = self.state.lock().await;
        state
            .tables
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| BatchError::Schema(format!("Table '{}' not found", table)))
    }
}
