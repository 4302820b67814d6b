#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use batchlog::{
    AuditConfig, AuditTrail, BatchCoordinator, Column, DataType, MemoryExecutor, Record,
    TableSchema, Value,
};

pub const DOCS: &str = "docs";
pub const DOCS_LOG: &str = "docs_log";

pub fn docs_schema() -> TableSchema {
    TableSchema::new(
        DOCS,
        vec![
            Column::new("id", DataType::Integer).not_null(),
            Column::new("name", DataType::Text),
            Column::new("note", DataType::Text),
            Column::new("atime", DataType::Timestamp),
            Column::new("version", DataType::Numeric),
        ],
    )
    .version_column("version")
}

pub fn docs_log_schema() -> TableSchema {
    TableSchema::new(
        DOCS_LOG,
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

/// A store with an empty `docs` table and its log table.
pub async fn store() -> MemoryExecutor {
    let store = MemoryExecutor::new();
    store.create_table(docs_schema()).await.unwrap();
    store.create_table(docs_log_schema()).await.unwrap();
    store
}

pub fn coordinator(store: &MemoryExecutor) -> BatchCoordinator {
    BatchCoordinator::new(docs_schema(), Arc::new(store.clone())).unwrap()
}

pub fn audit_trail(store: &MemoryExecutor) -> AuditTrail {
    AuditTrail::new(
        &docs_schema(),
        docs_log_schema(),
        AuditConfig::default(),
        Arc::new(store.clone()),
    )
    .unwrap()
}

pub fn audited(store: &MemoryExecutor) -> BatchCoordinator {
    coordinator(store).with_observer(audit_trail(store))
}

/// Inserts a row as another process would and returns its key.
pub async fn seed_doc(store: &MemoryExecutor, name: &str, version: &str) -> Vec<Value> {
    store
        .seed(
            DOCS,
            [
                ("name", Value::from(name)),
                ("version", Value::from(version)),
            ],
        )
        .await
        .unwrap()
}

/// Reads a row back into a clean record.
pub async fn load(store: &MemoryExecutor, key: &[Value]) -> Record {
    let row: BTreeMap<String, Value> = store.find(DOCS, key).await.unwrap().unwrap();
    Record::loaded(row)
}

pub fn named(name: &str) -> Record {
    Record::new().with("name", name)
}
