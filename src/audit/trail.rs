use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{Level, event};

use crate::audit::actor::{ActorProvider, NoActor};
use crate::audit::entry::{AuditLogEntry, timestamp_now};
use crate::audit::AuditConfig;
use crate::core::{BatchError, Result, TableSchema, Value};
use crate::executor::{HistoryQuery, SchemaIntrospector, SqlExecutor, Statement};
use crate::persist::{
    AttributeDiffer, Batch, BatchCoordinator, BatchObserver, HookOutcome, Record, SaveOutcome,
};

type ComputedAttribute = Box<dyn Fn(&Record) -> Value + Send + Sync>;

/// Mirrors every change of a source table into its log table.
///
/// Attach it to the source table's [`BatchCoordinator`] as an observer. Log rows
/// for one source batch are collected while records are written and flushed as
/// one bulk insert when the source batch completes, inside the same transaction.
pub struct AuditTrail {
    config: AuditConfig,
    differ: AttributeDiffer,
    doc_key: String,
    version_attribute: Option<String>,
    statics: BTreeMap<String, Value>,
    computed: Vec<(String, ComputedAttribute)>,
    actor: Box<dyn ActorProvider>,
    log: BatchCoordinator,
    pending: Vec<Record>,
}

impl fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditTrail")
            .field("config", &self.config)
            .field("log", &self.log)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl AuditTrail {
    pub fn new(
        source: &TableSchema,
        log: TableSchema,
        config: AuditConfig,
        executor: Arc<dyn SqlExecutor>,
    ) -> Result<Self> {
        config.validate()?;

        let doc_key = match source.primary_keys() {
            [key] => key.clone(),
            keys => {
                return Err(BatchError::Config(format!(
                    "audited table '{}' needs a single-column key, has {}",
                    source.name(),
                    keys.len()
                )));
            }
        };
        for field in [&config.doc_id_field, &config.changed_attributes_field] {
            if !log.has_column(field) {
                return Err(BatchError::Config(format!(
                    "log table '{}' has no column '{}'",
                    log.name(),
                    field
                )));
            }
        }

        let tracked = config.tracked_attributes(source);
        if let Some(unknown) = tracked.iter().find(|name| !source.has_column(name)) {
            return Err(BatchError::Config(format!(
                "tracked attribute '{}' is not a column of '{}'",
                unknown,
                source.name()
            )));
        }

        let differ = AttributeDiffer::new(tracked).excluding_time(config.time_field.clone());
        let version_attribute = config.version_attribute(source).map(str::to_string);
        let log = BatchCoordinator::new(log, executor)?;

        Ok(Self {
            config,
            differ,
            doc_key,
            version_attribute,
            statics: BTreeMap::new(),
            computed: Vec::new(),
            actor: Box::new(NoActor),
            log,
            pending: Vec::new(),
        })
    }

    /// Looks up both tables; the log table name comes from the config.
    pub async fn attach(
        introspector: &dyn SchemaIntrospector,
        source_table: &str,
        config: AuditConfig,
        executor: Arc<dyn SqlExecutor>,
    ) -> Result<Self> {
        let source = introspector.table_schema(source_table).await?;
        let log = introspector
            .table_schema(&config.log_table_for(source_table))
            .await?;
        Self::new(&source, log, config, executor)
    }

    pub fn with_actor(mut self, actor: impl ActorProvider + 'static) -> Self {
        self.actor = Box::new(actor);
        self
    }

    /// A constant written into every log row, overriding a mirrored value of the same name.
    pub fn with_static(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.statics.insert(name.into(), value.into());
        self
    }

    /// A value computed from the saved record, overriding mirrored and static values.
    pub fn with_computed<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.computed.push((name.into(), Box::new(compute)));
        self
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn log_schema(&self) -> &TableSchema {
        self.log.schema()
    }

    /// Log rows waiting for the current source batch to complete.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Tracked attributes that changed, in tracked order.
    ///
    /// The timestamp and version attributes are included whenever anything changed
    /// and they are tracked; both are rewritten on every logged save.
    pub fn changed_attributes(&self, record: &Record) -> Vec<String> {
        let diff = self.differ.diff_record(record);
        if diff.is_empty() {
            return Vec::new();
        }
        self.differ
            .tracked()
            .iter()
            .filter(|name| {
                diff.contains_key(*name)
                    || **name == self.config.time_field
                    || self.version_attribute.as_deref() == Some(name.as_str())
            })
            .cloned()
            .collect()
    }

    /// Log rows of one source record, oldest first.
    ///
    /// With `attributes`, only rows whose changed set overlaps them are returned.
    pub async fn history(&self, doc_id: impl Into<Value>, attributes: &[&str]) -> Result<Vec<Record>> {
        let schema = self.log.schema();
        let query = HistoryQuery {
            table: schema.name().to_string(),
            doc_id_field: self.config.doc_id_field.clone(),
            doc_id: doc_id.into(),
            changed_attributes_field: self.config.changed_attributes_field.clone(),
            attributes: attributes.iter().map(|name| name.to_string()).collect(),
            order_by: schema.primary_keys().first().cloned(),
        };
        let result = self.log.executor().execute(&Statement::History(query)).await?;

        Ok(result
            .rows
            .iter()
            .map(|row| {
                Record::loaded(
                    result
                        .columns
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned())
                        .collect(),
                )
            })
            .collect())
    }

    fn entry_for(&self, record: &Record) -> Result<AuditLogEntry> {
        let doc_id = record
            .get(&self.doc_key)
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| {
                BatchError::Hook(format!(
                    "saved record has no value for key '{}'",
                    self.doc_key
                ))
            })?;

        let mut mirrored: BTreeMap<String, Value> = self
            .differ
            .tracked()
            .iter()
            .filter_map(|name| record.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        mirrored.extend(self.statics.clone());
        for (name, compute) in &self.computed {
            mirrored.insert(name.clone(), compute(record));
        }

        let changed_by = self
            .config
            .changed_by_field
            .as_ref()
            .and_then(|_| self.actor.current_actor());
        let atime = record
            .get(&self.config.time_field)
            .filter(|value| !value.is_null())
            .cloned()
            .unwrap_or_else(|| Value::Text(timestamp_now()));
        let version = self.version_attribute.as_ref().and_then(|name| {
            record.get(name).map(|value| (name.clone(), value.clone()))
        });

        Ok(AuditLogEntry {
            doc_id,
            mirrored,
            changed_attributes: record.changed_attributes().to_vec(),
            changed_by,
            atime: Some(atime),
            version,
        })
    }
}

#[async_trait]
impl BatchObserver for AuditTrail {
    fn on_before_batch(&mut self, _schema: &TableSchema, _records: &[&Record]) -> HookOutcome {
        self.pending.clear();
        HookOutcome::Continue
    }

    fn on_before_save(&mut self, schema: &TableSchema, record: &mut Record, _insert: bool) -> HookOutcome {
        let changed = self.changed_attributes(record);
        if !changed.is_empty() && schema.has_column(&self.config.time_field) {
            record.set(self.config.time_field.clone(), timestamp_now());
        }
        record.set_changed_attributes(changed);
        HookOutcome::Continue
    }

    fn on_after_save(
        &mut self,
        _schema: &TableSchema,
        record: &Record,
        _insert: bool,
        _changed: &BTreeMap<String, Value>,
    ) -> Result<()> {
        if record.changed_attributes().is_empty() {
            return Ok(());
        }
        let entry = self.entry_for(record)?;
        event!(
            Level::TRACE,
            doc_id = %entry.doc_id,
            changed = ?entry.changed_attributes,
            "log row queued"
        );
        self.pending
            .push(entry.into_record(self.log.schema(), &self.config));
        Ok(())
    }

    async fn on_batch_complete(&mut self, schema: &TableSchema) -> Result<()> {
        if self.pending.is_empty() {
            event!(Level::DEBUG, table = schema.name(), "no changes to log");
            return Ok(());
        }

        let mut pending = std::mem::take(&mut self.pending);
        let mut batch: Batch<'_> = pending.iter_mut().collect();
        match self.log.save_all_within(&mut batch, true).await {
            Ok(SaveOutcome::Saved { inserted, .. }) => {
                event!(
                    Level::DEBUG,
                    table = schema.name(),
                    log_table = self.log.schema().name(),
                    inserted,
                    "log rows written"
                );
                Ok(())
            }
            Ok(SaveOutcome::Vetoed { phase, .. }) => Err(BatchError::LogWriteFailed(Box::new(
                BatchError::Hook(format!("log batch vetoed during {}", phase)),
            ))),
            Err(err) => Err(BatchError::LogWriteFailed(Box::new(err))),
        }
    }

    fn on_batch_aborted(&mut self, _schema: &TableSchema) {
        self.pending.clear();
    }
}
