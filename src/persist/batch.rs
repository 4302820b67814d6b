use log::warn;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{Level, event};

use crate::core::{BatchError, FieldErrors, Result, TableSchema, Value};
use crate::executor::{SchemaIntrospector, SqlExecutor, Statement};
use crate::persist::compose::{BulkWriteComposer, ComposedWrite};
use crate::persist::hooks::BatchObserver;
use crate::persist::stale::{ExpectedVersion, StaleVersionChecker};
use crate::persist::validation::{RecordValidator, SchemaValidator};
use crate::persist::version::{VersionToken, VersionTokenGenerator};
use crate::persist::Record;

/// Records waiting to be written to one table.
///
/// The batch only borrows the records; every save call drains it, whatever the outcome.
#[derive(Default)]
pub struct Batch<'r> {
    records: Vec<&'r mut Record>,
}

impl<'r> Batch<'r> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, record: &'r mut Record) {
        self.records.push(record);
    }

    pub fn extend<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = &'r mut Record>,
    {
        self.records.extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().map(|r| &**r)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    fn take(&mut self) -> Vec<&'r mut Record> {
        std::mem::take(&mut self.records)
    }
}

impl<'r> FromIterator<&'r mut Record> for Batch<'r> {
    fn from_iter<I: IntoIterator<Item = &'r mut Record>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

/// Steps of one save, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchPhase {
    Collecting,
    Validating,
    PreSaveHooks,
    StaleChecking,
    /// Running the INSERT and the guarded UPDATE.
    Writing,
    /// Assigning generated keys to inserted records.
    KeyReconciliation,
    PostSaveHooks,
    Flushed,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { inserted: usize, updated: usize },
    /// An observer declined; nothing was written.
    Vetoed { phase: BatchPhase, index: Option<usize> },
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }
}

/// Runs the batch-save protocol for one table.
pub struct BatchCoordinator {
    schema: TableSchema,
    executor: Arc<dyn SqlExecutor>,
    observers: Vec<Box<dyn BatchObserver>>,
    validators: Vec<Box<dyn RecordValidator>>,
    versions: VersionTokenGenerator,
    phase: BatchPhase,
}

impl fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("table", &self.schema.name())
            .field("executor", &self.executor.name())
            .field("observers", &self.observers.len())
            .field("validators", &self.validators.len())
            .field("phase", &self.phase)
            .finish()
    }
}

impl BatchCoordinator {
    pub fn new(schema: TableSchema, executor: Arc<dyn SqlExecutor>) -> Result<Self> {
        schema.validate()?;
        Ok(Self {
            schema,
            executor,
            observers: Vec::new(),
            validators: vec![Box::new(SchemaValidator)],
            versions: VersionTokenGenerator::new(),
            phase: BatchPhase::Collecting,
        })
    }

    /// Looks the table up through `introspector` before building the coordinator.
    pub async fn for_table(
        introspector: &dyn SchemaIntrospector,
        table: &str,
        executor: Arc<dyn SqlExecutor>,
    ) -> Result<Self> {
        let schema = introspector.table_schema(table).await?;
        Self::new(schema, executor)
    }

    pub fn with_observer(mut self, observer: impl BatchObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn BatchObserver>) {
        self.observers.push(observer);
    }

    pub fn with_validator(mut self, validator: impl RecordValidator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    pub fn with_version_generator(mut self, versions: VersionTokenGenerator) -> Self {
        self.versions = versions;
        self
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn executor(&self) -> Arc<dyn SqlExecutor> {
        self.executor.clone()
    }

    /// Furthest phase the last non-empty save reached. After a failure this is
    /// the phase that failed.
    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    fn enter(&mut self, phase: BatchPhase) {
        self.phase = phase;
        event!(Level::TRACE, table = self.schema.name(), phase = %phase, "batch phase");
    }

    /// A fresh record, already carrying a version token when the table is versioned.
    pub fn new_record(&mut self) -> Record {
        let mut record = Record::new();
        if let Some(version) = self.schema.version() {
            record.set(version, self.versions.next());
        }
        record
    }

    pub async fn save(&mut self, record: &mut Record, validate: bool) -> Result<SaveOutcome> {
        let mut batch = Batch::new();
        batch.enqueue(record);
        self.save_all(&mut batch, validate).await
    }

    pub async fn save_many(&mut self, records: &mut [Record], validate: bool) -> Result<SaveOutcome> {
        let mut batch: Batch<'_> = records.iter_mut().collect();
        self.save_all(&mut batch, validate).await
    }

    /// Saves the whole batch inside one transaction.
    ///
    /// On any error or veto the transaction is rolled back and every record is
    /// restored to its state before the call. The batch is empty afterwards.
    ///
    /// An empty batch returns `Saved { inserted: 0, updated: 0 }` without opening
    /// a transaction or notifying observers.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.schema.name(), records = batch.len()))]
    pub async fn save_all(&mut self, batch: &mut Batch<'_>, validate: bool) -> Result<SaveOutcome> {
        let mut records = batch.take();
        if records.is_empty() {
            return Ok(SaveOutcome::Saved {
                inserted: 0,
                updated: 0,
            });
        }
        let snapshot: Vec<Record> = records.iter().map(|r| (**r).clone()).collect();

        self.executor.begin().await?;
        let outcome = self.run(&mut records, validate).await;
        let outcome = match outcome {
            Ok(saved @ SaveOutcome::Saved { .. }) => match self.executor.commit().await {
                Ok(()) => return Ok(saved),
                Err(err) => Err(err),
            },
            other => other,
        };

        match &outcome {
            Err(err) => event!(
                Level::DEBUG,
                phase = %self.phase,
                error = %err,
                "rolling back batch"
            ),
            Ok(vetoed) => event!(
                Level::DEBUG,
                phase = %self.phase,
                outcome = ?vetoed,
                "rolling back vetoed batch"
            ),
        }
        if let Err(err) = self.executor.rollback().await {
            warn!(
                "rollback after failed batch on '{}' failed: {}",
                self.schema.name(),
                err
            );
        }
        self.restore(&mut records, snapshot);
        outcome
    }

    /// Same protocol as [`save_all`](Self::save_all) but inside a transaction the
    /// caller already opened, for batches flushed as part of another batch.
    pub async fn save_all_within(
        &mut self,
        batch: &mut Batch<'_>,
        validate: bool,
    ) -> Result<SaveOutcome> {
        let mut records = batch.take();
        if records.is_empty() {
            return Ok(SaveOutcome::Saved {
                inserted: 0,
                updated: 0,
            });
        }
        let snapshot: Vec<Record> = records.iter().map(|r| (**r).clone()).collect();

        let outcome = self.run(&mut records, validate).await;
        if !matches!(outcome, Ok(SaveOutcome::Saved { .. })) {
            self.restore(&mut records, snapshot);
        }
        outcome
    }

    fn restore(&mut self, records: &mut [&mut Record], snapshot: Vec<Record>) {
        for (record, original) in records.iter_mut().zip(snapshot) {
            **record = original;
        }
        for observer in self.observers.iter_mut() {
            observer.on_batch_aborted(&self.schema);
        }
    }

    async fn run(&mut self, records: &mut [&mut Record], validate: bool) -> Result<SaveOutcome> {
        self.enter(BatchPhase::Collecting);
        let expected: Vec<Option<Value>> = records
            .iter()
            .map(|record| ExpectedVersion::of(record, &self.schema).map(|e| e.version))
            .collect();

        {
            let views: Vec<&Record> = records.iter().map(|r| &**r).collect();
            for observer in self.observers.iter_mut() {
                if observer.on_before_batch(&self.schema, &views).is_abort() {
                    event!(Level::DEBUG, "batch vetoed before validation");
                    return Ok(SaveOutcome::Vetoed {
                        phase: BatchPhase::Collecting,
                        index: None,
                    });
                }
            }
        }

        if validate {
            self.enter(BatchPhase::Validating);
            for (index, record) in records.iter().enumerate() {
                let mut errors = FieldErrors::new();
                for validator in &self.validators {
                    errors.merge(validator.validate(&self.schema, record));
                }
                if !errors.is_empty() {
                    return Err(BatchError::ValidationFailed { index, errors });
                }
            }
        }

        self.enter(BatchPhase::PreSaveHooks);
        for (index, record) in records.iter_mut().enumerate() {
            let record: &mut Record = record;
            let insert = record.is_new();
            for observer in self.observers.iter_mut() {
                if observer.on_before_save(&self.schema, record, insert).is_abort() {
                    event!(Level::DEBUG, index, "record vetoed before save");
                    return Ok(SaveOutcome::Vetoed {
                        phase: BatchPhase::PreSaveHooks,
                        index: Some(index),
                    });
                }
            }
            if let Some(version) = self.schema.version() {
                let current = record.get(version).and_then(VersionToken::from_value);
                record.set(version, self.versions.next_after(current));
            }
        }

        let stale_candidates: Vec<ExpectedVersion> = records
            .iter()
            .zip(expected.iter())
            .filter_map(|(record, version)| {
                version.as_ref().map(|version| ExpectedVersion {
                    key: record.primary_key_values(&self.schema),
                    version: version.clone(),
                })
            })
            .collect();
        self.enter(BatchPhase::StaleChecking);
        StaleVersionChecker::new(&self.schema)
            .check_expected(self.executor.as_ref(), &stale_candidates)
            .await?;

        self.enter(BatchPhase::Writing);
        let returning = self.executor.supports_returning();
        let composed = {
            let views: Vec<&Record> = records.iter().map(|r| &**r).collect();
            BulkWriteComposer::new(&self.schema)
                .with_returning(returning)
                .compose(&views, &expected)?
        };
        if composed.insert.is_some() && !returning && self.schema.primary_keys().len() != 1 {
            self.enter(BatchPhase::KeyReconciliation);
            return Err(BatchError::KeyReconciliation(format!(
                "table '{}' has a composite key; inserting needs RETURNING support",
                self.schema.name()
            )));
        }

        self.write(records, &composed, returning).await?;

        self.enter(BatchPhase::PostSaveHooks);
        let inserted: BTreeSet<usize> = composed.inserted.iter().copied().collect();
        for (index, record) in records.iter_mut().enumerate() {
            let record: &mut Record = record;
            let insert = inserted.contains(&index);
            let changed = record.mark_saved();
            for observer in self.observers.iter_mut() {
                observer.on_after_save(&self.schema, record, insert, &changed)?;
            }
        }

        for observer in self.observers.iter_mut() {
            observer.on_batch_complete(&self.schema).await?;
        }
        self.enter(BatchPhase::Flushed);

        event!(
            Level::DEBUG,
            inserted = composed.inserted.len(),
            updated = composed.updated.len(),
            "batch flushed"
        );
        Ok(SaveOutcome::Saved {
            inserted: composed.inserted.len(),
            updated: composed.updated.len(),
        })
    }

    async fn write(
        &mut self,
        records: &mut [&mut Record],
        composed: &ComposedWrite,
        returning: bool,
    ) -> Result<()> {
        if let Some(plan) = &composed.insert {
            let result = self.executor.execute(&Statement::Insert(plan.clone())).await?;
            event!(
                Level::DEBUG,
                affected = result.affected_rows,
                returning,
                "bulk insert executed"
            );

            self.enter(BatchPhase::KeyReconciliation);
            if returning {
                if result.rows.len() != composed.inserted.len() {
                    return Err(BatchError::KeyReconciliation(format!(
                        "INSERT returned {} keys for {} records",
                        result.rows.len(),
                        composed.inserted.len()
                    )));
                }
                for (&index, keys) in composed.inserted.iter().zip(result.rows.iter()) {
                    let record: &mut Record = &mut *records[index];
                    for (name, value) in plan.returning.iter().zip(keys.iter()) {
                        record.set(name.clone(), value.clone());
                    }
                    record.set_new(false);
                }
            } else {
                let expected = composed.inserted.len() as u64;
                if result.affected_rows != expected {
                    return Err(BatchError::KeyReconciliation(format!(
                        "INSERT affected {} rows for {} records",
                        result.affected_rows, expected
                    )));
                }
                let last_id = self
                    .executor
                    .last_insert_id(self.schema.name(), self.schema.sequence_name())
                    .await?;
                let first_id = last_id - result.affected_rows as i64 + 1;
                let pk = &self.schema.primary_keys()[0];
                for (offset, &index) in composed.inserted.iter().enumerate() {
                    let record: &mut Record = &mut *records[index];
                    record.set(pk.clone(), first_id + offset as i64);
                    record.set_new(false);
                }
            }
        }

        if let Some(plan) = &composed.update {
            self.enter(BatchPhase::Writing);
            let result = self.executor.execute(&Statement::Update(plan.clone())).await?;
            let expected = composed.updated.len() as u64;
            event!(
                Level::DEBUG,
                affected = result.affected_rows,
                expected,
                "bulk update executed"
            );
            if result.affected_rows < expected {
                if plan.version_guard.is_some() {
                    return Err(self.raced_rows(records, &composed.updated).await);
                }
                warn!(
                    "UPDATE on '{}' matched {} of {} rows",
                    self.schema.name(),
                    result.affected_rows,
                    expected
                );
            }
        }

        Ok(())
    }

    /// Finds the rows a guarded UPDATE skipped. Rows it did update now hold the
    /// records' new tokens, so checking against those leaves only raced or
    /// deleted rows. Runs inside the still-open transaction.
    async fn raced_rows(&self, records: &[&mut Record], updated: &[usize]) -> BatchError {
        let group: Vec<&Record> = updated.iter().map(|&index| &*records[index]).collect();
        match StaleVersionChecker::new(&self.schema)
            .check(self.executor.as_ref(), &group)
            .await
        {
            Err(err) => err,
            Ok(()) => {
                warn!(
                    "UPDATE on '{}' skipped rows that now match; reporting the whole group",
                    self.schema.name()
                );
                BatchError::StaleWrite {
                    table: self.schema.name().to_string(),
                    stale: group
                        .iter()
                        .map(|record| record.primary_key_values(&self.schema))
                        .collect(),
                }
            }
        }
    }
}
