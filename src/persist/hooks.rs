use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::core::{Result, TableSchema, Value};
use crate::persist::Record;

/// Whether a batch may proceed past a lifecycle point.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    Abort,
}

impl HookOutcome {
    pub fn is_abort(self) -> bool {
        matches!(self, Self::Abort)
    }
}

/// Typed listener for the lifecycle points of a batch save.
///
/// All methods default to doing nothing. Vetoes are only possible before anything
/// is written; errors returned after the write roll the whole batch back.
#[async_trait]
pub trait BatchObserver: Send + Sync {
    /// Once per batch, before validation.
    fn on_before_batch(&mut self, _schema: &TableSchema, _records: &[&Record]) -> HookOutcome {
        HookOutcome::Continue
    }

    /// Once per record, after validation and before the stale check.
    fn on_before_save(
        &mut self,
        _schema: &TableSchema,
        _record: &mut Record,
        _insert: bool,
    ) -> HookOutcome {
        HookOutcome::Continue
    }

    /// Once per written record; `changed` maps each written attribute to its prior value.
    fn on_after_save(
        &mut self,
        _schema: &TableSchema,
        _record: &Record,
        _insert: bool,
        _changed: &BTreeMap<String, Value>,
    ) -> Result<()> {
        Ok(())
    }

    /// Once per batch, after every record was written, still inside the transaction.
    async fn on_batch_complete(&mut self, _schema: &TableSchema) -> Result<()> {
        Ok(())
    }

    /// Called when the batch ended without committing, so buffered work can be dropped.
    fn on_batch_aborted(&mut self, _schema: &TableSchema) {}
}
