//! Batched persistence of records with optimistic version tokens.

pub mod batch;
pub mod compose;
pub mod diff;
pub mod hooks;
pub mod record;
pub mod stale;
pub mod validation;
pub mod version;

pub use batch::{Batch, BatchCoordinator, BatchPhase, SaveOutcome};
pub use compose::{BulkWriteComposer, ComposedWrite};
pub use diff::AttributeDiffer;
pub use hooks::{BatchObserver, HookOutcome};
pub use record::Record;
pub use stale::{ExpectedVersion, StaleVersionChecker};
pub use validation::{RecordValidator, SchemaValidator};
pub use version::{VersionToken, VersionTokenGenerator};
