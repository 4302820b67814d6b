// ============================================================================
// batchlog: batched record persistence with version tokens and change logs
// ============================================================================

pub mod audit;
pub mod core;
pub mod executor;
pub mod persist;
pub mod result;

pub use audit::{ActorProvider, AuditConfig, AuditTrail, FixedActor, NoActor};
pub use core::{BatchError, Column, DataType, FieldErrors, Result, TableSchema, Value};
pub use executor::{MemoryExecutor, SchemaCatalog, SchemaIntrospector, SqlExecutor, Statement};
pub use persist::{
    Batch, BatchCoordinator, BatchObserver, BatchPhase, HookOutcome, Record, SaveOutcome,
};
pub use result::QueryResult;
