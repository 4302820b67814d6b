//! Change log for audited tables.

pub mod actor;
pub mod config;
pub mod entry;
pub mod trail;

pub use actor::{ActorProvider, FixedActor, NoActor};
pub use config::AuditConfig;
pub use entry::{AuditLogEntry, timestamp_now};
pub use trail::AuditTrail;
