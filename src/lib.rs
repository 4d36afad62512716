//! Storage core of the job-application tracker: one storage contract over an
//! embedded SQLite file and a pooled PostgreSQL server, plus a one-shot
//! migration between them.

pub mod config;
pub mod error;
pub mod migration;
pub mod models;
pub mod storage;

pub use config::{NetworkSettings, StorageConfig};
pub use error::{ConfigError, Result, StorageError};
pub use migration::{MigrationOptions, MigrationOrchestrator};
pub use storage::{create_adapter, EmbeddedAdapter, NetworkedAdapter, StorageAdapter};
