//! plenum-core library.
//!
//! Model registry, field validation, snapshot consistency checks and the
//! event log migration engine of the plenum datastore.
//!
//! # Conventions
//!
//! - **Errors**: library modules return `thiserror` enums; each maps onto a
//!   stable [`error::ErrorCode`]. Configuration loading uses `anyhow`.
//! - **Logging**: `tracing` macros only; the binary installs the subscriber.

pub mod checker;
pub mod config;
pub mod error;
pub mod event;
pub mod fqid;
pub mod history;
pub mod lock;
pub mod migration;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod timing;
pub mod validate;

pub use checker::{CheckFailure, Checker, CheckerConfig, MigrationMode, Mode};
pub use migration::{LATEST_MIGRATION_INDEX, MigrationRegistry, Migrator};
pub use registry::ModelRegistry;
pub use snapshot::Snapshot;
