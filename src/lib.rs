// ABOUTME: Library root for table-sync
// ABOUTME: Row diffing, dialect-aware repositories, the synchronizer and the history tracker

pub mod commands;
pub mod compare;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod introspect;
pub mod repository;
pub mod rows;
pub mod schema;
pub mod sync;

pub use compare::{KeyColumnPolicy, RowComparator, RowDiff};
pub use dialect::Dialect;
pub use error::{Result, SyncError};
pub use repository::Repository;
pub use rows::{RowSet, Value};
pub use schema::{SchemaCache, TableRef, TableSchema};
pub use sync::{HistoryTracker, SyncConfig, SyncResult, Synchronizer};
