// ABOUTME: Error taxonomy for the synchronization core
// ABOUTME: Every fatal condition maps to a named variant carrying table/column context

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Errors raised by the synchronization core.
///
/// Variants fall into three groups:
/// - configuration errors, detected before any data is touched
/// - data errors, surfaced per run (missing tables, unexpected exists results)
/// - developer errors (closed connections, mismatched row shapes)
///
/// Nothing in the core retries; I/O failures arrive as [`SyncError::Database`].
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("table {table} has no primary key and no custom primary key was supplied")]
    MissingPrimaryKey { table: String },

    #[error("custom primary key for {table} names unknown columns: {}", .columns.join(", "))]
    InvalidCustomPrimaryKey { table: String, columns: Vec<String> },

    #[error("neither {source_table} nor {destination_table} has a primary key and no override was supplied")]
    NoPrimaryKey {
        source_table: String,
        destination_table: String,
    },

    #[error(
        "no common key columns: requested [{}], source has [{}], destination has [{}]",
        .requested.join(", "),
        .source_columns.join(", "),
        .destination_columns.join(", ")
    )]
    NoCommonKeyColumns {
        requested: Vec<String>,
        source_columns: Vec<String>,
        destination_columns: Vec<String>,
    },

    #[error("{kind} columns missing from {side} rows: {}", .columns.join(", "))]
    MissingComparisonColumns {
        kind: &'static str,
        side: &'static str,
        columns: Vec<String>,
    },

    #[error("cannot {operation} {table}: repository is read-only")]
    ReadOnly {
        table: String,
        operation: &'static str,
    },

    #[error("table {table} does not exist")]
    TableDoesNotExist { table: String },

    #[error("exists check for {table} returned {value}, expected 0 or 1")]
    UnexpectedExistsResult { table: String, value: String },

    #[error("row count for {table} returned {value}, expected a non-negative integer")]
    UnexpectedCountResult { table: String, value: String },

    #[error("unknown column '{column}', available: {}", .available.join(", "))]
    UnknownColumn {
        column: String,
        available: Vec<String>,
    },

    #[error("column '{column}' appears more than once")]
    DuplicateColumn { column: String },

    #[error("row sets have different columns: [{}] vs [{}]", .expected.join(", "), .found.join(", "))]
    ColumnMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("row {row} has {found} values but {expected} columns are declared")]
    ArityMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("column '{column}' of {table} collides with a history system column")]
    ReservedColumn { table: String, column: String },

    #[error("{dialect} cannot render {value} as a literal")]
    UnsupportedLiteral {
        dialect: &'static str,
        value: String,
    },

    #[error("cannot bind {value} to a {sql_type} parameter")]
    UnsupportedParameter { sql_type: String, value: String },

    #[error("run deadline exceeded before {operation} on {table}")]
    DeadlineExceeded {
        table: String,
        operation: &'static str,
    },

    #[error("re-fetching {expected} {operation} rows of {table} by primary key returned {found}")]
    RefetchMismatch {
        table: String,
        operation: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{context}")]
    Database {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl SyncError {
    /// Wrap a driver error with a description of what was being attempted.
    pub fn database<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SyncError::Database {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error was raised before any data could have been touched.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SyncError::MissingPrimaryKey { .. }
                | SyncError::InvalidCustomPrimaryKey { .. }
                | SyncError::NoPrimaryKey { .. }
                | SyncError::NoCommonKeyColumns { .. }
                | SyncError::MissingComparisonColumns { .. }
                | SyncError::ReadOnly { .. }
                | SyncError::InvalidConfig(_)
        )
    }
}
