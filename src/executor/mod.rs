// ABOUTME: Executor trait - the only seam between the sync core and a live database
// ABOUTME: Ships tokio-postgres and rusqlite implementations; other drivers implement the trait

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresExecutor;
pub use sqlite::SqliteExecutor;

use async_trait::async_trait;

use crate::error::Result;
use crate::rows::{Row, RowSet, Value};

/// Parameters for one statement.
#[derive(Debug, Clone, Copy)]
pub enum Params<'a> {
    /// The statement carries all values as inline literals.
    None,
    /// One bound execution.
    Row(&'a [Value]),
    /// The same statement executed once per row, in order.
    Rows(&'a [Row]),
}

impl<'a> Params<'a> {
    /// Split into the individual bound executions this parameter set stands for.
    ///
    /// `None` yields a single empty parameter list so that literal-only
    /// statements still run once.
    pub fn executions(&self) -> Vec<&'a [Value]> {
        match *self {
            Params::None => vec![&[][..]],
            Params::Row(row) => vec![row],
            Params::Rows(rows) => rows.iter().map(Vec::as_slice).collect(),
        }
    }
}

/// Runs SQL text against one connection.
///
/// Executors never retry. A mutating statement opens a transaction lazily;
/// it stays open until [`Executor::commit`] or [`Executor::rollback`].
/// Reads issued on the same executor see the uncommitted writes.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Bind marker for the parameter at 1-based `position`, e.g. `$3` or `?`.
    fn placeholder(&self, column: &str, position: usize) -> String;

    /// Run a statement that returns no rows. Returns the affected row count
    /// summed over every execution.
    async fn execute(&self, sql: &str, params: Params<'_>) -> Result<u64>;

    /// Run a query. The result always carries the statement's column names,
    /// even when no rows match.
    async fn fetch(&self, sql: &str, params: Params<'_>) -> Result<RowSet>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}
