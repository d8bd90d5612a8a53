// ABOUTME: Executor over an in-process rusqlite connection
// ABOUTME: Converts cells using the declared column type so dates and decimals survive storage

use async_trait::async_trait;
use base64::Engine;
use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{Executor, Params};
use crate::error::{Result, SyncError};
use crate::rows::{parse_datetime, RowSet, Value, DATETIME_FORMAT, DATE_FORMAT};
use crate::schema::DataType;

/// SQLite executor.
///
/// SQLite has no native date or decimal storage, so dates and timestamps are
/// written as text in [`DATE_FORMAT`] / [`DATETIME_FORMAT`] and read back by
/// looking at the column's declared type. Blobs come back as base64 text.
pub struct SqliteExecutor {
    conn: Mutex<Option<Connection>>,
    in_transaction: AtomicBool,
}

impl SqliteExecutor {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            in_transaction: AtomicBool::new(false),
        }
    }

    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Opening SQLite database {:?}", path);
        let conn = Connection::open(path)
            .map_err(|e| SyncError::database(format!("Failed to open SQLite database {:?}", path), e))?;
        Ok(Self::new(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SyncError::database("Failed to open in-memory SQLite database", e))?;
        Ok(Self::new(conn))
    }

    /// Close the connection. Later calls fail with [`SyncError::ConnectionClosed`].
    pub fn close(&self) -> Result<()> {
        let taken = self.lock().take();
        match taken {
            Some(conn) => conn
                .close()
                .map_err(|(_, e)| SyncError::database("Failed to close SQLite connection", e)),
            None => Ok(()),
        }
    }

    /// Run a closure against the raw connection.
    ///
    /// Used by the introspector for `PRAGMA` queries, and handy in tests for
    /// seeding data.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(SyncError::ConnectionClosed)?;
        f(conn).map_err(|e| SyncError::database("SQLite call failed", e))
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish(&self, statement: &str) -> Result<()> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(SyncError::ConnectionClosed)?;
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        conn.execute_batch(statement)
            .map_err(|e| SyncError::database(format!("Failed to {}", statement), e))
    }
}

#[async_trait]
impl Executor for SqliteExecutor {
    fn placeholder(&self, _column: &str, position: usize) -> String {
        format!("?{}", position)
    }

    async fn execute(&self, sql: &str, params: Params<'_>) -> Result<u64> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(SyncError::ConnectionClosed)?;
        tracing::debug!("execute: {}", sql);

        if !self.in_transaction.swap(true, Ordering::SeqCst) {
            if let Err(e) = conn.execute_batch("BEGIN") {
                self.in_transaction.store(false, Ordering::SeqCst);
                return Err(SyncError::database("Failed to begin transaction", e));
            }
        }

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| SyncError::database(format!("Failed to prepare: {}", sql), e))?;

        let mut affected = 0u64;
        for values in params.executions() {
            let bound: Vec<SqliteValue> = values.iter().map(to_sqlite).collect();
            let changed = stmt
                .execute(rusqlite::params_from_iter(bound))
                .map_err(|e| SyncError::database(format!("Failed to execute: {}", sql), e))?;
            affected += changed as u64;
        }

        Ok(affected)
    }

    async fn fetch(&self, sql: &str, params: Params<'_>) -> Result<RowSet> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(SyncError::ConnectionClosed)?;
        tracing::debug!("fetch: {}", sql);

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| SyncError::database(format!("Failed to prepare: {}", sql), e))?;

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let declared: Vec<Option<DataType>> = stmt
            .columns()
            .iter()
            .map(|c| c.decl_type().map(DataType::from_declared))
            .collect();

        let mut rows = Vec::new();
        for values in params.executions() {
            let bound: Vec<SqliteValue> = values.iter().map(to_sqlite).collect();
            let mut result = stmt
                .query(rusqlite::params_from_iter(bound))
                .map_err(|e| SyncError::database(format!("Failed to query: {}", sql), e))?;

            while let Some(row) = result
                .next()
                .map_err(|e| SyncError::database(format!("Failed to read row: {}", sql), e))?
            {
                let mut cells = Vec::with_capacity(columns.len());
                for (idx, data_type) in declared.iter().enumerate() {
                    let cell = row
                        .get_ref(idx)
                        .map_err(|e| SyncError::database(format!("Failed to read column {}", columns[idx]), e))?;
                    cells.push(from_sqlite(cell, *data_type));
                }
                rows.push(cells);
            }
        }

        RowSet::new(columns, rows)
    }

    async fn commit(&self) -> Result<()> {
        self.finish("COMMIT")
    }

    async fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK")
    }
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Int(i) => SqliteValue::Integer(*i),
        Value::Float(f) => SqliteValue::Real(*f),
        Value::Decimal(d) => SqliteValue::Text(d.to_string()),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Date(d) => SqliteValue::Text(d.format(DATE_FORMAT).to_string()),
        Value::DateTime(dt) => SqliteValue::Text(dt.format(DATETIME_FORMAT).to_string()),
    }
}

/// Interpret a stored cell through the column's declared type.
///
/// Expressions (`COUNT(*)`, literals) have no declared type and keep
/// SQLite's storage class.
fn from_sqlite(cell: ValueRef<'_>, declared: Option<DataType>) -> Value {
    match (cell, declared) {
        (ValueRef::Null, _) => Value::Null,

        (ValueRef::Integer(i), Some(DataType::Bool)) => Value::Bool(i != 0),
        (ValueRef::Integer(i), Some(DataType::Decimal { scale, .. })) => {
            Value::Decimal(Decimal::from(i).round_dp(u32::from(scale)))
        }
        (ValueRef::Integer(i), Some(DataType::Float)) => Value::Float(i as f64),
        (ValueRef::Integer(i), _) => Value::Int(i),

        (ValueRef::Real(f), Some(DataType::Decimal { scale, .. })) => Decimal::from_f64(f)
            .map(|d| Value::Decimal(d.round_dp(u32::from(scale))))
            .unwrap_or(Value::Float(f)),
        (ValueRef::Real(f), _) => Value::Float(f),

        (ValueRef::Text(bytes), declared) => {
            let text = String::from_utf8_lossy(bytes);
            match declared {
                Some(DataType::Date) => NaiveDate::parse_from_str(&text, DATE_FORMAT)
                    .map(Value::Date)
                    .unwrap_or_else(|_| Value::Text(text.into_owned())),
                Some(DataType::DateTime) => parse_datetime(&text)
                    .map(Value::DateTime)
                    .unwrap_or_else(|| Value::Text(text.into_owned())),
                Some(DataType::Decimal { scale, .. }) => text
                    .trim()
                    .parse::<Decimal>()
                    .map(|d| Value::Decimal(d.round_dp(u32::from(scale))))
                    .unwrap_or_else(|_| Value::Text(text.into_owned())),
                _ => Value::Text(text.into_owned()),
            }
        }

        (ValueRef::Blob(bytes), _) => {
            Value::Text(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}
