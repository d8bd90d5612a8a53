// ABOUTME: Executor over a tokio-postgres client
// ABOUTME: Binds values by the prepared statement's parameter types and opens transactions lazily

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Client;

use super::{Executor, Params};
use crate::error::{Result, SyncError};
use crate::rows::{parse_datetime, RowSet, Value, DATETIME_FORMAT, DATE_FORMAT};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// PostgreSQL executor.
///
/// Every statement is prepared first so that parameters can be converted to
/// exactly the types the server expects; `tokio-postgres` refuses to bind an
/// `i64` to an `integer` column otherwise.
pub struct PostgresExecutor {
    client: Client,
    in_transaction: AtomicBool,
}

impl PostgresExecutor {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            in_transaction: AtomicBool::new(false),
        }
    }

    /// Get a reference to the underlying client.
    ///
    /// Useful for callers that need to run driver-specific queries.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn ensure_open(&self) -> Result<()> {
        if self.client.is_closed() {
            return Err(SyncError::ConnectionClosed);
        }
        Ok(())
    }

    async fn begin_if_needed(&self) -> Result<()> {
        if self.in_transaction.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.client.batch_execute("BEGIN").await {
            self.in_transaction.store(false, Ordering::SeqCst);
            return Err(SyncError::database("Failed to begin transaction", e));
        }
        Ok(())
    }

    async fn finish(&self, statement: &str) -> Result<()> {
        self.ensure_open()?;
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.client
            .batch_execute(statement)
            .await
            .map_err(|e| SyncError::database(format!("Failed to {}", statement), e))
    }
}

#[async_trait]
impl Executor for PostgresExecutor {
    fn placeholder(&self, _column: &str, position: usize) -> String {
        format!("${}", position)
    }

    async fn execute(&self, sql: &str, params: Params<'_>) -> Result<u64> {
        self.ensure_open()?;
        self.begin_if_needed().await?;
        tracing::debug!("execute: {}", sql);

        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| SyncError::database(format!("Failed to prepare: {}", sql), e))?;

        let mut affected = 0u64;
        for values in params.executions() {
            let bound = bind_all(values, statement.params())?;
            let refs: Vec<&(dyn ToSql + Sync)> = bound
                .iter()
                .map(|v| v.as_ref() as &(dyn ToSql + Sync))
                .collect();
            affected += self
                .client
                .execute(&statement, &refs)
                .await
                .map_err(|e| SyncError::database(format!("Failed to execute: {}", sql), e))?;
        }

        Ok(affected)
    }

    async fn fetch(&self, sql: &str, params: Params<'_>) -> Result<RowSet> {
        self.ensure_open()?;
        tracing::debug!("fetch: {}", sql);

        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| SyncError::database(format!("Failed to prepare: {}", sql), e))?;

        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let types: Vec<Type> = statement
            .columns()
            .iter()
            .map(|c| c.type_().clone())
            .collect();

        let mut rows = Vec::new();
        for values in params.executions() {
            let bound = bind_all(values, statement.params())?;
            let refs: Vec<&(dyn ToSql + Sync)> = bound
                .iter()
                .map(|v| v.as_ref() as &(dyn ToSql + Sync))
                .collect();
            let fetched = self
                .client
                .query(&statement, &refs)
                .await
                .map_err(|e| SyncError::database(format!("Failed to query: {}", sql), e))?;

            for row in &fetched {
                let cells = types
                    .iter()
                    .enumerate()
                    .map(|(idx, ty)| read_cell(row, idx, ty, &columns[idx]))
                    .collect::<Result<Vec<_>>>()?;
                rows.push(cells);
            }
        }

        RowSet::new(columns, rows)
    }

    async fn commit(&self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

fn read_cell(row: &tokio_postgres::Row, idx: usize, ty: &Type, column: &str) -> Result<Value> {
    let context = || format!("Failed to read column '{}' ({})", column, ty);

    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map(Value::from),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map(|v| Value::from(v.map(i64::from))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map(|v| Value::from(v.map(i64::from))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(Value::from),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)
            .map(|v| Value::from(v.map(i64::from))),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map(|v| Value::from(v.map(f64::from))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map(Value::from),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(idx).map(Value::from),
        Type::DATE => row.try_get::<_, Option<NaiveDate>>(idx).map(Value::from),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map(Value::from),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<Utc>>>(idx)
            .map(|v| Value::from(v.map(|dt| dt.naive_utc()))),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .map(|v| Value::from(v.map(|u| u.to_string()))),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map(|v| Value::from(v.map(|j| j.to_string()))),
        Type::BYTEA => {
            use base64::Engine;
            row.try_get::<_, Option<Vec<u8>>>(idx).map(|v| {
                Value::from(v.map(|b| base64::engine::general_purpose::STANDARD.encode(b)))
            })
        }
        // text, varchar, bpchar, name and anything else with a text form
        _ => row.try_get::<_, Option<String>>(idx).map(Value::from),
    };

    value.map_err(|e| SyncError::database(context(), e))
}

fn bind_all(values: &[Value], types: &[Type]) -> Result<Vec<BoxedParam>> {
    if values.len() != types.len() {
        return Err(SyncError::ArityMismatch {
            row: 0,
            expected: types.len(),
            found: values.len(),
        });
    }
    values
        .iter()
        .zip(types)
        .map(|(value, ty)| bind(value, ty))
        .collect()
}

/// Convert a value into the Rust type `tokio-postgres` accepts for `ty`.
fn bind(value: &Value, ty: &Type) -> Result<BoxedParam> {
    let mismatch = || SyncError::UnsupportedParameter {
        sql_type: ty.to_string(),
        value: value.to_string(),
    };

    let boxed: BoxedParam = match *ty {
        Type::BOOL => Box::new(match value {
            Value::Null => None,
            Value::Bool(b) => Some(*b),
            Value::Int(0) => Some(false),
            Value::Int(1) => Some(true),
            _ => return Err(mismatch()),
        }),
        Type::INT2 => Box::new(
            integer(value)
                .ok_or_else(mismatch)?
                .map(i16::try_from)
                .transpose()
                .map_err(|_| mismatch())?,
        ),
        Type::INT4 => Box::new(
            integer(value)
                .ok_or_else(mismatch)?
                .map(i32::try_from)
                .transpose()
                .map_err(|_| mismatch())?,
        ),
        Type::INT8 => Box::new(integer(value).ok_or_else(mismatch)?),
        Type::FLOAT4 => Box::new(float(value).ok_or_else(mismatch)?.map(|f| f as f32)),
        Type::FLOAT8 => Box::new(float(value).ok_or_else(mismatch)?),
        Type::NUMERIC => Box::new(match value {
            Value::Null => None,
            Value::Decimal(d) => Some(*d),
            Value::Int(i) => Some(Decimal::from(*i)),
            Value::Float(f) => Some(Decimal::from_f64(*f).ok_or_else(mismatch)?),
            Value::Text(s) => Some(s.trim().parse::<Decimal>().map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        }),
        Type::DATE => Box::new(match value {
            Value::Null => None,
            Value::Date(d) => Some(*d),
            Value::DateTime(dt) => Some(dt.date()),
            Value::Text(s) => Some(
                NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| mismatch())?,
            ),
            _ => return Err(mismatch()),
        }),
        Type::TIMESTAMP => Box::new(timestamp(value).ok_or_else(mismatch)?),
        Type::TIMESTAMPTZ => Box::new(
            timestamp(value)
                .ok_or_else(mismatch)?
                .map(|dt| Utc.from_utc_datetime(&dt)),
        ),
        Type::UUID => Box::new(match value {
            Value::Null => None,
            Value::Text(s) => Some(uuid::Uuid::parse_str(s).map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        }),
        Type::JSON | Type::JSONB => Box::new(match value {
            Value::Null => None,
            Value::Text(s) => Some(serde_json::from_str::<serde_json::Value>(s).map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        }),
        Type::BYTEA => Box::new(match value {
            Value::Null => None,
            Value::Text(s) => {
                use base64::Engine;
                Some(
                    base64::engine::general_purpose::STANDARD
                        .decode(s)
                        .map_err(|_| mismatch())?,
                )
            }
            _ => return Err(mismatch()),
        }),
        _ => Box::new(match value {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            other => Some(text_form(other)),
        }),
    };

    Ok(boxed)
}

/// `Some(None)` for NULL, `Some(Some(i))` for an integral value, `None` when
/// the value cannot be an integer.
fn integer(value: &Value) -> Option<Option<i64>> {
    match value {
        Value::Null => Some(None),
        Value::Int(i) => Some(Some(*i)),
        Value::Bool(b) => Some(Some(i64::from(*b))),
        Value::Decimal(d) if d.fract().is_zero() => d.to_i64().map(Some),
        _ => None,
    }
}

fn float(value: &Value) -> Option<Option<f64>> {
    match value {
        Value::Null => Some(None),
        Value::Float(f) => Some(Some(*f)),
        Value::Int(i) => Some(Some(*i as f64)),
        Value::Decimal(d) => d.to_f64().map(Some),
        _ => None,
    }
}

fn timestamp(value: &Value) -> Option<Option<NaiveDateTime>> {
    match value {
        Value::Null => Some(None),
        Value::DateTime(dt) => Some(Some(*dt)),
        Value::Date(d) => d.and_hms_opt(0, 0, 0).map(Some),
        Value::Text(s) => parse_datetime(s).map(Some),
        _ => None,
    }
}

fn text_form(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Date(d) => d.format(DATE_FORMAT).to_string(),
        Value::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
        other => other.to_string(),
    }
}
