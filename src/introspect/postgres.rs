// ABOUTME: PostgreSQL introspector using information_schema and pg_index
// ABOUTME: Maps declared column types onto logical DataTypes

use async_trait::async_trait;
use tokio_postgres::Client;

use super::{finalize_schema, Introspector};
use crate::error::{Result, SyncError};
use crate::schema::{Column, DataType, TableRef, TableSchema};

/// Precision and scale assumed for an unconstrained `numeric` column.
const UNCONSTRAINED_NUMERIC: (u8, u8) = (38, 10);

pub struct PostgresIntrospector<'a> {
    client: &'a Client,
    scope: String,
}

impl<'a> PostgresIntrospector<'a> {
    /// `scope` identifies the database in schema-cache keys; pass a redacted URL.
    pub fn new(client: &'a Client, scope: impl Into<String>) -> Self {
        Self {
            client,
            scope: scope.into(),
        }
    }

    async fn columns(&self, schema: &str, table: &str) -> Result<Vec<Column>> {
        // Casts strip the information_schema domain types.
        let rows = self
            .client
            .query(
                "SELECT column_name::text,
                        data_type::text,
                        is_nullable::text,
                        character_maximum_length::int4,
                        numeric_precision::int4,
                        numeric_scale::int4,
                        column_default::text,
                        is_identity::text
                 FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&schema, &table],
            )
            .await
            .map_err(|e| {
                SyncError::database(format!("Failed to get columns for {}.{}", schema, table), e)
            })?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get(0);
                let data_type: String = row.get(1);
                let nullable: String = row.get(2);
                let max_length: Option<i32> = row.get(3);
                let precision: Option<i32> = row.get(4);
                let scale: Option<i32> = row.get(5);
                let default: Option<String> = row.get(6);
                let identity: Option<String> = row.get(7);

                let autoincrement = identity.as_deref() == Some("YES")
                    || default
                        .as_deref()
                        .map(|d| d.starts_with("nextval("))
                        .unwrap_or(false);

                Column::new(
                    &name,
                    map_type(&data_type, max_length, precision, scale, autoincrement),
                    nullable == "YES",
                )
            })
            .collect())
    }

    async fn primary_key(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT a.attname::text
                 FROM pg_index i
                 JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
                 JOIN pg_class c ON c.oid = i.indrelid
                 JOIN pg_namespace n ON n.oid = c.relnamespace
                 WHERE i.indisprimary
                   AND n.nspname = $1
                   AND c.relname = $2
                 ORDER BY array_position(i.indkey, a.attnum)",
                &[&schema, &table],
            )
            .await
            .map_err(|e| {
                SyncError::database(
                    format!("Failed to get primary key for {}.{}", schema, table),
                    e,
                )
            })?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }
}

#[async_trait]
impl<'a> Introspector for PostgresIntrospector<'a> {
    fn cache_scope(&self) -> String {
        self.scope.clone()
    }

    async fn inspect(
        &self,
        table: &TableRef,
        custom_primary_key: Option<&[String]>,
        include_columns: Option<&[String]>,
    ) -> Result<TableSchema> {
        let schema = table.schema.as_deref().unwrap_or("public");
        tracing::debug!("Inspecting {}.{}", schema, table.table);

        let columns = self.columns(schema, &table.table).await?;
        let declared = if columns.is_empty() {
            Vec::new()
        } else {
            self.primary_key(schema, &table.table).await?
        };

        let resolved = TableRef::new(Some(schema), &table.table);
        finalize_schema(
            &resolved,
            columns,
            declared,
            custom_primary_key,
            include_columns,
        )
    }
}

fn map_type(
    data_type: &str,
    max_length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
    autoincrement: bool,
) -> DataType {
    let clamp = |v: i32| v.clamp(0, 38) as u8;
    match data_type {
        "smallint" | "integer" | "bigint" => DataType::Int { autoincrement },
        "numeric" | "decimal" => match precision {
            Some(p) => DataType::Decimal {
                precision: clamp(p),
                scale: clamp(scale.unwrap_or(0)),
            },
            None => DataType::Decimal {
                precision: UNCONSTRAINED_NUMERIC.0,
                scale: UNCONSTRAINED_NUMERIC.1,
            },
        },
        "character varying" | "character" => DataType::Text {
            max_length: max_length.and_then(|n| u32::try_from(n).ok()),
        },
        other => DataType::from_declared(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_type() {
        assert_eq!(
            map_type("integer", None, Some(32), Some(0), true),
            DataType::Int {
                autoincrement: true
            }
        );
        assert_eq!(
            map_type("numeric", None, Some(12), Some(2), false),
            DataType::Decimal {
                precision: 12,
                scale: 2
            }
        );
        assert_eq!(
            map_type("numeric", None, None, None, false),
            DataType::Decimal {
                precision: 38,
                scale: 10
            }
        );
        assert_eq!(
            map_type("character varying", Some(64), None, None, false),
            DataType::Text {
                max_length: Some(64)
            }
        );
        assert_eq!(map_type("text", None, None, None, false), DataType::TEXT);
        assert_eq!(
            map_type("timestamp with time zone", None, None, None, false),
            DataType::DateTime
        );
        assert_eq!(map_type("jsonb", None, None, None, false), DataType::TEXT);
    }
}
