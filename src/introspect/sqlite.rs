// ABOUTME: SQLite introspector built on PRAGMA table_info
// ABOUTME: Detects AUTOINCREMENT keys from the table's CREATE statement

use async_trait::async_trait;

use super::{finalize_schema, Introspector};
use crate::dialect::quote::{quote_literal, quote_with};
use crate::error::Result;
use crate::executor::SqliteExecutor;
use crate::schema::{Column, DataType, TableRef, TableSchema};

pub struct SqliteIntrospector<'a> {
    executor: &'a SqliteExecutor,
    scope: String,
}

impl<'a> SqliteIntrospector<'a> {
    pub fn new(executor: &'a SqliteExecutor, scope: impl Into<String>) -> Self {
        Self {
            executor,
            scope: scope.into(),
        }
    }
}

struct PragmaColumn {
    name: String,
    declared: String,
    not_null: bool,
    pk_position: i64,
}

#[async_trait]
impl<'a> Introspector for SqliteIntrospector<'a> {
    fn cache_scope(&self) -> String {
        self.scope.clone()
    }

    async fn inspect(
        &self,
        table: &TableRef,
        custom_primary_key: Option<&[String]>,
        include_columns: Option<&[String]>,
    ) -> Result<TableSchema> {
        tracing::debug!("Inspecting SQLite table {}", table);

        let prefix = match &table.schema {
            Some(schema) => format!("{}.", quote_with(schema, '"', '"')),
            None => String::new(),
        };
        let pragma = format!(
            "PRAGMA {}table_info({})",
            prefix,
            quote_with(&table.table, '"', '"')
        );
        let master = format!(
            "SELECT sql FROM {}sqlite_master WHERE type = 'table' AND name = {}",
            prefix,
            quote_literal(&table.table)
        );

        let (pragma_columns, create_sql) = self.executor.with_connection(|conn| {
            let mut stmt = conn.prepare(&pragma)?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(PragmaColumn {
                        name: row.get(1)?,
                        declared: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        not_null: row.get::<_, i64>(3)? != 0,
                        pk_position: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut stmt = conn.prepare(&master)?;
            let sql: Option<String> = stmt
                .query_map([], |row| row.get::<_, Option<String>>(0))?
                .next()
                .transpose()?
                .flatten();
            Ok((columns, sql))
        })?;

        let has_autoincrement = create_sql
            .map(|sql| sql.to_ascii_uppercase().contains("AUTOINCREMENT"))
            .unwrap_or(false);

        let mut keyed: Vec<(i64, String)> = pragma_columns
            .iter()
            .filter(|c| c.pk_position > 0)
            .map(|c| (c.pk_position, c.name.clone()))
            .collect();
        keyed.sort();
        let declared_pk: Vec<String> = keyed.into_iter().map(|(_, name)| name).collect();

        let columns = pragma_columns
            .iter()
            .map(|c| {
                let mut data_type = DataType::from_declared(&c.declared);
                // AUTOINCREMENT is only legal on a lone INTEGER PRIMARY KEY.
                if has_autoincrement
                    && declared_pk.len() == 1
                    && declared_pk[0] == c.name
                    && matches!(data_type, DataType::Int { .. })
                {
                    data_type = DataType::Int {
                        autoincrement: true,
                    };
                }
                Column::new(&c.name, data_type, !c.not_null && c.pk_position == 0)
            })
            .collect();

        finalize_schema(
            table,
            columns,
            declared_pk,
            custom_primary_key,
            include_columns,
        )
    }
}
