// ABOUTME: SQL text generation for PostgreSQL, SQL Server, Hive and SQLite
// ABOUTME: One closed enum; each operation is a single match over the dialects

pub mod literal;
pub mod quote;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SyncError};
use crate::rows::{RowSet, Value};
use crate::schema::{DataType, TableRef, TableSchema};
use quote::{quote_literal, quote_with};

/// Supplies the bind-parameter marker for a column at a 1-based position.
pub type Placeholder<'a> = &'a (dyn Fn(&str, usize) -> String + Sync);

/// SQL dialects the core can generate statements for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    SqlServer,
    Hive,
    Sqlite,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "sqlserver" | "mssql" | "sql_server" => Ok(Dialect::SqlServer),
            "hive" => Ok(Dialect::Hive),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(SyncError::InvalidConfig(format!("unknown dialect '{}'", other))),
        }
    }
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::SqlServer => "sqlserver",
            Dialect::Hive => "hive",
            Dialect::Sqlite => "sqlite",
        }
    }

    pub fn quote_identifier(&self, identifier: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => quote_with(identifier, '"', '"'),
            Dialect::SqlServer => quote_with(identifier, '[', ']'),
            Dialect::Hive => quote_with(identifier, '`', '`'),
        }
    }

    pub fn qualified_name(&self, table: &TableRef) -> String {
        match &table.schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(&table.table)
            ),
            None => self.quote_identifier(&table.table),
        }
    }

    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// DDL type for a logical column type.
    pub fn column_type(&self, data_type: &DataType) -> String {
        match (self, data_type) {
            (Dialect::Postgres, DataType::Bool) => "BOOLEAN".into(),
            (Dialect::SqlServer, DataType::Bool) => "BIT".into(),
            (Dialect::Hive, DataType::Bool) => "BOOLEAN".into(),
            (Dialect::Sqlite, DataType::Bool) => "BOOLEAN".into(),

            (_, DataType::Date) => "DATE".into(),

            (Dialect::Postgres, DataType::DateTime) => "TIMESTAMP".into(),
            (Dialect::SqlServer, DataType::DateTime) => "DATETIME2".into(),
            (Dialect::Hive, DataType::DateTime) => "TIMESTAMP".into(),
            (Dialect::Sqlite, DataType::DateTime) => "DATETIME".into(),

            (Dialect::Postgres, DataType::Decimal { precision, scale }) => {
                format!("NUMERIC({}, {})", precision, scale)
            }
            (Dialect::Sqlite, DataType::Decimal { precision, scale }) => {
                format!("NUMERIC({}, {})", precision, scale)
            }
            (_, DataType::Decimal { precision, scale }) => {
                format!("DECIMAL({}, {})", precision, scale)
            }

            (Dialect::Postgres, DataType::Float) => "DOUBLE PRECISION".into(),
            (Dialect::SqlServer, DataType::Float) => "FLOAT".into(),
            (Dialect::Hive, DataType::Float) => "DOUBLE".into(),
            (Dialect::Sqlite, DataType::Float) => "REAL".into(),

            (Dialect::Postgres, DataType::Int { autoincrement: true }) => {
                "BIGINT GENERATED BY DEFAULT AS IDENTITY".into()
            }
            (Dialect::SqlServer, DataType::Int { autoincrement: true }) => {
                "BIGINT IDENTITY(1,1)".into()
            }
            (Dialect::Sqlite, DataType::Int { .. }) => "INTEGER".into(),
            (_, DataType::Int { .. }) => "BIGINT".into(),

            (Dialect::Postgres, DataType::Text { max_length: None }) => "TEXT".into(),
            (Dialect::SqlServer, DataType::Text { max_length: None }) => "NVARCHAR(MAX)".into(),
            (Dialect::Hive, DataType::Text { max_length: None }) => "STRING".into(),
            (Dialect::Sqlite, DataType::Text { max_length: None }) => "TEXT".into(),
            (Dialect::SqlServer, DataType::Text { max_length: Some(n) }) => {
                format!("NVARCHAR({})", n)
            }
            (_, DataType::Text { max_length: Some(n) }) => format!("VARCHAR({})", n),
        }
    }

    /// `CREATE TABLE` with columns and primary-key clause.
    pub fn create_table(&self, schema: &TableSchema) -> String {
        // SQLite only honours AUTOINCREMENT on an inline single-column key.
        let inline_identity = match (self, schema.primary_key()) {
            (Dialect::Sqlite, [pk]) => schema
                .data_type(pk)
                .filter(DataType::is_autoincrement)
                .map(|_| pk.clone()),
            _ => None,
        };

        let mut definitions: Vec<String> = schema
            .columns()
            .iter()
            .map(|column| {
                let name = self.quote_identifier(&column.name);
                if inline_identity.as_deref() == Some(column.name.as_str()) {
                    return format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name);
                }
                let ty = self.column_type(&column.data_type);
                if column.nullable || *self == Dialect::Hive {
                    format!("{} {}", name, ty)
                } else {
                    format!("{} {} NOT NULL", name, ty)
                }
            })
            .collect();

        if inline_identity.is_none() {
            let pk = self.column_list(schema.primary_key());
            definitions.push(match self {
                Dialect::Hive => format!("PRIMARY KEY ({}) DISABLE NOVALIDATE", pk),
                _ => format!("PRIMARY KEY ({})", pk),
            });
        }

        let mut sql = format!(
            "CREATE TABLE {} ({})",
            self.qualified_name(schema.name()),
            definitions.join(", ")
        );
        if *self == Dialect::Hive {
            // UPDATE and DELETE need an ACID table.
            sql.push_str(" STORED AS ORC TBLPROPERTIES ('transactional'='true')");
        }
        sql
    }

    pub fn drop_table(&self, table: &TableRef) -> String {
        format!("DROP TABLE IF EXISTS {}", self.qualified_name(table))
    }

    pub fn truncate_table(&self, table: &TableRef) -> String {
        match self {
            Dialect::Sqlite => format!("DELETE FROM {}", self.qualified_name(table)),
            _ => format!("TRUNCATE TABLE {}", self.qualified_name(table)),
        }
    }

    pub fn row_count(&self, table: &TableRef) -> String {
        match self {
            Dialect::SqlServer => format!("SELECT COUNT_BIG(*) FROM {}", self.qualified_name(table)),
            _ => format!("SELECT COUNT(*) FROM {}", self.qualified_name(table)),
        }
    }

    /// Statistics-based row estimate, where the dialect keeps one.
    ///
    /// The query may yield NULL or a negative number (never analysed); callers
    /// fall back to [`Dialect::row_count`] in that case.
    pub fn approximate_row_count(&self, table: &TableRef) -> Option<String> {
        let name = quote_literal(&self.qualified_name(table));
        match self {
            Dialect::Postgres => Some(format!(
                "SELECT reltuples::bigint FROM pg_class WHERE oid = to_regclass({})",
                name
            )),
            Dialect::SqlServer => Some(format!(
                "SELECT SUM(p.rows) FROM sys.partitions p WHERE p.object_id = OBJECT_ID(N{}) AND p.index_id IN (0, 1)",
                name
            )),
            Dialect::Hive | Dialect::Sqlite => None,
        }
    }

    /// Query whose result says whether the table exists; decode it with
    /// [`Dialect::interpret_exists`].
    pub fn table_exists(&self, table: &TableRef) -> String {
        match self {
            Dialect::Postgres => format!(
                "SELECT CASE WHEN to_regclass({}) IS NULL THEN 0 ELSE 1 END",
                quote_literal(&self.qualified_name(table))
            ),
            Dialect::SqlServer => format!(
                "SELECT CASE WHEN OBJECT_ID(N{}, N'U') IS NULL THEN 0 ELSE 1 END",
                quote_literal(&self.qualified_name(table))
            ),
            Dialect::Hive => match &table.schema {
                Some(schema) => format!(
                    "SHOW TABLES IN {} LIKE {}",
                    self.quote_identifier(schema),
                    quote::quote_hive_literal(&table.table)
                ),
                None => format!(
                    "SHOW TABLES LIKE {}",
                    quote::quote_hive_literal(&table.table)
                ),
            },
            Dialect::Sqlite => {
                let master = match &table.schema {
                    Some(schema) => format!("{}.sqlite_master", self.quote_identifier(schema)),
                    None => "sqlite_master".to_string(),
                };
                format!(
                    "SELECT COUNT(*) FROM {} WHERE type = 'table' AND name = {}",
                    master,
                    quote_literal(&table.table)
                )
            }
        }
    }

    /// Decode the result of [`Dialect::table_exists`].
    ///
    /// Hive answers with the list of matching table names; every other
    /// dialect answers with a single 0/1, and anything else is a bug in the
    /// generated query.
    pub fn interpret_exists(&self, table: &TableRef, rows: &RowSet) -> Result<bool> {
        if *self == Dialect::Hive {
            return Ok(rows.as_tuples().iter().any(|row| {
                row.first()
                    .and_then(Value::as_str)
                    .map(|name| name.eq_ignore_ascii_case(&table.table))
                    .unwrap_or(false)
            }));
        }

        let value = match rows.as_tuples() {
            [row] if row.len() == 1 => &row[0],
            _ => {
                return Err(SyncError::UnexpectedExistsResult {
                    table: table.to_string(),
                    value: format!("{} rows", rows.len()),
                })
            }
        };

        match value.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(SyncError::UnexpectedExistsResult {
                table: table.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn select(&self, table: &TableRef, columns: &[String]) -> String {
        format!(
            "SELECT {} FROM {}",
            self.column_list(columns),
            self.qualified_name(table)
        )
    }

    pub fn select_distinct(&self, table: &TableRef, columns: &[String]) -> String {
        format!(
            "SELECT DISTINCT {} FROM {}",
            self.column_list(columns),
            self.qualified_name(table)
        )
    }

    /// Single-row `INSERT` template with positional placeholders.
    pub fn insert(&self, table: &TableRef, columns: &[String], placeholder: Placeholder<'_>) -> String {
        let markers: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| placeholder(c, i + 1))
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified_name(table),
            self.column_list(columns),
            markers.join(", ")
        )
    }

    /// `UPDATE ... SET ... WHERE <primary key>`; parameters bind SET columns
    /// first, then key columns.
    pub fn update(
        &self,
        schema: &TableSchema,
        set_columns: &[String],
        placeholder: Placeholder<'_>,
    ) -> String {
        let assignments: Vec<String> = set_columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", self.quote_identifier(c), placeholder(c, i + 1)))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {}",
            self.qualified_name(schema.name()),
            assignments.join(", "),
            self.bound_key_predicate(schema, set_columns.len(), placeholder)
        )
    }

    /// `DELETE ... WHERE <primary key>`; parameters bind the key columns.
    pub fn delete(&self, schema: &TableSchema, placeholder: Placeholder<'_>) -> String {
        format!(
            "DELETE FROM {} WHERE {}",
            self.qualified_name(schema.name()),
            self.bound_key_predicate(schema, 0, placeholder)
        )
    }

    fn bound_key_predicate(
        &self,
        schema: &TableSchema,
        offset: usize,
        placeholder: Placeholder<'_>,
    ) -> String {
        schema
            .primary_key()
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let data_type = schema.data_type(c);
                format!(
                    "{} = {}",
                    self.comparable(&self.quote_identifier(c), data_type),
                    self.comparable(&placeholder(c, offset + i + 1), data_type)
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// The form a key expression is compared in.
    ///
    /// SQLite keeps timestamps as text in whatever shape the writer used
    /// (`T` separator, no fraction, `CURRENT_TIMESTAMP`), so temporal columns
    /// compare on their julian day, which has millisecond resolution. Text
    /// that is not a timestamp compares as is. The expression appears twice,
    /// which relies on SQLite's numbered `?N` placeholders.
    fn comparable(&self, expression: &str, data_type: Option<DataType>) -> String {
        match (self, data_type) {
            (Dialect::Sqlite, Some(DataType::Date | DataType::DateTime)) => {
                format!("COALESCE(julianday({0}), {0})", expression)
            }
            _ => expression.to_string(),
        }
    }

    /// Select rows whose primary key is one of `keys`, with the key values
    /// inlined as literals.
    ///
    /// Single-column keys use `IN (...)`:
    /// ```sql
    /// SELECT "id", "name" FROM "public"."users" WHERE "id" IN (1, 2, 3)
    /// ```
    /// Composite keys use one parenthesised conjunction per row:
    /// ```sql
    /// SELECT ... WHERE ("order_id" = 1 AND "item_id" = 7) OR ("order_id" = 2 AND "item_id" = 9)
    /// ```
    pub fn select_by_primary_key_values(
        &self,
        schema: &TableSchema,
        columns: &[String],
        keys: &RowSet,
    ) -> Result<String> {
        let pk = schema.primary_key();
        let key_rows = keys.select(pk)?;
        let predicate = if key_rows.is_empty() {
            "1 = 0".to_string()
        } else if let [column] = pk {
            self.in_list_predicate(schema, column, &key_rows)?
        } else {
            let clauses = key_rows
                .as_tuples()
                .iter()
                .map(|row| {
                    let parts = pk
                        .iter()
                        .zip(row.iter())
                        .map(|(column, value)| self.equals_predicate(schema, column, value))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(format!("({})", parts.join(" AND ")))
                })
                .collect::<Result<Vec<_>>>()?;
            clauses.join(" OR ")
        };

        Ok(format!("{} WHERE {}", self.select(schema.name(), columns), predicate))
    }

    /// Select rows where one column equals a value (inlined).
    pub fn select_where_equals(
        &self,
        schema: &TableSchema,
        columns: &[String],
        column: &str,
        value: &Value,
    ) -> Result<String> {
        Ok(format!(
            "{} WHERE {}",
            self.select(schema.name(), columns),
            self.equals_predicate(schema, column, value)?
        ))
    }

    pub fn render_literal(&self, value: &Value, data_type: Option<DataType>) -> Result<String> {
        literal::render(*self, value, data_type)
    }

    fn equals_predicate(&self, schema: &TableSchema, column: &str, value: &Value) -> Result<String> {
        let quoted = self.quote_identifier(column);
        if value.is_null() {
            return Ok(format!("{} IS NULL", quoted));
        }
        let data_type = schema.data_type(column);
        Ok(format!(
            "{} = {}",
            self.comparable(&quoted, data_type),
            self.comparable(&self.render_literal(value, data_type)?, data_type)
        ))
    }

    fn in_list_predicate(&self, schema: &TableSchema, column: &str, keys: &RowSet) -> Result<String> {
        let data_type = schema.data_type(column);
        let quoted = self.quote_identifier(column);
        let mut has_null = false;
        let mut literals = Vec::with_capacity(keys.len());
        for row in keys.as_tuples() {
            if row[0].is_null() {
                has_null = true;
            } else {
                let literal = self.render_literal(&row[0], data_type)?;
                literals.push(self.comparable(&literal, data_type));
            }
        }

        Ok(match (literals.is_empty(), has_null) {
            (true, _) => format!("{} IS NULL", quoted),
            (false, false) => format!(
                "{} IN ({})",
                self.comparable(&quoted, data_type),
                literals.join(", ")
            ),
            (false, true) => format!(
                "({} IN ({}) OR {} IS NULL)",
                self.comparable(&quoted, data_type),
                literals.join(", "),
                quoted
            ),
        })
    }
}
