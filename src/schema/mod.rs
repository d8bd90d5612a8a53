// ABOUTME: Immutable table description: name, typed columns and primary key
// ABOUTME: Built by introspectors, consumed by repositories and dialects

pub mod cache;

pub use cache::SchemaCache;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SyncError};

/// Optionally schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: Option<&str>, table: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
        }
    }

    pub fn unqualified(table: &str) -> Self {
        Self::new(None, table)
    }

    /// Same schema, different table name.
    pub fn with_table(&self, table: &str) -> Self {
        Self {
            schema: self.schema.clone(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

impl FromStr for TableRef {
    type Err = SyncError;

    /// Parse `table` or `schema.table`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [table] if !table.is_empty() => Ok(Self::unqualified(table)),
            [schema, table] if !schema.is_empty() && !table.is_empty() => {
                Ok(Self::new(Some(schema), table))
            }
            _ => Err(SyncError::InvalidConfig(format!(
                "table must be 'table' or 'schema.table', got '{}'",
                s
            ))),
        }
    }
}

/// Logical column type, independent of any dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Date,
    DateTime,
    Decimal { precision: u8, scale: u8 },
    Float,
    Int { autoincrement: bool },
    Text { max_length: Option<u32> },
}

impl DataType {
    pub const INT: DataType = DataType::Int {
        autoincrement: false,
    };
    pub const TEXT: DataType = DataType::Text { max_length: None };

    pub fn is_autoincrement(&self) -> bool {
        matches!(
            self,
            DataType::Int {
                autoincrement: true
            }
        )
    }

    /// Best-effort mapping of a declared SQL type name onto a logical type.
    ///
    /// Understands the spellings used by PostgreSQL's `information_schema`,
    /// SQL Server, Hive and SQLite declared types. Anything unrecognised is
    /// treated as unbounded text.
    pub fn from_declared(declared: &str) -> DataType {
        let lowered = declared.trim().to_ascii_lowercase();
        let (base, args) = match lowered.find('(') {
            Some(open) => {
                let close = lowered.rfind(')').unwrap_or(lowered.len());
                let args: Vec<u32> = lowered[open + 1..close.max(open + 1)]
                    .split(',')
                    .filter_map(|a| a.trim().parse().ok())
                    .collect();
                (lowered[..open].trim().to_string(), args)
            }
            None => (lowered.clone(), Vec::new()),
        };

        match base.as_str() {
            "bool" | "boolean" | "bit" => DataType::Bool,
            "date" => DataType::Date,
            "timestamp" | "timestamp without time zone" | "timestamp with time zone"
            | "timestamptz" | "datetime" | "datetime2" | "smalldatetime" => DataType::DateTime,
            "numeric" | "decimal" | "money" => DataType::Decimal {
                precision: args.first().copied().unwrap_or(38).min(38) as u8,
                scale: args.get(1).copied().unwrap_or(0).min(38) as u8,
            },
            "real" | "float" | "float4" | "float8" | "double" | "double precision" => {
                DataType::Float
            }
            "int" | "integer" | "int2" | "int4" | "int8" | "smallint" | "bigint" | "tinyint" => {
                DataType::INT
            }
            "serial" | "bigserial" | "smallserial" => DataType::Int {
                autoincrement: true,
            },
            "varchar" | "character varying" | "nvarchar" | "char" | "character" | "nchar" => {
                DataType::Text {
                    max_length: args.first().copied(),
                }
            }
            _ => DataType::TEXT,
        }
    }
}

/// One column descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub nullable: bool,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: &str, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            nullable,
            data_type,
        }
    }
}

/// A table's columns and primary key.
///
/// The primary key is never empty and only names declared columns; both are
/// checked by [`TableSchema::new`], so a keyless table cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    name: TableRef,
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(name: TableRef, columns: Vec<Column>, primary_key: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SyncError::DuplicateColumn {
                    column: column.name.clone(),
                });
            }
        }

        if primary_key.is_empty() {
            return Err(SyncError::MissingPrimaryKey {
                table: name.to_string(),
            });
        }

        let unknown: Vec<String> = primary_key
            .iter()
            .filter(|pk| !seen.contains(pk.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(SyncError::InvalidCustomPrimaryKey {
                table: name.to_string(),
                columns: unknown,
            });
        }

        Ok(Self {
            name,
            columns,
            primary_key,
        })
    }

    pub fn name(&self) -> &TableRef {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.primary_key.iter().any(|pk| pk == name)
    }

    /// Columns outside the primary key, in declaration order.
    pub fn non_key_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !self.is_key_column(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Data type of a column, if declared.
    pub fn data_type(&self, name: &str) -> Option<DataType> {
        self.column(name).map(|c| c.data_type)
    }

    /// Same shape under another name.
    pub fn renamed(&self, name: TableRef) -> TableSchema {
        TableSchema {
            name,
            columns: self.columns.clone(),
            primary_key: self.primary_key.clone(),
        }
    }

    /// Same shape with identity columns turned into plain integers, for
    /// tables that receive key values copied from elsewhere.
    pub fn without_autoincrement(&self) -> TableSchema {
        let columns = self
            .columns
            .iter()
            .map(|c| match c.data_type {
                DataType::Int {
                    autoincrement: true,
                } => Column::new(&c.name, DataType::INT, c.nullable),
                _ => c.clone(),
            })
            .collect();
        TableSchema {
            name: self.name.clone(),
            columns,
            primary_key: self.primary_key.clone(),
        }
    }

    /// Same table with a different primary key.
    pub fn with_primary_key(&self, primary_key: Vec<String>) -> Result<TableSchema> {
        TableSchema::new(self.name.clone(), self.columns.clone(), primary_key)
    }

    /// Keep only the listed columns plus the primary key, in declaration order.
    pub fn restricted_to<S: AsRef<str>>(&self, include: &[S]) -> Result<TableSchema> {
        let unknown: Vec<String> = include
            .iter()
            .map(|c| c.as_ref())
            .filter(|c| !self.has_column(c))
            .map(str::to_string)
            .collect();
        if !unknown.is_empty() {
            return Err(SyncError::UnknownColumn {
                column: unknown.join(", "),
                available: self.column_names(),
            });
        }

        let columns = self
            .columns
            .iter()
            .filter(|c| {
                self.is_key_column(&c.name) || include.iter().any(|i| i.as_ref() == c.name)
            })
            .cloned()
            .collect();

        TableSchema::new(self.name.clone(), columns, self.primary_key.clone())
    }
}
