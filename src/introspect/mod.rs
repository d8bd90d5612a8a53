// ABOUTME: Introspector trait - turns a live table into a TableSchema
// ABOUTME: Applies custom primary keys, column restrictions and the optional schema cache

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresIntrospector;
pub use sqlite::SqliteIntrospector;

use async_trait::async_trait;

use crate::error::{Result, SyncError};
use crate::schema::{Column, SchemaCache, TableRef, TableSchema};

/// Reads table metadata from a database.
#[async_trait]
pub trait Introspector: Send + Sync {
    /// Identifies the database for schema-cache keys. Must not contain
    /// credentials.
    fn cache_scope(&self) -> String;

    /// Describe `table`.
    ///
    /// `custom_primary_key` replaces the declared key; `include_columns`
    /// narrows the schema to those columns plus the key.
    ///
    /// # Errors
    ///
    /// - [`SyncError::TableDoesNotExist`] when the table is missing
    /// - [`SyncError::MissingPrimaryKey`] when there is no declared key and no override
    /// - [`SyncError::InvalidCustomPrimaryKey`] when the override names unknown columns
    async fn inspect(
        &self,
        table: &TableRef,
        custom_primary_key: Option<&[String]>,
        include_columns: Option<&[String]>,
    ) -> Result<TableSchema>;
}

/// Inspect through `cache` when one is supplied.
pub async fn inspect_cached(
    introspector: &dyn Introspector,
    cache: Option<&SchemaCache>,
    table: &TableRef,
    custom_primary_key: Option<&[String]>,
    include_columns: Option<&[String]>,
) -> Result<TableSchema> {
    let Some(cache) = cache else {
        return introspector
            .inspect(table, custom_primary_key, include_columns)
            .await;
    };

    let key = SchemaCache::key(
        &introspector.cache_scope(),
        table,
        custom_primary_key,
        include_columns,
    );
    if let Some(schema) = cache.get(&key) {
        tracing::debug!("Schema cache hit for {}", table);
        return Ok(schema);
    }

    let schema = introspector
        .inspect(table, custom_primary_key, include_columns)
        .await?;
    cache.insert(key, schema.clone());
    Ok(schema)
}

/// Assemble the schema shared by every introspector implementation.
pub(crate) fn finalize_schema(
    table: &TableRef,
    columns: Vec<Column>,
    declared_primary_key: Vec<String>,
    custom_primary_key: Option<&[String]>,
    include_columns: Option<&[String]>,
) -> Result<TableSchema> {
    if columns.is_empty() {
        return Err(SyncError::TableDoesNotExist {
            table: table.to_string(),
        });
    }

    let primary_key = match custom_primary_key {
        Some(custom) => {
            let unknown: Vec<String> = custom
                .iter()
                .filter(|c| !columns.iter().any(|col| &col.name == *c))
                .cloned()
                .collect();
            if !unknown.is_empty() || custom.is_empty() {
                return Err(SyncError::InvalidCustomPrimaryKey {
                    table: table.to_string(),
                    columns: unknown,
                });
            }
            custom.to_vec()
        }
        None => declared_primary_key,
    };

    let schema = TableSchema::new(table.clone(), columns, primary_key)?;
    match include_columns {
        Some(include) => schema.restricted_to(include),
        None => Ok(schema),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn columns() -> Vec<Column> {
        vec![
            Column::new("id", DataType::INT, false),
            Column::new("email", DataType::TEXT, true),
            Column::new("name", DataType::TEXT, true),
        ]
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_declared_key_is_used() {
        let table = TableRef::unqualified("users");
        let schema = finalize_schema(&table, columns(), strings(&["id"]), None, None).unwrap();
        assert_eq!(schema.primary_key(), &["id".to_string()]);
    }

    #[test]
    fn test_custom_key_overrides_declared() {
        let table = TableRef::unqualified("users");
        let custom = strings(&["email"]);
        let schema =
            finalize_schema(&table, columns(), strings(&["id"]), Some(&custom), None).unwrap();
        assert_eq!(schema.primary_key(), &["email".to_string()]);
    }

    #[test]
    fn test_missing_and_invalid_keys() {
        let table = TableRef::unqualified("users");
        assert!(matches!(
            finalize_schema(&table, columns(), vec![], None, None),
            Err(SyncError::MissingPrimaryKey { .. })
        ));

        let custom = strings(&["id", "tenant"]);
        match finalize_schema(&table, columns(), vec![], Some(&custom), None) {
            Err(SyncError::InvalidCustomPrimaryKey { columns, .. }) => {
                assert_eq!(columns, strings(&["tenant"]));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_missing_table() {
        let table = TableRef::unqualified("ghost");
        assert!(matches!(
            finalize_schema(&table, vec![], vec![], None, None),
            Err(SyncError::TableDoesNotExist { .. })
        ));
    }

    #[test]
    fn test_include_columns_keep_key() {
        let table = TableRef::unqualified("users");
        let include = strings(&["name"]);
        let schema =
            finalize_schema(&table, columns(), strings(&["id"]), None, Some(&include)).unwrap();
        assert_eq!(schema.column_names(), strings(&["id", "name"]));
    }

    struct CountingIntrospector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Introspector for CountingIntrospector {
        fn cache_scope(&self) -> String {
            "memory".to_string()
        }

        async fn inspect(
            &self,
            table: &TableRef,
            custom_primary_key: Option<&[String]>,
            include_columns: Option<&[String]>,
        ) -> Result<TableSchema> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            finalize_schema(
                table,
                columns(),
                strings(&["id"]),
                custom_primary_key,
                include_columns,
            )
        }
    }

    #[tokio::test]
    async fn test_cache_short_circuits_introspection() {
        let introspector = CountingIntrospector {
            calls: AtomicUsize::new(0),
        };
        let cache = SchemaCache::new();
        let table = TableRef::unqualified("users");

        let first = inspect_cached(&introspector, Some(&cache), &table, None, None)
            .await
            .unwrap();
        let second = inspect_cached(&introspector, Some(&cache), &table, None, None)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(introspector.calls.load(Ordering::SeqCst), 1);

        cache.invalidate("memory", &table);
        inspect_cached(&introspector, Some(&cache), &table, None, None)
            .await
            .unwrap();
        assert_eq!(introspector.calls.load(Ordering::SeqCst), 2);

        inspect_cached(&introspector, None, &table, None, None)
            .await
            .unwrap();
        assert_eq!(introspector.calls.load(Ordering::SeqCst), 3);
    }
}
