// ABOUTME: Integration tests for the synchronizer against in-memory SQLite databases
// ABOUTME: Covers full load, incremental diff, apply flags, fast path, key resolution and deadlines

use std::time::Duration;

use table_sync::executor::{Executor, Params, SqliteExecutor};
use table_sync::introspect::SqliteIntrospector;
use table_sync::schema::SchemaCache;
use table_sync::sync::{SyncConfig, SyncEndpoint, SyncPath, SyncPhase, Synchronizer};
use table_sync::{Dialect, RowSet, SyncError, TableRef, Value};

const USERS_DDL: &str =
    "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT)";

fn database(sql: &str) -> SqliteExecutor {
    let executor = SqliteExecutor::open_in_memory().unwrap();
    executor
        .with_connection(|conn| conn.execute_batch(sql))
        .unwrap();
    executor
}

fn seed(rows: &[(i64, &str, &str)]) -> String {
    let mut sql = String::from(USERS_DDL);
    sql.push(';');
    for (id, name, email) in rows {
        sql.push_str(&format!(
            "INSERT INTO users VALUES ({}, '{}', '{}');",
            id, name, email
        ));
    }
    sql
}

async fn users(executor: &SqliteExecutor) -> Vec<(i64, String, String)> {
    let rows = executor
        .fetch("SELECT id, name, email FROM users ORDER BY id", Params::None)
        .await
        .unwrap();
    rows.as_tuples()
        .iter()
        .map(|row| {
            (
                row[0].as_i64().unwrap(),
                row[1].as_str().unwrap().to_string(),
                row[2].as_str().unwrap_or("").to_string(),
            )
        })
        .collect()
}

fn expected(rows: &[(i64, &str, &str)]) -> Vec<(i64, String, String)> {
    rows.iter()
        .map(|(id, name, email)| (*id, name.to_string(), email.to_string()))
        .collect()
}

struct Pair {
    source: SqliteExecutor,
    destination: SqliteExecutor,
}

impl Pair {
    fn new(source_sql: &str, destination_sql: &str) -> Self {
        Self {
            source: database(source_sql),
            destination: database(destination_sql),
        }
    }

    async fn run(&self, config: SyncConfig) -> table_sync::Result<table_sync::SyncResult> {
        self.run_cached(config, None).await
    }

    async fn run_cached(
        &self,
        config: SyncConfig,
        cache: Option<&SchemaCache>,
    ) -> table_sync::Result<table_sync::SyncResult> {
        self.run_table("users", config, cache).await
    }

    async fn run_table(
        &self,
        table: &str,
        config: SyncConfig,
        cache: Option<&SchemaCache>,
    ) -> table_sync::Result<table_sync::SyncResult> {
        let source_introspector = SqliteIntrospector::new(&self.source, "source");
        let destination_introspector = SqliteIntrospector::new(&self.destination, "destination");
        let synchronizer = Synchronizer::new(
            SyncEndpoint::new(
                TableRef::unqualified(table),
                Dialect::Sqlite,
                &self.source,
                &source_introspector,
            ),
            SyncEndpoint::new(
                TableRef::unqualified(table),
                Dialect::Sqlite,
                &self.destination,
                &destination_introspector,
            ),
            config,
            cache,
        )?;
        synchronizer.run().await
    }
}

async fn rows(executor: &SqliteExecutor, sql: &str) -> Vec<Vec<Value>> {
    executor
        .fetch(sql, Params::None)
        .await
        .unwrap()
        .into_rows()
}

fn at(text: &str) -> Value {
    Value::DateTime(table_sync::rows::parse_datetime(text).unwrap())
}

#[tokio::test]
async fn test_full_load_creates_missing_destination() {
    let source_rows = [(1, "ada", "ada@example.com"), (2, "bob", "bob@example.com")];
    let pair = Pair::new(&seed(&source_rows), "SELECT 1");

    let result = pair.run(SyncConfig::default()).await.unwrap();

    assert_eq!(result.path, SyncPath::FullLoad);
    assert_eq!(result.added, 2);
    assert_eq!((result.deleted, result.updated), (0, 0));
    assert_eq!(users(&pair.destination).await, expected(&source_rows));
}

#[tokio::test]
async fn test_incremental_diff_applies_all_changes() {
    let pair = Pair::new(
        &seed(&[(1, "a", "x"), (2, "b", "y2"), (3, "c", "z")]),
        &seed(&[(1, "a", "x"), (2, "b", "y"), (4, "d", "w")]),
    );

    let result = pair.run(SyncConfig::default()).await.unwrap();

    assert_eq!(result.path, SyncPath::IncrementalDiff);
    assert_eq!((result.added, result.deleted, result.updated), (1, 1, 1));
    assert!(!result.skipped);
    assert_eq!(
        users(&pair.destination).await,
        expected(&[(1, "a", "x"), (2, "b", "y2"), (3, "c", "z")])
    );

    let again = pair.run(SyncConfig::default()).await.unwrap();
    assert_eq!((again.added, again.deleted, again.updated), (0, 0, 0));
}

#[tokio::test]
async fn test_disabled_delete_keeps_rows_but_reports_them() {
    let pair = Pair::new(
        &seed(&[(1, "a", "x")]),
        &seed(&[(1, "a", "x"), (2, "b", "y")]),
    );

    let result = pair
        .run(SyncConfig {
            delete: false,
            ..SyncConfig::default()
        })
        .await
        .unwrap();

    assert_eq!(result.deleted, 1);
    assert_eq!(
        users(&pair.destination).await,
        expected(&[(1, "a", "x"), (2, "b", "y")])
    );
}

#[tokio::test]
async fn test_compare_columns_limit_update_detection() {
    let pair = Pair::new(
        &seed(&[(1, "renamed", "x"), (2, "b", "changed")]),
        &seed(&[(1, "a", "x"), (2, "b", "y")]),
    );

    let result = pair
        .run(SyncConfig {
            compare_columns: Some(vec!["email".to_string()]),
            ..SyncConfig::default()
        })
        .await
        .unwrap();

    assert_eq!(result.updated, 1);
    // Only the row whose email changed is rewritten, with every column copied.
    assert_eq!(
        users(&pair.destination).await,
        expected(&[(1, "a", "x"), (2, "b", "changed")])
    );
}

#[tokio::test]
async fn test_fast_path_skips_when_counts_match() {
    let pair = Pair::new(
        &seed(&[(1, "a", "x"), (2, "b", "y")]),
        &seed(&[(1, "a", "stale"), (3, "c", "z")]),
    );

    let result = pair
        .run(SyncConfig {
            skip_if_row_counts_match: true,
            ..SyncConfig::default()
        })
        .await
        .unwrap();

    assert!(result.skipped);
    assert_eq!(result.path, SyncPath::FastPathSkip);
    assert_eq!((result.added, result.deleted, result.updated), (0, 0, 0));
    assert_eq!(
        users(&pair.destination).await,
        expected(&[(1, "a", "stale"), (3, "c", "z")])
    );
}

#[tokio::test]
async fn test_fast_path_falls_through_when_counts_differ() {
    let pair = Pair::new(&seed(&[(1, "a", "x"), (2, "b", "y")]), &seed(&[(1, "a", "x")]));

    let result = pair
        .run(SyncConfig {
            skip_if_row_counts_match: true,
            approximate_row_counts: true,
            ..SyncConfig::default()
        })
        .await
        .unwrap();

    assert!(!result.skipped);
    assert_eq!(result.added, 1);
}

#[tokio::test]
async fn test_source_without_key_uses_destination_key() {
    let pair = Pair::new(
        "CREATE TABLE users (id INTEGER NOT NULL, name TEXT NOT NULL, email TEXT);
         INSERT INTO users VALUES (1, 'a', 'x'), (2, 'b', 'y');",
        &seed(&[(1, "a", "old")]),
    );

    let result = pair.run(SyncConfig::default()).await.unwrap();

    assert_eq!((result.added, result.updated), (1, 1));
    assert_eq!(
        users(&pair.destination).await,
        expected(&[(1, "a", "x"), (2, "b", "y")])
    );
}

#[tokio::test]
async fn test_no_key_anywhere_fails_before_touching_data() {
    let keyless = "CREATE TABLE users (id INTEGER, name TEXT, email TEXT);
                   INSERT INTO users VALUES (1, 'a', 'x');";
    let pair = Pair::new(keyless, "CREATE TABLE users (id INTEGER, name TEXT, email TEXT)");

    let err = pair.run(SyncConfig::default()).await.unwrap_err();
    assert!(matches!(err, SyncError::NoPrimaryKey { .. }), "{err}");
    assert!(users(&pair.destination).await.is_empty());
}

#[tokio::test]
async fn test_primary_key_override() {
    let keyless = "CREATE TABLE users (id INTEGER, name TEXT NOT NULL, email TEXT);
                   INSERT INTO users VALUES (1, 'a', 'x'), (2, 'b', 'y');";
    let pair = Pair::new(keyless, "SELECT 1");

    let result = pair
        .run(SyncConfig {
            primary_key: Some(vec!["id".to_string()]),
            ..SyncConfig::default()
        })
        .await
        .unwrap();

    assert_eq!(result.added, 2);
    assert_eq!(users(&pair.destination).await.len(), 2);
}

#[tokio::test]
async fn test_recreate_rebuilds_destination() {
    let pair = Pair::new(
        &seed(&[(1, "a", "x")]),
        "CREATE TABLE users (id INTEGER PRIMARY KEY, legacy TEXT);
         INSERT INTO users VALUES (9, 'gone');",
    );

    let result = pair
        .run(SyncConfig {
            recreate: true,
            ..SyncConfig::default()
        })
        .await
        .unwrap();

    assert_eq!(result.path, SyncPath::FullLoad);
    assert_eq!(users(&pair.destination).await, expected(&[(1, "a", "x")]));
}

#[tokio::test]
async fn test_small_batches_cover_every_row() {
    let rows: Vec<(i64, String, String)> = (1..=23)
        .map(|i| (i, format!("user{}", i), format!("u{}@example.com", i)))
        .collect();
    let borrowed: Vec<(i64, &str, &str)> = rows
        .iter()
        .map(|(id, name, email)| (*id, name.as_str(), email.as_str()))
        .collect();
    let pair = Pair::new(&seed(&borrowed), &seed(&borrowed[..10]));

    let result = pair
        .run(SyncConfig {
            batch_size: 4,
            ..SyncConfig::default()
        })
        .await
        .unwrap();

    assert_eq!(result.added, 13);
    assert_eq!(users(&pair.destination).await, rows);
}

#[tokio::test]
async fn test_deadline_is_enforced() {
    let pair = Pair::new(&seed(&[(1, "a", "x")]), &seed(&[]));

    let source_introspector = SqliteIntrospector::new(&pair.source, "source");
    let destination_introspector = SqliteIntrospector::new(&pair.destination, "destination");
    let synchronizer = Synchronizer::new(
        SyncEndpoint::new(
            TableRef::unqualified("users"),
            Dialect::Sqlite,
            &pair.source,
            &source_introspector,
        ),
        SyncEndpoint::new(
            TableRef::unqualified("users"),
            Dialect::Sqlite,
            &pair.destination,
            &destination_introspector,
        ),
        SyncConfig {
            timeout: Some(Duration::from_nanos(1)),
            ..SyncConfig::default()
        },
        None,
    )
    .unwrap();

    let err = synchronizer.run().await.unwrap_err();
    assert!(matches!(err, SyncError::DeadlineExceeded { .. }), "{err}");
    assert_eq!(synchronizer.phase(), SyncPhase::Error);
}

#[tokio::test]
async fn test_schema_cache_is_reused_between_runs() {
    let pair = Pair::new(&seed(&[(1, "a", "x")]), "SELECT 1");
    let cache = SchemaCache::new();

    pair.run_cached(SyncConfig::default(), Some(&cache))
        .await
        .unwrap();
    assert!(!cache.is_empty());

    pair.source
        .with_connection(|conn| conn.execute_batch("INSERT INTO users VALUES (2, 'b', 'y')"))
        .unwrap();
    let result = pair
        .run_cached(SyncConfig::default(), Some(&cache))
        .await
        .unwrap();
    assert_eq!(result.added, 1);
}

#[tokio::test]
async fn test_null_compare_values_are_detected() {
    let pair = Pair::new(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT);
         INSERT INTO users VALUES (1, 'a', NULL);",
        &seed(&[(1, "a", "x")]),
    );

    let result = pair.run(SyncConfig::default()).await.unwrap();
    assert_eq!(result.updated, 1);

    let rows: RowSet = pair
        .destination
        .fetch("SELECT email FROM users", Params::None)
        .await
        .unwrap();
    assert_eq!(rows.as_tuples(), &[vec![Value::Null]]);
}

#[tokio::test]
async fn test_timestamp_keys_match_across_text_forms() {
    let pair = Pair::new(
        "CREATE TABLE ev (at DATETIME PRIMARY KEY, v TEXT);
         INSERT INTO ev VALUES ('2024-01-01 10:00:00', 'a'),
                               ('2024-01-02T10:00:00', 'b'),
                               ('2024-01-03 10:00:00.000000', 'c');",
        "CREATE TABLE ev (at DATETIME PRIMARY KEY, v TEXT);
         INSERT INTO ev VALUES ('2024-01-01 10:00:00.000000', 'a'),
                               ('2024-01-03 10:00:00', 'old'),
                               ('2024-01-05 08:00:00', 'gone');",
    );

    let result = pair
        .run_table("ev", SyncConfig::default(), None)
        .await
        .unwrap();

    assert_eq!((result.added, result.deleted, result.updated), (1, 1, 1));
    assert_eq!(
        rows(&pair.destination, "SELECT at, v FROM ev ORDER BY julianday(at)").await,
        vec![
            vec![at("2024-01-01 10:00:00"), Value::from("a")],
            vec![at("2024-01-02 10:00:00"), Value::from("b")],
            vec![at("2024-01-03 10:00:00"), Value::from("c")],
        ]
    );
}

#[tokio::test]
async fn test_ambiguous_refetch_fails_instead_of_guessing() {
    // Both source keys fall into the same millisecond.
    let pair = Pair::new(
        "CREATE TABLE ev (at DATETIME PRIMARY KEY, v TEXT);
         INSERT INTO ev VALUES ('2024-01-01 10:00:00.000100', 'a'),
                               ('2024-01-01 10:00:00.000200', 'b');",
        "CREATE TABLE ev (at DATETIME PRIMARY KEY, v TEXT);
         INSERT INTO ev VALUES ('2024-01-01 10:00:00.000100', 'a');",
    );

    let err = pair
        .run_table("ev", SyncConfig::default(), None)
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            SyncError::RefetchMismatch {
                expected: 1,
                found: 2,
                ..
            }
        ),
        "{err}"
    );
    assert_eq!(rows(&pair.destination, "SELECT v FROM ev").await.len(), 1);
}

#[tokio::test]
async fn test_composite_key_add_update_delete() {
    let ddl = "CREATE TABLE stock (
                   warehouse TEXT NOT NULL,
                   sku TEXT NOT NULL,
                   qty INTEGER,
                   PRIMARY KEY (warehouse, sku)
               );";
    let pair = Pair::new(
        &format!(
            "{ddl}
             INSERT INTO stock VALUES ('north', 'a', 1), ('north', 'b''s', 5),
                                      ('south', 'a', 3), ('south', 'c', 9);"
        ),
        &format!(
            "{ddl}
             INSERT INTO stock VALUES ('north', 'a', 1), ('north', 'b''s', 2),
                                      ('east', 'z', 7);"
        ),
    );

    let result = pair
        .run_table(
            "stock",
            SyncConfig {
                batch_size: 1,
                ..SyncConfig::default()
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.path, SyncPath::IncrementalDiff);
    assert_eq!((result.added, result.deleted, result.updated), (2, 1, 1));
    let query = "SELECT warehouse, sku, qty FROM stock ORDER BY warehouse, sku";
    assert_eq!(
        rows(&pair.destination, query).await,
        rows(&pair.source, query).await
    );
}
