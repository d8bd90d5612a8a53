// ABOUTME: Repository - one table schema bound to a dialect and an executor
// ABOUTME: Batched add/update/delete, key projections and fetch-by-primary-key

use std::time::Instant;

use crate::dialect::Dialect;
use crate::error::{Result, SyncError};
use crate::executor::{Executor, Params};
use crate::rows::{RowSet, Value};
use crate::schema::{TableRef, TableSchema};

/// Rows per statement batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

/// Row-level operations on one table.
///
/// Every multi-row operation is split into batches of `batch_size` rows that
/// run strictly in order. When a deadline is set it is checked before each
/// batch starts; a batch already sent to the executor always completes.
pub struct Repository<'a> {
    schema: TableSchema,
    dialect: Dialect,
    executor: &'a dyn Executor,
    read_only: bool,
    batch_size: usize,
    deadline: Option<Instant>,
}

impl<'a> Repository<'a> {
    pub fn new(schema: TableSchema, dialect: Dialect, executor: &'a dyn Executor) -> Self {
        Self {
            schema,
            dialect,
            executor,
            read_only: false,
            batch_size: DEFAULT_BATCH_SIZE,
            deadline: None,
        }
    }

    /// Reject every mutating or structural operation.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Rows per batch; zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    fn table(&self) -> &TableRef {
        self.schema.name()
    }

    fn ensure_writable(&self, operation: &'static str) -> Result<()> {
        if self.read_only {
            return Err(SyncError::ReadOnly {
                table: self.table().to_string(),
                operation,
            });
        }
        Ok(())
    }

    fn check_deadline(&self, operation: &'static str) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(SyncError::DeadlineExceeded {
                table: self.table().to_string(),
                operation,
            }),
            _ => Ok(()),
        }
    }

    fn placeholder(&self) -> impl Fn(&str, usize) -> String + Sync + 'a {
        let executor = self.executor;
        move |column: &str, position: usize| executor.placeholder(column, position)
    }

    /// Validate a requested projection; `None` means every column.
    fn resolve_columns(&self, columns: Option<&[String]>) -> Result<Vec<String>> {
        let Some(columns) = columns else {
            return Ok(self.schema.column_names());
        };
        for column in columns {
            self.require_column(column)?;
        }
        Ok(columns.to_vec())
    }

    fn require_column(&self, column: &str) -> Result<()> {
        if self.schema.has_column(column) {
            Ok(())
        } else {
            Err(SyncError::UnknownColumn {
                column: column.to_string(),
                available: self.schema.column_names(),
            })
        }
    }

    /// Run a statement once per row, batch by batch.
    async fn execute_batched(&self, operation: &'static str, sql: &str, rows: &RowSet) -> Result<u64> {
        let total_batches = rows.batches(self.batch_size).len();
        let mut affected = 0u64;
        for (idx, batch) in rows.batches(self.batch_size).enumerate() {
            self.check_deadline(operation)?;
            tracing::debug!(
                "{} {}: batch {}/{} ({} rows)",
                operation,
                self.table(),
                idx + 1,
                total_batches,
                batch.len()
            );
            affected += self
                .executor
                .execute(sql, Params::Rows(batch.as_tuples()))
                .await?;
        }
        Ok(affected)
    }

    /// Insert every row. The row set's columns are inserted as given.
    pub async fn add(&self, rows: &RowSet) -> Result<u64> {
        self.ensure_writable("add")?;
        if rows.is_empty() {
            return Ok(0);
        }
        for column in rows.columns() {
            self.require_column(column)?;
        }

        let placeholder = self.placeholder();
        let sql = self
            .dialect
            .insert(self.table(), rows.columns(), &placeholder);
        self.execute_batched("add", &sql, rows).await
    }

    /// Update rows in place, matching on the primary key.
    ///
    /// Every non-key column present in `rows` is written. Parameters bind in
    /// the order (non-key columns..., key columns...).
    pub async fn update(&self, rows: &RowSet) -> Result<u64> {
        self.ensure_writable("update")?;
        if rows.is_empty() {
            return Ok(0);
        }

        let key_columns = self.schema.primary_key().to_vec();
        let set_columns: Vec<String> = rows
            .columns()
            .iter()
            .filter(|c| !self.schema.is_key_column(c))
            .cloned()
            .collect();
        if set_columns.is_empty() {
            tracing::debug!("update {}: no non-key columns to write", self.table());
            return Ok(0);
        }
        for column in &set_columns {
            self.require_column(column)?;
        }

        let ordered: Vec<String> = set_columns.iter().chain(&key_columns).cloned().collect();
        let bound = rows.select(&ordered)?;

        let placeholder = self.placeholder();
        let sql = self.dialect.update(&self.schema, &set_columns, &placeholder);
        self.execute_batched("update", &sql, &bound).await
    }

    /// Delete the rows whose primary key appears in `rows`. Extra columns are ignored.
    pub async fn delete(&self, rows: &RowSet) -> Result<u64> {
        self.ensure_writable("delete")?;
        if rows.is_empty() {
            return Ok(0);
        }

        let key_columns = self.schema.primary_key().to_vec();
        let keys = rows.select(&key_columns)?;

        let placeholder = self.placeholder();
        let sql = self.dialect.delete(&self.schema, &placeholder);
        self.execute_batched("delete", &sql, &keys).await
    }

    /// Full scan.
    pub async fn fetch_all(&self, columns: Option<&[String]>) -> Result<RowSet> {
        let columns = self.resolve_columns(columns)?;
        self.check_deadline("fetch_all")?;
        let sql = self.dialect.select(self.table(), &columns);
        let rows = self.executor.fetch(&sql, Params::None).await?;
        labelled(rows, columns)
    }

    /// Distinct primary key ∪ `additional` projection, the cheap input to the comparator.
    pub async fn fetch_keys(&self, additional: &[String]) -> Result<RowSet> {
        let mut columns = self.schema.primary_key().to_vec();
        for column in additional {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        let columns = self.resolve_columns(Some(&columns))?;

        self.check_deadline("fetch_keys")?;
        let sql = self.dialect.select_distinct(self.table(), &columns);
        let rows = self.executor.fetch(&sql, Params::None).await?;
        labelled(rows, columns)
    }

    /// Fetch the rows whose primary key appears in `keys`, with key values
    /// inlined as literals and chunked by batch size.
    pub async fn fetch_by_primary_key_values(
        &self,
        keys: &RowSet,
        columns: Option<&[String]>,
    ) -> Result<RowSet> {
        let columns = self.resolve_columns(columns)?;
        if keys.is_empty() {
            return RowSet::empty(columns);
        }

        let mut fetched = Vec::new();
        for batch in keys.batches(self.batch_size) {
            self.check_deadline("fetch_by_primary_key_values")?;
            let sql = self
                .dialect
                .select_by_primary_key_values(&self.schema, &columns, &batch)?;
            let rows = self.executor.fetch(&sql, Params::None).await?;
            fetched.push(labelled(rows, columns.clone())?);
        }

        RowSet::concat(fetched)
    }

    /// Fetch rows where `column` equals `value`.
    pub async fn fetch_where_equals(
        &self,
        columns: Option<&[String]>,
        column: &str,
        value: &Value,
    ) -> Result<RowSet> {
        let columns = self.resolve_columns(columns)?;
        self.require_column(column)?;
        self.check_deadline("fetch_where_equals")?;
        let sql = self
            .dialect
            .select_where_equals(&self.schema, &columns, column, value)?;
        let rows = self.executor.fetch(&sql, Params::None).await?;
        labelled(rows, columns)
    }

    /// Exact `COUNT(*)`.
    pub async fn row_count(&self) -> Result<u64> {
        let sql = self.dialect.row_count(self.table());
        let rows = self.executor.fetch(&sql, Params::None).await?;
        match single_value(&rows).and_then(Value::as_i64) {
            Some(count) if count >= 0 => Ok(count as u64),
            _ => Err(SyncError::UnexpectedCountResult {
                table: self.table().to_string(),
                value: single_value(&rows)
                    .map(Value::to_string)
                    .unwrap_or_else(|| format!("{} rows", rows.len())),
            }),
        }
    }

    /// Statistics-based row estimate, falling back to [`Repository::row_count`]
    /// when the dialect keeps none or the table has never been analysed.
    pub async fn approximate_row_count(&self) -> Result<u64> {
        let Some(sql) = self.dialect.approximate_row_count(self.table()) else {
            return self.row_count().await;
        };

        let rows = self.executor.fetch(&sql, Params::None).await?;
        match single_value(&rows).and_then(Value::as_i64) {
            Some(estimate) if estimate >= 0 => Ok(estimate as u64),
            _ => {
                tracing::debug!(
                    "No row estimate for {}, falling back to exact count",
                    self.table()
                );
                self.row_count().await
            }
        }
    }

    pub async fn exists(&self) -> Result<bool> {
        table_exists(self.dialect, self.executor, self.table()).await
    }

    pub async fn truncate(&self) -> Result<()> {
        self.ensure_writable("truncate")?;
        let sql = self.dialect.truncate_table(self.table());
        self.executor.execute(&sql, Params::None).await?;
        Ok(())
    }

    pub async fn create_table(&self) -> Result<()> {
        self.ensure_writable("create")?;
        tracing::info!("Creating table {}", self.table());
        let sql = self.dialect.create_table(&self.schema);
        self.executor.execute(&sql, Params::None).await?;
        Ok(())
    }

    /// Create the table unless it exists. Returns whether it was created.
    pub async fn create_table_if_missing(&self) -> Result<bool> {
        self.ensure_writable("create")?;
        if self.exists().await? {
            return Ok(false);
        }
        self.create_table().await?;
        Ok(true)
    }

    pub async fn drop_table(&self) -> Result<()> {
        self.ensure_writable("drop")?;
        tracing::info!("Dropping table {}", self.table());
        let sql = self.dialect.drop_table(self.table());
        self.executor.execute(&sql, Params::None).await?;
        Ok(())
    }
}

/// Exists check usable before a schema is known.
pub async fn table_exists(
    dialect: Dialect,
    executor: &dyn Executor,
    table: &TableRef,
) -> Result<bool> {
    let sql = dialect.table_exists(table);
    let rows = executor.fetch(&sql, Params::None).await?;
    dialect.interpret_exists(table, &rows)
}

fn single_value(rows: &RowSet) -> Option<&Value> {
    match rows.as_tuples() {
        [row] if row.len() == 1 => Some(&row[0]),
        _ => None,
    }
}

/// Label a fetched set with the requested column names.
///
/// Some drivers prefix result columns with the table name; the positional
/// shape is what the generated SELECT guarantees.
fn labelled(rows: RowSet, columns: Vec<String>) -> Result<RowSet> {
    if rows.columns() == columns.as_slice() {
        return Ok(rows);
    }
    if rows.columns().len() != columns.len() {
        return Err(SyncError::ColumnMismatch {
            expected: columns,
            found: rows.columns().to_vec(),
        });
    }
    RowSet::new(columns, rows.into_rows())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SqliteExecutor;
    use crate::schema::{Column, DataType};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn users_schema() -> TableSchema {
        TableSchema::new(
            TableRef::unqualified("users"),
            vec![
                Column::new("id", DataType::INT, false),
                Column::new("name", DataType::TEXT, true),
                Column::new("email", DataType::TEXT, true),
            ],
            strings(&["id"]),
        )
        .unwrap()
    }

    fn users(rows: &[(i64, &str, &str)]) -> RowSet {
        RowSet::new(
            strings(&["id", "name", "email"]),
            rows.iter()
                .map(|(id, name, email)| vec![Value::Int(*id), Value::from(*name), Value::from(*email)])
                .collect(),
        )
        .unwrap()
    }

    /// Records statements instead of running them.
    #[derive(Default)]
    struct RecordingExecutor {
        statements: Mutex<Vec<(String, usize)>>,
    }

    impl RecordingExecutor {
        fn statements(&self) -> Vec<(String, usize)> {
            self.statements.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        fn placeholder(&self, _column: &str, _position: usize) -> String {
            "?".to_string()
        }

        async fn execute(&self, sql: &str, params: Params<'_>) -> Result<u64> {
            let executions = params.executions().len();
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), executions));
            Ok(executions as u64)
        }

        async fn fetch(&self, sql: &str, _params: Params<'_>) -> Result<RowSet> {
            self.statements.lock().unwrap().push((sql.to_string(), 1));
            RowSet::new(strings(&["x"]), vec![vec![Value::Int(1)]])
        }

        async fn commit(&self) -> Result<()> {
            Ok(())
        }

        async fn rollback(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_batches_follow_batch_size() {
        let executor = RecordingExecutor::default();
        let repo = Repository::new(users_schema(), Dialect::SqlServer, &executor).with_batch_size(2);

        let rows = users(&[(1, "a", "x"), (2, "b", "y"), (3, "c", "z")]);
        assert_eq!(repo.add(&rows).await.unwrap(), 3);

        let statements = executor.statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].0,
            "INSERT INTO [users] ([id], [name], [email]) VALUES (?, ?, ?)"
        );
        assert_eq!(statements[0].1, 2);
        assert_eq!(statements[1].1, 1);
    }

    #[tokio::test]
    async fn test_update_binds_non_key_then_key() {
        let executor = RecordingExecutor::default();
        let repo = Repository::new(users_schema(), Dialect::SqlServer, &executor);

        repo.update(&users(&[(1, "a", "x")])).await.unwrap();
        assert_eq!(
            executor.statements()[0].0,
            "UPDATE [users] SET [name] = ?, [email] = ? WHERE [id] = ?"
        );
    }

    #[tokio::test]
    async fn test_read_only_rejects_mutations() {
        let executor = RecordingExecutor::default();
        let repo = Repository::new(users_schema(), Dialect::Postgres, &executor).read_only(true);
        let rows = users(&[(1, "a", "x")]);

        for result in [
            repo.add(&rows).await.map(|_| ()),
            repo.update(&rows).await.map(|_| ()),
            repo.delete(&rows).await.map(|_| ()),
            repo.truncate().await,
            repo.create_table().await,
            repo.drop_table().await,
        ] {
            assert!(matches!(result, Err(SyncError::ReadOnly { .. })));
        }
        assert!(executor.statements().is_empty());
    }

    #[tokio::test]
    async fn test_expired_deadline_stops_before_first_batch() {
        let executor = RecordingExecutor::default();
        let past = Instant::now() - Duration::from_millis(1);
        let repo = Repository::new(users_schema(), Dialect::Postgres, &executor)
            .with_deadline(Some(past));

        let err = repo.add(&users(&[(1, "a", "x")])).await.unwrap_err();
        assert!(matches!(err, SyncError::DeadlineExceeded { .. }));
        assert!(executor.statements().is_empty());
    }

    #[tokio::test]
    async fn test_approximate_count_falls_back_without_statistics() {
        let executor = RecordingExecutor::default();
        let repo = Repository::new(users_schema(), Dialect::Hive, &executor);
        assert_eq!(repo.approximate_row_count().await.unwrap(), 1);
        assert!(executor.statements()[0].0.starts_with("SELECT COUNT(*)"));
    }

    async fn sqlite_repo(executor: &SqliteExecutor) -> Repository<'_> {
        let repo = Repository::new(users_schema(), Dialect::Sqlite, executor).with_batch_size(2);
        assert!(repo.create_table_if_missing().await.unwrap());
        assert!(!repo.create_table_if_missing().await.unwrap());
        repo
    }

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let executor = SqliteExecutor::open_in_memory().unwrap();
        let repo = sqlite_repo(&executor).await;

        repo.add(&users(&[(1, "a", "x"), (2, "b", "y"), (3, "c", "z")]))
            .await
            .unwrap();
        assert_eq!(repo.row_count().await.unwrap(), 3);

        repo.update(&users(&[(2, "b", "y2")])).await.unwrap();
        repo.delete(&RowSet::new(strings(&["id"]), vec![vec![Value::Int(3)]]).unwrap())
            .await
            .unwrap();

        let all = repo.fetch_all(None).await.unwrap().sorted_by(&["id"]).unwrap();
        assert_eq!(all, users(&[(1, "a", "x"), (2, "b", "y2")]));
    }

    #[tokio::test]
    async fn test_fetch_by_primary_key_values_is_chunked() {
        let executor = SqliteExecutor::open_in_memory().unwrap();
        let repo = sqlite_repo(&executor).await;
        repo.add(&users(&[(1, "a", "x"), (2, "b", "y"), (3, "c", "z"), (4, "d", "w")]))
            .await
            .unwrap();

        let keys = RowSet::new(
            strings(&["id"]),
            vec![vec![Value::Int(4)], vec![Value::Int(1)], vec![Value::Int(3)]],
        )
        .unwrap();
        let fetched = repo
            .fetch_by_primary_key_values(&keys, Some(&strings(&["id", "email"])))
            .await
            .unwrap()
            .sorted_by(&["id"])
            .unwrap();
        assert_eq!(fetched.columns(), &strings(&["id", "email"])[..]);
        assert_eq!(
            fetched.as_tuples(),
            &[
                vec![Value::Int(1), Value::from("x")],
                vec![Value::Int(3), Value::from("z")],
                vec![Value::Int(4), Value::from("w")],
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_results_keep_requested_columns() {
        let executor = SqliteExecutor::open_in_memory().unwrap();
        let repo = sqlite_repo(&executor).await;

        let keys = repo.fetch_keys(&strings(&["email"])).await.unwrap();
        assert!(keys.is_empty());
        assert_eq!(keys.columns(), &strings(&["id", "email"])[..]);

        let none = RowSet::empty(strings(&["id"])).unwrap();
        let fetched = repo.fetch_by_primary_key_values(&none, None).await.unwrap();
        assert_eq!(fetched.columns(), &strings(&["id", "name", "email"])[..]);
    }

    #[tokio::test]
    async fn test_unknown_column_fails_fast() {
        let executor = SqliteExecutor::open_in_memory().unwrap();
        let repo = sqlite_repo(&executor).await;
        let err = repo
            .fetch_all(Some(&strings(&["id", "phone"])))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownColumn { .. }));
    }

    #[tokio::test]
    async fn test_exists_and_drop() {
        let executor = SqliteExecutor::open_in_memory().unwrap();
        let repo = sqlite_repo(&executor).await;
        assert!(repo.exists().await.unwrap());
        repo.drop_table().await.unwrap();
        assert!(!repo.exists().await.unwrap());
    }
}
