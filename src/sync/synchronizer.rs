// ABOUTME: Synchronizer - makes a destination table mirror a source table
// ABOUTME: Chooses fast-path skip, full load or incremental diff, then applies batched changes

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::deadline_from;
use crate::compare::{KeyColumnPolicy, RowComparator};
use crate::dialect::Dialect;
use crate::error::{Result, SyncError};
use crate::executor::Executor;
use crate::introspect::{inspect_cached, Introspector};
use crate::repository::{table_exists, Repository, DEFAULT_BATCH_SIZE};
use crate::rows::RowSet;
use crate::schema::{SchemaCache, TableRef, TableSchema};

/// One side of a synchronization: where the table lives and how to reach it.
#[derive(Clone)]
pub struct SyncEndpoint<'a> {
    pub table: TableRef,
    pub dialect: Dialect,
    pub executor: &'a dyn Executor,
    pub introspector: &'a dyn Introspector,
}

impl<'a> SyncEndpoint<'a> {
    pub fn new(
        table: TableRef,
        dialect: Dialect,
        executor: &'a dyn Executor,
        introspector: &'a dyn Introspector,
    ) -> Self {
        Self {
            table,
            dialect,
            executor,
            introspector,
        }
    }
}

/// Options for one synchronization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Overrides the primary key of both tables.
    pub primary_key: Option<Vec<String>>,
    /// Columns compared to detect updates. Defaults to every non-key column
    /// both tables share.
    pub compare_columns: Option<Vec<String>>,
    /// Restricts the source schema to these columns (plus the key).
    pub include_columns: Option<Vec<String>>,
    pub add: bool,
    pub update: bool,
    pub delete: bool,
    pub skip_if_row_counts_match: bool,
    /// Use statistics-based counts for the fast path.
    pub approximate_row_counts: bool,
    /// Drop and recreate the destination before loading.
    pub recreate: bool,
    pub batch_size: usize,
    pub key_policy: KeyColumnPolicy,
    /// Upper bound on the whole run, checked before each batch.
    pub timeout: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            primary_key: None,
            compare_columns: None,
            include_columns: None,
            add: true,
            update: true,
            delete: true,
            skip_if_row_counts_match: false,
            approximate_row_counts: false,
            recreate: false,
            batch_size: DEFAULT_BATCH_SIZE,
            key_policy: KeyColumnPolicy::default(),
            timeout: None,
        }
    }
}

impl SyncConfig {
    /// Reject settings that can never produce a valid run.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(SyncError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if matches!(&self.primary_key, Some(pk) if pk.is_empty()) {
            return Err(SyncError::InvalidConfig(
                "primary_key must name at least one column".to_string(),
            ));
        }

        for (name, columns) in [
            ("primary_key", &self.primary_key),
            ("compare_columns", &self.compare_columns),
            ("include_columns", &self.include_columns),
        ] {
            if let Some(columns) = columns {
                check_unique(name, columns)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn check_unique(setting: &str, columns: &[String]) -> Result<()> {
    for (idx, column) in columns.iter().enumerate() {
        if columns[..idx].contains(column) {
            return Err(SyncError::InvalidConfig(format!(
                "{} lists '{}' more than once",
                setting, column
            )));
        }
    }
    Ok(())
}

/// Where a run currently is. Every transition is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Inspecting,
    FastPathSkip,
    FullLoad,
    IncrementalDiff,
    Applying,
    Done,
    Error,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Inspecting => "inspecting",
            SyncPhase::FastPathSkip => "fast-path skip",
            SyncPhase::FullLoad => "full load",
            SyncPhase::IncrementalDiff => "incremental diff",
            SyncPhase::Applying => "applying",
            SyncPhase::Done => "done",
            SyncPhase::Error => "error",
        };
        f.write_str(name)
    }
}

/// Which strategy a completed run took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPath {
    FastPathSkip,
    FullLoad,
    IncrementalDiff,
}

/// Outcome of a run.
///
/// Counts are what was detected, whether or not the matching apply flag was
/// enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub added: u64,
    pub deleted: u64,
    pub updated: u64,
    pub skipped: bool,
    pub path: SyncPath,
}

impl SyncResult {
    fn skipped() -> Self {
        Self {
            added: 0,
            deleted: 0,
            updated: 0,
            skipped: true,
            path: SyncPath::FastPathSkip,
        }
    }
}

/// Schemas and column sets resolved before any data moves.
struct Plan {
    source: TableSchema,
    destination: TableSchema,
    primary_key: Vec<String>,
    compare: Vec<String>,
    transfer: Vec<String>,
}

/// Synchronizes one destination table with one source table.
///
/// A run:
/// 1. Resolves both schemas and the effective primary key (override, then
///    source, then destination)
/// 2. Creates the destination when missing, or drops and recreates it
/// 3. Optionally skips when row counts match
/// 4. Loads everything into an empty destination, or diffs key projections
///    and applies adds, deletes and updates
/// 5. Commits the destination executor once
///
/// Nothing is rolled back on failure; that is the caller's decision.
pub struct Synchronizer<'a> {
    source: SyncEndpoint<'a>,
    destination: SyncEndpoint<'a>,
    config: SyncConfig,
    cache: Option<&'a SchemaCache>,
    /// Current step of `run`, read by `phase()` observers.
    phase: Mutex<SyncPhase>,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        source: SyncEndpoint<'a>,
        destination: SyncEndpoint<'a>,
        config: SyncConfig,
        cache: Option<&'a SchemaCache>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            destination,
            config,
            cache,
            phase: Mutex::new(SyncPhase::Idle),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn phase(&self) -> SyncPhase {
        *self.lock_phase()
    }

    fn lock_phase(&self) -> MutexGuard<'_, SyncPhase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, phase: SyncPhase) {
        *self.lock_phase() = phase;
        tracing::info!(
            "{} -> {}: {}",
            self.source.table,
            self.destination.table,
            phase
        );
    }

    pub async fn run(&self) -> Result<SyncResult> {
        let started = Instant::now();
        match self.run_phases().await {
            Ok(result) => {
                self.enter(SyncPhase::Done);
                tracing::info!(
                    "Synchronized {} -> {} in {:.1}s: {} added, {} deleted, {} updated",
                    self.source.table,
                    self.destination.table,
                    started.elapsed().as_secs_f64(),
                    result.added,
                    result.deleted,
                    result.updated
                );
                Ok(result)
            }
            Err(e) => {
                tracing::error!(
                    "Synchronizing {} -> {} failed during {}: {}",
                    self.source.table,
                    self.destination.table,
                    self.phase(),
                    e
                );
                *self.lock_phase() = SyncPhase::Error;
                Err(e)
            }
        }
    }

    async fn run_phases(&self) -> Result<SyncResult> {
        let deadline = deadline_from(self.config.timeout);

        self.enter(SyncPhase::Inspecting);
        let plan = self.inspect().await?;

        let source = Repository::new(plan.source.clone(), self.source.dialect, self.source.executor)
            .read_only(true)
            .with_batch_size(self.config.batch_size)
            .with_deadline(deadline);
        let destination = Repository::new(
            plan.destination.clone(),
            self.destination.dialect,
            self.destination.executor,
        )
        .with_batch_size(self.config.batch_size)
        .with_deadline(deadline);

        if self.config.skip_if_row_counts_match {
            let source_count = self.count(&source).await?;
            let destination_count = self.count(&destination).await?;
            if source_count == destination_count {
                self.enter(SyncPhase::FastPathSkip);
                tracing::warn!(
                    "Row counts match ({} rows), skipping comparison of {} and {}",
                    source_count,
                    self.source.table,
                    self.destination.table
                );
                self.destination.executor.commit().await?;
                return Ok(SyncResult::skipped());
            }
            tracing::info!(
                "Row counts differ: source {}, destination {}",
                source_count,
                destination_count
            );
        }

        let destination_keys = destination
            .fetch_keys(&present_in(&plan.compare, &plan.destination))
            .await?;

        let result = if destination_keys.is_empty() {
            self.enter(SyncPhase::FullLoad);
            self.full_load(&source, &destination, &plan).await?
        } else {
            self.enter(SyncPhase::IncrementalDiff);
            self.incremental(&source, &destination, &plan, &destination_keys)
                .await?
        };

        self.destination.executor.commit().await?;
        Ok(result)
    }

    async fn count(&self, repository: &Repository<'_>) -> Result<u64> {
        if self.config.approximate_row_counts {
            repository.approximate_row_count().await
        } else {
            repository.row_count().await
        }
    }

    async fn full_load(
        &self,
        source: &Repository<'_>,
        destination: &Repository<'_>,
        plan: &Plan,
    ) -> Result<SyncResult> {
        let rows = source.fetch_all(Some(&plan.transfer)).await?;
        let added = rows.len() as u64;

        self.enter(SyncPhase::Applying);
        if self.config.add {
            destination.add(&rows).await?;
        } else {
            tracing::info!("Adds disabled, {} source rows not loaded", added);
        }

        Ok(SyncResult {
            added,
            deleted: 0,
            updated: 0,
            skipped: false,
            path: SyncPath::FullLoad,
        })
    }

    async fn incremental(
        &self,
        source: &Repository<'_>,
        destination: &Repository<'_>,
        plan: &Plan,
        destination_keys: &RowSet,
    ) -> Result<SyncResult> {
        let source_keys = source
            .fetch_keys(&present_in(&plan.compare, &plan.source))
            .await?;

        let diff = RowComparator::new(self.config.key_policy).compare(
            &plan.primary_key,
            &plan.compare,
            &source_keys,
            destination_keys,
        )?;
        tracing::info!(
            "{} -> {}: {} to add, {} to delete, {} to update",
            self.source.table,
            self.destination.table,
            diff.added.len(),
            diff.deleted.len(),
            diff.updated.len()
        );

        self.enter(SyncPhase::Applying);
        if self.config.add && !diff.added.is_empty() {
            let rows = self
                .refetch(source, &diff.added, &plan.transfer, "added")
                .await?;
            destination.add(&rows).await?;
        }
        if self.config.delete && !diff.deleted.is_empty() {
            destination.delete(&diff.deleted).await?;
        }
        if self.config.update && !diff.updated.is_empty() {
            let rows = self
                .refetch(source, &diff.updated, &plan.transfer, "updated")
                .await?;
            destination.update(&rows).await?;
        }

        Ok(SyncResult {
            added: diff.added.len() as u64,
            deleted: diff.deleted.len() as u64,
            updated: diff.updated.len() as u64,
            skipped: false,
            path: SyncPath::IncrementalDiff,
        })
    }

    /// Full source rows for `keys`; every key must come back exactly once.
    async fn refetch(
        &self,
        source: &Repository<'_>,
        keys: &RowSet,
        columns: &[String],
        operation: &'static str,
    ) -> Result<RowSet> {
        let rows = source
            .fetch_by_primary_key_values(keys, Some(columns))
            .await?;
        if rows.len() != keys.len() {
            return Err(SyncError::RefetchMismatch {
                table: self.source.table.to_string(),
                operation,
                expected: keys.len(),
                found: rows.len(),
            });
        }
        Ok(rows)
    }

    async fn inspect(&self) -> Result<Plan> {
        let include = self.config.include_columns.as_deref();

        let inspected = match inspect_cached(
            self.source.introspector,
            self.cache,
            &self.source.table,
            self.config.primary_key.as_deref(),
            include,
        )
        .await
        {
            Ok(schema) => Some(schema),
            Err(SyncError::MissingPrimaryKey { .. }) => None,
            Err(e) => return Err(e),
        };

        let destination_exists = table_exists(
            self.destination.dialect,
            self.destination.executor,
            &self.destination.table,
        )
        .await?;

        let source_schema = match inspected {
            Some(schema) => schema,
            None => {
                let key = self.destination_primary_key(destination_exists).await?;
                tracing::info!(
                    "{} has no primary key, using the key of {} ({})",
                    self.source.table,
                    self.destination.table,
                    key.join(", ")
                );
                inspect_cached(
                    self.source.introspector,
                    self.cache,
                    &self.source.table,
                    Some(&key),
                    include,
                )
                .await?
            }
        };
        let primary_key = source_schema.primary_key().to_vec();

        self.prepare_destination(&source_schema, destination_exists)
            .await?;

        let destination_schema = inspect_cached(
            self.destination.introspector,
            self.cache,
            &self.destination.table,
            Some(&primary_key),
            None,
        )
        .await?;

        let compare: Vec<String> = match &self.config.compare_columns {
            Some(columns) => columns
                .iter()
                .filter(|c| !primary_key.contains(c))
                .cloned()
                .collect(),
            None => source_schema
                .non_key_columns()
                .into_iter()
                .filter(|c| destination_schema.has_column(c))
                .collect(),
        };
        let transfer: Vec<String> = source_schema
            .column_names()
            .into_iter()
            .filter(|c| destination_schema.has_column(c))
            .collect();

        tracing::debug!(
            "Key [{}], compare [{}], transfer [{}]",
            primary_key.join(", "),
            compare.join(", "),
            transfer.join(", ")
        );

        Ok(Plan {
            source: source_schema,
            destination: destination_schema,
            primary_key,
            compare,
            transfer,
        })
    }

    async fn destination_primary_key(&self, destination_exists: bool) -> Result<Vec<String>> {
        let no_key = || SyncError::NoPrimaryKey {
            source_table: self.source.table.to_string(),
            destination_table: self.destination.table.to_string(),
        };
        if !destination_exists {
            return Err(no_key());
        }

        match inspect_cached(
            self.destination.introspector,
            self.cache,
            &self.destination.table,
            None,
            None,
        )
        .await
        {
            Ok(schema) => Ok(schema.primary_key().to_vec()),
            Err(SyncError::MissingPrimaryKey { .. }) => Err(no_key()),
            Err(e) => Err(e),
        }
    }

    /// Create the destination from the source shape when missing; drop it
    /// first when `recreate` is set.
    async fn prepare_destination(&self, source: &TableSchema, exists: bool) -> Result<()> {
        let shape = source
            .renamed(self.destination.table.clone())
            .without_autoincrement();
        let repository = Repository::new(shape, self.destination.dialect, self.destination.executor);

        let mut exists = exists;
        if self.config.recreate && exists {
            repository.drop_table().await?;
            exists = false;
        }
        if exists {
            return Ok(());
        }

        repository.create_table().await?;
        if let Some(cache) = self.cache {
            let dropped = cache.invalidate(
                &self.destination.introspector.cache_scope(),
                &self.destination.table,
            );
            if dropped > 0 {
                tracing::debug!("Invalidated {} cached schemas for {}", dropped, self.destination.table);
            }
        }
        Ok(())
    }
}

/// The columns of `columns` that `schema` declares.
fn present_in(columns: &[String], schema: &TableSchema) -> Vec<String> {
    columns
        .iter()
        .filter(|c| schema.has_column(c))
        .cloned()
        .collect()
}
