// ABOUTME: Bitemporal history tracker - versions every observed change of a live table
// ABOUTME: Soft-deletes by closing validity intervals, appends new versions on update

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, Utc};
use serde::Serialize;

use super::deadline_from;
use super::synchronizer::{check_unique, SyncEndpoint};
use crate::compare::{KeyColumnPolicy, RowComparator};
use crate::error::{Result, SyncError};
use crate::introspect::inspect_cached;
use crate::repository::{table_exists, Repository, DEFAULT_BATCH_SIZE};
use crate::rows::{RowSet, Value};
use crate::schema::{Column, DataType, SchemaCache, TableSchema};

/// Surrogate identity column; the history table's primary key.
pub const HISTORY_ID: &str = "history_id";
/// Inclusive start of a version's validity.
pub const VALID_FROM: &str = "valid_from";
/// Inclusive end of a version's validity; [`open_ended`] while current.
pub const VALID_TO: &str = "valid_to";

/// `valid_to` of the version that is currently valid: 9999-12-31 00:00:00.
pub fn open_ended() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .unwrap_or(NaiveDate::MAX)
        .and_time(NaiveTime::MIN)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Overrides the live table's primary key.
    pub primary_key: Option<Vec<String>>,
    /// Columns whose change creates a new version. Defaults to every non-key column.
    pub compare_columns: Option<Vec<String>>,
    /// Drop and rebuild the history table first.
    pub recreate: bool,
    pub batch_size: usize,
    pub key_policy: KeyColumnPolicy,
    pub timeout: Option<Duration>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            primary_key: None,
            compare_columns: None,
            recreate: false,
            batch_size: DEFAULT_BATCH_SIZE,
            key_policy: KeyColumnPolicy::default(),
            timeout: None,
        }
    }
}

impl HistoryConfig {
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
        if let Some(pk) = &self.primary_key {
            if pk.is_empty() {
                return Err(SyncError::InvalidConfig(
                    "primary_key must name at least one column".to_string(),
                ));
            }
            check_unique("primary_key", pk)?;
        }
        if let Some(columns) = &self.compare_columns {
            check_unique("compare_columns", columns)?;
        }
        Ok(())
    }
}

/// Changes recorded by one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistoryResult {
    pub added: u64,
    pub deleted: u64,
    pub updated: u64,
}

/// Maintains `<live>_history`-style tables.
///
/// Each live primary key has at most one history row whose `valid_to` is the
/// open-ended timestamp. A deleted key's open row is closed at `now`; an
/// updated key's open row is closed at `now - 1µs` and a new version opens at
/// `now`, so consecutive versions never overlap and never leave a gap.
pub struct HistoryTracker<'a> {
    live: SyncEndpoint<'a>,
    history: SyncEndpoint<'a>,
    config: HistoryConfig,
    cache: Option<&'a SchemaCache>,
}

impl<'a> HistoryTracker<'a> {
    pub fn new(
        live: SyncEndpoint<'a>,
        history: SyncEndpoint<'a>,
        config: HistoryConfig,
        cache: Option<&'a SchemaCache>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            live,
            history,
            config,
            cache,
        })
    }

    /// Record changes observed now.
    pub async fn update(&self) -> Result<HistoryResult> {
        self.update_at(Utc::now().naive_utc()).await
    }

    /// Record changes as of `now`, truncated to microseconds.
    pub async fn update_at(&self, now: NaiveDateTime) -> Result<HistoryResult> {
        let now = now.trunc_subsecs(6);
        let deadline = deadline_from(self.config.timeout);

        let live_schema = inspect_cached(
            self.live.introspector,
            self.cache,
            &self.live.table,
            self.config.primary_key.as_deref(),
            None,
        )
        .await?;
        for reserved in [HISTORY_ID, VALID_FROM, VALID_TO] {
            if live_schema.has_column(reserved) {
                return Err(SyncError::ReservedColumn {
                    table: self.live.table.to_string(),
                    column: reserved.to_string(),
                });
            }
        }

        let history_schema = self.history_schema(&live_schema)?;
        let live = Repository::new(live_schema.clone(), self.live.dialect, self.live.executor)
            .read_only(true)
            .with_batch_size(self.config.batch_size)
            .with_deadline(deadline);
        let history = Repository::new(history_schema, self.history.dialect, self.history.executor)
            .with_batch_size(self.config.batch_size)
            .with_deadline(deadline);

        self.prepare_history_table(&history).await?;

        let current = live.fetch_all(None).await?;
        let open = history
            .fetch_where_equals(None, VALID_TO, &Value::DateTime(open_ended()))
            .await?;

        let key = live_schema.primary_key().to_vec();
        let compare = match &self.config.compare_columns {
            Some(columns) => columns.clone(),
            None => live_schema.non_key_columns(),
        };
        let diff = RowComparator::new(self.config.key_policy).compare(&key, &compare, &current, &open)?;

        let result = HistoryResult {
            added: diff.added.len() as u64,
            deleted: diff.deleted.len() as u64,
            updated: diff.updated.len() as u64,
        };
        if diff.is_empty() {
            tracing::info!("No changes in {} since the last history update", self.live.table);
            self.history.executor.commit().await?;
            return Ok(result);
        }

        if !diff.added.is_empty() {
            let versions = opened(current.retain_keys(&key, &diff.added)?, now)?;
            history.add(&versions).await?;
        }

        if !diff.deleted.is_empty() {
            let closing = closed(open.retain_keys(&key, &diff.deleted)?, now)?;
            history.update(&closing).await?;
        }

        if !diff.updated.is_empty() {
            let superseded = now - chrono::Duration::microseconds(1);
            let closing = closed(open.retain_keys(&key, &diff.updated)?, superseded)?;
            history.update(&closing).await?;

            let versions = opened(current.retain_keys(&key, &diff.updated)?, now)?;
            history.add(&versions).await?;
        }

        self.history.executor.commit().await?;
        tracing::info!(
            "History of {} updated at {}: {} added, {} deleted, {} updated",
            self.live.table,
            now,
            result.added,
            result.deleted,
            result.updated
        );
        Ok(result)
    }

    /// `history_id`, the live columns, then the two validity columns.
    fn history_schema(&self, live: &TableSchema) -> Result<TableSchema> {
        let mut columns = vec![Column::new(
            HISTORY_ID,
            DataType::Int {
                autoincrement: true,
            },
            false,
        )];
        columns.extend(live.without_autoincrement().columns().iter().cloned());
        columns.push(Column::new(VALID_FROM, DataType::DateTime, false));
        columns.push(Column::new(VALID_TO, DataType::DateTime, false));

        TableSchema::new(
            self.history.table.clone(),
            columns,
            vec![HISTORY_ID.to_string()],
        )
    }

    async fn prepare_history_table(&self, history: &Repository<'_>) -> Result<()> {
        let mut exists =
            table_exists(self.history.dialect, self.history.executor, &self.history.table).await?;
        if self.config.recreate && exists {
            history.drop_table().await?;
            exists = false;
        }
        if exists {
            return Ok(());
        }

        history.create_table().await?;
        if let Some(cache) = self.cache {
            cache.invalidate(&self.history.introspector.cache_scope(), &self.history.table);
        }
        Ok(())
    }
}

/// Full live rows stamped as versions valid from `now` onwards.
fn opened(rows: RowSet, now: NaiveDateTime) -> Result<RowSet> {
    rows.with_static_column(VALID_FROM, Value::DateTime(now))?
        .with_static_column(VALID_TO, Value::DateTime(open_ended()))
}

/// `(history_id, valid_to)` pairs that close the given open versions.
fn closed(open_rows: RowSet, valid_to: NaiveDateTime) -> Result<RowSet> {
    open_rows
        .select(&[HISTORY_ID])?
        .with_static_column(VALID_TO, Value::DateTime(valid_to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_open_ended_timestamp() {
        assert_eq!(open_ended().to_string(), "9999-12-31 00:00:00");
    }

    #[test]
    fn test_closed_rows_carry_identity_and_end() {
        let open = RowSet::new(
            vec![HISTORY_ID.to_string(), "id".to_string(), VALID_TO.to_string()],
            vec![vec![Value::Int(7), Value::Int(1), Value::DateTime(open_ended())]],
        )
        .unwrap();
        let at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();

        let closing = closed(open, at).unwrap();
        assert_eq!(
            closing.columns(),
            &[HISTORY_ID.to_string(), VALID_TO.to_string()]
        );
        assert_eq!(closing.as_tuples(), &[vec![Value::Int(7), Value::DateTime(at)]]);
    }

    #[test]
    fn test_opened_rows_append_validity() {
        let rows = RowSet::new(vec!["id".to_string()], vec![vec![Value::Int(1)]]).unwrap();
        let at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_micro_opt(12, 0, 0, 5)
            .unwrap();
        let versions = opened(rows, at).unwrap();
        assert_eq!(
            versions.as_tuples(),
            &[vec![
                Value::Int(1),
                Value::DateTime(at),
                Value::DateTime(open_ended())
            ]]
        );
    }

    #[test]
    fn test_now_truncates_to_microseconds() {
        let precise = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_nano_opt(12, 0, 0, 123_456_789)
            .unwrap();
        assert_eq!(precise.trunc_subsecs(6).nanosecond(), 123_456_000);
    }

    #[test]
    fn test_validate() {
        assert!(HistoryConfig::default().validate().is_ok());
        let config = HistoryConfig {
            primary_key: Some(vec![]),
            ..HistoryConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
