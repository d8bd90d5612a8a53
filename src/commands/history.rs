// ABOUTME: `table-sync history` - updates every configured bitemporal history table
// ABOUTME: Live and history tables share one database, picked per entry

use anyhow::{bail, Result};

use super::{fail_if_any, LoadedCache};
use crate::config::{FileConfig, HistoryDatabase, HistoryTableConfig};
use crate::connection::Connection;
use crate::sync::{HistoryResult, HistoryTracker};

#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    pub allow_self_signed_certs: bool,
    /// Only update the entry whose live table matches
    pub table: Option<String>,
}

pub async fn history(config: &FileConfig, options: &HistoryOptions) -> Result<Vec<HistoryResult>> {
    let entries: Vec<&HistoryTableConfig> = config
        .history
        .iter()
        .filter(|h| options.table.as_deref().map_or(true, |t| h.table == t))
        .collect();
    if entries.is_empty() {
        match &options.table {
            Some(table) => bail!("No [[history]] entry has table '{}'", table),
            None => bail!("Config defines no [[history]] entries"),
        }
    }

    let cache = LoadedCache::open(config).await?;
    let mut results = Vec::new();
    let mut errors = Vec::new();

    for database in [HistoryDatabase::Source, HistoryDatabase::Destination] {
        let group: Vec<&&HistoryTableConfig> =
            entries.iter().filter(|h| h.database == database).collect();
        if group.is_empty() {
            continue;
        }

        let url = match database {
            HistoryDatabase::Source => &config.source.url,
            HistoryDatabase::Destination => &config.destination.url,
        };
        let connection = Connection::open(url, options.allow_self_signed_certs).await?;
        let introspector = connection.introspector();

        for entry in group {
            let live = entry.live_table()?;
            let history_table = entry.history_table()?;
            let tracker = HistoryTracker::new(
                connection.endpoint(live.clone(), introspector.as_ref()),
                connection.endpoint(history_table.clone(), introspector.as_ref()),
                entry.to_history_config(),
                cache.as_ref().map(LoadedCache::cache),
            )?;

            match tracker.update().await {
                Ok(result) => {
                    println!(
                        "{} -> {}: {} added, {} deleted, {} updated",
                        live, history_table, result.added, result.deleted, result.updated
                    );
                    results.push(result);
                }
                Err(e) => {
                    tracing::error!("History update of {} failed: {}", live, e);
                    if let Err(rollback) = connection.executor().rollback().await {
                        tracing::warn!("Rollback of {} failed: {}", history_table, rollback);
                    }
                    errors.push(format!("{} -> {}: {}", live, history_table, e));
                }
            }
        }
    }

    if let Some(cache) = &cache {
        cache.save().await;
    }
    fail_if_any("history tables", entries.len(), errors)?;
    Ok(results)
}
