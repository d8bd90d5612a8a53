// ABOUTME: `table-sync sync` - runs the synchronizer for every configured table
// ABOUTME: One failing table is logged and rolled back; the rest still run

use anyhow::{bail, Result};
use serde::Serialize;

use super::{fail_if_any, LoadedCache};
use crate::config::{FileConfig, TableConfig};
use crate::connection::Connection;
use crate::sync::{SyncResult, Synchronizer};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub allow_self_signed_certs: bool,
    /// Only run the entry whose source table matches
    pub table: Option<String>,
    /// Detect changes without applying them
    pub dry_run: bool,
}

/// Outcome for one `[[tables]]` entry.
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub source: String,
    pub destination: String,
    #[serde(flatten)]
    pub result: SyncResult,
}

pub async fn sync(config: &FileConfig, options: &SyncOptions) -> Result<Vec<TableReport>> {
    let entries = selected_tables(config, options.table.as_deref())?;
    if options.dry_run {
        tracing::info!("Dry run: changes are detected but not applied");
    }

    let source = Connection::open(&config.source.url, options.allow_self_signed_certs).await?;
    let destination =
        Connection::open(&config.destination.url, options.allow_self_signed_certs).await?;
    let source_introspector = source.introspector();
    let destination_introspector = destination.introspector();
    let cache = LoadedCache::open(config).await?;

    let mut reports = Vec::new();
    let mut errors = Vec::new();
    for entry in &entries {
        let source_table = entry.source_table()?;
        let destination_table = entry.destination_table()?;

        let mut sync_config = entry.to_sync_config();
        if options.dry_run {
            sync_config.add = false;
            sync_config.update = false;
            sync_config.delete = false;
        }

        let synchronizer = Synchronizer::new(
            source.endpoint(source_table.clone(), source_introspector.as_ref()),
            destination.endpoint(destination_table.clone(), destination_introspector.as_ref()),
            sync_config,
            cache.as_ref().map(LoadedCache::cache),
        )?;

        match synchronizer.run().await {
            Ok(result) => {
                println!(
                    "{} -> {}: {} added, {} deleted, {} updated{}",
                    source_table,
                    destination_table,
                    result.added,
                    result.deleted,
                    result.updated,
                    if result.skipped { " (skipped, row counts match)" } else { "" }
                );
                reports.push(TableReport {
                    source: source_table.to_string(),
                    destination: destination_table.to_string(),
                    result,
                });
            }
            Err(e) => {
                if let Err(rollback) = destination.executor().rollback().await {
                    tracing::warn!("Rollback of {} failed: {}", destination_table, rollback);
                }
                errors.push(format!("{} -> {}: {}", source_table, destination_table, e));
            }
        }
    }

    if let Some(cache) = &cache {
        cache.save().await;
    }
    fail_if_any("tables", entries.len(), errors)?;
    Ok(reports)
}

fn selected_tables<'a>(config: &'a FileConfig, filter: Option<&str>) -> Result<Vec<&'a TableConfig>> {
    let Some(filter) = filter else {
        return Ok(config.tables.iter().collect());
    };
    let selected: Vec<&TableConfig> = config
        .tables
        .iter()
        .filter(|t| t.source == filter || t.source_table().map(|r| r.table == filter).unwrap_or(false))
        .collect();
    if selected.is_empty() {
        bail!("No [[tables]] entry has source '{}'", filter);
    }
    Ok(selected)
}
