// ABOUTME: Caller-controlled cache of introspected table schemas
// ABOUTME: Optional JSON persistence so repeated runs can skip introspection

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

use super::{TableRef, TableSchema};

const CACHE_VERSION: u32 = 1;

/// One cached schema and when it was captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSchema {
    pub schema: TableSchema,
    pub cached_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: HashMap<String, CachedSchema>,
}

/// Schema cache passed explicitly into the synchronizer and history tracker.
///
/// Nothing is cached implicitly: a run consults the cache only when one is
/// handed to it, and staleness is the caller's decision (`invalidate`,
/// `clear`, or simply not loading the file). Keys combine the introspector's
/// scope (a redacted connection identity) with the table name and any
/// primary-key / column overrides, so the same table name on two databases
/// never collides.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: Mutex<HashMap<String, CachedSchema>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the cache key for one introspection request.
    pub fn key(
        scope: &str,
        table: &TableRef,
        custom_primary_key: Option<&[String]>,
        include_columns: Option<&[String]>,
    ) -> String {
        let pk = custom_primary_key.map(|c| c.join(",")).unwrap_or_default();
        let cols = include_columns.map(|c| c.join(",")).unwrap_or_default();
        format!("{}|{}|pk={}|cols={}", scope, table, pk, cols)
    }

    pub fn get(&self, key: &str) -> Option<TableSchema> {
        self.lock().get(key).map(|entry| entry.schema.clone())
    }

    pub fn insert(&self, key: String, schema: TableSchema) {
        self.lock().insert(
            key,
            CachedSchema {
                schema,
                cached_at: chrono::Utc::now(),
            },
        );
    }

    /// Drop every entry for a table within a scope, whatever overrides it was
    /// cached under. Returns the number of entries removed.
    pub fn invalidate(&self, scope: &str, table: &TableRef) -> usize {
        let prefix = format!("{}|{}|", scope, table);
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&prefix));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Load a cache previously written with [`SchemaCache::save`].
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read schema cache from {:?}", path))?;
        let file: CacheFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse schema cache from {:?}", path))?;
        if file.version != CACHE_VERSION {
            anyhow::bail!(
                "Schema cache {:?} has version {}, expected {}",
                path,
                file.version,
                CACHE_VERSION
            );
        }
        Ok(Self {
            entries: Mutex::new(file.entries),
        })
    }

    /// Load the cache at `path`, or start empty if it is missing or unreadable.
    pub async fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }
        match Self::load(path).await {
            Ok(cache) => {
                tracing::info!("Loaded {} cached schemas from {:?}", cache.len(), path);
                cache
            }
            Err(e) => {
                tracing::warn!("{:#}. Starting with an empty schema cache.", e);
                Self::new()
            }
        }
    }

    /// Persist the cache as JSON, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let file = CacheFile {
            version: CACHE_VERSION,
            entries: self.lock().clone(),
        };
        let contents =
            serde_json::to_string_pretty(&file).context("Failed to serialize schema cache")?;
        fs::write(path, contents)
            .await
            .with_context(|| format!("Failed to write schema cache to {:?}", path))?;
        Ok(())
    }

    /// Default on-disk location, `~/.table-sync/schema-cache.json`.
    pub fn default_path() -> Result<PathBuf> {
        let home_dir =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home_dir.join(".table-sync").join("schema-cache.json"))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedSchema>> {
        // A poisoned lock only means another thread panicked mid-insert; the
        // map itself is still usable.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
