// ABOUTME: Command implementations behind the table-sync CLI
// ABOUTME: Exports sync, history and inspect plus the shared schema-cache handling

pub mod history;
pub mod inspect;
pub mod sync;

pub use history::history;
pub use inspect::inspect;
pub use sync::sync;

use anyhow::Result;
use std::path::PathBuf;

use crate::config::FileConfig;
use crate::schema::SchemaCache;

/// The schema cache named by the config, loaded from disk.
pub(crate) struct LoadedCache {
    path: PathBuf,
    cache: SchemaCache,
}

impl LoadedCache {
    pub(crate) async fn open(config: &FileConfig) -> Result<Option<Self>> {
        let Some(path) = config.cache_path()? else {
            return Ok(None);
        };
        let cache = SchemaCache::load_or_default(&path).await;
        Ok(Some(Self { path, cache }))
    }

    pub(crate) fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    pub(crate) async fn save(&self) {
        if let Err(e) = self.cache.save(&self.path).await {
            tracing::warn!("{:#}", e);
        }
    }
}

/// Turn per-table failures into one error once every table has been attempted.
pub(crate) fn fail_if_any(kind: &str, attempted: usize, errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    anyhow::bail!(
        "{} of {} {} failed:\n  {}",
        errors.len(),
        attempted,
        kind,
        errors.join("\n  ")
    )
}
