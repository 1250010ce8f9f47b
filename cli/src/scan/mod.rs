use anyhow::Result;
use kura_core::cache::{open_store, FilesystemStore};
use kura_core::config::{CacheBackend, CacheConfig, DbOptions};
use kura_core::db::{DbSource, HttpDbSource, UpdateOutcome};
use kura_core::{CacheManager, CacheStore, PluginRegistry, Scanner, VulnDbCache};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "inventory")]
use kura_plugin_inventory::InventoryPlugin;

pub fn registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();

    #[cfg(feature = "inventory")]
    {
        registry.register_plugin(InventoryPlugin::new());
    }

    registry
}

/// Opens the configured cache backend. Filesystem stores with a TTL get a
/// background sweeper when `sweep_every` is set.
pub fn open_cache(config: &CacheConfig, sweep_every: Option<Duration>) -> Result<Arc<dyn CacheStore>> {
    match (&config.backend, sweep_every, config.ttl) {
        (CacheBackend::Filesystem { dir }, Some(period), Some(_)) => {
            let store = Arc::new(FilesystemStore::new(dir.clone())?);
            store.spawn_sweeper(period);
            Ok(store)
        }
        (backend, _, _) => Ok(open_store(backend)?),
    }
}

pub fn open_db(cache_dir: &Path, options: &DbOptions) -> Result<Arc<VulnDbCache>> {
    let source = match options.db_repository.as_deref() {
        Some(repository) => Some(Arc::new(HttpDbSource::new(repository)?) as Arc<dyn DbSource>),
        None => None,
    };
    let db = VulnDbCache::open(cache_dir, source)?.with_update_interval(options.interval()?);
    Ok(Arc::new(db))
}

/// Applies `--reset` and brings the DB up to date (or verifies that it may be skipped).
pub async fn prepare_db(db: &VulnDbCache, options: &DbOptions) -> Result<()> {
    if options.reset {
        tracing::info!("removing local vulnerability DB");
        db.reset().await?;
    }

    match db.update(options).await? {
        UpdateOutcome::Current => {}
        UpdateOutcome::Downloaded if !options.no_progress => {
            tracing::info!("vulnerability DB downloaded")
        }
        outcome => tracing::debug!(?outcome, "vulnerability DB checked"),
    }
    Ok(())
}

pub fn build_scanner(
    store: Arc<dyn CacheStore>,
    ttl: Option<Duration>,
    db: Arc<VulnDbCache>,
) -> Result<Scanner> {
    let registry = registry();
    Ok(Scanner::new(
        registry.analyzer(None)?,
        registry.matcher(None)?,
        CacheManager::new(store).with_ttl(ttl),
        db,
    ))
}
