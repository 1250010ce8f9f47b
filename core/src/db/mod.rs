//! Local copy of the vulnerability database.
//!
//! The DB occupies a single slot in a [`FilesystemStore`] next to its
//! [`DbMetadata`]. Both are replaced with write-temp-then-rename, so scans
//! reading the DB while an update runs see either the old or the new copy.

mod metadata;
mod source;

pub use metadata::DbMetadata;
pub use source::{DbSource, HttpDbSource, PublishedDb};

use crate::cache::{CacheManager, FilesystemStore};
use crate::config::{DbOptions, DEFAULT_DB_UPDATE_INTERVAL};
use crate::error::{KuraError, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// DB layout this build understands.
pub const SCHEMA_VERSION: u32 = 2;

const DB_KEY: &str = "vulnerability-db";
const METADATA_KEY: &str = "vulnerability-db-metadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Local copy was fresh; nothing fetched.
    Current,
    /// A new DB was downloaded and installed.
    Downloaded,
    /// The published DB was unchanged; only the metadata was renewed.
    Refreshed,
}

pub struct VulnDbCache {
    store: Arc<FilesystemStore>,
    manager: CacheManager,
    source: Option<Arc<dyn DbSource>>,
    update_interval: Duration,
    update_lock: Mutex<()>,
}

impl VulnDbCache {
    /// Opens (creating if needed) the DB slot under `<cache_dir>/db`.
    pub fn open(cache_dir: &Path, source: Option<Arc<dyn DbSource>>) -> Result<Self> {
        let store = Arc::new(FilesystemStore::new(cache_dir.join("db"))?);
        Ok(Self {
            manager: CacheManager::new(store.clone()),
            store,
            source,
            update_interval: DEFAULT_DB_UPDATE_INTERVAL,
            update_lock: Mutex::new(()),
        })
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub async fn metadata(&self) -> Result<Option<DbMetadata>> {
        match self.manager.lookup(METADATA_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn has_payload(&self) -> bool {
        self.store.path_for(DB_KEY).exists()
    }

    /// Decides whether `update` has to contact the DB source.
    ///
    /// Fails when the caller asked to skip updates but there is no usable
    /// local DB to fall back on.
    pub async fn needs_update(&self, options: &DbOptions, now: DateTime<Utc>) -> Result<bool> {
        let metadata = self.metadata().await?;

        if options.skip_db_update {
            return match metadata {
                Some(m) if m.schema_version != SCHEMA_VERSION => Err(KuraError::config(format!(
                    "--skip-db-update cannot be specified with the old DB schema (local {}, expected {})",
                    m.schema_version, SCHEMA_VERSION
                ))),
                Some(_) if self.has_payload() => Ok(false),
                _ => Err(KuraError::config(
                    "--skip-db-update cannot be specified on the first run",
                )),
            };
        }

        Ok(match metadata {
            None => true,
            Some(_) if !self.has_payload() => true,
            Some(m) if m.schema_version != SCHEMA_VERSION => {
                tracing::info!(local = m.schema_version, expected = SCHEMA_VERSION, "DB schema changed");
                true
            }
            Some(m) => m.is_stale(now),
        })
    }

    /// Brings the local DB up to date if it is missing or stale.
    ///
    /// Concurrent calls serialize on an update lock and re-check freshness
    /// once they hold it, so only the first one downloads.
    pub async fn update(&self, options: &DbOptions) -> Result<UpdateOutcome> {
        let _guard = self.update_lock.lock().await;

        let downloaded_at = Utc::now();
        if !self.needs_update(options, downloaded_at).await? {
            tracing::debug!("vulnerability DB is up to date");
            return Ok(UpdateOutcome::Current);
        }

        let source = self.source.as_ref().ok_or_else(|| {
            KuraError::database("no DB repository configured; set --db-repository")
        })?;

        let published = source.fetch_metadata().await?;
        if published.schema_version != SCHEMA_VERSION {
            return Err(KuraError::database(format!(
                "published DB has schema version {}, this build supports {}",
                published.schema_version, SCHEMA_VERSION
            )));
        }

        if let Some(local) = self.metadata().await? {
            if local.digest == published.digest
                && local.schema_version == SCHEMA_VERSION
                && self.has_payload()
            {
                self.write_metadata(&published, local.downloaded_at.min(downloaded_at))
                    .await?;
                tracing::info!(digest = %published.digest, "vulnerability DB unchanged; metadata renewed");
                return Ok(UpdateOutcome::Refreshed);
            }
        }

        let payload = source.fetch(&published).await?;
        self.install(&payload, &published, downloaded_at).await?;
        tracing::info!(digest = %published.digest, size = payload.len(), "vulnerability DB updated");
        Ok(UpdateOutcome::Downloaded)
    }

    /// Verifies `payload` against `published` and atomically replaces the
    /// local DB and its metadata.
    pub async fn install(
        &self,
        payload: &[u8],
        published: &PublishedDb,
        downloaded_at: DateTime<Utc>,
    ) -> Result<DbMetadata> {
        if !published.digest.matches(payload) {
            return Err(KuraError::database(format!(
                "integrity check failed: expected {}, downloaded content does not match",
                published.digest
            )));
        }

        self.manager.put(DB_KEY, payload).await?;
        self.write_metadata(published, downloaded_at).await
    }

    async fn write_metadata(
        &self,
        published: &PublishedDb,
        downloaded_at: DateTime<Utc>,
    ) -> Result<DbMetadata> {
        let updated_at = Utc::now();
        let interval = chrono::Duration::from_std(self.update_interval)
            .map_err(|e| KuraError::config(format!("invalid DB update interval: {}", e)))?;
        let next_update_at = published
            .next_update_at
            .unwrap_or(updated_at + interval)
            .max(updated_at);

        let metadata = DbMetadata::new(
            published.schema_version,
            published.digest.clone(),
            downloaded_at.min(updated_at),
            updated_at,
            next_update_at,
        )?;
        self.manager
            .put(METADATA_KEY, &serde_json::to_vec(&metadata)?)
            .await?;
        Ok(metadata)
    }

    /// Current DB content.
    pub async fn read(&self) -> Result<Vec<u8>> {
        self.manager.lookup(DB_KEY).await?.ok_or_else(|| {
            KuraError::database("vulnerability DB not found; run once without --skip-db-update")
        })
    }

    /// Removes the DB and its metadata.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.update_lock.lock().await;
        self.store.clear().await
    }
}

/// Re-runs [`VulnDbCache::update`] every `period`, which must be non-zero
/// (see [`DbOptions::interval`]). Failures are logged and the previous DB
/// keeps serving.
pub fn spawn_updater(db: Arc<VulnDbCache>, options: DbOptions, period: Duration) -> JoinHandle<()> {
    let options = DbOptions {
        reset: false,
        ..options
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match db.update(&options).await {
                Ok(UpdateOutcome::Current) => tracing::debug!("scheduled DB check: up to date"),
                Ok(outcome) => tracing::info!(?outcome, "scheduled DB update finished"),
                Err(e) => tracing::warn!("scheduled DB update failed: {}", e),
            }
        }
    })
}
