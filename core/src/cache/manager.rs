use super::{effective_ttl, CacheStore};
use crate::error::{KuraError, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

/// Maps a key to the channel its in-flight population reports on.
type InFlight = Arc<Mutex<HashMap<String, broadcast::Sender<Result<Resolution>>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Hit,
    Populated,
}

/// Outcome of a cache resolution.
///
/// `store_error` is set when a freshly computed value could not be written
/// back; the value is still valid, it just was not cached.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub value: Arc<Vec<u8>>,
    pub origin: Origin,
    pub store_error: Option<KuraError>,
}

impl Resolution {
    pub fn hit(value: Vec<u8>) -> Self {
        Self {
            value: Arc::new(value),
            origin: Origin::Hit,
            store_error: None,
        }
    }
}

/// Store wrapper with TTL defaults and per-key single-flight population.
///
/// Reads are fail-open: a backend connectivity failure is logged and treated
/// as a miss. Writes are fail-closed: failures are returned to the caller.
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    ttl: Option<Duration>,
    in_flight: InFlight,
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            ttl: None,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = effective_ttl(ttl);
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Cached value for `key`, degrading transient backend failures to a miss.
    pub async fn lookup(&self, key: &str) -> Result<Option<Vec<u8>>> {
        lookup(self.store.as_ref(), key).await
    }

    pub async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.store.set(key, value, self.ttl).await
    }

    pub async fn invalidate(&self, key: &str) -> Result<()> {
        self.store.delete(key).await
    }

    /// Returns the cached value for `key`, or runs `populate` to produce it.
    ///
    /// Concurrent callers for the same key share one run of `populate` and
    /// all receive its value or its error. Errors are never cached. The
    /// population runs on its own task, so it completes and is stored even if
    /// every caller goes away.
    pub async fn get_or_populate<F, Fut>(&self, key: &str, populate: F) -> Result<Resolution>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        if let Some(value) = self.lookup(key).await? {
            tracing::debug!(key, "cache hit");
            return Ok(Resolution::hit(value));
        }

        let (mut rx, flight) = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.entry(key.to_string()) {
                Entry::Occupied(entry) => (entry.get().subscribe(), None),
                Entry::Vacant(entry) => {
                    let (tx, rx) = broadcast::channel(1);
                    entry.insert(tx.clone());
                    let flight = Flight {
                        key: key.to_string(),
                        tx,
                        in_flight: self.in_flight.clone(),
                    };
                    (rx, Some(flight))
                }
            }
        };

        match flight {
            Some(flight) => {
                let store = self.store.clone();
                let ttl = self.ttl;
                tokio::spawn(async move {
                    let result = populate_once(store.as_ref(), &flight.key, ttl, populate).await;
                    flight.finish(result);
                });
            }
            None => tracing::debug!(key, "joining in-flight population"),
        }

        match rx.recv().await {
            Ok(result) => result,
            Err(e) => Err(KuraError::store(format!(
                "population of {} was abandoned: {}",
                key, e
            ))),
        }
    }
}

async fn lookup(store: &dyn CacheStore, key: &str) -> Result<Option<Vec<u8>>> {
    match store.get(key).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_transient() => {
            tracing::warn!(key, backend = store.name(), "cache read failed, recomputing: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn populate_once<F, Fut>(
    store: &dyn CacheStore,
    key: &str,
    ttl: Option<Duration>,
    populate: F,
) -> Result<Resolution>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<u8>>>,
{
    // A previous leader may have finished between our miss and registration.
    if let Some(value) = lookup(store, key).await? {
        return Ok(Resolution::hit(value));
    }

    tracing::debug!(key, "cache miss, populating");
    let value = populate().await?;

    let store_error = match store.set(key, &value, ttl).await {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(key, backend = store.name(), "failed to cache computed value: {}", e);
            Some(e)
        }
    };

    Ok(Resolution {
        value: Arc::new(value),
        origin: Origin::Populated,
        store_error,
    })
}

/// Registration of one in-flight population. Dropping it without `finish`
/// (a panicking populate) still retires the key and closes the channel, so
/// waiters are released with an error.
struct Flight {
    key: String,
    tx: broadcast::Sender<Result<Resolution>>,
    in_flight: InFlight,
}

impl Flight {
    fn finish(self, result: Result<Resolution>) {
        self.retire();
        // No receivers left is fine: the value is already stored.
        let _ = self.tx.send(result);
    }

    /// Removes this flight's registration, leaving a newer flight for the
    /// same key untouched.
    fn retire(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .get(&self.key)
            .is_some_and(|tx| tx.same_channel(&self.tx))
        {
            in_flight.remove(&self.key);
        }
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        self.retire();
    }
}
