use super::{effective_ttl, CacheStore};
use crate::config::{RedisConfig, RedisTls};
use crate::error::{KuraError, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, ClientTlsConfig, RedisError, TlsCertificates};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

const DEFAULT_NAMESPACE: &str = "kura::artifact";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Cache entries on a Redis server, expiring through Redis' own TTLs.
///
/// The connection is established lazily and dropped after any connectivity
/// failure so the next call reconnects. Connectivity failures and timeouts
/// surface as [`KuraError::TransientStore`].
pub struct RedisStore {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    namespace: String,
    timeout: Duration,
}

impl RedisStore {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let url = config.connection_url();
        let client = match &config.tls {
            Some(tls) => Client::build_with_tls(url.as_str(), load_certificates(tls)?),
            None => Client::open(url.as_str()),
        }
        .map_err(|e| KuraError::config(format!("invalid redis backend {}: {}", config.url, e)))?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            namespace: DEFAULT_NAMESPACE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}::{}", self.namespace, key)
    }

    /// Shared connection, dialling a new one if none is cached.
    ///
    /// The slot lock is never held across the dial, so callers racing on an
    /// unreachable backend each stay within their own timeout.
    async fn connection(&self) -> Result<MultiplexedConnection> {
        if let Some(connection) = self.connection.lock().await.as_ref() {
            return Ok(connection.clone());
        }

        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(classify)?;

        Ok(self.connection.lock().await.get_or_insert(connection).clone())
    }

    /// Runs one command, connecting first if needed, under a single store
    /// timeout. The cached connection is dropped if the backend turned out
    /// to be unreachable.
    async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = std::result::Result<T, RedisError>>,
    {
        let attempt = async {
            let connection = self.connection().await?;
            op(connection).await.map_err(classify)
        };

        let result = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(KuraError::TransientStore {
                message: format!("redis operation timed out after {:?}", self.timeout),
            }),
        };

        if let Err(e) = &result {
            if e.is_transient() {
                self.connection.lock().await.take();
            }
        }
        result
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = self.namespaced(key);
        self.run(|mut conn| async move {
            let value: Option<Vec<u8>> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let key = self.namespaced(key);
        let ttl_ms = effective_ttl(ttl).map(|ttl| ttl.as_millis().max(1) as u64);

        self.run(|mut conn| async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(value);
            if let Some(ttl_ms) = ttl_ms {
                cmd.arg("PX").arg(ttl_ms);
            }
            let _: () = cmd.query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = self.namespaced(key);
        self.run(|mut conn| async move {
            let _: i64 = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.connection.lock().await.take();
        Ok(())
    }
}

fn load_certificates(tls: &RedisTls) -> Result<TlsCertificates> {
    let read = |path: &Path| std::fs::read(path).map_err(|e| KuraError::io(path, e));

    Ok(TlsCertificates {
        client_tls: Some(ClientTlsConfig {
            client_cert: read(&tls.cert)?,
            client_key: read(&tls.key)?,
        }),
        root_cert: Some(read(&tls.ca_cert)?),
    })
}

fn classify(err: RedisError) -> KuraError {
    if err.is_timeout()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_io_error()
    {
        KuraError::TransientStore {
            message: err.to_string(),
        }
    } else {
        KuraError::store(format!("redis: {}", err))
    }
}
