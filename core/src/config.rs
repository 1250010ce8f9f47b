//! Operator configuration.
//!
//! Raw options come from CLI flags or a YAML file. Each group has an `init`
//! step that validates it and produces the typed configuration used by the
//! rest of the crate. All validation happens here, before any cache, network
//! or database I/O.

use crate::error::{KuraError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TOKEN_HEADER: &str = "Kura-Token";
pub const DEFAULT_LISTEN: &str = "localhost:4954";
pub const DEFAULT_DB_UPDATE_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

const REDIS_SCHEME: &str = "redis://";
const REDIS_TLS_SCHEME: &str = "rediss://";

/// Top-level file configuration, e.g. `kura.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub cache: CacheOptions,
    pub db: DbOptions,
    pub server: ServerOptions,
}

impl Config {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| KuraError::io(path, e))?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            KuraError::Config { message } => {
                KuraError::config(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            let message = match e.location() {
                Some(loc) => format!(
                    "invalid YAML at line {}, column {}: {}",
                    loc.line(),
                    loc.column(),
                    e
                ),
                None => format!("invalid YAML: {}", e),
            };
            KuraError::config(message)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RedisOptions {
    pub redis_ca: Option<PathBuf>,
    pub redis_cert: Option<PathBuf>,
    pub redis_key: Option<PathBuf>,
}

impl RedisOptions {
    fn is_empty(&self) -> bool {
        *self == RedisOptions::default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheOptions {
    /// `""`, `"fs"` or `"redis://..."`.
    pub backend: String,
    pub cache_dir: Option<PathBuf>,
    /// Human duration such as `90s`, `12h` or `7d`. Absent or zero means no expiry.
    pub ttl: Option<String>,
    #[serde(flatten)]
    pub redis: RedisOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisTls {
    pub ca_cert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
    pub tls: Option<RedisTls>,
}

impl RedisConfig {
    /// Connection URL; a TLS-configured backend is always dialled as `rediss://`.
    pub fn connection_url(&self) -> String {
        match (&self.tls, self.url.strip_prefix(REDIS_SCHEME)) {
            (Some(_), Some(rest)) => format!("{}{}", REDIS_TLS_SCHEME, rest),
            _ => self.url.clone(),
        }
    }
}

/// Storage backend, parsed once from the raw backend string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Filesystem { dir: PathBuf },
    Redis(RedisConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Directory for process-local state (the vulnerability DB) regardless of backend.
    pub cache_dir: PathBuf,
    pub ttl: Option<Duration>,
}

impl CacheOptions {
    pub fn init(&self) -> Result<CacheConfig> {
        // "redis://" or "fs" are accepted; empty means the default filesystem store
        let backend = self.backend.trim();
        if !backend.starts_with(REDIS_SCHEME) && backend != "fs" && !backend.is_empty() {
            return Err(KuraError::config(format!(
                "unsupported cache backend: {}",
                self.backend
            )));
        }

        let tls = if self.redis.is_empty() {
            None
        } else {
            match (
                &self.redis.redis_ca,
                &self.redis.redis_cert,
                &self.redis.redis_key,
            ) {
                (Some(ca), Some(cert), Some(key))
                    if !ca.as_os_str().is_empty()
                        && !cert.as_os_str().is_empty()
                        && !key.as_os_str().is_empty() =>
                {
                    Some(RedisTls {
                        ca_cert: ca.clone(),
                        cert: cert.clone(),
                        key: key.clone(),
                    })
                }
                _ => {
                    return Err(KuraError::config(
                        "you must provide CA, cert and key file path when using tls",
                    ))
                }
            }
        };

        let cache_dir = self.cache_dir.clone().unwrap_or_else(default_cache_dir);
        let ttl = match self.ttl.as_deref() {
            Some(raw) => Some(parse_duration(raw)?).filter(|d| !d.is_zero()),
            None => None,
        };

        let backend = if backend.starts_with(REDIS_SCHEME) {
            CacheBackend::Redis(RedisConfig {
                url: backend.to_string(),
                tls,
            })
        } else {
            CacheBackend::Filesystem {
                dir: cache_dir.join("fanal"),
            }
        };

        Ok(CacheConfig {
            backend,
            cache_dir,
            ttl,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DbOptions {
    pub reset: bool,
    pub download_db_only: bool,
    pub skip_db_update: bool,
    pub light: bool,
    pub no_progress: bool,
    pub db_repository: Option<String>,
    pub update_interval: Option<String>,
}

impl DbOptions {
    pub fn init(&self) -> Result<()> {
        if self.skip_db_update && self.download_db_only {
            return Err(KuraError::config(
                "--skip-db-update and --download-db-only options can not be specified both",
            ));
        }
        if self.light {
            tracing::warn!("'--light' option is deprecated and will be removed; it has no effect");
        }
        if let Some(repository) = &self.db_repository {
            if !repository.starts_with("http://") && !repository.starts_with("https://") {
                return Err(KuraError::config(format!(
                    "unsupported DB repository: {}",
                    repository
                )));
            }
        }
        self.interval()?;
        Ok(())
    }

    /// Period of the server's background DB check. Must be non-zero.
    pub fn interval(&self) -> Result<Duration> {
        let interval = match self.update_interval.as_deref() {
            Some(raw) => parse_duration(raw)?,
            None => DEFAULT_DB_UPDATE_INTERVAL,
        };
        if interval.is_zero() {
            return Err(KuraError::config("DB update interval must be greater than zero"));
        }
        Ok(interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerOptions {
    pub listen: String,
    pub token: Option<String>,
    pub token_header: String,
    pub request_timeout: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            token: None,
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            request_timeout: None,
        }
    }
}

/// Shared secret the server expects under `header`. Immutable once loaded.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    header: String,
    value: String,
}

impl AuthToken {
    pub fn new(header: &str, value: &str) -> Result<Self> {
        let header = header.trim();
        if header.is_empty()
            || !header
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(KuraError::config(format!("invalid token header: {:?}", header)));
        }
        Ok(Self {
            header: header.to_ascii_lowercase(),
            value: value.to_string(),
        })
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("header", &self.header)
            .field("value", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub token: Option<AuthToken>,
    pub request_timeout: Duration,
}

impl ServerOptions {
    pub fn init(&self) -> Result<ServerConfig> {
        if self.listen.trim().is_empty() {
            return Err(KuraError::config("listen address must not be empty"));
        }
        let token = match self.token.as_deref() {
            Some(value) if !value.is_empty() => Some(AuthToken::new(&self.token_header, value)?),
            _ => None,
        };
        let request_timeout = match self.request_timeout.as_deref() {
            Some(raw) => parse_duration(raw)?,
            None => Duration::from_secs(10 * 60),
        };
        Ok(ServerConfig {
            listen: self.listen.clone(),
            token,
            request_timeout,
        })
    }
}

/// Parses `500ms`, `30s`, `10m`, `24h`, `7d` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: u64 = number
        .parse()
        .map_err(|_| KuraError::config(format!("invalid duration: {:?}", raw)))?;

    let seconds = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| KuraError::config(format!("duration out of range: {:?}", raw)))
    };

    match unit {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => seconds(60),
        "h" => seconds(60 * 60),
        "d" => seconds(24 * 60 * 60),
        _ => Err(KuraError::config(format!("invalid duration: {:?}", raw))),
    }
}

/// `$KURA_CACHE_DIR`, else `$XDG_CACHE_HOME/kura`, else `~/.cache/kura`.
pub fn default_cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("KURA_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(dir).join("kura");
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".cache").join("kura"),
        Err(_) => PathBuf::from(".kura-cache"),
    }
}
