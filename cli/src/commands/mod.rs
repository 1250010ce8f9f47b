mod client;
mod db;
mod scan;
mod server;

pub use client::Client;
pub use db::Db;
pub use scan::Scan;
pub use server::Server;

use crate::display::{self, Format, TemplateFuncs};
use anyhow::Context;
use clap::Args;
use kura_core::config::{AuthToken, CacheOptions, Config, DbOptions, DEFAULT_TOKEN_HEADER};
use kura_core::filter::{self, FilterOptions, DEFAULT_IGNOREFILE};
use kura_core::Report;
use std::path::{Path, PathBuf};

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(Config::from_yaml_file(path)?),
        None => Ok(Config::default()),
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct CacheArgs {
    #[arg(long, env = "KURA_CACHE_BACKEND", help = "Cache backend: fs or redis://host:port")]
    cache_backend: Option<String>,

    #[arg(long, env = "KURA_CACHE_DIR", help = "Directory for the DB and the filesystem cache")]
    cache_dir: Option<PathBuf>,

    #[arg(long, env = "KURA_CACHE_TTL", help = "Cache entry lifetime, e.g. 24h (0 = no expiry)")]
    cache_ttl: Option<String>,

    #[arg(long, env = "KURA_REDIS_CA", help = "CA certificate for the redis backend")]
    redis_ca: Option<PathBuf>,

    #[arg(long, env = "KURA_REDIS_CERT", help = "Client certificate for the redis backend")]
    redis_cert: Option<PathBuf>,

    #[arg(long, env = "KURA_REDIS_KEY", help = "Client key for the redis backend")]
    redis_key: Option<PathBuf>,
}

impl CacheArgs {
    /// Flags take precedence over the configuration file.
    pub fn merge(&self, mut options: CacheOptions) -> CacheOptions {
        if let Some(backend) = &self.cache_backend {
            options.backend = backend.clone();
        }
        if self.cache_dir.is_some() {
            options.cache_dir = self.cache_dir.clone();
        }
        if self.cache_ttl.is_some() {
            options.ttl = self.cache_ttl.clone();
        }
        if self.redis_ca.is_some() {
            options.redis.redis_ca = self.redis_ca.clone();
        }
        if self.redis_cert.is_some() {
            options.redis.redis_cert = self.redis_cert.clone();
        }
        if self.redis_key.is_some() {
            options.redis.redis_key = self.redis_key.clone();
        }
        options
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct DbArgs {
    #[arg(long, help = "Remove the local DB before starting")]
    reset: bool,

    #[arg(long, help = "Download the DB and exit")]
    download_db_only: bool,

    #[arg(long, alias = "skip-update", env = "KURA_SKIP_DB_UPDATE", help = "Use the local DB as is")]
    skip_db_update: bool,

    #[arg(long, hide = true)]
    light: bool,

    #[arg(long, help = "Suppress progress output")]
    no_progress: bool,

    #[arg(long, env = "KURA_DB_REPOSITORY", help = "Base URL the DB is published under")]
    db_repository: Option<String>,

    #[arg(long, env = "KURA_DB_UPDATE_INTERVAL", help = "How long a downloaded DB stays fresh")]
    db_update_interval: Option<String>,
}

impl DbArgs {
    pub fn merge(&self, mut options: DbOptions) -> DbOptions {
        options.reset |= self.reset;
        options.download_db_only |= self.download_db_only;
        options.skip_db_update |= self.skip_db_update;
        options.light |= self.light;
        options.no_progress |= self.no_progress;
        if self.db_repository.is_some() {
            options.db_repository = self.db_repository.clone();
        }
        if self.db_update_interval.is_some() {
            options.update_interval = self.db_update_interval.clone();
        }
        options
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct TokenArgs {
    #[arg(long, env = "KURA_TOKEN", help = "Shared secret for client/server authentication")]
    token: Option<String>,

    #[arg(long, env = "KURA_TOKEN_HEADER", help = "Header carrying the token [default: Kura-Token]")]
    token_header: Option<String>,
}

impl TokenArgs {
    pub fn auth_token(&self) -> anyhow::Result<Option<AuthToken>> {
        let header = self.token_header.as_deref().unwrap_or(DEFAULT_TOKEN_HEADER);
        match self.token.as_deref() {
            Some(value) if !value.is_empty() => Ok(Some(AuthToken::new(header, value)?)),
            _ => Ok(None),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    #[arg(short, long, value_enum, default_value_t = Format::Table, help = "Output format")]
    format: Format,

    #[arg(short, long, help = "Template string, or @file to read it from a file")]
    template: Option<String>,

    #[arg(short, long, env = "KURA_SEVERITY", help = "Comma separated severities to report")]
    severity: Option<String>,

    #[arg(long, env = "KURA_IGNORE_UNFIXED", help = "Only report vulnerabilities with a fix")]
    ignore_unfixed: bool,

    #[arg(long, env = "KURA_IGNOREFILE", help = "File of vulnerability IDs to ignore [default: .kuraignore]")]
    ignorefile: Option<PathBuf>,

    #[arg(short, long, help = "Write the report to a file instead of stdout")]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = 0, help = "Exit code when vulnerabilities are reported")]
    exit_code: i32,

    #[arg(long = "list-all-pkgs", help = "Include every package in the report")]
    pub list_all_packages: bool,
}

impl ReportArgs {
    /// Checks filter and template flags before any network or cache work.
    pub fn filters(&self) -> anyhow::Result<FilterOptions> {
        let severities = match self.severity.as_deref() {
            Some(raw) => filter::parse_severities(raw)?,
            None => Vec::new(),
        };
        let ignored_ids = match &self.ignorefile {
            Some(path) => filter::load_ignore_file(path, true)?,
            None => filter::load_ignore_file(Path::new(DEFAULT_IGNOREFILE), false)?,
        };

        Ok(FilterOptions {
            severities,
            ignored_ids,
            ignore_unfixed: self.ignore_unfixed,
        })
    }

    fn template(&self) -> anyhow::Result<Option<String>> {
        match self.template.as_deref() {
            Some(raw) => match raw.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)
                    .map(Some)
                    .with_context(|| format!("failed to read template {}", path)),
                None => Ok(Some(raw.to_string())),
            },
            None if self.format == Format::Template => {
                anyhow::bail!("--format template requires --template")
            }
            None => Ok(None),
        }
    }

    /// Filters, renders and writes `report`; returns the process exit code.
    pub fn finish(&self, report: &Report, filters: &FilterOptions) -> anyhow::Result<i32> {
        let filtered = filters.apply(report);
        let template = self.template()?;
        let rendered = display::render(
            &filtered,
            self.format,
            template.as_deref(),
            &TemplateFuncs::builtin(),
        )?;

        match &self.output {
            Some(path) => std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?,
            None => print!("{}", rendered),
        }

        if self.exit_code != 0 && !filtered.vulnerabilities.is_empty() {
            return Ok(self.exit_code);
        }
        Ok(0)
    }
}

/// Artifact bytes from `--input`, else from the target path itself.
pub fn read_artifact(target: &str, input: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    let path = input.unwrap_or_else(|| Path::new(target));
    std::fs::read(path).with_context(|| format!("failed to read artifact {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_flags_override_file() {
        let file = CacheOptions {
            backend: "fs".to_string(),
            ttl: Some("1h".to_string()),
            ..Default::default()
        };
        let args = CacheArgs {
            cache_backend: Some("redis://cache:6379".to_string()),
            ..Default::default()
        };

        let merged = args.merge(file);
        assert_eq!(merged.backend, "redis://cache:6379");
        assert_eq!(merged.ttl.as_deref(), Some("1h"));
    }

    #[test]
    fn test_db_flags_are_additive() {
        let file = DbOptions {
            skip_db_update: true,
            ..Default::default()
        };
        let args = DbArgs {
            download_db_only: true,
            ..Default::default()
        };

        let merged = args.merge(file);
        assert!(merged.skip_db_update && merged.download_db_only);
        assert!(merged.init().is_err());
    }

    #[test]
    fn test_token_header_default() {
        let args = TokenArgs {
            token: Some("secret".to_string()),
            token_header: None,
        };
        let token = args.auth_token().unwrap().unwrap();
        assert_eq!(token.header(), "kura-token");

        assert!(TokenArgs::default().auth_token().unwrap().is_none());
    }

    #[test]
    fn test_read_artifact_prefers_input() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("inventory.json");
        std::fs::write(&input, b"{}").unwrap();

        assert_eq!(read_artifact("image:latest", Some(&input)).unwrap(), b"{}");
        assert!(read_artifact("image:latest", None).is_err());
    }
}
