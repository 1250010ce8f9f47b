use super::{CacheArgs, DbArgs, TokenArgs};
use crate::scan;
use clap::Parser;
use kura_core::config::Config;
use kura_core::{db, AuthGuard, ScanServer};
use std::time::Duration;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Parser)]
pub struct Server {
    #[arg(long, env = "KURA_LISTEN", help = "Address to listen on [default: localhost:4954]")]
    listen: Option<String>,

    #[arg(long, env = "KURA_REQUEST_TIMEOUT", help = "Per-request deadline, e.g. 10m")]
    request_timeout: Option<String>,

    #[command(flatten)]
    cache: CacheArgs,

    #[command(flatten)]
    db: DbArgs,

    #[command(flatten)]
    token: TokenArgs,
}

impl Server {
    pub async fn run(&self, config: Config) -> anyhow::Result<()> {
        // All validation happens before the first cache or network access.
        let cache_config = self.cache.merge(config.cache).init()?;
        let db_options = self.db.merge(config.db);
        db_options.init()?;
        let mut server_options = config.server;
        if let Some(listen) = &self.listen {
            server_options.listen = listen.clone();
        }
        if self.request_timeout.is_some() {
            server_options.request_timeout = self.request_timeout.clone();
        }
        let server_config = server_options.init()?;
        let token = match self.token.auth_token()? {
            Some(token) => Some(token),
            None => server_config.token.clone(),
        };

        let db = scan::open_db(&cache_config.cache_dir, &db_options)?;
        scan::prepare_db(&db, &db_options).await?;
        if db_options.download_db_only {
            return Ok(());
        }
        let updater = if db_options.skip_db_update {
            None
        } else {
            Some(db::spawn_updater(
                db.clone(),
                db_options.clone(),
                db_options.interval()?,
            ))
        };

        let store = scan::open_cache(&cache_config, Some(SWEEP_INTERVAL))?;
        tracing::info!(backend = store.name(), "cache backend ready");
        let scanner = scan::build_scanner(store.clone(), cache_config.ttl, db)?;

        let listener = ScanServer::bind(&server_config.listen).await?;
        ScanServer::new(scanner, AuthGuard::new(token.as_ref()))
            .with_request_timeout(server_config.request_timeout)
            .serve(listener, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("failed to listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
                tracing::info!("shutting down");
            })
            .await?;

        if let Some(updater) = updater {
            updater.abort();
        }
        store.close().await?;
        Ok(())
    }
}
