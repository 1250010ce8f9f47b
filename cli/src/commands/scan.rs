use super::{read_artifact, CacheArgs, DbArgs, ReportArgs};
use crate::scan;
use clap::Parser;
use kura_core::cache::FilesystemStore;
use kura_core::config::{CacheBackend, Config};
use kura_core::ScanOptions;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Scan {
    #[arg(help = "Target name; also the artifact path unless --input is given")]
    target: String,

    #[arg(short, long, help = "Read the artifact from this file")]
    input: Option<PathBuf>,

    #[arg(long, help = "Remove cached analysis results before scanning")]
    clear_cache: bool,

    #[command(flatten)]
    cache: CacheArgs,

    #[command(flatten)]
    db: DbArgs,

    #[command(flatten)]
    report: ReportArgs,
}

impl Scan {
    pub async fn run(&self, config: Config) -> anyhow::Result<i32> {
        let cache_config = self.cache.merge(config.cache).init()?;
        let db_options = self.db.merge(config.db);
        db_options.init()?;
        let filters = self.report.filters()?;

        if self.clear_cache {
            match &cache_config.backend {
                CacheBackend::Filesystem { dir } => {
                    tracing::info!(dir = %dir.display(), "clearing scan cache");
                    FilesystemStore::new(dir.clone())?.clear().await?;
                }
                CacheBackend::Redis(_) => {
                    tracing::warn!("--clear-cache only applies to the filesystem backend")
                }
            }
        }

        let db = scan::open_db(&cache_config.cache_dir, &db_options)?;
        scan::prepare_db(&db, &db_options).await?;
        if db_options.download_db_only {
            return Ok(0);
        }

        let store = scan::open_cache(&cache_config, None)?;
        let scanner = scan::build_scanner(store.clone(), cache_config.ttl, db)?;

        let blob = read_artifact(&self.target, self.input.as_deref())?;
        let options = ScanOptions {
            list_all_packages: self.report.list_all_packages,
        };
        let outcome = scanner.scan_blob(&self.target, blob, &options).await?;
        for warning in &outcome.warnings {
            tracing::warn!("{}", warning);
        }
        store.close().await?;

        self.report.finish(&outcome.report, &filters)
    }
}
