use super::{CacheArgs, DbArgs};
use crate::scan;
use clap::{Parser, Subcommand};
use kura_core::config::Config;
use kura_core::db::UpdateOutcome;

#[derive(Parser)]
pub struct Db {
    #[command(subcommand)]
    action: DbAction,

    #[command(flatten)]
    cache: CacheArgs,

    #[command(flatten)]
    db: DbArgs,
}

#[derive(Subcommand, Clone, Copy)]
enum DbAction {
    #[command(about = "Download the DB if it is missing or stale")]
    Update,

    #[command(about = "Show the installed DB")]
    Status,

    #[command(about = "Remove the local DB")]
    Reset,
}

impl Db {
    pub async fn run(&self, config: Config) -> anyhow::Result<()> {
        let cache_config = self.cache.merge(config.cache).init()?;
        let db_options = self.db.merge(config.db);
        db_options.init()?;
        let db = scan::open_db(&cache_config.cache_dir, &db_options)?;

        match self.action {
            DbAction::Update => {
                let outcome = db.update(&db_options).await?;
                println!(
                    "{}",
                    match outcome {
                        UpdateOutcome::Current => "Vulnerability DB is up to date",
                        UpdateOutcome::Downloaded => "Vulnerability DB downloaded",
                        UpdateOutcome::Refreshed => "Vulnerability DB unchanged upstream; metadata renewed",
                    }
                );
            }
            DbAction::Status => match db.metadata().await? {
                Some(metadata) => {
                    println!("Schema version: {}", metadata.schema_version);
                    println!("Digest:         {}", metadata.digest);
                    println!("Downloaded at:  {}", metadata.downloaded_at);
                    println!("Updated at:     {}", metadata.updated_at);
                    println!("Next update at: {}", metadata.next_update_at);
                }
                None => println!("No vulnerability DB installed"),
            },
            DbAction::Reset => {
                db.reset().await?;
                println!("Vulnerability DB removed");
            }
        }
        Ok(())
    }
}
