mod commands;
mod scan;
mod display;

use clap::Parser;
use anyhow::Result;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kura")]
#[command(about = "Vulnerability scanner with a shared analysis cache", long_about = None)]
struct Cli {
    #[arg(long, global = true, env = "KURA_DEBUG", help = "Enable debug logging")]
    debug: bool,

    #[arg(long, global = true, env = "KURA_CONFIG", help = "YAML configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
enum Commands {
    #[command(about = "Run the scan server")]
    Server(commands::Server),

    #[command(about = "Scan an artifact on a remote server")]
    Client(commands::Client),

    #[command(about = "Scan an artifact in-process")]
    Scan(commands::Scan),

    #[command(about = "Manage the local vulnerability database")]
    Db(commands::Db),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = commands::load_config(cli.config.as_deref())?;

    let exit_code = match cli.command {
        Commands::Server(cmd) => {
            cmd.run(config).await?;
            0
        }
        Commands::Client(cmd) => cmd.run(config).await?,
        Commands::Scan(cmd) => cmd.run(config).await?,
        Commands::Db(cmd) => {
            cmd.run(config).await?;
            0
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Logs go to stderr so rendered reports on stdout stay clean.
fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}
