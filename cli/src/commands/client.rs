use super::{read_artifact, ReportArgs, TokenArgs};
use clap::Parser;
use kura_core::config::{parse_duration, Config};
use kura_core::{RemoteOptions, ScanClient, ScanOptions};
use std::path::PathBuf;

#[derive(Parser)]
pub struct Client {
    #[arg(help = "Target name; also the artifact path unless --input is given")]
    target: String,

    #[arg(long, env = "KURA_REMOTE", default_value = "http://localhost:4954", help = "Server address")]
    remote: String,

    #[arg(short, long, help = "Read the artifact from this file")]
    input: Option<PathBuf>,

    #[arg(long, env = "KURA_TIMEOUT", default_value = "10m", help = "Overall request timeout")]
    timeout: String,

    #[command(flatten)]
    token: TokenArgs,

    #[command(flatten)]
    report: ReportArgs,
}

impl Client {
    pub async fn run(&self, _config: Config) -> anyhow::Result<i32> {
        let filters = self.report.filters()?;
        let mut remote = RemoteOptions::new(&self.remote);
        remote.timeout = parse_duration(&self.timeout)?;
        remote.token = self.token.auth_token()?;
        let client = ScanClient::new(remote)?;

        let blob = read_artifact(&self.target, self.input.as_deref())?;
        let options = ScanOptions {
            list_all_packages: self.report.list_all_packages,
        };
        let response = client.scan(&self.target, blob, &options).await?;

        self.report.finish(&response.report, &filters)
    }
}
