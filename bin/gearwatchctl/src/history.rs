//! ---
//! gw_section: "05-networking-external-interfaces"
//! gw_subsection: "binary"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "History statistics and CSV export subcommands."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Args;
use gw_backend::{BackendClient, HistoryStats};
use tracing::info;

#[derive(Debug, Args)]
pub struct ApiArgs {
    #[arg(long, env = "GEARWATCH_API", default_value = "http://127.0.0.1:8000")]
    api: String,
    #[arg(long, default_value_t = 10, value_name = "SECONDS")]
    timeout: u64,
}

impl ApiArgs {
    fn client(&self) -> Result<BackendClient> {
        BackendClient::new(&self.api, Duration::from_secs(self.timeout))
            .with_context(|| format!("invalid api url {}", self.api))
    }
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    #[arg(long, value_name = "YYYY-MM-DD")]
    from: NaiveDate,
    #[arg(long, value_name = "YYYY-MM-DD")]
    to: NaiveDate,
    #[arg(long, help = "Print the summary as JSON")]
    json: bool,
    #[command(flatten)]
    api: ApiArgs,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    #[arg(long, value_name = "FILE")]
    output: PathBuf,
    #[command(flatten)]
    api: ApiArgs,
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

pub fn stats(args: StatsArgs) -> Result<()> {
    if args.from > args.to {
        bail!("--from {} is after --to {}", args.from, args.to);
    }
    let client = args.api.client()?;
    let entries = runtime()?
        .block_on(client.filter(args.from, args.to))
        .context("history query failed")?;
    let stats = HistoryStats::from_entries(&entries);
    info!(rows = entries.len(), parsed = stats.count, "history fetched");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "{} .. {}\nrows: {}\nreadings: {}\nmin: {:.2}\nmax: {:.2}\nmean: {:.2}",
            args.from,
            args.to,
            entries.len(),
            stats.count,
            stats.min,
            stats.max,
            stats.mean
        );
    }
    Ok(())
}

pub fn download(args: DownloadArgs) -> Result<()> {
    let client = args.api.client()?;
    let csv = runtime()?
        .block_on(client.download_csv())
        .context("download failed")?;
    std::fs::write(&args.output, csv.as_bytes())
        .with_context(|| format!("unable to write {}", args.output.display()))?;
    println!("wrote {} bytes to {}", csv.len(), args.output.display());
    Ok(())
}
