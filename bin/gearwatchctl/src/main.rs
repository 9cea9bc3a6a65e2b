//! ---
//! gw_section: "05-networking-external-interfaces"
//! gw_subsection: "binary"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Control CLI for operators interacting with GearWatch."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use gw_common::{init_cli_tracing, AppConfig};

mod history;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "GearWatch operator control utility",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Validate a configuration file")]
    Validate {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
    },
    #[command(about = "Summarise stored gear values for a date range")]
    Stats(history::StatsArgs),
    #[command(about = "Download stored gear values as CSV")]
    Download(history::DownloadArgs),
}

fn validate(path: &Path) -> Result<()> {
    let config = AppConfig::from_path(path)?;
    println!("{}: ok", path.display());
    for (topic, topic_config) in &config.topics {
        println!(
            "  {topic} parser={:?} capacity={}{}",
            topic_config.parser,
            config.capacity_for(topic),
            if topic_config.retain_raw { " retain_raw" } else { "" }
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    init_cli_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { config } => validate(&config)?,
        Commands::Stats(args) => history::stats(args)?,
        Commands::Download(args) => history::download(args)?,
    }
    Ok(())
}
