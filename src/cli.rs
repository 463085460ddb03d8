use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::encoding::Script;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Crawl one or more works and write each as a text file.
    Crawl(CrawlArgs),
    /// Fetch, classify and dispatch a work without traversing it; prints JSON.
    Inspect(InspectArgs),
    /// Fetch one URL through the escalation ladder and print the decoded page.
    Fetch(FetchArgs),
    Adapter {
        #[command(subcommand)]
        command: AdapterCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum AdapterCommand {
    /// Compile an adapter file and print a summary.
    Check(AdapterCheckArgs),
}

/// Settings shared by every command that performs requests.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Crawl config (YAML). Defaults apply when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Physical request budget per URL.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Proxy URL for every tactic (http, https or socks5).
    #[arg(long)]
    pub proxy: Option<String>,
}

#[derive(Debug, Args)]
pub struct CrawlArgs {
    /// Source adapter (YAML).
    #[arg(long)]
    pub adapter: PathBuf,

    /// Work id; repeat for several works.
    #[arg(long = "id", required = true)]
    pub ids: Vec<String>,

    /// Output directory for the text files.
    #[arg(long)]
    pub out: PathBuf,

    /// Directory holding `history.jsonl` (defaults to `--out`).
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Maximum concurrent chapter fetches.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Delay between sequential requests (politeness).
    #[arg(long)]
    pub delay_ms: Option<u64>,

    #[command(flatten)]
    pub settings: ConfigArgs,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Source adapter (YAML).
    #[arg(long)]
    pub adapter: PathBuf,

    #[arg(long)]
    pub id: String,

    #[command(flatten)]
    pub settings: ConfigArgs,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// URL (must be http/https).
    #[arg(long)]
    pub url: String,

    /// Declared charset hint, used when the response declares none.
    #[arg(long)]
    pub encoding: Option<String>,

    /// Script expected in the decoded text.
    #[arg(long, value_enum, default_value_t = Script::Cjk)]
    pub script: Script,

    #[command(flatten)]
    pub settings: ConfigArgs,
}

#[derive(Debug, Args)]
pub struct AdapterCheckArgs {
    #[arg(long)]
    pub adapter: PathBuf,

    /// Also print the detail URL for this work id.
    #[arg(long)]
    pub id: Option<String>,
}
