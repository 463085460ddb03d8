use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    bookfetch::logging::init().context("init logging")?;

    let cli = bookfetch::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        bookfetch::cli::Command::Crawl(args) => {
            bookfetch::crawl::run(args).await.context("crawl")?;
        }
        bookfetch::cli::Command::Inspect(args) => {
            bookfetch::crawl::inspect(args).await.context("inspect")?;
        }
        bookfetch::cli::Command::Fetch(args) => {
            bookfetch::fetch::run(args).await.context("fetch")?;
        }
        bookfetch::cli::Command::Adapter {
            command: bookfetch::cli::AdapterCommand::Check(args),
        } => {
            bookfetch::adapter::check(args).context("adapter check")?;
        }
    }

    Ok(())
}
