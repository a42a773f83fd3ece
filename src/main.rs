use std::path::PathBuf;
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
    let cli = ncspan_grabber::cli::Cli::parse();

    let _logging = ncspan_grabber::logging::init(&ncspan_grabber::logging::LoggingConfig {
        debug: cli.grab.debug,
        log_file: cli.grab.log_file.as_deref().map(PathBuf::from),
    })
    .context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    ncspan_grabber::grab::run(cli.grab).await.context("grab")?;

    Ok(())
}
