mod cli;
mod commands;
mod config;

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    config::AppConfig,
};
use anyhow::Result;
use clap::Parser;
use std::process;
use std::time::Duration;
use tracing::{Level, debug, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {:#}", e);
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let path = args.config;

    if let Commands::Config { show, reset } = args.command {
        if reset {
            AppConfig::reset(path.as_deref())?;
            println!("Configuration reset to defaults");
        } else if show {
            let config = AppConfig::load(path.as_deref())?;
            println!("{}", config.show()?);
        } else {
            println!("Use --show to display current configuration or --reset to reset to defaults");
        }
        return Ok(());
    }

    let mut config = AppConfig::load(path.as_deref())?;
    config.apply_overrides(args.origin, args.token, args.refresh_token);
    debug!(origin = %config.client.origin, "Configuration loaded");

    let channels = matches!(
        args.command,
        Commands::Listen { .. } | Commands::Ping { http_only: false, .. }
    );
    let executor = CommandExecutor::new(&config, channels).await?;

    let result = match args.command {
        Commands::Request {
            method,
            path,
            query,
            body,
            compact,
        } => {
            executor
                .request(&method, &path, query, body.as_deref(), compact)
                .await
        }
        Commands::Search { keywords, limit } => executor.search(keywords, limit).await,
        Commands::Library {
            limit,
            offset,
            kind,
            asc,
        } => executor.library(limit, offset, kind, asc).await,
        Commands::Release { id, service } => executor.release(id, service).await,
        Commands::Listen { namespace } => executor.listen(&namespace).await,
        Commands::Ping { timeout, .. } => executor.ping(Duration::from_secs(timeout)).await,
        Commands::Config { .. } => Ok(()),
    };

    // Keep tokens renewed during this run, even when the command itself failed.
    if !config.client.headless && config.update_session(executor.credentials()) {
        config.save(path.as_deref())?;
        info!("Stored renewed session");
    }

    result
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .init();
    Ok(())
}
