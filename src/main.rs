use anyhow::{anyhow, bail, Context};
use clap::Parser;
use postsignal::cli::{Cli, Commands, CursorCommands};
use postsignal::config::AppConfig;
use postsignal::coordination::{install_signal_handlers, ShutdownHandle};
use postsignal::domain::StatusId;
use postsignal::exchange::ExecutorKind;
use postsignal::persistence::build_cursor_store;
use tracing::{error, info, warn};

mod main_runtime;

use main_runtime::{build_pipeline, init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("failed to load configuration from {}", cli.config_dir))?;

    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => {
            init_logging(&config.logging);
            ensure_valid(&config, cli.dry_run)?;
            run_service(&config, cli.dry_run).await?;
        }
        Commands::Once => {
            init_logging(&config.logging);
            ensure_valid(&config, cli.dry_run)?;
            run_once(&config, cli.dry_run).await?;
        }
        Commands::Cursor { action } => {
            init_logging_simple();
            run_cursor_command(&config, action).await?;
        }
        Commands::CheckConfig => {
            init_logging_simple();
            ensure_valid(&config, cli.dry_run)?;
            println!(
                "configuration OK: account={} mode={} symbol={} cursor={:?}",
                config.source.account,
                if cli.dry_run { ExecutorKind::Paper } else { config.execution.mode },
                config.execution.symbol,
                config.cursor.backend
            );
        }
    }

    Ok(())
}

/// Validate the effective configuration; `--dry-run` never needs exchange credentials.
fn ensure_valid(config: &AppConfig, dry_run: bool) -> anyhow::Result<()> {
    let mut effective = config.clone();
    if dry_run {
        effective.execution.mode = ExecutorKind::Paper;
    }

    if let Err(errors) = effective.validate() {
        for e in &errors {
            error!("config: {}", e);
            eprintln!("config error: {}", e);
        }
        bail!("{} configuration error(s)", errors.len());
    }
    Ok(())
}

async fn run_service(config: &AppConfig, dry_run: bool) -> anyhow::Result<()> {
    let shutdown = ShutdownHandle::new();
    install_signal_handlers(shutdown.clone());

    if dry_run || !config.execution.mode.is_live() {
        warn!("paper execution: no real orders will be placed");
    }

    let pipeline = build_pipeline(config, dry_run, shutdown).await?;
    pipeline.run().await?;

    info!("shutdown complete");
    Ok(())
}

async fn run_once(config: &AppConfig, dry_run: bool) -> anyhow::Result<()> {
    let shutdown = ShutdownHandle::new();
    install_signal_handlers(shutdown.clone());

    let pipeline = build_pipeline(config, dry_run, shutdown).await?;
    let cursor = pipeline.bootstrap_cursor().await?;
    let report = pipeline.run_cycle(&cursor).await?;

    for outcome in &report.outcomes {
        println!("{}", outcome);
    }
    println!("{}", report.summary());
    Ok(())
}

async fn run_cursor_command(config: &AppConfig, action: &CursorCommands) -> anyhow::Result<()> {
    let account = config.source.account.as_str();
    let store = build_cursor_store(&config.cursor).await?;

    match action {
        CursorCommands::Show => match store.load(account).await? {
            Some(id) => println!("{}: {}", account, id),
            None => println!("{}: <no cursor stored>", account),
        },
        CursorCommands::Set { id } => {
            let id = StatusId::new(id.as_str()).ok_or_else(|| anyhow!("status id must not be blank"))?;
            if let Some(previous) = store.load(account).await? {
                if id < previous {
                    warn!(account, %previous, new = %id, "moving cursor backwards, older posts will be processed again");
                }
            }
            store.store(account, &id).await?;
            println!("{}: cursor set to {}", account, id);
        }
    }
    Ok(())
}
