mod cli;
mod commands;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use pressline_cache::config::loader;
use pressline_cache::observability::{apply_logging_level, init_tracing};
use pressline_cache::{Settings, TieredCache, build_cache};

use cli::{Cli, Commands, ConfigCommands};
use output::{print_error, print_warning};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    init_tracing(cli.log_level.as_deref().unwrap_or("warn"));
    let settings = loader::load_settings(cli.config.as_deref()).context("loading config")?;
    if cli.log_level.is_none() {
        apply_logging_level(&settings.logging.level);
    }

    match &cli.command {
        Commands::Config(args) => match &args.command {
            ConfigCommands::Show => {
                commands::config::show(&settings, cli.config.as_deref(), format)?;
            }
        },
        Commands::Inspect(args) => {
            let cache = connect(&settings).await;
            commands::entries::inspect(&cache, &args.cache, &args.key, format).await?;
        }
        Commands::Evict(args) => {
            let cache = connect(&settings).await;
            commands::entries::evict(&cache, &args.cache, &args.key).await?;
        }
        Commands::EvictPattern(args) => {
            let cache = connect(&settings).await;
            commands::entries::evict_pattern(&cache, &args.cache, &args.pattern, format).await?;
        }
    }

    Ok(())
}

async fn connect(settings: &Settings) -> TieredCache {
    let cache = build_cache(settings).await;
    if cache.stats().remote_mode != "redis" {
        print_warning("Redis disabled or unreachable, operating on an empty in-process cache");
    }
    cache
}
