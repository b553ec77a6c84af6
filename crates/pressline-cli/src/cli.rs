use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "pressline-cache")]
#[command(about = "Inspect and evict entries of the Pressline tiered cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the TOML config (defaults to ./pressline.toml when present)
    #[arg(short, long, global = true, env = "PRESSLINE_CONFIG")]
    pub config: Option<String>,

    /// Log level (overrides logging.level from the config)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show what the remote tier holds for one entry
    Inspect(EntryArgs),
    /// Remove one entry from the cache
    Evict(EntryArgs),
    /// Remove every entry of a cache whose key matches a glob (e.g. "page:*")
    EvictPattern(PatternArgs),
    /// Show the effective configuration
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct EntryArgs {
    /// Cache name (e.g. article)
    pub cache: String,
    /// Entry key (e.g. 123)
    pub key: String,
}

#[derive(clap::Args)]
pub struct PatternArgs {
    /// Cache name (e.g. articles)
    pub cache: String,
    /// Glob over keys: *, ?, [abc], [!a]
    pub pattern: String,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the merged file + environment configuration
    Show,
}
