use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "postsignal")]
#[command(version)]
#[command(about = "Turns posts from a monitored social account into derivative orders", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and the per-environment overrides
    #[arg(short, long, default_value = "config", global = true)]
    pub config_dir: String,

    /// Place orders on the paper executor regardless of execution.mode
    #[arg(short, long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll continuously until interrupted (default)
    Run,
    /// Run a single poll cycle and exit
    Once,
    /// Inspect or override the persisted cursor
    Cursor {
        #[command(subcommand)]
        action: CursorCommands,
    },
    /// Load and validate configuration, then exit
    CheckConfig,
}

#[derive(Subcommand, Debug)]
pub enum CursorCommands {
    /// Print the stored last processed id
    Show,
    /// Overwrite the stored last processed id
    Set {
        /// Status id to resume after
        id: String,
    },
}
