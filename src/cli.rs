use crate::config::StorageBackend;
use crate::formatter::Provider;
use clap::{CommandFactory, Parser};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(name = "client-hub")]
#[command(version)]
#[command(about = "A console for MCP servers with presets, persistent history and AI-formatted output")]
pub struct Args {
    /// Path to a TOML config file
    #[arg(long, short)]
    pub config: Option<String>,

    /// Server address to connect to
    #[arg(long, short)]
    pub address: Option<String>,

    /// Connect to the server address immediately on startup
    #[arg(long)]
    pub connect: bool,

    /// Where presets and history are kept
    #[arg(long, value_enum)]
    pub storage: Option<StorageBackend>,

    /// Directory (file backend) or database file (sqlite backend)
    #[arg(long)]
    pub storage_path: Option<String>,

    /// LLM provider used to format server output
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Model name for the formatter (defaults per provider)
    #[arg(long)]
    pub model: Option<String>,

    /// Base URL of the formatter provider API
    #[arg(long)]
    pub base_url: Option<String>,

    /// Launch the browser console instead of the terminal console
    #[arg(long)]
    pub web: bool,

    /// Port for the browser console
    #[arg(long)]
    pub port: Option<u16>,

    /// Require this bearer token on API requests to the browser console
    #[arg(long)]
    pub token: Option<String>,

    /// Print shell completions and exit
    #[arg(long, value_enum)]
    pub completions: Option<Shell>,
}

/// Write completions for `shell` to stdout.
pub fn print_completions(shell: Shell) {
    let mut cmd = Args::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
}
