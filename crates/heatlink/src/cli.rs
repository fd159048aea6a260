//! Clap derive structures for the `heatlink` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// heatlink -- read and write SVK LOM320 heat-pump registers
#[derive(Debug, Parser)]
#[command(
    name = "heatlink",
    version,
    about = "Read and write SVK heat-pump registers from the command line",
    long_about = "Talks to the LOM320 web module over HTTP Digest auth.\n\n\
        Reads are batched into chunked requests, retried on transient\n\
        failures, and mapped through the register catalog.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Device profile to use
    #[arg(long, short = 'p', env = "HEATLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Module host or URL (overrides profile)
    #[arg(long, short = 'H', env = "HEATLINK_HOST", global = true)]
    pub host: Option<String>,

    /// Digest username (overrides profile)
    #[arg(long, short = 'u', env = "HEATLINK_USERNAME", global = true)]
    pub username: Option<String>,

    /// Digest password
    #[arg(long, env = "HEATLINK_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "HEATLINK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "HEATLINK_INSECURE", global = true)]
    pub insecure: bool,

    /// Per-request timeout in seconds (overrides profile)
    #[arg(long, env = "HEATLINK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one `id=value` per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read register values
    #[command(alias = "r")]
    Read(ReadArgs),

    /// Write one register
    #[command(alias = "w")]
    Write(WriteArgs),

    /// Poll continuously and print updates
    Watch(WatchArgs),

    /// List the register catalog
    #[command(alias = "cat")]
    Catalog(CatalogArgs),

    /// Check that the module answers with valid credentials
    Check,

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Read / Write ─────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ReadArgs {
    /// Register ids or catalog keys; every catalogued register when empty
    pub entities: Vec<String>,
}

#[derive(Debug, Args)]
pub struct WriteArgs {
    /// Register id or catalog key
    pub entity: String,

    /// Value to write
    pub value: String,

    /// Enable writes for this invocation even if the profile disables them
    #[arg(long)]
    pub allow_write: bool,
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Poll interval (e.g. "30s", "2m"); defaults to the profile's
    #[arg(long, short = 'i')]
    pub interval: Option<humantime::Duration>,

    /// Stop after this many updates
    #[arg(long, short = 'n')]
    pub count: Option<u32>,
}

// ── Catalog ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CatalogArgs {
    /// Only show writable registers
    #[arg(long)]
    pub writable: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Show the effective configuration (passwords redacted)
    Show,

    /// Add or replace a profile
    SetProfile(SetProfileArgs),
}

#[derive(Debug, Args)]
pub struct SetProfileArgs {
    /// Profile name
    pub name: String,

    /// Module host or URL
    #[arg(long)]
    pub host: String,

    /// Use HTTPS when the host carries no scheme
    #[arg(long)]
    pub use_ssl: bool,

    #[arg(long)]
    pub username: Option<String>,

    /// Environment variable holding the password
    #[arg(long)]
    pub password_env: Option<String>,

    /// Enable writes for this profile
    #[arg(long)]
    pub write_access: bool,

    /// Make this the default profile
    #[arg(long)]
    pub default: bool,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_read_with_keys() {
        let cli = Cli::try_parse_from(["heatlink", "-H", "10.0.0.2", "read", "253", "room_temp"])
            .map_err(|e| e.to_string());
        let Ok(cli) = cli else {
            panic!("parse failed: {cli:?}");
        };
        let Command::Read(args) = cli.command else {
            panic!("expected read");
        };
        assert_eq!(args.entities, ["253", "room_temp"]);
        assert_eq!(cli.global.host.as_deref(), Some("10.0.0.2"));
    }
}
