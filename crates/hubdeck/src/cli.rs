//! Clap derive structures for the `hubdeck` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hubdeck -- live view of a Home Assistant hub from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "hubdeck",
    version,
    about = "Browse and control Home Assistant entities from the command line",
    long_about = "Mirrors the entities of a Home Assistant hub.\n\n\
        Uses the websocket API for live updates, with the REST API as a\n\
        fallback for loads, service calls and polling.",
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
    /// Hub profile to use
    #[arg(long, short = 'p', env = "HUBDECK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Hub URL (overrides profile)
    #[arg(long, short = 'u', env = "HUBDECK_URL", global = true)]
    pub url: Option<String>,

    /// Long-lived access token
    #[arg(long, env = "HUBDECK_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "HUBDECK_OUTPUT",
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
    #[arg(long, short = 'k', env = "HUBDECK_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "HUBDECK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Skip the websocket and use REST only
    #[arg(long, env = "HUBDECK_NO_WEBSOCKET", global = true)]
    pub no_websocket: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
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
    /// List entities
    #[command(alias = "ls")]
    States(StatesArgs),

    /// Show one entity in detail
    Get(GetArgs),

    /// Entity counts per domain
    Domains,

    /// Stream entity changes until interrupted
    Watch(WatchArgs),

    /// Call a hub service
    Call(CallArgs),

    /// Turn an entity on
    On(TargetArgs),

    /// Turn an entity off
    Off(TargetArgs),

    /// Toggle an entity
    Toggle(TargetArgs),

    /// Connection and store health
    Status(StatusArgs),

    /// Manage configuration profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Entity commands ──────────────────────────────────────────────────

/// Filters shared by `states` and `watch`.
#[derive(Debug, Args)]
pub struct FilterArgs {
    /// Only these domains (repeatable)
    #[arg(long, short = 'd')]
    pub domain: Vec<String>,

    /// Case-insensitive match on id or name
    #[arg(long, short = 's')]
    pub search: Option<String>,

    /// Include hidden and disabled entities
    #[arg(long, short = 'a')]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct StatesArgs {
    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Entity id, e.g. light.kitchen
    pub entity_id: String,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,
}

#[derive(Debug, Args)]
pub struct CallArgs {
    /// Service domain, e.g. light
    pub domain: String,

    /// Service name, e.g. turn_on
    pub service: String,

    /// Target entity
    #[arg(long, short = 'e')]
    pub entity: Option<String>,

    /// Extra service data as a JSON object
    #[arg(long)]
    pub data: Option<String>,
}

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Entity id, e.g. switch.fan
    pub entity_id: String,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Seconds to wait for the event stream before reporting
    #[arg(long, default_value = "5")]
    pub wait: u64,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Show the current config (tokens masked)
    Show,

    /// List profile names
    Profiles,

    /// Create or update a profile
    SetProfile(SetProfileArgs),

    /// Store a profile's token in the system keyring
    SetToken(SetTokenArgs),

    /// Set the default profile
    Use(UseArgs),
}

#[derive(Debug, Args)]
pub struct SetProfileArgs {
    /// Profile name
    pub name: String,

    /// Hub base URL
    #[arg(long)]
    pub hub_url: String,

    /// Environment variable holding the token
    #[arg(long)]
    pub token_env: Option<String>,

    /// Use REST polling only for this profile
    #[arg(long)]
    pub rest_only: bool,

    /// Poll interval in seconds
    #[arg(long)]
    pub poll_interval: Option<u64>,
}

#[derive(Debug, Args)]
pub struct SetTokenArgs {
    /// Profile name (defaults to the active profile)
    pub name: Option<String>,

    /// Token value; read from stdin when omitted
    #[arg(long)]
    pub value: Option<String>,
}

#[derive(Debug, Args)]
pub struct UseArgs {
    /// Profile name
    pub name: String,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
