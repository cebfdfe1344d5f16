use crate::objects::{ObjectKind, Operation};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "naasctl")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative configuration for the Graphiant NaaS portal", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,

    #[command(flatten)]
    pub portal: PortalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Portal connection, shared by every object command
#[derive(Args, Clone, Default)]
pub struct PortalArgs {
    /// Portal host
    #[arg(long, env = "GRAPHIANT_HOST", global = true)]
    pub host: Option<String>,

    /// Portal username
    #[arg(long, env = "GRAPHIANT_USERNAME", global = true)]
    pub username: Option<String>,

    /// Portal password
    #[arg(long, env = "GRAPHIANT_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Base directory for relative document paths
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Prefix sets, routing policies, SNMP, syslog, NTP, IPFIX and VPN profiles
    Global(RunArgs),

    /// LAN segments
    LanSegments(RunArgs),

    /// Site lists
    SiteLists(RunArgs),

    /// Sites and their global object attachments
    Sites(RunArgs),

    /// Device NTP objects
    Ntp(RunArgs),

    /// Device static routes
    StaticRoutes(RunArgs),

    /// Device interfaces and circuits
    Interfaces(RunArgs),

    /// Device LAG interfaces
    Lag(RunArgs),

    /// Device VRRP groups
    Vrrp(RunArgs),

    /// Device site-to-site VPNs
    SiteToSiteVpn(RunArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Inspect the settings file
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Command {
    /// Object type and arguments for object commands
    pub fn object(&self) -> Option<(ObjectKind, &RunArgs)> {
        let object = match self {
            Command::Global(args) => (ObjectKind::Global, args),
            Command::LanSegments(args) => (ObjectKind::LanSegments, args),
            Command::SiteLists(args) => (ObjectKind::SiteLists, args),
            Command::Sites(args) => (ObjectKind::Sites, args),
            Command::Ntp(args) => (ObjectKind::Ntp, args),
            Command::StaticRoutes(args) => (ObjectKind::StaticRoutes, args),
            Command::Interfaces(args) => (ObjectKind::Interfaces, args),
            Command::Lag(args) => (ObjectKind::Lag, args),
            Command::Vrrp(args) => (ObjectKind::Vrrp, args),
            Command::SiteToSiteVpn(args) => (ObjectKind::SiteToSiteVpn, args),
            Command::Completions { .. } | Command::Config(_) => return None,
        };
        Some(object)
    }
}

// ============================================================================
// Object Commands
// ============================================================================

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Operation to run
    #[arg(value_enum)]
    pub operation: Operation,

    /// Document listing the objects (YAML, JSON or TOML)
    #[arg(short, long)]
    pub file: PathBuf,

    /// Show what would change without pushing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Concurrent pushes (defaults to the settings file, then 4)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Print a diff of existing and intended attributes for each update
    #[arg(long)]
    pub diff: bool,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective settings
    Show,

    /// Print the settings file path
    Path,
}
