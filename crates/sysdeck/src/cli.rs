use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "sysdeck",
    version,
    about = "Administer packages, services, firewall, boot, logs and users",
    after_help = "Examples:
  sysdeck probe
  sysdeck info
  sysdeck packages search htop
  sysdeck --password-stdin packages install htop < secret
  sysdeck firewall add allow --port 22 --protocol tcp
  sysdeck kernels remove-old --keep 2"
)]
pub struct Cli {
    /// Read the sudo password as one line from stdin
    #[arg(long, global = true)]
    pub password_stdin: bool,

    /// Log at debug level regardless of settings
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show which backend was detected for each domain
    Probe,
    /// Kernel, hardware, disk and firmware summary
    Info,
    #[command(subcommand)]
    Packages(PackageCmd),
    #[command(subcommand, alias = "repos")]
    Repositories(RepositoryCmd),
    #[command(subcommand)]
    Services(ServiceCmd),
    #[command(subcommand)]
    Firewall(FirewallCmd),
    #[command(subcommand)]
    Boot(BootCmd),
    #[command(subcommand)]
    Kernels(KernelCmd),
    #[command(subcommand)]
    Logs(LogCmd),
    #[command(subcommand)]
    Users(UserCmd),
    #[command(subcommand, alias = "ps")]
    Processes(ProcessCmd),
}

#[derive(Subcommand, Debug)]
pub enum PackageCmd {
    Search { query: String },
    /// List installed packages
    Installed,
    /// List packages with a newer version available
    Upgradable,
    Install { name: String },
    Remove { name: String },
    /// Upgrade everything
    UpgradeAll,
    /// Remove orphaned dependencies and the download cache
    Clean,
}

#[derive(Subcommand, Debug)]
pub enum RepositoryCmd {
    List,
    Add {
        /// Source line, URL or tap
        source: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove by id, name, URL or file stem
    Remove { key: String },
    Enable { key: String },
    Disable { key: String },
    Refresh,
}

#[derive(Subcommand, Debug)]
pub enum ServiceCmd {
    List,
    Status { name: String },
    /// start, stop, restart, enable, disable, mask or unmask
    Control { action: String, name: String },
    Enable { name: String },
    Disable { name: String },
}

#[derive(Args, Debug)]
pub struct RuleArgs {
    /// allow, deny, reject or limit
    pub action: String,
    /// in, out or fwd
    #[arg(long, default_value = "in")]
    pub direction: String,
    /// tcp, udp, icmp or any
    #[arg(long, default_value = "any")]
    pub protocol: String,
    #[arg(long)]
    pub port: Option<String>,
    #[arg(long)]
    pub source: Option<String>,
    #[arg(long)]
    pub destination: Option<String>,
    /// Application profile or service name
    #[arg(long)]
    pub service: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum FirewallCmd {
    Status,
    Rules,
    Add(RuleArgs),
    Remove(RuleArgs),
    Enable,
    Disable,
}

#[derive(Subcommand, Debug)]
pub enum BootCmd {
    /// Show the loader's entries, default and timeout
    Show,
    SetDefault { entry: String },
    SetTimeout { seconds: u32 },
    /// Regenerate the loader configuration
    Update,
}

#[derive(Subcommand, Debug)]
pub enum KernelCmd {
    List,
    /// Remove old kernels, keeping the newest `keep` besides the running one
    RemoveOld {
        #[arg(long)]
        keep: Option<usize>,
    },
    Remove { release: String },
}

#[derive(Subcommand, Debug)]
pub enum LogCmd {
    /// system, kernel, auth or package
    Show {
        kind: String,
        #[arg(long, short = 'n')]
        lines: Option<usize>,
    },
    Clear { kind: String },
}

#[derive(Subcommand, Debug)]
pub enum UserCmd {
    List {
        /// Include system accounts
        #[arg(long)]
        all: bool,
    },
    Groups,
    /// Create an account; its password is read as the next stdin line
    Create {
        username: String,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        home: Option<PathBuf>,
        #[arg(long)]
        shell: Option<String>,
        #[arg(long = "group")]
        groups: Vec<String>,
    },
    Modify {
        username: String,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        home: Option<PathBuf>,
        #[arg(long)]
        shell: Option<String>,
        #[arg(long = "add-group")]
        add_groups: Vec<String>,
    },
    Delete {
        username: String,
        #[arg(long)]
        remove_home: bool,
    },
    Lock { username: String },
    Unlock { username: String },
    /// Set a password read as the next stdin line
    Passwd { username: String },
}

#[derive(Subcommand, Debug)]
pub enum ProcessCmd {
    List {
        /// Only processes whose command or owner contains this text
        filter: Option<String>,
    },
    /// Send SIGTERM, or SIGKILL with --force
    Kill {
        pid: u32,
        #[arg(long)]
        force: bool,
    },
}
