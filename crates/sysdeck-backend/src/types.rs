use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::credential::Credential;
use crate::kind::{BootLoaderKind, BootMode, FirewallBackendKind, OsFamily, PackageBackendKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    Installed,
    Available,
    Upgradable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub name: String,
    pub version: Option<String>,
    pub status: PackageStatus,
    pub backend: PackageBackendKind,
    pub arch: Option<String>,
    pub description: Option<String>,
}

impl Package {
    #[must_use]
    pub fn new(name: impl Into<String>, status: PackageStatus, backend: PackageBackendKind) -> Self {
        Self {
            name: name.into(),
            version: None,
            status,
            backend,
            arch: None,
            description: None,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        if !description.is_empty() {
            self.description = Some(description);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    /// Backend-native identifier: apt suite line, dnf/zypper repo id,
    /// pacman section, brew tap.
    pub id: String,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub backend: PackageBackendKind,
    /// Owning config file for file-backed repositories.
    pub file: Option<PathBuf>,
}

/// How a lookup key names a repository, closest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RepositoryMatch {
    Id,
    Name,
    Url,
    FileStem,
}

impl Repository {
    /// Match by identifier, display name, URL or owning file stem.
    #[must_use]
    pub fn match_key(&self, key: &str) -> Option<RepositoryMatch> {
        if self.id == key {
            Some(RepositoryMatch::Id)
        } else if self.name == key {
            Some(RepositoryMatch::Name)
        } else if self.url.trim_end_matches('/') == key.trim_end_matches('/') {
            Some(RepositoryMatch::Url)
        } else if self
            .file
            .as_ref()
            .and_then(|file| file.file_stem())
            .is_some_and(|stem| stem == key)
        {
            Some(RepositoryMatch::FileStem)
        } else {
            None
        }
    }

    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.match_key(key).is_some()
    }
}

/// The closest way `key` names any of `repos`. Lookups act only on the
/// repositories matched this way, so an exact id never drags in entries
/// that merely share a suite name or file.
pub fn closest_match<'a>(
    repos: impl IntoIterator<Item = &'a Repository>,
    key: &str,
) -> Option<RepositoryMatch> {
    repos.into_iter().filter_map(|repo| repo.match_key(key)).min()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ServiceUnit {
    pub name: String,
    pub load_state: String,
    pub active_state: String,
    pub sub_state: String,
    pub enabled: bool,
    pub description: String,
    pub main_pid: Option<u32>,
    pub memory_mb: u64,
    pub tasks: Option<u64>,
}

impl ServiceUnit {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active_state == "active"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
    Mask,
    Unmask,
}

impl ServiceAction {
    pub const ALL: [Self; 7] = [
        Self::Start,
        Self::Stop,
        Self::Restart,
        Self::Enable,
        Self::Disable,
        Self::Mask,
        Self::Unmask,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Mask => "mask",
            Self::Unmask => "unmask",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == name)
    }

    /// Boot-time flag this action leaves behind, if it changes it.
    #[must_use]
    pub const fn enabled_after(self) -> Option<bool> {
        match self {
            Self::Enable => Some(true),
            Self::Disable | Self::Mask => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FirewallAction {
    Allow,
    Deny,
    Reject,
    Limit,
}

impl FirewallAction {
    /// Lowercase verb as firewall tools spell it on the command line.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Reject => "reject",
            Self::Limit => "limit",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "allow" | "accept" | "pass" => Some(Self::Allow),
            "deny" | "drop" | "block" => Some(Self::Deny),
            "reject" => Some(Self::Reject),
            "limit" => Some(Self::Limit),
            _ => None,
        }
    }
}

impl fmt::Display for FirewallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("ALLOW"),
            Self::Deny => f.write_str("DENY"),
            Self::Reject => f.write_str("REJECT"),
            Self::Limit => f.write_str("LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    In,
    Out,
    Forward,
    Any,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
            Self::Forward => "forward",
            Self::Any => "any",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "in" => Some(Self::In),
            "out" => Some(Self::Out),
            "fwd" | "forward" => Some(Self::Forward),
            "any" => Some(Self::Any),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    #[default]
    Any,
}

impl Protocol {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
            Self::Any => "any",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "tcp" => Some(Self::Tcp),
            "udp" => Some(Self::Udp),
            "icmp" => Some(Self::Icmp),
            "any" | "all" | "" => Some(Self::Any),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule as requested by a caller. Also the match key for removal on
/// backends without rule identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub action: FirewallAction,
    pub direction: Direction,
    pub protocol: Protocol,
    pub port: Option<String>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub service: Option<String>,
}

impl RuleSpec {
    #[must_use]
    pub fn new(action: FirewallAction) -> Self {
        Self {
            action,
            direction: Direction::In,
            protocol: Protocol::Any,
            port: None,
            source: None,
            destination: None,
            service: None,
        }
    }

    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallRule {
    pub action: FirewallAction,
    pub direction: Direction,
    pub protocol: Protocol,
    pub port: Option<String>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub service: Option<String>,
    pub zone: Option<String>,
    pub ipv6: bool,
    pub backend: FirewallBackendKind,
    /// The line this rule was parsed from.
    pub raw: String,
}

impl FirewallRule {
    /// The `RuleSpec` that would recreate (or match-remove) this rule.
    #[must_use]
    pub fn to_spec(&self) -> RuleSpec {
        RuleSpec {
            action: self.action,
            direction: self.direction,
            protocol: self.protocol,
            port: self.port.clone(),
            source: self.source.clone(),
            destination: self.destination.clone(),
            service: self.service.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallStatus {
    pub backend: FirewallBackendKind,
    pub active: bool,
    pub default_zone: Option<String>,
    pub default_policy: Option<String>,
    pub rules: Vec<FirewallRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootEntry {
    /// Value the loader accepts as its default selector.
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootConfiguration {
    pub loader: BootLoaderKind,
    pub default_entry: Option<String>,
    pub timeout_secs: Option<u32>,
    pub entries: Vec<BootEntry>,
}

impl BootConfiguration {
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.title.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelBuild {
    pub version: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub is_current: bool,
    /// Owning package when the image name does not carry the release,
    /// as with Arch's `vmlinuz-linux`.
    pub package: Option<String>,
}

impl KernelBuild {
    #[must_use]
    pub fn size_mb(&self) -> u64 {
        self.size_bytes / 1024 / 1024
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    System,
    Kernel,
    Auth,
    Package,
}

impl LogKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Kernel => "kernel",
            Self::Auth => "auth",
            Self::Package => "package",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "system" => Some(Self::System),
            "kernel" => Some(Self::Kernel),
            "auth" => Some(Self::Auth),
            "package" => Some(Self::Package),
            _ => None,
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserAccount {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: PathBuf,
    pub shell: String,
}

impl UserAccount {
    /// Regular login accounts start at uid 1000 on Linux; `nobody` is
    /// 65534 and counts as a system account.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.uid < 1000 || self.uid == 65534
    }

    #[must_use]
    pub fn full_name(&self) -> &str {
        self.gecos.split(',').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Input for account creation. Owns the initial password so it is zeroed
/// when the request is dropped.
#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub password: Credential,
    pub full_name: Option<String>,
    pub home: Option<PathBuf>,
    pub shell: String,
    pub groups: Vec<String>,
}

impl NewUser {
    pub const DEFAULT_SHELL: &'static str = "/bin/bash";
    pub const MIN_PASSWORD_LEN: usize = 8;

    #[must_use]
    pub fn new(username: impl Into<String>, password: Credential) -> Self {
        Self {
            username: username.into(),
            password,
            full_name: None,
            home: None,
            shell: Self::DEFAULT_SHELL.to_string(),
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub full_name: Option<String>,
    pub shell: Option<String>,
    pub home: Option<PathBuf>,
    /// Supplementary groups to append.
    pub add_groups: Vec<String>,
}

impl UserChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.shell.is_none()
            && self.home.is_none()
            && self.add_groups.is_empty()
    }
}

/// Host summary. Sizes are MiB; `None` marks a value the host did not report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub os: OsFamily,
    pub distro: String,
    pub kernel: String,
    pub hostname: String,
    pub uptime_secs: Option<u64>,
    pub cpu_model: Option<String>,
    pub cpu_cores: usize,
    pub memory_total_mb: Option<u64>,
    pub memory_used_mb: Option<u64>,
    pub disk_total_mb: Option<u64>,
    pub disk_used_mb: Option<u64>,
    pub boot_mode: BootMode,
    pub secure_boot: Option<bool>,
}

impl SystemInfo {
    /// `3d 4h 12m`, dropping leading zero units.
    #[must_use]
    pub fn uptime_label(&self) -> Option<String> {
        let secs = self.uptime_secs?;
        let (days, hours, minutes) = (secs / 86_400, secs / 3_600 % 24, secs / 60 % 60);
        Some(match (days, hours) {
            (0, 0) => format!("{minutes}m"),
            (0, _) => format!("{hours}h {minutes}m"),
            _ => format!("{days}d {hours}h {minutes}m"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub user: String,
    pub cpu_percent: f32,
    pub mem_percent: f32,
    pub command: String,
}

/// Domain-level result of a mutating verb. Execution failures are
/// `AdminError`s instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpOutcome {
    pub success: bool,
    pub message: String,
}

impl OpOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Outcome of a toggle plus the record as re-read after it succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toggled<T> {
    pub outcome: OpOutcome,
    pub record: Option<T>,
}

impl<T> Toggled<T> {
    pub fn failed(outcome: OpOutcome) -> Self {
        Self {
            outcome,
            record: None,
        }
    }
}
