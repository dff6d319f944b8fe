use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;
use thiserror::Error;
use which::which;

use sysdeck_backend::{
    BootLoaderKind, FirewallBackendKind, LogBackendKind, OsFamily, PackageBackendKind,
    ServiceBackendKind, UserBackendKind,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("Unsupported operating system: {0}")]
    UnsupportedOs(String),
}

/// Read-only view of the machine used while probing.
pub trait Host {
    /// Value in the style of `std::env::consts::OS`.
    fn os_name(&self) -> &str;
    fn find_binary(&self, name: &str) -> Option<PathBuf>;
    fn path_exists(&self, path: &Path) -> bool;
    fn read_to_string(&self, path: &Path) -> Option<String>;
}

pub struct LocalHost;

impl Host for LocalHost {
    fn os_name(&self) -> &str {
        std::env::consts::OS
    }

    fn find_binary(&self, name: &str) -> Option<PathBuf> {
        which(name).ok()
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_to_string(&self, path: &Path) -> Option<String> {
        std::fs::read_to_string(path).ok()
    }
}

const OS_RELEASE: &str = "/etc/os-release";
const BREW_LOCATIONS: [&str; 2] = ["/opt/homebrew/bin/brew", "/usr/local/bin/brew"];
const GRUB_CONFIGS: [&str; 2] = ["/boot/grub/grub.cfg", "/boot/grub2/grub.cfg"];
const LOADER_CONFIGS: [&str; 2] = ["/boot/loader/loader.conf", "/boot/efi/loader/loader.conf"];
const REFIND_CONFIG: &str = "/boot/efi/EFI/refind/refind.conf";
const SYSLOG_FILES: [&str; 2] = ["/var/log/syslog", "/var/log/messages"];

/// What this host offers, resolved once at startup.
///
/// Values are never updated in place; probing again produces a new
/// descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemCapabilities {
    os: OsFamily,
    distro: String,
    package_backend: Option<PackageBackendKind>,
    firewall_backend: Option<FirewallBackendKind>,
    service_backend: Option<ServiceBackendKind>,
    boot_loader: Option<BootLoaderKind>,
    log_backend: Option<LogBackendKind>,
    user_backend: Option<UserBackendKind>,
}

impl SystemCapabilities {
    /// A descriptor with no backends, for composing test fixtures.
    #[must_use]
    pub fn new(os: OsFamily, distro: impl Into<String>) -> Self {
        Self {
            os,
            distro: distro.into(),
            package_backend: None,
            firewall_backend: None,
            service_backend: None,
            boot_loader: None,
            log_backend: None,
            user_backend: None,
        }
    }

    /// Probe the local machine.
    ///
    /// # Errors
    /// Returns [`ProbeError::UnsupportedOs`] when the OS family is neither
    /// Linux nor macOS. Missing backends are not errors.
    pub fn detect() -> Result<Self, ProbeError> {
        Self::detect_with(&LocalHost)
    }

    /// Probe through an arbitrary [`Host`].
    ///
    /// # Errors
    /// Same as [`SystemCapabilities::detect`].
    pub fn detect_with(host: &dyn Host) -> Result<Self, ProbeError> {
        let os = match host.os_name() {
            "linux" => OsFamily::Linux,
            "macos" => OsFamily::Darwin,
            other => return Err(ProbeError::UnsupportedOs(other.to_string())),
        };

        let capabilities = match os {
            OsFamily::Linux => Self {
                os,
                distro: read_distro_id(host),
                package_backend: probe_linux_packages(host),
                firewall_backend: probe_linux_firewall(host),
                service_backend: host
                    .find_binary("systemctl")
                    .map(|_| ServiceBackendKind::Systemd),
                boot_loader: probe_boot_loader(host),
                log_backend: probe_linux_logs(host),
                user_backend: host
                    .find_binary("useradd")
                    .map(|_| UserBackendKind::ShadowUtils),
            },
            OsFamily::Darwin => Self {
                os,
                distro: "macos".to_string(),
                package_backend: find_brew(host).map(|_| PackageBackendKind::Brew),
                firewall_backend: host.find_binary("pfctl").map(|_| FirewallBackendKind::Pf),
                service_backend: host
                    .find_binary("launchctl")
                    .map(|_| ServiceBackendKind::Launchd),
                boot_loader: None,
                log_backend: Some(LogBackendKind::UnifiedLog),
                user_backend: None,
            },
        };

        info!(
            "Detected {} ({}): packages={}, firewall={}, services={}, boot={}",
            capabilities.os,
            capabilities.distro,
            label(capabilities.package_backend),
            label(capabilities.firewall_backend),
            label(capabilities.service_backend),
            label(capabilities.boot_loader),
        );

        Ok(capabilities)
    }

    #[must_use]
    pub fn with_package_backend(mut self, kind: PackageBackendKind) -> Self {
        self.package_backend = Some(kind);
        self
    }

    #[must_use]
    pub fn with_firewall_backend(mut self, kind: FirewallBackendKind) -> Self {
        self.firewall_backend = Some(kind);
        self
    }

    #[must_use]
    pub fn with_service_backend(mut self, kind: ServiceBackendKind) -> Self {
        self.service_backend = Some(kind);
        self
    }

    #[must_use]
    pub fn with_boot_loader(mut self, kind: BootLoaderKind) -> Self {
        self.boot_loader = Some(kind);
        self
    }

    #[must_use]
    pub fn with_log_backend(mut self, kind: LogBackendKind) -> Self {
        self.log_backend = Some(kind);
        self
    }

    #[must_use]
    pub fn with_user_backend(mut self, kind: UserBackendKind) -> Self {
        self.user_backend = Some(kind);
        self
    }

    #[must_use]
    pub fn os(&self) -> OsFamily {
        self.os
    }

    #[must_use]
    pub fn distro(&self) -> &str {
        &self.distro
    }

    #[must_use]
    pub fn package_backend(&self) -> Option<PackageBackendKind> {
        self.package_backend
    }

    #[must_use]
    pub fn firewall_backend(&self) -> Option<FirewallBackendKind> {
        self.firewall_backend
    }

    #[must_use]
    pub fn service_backend(&self) -> Option<ServiceBackendKind> {
        self.service_backend
    }

    #[must_use]
    pub fn boot_loader(&self) -> Option<BootLoaderKind> {
        self.boot_loader
    }

    #[must_use]
    pub fn log_backend(&self) -> Option<LogBackendKind> {
        self.log_backend
    }

    #[must_use]
    pub fn user_backend(&self) -> Option<UserBackendKind> {
        self.user_backend
    }
}

fn label<T: std::fmt::Display>(kind: Option<T>) -> String {
    kind.map_or_else(|| "none".to_string(), |kind| kind.to_string())
}

fn read_distro_id(host: &dyn Host) -> String {
    host.read_to_string(Path::new(OS_RELEASE))
        .and_then(|contents| parse_os_release_id(&contents))
        .unwrap_or_else(|| "unknown".to_string())
}

pub(crate) fn parse_os_release_id(contents: &str) -> Option<String> {
    contents
        .lines()
        .find_map(|line| line.trim().strip_prefix("ID="))
        .map(|value| value.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        .filter(|id| !id.is_empty())
}

fn probe_linux_packages(host: &dyn Host) -> Option<PackageBackendKind> {
    PackageBackendKind::LINUX_PRIORITY
        .into_iter()
        .find(|kind| {
            let found = host.find_binary(kind.as_str()).is_some();
            debug!("Probing {kind}: {}", if found { "found" } else { "absent" });
            found
        })
}

fn find_brew(host: &dyn Host) -> Option<PathBuf> {
    BREW_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|path| host.path_exists(path))
        .or_else(|| host.find_binary("brew"))
}

fn probe_linux_firewall(host: &dyn Host) -> Option<FirewallBackendKind> {
    if host.find_binary("ufw").is_some() {
        Some(FirewallBackendKind::Ufw)
    } else if host.find_binary("firewall-cmd").is_some() {
        Some(FirewallBackendKind::Firewalld)
    } else {
        None
    }
}

fn probe_boot_loader(host: &dyn Host) -> Option<BootLoaderKind> {
    let any_exists = |paths: &[&str]| paths.iter().any(|path| host.path_exists(Path::new(path)));

    if any_exists(&GRUB_CONFIGS) {
        Some(BootLoaderKind::Grub)
    } else if any_exists(&LOADER_CONFIGS) {
        Some(BootLoaderKind::SystemdBoot)
    } else if host.path_exists(Path::new(REFIND_CONFIG)) {
        Some(BootLoaderKind::Refind)
    } else {
        None
    }
}

fn probe_linux_logs(host: &dyn Host) -> Option<LogBackendKind> {
    if host.find_binary("journalctl").is_some() {
        Some(LogBackendKind::Journald)
    } else if SYSLOG_FILES
        .iter()
        .any(|path| host.path_exists(Path::new(path)))
    {
        Some(LogBackendKind::SyslogFiles)
    } else {
        None
    }
}
