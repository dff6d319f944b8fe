//! Domain managers for host administration.
//!
//! Each domain module offers a manager façade over one backend per tool:
//! - [`PackageManager`] and [`RepositoryManager`] (apt, dnf, zypper, pacman, brew).
//! - [`ServiceManager`] (systemd, launchd).
//! - [`FirewallManager`] (ufw, firewalld, pf).
//! - [`BootManager`] and [`KernelManager`] (GRUB, systemd-boot, rEFInd).
//! - [`LogManager`] (journald, plain files, unified log).
//! - [`UserManager`] (shadow-utils).
//! - [`SystemInfoManager`] and [`ProcessManager`] (`/proc`, sysctl, ps).
//!
//! All commands run through one [`ExecutionGateway`]; output parsers live
//! next to the backend that produces the output.

pub mod boot;
mod config_file;
pub mod firewall;
pub mod kernels;
pub mod logs;
pub mod packages;
pub mod processes;
pub mod repositories;
pub mod services;
pub mod system;
mod table;
pub mod users;
mod validate;

use sysdeck_exec::ExecutionGateway;
use sysdeck_platform::{Host, SystemCapabilities};

pub use boot::{BootLayout, BootManager};
pub use firewall::FirewallManager;
pub use kernels::{KernelManager, KernelPaths, plan_kernel_removal};
pub use logs::{LogFiles, LogManager};
pub use packages::PackageManager;
pub use processes::ProcessManager;
pub use repositories::{RepositoryManager, RepositoryPaths};
pub use services::ServiceManager;
pub use system::{SystemInfoManager, SystemInfoPaths};
pub use users::{UserManager, UserPaths};

/// Every file location the managers read or rewrite.
#[derive(Debug, Clone)]
pub struct HostPaths {
    pub repositories: RepositoryPaths,
    pub boot: BootLayout,
    pub kernels: KernelPaths,
    pub log_dir: std::path::PathBuf,
    pub users: UserPaths,
    pub system: SystemInfoPaths,
}

impl HostPaths {
    #[must_use]
    pub fn detect(host: &dyn Host) -> Self {
        Self {
            boot: BootLayout::detect(host),
            ..Self::default()
        }
    }
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            repositories: RepositoryPaths::default(),
            boot: BootLayout::default(),
            kernels: KernelPaths::default(),
            log_dir: std::path::PathBuf::from("/var/log"),
            users: UserPaths::default(),
            system: SystemInfoPaths::default(),
        }
    }
}

/// One manager per domain, wired to the detected backends.
/// Domains without a backend answer every call with an
/// `UnsupportedBackend` error.
pub struct Managers {
    pub packages: PackageManager,
    pub repositories: RepositoryManager,
    pub services: ServiceManager,
    pub firewall: FirewallManager,
    pub boot: BootManager,
    pub kernels: KernelManager,
    pub logs: LogManager,
    pub users: UserManager,
    pub system: SystemInfoManager,
    pub processes: ProcessManager,
}

impl Managers {
    #[must_use]
    pub fn new(caps: &SystemCapabilities, gateway: &ExecutionGateway, paths: &HostPaths) -> Self {
        let package_kind = caps.package_backend();
        let boot = || {
            BootManager::new(
                caps.boot_loader()
                    .map(|kind| boot::backend_for(kind, gateway.clone(), &paths.boot)),
            )
        };

        Self {
            packages: PackageManager::new(
                package_kind.map(|kind| packages::backend_for(kind, gateway.clone())),
            ),
            repositories: RepositoryManager::new(package_kind.map(|kind| {
                repositories::backend_for(kind, gateway.clone(), &paths.repositories)
            })),
            services: ServiceManager::new(
                caps.service_backend()
                    .map(|kind| services::backend_for(kind, gateway.clone())),
            ),
            firewall: FirewallManager::new(
                caps.firewall_backend()
                    .map(|kind| firewall::backend_for(kind, gateway.clone())),
            ),
            boot: boot(),
            kernels: KernelManager::new(
                gateway.clone(),
                package_kind,
                paths.kernels.clone(),
                boot(),
            ),
            logs: LogManager::new(caps.log_backend().map(|kind| {
                logs::backend_for(
                    kind,
                    gateway.clone(),
                    LogFiles::new(&paths.log_dir, package_kind),
                )
            })),
            users: UserManager::new(
                caps.user_backend()
                    .map(|kind| users::backend_for(kind, gateway.clone(), paths.users.clone())),
            ),
            system: SystemInfoManager::new(
                gateway.clone(),
                caps.os(),
                caps.distro(),
                paths.system.clone(),
            ),
            processes: ProcessManager::new(gateway.clone()),
        }
    }
}
