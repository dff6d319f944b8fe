use serde::{Deserialize, Serialize};

/// Declares a closed set of named variants with `as_str`, `from_name`,
/// `ALL` and `Display`.
macro_rules! named_kind {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            #[must_use]
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

named_kind! {
    /// Area of administration. Also the unit of mutation locking.
    pub enum Domain {
        Packages => "packages",
        Repositories => "repositories",
        Services => "services",
        Firewall => "firewall",
        Boot => "boot",
        Kernels => "kernels",
        Logs => "logs",
        Users => "users",
        Processes => "processes",
    }
}

named_kind! {
    /// Firmware interface the host booted through.
    pub enum BootMode {
        Uefi => "uefi",
        Bios => "bios",
        Unknown => "unknown",
    }
}

named_kind! {
    pub enum ProcessSignal {
        Terminate => "term",
        Kill => "kill",
    }
}

named_kind! {
    pub enum OsFamily {
        Linux => "linux",
        Darwin => "darwin",
    }
}

named_kind! {
    pub enum PackageBackendKind {
        Apt => "apt",
        Dnf => "dnf",
        Zypper => "zypper",
        Pacman => "pacman",
        Brew => "brew",
    }
}

impl PackageBackendKind {
    /// Linux probe order; the first binary found wins.
    pub const LINUX_PRIORITY: [Self; 4] = [Self::Apt, Self::Dnf, Self::Zypper, Self::Pacman];

    /// brew refuses to run as root, so it never elevates.
    #[must_use]
    pub const fn elevates(self) -> bool {
        !matches!(self, Self::Brew)
    }
}

named_kind! {
    pub enum FirewallBackendKind {
        Ufw => "ufw",
        Firewalld => "firewalld",
        Pf => "pf",
    }
}

named_kind! {
    pub enum ServiceBackendKind {
        Systemd => "systemd",
        Launchd => "launchd",
    }
}

named_kind! {
    pub enum BootLoaderKind {
        Grub => "grub",
        SystemdBoot => "systemd-boot",
        Refind => "refind",
    }
}

named_kind! {
    pub enum LogBackendKind {
        Journald => "journald",
        SyslogFiles => "syslog-files",
        UnifiedLog => "unified-log",
    }
}

named_kind! {
    pub enum UserBackendKind {
        ShadowUtils => "shadow-utils",
    }
}
