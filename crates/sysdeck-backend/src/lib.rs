mod credential;
mod error;
mod kind;
mod parse;
mod traits;
mod types;

pub use credential::Credential;
pub use error::{AdminError, ErrorKind, PrivilegeFailure};
pub use kind::{
    BootLoaderKind, BootMode, Domain, FirewallBackendKind, LogBackendKind, OsFamily,
    PackageBackendKind, ProcessSignal, ServiceBackendKind, UserBackendKind,
};
pub use parse::{ParseIssue, Parsed};
pub use traits::{
    BootBackend, FirewallBackend, LogBackend, PackageBackend, RepositoryBackend, ServiceBackend,
    UserBackend,
};
pub use types::{
    BootConfiguration, BootEntry, Direction, FirewallAction, FirewallRule, FirewallStatus, Group,
    KernelBuild, LogKind, NewUser, OpOutcome, Package, PackageStatus, ProcessInfo, Protocol,
    Repository, RepositoryMatch, RuleSpec, ServiceAction, ServiceUnit, SystemInfo, Toggled,
    UserAccount, UserChanges, closest_match,
};
