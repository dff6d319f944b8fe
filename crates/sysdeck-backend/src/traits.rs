use async_trait::async_trait;

use crate::credential::Credential;
use crate::error::AdminError;
use crate::kind::{
    BootLoaderKind, Domain, FirewallBackendKind, LogBackendKind, PackageBackendKind,
    ServiceBackendKind, UserBackendKind,
};
use crate::types::{
    BootConfiguration, FirewallRule, FirewallStatus, Group, LogKind, NewUser, OpOutcome, Package,
    Repository, RuleSpec, ServiceAction, ServiceUnit, UserAccount, UserChanges,
};

#[async_trait]
pub trait PackageBackend: Send + Sync {
    fn kind(&self) -> PackageBackendKind;

    async fn search(&self, query: &str) -> Result<Vec<Package>, AdminError>;

    async fn list_installed(&self) -> Result<Vec<Package>, AdminError>;

    async fn list_upgradable(&self) -> Result<Vec<Package>, AdminError>;

    async fn install(&self, name: &str, cred: Option<&Credential>)
    -> Result<OpOutcome, AdminError>;

    async fn remove(&self, name: &str, cred: Option<&Credential>) -> Result<OpOutcome, AdminError>;

    async fn upgrade_all(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError>;

    /// Removes orphaned dependencies and the download cache.
    async fn clean(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError>;
}

#[async_trait]
pub trait RepositoryBackend: Send + Sync {
    fn kind(&self) -> PackageBackendKind;

    async fn list(&self) -> Result<Vec<Repository>, AdminError>;

    async fn add(
        &self,
        url: &str,
        name: Option<&str>,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError>;

    async fn remove(&self, key: &str, cred: Option<&Credential>) -> Result<OpOutcome, AdminError>;

    async fn set_enabled(
        &self,
        _key: &str,
        _enabled: bool,
        _cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        Err(AdminError::unsupported(
            Domain::Repositories,
            self.kind().as_str(),
            "toggle",
        ))
    }

    async fn refresh(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError>;
}

#[async_trait]
pub trait ServiceBackend: Send + Sync {
    fn kind(&self) -> ServiceBackendKind;

    async fn list(&self) -> Result<Vec<ServiceUnit>, AdminError>;

    async fn status(&self, name: &str) -> Result<ServiceUnit, AdminError>;

    async fn control(
        &self,
        name: &str,
        action: ServiceAction,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError>;
}

#[async_trait]
pub trait FirewallBackend: Send + Sync {
    fn kind(&self) -> FirewallBackendKind;

    /// Most firewall tools only report state to root.
    async fn status(&self, cred: Option<&Credential>) -> Result<FirewallStatus, AdminError>;

    async fn list_rules(&self, cred: Option<&Credential>) -> Result<Vec<FirewallRule>, AdminError> {
        Ok(self.status(cred).await?.rules)
    }

    async fn add_rule(
        &self,
        spec: &RuleSpec,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError>;

    /// Match-based: the rule is identified by its `RuleSpec`.
    async fn remove_rule(
        &self,
        spec: &RuleSpec,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError>;

    async fn set_enabled(
        &self,
        enabled: bool,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError>;
}

#[async_trait]
pub trait BootBackend: Send + Sync {
    fn kind(&self) -> BootLoaderKind;

    async fn config(&self) -> Result<BootConfiguration, AdminError>;

    async fn set_default_entry(
        &self,
        entry: &str,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError>;

    async fn set_timeout(
        &self,
        seconds: u32,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError>;

    /// Regenerates the loader's menu from its sources.
    async fn update(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError>;
}

#[async_trait]
pub trait LogBackend: Send + Sync {
    fn kind(&self) -> LogBackendKind;

    async fn read(
        &self,
        kind: LogKind,
        lines: usize,
        cred: Option<&Credential>,
    ) -> Result<Vec<String>, AdminError>;

    async fn clear(&self, kind: LogKind, cred: Option<&Credential>)
    -> Result<OpOutcome, AdminError>;
}

#[async_trait]
pub trait UserBackend: Send + Sync {
    fn kind(&self) -> UserBackendKind;

    async fn list(&self) -> Result<Vec<UserAccount>, AdminError>;

    async fn groups(&self) -> Result<Vec<Group>, AdminError>;

    async fn create(
        &self,
        user: &NewUser,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError>;

    async fn modify(
        &self,
        username: &str,
        changes: &UserChanges,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError>;

    async fn delete(
        &self,
        username: &str,
        remove_home: bool,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError>;

    async fn set_locked(
        &self,
        username: &str,
        locked: bool,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError>;

    async fn set_password(
        &self,
        username: &str,
        password: &Credential,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError>;
}
