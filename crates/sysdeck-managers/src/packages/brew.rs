use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, Package, PackageBackend, PackageBackendKind,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::parse::{parse_brew_outdated, parse_brew_search, parse_brew_versions};

/// Homebrew refuses to run as root, so nothing here is elevated and any
/// credential passed in is ignored.
pub struct BrewBackend {
    gateway: ExecutionGateway,
}

impl BrewBackend {
    #[must_use]
    pub fn new(gateway: ExecutionGateway) -> Self {
        Self { gateway }
    }

    fn brew<'a>(args: impl IntoIterator<Item = &'a str>) -> ExecutionRequest {
        ExecutionRequest::new("brew").args(args)
    }
}

#[async_trait]
impl PackageBackend for BrewBackend {
    fn kind(&self) -> PackageBackendKind {
        PackageBackendKind::Brew
    }

    async fn search(&self, query: &str) -> Result<Vec<Package>, AdminError> {
        let output = self.gateway.read(Self::brew(["search", query]), None).await?;
        Ok(parse_brew_search(&output).into_records())
    }

    async fn list_installed(&self) -> Result<Vec<Package>, AdminError> {
        let output = self
            .gateway
            .read(Self::brew(["list", "--versions"]), None)
            .await?;
        Ok(parse_brew_versions(&output).into_records())
    }

    async fn list_upgradable(&self) -> Result<Vec<Package>, AdminError> {
        let output = self
            .gateway
            .read(Self::brew(["outdated", "--verbose"]), None)
            .await?;
        Ok(parse_brew_outdated(&output).into_records())
    }

    async fn install(
        &self,
        name: &str,
        _cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(Domain::Packages, Self::brew(["install", name]), None)
            .await?;
        Ok(OpOutcome::ok(format!("Installed {name}")))
    }

    async fn remove(
        &self,
        name: &str,
        _cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(Domain::Packages, Self::brew(["uninstall", name]), None)
            .await?;
        Ok(OpOutcome::ok(format!("Removed {name}")))
    }

    async fn upgrade_all(&self, _cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        let guard = self.gateway.lock(Domain::Packages).await;
        self.gateway
            .mutate_locked(&guard, Self::brew(["update"]), None)
            .await?;
        self.gateway
            .mutate_locked(&guard, Self::brew(["upgrade"]), None)
            .await?;
        Ok(OpOutcome::ok("Homebrew packages upgraded"))
    }

    async fn clean(&self, _cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        let guard = self.gateway.lock(Domain::Packages).await;
        self.gateway
            .mutate_locked(&guard, Self::brew(["autoremove"]), None)
            .await?;
        self.gateway
            .mutate_locked(&guard, Self::brew(["cleanup"]), None)
            .await?;
        Ok(OpOutcome::ok("Unused formulae and Homebrew cache removed"))
    }
}
