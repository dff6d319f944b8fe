use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, Package, PackageBackend, PackageBackendKind,
    PackageStatus,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::parse::{parse_dnf_columns, parse_dnf_search};

/// Exit status of `dnf check-update` when updates are available.
const UPDATES_AVAILABLE: i32 = 100;

pub struct DnfBackend {
    gateway: ExecutionGateway,
}

impl DnfBackend {
    #[must_use]
    pub fn new(gateway: ExecutionGateway) -> Self {
        Self { gateway }
    }

    fn dnf<'a>(args: impl IntoIterator<Item = &'a str>) -> ExecutionRequest {
        ExecutionRequest::new("dnf").args(args)
    }
}

#[async_trait]
impl PackageBackend for DnfBackend {
    fn kind(&self) -> PackageBackendKind {
        PackageBackendKind::Dnf
    }

    async fn search(&self, query: &str) -> Result<Vec<Package>, AdminError> {
        let output = self
            .gateway
            .read(Self::dnf(["search", "--quiet", query]), None)
            .await?;
        Ok(parse_dnf_search(&output).into_records())
    }

    async fn list_installed(&self) -> Result<Vec<Package>, AdminError> {
        let output = self
            .gateway
            .read(Self::dnf(["list", "installed"]), None)
            .await?;
        Ok(parse_dnf_columns(&output, PackageStatus::Installed).into_records())
    }

    async fn list_upgradable(&self) -> Result<Vec<Package>, AdminError> {
        let output = self
            .gateway
            .read(
                Self::dnf(["check-update"]).accept_exit_code(UPDATES_AVAILABLE),
                None,
            )
            .await?;
        Ok(parse_dnf_columns(&output, PackageStatus::Upgradable).into_records())
    }

    async fn install(
        &self,
        name: &str,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Packages,
                Self::dnf(["install", "-y", name]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(format!("Installed {name}")))
    }

    async fn remove(&self, name: &str, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Packages,
                Self::dnf(["remove", "-y", name]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(format!("Removed {name}")))
    }

    async fn upgrade_all(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Packages,
                Self::dnf(["upgrade", "-y"]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok("System packages upgraded"))
    }

    async fn clean(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        let guard = self.gateway.lock(Domain::Packages).await;
        self.gateway
            .mutate_locked(&guard, Self::dnf(["autoremove", "-y"]).privileged(), cred)
            .await?;
        self.gateway
            .mutate_locked(&guard, Self::dnf(["clean", "all"]).privileged(), cred)
            .await?;
        Ok(OpOutcome::ok("Unused packages and package cache removed"))
    }
}
