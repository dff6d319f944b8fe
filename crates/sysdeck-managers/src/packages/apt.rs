use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, Package, PackageBackend, PackageBackendKind,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::parse::{parse_apt_search, parse_apt_upgradable, parse_dpkg_list};

pub struct AptBackend {
    gateway: ExecutionGateway,
}

impl AptBackend {
    #[must_use]
    pub fn new(gateway: ExecutionGateway) -> Self {
        Self { gateway }
    }

    fn apt<'a>(args: impl IntoIterator<Item = &'a str>) -> ExecutionRequest {
        ExecutionRequest::new("apt").args(args)
    }
}

#[async_trait]
impl PackageBackend for AptBackend {
    fn kind(&self) -> PackageBackendKind {
        PackageBackendKind::Apt
    }

    async fn search(&self, query: &str) -> Result<Vec<Package>, AdminError> {
        let output = self
            .gateway
            .read(Self::apt(["search", query]), None)
            .await?;
        Ok(parse_apt_search(&output).into_records())
    }

    async fn list_installed(&self) -> Result<Vec<Package>, AdminError> {
        let output = self
            .gateway
            .read(ExecutionRequest::new("dpkg").arg("-l"), None)
            .await?;
        Ok(parse_dpkg_list(&output).into_records())
    }

    async fn list_upgradable(&self) -> Result<Vec<Package>, AdminError> {
        let output = self
            .gateway
            .read(Self::apt(["list", "--upgradable"]), None)
            .await?;
        Ok(parse_apt_upgradable(&output).into_records())
    }

    async fn install(
        &self,
        name: &str,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Packages,
                Self::apt(["install", "-y", name]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(format!("Installed {name}")))
    }

    async fn remove(&self, name: &str, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Packages,
                Self::apt(["remove", "-y", name]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(format!("Removed {name}")))
    }

    async fn upgrade_all(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        let guard = self.gateway.lock(Domain::Packages).await;
        self.gateway
            .mutate_locked(&guard, Self::apt(["update"]).privileged(), cred)
            .await?;
        self.gateway
            .mutate_locked(&guard, Self::apt(["upgrade", "-y"]).privileged(), cred)
            .await?;
        Ok(OpOutcome::ok("System packages upgraded"))
    }

    async fn clean(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        let guard = self.gateway.lock(Domain::Packages).await;
        self.gateway
            .mutate_locked(&guard, Self::apt(["autoremove", "-y"]).privileged(), cred)
            .await?;
        self.gateway
            .mutate_locked(&guard, Self::apt(["clean"]).privileged(), cred)
            .await?;
        Ok(OpOutcome::ok("Unused packages and package cache removed"))
    }
}
