use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, Package, PackageBackend, PackageBackendKind,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::parse::{parse_zypper_search, parse_zypper_updates};

pub struct ZypperBackend {
    gateway: ExecutionGateway,
}

impl ZypperBackend {
    #[must_use]
    pub fn new(gateway: ExecutionGateway) -> Self {
        Self { gateway }
    }

    fn zypper<'a>(args: impl IntoIterator<Item = &'a str>) -> ExecutionRequest {
        ExecutionRequest::new("zypper")
            .arg("--non-interactive")
            .args(args)
    }
}

/// `zypper search` exits 104 when nothing matched.
const NO_MATCHES: i32 = 104;

#[async_trait]
impl PackageBackend for ZypperBackend {
    fn kind(&self) -> PackageBackendKind {
        PackageBackendKind::Zypper
    }

    async fn search(&self, query: &str) -> Result<Vec<Package>, AdminError> {
        let output = self
            .gateway
            .read(
                Self::zypper(["search", "-s", query]).accept_exit_code(NO_MATCHES),
                None,
            )
            .await?;
        Ok(parse_zypper_search(&output).into_records())
    }

    async fn list_installed(&self) -> Result<Vec<Package>, AdminError> {
        let output = self
            .gateway
            .read(Self::zypper(["search", "-s", "-i"]), None)
            .await?;
        Ok(parse_zypper_search(&output).into_records())
    }

    async fn list_upgradable(&self) -> Result<Vec<Package>, AdminError> {
        let output = self
            .gateway
            .read(Self::zypper(["list-updates"]), None)
            .await?;
        Ok(parse_zypper_updates(&output).into_records())
    }

    async fn install(
        &self,
        name: &str,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Packages,
                Self::zypper(["install", name]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(format!("Installed {name}")))
    }

    async fn remove(&self, name: &str, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Packages,
                Self::zypper(["remove", name]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(format!("Removed {name}")))
    }

    async fn upgrade_all(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Packages,
                Self::zypper(["update"]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok("System packages upgraded"))
    }

    /// zypper has no orphan removal; only the cache is cleared.
    async fn clean(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Packages,
                Self::zypper(["clean", "--all"]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok("Package cache removed"))
    }
}
