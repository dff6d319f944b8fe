use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, Package, PackageBackend, PackageBackendKind,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::parse::{parse_pacman_installed, parse_pacman_search, parse_pacman_upgradable};

/// pacman exits 1 from `-Ss`/`-Qu` when there is nothing to print.
const NOTHING_FOUND: i32 = 1;

pub struct PacmanBackend {
    gateway: ExecutionGateway,
}

impl PacmanBackend {
    #[must_use]
    pub fn new(gateway: ExecutionGateway) -> Self {
        Self { gateway }
    }

    fn pacman<'a>(args: impl IntoIterator<Item = &'a str>) -> ExecutionRequest {
        ExecutionRequest::new("pacman").args(args)
    }
}

#[async_trait]
impl PackageBackend for PacmanBackend {
    fn kind(&self) -> PackageBackendKind {
        PackageBackendKind::Pacman
    }

    async fn search(&self, query: &str) -> Result<Vec<Package>, AdminError> {
        let output = self
            .gateway
            .read(
                Self::pacman(["-Ss", query]).accept_exit_code(NOTHING_FOUND),
                None,
            )
            .await?;
        Ok(parse_pacman_search(&output).into_records())
    }

    async fn list_installed(&self) -> Result<Vec<Package>, AdminError> {
        let output = self.gateway.read(Self::pacman(["-Q"]), None).await?;
        Ok(parse_pacman_installed(&output).into_records())
    }

    async fn list_upgradable(&self) -> Result<Vec<Package>, AdminError> {
        let output = self
            .gateway
            .read(
                Self::pacman(["-Qu"]).accept_exit_code(NOTHING_FOUND),
                None,
            )
            .await?;
        Ok(parse_pacman_upgradable(&output).into_records())
    }

    async fn install(
        &self,
        name: &str,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Packages,
                Self::pacman(["-S", "--noconfirm", name]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(format!("Installed {name}")))
    }

    async fn remove(&self, name: &str, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Packages,
                Self::pacman(["-R", "--noconfirm", name]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(format!("Removed {name}")))
    }

    async fn upgrade_all(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Packages,
                Self::pacman(["-Syu", "--noconfirm"]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok("System packages upgraded"))
    }

    async fn clean(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        let guard = self.gateway.lock(Domain::Packages).await;
        let orphans = self
            .gateway
            .read(
                Self::pacman(["-Qdtq"]).accept_exit_code(NOTHING_FOUND),
                None,
            )
            .await?;
        let orphans: Vec<&str> = orphans.split_whitespace().collect();
        if !orphans.is_empty() {
            self.gateway
                .mutate_locked(
                    &guard,
                    Self::pacman(["-Rns", "--noconfirm", "--"])
                        .args(orphans.iter().copied())
                        .privileged(),
                    cred,
                )
                .await?;
        }
        self.gateway
            .mutate_locked(&guard, Self::pacman(["-Sc", "--noconfirm"]).privileged(), cred)
            .await?;
        Ok(OpOutcome::ok(format!(
            "Removed {} orphaned packages and the package cache",
            orphans.len()
        )))
    }
}
