mod apt;
mod brew;
mod dnf;
pub(crate) mod parse;
mod pacman;
mod zypper;

use log::info;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, Package, PackageBackend, PackageBackendKind,
};
use sysdeck_exec::ExecutionGateway;

use crate::validate;

pub use apt::AptBackend;
pub use brew::BrewBackend;
pub use dnf::DnfBackend;
pub use pacman::PacmanBackend;
pub use zypper::ZypperBackend;

/// Backend for `kind`, sharing the caller's gateway.
#[must_use]
pub fn backend_for(kind: PackageBackendKind, gateway: ExecutionGateway) -> Box<dyn PackageBackend> {
    match kind {
        PackageBackendKind::Apt => Box::new(AptBackend::new(gateway)),
        PackageBackendKind::Dnf => Box::new(DnfBackend::new(gateway)),
        PackageBackendKind::Zypper => Box::new(ZypperBackend::new(gateway)),
        PackageBackendKind::Pacman => Box::new(PacmanBackend::new(gateway)),
        PackageBackendKind::Brew => Box::new(BrewBackend::new(gateway)),
    }
}

/// Package operations against whichever package tool the host provides.
///
/// Credentials are taken by value and dropped (and wiped) when the call
/// returns.
pub struct PackageManager {
    backend: Option<Box<dyn PackageBackend>>,
}

impl PackageManager {
    #[must_use]
    pub fn new(backend: Option<Box<dyn PackageBackend>>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend_kind(&self) -> Option<PackageBackendKind> {
        self.backend.as_ref().map(|backend| backend.kind())
    }

    fn backend(&self, operation: &'static str) -> Result<&dyn PackageBackend, AdminError> {
        self.backend
            .as_deref()
            .ok_or_else(|| AdminError::no_backend(Domain::Packages, operation))
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Package>, AdminError> {
        let backend = self.backend("search")?;
        let query = validate::token("query", query.trim())?;
        backend.search(query).await
    }

    pub async fn list_installed(&self) -> Result<Vec<Package>, AdminError> {
        self.backend("list installed")?.list_installed().await
    }

    pub async fn list_upgradable(&self) -> Result<Vec<Package>, AdminError> {
        self.backend("list upgradable")?.list_upgradable().await
    }

    pub async fn install(
        &self,
        name: &str,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("install")?;
        let name = validate::token("package", name.trim())?;
        info!("Installing {name} with {}", backend.kind());
        backend.install(name, cred.as_ref()).await
    }

    pub async fn remove(&self, name: &str, cred: Option<Credential>) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("remove")?;
        let name = validate::token("package", name.trim())?;
        info!("Removing {name} with {}", backend.kind());
        backend.remove(name, cred.as_ref()).await
    }

    pub async fn upgrade_all(&self, cred: Option<Credential>) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("upgrade")?;
        info!("Upgrading all packages with {}", backend.kind());
        backend.upgrade_all(cred.as_ref()).await
    }

    pub async fn clean(&self, cred: Option<Credential>) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("clean")?;
        info!("Cleaning package cache with {}", backend.kind());
        backend.clean(cred.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sysdeck_backend::{ErrorKind, PackageStatus};
    use sysdeck_exec::testing::{ScriptedResponse, ScriptedRunner};

    use super::*;

    fn manager(kind: PackageBackendKind, runner: &Arc<ScriptedRunner>) -> PackageManager {
        PackageManager::new(Some(backend_for(kind, Arc::clone(runner).into_gateway())))
    }

    #[tokio::test]
    async fn missing_backend_reports_unsupported() {
        let packages = PackageManager::new(None);
        let error = packages.list_installed().await.expect_err("no backend");
        assert_eq!(error.kind(), ErrorKind::UnsupportedBackend);
        assert!(packages.backend_kind().is_none());
    }

    #[tokio::test]
    async fn apt_install_is_elevated_and_passes_name_as_one_argument() {
        let runner = Arc::new(ScriptedRunner::new());
        let packages = manager(PackageBackendKind::Apt, &runner);

        let outcome = packages
            .install("curl", Some(Credential::new("pw".to_string())))
            .await
            .expect("install");
        assert!(outcome.success);

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].argv, ["apt", "install", "-y", "curl"]);
        assert!(calls[0].privileged);
        assert!(calls[0].had_credential);
    }

    #[tokio::test]
    async fn option_like_names_never_reach_the_tool() {
        let runner = Arc::new(ScriptedRunner::new());
        let packages = manager(PackageBackendKind::Dnf, &runner);

        let error = packages
            .remove("--all", None)
            .await
            .expect_err("rejected");
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn brew_never_elevates() {
        let runner = Arc::new(ScriptedRunner::new());
        let packages = manager(PackageBackendKind::Brew, &runner);

        packages
            .install("wget", Some(Credential::new("pw".to_string())))
            .await
            .expect("install");
        packages.upgrade_all(None).await.expect("upgrade");

        let calls = runner.calls();
        assert_eq!(runner.command_lines(), ["brew install wget", "brew update", "brew upgrade"]);
        assert!(calls.iter().all(|call| !call.privileged && !call.had_credential));
    }

    #[tokio::test]
    async fn apt_upgrade_refreshes_first() {
        let runner = Arc::new(ScriptedRunner::new());
        let packages = manager(PackageBackendKind::Apt, &runner);

        packages.upgrade_all(None).await.expect("upgrade");
        assert_eq!(runner.command_lines(), ["apt update", "apt upgrade -y"]);
    }

    #[tokio::test]
    async fn dnf_check_update_exit_100_is_not_a_failure() {
        let runner = Arc::new(ScriptedRunner::new().on(
            &["dnf", "check-update"],
            ScriptedResponse {
                stdout: "\nbash.x86_64    5.2.26-3.fc40    updates\n".to_string(),
                ..ScriptedResponse::exit(100, "")
            },
        ));
        let packages = manager(PackageBackendKind::Dnf, &runner);

        let upgradable = packages.list_upgradable().await.expect("list");
        assert_eq!(upgradable.len(), 1);
        assert_eq!(upgradable[0].name, "bash");
        assert_eq!(upgradable[0].status, PackageStatus::Upgradable);
    }

    #[tokio::test]
    async fn pacman_with_nothing_to_upgrade_is_empty() {
        let runner = Arc::new(
            ScriptedRunner::new().on(&["pacman", "-Qu"], ScriptedResponse::exit(1, "")),
        );
        let packages = manager(PackageBackendKind::Pacman, &runner);

        assert!(packages.list_upgradable().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn clean_removes_orphans_then_the_cache() {
        let runner = Arc::new(ScriptedRunner::new());
        let packages = manager(PackageBackendKind::Apt, &runner);
        packages.clean(None).await.expect("clean");
        assert_eq!(runner.command_lines(), ["apt autoremove -y", "apt clean"]);

        let runner = Arc::new(ScriptedRunner::new());
        let packages = manager(PackageBackendKind::Dnf, &runner);
        packages.clean(None).await.expect("clean");
        assert_eq!(runner.command_lines(), ["dnf autoremove -y", "dnf clean all"]);
        assert!(runner.calls().iter().all(|call| call.privileged));
    }

    #[tokio::test]
    async fn pacman_clean_removes_listed_orphans() {
        let runner = Arc::new(ScriptedRunner::new().on(
            &["pacman", "-Qdtq"],
            ScriptedResponse::ok("libfoo\npython-bar\n"),
        ));
        let packages = manager(PackageBackendKind::Pacman, &runner);

        let outcome = packages.clean(None).await.expect("clean");
        assert_eq!(outcome.message, "Removed 2 orphaned packages and the package cache");
        assert_eq!(
            runner.command_lines(),
            [
                "pacman -Qdtq",
                "pacman -Rns --noconfirm -- libfoo python-bar",
                "pacman -Sc --noconfirm",
            ]
        );
    }

    #[tokio::test]
    async fn pacman_clean_without_orphans_only_clears_the_cache() {
        let runner = Arc::new(
            ScriptedRunner::new().on(&["pacman", "-Qdtq"], ScriptedResponse::exit(1, "")),
        );
        let packages = manager(PackageBackendKind::Pacman, &runner);

        packages.clean(None).await.expect("clean");
        assert_eq!(runner.command_lines(), ["pacman -Qdtq", "pacman -Sc --noconfirm"]);
    }
}
