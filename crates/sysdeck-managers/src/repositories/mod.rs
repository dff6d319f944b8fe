mod apt;
mod brew;
mod dnf;
mod pacman;
mod zypper;

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, PackageBackendKind, Repository, RepositoryBackend,
    Toggled, closest_match,
};
use sysdeck_exec::ExecutionGateway;

use crate::validate;

pub use apt::{AptRepositories, AptSources};
pub use brew::BrewTaps;
pub use dnf::DnfRepositories;
pub use pacman::PacmanRepositories;
pub use zypper::ZypperRepositories;

pub(crate) const NOT_FOUND: &str = "Repository not found";

/// `custom-repo-<unix seconds>`.
pub(crate) fn default_repo_name() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    format!("custom-repo-{secs}")
}

/// Config locations read and rewritten by the file-backed backends.
#[derive(Debug, Clone)]
pub struct RepositoryPaths {
    pub apt: AptSources,
    pub yum_repos_dir: PathBuf,
    pub pacman_conf: PathBuf,
}

impl Default for RepositoryPaths {
    fn default() -> Self {
        Self {
            apt: AptSources::default(),
            yum_repos_dir: PathBuf::from("/etc/yum.repos.d"),
            pacman_conf: PathBuf::from("/etc/pacman.conf"),
        }
    }
}

#[must_use]
pub fn backend_for(
    kind: PackageBackendKind,
    gateway: ExecutionGateway,
    paths: &RepositoryPaths,
) -> Box<dyn RepositoryBackend> {
    match kind {
        PackageBackendKind::Apt => Box::new(AptRepositories::new(gateway, paths.apt.clone())),
        PackageBackendKind::Dnf => {
            Box::new(DnfRepositories::new(gateway, paths.yum_repos_dir.clone()))
        }
        PackageBackendKind::Zypper => Box::new(ZypperRepositories::new(gateway)),
        PackageBackendKind::Pacman => {
            Box::new(PacmanRepositories::new(gateway, paths.pacman_conf.clone()))
        }
        PackageBackendKind::Brew => Box::new(BrewTaps::new(gateway)),
    }
}

/// Package sources of the active package tool.
///
/// State changes are confirmed by listing again; nothing is cached here.
pub struct RepositoryManager {
    backend: Option<Box<dyn RepositoryBackend>>,
}

impl RepositoryManager {
    #[must_use]
    pub fn new(backend: Option<Box<dyn RepositoryBackend>>) -> Self {
        Self { backend }
    }

    fn backend(&self, operation: &'static str) -> Result<&dyn RepositoryBackend, AdminError> {
        self.backend
            .as_deref()
            .ok_or_else(|| AdminError::no_backend(Domain::Repositories, operation))
    }

    pub async fn list(&self) -> Result<Vec<Repository>, AdminError> {
        self.backend("list")?.list().await
    }

    pub async fn add(
        &self,
        url: &str,
        name: Option<&str>,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("add")?;
        info!("Adding {} repository {url}", backend.kind());
        backend.add(url, name, cred.as_ref()).await
    }

    pub async fn remove(&self, key: &str, cred: Option<Credential>) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("remove")?;
        let key = validate::single_line("repository", key.trim())?;
        info!("Removing {} repository {key}", backend.kind());
        backend.remove(key, cred.as_ref()).await
    }

    /// Enables or disables `key`, then lists again and returns the record
    /// as the tool now reports it.
    pub async fn toggle(
        &self,
        key: &str,
        enable: bool,
        cred: Option<Credential>,
    ) -> Result<Toggled<Repository>, AdminError> {
        let backend = self.backend("toggle")?;
        let key = validate::single_line("repository", key.trim())?;
        let outcome = backend.set_enabled(key, enable, cred.as_ref()).await?;
        drop(cred);
        if !outcome.success {
            return Ok(Toggled::failed(outcome));
        }

        let repos = backend.list().await?;
        let closest = closest_match(&repos, key);
        let record = repos
            .into_iter()
            .find(|repo| closest.is_some() && repo.match_key(key) == closest);
        if record.as_ref().is_some_and(|repo| repo.enabled != enable) {
            warn!("{key} still reports enabled={} after toggle", !enable);
        }
        Ok(Toggled { outcome, record })
    }

    pub async fn refresh(&self, cred: Option<Credential>) -> Result<OpOutcome, AdminError> {
        self.backend("refresh")?.refresh(cred.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sysdeck_backend::ErrorKind;
    use sysdeck_exec::testing::{ScriptedResponse, ScriptedRunner};

    use super::*;

    #[test]
    fn default_names_are_timestamped() {
        let name = default_repo_name();
        let secs = name.strip_prefix("custom-repo-").expect("prefix");
        assert!(secs.parse::<u64>().expect("seconds") > 1_600_000_000);
    }

    #[tokio::test]
    async fn brew_toggle_is_unsupported() {
        let runner = Arc::new(ScriptedRunner::new());
        let repos = RepositoryManager::new(Some(backend_for(
            PackageBackendKind::Brew,
            runner.into_gateway(),
            &RepositoryPaths::default(),
        )));

        let error = repos
            .toggle("homebrew/cask", false, None)
            .await
            .expect_err("unsupported");
        assert_eq!(error.kind(), ErrorKind::UnsupportedBackend);
    }

    #[tokio::test]
    async fn zypper_toggle_relists_for_the_confirmed_state() {
        let table = |enabled: &str| {
            format!(
                "# | Alias    | Name     | Enabled | URI\n\
                 --+----------+----------+---------+----------------\n\
                 1 | repo-oss | Main OSS | {enabled} | https://x/oss/\n"
            )
        };
        let runner = Arc::new(
            ScriptedRunner::new().on(
                &["zypper", "--non-interactive", "lr"],
                ScriptedResponse::ok(table("No")),
            ),
        );
        let repos = RepositoryManager::new(Some(backend_for(
            PackageBackendKind::Zypper,
            Arc::clone(&runner).into_gateway(),
            &RepositoryPaths::default(),
        )));

        let toggled = repos.toggle("repo-oss", false, None).await.expect("toggle");
        assert!(toggled.outcome.success);
        let record = toggled.record.expect("record");
        assert!(!record.enabled);
        assert_eq!(
            runner.command_lines(),
            [
                "zypper --non-interactive modifyrepo --disable repo-oss",
                "zypper --non-interactive lr -u"
            ]
        );
    }

    #[tokio::test]
    async fn failed_toggle_returns_no_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = RepositoryPaths {
            apt: AptSources::under(dir.path()),
            ..RepositoryPaths::default()
        };
        let runner = Arc::new(ScriptedRunner::new());
        let repos = RepositoryManager::new(Some(backend_for(
            PackageBackendKind::Apt,
            runner.into_gateway(),
            &paths,
        )));

        let toggled = repos.toggle("nowhere", true, None).await.expect("toggle");
        assert!(!toggled.outcome.success);
        assert_eq!(toggled.outcome.message, NOT_FOUND);
        assert!(toggled.record.is_none());
    }
}
