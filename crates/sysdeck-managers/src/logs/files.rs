use std::path::{Path, PathBuf};

use log::debug;

use sysdeck_backend::{AdminError, Credential, Domain, LogKind, PackageBackendKind};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

/// Plain log files under `/var/log` and the commands that read them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFiles {
    pub dir: PathBuf,
    /// Decides which package tool's history file is the package log.
    pub packages: Option<PackageBackendKind>,
}

impl LogFiles {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, packages: Option<PackageBackendKind>) -> Self {
        Self {
            dir: dir.into(),
            packages,
        }
    }

    fn candidates(&self, kind: LogKind) -> &'static [&'static str] {
        match kind {
            LogKind::System => &["syslog", "messages"],
            LogKind::Kernel => &["kern.log"],
            LogKind::Auth => &["auth.log", "secure"],
            LogKind::Package => match self.packages {
                Some(PackageBackendKind::Apt) => &["dpkg.log", "apt/history.log"],
                Some(PackageBackendKind::Dnf) => &["dnf.log", "dnf.rpm.log"],
                Some(PackageBackendKind::Zypper) => &["zypper.log", "zypp/history"],
                Some(PackageBackendKind::Pacman) => &["pacman.log"],
                Some(PackageBackendKind::Brew) => &["install.log"],
                None => &[],
            },
        }
    }

    /// First existing file for `kind`.
    pub async fn path_for(&self, kind: LogKind) -> Option<PathBuf> {
        for name in self.candidates(kind) {
            let path = self.dir.join(name);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }
        debug!("No {kind} log file under {}", self.dir.display());
        None
    }
}

/// The last `lines` non-empty lines of `output`.
pub(crate) fn last_lines(output: &str, lines: usize) -> Vec<String> {
    let all: Vec<&str> = output.lines().filter(|line| !line.trim().is_empty()).collect();
    all[all.len().saturating_sub(lines)..]
        .iter()
        .map(|line| (*line).to_string())
        .collect()
}

/// `tail -n <lines> -- <path>`, elevated when a credential is supplied.
pub(crate) async fn tail(
    gateway: &ExecutionGateway,
    path: &Path,
    lines: usize,
    cred: Option<&Credential>,
) -> Result<Vec<String>, AdminError> {
    let output = gateway
        .read(
            ExecutionRequest::new("tail")
                .args(["-n".to_string(), lines.to_string(), "--".to_string()])
                .arg(path.display().to_string())
                .privileged_if(cred.is_some()),
            cred,
        )
        .await?;
    Ok(last_lines(&output, lines))
}

/// `truncate -s 0 -- <path>` with elevation.
pub(crate) async fn truncate(
    gateway: &ExecutionGateway,
    path: &Path,
    cred: Option<&Credential>,
) -> Result<(), AdminError> {
    gateway
        .mutate(
            Domain::Logs,
            ExecutionRequest::new("truncate")
                .args(["-s", "0", "--"])
                .arg(path.display().to_string())
                .privileged(),
            cred,
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_lines_skips_blanks_and_keeps_order() {
        let output = "one\n\ntwo\nthree\n";
        assert_eq!(last_lines(output, 2), ["two", "three"]);
        assert_eq!(last_lines(output, 10), ["one", "two", "three"]);
        assert!(last_lines(output, 0).is_empty());
    }

    #[tokio::test]
    async fn package_log_follows_the_package_backend() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("pacman.log"), "[ALPM] installed\n").expect("seed");
        std::fs::write(dir.path().join("messages"), "boot\n").expect("seed");

        let files = LogFiles::new(dir.path(), Some(PackageBackendKind::Pacman));
        assert_eq!(
            files.path_for(LogKind::Package).await,
            Some(dir.path().join("pacman.log"))
        );
        assert_eq!(
            files.path_for(LogKind::System).await,
            Some(dir.path().join("messages"))
        );
        assert_eq!(files.path_for(LogKind::Auth).await, None);
    }
}
