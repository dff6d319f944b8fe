use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, Credential, Domain, LogBackend, LogBackendKind, LogKind, OpOutcome,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::files::{LogFiles, last_lines, tail, truncate};

/// syslog facilities `auth` and `authpriv`; repeated matches on one field
/// are ORed by journalctl.
const AUTH_MATCHES: [&str; 2] = ["SYSLOG_FACILITY=4", "SYSLOG_FACILITY=10"];

pub struct JournaldLogs {
    gateway: ExecutionGateway,
    files: LogFiles,
}

impl JournaldLogs {
    #[must_use]
    pub fn new(gateway: ExecutionGateway, files: LogFiles) -> Self {
        Self { gateway, files }
    }

    fn journalctl(lines: usize) -> ExecutionRequest {
        ExecutionRequest::new("journalctl")
            .args(["-n".to_string(), lines.to_string()])
            .arg("--no-pager")
    }
}

#[async_trait]
impl LogBackend for JournaldLogs {
    fn kind(&self) -> LogBackendKind {
        LogBackendKind::Journald
    }

    async fn read(
        &self,
        kind: LogKind,
        lines: usize,
        cred: Option<&Credential>,
    ) -> Result<Vec<String>, AdminError> {
        let request = match kind {
            LogKind::System => Self::journalctl(lines),
            LogKind::Kernel => Self::journalctl(lines).arg("-k"),
            LogKind::Auth => Self::journalctl(lines).args(AUTH_MATCHES),
            LogKind::Package => {
                return match self.files.path_for(kind).await {
                    Some(path) => tail(&self.gateway, &path, lines, cred).await,
                    None => Ok(Vec::new()),
                };
            }
        };
        let output = self
            .gateway
            .read(request.privileged_if(cred.is_some()), cred)
            .await?;
        Ok(last_lines(&output, lines)
            .into_iter()
            .filter(|line| line != "-- No entries --")
            .collect())
    }

    async fn clear(
        &self,
        kind: LogKind,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        match kind {
            LogKind::System => {
                let guard = self.gateway.lock(Domain::Logs).await;
                for step in ["--rotate", "--vacuum-time=1s"] {
                    self.gateway
                        .mutate_locked(
                            &guard,
                            ExecutionRequest::new("journalctl").arg(step).privileged(),
                            cred,
                        )
                        .await?;
                }
                Ok(OpOutcome::ok("Journal cleared"))
            }
            LogKind::Kernel => {
                self.gateway
                    .mutate(
                        Domain::Logs,
                        ExecutionRequest::new("dmesg").arg("-C").privileged(),
                        cred,
                    )
                    .await?;
                Ok(OpOutcome::ok("Kernel ring buffer cleared"))
            }
            LogKind::Auth | LogKind::Package => match self.files.path_for(kind).await {
                Some(path) => {
                    truncate(&self.gateway, &path, cred).await?;
                    Ok(OpOutcome::ok(format!("{} cleared", path.display())))
                }
                None if kind == LogKind::Auth => Err(AdminError::unsupported(
                    Domain::Logs,
                    LogBackendKind::Journald.as_str(),
                    "clearing auth entries",
                )),
                None => Ok(OpOutcome::failed("No package log found")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sysdeck_backend::ErrorKind;
    use sysdeck_exec::testing::{ScriptedResponse, ScriptedRunner};

    use super::*;

    fn journald(runner: &Arc<ScriptedRunner>, dir: &std::path::Path) -> JournaldLogs {
        JournaldLogs::new(Arc::clone(runner).into_gateway(), LogFiles::new(dir, None))
    }

    #[tokio::test]
    async fn auth_entries_filter_by_facility() {
        let runner = Arc::new(ScriptedRunner::new().on(
            &["journalctl"],
            ScriptedResponse::ok("Jan 01 sshd[1]: Accepted publickey\n"),
        ));
        let dir = tempfile::tempdir().expect("temp dir");
        let lines = journald(&runner, dir.path())
            .read(LogKind::Auth, 50, None)
            .await
            .expect("read");
        assert_eq!(lines, ["Jan 01 sshd[1]: Accepted publickey"]);
        assert_eq!(
            runner.command_lines(),
            ["journalctl -n 50 --no-pager SYSLOG_FACILITY=4 SYSLOG_FACILITY=10"]
        );
        assert!(!runner.calls()[0].privileged);
    }

    #[tokio::test]
    async fn clearing_rotates_before_vacuuming() {
        let runner = Arc::new(ScriptedRunner::new());
        let dir = tempfile::tempdir().expect("temp dir");
        let logs = journald(&runner, dir.path());

        logs.clear(LogKind::System, None).await.expect("clear");
        assert_eq!(
            runner.command_lines(),
            ["journalctl --rotate", "journalctl --vacuum-time=1s"]
        );

        let error = logs
            .clear(LogKind::Auth, None)
            .await
            .expect_err("no auth file");
        assert_eq!(error.kind(), ErrorKind::UnsupportedBackend);
    }
}
