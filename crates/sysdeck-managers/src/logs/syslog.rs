use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, Credential, Domain, LogBackend, LogBackendKind, LogKind, OpOutcome,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::files::{LogFiles, last_lines, tail, truncate};

/// Hosts without a journal: everything lives in `/var/log`, the kernel
/// falls back to the ring buffer.
pub struct SyslogFiles {
    gateway: ExecutionGateway,
    files: LogFiles,
}

impl SyslogFiles {
    #[must_use]
    pub fn new(gateway: ExecutionGateway, files: LogFiles) -> Self {
        Self { gateway, files }
    }
}

#[async_trait]
impl LogBackend for SyslogFiles {
    fn kind(&self) -> LogBackendKind {
        LogBackendKind::SyslogFiles
    }

    async fn read(
        &self,
        kind: LogKind,
        lines: usize,
        cred: Option<&Credential>,
    ) -> Result<Vec<String>, AdminError> {
        if let Some(path) = self.files.path_for(kind).await {
            return tail(&self.gateway, &path, lines, cred).await;
        }
        if kind != LogKind::Kernel {
            return Ok(Vec::new());
        }
        let output = self
            .gateway
            .read(
                ExecutionRequest::new("dmesg").privileged_if(cred.is_some()),
                cred,
            )
            .await?;
        Ok(last_lines(&output, lines))
    }

    async fn clear(
        &self,
        kind: LogKind,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        if let Some(path) = self.files.path_for(kind).await {
            truncate(&self.gateway, &path, cred).await?;
            return Ok(OpOutcome::ok(format!("{} cleared", path.display())));
        }
        if kind == LogKind::Kernel {
            self.gateway
                .mutate(
                    Domain::Logs,
                    ExecutionRequest::new("dmesg").arg("-C").privileged(),
                    cred,
                )
                .await?;
            return Ok(OpOutcome::ok("Kernel ring buffer cleared"));
        }
        Ok(OpOutcome::failed(format!("No {kind} log found")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sysdeck_exec::testing::{ScriptedResponse, ScriptedRunner};

    use super::*;

    #[tokio::test]
    async fn files_are_tailed_and_truncated() {
        let dir = tempfile::tempdir().expect("temp dir");
        let auth = dir.path().join("auth.log");
        std::fs::write(&auth, "").expect("seed");
        let runner = Arc::new(
            ScriptedRunner::new().on(&["tail"], ScriptedResponse::ok("a\nb\nc\n")),
        );
        let logs = SyslogFiles::new(
            Arc::clone(&runner).into_gateway(),
            LogFiles::new(dir.path(), None),
        );

        let lines = logs.read(LogKind::Auth, 2, None).await.expect("read");
        assert_eq!(lines, ["b", "c"]);
        assert!(logs.clear(LogKind::Auth, None).await.expect("clear").success);
        assert_eq!(
            runner.command_lines(),
            [
                format!("tail -n 2 -- {}", auth.display()),
                format!("truncate -s 0 -- {}", auth.display()),
            ]
        );
    }

    #[tokio::test]
    async fn kernel_falls_back_to_the_ring_buffer() {
        let dir = tempfile::tempdir().expect("temp dir");
        let runner = Arc::new(
            ScriptedRunner::new().on(&["dmesg"], ScriptedResponse::ok("[0.0] Linux version\n")),
        );
        let logs = SyslogFiles::new(
            Arc::clone(&runner).into_gateway(),
            LogFiles::new(dir.path(), None),
        );

        let lines = logs.read(LogKind::Kernel, 10, None).await.expect("read");
        assert_eq!(lines, ["[0.0] Linux version"]);
        assert!(!logs.clear(LogKind::System, None).await.expect("clear").success);
    }
}
