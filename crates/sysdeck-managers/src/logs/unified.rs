use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, Credential, Domain, LogBackend, LogBackendKind, LogKind, OpOutcome,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::files::{LogFiles, last_lines, tail, truncate};

const UNIFIED: &str = LogBackendKind::UnifiedLog.as_str();

/// macOS unified log. `log show` has no line limit, so the last hour is
/// read and trimmed.
pub struct UnifiedLog {
    gateway: ExecutionGateway,
    files: LogFiles,
}

impl UnifiedLog {
    #[must_use]
    pub fn new(gateway: ExecutionGateway, files: LogFiles) -> Self {
        Self { gateway, files }
    }
}

fn predicate(kind: LogKind) -> Option<&'static str> {
    match kind {
        LogKind::Kernel => Some("process == \"kernel\""),
        LogKind::Auth => Some("process == \"authd\""),
        LogKind::System | LogKind::Package => None,
    }
}

#[async_trait]
impl LogBackend for UnifiedLog {
    fn kind(&self) -> LogBackendKind {
        LogBackendKind::UnifiedLog
    }

    async fn read(
        &self,
        kind: LogKind,
        lines: usize,
        cred: Option<&Credential>,
    ) -> Result<Vec<String>, AdminError> {
        if kind == LogKind::Package {
            return match self.files.path_for(kind).await {
                Some(path) => tail(&self.gateway, &path, lines, cred).await,
                None => Ok(Vec::new()),
            };
        }
        let mut request =
            ExecutionRequest::new("log").args(["show", "--style", "syslog", "--last", "1h"]);
        if let Some(predicate) = predicate(kind) {
            request = request.args(["--predicate", predicate]);
        }
        let output = self
            .gateway
            .read(request.privileged_if(cred.is_some()), cred)
            .await?;
        Ok(last_lines(&output, lines)
            .into_iter()
            .filter(|line| !line.starts_with("Timestamp"))
            .collect())
    }

    async fn clear(
        &self,
        kind: LogKind,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        match kind {
            LogKind::System => {
                self.gateway
                    .mutate(
                        Domain::Logs,
                        ExecutionRequest::new("log").args(["erase", "--all"]).privileged(),
                        cred,
                    )
                    .await?;
                Ok(OpOutcome::ok("Unified log erased"))
            }
            LogKind::Package => match self.files.path_for(kind).await {
                Some(path) => {
                    truncate(&self.gateway, &path, cred).await?;
                    Ok(OpOutcome::ok(format!("{} cleared", path.display())))
                }
                None => Ok(OpOutcome::failed("No package log found")),
            },
            LogKind::Kernel => Err(AdminError::unsupported(
                Domain::Logs,
                UNIFIED,
                "clearing kernel entries",
            )),
            LogKind::Auth => Err(AdminError::unsupported(
                Domain::Logs,
                UNIFIED,
                "clearing auth entries",
            )),
        }
    }
}
