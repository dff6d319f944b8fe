mod files;
mod journald;
mod syslog;
mod unified;

use log::info;

use sysdeck_backend::{
    AdminError, Credential, Domain, LogBackend, LogBackendKind, LogKind, OpOutcome,
};
use sysdeck_exec::ExecutionGateway;

pub use files::LogFiles;
pub use journald::JournaldLogs;
pub use syslog::SyslogFiles;
pub use unified::UnifiedLog;

/// Upper bound for one read; larger requests are refused rather than
/// buffering an unbounded journal.
pub const MAX_LINES: usize = 10_000;

#[must_use]
pub fn backend_for(
    kind: LogBackendKind,
    gateway: ExecutionGateway,
    files: LogFiles,
) -> Box<dyn LogBackend> {
    match kind {
        LogBackendKind::Journald => Box::new(JournaldLogs::new(gateway, files)),
        LogBackendKind::SyslogFiles => Box::new(SyslogFiles::new(gateway, files)),
        LogBackendKind::UnifiedLog => Box::new(UnifiedLog::new(gateway, files)),
    }
}

pub struct LogManager {
    backend: Option<Box<dyn LogBackend>>,
}

impl LogManager {
    #[must_use]
    pub fn new(backend: Option<Box<dyn LogBackend>>) -> Self {
        Self { backend }
    }

    fn backend(&self, operation: &'static str) -> Result<&dyn LogBackend, AdminError> {
        self.backend
            .as_deref()
            .ok_or_else(|| AdminError::no_backend(Domain::Logs, operation))
    }

    /// The newest `lines` entries of `kind`, oldest first. A credential
    /// widens what the journal shows to the whole system.
    pub async fn get(
        &self,
        kind: LogKind,
        lines: usize,
        cred: Option<Credential>,
    ) -> Result<Vec<String>, AdminError> {
        let backend = self.backend("read")?;
        if lines == 0 || lines > MAX_LINES {
            return Err(AdminError::invalid(
                "lines",
                format!("must be between 1 and {MAX_LINES}"),
            ));
        }
        backend.read(kind, lines, cred.as_ref()).await
    }

    pub async fn clear(
        &self,
        kind: LogKind,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("clear")?;
        info!("Clearing {kind} log via {}", backend.kind());
        backend.clear(kind, cred.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sysdeck_backend::ErrorKind;
    use sysdeck_exec::testing::ScriptedRunner;

    use super::*;

    #[tokio::test]
    async fn line_counts_are_bounded() {
        let runner = Arc::new(ScriptedRunner::new());
        let logs = LogManager::new(Some(backend_for(
            LogBackendKind::Journald,
            Arc::clone(&runner).into_gateway(),
            LogFiles::new("/nonexistent", None),
        )));

        for lines in [0, MAX_LINES + 1] {
            let error = logs
                .get(LogKind::System, lines, None)
                .await
                .expect_err("out of range");
            assert_eq!(error.kind(), ErrorKind::InvalidArgument);
        }
        assert!(runner.calls().is_empty());

        logs.get(LogKind::Kernel, 20, None).await.expect("read");
        assert_eq!(runner.command_lines(), ["journalctl -n 20 --no-pager -k"]);
    }
}
