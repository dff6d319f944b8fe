use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use sysdeck_backend::Credential;

/// A command to run, as an argument vector. Nothing here is ever passed
/// through a shell.
#[derive(Debug)]
pub struct ExecutionRequest {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
    privileged: bool,
    accepted_exit_codes: Vec<i32>,
    secret_stdin: Option<Credential>,
    cancel: CancellationToken,
}

impl ExecutionRequest {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: None,
            privileged: false,
            accepted_exit_codes: Vec::new(),
            secret_stdin: None,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Overrides the gateway's default for this kind of call.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    #[must_use]
    pub fn privileged_if(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Treat `code` as success in addition to 0.
    #[must_use]
    pub fn accept_exit_code(mut self, code: i32) -> Self {
        self.accepted_exit_codes.push(code);
        self
    }

    /// Written to stdin as one line, after any elevation secret.
    #[must_use]
    pub fn secret_stdin(mut self, secret: Credential) -> Self {
        self.secret_stdin = Some(secret);
        self
    }

    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    #[must_use]
    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    #[must_use]
    pub fn accepts(&self, code: Option<i32>) -> bool {
        match code {
            Some(0) => true,
            Some(code) => self.accepted_exit_codes.contains(&code),
            None => false,
        }
    }

    #[must_use]
    pub fn secret_input(&self) -> Option<&Credential> {
        self.secret_stdin.as_ref()
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Argv joined for log lines. Secrets never travel in argv.
    #[must_use]
    pub fn display(&self) -> String {
        self.argv().join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub read: Duration,
    pub mutate: Duration,
    /// Wait between the polite and the forced termination signal.
    pub grace: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(30),
            mutate: Duration::from_secs(600),
            grace: Duration::from_secs(5),
        }
    }
}
