use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use sysdeck_backend::{AdminError, Credential};
use sysdeck_platform::{
    GroupSignal, OwnProcessGroup, group_exists, running_as_root, signal_group,
};

use crate::request::{ExecutionRequest, ExecutionResult};

/// Everything a runner needs for one process, with the timeout already
/// resolved against the gateway policy.
pub struct Invocation<'a> {
    pub request: &'a ExecutionRequest,
    /// Elevation secret, only consulted for privileged requests.
    pub credential: Option<&'a Credential>,
    pub timeout: Duration,
    pub grace: Duration,
}

/// Spawns processes. Implementations must honour the request's
/// cancellation token and report timeouts through
/// [`ExecutionResult::timed_out`] rather than as an error.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: Invocation<'_>) -> Result<ExecutionResult, AdminError>;
}

/// Runs commands on the local machine.
pub struct SystemRunner {
    is_root: bool,
}

impl SystemRunner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            is_root: running_as_root(),
        }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

enum Elevation {
    None,
    SudoWithPassword,
    SudoNonInteractive,
}

impl Elevation {
    /// `sudo` flags placed before `--`. `-k` ignores a cached timestamp so
    /// the password line is always consumed by sudo, never by the command.
    fn sudo_flags(&self) -> Option<&'static [&'static str]> {
        match self {
            Elevation::None => None,
            Elevation::SudoWithPassword => Some(&["-k", "-S", "-p", ""]),
            Elevation::SudoNonInteractive => Some(&["-n"]),
        }
    }
}

enum Ending {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

impl SystemRunner {
    fn elevation(&self, invocation: &Invocation<'_>) -> Elevation {
        if !invocation.request.is_privileged() || self.is_root {
            Elevation::None
        } else if invocation.credential.is_some() {
            Elevation::SudoWithPassword
        } else {
            Elevation::SudoNonInteractive
        }
    }

    fn build_command(request: &ExecutionRequest, elevation: &Elevation) -> Command {
        let mut cmd = match elevation.sudo_flags() {
            None => Command::new(request.program()),
            Some(flags) => {
                let mut cmd = Command::new("sudo");
                cmd.args(flags).arg("--").arg(request.program());
                cmd
            }
        };
        cmd.args(request.arguments());

        if let Some(dir) = request.working_dir() {
            cmd.current_dir(dir);
        }

        let needs_stdin = matches!(elevation, Elevation::SudoWithPassword)
            || request.secret_input().is_some();
        cmd.env("LC_ALL", "C")
            .stdin(if needs_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .own_process_group();
        cmd
    }

    async fn feed_stdin(
        child: &mut Child,
        elevation: &Elevation,
        credential: Option<&Credential>,
        secret: Option<&Credential>,
    ) {
        let Some(mut stdin) = child.stdin.take() else {
            return;
        };

        let sudo_secret = match elevation {
            Elevation::SudoWithPassword => credential,
            _ => None,
        };

        for line in sudo_secret.into_iter().chain(secret) {
            let written = async {
                stdin.write_all(line.expose_secret()).await?;
                stdin.write_all(b"\n").await
            }
            .await;
            if let Err(e) = written {
                debug!("Child closed stdin early: {e}");
                break;
            }
        }

        if let Err(e) = stdin.shutdown().await {
            debug!("Failed to close child stdin: {e}");
        }
    }

    async fn terminate(child: &mut Child, pgid: Option<u32>, grace: Duration) {
        if let Some(pgid) = pgid {
            if let Err(e) = signal_group(pgid, GroupSignal::Terminate) {
                debug!("SIGTERM to process group {pgid} failed: {e}");
            }
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }
            warn!("Process group {pgid} ignored SIGTERM for {grace:?}, killing");
        }
        Self::kill(child, pgid).await;
    }

    async fn kill(child: &mut Child, pgid: Option<u32>) {
        if let Some(pgid) = pgid
            && let Err(e) = signal_group(pgid, GroupSignal::Kill)
        {
            debug!("SIGKILL to process group {pgid} failed: {e}");
        }
        if let Err(e) = child.start_kill() {
            debug!("Direct kill failed: {e}");
        }
        if let Err(e) = child.wait().await {
            warn!("Failed to reap killed child: {e}");
        }
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe
            && let Err(e) = pipe.read_to_end(&mut buf).await
        {
            debug!("Failed to read child output: {e}");
        }
        buf
    })
}

async fn collect(handle: JoinHandle<Vec<u8>>) -> String {
    match handle.await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!("Output reader task failed: {e}");
            String::new()
        }
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, invocation: Invocation<'_>) -> Result<ExecutionResult, AdminError> {
        let request = invocation.request;
        let cancel = request.cancellation();

        if cancel.is_cancelled() {
            debug!("Not starting cancelled command: {}", request.display());
            return Err(AdminError::Cancelled);
        }

        let elevation = self.elevation(&invocation);
        info!(
            "Executing{}: {}",
            if matches!(elevation, Elevation::None) {
                ""
            } else {
                " (elevated)"
            },
            request.display()
        );

        let started = Instant::now();
        let mut child = Self::build_command(request, &elevation)
            .spawn()
            .map_err(|e| AdminError::Spawn {
                program: request.program().to_string(),
                message: if e.kind() == std::io::ErrorKind::NotFound {
                    "command not found".to_string()
                } else {
                    e.to_string()
                },
            })?;
        let pgid = child.id();

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        Self::feed_stdin(
            &mut child,
            &elevation,
            invocation.credential,
            request.secret_input(),
        )
        .await;

        let ending = tokio::select! {
            status = child.wait() => Ending::Exited(status?),
            () = tokio::time::sleep(invocation.timeout) => Ending::TimedOut,
            () = cancel.cancelled() => Ending::Cancelled,
        };

        let (exit_code, timed_out) = match ending {
            Ending::Exited(status) => (status.code(), false),
            Ending::TimedOut => {
                warn!(
                    "{} timed out after {:?}, terminating process group",
                    request.program(),
                    invocation.timeout
                );
                // sudo relays SIGTERM to the elevated command but cannot relay SIGKILL.
                Self::terminate(&mut child, pgid, invocation.grace).await;
                if let Some(pgid) = pgid
                    && group_exists(pgid)
                {
                    warn!("Process group {pgid} still has members after termination");
                }
                (None, true)
            }
            Ending::Cancelled => {
                info!("Cancelling {}", request.program());
                Self::terminate(&mut child, pgid, invocation.grace).await;
                stdout.abort();
                stderr.abort();
                return Err(AdminError::Cancelled);
            }
        };

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;
        let duration = started.elapsed();

        debug!(
            "{} finished in {duration:?} with {exit_code:?}",
            request.program()
        );
        trace!("{} stdout: {stdout}", request.program());
        if !stderr.is_empty() {
            trace!("{} stderr: {stderr}", request.program());
        }

        Ok(ExecutionResult {
            stdout,
            stderr,
            exit_code,
            duration,
            timed_out,
        })
    }
}
