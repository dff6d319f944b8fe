use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use tokio::sync::{Mutex, OwnedMutexGuard};

use sysdeck_backend::{AdminError, Credential, Domain, PrivilegeFailure};

use crate::request::{ExecutionRequest, ExecutionResult, TimeoutPolicy};
use crate::runner::{Invocation, ProcessRunner, SystemRunner};

/// Package and repository operations drive the same tool and its lock.
fn lock_key(domain: Domain) -> Domain {
    match domain {
        Domain::Repositories => Domain::Packages,
        other => other,
    }
}

/// One mutex per lock key, created up front.
struct DomainLocks {
    locks: HashMap<Domain, Arc<Mutex<()>>>,
}

impl DomainLocks {
    fn new() -> Self {
        let locks = Domain::ALL
            .iter()
            .map(|domain| lock_key(*domain))
            .map(|key| (key, Arc::new(Mutex::new(()))))
            .collect();
        Self { locks }
    }

    async fn acquire(&self, domain: Domain) -> DomainGuard {
        let key = lock_key(domain);
        let mutex = self
            .locks
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(())));
        DomainGuard {
            domain,
            _guard: mutex.lock_owned().await,
        }
    }
}

/// Proof that mutations of a domain are currently serialized by the
/// holder. Released on drop.
pub struct DomainGuard {
    domain: Domain,
    _guard: OwnedMutexGuard<()>,
}

impl DomainGuard {
    #[must_use]
    pub fn domain(&self) -> Domain {
        self.domain
    }
}

/// Runs every external command for the managers.
#[derive(Clone)]
pub struct ExecutionGateway {
    runner: Arc<dyn ProcessRunner>,
    locks: Arc<DomainLocks>,
    policy: TimeoutPolicy,
}

enum CallKind {
    Read,
    Mutate,
}

impl ExecutionGateway {
    #[must_use]
    pub fn new(runner: Arc<dyn ProcessRunner>, policy: TimeoutPolicy) -> Self {
        Self {
            runner,
            locks: Arc::new(DomainLocks::new()),
            policy,
        }
    }

    /// Gateway backed by real processes.
    #[must_use]
    pub fn system(policy: TimeoutPolicy) -> Self {
        Self::new(Arc::new(SystemRunner::new()), policy)
    }

    #[must_use]
    pub fn policy(&self) -> TimeoutPolicy {
        self.policy
    }

    fn timeout_for(&self, request: &ExecutionRequest, kind: &CallKind) -> Duration {
        request.timeout_override().unwrap_or(match kind {
            CallKind::Read => self.policy.read,
            CallKind::Mutate => self.policy.mutate,
        })
    }

    async fn dispatch(
        &self,
        request: &ExecutionRequest,
        credential: Option<&Credential>,
        kind: &CallKind,
    ) -> Result<ExecutionResult, AdminError> {
        self.runner
            .run(Invocation {
                request,
                credential,
                timeout: self.timeout_for(request, kind),
                grace: self.policy.grace,
            })
            .await
    }

    /// Run without elevation. A timeout is reported through
    /// [`ExecutionResult::timed_out`], not as an error.
    ///
    /// # Errors
    /// Returns `Spawn` when the program cannot be started and `Cancelled`
    /// when the request's token fires.
    pub async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult, AdminError> {
        let request = request.privileged_if(false);
        self.dispatch(&request, None, &CallKind::Read).await
    }

    /// Run with elevation. The credential is only borrowed for this call.
    ///
    /// # Errors
    /// Same as [`ExecutionGateway::run`].
    pub async fn run_privileged(
        &self,
        request: ExecutionRequest,
        credential: Option<&Credential>,
    ) -> Result<ExecutionResult, AdminError> {
        let request = request.privileged();
        self.dispatch(&request, credential, &CallKind::Mutate).await
    }

    /// Run a read-only command and return its stdout.
    ///
    /// # Errors
    /// Execution failures, including timeouts and unaccepted exit codes.
    pub async fn read(
        &self,
        request: ExecutionRequest,
        credential: Option<&Credential>,
    ) -> Result<String, AdminError> {
        let result = self.dispatch(&request, credential, &CallKind::Read).await?;
        check(&request, result, self.timeout_for(&request, &CallKind::Read)).map(|r| r.stdout)
    }

    /// Serialize, run and check a mutating command.
    ///
    /// # Errors
    /// Execution failures, including timeouts and unaccepted exit codes.
    pub async fn mutate(
        &self,
        domain: Domain,
        request: ExecutionRequest,
        credential: Option<&Credential>,
    ) -> Result<ExecutionResult, AdminError> {
        let guard = tokio::select! {
            guard = self.lock(domain) => guard,
            () = request.cancellation().cancelled() => return Err(AdminError::Cancelled),
        };
        self.mutate_locked(&guard, request, credential).await
    }

    /// Like [`ExecutionGateway::mutate`] for callers already holding the
    /// domain lock across several steps.
    ///
    /// # Errors
    /// Execution failures, including timeouts and unaccepted exit codes.
    pub async fn mutate_locked(
        &self,
        _guard: &DomainGuard,
        request: ExecutionRequest,
        credential: Option<&Credential>,
    ) -> Result<ExecutionResult, AdminError> {
        let result = self
            .dispatch(&request, credential, &CallKind::Mutate)
            .await?;
        check(&request, result, self.timeout_for(&request, &CallKind::Mutate))
    }

    /// Hold the mutation lock for `domain` until the guard is dropped.
    pub async fn lock(&self, domain: Domain) -> DomainGuard {
        self.locks.acquire(domain).await
    }
}

/// Turns a raw result into an error when it did not succeed.
fn check(
    request: &ExecutionRequest,
    result: ExecutionResult,
    timeout: Duration,
) -> Result<ExecutionResult, AdminError> {
    let program = request.program().to_string();

    if result.timed_out {
        error!("{} timed out after {timeout:?}", request.display());
        return Err(AdminError::Timeout {
            program,
            after: timeout,
        });
    }

    if request.accepts(result.exit_code) {
        return Ok(result);
    }

    if request.is_privileged()
        && let Some(failure) = privilege_failure(&result.stderr)
    {
        warn!("Elevation for {program} failed: {failure}");
        return Err(AdminError::Privilege(failure));
    }

    error!(
        "Command failed: {} exited with {:?}",
        request.display(),
        result.exit_code
    );
    Err(AdminError::NonZeroExit {
        program,
        code: result.exit_code,
        stderr: result.stderr,
    })
}

fn privilege_failure(stderr: &str) -> Option<PrivilegeFailure> {
    let sudo_lines = stderr.lines().filter(|line| line.starts_with("sudo:"));
    for line in sudo_lines {
        if line.contains("a password is required") || line.contains("a terminal is required") {
            return Some(PrivilegeFailure::CredentialRequired);
        }
        if line.contains("incorrect password") || line.contains("no password was provided") {
            return Some(PrivilegeFailure::CredentialRejected);
        }
        if line.contains("not in the sudoers file") || line.contains("not allowed to execute") {
            return Some(PrivilegeFailure::NotPermitted);
        }
    }
    if stderr.contains("Sorry, try again.") {
        return Some(PrivilegeFailure::CredentialRejected);
    }
    None
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn result(code: Option<i32>, stderr: &str) -> ExecutionResult {
        ExecutionResult {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: code,
            duration: Duration::from_millis(5),
            timed_out: false,
        }
    }

    #[test]
    fn repositories_share_the_package_lock() {
        assert_eq!(lock_key(Domain::Repositories), Domain::Packages);
        assert_eq!(lock_key(Domain::Firewall), Domain::Firewall);
    }

    #[test]
    fn timed_out_result_becomes_timeout_error() {
        let request = ExecutionRequest::new("sleep").arg("5");
        let mut timed_out = result(None, "");
        timed_out.timed_out = true;

        let error = check(&request, timed_out, Duration::from_millis(1)).expect_err("timeout");

        assert_eq!(
            error,
            AdminError::Timeout {
                program: "sleep".to_string(),
                after: Duration::from_millis(1),
            }
        );
    }

    #[test]
    fn sudo_messages_map_to_privilege_failures() {
        let request = ExecutionRequest::new("apt").privileged();

        let required = check(
            &request,
            result(Some(1), "sudo: a password is required\n"),
            Duration::from_secs(1),
        );
        let rejected = check(
            &request,
            result(Some(1), "sudo: 1 incorrect password attempt\n"),
            Duration::from_secs(1),
        );
        let refused = check(
            &request,
            result(Some(1), "sudo: bob is not in the sudoers file.\n"),
            Duration::from_secs(1),
        );

        assert_eq!(
            required,
            Err(AdminError::Privilege(PrivilegeFailure::CredentialRequired))
        );
        assert_eq!(
            rejected,
            Err(AdminError::Privilege(PrivilegeFailure::CredentialRejected))
        );
        assert_eq!(
            refused,
            Err(AdminError::Privilege(PrivilegeFailure::NotPermitted))
        );
    }

    #[test]
    fn unprivileged_failures_keep_stderr() {
        let request = ExecutionRequest::new("dpkg").arg("-l");

        let error = check(
            &request,
            result(Some(2), "sudo: looks like sudo but is not\n"),
            Duration::from_secs(1),
        )
        .expect_err("non-zero exit");

        assert!(matches!(
            error,
            AdminError::NonZeroExit { code: Some(2), ref stderr, .. } if stderr.contains("looks like")
        ));
    }

    #[test]
    fn accepted_exit_codes_pass_the_check() {
        let request = ExecutionRequest::new("dnf")
            .arg("check-update")
            .accept_exit_code(100);

        assert!(check(&request, result(Some(100), ""), Duration::from_secs(1)).is_ok());
    }
}
