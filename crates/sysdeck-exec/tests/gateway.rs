use std::sync::Arc;
use std::time::Duration;

use sysdeck_backend::{AdminError, Credential, Domain, ErrorKind, PrivilegeFailure};
use sysdeck_exec::testing::{RecordedCall, ScriptedResponse, ScriptedRunner};
use sysdeck_exec::{CancellationToken, ExecutionGateway, ExecutionRequest, TimeoutPolicy};

fn assert_serial(calls: &[RecordedCall]) {
    let mut calls = calls.to_vec();
    calls.sort_by_key(|call| call.started);
    for pair in calls.windows(2) {
        assert!(
            pair[0].finished <= pair[1].started,
            "{} overlapped {}",
            pair[0].command_line(),
            pair[1].command_line()
        );
    }
}

/// Runs a stub that prints its pid (also its process group) and then
/// sleeps, so termination can be checked after the timeout fires.
#[cfg(unix)]
async fn run_pid_stub(timeout: Duration) -> (sysdeck_exec::ExecutionResult, Option<u32>) {
    let gateway = ExecutionGateway::system(TimeoutPolicy::default());
    let result = gateway
        .run(
            ExecutionRequest::new("sh")
                .args(["-c", "echo $$; exec sleep 5"])
                .timeout(timeout),
        )
        .await
        .expect("sh starts");
    let pid = result.stdout.trim().parse().ok();
    (result, pid)
}

#[cfg(unix)]
#[tokio::test]
async fn one_millisecond_timeout_kills_slow_command() {
    let started = std::time::Instant::now();
    let (result, pid) = run_pid_stub(Duration::from_millis(1)).await;

    assert!(result.timed_out);
    assert_eq!(result.exit_code, None);
    assert!(started.elapsed() < Duration::from_secs(4));
    // The stub may be stopped before it prints; when it did, it must be gone.
    if let Some(pid) = pid {
        assert!(!sysdeck_platform::group_exists(pid), "pid {pid} survived");
    }
}

#[cfg(unix)]
#[tokio::test]
async fn timed_out_command_is_confirmed_terminated() {
    let (result, pid) = run_pid_stub(Duration::from_millis(300)).await;

    assert!(result.timed_out);
    let pid = pid.expect("stub prints its pid before sleeping");
    assert!(!sysdeck_platform::group_exists(pid), "pid {pid} survived");
}

#[cfg(unix)]
#[tokio::test]
async fn checked_read_turns_timeout_into_timeout_error() {
    let gateway = ExecutionGateway::system(TimeoutPolicy::default());

    let error = gateway
        .read(
            ExecutionRequest::new("sleep")
                .arg("5")
                .timeout(Duration::from_millis(1)),
            None,
        )
        .await
        .expect_err("sleep cannot finish in 1ms");

    assert_eq!(error.kind(), ErrorKind::Timeout);
    assert!(matches!(error, AdminError::Timeout { ref program, .. } if program == "sleep"));
}

#[tokio::test]
async fn concurrent_mutations_in_one_domain_never_overlap() {
    let runner = Arc::new(
        ScriptedRunner::new().on(
            &["apt", "install"],
            ScriptedResponse::ok("").with_delay(Duration::from_millis(40)),
        ),
    );
    let gateway = runner.clone().into_gateway();

    let install = |name: &'static str| {
        let gateway = gateway.clone();
        async move {
            gateway
                .mutate(
                    Domain::Packages,
                    ExecutionRequest::new("apt")
                        .args(["install", "-y", "--", name])
                        .privileged(),
                    None,
                )
                .await
        }
    };

    let (a, b, c) = tokio::join!(install("pkgA"), install("pkgB"), install("pkgC"));
    a.expect("pkgA installs");
    b.expect("pkgB installs");
    c.expect("pkgC installs");

    let calls = runner.calls();
    assert_eq!(calls.len(), 3);
    assert_serial(&calls);
}

#[tokio::test]
async fn repository_changes_wait_for_package_installs() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on(
                &["dnf", "install"],
                ScriptedResponse::ok("").with_delay(Duration::from_millis(40)),
            )
            .on(
                &["dnf", "config-manager"],
                ScriptedResponse::ok("").with_delay(Duration::from_millis(40)),
            ),
    );
    let gateway = runner.clone().into_gateway();

    let (install, repo) = tokio::join!(
        gateway.mutate(
            Domain::Packages,
            ExecutionRequest::new("dnf").args(["install", "-y", "htop"]),
            None,
        ),
        gateway.mutate(
            Domain::Repositories,
            ExecutionRequest::new("dnf").args(["config-manager", "--set-enabled", "crb"]),
            None,
        ),
    );
    install.expect("install succeeds");
    repo.expect("repo toggle succeeds");

    assert_serial(&runner.calls());
}

#[tokio::test]
async fn cancelled_request_waiting_for_lock_never_runs() {
    let runner = Arc::new(ScriptedRunner::new());
    let gateway = runner.clone().into_gateway();
    let guard = gateway.lock(Domain::Firewall).await;

    let token = CancellationToken::new();
    token.cancel();
    let result = gateway
        .mutate(
            Domain::Firewall,
            ExecutionRequest::new("ufw")
                .args(["allow", "22/tcp"])
                .cancel_token(token),
            None,
        )
        .await;
    drop(guard);

    assert_eq!(result.map(|_| ()), Err(AdminError::Cancelled));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn privileged_call_without_credential_reports_credential_required() {
    let runner = Arc::new(ScriptedRunner::new().requiring_credential());
    let gateway = runner.clone().into_gateway();

    let result = gateway
        .mutate(
            Domain::Services,
            ExecutionRequest::new("systemctl")
                .args(["restart", "nginx.service"])
                .privileged(),
            None,
        )
        .await;

    assert_eq!(
        result.map(|_| ()),
        Err(AdminError::Privilege(PrivilegeFailure::CredentialRequired))
    );

    let credential = Credential::new("letmein1".to_string());
    gateway
        .mutate(
            Domain::Services,
            ExecutionRequest::new("systemctl")
                .args(["restart", "nginx.service"])
                .privileged(),
            Some(&credential),
        )
        .await
        .expect("credential unlocks the call");
    assert!(runner.calls()[1].had_credential);
}

#[tokio::test]
async fn non_zero_exit_carries_code_and_stderr() {
    let runner = Arc::new(ScriptedRunner::new().on(
        &["zypper"],
        ScriptedResponse::exit(104, "Package 'nope' not found.\n"),
    ));
    let gateway = runner.into_gateway();

    let error = gateway
        .mutate(
            Domain::Packages,
            ExecutionRequest::new("zypper").args(["--non-interactive", "install", "nope"]),
            None,
        )
        .await
        .expect_err("zypper fails");

    assert_eq!(
        error.to_string(),
        "zypper exited with status 104: Package 'nope' not found."
    );
}
