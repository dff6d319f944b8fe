//! In-memory [`ProcessRunner`] for exercising managers without touching
//! the host.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use sysdeck_backend::AdminError;

use crate::gateway::ExecutionGateway;
use crate::request::{ExecutionResult, TimeoutPolicy};
use crate::runner::{Invocation, ProcessRunner};

#[derive(Debug, Clone, Default)]
pub struct ScriptedResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub delay: Duration,
}

impl ScriptedResponse {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code: code,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct Rule {
    prefix: Vec<String>,
    response: ScriptedResponse,
    once: bool,
}

/// One observed invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub argv: Vec<String>,
    pub privileged: bool,
    pub had_credential: bool,
    pub had_secret_stdin: bool,
    pub started: Instant,
    pub finished: Instant,
}

impl RecordedCall {
    #[must_use]
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// Answers commands from argv-prefix rules, first match wins.
/// Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
    require_credential: bool,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl ScriptedRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Privileged calls without a credential fail the way `sudo -n` does.
    #[must_use]
    pub fn requiring_credential(mut self) -> Self {
        self.require_credential = true;
        self
    }

    #[must_use]
    pub fn on(self, prefix: &[&str], response: ScriptedResponse) -> Self {
        self.push_rule(prefix, response, false);
        self
    }

    /// Like [`ScriptedRunner::on`] but consumed by the first match, so a
    /// later rule can answer subsequent calls.
    #[must_use]
    pub fn once(self, prefix: &[&str], response: ScriptedResponse) -> Self {
        self.push_rule(prefix, response, true);
        self
    }

    /// Adds a rule to a runner that is already shared with a gateway.
    pub fn respond(&self, prefix: &[&str], response: ScriptedResponse) {
        self.push_rule(prefix, response, false);
    }

    fn push_rule(&self, prefix: &[&str], response: ScriptedResponse, once: bool) {
        let mut rules = locked(&self.rules);
        let rule = Rule {
            prefix: prefix.iter().map(ToString::to_string).collect(),
            response,
            once,
        };
        // Single-use rules take precedence over standing ones.
        if once {
            rules.insert(0, rule);
        } else {
            rules.push(rule);
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        locked(&self.calls).clone()
    }

    #[must_use]
    pub fn command_lines(&self) -> Vec<String> {
        locked(&self.calls)
            .iter()
            .map(RecordedCall::command_line)
            .collect()
    }

    fn respond_to(&self, argv: &[String]) -> ScriptedResponse {
        let mut rules = locked(&self.rules);
        let Some(index) = rules
            .iter()
            .position(|rule| argv.starts_with(&rule.prefix))
        else {
            return ScriptedResponse::default();
        };
        if rules[index].once {
            rules.remove(index).response
        } else {
            rules[index].response.clone()
        }
    }

    /// Wraps the runner in a gateway with the default policy.
    #[must_use]
    pub fn into_gateway(self: Arc<Self>) -> ExecutionGateway {
        ExecutionGateway::new(self, TimeoutPolicy::default())
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, invocation: Invocation<'_>) -> Result<ExecutionResult, AdminError> {
        let request = invocation.request;
        if request.cancellation().is_cancelled() {
            return Err(AdminError::Cancelled);
        }

        let argv: Vec<String> = request.argv().into_iter().map(str::to_string).collect();
        let started = Instant::now();
        let mut response = self.respond_to(&argv);

        if self.require_credential && request.is_privileged() && invocation.credential.is_none() {
            response = ScriptedResponse::exit(1, "sudo: a password is required\n");
        }

        let timed_out = response.delay > invocation.timeout;
        let wait = response.delay.min(invocation.timeout);
        let cancelled = tokio::select! {
            () = tokio::time::sleep(wait) => false,
            () = request.cancellation().cancelled() => true,
        };

        locked(&self.calls).push(RecordedCall {
            argv,
            privileged: request.is_privileged(),
            had_credential: invocation.credential.is_some(),
            had_secret_stdin: request.secret_input().is_some(),
            started,
            finished: Instant::now(),
        });

        if cancelled {
            return Err(AdminError::Cancelled);
        }

        Ok(ExecutionResult {
            stdout: if timed_out {
                String::new()
            } else {
                response.stdout
            },
            stderr: response.stderr,
            exit_code: if timed_out {
                None
            } else {
                Some(response.exit_code)
            },
            duration: started.elapsed(),
            timed_out,
        })
    }
}
