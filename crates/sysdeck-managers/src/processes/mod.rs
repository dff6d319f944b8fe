use std::sync::LazyLock;

use log::info;
use regex::Regex;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, Parsed, ProcessInfo, ProcessSignal,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

static PS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s+(\S+)\s+([\d.]+)\s+([\d.]+)\s+(.+)$").expect("ps line regex")
});

/// `ps -eo pid=,user=,pcpu=,pmem=,args=` rows.
fn parse_ps(output: &str) -> Parsed<ProcessInfo> {
    let mut parsed = Parsed::new();
    for (index, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = PS_LINE.captures(line).and_then(|caps| {
            Some(ProcessInfo {
                pid: caps[1].parse().ok()?,
                user: caps[2].to_string(),
                cpu_percent: caps[3].parse().ok()?,
                mem_percent: caps[4].parse().ok()?,
                command: caps[5].trim_end().to_string(),
            })
        });
        match record {
            Some(record) => parsed.push(record),
            None => parsed.skip("ps", index + 1, line),
        }
    }
    parsed
}

const fn signal_name(signal: ProcessSignal) -> &'static str {
    match signal {
        ProcessSignal::Terminate => "TERM",
        ProcessSignal::Kill => "KILL",
    }
}

pub struct ProcessManager {
    gateway: ExecutionGateway,
}

impl ProcessManager {
    #[must_use]
    pub fn new(gateway: ExecutionGateway) -> Self {
        Self { gateway }
    }

    /// Running processes, optionally narrowed to those whose command or
    /// owner contains `filter` (case-insensitive).
    pub async fn list(&self, filter: Option<&str>) -> Result<Vec<ProcessInfo>, AdminError> {
        let request = ExecutionRequest::new("ps").args(["-eo", "pid=,user=,pcpu=,pmem=,args="]);
        let output = self.gateway.read(request, None).await?;
        let mut processes = parse_ps(&output).into_records();
        if let Some(filter) = filter.map(str::to_lowercase).filter(|f| !f.is_empty()) {
            processes.retain(|process| {
                process.command.to_lowercase().contains(&filter)
                    || process.user.to_lowercase().contains(&filter)
            });
        }
        Ok(processes)
    }

    /// Sends `signal` to `pid`, elevated when a credential is given.
    /// Init and sysdeck itself are never signalled.
    pub async fn signal(
        &self,
        pid: u32,
        signal: ProcessSignal,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        if pid <= 1 {
            return Err(AdminError::refused(format!("pid {pid} cannot be signalled")));
        }
        if pid == std::process::id() {
            return Err(AdminError::refused("sysdeck will not signal itself"));
        }
        if !self.list(None).await?.iter().any(|process| process.pid == pid) {
            return Ok(OpOutcome::failed(format!("No process with pid {pid}")));
        }

        let name = signal_name(signal);
        info!("Sending SIG{name} to {pid}");
        let target = pid.to_string();
        let request = ExecutionRequest::new("kill")
            .args(["-s", name, target.as_str()])
            .privileged_if(cred.is_some());
        self.gateway
            .mutate(Domain::Processes, request, cred.as_ref())
            .await?;
        Ok(OpOutcome::ok(format!("Sent SIG{name} to {pid}")))
    }
}
