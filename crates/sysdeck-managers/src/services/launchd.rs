use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, Parsed, ServiceAction, ServiceBackend,
    ServiceBackendKind, ServiceUnit,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

const LAUNCHD: &str = ServiceBackendKind::Launchd.as_str();

fn unit(label: &str, pid: Option<u32>, last_exit: Option<&str>) -> ServiceUnit {
    let running = pid.is_some();
    ServiceUnit {
        name: label.to_string(),
        load_state: "loaded".to_string(),
        active_state: if running { "active" } else { "inactive" }.to_string(),
        sub_state: match (running, last_exit) {
            (true, _) => "running".to_string(),
            (false, Some("0") | None) => "exited".to_string(),
            (false, Some(_)) => "failed".to_string(),
        },
        enabled: true,
        main_pid: pid,
        ..ServiceUnit::default()
    }
}

/// `launchctl list`: `PID  Status  Label`, `-` for no pid.
pub(crate) fn parse_launchctl_list(output: &str) -> Parsed<ServiceUnit> {
    let mut parsed = Parsed::new();

    for (index, line) in output.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with("PID") {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [pid, status, label] = fields.as_slice() else {
            parsed.skip(LAUNCHD, index + 1, line);
            continue;
        };
        parsed.push(unit(label, pid.parse().ok(), Some(*status)));
    }

    parsed
}

/// `launchctl list <label>`: a `"Key" = value;` dictionary.
pub(crate) fn parse_launchctl_info(label: &str, output: &str) -> ServiceUnit {
    let field = |key: &str| {
        output.lines().find_map(|line| {
            let (k, v) = line.trim().split_once('=')?;
            (k.trim().trim_matches('"') == key).then(|| v.trim().trim_end_matches(';').trim())
        })
    };
    unit(
        label,
        field("PID").and_then(|pid| pid.parse().ok()),
        field("LastExitStatus"),
    )
}

pub struct LaunchdServices {
    gateway: ExecutionGateway,
}

impl LaunchdServices {
    #[must_use]
    pub fn new(gateway: ExecutionGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ServiceBackend for LaunchdServices {
    fn kind(&self) -> ServiceBackendKind {
        ServiceBackendKind::Launchd
    }

    async fn list(&self) -> Result<Vec<ServiceUnit>, AdminError> {
        let output = self
            .gateway
            .read(ExecutionRequest::new("launchctl").arg("list"), None)
            .await?;
        Ok(parse_launchctl_list(&output).into_records())
    }

    async fn status(&self, name: &str) -> Result<ServiceUnit, AdminError> {
        let output = self
            .gateway
            .read(ExecutionRequest::new("launchctl").args(["list", name]), None)
            .await?;
        Ok(parse_launchctl_info(name, &output))
    }

    async fn control(
        &self,
        name: &str,
        action: ServiceAction,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let target = format!("system/{name}");
        let args: Vec<&str> = match action {
            ServiceAction::Start => vec!["start", name],
            ServiceAction::Stop => vec!["stop", name],
            ServiceAction::Restart => vec!["kickstart", "-k", target.as_str()],
            ServiceAction::Enable => vec!["enable", target.as_str()],
            ServiceAction::Disable => vec!["disable", target.as_str()],
            ServiceAction::Mask | ServiceAction::Unmask => {
                return Err(AdminError::unsupported(
                    Domain::Services,
                    LAUNCHD,
                    action.as_str(),
                ));
            }
        };
        self.gateway
            .mutate(
                Domain::Services,
                ExecutionRequest::new("launchctl").args(args).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(format!("{action} {name}: done")))
    }
}
