use std::sync::LazyLock;

use async_trait::async_trait;
use log::info;
use regex::Regex;

use sysdeck_backend::{
    AdminError, Credential, Direction, Domain, FirewallAction, FirewallBackend,
    FirewallBackendKind, FirewallRule, FirewallStatus, OpOutcome, Parsed, Protocol, RuleSpec,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::rule::split_port_proto;

const FIREWALLD: FirewallBackendKind = FirewallBackendKind::Firewalld;

/// `firewall-cmd --state` exits 252 when the daemon is stopped.
const NOT_RUNNING: i32 = 252;

static RICH_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<key>family|source address|destination address|port port|protocol|service name|protocol value)="(?P<value>[^"]*)""#)
        .expect("rich rule attribute regex")
});

static RICH_ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(accept|reject|drop)\b").expect("rich rule action regex"));

fn rule(action: FirewallAction, zone: Option<&str>, raw: &str) -> FirewallRule {
    FirewallRule {
        action,
        direction: Direction::In,
        protocol: Protocol::Any,
        port: None,
        source: None,
        destination: None,
        service: None,
        zone: zone.map(str::to_string),
        ipv6: false,
        backend: FIREWALLD,
        raw: raw.to_string(),
    }
}

/// `--list-ports`: space separated `port/proto`.
pub(crate) fn parse_ports(output: &str, zone: Option<&str>) -> Parsed<FirewallRule> {
    let mut parsed = Parsed::new();
    for token in output.split_whitespace() {
        match split_port_proto(token) {
            Some((port, protocol)) => {
                let mut allowed = rule(FirewallAction::Allow, zone, token);
                allowed.port = Some(port);
                allowed.protocol = protocol;
                parsed.push(allowed);
            }
            None => parsed.skip(FIREWALLD.as_str(), 1, token),
        }
    }
    parsed
}

/// `--list-services`: space separated service names.
pub(crate) fn parse_services(output: &str, zone: Option<&str>) -> Vec<FirewallRule> {
    output
        .split_whitespace()
        .map(|service| {
            let mut allowed = rule(FirewallAction::Allow, zone, service);
            allowed.service = Some(service.to_string());
            allowed
        })
        .collect()
}

/// `--list-rich-rules`: one `rule ...` per line.
pub(crate) fn parse_rich_rules(output: &str, zone: Option<&str>) -> Parsed<FirewallRule> {
    let mut parsed = Parsed::new();

    for (index, line) in output.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some(action) = RICH_ACTION
            .captures(trimmed)
            .and_then(|caps| FirewallAction::from_name(&caps[1]))
            .filter(|_| trimmed.starts_with("rule"))
        else {
            parsed.skip(FIREWALLD.as_str(), index + 1, line);
            continue;
        };
        let mut entry = rule(action, zone, trimmed);
        for caps in RICH_ATTR.captures_iter(trimmed) {
            let value = caps["value"].to_string();
            match &caps["key"] {
                "family" => entry.ipv6 = value == "ipv6",
                "source address" => entry.source = Some(value),
                "destination address" => entry.destination = Some(value),
                "port port" => entry.port = Some(value),
                "protocol" | "protocol value" => {
                    entry.protocol = Protocol::from_name(&value).unwrap_or_default();
                }
                "service name" => entry.service = Some(value),
                _ => {}
            }
        }
        parsed.push(entry);
    }

    parsed
}

/// Rich rule text for specs the plain port/service lists cannot express.
pub(crate) fn rich_rule(spec: &RuleSpec) -> Result<String, AdminError> {
    if spec.direction == Direction::Out || spec.direction == Direction::Forward {
        return Err(AdminError::unsupported(
            Domain::Firewall,
            FIREWALLD.as_str(),
            "outbound rules",
        ));
    }
    let verdict = match spec.action {
        FirewallAction::Allow => "accept",
        FirewallAction::Deny => "drop",
        FirewallAction::Reject => "reject",
        FirewallAction::Limit => {
            return Err(AdminError::unsupported(
                Domain::Firewall,
                FIREWALLD.as_str(),
                "limit rules",
            ));
        }
    };

    let ipv6 = [&spec.source, &spec.destination]
        .into_iter()
        .flatten()
        .any(|address| address.contains(':'));
    let mut parts = vec![format!(
        "rule family=\"{}\"",
        if ipv6 { "ipv6" } else { "ipv4" }
    )];
    if let Some(source) = &spec.source {
        parts.push(format!("source address=\"{source}\""));
    }
    if let Some(destination) = &spec.destination {
        parts.push(format!("destination address=\"{destination}\""));
    }
    match (&spec.service, &spec.port, spec.protocol) {
        (Some(service), _, _) => parts.push(format!("service name=\"{service}\"")),
        (None, Some(port), Protocol::Tcp | Protocol::Udp) => {
            parts.push(format!("port port=\"{port}\" protocol=\"{}\"", spec.protocol));
        }
        (None, Some(_), _) => {
            return Err(AdminError::invalid("protocol", "firewalld ports need tcp or udp"));
        }
        (None, None, Protocol::Tcp | Protocol::Udp | Protocol::Icmp) => {
            parts.push(format!("protocol value=\"{}\"", spec.protocol));
        }
        (None, None, Protocol::Any) => {}
    }
    parts.push(verdict.to_string());
    Ok(parts.join(" "))
}

/// The `--add-*`/`--remove-*` flag value that expresses `spec`.
fn change_arg(spec: &RuleSpec, verb: &str) -> Result<String, AdminError> {
    let plain = spec.action == FirewallAction::Allow
        && spec.direction == Direction::In
        && spec.source.is_none()
        && spec.destination.is_none();
    if plain {
        if let Some(service) = &spec.service {
            return Ok(format!("--{verb}-service={service}"));
        }
        if let Some(port) = &spec.port {
            return match spec.protocol {
                Protocol::Tcp | Protocol::Udp => {
                    Ok(format!("--{verb}-port={}/{}", port.replace(':', "-"), spec.protocol))
                }
                _ => Err(AdminError::invalid("protocol", "firewalld ports need tcp or udp")),
            };
        }
    }
    Ok(format!("--{verb}-rich-rule={}", rich_rule(spec)?))
}

pub struct FirewalldFirewall {
    gateway: ExecutionGateway,
}

impl FirewalldFirewall {
    #[must_use]
    pub fn new(gateway: ExecutionGateway) -> Self {
        Self { gateway }
    }

    fn firewall_cmd<I, S>(args: I) -> ExecutionRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExecutionRequest::new("firewall-cmd").args(args).privileged()
    }

    /// Applies a permanent change and reloads, holding the lock for both.
    async fn change(&self, arg: String, cred: Option<&Credential>) -> Result<(), AdminError> {
        let guard = self.gateway.lock(Domain::Firewall).await;
        self.gateway
            .mutate_locked(&guard, Self::firewall_cmd(["--permanent".to_string(), arg]), cred)
            .await?;
        self.gateway
            .mutate_locked(&guard, Self::firewall_cmd(["--reload"]), cred)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FirewallBackend for FirewalldFirewall {
    fn kind(&self) -> FirewallBackendKind {
        FIREWALLD
    }

    async fn status(&self, cred: Option<&Credential>) -> Result<FirewallStatus, AdminError> {
        let state = self
            .gateway
            .read(
                Self::firewall_cmd(["--state"]).accept_exit_code(NOT_RUNNING),
                cred,
            )
            .await?;
        let mut status = FirewallStatus {
            backend: FIREWALLD,
            active: state.trim() == "running",
            default_zone: None,
            default_policy: None,
            rules: Vec::new(),
        };
        if !status.active {
            return Ok(status);
        }

        let zone = self
            .gateway
            .read(Self::firewall_cmd(["--get-default-zone"]), cred)
            .await?
            .trim()
            .to_string();
        let zone_ref = (!zone.is_empty()).then_some(zone.as_str());

        let ports = self
            .gateway
            .read(Self::firewall_cmd(["--list-ports"]), cred)
            .await?;
        let services = self
            .gateway
            .read(Self::firewall_cmd(["--list-services"]), cred)
            .await?;
        let rich = self
            .gateway
            .read(Self::firewall_cmd(["--list-rich-rules"]), cred)
            .await?;

        status.rules.extend(parse_services(&services, zone_ref));
        status.rules.extend(parse_ports(&ports, zone_ref).into_records());
        status.rules.extend(parse_rich_rules(&rich, zone_ref).into_records());
        status.default_zone = zone_ref.map(str::to_string);
        Ok(status)
    }

    async fn add_rule(
        &self,
        spec: &RuleSpec,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let arg = change_arg(spec, "add")?;
        info!("firewalld {arg}");
        self.change(arg, cred).await?;
        Ok(OpOutcome::ok("Rule added successfully"))
    }

    /// Rich rules are removed by their listed text so attribute order
    /// differences do not prevent a match.
    async fn remove_rule(
        &self,
        spec: &RuleSpec,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let mut arg = change_arg(spec, "remove")?;
        if arg.starts_with("--remove-rich-rule=") {
            let existing = self
                .list_rules(cred)
                .await?
                .into_iter()
                .find(|rule| rule.raw.starts_with("rule") && rule.to_spec() == *spec);
            let Some(existing) = existing else {
                return Ok(OpOutcome::failed("No matching rule"));
            };
            arg = format!("--remove-rich-rule={}", existing.raw);
        }
        self.change(arg, cred).await?;
        Ok(OpOutcome::ok("Rule removed successfully"))
    }

    async fn set_enabled(
        &self,
        enabled: bool,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let verb = if enabled { "start" } else { "stop" };
        self.gateway
            .mutate(
                Domain::Firewall,
                ExecutionRequest::new("systemctl")
                    .args([verb, "firewalld"])
                    .privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(format!("firewalld {verb}ed")))
    }
}
