use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use sysdeck_backend::{
    AdminError, Credential, Direction, Domain, FirewallAction, FirewallBackend,
    FirewallBackendKind, FirewallRule, FirewallStatus, OpOutcome, Parsed, Protocol, RuleSpec,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::rule::{is_address, split_port_proto};

const UFW: FirewallBackendKind = FirewallBackendKind::Ufw;

static RULE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<to>\S.*?)\s{2,}(?P<action>ALLOW|DENY|REJECT|LIMIT)(?:\s+(?P<dir>IN|OUT|FWD))?\s{2,}(?P<from>.+?)\s*$",
    )
    .expect("ufw rule regex")
});

/// Strips a trailing ` (v6)` marker.
fn strip_v6(field: &str) -> (&str, bool) {
    match field.trim().strip_suffix("(v6)") {
        Some(rest) => (rest.trim_end(), true),
        None => (field.trim(), false),
    }
}

fn parse_rule(line: &str) -> Option<FirewallRule> {
    let caps = RULE_LINE.captures(line)?;
    let action = FirewallAction::from_name(&caps["action"])?;
    let direction = caps
        .name("dir")
        .and_then(|dir| Direction::from_name(dir.as_str()))
        .unwrap_or_default();

    let from = caps["from"]
        .split_once(" # ")
        .map_or(&caps["from"], |(from, _comment)| from);
    let (to, to_v6) = strip_v6(&caps["to"]);
    let (from, from_v6) = strip_v6(from);

    let mut rule = FirewallRule {
        action,
        direction,
        protocol: Protocol::Any,
        port: None,
        source: None,
        destination: None,
        service: None,
        zone: None,
        ipv6: to_v6 || from_v6,
        backend: UFW,
        raw: line.trim().to_string(),
    };

    if to != "Anywhere" {
        let mut unclassified = false;
        for token in to.split_whitespace() {
            if let Some((port, protocol)) = split_port_proto(token) {
                rule.port = Some(port);
                rule.protocol = protocol;
            } else if is_address(token) {
                rule.destination = Some(token.to_string());
            } else if token != "on" {
                unclassified = true;
            }
        }
        if unclassified && rule.port.is_none() && rule.destination.is_none() {
            rule.service = Some(to.to_string());
        }
    }

    if let Some(source) = from.split_whitespace().next()
        && source != "Anywhere"
    {
        rule.source = Some(source.to_string());
    }

    Some(rule)
}

/// `ufw status verbose`.
pub(crate) fn parse_status(output: &str) -> (FirewallStatus, Parsed<FirewallRule>) {
    let mut status = FirewallStatus {
        backend: UFW,
        active: false,
        default_zone: None,
        default_policy: None,
        rules: Vec::new(),
    };
    let mut parsed = Parsed::new();
    let mut in_table = false;

    for (index, line) in output.lines().enumerate() {
        let trimmed = line.trim();
        if let Some(state) = trimmed.strip_prefix("Status:") {
            status.active = state.trim() == "active";
        } else if let Some(policy) = trimmed.strip_prefix("Default:") {
            status.default_policy = Some(policy.trim().to_string());
        } else if trimmed.starts_with("To") && trimmed.contains("Action") {
            in_table = true;
        } else if !in_table || trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        } else if let Some(rule) = parse_rule(line) {
            parsed.push(rule);
        } else {
            parsed.skip(UFW.as_str(), index + 1, line);
        }
    }

    (status, parsed)
}

/// Arguments after `ufw` that create `spec`; `ufw delete` takes the same.
pub(crate) fn rule_args(spec: &RuleSpec) -> Result<Vec<String>, AdminError> {
    if spec.protocol == Protocol::Icmp {
        return Err(AdminError::unsupported(
            Domain::Firewall,
            UFW.as_str(),
            "icmp rules",
        ));
    }

    let mut args = Vec::new();
    if spec.direction == Direction::Forward {
        args.push("route".to_string());
    }
    args.push(spec.action.verb().to_string());
    if spec.direction == Direction::Out {
        args.push("out".to_string());
    }

    let simple = spec.source.is_none() && spec.destination.is_none();
    if simple {
        match (&spec.port, &spec.service) {
            (Some(port), _) if spec.protocol == Protocol::Any => args.push(port.clone()),
            (Some(port), _) => args.push(format!("{port}/{}", spec.protocol)),
            (None, Some(service)) => args.push(service.clone()),
            (None, None) => {
                return Err(AdminError::invalid("rule", "needs a port or service"));
            }
        }
        return Ok(args);
    }

    args.push("from".to_string());
    args.push(spec.source.clone().unwrap_or_else(|| "any".to_string()));
    args.push("to".to_string());
    args.push(spec.destination.clone().unwrap_or_else(|| "any".to_string()));
    if let Some(port) = &spec.port {
        args.push("port".to_string());
        args.push(port.clone());
    }
    if let Some(service) = &spec.service {
        args.push("app".to_string());
        args.push(service.clone());
    }
    if spec.protocol != Protocol::Any {
        args.push("proto".to_string());
        args.push(spec.protocol.to_string());
    }
    Ok(args)
}

pub struct UfwFirewall {
    gateway: ExecutionGateway,
}

impl UfwFirewall {
    #[must_use]
    pub fn new(gateway: ExecutionGateway) -> Self {
        Self { gateway }
    }

    fn ufw<I, S>(args: I) -> ExecutionRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExecutionRequest::new("ufw").args(args).privileged()
    }
}

#[async_trait]
impl FirewallBackend for UfwFirewall {
    fn kind(&self) -> FirewallBackendKind {
        UFW
    }

    async fn status(&self, cred: Option<&Credential>) -> Result<FirewallStatus, AdminError> {
        let output = self
            .gateway
            .read(Self::ufw(["status", "verbose"]), cred)
            .await?;
        let (mut status, rules) = parse_status(&output);
        status.rules = rules.into_records();
        Ok(status)
    }

    async fn add_rule(
        &self,
        spec: &RuleSpec,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let args = rule_args(spec)?;
        let result = self
            .gateway
            .mutate(Domain::Firewall, Self::ufw(args), cred)
            .await?;
        Ok(OpOutcome::ok(result.stdout.trim().to_string()))
    }

    async fn remove_rule(
        &self,
        spec: &RuleSpec,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let mut args = vec!["delete".to_string()];
        args.extend(rule_args(spec)?);
        let result = self
            .gateway
            .mutate(Domain::Firewall, Self::ufw(args), cred)
            .await?;
        let message = result.stdout.trim();
        if message.contains("Could not delete non-existent rule") {
            return Ok(OpOutcome::failed("No matching rule"));
        }
        Ok(OpOutcome::ok(message.to_string()))
    }

    async fn set_enabled(
        &self,
        enabled: bool,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let request = if enabled {
            Self::ufw(["--force", "enable"])
        } else {
            Self::ufw(["disable"])
        };
        let result = self
            .gateway
            .mutate(Domain::Firewall, request, cred)
            .await?;
        Ok(OpOutcome::ok(result.stdout.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERBOSE: &str = "\
Status: active
Logging: on (low)
Default: deny (incoming), allow (outgoing), disabled (routed)
New profiles: skip

To                         Action      From
--                         ------      ----
22/tcp                     ALLOW IN    Anywhere
80,443/tcp                 ALLOW IN    192.168.1.0/24
Apache Full                ALLOW IN    Anywhere                   # web
10.0.0.5                   DENY OUT    Anywhere
8080                       LIMIT IN    Anywhere
22/tcp (v6)                ALLOW IN    Anywhere (v6)
something unexpected
";

    #[test]
    fn verbose_status_is_parsed_into_rules() {
        let (status, parsed) = parse_status(VERBOSE);
        assert!(status.active);
        assert_eq!(
            status.default_policy.as_deref(),
            Some("deny (incoming), allow (outgoing), disabled (routed)")
        );
        assert_eq!(parsed.skipped(), 1);

        let rules = parsed.records;
        assert_eq!(rules.len(), 6);
        assert_eq!(rules[0].action, FirewallAction::Allow);
        assert_eq!(rules[0].protocol, Protocol::Tcp);
        assert_eq!(rules[0].port.as_deref(), Some("22"));
        assert_eq!(rules[1].source.as_deref(), Some("192.168.1.0/24"));
        assert_eq!(rules[2].service.as_deref(), Some("Apache Full"));
        assert_eq!(rules[2].source, None);
        assert_eq!(rules[3].direction, Direction::Out);
        assert_eq!(rules[3].destination.as_deref(), Some("10.0.0.5"));
        assert_eq!(rules[4].action, FirewallAction::Limit);
        assert_eq!(rules[4].protocol, Protocol::Any);
        assert!(rules[5].ipv6);
    }

    #[test]
    fn simple_rules_use_the_short_form() {
        let spec = RuleSpec::new(FirewallAction::Allow)
            .with_protocol(Protocol::Tcp)
            .with_port("22");
        assert_eq!(rule_args(&spec).expect("args"), ["allow", "22/tcp"]);

        let spec = RuleSpec::new(FirewallAction::Deny)
            .with_direction(Direction::Out)
            .with_port("25");
        assert_eq!(rule_args(&spec).expect("args"), ["deny", "out", "25"]);
    }

    #[test]
    fn sourced_rules_use_the_full_form() {
        let spec = RuleSpec::new(FirewallAction::Allow)
            .with_protocol(Protocol::Tcp)
            .with_port("5432")
            .with_source("10.0.0.0/8");
        assert_eq!(
            rule_args(&spec).expect("args"),
            ["allow", "from", "10.0.0.0/8", "to", "any", "port", "5432", "proto", "tcp"]
        );
    }

    #[test]
    fn parsed_rules_round_trip_to_the_same_arguments() {
        let (_, parsed) = parse_status(VERBOSE);
        let spec = parsed.records[0].to_spec();
        assert_eq!(rule_args(&spec).expect("args"), ["allow", "22/tcp"]);
    }
}
