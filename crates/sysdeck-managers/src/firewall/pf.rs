use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use log::{debug, info};
use regex::Regex;

use sysdeck_backend::{
    AdminError, Credential, Direction, Domain, FirewallAction, FirewallBackend,
    FirewallBackendKind, FirewallRule, FirewallStatus, OpOutcome, Parsed, Protocol, RuleSpec,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use crate::config_file::{LineEdit, apply_line_edits, read_if_exists};

const PF: FirewallBackendKind = FirewallBackendKind::Pf;

/// Anchor holding the rules this tool manages.
pub const ANCHOR: &str = "sysdeck";

pub const DEFAULT_ANCHOR_FILE: &str = "/etc/pf.anchors/sysdeck";

static RULE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)^
        (?P<action>pass|block)
        (?:\s+(?P<block>drop|return))?
        (?:\s+(?P<dir>in|out))?
        (?:\s+log(?:\s+\([^)]*\))?)?
        (?:\s+quick)?
        (?:\s+on\s+\S+)?
        (?:\s+(?P<af>inet6?))?
        (?:\s+proto\s+(?P<proto>\w+))?
        (?:\s+all
          |(?:\s+from\s+(?P<from>\S+)(?:\s+port\s+(?:=\s+)?(?:\{[^}]*\}|\S+))?)?
           (?:\s+to\s+(?P<to>\S+)(?:\s+port\s+(?:=\s+)?(?P<port>\{[^}]*\}|\S+))?)?
        )",
    )
    .expect("pf rule regex")
});

/// Ruleset lines that are not filter rules.
const NON_FILTER: [&str; 8] = [
    "anchor", "scrub", "scrub-anchor", "nat", "nat-anchor", "rdr", "rdr-anchor", "table",
];

fn parse_rule(line: &str) -> Option<FirewallRule> {
    let caps = RULE_LINE.captures(line.trim())?;
    let action = match (&caps["action"], caps.name("block").map(|m| m.as_str())) {
        ("pass", _) => FirewallAction::Allow,
        (_, Some("return")) => FirewallAction::Reject,
        _ => FirewallAction::Deny,
    };
    let direction = caps
        .name("dir")
        .and_then(|dir| Direction::from_name(dir.as_str()))
        .unwrap_or(Direction::Any);
    let protocol = caps
        .name("proto")
        .and_then(|proto| Protocol::from_name(proto.as_str()))
        .unwrap_or_default();
    let address = |name: &str| {
        caps.name(name)
            .map(|m| m.as_str())
            .filter(|value| *value != "any")
            .map(str::to_string)
    };

    let mut rule = FirewallRule {
        action,
        direction,
        protocol,
        port: None,
        source: address("from"),
        destination: address("to"),
        service: None,
        zone: None,
        ipv6: caps.name("af").is_some_and(|af| af.as_str() == "inet6"),
        backend: PF,
        raw: line.trim().to_string(),
    };
    if let Some(port) = caps.name("port").map(|m| m.as_str()) {
        let port = port
            .trim_start_matches('{')
            .trim_end_matches('}')
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(",");
        if port.starts_with(|c: char| c.is_ascii_digit()) {
            rule.port = Some(port);
        } else {
            rule.service = Some(port);
        }
    }
    Some(rule)
}

/// `pfctl -s rules` or an anchor file.
pub(crate) fn parse_rules(output: &str) -> Parsed<FirewallRule> {
    let mut parsed = Parsed::new();
    for (index, line) in output.lines().enumerate() {
        let trimmed = line.trim();
        let keyword = trimmed.split_whitespace().next().unwrap_or_default();
        if trimmed.is_empty() || trimmed.starts_with('#') || NON_FILTER.contains(&keyword) {
            continue;
        }
        match parse_rule(trimmed) {
            Some(rule) => parsed.push(rule),
            None => parsed.skip(PF.as_str(), index + 1, line),
        }
    }
    parsed
}

/// `pfctl -s info` starts with `Status: Enabled ...`.
pub(crate) fn parse_enabled(info: &str) -> bool {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("Status:"))
        .is_some_and(|status| status.trim_start().starts_with("Enabled"))
}

fn pf_port(port: &str) -> String {
    if port.contains(',') {
        format!("{{ {} }}", port.split(',').collect::<Vec<_>>().join(" "))
    } else {
        port.replace('-', ":")
    }
}

/// The anchor file line for `spec`. Removal matches on this exact text.
pub(crate) fn rule_line(spec: &RuleSpec) -> Result<String, AdminError> {
    if spec.service.is_some() {
        return Err(AdminError::unsupported(
            Domain::Firewall,
            PF.as_str(),
            "service rules",
        ));
    }
    let verb = match spec.action {
        FirewallAction::Allow => "pass",
        FirewallAction::Deny => "block drop",
        FirewallAction::Reject => "block return",
        FirewallAction::Limit => {
            return Err(AdminError::unsupported(
                Domain::Firewall,
                PF.as_str(),
                "limit rules",
            ));
        }
    };

    let mut parts = vec![verb.to_string()];
    match spec.direction {
        Direction::In => parts.push("in".to_string()),
        Direction::Out => parts.push("out".to_string()),
        Direction::Forward | Direction::Any => {}
    }
    parts.push("quick".to_string());
    match (spec.protocol, &spec.port) {
        (Protocol::Any, Some(_)) => {
            return Err(AdminError::invalid("protocol", "pf ports need tcp or udp"));
        }
        (Protocol::Any, None) => {}
        (protocol, _) => parts.push(format!("proto {protocol}")),
    }
    parts.push(format!(
        "from {} to {}",
        spec.source.as_deref().unwrap_or("any"),
        spec.destination.as_deref().unwrap_or("any")
    ));
    if let Some(port) = &spec.port {
        parts.push(format!("port {}", pf_port(port)));
    }
    Ok(parts.join(" "))
}

pub struct PfFirewall {
    gateway: ExecutionGateway,
    anchor_file: PathBuf,
}

impl PfFirewall {
    #[must_use]
    pub fn new(gateway: ExecutionGateway, anchor_file: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            anchor_file: anchor_file.into(),
        }
    }

    fn pfctl<I, S>(args: I) -> ExecutionRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExecutionRequest::new("pfctl").args(args).privileged()
    }

    /// Rewrites the anchor file and loads it, under one lock hold.
    async fn rewrite_anchor(
        &self,
        cred: Option<&Credential>,
        edit: impl FnOnce(&str) -> Option<String> + Send,
    ) -> Result<bool, AdminError> {
        let guard = self.gateway.lock(Domain::Firewall).await;
        let current = read_if_exists(&self.anchor_file).await?.unwrap_or_default();
        let Some(updated) = edit(&current) else {
            return Ok(false);
        };
        self.gateway
            .replace_file(&guard, &self.anchor_file, &updated, cred)
            .await?;
        self.gateway
            .mutate_locked(
                &guard,
                Self::pfctl(["-a", ANCHOR, "-f"]).arg(self.anchor_file.display().to_string()),
                cred,
            )
            .await?;
        Ok(true)
    }
}

#[async_trait]
impl FirewallBackend for PfFirewall {
    fn kind(&self) -> FirewallBackendKind {
        PF
    }

    async fn status(&self, cred: Option<&Credential>) -> Result<FirewallStatus, AdminError> {
        let info = self.gateway.read(Self::pfctl(["-s", "info"]), cred).await?;
        let main = self.gateway.read(Self::pfctl(["-s", "rules"]), cred).await?;
        let anchored = self
            .gateway
            .read(Self::pfctl(["-a", ANCHOR, "-s", "rules"]), cred)
            .await?;

        let mut rules = parse_rules(&main).into_records();
        rules.extend(parse_rules(&anchored).into_records());
        Ok(FirewallStatus {
            backend: PF,
            active: parse_enabled(&info),
            default_zone: None,
            default_policy: None,
            rules,
        })
    }

    async fn add_rule(
        &self,
        spec: &RuleSpec,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let line = rule_line(spec)?;
        info!("Adding pf rule to anchor {ANCHOR}: {line}");
        self.rewrite_anchor(cred, |current| {
            let mut updated = current.to_string();
            if !updated.is_empty() && !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(&line);
            updated.push('\n');
            Some(updated)
        })
        .await?;
        Ok(OpOutcome::ok("Rule added successfully"))
    }

    async fn remove_rule(
        &self,
        spec: &RuleSpec,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let line = rule_line(spec)?;
        let removed = self
            .rewrite_anchor(cred, |current| {
                let edits: BTreeMap<usize, LineEdit> = current
                    .lines()
                    .enumerate()
                    .filter(|(_, existing)| existing.trim() == line)
                    .map(|(index, _)| (index, LineEdit::Drop))
                    .collect();
                (!edits.is_empty()).then(|| apply_line_edits(current, &edits))
            })
            .await?;
        if !removed {
            debug!("No anchor line matched {line:?}");
            return Ok(OpOutcome::failed("No matching rule"));
        }
        Ok(OpOutcome::ok("Rule removed successfully"))
    }

    /// `pfctl -e` exits 1 when pf is already enabled, `-d` likewise.
    async fn set_enabled(
        &self,
        enabled: bool,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let flag = if enabled { "-e" } else { "-d" };
        let result = self
            .gateway
            .mutate(
                Domain::Firewall,
                Self::pfctl([flag]).accept_exit_code(1),
                cred,
            )
            .await?;
        let already = if enabled {
            "already enabled"
        } else {
            "not enabled"
        };
        if result.exit_code == Some(1) && !result.stderr.contains(already) {
            return Ok(OpOutcome::failed(result.stderr.trim().to_string()));
        }
        Ok(OpOutcome::ok(if enabled {
            "pf enabled"
        } else {
            "pf disabled"
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ruleset_lines_become_rules() {
        let output = "\
scrub-anchor \"com.apple/*\" all fragment reassemble
anchor \"com.apple/*\" all
pass in quick proto tcp from any to any port = 22 flags S/SA keep state
block drop in quick inet proto tcp from 10.0.0.0/8 to any port = 3306
block return out proto udp from any to 203.0.113.9 port = domain
pass all flags S/SA keep state
frobnicate everything
";
        let parsed = parse_rules(output);
        assert_eq!(parsed.skipped(), 1);
        let rules = parsed.records;
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0].action, FirewallAction::Allow);
        assert_eq!(rules[0].port.as_deref(), Some("22"));
        assert_eq!(rules[0].protocol, Protocol::Tcp);
        assert_eq!(rules[1].action, FirewallAction::Deny);
        assert_eq!(rules[1].source.as_deref(), Some("10.0.0.0/8"));
        assert_eq!(rules[2].action, FirewallAction::Reject);
        assert_eq!(rules[2].direction, Direction::Out);
        assert_eq!(rules[2].destination.as_deref(), Some("203.0.113.9"));
        assert_eq!(rules[2].service.as_deref(), Some("domain"));
        assert_eq!(rules[3].direction, Direction::Any);
    }

    #[test]
    fn info_reports_enabled_state() {
        assert!(parse_enabled("Status: Enabled for 0 days 01:02:03   Debug: Urgent\n"));
        assert!(!parse_enabled("Status: Disabled                     Debug: Urgent\n"));
    }

    #[test]
    fn anchor_lines_are_rendered_and_parsed_back() {
        let spec = RuleSpec::new(FirewallAction::Allow)
            .with_protocol(Protocol::Tcp)
            .with_port("80,443");
        let line = rule_line(&spec).expect("line");
        assert_eq!(line, "pass in quick proto tcp from any to any port { 80 443 }");
        assert_eq!(parse_rules(&line).records[0].to_spec(), spec);
    }

    #[test]
    fn ports_without_protocol_are_refused() {
        let spec = RuleSpec::new(FirewallAction::Deny).with_port("25");
        assert!(rule_line(&spec).is_err());
    }

    #[tokio::test]
    async fn removal_drops_the_matching_anchor_line() {
        use std::sync::Arc;

        use sysdeck_exec::testing::ScriptedRunner;

        let dir = tempfile::tempdir().expect("temp dir");
        let anchor = dir.path().join("sysdeck");
        std::fs::write(
            &anchor,
            "pass in quick proto tcp from any to any port 22\nblock drop in quick from 192.0.2.1 to any\n",
        )
        .expect("seed anchor");
        let runner = Arc::new(ScriptedRunner::new());
        let pf = PfFirewall::new(Arc::clone(&runner).into_gateway(), &anchor);

        let spec = RuleSpec::new(FirewallAction::Allow)
            .with_protocol(Protocol::Tcp)
            .with_port("22");
        let outcome = pf.remove_rule(&spec, None).await.expect("remove");
        assert!(outcome.success);
        assert_eq!(
            std::fs::read_to_string(&anchor).expect("read anchor"),
            "block drop in quick from 192.0.2.1 to any\n"
        );
        assert_eq!(
            runner.command_lines(),
            [format!("pfctl -a sysdeck -f {}", anchor.display())]
        );

        let again = pf.remove_rule(&spec, None).await.expect("remove again");
        assert!(!again.success);
    }
}
