use sysdeck_backend::{AdminError, Protocol, RuleSpec};

use crate::validate;

/// `22`, `80,443`, `6000:6007`, `8080-8090`.
fn is_port_spec(value: &str) -> bool {
    !value.is_empty()
        && value.chars().next().is_some_and(|c| c.is_ascii_digit())
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ',' | ':' | '-'))
}

/// Checks the user-supplied parts of a rule before any backend sees it.
pub(crate) fn validate_spec(spec: &RuleSpec) -> Result<(), AdminError> {
    if let Some(port) = &spec.port
        && !is_port_spec(port)
    {
        return Err(AdminError::invalid(
            "port",
            format!("{port:?} is not a port, list or range"),
        ));
    }
    if let Some(source) = &spec.source {
        validate::token("source", source)?;
    }
    if let Some(destination) = &spec.destination {
        validate::token("destination", destination)?;
    }
    if let Some(service) = &spec.service {
        validate::argument("service", service)?;
    }
    if spec.port.is_some() && spec.service.is_some() {
        return Err(AdminError::invalid(
            "service",
            "a rule names either a port or a service",
        ));
    }
    if spec.port.is_some() && spec.protocol == Protocol::Icmp {
        return Err(AdminError::invalid("protocol", "icmp has no ports"));
    }
    if spec.port.is_none()
        && spec.service.is_none()
        && spec.source.is_none()
        && spec.destination.is_none()
    {
        return Err(AdminError::invalid(
            "rule",
            "needs a port, service, source or destination",
        ));
    }
    Ok(())
}

/// `port[/proto]` token as printed by ufw and firewalld.
pub(crate) fn split_port_proto(token: &str) -> Option<(String, Protocol)> {
    let (port, protocol) = match token.split_once('/') {
        Some((port, proto)) => (port, Protocol::from_name(proto)?),
        None => (token, Protocol::Any),
    };
    is_port_spec(port).then(|| (port.to_string(), protocol))
}

/// Address-like tokens: IPs, CIDRs, host names with dots.
pub(crate) fn is_address(token: &str) -> bool {
    split_port_proto(token).is_none() && token.contains(['.', ':', '/'])
}

#[cfg(test)]
mod tests {
    use sysdeck_backend::{ErrorKind, FirewallAction};

    use super::*;

    #[test]
    fn port_tokens_split_into_port_and_protocol() {
        assert_eq!(split_port_proto("22/tcp"), Some(("22".to_string(), Protocol::Tcp)));
        assert_eq!(split_port_proto("80,443/udp"), Some(("80,443".to_string(), Protocol::Udp)));
        assert_eq!(split_port_proto("8080"), Some(("8080".to_string(), Protocol::Any)));
        assert_eq!(split_port_proto("OpenSSH"), None);
        assert_eq!(split_port_proto("10.0.0.0/24"), None);
    }

    #[test]
    fn addresses_are_recognised() {
        assert!(is_address("192.168.1.0/24"));
        assert!(is_address("fe80::1"));
        assert!(!is_address("22/tcp"));
        assert!(!is_address("OpenSSH"));
    }

    #[test]
    fn specs_are_validated() {
        let allow_ssh = RuleSpec::new(FirewallAction::Allow)
            .with_protocol(Protocol::Tcp)
            .with_port("22");
        assert!(validate_spec(&allow_ssh).is_ok());

        let injected = RuleSpec::new(FirewallAction::Allow).with_port("22; rm -rf /");
        assert_eq!(
            validate_spec(&injected).expect_err("bad port").kind(),
            ErrorKind::InvalidArgument
        );
        assert!(validate_spec(&RuleSpec::new(FirewallAction::Deny)).is_err());
        assert!(
            validate_spec(&RuleSpec::new(FirewallAction::Deny).with_source("--dry-run")).is_err()
        );
    }
}
