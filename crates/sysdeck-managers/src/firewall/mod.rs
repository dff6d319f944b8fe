mod firewalld;
mod pf;
mod rule;
mod ufw;

use log::info;

use sysdeck_backend::{
    AdminError, Credential, Domain, FirewallBackend, FirewallBackendKind, FirewallRule,
    FirewallStatus, OpOutcome, RuleSpec,
};
use sysdeck_exec::ExecutionGateway;

use rule::validate_spec;

pub use firewalld::FirewalldFirewall;
pub use pf::{ANCHOR as PF_ANCHOR, DEFAULT_ANCHOR_FILE as PF_ANCHOR_FILE, PfFirewall};
pub use ufw::UfwFirewall;

#[must_use]
pub fn backend_for(
    kind: FirewallBackendKind,
    gateway: ExecutionGateway,
) -> Box<dyn FirewallBackend> {
    match kind {
        FirewallBackendKind::Ufw => Box::new(UfwFirewall::new(gateway)),
        FirewallBackendKind::Firewalld => Box::new(FirewalldFirewall::new(gateway)),
        FirewallBackendKind::Pf => Box::new(PfFirewall::new(gateway, PF_ANCHOR_FILE)),
    }
}

/// Firewall facade. Rules are added and removed by `RuleSpec`; none of
/// the supported tools hands out stable rule identifiers.
pub struct FirewallManager {
    backend: Option<Box<dyn FirewallBackend>>,
}

impl FirewallManager {
    #[must_use]
    pub fn new(backend: Option<Box<dyn FirewallBackend>>) -> Self {
        Self { backend }
    }

    fn backend(&self, operation: &'static str) -> Result<&dyn FirewallBackend, AdminError> {
        self.backend
            .as_deref()
            .ok_or_else(|| AdminError::no_backend(Domain::Firewall, operation))
    }

    pub async fn status(&self, cred: Option<Credential>) -> Result<FirewallStatus, AdminError> {
        self.backend("status")?.status(cred.as_ref()).await
    }

    pub async fn list_rules(
        &self,
        cred: Option<Credential>,
    ) -> Result<Vec<FirewallRule>, AdminError> {
        self.backend("list rules")?.list_rules(cred.as_ref()).await
    }

    pub async fn add_rule(
        &self,
        spec: &RuleSpec,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("add rule")?;
        validate_spec(spec)?;
        info!("Adding {} rule via {}", spec.action, backend.kind());
        backend.add_rule(spec, cred.as_ref()).await
    }

    pub async fn remove_rule(
        &self,
        spec: &RuleSpec,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("remove rule")?;
        validate_spec(spec)?;
        info!("Removing {} rule via {}", spec.action, backend.kind());
        backend.remove_rule(spec, cred.as_ref()).await
    }

    pub async fn set_enabled(
        &self,
        enabled: bool,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend(if enabled { "enable" } else { "disable" })?;
        info!(
            "{} firewall via {}",
            if enabled { "Enabling" } else { "Disabling" },
            backend.kind()
        );
        backend.set_enabled(enabled, cred.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sysdeck_backend::{ErrorKind, FirewallAction, Protocol};
    use sysdeck_exec::testing::{ScriptedResponse, ScriptedRunner};

    use super::*;

    fn manager(kind: FirewallBackendKind, runner: &Arc<ScriptedRunner>) -> FirewallManager {
        FirewallManager::new(Some(backend_for(kind, Arc::clone(runner).into_gateway())))
    }

    #[tokio::test]
    async fn missing_backend_is_reported_per_operation() {
        let firewall = FirewallManager::new(None);
        let error = firewall.status(None).await.expect_err("no backend");
        assert_eq!(error, AdminError::no_backend(Domain::Firewall, "status"));
    }

    #[tokio::test]
    async fn invalid_specs_never_reach_the_tool() {
        let runner = Arc::new(ScriptedRunner::new());
        let firewall = manager(FirewallBackendKind::Ufw, &runner);
        let spec = RuleSpec::new(FirewallAction::Allow).with_port("22 && reboot");

        let error = firewall.add_rule(&spec, None).await.expect_err("invalid");
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn ufw_delete_reports_missing_rules_as_domain_failures() {
        let runner = Arc::new(ScriptedRunner::new().on(
            &["ufw", "delete"],
            ScriptedResponse::ok("Could not delete non-existent rule\n"),
        ));
        let firewall = manager(FirewallBackendKind::Ufw, &runner);
        let spec = RuleSpec::new(FirewallAction::Deny)
            .with_protocol(Protocol::Udp)
            .with_port("53");

        let outcome = firewall.remove_rule(&spec, None).await.expect("remove");
        assert!(!outcome.success);
        assert_eq!(runner.command_lines(), ["ufw delete deny 53/udp"]);
    }

    #[tokio::test]
    async fn firewalld_changes_are_permanent_and_reloaded() {
        let runner = Arc::new(ScriptedRunner::new());
        let firewall = manager(FirewallBackendKind::Firewalld, &runner);
        let spec = RuleSpec::new(FirewallAction::Allow)
            .with_protocol(Protocol::Tcp)
            .with_port("8443");

        firewall.add_rule(&spec, None).await.expect("add");
        assert_eq!(
            runner.command_lines(),
            [
                "firewall-cmd --permanent --add-port=8443/tcp",
                "firewall-cmd --reload"
            ]
        );
        assert!(runner.calls().iter().all(|call| call.privileged));
    }

    #[tokio::test]
    async fn stopped_firewalld_reports_inactive_without_listing() {
        let runner = Arc::new(ScriptedRunner::new().on(
            &["firewall-cmd", "--state"],
            ScriptedResponse::exit(252, "not running\n"),
        ));
        let firewall = manager(FirewallBackendKind::Firewalld, &runner);

        let status = firewall.status(None).await.expect("status");
        assert!(!status.active);
        assert!(status.rules.is_empty());
        assert_eq!(runner.calls().len(), 1);
    }
}
