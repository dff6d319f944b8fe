mod launchd;
mod systemd;

use log::info;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, ServiceAction, ServiceBackend, ServiceBackendKind,
    ServiceUnit, Toggled,
};
use sysdeck_exec::ExecutionGateway;

use crate::validate;

pub use launchd::LaunchdServices;
pub use systemd::SystemdServices;

#[must_use]
pub fn backend_for(kind: ServiceBackendKind, gateway: ExecutionGateway) -> Box<dyn ServiceBackend> {
    match kind {
        ServiceBackendKind::Systemd => Box::new(SystemdServices::new(gateway)),
        ServiceBackendKind::Launchd => Box::new(LaunchdServices::new(gateway)),
    }
}

pub struct ServiceManager {
    backend: Option<Box<dyn ServiceBackend>>,
}

impl ServiceManager {
    #[must_use]
    pub fn new(backend: Option<Box<dyn ServiceBackend>>) -> Self {
        Self { backend }
    }

    fn backend(&self, operation: &'static str) -> Result<&dyn ServiceBackend, AdminError> {
        self.backend
            .as_deref()
            .ok_or_else(|| AdminError::no_backend(Domain::Services, operation))
    }

    pub async fn list(&self) -> Result<Vec<ServiceUnit>, AdminError> {
        self.backend("list")?.list().await
    }

    pub async fn status(&self, name: &str) -> Result<ServiceUnit, AdminError> {
        let backend = self.backend("status")?;
        backend.status(validate::token("service", name.trim())?).await
    }

    pub async fn control(
        &self,
        name: &str,
        action: ServiceAction,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend(action.as_str())?;
        let name = validate::token("service", name.trim())?;
        info!("{action} {name} via {}", backend.kind());
        backend.control(name, action, cred.as_ref()).await
    }

    pub async fn start(&self, name: &str, cred: Option<Credential>) -> Result<OpOutcome, AdminError> {
        self.control(name, ServiceAction::Start, cred).await
    }

    pub async fn stop(&self, name: &str, cred: Option<Credential>) -> Result<OpOutcome, AdminError> {
        self.control(name, ServiceAction::Stop, cred).await
    }

    pub async fn restart(
        &self,
        name: &str,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.control(name, ServiceAction::Restart, cred).await
    }

    pub async fn mask(&self, name: &str, cred: Option<Credential>) -> Result<OpOutcome, AdminError> {
        self.control(name, ServiceAction::Mask, cred).await
    }

    pub async fn unmask(
        &self,
        name: &str,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.control(name, ServiceAction::Unmask, cred).await
    }

    /// Enables or disables the unit at boot. The returned record is read
    /// back from the service manager after the change succeeded.
    pub async fn set_enabled(
        &self,
        name: &str,
        enabled: bool,
        cred: Option<Credential>,
    ) -> Result<Toggled<ServiceUnit>, AdminError> {
        let action = if enabled {
            ServiceAction::Enable
        } else {
            ServiceAction::Disable
        };
        let outcome = self.control(name, action, cred).await?;
        if !outcome.success {
            return Ok(Toggled::failed(outcome));
        }
        let record = self.status(name).await?;
        Ok(Toggled {
            outcome,
            record: Some(record),
        })
    }
}
