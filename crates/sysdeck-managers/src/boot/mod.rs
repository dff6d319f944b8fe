mod grub;
mod refind;
mod systemd_boot;

use std::path::{Path, PathBuf};

use log::info;

use sysdeck_backend::{
    AdminError, BootBackend, BootConfiguration, BootLoaderKind, Credential, Domain, OpOutcome,
};
use sysdeck_exec::ExecutionGateway;
use sysdeck_platform::Host;

use crate::validate;

pub use grub::{GrubBoot, GrubGenerator};
pub use refind::RefindBoot;
pub use systemd_boot::SystemdBoot;

/// Where each loader keeps its configuration on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootLayout {
    pub grub_cfg: PathBuf,
    pub grub_defaults: PathBuf,
    pub grub_generator: GrubGenerator,
    pub loader_dir: PathBuf,
    pub refind_conf: PathBuf,
}

impl Default for BootLayout {
    fn default() -> Self {
        Self {
            grub_cfg: PathBuf::from("/boot/grub/grub.cfg"),
            grub_defaults: PathBuf::from("/etc/default/grub"),
            grub_generator: GrubGenerator::UpdateGrub,
            loader_dir: PathBuf::from("/boot/loader"),
            refind_conf: PathBuf::from("/boot/efi/EFI/refind/refind.conf"),
        }
    }
}

impl BootLayout {
    /// Picks the first existing location of each file.
    #[must_use]
    pub fn detect(host: &dyn Host) -> Self {
        let first = |candidates: &[&str], fallback: &Path| {
            candidates
                .iter()
                .map(PathBuf::from)
                .find(|path| host.path_exists(path))
                .unwrap_or_else(|| fallback.to_path_buf())
        };
        let defaults = Self::default();
        Self {
            grub_cfg: first(
                &["/boot/grub/grub.cfg", "/boot/grub2/grub.cfg"],
                &defaults.grub_cfg,
            ),
            grub_generator: GrubGenerator::detect(host),
            loader_dir: first(&["/boot/loader", "/boot/efi/loader"], &defaults.loader_dir),
            ..defaults
        }
    }
}

#[must_use]
pub fn backend_for(
    kind: BootLoaderKind,
    gateway: ExecutionGateway,
    layout: &BootLayout,
) -> Box<dyn BootBackend> {
    match kind {
        BootLoaderKind::Grub => Box::new(GrubBoot::new(
            gateway,
            &layout.grub_cfg,
            &layout.grub_defaults,
            layout.grub_generator,
        )),
        BootLoaderKind::SystemdBoot => Box::new(SystemdBoot::new(gateway, &layout.loader_dir)),
        BootLoaderKind::Refind => Box::new(RefindBoot::new(gateway, &layout.refind_conf)),
    }
}

pub struct BootManager {
    backend: Option<Box<dyn BootBackend>>,
}

impl BootManager {
    #[must_use]
    pub fn new(backend: Option<Box<dyn BootBackend>>) -> Self {
        Self { backend }
    }

    fn backend(&self, operation: &'static str) -> Result<&dyn BootBackend, AdminError> {
        self.backend
            .as_deref()
            .ok_or_else(|| AdminError::no_backend(Domain::Boot, operation))
    }

    #[must_use]
    pub fn loader(&self) -> Option<BootLoaderKind> {
        self.backend.as_deref().map(|backend| backend.kind())
    }

    pub async fn config(&self) -> Result<BootConfiguration, AdminError> {
        self.backend("get config")?.config().await
    }

    pub async fn set_default_entry(
        &self,
        entry: &str,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("set default entry")?;
        let entry = validate::argument("entry", entry.trim())?;
        info!("Setting {} default entry to {entry:?}", backend.kind());
        backend.set_default_entry(entry, cred.as_ref()).await
    }

    pub async fn set_timeout(
        &self,
        seconds: u32,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("set timeout")?;
        info!("Setting {} timeout to {seconds}s", backend.kind());
        backend.set_timeout(seconds, cred.as_ref()).await
    }

    pub async fn update(&self, cred: Option<Credential>) -> Result<OpOutcome, AdminError> {
        self.update_with(cred.as_ref()).await
    }

    /// Regenerates with a borrowed credential, for callers that run it as
    /// the last step of a larger operation.
    pub(crate) async fn update_with(
        &self,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("update bootloader")?;
        info!("Updating {}", backend.kind());
        backend.update(cred).await
    }
}
