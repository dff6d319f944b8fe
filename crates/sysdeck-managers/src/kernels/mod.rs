mod version;

use std::collections::HashMap;
use std::path::PathBuf;

use log::{info, warn};

use sysdeck_backend::{
    AdminError, BootLoaderKind, Credential, Domain, KernelBuild, OpOutcome, PackageBackendKind,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use crate::boot::BootManager;
use crate::config_file::read_if_exists;
use crate::validate;

const IMAGE_PREFIX: &str = "vmlinuz-";

/// `/boot` artefacts removed when no package manager owns the kernel.
const ARTEFACTS: [&str; 4] = ["vmlinuz-", "initrd.img-", "config-", "System.map-"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelPaths {
    pub boot_dir: PathBuf,
    /// Release of the running kernel.
    pub os_release: PathBuf,
    /// One directory per installed release; Arch drops a `pkgbase` file in each.
    pub modules_dir: PathBuf,
}

impl Default for KernelPaths {
    fn default() -> Self {
        Self {
            boot_dir: PathBuf::from("/boot"),
            os_release: PathBuf::from("/proc/sys/kernel/osrelease"),
            modules_dir: PathBuf::from("/usr/lib/modules"),
        }
    }
}

/// What the part of a `vmlinuz-*` name after the prefix stands for.
#[derive(Debug, PartialEq, Eq)]
enum ImageName<'a> {
    Release(&'a str),
    /// Unversioned image named after its package, e.g. `linux-lts`.
    Package(&'a str),
}

fn classify_image(suffix: &str) -> Option<ImageName<'_>> {
    if suffix.is_empty() || suffix.contains("rescue") || suffix.ends_with(".old") {
        return None;
    }
    if suffix.starts_with(|c: char| c.is_ascii_digit()) {
        return suffix.contains('.').then_some(ImageName::Release(suffix));
    }
    Some(ImageName::Package(suffix))
}

/// Kernels to delete so that `keep` non-running kernels remain, newest
/// kept first. The running kernel is never part of the plan.
#[must_use]
pub fn plan_kernel_removal(kernels: &[KernelBuild], keep: usize) -> Vec<&KernelBuild> {
    let mut removable: Vec<&KernelBuild> = kernels.iter().filter(|k| !k.is_current).collect();
    removable.sort_by(|a, b| version::compare(&b.version, &a.version));
    removable.into_iter().skip(keep).collect()
}

/// Package that owns `release` for a backend, if kernels are packaged.
fn owning_package(backend: PackageBackendKind, release: &str) -> Option<String> {
    match backend {
        PackageBackendKind::Apt => Some(format!("linux-image-{release}")),
        PackageBackendKind::Dnf => Some(format!("kernel-{release}")),
        PackageBackendKind::Zypper => {
            let (version, flavour) = release.rsplit_once('-')?;
            Some(format!("kernel-{flavour}-{version}"))
        }
        PackageBackendKind::Pacman | PackageBackendKind::Brew => None,
    }
}

pub struct KernelManager {
    gateway: ExecutionGateway,
    packages: Option<PackageBackendKind>,
    paths: KernelPaths,
    boot: BootManager,
}

impl KernelManager {
    /// `boot` is used to regenerate the menu after removals.
    #[must_use]
    pub fn new(
        gateway: ExecutionGateway,
        packages: Option<PackageBackendKind>,
        paths: KernelPaths,
        boot: BootManager,
    ) -> Self {
        Self {
            gateway,
            packages,
            paths,
            boot,
        }
    }

    async fn running_release(&self) -> Result<String, AdminError> {
        Ok(read_if_exists(&self.paths.os_release)
            .await?
            .map(|release| release.trim().to_string())
            .unwrap_or_default())
    }

    /// Release named by each module directory's `pkgbase`, keyed by package.
    async fn pkgbase_releases(&self) -> Result<HashMap<String, String>, AdminError> {
        let mut releases = HashMap::new();
        let mut entries = match tokio::fs::read_dir(&self.paths.modules_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(releases),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let Some(release) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(pkgbase) = read_if_exists(&entry.path().join("pkgbase")).await? {
                releases.insert(pkgbase.trim().to_string(), release);
            }
        }
        Ok(releases)
    }

    /// Installed kernel images, newest first. Rescue images and
    /// unversioned images whose release cannot be resolved are left out.
    pub async fn list(&self) -> Result<Vec<KernelBuild>, AdminError> {
        let running = self.running_release().await?;
        let pkgbases = self.pkgbase_releases().await?;
        let mut entries = match tokio::fs::read_dir(&self.paths.boot_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut kernels = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(suffix) = name.to_str().and_then(|n| n.strip_prefix(IMAGE_PREFIX)) else {
                continue;
            };
            let (release, package) = match classify_image(suffix) {
                Some(ImageName::Release(release)) => (release.to_string(), None),
                Some(ImageName::Package(package)) => match pkgbases.get(package) {
                    Some(release) => (release.clone(), Some(package.to_string())),
                    None => {
                        warn!(
                            "Skipping {IMAGE_PREFIX}{suffix}: no module directory names its release"
                        );
                        continue;
                    }
                },
                None => continue,
            };
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            kernels.push(KernelBuild {
                is_current: release == running,
                version: release,
                path: entry.path(),
                size_bytes: metadata.len(),
                package,
            });
        }
        kernels.sort_by(|a, b| version::compare(&b.version, &a.version));
        Ok(kernels)
    }

    async fn uninstall(
        &self,
        kernel: &KernelBuild,
        cred: Option<&Credential>,
    ) -> Result<(), AdminError> {
        let release = validate::file_token("kernel", &kernel.version)?;
        let package = match (&kernel.package, self.packages) {
            (Some(name), Some(backend)) => Some((backend, name.clone())),
            (Some(name), None) => {
                return Err(AdminError::refused(format!(
                    "{release} belongs to package {name}, but no package manager was detected"
                )));
            }
            (None, backend) => backend
                .and_then(|backend| owning_package(backend, release).map(|name| (backend, name))),
        };

        let (domain, request) = match package {
            Some((PackageBackendKind::Apt, name)) => (
                Domain::Packages,
                ExecutionRequest::new("apt").args(["remove", "-y", "--"]).arg(name),
            ),
            Some((PackageBackendKind::Zypper, name)) => (
                Domain::Packages,
                ExecutionRequest::new("zypper")
                    .args(["--non-interactive", "remove", "--"])
                    .arg(name),
            ),
            Some((PackageBackendKind::Dnf, name)) => (
                Domain::Packages,
                ExecutionRequest::new("dnf").args(["remove", "-y", "--"]).arg(name),
            ),
            Some((PackageBackendKind::Pacman, name)) => (
                Domain::Packages,
                ExecutionRequest::new("pacman")
                    .args(["-R", "--noconfirm", "--"])
                    .arg(name),
            ),
            Some((PackageBackendKind::Brew, _)) => {
                return Err(AdminError::unsupported(Domain::Kernels, "brew", "remove kernel"));
            }
            None => (
                Domain::Kernels,
                ExecutionRequest::new("rm").args(["-f", "--"]).args(
                    ARTEFACTS
                        .iter()
                        .map(|prefix| self.paths.boot_dir.join(format!("{prefix}{release}")))
                        .map(|path| path.display().to_string()),
                ),
            ),
        };

        info!("Removing kernel {release}");
        self.gateway
            .mutate(domain, request.privileged(), cred)
            .await?;
        Ok(())
    }

    /// Removal is refused while the running kernel cannot be identified.
    async fn require_running_release(&self) -> Result<(), AdminError> {
        if self.running_release().await?.is_empty() {
            return Err(AdminError::refused(
                "the running kernel release is unknown; refusing to remove kernels",
            ));
        }
        Ok(())
    }

    async fn regenerate_menu(&self, cred: Option<&Credential>) {
        if self.boot.loader() != Some(BootLoaderKind::Grub) {
            return;
        }
        if let Err(e) = self.boot.update_with(cred).await {
            warn!("Kernels removed but GRUB regeneration failed: {e}");
        }
    }

    /// Removes every non-running kernel beyond the newest `keep`.
    pub async fn remove_old(
        &self,
        keep: usize,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.require_running_release().await?;
        let kernels = self.list().await?;
        let plan = plan_kernel_removal(&kernels, keep);
        if plan.is_empty() {
            return Ok(OpOutcome::ok("No old kernels to remove"));
        }

        for kernel in &plan {
            self.uninstall(kernel, cred.as_ref()).await?;
        }
        self.regenerate_menu(cred.as_ref()).await;
        Ok(OpOutcome::ok(format!("Removed {} old kernels", plan.len())))
    }

    pub async fn remove(
        &self,
        release: &str,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let release = validate::file_token("kernel", release.trim())?;
        self.require_running_release().await?;
        let kernels = self.list().await?;
        let Some(kernel) = kernels.iter().find(|k| k.version == release) else {
            return Ok(OpOutcome::failed(format!("Kernel {release} is not installed")));
        };
        if kernel.is_current {
            return Err(AdminError::refused(format!(
                "{release} is the running kernel"
            )));
        }

        self.uninstall(kernel, cred.as_ref()).await?;
        self.regenerate_menu(cred.as_ref()).await;
        Ok(OpOutcome::ok(format!("Removed kernel {release}")))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use sysdeck_backend::ErrorKind;
    use sysdeck_exec::testing::ScriptedRunner;

    use super::*;
    use crate::boot;

    fn build(version: &str, is_current: bool) -> KernelBuild {
        KernelBuild {
            version: version.to_string(),
            path: PathBuf::from(format!("/boot/vmlinuz-{version}")),
            size_bytes: 0,
            is_current,
            package: None,
        }
    }

    fn seed_boot(dir: &Path, releases: &[&str], running: &str) -> KernelPaths {
        let boot_dir = dir.join("boot");
        std::fs::create_dir(&boot_dir).expect("boot dir");
        for release in releases {
            std::fs::write(boot_dir.join(format!("vmlinuz-{release}")), b"kernel").expect("image");
            std::fs::write(boot_dir.join(format!("config-{release}")), b"cfg").expect("config");
        }
        let os_release = dir.join("osrelease");
        std::fs::write(&os_release, format!("{running}\n")).expect("osrelease");
        KernelPaths {
            boot_dir,
            os_release,
            modules_dir: dir.join("modules"),
        }
    }

    fn seed_pkgbase(paths: &KernelPaths, release: &str, pkgbase: &str) {
        let dir = paths.modules_dir.join(release);
        std::fs::create_dir_all(&dir).expect("modules dir");
        std::fs::write(dir.join("pkgbase"), format!("{pkgbase}\n")).expect("pkgbase");
    }

    #[test]
    fn image_names_are_classified() {
        assert_eq!(classify_image("6.1.0-18-amd64"), Some(ImageName::Release("6.1.0-18-amd64")));
        assert_eq!(classify_image("linux-lts"), Some(ImageName::Package("linux-lts")));
        assert_eq!(classify_image("0-rescue-0123456789abcdef"), None);
        assert_eq!(classify_image("6.1.0-18-amd64.old"), None);
        assert_eq!(classify_image(""), None);
    }

    #[tokio::test]
    async fn unversioned_arch_images_resolve_through_pkgbase() {
        let dir = tempfile::tempdir().expect("temp dir");
        let paths = seed_boot(dir.path(), &["linux", "linux-lts"], "6.7.4-arch1-1");
        seed_pkgbase(&paths, "6.7.4-arch1-1", "linux");
        seed_pkgbase(&paths, "6.6.15-1-lts", "linux-lts");
        let runner = Arc::new(ScriptedRunner::new());
        let kernels = KernelManager::new(
            Arc::clone(&runner).into_gateway(),
            Some(PackageBackendKind::Pacman),
            paths,
            BootManager::new(None),
        );

        let listed = kernels.list().await.expect("list");
        let summary: Vec<_> = listed
            .iter()
            .map(|k| (k.version.as_str(), k.package.as_deref(), k.is_current))
            .collect();
        assert_eq!(
            summary,
            [
                ("6.7.4-arch1-1", Some("linux"), true),
                ("6.6.15-1-lts", Some("linux-lts"), false),
            ]
        );

        let outcome = kernels.remove_old(0, None).await.expect("remove old");
        assert_eq!(outcome.message, "Removed 1 old kernels");
        assert_eq!(runner.command_lines(), ["pacman -R --noconfirm -- linux-lts"]);
    }

    #[tokio::test]
    async fn unresolvable_and_rescue_images_are_never_removed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let paths = seed_boot(
            dir.path(),
            &["linux", "0-rescue-0123456789abcdef", "6.7.9-200.fc39.x86_64"],
            "6.7.9-200.fc39.x86_64",
        );
        let runner = Arc::new(ScriptedRunner::new());
        let kernels = KernelManager::new(
            Arc::clone(&runner).into_gateway(),
            Some(PackageBackendKind::Dnf),
            paths,
            BootManager::new(None),
        );

        let listed = kernels.list().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_current);

        let outcome = kernels.remove_old(0, None).await.expect("remove old");
        assert_eq!(outcome.message, "No old kernels to remove");
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn removal_is_refused_when_the_running_release_is_unknown() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut paths = seed_boot(dir.path(), &["6.1.0-9-amd64", "6.1.0-18-amd64"], "");
        paths.os_release = dir.path().join("missing-osrelease");
        let runner = Arc::new(ScriptedRunner::new());
        let kernels = KernelManager::new(
            Arc::clone(&runner).into_gateway(),
            Some(PackageBackendKind::Apt),
            paths,
            BootManager::new(None),
        );

        let error = kernels.remove_old(0, None).await.expect_err("unknown running kernel");
        assert_eq!(error.kind(), ErrorKind::DomainInvariant);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn zypper_packages_carry_the_flavour() {
        assert_eq!(
            owning_package(PackageBackendKind::Zypper, "6.4.0-150600.23.25-default").as_deref(),
            Some("kernel-default-6.4.0-150600.23.25")
        );
        assert_eq!(
            owning_package(PackageBackendKind::Apt, "6.1.0-18-amd64").as_deref(),
            Some("linux-image-6.1.0-18-amd64")
        );
        assert_eq!(owning_package(PackageBackendKind::Pacman, "6.7.4-arch1-1"), None);
    }

    #[test]
    fn plan_keeps_the_newest_and_skips_the_running_kernel() {
        let kernels = [
            build("6.1.0-9-amd64", false),
            build("6.1.0-18-amd64", true),
            build("6.1.0-17-amd64", false),
            build("6.1.0-13-amd64", false),
        ];
        let plan: Vec<_> = plan_kernel_removal(&kernels, 1)
            .into_iter()
            .map(|k| k.version.as_str())
            .collect();
        assert_eq!(plan, ["6.1.0-13-amd64", "6.1.0-9-amd64"]);
        assert!(plan_kernel_removal(&kernels, 5).is_empty());
    }

    #[tokio::test]
    async fn listing_marks_the_running_kernel_and_sorts_newest_first() {
        let dir = tempfile::tempdir().expect("temp dir");
        let paths = seed_boot(dir.path(), &["6.1.0-9-amd64", "6.1.0-18-amd64"], "6.1.0-9-amd64");
        let runner = Arc::new(ScriptedRunner::new());
        let kernels = KernelManager::new(
            Arc::clone(&runner).into_gateway(),
            Some(PackageBackendKind::Apt),
            paths,
            BootManager::new(None),
        );

        let listed = kernels.list().await.expect("list");
        assert_eq!(listed[0].version, "6.1.0-18-amd64");
        assert!(!listed[0].is_current);
        assert!(listed[1].is_current);

        let error = kernels
            .remove("6.1.0-9-amd64", None)
            .await
            .expect_err("running kernel");
        assert_eq!(error.kind(), ErrorKind::DomainInvariant);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn unpackaged_kernels_are_deleted_from_boot_then_grub_regenerates() {
        let dir = tempfile::tempdir().expect("temp dir");
        let paths = seed_boot(
            dir.path(),
            &["6.7.4-arch1-1", "6.7.2-arch1-1", "6.6.1-arch1-1"],
            "6.7.4-arch1-1",
        );
        let boot_dir = paths.boot_dir.clone();
        let runner = Arc::new(ScriptedRunner::new());
        let gateway = Arc::clone(&runner).into_gateway();
        let layout = boot::BootLayout {
            grub_generator: boot::GrubGenerator::Mkconfig("grub-mkconfig"),
            grub_cfg: dir.path().join("grub.cfg"),
            ..boot::BootLayout::default()
        };
        let grub = BootManager::new(Some(boot::backend_for(
            BootLoaderKind::Grub,
            gateway.clone(),
            &layout,
        )));
        let kernels = KernelManager::new(gateway, Some(PackageBackendKind::Pacman), paths, grub);

        let outcome = kernels.remove_old(1, None).await.expect("remove old");
        assert_eq!(outcome.message, "Removed 1 old kernels");
        let lines = runner.command_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("rm -f -- "));
        assert!(lines[0].contains(&format!("{}", boot_dir.join("vmlinuz-6.6.1-arch1-1").display())));
        assert_eq!(lines[1], format!("grub-mkconfig -o {}", dir.path().join("grub.cfg").display()));
    }
}
